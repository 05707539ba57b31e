//! Entity registry: public entity name to schema descriptor.
//!
//! Populated once at startup and read-only afterwards, so it is shared
//! across requests behind an `Arc` without locking.

use std::collections::HashMap;
use std::sync::Arc;

use crate::expr::{ExprType, ExpressionError, FieldPath};
use crate::schema::{EntityDescriptor, Member};

/// Errors raised while building the registry from startup configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("entity '{name}' is registered more than once")]
    DuplicateEntity { name: String },
    #[error("entity '{entity}' declares member '{member}' more than once")]
    DuplicateMember { entity: String, member: String },
    #[error("entity '{entity}' has no identifier field '{field}'")]
    MissingIdField { entity: String, field: String },
    #[error("relation '{entity}.{relation}' targets unregistered entity '{target}'")]
    UnknownRelationTarget {
        entity: String,
        relation: String,
        target: String,
    },
}

/// Lookup failures surfaced to clients as "not found".
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NotFoundError {
    #[error("unknown entity '{name}'")]
    Entity { name: String },
    #[error("no '{entity}' record with id '{id}'")]
    Record { entity: String, id: String },
}

/// Immutable map from canonical entity name to descriptor.
#[derive(Debug, Clone)]
pub struct EntityRegistry {
    entities: HashMap<String, Arc<EntityDescriptor>>,
    order: Vec<String>,
}

impl EntityRegistry {
    /// Builds the registry, validating names, identifiers and relation targets.
    ///
    /// # Errors
    ///
    /// Returns a [`RegistryError`] if two descriptors share a name, a
    /// descriptor repeats a member or lacks its identifier field, or a
    /// relation targets an entity that is not part of the set.
    pub fn new(
        descriptors: impl IntoIterator<Item = EntityDescriptor>,
    ) -> Result<Self, RegistryError> {
        let mut entities = HashMap::new();
        let mut order = Vec::new();

        for descriptor in descriptors {
            validate_members(&descriptor)?;
            let name = descriptor.name().to_string();
            if entities.contains_key(&name) {
                return Err(RegistryError::DuplicateEntity { name });
            }
            order.push(name.clone());
            entities.insert(name, Arc::new(descriptor));
        }

        for descriptor in entities.values() {
            for relation in descriptor.relations() {
                if !entities.contains_key(&relation.target) {
                    return Err(RegistryError::UnknownRelationTarget {
                        entity: descriptor.name().to_string(),
                        relation: relation.name.clone(),
                        target: relation.target.clone(),
                    });
                }
            }
        }

        tracing::debug!(entities = ?order, "entity registry built");
        Ok(Self { entities, order })
    }

    /// Resolves an entity by its canonical name.
    ///
    /// # Errors
    ///
    /// Returns [`NotFoundError::Entity`] if no entity has that name.
    pub fn resolve(&self, name: &str) -> Result<&Arc<EntityDescriptor>, NotFoundError> {
        self.entities.get(name).ok_or_else(|| NotFoundError::Entity {
            name: name.to_string(),
        })
    }

    /// Resolves an entity by its canonical name or its plural alias
    /// (`books` for `book`). The exact name wins when both match.
    ///
    /// # Errors
    ///
    /// Returns [`NotFoundError::Entity`] if neither form is registered.
    pub fn resolve_collection(&self, name: &str) -> Result<&Arc<EntityDescriptor>, NotFoundError> {
        self.resolve(name).or_else(|err| {
            name.strip_suffix('s')
                .and_then(|singular| self.entities.get(singular))
                .ok_or(err)
        })
    }

    /// Returns a parse scope rooted at the given descriptor.
    #[must_use]
    pub fn scope<'a>(&'a self, root: &'a EntityDescriptor) -> EntityScope<'a> {
        EntityScope {
            registry: self,
            root,
        }
    }

    /// Descriptors in registration order.
    pub fn descriptors(&self) -> impl Iterator<Item = &Arc<EntityDescriptor>> {
        self.order.iter().filter_map(|name| self.entities.get(name))
    }

    /// Number of registered entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Whether no entity is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

fn validate_members(descriptor: &EntityDescriptor) -> Result<(), RegistryError> {
    let mut seen = std::collections::HashSet::new();
    let names = descriptor
        .fields()
        .iter()
        .map(|f| &f.name)
        .chain(descriptor.relations().iter().map(|r| &r.name));
    for name in names {
        if !seen.insert(name) {
            return Err(RegistryError::DuplicateMember {
                entity: descriptor.name().to_string(),
                member: name.clone(),
            });
        }
    }
    if descriptor.field(descriptor.id_field()).is_none() {
        return Err(RegistryError::MissingIdField {
            entity: descriptor.name().to_string(),
            field: descriptor.id_field().to_string(),
        });
    }
    Ok(())
}

/// Schema scope for expression parsing: a root entity plus the registry used
/// to follow relations from it.
#[derive(Debug, Clone, Copy)]
pub struct EntityScope<'a> {
    registry: &'a EntityRegistry,
    root: &'a EntityDescriptor,
}

impl<'a> EntityScope<'a> {
    /// The entity the scope is rooted at.
    #[must_use]
    pub fn root(&self) -> &'a EntityDescriptor {
        self.root
    }

    /// The registry relations are resolved through.
    #[must_use]
    pub fn registry(&self) -> &'a EntityRegistry {
        self.registry
    }

    /// Resolves a dotted path against the root entity, following relations.
    ///
    /// A leading segment equal to the root entity's name is accepted as an
    /// explicit root (`book.title` on `book`) unless the root has a member of
    /// that name.
    ///
    /// # Errors
    ///
    /// Returns [`ExpressionError::UnknownField`] if any segment does not
    /// resolve, or a non-final segment is a scalar field.
    pub fn resolve_path(&self, segments: &[String]) -> Result<FieldPath, ExpressionError> {
        let unknown = || ExpressionError::UnknownField {
            entity: self.root.name().to_string(),
            path: segments.join("."),
        };

        let members = match segments.split_first() {
            Some((first, rest))
                if !rest.is_empty()
                    && first == self.root.name()
                    && self.root.member(first).is_none() =>
            {
                rest
            }
            Some(_) => segments,
            None => return Err(unknown()),
        };

        let mut entity = self.root;
        let mut ty = None;
        for (i, segment) in members.iter().enumerate() {
            let last = i + 1 == members.len();
            match entity.member(segment) {
                Some(Member::Field(field)) if last => {
                    ty = Some(ExprType::from(field.field_type));
                }
                Some(Member::Relation(relation)) => {
                    let target = self
                        .registry
                        .resolve(&relation.target)
                        .map_err(|_| unknown())?;
                    if last {
                        ty = Some(ExprType::Entity(target.name().to_string()));
                    }
                    entity = target;
                }
                Some(Member::Field(_)) | None => return Err(unknown()),
            }
        }

        Ok(FieldPath {
            segments: members.to_vec(),
            ty: ty.ok_or_else(unknown)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldType;

    fn author() -> EntityDescriptor {
        EntityDescriptor::builder("Author")
            .field("id", FieldType::Integer)
            .field("firstName", FieldType::Text)
            .field("lastName", FieldType::Text)
            .relation("favourite", "Book")
            .build()
    }

    fn book() -> EntityDescriptor {
        EntityDescriptor::builder("Book")
            .field("id", FieldType::Integer)
            .field("title", FieldType::Text)
            .relation("author", "Author")
            .build()
    }

    fn registry() -> EntityRegistry {
        EntityRegistry::new([book(), author()]).unwrap()
    }

    fn path(text: &str) -> Vec<String> {
        text.split('.').map(str::to_string).collect()
    }

    #[test]
    fn resolves_by_canonical_name() {
        let registry = registry();
        assert_eq!(registry.resolve("book").unwrap().name(), "book");
        assert_eq!(
            registry.resolve("Book").unwrap_err(),
            NotFoundError::Entity {
                name: "Book".to_string()
            }
        );
    }

    #[test]
    fn resolve_collection_accepts_plural_alias() {
        let registry = registry();
        assert_eq!(registry.resolve_collection("books").unwrap().name(), "book");
        assert_eq!(registry.resolve_collection("author").unwrap().name(), "author");
        assert!(registry.resolve_collection("magazines").is_err());
    }

    #[test]
    fn rejects_duplicate_entities() {
        let err = EntityRegistry::new([book(), book(), author()]).unwrap_err();
        assert_eq!(
            err,
            RegistryError::DuplicateEntity {
                name: "book".to_string()
            }
        );
    }

    #[test]
    fn rejects_dangling_relations() {
        let err = EntityRegistry::new([book()]).unwrap_err();
        assert!(matches!(err, RegistryError::UnknownRelationTarget { target, .. } if target == "author"));
    }

    #[test]
    fn rejects_missing_id_field() {
        let tag = EntityDescriptor::builder("Tag")
            .field("label", FieldType::Text)
            .build();
        let err = EntityRegistry::new([tag]).unwrap_err();
        assert!(matches!(err, RegistryError::MissingIdField { field, .. } if field == "id"));
    }

    #[test]
    fn descriptors_keep_registration_order() {
        let registry = registry();
        let names: Vec<_> = registry.descriptors().map(|d| d.name().to_string()).collect();
        assert_eq!(names, vec!["book", "author"]);
    }

    #[test]
    fn scope_resolves_fields_through_relations() {
        let registry = registry();
        let book = registry.resolve("book").unwrap();
        let scope = registry.scope(book);

        let title = scope.resolve_path(&path("title")).unwrap();
        assert_eq!(title.ty, ExprType::Text);

        let last_name = scope.resolve_path(&path("author.lastName")).unwrap();
        assert_eq!(last_name.segments, path("author.lastName"));
        assert_eq!(last_name.ty, ExprType::Text);

        let cyclic = scope.resolve_path(&path("author.favourite.title")).unwrap();
        assert_eq!(cyclic.ty, ExprType::Text);

        let relation = scope.resolve_path(&path("author")).unwrap();
        assert_eq!(relation.ty, ExprType::Entity("author".to_string()));
    }

    #[test]
    fn scope_accepts_explicit_root_prefix() {
        let registry = registry();
        let scope = registry.scope(registry.resolve("book").unwrap());
        let title = scope.resolve_path(&path("book.title")).unwrap();
        assert_eq!(title.segments, path("title"));
    }

    #[test]
    fn scope_rejects_unknown_and_scalar_traversal() {
        let registry = registry();
        let scope = registry.scope(registry.resolve("book").unwrap());

        let err = scope.resolve_path(&path("nonexistent.field")).unwrap_err();
        assert_eq!(
            err,
            ExpressionError::UnknownField {
                entity: "book".to_string(),
                path: "nonexistent.field".to_string()
            }
        );
        assert!(scope.resolve_path(&path("title.length")).is_err());
    }
}
