use serde::{Deserialize, Serialize};

use crate::types::Value;

/// Scalar type of an entity field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    /// UTF-8 text.
    Text,
    /// Signed 64-bit integer.
    Integer,
    /// 64-bit floating point.
    Decimal,
    /// Boolean.
    Boolean,
}

impl FieldType {
    /// Lowercase type name, as used in schema files and diagnostics.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            FieldType::Text => "text",
            FieldType::Integer => "integer",
            FieldType::Decimal => "decimal",
            FieldType::Boolean => "boolean",
        }
    }

    /// Whether the type belongs to the numeric family.
    #[must_use]
    pub fn is_numeric(self) -> bool {
        matches!(self, FieldType::Integer | FieldType::Decimal)
    }

    /// Whether a stored value conforms to this type. Null is always accepted.
    #[must_use]
    pub fn accepts(self, value: &Value) -> bool {
        matches!(
            (self, value),
            (_, Value::Null)
                | (FieldType::Text, Value::String(_))
                | (FieldType::Integer, Value::Int(_))
                | (FieldType::Decimal, Value::Int(_) | Value::Float(_))
                | (FieldType::Boolean, Value::Bool(_))
        )
    }
}

/// Single scalar field of an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    /// Name of the field.
    pub name: String,
    /// Scalar type of the field.
    #[serde(rename = "type")]
    pub field_type: FieldType,
}

/// To-one relation from an entity to another registered entity.
///
/// Records hold the referenced record's identifier in the relation field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationDef {
    /// Name of the relation field.
    pub name: String,
    /// Canonical name of the referenced entity.
    pub target: String,
}

/// A named member of an entity: either a scalar field or a relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Member<'a> {
    Field(&'a FieldDef),
    Relation(&'a RelationDef),
}

/// Schema of one queryable entity.
///
/// Created once at startup and never mutated. The public `name` is derived
/// from the entity's type name, so registration and lookup always agree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityDescriptor {
    name: String,
    id_field: String,
    fields: Vec<FieldDef>,
    relations: Vec<RelationDef>,
}

impl EntityDescriptor {
    /// Starts a descriptor for the given entity type name (e.g. `"Book"`).
    #[must_use]
    pub fn builder(type_name: &str) -> EntityDescriptorBuilder {
        EntityDescriptorBuilder {
            descriptor: EntityDescriptor {
                name: canonical_name(type_name),
                id_field: DEFAULT_ID_FIELD.to_string(),
                fields: Vec::new(),
                relations: Vec::new(),
            },
        }
    }

    /// Canonical public name, e.g. `book` for type `Book`.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the identifier field.
    #[must_use]
    pub fn id_field(&self) -> &str {
        &self.id_field
    }

    /// Scalar fields in declaration order.
    #[must_use]
    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    /// Relations in declaration order.
    #[must_use]
    pub fn relations(&self) -> &[RelationDef] {
        &self.relations
    }

    /// Looks up a field or relation by name.
    #[must_use]
    pub fn member(&self, name: &str) -> Option<Member<'_>> {
        if let Some(field) = self.fields.iter().find(|f| f.name == name) {
            return Some(Member::Field(field));
        }
        self.relations
            .iter()
            .find(|r| r.name == name)
            .map(Member::Relation)
    }

    /// Looks up a scalar field by name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Looks up a relation by name.
    #[must_use]
    pub fn relation(&self, name: &str) -> Option<&RelationDef> {
        self.relations.iter().find(|r| r.name == name)
    }
}

/// Builder for [`EntityDescriptor`], preserving member declaration order.
#[derive(Debug, Clone)]
pub struct EntityDescriptorBuilder {
    descriptor: EntityDescriptor,
}

impl EntityDescriptorBuilder {
    /// Overrides the identifier field name (default `id`).
    #[must_use]
    pub fn id_field(mut self, name: &str) -> Self {
        self.descriptor.id_field = name.to_string();
        self
    }

    /// Adds a scalar field.
    #[must_use]
    pub fn field(mut self, name: &str, field_type: FieldType) -> Self {
        self.descriptor.fields.push(FieldDef {
            name: name.to_string(),
            field_type,
        });
        self
    }

    /// Adds a to-one relation to the entity with the given type name.
    #[must_use]
    pub fn relation(mut self, name: &str, target_type: &str) -> Self {
        self.descriptor.relations.push(RelationDef {
            name: name.to_string(),
            target: canonical_name(target_type),
        });
        self
    }

    #[must_use]
    pub fn build(self) -> EntityDescriptor {
        self.descriptor
    }
}

const DEFAULT_ID_FIELD: &str = "id";

fn default_id_field() -> String {
    DEFAULT_ID_FIELD.to_string()
}

/// Static-configuration form of an entity, as read from a schema file.
///
/// ```json
/// {"type": "Book", "fields": [{"name": "id", "type": "integer"}],
///  "relations": [{"name": "author", "target": "Author"}]}
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityDefinition {
    /// Entity type name; the public name is derived from it.
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default = "default_id_field")]
    pub id_field: String,
    #[serde(default)]
    pub fields: Vec<FieldDef>,
    #[serde(default)]
    pub relations: Vec<RelationDef>,
}

impl From<EntityDefinition> for EntityDescriptor {
    fn from(def: EntityDefinition) -> Self {
        let builder = EntityDescriptor::builder(&def.type_name).id_field(&def.id_field);
        let builder = def
            .fields
            .iter()
            .fold(builder, |b, f| b.field(&f.name, f.field_type));
        def.relations
            .iter()
            .fold(builder, |b, r| b.relation(&r.name, &r.target))
            .build()
    }
}

/// Derives the public entity name from a type name by lower-casing its first
/// character: `Book` -> `book`, `BookAuthor` -> `bookAuthor`.
#[must_use]
pub fn canonical_name(type_name: &str) -> String {
    let mut chars = type_name.trim().chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn book() -> EntityDescriptor {
        EntityDescriptor::builder("Book")
            .field("id", FieldType::Integer)
            .field("title", FieldType::Text)
            .relation("author", "Author")
            .build()
    }

    #[test]
    fn canonical_name_lowercases_first_character() {
        assert_eq!(canonical_name("Book"), "book");
        assert_eq!(canonical_name("BookAuthor"), "bookAuthor");
        assert_eq!(canonical_name("book"), "book");
        assert_eq!(canonical_name(""), "");
    }

    #[test]
    fn builder_derives_name_and_keeps_order() {
        let book = book();
        assert_eq!(book.name(), "book");
        assert_eq!(book.id_field(), "id");
        let names: Vec<_> = book.fields().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["id", "title"]);
        assert_eq!(book.relations()[0].target, "author");
    }

    #[test]
    fn member_finds_fields_and_relations() {
        let book = book();
        assert!(matches!(book.member("title"), Some(Member::Field(_))));
        assert!(matches!(book.member("author"), Some(Member::Relation(_))));
        assert!(book.member("isbn").is_none());
    }

    #[test]
    fn field_type_accepts_matching_values() {
        assert!(FieldType::Text.accepts(&Value::from("x")));
        assert!(FieldType::Decimal.accepts(&Value::Int(3)));
        assert!(!FieldType::Integer.accepts(&Value::Float(3.5)));
        assert!(!FieldType::Boolean.accepts(&Value::from("true")));
        assert!(FieldType::Boolean.accepts(&Value::Null));
    }

    #[test]
    fn definition_deserializes_into_descriptor() {
        let def: EntityDefinition = serde_json::from_str(
            r#"{"type": "Book",
                "fields": [{"name": "id", "type": "integer"}, {"name": "title", "type": "text"}],
                "relations": [{"name": "author", "target": "Author"}]}"#,
        )
        .unwrap();
        let descriptor = EntityDescriptor::from(def);
        assert_eq!(descriptor, book());
    }

    #[test]
    fn descriptor_serializes_camel_case() {
        let json = serde_json::to_value(book()).unwrap();
        assert_eq!(json["name"], "book");
        assert_eq!(json["idField"], "id");
        assert_eq!(json["fields"][1]["type"], "text");
        assert_eq!(json["relations"][0]["target"], "author");
    }
}
