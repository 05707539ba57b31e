//! Record tables and the read-only snapshot queries run against.

use std::collections::HashMap;
use std::sync::Arc;

use rapq_core::schema::Member;
use rapq_core::{EntityDescriptor, EntityRegistry, Row, Value};

/// Records of one entity in insertion order, indexed by identifier text.
#[derive(Debug, Clone, Default)]
pub struct EntityTable {
    rows: Vec<Row>,
    index: HashMap<String, usize>,
}

impl EntityTable {
    /// Inserts a record, replacing any record with the same identifier in place.
    pub(crate) fn upsert(&mut self, key: String, row: Row) {
        match self.index.get(&key) {
            Some(&pos) => self.rows[pos] = row,
            None => {
                self.index.insert(key, self.rows.len());
                self.rows.push(row);
            }
        }
    }

    pub(crate) fn get(&self, key: &str) -> Option<&Row> {
        self.index.get(key).map(|&pos| &self.rows[pos])
    }

    pub(crate) fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub(crate) fn len(&self) -> usize {
        self.rows.len()
    }
}

/// Point-in-time view of every table. Writers replace tables wholesale, so
/// a query sees one consistent state for its whole run.
pub(crate) struct Snapshot {
    pub(crate) registry: Arc<EntityRegistry>,
    pub(crate) tables: HashMap<String, Arc<EntityTable>>,
}

impl Snapshot {
    pub(crate) fn rows(&self, entity: &str) -> &[Row] {
        self.tables.get(entity).map(|t| t.rows()).unwrap_or_default()
    }

    /// Finds a record by the textual form of its identifier.
    pub(crate) fn get(&self, entity: &str, key: &str) -> Option<&Row> {
        self.tables.get(entity).and_then(|t| t.get(key))
    }

    fn follow(&self, target: &str, id: Option<&Value>) -> Option<&Row> {
        let key = id?.key_text()?;
        self.get(target, &key)
    }

    /// Expands a stored record into its client-facing form: every field
    /// present, relations replaced by the related record. A relation back to
    /// an entity already being expanded keeps its raw identifier.
    pub(crate) fn materialize(&self, entity: &EntityDescriptor, row: &Row) -> Row {
        self.expand(entity, row, &mut Vec::new())
    }

    fn expand(&self, entity: &EntityDescriptor, row: &Row, visited: &mut Vec<String>) -> Row {
        visited.push(entity.name().to_string());
        let mut out = Row::new();
        for field in entity.fields() {
            let value = row.get(&field.name).cloned().unwrap_or(Value::Null);
            out.insert(field.name.clone(), value);
        }
        for relation in entity.relations() {
            let raw = row.get(&relation.name);
            let value = if visited.contains(&relation.target) {
                raw.cloned().unwrap_or(Value::Null)
            } else {
                match (
                    self.registry.resolve(&relation.target),
                    self.follow(&relation.target, raw),
                ) {
                    (Ok(target), Some(related)) => Value::Map(self.expand(target, related, visited)),
                    _ => Value::Null,
                }
            };
            out.insert(relation.name.clone(), value);
        }
        visited.pop();
        out
    }

    /// Value of a resolved field path on a stored record of `entity`.
    ///
    /// Missing or dangling relations yield null. A path ending on a relation
    /// yields the expanded related record.
    pub(crate) fn path_value(&self, entity: &EntityDescriptor, row: &Row, segments: &[String]) -> Value {
        let Some((head, rest)) = segments.split_first() else {
            return Value::Null;
        };
        match entity.member(head) {
            Some(Member::Field(_)) => row.get(head).cloned().unwrap_or(Value::Null),
            Some(Member::Relation(relation)) => {
                let Ok(target) = self.registry.resolve(&relation.target) else {
                    return Value::Null;
                };
                let Some(related) = self.follow(&relation.target, row.get(head)) else {
                    return Value::Null;
                };
                if rest.is_empty() {
                    Value::Map(self.materialize(target, related))
                } else {
                    self.path_value(target, related, rest)
                }
            }
            None => Value::Null,
        }
    }
}
