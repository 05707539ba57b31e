//! In-memory [`ExecutionBackend`] backed by [`DashMap`].
//!
//! Each entity owns one copy-on-write table. Writers swap in a new table
//! version, readers clone the `Arc`s into a [`Snapshot`], so a running query
//! never observes a half-applied insert.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use dashmap::DashMap;
use rapq_core::schema::Member;
use rapq_core::{ComposedQuery, EntityDescriptor, EntityRegistry, Row, Value};
use tracing::debug;

use super::plan;
use super::table::{EntityTable, Snapshot};
use crate::traits::ExecutionBackend;

pub struct MemoryBackend {
    registry: Arc<EntityRegistry>,
    tables: DashMap<String, Arc<EntityTable>>,
}

impl MemoryBackend {
    /// Creates an empty backend for the registered entities.
    #[must_use]
    pub fn new(registry: Arc<EntityRegistry>) -> Self {
        Self {
            registry,
            tables: DashMap::new(),
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<EntityRegistry> {
        &self.registry
    }

    /// Stores one record and returns its identifier.
    ///
    /// A relation given as a nested object is stored first, and the
    /// relation then holds its identifier. A record whose identifier is
    /// already present replaces the stored one.
    ///
    /// # Errors
    ///
    /// Fails if the entity is unknown, the record is not an object, a member
    /// is undeclared or mistyped, or the identifier is missing.
    pub fn insert(&self, entity: &str, record: Value) -> anyhow::Result<Value> {
        let descriptor = Arc::clone(self.registry.resolve(entity)?);
        let Value::Map(fields) = record else {
            bail!("'{entity}' record must be a JSON object, got {}", record.type_name());
        };

        let mut row = Row::new();
        for (name, value) in fields {
            let value = match descriptor.member(&name) {
                Some(Member::Field(field)) => {
                    if !field.field_type.accepts(&value) {
                        bail!(
                            "'{entity}.{name}' expects {}, got {}",
                            field.field_type.as_str(),
                            value.type_name()
                        );
                    }
                    value
                }
                Some(Member::Relation(relation)) => match value {
                    Value::Map(_) => self
                        .insert(&relation.target, value)
                        .with_context(|| format!("in relation '{entity}.{name}'"))?,
                    other => other,
                },
                None => bail!("'{entity}' has no member '{name}'"),
            };
            row.insert(name, value);
        }

        let id = row
            .get(descriptor.id_field())
            .cloned()
            .unwrap_or(Value::Null);
        let key = id
            .key_text()
            .ok_or_else(|| anyhow!("'{entity}' record has no '{}'", descriptor.id_field()))?;

        let mut table = self.tables.entry(descriptor.name().to_string()).or_default();
        Arc::make_mut(&mut *table).upsert(key, row);
        Ok(id)
    }

    /// Loads a fixture document of the form `{"<entity>": [{record}, ...]}`.
    /// Entity keys may use the plural alias.
    ///
    /// # Errors
    ///
    /// Fails on malformed JSON, an unknown entity, or any rejected record.
    /// Records stored before the failing one are kept.
    pub fn load_json(&self, json: &str) -> anyhow::Result<usize> {
        let document: HashMap<String, Vec<Value>> =
            serde_json::from_str(json).context("fixture must map entity names to record arrays")?;

        let mut loaded = 0;
        for (entity, records) in document {
            let name = self.registry.resolve_collection(&entity)?.name().to_string();
            for (index, record) in records.into_iter().enumerate() {
                self.insert(&name, record)
                    .with_context(|| format!("{entity}[{index}]"))?;
                loaded += 1;
            }
        }
        debug!(records = loaded, "fixture loaded");
        Ok(loaded)
    }

    /// Reads a fixture file and loads it with [`Self::load_json`].
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read, or as [`Self::load_json`] does.
    pub fn load_file(&self, path: &Path) -> anyhow::Result<usize> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading data {}", path.display()))?;
        self.load_json(&text)
            .with_context(|| format!("in data {}", path.display()))
    }

    /// Number of stored records of an entity.
    #[must_use]
    pub fn len(&self, entity: &str) -> usize {
        self.tables.get(entity).map_or(0, |t| t.len())
    }

    pub(crate) fn snapshot(&self) -> Snapshot {
        Snapshot {
            registry: Arc::clone(&self.registry),
            tables: self
                .tables
                .iter()
                .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
                .collect(),
        }
    }
}

impl std::fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBackend")
            .field("entities", &self.registry.len())
            .field("tables", &self.tables.len())
            .finish()
    }
}

#[async_trait]
impl ExecutionBackend for MemoryBackend {
    async fn fetch(&self, query: &ComposedQuery) -> anyhow::Result<Vec<Row>> {
        Ok(plan::fetch(&self.snapshot(), query)?)
    }

    async fn count(&self, query: &ComposedQuery) -> anyhow::Result<u64> {
        Ok(plan::count(&self.snapshot(), query)?)
    }

    async fn find_by_id(&self, entity: &EntityDescriptor, id: &str) -> anyhow::Result<Option<Row>> {
        let snapshot = self.snapshot();
        Ok(snapshot
            .get(entity.name(), id)
            .map(|row| snapshot.materialize(entity, row)))
    }
}

#[cfg(test)]
mod tests {
    use rapq_core::{compose, FieldType, Fragment, Pagination, ParsedFragments, QueryRequest};
    use serde_json::json;

    use super::*;
    use crate::traits::UnsupportedQuery;

    fn registry() -> Arc<EntityRegistry> {
        let book = EntityDescriptor::builder("Book")
            .field("id", FieldType::Integer)
            .field("title", FieldType::Text)
            .field("pages", FieldType::Integer)
            .relation("author", "Author")
            .build();
        let author = EntityDescriptor::builder("Author")
            .field("id", FieldType::Integer)
            .field("firstName", FieldType::Text)
            .field("lastName", FieldType::Text)
            .relation("favourite", "Book")
            .build();
        Arc::new(EntityRegistry::new([book, author]).unwrap())
    }

    fn record(value: serde_json::Value) -> Value {
        serde_json::from_value(value).unwrap()
    }

    fn backend() -> MemoryBackend {
        let backend = MemoryBackend::new(registry());
        backend
            .load_json(
                &json!({
                    "authors": [
                        {"id": 1, "firstName": "Mark", "lastName": "Twain", "favourite": 2},
                        {"id": 2, "firstName": "Zdenek", "lastName": "Miller"}
                    ],
                    "books": [
                        {"id": 1, "title": "Hahaha", "pages": 120, "author": 1},
                        {"id": 2, "title": "Krtek", "pages": 40, "author": 2},
                        {"id": 3, "title": "Krtek a auticko", "pages": 32, "author": 2},
                        {"id": 4, "title": "Untitled", "pages": null}
                    ]
                })
                .to_string(),
            )
            .unwrap();
        backend
    }

    fn query(backend: &MemoryBackend, request: &QueryRequest) -> ComposedQuery {
        let registry = backend.registry();
        let source = Arc::clone(registry.resolve(&request.entity).unwrap());
        let fragments = ParsedFragments::parse(request, &registry.scope(&source)).unwrap();
        compose(source, fragments, Pagination::from_request(request))
    }

    fn titles(rows: &[Row]) -> Vec<&str> {
        rows.iter()
            .filter_map(|r| r.get("title").and_then(Value::as_str))
            .collect()
    }

    #[tokio::test]
    async fn filters_orders_and_pages() {
        let backend = backend();
        let request = QueryRequest::new("book")
            .with_fragment(Fragment::Where, "author.lastName = 'Miller'")
            .with_fragment(Fragment::OrderBy, "pages asc")
            .with_page(0, 1);
        let q = query(&backend, &request);

        let rows = backend.fetch(&q).await.unwrap();
        assert_eq!(titles(&rows), ["Krtek a auticko"]);
        assert_eq!(backend.count(&q).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn whole_entity_expands_relations_and_cuts_cycles() {
        let backend = backend();
        let request = QueryRequest::new("book")
            .with_fragment(Fragment::Where, "id = 1")
            .with_page(0, 0);
        let rows = backend.fetch(&query(&backend, &request)).await.unwrap();

        let Some(Value::Map(author)) = rows[0].get("author") else {
            panic!("author not expanded: {rows:?}");
        };
        assert_eq!(author.get("lastName"), Some(&Value::String("Twain".into())));
        // favourite points back to book, which is already being expanded
        assert_eq!(author.get("favourite"), Some(&Value::Int(2)));
    }

    #[tokio::test]
    async fn null_comparisons_filter_rows_out() {
        let backend = backend();
        let request = QueryRequest::new("book")
            .with_fragment(Fragment::Where, "pages < 100 or pages >= 100")
            .with_page(0, 0);
        let rows = backend.fetch(&query(&backend, &request)).await.unwrap();
        assert_eq!(rows.len(), 3);
    }

    #[tokio::test]
    async fn groups_aggregates_and_having() {
        let backend = backend();
        let request = QueryRequest::new("book")
            .with_fragment(Fragment::Select, "author.lastName as name, count(*) as n")
            .with_fragment(Fragment::Where, "author is not null")
            .with_fragment(Fragment::GroupBy, "author.lastName")
            .with_fragment(Fragment::Having, "count(*) > 1")
            .with_page(0, 25);
        let q = query(&backend, &request);

        let rows = backend.fetch(&q).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("name"), Some(&Value::String("Miller".into())));
        assert_eq!(rows[0].get("n"), Some(&Value::Int(2)));
        assert_eq!(backend.count(&q).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn aggregate_without_group_is_one_row() {
        let backend = backend();
        let request = QueryRequest::new("book")
            .with_fragment(Fragment::Select, "sum(pages) as total, max(title)")
            .with_page(0, 0);
        let rows = backend.fetch(&query(&backend, &request)).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("total"), Some(&Value::Int(192)));
        assert_eq!(rows[0].get("max(title)"), Some(&Value::String("Untitled".into())));
    }

    #[tokio::test]
    async fn rejects_unexecutable_shapes() {
        let backend = backend();
        let cases = [
            (Fragment::Having, "count(*) > 1", "having requires groupBy"),
            (Fragment::GroupBy, "title", "groupBy requires a select list"),
            (Fragment::Where, "count(*) > 1", "aggregates are not allowed in where; use having"),
        ];
        for (fragment, text, reason) in cases {
            let request = QueryRequest::new("book").with_fragment(fragment, text);
            let err = backend.fetch(&query(&backend, &request)).await.unwrap_err();
            assert_eq!(err.downcast::<UnsupportedQuery>().unwrap().0, reason);
        }

        let mixed = QueryRequest::new("book")
            .with_fragment(Fragment::Select, "title, count(*)");
        let err = backend.count(&query(&backend, &mixed)).await.unwrap_err();
        assert!(err.downcast_ref::<UnsupportedQuery>().is_some());
    }

    #[tokio::test]
    async fn out_of_range_page_is_empty_with_true_count() {
        let backend = backend();
        let request = QueryRequest::new("book").with_page(1000, 20);
        let q = query(&backend, &request);
        assert!(backend.fetch(&q).await.unwrap().is_empty());
        assert_eq!(backend.count(&q).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn ties_keep_insertion_order() {
        let backend = backend();
        let request = QueryRequest::new("book")
            .with_fragment(Fragment::OrderBy, "author.id desc")
            .with_page(0, 0);
        let rows = backend.fetch(&query(&backend, &request)).await.unwrap();
        assert_eq!(titles(&rows), ["Krtek", "Krtek a auticko", "Hahaha", "Untitled"]);
    }

    #[tokio::test]
    async fn find_by_id_matches_textual_identifier() {
        let backend = backend();
        let book = Arc::clone(backend.registry().resolve("book").unwrap());
        let row = backend.find_by_id(&book, "2").await.unwrap().unwrap();
        assert_eq!(row.get("title"), Some(&Value::String("Krtek".into())));
        assert!(backend.find_by_id(&book, "99").await.unwrap().is_none());
    }

    #[test]
    fn insert_stores_nested_relations_first() {
        let backend = MemoryBackend::new(registry());
        let id = backend
            .insert(
                "book",
                record(json!({"id": 7, "title": "Tom Sawyer", "author": {"id": 9, "lastName": "Twain"}})),
            )
            .unwrap();
        assert_eq!(id, Value::Int(7));
        assert_eq!(backend.len("author"), 1);
        assert_eq!(backend.len("book"), 1);
    }

    #[test]
    fn insert_rejects_bad_records() {
        let backend = MemoryBackend::new(registry());
        assert!(backend.insert("book", record(json!({"title": "no id"}))).is_err());
        assert!(backend.insert("book", record(json!({"id": 1, "isbn": "x"}))).is_err());
        assert!(backend.insert("book", record(json!({"id": "one"}))).is_err());
        assert!(backend.insert("shelf", record(json!({"id": 1}))).is_err());
        assert!(backend.insert("book", record(json!([1, 2]))).is_err());
    }

    #[test]
    fn upsert_replaces_in_place() {
        let backend = MemoryBackend::new(registry());
        backend.insert("book", record(json!({"id": 1, "title": "a"}))).unwrap();
        backend.insert("book", record(json!({"id": 1, "title": "b"}))).unwrap();
        assert_eq!(backend.len("book"), 1);
    }

    #[test]
    fn load_json_reports_failing_record() {
        let backend = MemoryBackend::new(registry());
        let err = backend
            .load_json(r#"{"books": [{"id": 1}, {"title": "x"}]}"#)
            .unwrap_err();
        assert!(format!("{err:#}").contains("books[1]"));
    }

    #[test]
    fn load_file_reads_fixture() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"books": [{{"id": 1, "title": "Hahaha"}}]}}"#).unwrap();

        let backend = MemoryBackend::new(registry());
        assert_eq!(backend.load_file(file.path()).unwrap(), 1);
        assert_eq!(backend.len("book"), 1);
    }

    #[test]
    fn load_file_reports_path_of_bad_fixture() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"book": [{{"id": 1, "isbn": "x"}}]}}"#).unwrap();

        let backend = MemoryBackend::new(registry());
        let err = backend.load_file(file.path()).unwrap_err();
        let message = format!("{err:#}");
        assert!(message.contains(&file.path().display().to_string()), "{message}");
        assert!(message.contains("book[0]"), "{message}");

        let missing = file.path().with_extension("missing");
        assert!(backend.load_file(&missing).is_err());
    }
}
