//! Execution of composed queries against a snapshot: shape check, filter,
//! grouping, having, projection, ordering, then offset and limit.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use rapq_core::expr::{Direction, Expr};
use rapq_core::{ComposedQuery, Row, Selection, Value};

use super::eval::{Evaluator, Scope};
use super::table::Snapshot;
use crate::traits::UnsupportedQuery;

/// Rejects query shapes that have no meaning when executed.
pub(crate) fn validate(query: &ComposedQuery) -> Result<(), UnsupportedQuery> {
    let reject = |reason: String| Err(UnsupportedQuery(reason));

    if let Some(filter) = &query.filter {
        if filter.0.contains_aggregate() {
            return reject("aggregates are not allowed in where; use having".to_string());
        }
    }
    let keys = group_keys(query);
    if let Some(key) = keys.iter().find(|k| k.contains_aggregate()) {
        return reject(format!("aggregate '{key}' is not allowed in groupBy"));
    }
    if query.having.is_some() && query.group.is_none() {
        return reject("having requires groupBy".to_string());
    }

    let columns = match &query.selection {
        Selection::Entity if query.group.is_some() => {
            return reject("groupBy requires a select list".to_string());
        }
        Selection::Entity => None,
        Selection::Columns(projection) => Some(projection),
    };

    let order = query.order.iter().flat_map(|o| o.items.iter().map(|i| &i.expr));
    if !is_grouped_query(query) {
        if let Some(expr) = order.clone().find(|e| e.contains_aggregate()) {
            return reject(format!("aggregate '{expr}' in orderBy requires an aggregating select"));
        }
        return Ok(());
    }

    let projected = columns.into_iter().flat_map(|p| p.items.iter().map(|i| &i.expr));
    let having = query.having.iter().map(|h| &h.0);
    for expr in projected.chain(having).chain(order) {
        if !is_grouped(expr, keys) {
            return if query.group.is_some() {
                reject(format!("'{expr}' must appear in groupBy or be aggregated"))
            } else {
                reject(format!(
                    "'{expr}' must be aggregated when other columns are aggregated without groupBy"
                ))
            };
        }
    }
    Ok(())
}

fn group_keys(query: &ComposedQuery) -> &[Expr] {
    query
        .group
        .as_ref()
        .map(|g| g.items.as_slice())
        .unwrap_or_default()
}

/// Whether rows are collapsed into groups.
fn is_grouped_query(query: &ComposedQuery) -> bool {
    query.group.is_some()
        || matches!(&query.selection, Selection::Columns(p) if p.has_aggregate())
}

/// Whether an expression has one value per group.
fn is_grouped(expr: &Expr, keys: &[Expr]) -> bool {
    if keys.contains(expr) {
        return true;
    }
    match expr {
        Expr::Aggregate { .. } | Expr::Literal(_) => true,
        Expr::Path(_) => false,
        other => other.children().into_iter().all(|c| is_grouped(c, keys)),
    }
}

/// Group identity: key values compared with [`Value::total_cmp`], so numbers
/// that compare equal (`1` and `1.0`) share a group, as do nulls.
struct GroupKey(Vec<Value>);

impl Ord for GroupKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .iter()
            .zip(&other.0)
            .map(|(a, b)| a.total_cmp(b))
            .find(|o| o.is_ne())
            .unwrap_or_else(|| self.0.len().cmp(&other.0.len()))
    }
}

impl PartialOrd for GroupKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for GroupKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other).is_eq()
    }
}

impl Eq for GroupKey {}

/// The unit a result row is made from.
enum Unit<'a> {
    Row(&'a Row),
    Group(Vec<&'a Row>),
}

impl Unit<'_> {
    fn scope(&self) -> Scope<'_> {
        match self {
            Unit::Row(row) => Scope::Row(*row),
            Unit::Group(rows) => Scope::Group(rows.as_slice()),
        }
    }
}

/// Filters and groups the source rows; each surviving unit yields one result row.
fn units<'a>(snapshot: &'a Snapshot, query: &ComposedQuery, eval: &Evaluator<'_>) -> Vec<Unit<'a>> {
    let rows = snapshot
        .rows(query.source.name())
        .iter()
        .filter(|row| {
            query
                .filter
                .as_ref()
                .is_none_or(|f| eval.holds(&f.0, Scope::Row(*row)))
        });

    if !is_grouped_query(query) {
        return rows.map(Unit::Row).collect();
    }

    let keys = group_keys(query);
    let mut groups: Vec<Vec<&Row>> = Vec::new();
    if keys.is_empty() {
        // Aggregating select without groupBy: one group, even when empty.
        groups.push(rows.collect());
    } else {
        let mut positions: BTreeMap<GroupKey, usize> = BTreeMap::new();
        for row in rows {
            let key = GroupKey(keys.iter().map(|k| eval.eval(k, Scope::Row(row))).collect());
            let pos = *positions.entry(key).or_insert_with(|| {
                groups.push(Vec::new());
                groups.len() - 1
            });
            groups[pos].push(row);
        }
    }

    groups
        .into_iter()
        .map(Unit::Group)
        .filter(|unit| {
            query
                .having
                .as_ref()
                .is_none_or(|h| eval.holds(&h.0, unit.scope()))
        })
        .collect()
}

/// Number of result rows, ignoring order, offset and limit.
pub(crate) fn count(snapshot: &Snapshot, query: &ComposedQuery) -> Result<u64, UnsupportedQuery> {
    validate(query)?;
    let eval = Evaluator::new(snapshot, &query.source);
    let total = units(snapshot, query, &eval).len();
    Ok(u64::try_from(total).unwrap_or(u64::MAX))
}

/// Result rows in order, after offset and limit.
pub(crate) fn fetch(snapshot: &Snapshot, query: &ComposedQuery) -> Result<Vec<Row>, UnsupportedQuery> {
    validate(query)?;
    let eval = Evaluator::new(snapshot, &query.source);
    let units = units(snapshot, query, &eval);

    let mut keyed: Vec<(Vec<Value>, &Unit<'_>)> = units
        .iter()
        .map(|unit| {
            let keys = query
                .order
                .iter()
                .flat_map(|o| &o.items)
                .map(|item| eval.eval(&item.expr, unit.scope()))
                .collect();
            (keys, unit)
        })
        .collect();

    if let Some(order) = &query.order {
        // Stable: ties keep insertion (or first-seen group) order.
        keyed.sort_by(|(a, _), (b, _)| {
            a.iter()
                .zip(b)
                .zip(&order.items)
                .map(|((x, y), item)| match item.direction {
                    Direction::Asc => x.total_cmp(y),
                    Direction::Desc => y.total_cmp(x),
                })
                .find(|o| o.is_ne())
                .unwrap_or(Ordering::Equal)
        });
    }

    let offset = usize::try_from(query.offset).unwrap_or(usize::MAX);
    let limit = match query.limit {
        0 => usize::MAX,
        n => usize::try_from(n).unwrap_or(usize::MAX),
    };

    Ok(keyed
        .into_iter()
        .skip(offset)
        .take(limit)
        .map(|(_, unit)| project(snapshot, query, &eval, unit))
        .collect())
}

fn project(snapshot: &Snapshot, query: &ComposedQuery, eval: &Evaluator<'_>, unit: &Unit<'_>) -> Row {
    match (&query.selection, unit) {
        (Selection::Columns(projection), unit) => projection
            .items
            .iter()
            .map(|item| (item.label(), eval.eval(&item.expr, unit.scope())))
            .collect(),
        (Selection::Entity, Unit::Row(row)) => snapshot.materialize(&query.source, row),
        // Grouping with a whole-entity selection is rejected by `validate`.
        (Selection::Entity, Unit::Group(rows)) => rows
            .first()
            .map(|row| snapshot.materialize(&query.source, row))
            .unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use proptest::prelude::*;
    use rapq_core::{compose, Fragment, Pagination, ParsedFragments, QueryRequest};

    use super::*;
    use crate::demo;
    use crate::storage::MemoryBackend;

    fn backend() -> MemoryBackend {
        let backend = MemoryBackend::new(Arc::new(demo::registry().unwrap()));
        demo::seed(&backend).unwrap();
        backend
    }

    fn compose_request(backend: &MemoryBackend, request: &QueryRequest) -> ComposedQuery {
        let registry = backend.registry();
        let source = Arc::clone(registry.resolve(&request.entity).unwrap());
        let fragments = ParsedFragments::parse(request, &registry.scope(&source)).unwrap();
        compose(source, fragments, Pagination::from_request(request))
    }

    fn rejection(backend: &MemoryBackend, request: QueryRequest) -> String {
        validate(&compose_request(backend, &request)).unwrap_err().0
    }

    #[test]
    fn grouped_columns_must_be_keys_or_aggregates() {
        let backend = backend();
        let reason = rejection(
            &backend,
            QueryRequest::new("book")
                .with_fragment(Fragment::Select, "title, count(*)")
                .with_fragment(Fragment::GroupBy, "author.lastName"),
        );
        assert_eq!(reason, "'title' must appear in groupBy or be aggregated");

        let reason = rejection(
            &backend,
            QueryRequest::new("book")
                .with_fragment(Fragment::Select, "count(*)")
                .with_fragment(Fragment::OrderBy, "title"),
        );
        assert!(reason.contains("without groupBy"), "{reason}");
    }

    #[test]
    fn aggregate_order_needs_aggregating_select() {
        let reason = rejection(
            &backend(),
            QueryRequest::new("book").with_fragment(Fragment::OrderBy, "count(*)"),
        );
        assert_eq!(reason, "aggregate 'count(*)' in orderBy requires an aggregating select");
    }

    #[test]
    fn expressions_over_keys_are_grouped() {
        let backend = backend();
        let query = compose_request(
            &backend,
            &QueryRequest::new("book")
                .with_fragment(Fragment::Select, "author.id * 10 as k, max(id) - min(id) as spread")
                .with_fragment(Fragment::GroupBy, "author.id"),
        );
        assert!(validate(&query).is_ok());

        let rows = fetch(&backend.snapshot(), &query).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("k"), Some(&Value::Int(10)));
        assert_eq!(rows[0].get("spread"), Some(&Value::Int(4)));
    }

    #[test]
    fn empty_filter_still_yields_one_aggregate_row() {
        let backend = backend();
        let query = compose_request(
            &backend,
            &QueryRequest::new("book")
                .with_fragment(Fragment::Select, "count(*) as n, sum(id) as s")
                .with_fragment(Fragment::Where, "id > 100"),
        );
        let rows = fetch(&backend.snapshot(), &query).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("n"), Some(&Value::Int(0)));
        assert_eq!(rows[0].get("s"), Some(&Value::Null));
        assert_eq!(count(&backend.snapshot(), &query).unwrap(), 1);
    }

    #[test]
    fn equal_numbers_share_a_group() {
        use rapq_core::{EntityDescriptor, EntityRegistry, FieldType};

        let item = EntityDescriptor::builder("Item")
            .field("id", FieldType::Integer)
            .field("price", FieldType::Decimal)
            .build();
        let backend = MemoryBackend::new(Arc::new(EntityRegistry::new([item]).unwrap()));
        backend
            .load_json(r#"{"items": [{"id": 1, "price": 1}, {"id": 2, "price": 1.0}, {"id": 3, "price": 2.5}]}"#)
            .unwrap();

        let filtered = compose_request(
            &backend,
            &QueryRequest::new("item").with_fragment(Fragment::Where, "price = 1"),
        );
        assert_eq!(fetch(&backend.snapshot(), &filtered).unwrap().len(), 2);

        let grouped = compose_request(
            &backend,
            &QueryRequest::new("item")
                .with_fragment(Fragment::Select, "price, count(*) as n")
                .with_fragment(Fragment::GroupBy, "price"),
        );
        let rows = fetch(&backend.snapshot(), &grouped).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("price"), Some(&Value::Int(1)));
        assert_eq!(rows[0].get("n"), Some(&Value::Int(2)));
        assert_eq!(rows[1].get("n"), Some(&Value::Int(1)));
    }

    #[test]
    fn oversized_like_pattern_is_unknown() {
        let backend = backend();
        let pattern = "_".repeat(50_000);
        for filter in [
            format!("title like '{pattern}'"),
            format!("title not like '{pattern}'"),
        ] {
            let query = compose_request(
                &backend,
                &QueryRequest::new("book").with_fragment(Fragment::Where, &filter),
            );
            assert!(fetch(&backend.snapshot(), &query).unwrap().is_empty(), "{filter}");
        }
    }

    proptest! {
        #[test]
        fn pages_partition_the_ordered_result(size in 1i64..8) {
            let backend = backend();
            let snapshot = backend.snapshot();
            let base = QueryRequest::new("book").with_fragment(Fragment::OrderBy, "title desc");

            let all = fetch(&snapshot, &compose_request(&backend, &base.clone().with_page(0, 0))).unwrap();
            let total = count(&snapshot, &compose_request(&backend, &base.clone().with_page(0, size))).unwrap();
            prop_assert_eq!(total, all.len() as u64);

            let mut paged = Vec::new();
            for page in 0..=total / size.unsigned_abs() {
                let query = compose_request(&backend, &base.clone().with_page(page, size));
                let rows = fetch(&snapshot, &query).unwrap();
                prop_assert!(rows.len() as u64 <= size.unsigned_abs());
                paged.extend(rows);
            }
            prop_assert_eq!(paged, all);
        }
    }
}
