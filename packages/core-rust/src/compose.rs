//! Assembly of parsed fragments into one execution-ready query.

use std::sync::Arc;

use crate::expr::{GroupSpec, OrderSpec, Predicate, Projection};
use crate::query::{ParsedFragments, QueryRequest};
use crate::schema::EntityDescriptor;

/// Pagination bounds requested by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pagination {
    /// No offset, no limit, no page metadata.
    Disabled,
    /// Zero-based `page` of `size` rows; `size` is positive.
    Paged { page: u64, size: u64 },
}

impl Pagination {
    /// Derives pagination from request parameters: `size <= 0` disables it.
    #[must_use]
    pub fn new(page: u64, size: i64) -> Self {
        match u64::try_from(size) {
            Ok(size) if size > 0 => Pagination::Paged { page, size },
            _ => Pagination::Disabled,
        }
    }

    #[must_use]
    pub fn from_request(request: &QueryRequest) -> Self {
        Self::new(request.page, request.size)
    }
}

/// What the query returns per row.
#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    /// The whole entity, all fields un-aliased.
    Entity,
    Columns(Projection),
}

/// Fully assembled query against one entity. Built once per request.
#[derive(Debug, Clone, PartialEq)]
pub struct ComposedQuery {
    pub source: Arc<EntityDescriptor>,
    pub selection: Selection,
    pub filter: Option<Predicate>,
    pub group: Option<GroupSpec>,
    pub having: Option<Predicate>,
    pub order: Option<OrderSpec>,
    pub offset: u64,
    /// Maximum rows to return; `0` means unbounded.
    pub limit: u64,
}

impl ComposedQuery {
    /// Whether a total count accompanies the rows.
    #[must_use]
    pub fn is_paged(&self) -> bool {
        self.limit > 0
    }
}

/// Merges parsed fragments and pagination into a [`ComposedQuery`].
///
/// Performs no cross-fragment validation: whether grouping, having and the
/// projection fit together is decided by the backend at execution time. A
/// page past the end still yields `offset = page * size`.
#[must_use]
pub fn compose(
    source: Arc<EntityDescriptor>,
    fragments: ParsedFragments,
    pagination: Pagination,
) -> ComposedQuery {
    let (offset, limit) = match pagination {
        Pagination::Disabled => (0, 0),
        Pagination::Paged { page, size } => (page.saturating_mul(size), size),
    };
    let selection = fragments
        .projection
        .map_or(Selection::Entity, Selection::Columns);

    ComposedQuery {
        source,
        selection,
        filter: fragments.filter,
        group: fragments.group,
        having: fragments.having,
        order: fragments.order,
        offset,
        limit,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{Expr, Literal};
    use crate::schema::FieldType;

    fn book() -> Arc<EntityDescriptor> {
        Arc::new(
            EntityDescriptor::builder("Book")
                .field("id", FieldType::Integer)
                .build(),
        )
    }

    #[test]
    fn non_positive_size_disables_pagination() {
        assert_eq!(Pagination::new(3, 0), Pagination::Disabled);
        assert_eq!(Pagination::new(3, -5), Pagination::Disabled);
        assert_eq!(Pagination::new(3, 25), Pagination::Paged { page: 3, size: 25 });
    }

    #[test]
    fn disabled_pagination_has_no_bounds() {
        let query = compose(book(), ParsedFragments::default(), Pagination::Disabled);
        assert_eq!((query.offset, query.limit), (0, 0));
        assert!(!query.is_paged());
        assert_eq!(query.selection, Selection::Entity);
    }

    #[test]
    fn paged_offset_is_page_times_size() {
        let query = compose(
            book(),
            ParsedFragments::default(),
            Pagination::Paged { page: 2, size: 25 },
        );
        assert_eq!((query.offset, query.limit), (50, 25));
        assert!(query.is_paged());
    }

    #[test]
    fn out_of_range_page_keeps_offset() {
        let query = compose(
            book(),
            ParsedFragments::default(),
            Pagination::Paged { page: 1000, size: 20 },
        );
        assert_eq!(query.offset, 20_000);

        let huge = compose(
            book(),
            ParsedFragments::default(),
            Pagination::Paged { page: u64::MAX, size: 20 },
        );
        assert_eq!(huge.offset, u64::MAX);
    }

    #[test]
    fn carries_fragments_through() {
        let fragments = ParsedFragments {
            filter: Some(Predicate(Expr::Literal(Literal::Boolean(true)))),
            ..ParsedFragments::default()
        };
        let query = compose(book(), fragments, Pagination::Disabled);
        assert!(query.filter.is_some());
        assert!(query.group.is_none());
        assert_eq!(query.source.name(), "book");
    }
}
