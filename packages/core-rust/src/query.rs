//! Per-request query input and fragment parsing.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::expr::{
    self, ExpressionError, ExpressionKind, GroupSpec, OrderSpec, Predicate, Projection,
};
use crate::registry::EntityScope;

/// One of the five textual query inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Fragment {
    #[serde(rename = "select")]
    Select,
    #[serde(rename = "where")]
    Where,
    #[serde(rename = "groupBy")]
    GroupBy,
    #[serde(rename = "having")]
    Having,
    #[serde(rename = "orderBy")]
    OrderBy,
}

impl Fragment {
    /// Fragments in the order they are parsed and rendered into links.
    pub const ALL: [Fragment; 5] = [
        Fragment::Select,
        Fragment::Where,
        Fragment::GroupBy,
        Fragment::Having,
        Fragment::OrderBy,
    ];

    /// Query-string parameter name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Fragment::Select => "select",
            Fragment::Where => "where",
            Fragment::GroupBy => "groupBy",
            Fragment::Having => "having",
            Fragment::OrderBy => "orderBy",
        }
    }

    #[must_use]
    pub fn kind(self) -> ExpressionKind {
        match self {
            Fragment::Select => ExpressionKind::Projection,
            Fragment::Where | Fragment::Having => ExpressionKind::Predicate,
            Fragment::GroupBy => ExpressionKind::GroupSpec,
            Fragment::OrderBy => ExpressionKind::OrderSpec,
        }
    }
}

impl fmt::Display for Fragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A query against one entity, as received.
///
/// Empty fragment text means the fragment is absent. A `size` of zero or
/// less disables pagination.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QueryRequest {
    pub entity: String,
    pub where_text: String,
    pub order_by_text: String,
    pub select_text: String,
    pub group_by_text: String,
    pub having_text: String,
    pub page: u64,
    pub size: i64,
}

impl QueryRequest {
    #[must_use]
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            ..Self::default()
        }
    }

    /// Text of a fragment.
    #[must_use]
    pub fn fragment(&self, fragment: Fragment) -> &str {
        match fragment {
            Fragment::Select => &self.select_text,
            Fragment::Where => &self.where_text,
            Fragment::GroupBy => &self.group_by_text,
            Fragment::Having => &self.having_text,
            Fragment::OrderBy => &self.order_by_text,
        }
    }

    fn fragment_mut(&mut self, fragment: Fragment) -> &mut String {
        match fragment {
            Fragment::Select => &mut self.select_text,
            Fragment::Where => &mut self.where_text,
            Fragment::GroupBy => &mut self.group_by_text,
            Fragment::Having => &mut self.having_text,
            Fragment::OrderBy => &mut self.order_by_text,
        }
    }

    /// Returns the request with one fragment replaced.
    #[must_use]
    pub fn with_fragment(mut self, fragment: Fragment, text: impl Into<String>) -> Self {
        *self.fragment_mut(fragment) = text.into();
        self
    }

    #[must_use]
    pub fn with_page(mut self, page: u64, size: i64) -> Self {
        self.page = page;
        self.size = size;
        self
    }

    /// Returns the request addressed to another entity name, e.g. the
    /// canonical name once a plural alias has been resolved.
    #[must_use]
    pub fn with_entity(mut self, entity: impl Into<String>) -> Self {
        self.entity = entity.into();
        self
    }

    /// Whether `size` enables pagination.
    #[must_use]
    pub fn is_paged(&self) -> bool {
        self.size > 0
    }
}

/// A fragment that failed to parse, tagged with which fragment it was.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid '{fragment}' expression: {source}")]
pub struct ParseError {
    pub fragment: Fragment,
    #[source]
    pub source: ExpressionError,
}

/// The typed fragments of one request. Absent fragments are `None`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParsedFragments {
    pub projection: Option<Projection>,
    pub filter: Option<Predicate>,
    pub group: Option<GroupSpec>,
    pub having: Option<Predicate>,
    pub order: Option<OrderSpec>,
}

impl ParsedFragments {
    /// Parses every non-blank fragment of the request independently.
    ///
    /// # Errors
    ///
    /// Returns the [`ParseError`] of the first fragment, in
    /// [`Fragment::ALL`] order, that fails to parse.
    pub fn parse(request: &QueryRequest, scope: &EntityScope<'_>) -> Result<Self, ParseError> {
        fn run<T>(
            request: &QueryRequest,
            fragment: Fragment,
            parse: impl FnOnce(&str) -> Result<T, ExpressionError>,
        ) -> Result<Option<T>, ParseError> {
            let text = request.fragment(fragment).trim();
            if text.is_empty() {
                return Ok(None);
            }
            parse(text)
                .map(Some)
                .map_err(|source| ParseError { fragment, source })
        }

        Ok(Self {
            projection: run(request, Fragment::Select, |t| expr::parse_projection(t, scope))?,
            filter: run(request, Fragment::Where, |t| expr::parse_predicate(t, scope))?,
            group: run(request, Fragment::GroupBy, |t| expr::parse_grouping(t, scope))?,
            having: run(request, Fragment::Having, |t| expr::parse_predicate(t, scope))?,
            order: run(request, Fragment::OrderBy, |t| expr::parse_ordering(t, scope))?,
        })
    }
}
