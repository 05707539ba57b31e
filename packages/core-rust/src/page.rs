//! Page metadata, navigation links, and the response envelopes.

use serde::Serialize;
use url::Url;

use crate::compose::Pagination;
use crate::query::{Fragment, QueryRequest};
use crate::types::Row;

/// Page size used when a request does not specify one.
pub const DEFAULT_PAGE_SIZE: i64 = 25;

/// Sizes offered as `size<N>` links on every paged response.
pub const ALTERNATE_PAGE_SIZES: [u64; 5] = [20, 25, 30, 40, 50];

/// Position of one page within a result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageMetadata {
    pub size: u64,
    /// Zero-based page number.
    pub number: u64,
    pub total_elements: u64,
    pub total_pages: u64,
}

impl PageMetadata {
    #[must_use]
    pub fn new(size: u64, number: u64, total_elements: u64) -> Self {
        let total_pages = if size > 0 {
            total_elements.div_ceil(size)
        } else {
            1
        };
        Self {
            size,
            number,
            total_elements,
            total_pages,
        }
    }

    /// Index of the last page, or `None` when there are no pages.
    #[must_use]
    pub fn last_page(&self) -> Option<u64> {
        self.total_pages.checked_sub(1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Link {
    pub rel: String,
    pub href: String,
}

/// Link set, unique by relation name. Adding a link with an existing
/// relation replaces it in place.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Links(Vec<Link>);

impl Links {
    pub fn add(&mut self, rel: impl Into<String>, href: String) {
        let rel = rel.into();
        match self.0.iter_mut().find(|l| l.rel == rel) {
            Some(link) => link.href = href,
            None => self.0.push(Link { rel, href }),
        }
    }

    #[must_use]
    pub fn get(&self, rel: &str) -> Option<&Link> {
        self.0.iter().find(|l| l.rel == rel)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Link> {
        self.0.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Response to a collection query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultEnvelope {
    pub items: Vec<Row>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<PageMetadata>,
    pub links: Links,
}

/// Response to a single-record lookup.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordEnvelope {
    pub item: Row,
    pub links: Links,
}

#[derive(Debug, thiserror::Error)]
pub enum BaseUrlError {
    #[error("invalid base URL: {0}")]
    Parse(#[from] url::ParseError),
    #[error("base URL '{0}' cannot carry a path")]
    NotHierarchical(String),
}

/// Builds envelopes and the hrefs of their links.
///
/// Hrefs are `<base>/query/<entity>?<params>` with parameters in the fixed
/// order `where, orderBy, select, groupBy, having, page, size`,
/// form-urlencoded. Blank fragments are omitted, so two requests that
/// differ in any fragment never share an href.
#[derive(Debug, Clone)]
pub struct EnvelopeBuilder {
    base: Url,
    page_sizes: Vec<u64>,
}

/// Fragment order in hrefs.
const HREF_FRAGMENTS: [Fragment; 5] = [
    Fragment::Where,
    Fragment::OrderBy,
    Fragment::Select,
    Fragment::GroupBy,
    Fragment::Having,
];

impl EnvelopeBuilder {
    /// # Errors
    ///
    /// Returns [`BaseUrlError`] if `base_url` is not an absolute,
    /// hierarchical URL.
    pub fn new(base_url: &str) -> Result<Self, BaseUrlError> {
        let base = Url::parse(base_url)?;
        if base.cannot_be_a_base() {
            return Err(BaseUrlError::NotHierarchical(base_url.to_string()));
        }
        Ok(Self {
            base,
            page_sizes: ALTERNATE_PAGE_SIZES.to_vec(),
        })
    }

    /// Replaces the alternate page sizes offered on paged responses.
    #[must_use]
    pub fn with_page_sizes(mut self, sizes: impl IntoIterator<Item = u64>) -> Self {
        self.page_sizes = sizes.into_iter().collect();
        self
    }

    /// Wraps query results into an envelope with page metadata and links.
    ///
    /// Page metadata and navigation links are produced only when the request
    /// is paged and a total count is known; otherwise the envelope carries
    /// just the `search` link.
    #[must_use]
    pub fn build(&self, rows: Vec<Row>, total: Option<u64>, request: &QueryRequest) -> ResultEnvelope {
        let mut links = Links::default();
        let mut page = None;

        if let (Pagination::Paged { page: number, size }, Some(total)) =
            (Pagination::from_request(request), total)
        {
            let meta = PageMetadata::new(size, number, total);
            links.add("page", self.query_href(request, None, size));
            if number > 0 {
                links.add("first", self.query_href(request, Some(0), size));
                links.add(
                    "prev",
                    self.query_href(request, Some(number - 1), size),
                );
            }
            if let Some(last) = meta.last_page().filter(|last| number < *last) {
                links.add(
                    "next",
                    self.query_href(request, Some(number + 1), size),
                );
                links.add("last", self.query_href(request, Some(last), size));
            }
            for &alternate in &self.page_sizes {
                links.add(
                    format!("size{alternate}"),
                    self.query_href(request, Some(0), alternate),
                );
            }
            page = Some(meta);
        }

        links.add("search", self.search_href(request));

        ResultEnvelope {
            items: rows,
            page,
            links,
        }
    }

    /// Wraps a single record with its `self` link.
    #[must_use]
    pub fn record(&self, entity: &str, id: &str, item: Row) -> RecordEnvelope {
        let mut links = Links::default();
        links.add("self", self.href(&["get", entity, id], &[]));
        RecordEnvelope { item, links }
    }

    /// The request itself with the `where` fragment cleared.
    fn search_href(&self, request: &QueryRequest) -> String {
        let size = request.size.to_string();
        let page = request.page.to_string();
        let mut params = fragment_params(request, false);
        params.push(("page", page));
        params.push(("size", size));
        self.href(&["query", &request.entity], &params)
    }

    /// The request at another page and size; `page: None` leaves it open.
    fn query_href(&self, request: &QueryRequest, page: Option<u64>, size: u64) -> String {
        let mut params = fragment_params(request, true);
        if let Some(page) = page {
            params.push(("page", page.to_string()));
        }
        params.push(("size", size.to_string()));
        self.href(&["query", &request.entity], &params)
    }

    fn href(&self, segments: &[&str], params: &[(&str, String)]) -> String {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        if !params.is_empty() {
            url.query_pairs_mut().extend_pairs(params);
        }
        url.to_string()
    }
}

fn fragment_params(request: &QueryRequest, keep_where: bool) -> Vec<(&'static str, String)> {
    HREF_FRAGMENTS
        .iter()
        .filter(|f| keep_where || **f != Fragment::Where)
        .filter_map(|&f| {
            let text = request.fragment(f);
            (!text.is_empty()).then(|| (f.as_str(), text.to_string()))
        })
        .collect()
}
