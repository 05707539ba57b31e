use rapq_core::{ALTERNATE_PAGE_SIZES, DEFAULT_PAGE_SIZE};

/// Query-level configuration: paging defaults and the base of link hrefs.
#[derive(Debug, Clone)]
pub struct QueryConfig {
    /// Page size used when a request gives none. Zero or less disables
    /// pagination by default.
    pub default_page_size: i64,
    /// Alternate page sizes offered as `size<N>` links on paged responses.
    pub page_sizes: Vec<u64>,
    /// Absolute URL that link hrefs are built on, e.g. `http://localhost:8080`.
    pub base_url: String,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_page_size: DEFAULT_PAGE_SIZE,
            page_sizes: ALTERNATE_PAGE_SIZES.to_vec(),
            base_url: "http://localhost:8080".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = QueryConfig::default();
        assert_eq!(config.default_page_size, 25);
        assert_eq!(config.page_sizes, vec![20, 25, 30, 40, 50]);
    }
}
