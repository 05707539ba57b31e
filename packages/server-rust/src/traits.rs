use async_trait::async_trait;
use rapq_core::{ComposedQuery, EntityDescriptor, Row};

/// Engine that runs composed queries against stored records.
///
/// Implementations: in-memory ([`crate::storage::MemoryBackend`]). Any other
/// engine plugs in here without touching parsing or envelope building.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Runs the query and returns its rows, honouring order, offset and limit.
    ///
    /// A query shape the engine cannot execute should be reported with
    /// [`UnsupportedQuery`] so it surfaces as a rejection rather than an
    /// engine failure.
    async fn fetch(&self, query: &ComposedQuery) -> anyhow::Result<Vec<Row>>;

    /// Counts the rows the query would return without order, offset and limit.
    async fn count(&self, query: &ComposedQuery) -> anyhow::Result<u64>;

    /// Looks up one record by the textual form of its identifier.
    async fn find_by_id(&self, entity: &EntityDescriptor, id: &str) -> anyhow::Result<Option<Row>>;
}

/// A composed query the backend refuses to execute as constructed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct UnsupportedQuery(pub String);
