//! The only path from the query pipeline to the execution backend.

use std::sync::Arc;

use rapq_core::{ComposedQuery, EntityDescriptor, Row};
use tracing::debug;

use crate::traits::{ExecutionBackend, UnsupportedQuery};

/// Failure to execute a structurally valid composed query. Never retried.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    /// The backend cannot execute the query as composed (for example an
    /// invalid grouping/having combination).
    #[error("query cannot be executed: {0}")]
    Rejected(String),
    /// The backend failed while running the query.
    #[error("execution backend failed: {0:#}")]
    Backend(#[source] anyhow::Error),
}

impl From<anyhow::Error> for ExecutionError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<UnsupportedQuery>() {
            Ok(UnsupportedQuery(reason)) => ExecutionError::Rejected(reason),
            Err(err) => ExecutionError::Backend(err),
        }
    }
}

/// Rows of one executed query, plus the total when the query is paged.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionOutcome {
    pub rows: Vec<Row>,
    pub total_count: Option<u64>,
}

#[derive(Clone)]
pub struct ExecutionAdapter {
    backend: Arc<dyn ExecutionBackend>,
}

impl ExecutionAdapter {
    #[must_use]
    pub fn new(backend: Arc<dyn ExecutionBackend>) -> Self {
        Self { backend }
    }

    /// Runs the query once, and the count pass alongside it when paged.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutionError`] if either pass fails; the other result is
    /// discarded.
    pub async fn execute(&self, query: &ComposedQuery) -> Result<ExecutionOutcome, ExecutionError> {
        let (rows, total_count) = if query.is_paged() {
            let (rows, total) =
                tokio::try_join!(self.backend.fetch(query), self.backend.count(query))?;
            (rows, Some(total))
        } else {
            (self.backend.fetch(query).await?, None)
        };

        debug!(
            entity = query.source.name(),
            rows = rows.len(),
            total = ?total_count,
            "query executed"
        );
        Ok(ExecutionOutcome { rows, total_count })
    }

    /// Fetches a single record by identifier.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutionError::Backend`] if the lookup fails.
    pub async fn find(
        &self,
        entity: &EntityDescriptor,
        id: &str,
    ) -> Result<Option<Row>, ExecutionError> {
        Ok(self.backend.find_by_id(entity, id).await?)
    }
}

impl std::fmt::Debug for ExecutionAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionAdapter").finish_non_exhaustive()
    }
}
