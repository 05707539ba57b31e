//! Request orchestration: resolve, parse, compose, execute, wrap.

use std::sync::Arc;
use std::time::Instant;

use rapq_core::{
    compose, BaseUrlError, EntityRegistry, EnvelopeBuilder, NotFoundError, Pagination,
    ParsedFragments, QueryRequest, RecordEnvelope, ResultEnvelope,
};
use tracing::{info_span, Instrument};

use super::config::QueryConfig;
use super::error::QueryError;
use crate::execution::ExecutionAdapter;
use crate::traits::ExecutionBackend;

/// Serves queries and single-record lookups against registered entities.
///
/// Holds no per-request state; concurrent requests share it freely.
#[derive(Debug)]
pub struct QueryService {
    registry: Arc<EntityRegistry>,
    adapter: ExecutionAdapter,
    envelopes: EnvelopeBuilder,
    config: QueryConfig,
}

impl QueryService {
    /// # Errors
    ///
    /// Returns [`BaseUrlError`] if `config.base_url` cannot carry link paths.
    pub fn new(
        registry: Arc<EntityRegistry>,
        backend: Arc<dyn ExecutionBackend>,
        config: QueryConfig,
    ) -> Result<Self, BaseUrlError> {
        let envelopes =
            EnvelopeBuilder::new(&config.base_url)?.with_page_sizes(config.page_sizes.clone());
        Ok(Self {
            registry,
            adapter: ExecutionAdapter::new(backend),
            envelopes,
            config,
        })
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<EntityRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn config(&self) -> &QueryConfig {
        &self.config
    }

    /// Runs a query and wraps its rows into a paged envelope.
    ///
    /// `request.entity` may be the plural alias; links always use the
    /// canonical name.
    ///
    /// # Errors
    ///
    /// - [`QueryError::NotFound`] for an unknown entity
    /// - [`QueryError::Parse`] for the first fragment that fails to parse
    /// - [`QueryError::Execution`] if the backend rejects or fails the query
    pub async fn query(&self, request: QueryRequest) -> Result<ResultEnvelope, QueryError> {
        let span = info_span!(
            "query",
            entity = %request.entity,
            page = request.page,
            size = request.size,
        );
        let start = Instant::now();
        let result = self.run_query(request).instrument(span.clone()).await;
        log_outcome(&span, start, result.as_ref().map(|e| e.items.len()));
        result
    }

    async fn run_query(&self, request: QueryRequest) -> Result<ResultEnvelope, QueryError> {
        let source = Arc::clone(self.registry.resolve_collection(&request.entity)?);
        let request = request.with_entity(source.name());

        let fragments = ParsedFragments::parse(&request, &self.registry.scope(&source))?;
        let query = compose(source, fragments, Pagination::from_request(&request));
        let outcome = self.adapter.execute(&query).await?;

        Ok(self
            .envelopes
            .build(outcome.rows, outcome.total_count, &request))
    }

    /// Fetches one record by the textual form of its identifier.
    ///
    /// # Errors
    ///
    /// - [`QueryError::NotFound`] for an unknown entity or identifier
    /// - [`QueryError::Execution`] if the lookup fails
    pub async fn get(&self, entity: &str, id: &str) -> Result<RecordEnvelope, QueryError> {
        let span = info_span!("get", entity = %entity, id = %id);
        let start = Instant::now();
        let result = self.run_get(entity, id).instrument(span.clone()).await;
        log_outcome(&span, start, result.as_ref().map(|_| 1));
        result
    }

    async fn run_get(&self, entity: &str, id: &str) -> Result<RecordEnvelope, QueryError> {
        let descriptor = self.registry.resolve(entity)?;
        let row = self
            .adapter
            .find(descriptor, id)
            .await?
            .ok_or_else(|| NotFoundError::Record {
                entity: descriptor.name().to_string(),
                id: id.to_string(),
            })?;
        Ok(self.envelopes.record(descriptor.name(), id, row))
    }
}

fn log_outcome(span: &tracing::Span, start: Instant, result: Result<usize, &QueryError>) {
    #[allow(clippy::cast_possible_truncation)]
    let duration_ms = start.elapsed().as_millis() as u64;
    let _entered = span.enter();
    match result {
        Ok(rows) => tracing::info!(duration_ms, outcome = "ok", rows, "query complete"),
        Err(err) => tracing::info!(
            duration_ms,
            outcome = err.outcome(),
            error = %err,
            "query complete"
        ),
    }
}
