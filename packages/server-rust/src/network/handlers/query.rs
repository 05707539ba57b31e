//! Query, single-record and schema discovery endpoints.

use axum::extract::{Path, Query, State};
use axum::Json;
use rapq_core::{EntityDescriptor, QueryRequest, RecordEnvelope, ResultEnvelope};
use serde::Deserialize;

use super::AppState;
use crate::service::QueryError;

/// Query-string parameters of `GET /query/{entity}`.
///
/// Absent fragments are empty. A malformed `page` or `size` is rejected by
/// the extractor with 400 before any parsing happens.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueryParams {
    #[serde(rename = "where")]
    pub filter: String,
    pub order_by: String,
    pub select: String,
    pub group_by: String,
    pub having: String,
    pub page: u64,
    /// `None` falls back to the configured default page size.
    pub size: Option<i64>,
}

impl QueryParams {
    #[must_use]
    pub fn into_request(self, entity: String, default_size: i64) -> QueryRequest {
        QueryRequest {
            entity,
            where_text: self.filter,
            order_by_text: self.order_by,
            select_text: self.select,
            group_by_text: self.group_by,
            having_text: self.having,
            page: self.page,
            size: self.size.unwrap_or(default_size),
        }
    }
}

/// `GET /query/{entity}`: paged query with hypermedia links.
pub async fn query_handler(
    State(state): State<AppState>,
    Path(entity): Path<String>,
    Query(params): Query<QueryParams>,
) -> Result<Json<ResultEnvelope>, QueryError> {
    let _guard = state.shutdown.in_flight_guard();
    let request = params.into_request(entity, state.service.config().default_page_size);
    state.service.query(request).await.map(Json)
}

/// `GET /get/{entity}/{id}`: one record with its `self` link.
pub async fn get_handler(
    State(state): State<AppState>,
    Path((entity, id)): Path<(String, String)>,
) -> Result<Json<RecordEnvelope>, QueryError> {
    let _guard = state.shutdown.in_flight_guard();
    state.service.get(&entity, &id).await.map(Json)
}

/// `GET /entities`: registered entity descriptors in registration order.
pub async fn entities_handler(State(state): State<AppState>) -> Json<Vec<EntityDescriptor>> {
    Json(
        state
            .service
            .registry()
            .descriptors()
            .map(|d| (**d).clone())
            .collect(),
    )
}
