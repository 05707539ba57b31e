//! HTTP server lifecycle.
//!
//! `new()` allocates shared state, `start()` binds the listener, and
//! `serve()` accepts requests until the shutdown future resolves. Binding
//! separately lets callers learn the OS-assigned port before serving.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use anyhow::anyhow;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tracing::{info, warn};

use super::config::NetworkConfig;
use super::handlers::{
    entities_handler, get_handler, health_handler, liveness_handler, query_handler,
    readiness_handler, AppState,
};
use super::middleware::build_http_layers;
use super::shutdown::ShutdownController;
use crate::service::QueryService;

pub struct NetworkModule {
    config: NetworkConfig,
    listener: Option<TcpListener>,
    service: Arc<QueryService>,
    shutdown: Arc<ShutdownController>,
}

impl NetworkModule {
    /// Creates the module without binding any port.
    #[must_use]
    pub fn new(config: NetworkConfig, service: Arc<QueryService>) -> Self {
        Self {
            config,
            listener: None,
            service,
            shutdown: Arc::new(ShutdownController::new()),
        }
    }

    #[must_use]
    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.shutdown)
    }

    /// Assembles the router with all routes and middleware.
    ///
    /// Routes:
    /// - `GET /query/{entity}`: query with paging links (`{entity}` may be plural)
    /// - `GET /get/{entity}/{id}`: single record
    /// - `GET /entities`: registered schemas
    /// - `GET /health`, `/health/live`, `/health/ready`: probes
    pub fn build_router(&self) -> Router {
        let state = AppState {
            service: Arc::clone(&self.service),
            shutdown: Arc::clone(&self.shutdown),
            config: Arc::new(self.config.clone()),
            start_time: Instant::now(),
        };

        Router::new()
            .route("/query/{entity}", get(query_handler))
            .route("/get/{entity}/{id}", get(get_handler))
            .route("/entities", get(entities_handler))
            .route("/health", get(health_handler))
            .route("/health/live", get(liveness_handler))
            .route("/health/ready", get(readiness_handler))
            .layer(build_http_layers(&self.config))
            .with_state(state)
    }

    /// Binds the listener and returns the bound port, which differs from
    /// the configured one when that is 0.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        let port = listener.local_addr()?.port();

        info!(host = %self.config.host, port, "listener bound");

        self.listener = Some(listener);
        Ok(port)
    }

    /// Serves requests until `shutdown` resolves, then drains in-flight
    /// queries for up to `drain_timeout`.
    ///
    /// # Errors
    ///
    /// Returns an error if `start()` was not called first or the server
    /// hits a fatal I/O error.
    pub async fn serve(
        mut self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let listener = self
            .listener
            .take()
            .ok_or_else(|| anyhow!("start() must be called before serve()"))?;
        let router = self.build_router();
        let controller = Arc::clone(&self.shutdown);

        controller.set_ready();
        info!(entities = self.service.registry().len(), "serving queries");

        let signalled = Arc::clone(&controller);
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                shutdown.await;
                signalled.trigger_shutdown();
            })
            .await?;

        drain(&controller, &self.config).await;
        Ok(())
    }
}

async fn drain(controller: &ShutdownController, config: &NetworkConfig) {
    controller.trigger_shutdown();

    if controller.wait_for_drain(config.drain_timeout).await {
        info!("all in-flight queries completed");
    } else {
        warn!(
            in_flight = controller.in_flight_count(),
            "drain timeout expired with queries still running"
        );
    }
}

#[cfg(test)]
mod tests {
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::Value as Json;
    use tower::ServiceExt;

    use super::*;
    use crate::network::handlers::test_state;

    fn module() -> NetworkModule {
        NetworkModule::new(NetworkConfig::default(), test_state().service)
    }

    async fn call(uri: &str) -> (StatusCode, axum::http::HeaderMap, Json) {
        let response = module()
            .build_router()
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Json::Null);
        (status, headers, body)
    }

    #[tokio::test]
    async fn query_by_plural_alias_with_filter_and_order() {
        let (status, _, body) =
            call("/query/books?where=author.lastName%20%3D%20%27Twain%27&orderBy=title&size=2").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["items"].as_array().unwrap().len(), 2);
        assert_eq!(body["items"][0]["title"], "Adventures of Huckleberry Finn");
        assert_eq!(body["items"][0]["author"]["firstName"], "Mark");
        assert_eq!(body["page"]["totalElements"], 3);
        assert_eq!(body["page"]["totalPages"], 2);

        let rels: Vec<&str> = body["links"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|l| l["rel"].as_str())
            .collect();
        assert!(rels.contains(&"next"));
        assert!(!rels.contains(&"prev"));
    }

    #[tokio::test]
    async fn projection_and_grouping() {
        let (status, _, body) = call(
            "/query/book?select=author.lastName%20as%20name,count(*)%20as%20books\
             &groupBy=author.lastName&orderBy=count(*)%20desc&size=0",
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.get("page").is_none());
        assert_eq!(body["items"][0]["name"], "Twain");
        assert_eq!(body["items"][0]["books"], 3);
        assert_eq!(body["items"][1]["books"], 2);
    }

    #[tokio::test]
    async fn parse_error_is_400_naming_fragment() {
        let (status, _, body) = call("/query/book?where=title%20%3D").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "PARSE_ERROR");
        assert_eq!(body["fragment"], "where");
    }

    #[tokio::test]
    async fn deeply_nested_where_is_400() {
        let uri = format!(
            "/query/book?where={}id%3D1{}",
            "%28".repeat(2_000),
            "%29".repeat(2_000)
        );
        let (status, _, body) = call(&uri).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["fragment"], "where");
    }

    async fn body_bytes(uri: &str) -> axum::body::Bytes {
        let response = module()
            .build_router()
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        to_bytes(response.into_body(), usize::MAX).await.unwrap()
    }

    #[tokio::test]
    async fn repeated_requests_are_byte_identical() {
        for uri in [
            "/query/book?where=id%20%3E%201&orderBy=author.lastName,title%20desc&page=1&size=2",
            "/query/book?select=author.lastName%20as%20name,count(*)%20as%20n\
             &groupBy=author.lastName&orderBy=count(*)&size=1",
        ] {
            let first = body_bytes(uri).await;
            let second = body_bytes(uri).await;
            assert_eq!(first, second, "{uri}");

            let body: Json = serde_json::from_slice(&first).unwrap();
            assert!(!body["items"].as_array().unwrap().is_empty(), "{uri}");
            assert!(body["page"].is_object(), "{uri}");
        }
    }

    #[tokio::test]
    async fn unknown_field_is_400() {
        let (status, _, body) = call("/query/book?orderBy=isbn").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["fragment"], "orderBy");
    }

    #[tokio::test]
    async fn unknown_entity_and_record_are_404() {
        let (status, _, body) = call("/query/shelf").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "NOT_FOUND");

        let (status, _, _) = call("/get/book/999").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn malformed_page_is_400() {
        let (status, _, _) = call("/query/book?page=-1").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _, _) = call("/query/book?size=ten").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unexecutable_query_is_502() {
        let (status, _, body) = call("/query/book?having=count(*)%20%3E%201").await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["code"], "EXECUTION_ERROR");
    }

    #[tokio::test]
    async fn get_returns_record_and_request_id() {
        let (status, headers, body) = call("/get/book/2").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["item"]["title"], "Krtek");
        assert!(body["links"][0]["href"].as_str().unwrap().ends_with("/get/book/2"));
        assert!(headers.contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn entities_lists_schema() {
        let (status, _, body) = call("/entities").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["name"], "book");
        assert_eq!(body[0]["idField"], "id");
    }

    #[tokio::test]
    async fn readiness_is_503_before_serving() {
        let (status, _, _) = call("/health/ready").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn start_binds_to_os_assigned_port() {
        let mut module = NetworkModule::new(
            NetworkConfig {
                host: "127.0.0.1".to_string(),
                ..NetworkConfig::default()
            },
            test_state().service,
        );
        let port = module.start().await.unwrap();
        assert!(port > 0);
        assert!(module.listener.is_some());
    }

    #[tokio::test]
    async fn serve_without_start_fails() {
        let err = module().serve(std::future::pending::<()>()).await.unwrap_err();
        assert!(err.to_string().contains("start()"));
    }

    #[tokio::test]
    async fn serve_drains_and_stops_on_shutdown() {
        let mut module = NetworkModule::new(
            NetworkConfig {
                host: "127.0.0.1".to_string(),
                ..NetworkConfig::default()
            },
            test_state().service,
        );
        module.start().await.unwrap();
        let controller = module.shutdown_controller();

        module.serve(async {}).await.unwrap();
        assert_eq!(controller.health_state(), crate::network::HealthState::Stopped);
    }
}
