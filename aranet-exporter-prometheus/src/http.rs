//! HTTP server for the metrics, health and status endpoints.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::bridge::Bridge;
use crate::registry::SharedRegistry;

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    registry: SharedRegistry,
    bridge: Arc<Bridge>,
}

/// Create the HTTP router.
pub fn create_router(registry: SharedRegistry, bridge: Arc<Bridge>, metrics_path: &str) -> Router {
    let state = AppState { registry, bridge };

    Router::new()
        .route(metrics_path, get(metrics_handler))
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/status", get(status_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn metrics_handler(State(state): State<AppState>) -> Response {
    let body = state.registry.render().await;

    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
        .into_response()
}

async fn health_handler() -> Response {
    (StatusCode::OK, "healthy\n").into_response()
}

async fn ready_handler(State(state): State<AppState>) -> Response {
    if state.bridge.is_ready() {
        (StatusCode::OK, "ready\n").into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            "not ready - no reading yet\n",
        )
            .into_response()
    }
}

async fn status_handler(State(state): State<AppState>) -> Response {
    Json(state.bridge.status()).into_response()
}

/// HTTP server configuration.
pub struct HttpServer {
    registry: SharedRegistry,
    bridge: Arc<Bridge>,
    metrics_path: String,
}

impl HttpServer {
    pub fn new(registry: SharedRegistry, bridge: Arc<Bridge>, metrics_path: String) -> Self {
        Self {
            registry,
            bridge,
            metrics_path,
        }
    }

    /// Serve on an already bound listener until the shutdown signal is received.
    ///
    /// Binding is left to the caller so a bad listen address fails startup
    /// before any device traffic begins.
    pub async fn serve(
        self,
        listener: TcpListener,
        mut shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        let router = create_router(self.registry, self.bridge, &self.metrics_path);
        let local_addr = listener.local_addr()?;

        info!(
            addr = %local_addr,
            path = %self.metrics_path,
            "HTTP server listening"
        );

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                loop {
                    if shutdown.changed().await.is_err() {
                        break;
                    }
                    if *shutdown.borrow() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
            .map_err(|e| anyhow::anyhow!("HTTP server error: {}", e))?;

        info!("HTTP server stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BridgeMode, ExporterConfig};
    use crate::registry::Registry;
    use aranet_bridge::Poller;
    use aranet_bridge::fake::{ScriptedDevice, ScriptedPoll};
    use aranet_common::Sample;
    use axum::body::Body;
    use axum::http::Request;
    use std::time::Duration;
    use tower::ServiceExt;

    fn setup(mode: BridgeMode, path: &str) -> (Router, Option<Poller>) {
        let device = Arc::new(ScriptedDevice::new(vec![ScriptedPoll::ok(Sample::new(
            650,
            21.5,
            40.0,
            1013.0,
            85,
            Duration::from_secs(60),
        ))]));
        let mut config = ExporterConfig::default();
        config.bridge.mode = mode;

        let registry = Arc::new(Registry::new());
        let (bridge, poller) = Bridge::new(
            device,
            "D4:6B:3C:00:11:22".parse().unwrap(),
            &config,
            &registry,
        );
        (create_router(registry, Arc::new(bridge), path), poller)
    }

    async fn body_string(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let (router, _poller) = setup(BridgeMode::Push, "/metrics");

        let response = router
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers().get("content-type").unwrap();
        assert!(content_type.to_str().unwrap().contains("version=0.0.4"));

        let body = body_string(response).await;
        assert!(body.contains("aranet4_up 0"));
        assert!(!body.contains("aranet4_co2"));
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (router, _poller) = setup(BridgeMode::Push, "/metrics");

        let response = router
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_ready_endpoint_push() {
        let (router, poller) = setup(BridgeMode::Push, "/metrics");

        let response = router
            .clone()
            .oneshot(Request::get("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        poller.unwrap().poll_once().await;

        let response = router
            .oneshot(Request::get("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_ready_endpoint_pull() {
        let (router, _) = setup(BridgeMode::Pull, "/metrics");

        let response = router
            .oneshot(Request::get("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_status_endpoint() {
        let (router, poller) = setup(BridgeMode::Push, "/metrics");
        poller.unwrap().poll_once().await;

        let response = router
            .oneshot(Request::get("/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(json["mode"], "push");
        assert_eq!(json["device"], "D4:6B:3C:00:11:22");
        assert_eq!(json["state"]["last_reading"]["sample"]["co2"], 650);
    }

    #[tokio::test]
    async fn test_custom_metrics_path() {
        let (router, _poller) = setup(BridgeMode::Push, "/probe/metrics");

        let response = router
            .clone()
            .oneshot(Request::get("/probe/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = router
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
