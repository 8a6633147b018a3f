//! HTTP endpoints exposed by the agent
//!
//! | Router            | Route            | Response                        |
//! |-------------------|------------------|---------------------------------|
//! | [`health_router`] | `/healthz`       | `200 ok`                        |
//! | [`health_router`] | `/readyz`        | `200 ok`                        |
//! | [`metrics_router`]| `/metrics`       | Prometheus text format          |
//! | [`debug_router`]  | `/debug/runtime` | tokio runtime figures as JSON   |
//!
//! Each router is served on its own address (see [`crate::config::Args`]).

use std::io;
use std::net::SocketAddr;

use axum::{
    http::header,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::info;

use crate::metrics;

/// Liveness and readiness probes
pub fn health_router() -> Router {
    Router::new()
        .route("/healthz", get(ping))
        .route("/readyz", get(ping))
}

/// Prometheus scrape endpoint
pub fn metrics_router() -> Router {
    Router::new().route("/metrics", get(render_metrics))
}

/// Runtime introspection endpoint
pub fn debug_router() -> Router {
    Router::new().route("/debug/runtime", get(runtime_stats))
}

/// Bind `addr` and serve `router` until the listener fails
pub async fn serve(name: &'static str, addr: SocketAddr, router: Router) -> io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(server = name, addr = %addr, "Listening");
    axum::serve(listener, router).await
}

async fn ping() -> &'static str {
    "ok"
}

async fn render_metrics() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::gather_text(),
    )
}

/// Snapshot of the tokio runtime
#[derive(Debug, Serialize)]
pub struct RuntimeStats {
    pub workers: usize,
    pub alive_tasks: usize,
    pub global_queue_depth: usize,
    pub enforcements_in_flight: i64,
}

async fn runtime_stats() -> Json<RuntimeStats> {
    let runtime = tokio::runtime::Handle::current().metrics();
    Json(RuntimeStats {
        workers: runtime.num_workers(),
        alive_tasks: runtime.num_alive_tasks(),
        global_queue_depth: runtime.global_queue_depth(),
        enforcements_in_flight: metrics::ENFORCEMENTS_IN_FLIGHT.get(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Serve `router` on an ephemeral port and GET `uri` from it
    async fn get_body(router: Router, uri: &str) -> (u16, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router).await });

        let response = reqwest::get(format!("http://{}{}", addr, uri)).await.unwrap();
        let status = response.status().as_u16();
        (status, response.text().await.unwrap())
    }

    #[tokio::test]
    async fn test_probes_return_ok() {
        for uri in ["/healthz", "/readyz"] {
            let (status, body) = get_body(health_router(), uri).await;
            assert_eq!(status, 200);
            assert_eq!(body, "ok");
        }
    }

    #[tokio::test]
    async fn test_metrics_endpoint_renders_registry() {
        metrics::ENFORCEMENTS_IN_FLIGHT.get();
        let (status, body) = get_body(metrics_router(), "/metrics").await;
        assert_eq!(status, 200);
        assert!(body.contains("cgroup_enhancer_enforcements_in_flight"));
    }

    #[tokio::test]
    async fn test_debug_runtime_reports_workers() {
        let (status, body) = get_body(debug_router(), "/debug/runtime").await;
        assert_eq!(status, 200);
        let value: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert!(value["workers"].as_u64().unwrap() >= 1);
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let (status, _) = get_body(health_router(), "/nope").await;
        assert_eq!(status, 404);
    }
}
