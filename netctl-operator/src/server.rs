//! The health/readiness and metrics HTTP surface, built on
//! `netctl_common::http`'s bare `hyper` server -- this workspace's only HTTP
//! routes are three plain-text endpoints, so no router crate earns its
//! keep.

use std::net::SocketAddr;

use hyper::body::Incoming;
use hyper::{Method, Request, Response, StatusCode};
use tokio_util::sync::CancellationToken;

use netctl_common::http::{TextBody, serve, text};
use netctl_common::state::SharedState;

/// Runs the health/readiness server on port 8080 and the Prometheus metrics
/// server on `metrics_port`, concurrently, until `shutdown` fires.
pub async fn run(state: SharedState, metrics_port: u16, shutdown: CancellationToken) {
    let health = serve(
        SocketAddr::from(([0, 0, 0, 0], 8080)),
        {
            let state = state.clone();
            move |req| {
                let state = state.clone();
                async move { Ok(health_handler(req, state).await) }
            }
        },
        shutdown.clone(),
    );
    let metrics = serve(
        SocketAddr::from(([0, 0, 0, 0], metrics_port)),
        |req| async move { Ok(metrics_handler(req)) },
        shutdown,
    );

    let (health, metrics) = tokio::join!(health, metrics);
    if let Err(e) = health {
        eprintln!("health server error: {e}");
    }
    if let Err(e) = metrics {
        eprintln!("metrics server error: {e}");
    }
}

async fn health_handler(req: Request<Incoming>, state: SharedState) -> Response<TextBody> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/healthz") => {
            let healthy = state.lock().await.healthy;
            if healthy {
                text(StatusCode::OK, "ok")
            } else {
                text(StatusCode::SERVICE_UNAVAILABLE, "unhealthy")
            }
        }
        (&Method::GET, "/readyz") => {
            let guard = state.lock().await;
            if guard.is_ready() {
                text(StatusCode::OK, "ok")
            } else {
                text(StatusCode::SERVICE_UNAVAILABLE, "not ready")
            }
        }
        _ => text(StatusCode::NOT_FOUND, "not found"),
    }
}

fn metrics_handler(req: Request<Incoming>) -> Response<TextBody> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => text(StatusCode::OK, netctl_common::metrics::encode()),
        _ => text(StatusCode::NOT_FOUND, "not found"),
    }
}
