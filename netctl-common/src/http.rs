//! Minimal `hyper` 1.x HTTP server, no axum/tower: this workspace's only HTTP
//! surface is the health and metrics endpoints, which are three routes of
//! plain text. `handler` is invoked per request; routing is the caller's
//! responsibility (see `netctl-operator::metrics::serve`).

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;

use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::{TokioExecutor, TokioIo};
use owo_colors::OwoColorize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::colors::FG2;

pub type TextBody = Full<Bytes>;

pub fn text(status: hyper::StatusCode, body: impl Into<Bytes>) -> Response<TextBody> {
    Response::builder()
        .status(status)
        .header("content-type", "text/plain; charset=utf-8")
        .body(Full::new(body.into()))
        .expect("building a static text response never fails")
}

/// Serves `handler` on `addr` until `shutdown` is cancelled. Each accepted
/// connection runs on its own task; an in-flight request is allowed to
/// finish even after shutdown is requested (no hard connection drop).
pub async fn serve<F, Fut>(
    addr: SocketAddr,
    handler: F,
    shutdown: CancellationToken,
) -> anyhow::Result<()>
where
    F: Fn(Request<Incoming>) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<Response<TextBody>, Infallible>> + Send + 'static,
{
    let listener = TcpListener::bind(addr).await?;
    println!("{}", format!("listening on {addr}").color(FG2));

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                println!("{}", format!("stopped listening on {addr}").color(FG2));
                return Ok(());
            }
            accepted = listener.accept() => {
                let (stream, _peer) = accepted?;
                let io = TokioIo::new(stream);
                let handler = handler.clone();
                tokio::spawn(async move {
                    let service = service_fn(move |req| handler(req));
                    if let Err(err) = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
                        .serve_connection(io, service)
                        .await
                    {
                        eprintln!("connection error: {err}");
                    }
                });
            }
        }
    }
}
