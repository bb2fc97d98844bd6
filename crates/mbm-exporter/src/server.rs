//! HTTP exposition of the gauge registry.

use std::io;
use std::net::SocketAddr;

use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use tokio::net::TcpListener;
use tracing::{error, info};

use mbm_core::PrometheusSink;

const INDEX: &str = "mbm-exporter\n\nMemory bandwidth metrics are served at /metrics\n";

pub(crate) fn router(sink: PrometheusSink) -> Router {
    Router::new()
        .route("/", get(handle_index))
        .route("/health", get(handle_health))
        .route("/metrics", get(handle_metrics))
        .with_state(sink)
}

pub(crate) async fn bind(addr: SocketAddr) -> io::Result<TcpListener> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "listening");
    Ok(listener)
}

pub(crate) async fn serve(listener: TcpListener, sink: PrometheusSink) {
    if let Err(e) = axum::serve(listener, router(sink)).await {
        error!("HTTP server stopped: {}", e);
    }
}

async fn handle_index() -> &'static str {
    INDEX
}

async fn handle_health() -> &'static str {
    "ok"
}

async fn handle_metrics(State(sink): State<PrometheusSink>) -> Response {
    match sink.render() {
        Ok(body) => {
            ([(header::CONTENT_TYPE, PrometheusSink::content_type())], body).into_response()
        }
        Err(e) => {
            error!("failed to render metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}
