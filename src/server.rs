use crate::metrics_facade::MetricsFacade;
use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{event, Level};

pub const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html>
<head><title>SC Trade Tools Exporter</title></head>
<body>
<h1>SC Trade Tools Exporter</h1>
<p><a href="/metrics">Metrics</a></p>
</body>
</html>
"#;

#[derive(Clone)]
pub struct AppState {
    pub metrics_facade: Arc<MetricsFacade>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/metrics", get(metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

/// Every request triggers a fresh scrape. Failures become a 500 with the error as a comment line.
async fn metrics(State(state): State<AppState>) -> Response {
    match state.metrics_facade.scrape().await {
        Ok(body) => ([(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)], body).into_response(),
        Err(err) => {
            event!(Level::ERROR, "Scrape failed: {:#}", err);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)],
                format!("# {:#}\n", err),
            )
                .into_response()
        }
    }
}

pub async fn serve(host: &str, port: u16, state: AppState) -> Result<()> {
    let listener = TcpListener::bind((host, port))
        .await
        .with_context(|| format!("Failed to bind {}:{}", host, port))?;

    event!(Level::INFO, "Server running at http://{}/", listener.local_addr()?);

    axum::serve(listener, router(state)).await.context("Server failed")?;
    Ok(())
}
