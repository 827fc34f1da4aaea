use crate::exporter::scrape::ScrapeOrchestrator;
use axum::{
    extract::State,
    http::{StatusCode, header},
    response::{Html, IntoResponse, Json, Response},
};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::error;

const TEXT_FORMAT: &str = "text/plain; version=0.0.4";

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<ScrapeOrchestrator>,
    pub telemetry_path: Arc<str>,
}

pub async fn metrics(State(state): State<AppState>) -> Response {
    match state.orchestrator.scrape().await {
        Ok(body) => ([(header::CONTENT_TYPE, TEXT_FORMAT)], body).into_response(),
        Err(e) => {
            error!(error = %e, "scrape failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("scrape failed: {e}\n"),
            )
                .into_response()
        }
    }
}

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let pool = state.orchestrator.pool();

    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "pooling": pool.pooling().to_string(),
        "shared_connection": pool.has_shared_connection(),
    }))
}

pub async fn index(State(state): State<AppState>) -> Html<String> {
    let path = &state.telemetry_path;

    Html(format!(
        "<html>\n<head><title>MongoDB Exporter</title></head>\n<body>\n\
         <h1>MongoDB Exporter</h1>\n\
         <p>Version {}</p>\n\
         <p><a href=\"{path}\">Metrics</a></p>\n\
         <p><a href=\"/health\">Health</a></p>\n\
         </body>\n</html>\n",
        env!("CARGO_PKG_VERSION"),
    ))
}
