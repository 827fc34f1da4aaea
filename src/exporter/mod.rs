pub mod connection;
pub mod handlers;
pub mod labels;
pub mod options;
pub mod pool;
pub mod scrape;
pub mod topology;

use crate::exporter::handlers::AppState;
use crate::exporter::options::ExporterOptions;
use crate::exporter::pool::ConnectionPool;
use crate::exporter::scrape::ScrapeOrchestrator;
use anyhow::{Context, Result};
use axum::{
    Router,
    body::Body,
    http::{HeaderValue, Request, header},
    routing::get,
};
use opentelemetry::global;
use opentelemetry_http::HeaderExtractor;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer},
    set_header::SetResponseHeaderLayer,
    trace::TraceLayer,
};
use tracing::{Span, debug, error, info, info_span};
use tracing_opentelemetry::OpenTelemetrySpanExt as _;
use ulid::Ulid;

const SERVER_NAME: &str = concat!("mongodb_exporter/", env!("CARGO_PKG_VERSION"));

/// Request ids are ULIDs: sortable by arrival time in logs.
#[derive(Clone, Copy, Default)]
struct MakeRequestUlid;

impl MakeRequestId for MakeRequestUlid {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        HeaderValue::from_str(&Ulid::new().to_string())
            .ok()
            .map(RequestId::new)
    }
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    let span = info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = %request.uri().path(),
        request_id,
        otel.kind = "server"
    );

    let parent =
        global::get_text_map_propagator(|p| p.extract(&HeaderExtractor(request.headers())));
    if let Err(e) = span.set_parent(parent) {
        debug!(error = ?e, "cannot attach incoming trace context");
    }

    span
}

/// HTTP surface: the telemetry path, `/health` and a landing page.
#[must_use]
pub fn router(orchestrator: Arc<ScrapeOrchestrator>, telemetry_path: &str) -> Router {
    let state = AppState {
        orchestrator,
        telemetry_path: Arc::from(telemetry_path),
    };

    Router::new()
        .route(telemetry_path, get(handlers::metrics))
        .route("/health", get(handlers::health))
        .route("/", get(handlers::index))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUlid))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(SetResponseHeaderLayer::if_not_present(
                    header::SERVER,
                    HeaderValue::from_static(SERVER_NAME),
                )),
        )
        .with_state(state)
}

async fn bind(port: u16, listen: Option<&str>) -> Result<TcpListener> {
    if let Some(addr) = listen {
        return TcpListener::bind((addr, port))
            .await
            .with_context(|| format!("cannot listen on {addr}:{port}"));
    }

    // Dual-stack when the host has IPv6, otherwise IPv4 only.
    match TcpListener::bind((Ipv6Addr::UNSPECIFIED, port)).await {
        Ok(listener) => Ok(listener),
        Err(e) => {
            debug!(error = %e, "IPv6 listener unavailable, falling back to IPv4");
            TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))
                .await
                .with_context(|| format!("cannot listen on 0.0.0.0:{port}"))
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "cannot install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "cannot install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("shutdown signal received");
}

/// Start the exporter and serve until a shutdown signal arrives.
///
/// # Errors
///
/// Returns an error if the listener cannot be bound or the server fails.
pub async fn new(port: u16, listen: Option<String>, options: ExporterOptions) -> Result<()> {
    options::validate_telemetry_path(&options.telemetry_path)?;

    let listener = bind(port, listen.as_deref()).await?;
    info!(
        address = %listener.local_addr()?,
        pooling = %options.pooling,
        telemetry_path = %options.telemetry_path,
        "mongodb_exporter listening"
    );

    let pool = Arc::new(
        ConnectionPool::start(
            options.connect.clone(),
            options.pooling,
            options.liveness_interval,
        )
        .await,
    );
    let orchestrator = Arc::new(ScrapeOrchestrator::new(Arc::clone(&pool), &options));
    let app = router(orchestrator, &options.telemetry_path);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    pool.close().await;
    served.context("HTTP server failed")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::config::CollectorConfig;
    use crate::exporter::options::{ConnectOptions, Pooling};
    use std::time::Duration;
    use tower::ServiceExt as _;

    async fn app() -> Router {
        let options = ExporterOptions::new(
            ConnectOptions::new("mongodb://127.0.0.1:1/admin")
                .with_connect_timeout(Duration::from_millis(200))
                .with_socket_timeout(Duration::from_millis(500)),
        )
        .with_collectors(CollectorConfig::new());
        let pool = Arc::new(
            ConnectionPool::start(options.connect.clone(), Pooling::PerRequest, options.liveness_interval).await,
        );
        router(
            Arc::new(ScrapeOrchestrator::new(pool, &options)),
            &options.telemetry_path,
        )
    }

    #[tokio::test]
    async fn test_metrics_route() -> Result<()> {
        let response = app()
            .await
            .oneshot(Request::get("/metrics").body(Body::empty())?)
            .await?;

        assert_eq!(response.status(), 200);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE),
            Some(&HeaderValue::from_static("text/plain; version=0.0.4"))
        );
        assert!(response.headers().contains_key("x-request-id"));
        assert_eq!(
            response.headers().get(header::SERVER),
            Some(&HeaderValue::from_static(SERVER_NAME))
        );

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
        assert!(String::from_utf8_lossy(&body).contains("mongodb_up 0"));
        Ok(())
    }

    #[tokio::test]
    async fn test_health_route() -> Result<()> {
        let response = app()
            .await
            .oneshot(Request::get("/health").body(Body::empty())?)
            .await?;
        assert_eq!(response.status(), 200);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
        let health: serde_json::Value = serde_json::from_slice(&body)?;
        assert_eq!(health["status"], "ok");
        assert_eq!(health["pooling"], "per-request");
        Ok(())
    }

    #[tokio::test]
    async fn test_incoming_request_id_is_kept() -> Result<()> {
        let response = app()
            .await
            .oneshot(
                Request::get("/")
                    .header("x-request-id", "abc123")
                    .body(Body::empty())?,
            )
            .await?;

        assert_eq!(
            response.headers().get("x-request-id"),
            Some(&HeaderValue::from_static("abc123"))
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_trace_context_without_tracer_is_served() -> Result<()> {
        let request = Request::get("/health")
            .header(
                "traceparent",
                "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01",
            )
            .body(Body::empty())?;
        drop(make_span(&request));

        let response = app().await.oneshot(request).await?;
        assert_eq!(response.status(), 200);
        Ok(())
    }

    #[tokio::test]
    async fn test_bind_explicit_address() -> Result<()> {
        let listener = bind(0, Some("127.0.0.1")).await?;
        assert!(listener.local_addr()?.ip().is_loopback());
        Ok(())
    }
}
