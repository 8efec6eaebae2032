//! HTTP surface of the exporter.

use crate::cli::telemetry::shutdown_tracer;
use crate::scrape::{Connector, PgConnector};
use anyhow::{Context, Result, anyhow};
use axum::{
    Extension, Router,
    body::Body,
    http::{HeaderName, HeaderValue, Request},
    middleware::{Next, from_fn},
    response::Response,
    routing::get,
};
use opentelemetry::global;
use opentelemetry::trace::{TraceContextExt, TraceId};
use opentelemetry_http::HeaderExtractor;
use std::time::Duration;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::PropagateRequestIdLayer, set_header::SetRequestHeaderLayer, trace::TraceLayer,
};
use tracing::{Span, error, info, info_span, warn};
use tracing_opentelemetry::OpenTelemetrySpanExt;
use ulid::Ulid;

pub mod encode;
mod handlers;
pub mod process;
mod service;
mod shutdown;

pub use self::handlers::Health;
pub use self::service::ScrapeService;

pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = if let Some(hash) = built_info::GIT_COMMIT_HASH {
    hash
} else {
    ":-("
};

pub const DEFAULT_METRICS_PATH: &str = "/metrics";

/// Where and how the HTTP server listens.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub port: u16,
    pub listen: Option<String>,
    pub metrics_path: String,
}

/// Build the router serving `metrics_path` and `/health` for `service`.
pub fn router<C: Connector>(service: ScrapeService<C>, metrics_path: &str) -> Router {
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(make_span)
        .on_response(on_response);

    Router::new()
        .route(metrics_path, get(handlers::metrics::<C>))
        .route(
            "/health",
            get(handlers::health::<C>).options(handlers::health::<C>),
        )
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(trace_layer)
                .layer(from_fn(add_trace_headers))
                .layer(Extension(service)),
        )
}

/// Bind the listener and serve until a shutdown signal arrives.
///
/// # Errors
///
/// Returns an error if the listen address is invalid or cannot be bound
pub async fn new(server: ServerConfig, service: ScrapeService<PgConnector>) -> Result<()> {
    let (listener, bind_addr) = bind(server.listen.as_deref(), server.port).await?;

    println!(
        "{} {} - Listening on {bind_addr}{}\n\nEnabled scrapers:\n{}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        server.metrics_path,
        format_list(&service.scraper_names()),
    );

    if !service.excluded().is_empty() {
        println!("\nExcluded databases:\n{}", format_list(service.excluded()));
    }

    // an unreachable database is reported through postgres_up, not fatal
    match service.ping().await {
        Ok(()) => info!(datname = %service.target().database(), "connected to database"),
        Err(e) => warn!(
            datname = %service.target().database(),
            error = %e,
            "database not reachable at startup"
        ),
    }

    let app = router(service, &server.metrics_path);

    if let Err(e) = axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown::shutdown_signal())
        .await
    {
        error!(error = %e, "server error");
    }

    info!("shutting down");

    shutdown_tracer();

    Ok(())
}

/// Bind `listen:port`, or when no address is given try IPv6 first and fall
/// back to IPv4.
///
/// # Errors
///
/// Returns an error if `listen` is not an IP address or binding fails
pub async fn bind(listen: Option<&str>, port: u16) -> Result<(TcpListener, String)> {
    match listen {
        Some(addr) => {
            let ip = addr.parse::<std::net::IpAddr>().map_err(|_| {
                anyhow!(
                    "Invalid IP address: '{addr}'. Expected IPv4 (e.g., 0.0.0.0, 127.0.0.1) or IPv6 (e.g., ::, ::1)"
                )
            })?;

            let socket = std::net::SocketAddr::new(ip, port);
            let listener = TcpListener::bind(socket)
                .await
                .with_context(|| format!("Failed to bind to {socket}"))?;

            Ok((listener, socket.to_string()))
        }
        None => match TcpListener::bind(format!("::0:{port}")).await {
            Ok(listener) => Ok((listener, format!("[::]:{port}"))),
            Err(_) => {
                let listener = TcpListener::bind(format!("0.0.0.0:{port}"))
                    .await
                    .with_context(|| format!("Failed to bind to 0.0.0.0:{port}"))?;
                Ok((listener, format!("0.0.0.0:{port}")))
            }
        },
    }
}

// Helper to format a list of items with a leading dash and indentation for the
// start up message
fn format_list<T: std::fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(|i| format!("  - {i}"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn make_span(request: &Request<Body>) -> Span {
    let parent_cx =
        global::get_text_map_propagator(|prop| prop.extract(&HeaderExtractor(request.headers())));

    let method = request.method().as_str();

    let path = request.uri().path();

    let target = request.uri().to_string();

    let scheme = request.uri().scheme_str().unwrap_or("http");

    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("none");

    let user_agent = request
        .headers()
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown");

    let span = info_span!(
        "http.server.request",
        otel.kind = "server",
        http.method = method,
        http.route = path,
        http.target = target,
        http.scheme = scheme,
        http.user_agent = user_agent,
        request_id = request_id,
        otel.status_code = tracing::field::Empty,
        trace_id = tracing::field::Empty,
    );

    let _ = span.set_parent(parent_cx);

    span
}

fn on_response<B>(response: &axum::http::Response<B>, latency: Duration, span: &Span) {
    let status = response.status();

    span.record(
        "otel.status_code",
        if status.is_server_error() { "ERROR" } else { "OK" },
    );

    let trace_id = span.context().span().span_context().trace_id();
    if trace_id != TraceId::INVALID {
        span.record("trace_id", tracing::field::display(trace_id));
    }

    info!(
        parent: span,
        status = status.as_u16(),
        elapsed_ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX),
        "request completed"
    );
}

// echo the trace id so callers can look the request up
async fn add_trace_headers(req: Request<Body>, next: Next) -> Response {
    let mut res = next.run(req).await;

    let span_context = Span::current().context().span().span_context().clone();

    if span_context.is_valid()
        && let Ok(value) = HeaderValue::from_str(&span_context.trace_id().to_string())
    {
        res.headers_mut()
            .insert(HeaderName::from_static("x-trace-id"), value);
    }

    res
}
