use crate::exporter::ScrapeService;
use crate::scrape::Connector;
use axum::{
    extract::{Extension, Query},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::IntoResponse,
};
use tracing::{debug, error, warn};

const COLLECT_PARAM: &str = "collect[]";

/// Values of every `collect[]` parameter, in request order.
fn collect_filter(params: Vec<(String, String)>) -> Vec<String> {
    params
        .into_iter()
        .filter(|(key, _)| key == COLLECT_PARAM)
        .map(|(_, value)| value)
        .collect()
}

pub async fn metrics<C: Connector>(
    Extension(service): Extension<ScrapeService<C>>,
    Query(params): Query<Vec<(String, String)>>,
) -> impl IntoResponse {
    let mut headers = HeaderMap::new();
    headers.insert(
        "content-type",
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );

    let only = collect_filter(params);

    if let Err(e) = service.validate_filter(&only) {
        warn!(error = %e, "rejected collect[] filter");
        return (StatusCode::BAD_REQUEST, headers, format!("Couldn't create {e}"));
    }

    match service.render(&only).await {
        Ok(metrics) => {
            debug!(bytes = metrics.len(), "rendered metrics");
            (StatusCode::OK, headers, metrics)
        }
        Err(e) => {
            error!(error = %e, "failed to render metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                headers,
                format!("Error encoding metrics: {e}"),
            )
        }
    }
}
