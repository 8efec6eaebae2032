use crate::exporter::{GIT_COMMIT_HASH, ScrapeService};
use crate::scrape::Connector;
use axum::{
    body::Body,
    extract::Extension,
    http::{HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

#[derive(Serialize, Deserialize, Debug)]
pub struct Health {
    commit: String,
    name: String,
    version: String,
    database: String,
}

// Check database health
async fn check_database_health<C: Connector>(
    service: &ScrapeService<C>,
) -> Result<(), StatusCode> {
    service.ping().await.map_err(|e| {
        error!(
            datname = %service.target().database(),
            error = %e,
            "database health check failed"
        );
        StatusCode::SERVICE_UNAVAILABLE
    })
}

fn create_health_response(db_result: &Result<(), StatusCode>) -> Health {
    Health {
        commit: GIT_COMMIT_HASH.to_string(),
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        database: if db_result.is_ok() {
            "ok".to_string()
        } else {
            "error".to_string()
        },
    }
}

// Only GET carries a body
fn create_response_body(method: &Method, health: &Health) -> Body {
    if method == Method::GET {
        Json(health).into_response().into_body()
    } else {
        Body::empty()
    }
}

fn create_app_headers(health: &Health) -> HeaderMap {
    let short_hash = health.commit.get(..7).unwrap_or_default();

    let header_value = format!("{}:{}:{}", health.name, health.version, short_hash);

    let mut headers = HeaderMap::new();

    match header_value.parse::<HeaderValue>() {
        Ok(value) => {
            headers.insert("X-App", value);
        }
        Err(err) => {
            debug!(error = %err, "failed to build X-App header");
        }
    }

    headers
}

pub async fn health<C: Connector>(
    method: Method,
    Extension(service): Extension<ScrapeService<C>>,
) -> impl IntoResponse {
    let db_result = check_database_health(&service).await;
    let health = create_health_response(&db_result);
    let body = create_response_body(&method, &health);
    let headers = create_app_headers(&health);

    match db_result {
        Ok(()) => {
            debug!("database connection is healthy");
            (StatusCode::OK, headers, body)
        }
        Err(status_code) => (status_code, headers, body),
    }
}
