//! HTTP gateway that serves an origin through a cache controller.
//!
//! Every request that is not a control route is handed to
//! [`CacheController::fetch`]. Requests the controller passes through are
//! proxied to the origin unchanged.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};

use crate::config::ServerConfig;
use crate::controller::{CacheController, Command, FetchOutcome, LifecycleHooks};
use crate::error::{Error, Result};
use crate::fetch::Fetcher;
use crate::request::{CacheMode, Request, Response};
use crate::stats::WarmReport;
use crate::store::CacheStorage;

/// Largest request body forwarded to the origin.
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Headers that describe one hop and must not be forwarded.
const HOP_BY_HOP: [header::HeaderName; 5] = [
    header::CONNECTION,
    header::CONTENT_LENGTH,
    header::HOST,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

struct GatewayState<S, F, H> {
    controller: Arc<CacheController<S, F, H>>,
}

impl<S, F, H> Clone for GatewayState<S, F, H> {
    fn clone(&self) -> Self {
        Self {
            controller: Arc::clone(&self.controller),
        }
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    state: String,
    origin: String,
}

#[derive(Serialize)]
struct WarmResponse {
    requested: usize,
    fetched: usize,
    failed: Vec<String>,
    total_bytes: u64,
}

impl From<WarmReport> for WarmResponse {
    fn from(report: WarmReport) -> Self {
        Self {
            requested: report.requested,
            fetched: report.fetched,
            failed: report.failed.into_iter().map(|(key, _)| key).collect(),
            total_bytes: report.total_bytes,
        }
    }
}

async fn api_health<S, F, H>(State(state): State<GatewayState<S, F, H>>) -> impl IntoResponse
where
    S: CacheStorage + 'static,
    F: Fetcher + 'static,
    H: LifecycleHooks + 'static,
{
    axum::Json(HealthResponse {
        status: "ok".to_string(),
        state: state.controller.state().to_string(),
        origin: state.controller.origin().to_string(),
    })
}

/// Accepts the command either as plain text or as a JSON string.
async fn api_message<S, F, H>(
    State(state): State<GatewayState<S, F, H>>,
    body: String,
) -> axum::response::Response
where
    S: CacheStorage + 'static,
    F: Fetcher + 'static,
    H: LifecycleHooks + 'static,
{
    let text = serde_json::from_str::<String>(&body).unwrap_or(body);
    let command = Command::from(text.as_str());

    match state.controller.message(&command).await {
        Ok(Some(report)) => axum::Json(WarmResponse::from(report)).into_response(),
        Ok(None) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => {
            log::error!("Message {command:?} failed: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

async fn intercept<S, F, H>(
    State(state): State<GatewayState<S, F, H>>,
    request: axum::extract::Request,
) -> axum::response::Response
where
    S: CacheStorage + 'static,
    F: Fetcher + 'static,
    H: LifecycleHooks + 'static,
{
    let (parts, body) = request.into_parts();
    let body = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(body) => body,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };

    let path = parts.uri.path_and_query().map_or("/", |pq| pq.as_str());
    let controller = &state.controller;
    let mut request = Request::new(parts.method, controller.origin().resolve(path));
    request.headers = without_hop_by_hop(parts.headers);
    request.body = body;

    let result = match controller.fetch(&request).await {
        Ok(FetchOutcome::Respond(response)) => Ok(response),
        Ok(FetchOutcome::Passthrough) => {
            log::debug!("Passing through {}", request.key());
            controller.fetcher().fetch(&request, CacheMode::Default).await
        }
        Err(e) => Err(e),
    };

    match result {
        Ok(response) => into_http(response),
        Err(e) => {
            log::warn!("{} failed: {e}", request.key());
            (StatusCode::BAD_GATEWAY, e.to_string()).into_response()
        }
    }
}

fn without_hop_by_hop(mut headers: HeaderMap) -> HeaderMap {
    for name in &HOP_BY_HOP {
        headers.remove(name);
    }
    headers
}

fn into_http(response: Response) -> axum::response::Response {
    let headers = without_hop_by_hop(response.headers);
    (response.status, headers, response.body).into_response()
}

/// Builds the gateway router for a controller.
pub fn router<S, F, H>(controller: Arc<CacheController<S, F, H>>) -> Router
where
    S: CacheStorage + 'static,
    F: Fetcher + 'static,
    H: LifecycleHooks + 'static,
{
    let state = GatewayState { controller };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/_shell/health", get(api_health::<S, F, H>))
        .route("/_shell/message", post(api_message::<S, F, H>))
        .fallback(intercept::<S, F, H>)
        .layer(cors)
        .with_state(state)
}

/// Serves the gateway until the listener fails.
///
/// # Errors
///
/// Returns an error if the address is invalid or cannot be bound.
pub async fn run_server<S, F, H>(
    controller: Arc<CacheController<S, F, H>>,
    config: &ServerConfig,
) -> Result<()>
where
    S: CacheStorage + 'static,
    F: Fetcher + 'static,
    H: LifecycleHooks + 'static,
{
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| Error::Config(format!("bind address {}:{}: {e}", config.host, config.port)))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    log::info!(
        "Serving {} through the cache on http://{addr}",
        controller.origin()
    );
    axum::serve(listener, router(controller)).await?;
    Ok(())
}

/// Installs and activates the current deployment, then serves the gateway.
///
/// # Errors
///
/// Returns an error if the install fails or the server cannot be started.
pub async fn run_standalone<S, F, H>(
    controller: Arc<CacheController<S, F, H>>,
    config: &ServerConfig,
) -> Result<()>
where
    S: CacheStorage + 'static,
    F: Fetcher + 'static,
    H: LifecycleHooks + 'static,
{
    controller.install().await?;
    let report = controller.activate().await?;
    if !report.is_activated() {
        log::warn!("Activation rolled back; serving with empty caches");
    }
    run_server(controller, config).await
}
