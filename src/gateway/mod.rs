//! Axum-based HTTP gateway.
//!
//! Thin edge over the link workflow and the session resolver: callback
//! credential checks, query-parameter extraction, and mapping the service
//! error taxonomy onto `{code, error}` JSON answers. Body limits are a
//! tower-http layer and overdue requests are cut off by a deadline
//! middleware; all real state lives in [`AppState`], built once at startup
//! and cloned into every handler.

use crate::config::{Config, DirectoryConfig};
use crate::directory::Directory;
use crate::error::ServiceError;
use crate::linker::{self, LinkCallback};
use crate::resolver;
use crate::signing::VerifyOptions;
use crate::store::RecordStore;
use anyhow::Result;
use axum::{
    extract::{Query, Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::limit::RequestBodyLimitLayer;

/// Maximum request body size (64KB). The API is query-parameter driven, so
/// anything larger is abuse.
pub const MAX_BODY_SIZE: usize = 65_536;
/// Request deadline. Must exceed the resolver's worst case of three
/// sequential directory calls at the configured directory timeout each.
pub const REQUEST_TIMEOUT_SECS: u64 = 120;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn RecordStore>,
    pub directory: Arc<dyn Directory>,
    /// Precomputed `Basic …` value expected in `Authorization` on inbound
    /// requests. `None` when no callback credentials are configured.
    pub callback_credential: Option<Arc<str>>,
    pub skip_callback_auth: bool,
    pub verify_options: VerifyOptions,
}

/// Run the HTTP gateway until the listener fails.
pub async fn run_gateway(
    host: &str,
    port: u16,
    config: &Config,
    store: Arc<dyn RecordStore>,
    directory: Arc<dyn Directory>,
) -> Result<()> {
    let addr: SocketAddr = format!("{host}:{port}").parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let display_addr = listener.local_addr()?;

    let state = AppState {
        store,
        directory,
        callback_credential: callback_credential(&config.directory),
        skip_callback_auth: config.debug.skip_callback_auth,
        verify_options: VerifyOptions {
            skip_timestamp_check: config.debug.skip_timestamp_check,
        },
    };
    if state.skip_callback_auth {
        tracing::warn!("callback credential check is DISABLED (debug.skip_callback_auth)");
    }
    tracing::info!(
        service_id = %config.service_id,
        store = state.store.name(),
        "gateway listening on http://{display_addr}"
    );

    let app = Router::new()
        .route("/", get(handle_root))
        .route("/ndmp/linkService", post(handle_link_service))
        .route("/search", get(handle_search))
        .fallback(handle_not_found)
        .with_state(state)
        .layer(middleware::from_fn(log_request))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_SIZE))
        .layer(middleware::from_fn(enforce_deadline));

    axum::serve(listener, app).await?;
    Ok(())
}

/// Build the expected `Authorization` value for inbound requests.
fn callback_credential(config: &DirectoryConfig) -> Option<Arc<str>> {
    match (&config.callback_login, &config.callback_password) {
        (Some(login), Some(password)) => {
            let encoded = BASE64.encode(format!("{login}:{password}"));
            Some(Arc::from(format!("Basic {encoded}").as_str()))
        }
        _ => None,
    }
}

async fn log_request(request: Request, next: Next) -> Response {
    tracing::debug!(method = %request.method(), uri = %request.uri(), "inbound request");
    next.run(request).await
}

/// Answer an overdue request in the error taxonomy instead of a bare
/// timeout status.
async fn run_with_deadline<F>(deadline: Duration, fut: F) -> Response
where
    F: std::future::Future<Output = Response>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(response) => response,
        Err(_) => {
            tracing::warn!("request exceeded the gateway deadline");
            error_response(&ServiceError::Upstream)
        }
    }
}

async fn enforce_deadline(request: Request, next: Next) -> Response {
    run_with_deadline(Duration::from_secs(REQUEST_TIMEOUT_SECS), next.run(request)).await
}

/// Constant-time string comparison for credential checks.
fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes()
        .zip(b.bytes())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

/// Check the transport credential on an inbound request. Fails closed when
/// no callback credentials are configured.
fn check_callback_auth(state: &AppState, headers: &HeaderMap) -> Result<(), ServiceError> {
    if state.skip_callback_auth {
        return Ok(());
    }
    let Some(expected) = state.callback_credential.as_deref() else {
        return Err(ServiceError::Unauthorized);
    };
    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if constant_time_eq(presented, expected) {
        Ok(())
    } else {
        Err(ServiceError::Unauthorized)
    }
}

fn error_response(err: &ServiceError) -> Response {
    (
        err.status(),
        Json(serde_json::json!({"code": err.code(), "error": err.to_string()})),
    )
        .into_response()
}

/// GET / — liveness stub.
async fn handle_root() -> &'static str {
    ""
}

async fn handle_not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({"error": "not found"})),
    )
        .into_response()
}

/// Query parameters of a directory link callback. All five are mandatory,
/// but absence is diagnosed per field, so every one is optional here.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkServiceQuery {
    pub token_alias: Option<String>,
    pub service_id: Option<String>,
    pub device_ec_public: Option<String>,
    pub timestamp: Option<String>,
    pub ec_signature: Option<String>,
}

/// POST /ndmp/linkService — signed link callback from the directory.
async fn handle_link_service(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<LinkServiceQuery>,
) -> Response {
    if let Err(e) = check_callback_auth(&state, &headers) {
        tracing::warn!("linkService: callback credential rejected");
        return error_response(&e);
    }

    let callback = match LinkCallback::from_params(
        query.token_alias,
        query.service_id,
        query.device_ec_public,
        query.timestamp,
        query.ec_signature,
    ) {
        Ok(callback) => callback,
        Err(e) => return error_response(&e),
    };

    if !callback.verify(state.verify_options) {
        tracing::warn!(token_alias = %callback.token_alias, "linkService: signature is not verified");
        return error_response(&ServiceError::SignatureNotVerified);
    }

    // Verified: acknowledge now, link in a detached worker. The callback
    // sender only inspects the status code; it learns the outcome through
    // its own validate exchange, not through this response.
    linker::spawn_completion(
        Arc::clone(&state.store),
        Arc::clone(&state.directory),
        callback,
    );
    (
        StatusCode::OK,
        Json(serde_json::json!({"success": "started validation"})),
    )
        .into_response()
}

/// Query parameters of a search request.
#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub license: Option<String>,
    pub user_data: Option<String>,
    pub email: Option<String>,
}

/// GET /search — resolve a service tag to an authenticated session.
async fn handle_search(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<SearchQuery>,
) -> Response {
    if let Err(e) = check_callback_auth(&state, &headers) {
        tracing::warn!("search: callback credential rejected");
        return error_response(&e);
    }

    let Some(license) = query.license.filter(|l| !l.is_empty()) else {
        return error_response(&ServiceError::MissingParameter("license"));
    };
    // Accepted for future account binding; not part of the session key yet.
    let _ = query.email;

    match resolver::resolve_session(
        state.store.as_ref(),
        state.directory.as_ref(),
        &license,
        query.user_data.as_deref(),
    )
    .await
    {
        Ok(result) => {
            tracing::info!(token_alias = %result.token_alias, "search resolved a session");
            (StatusCode::OK, Json(result)).into_response()
        }
        Err(e) => {
            tracing::warn!(code = e.code(), "search failed: {e}");
            error_response(&e)
        }
    }
}
