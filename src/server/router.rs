use crate::dispatch::DispatchEngine;
use crate::ledger::QuotaLedger;
use crate::providers::Providers;
use crate::server::routes;
use crate::store::AccountStore;

use axum::{
    Router,
    extract::Request,
    http::{HeaderName, StatusCode, Version, header::USER_AGENT},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
};
use base64::Engine as _;
use rand::RngCore;
use reqwest::header::HeaderValue;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

const MAX_REQUEST_ID_LEN: usize = 128;
const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

fn generate_request_id() -> String {
    // 96 bits => 16 chars base64url (no padding).
    let mut bytes = [0u8; 12];
    rand::rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

fn format_http_version(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "HTTP/0.9",
        Version::HTTP_10 => "HTTP/1.0",
        Version::HTTP_11 => "HTTP/1.1",
        Version::HTTP_2 => "HTTP/2",
        Version::HTTP_3 => "HTTP/3",
        _ => "HTTP/?",
    }
}

#[derive(Clone)]
pub struct HubState {
    pub engine: DispatchEngine,
    pub providers: Providers,
    pub store: AccountStore,
    pub ledger: QuotaLedger,
    pub admin_key: Arc<str>,
}

impl HubState {
    pub fn new(
        engine: DispatchEngine,
        providers: Providers,
        store: AccountStore,
        ledger: QuotaLedger,
        admin_key: Arc<str>,
    ) -> Self {
        Self {
            engine,
            providers,
            store,
            ledger,
            admin_key,
        }
    }
}

async fn not_found_handler() -> StatusCode {
    StatusCode::NOT_FOUND
}

async fn access_log(req: Request, next: Next) -> Response {
    // Capture request metadata before moving `req` into the handler stack.
    let method = req.method().clone();
    let uri = req.uri().clone();
    let version = req.version();

    let request_id = req
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty() && v.len() <= MAX_REQUEST_ID_LEN)
        .map(str::to_string)
        .unwrap_or_else(generate_request_id);

    let user_agent = req
        .headers()
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string();

    let start = Instant::now();
    let mut resp = next.run(req).await;

    // Always reflect `x-request-id` for easier correlation, even if the
    // client didn't send one.
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        resp.headers_mut().insert(X_REQUEST_ID, value);
    }

    let status = resp.status();
    let latency_ms = start.elapsed().as_millis() as u64;
    let path = uri.path();
    let protocol = format_http_version(version);

    // Note: for SSE/streaming responses, `latency_ms` is time-to-first-byte
    // (handler return), not the full stream duration.
    if status.is_server_error() {
        error!(
            "| {:>3} | {} | {:^7} | {:<8} | {} | {}ms | {}",
            status.as_u16(),
            request_id,
            method.as_str(),
            protocol,
            path,
            latency_ms,
            user_agent
        );
    } else if status.is_client_error() {
        warn!(
            "| {:>3} | {} | {:^7} | {:<8} | {} | {}ms | {}",
            status.as_u16(),
            request_id,
            method.as_str(),
            protocol,
            path,
            latency_ms,
            user_agent
        );
    } else {
        info!(
            "| {:>3} | {} | {:^7} | {:<8} | {} | {}ms | {}",
            status.as_u16(),
            request_id,
            method.as_str(),
            protocol,
            path,
            latency_ms,
            user_agent
        );
    }

    resp
}

pub fn hub_router(state: HubState) -> Router {
    let antigravity = Router::new()
        .route(
            "/antigravity/v1beta/models/{model_action}",
            post(routes::antigravity::generate_handler),
        )
        .route(
            "/antigravity/v1beta/models",
            get(routes::antigravity::models_handler),
        );

    let kiro = Router::new()
        .route("/kiro/v1/messages", post(routes::kiro::messages_handler))
        .route("/kiro/v1/models", get(routes::kiro::models_handler));

    let qwen = Router::new()
        .route(
            "/qwen/v1/chat/completions",
            post(routes::qwen::chat_completions_handler),
        )
        .route("/qwen/v1/models", get(routes::qwen::models_handler));

    let admin = Router::new()
        .route(
            "/admin/accounts/{provider}",
            get(routes::accounts::list_accounts_handler)
                .post(routes::accounts::create_account_handler),
        )
        .route(
            "/admin/accounts/{provider}/{id}/status",
            post(routes::accounts::set_status_handler),
        )
        .route(
            "/admin/accounts/{provider}/{id}/shared",
            post(routes::accounts::set_shared_handler),
        )
        .route(
            "/admin/accounts/kiro/{id}/usage",
            post(routes::accounts::update_kiro_usage_handler),
        )
        .route("/admin/users", post(routes::accounts::create_user_handler))
        .route(
            "/admin/pools/recompute",
            post(routes::accounts::recompute_pools_handler),
        );

    Router::new()
        .merge(antigravity)
        .merge(kiro)
        .merge(qwen)
        .merge(admin)
        .fallback(not_found_handler)
        .with_state(state)
        .layer(middleware::from_fn(access_log))
}
