use crate::db::{AccountCreate, KiroUsagePatch, UserCreate};
use crate::error::HubError;
use crate::server::guards::auth::RequireAdmin;
use crate::server::router::HubState;
use crate::store::{Account, AccountKey, Provider};
use axum::{
    Json,
    extract::{Path, State},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

fn parse_provider(raw: &str) -> Result<Provider, HubError> {
    match raw {
        "antigravity" => Ok(Provider::Antigravity),
        "kiro" => Ok(Provider::Kiro),
        "qwen" => Ok(Provider::Qwen),
        other => Err(HubError::Unexpected(format!("unknown provider: {other}"))),
    }
}

/// Listing view; tokens are never serialized back out.
#[derive(Debug, Serialize)]
struct AccountView {
    id: i64,
    user_id: String,
    shared: bool,
    email: Option<String>,
    status: bool,
    needs_reauth: bool,
    expiry: chrono::DateTime<chrono::Utc>,
}

impl From<Account> for AccountView {
    fn from(account: Account) -> Self {
        Self {
            id: account.id,
            user_id: account.user_id,
            shared: account.shared,
            email: account.email,
            status: account.status,
            needs_reauth: account.needs_reauth,
            expiry: account.expiry,
        }
    }
}

pub async fn list_accounts_handler(
    State(state): State<HubState>,
    _admin: RequireAdmin,
    Path(provider): Path<String>,
) -> Result<Json<Value>, HubError> {
    let provider = parse_provider(&provider)?;
    let accounts: Vec<AccountView> = state
        .store
        .list_all(provider)
        .await?
        .into_iter()
        .map(AccountView::from)
        .collect();
    Ok(Json(json!({ "accounts": accounts })))
}

pub async fn create_account_handler(
    State(state): State<HubState>,
    _admin: RequireAdmin,
    Path(provider): Path<String>,
    Json(create): Json<AccountCreate>,
) -> Result<Json<Value>, HubError> {
    let path_provider = parse_provider(&provider)?;
    let body_provider = match &create {
        AccountCreate::Antigravity(_) => Provider::Antigravity,
        AccountCreate::Kiro(_) => Provider::Kiro,
        AccountCreate::Qwen(_) => Provider::Qwen,
    };
    if path_provider != body_provider {
        return Err(HubError::Unexpected(
            "provider path does not match payload type".to_string(),
        ));
    }

    let id = state.store.create(create).await?;
    Ok(Json(json!({ "id": id })))
}

#[derive(Debug, Deserialize)]
pub struct SetStatusBody {
    pub enabled: bool,
}

pub async fn set_status_handler(
    State(state): State<HubState>,
    _admin: RequireAdmin,
    Path((provider, id)): Path<(String, i64)>,
    Json(body): Json<SetStatusBody>,
) -> Result<Json<Value>, HubError> {
    let provider = parse_provider(&provider)?;
    state
        .store
        .update_status(AccountKey { provider, id }, body.enabled)
        .await?;
    Ok(Json(json!({ "ok": true })))
}

#[derive(Debug, Deserialize)]
pub struct SetSharedBody {
    pub shared: bool,
}

/// Flip dedicated/shared; the owner's pool ceilings follow the change.
pub async fn set_shared_handler(
    State(state): State<HubState>,
    _admin: RequireAdmin,
    Path((provider, id)): Path<(String, i64)>,
    Json(body): Json<SetSharedBody>,
) -> Result<Json<Value>, HubError> {
    let provider = parse_provider(&provider)?;
    state
        .store
        .set_shared(AccountKey { provider, id }, body.shared)
        .await?;
    Ok(Json(json!({ "ok": true })))
}

/// Sync point for the upstream usage/profile endpoint: subscription tier,
/// credit counters, free-trial and bonus blocks.
pub async fn update_kiro_usage_handler(
    State(state): State<HubState>,
    _admin: RequireAdmin,
    Path(id): Path<i64>,
    Json(patch): Json<KiroUsagePatch>,
) -> Result<Json<Value>, HubError> {
    state.store.update_usage(id, patch).await?;
    Ok(Json(json!({ "ok": true })))
}

pub async fn create_user_handler(
    State(state): State<HubState>,
    _admin: RequireAdmin,
    Json(create): Json<UserCreate>,
) -> Result<Json<Value>, HubError> {
    state.store.create_user(create).await?;
    Ok(Json(json!({ "ok": true })))
}

#[derive(Debug, Deserialize)]
pub struct RecomputePoolsBody {
    pub user_id: String,
    pub provider: String,
}

/// Operator refill path: re-derive `max_quota` for a user's pools.
pub async fn recompute_pools_handler(
    State(state): State<HubState>,
    _admin: RequireAdmin,
    Json(body): Json<RecomputePoolsBody>,
) -> Result<Json<Value>, HubError> {
    let provider = parse_provider(&body.provider)?;
    state.ledger.recompute_pools(&body.user_id, provider).await?;
    Ok(Json(json!({ "ok": true })))
}
