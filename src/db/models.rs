use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::store::{
    Account, AccountKey, KiroAuthMethod, Provider, ProviderDetail, SharingPreference, User,
};

/// Cached per-(account, model) quota state as read by the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuotaSnapshot {
    pub remaining: f64,
    pub available: bool,
    pub fetched_at: DateTime<Utc>,
}

/// One row of a models-list refresh, upserted into `model_quota`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaUpsert {
    pub model: String,
    pub remaining: f64,
    pub available: bool,
    pub reset_time: Option<DateTime<Utc>>,
}

/// Input to the append-only consumption log. `consumed` is derived
/// (`max(0, before − after)`), never supplied by callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumptionRecord {
    pub user_id: String,
    pub key: AccountKey,
    pub model: String,
    /// Pool key when `shared`; quota-shared model groups collapse several
    /// model names onto one group here.
    pub model_group: String,
    pub quota_before: f64,
    pub quota_after: f64,
    pub shared: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SharedPool {
    pub quota: f64,
    pub max_quota: f64,
}

#[derive(Debug, Clone, FromRow)]
pub struct DbUser {
    pub id: String,
    pub api_key: String,
    pub sharing: String,
    pub status: bool,
}

impl DbUser {
    pub fn into_user(self) -> User {
        User {
            id: self.id,
            sharing: match self.sharing.as_str() {
                "prefer-shared" => SharingPreference::PreferShared,
                _ => SharingPreference::PreferDedicated,
            },
            status: self.status,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbAntigravityAccount {
    pub id: i64,
    pub user_id: String,
    pub shared: bool,
    pub email: Option<String>,
    pub refresh_token: String,
    pub access_token: Option<String>,
    pub expiry: DateTime<Utc>,
    pub status: bool,
    pub needs_reauth: bool,
    pub project_id: Option<String>,
    pub is_restricted: bool,
    pub ineligible: bool,
    pub paid_tier: bool,
}

impl DbAntigravityAccount {
    pub fn into_account(self) -> Account {
        Account {
            id: self.id,
            user_id: self.user_id,
            shared: self.shared,
            email: self.email,
            refresh_token: self.refresh_token,
            access_token: self.access_token,
            expiry: self.expiry,
            status: self.status,
            needs_reauth: self.needs_reauth,
            detail: ProviderDetail::Antigravity {
                project_id: self.project_id,
                is_restricted: self.is_restricted,
                ineligible: self.ineligible,
                paid_tier: self.paid_tier,
            },
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbKiroAccount {
    pub id: i64,
    pub user_id: String,
    pub shared: bool,
    pub email: Option<String>,
    pub auth_method: String,
    pub refresh_token: String,
    pub access_token: Option<String>,
    pub expiry: DateTime<Utc>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub profile_arn: Option<String>,
    pub machine_id: String,
    pub region: Option<String>,
    pub status: bool,
    pub needs_reauth: bool,
    pub subscription: Option<String>,
}

impl DbKiroAccount {
    pub fn into_account(self) -> Account {
        Account {
            id: self.id,
            user_id: self.user_id,
            shared: self.shared,
            email: self.email,
            refresh_token: self.refresh_token,
            access_token: self.access_token,
            expiry: self.expiry,
            status: self.status,
            needs_reauth: self.needs_reauth,
            detail: ProviderDetail::Kiro {
                auth_method: KiroAuthMethod::parse(&self.auth_method)
                    .unwrap_or(KiroAuthMethod::Social),
                client_id: self.client_id,
                client_secret: self.client_secret,
                profile_arn: self.profile_arn,
                machine_id: self.machine_id,
                region: self.region,
                subscription: self.subscription,
            },
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbQwenAccount {
    pub id: i64,
    pub user_id: String,
    pub shared: bool,
    pub email: Option<String>,
    pub refresh_token: String,
    pub access_token: Option<String>,
    pub expiry: DateTime<Utc>,
    pub resource_url: Option<String>,
    pub status: bool,
    pub needs_reauth: bool,
}

impl DbQwenAccount {
    pub fn into_account(self) -> Account {
        Account {
            id: self.id,
            user_id: self.user_id,
            shared: self.shared,
            email: self.email,
            refresh_token: self.refresh_token,
            access_token: self.access_token,
            expiry: self.expiry,
            status: self.status,
            needs_reauth: self.needs_reauth,
            detail: ProviderDetail::Qwen {
                resource_url: self.resource_url,
            },
        }
    }
}

pub(crate) fn account_table(provider: Provider) -> &'static str {
    match provider {
        Provider::Antigravity => "antigravity_accounts",
        Provider::Kiro => "kiro_accounts",
        Provider::Qwen => "qwen_accounts",
    }
}
