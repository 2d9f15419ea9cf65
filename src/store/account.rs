use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Upstream provider family. Used as a routing key and as the `provider`
/// column in the ledger tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Antigravity,
    Kiro,
    Qwen,
}

impl Provider {
    pub fn as_str(self) -> &'static str {
        match self {
            Provider::Antigravity => "antigravity",
            Provider::Kiro => "kiro",
            Provider::Qwen => "qwen",
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable identity of one account row: provider table + row id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountKey {
    pub provider: Provider,
    pub id: i64,
}

impl std::fmt::Display for AccountKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.provider, self.id)
    }
}

/// Which pool a user's dispatch prefers when both are non-empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SharingPreference {
    #[default]
    PreferDedicated,
    PreferShared,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub sharing: SharingPreference,
    pub status: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KiroAuthMethod {
    Social,
    Idc,
}

impl KiroAuthMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            KiroAuthMethod::Social => "social",
            KiroAuthMethod::Idc => "idc",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "social" => Some(KiroAuthMethod::Social),
            "idc" => Some(KiroAuthMethod::Idc),
            _ => None,
        }
    }
}

/// One OAuth identity at an upstream provider, as held in memory by the
/// dispatch path. Provider-specific attributes hang off `detail`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    pub user_id: String,
    pub shared: bool,
    pub email: Option<String>,
    pub refresh_token: String,
    pub access_token: Option<String>,
    pub expiry: DateTime<Utc>,
    pub status: bool,
    pub needs_reauth: bool,
    pub detail: ProviderDetail,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ProviderDetail {
    Antigravity {
        project_id: Option<String>,
        is_restricted: bool,
        ineligible: bool,
        paid_tier: bool,
    },
    Kiro {
        auth_method: KiroAuthMethod,
        client_id: Option<String>,
        client_secret: Option<String>,
        profile_arn: Option<String>,
        machine_id: String,
        region: Option<String>,
        subscription: Option<String>,
    },
    Qwen {
        resource_url: Option<String>,
    },
}

impl Account {
    pub fn provider(&self) -> Provider {
        match self.detail {
            ProviderDetail::Antigravity { .. } => Provider::Antigravity,
            ProviderDetail::Kiro { .. } => Provider::Kiro,
            ProviderDetail::Qwen { .. } => Provider::Qwen,
        }
    }

    pub fn key(&self) -> AccountKey {
        AccountKey {
            provider: self.provider(),
            id: self.id,
        }
    }

    /// True when the access token is missing or expires inside the given
    /// safety margin. The token manager refreshes before the token is ever
    /// used upstream with less margin than this.
    pub fn token_stale(&self, margin: Duration) -> bool {
        self.access_token.is_none() || self.expiry - Utc::now() < margin
    }

    pub fn project_id(&self) -> Option<&str> {
        match &self.detail {
            ProviderDetail::Antigravity { project_id, .. } => project_id.as_deref(),
            _ => None,
        }
    }

    pub fn subscription(&self) -> Option<&str> {
        match &self.detail {
            ProviderDetail::Kiro { subscription, .. } => subscription.as_deref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(expiry: DateTime<Utc>, token: Option<&str>) -> Account {
        Account {
            id: 1,
            user_id: "u1".to_string(),
            shared: false,
            email: None,
            refresh_token: "rt".to_string(),
            access_token: token.map(str::to_string),
            expiry,
            status: true,
            needs_reauth: false,
            detail: ProviderDetail::Qwen { resource_url: None },
        }
    }

    #[test]
    fn token_staleness_uses_margin() {
        let margin = Duration::seconds(60);
        assert!(account(Utc::now() + Duration::seconds(30), Some("t")).token_stale(margin));
        assert!(account(Utc::now() + Duration::hours(1), None).token_stale(margin));
        assert!(!account(Utc::now() + Duration::hours(1), Some("t")).token_stale(margin));
    }
}
