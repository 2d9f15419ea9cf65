use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Upstream models-list response. One call reports the remaining quota
/// fraction for every model the account can reach, which is why the ledger
/// refreshes all rows of an account at once.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ModelsListResponse {
    #[serde(default)]
    pub models: Vec<ModelQuotaInfo>,

    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelQuotaInfo {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub quota_info: Option<QuotaInfo>,

    /// Upstream availability flag; a model can be listed but disabled.
    #[serde(default = "default_true")]
    pub available: bool,

    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct QuotaInfo {
    /// Remaining fraction of the per-model allowance, 0.0000–1.0000.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_fraction: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset_time: Option<DateTime<Utc>>,
}

fn default_true() -> bool {
    true
}
