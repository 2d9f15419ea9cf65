mod actor;
mod models;
mod patch;
mod schema;

pub use actor::{DbHandle, SHARED_POOL_MULTIPLIER, spawn};
pub use models::{ConsumptionRecord, QuotaSnapshot, QuotaUpsert, SharedPool};
pub use patch::{
    AccountCreate, AntigravityCreate, KiroCreate, KiroUsagePatch, ProjectPatch, QwenCreate,
    TokenPatch, UserCreate,
};
