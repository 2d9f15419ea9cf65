use crate::db::{AccountCreate, DbHandle, KiroUsagePatch, ProjectPatch, TokenPatch, UserCreate};
use crate::error::HubError;
use crate::store::{Account, AccountKey, Provider, User};
use tracing::info;

/// Typed facade over the DB actor for everything account-shaped.
///
/// Thin by design: selection policy lives in dispatch, freshness policy in
/// the token manager. This layer only knows which mutation goes where.
#[derive(Clone)]
pub struct AccountStore {
    db: DbHandle,
}

impl AccountStore {
    pub fn new(db: DbHandle) -> Self {
        Self { db }
    }

    /// Enabled, not-needing-reauth accounts visible to `user_id`.
    /// `shared = Some(true)` restricts to the shared pool, `Some(false)` to
    /// the user's dedicated accounts, `None` to both.
    pub async fn get_available(
        &self,
        provider: Provider,
        user_id: &str,
        shared: Option<bool>,
    ) -> Result<Vec<Account>, HubError> {
        self.db.list_available(provider, user_id, shared).await
    }

    pub async fn list_all(&self, provider: Provider) -> Result<Vec<Account>, HubError> {
        self.db.list_all(provider).await
    }

    pub async fn get_by_id(&self, key: AccountKey) -> Result<Account, HubError> {
        self.db.get_account(key).await
    }

    pub async fn create(&self, create: AccountCreate) -> Result<i64, HubError> {
        self.db.create_account(create).await
    }

    pub async fn update_token(&self, key: AccountKey, patch: TokenPatch) -> Result<(), HubError> {
        self.db.update_token(key, patch).await
    }

    pub async fn update_status(&self, key: AccountKey, enabled: bool) -> Result<(), HubError> {
        info!(account = %key, enabled, "account status change");
        self.db.set_status(key, enabled).await
    }

    pub async fn set_shared(&self, key: AccountKey, shared: bool) -> Result<(), HubError> {
        self.db.set_shared(key, shared).await
    }

    pub async fn mark_needs_reauth(&self, key: AccountKey) -> Result<(), HubError> {
        info!(account = %key, "account flagged needs_reauth");
        self.db.mark_needs_reauth(key).await
    }

    pub async fn update_project_ids(
        &self,
        account_id: i64,
        patch: ProjectPatch,
    ) -> Result<(), HubError> {
        self.db.update_project(account_id, patch).await
    }

    pub async fn update_usage(
        &self,
        account_id: i64,
        patch: KiroUsagePatch,
    ) -> Result<(), HubError> {
        self.db.update_kiro_usage(account_id, patch).await
    }

    pub async fn user_by_api_key(&self, api_key: &str) -> Result<Option<User>, HubError> {
        self.db.get_user_by_key(api_key).await
    }

    pub async fn create_user(&self, create: UserCreate) -> Result<(), HubError> {
        self.db.create_user(create).await
    }
}
