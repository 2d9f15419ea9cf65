use crate::db::models::{
    ConsumptionRecord, DbAntigravityAccount, DbKiroAccount, DbQwenAccount, DbUser, QuotaSnapshot,
    QuotaUpsert, SharedPool, account_table,
};
use crate::db::patch::{
    AccountCreate, KiroUsagePatch, ProjectPatch, TokenPatch, UserCreate,
};
use crate::db::schema::{KIRO_REGION_MIGRATION, SQLITE_INIT};
use crate::error::HubError;
use crate::store::{Account, AccountKey, Provider, User};
use chrono::Utc;
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use std::{str::FromStr, time::Duration};
use tracing::info;

/// Shared-pool capacity per shared enabled account. Deliberately not a
/// config knob.
pub const SHARED_POOL_MULTIPLIER: f64 = 2.0;

#[derive(Debug)]
pub enum DbMessage {
    /// Accounts selectable for dispatch: enabled, not needing re-auth,
    /// visible to the user under the given sharing filter.
    ListAvailable {
        provider: Provider,
        user_id: String,
        shared: Option<bool>,
        reply: RpcReplyPort<Result<Vec<Account>, HubError>>,
    },

    /// Every account of a provider regardless of status (admin listings).
    ListAll {
        provider: Provider,
        reply: RpcReplyPort<Result<Vec<Account>, HubError>>,
    },

    GetAccount(AccountKey, RpcReplyPort<Result<Account, HubError>>),

    CreateAccount(AccountCreate, RpcReplyPort<Result<i64, HubError>>),

    /// Persist a refresh result: token + expiry (+ provider-specific
    /// rotations) in one row update. Clears `needs_reauth`.
    UpdateToken {
        key: AccountKey,
        patch: TokenPatch,
        reply: RpcReplyPort<Result<(), HubError>>,
    },

    /// Enable/disable; recomputes the owner's shared pools.
    SetStatus {
        key: AccountKey,
        enabled: bool,
        reply: RpcReplyPort<Result<(), HubError>>,
    },

    /// Flip dedicated/shared; recomputes the owner's shared pools.
    SetShared {
        key: AccountKey,
        shared: bool,
        reply: RpcReplyPort<Result<(), HubError>>,
    },

    MarkNeedsReauth {
        key: AccountKey,
        reply: RpcReplyPort<Result<(), HubError>>,
    },

    /// Antigravity project block after loadCodeAssist/onboardUser.
    UpdateProject {
        id: i64,
        patch: ProjectPatch,
        reply: RpcReplyPort<Result<(), HubError>>,
    },

    UpdateKiroUsage {
        id: i64,
        patch: KiroUsagePatch,
        reply: RpcReplyPort<Result<(), HubError>>,
    },

    GetUserByKey(String, RpcReplyPort<Result<Option<User>, HubError>>),

    CreateUser(UserCreate, RpcReplyPort<Result<(), HubError>>),

    GetQuota {
        key: AccountKey,
        model: String,
        reply: RpcReplyPort<Result<Option<QuotaSnapshot>, HubError>>,
    },

    /// Upsert all models of one account at once (models-list refresh).
    UpsertQuotas {
        key: AccountKey,
        rows: Vec<QuotaUpsert>,
        reply: RpcReplyPort<Result<(), HubError>>,
    },

    /// Append one consumption row; for shared accounts also decrement the
    /// caller's pool. Both writes share a transaction. Replies with the
    /// derived `consumed`.
    RecordConsumption(ConsumptionRecord, RpcReplyPort<Result<f64, HubError>>),

    GetSharedPool {
        user_id: String,
        provider: Provider,
        model_group: String,
        reply: RpcReplyPort<Result<Option<SharedPool>, HubError>>,
    },

    /// Re-derive `max_quota` for every pool row of a user+provider.
    RecomputeSharedPools {
        user_id: String,
        provider: Provider,
        reply: RpcReplyPort<Result<(), HubError>>,
    },
}

#[derive(Clone)]
pub struct DbHandle {
    actor: ActorRef<DbMessage>,
}

macro_rules! db_rpc {
    ($self:expr, $variant:ident $(, $arg:expr)*) => {
        ractor::call!($self.actor, DbMessage::$variant $(, $arg)*)
            .map_err(|e| HubError::Actor(format!("DbActor {} RPC failed: {e}", stringify!($variant))))?
    };
}

impl DbHandle {
    pub async fn list_available(
        &self,
        provider: Provider,
        user_id: &str,
        shared: Option<bool>,
    ) -> Result<Vec<Account>, HubError> {
        let user_id = user_id.to_string();
        ractor::call!(self.actor, |reply| DbMessage::ListAvailable {
            provider,
            user_id,
            shared,
            reply
        })
        .map_err(|e| HubError::Actor(format!("DbActor ListAvailable RPC failed: {e}")))?
    }

    pub async fn list_all(&self, provider: Provider) -> Result<Vec<Account>, HubError> {
        ractor::call!(self.actor, |reply| DbMessage::ListAll { provider, reply })
            .map_err(|e| HubError::Actor(format!("DbActor ListAll RPC failed: {e}")))?
    }

    pub async fn get_account(&self, key: AccountKey) -> Result<Account, HubError> {
        db_rpc!(self, GetAccount, key)
    }

    pub async fn create_account(&self, create: AccountCreate) -> Result<i64, HubError> {
        db_rpc!(self, CreateAccount, create)
    }

    pub async fn update_token(&self, key: AccountKey, patch: TokenPatch) -> Result<(), HubError> {
        ractor::call!(self.actor, |reply| DbMessage::UpdateToken { key, patch, reply })
            .map_err(|e| HubError::Actor(format!("DbActor UpdateToken RPC failed: {e}")))?
    }

    pub async fn set_status(&self, key: AccountKey, enabled: bool) -> Result<(), HubError> {
        ractor::call!(self.actor, |reply| DbMessage::SetStatus { key, enabled, reply })
            .map_err(|e| HubError::Actor(format!("DbActor SetStatus RPC failed: {e}")))?
    }

    pub async fn set_shared(&self, key: AccountKey, shared: bool) -> Result<(), HubError> {
        ractor::call!(self.actor, |reply| DbMessage::SetShared { key, shared, reply })
            .map_err(|e| HubError::Actor(format!("DbActor SetShared RPC failed: {e}")))?
    }

    pub async fn mark_needs_reauth(&self, key: AccountKey) -> Result<(), HubError> {
        ractor::call!(self.actor, |reply| DbMessage::MarkNeedsReauth { key, reply })
            .map_err(|e| HubError::Actor(format!("DbActor MarkNeedsReauth RPC failed: {e}")))?
    }

    pub async fn update_project(&self, id: i64, patch: ProjectPatch) -> Result<(), HubError> {
        ractor::call!(self.actor, |reply| DbMessage::UpdateProject { id, patch, reply })
            .map_err(|e| HubError::Actor(format!("DbActor UpdateProject RPC failed: {e}")))?
    }

    pub async fn update_kiro_usage(&self, id: i64, patch: KiroUsagePatch) -> Result<(), HubError> {
        ractor::call!(self.actor, |reply| DbMessage::UpdateKiroUsage { id, patch, reply })
            .map_err(|e| HubError::Actor(format!("DbActor UpdateKiroUsage RPC failed: {e}")))?
    }

    pub async fn get_user_by_key(&self, api_key: &str) -> Result<Option<User>, HubError> {
        db_rpc!(self, GetUserByKey, api_key.to_string())
    }

    pub async fn create_user(&self, create: UserCreate) -> Result<(), HubError> {
        db_rpc!(self, CreateUser, create)
    }

    pub async fn get_quota(
        &self,
        key: AccountKey,
        model: &str,
    ) -> Result<Option<QuotaSnapshot>, HubError> {
        let model = model.to_string();
        ractor::call!(self.actor, |reply| DbMessage::GetQuota { key, model, reply })
            .map_err(|e| HubError::Actor(format!("DbActor GetQuota RPC failed: {e}")))?
    }

    pub async fn upsert_quotas(
        &self,
        key: AccountKey,
        rows: Vec<QuotaUpsert>,
    ) -> Result<(), HubError> {
        ractor::call!(self.actor, |reply| DbMessage::UpsertQuotas { key, rows, reply })
            .map_err(|e| HubError::Actor(format!("DbActor UpsertQuotas RPC failed: {e}")))?
    }

    pub async fn record_consumption(&self, record: ConsumptionRecord) -> Result<f64, HubError> {
        db_rpc!(self, RecordConsumption, record)
    }

    pub async fn get_shared_pool(
        &self,
        user_id: &str,
        provider: Provider,
        model_group: &str,
    ) -> Result<Option<SharedPool>, HubError> {
        let user_id = user_id.to_string();
        let model_group = model_group.to_string();
        ractor::call!(self.actor, |reply| DbMessage::GetSharedPool {
            user_id,
            provider,
            model_group,
            reply
        })
        .map_err(|e| HubError::Actor(format!("DbActor GetSharedPool RPC failed: {e}")))?
    }

    pub async fn recompute_shared_pools(
        &self,
        user_id: &str,
        provider: Provider,
    ) -> Result<(), HubError> {
        let user_id = user_id.to_string();
        ractor::call!(self.actor, |reply| DbMessage::RecomputeSharedPools {
            user_id,
            provider,
            reply
        })
        .map_err(|e| HubError::Actor(format!("DbActor RecomputeSharedPools RPC failed: {e}")))?
    }
}

struct DbActorState {
    pool: SqlitePool,
}

struct DbActor;

#[ractor::async_trait]
impl Actor for DbActor {
    type Msg = DbMessage;
    type State = DbActorState;
    type Arguments = String;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        database_url: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        let connect_opts = SqliteConnectOptions::from_str(database_url.as_str())
            .map_err(|e| ActorProcessingErr::from(format!("invalid database url: {e}")))?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5))
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .connect_with(connect_opts)
            .await
            .map_err(|e| ActorProcessingErr::from(format!("db connect failed: {e}")))?;

        apply_schema(&pool)
            .await
            .map_err(|e| ActorProcessingErr::from(format!("db schema init failed: {e}")))?;

        info!("DbActor initialized");
        Ok(DbActorState { pool })
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        let pool = &state.pool;
        match message {
            DbMessage::ListAvailable {
                provider,
                user_id,
                shared,
                reply,
            } => {
                let _ = reply.send(list_available(pool, provider, &user_id, shared).await);
            }
            DbMessage::ListAll { provider, reply } => {
                let _ = reply.send(list_all(pool, provider).await);
            }
            DbMessage::GetAccount(key, reply) => {
                let _ = reply.send(get_account(pool, key).await);
            }
            DbMessage::CreateAccount(create, reply) => {
                let _ = reply.send(create_account(pool, create).await);
            }
            DbMessage::UpdateToken { key, patch, reply } => {
                let _ = reply.send(update_token(pool, key, patch).await);
            }
            DbMessage::SetStatus { key, enabled, reply } => {
                let _ = reply.send(set_status(pool, key, enabled).await);
            }
            DbMessage::SetShared { key, shared, reply } => {
                let _ = reply.send(set_shared(pool, key, shared).await);
            }
            DbMessage::MarkNeedsReauth { key, reply } => {
                let _ = reply.send(mark_needs_reauth(pool, key).await);
            }
            DbMessage::UpdateProject { id, patch, reply } => {
                let _ = reply.send(update_project(pool, id, &patch).await);
            }
            DbMessage::UpdateKiroUsage { id, patch, reply } => {
                let _ = reply.send(update_kiro_usage(pool, id, &patch).await);
            }
            DbMessage::GetUserByKey(api_key, reply) => {
                let _ = reply.send(get_user_by_key(pool, &api_key).await);
            }
            DbMessage::CreateUser(create, reply) => {
                let _ = reply.send(create_user(pool, create).await);
            }
            DbMessage::GetQuota { key, model, reply } => {
                let _ = reply.send(get_quota(pool, key, &model).await);
            }
            DbMessage::UpsertQuotas { key, rows, reply } => {
                let _ = reply.send(upsert_quotas(pool, key, rows).await);
            }
            DbMessage::RecordConsumption(record, reply) => {
                let _ = reply.send(record_consumption(pool, record).await);
            }
            DbMessage::GetSharedPool {
                user_id,
                provider,
                model_group,
                reply,
            } => {
                let _ = reply.send(get_shared_pool(pool, &user_id, provider, &model_group).await);
            }
            DbMessage::RecomputeSharedPools {
                user_id,
                provider,
                reply,
            } => {
                let _ = reply.send(recompute_shared_pools(pool, &user_id, provider).await);
            }
        }
        Ok(())
    }
}

const ANTIGRAVITY_COLS: &str = "id, user_id, shared, email, refresh_token, access_token, expiry, \
     status, needs_reauth, project_id, is_restricted, ineligible, paid_tier";
const KIRO_COLS: &str = "id, user_id, shared, email, auth_method, refresh_token, access_token, \
     expiry, client_id, client_secret, profile_arn, machine_id, region, status, needs_reauth, \
     subscription";
const QWEN_COLS: &str = "id, user_id, shared, email, refresh_token, access_token, expiry, \
     resource_url, status, needs_reauth";

fn availability_clause(shared: Option<bool>) -> &'static str {
    match shared {
        Some(true) => "status = 1 AND needs_reauth = 0 AND shared = 1",
        Some(false) => "status = 1 AND needs_reauth = 0 AND shared = 0 AND user_id = ?",
        None => "status = 1 AND needs_reauth = 0 AND (shared = 1 OR user_id = ?)",
    }
}

async fn list_available(
    pool: &SqlitePool,
    provider: Provider,
    user_id: &str,
    shared: Option<bool>,
) -> Result<Vec<Account>, HubError> {
    let clause = availability_clause(shared);
    let needs_user = !matches!(shared, Some(true));

    macro_rules! fetch {
        ($row:ty, $cols:expr, $table:expr) => {{
            let sql = format!("SELECT {} FROM {} WHERE {} ORDER BY id", $cols, $table, clause);
            let mut q = sqlx::query_as::<_, $row>(&sql);
            if needs_user {
                q = q.bind(user_id);
            }
            q.fetch_all(pool)
                .await?
                .into_iter()
                .map(|r| r.into_account())
                .collect()
        }};
    }

    let accounts: Vec<Account> = match provider {
        Provider::Antigravity => {
            fetch!(DbAntigravityAccount, ANTIGRAVITY_COLS, "antigravity_accounts")
        }
        Provider::Kiro => fetch!(DbKiroAccount, KIRO_COLS, "kiro_accounts"),
        Provider::Qwen => fetch!(DbQwenAccount, QWEN_COLS, "qwen_accounts"),
    };
    Ok(accounts)
}

async fn list_all(pool: &SqlitePool, provider: Provider) -> Result<Vec<Account>, HubError> {
    macro_rules! fetch {
        ($row:ty, $cols:expr, $table:expr) => {{
            let sql = format!("SELECT {} FROM {} ORDER BY id", $cols, $table);
            sqlx::query_as::<_, $row>(&sql)
                .fetch_all(pool)
                .await?
                .into_iter()
                .map(|r| r.into_account())
                .collect()
        }};
    }

    let accounts: Vec<Account> = match provider {
        Provider::Antigravity => {
            fetch!(DbAntigravityAccount, ANTIGRAVITY_COLS, "antigravity_accounts")
        }
        Provider::Kiro => fetch!(DbKiroAccount, KIRO_COLS, "kiro_accounts"),
        Provider::Qwen => fetch!(DbQwenAccount, QWEN_COLS, "qwen_accounts"),
    };
    Ok(accounts)
}

async fn get_account(pool: &SqlitePool, key: AccountKey) -> Result<Account, HubError> {
    macro_rules! fetch_one {
        ($row:ty, $cols:expr, $table:expr) => {{
            let sql = format!("SELECT {} FROM {} WHERE id = ?", $cols, $table);
            sqlx::query_as::<_, $row>(&sql)
                .bind(key.id)
                .fetch_one(pool)
                .await?
                .into_account()
        }};
    }

    let account = match key.provider {
        Provider::Antigravity => {
            fetch_one!(DbAntigravityAccount, ANTIGRAVITY_COLS, "antigravity_accounts")
        }
        Provider::Kiro => fetch_one!(DbKiroAccount, KIRO_COLS, "kiro_accounts"),
        Provider::Qwen => fetch_one!(DbQwenAccount, QWEN_COLS, "qwen_accounts"),
    };
    Ok(account)
}

async fn create_account(pool: &SqlitePool, create: AccountCreate) -> Result<i64, HubError> {
    let now = Utc::now();
    let (id, user_id, provider, shared) = match create {
        AccountCreate::Antigravity(c) => {
            let id: i64 = sqlx::query_scalar(
                r#"
            INSERT INTO antigravity_accounts (
                user_id, shared, email, refresh_token, access_token, expiry,
                project_id, status, needs_reauth, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, 1, 0, ?, ?)
            RETURNING id
            "#,
            )
            .bind(&c.user_id)
            .bind(c.shared)
            .bind(&c.email)
            .bind(&c.refresh_token)
            .bind(&c.access_token)
            .bind(c.expiry)
            .bind(&c.project_id)
            .bind(now)
            .bind(now)
            .fetch_one(pool)
            .await?;
            (id, c.user_id, Provider::Antigravity, c.shared)
        }
        AccountCreate::Kiro(c) => {
            let id: i64 = sqlx::query_scalar(
                r#"
            INSERT INTO kiro_accounts (
                user_id, shared, email, auth_method, refresh_token, access_token,
                expiry, client_id, client_secret, profile_arn, machine_id, region,
                status, needs_reauth, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1, 0, ?, ?)
            RETURNING id
            "#,
            )
            .bind(&c.user_id)
            .bind(c.shared)
            .bind(&c.email)
            .bind(c.auth_method.as_str())
            .bind(&c.refresh_token)
            .bind(&c.access_token)
            .bind(c.expiry)
            .bind(&c.client_id)
            .bind(&c.client_secret)
            .bind(&c.profile_arn)
            .bind(&c.machine_id)
            .bind(&c.region)
            .bind(now)
            .bind(now)
            .fetch_one(pool)
            .await?;
            (id, c.user_id, Provider::Kiro, c.shared)
        }
        AccountCreate::Qwen(c) => {
            let id: i64 = sqlx::query_scalar(
                r#"
            INSERT INTO qwen_accounts (
                user_id, shared, email, refresh_token, access_token, expiry,
                resource_url, status, needs_reauth, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, 1, 0, ?, ?)
            RETURNING id
            "#,
            )
            .bind(&c.user_id)
            .bind(c.shared)
            .bind(&c.email)
            .bind(&c.refresh_token)
            .bind(&c.access_token)
            .bind(c.expiry)
            .bind(&c.resource_url)
            .bind(now)
            .bind(now)
            .fetch_one(pool)
            .await?;
            (id, c.user_id, Provider::Qwen, c.shared)
        }
    };

    if shared {
        recompute_shared_pools(pool, &user_id, provider).await?;
    }
    Ok(id)
}

async fn update_token(
    pool: &SqlitePool,
    key: AccountKey,
    patch: TokenPatch,
) -> Result<(), HubError> {
    let now = Utc::now();
    match key.provider {
        Provider::Antigravity => {
            sqlx::query(
                r#"
            UPDATE antigravity_accounts SET
                access_token = ?,
                expiry = ?,
                refresh_token = COALESCE(?, refresh_token),
                needs_reauth = 0,
                updated_at = ?
            WHERE id = ?
            "#,
            )
            .bind(&patch.access_token)
            .bind(patch.expiry)
            .bind(&patch.refresh_token)
            .bind(now)
            .bind(key.id)
            .execute(pool)
            .await?;
        }
        Provider::Kiro => {
            sqlx::query(
                r#"
            UPDATE kiro_accounts SET
                access_token = ?,
                expiry = ?,
                refresh_token = COALESCE(?, refresh_token),
                profile_arn = COALESCE(?, profile_arn),
                needs_reauth = 0,
                updated_at = ?
            WHERE id = ?
            "#,
            )
            .bind(&patch.access_token)
            .bind(patch.expiry)
            .bind(&patch.refresh_token)
            .bind(&patch.profile_arn)
            .bind(now)
            .bind(key.id)
            .execute(pool)
            .await?;
        }
        Provider::Qwen => {
            sqlx::query(
                r#"
            UPDATE qwen_accounts SET
                access_token = ?,
                expiry = ?,
                refresh_token = COALESCE(?, refresh_token),
                resource_url = COALESCE(?, resource_url),
                needs_reauth = 0,
                updated_at = ?
            WHERE id = ?
            "#,
            )
            .bind(&patch.access_token)
            .bind(patch.expiry)
            .bind(&patch.refresh_token)
            .bind(&patch.resource_url)
            .bind(now)
            .bind(key.id)
            .execute(pool)
            .await?;
        }
    }
    Ok(())
}

async fn set_status(pool: &SqlitePool, key: AccountKey, enabled: bool) -> Result<(), HubError> {
    let table = account_table(key.provider);
    let sql = format!("UPDATE {table} SET status = ?, updated_at = ? WHERE id = ? RETURNING user_id");
    let user_id: Option<String> = sqlx::query_scalar(&sql)
        .bind(enabled)
        .bind(Utc::now())
        .bind(key.id)
        .fetch_optional(pool)
        .await?;

    // Pool capacity tracks shared enabled accounts, so every status flip
    // re-derives the owner's pools.
    if let Some(user_id) = user_id {
        recompute_shared_pools(pool, &user_id, key.provider).await?;
    }
    Ok(())
}

async fn set_shared(pool: &SqlitePool, key: AccountKey, shared: bool) -> Result<(), HubError> {
    let table = account_table(key.provider);
    let sql = format!("UPDATE {table} SET shared = ?, updated_at = ? WHERE id = ? RETURNING user_id");
    let user_id: Option<String> = sqlx::query_scalar(&sql)
        .bind(shared)
        .bind(Utc::now())
        .bind(key.id)
        .fetch_optional(pool)
        .await?;

    if let Some(user_id) = user_id {
        recompute_shared_pools(pool, &user_id, key.provider).await?;
    }
    Ok(())
}

async fn mark_needs_reauth(pool: &SqlitePool, key: AccountKey) -> Result<(), HubError> {
    let table = account_table(key.provider);
    let sql = format!("UPDATE {table} SET needs_reauth = 1, updated_at = ? WHERE id = ?");
    sqlx::query(&sql)
        .bind(Utc::now())
        .bind(key.id)
        .execute(pool)
        .await?;
    Ok(())
}

async fn update_project(pool: &SqlitePool, id: i64, patch: &ProjectPatch) -> Result<(), HubError> {
    sqlx::query(
        r#"
    UPDATE antigravity_accounts SET
        project_id = ?,
        is_restricted = ?,
        ineligible = ?,
        paid_tier = ?,
        updated_at = ?
    WHERE id = ?
    "#,
    )
    .bind(&patch.project_id)
    .bind(patch.is_restricted)
    .bind(patch.ineligible)
    .bind(patch.paid_tier)
    .bind(Utc::now())
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

async fn update_kiro_usage(
    pool: &SqlitePool,
    id: i64,
    patch: &KiroUsagePatch,
) -> Result<(), HubError> {
    sqlx::query(
        r#"
    UPDATE kiro_accounts SET
        subscription = COALESCE(?, subscription),
        current_usage = COALESCE(?, current_usage),
        reset_date = COALESCE(?, reset_date),
        usage_limit = COALESCE(?, usage_limit),
        free_trial_status = COALESCE(?, free_trial_status),
        free_trial_usage = COALESCE(?, free_trial_usage),
        free_trial_expiry = COALESCE(?, free_trial_expiry),
        free_trial_limit = COALESCE(?, free_trial_limit),
        bonus_usage = COALESCE(?, bonus_usage),
        bonus_limit = COALESCE(?, bonus_limit),
        bonus_available = COALESCE(?, bonus_available),
        bonus_details = COALESCE(?, bonus_details),
        updated_at = ?
    WHERE id = ?
    "#,
    )
    .bind(&patch.subscription)
    .bind(patch.current_usage)
    .bind(patch.reset_date)
    .bind(patch.usage_limit)
    .bind(&patch.free_trial_status)
    .bind(patch.free_trial_usage)
    .bind(patch.free_trial_expiry)
    .bind(patch.free_trial_limit)
    .bind(patch.bonus_usage)
    .bind(patch.bonus_limit)
    .bind(patch.bonus_available)
    .bind(&patch.bonus_details)
    .bind(Utc::now())
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

async fn get_user_by_key(pool: &SqlitePool, api_key: &str) -> Result<Option<User>, HubError> {
    let row = sqlx::query_as::<_, DbUser>(
        "SELECT id, api_key, sharing, status FROM users WHERE api_key = ? AND status = 1",
    )
    .bind(api_key)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(DbUser::into_user))
}

async fn create_user(pool: &SqlitePool, create: UserCreate) -> Result<(), HubError> {
    let now = Utc::now();
    let sharing = match create.sharing {
        crate::store::SharingPreference::PreferDedicated => "prefer-dedicated",
        crate::store::SharingPreference::PreferShared => "prefer-shared",
    };
    sqlx::query(
        r#"
    INSERT INTO users (id, api_key, sharing, status, created_at, updated_at)
    VALUES (?, ?, ?, 1, ?, ?)
    ON CONFLICT(id) DO UPDATE SET
        api_key = excluded.api_key,
        sharing = excluded.sharing,
        updated_at = excluded.updated_at
    "#,
    )
    .bind(&create.id)
    .bind(&create.api_key)
    .bind(sharing)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(())
}

async fn get_quota(
    pool: &SqlitePool,
    key: AccountKey,
    model: &str,
) -> Result<Option<QuotaSnapshot>, HubError> {
    let row: Option<(f64, bool, chrono::DateTime<Utc>)> = sqlx::query_as(
        "SELECT remaining, available, fetched_at FROM model_quota \
         WHERE provider = ? AND account_id = ? AND model = ?",
    )
    .bind(key.provider.as_str())
    .bind(key.id)
    .bind(model)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|(remaining, available, fetched_at)| QuotaSnapshot {
        remaining,
        available,
        fetched_at,
    }))
}

async fn upsert_quotas(
    pool: &SqlitePool,
    key: AccountKey,
    rows: Vec<QuotaUpsert>,
) -> Result<(), HubError> {
    let now = Utc::now();
    let mut tx = pool.begin().await?;
    for row in rows {
        sqlx::query(
            r#"
        INSERT INTO model_quota (provider, account_id, model, remaining, reset_time, available, fetched_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(provider, account_id, model) DO UPDATE SET
            remaining = excluded.remaining,
            reset_time = excluded.reset_time,
            available = excluded.available,
            fetched_at = excluded.fetched_at
        "#,
        )
        .bind(key.provider.as_str())
        .bind(key.id)
        .bind(&row.model)
        .bind(row.remaining)
        .bind(row.reset_time)
        .bind(row.available)
        .bind(now)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}

async fn shared_enabled_count(
    pool_or_tx: &mut sqlx::SqliteConnection,
    user_id: &str,
    provider: Provider,
) -> Result<i64, HubError> {
    let table = account_table(provider);
    let sql = format!("SELECT COUNT(*) FROM {table} WHERE user_id = ? AND shared = 1 AND status = 1");
    let n: i64 = sqlx::query_scalar(&sql)
        .bind(user_id)
        .fetch_one(pool_or_tx)
        .await?;
    Ok(n)
}

async fn record_consumption(
    pool: &SqlitePool,
    record: ConsumptionRecord,
) -> Result<f64, HubError> {
    // A mid-request quota reset can make `after > before`; the log never
    // goes negative.
    let consumed = (record.quota_before - record.quota_after).max(0.0);
    let now = Utc::now();

    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
    INSERT INTO consumption_log (
        user_id, provider, account_id, model,
        quota_before, quota_after, consumed, shared, created_at
    )
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
    "#,
    )
    .bind(&record.user_id)
    .bind(record.key.provider.as_str())
    .bind(record.key.id)
    .bind(&record.model)
    .bind(record.quota_before)
    .bind(record.quota_after)
    .bind(consumed)
    .bind(record.shared)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    if record.shared {
        let n = shared_enabled_count(&mut *tx, &record.user_id, record.key.provider).await?;

        let max_quota = SHARED_POOL_MULTIPLIER * n as f64;

        sqlx::query(
            r#"
        INSERT INTO user_shared_pool (user_id, provider, model_group, quota, max_quota)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(user_id, provider, model_group) DO NOTHING
        "#,
        )
        .bind(&record.user_id)
        .bind(record.key.provider.as_str())
        .bind(&record.model_group)
        .bind(max_quota)
        .bind(max_quota)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
        UPDATE user_shared_pool SET quota = MAX(0.0, quota - ?)
        WHERE user_id = ? AND provider = ? AND model_group = ?
        "#,
        )
        .bind(consumed)
        .bind(&record.user_id)
        .bind(record.key.provider.as_str())
        .bind(&record.model_group)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(consumed)
}

async fn get_shared_pool(
    pool: &SqlitePool,
    user_id: &str,
    provider: Provider,
    model_group: &str,
) -> Result<Option<SharedPool>, HubError> {
    let row: Option<(f64, f64)> = sqlx::query_as(
        "SELECT quota, max_quota FROM user_shared_pool \
         WHERE user_id = ? AND provider = ? AND model_group = ?",
    )
    .bind(user_id)
    .bind(provider.as_str())
    .bind(model_group)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|(quota, max_quota)| SharedPool { quota, max_quota }))
}

async fn recompute_shared_pools(
    pool: &SqlitePool,
    user_id: &str,
    provider: Provider,
) -> Result<(), HubError> {
    let mut tx = pool.begin().await?;
    let n = shared_enabled_count(&mut *tx, user_id, provider).await?;
    let max_quota = SHARED_POOL_MULTIPLIER * n as f64;

    sqlx::query(
        r#"
    UPDATE user_shared_pool SET max_quota = ?, quota = MIN(quota, ?)
    WHERE user_id = ? AND provider = ?
    "#,
    )
    .bind(max_quota)
    .bind(max_quota)
    .bind(user_id)
    .bind(provider.as_str())
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;
    Ok(())
}

/// Spawn the database actor and return a cloneable handle.
pub async fn spawn(database_url: &str) -> DbHandle {
    let (actor, _jh) = ractor::Actor::spawn(
        Some("DbActor".to_string()),
        DbActor,
        database_url.to_string(),
    )
    .await
    .expect("failed to spawn DbActor");

    DbHandle { actor }
}

async fn apply_schema(pool: &SqlitePool) -> Result<(), HubError> {
    for stmt in SQLITE_INIT.split(';') {
        let s = stmt.trim();
        if s.is_empty() {
            continue;
        }
        sqlx::query(s).execute(pool).await?;
    }
    ensure_kiro_region_column(pool).await?;
    Ok(())
}

/// Older databases predate the `region` column on `kiro_accounts`.
async fn ensure_kiro_region_column(pool: &SqlitePool) -> Result<(), HubError> {
    let cols: Vec<(i64, String)> =
        sqlx::query_as("SELECT cid, name FROM pragma_table_info('kiro_accounts')")
            .fetch_all(pool)
            .await?;

    if !cols.iter().any(|(_, name)| name == "region") {
        info!("migrating: adding kiro_accounts.region");
        sqlx::query(KIRO_REGION_MIGRATION).execute(pool).await?;
    }
    Ok(())
}
