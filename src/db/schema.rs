//! SQL DDL for initializing the database schema.
//! SQLite-first design; can be adapted for other RDBMS.

/// Schema covers:
/// - `users` (caller identities, api key, sharing preference)
/// - one account table per provider (`antigravity_accounts`,
///   `kiro_accounts`, `qwen_accounts`)
/// - the ledger tables (`model_quota`, `consumption_log`,
///   `user_shared_pool`)
pub const SQLITE_INIT: &str = r#"
-- ---------------------------------------------------------------------------
-- Users
-- ---------------------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY NOT NULL,
    api_key TEXT NOT NULL,
    sharing TEXT NOT NULL DEFAULT 'prefer-dedicated',
    status INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL, -- RFC3339
    updated_at TEXT NOT NULL, -- RFC3339
    UNIQUE(api_key)
);

-- ---------------------------------------------------------------------------
-- Antigravity accounts
-- ---------------------------------------------------------------------------
CREATE TABLE IF NOT EXISTS antigravity_accounts (
    id INTEGER PRIMARY KEY NOT NULL,
    user_id TEXT NOT NULL,
    shared INTEGER NOT NULL DEFAULT 0,
    email TEXT NULL UNIQUE,
    refresh_token TEXT NOT NULL,
    access_token TEXT NULL,
    expiry TEXT NOT NULL, -- RFC3339
    status INTEGER NOT NULL DEFAULT 1,
    needs_reauth INTEGER NOT NULL DEFAULT 0,
    project_id TEXT NULL,
    is_restricted INTEGER NOT NULL DEFAULT 0,
    ineligible INTEGER NOT NULL DEFAULT 0,
    paid_tier INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL, -- RFC3339
    updated_at TEXT NOT NULL  -- RFC3339
);

CREATE INDEX IF NOT EXISTS idx_antigravity_accounts_status
    ON antigravity_accounts(status, needs_reauth);

-- ---------------------------------------------------------------------------
-- Kiro / CodeWhisperer accounts
-- ---------------------------------------------------------------------------
CREATE TABLE IF NOT EXISTS kiro_accounts (
    id INTEGER PRIMARY KEY NOT NULL,
    user_id TEXT NOT NULL,
    shared INTEGER NOT NULL DEFAULT 0,
    email TEXT NULL UNIQUE,
    auth_method TEXT NOT NULL, -- 'social' | 'idc'
    refresh_token TEXT NOT NULL,
    access_token TEXT NULL,
    expiry TEXT NOT NULL, -- RFC3339
    client_id TEXT NULL,
    client_secret TEXT NULL,
    profile_arn TEXT NULL,
    machine_id TEXT NOT NULL,
    region TEXT NULL,
    status INTEGER NOT NULL DEFAULT 1,
    needs_reauth INTEGER NOT NULL DEFAULT 0,
    subscription TEXT NULL,
    current_usage REAL NOT NULL DEFAULT 0,
    reset_date TEXT NULL,
    usage_limit REAL NOT NULL DEFAULT 0,
    free_trial_status TEXT NULL,
    free_trial_usage REAL NOT NULL DEFAULT 0,
    free_trial_expiry TEXT NULL,
    free_trial_limit REAL NOT NULL DEFAULT 0,
    bonus_usage REAL NOT NULL DEFAULT 0,
    bonus_limit REAL NOT NULL DEFAULT 0,
    bonus_available INTEGER NOT NULL DEFAULT 0,
    bonus_details TEXT NULL,
    created_at TEXT NOT NULL, -- RFC3339
    updated_at TEXT NOT NULL  -- RFC3339
);

CREATE INDEX IF NOT EXISTS idx_kiro_accounts_status
    ON kiro_accounts(status, needs_reauth);

-- ---------------------------------------------------------------------------
-- Qwen accounts
-- ---------------------------------------------------------------------------
CREATE TABLE IF NOT EXISTS qwen_accounts (
    id INTEGER PRIMARY KEY NOT NULL,
    user_id TEXT NOT NULL,
    shared INTEGER NOT NULL DEFAULT 0,
    email TEXT NULL UNIQUE,
    refresh_token TEXT NOT NULL,
    access_token TEXT NULL,
    expiry TEXT NOT NULL, -- RFC3339
    resource_url TEXT NULL,
    status INTEGER NOT NULL DEFAULT 1,
    needs_reauth INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL, -- RFC3339
    updated_at TEXT NOT NULL  -- RFC3339
);

CREATE INDEX IF NOT EXISTS idx_qwen_accounts_status
    ON qwen_accounts(status, needs_reauth);

-- ---------------------------------------------------------------------------
-- Quota ledger
-- ---------------------------------------------------------------------------
CREATE TABLE IF NOT EXISTS model_quota (
    provider TEXT NOT NULL,
    account_id INTEGER NOT NULL,
    model TEXT NOT NULL,
    remaining REAL NOT NULL,
    reset_time TEXT NULL, -- RFC3339
    available INTEGER NOT NULL DEFAULT 1,
    fetched_at TEXT NOT NULL, -- RFC3339
    PRIMARY KEY (provider, account_id, model)
);

CREATE TABLE IF NOT EXISTS consumption_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
    user_id TEXT NOT NULL,
    provider TEXT NOT NULL,
    account_id INTEGER NOT NULL,
    model TEXT NOT NULL,
    quota_before REAL NOT NULL,
    quota_after REAL NOT NULL,
    consumed REAL NOT NULL,
    shared INTEGER NOT NULL,
    created_at TEXT NOT NULL -- RFC3339
);

CREATE INDEX IF NOT EXISTS idx_consumption_log_user
    ON consumption_log(user_id, created_at);

CREATE TABLE IF NOT EXISTS user_shared_pool (
    user_id TEXT NOT NULL,
    provider TEXT NOT NULL,
    model_group TEXT NOT NULL,
    quota REAL NOT NULL,
    max_quota REAL NOT NULL,
    last_recovered_at TEXT NULL, -- RFC3339
    PRIMARY KEY (user_id, provider, model_group)
);
"#;

/// Forward migration: `region` was added to `kiro_accounts` after the first
/// release; databases created before it need the column grafted on.
pub const KIRO_REGION_MIGRATION: &str = "ALTER TABLE kiro_accounts ADD COLUMN region TEXT NULL";
