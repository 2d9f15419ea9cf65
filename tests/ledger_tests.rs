use antihub::db::{
    AccountCreate, AntigravityCreate, ConsumptionRecord, DbHandle, QuotaUpsert,
    SHARED_POOL_MULTIPLIER,
};
use antihub::ledger::quota_group;
use antihub::store::{AccountKey, Provider};
use chrono::{Duration, Utc};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::SystemTime;
use tokio::fs;

struct TempDb {
    url: String,
    path: std::path::PathBuf,
}

fn temp_db(tag: &str) -> TempDb {
    let tmp_dir = std::env::temp_dir();
    let mut hasher = DefaultHasher::new();
    SystemTime::now().hash(&mut hasher);
    tag.hash(&mut hasher);
    let path = tmp_dir.join(format!("test_{tag}_{}.sqlite", hasher.finish()));
    TempDb {
        url: format!("sqlite:{}", path.to_str().unwrap()),
        path,
    }
}

async fn cleanup(db: TempDb) {
    let wal = std::path::PathBuf::from(format!("{}-wal", db.path.to_string_lossy()));
    let shm = std::path::PathBuf::from(format!("{}-shm", db.path.to_string_lossy()));
    let _ = fs::remove_file(&wal).await;
    let _ = fs::remove_file(&shm).await;
    let _ = fs::remove_file(&db.path).await;
}

async fn seed_account(db: &DbHandle, user_id: &str, shared: bool) -> AccountKey {
    let id = db
        .create_account(AccountCreate::Antigravity(AntigravityCreate {
            user_id: user_id.to_string(),
            shared,
            email: None,
            refresh_token: "rt".to_string(),
            access_token: Some("at".to_string()),
            expiry: Utc::now() + Duration::hours(1),
            project_id: Some("proj".to_string()),
        }))
        .await
        .unwrap();
    AccountKey {
        provider: Provider::Antigravity,
        id,
    }
}

fn record(
    user: &str,
    key: AccountKey,
    model: &str,
    before: f64,
    after: f64,
    shared: bool,
) -> ConsumptionRecord {
    ConsumptionRecord {
        user_id: user.to_string(),
        key,
        model: model.to_string(),
        model_group: quota_group(model).to_string(),
        quota_before: before,
        quota_after: after,
        shared,
    }
}

#[tokio::test]
async fn quota_rows_upsert_and_read_back() {
    let tmp = temp_db("ledger_quota");
    let db = antihub::db::spawn(&tmp.url).await;
    let key = seed_account(&db, "u1", false).await;

    assert!(db.get_quota(key, "gemini-2.5-pro").await.unwrap().is_none());

    db.upsert_quotas(
        key,
        vec![
            QuotaUpsert {
                model: "gemini-2.5-pro".to_string(),
                remaining: 0.8,
                available: true,
                reset_time: None,
            },
            QuotaUpsert {
                model: "gemini-3-flash".to_string(),
                remaining: 1.0,
                available: true,
                reset_time: Some(Utc::now() + Duration::hours(4)),
            },
        ],
    )
    .await
    .unwrap();

    let snap = db
        .get_quota(key, "gemini-2.5-pro")
        .await
        .unwrap()
        .expect("row must exist");
    assert!((snap.remaining - 0.8).abs() < 1e-9);
    assert!(snap.available);

    // Second refresh overwrites in place.
    db.upsert_quotas(
        key,
        vec![QuotaUpsert {
            model: "gemini-2.5-pro".to_string(),
            remaining: 0.78,
            available: true,
            reset_time: None,
        }],
    )
    .await
    .unwrap();
    let snap = db.get_quota(key, "gemini-2.5-pro").await.unwrap().unwrap();
    assert!((snap.remaining - 0.78).abs() < 1e-9);

    cleanup(tmp).await;
}

#[tokio::test]
async fn dedicated_consumption_never_goes_negative() {
    let tmp = temp_db("ledger_dedicated");
    let db = antihub::db::spawn(&tmp.url).await;
    let key = seed_account(&db, "u1", false).await;

    let consumed = db
        .record_consumption(record("u1", key, "gemini-2.5-pro", 0.8, 0.78, false))
        .await
        .unwrap();
    assert!((consumed - 0.02).abs() < 1e-9);

    // A mid-request quota reset makes after > before; consumed clamps to 0.
    let consumed = db
        .record_consumption(record("u1", key, "gemini-2.5-pro", 0.1, 1.0, false))
        .await
        .unwrap();
    assert_eq!(consumed, 0.0);

    // Dedicated use never creates a pool row.
    assert!(
        db.get_shared_pool("u1", Provider::Antigravity, "gemini-2.5-pro")
            .await
            .unwrap()
            .is_none()
    );

    cleanup(tmp).await;
}

#[tokio::test]
async fn shared_consumption_charges_the_calling_users_pool() {
    let tmp = temp_db("ledger_shared");
    let db = antihub::db::spawn(&tmp.url).await;

    // Two shared accounts owned by the caller => max_quota = 2 * 2.
    let key_a = seed_account(&db, "caller", true).await;
    let _key_b = seed_account(&db, "caller", true).await;

    let consumed = db
        .record_consumption(record("caller", key_a, "gemini-2.5-pro", 0.9, 0.6, true))
        .await
        .unwrap();
    assert!((consumed - 0.3).abs() < 1e-9);

    let pool = db
        .get_shared_pool("caller", Provider::Antigravity, "gemini-2.5-pro")
        .await
        .unwrap()
        .expect("pool row created on first shared use");
    assert!((pool.max_quota - SHARED_POOL_MULTIPLIER * 2.0).abs() < 1e-9);
    assert!((pool.quota - (pool.max_quota - 0.3)).abs() < 1e-9);

    // Decrements clamp at zero, never below.
    db.record_consumption(record("caller", key_a, "gemini-2.5-pro", 100.0, 0.0, true))
        .await
        .unwrap();
    let pool = db
        .get_shared_pool("caller", Provider::Antigravity, "gemini-2.5-pro")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(pool.quota, 0.0);

    cleanup(tmp).await;
}

#[tokio::test]
async fn grouped_models_share_one_pool_counter() {
    let tmp = temp_db("ledger_groups");
    let db = antihub::db::spawn(&tmp.url).await;
    let key = seed_account(&db, "caller", true).await;

    db.record_consumption(record("caller", key, "gemini-3-pro-preview", 1.0, 0.9, true))
        .await
        .unwrap();
    db.record_consumption(record("caller", key, "gemini-3-pro-image", 0.9, 0.8, true))
        .await
        .unwrap();

    // Both models landed on the same group row.
    let pool = db
        .get_shared_pool("caller", Provider::Antigravity, "gemini-3-pro")
        .await
        .unwrap()
        .expect("group pool row");
    assert!((pool.max_quota - SHARED_POOL_MULTIPLIER).abs() < 1e-9);
    assert!((pool.quota - (pool.max_quota - 0.2)).abs() < 1e-9);

    assert!(
        db.get_shared_pool("caller", Provider::Antigravity, "gemini-3-pro-preview")
            .await
            .unwrap()
            .is_none()
    );

    cleanup(tmp).await;
}

#[tokio::test]
async fn pool_max_tracks_shared_enabled_account_count() {
    let tmp = temp_db("ledger_recompute");
    let db = antihub::db::spawn(&tmp.url).await;

    let key_a = seed_account(&db, "caller", true).await;
    let key_b = seed_account(&db, "caller", true).await;

    db.record_consumption(record("caller", key_a, "gemini-2.5-pro", 1.0, 0.9, true))
        .await
        .unwrap();
    let pool = db
        .get_shared_pool("caller", Provider::Antigravity, "gemini-2.5-pro")
        .await
        .unwrap()
        .unwrap();
    assert!((pool.max_quota - 4.0).abs() < 1e-9);

    // Disabling a shared account halves the ceiling; quota is clamped down.
    db.set_status(key_b, false).await.unwrap();
    let pool = db
        .get_shared_pool("caller", Provider::Antigravity, "gemini-2.5-pro")
        .await
        .unwrap()
        .unwrap();
    assert!((pool.max_quota - 2.0).abs() < 1e-9);
    assert!(pool.quota <= pool.max_quota);

    // Re-enabling restores it.
    db.set_status(key_b, true).await.unwrap();
    let pool = db
        .get_shared_pool("caller", Provider::Antigravity, "gemini-2.5-pro")
        .await
        .unwrap()
        .unwrap();
    assert!((pool.max_quota - 4.0).abs() < 1e-9);

    // Flipping an account to dedicated counts the same as losing it.
    db.set_shared(key_b, false).await.unwrap();
    let pool = db
        .get_shared_pool("caller", Provider::Antigravity, "gemini-2.5-pro")
        .await
        .unwrap()
        .unwrap();
    assert!((pool.max_quota - 2.0).abs() < 1e-9);

    cleanup(tmp).await;
}
