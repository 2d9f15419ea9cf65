use antihub::db::{AccountCreate, AntigravityCreate, ProjectPatch, QwenCreate, TokenPatch, UserCreate};
use antihub::store::{AccountKey, Provider, SharingPreference};
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

fn antigravity_create(user_id: &str, shared: bool, email: Option<&str>) -> AccountCreate {
    AccountCreate::Antigravity(AntigravityCreate {
        user_id: user_id.to_string(),
        shared,
        email: email.map(str::to_string),
        refresh_token: "rt-1".to_string(),
        access_token: Some("at-1".to_string()),
        expiry: Utc::now() + Duration::hours(1),
        project_id: Some("proj-1".to_string()),
    })
}

#[tokio::test]
async fn account_lifecycle_baseline() {
    let tmp = temp_db("store_lifecycle");
    let db = antihub::db::spawn(&tmp.url).await;

    let empty = db
        .list_available(Provider::Antigravity, "u1", None)
        .await
        .unwrap();
    assert!(empty.is_empty());

    let id = db
        .create_account(antigravity_create("u1", false, Some("a@example.com")))
        .await
        .unwrap();
    assert!(id > 0);
    let key = AccountKey {
        provider: Provider::Antigravity,
        id,
    };

    let available = db
        .list_available(Provider::Antigravity, "u1", None)
        .await
        .unwrap();
    assert_eq!(available.len(), 1);
    assert_eq!(available[0].id, id);
    assert_eq!(available[0].project_id(), Some("proj-1"));
    assert!(!available[0].shared);

    // Dedicated accounts are invisible to other users.
    let other_user = db
        .list_available(Provider::Antigravity, "u2", None)
        .await
        .unwrap();
    assert!(other_user.is_empty());

    // Token update rotates the refresh token only when one is supplied.
    let new_expiry = Utc::now() + Duration::hours(2);
    db.update_token(
        key,
        TokenPatch {
            access_token: "at-2".to_string(),
            expiry: new_expiry,
            refresh_token: None,
            resource_url: None,
            profile_arn: None,
        },
    )
    .await
    .unwrap();
    let account = db.get_account(key).await.unwrap();
    assert_eq!(account.access_token.as_deref(), Some("at-2"));
    assert_eq!(account.refresh_token, "rt-1");
    assert_eq!(account.expiry.timestamp(), new_expiry.timestamp());

    // needs_reauth removes the account from availability and a token
    // update restores it.
    db.mark_needs_reauth(key).await.unwrap();
    assert!(
        db.list_available(Provider::Antigravity, "u1", None)
            .await
            .unwrap()
            .is_empty()
    );
    db.update_token(
        key,
        TokenPatch {
            access_token: "at-3".to_string(),
            expiry: new_expiry,
            refresh_token: Some("rt-2".to_string()),
            resource_url: None,
            profile_arn: None,
        },
    )
    .await
    .unwrap();
    let restored = db
        .list_available(Provider::Antigravity, "u1", None)
        .await
        .unwrap();
    assert_eq!(restored.len(), 1);
    assert_eq!(restored[0].refresh_token, "rt-2");

    // Disable removes it for good until re-enabled.
    db.set_status(key, false).await.unwrap();
    assert!(
        db.list_available(Provider::Antigravity, "u1", None)
            .await
            .unwrap()
            .is_empty()
    );

    cleanup(tmp).await;
}

#[tokio::test]
async fn shared_accounts_visible_to_all_users() {
    let tmp = temp_db("store_shared");
    let db = antihub::db::spawn(&tmp.url).await;

    db.create_account(antigravity_create("owner", true, None))
        .await
        .unwrap();

    let for_other = db
        .list_available(Provider::Antigravity, "someone-else", None)
        .await
        .unwrap();
    assert_eq!(for_other.len(), 1);
    assert!(for_other[0].shared);

    let shared_only = db
        .list_available(Provider::Antigravity, "someone-else", Some(true))
        .await
        .unwrap();
    assert_eq!(shared_only.len(), 1);

    let dedicated_only = db
        .list_available(Provider::Antigravity, "someone-else", Some(false))
        .await
        .unwrap();
    assert!(dedicated_only.is_empty());

    cleanup(tmp).await;
}

#[tokio::test]
async fn duplicate_email_rejected_per_provider() {
    let tmp = temp_db("store_email");
    let db = antihub::db::spawn(&tmp.url).await;

    db.create_account(antigravity_create("u1", false, Some("dup@example.com")))
        .await
        .unwrap();
    let second = db
        .create_account(antigravity_create("u2", false, Some("dup@example.com")))
        .await;
    assert!(second.is_err(), "duplicate email must fail onboarding");

    cleanup(tmp).await;
}

#[tokio::test]
async fn project_patch_and_qwen_resource_url_updates() {
    let tmp = temp_db("store_patches");
    let db = antihub::db::spawn(&tmp.url).await;

    let ag_id = db
        .create_account(antigravity_create("u1", false, None))
        .await
        .unwrap();
    db.update_project(
        ag_id,
        ProjectPatch {
            project_id: Some("proj-minted".to_string()),
            is_restricted: false,
            ineligible: false,
            paid_tier: true,
        },
    )
    .await
    .unwrap();
    let account = db
        .get_account(AccountKey {
            provider: Provider::Antigravity,
            id: ag_id,
        })
        .await
        .unwrap();
    assert_eq!(account.project_id(), Some("proj-minted"));

    let qwen_id = db
        .create_account(AccountCreate::Qwen(QwenCreate {
            user_id: "u1".to_string(),
            shared: false,
            email: None,
            refresh_token: "qrt".to_string(),
            access_token: Some("qat".to_string()),
            expiry: Utc::now() + Duration::hours(1),
            resource_url: None,
        }))
        .await
        .unwrap();
    let qwen_key = AccountKey {
        provider: Provider::Qwen,
        id: qwen_id,
    };
    db.update_token(
        qwen_key,
        TokenPatch {
            access_token: "qat-2".to_string(),
            expiry: Utc::now() + Duration::hours(1),
            refresh_token: Some("qrt-2".to_string()),
            resource_url: Some("tenant-3.qwen.ai".to_string()),
            profile_arn: None,
        },
    )
    .await
    .unwrap();
    let qwen_account = db.get_account(qwen_key).await.unwrap();
    match &qwen_account.detail {
        antihub::store::ProviderDetail::Qwen { resource_url } => {
            assert_eq!(resource_url.as_deref(), Some("tenant-3.qwen.ai"));
        }
        other => panic!("unexpected detail: {other:?}"),
    }

    cleanup(tmp).await;
}

#[tokio::test]
async fn users_resolve_by_api_key() {
    let tmp = temp_db("store_users");
    let db = antihub::db::spawn(&tmp.url).await;

    db.create_user(UserCreate {
        id: "u1".to_string(),
        api_key: "sk-test-123".to_string(),
        sharing: SharingPreference::PreferShared,
    })
    .await
    .unwrap();

    let user = db.get_user_by_key("sk-test-123").await.unwrap().unwrap();
    assert_eq!(user.id, "u1");
    assert_eq!(user.sharing, SharingPreference::PreferShared);

    assert!(db.get_user_by_key("sk-wrong").await.unwrap().is_none());

    cleanup(tmp).await;
}
