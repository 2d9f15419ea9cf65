use antihub::db::ProjectPatch;
use antihub::dispatch::{
    AccountDirectory, DispatchEngine, DispatchRequest, DispatchSummary, QuotaView, RequestPayload,
    StreamEvent, StreamSummary, Transport, UpstreamBody, UpstreamResponse,
};
use antihub::error::{DispatchError, Error403Class, HubError};
use antihub::ledger::CompletedRequest;
use antihub::store::{Account, AccountKey, Provider, ProviderDetail, SharingPreference, User};
use antihub::token::{RefreshError, TokenSource};
use antihub_schema::gemini::GenerateContentRequest;
use async_trait::async_trait;
use axum::http::StatusCode;
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

#[derive(Default)]
struct FakeDirectory {
    accounts: Mutex<BTreeMap<i64, Account>>,
}

impl FakeDirectory {
    fn insert(&self, account: Account) {
        self.accounts
            .lock()
            .unwrap()
            .insert(account.id, account);
    }

    fn enabled(&self, id: i64) -> bool {
        self.accounts.lock().unwrap()[&id].status
    }

    fn project_of(&self, id: i64) -> Option<String> {
        self.accounts.lock().unwrap()[&id]
            .project_id()
            .map(str::to_string)
    }
}

#[async_trait]
impl AccountDirectory for FakeDirectory {
    async fn available(
        &self,
        _provider: Provider,
        user_id: &str,
        shared: Option<bool>,
    ) -> Result<Vec<Account>, HubError> {
        Ok(self
            .accounts
            .lock()
            .unwrap()
            .values()
            .filter(|a| a.status && !a.needs_reauth)
            .filter(|a| match shared {
                Some(true) => a.shared,
                Some(false) => !a.shared && a.user_id == user_id,
                None => a.shared || a.user_id == user_id,
            })
            .cloned()
            .collect())
    }

    async fn reload(&self, key: AccountKey) -> Result<Account, HubError> {
        self.accounts
            .lock()
            .unwrap()
            .get(&key.id)
            .cloned()
            .ok_or_else(|| HubError::Unexpected("unknown account".to_string()))
    }

    async fn disable(&self, key: AccountKey) -> Result<(), HubError> {
        if let Some(account) = self.accounts.lock().unwrap().get_mut(&key.id) {
            account.status = false;
        }
        Ok(())
    }

    async fn save_project(&self, account_id: i64, patch: ProjectPatch) -> Result<(), HubError> {
        if let Some(account) = self.accounts.lock().unwrap().get_mut(&account_id) {
            if let ProviderDetail::Antigravity { project_id, .. } = &mut account.detail {
                project_id.clone_from(&patch.project_id);
            }
        }
        Ok(())
    }
}

#[derive(Clone, Copy)]
enum TokenBehavior {
    Fresh,
    InvalidGrant,
    Transient,
}

struct FakeTokens {
    directory: Arc<FakeDirectory>,
    behaviors: Mutex<HashMap<i64, TokenBehavior>>,
}

impl FakeTokens {
    fn new(directory: Arc<FakeDirectory>) -> Self {
        Self {
            directory,
            behaviors: Mutex::new(HashMap::new()),
        }
    }

    fn set(&self, id: i64, behavior: TokenBehavior) {
        self.behaviors.lock().unwrap().insert(id, behavior);
    }
}

#[async_trait]
impl TokenSource for FakeTokens {
    async fn ensure_fresh(&self, key: AccountKey, _force: bool) -> Result<Account, RefreshError> {
        let behavior = self
            .behaviors
            .lock()
            .unwrap()
            .get(&key.id)
            .copied()
            .unwrap_or(TokenBehavior::Fresh);

        match behavior {
            TokenBehavior::Fresh => {
                self.directory
                    .reload(key)
                    .await
                    .map_err(|e| RefreshError::Transient {
                        reason: e.to_string(),
                    })
            }
            TokenBehavior::InvalidGrant => {
                // The real token manager disables before returning.
                let _ = self.directory.disable(key).await;
                Err(RefreshError::InvalidGrant)
            }
            TokenBehavior::Transient => Err(RefreshError::Transient {
                reason: "refresh endpoint unreachable".to_string(),
            }),
        }
    }
}

#[derive(Default)]
struct FakeQuotas {
    completions: Mutex<Vec<CompletedRequest>>,
    quota_before: Mutex<Option<f64>>,
}

#[async_trait]
impl QuotaView for FakeQuotas {
    async fn is_available(
        &self,
        _user_id: &str,
        _account: &Account,
        _model: &str,
    ) -> Result<bool, HubError> {
        Ok(true)
    }

    async fn quota_before(&self, _account: &Account, _model: &str) -> Option<f64> {
        *self.quota_before.lock().unwrap()
    }

    fn on_completed(&self, done: CompletedRequest) {
        self.completions.lock().unwrap().push(done);
    }
}

enum Scripted {
    Ok(&'static str),
    Fail(StatusCode, &'static str),
}

struct ScriptedTransport {
    endpoints: usize,
    outcomes: Mutex<VecDeque<Scripted>>,
    calls: Mutex<Vec<(i64, usize)>>,
    minted_project: Option<&'static str>,
    mint_calls: Mutex<usize>,
}

impl ScriptedTransport {
    fn new(endpoints: usize, outcomes: Vec<Scripted>) -> Self {
        Self {
            endpoints,
            outcomes: Mutex::new(outcomes.into()),
            calls: Mutex::new(Vec::new()),
            minted_project: None,
            mint_calls: Mutex::new(0),
        }
    }

    fn with_mint(mut self, project_id: &'static str) -> Self {
        self.minted_project = Some(project_id);
        self
    }

    fn calls(&self) -> Vec<(i64, usize)> {
        self.calls.lock().unwrap().clone()
    }

    fn mint_calls(&self) -> usize {
        *self.mint_calls.lock().unwrap()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    fn provider(&self) -> Provider {
        Provider::Antigravity
    }

    fn endpoint_count(&self) -> usize {
        self.endpoints
    }

    async fn send(
        &self,
        account: &Account,
        endpoint_index: usize,
        _request: &DispatchRequest,
    ) -> Result<UpstreamResponse, HubError> {
        self.calls
            .lock()
            .unwrap()
            .push((account.id, endpoint_index));

        match self
            .outcomes
            .lock()
            .unwrap()
            .pop_front()
            .expect("transport script ran dry")
        {
            Scripted::Ok(text) => Ok(UpstreamResponse::Open(UpstreamBody::from_chunks(vec![
                Bytes::from(text),
            ]))),
            Scripted::Fail(status, body) => Ok(UpstreamResponse::Failed {
                status,
                body: body.to_string(),
            }),
        }
    }

    async fn pump(
        &self,
        mut body: UpstreamBody,
        _request: &DispatchRequest,
        events: &mpsc::Sender<StreamEvent>,
    ) -> Result<StreamSummary, HubError> {
        while let Some(chunk) = body.next_chunk().await {
            let chunk = chunk?;
            let _ = events
                .send(StreamEvent::Text {
                    text: String::from_utf8_lossy(&chunk).into_owned(),
                })
                .await;
        }
        let _ = events
            .send(StreamEvent::Finished {
                reason: Some("STOP".to_string()),
            })
            .await;
        Ok(StreamSummary {
            finish_reason: Some("STOP".to_string()),
            usage_credits: None,
        })
    }

    async fn mint_project(&self, _account: &Account) -> Result<Option<ProjectPatch>, HubError> {
        *self.mint_calls.lock().unwrap() += 1;
        Ok(self.minted_project.map(|project_id| ProjectPatch {
            project_id: Some(project_id.to_string()),
            is_restricted: false,
            ineligible: false,
            paid_tier: false,
        }))
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    directory: Arc<FakeDirectory>,
    tokens: Arc<FakeTokens>,
    quotas: Arc<FakeQuotas>,
    engine: DispatchEngine,
}

fn harness() -> Harness {
    let directory = Arc::new(FakeDirectory::default());
    let tokens = Arc::new(FakeTokens::new(directory.clone()));
    let quotas = Arc::new(FakeQuotas::default());
    let engine = DispatchEngine::new(directory.clone(), tokens.clone(), quotas.clone());
    Harness {
        directory,
        tokens,
        quotas,
        engine,
    }
}

fn account(id: i64, user_id: &str, shared: bool, project: Option<&str>) -> Account {
    Account {
        id,
        user_id: user_id.to_string(),
        shared,
        email: None,
        refresh_token: format!("rt-{id}"),
        access_token: Some(format!("at-{id}")),
        expiry: chrono::Utc::now() + chrono::Duration::hours(1),
        status: true,
        needs_reauth: false,
        detail: ProviderDetail::Antigravity {
            project_id: project.map(str::to_string),
            is_restricted: false,
            ineligible: false,
            paid_tier: false,
        },
    }
}

fn request(user_id: &str) -> DispatchRequest {
    DispatchRequest {
        user: User {
            id: user_id.to_string(),
            sharing: SharingPreference::PreferDedicated,
            status: true,
        },
        model: "gemini-2.5-pro".to_string(),
        stream: true,
        payload: RequestPayload::Gemini(GenerateContentRequest::default()),
    }
}

async fn run(
    harness: &Harness,
    transport: &ScriptedTransport,
    request: &DispatchRequest,
) -> (Result<DispatchSummary, DispatchError>, Vec<StreamEvent>) {
    let (tx, mut rx) = mpsc::channel::<StreamEvent>(64);
    let result = harness.engine.execute(transport, request, &tx).await;
    drop(tx);

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    (result, events)
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn happy_path_dedicated_account_records_one_consumption() {
    let h = harness();
    h.directory.insert(account(1, "u1", false, Some("proj")));
    *h.quotas.quota_before.lock().unwrap() = Some(0.8);

    let transport = ScriptedTransport::new(2, vec![Scripted::Ok("hello")]);
    let (result, events) = run(&h, &transport, &request("u1")).await;

    let summary = result.expect("dispatch must succeed");
    assert_eq!(summary.account.id, 1);
    assert_eq!(summary.finish_reason.as_deref(), Some("STOP"));
    assert_eq!(summary.quota_swaps, 0);

    assert_eq!(
        events,
        vec![
            StreamEvent::Text {
                text: "hello".to_string()
            },
            StreamEvent::Finished {
                reason: Some("STOP".to_string())
            },
        ]
    );

    let completions = h.quotas.completions.lock().unwrap();
    assert_eq!(completions.len(), 1, "exactly one consumption per success");
    assert_eq!(completions[0].user_id, "u1");
    assert_eq!(completions[0].account.id, 1);
    assert_eq!(completions[0].quota_before, Some(0.8));
    assert!(!completions[0].account.shared);
}

#[tokio::test]
async fn rate_limit_walks_endpoints_then_swaps_accounts() {
    let h = harness();
    h.directory.insert(account(1, "u1", false, Some("p1")));
    h.directory.insert(account(2, "u1", false, Some("p2")));
    h.directory.insert(account(3, "u1", false, Some("p3")));

    // First account: 429 on E0 then E1; replacement account succeeds on E0.
    let transport = ScriptedTransport::new(
        2,
        vec![
            Scripted::Fail(StatusCode::TOO_MANY_REQUESTS, "rate limited"),
            Scripted::Fail(StatusCode::TOO_MANY_REQUESTS, "rate limited"),
            Scripted::Ok("from the replacement"),
        ],
    );

    let (result, _events) = run(&h, &transport, &request("u1")).await;
    let summary = result.expect("dispatch must succeed after the swap");

    let calls = transport.calls();
    assert_eq!(calls.len(), 3);
    let first_account = calls[0].0;
    assert_eq!(calls[0].1, 0);
    assert_eq!(calls[1], (first_account, 1), "same account, next endpoint");
    assert_ne!(calls[2].0, first_account, "429 exhaustion swaps the account");
    assert_eq!(calls[2].1, 0, "endpoint walk restarts for the new account");

    assert_eq!(summary.quota_swaps, 1);
    assert_eq!(summary.account.id, calls[2].0);
    // The rate-limited account is excluded, not disabled.
    assert!(h.directory.enabled(first_account));
}

#[tokio::test]
async fn invalid_grant_disables_and_falls_through_to_next_account() {
    let h = harness();
    // The doomed account is the only dedicated one; the user prefers
    // dedicated, so it is deterministically tried first and the shared
    // account is the fallback.
    h.directory.insert(account(1, "u1", false, Some("p1")));
    h.directory.insert(account(2, "u1", true, Some("p2")));
    h.tokens.set(1, TokenBehavior::InvalidGrant);
    h.tokens.set(2, TokenBehavior::Fresh);

    let transport = ScriptedTransport::new(2, vec![Scripted::Ok("ok")]);
    let (result, events) = run(&h, &transport, &request("u1")).await;

    let summary = result.expect("caller sees no error");
    assert_eq!(summary.account.id, 2);
    assert!(!h.directory.enabled(1), "invalid_grant account is disabled");
    assert!(
        !events
            .iter()
            .any(|e| matches!(e, StreamEvent::Error { .. })),
        "no error event on a recovered request"
    );
}

#[tokio::test]
async fn transient_refresh_failure_skips_without_disabling() {
    let h = harness();
    h.directory.insert(account(1, "u1", false, Some("p1")));
    h.directory.insert(account(2, "u1", true, Some("p2")));
    h.tokens.set(1, TokenBehavior::Transient);

    let transport = ScriptedTransport::new(2, vec![Scripted::Ok("ok")]);
    let (result, _events) = run(&h, &transport, &request("u1")).await;

    assert_eq!(result.unwrap().account.id, 2);
    assert!(
        h.directory.enabled(1),
        "transient refresh failure must not disable"
    );
}

#[tokio::test]
async fn all_endpoints_permission_denied_keeps_account() {
    let h = harness();
    h.directory.insert(account(1, "u1", false, Some("p1")));

    const BODY: &str =
        r#"{"error":{"code":403,"message":"The caller does not have permission","status":"PERMISSION_DENIED"}}"#;
    let transport = ScriptedTransport::new(
        3,
        vec![
            Scripted::Fail(StatusCode::FORBIDDEN, BODY),
            Scripted::Fail(StatusCode::FORBIDDEN, BODY),
            Scripted::Fail(StatusCode::FORBIDDEN, BODY),
        ],
    );

    let (result, events) = run(&h, &transport, &request("u1")).await;
    match result {
        Err(DispatchError::AllEndpoints403 { class }) => {
            assert_eq!(class, Error403Class::PermissionDenied);
        }
        other => panic!("expected AllEndpoints403, got {other:?}"),
    }

    assert_eq!(transport.calls().len(), 3, "every endpoint was walked");
    assert!(
        h.directory.enabled(1),
        "permission-denied is sticky per account, do not disable"
    );
    assert!(matches!(
        events.last(),
        Some(StreamEvent::Error { kind, .. }) if kind == "all-endpoints-403"
    ));
}

#[tokio::test]
async fn all_endpoints_generic_403_disables_account() {
    let h = harness();
    h.directory.insert(account(1, "u1", false, Some("p1")));

    let transport = ScriptedTransport::new(
        3,
        vec![
            Scripted::Fail(StatusCode::FORBIDDEN, "WAF says no"),
            Scripted::Fail(StatusCode::FORBIDDEN, "WAF says no"),
            Scripted::Fail(StatusCode::FORBIDDEN, "WAF says no"),
        ],
    );

    let (result, _events) = run(&h, &transport, &request("u1")).await;
    assert!(matches!(
        result,
        Err(DispatchError::AllEndpoints403 {
            class: Error403Class::Generic
        })
    ));
    assert!(!h.directory.enabled(1), "generic 403 exhaustion disables");
}

#[tokio::test]
async fn stale_project_id_reminted_once_then_success() {
    let h = harness();
    h.directory.insert(account(1, "u1", false, Some("proj-stale")));

    let transport = ScriptedTransport::new(
        2,
        vec![
            Scripted::Fail(
                StatusCode::BAD_REQUEST,
                r#"{"error":{"code":400,"status":"RESOURCE_PROJECT_INVALID"}}"#,
            ),
            Scripted::Ok("recovered"),
        ],
    )
    .with_mint("proj-fresh");

    let (result, _events) = run(&h, &transport, &request("u1")).await;
    let summary = result.expect("request recovers after the re-mint");

    assert_eq!(summary.project_retries, 1);
    assert_eq!(transport.mint_calls(), 1, "re-mint runs at most once");
    assert_eq!(h.directory.project_of(1).as_deref(), Some("proj-fresh"));
    assert_eq!(transport.calls(), vec![(1, 0), (1, 0)], "same endpoint retried");

    let completions = h.quotas.completions.lock().unwrap();
    assert_eq!(completions.len(), 1);
}

#[tokio::test]
async fn quota_400_swaps_account_without_disabling() {
    let h = harness();
    h.directory.insert(account(1, "u1", false, Some("p1")));
    h.directory.insert(account(2, "u1", false, Some("p2")));

    let transport = ScriptedTransport::new(
        2,
        vec![
            Scripted::Fail(
                StatusCode::BAD_REQUEST,
                r#"{"error":{"code":400,"message":"quota exhausted","status":"RESOURCE_EXHAUSTED"}}"#,
            ),
            Scripted::Ok("ok"),
        ],
    );

    let (result, _events) = run(&h, &transport, &request("u1")).await;
    let summary = result.unwrap();

    let calls = transport.calls();
    assert_eq!(calls.len(), 2);
    assert_ne!(calls[0].0, calls[1].0);
    assert!(h.directory.enabled(calls[0].0), "quota-400 excludes, not disables");
    assert_eq!(summary.account.id, calls[1].0);
}

#[tokio::test]
async fn invalid_argument_is_terminal_and_account_safe() {
    let h = harness();
    h.directory.insert(account(1, "u1", false, Some("p1")));

    const BODY: &str = r#"{"error":{"code":400,"message":"bad schema","status":"INVALID_ARGUMENT"}}"#;
    let transport =
        ScriptedTransport::new(2, vec![Scripted::Fail(StatusCode::BAD_REQUEST, BODY)]);

    let (result, events) = run(&h, &transport, &request("u1")).await;
    match result {
        Err(DispatchError::InvalidArgument { body }) => assert!(body.contains("bad schema")),
        other => panic!("expected InvalidArgument, got {other:?}"),
    }
    assert_eq!(transport.calls().len(), 1, "no retry on request-fatal errors");
    assert!(h.directory.enabled(1));
    assert!(matches!(
        events.last(),
        Some(StreamEvent::Error { kind, .. }) if kind == "invalid-argument"
    ));
}

#[tokio::test]
async fn unknown_400_disables_account_and_surfaces_body() {
    let h = harness();
    h.directory.insert(account(1, "u1", false, Some("p1")));

    let transport = ScriptedTransport::new(
        2,
        vec![Scripted::Fail(StatusCode::BAD_REQUEST, "mystery failure")],
    );

    let (result, _events) = run(&h, &transport, &request("u1")).await;
    match result {
        Err(DispatchError::AccountFatal { status, body }) => {
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert!(body.contains("mystery failure"));
        }
        other => panic!("expected AccountFatal, got {other:?}"),
    }
    assert!(!h.directory.enabled(1));
}

#[tokio::test]
async fn illegal_prompt_500_stops_without_touching_account() {
    let h = harness();
    h.directory.insert(account(1, "u1", false, Some("p1")));

    let transport = ScriptedTransport::new(
        2,
        vec![Scripted::Fail(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal error encountered.",
        )],
    );

    let (result, events) = run(&h, &transport, &request("u1")).await;
    assert!(matches!(result, Err(DispatchError::IllegalPrompt)));
    assert!(h.directory.enabled(1));
    assert!(matches!(
        events.last(),
        Some(StreamEvent::Error { kind, .. }) if kind == "illegal-prompt"
    ));
}

#[tokio::test]
async fn quota_swap_bound_caps_429_account_churn() {
    let h = harness();
    for id in 1..=8 {
        h.directory.insert(account(id, "u1", false, Some("p")));
    }

    // Single endpoint: every 429 burns one swap. The 6th swap crosses the
    // bound and surfaces out-of-capacity.
    let outcomes = (0..8)
        .map(|_| Scripted::Fail(StatusCode::TOO_MANY_REQUESTS, "rate limited"))
        .collect();
    let transport = ScriptedTransport::new(1, outcomes);

    let (result, _events) = run(&h, &transport, &request("u1")).await;
    assert!(matches!(result, Err(DispatchError::ResourceExhausted)));
    assert_eq!(
        transport.calls().len(),
        6,
        "five swaps allowed, sixth 429 terminates"
    );
}

#[tokio::test]
async fn no_candidates_surfaces_resource_exhausted() {
    let h = harness();

    let transport = ScriptedTransport::new(2, vec![]);
    let (result, events) = run(&h, &transport, &request("u1")).await;

    assert!(matches!(result, Err(DispatchError::ResourceExhausted)));
    assert!(matches!(
        events.last(),
        Some(StreamEvent::Error { kind, .. }) if kind == "resource-exhausted"
    ));
}

#[tokio::test]
async fn missing_project_id_minted_before_first_send() {
    let h = harness();
    h.directory.insert(account(1, "u1", false, None));

    let transport =
        ScriptedTransport::new(2, vec![Scripted::Ok("ok")]).with_mint("proj-new");

    let (result, _events) = run(&h, &transport, &request("u1")).await;
    let summary = result.unwrap();

    assert_eq!(transport.mint_calls(), 1);
    assert_eq!(h.directory.project_of(1).as_deref(), Some("proj-new"));
    // Precondition minting does not count against the per-request re-mint
    // allowance.
    assert_eq!(summary.project_retries, 0);
}
