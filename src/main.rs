use mimalloc::MiMalloc;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::{net::TcpListener, signal, sync::Notify};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use antihub::dispatch::DispatchEngine;
use antihub::ledger::QuotaLedger;
use antihub::providers::Providers;
use antihub::store::AccountStore;
use antihub::token::TokenManager;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // The server binary requires a real config file with a non-empty
    // admin_key; library consumers load best-effort defaults instead.
    let cfg = antihub::config::Config::from_toml();

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cfg.basic.loglevel.clone()));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_level(true)
                .with_target(false),
        )
        .init();

    let db = antihub::db::spawn(cfg.basic.database_url.as_str()).await;
    let store = AccountStore::new(db.clone());
    let providers = Providers::build(&cfg);

    let antigravity_cfg = providers.antigravity_cfg.clone();
    let kiro_cfg = providers.kiro_cfg.clone();
    let qwen_cfg = providers.qwen_cfg.clone();

    let refresher = antihub::ledger::spawn_pipeline(
        db.clone(),
        providers.models_fetchers(),
        antigravity_cfg.quota_refresh_tps,
    );
    let ledger = QuotaLedger::new(db, refresher, providers.models_fetchers());

    let tokens = Arc::new(TokenManager::new(
        store.clone(),
        antihub::providers::build_client("antihub-oauth/0.3", None, false),
        antigravity_cfg,
        kiro_cfg,
        qwen_cfg,
    ));

    let engine = DispatchEngine::new(
        Arc::new(store.clone()),
        tokens,
        Arc::new(ledger.clone()),
    );

    let admin_key: Arc<str> = Arc::from(cfg.basic.admin_key.clone());
    let state = antihub::server::router::HubState::new(engine, providers, store, ledger, admin_key);
    let app = antihub::server::router::hub_router(state);

    let addr = SocketAddr::from((cfg.basic.listen_addr, cfg.basic.listen_port));
    let listener = TcpListener::bind(addr).await?;
    info!("HTTP server listening on {}", addr);

    // Drain in-flight requests after a signal, bounded by the configured
    // grace period.
    let drain_deadline = Duration::from_secs(cfg.basic.shutdown_grace_secs);
    let signalled = Arc::new(Notify::new());
    let serve = axum::serve(listener, app).with_graceful_shutdown({
        let signalled = signalled.clone();
        async move {
            shutdown_signal().await;
            signalled.notify_one();
        }
    });

    tokio::select! {
        res = serve => res?,
        () = async {
            signalled.notified().await;
            tokio::time::sleep(drain_deadline).await;
        } => {
            warn!("drain deadline exceeded after {:?}; exiting", drain_deadline);
        }
    }

    info!("Server has shut down gracefully.");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
