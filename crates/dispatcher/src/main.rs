//! ChatPush dispatcher binary entrypoint.
//!
//! Watches the `notifications` table and pushes each new record through FCM.

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use chatpush_common::config::{AppConfig, ExhaustionPolicy};
use chatpush_common::db;
use chatpush_common::redis_pool::create_redis_pool;
use chatpush_notifier::dead_letter::{DeadLetterSink, RedisDeadLetterQueue};
use chatpush_notifier::dispatcher::NotificationDispatcher;
use chatpush_notifier::fcm::FcmGateway;
use chatpush_notifier::store::PgRecordStore;

use chatpush_dispatcher::routes::create_router;
use chatpush_dispatcher::state::AppState;
use chatpush_dispatcher::watcher::RecordWatcher;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chatpush_dispatcher=info,chatpush_notifier=info".into()),
        )
        .json()
        .init();

    tracing::info!("ChatPush dispatcher starting...");

    let config = AppConfig::from_env()?;

    let pool = db::create_pool(&config.database_url, config.db_max_connections).await?;
    db::migrate(&pool).await?;

    let store = PgRecordStore::new(pool.clone());
    let gateway = FcmGateway::from_config(&config).await?;

    tracing::info!(
        project = %config.fcm_project_id,
        credentials = gateway.credentials_source(),
        max_attempts = config.dispatch.max_attempts,
        exhaustion_policy = ?config.dispatch.exhaustion_policy,
        "Push gateway configured"
    );

    match config.dispatch.exhaustion_policy {
        ExhaustionPolicy::Fail => {
            let dispatcher = NotificationDispatcher::new(gateway, store.clone(), &config.dispatch);
            serve(&config, pool, store, dispatcher).await
        }
        ExhaustionPolicy::DeadLetter => {
            let redis = create_redis_pool(&config.redis_url).await?;
            let dispatcher = NotificationDispatcher::with_dead_letters(
                gateway,
                store.clone(),
                RedisDeadLetterQueue::new(redis),
                &config.dispatch,
            );
            serve(&config, pool, store, dispatcher).await
        }
    }
}

/// Run the watcher and the health server until one exits or Ctrl+C arrives.
async fn serve<D: DeadLetterSink + 'static>(
    config: &AppConfig,
    pool: PgPool,
    store: PgRecordStore,
    dispatcher: NotificationDispatcher<FcmGateway, PgRecordStore, D>,
) -> anyhow::Result<()> {
    let dispatcher = Arc::new(dispatcher);

    let app = create_router(AppState::new(dispatcher.shared_stats(), store.clone()))
        .layer(TraceLayer::new_for_http());
    let addr = SocketAddr::from(([0, 0, 0, 0], config.health_port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Health server listening on {}", addr);

    let watcher = RecordWatcher::new(
        dispatcher,
        store,
        pool,
        config.watcher_sweep_limit,
        Duration::from_secs(config.watcher_resweep_secs),
    );

    tokio::select! {
        result = watcher.run() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Record watcher exited with error");
                return Err(e);
            }
        }
        result = axum::serve(listener, app).into_future() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Health server exited with error");
                return Err(e.into());
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal, stopping gracefully...");
        }
    }

    tracing::info!("ChatPush dispatcher stopped.");
    Ok(())
}
