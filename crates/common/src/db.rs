use std::time::Duration;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// NOTIFY channel the `notifications` insert trigger publishes new ids on.
/// Fixed by the migration; the watcher must listen on exactly this name.
pub const CREATED_CHANNEL: &str = "notification_created";

/// Open the PostgreSQL pool backing the notification record store.
///
/// The dispatcher holds one connection per in-flight write-back plus one for
/// the change-feed listener, so `max_connections` should exceed the expected
/// burst of concurrent notifications (default 20 via `AppConfig`).
pub async fn create_pool(database_url: &str, max_connections: u32) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await?;

    tracing::info!(max_connections, "Connected to PostgreSQL");
    Ok(pool)
}

/// Apply the workspace migrations (notifications table + creation trigger).
pub async fn migrate(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("../../migrations").run(pool).await?;
    tracing::info!("Database migrations applied");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_notifies_created_channel() {
        let migration = include_str!("../../../migrations/20250101000000_notifications.sql");
        assert!(migration.contains(&format!("pg_notify('{}', NEW.id)", CREATED_CHANNEL)));
    }
}
