use redis::Client;
use redis::aio::ConnectionManager;

/// Connect to Redis for the dead-letter queue.
///
/// `ConnectionManager` reconnects transparently, so a single clone per
/// dispatcher is enough; it is cheap to clone into each spawned invocation.
pub async fn create_redis_pool(redis_url: &str) -> anyhow::Result<ConnectionManager> {
    let client = Client::open(redis_url)?;
    let manager = ConnectionManager::new(client).await?;

    tracing::info!("Connected to Redis");
    Ok(manager)
}
