use serde::Deserialize;

/// What happens to a record whose transient failures exhausted every attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustionPolicy {
    /// Record the notification as `failed`.
    #[default]
    Fail,
    /// Record the notification as `dead_lettered` and park it in the dead-letter queue.
    DeadLetter,
}

impl std::str::FromStr for ExhaustionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fail" | "failed" => Ok(ExhaustionPolicy::Fail),
            "dead_letter" | "dead-letter" | "deadletter" => Ok(ExhaustionPolicy::DeadLetter),
            other => Err(format!("unknown exhaustion policy: {}", other)),
        }
    }
}

/// Retry and timeout settings for the dispatch engine.
#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    /// Total send attempts per notification, including the first (default: 3)
    pub max_attempts: u32,

    /// Delay before the first retry in milliseconds (default: 500)
    pub backoff_base_ms: u64,

    /// Upper bound for a single backoff delay in milliseconds (default: 4000)
    pub backoff_max_ms: u64,

    /// Timeout for a single gateway call in milliseconds (default: 10000)
    pub attempt_timeout_ms: u64,

    /// Terminal state for exhausted transient failures (default: fail)
    pub exhaustion_policy: ExhaustionPolicy,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_ms: 500,
            backoff_max_ms: 4_000,
            attempt_timeout_ms: 10_000,
            exhaustion_policy: ExhaustionPolicy::Fail,
        }
    }
}

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// PostgreSQL connection string
    pub database_url: String,

    /// Maximum number of PostgreSQL connections in the pool (default: 20)
    pub db_max_connections: u32,

    /// Redis connection string, used for the dead-letter queue
    pub redis_url: String,

    /// Firebase project that owns the FCM sender
    pub fcm_project_id: String,

    /// Fixed OAuth2 bearer token for the FCM HTTP v1 API. When unset, tokens
    /// come from Google application default credentials and are refreshed
    /// before they expire.
    pub fcm_access_token: Option<String>,

    /// FCM API base URL (default: https://fcm.googleapis.com)
    pub fcm_endpoint: String,

    /// Android notification channel the client app registers
    pub fcm_android_channel_id: String,

    /// Maximum number of pending records replayed per sweep (default: 500)
    pub watcher_sweep_limit: i64,

    /// Seconds between sweeps for pending records the change feed missed (default: 30)
    pub watcher_resweep_secs: u64,

    /// Port for the health and stats endpoints (default: 8080)
    pub health_port: u16,

    pub dispatch: DispatchConfig,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let dispatch = DispatchConfig {
            max_attempts: std::env::var("DISPATCH_MAX_ATTEMPTS")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("DISPATCH_MAX_ATTEMPTS must be a valid u32"))?,
            backoff_base_ms: std::env::var("DISPATCH_BACKOFF_BASE_MS")
                .unwrap_or_else(|_| "500".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("DISPATCH_BACKOFF_BASE_MS must be a valid u64"))?,
            backoff_max_ms: std::env::var("DISPATCH_BACKOFF_MAX_MS")
                .unwrap_or_else(|_| "4000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("DISPATCH_BACKOFF_MAX_MS must be a valid u64"))?,
            attempt_timeout_ms: std::env::var("DISPATCH_ATTEMPT_TIMEOUT_MS")
                .unwrap_or_else(|_| "10000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("DISPATCH_ATTEMPT_TIMEOUT_MS must be a valid u64"))?,
            exhaustion_policy: std::env::var("DISPATCH_EXHAUSTION_POLICY")
                .unwrap_or_else(|_| "fail".to_string())
                .parse()
                .map_err(|e: String| anyhow::anyhow!("DISPATCH_EXHAUSTION_POLICY: {}", e))?,
        };

        if dispatch.max_attempts == 0 {
            anyhow::bail!("DISPATCH_MAX_ATTEMPTS must be at least 1");
        }

        let watcher_resweep_secs: u64 = std::env::var("WATCHER_RESWEEP_SECS")
            .unwrap_or_else(|_| "30".to_string())
            .parse()
            .map_err(|_| anyhow::anyhow!("WATCHER_RESWEEP_SECS must be a valid u64"))?;
        if watcher_resweep_secs == 0 {
            anyhow::bail!("WATCHER_RESWEEP_SECS must be at least 1");
        }

        Ok(Self {
            database_url: std::env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL environment variable is required"))?,
            db_max_connections: std::env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("DB_MAX_CONNECTIONS must be a valid u32"))?,
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            fcm_project_id: std::env::var("FCM_PROJECT_ID")
                .map_err(|_| anyhow::anyhow!("FCM_PROJECT_ID environment variable is required"))?,
            fcm_access_token: std::env::var("FCM_ACCESS_TOKEN")
                .ok()
                .filter(|token| !token.trim().is_empty()),
            fcm_endpoint: std::env::var("FCM_ENDPOINT")
                .unwrap_or_else(|_| "https://fcm.googleapis.com".to_string()),
            fcm_android_channel_id: std::env::var("FCM_ANDROID_CHANNEL_ID")
                .unwrap_or_else(|_| "chat_messages".to_string()),
            watcher_sweep_limit: std::env::var("WATCHER_SWEEP_LIMIT")
                .unwrap_or_else(|_| "500".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("WATCHER_SWEEP_LIMIT must be a valid i64"))?,
            watcher_resweep_secs,
            health_port: std::env::var("HEALTH_PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("HEALTH_PORT must be a valid u16"))?,
            dispatch,
        })
    }
}
