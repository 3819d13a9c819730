use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub sqlite_path: String,
    pub campaign_poll_secs: u64,
    pub grant_poll_secs: u64,
    /// Webhook endpoint for the capability platform; log-only binding when unset.
    pub dispatch_url: Option<String>,
    pub dispatch_secret: Option<String>,
    pub dispatch_timeout_ms: u64,
    pub spam_window_secs: i64,
    pub spam_threshold: usize,
    pub spam_max_keys: usize,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            sqlite_path: std::env::var("SQLITE_PATH").unwrap_or_else(|_| "./drawkeeper.sqlite".to_string()),
            campaign_poll_secs: env_parse("CAMPAIGN_POLL_SECS").unwrap_or(30),
            grant_poll_secs: env_parse("GRANT_POLL_SECS").unwrap_or(60),
            dispatch_url: std::env::var("DISPATCH_URL").ok().filter(|v| !v.is_empty()),
            dispatch_secret: std::env::var("DISPATCH_SECRET").ok().filter(|v| !v.is_empty()),
            dispatch_timeout_ms: env_parse("DISPATCH_TIMEOUT_MS").unwrap_or(10_000),
            spam_window_secs: env_parse("SPAM_WINDOW_SECS").unwrap_or(5),
            spam_threshold: env_parse("SPAM_THRESHOLD").unwrap_or(5),
            spam_max_keys: env_parse("SPAM_MAX_KEYS").unwrap_or(10_000),
        }
    }

    pub fn campaign_interval(&self) -> Duration {
        Duration::from_secs(self.campaign_poll_secs.max(1))
    }

    pub fn grant_interval(&self) -> Duration {
        Duration::from_secs(self.grant_poll_secs.max(1))
    }

    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_millis(self.dispatch_timeout_ms.max(1))
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
