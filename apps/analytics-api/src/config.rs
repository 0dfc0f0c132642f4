use std::time::Duration;

use crate::realtime::SchedulerConfig;

/// Analytics API configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection string. `None` runs against the in-memory store.
    pub database_url: Option<String>,
    /// Upper bound on pooled Postgres connections.
    pub database_pool_size: usize,
    /// HMAC secret for dashboard bearer tokens.
    pub jwt_secret: String,
    /// Port the HTTP server binds to.
    pub port: u16,
    /// Keep-alive ping cadence.
    pub ping_interval: Duration,
    /// Stale sweep cadence.
    pub sweep_interval: Duration,
    /// Idle time after which a subscriber is considered dead.
    pub stale_timeout: Duration,
    /// Frames buffered per subscriber before sends start failing.
    pub channel_buffer: usize,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Panics with a descriptive message if a required variable is missing.
    pub fn from_env() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL").ok().filter(|s| !s.is_empty()),
            database_pool_size: parsed_var("DATABASE_POOL_SIZE", 10),
            jwt_secret: required_var("JWT_SECRET"),
            port: parsed_var("PORT", 4010),
            ping_interval: Duration::from_secs(parsed_var("REALTIME_PING_INTERVAL_SECS", 30)),
            sweep_interval: Duration::from_secs(parsed_var("REALTIME_SWEEP_INTERVAL_SECS", 60)),
            stale_timeout: Duration::from_secs(parsed_var("REALTIME_STALE_TIMEOUT_SECS", 300)),
            channel_buffer: parsed_var("REALTIME_CHANNEL_BUFFER", 256),
        }
    }

    /// Config for tests and embedding: in-memory store, default cadence.
    pub fn with_secret(jwt_secret: impl Into<String>) -> Self {
        let schedule = SchedulerConfig::default();
        Self {
            database_url: None,
            database_pool_size: 10,
            jwt_secret: jwt_secret.into(),
            port: 0,
            ping_interval: schedule.ping_interval,
            sweep_interval: schedule.sweep_interval,
            stale_timeout: schedule.stale_timeout,
            channel_buffer: 256,
        }
    }

    pub fn schedule(&self) -> SchedulerConfig {
        SchedulerConfig {
            ping_interval: self.ping_interval,
            sweep_interval: self.sweep_interval,
            stale_timeout: self.stale_timeout,
        }
    }
}

fn required_var(name: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| panic!("{name} env var is required"))
}

fn parsed_var<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
