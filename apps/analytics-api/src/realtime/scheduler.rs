//! Periodic keep-alive and stale-connection sweeps.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use super::registry::{ConnectionRegistry, DEFAULT_STALE_TIMEOUT};
use super::RealtimeError;

/// Cadence of the background sweeps.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub ping_interval: Duration,
    pub sweep_interval: Duration,
    pub stale_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(60),
            stale_timeout: DEFAULT_STALE_TIMEOUT,
        }
    }
}

impl SchedulerConfig {
    /// A live connection must see several pings before it could be considered stale.
    pub fn validate(&self) -> Result<(), RealtimeError> {
        if self.ping_interval.is_zero() || self.sweep_interval.is_zero() {
            return Err(RealtimeError::InvalidSchedule("intervals must be non-zero"));
        }
        if self.ping_interval >= self.stale_timeout {
            return Err(RealtimeError::InvalidSchedule(
                "ping interval must be shorter than the stale timeout",
            ));
        }
        Ok(())
    }
}

/// Owns the two periodic sweeps over a registry.
pub struct LifecycleScheduler {
    registry: Arc<ConnectionRegistry>,
    config: SchedulerConfig,
}

impl LifecycleScheduler {
    pub fn new(registry: Arc<ConnectionRegistry>, config: SchedulerConfig) -> Self {
        Self { registry, config }
    }

    /// Spawn the keep-alive and stale sweeps. They run until the runtime shuts down.
    pub fn start(self) -> Vec<JoinHandle<()>> {
        let SchedulerConfig {
            ping_interval,
            sweep_interval,
            stale_timeout,
        } = self.config;

        tracing::info!(
            ping_secs = ping_interval.as_secs(),
            sweep_secs = sweep_interval.as_secs(),
            stale_secs = stale_timeout.as_secs(),
            "starting realtime sweeps"
        );

        let ping_registry = self.registry.clone();
        let keep_alive = tokio::spawn(async move {
            let mut ticker = interval_after(ping_interval);
            loop {
                ticker.tick().await;
                ping_registry.send_keep_alive_ping();
            }
        });

        let sweep_registry = self.registry;
        let stale_sweep = tokio::spawn(async move {
            let mut ticker = interval_after(sweep_interval);
            loop {
                ticker.tick().await;
                sweep_registry.cleanup_stale_connections(stale_timeout);
            }
        });

        vec![keep_alive, stale_sweep]
    }
}

/// An interval whose first tick fires one period from now.
fn interval_after(period: Duration) -> time::Interval {
    let mut ticker = time::interval_at(time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}
