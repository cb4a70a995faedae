//! Background eviction of idle sessions.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::registry::SessionRegistry;
use crate::session_key::SessionKey;

pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_IDLE_TTL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy)]
pub struct SweeperConfig {
    pub interval: Duration,
    pub idle_ttl: Duration,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_SWEEP_INTERVAL,
            idle_ttl: DEFAULT_IDLE_TTL,
        }
    }
}

pub struct IdleSweeper {
    registry: Arc<SessionRegistry>,
    config: SweeperConfig,
}

impl IdleSweeper {
    /// A zero interval is replaced by [`DEFAULT_SWEEP_INTERVAL`].
    pub fn new(registry: Arc<SessionRegistry>, mut config: SweeperConfig) -> Self {
        if config.interval.is_zero() {
            tracing::warn!("Sweep interval must be non-zero, using default");
            config.interval = DEFAULT_SWEEP_INTERVAL;
        }
        Self { registry, config }
    }

    pub fn interval(&self) -> Duration {
        self.config.interval
    }

    /// One sweep: stop every session idle for longer than the TTL.
    /// Returns the number of sessions stopped.
    pub async fn tick(&self) -> usize {
        let now = self.registry.now();
        let ttl = self.config.idle_ttl;

        let expired: Vec<SessionKey> = self
            .registry
            .snapshot()
            .into_values()
            .filter(|session| session.idle_for(now) > ttl)
            .map(|session| {
                tracing::debug!(
                    session_key = %session.key,
                    idle_secs = session.idle_for(now).as_secs(),
                    "Session idle past TTL"
                );
                session.key
            })
            .collect();
        if expired.is_empty() {
            return 0;
        }

        let stops = expired
            .iter()
            .map(|key| self.registry.stop_if_idle(key, ttl));
        let stopped = futures::future::join_all(stops)
            .await
            .into_iter()
            .filter(|stopped| *stopped)
            .count();

        if stopped > 0 {
            tracing::info!(stopped, remaining = self.registry.len(), "Evicted idle sessions");
        }
        stopped
    }

    /// Tick until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        tracing::debug!(
            interval_ms = self.config.interval.as_millis() as u64,
            idle_ttl_secs = self.config.idle_ttl.as_secs(),
            "Idle sweeper started"
        );
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    self.tick().await;
                }
            }
        }
        tracing::debug!("Idle sweeper stopped");
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }
}
