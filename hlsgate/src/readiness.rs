//! Bridges asynchronous transcoder startup to a synchronous "ready" signal.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::time::Instant;

use crate::MANIFEST_FILE;

pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(20);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Stand-in deadline when `max_wait` does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

#[derive(Debug, thiserror::Error)]
pub enum ReadinessError {
    #[error("manifest {} not ready after {waited:?}", path.display())]
    Timeout { path: PathBuf, waited: Duration },
}

/// Polls a session directory until its manifest exists and is non-empty.
#[derive(Debug, Clone, Copy)]
pub struct ReadinessGate {
    poll_interval: Duration,
    max_wait: Duration,
}

impl Default for ReadinessGate {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_wait: DEFAULT_MAX_WAIT,
        }
    }
}

impl ReadinessGate {
    pub fn new(max_wait: Duration) -> Self {
        Self {
            max_wait,
            ..Default::default()
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn max_wait(&self) -> Duration {
        self.max_wait
    }

    pub async fn wait(&self, session_dir: &Path) -> Result<(), ReadinessError> {
        self.wait_for(session_dir, self.max_wait).await
    }

    /// Return as soon as the manifest is non-empty; fail once `max_wait` has
    /// elapsed without that happening.
    pub async fn wait_for(&self, session_dir: &Path, max_wait: Duration) -> Result<(), ReadinessError> {
        let manifest = session_dir.join(MANIFEST_FILE);
        let started = Instant::now();
        let deadline = started
            .checked_add(max_wait)
            .unwrap_or_else(|| started + FAR_FUTURE);

        loop {
            if manifest_ready(&manifest).await {
                tracing::trace!(
                    manifest = %manifest.display(),
                    waited_ms = started.elapsed().as_millis() as u64,
                    "Manifest ready"
                );
                return Ok(());
            }

            let now = Instant::now();
            if now >= deadline {
                tracing::warn!(
                    manifest = %manifest.display(),
                    max_wait_secs = max_wait.as_secs_f64(),
                    "Manifest not ready in time"
                );
                return Err(ReadinessError::Timeout {
                    path: manifest,
                    waited: started.elapsed(),
                });
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }
}

async fn manifest_ready(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|meta| meta.is_file() && meta.len() > 0)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate(max_wait_ms: u64) -> ReadinessGate {
        ReadinessGate::new(Duration::from_millis(max_wait_ms))
            .with_poll_interval(Duration::from_millis(10))
    }

    #[tokio::test]
    async fn ready_immediately_when_manifest_present() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(MANIFEST_FILE), "#EXTM3U\n").unwrap();

        let started = std::time::Instant::now();
        gate(2_000).wait(dir.path()).await.unwrap();
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn unbounded_max_wait_does_not_overflow() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(MANIFEST_FILE), "#EXTM3U\n").unwrap();

        ReadinessGate::new(Duration::MAX)
            .wait(dir.path())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn empty_manifest_is_not_ready() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(MANIFEST_FILE), "").unwrap();

        let err = gate(100).wait(dir.path()).await.unwrap_err();
        assert!(matches!(err, ReadinessError::Timeout { .. }));
    }

    #[tokio::test]
    async fn times_out_when_manifest_never_appears() {
        let dir = tempfile::tempdir().unwrap();

        let started = std::time::Instant::now();
        let err = gate(150).wait(dir.path()).await.unwrap_err();

        let ReadinessError::Timeout { path, waited } = err;
        assert_eq!(path, dir.path().join(MANIFEST_FILE));
        assert!(waited >= Duration::from_millis(150));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn returns_once_manifest_becomes_non_empty() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = dir.path().join(MANIFEST_FILE);
        std::fs::write(&manifest, "").unwrap();

        let writer = tokio::spawn({
            let manifest = manifest.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(80)).await;
                tokio::fs::write(&manifest, "#EXTM3U\n").await.unwrap();
            }
        });

        let started = std::time::Instant::now();
        gate(5_000).wait(dir.path()).await.unwrap();
        let elapsed = started.elapsed();

        writer.await.unwrap();
        assert!(elapsed >= Duration::from_millis(80));
        assert!(elapsed < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn missing_directory_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let err = gate(50).wait(&dir.path().join("gone")).await;
        assert!(err.is_err());
    }
}
