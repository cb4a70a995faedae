//! Transport-agnostic stream service.
//!
//! Wires normalization, key derivation, the session registry and the
//! readiness gate into the request flow used by the HTTP layer, and owns the
//! sweeper and shutdown lifecycle.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::MANIFEST_FILE;
use crate::config::Config;
use crate::ffmpeg::FfmpegLauncher;
use crate::launcher::{LaunchError, ProcessLauncher};
use crate::params::{CanonicalParameters, ParamError, RawStreamRequest, normalize};
use crate::readiness::{ReadinessError, ReadinessGate};
use crate::registry::SessionRegistry;
use crate::session_key::SessionKey;
use crate::source_policy::{PublicSourcePolicy, SourceError, SourcePolicy};
use crate::sweeper::{IdleSweeper, SweeperConfig};
use crate::version::VersionInfo;

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error(transparent)]
    InvalidParameter(#[from] ParamError),
    #[error(transparent)]
    RejectedSource(#[from] SourceError),
    #[error(transparent)]
    Launch(#[from] LaunchError),
    #[error(transparent)]
    ReadinessTimeout(#[from] ReadinessError),
    #[error("{0} not found")]
    NotFound(String),
}

/// Result of a playlist request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaylistOutcome {
    /// The requested key does not match the parameters; use this one.
    Redirect(SessionKey),
    /// The session is running and its manifest is non-empty.
    Ready { key: SessionKey, manifest: PathBuf },
}

pub struct StreamService {
    registry: Arc<SessionRegistry>,
    readiness: ReadinessGate,
    source_policy: Arc<dyn SourcePolicy>,
    sweeper_config: SweeperConfig,
    sweeper: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
    version: VersionInfo,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl StreamService {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            registry,
            readiness: ReadinessGate::default(),
            source_policy: Arc::new(PublicSourcePolicy),
            sweeper_config: SweeperConfig::default(),
            sweeper: Mutex::new(None),
            version: VersionInfo::new(),
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Service backed by ffmpeg, configured from `config`.
    pub fn from_config(config: &Config) -> Self {
        let launcher: Arc<dyn ProcessLauncher> = Arc::new(FfmpegLauncher::new(&config.ffmpeg_path));
        let registry = SessionRegistry::new(&config.sessions_dir, launcher)
            .with_terminate_grace(config.terminate_grace);

        Self::new(Arc::new(registry))
            .with_readiness(
                ReadinessGate::new(config.max_playlist_wait).with_poll_interval(config.readiness_poll),
            )
            .with_sweeper_config(SweeperConfig {
                interval: config.sweep_interval,
                idle_ttl: config.idle_ttl,
            })
    }

    pub fn with_readiness(mut self, readiness: ReadinessGate) -> Self {
        self.readiness = readiness;
        self
    }

    pub fn with_source_policy(mut self, policy: Arc<dyn SourcePolicy>) -> Self {
        self.source_policy = policy;
        self
    }

    pub fn with_sweeper_config(mut self, config: SweeperConfig) -> Self {
        self.sweeper_config = config;
        self
    }

    pub fn with_version(mut self, version: VersionInfo) -> Self {
        self.version = version;
        self
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn version(&self) -> &VersionInfo {
        &self.version
    }

    /// Normalize, admit the source, and derive the session key.
    pub async fn resolve(
        &self,
        raw: &RawStreamRequest,
    ) -> Result<(SessionKey, CanonicalParameters), StreamError> {
        let params = normalize(raw)?;
        self.source_policy.check(&params.src).await?;
        let key = SessionKey::derive(&params);
        Ok((key, params))
    }

    /// Start or reuse the session for `raw` and wait until its manifest can
    /// be served. `claimed_key` is the key from the request path.
    pub async fn open_playlist(
        &self,
        claimed_key: &str,
        raw: &RawStreamRequest,
    ) -> Result<PlaylistOutcome, StreamError> {
        let (key, params) = self.resolve(raw).await?;
        if key.as_str() != claimed_key {
            tracing::debug!(claimed = claimed_key, session_key = %key, "Session key mismatch, redirecting");
            return Ok(PlaylistOutcome::Redirect(key));
        }

        self.registry.ensure_running(&key, &params).await?;
        let dir = self.registry.session_dir(&key);
        self.readiness.wait(&dir).await?;
        self.registry.update_last_access(&key);

        Ok(PlaylistOutcome::Ready {
            key,
            manifest: dir.join(MANIFEST_FILE),
        })
    }

    /// Resolve a segment file, counting the request as an access.
    pub async fn segment_path(&self, key: &str, segment: &str) -> Result<PathBuf, StreamError> {
        let key: SessionKey = key
            .parse()
            .map_err(|_| StreamError::NotFound(format!("session {key}")))?;
        if !is_single_component(segment) {
            return Err(StreamError::NotFound(format!("segment {segment}")));
        }

        self.registry.update_last_access(&key);
        let path = self.registry.session_dir(&key).join(segment);
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(path),
            _ => Err(StreamError::NotFound(format!("segment {segment}"))),
        }
    }

    /// Spawn the idle sweeper. No-op if it is already running.
    pub async fn start_sweeper(&self) {
        let mut slot = self.sweeper.lock().await;
        if slot.is_some() {
            return;
        }
        let cancel = CancellationToken::new();
        let handle = IdleSweeper::new(Arc::clone(&self.registry), self.sweeper_config)
            .spawn(cancel.clone());
        *slot = Some((cancel, handle));
    }

    /// Stop the sweeper, then every session.
    pub async fn shutdown(&self) {
        if let Some((cancel, handle)) = self.sweeper.lock().await.take() {
            cancel.cancel();
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Idle sweeper task failed");
            }
        }
        let stopped = self.registry.stop_all().await;
        tracing::info!(stopped, "All sessions stopped");
    }

    pub fn trigger_shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    pub fn shutdown_rx(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }
}

fn is_single_component(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    ) && !name.contains(['/', '\\'])
}
