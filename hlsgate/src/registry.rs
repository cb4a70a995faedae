//! Session registry: key → running transcoder session.
//!
//! Owns the start-or-reuse path, access tracking, and teardown of sessions.
//!
//! Locking:
//! - `sessions` (DashMap) is the only shared map. Shard guards are never held
//!   across an `.await`.
//! - Each key has its own async mutex in `key_locks`. It serializes the
//!   check-then-launch sequence and teardown for that key only, so unrelated
//!   keys never wait on each other's launch or stop.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::MANIFEST_FILE;
use crate::clock::{Clock, SystemClock};
use crate::launcher::{LaunchError, ProcessHandle, ProcessLauncher};
use crate::params::CanonicalParameters;
use crate::session_key::SessionKey;

/// Grace period between SIGTERM and SIGKILL.
pub const DEFAULT_TERMINATE_GRACE: Duration = Duration::from_secs(5);

/// Upper bound on waiting for a process to disappear after SIGKILL.
const KILL_WAIT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Absent,
    Running,
    Stopping,
}

/// Outcome of [`SessionRegistry::ensure_running`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ensured {
    /// A live process already existed for the key.
    Reused,
    /// A new process was launched.
    Launched,
}

#[derive(Clone)]
pub struct Session {
    pub key: SessionKey,
    pub params: CanonicalParameters,
    pub dir: PathBuf,
    pub process: Arc<dyn ProcessHandle>,
    pub started_at: DateTime<Utc>,
    pub last_access: DateTime<Utc>,
    pub state: RunState,
}

impl Session {
    /// Time since last access. Zero if the clock moved backwards.
    pub fn idle_for(&self, now: DateTime<Utc>) -> Duration {
        (now - self.last_access).to_std().unwrap_or_default()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("key", &self.key)
            .field("dir", &self.dir)
            .field("pid", &self.process.id())
            .field("started_at", &self.started_at)
            .field("last_access", &self.last_access)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

pub struct SessionRegistry {
    root: PathBuf,
    launcher: Arc<dyn ProcessLauncher>,
    clock: Arc<dyn Clock>,
    terminate_grace: Duration,
    sessions: DashMap<SessionKey, Session>,
    key_locks: DashMap<SessionKey, Arc<Mutex<()>>>,
}

impl SessionRegistry {
    pub fn new(root: impl Into<PathBuf>, launcher: Arc<dyn ProcessLauncher>) -> Self {
        Self {
            root: root.into(),
            launcher,
            clock: Arc::new(SystemClock),
            terminate_grace: DEFAULT_TERMINATE_GRACE,
            sessions: DashMap::new(),
            key_locks: DashMap::new(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_terminate_grace(mut self, grace: Duration) -> Self {
        self.terminate_grace = grace;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Working directory for a key: `<root>/<key>`.
    pub fn session_dir(&self, key: &SessionKey) -> PathBuf {
        self.root.join(key.as_str())
    }

    fn key_lock(&self, key: &SessionKey) -> Arc<Mutex<()>> {
        Arc::clone(
            self.key_locks
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        )
    }

    /// Drop the per-key lock once nobody else holds or waits on it.
    ///
    /// Callers must have released their own guard and clone first. Another
    /// task can only obtain the lock through the map, and `remove_if` runs
    /// under the shard's write lock, so a count of one means no holders.
    fn release_key_lock(&self, key: &SessionKey) {
        self.key_locks
            .remove_if(key, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// Start a process for `key` unless a live one already exists.
    ///
    /// Atomic per key: concurrent calls for the same key launch at most one
    /// process. Does not wait for the process to produce output.
    pub async fn ensure_running(
        &self,
        key: &SessionKey,
        params: &CanonicalParameters,
    ) -> Result<Ensured, LaunchError> {
        let lock = self.key_lock(key);
        let result = {
            let _guard = lock.lock().await;
            self.ensure_running_locked(key, params).await
        };
        drop(lock);
        if result.is_err() {
            self.release_key_lock(key);
        }
        result
    }

    async fn ensure_running_locked(
        &self,
        key: &SessionKey,
        params: &CanonicalParameters,
    ) -> Result<Ensured, LaunchError> {
        let existing = self.sessions.get(key).map(|s| Arc::clone(&s.process));
        if let Some(process) = existing {
            if process.poll_alive().await {
                tracing::trace!(session_key = %key, "Session already running");
                return Ok(Ensured::Reused);
            }
            tracing::info!(session_key = %key, pid = process.id(), "Session process exited, relaunching");
        }

        let dir = self.session_dir(key);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| LaunchError::Workspace {
                path: dir.clone(),
                source,
            })?;
        // A playlist left by an earlier process must not satisfy readiness
        // for the new one.
        remove_stale_manifest(&dir).await;

        let process = match self.launcher.start(key, params, &dir) {
            Ok(process) => process,
            Err(e) => {
                tracing::error!(session_key = %key, error = %e, "Failed to launch session process");
                self.sessions.remove(key);
                remove_session_dir(&dir).await;
                return Err(e);
            }
        };

        let now = self.clock.now();
        tracing::info!(
            session_key = %key,
            pid = process.id(),
            dir = %dir.display(),
            "Session started"
        );
        self.sessions.insert(
            key.clone(),
            Session {
                key: key.clone(),
                params: params.clone(),
                dir,
                process,
                started_at: now,
                last_access: now,
                state: RunState::Running,
            },
        );
        Ok(Ensured::Launched)
    }

    /// Record an access. No-op for unknown keys.
    pub fn update_last_access(&self, key: &SessionKey) {
        let now = self.clock.now();
        if let Some(mut session) = self.sessions.get_mut(key) {
            session.last_access = now;
        }
    }

    /// Point-in-time copy of every session. Teardown and I/O work from this,
    /// never from the live map.
    pub fn snapshot(&self) -> HashMap<SessionKey, Session> {
        self.sessions
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    pub fn get(&self, key: &SessionKey) -> Option<Session> {
        self.sessions.get(key).map(|entry| entry.value().clone())
    }

    pub fn state(&self, key: &SessionKey) -> RunState {
        self.sessions
            .get(key)
            .map(|entry| entry.state)
            .unwrap_or(RunState::Absent)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Stop the session's process, remove its directory, and forget it.
    /// Returns false if no session existed.
    pub async fn stop_session(&self, key: &SessionKey) -> bool {
        self.stop_with(key, |_| true).await
    }

    /// Like [`stop_session`](Self::stop_session), but only if the session is
    /// still idle past `ttl` once its key lock is held. An access that lands
    /// between a sweep snapshot and the stop keeps the session alive.
    pub async fn stop_if_idle(&self, key: &SessionKey, ttl: Duration) -> bool {
        let now = self.clock.now();
        self.stop_with(key, |session| session.idle_for(now) > ttl)
            .await
    }

    async fn stop_with(&self, key: &SessionKey, should_stop: impl Fn(&Session) -> bool) -> bool {
        let lock = self.key_lock(key);
        let stopped = {
            let _guard = lock.lock().await;
            self.stop_locked(key, should_stop).await
        };
        drop(lock);
        self.release_key_lock(key);
        stopped
    }

    async fn stop_locked(&self, key: &SessionKey, should_stop: impl Fn(&Session) -> bool) -> bool {
        let session = {
            let Some(mut entry) = self.sessions.get_mut(key) else {
                return false;
            };
            if !should_stop(entry.value()) {
                return false;
            }
            entry.state = RunState::Stopping;
            entry.value().clone()
        };

        self.terminate(&session).await;
        remove_session_dir(&session.dir).await;
        self.sessions.remove(key);

        tracing::info!(
            session_key = %key,
            uptime_secs = (self.clock.now() - session.started_at).num_seconds(),
            "Session stopped"
        );
        true
    }

    /// SIGTERM, bounded wait, then SIGKILL. Failures are logged only.
    async fn terminate(&self, session: &Session) {
        let process = &session.process;
        let key = &session.key;
        if !process.poll_alive().await {
            return;
        }

        if let Err(e) = process.terminate().await {
            tracing::warn!(session_key = %key, error = %e, "Graceful termination failed");
        }
        if process.wait(self.terminate_grace).await {
            return;
        }

        tracing::warn!(
            session_key = %key,
            pid = process.id(),
            grace_secs = self.terminate_grace.as_secs_f64(),
            "Process ignored termination, killing"
        );
        if let Err(e) = process.kill().await {
            tracing::error!(session_key = %key, error = %e, "Failed to kill process");
        }
        if !process.wait(KILL_WAIT).await {
            tracing::error!(session_key = %key, pid = process.id(), "Process still alive after kill");
        }
    }

    /// Stop every session present at call time. Used for shutdown drain.
    pub async fn stop_all(&self) -> usize {
        let keys: Vec<SessionKey> = self.snapshot().into_keys().collect();
        if keys.is_empty() {
            return 0;
        }
        tracing::info!(sessions = keys.len(), "Stopping all sessions");

        let results = futures::future::join_all(keys.iter().map(|key| self.stop_session(key))).await;
        results.into_iter().filter(|stopped| *stopped).count()
    }
}

async fn remove_stale_manifest(dir: &Path) {
    let manifest = dir.join(MANIFEST_FILE);
    match tokio::fs::remove_file(&manifest).await {
        Ok(()) => tracing::debug!(manifest = %manifest.display(), "Removed stale manifest"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            tracing::warn!(manifest = %manifest.display(), error = %e, "Failed to remove stale manifest");
        }
    }
}

/// Best-effort recursive removal. Errors never block registry cleanup.
async fn remove_session_dir(dir: &Path) {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            tracing::warn!(dir = %dir.display(), error = %e, "Failed to remove session directory");
        }
    }
}
