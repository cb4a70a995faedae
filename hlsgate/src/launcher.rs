//! Process launch capability.
//!
//! The registry never touches an OS process directly: it asks a
//! [`ProcessLauncher`] for a [`ProcessHandle`] and drives termination through
//! the handle. Tests substitute fakes for both.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::params::CanonicalParameters;
use crate::session_key::SessionKey;

#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("failed to prepare session directory {}: {source}", path.display())]
    Workspace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to spawn process: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("launch failed: {0}")]
    Other(String),
}

/// Graceful stop failed. Always followed by a forced kill, never fatal.
#[derive(Debug, thiserror::Error)]
pub enum TerminationError {
    #[error("failed to signal process {pid}: {reason}")]
    Signal { pid: u32, reason: String },
    #[error("failed to kill process: {0}")]
    Kill(#[source] std::io::Error),
}

/// Handle to a running transcoder process.
#[async_trait]
pub trait ProcessHandle: Send + Sync {
    /// OS process id, if the process has not been reaped yet.
    fn id(&self) -> Option<u32>;

    async fn poll_alive(&self) -> bool;

    /// Ask the process to exit.
    async fn terminate(&self) -> Result<(), TerminationError>;

    /// Force the process to exit.
    async fn kill(&self) -> Result<(), TerminationError>;

    /// Wait up to `timeout` for exit. Returns true once the process is gone.
    async fn wait(&self, timeout: Duration) -> bool;
}

/// Starts the backing process for a session.
///
/// Called with the session's directory already created. Must not block on
/// the process producing output.
pub trait ProcessLauncher: Send + Sync {
    fn start(
        &self,
        key: &SessionKey,
        params: &CanonicalParameters,
        working_dir: &Path,
    ) -> Result<Arc<dyn ProcessHandle>, LaunchError>;
}
