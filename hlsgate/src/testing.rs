//! In-process fakes for the launcher capability.

use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::MANIFEST_FILE;
use crate::launcher::{LaunchError, ProcessHandle, ProcessLauncher, TerminationError};
use crate::params::{CanonicalParameters, RawStreamRequest, normalize};
use crate::session_key::SessionKey;

pub(crate) fn params(src: &str) -> CanonicalParameters {
    normalize(&RawStreamRequest {
        src: Some(src.to_string()),
        ..Default::default()
    })
    .unwrap()
}

pub(crate) struct FakeProcess {
    pid: u32,
    alive: AtomicBool,
    ignores_terminate: bool,
    terminations: AtomicUsize,
    kills: AtomicUsize,
}

impl FakeProcess {
    pub(crate) fn exit(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    pub(crate) fn terminations(&self) -> usize {
        self.terminations.load(Ordering::SeqCst)
    }

    pub(crate) fn kills(&self) -> usize {
        self.kills.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProcessHandle for FakeProcess {
    fn id(&self) -> Option<u32> {
        Some(self.pid)
    }

    async fn poll_alive(&self) -> bool {
        self.is_alive()
    }

    async fn terminate(&self) -> Result<(), TerminationError> {
        self.terminations.fetch_add(1, Ordering::SeqCst);
        if !self.ignores_terminate {
            self.exit();
        }
        Ok(())
    }

    async fn kill(&self) -> Result<(), TerminationError> {
        self.kills.fetch_add(1, Ordering::SeqCst);
        self.exit();
        Ok(())
    }

    async fn wait(&self, timeout: Duration) -> bool {
        if self.is_alive() {
            tokio::time::sleep(timeout).await;
        }
        !self.is_alive()
    }
}

/// Counts launches and hands out [`FakeProcess`]es.
#[derive(Default)]
pub(crate) struct FakeLauncher {
    launches: AtomicUsize,
    processes: Mutex<Vec<Arc<FakeProcess>>>,
    launch_delay: Option<Duration>,
    fail: bool,
    write_manifest: bool,
    ignore_terminate: bool,
}

impl FakeLauncher {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Widen the race window between check and insert.
    pub(crate) fn with_launch_delay(mut self, delay: Duration) -> Self {
        self.launch_delay = Some(delay);
        self
    }

    pub(crate) fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    /// Write a non-empty manifest on launch, as a started transcoder would.
    pub(crate) fn writing_manifest(mut self) -> Self {
        self.write_manifest = true;
        self
    }

    pub(crate) fn ignoring_terminate(mut self) -> Self {
        self.ignore_terminate = true;
        self
    }

    pub(crate) fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub(crate) fn process(&self, index: usize) -> Arc<FakeProcess> {
        Arc::clone(&self.processes.lock().unwrap()[index])
    }
}

impl ProcessLauncher for FakeLauncher {
    fn start(
        &self,
        _key: &SessionKey,
        _params: &CanonicalParameters,
        working_dir: &Path,
    ) -> Result<Arc<dyn ProcessHandle>, LaunchError> {
        if let Some(delay) = self.launch_delay {
            std::thread::sleep(delay);
        }
        if self.fail {
            return Err(LaunchError::Other("fake launch failure".to_string()));
        }
        if self.write_manifest {
            std::fs::write(working_dir.join(MANIFEST_FILE), "#EXTM3U\n")?;
        }

        let pid = self.launches.fetch_add(1, Ordering::SeqCst) as u32 + 1000;
        let process = Arc::new(FakeProcess {
            pid,
            alive: AtomicBool::new(true),
            ignores_terminate: self.ignore_terminate,
            terminations: AtomicUsize::new(0),
            kills: AtomicUsize::new(0),
        });
        self.processes.lock().unwrap().push(Arc::clone(&process));
        Ok(process)
    }
}
