//! ffmpeg-backed [`ProcessLauncher`] producing a live HLS playlist.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

use crate::MANIFEST_FILE;
use crate::launcher::{LaunchError, ProcessHandle, ProcessLauncher, TerminationError};
use crate::params::{CanonicalParameters, SegmentType};
use crate::session_key::SessionKey;

const AUDIO_BITRATE: &str = "128k";
const AUDIO_CHANNELS: &str = "2";
const AUDIO_SAMPLE_RATE: &str = "48000";

/// Build the ffmpeg argument list for one session.
///
/// Segments are written as `%06d.<ext>` next to the manifest in `dir`; ffmpeg
/// deletes segments that fall out of the playlist window.
pub fn hls_args(params: &CanonicalParameters, dir: &Path) -> Vec<String> {
    let manifest = dir.join(MANIFEST_FILE);
    let segment_pattern = dir.join(format!("%06d.{}", params.segment_type.extension()));

    let video_codec = match params.video_codec.as_str() {
        "h264" => "libx264",
        other => other,
    };
    let hls_flags = match params.segment_type {
        SegmentType::Ts => "delete_segments+independent_segments+program_date_time",
        SegmentType::Fmp4 => "delete_segments+independent_segments+cmaf",
    };
    let scale = format!(
        "scale={}:{}:force_original_aspect_ratio=decrease",
        params.resolution.width, params.resolution.height
    );

    let mut args: Vec<String> = [
        "-hide_banner",
        "-loglevel",
        "error",
        "-nostdin",
        "-re",
        "-i",
        params.src.as_str(),
        "-map",
        "0:v:0",
        "-map",
        "0:a:0?",
        "-c:v",
        video_codec,
        "-preset",
        "veryfast",
        "-profile:v",
        "main",
        "-level",
        "4.1",
        "-b:v",
        params.bitrate.as_str(),
        "-maxrate",
        params.bitrate.as_str(),
        "-vf",
        scale.as_str(),
        "-c:a",
        params.audio_codec.as_str(),
        "-b:a",
        AUDIO_BITRATE,
        "-ac",
        AUDIO_CHANNELS,
        "-ar",
        AUDIO_SAMPLE_RATE,
    ]
    .into_iter()
    .map(String::from)
    .collect();

    if let Some(fps) = params.fps {
        args.extend(["-r".to_string(), fps.to_string()]);
    }

    args.extend([
        "-f".to_string(),
        "hls".to_string(),
        "-hls_time".to_string(),
        params.segment_duration.to_string(),
        "-hls_list_size".to_string(),
        params.list_size.to_string(),
        "-hls_flags".to_string(),
        hls_flags.to_string(),
    ]);
    if params.segment_type == SegmentType::Fmp4 {
        args.extend(["-hls_segment_type".to_string(), "fmp4".to_string()]);
    }
    args.extend([
        "-hls_segment_filename".to_string(),
        segment_pattern.to_string_lossy().into_owned(),
        manifest.to_string_lossy().into_owned(),
    ]);

    args
}

#[derive(Debug, Clone)]
pub struct FfmpegLauncher {
    program: PathBuf,
}

impl FfmpegLauncher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Version string from `ffmpeg -version`, if the binary runs.
    pub async fn probe_version(&self) -> Option<String> {
        let output = Command::new(&self.program)
            .arg("-version")
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()
            .await
            .ok()?;
        if !output.status.success() {
            return None;
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        stdout
            .lines()
            .next()
            .and_then(|line| line.strip_prefix("ffmpeg version "))
            .and_then(|rest| rest.split_whitespace().next())
            .map(str::to_string)
    }
}

impl Default for FfmpegLauncher {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl ProcessLauncher for FfmpegLauncher {
    fn start(
        &self,
        key: &SessionKey,
        params: &CanonicalParameters,
        working_dir: &Path,
    ) -> Result<Arc<dyn ProcessHandle>, LaunchError> {
        let args = hls_args(params, working_dir);
        let child = Command::new(&self.program)
            .args(&args)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        tracing::info!(
            session_key = %key,
            pid = child.id(),
            program = %self.program.display(),
            "Spawned ffmpeg"
        );
        Ok(Arc::new(FfmpegHandle::new(child)))
    }
}

/// [`ProcessHandle`] over a tokio child process.
pub struct FfmpegHandle {
    pid: Option<u32>,
    child: Mutex<Child>,
}

impl FfmpegHandle {
    pub fn new(child: Child) -> Self {
        Self {
            pid: child.id(),
            child: Mutex::new(child),
        }
    }
}

#[async_trait]
impl ProcessHandle for FfmpegHandle {
    fn id(&self) -> Option<u32> {
        self.pid
    }

    async fn poll_alive(&self) -> bool {
        let mut child = self.child.lock().await;
        matches!(child.try_wait(), Ok(None))
    }

    #[cfg(unix)]
    async fn terminate(&self) -> Result<(), TerminationError> {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;

        if !self.poll_alive().await {
            return Ok(());
        }
        let Some(pid) = self.pid else {
            return Ok(());
        };
        let raw = i32::try_from(pid).map_err(|_| TerminationError::Signal {
            pid,
            reason: "pid out of range".to_string(),
        })?;
        kill(Pid::from_raw(raw), Signal::SIGTERM).map_err(|errno| TerminationError::Signal {
            pid,
            reason: errno.to_string(),
        })
    }

    #[cfg(not(unix))]
    async fn terminate(&self) -> Result<(), TerminationError> {
        self.kill().await
    }

    async fn kill(&self) -> Result<(), TerminationError> {
        let mut child = self.child.lock().await;
        if !matches!(child.try_wait(), Ok(None)) {
            return Ok(());
        }
        child.start_kill().map_err(TerminationError::Kill)
    }

    async fn wait(&self, timeout: Duration) -> bool {
        let mut child = self.child.lock().await;
        match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(pid = self.pid, %status, "ffmpeg exited");
                true
            }
            Ok(Err(e)) => {
                tracing::warn!(pid = self.pid, error = %e, "Failed to wait for ffmpeg");
                false
            }
            Err(_) => false,
        }
    }
}
