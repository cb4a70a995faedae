//! hlsgate: on-demand HLS transcoding sessions.
//!
//! A request's parameters are normalized and hashed into a session key. The
//! first request for a key starts a transcoder writing a live playlist into
//! `<sessions_dir>/<key>/`; later requests reuse it, and sessions nobody has
//! touched for the idle TTL are stopped and their directories removed.

pub mod clock;
pub mod config;
pub mod ffmpeg;
pub mod launcher;
pub mod params;
pub mod readiness;
pub mod registry;
pub mod service;
pub mod session_key;
pub mod source_policy;
pub mod sweeper;
pub mod transport;
mod version;

#[cfg(test)]
mod testing;

/// Playlist file written by the transcoder in every session directory.
pub const MANIFEST_FILE: &str = "index.m3u8";

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use ffmpeg::FfmpegLauncher;
pub use launcher::{LaunchError, ProcessHandle, ProcessLauncher, TerminationError};
pub use params::{CanonicalParameters, ParamError, RawStreamRequest, SegmentType, normalize};
pub use readiness::{ReadinessError, ReadinessGate};
pub use registry::{Ensured, RunState, Session, SessionRegistry};
pub use service::{PlaylistOutcome, StreamError, StreamService};
pub use session_key::{InvalidSessionKey, SessionKey};
pub use source_policy::{AllowAllSources, PublicSourcePolicy, SourceError, SourcePolicy};
pub use sweeper::{IdleSweeper, SweeperConfig};
pub use version::{HLSGATE_VERSION, VersionInfo};
