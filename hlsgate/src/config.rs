//! Environment-driven configuration.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::readiness::{DEFAULT_MAX_WAIT, DEFAULT_POLL_INTERVAL};
use crate::registry::DEFAULT_TERMINATE_GRACE;
use crate::sweeper::{DEFAULT_IDLE_TTL, DEFAULT_SWEEP_INTERVAL};
use crate::transport::http::ServerConfig;

const DEFAULT_SESSIONS_DIR: &str = "/sessions";
const FALLBACK_SESSIONS_DIR: &str = "sessions";

/// Upper bound for every configured duration.
pub const MAX_DURATION: Duration = Duration::from_secs(365 * 24 * 60 * 60);

#[derive(Debug, Clone)]
pub struct Config {
    pub sessions_dir: PathBuf,
    pub idle_ttl: Duration,
    pub max_playlist_wait: Duration,
    pub sweep_interval: Duration,
    pub terminate_grace: Duration,
    pub readiness_poll: Duration,
    pub ffmpeg_path: PathBuf,
    pub server: ServerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sessions_dir: default_sessions_dir(),
            idle_ttl: DEFAULT_IDLE_TTL,
            max_playlist_wait: DEFAULT_MAX_WAIT,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            terminate_grace: DEFAULT_TERMINATE_GRACE,
            readiness_poll: DEFAULT_POLL_INTERVAL,
            ffmpeg_path: PathBuf::from("ffmpeg"),
            server: ServerConfig::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source. Unset or blank variables keep
    /// their default; unparseable ones are logged and ignored.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        Self {
            sessions_dir: var("SESSIONS_DIR")
                .map(|dir| absolutize(Path::new(dir.trim())))
                .unwrap_or(defaults.sessions_dir),
            idle_ttl: seconds(&var, "IDLE_TTL_SECONDS", defaults.idle_ttl),
            max_playlist_wait: seconds(&var, "MAX_PLAYLIST_WAIT_SECONDS", defaults.max_playlist_wait),
            sweep_interval: non_zero(
                "SWEEP_INTERVAL_SECONDS",
                seconds(&var, "SWEEP_INTERVAL_SECONDS", defaults.sweep_interval),
                defaults.sweep_interval,
            ),
            terminate_grace: seconds(&var, "TERMINATE_GRACE_SECONDS", defaults.terminate_grace),
            readiness_poll: parsed(&var, "READINESS_POLL_MILLIS", None::<u64>)
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(defaults.readiness_poll),
            ffmpeg_path: var("FFMPEG_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.ffmpeg_path),
            server: ServerConfig {
                host: var("HOST").unwrap_or(defaults.server.host),
                port: parsed(&var, "PORT", Some(defaults.server.port))
                    .unwrap_or(defaults.server.port),
            },
        }
    }
}

fn parsed<T: FromStr + Copy>(
    var: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: Option<T>,
) -> Option<T> {
    let Some(raw) = var(name) else {
        return default;
    };
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(variable = name, value = %raw, "Invalid value, using default");
            default
        }
    }
}

/// Non-negative seconds, fractional allowed, at most [`MAX_DURATION`].
fn seconds(var: &impl Fn(&str) -> Option<String>, name: &str, default: Duration) -> Duration {
    parsed::<f64>(var, name, None)
        .and_then(|secs| match Duration::try_from_secs_f64(secs) {
            Ok(d) if d <= MAX_DURATION => Some(d),
            _ => {
                tracing::warn!(variable = name, secs, "Out-of-range duration, using default");
                None
            }
        })
        .unwrap_or(default)
}

fn non_zero(name: &str, value: Duration, default: Duration) -> Duration {
    if value.is_zero() {
        tracing::warn!(variable = name, "Must be greater than zero, using default");
        default
    } else {
        value
    }
}

fn default_sessions_dir() -> PathBuf {
    let preferred = Path::new(DEFAULT_SESSIONS_DIR);
    if preferred.is_dir() {
        preferred.to_path_buf()
    } else {
        absolutize(Path::new(FALLBACK_SESSIONS_DIR))
    }
}

fn absolutize(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}
