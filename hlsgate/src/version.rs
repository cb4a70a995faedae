//! Version information reported by `/health`.

pub const HLSGATE_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, serde::Serialize)]
pub struct VersionInfo {
    pub hlsgate: &'static str,
    /// Transcoder version, when it could be probed at startup.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ffmpeg: Option<String>,
}

impl Default for VersionInfo {
    fn default() -> Self {
        Self {
            hlsgate: HLSGATE_VERSION,
            ffmpeg: None,
        }
    }
}

impl VersionInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ffmpeg(mut self, version: String) -> Self {
        self.ffmpeg = Some(version);
        self
    }
}
