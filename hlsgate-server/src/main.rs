//! hlsgate server binary.

use std::sync::Arc;

use hlsgate::transport::http::serve;
use hlsgate::{Config, FfmpegLauncher, StreamService, VersionInfo};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

fn init_tracing() {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let base_level = match std::env::var("HLSGATE_LOG").as_deref() {
            Ok("debug") => "debug",
            Ok("warn") | Ok("warning") => "warn",
            Ok("error") => "error",
            _ => "info",
        };
        EnvFilter::new(format!(
            "hlsgate={level}",
            level = base_level
        ))
    };

    let use_json = std::env::var("LOG_FORMAT").as_deref() == Ok("json");

    if use_json {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    } else {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = Config::from_env();
    tracing::info!(
        sessions_dir = %config.sessions_dir.display(),
        idle_ttl_secs = config.idle_ttl.as_secs_f64(),
        max_playlist_wait_secs = config.max_playlist_wait.as_secs_f64(),
        ffmpeg = %config.ffmpeg_path.display(),
        "Loaded configuration"
    );

    tokio::fs::create_dir_all(&config.sessions_dir).await?;

    let mut version = VersionInfo::new();
    match FfmpegLauncher::new(&config.ffmpeg_path).probe_version().await {
        Some(v) => version = version.with_ffmpeg(v),
        None => tracing::warn!(
            ffmpeg = %config.ffmpeg_path.display(),
            "Could not determine ffmpeg version; sessions will fail to launch if it is missing"
        ),
    }

    let service = Arc::new(StreamService::from_config(&config).with_version(version));
    service.start_sweeper().await;

    serve(config.server.clone(), service).await
}
