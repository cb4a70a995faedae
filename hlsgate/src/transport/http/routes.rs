//! HTTP route handlers.

use std::sync::Arc;

use axum::{
    Router,
    extract::{Path, Query, RawQuery, State},
    http::{StatusCode, header},
    response::{IntoResponse, Json, Redirect, Response},
    routing::get,
};
use serde::Serialize;

use crate::MANIFEST_FILE;
use crate::params::RawStreamRequest;
use crate::service::{PlaylistOutcome, StreamError, StreamService};
use crate::session_key::SessionKey;
use crate::version::VersionInfo;

const PLAYLIST_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub active_sessions: usize,
    pub version: VersionInfo,
}

impl IntoResponse for StreamError {
    fn into_response(self) -> Response {
        let status = match &self {
            StreamError::InvalidParameter(_) | StreamError::RejectedSource(_) => {
                StatusCode::BAD_REQUEST
            }
            StreamError::Launch(_) => StatusCode::BAD_GATEWAY,
            StreamError::ReadinessTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            StreamError::NotFound(_) => StatusCode::NOT_FOUND,
        };
        if status.is_server_error() {
            tracing::error!(error = %self, "Stream request failed");
        }
        (
            status,
            Json(serde_json::json!({ "detail": self.to_string() })),
        )
            .into_response()
    }
}

fn playlist_location(key: &SessionKey, query: Option<&str>) -> String {
    match query {
        Some(q) if !q.is_empty() => format!("/hls/{key}/{MANIFEST_FILE}?{q}"),
        _ => format!("/hls/{key}/{MANIFEST_FILE}"),
    }
}

fn segment_content_type(name: &str) -> &'static str {
    let is_ts = std::path::Path::new(name)
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("ts"));
    if is_ts { "video/MP2T" } else { "video/mp4" }
}

async fn health(State(service): State<Arc<StreamService>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        active_sessions: service.registry().len(),
        version: service.version().clone(),
    })
}

/// Entry point for players: resolve the parameters and send the client to
/// the content-addressed playlist URL.
async fn bootstrap_playlist(
    State(service): State<Arc<StreamService>>,
    RawQuery(query): RawQuery,
    Query(raw): Query<RawStreamRequest>,
) -> Result<Redirect, StreamError> {
    let (key, _) = service.resolve(&raw).await?;
    Ok(Redirect::temporary(&playlist_location(&key, query.as_deref())))
}

async fn playlist(
    State(service): State<Arc<StreamService>>,
    Path(key): Path<String>,
    RawQuery(query): RawQuery,
    Query(raw): Query<RawStreamRequest>,
) -> Result<Response, StreamError> {
    match service.open_playlist(&key, &raw).await? {
        PlaylistOutcome::Redirect(key) => {
            Ok(Redirect::temporary(&playlist_location(&key, query.as_deref())).into_response())
        }
        PlaylistOutcome::Ready { key, manifest } => {
            let body = tokio::fs::read(&manifest)
                .await
                .map_err(|_| StreamError::NotFound(format!("playlist for session {key}")))?;
            Ok((
                [
                    (header::CONTENT_TYPE, PLAYLIST_CONTENT_TYPE),
                    (header::CACHE_CONTROL, "no-cache"),
                ],
                body,
            )
                .into_response())
        }
    }
}

async fn segment(
    State(service): State<Arc<StreamService>>,
    Path((key, name)): Path<(String, String)>,
) -> Result<Response, StreamError> {
    let path = service.segment_path(&key, &name).await?;
    let body = tokio::fs::read(&path)
        .await
        .map_err(|_| StreamError::NotFound(format!("segment {name}")))?;
    Ok(([(header::CONTENT_TYPE, segment_content_type(&name))], body).into_response())
}

pub fn routes(service: Arc<StreamService>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/hls/index.m3u8", get(bootstrap_playlist))
        .route("/hls/{key}/index.m3u8", get(playlist))
        .route("/hls/{key}/{segment}", get(segment))
        .with_state(service)
}
