use super::body::{file_stream, BodyReader};
use super::error::{ApiError, ApiResult};
use super::AppState;
use crate::coordinator::IngestOutcome;
use crate::model::{parse_prefix, Hash};
use crate::remote::HASH_HEADER;
use crate::{Error, Result};
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;
use serde_json::json;

const CACHE_CONTROL: &str = "max-age=604800, immutable, stale-if-error=604800";

/// Run store work off the async executor
async fn blocking<T, F>(f: F) -> ApiResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    Ok(tokio::task::spawn_blocking(f).await??)
}

fn parse_hash(text: &str) -> ApiResult<Hash> {
    Hash::from_hex(text)
        .map_err(|e| Error::InvalidHash(format!("{:?}: {}", text, e)).into())
}

pub async fn health() -> &'static str {
    "ok\n"
}

/// `GET /blob/:hash` and `GET /internal/blob/:hash`
pub async fn get_blob(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> ApiResult<Response> {
    let hash = parse_hash(&hash)?;
    let coordinator = state.coordinator.clone();
    let opened = blocking(move || {
        let Some(file) = coordinator.get(&hash)? else {
            return Ok(None);
        };
        let metadata = file.metadata()?;
        Ok(Some((file, metadata.len(), metadata.modified()?)))
    })
    .await?;
    let (file, len, modified) = opened.ok_or_else(|| Error::NotFound(hash.to_hex()))?;

    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_LENGTH, len.to_string()),
            (header::ETAG, format!("\"{}\"", hash)),
            (header::LAST_MODIFIED, httpdate::fmt_http_date(modified)),
            (header::CACHE_CONTROL, CACHE_CONTROL.to_string()),
        ],
        Body::from_stream(file_stream(file)),
    )
        .into_response())
}

/// `POST /upload`: store a client blob and answer with its hash
pub async fn upload(State(state): State<AppState>, body: Body) -> ApiResult<String> {
    let reader = BodyReader::new(body);
    let coordinator = state.coordinator.clone();
    let outcome = blocking(move || coordinator.put(reader)).await?;

    if outcome.newly_written && state.replicate {
        let coordinator = state.coordinator.clone();
        let hash = outcome.hash;
        tokio::task::spawn_blocking(move || match coordinator.replicate(&hash) {
            Ok(delivered) => tracing::debug!(hash = %hash, delivered, "upload replicated"),
            Err(e) => tracing::warn!(hash = %hash, error = %e, "could not replicate upload"),
        });
    }
    Ok(outcome.hash.to_hex())
}

/// `POST /internal/upload`: accept a blob pushed by a peer
pub async fn internal_upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Body,
) -> ApiResult<Response> {
    let announced = headers
        .get(HASH_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::BadRequest(format!("missing {} header", HASH_HEADER)))?;
    let hash = parse_hash(announced)?;

    let reader = BodyReader::new(body);
    let coordinator = state.coordinator.clone();
    match blocking(move || coordinator.ingest(&hash, reader)).await? {
        IngestOutcome::AlreadyExists => {
            Ok((StatusCode::CONFLICT, "already exists\n").into_response())
        }
        IngestOutcome::Stored(outcome) => Ok(outcome.hash.to_hex().into_response()),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub bits: u32,
}

/// `GET /list?prefix=<hex>&bits=<n>`
pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<String> {
    let prefix = parse_prefix(&query.prefix)?;
    let coordinator = state.coordinator.clone();
    let hashes = blocking(move || coordinator.list(&prefix, query.bits)).await?;

    let lines: Vec<String> = hashes.iter().map(Hash::to_hex).collect();
    Ok(format!("{} entries\n{}", lines.len(), lines.join("\n")))
}

/// `GET /digest/:hash`: the bucket checksum covering a hash
pub async fn digest(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let hash = parse_hash(&hash)?;
    let coordinator = state.coordinator.clone();
    let (leaf, depth) =
        blocking(move || Ok((coordinator.digest_leaf(&hash)?, coordinator.depth()))).await?;

    Ok(Json(json!({
        "hash": hash,
        "depth": depth,
        "prefix": format!("{:x}", hash.prefix_bits(depth)),
        "digest": leaf,
    })))
}

/// `POST /debug/add-xor/:hash`
pub async fn debug_add_xor(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> ApiResult<&'static str> {
    let hash = parse_hash(&hash)?;
    let coordinator = state.coordinator.clone();
    blocking(move || coordinator.debug_add_digest(&hash)).await?;
    Ok("ok\n")
}
