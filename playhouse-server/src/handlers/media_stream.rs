use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;
use uuid::Uuid;

use crate::auth::hash_token;
use crate::infra::app_state::AppState;
use crate::infra::errors::{AppError, AppResult};

#[derive(Debug, Deserialize)]
pub struct MediaAuthQuery {
    #[serde(default)]
    token: Option<String>,
}

/// `GET /overlay/media/:assetId`: authenticated, tenant-scoped, range-aware
/// file stream. Authorization mirrors the WebSocket handshake (bearer
/// header, then `?token=`); tenant scoping requires `assetId` be reachable
/// from the caller's guild through a PlaybackJob or MemeBoardItem.
pub async fn media_stream_handler(
    State(state): State<AppState>,
    Path(asset_id): Path<Uuid>,
    headers: HeaderMap,
    Query(query): Query<MediaAuthQuery>,
) -> AppResult<Response> {
    let token = bearer_from_headers(&headers).or(query.token).ok_or_else(|| AppError::unauthorized("missing bearer token"))?;

    let token_hash = hash_token(&token);
    let client = state
        .store
        .find_overlay_client_by_token_hash(&token_hash)
        .await?
        .filter(|c| !c.is_revoked())
        .ok_or_else(|| AppError::unauthorized("invalid or revoked token"))?;

    if !state.store.asset_is_referenced_in_guild(&client.guild_id, asset_id).await? {
        return Err(AppError::not_found("media_not_found", "asset not reachable from this tenant"));
    }

    let asset = state
        .store
        .get_media_asset(asset_id)
        .await?
        .ok_or_else(|| AppError::not_found("media_not_found", "media asset does not exist"))?;

    let Some(storage_path) = asset.storage_path.as_deref() else {
        return Err(AppError::not_found("media_not_found", "asset has no storage path"));
    };

    let file = match tokio::fs::File::open(storage_path).await {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(AppError::new(
                StatusCode::NOT_FOUND,
                "media_not_found_on_disk",
                "media file missing from storage",
            ));
        }
        Err(err) => return Err(AppError::internal(format!("failed to open media file: {err}"))),
    };

    let file_size = file
        .metadata()
        .await
        .map_err(|err| AppError::internal(format!("failed to stat media file: {err}")))?
        .len();

    let content_type = asset.mime.clone();

    let range_header = headers.get(header::RANGE).and_then(|v| v.to_str().ok());
    let range = match range_header.map(|raw| parse_range_header(raw, file_size)) {
        None => None,
        Some(Ok(range)) => Some(range),
        Some(Err(())) => return Err(range_not_satisfiable(file_size)),
    };

    let Some(range) = range else {
        let stream = ReaderStream::new(file);
        return Ok((
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, content_type),
                (header::CONTENT_LENGTH, file_size.to_string()),
                (header::ACCEPT_RANGES, "bytes".to_string()),
                (header::CACHE_CONTROL, "no-store".to_string()),
            ],
            axum::body::Body::from_stream(stream),
        )
            .into_response());
    };

    let mut file = file;
    file.seek(std::io::SeekFrom::Start(range.start))
        .await
        .map_err(|err| AppError::internal(format!("failed to seek media file: {err}")))?;

    let content_length = range.end - range.start + 1;
    let stream = ReaderStream::new(file.take(content_length));

    Ok((
        StatusCode::PARTIAL_CONTENT,
        [
            (header::CONTENT_TYPE, content_type),
            (header::CONTENT_LENGTH, content_length.to_string()),
            (header::CONTENT_RANGE, format!("bytes {}-{}/{}", range.start, range.end, file_size)),
            (header::ACCEPT_RANGES, "bytes".to_string()),
            (header::CACHE_CONTROL, "no-store".to_string()),
        ],
        axum::body::Body::from_stream(stream),
    )
        .into_response())
}

fn range_not_satisfiable(file_size: u64) -> AppError {
    let mut err = AppError::range_not_satisfiable("unsatisfiable byte range");
    err.message = format!("bytes */{file_size}");
    err
}

fn bearer_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ByteRange {
    start: u64,
    end: u64,
}

/// Parses `bytes=start-end`, `bytes=-suffixLength`, and `bytes=start-`.
/// `Err(())` means the header was present but syntactically invalid or
/// unsatisfiable against `file_size` — the caller responds 416.
fn parse_range_header(range_str: &str, file_size: u64) -> Result<ByteRange, ()> {
    let range_part = range_str.strip_prefix("bytes=").ok_or(())?;
    let (start_str, end_str) = range_part.split_once('-').ok_or(())?;

    let start = if start_str.is_empty() {
        let suffix_len: u64 = end_str.parse().map_err(|_| ())?;
        if suffix_len == 0 {
            return Err(());
        }
        file_size.saturating_sub(suffix_len)
    } else {
        start_str.parse::<u64>().map_err(|_| ())?
    };

    let end = if start_str.is_empty() {
        file_size.saturating_sub(1)
    } else if end_str.is_empty() {
        file_size.saturating_sub(1)
    } else {
        let raw_end: u64 = end_str.parse().map_err(|_| ())?;
        raw_end.min(file_size.saturating_sub(1))
    };

    if file_size == 0 || start >= file_size || start > end {
        return Err(());
    }

    Ok(ByteRange { start, end })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIZE: u64 = 1000;

    #[test]
    fn explicit_range_returns_exact_span() {
        let range = parse_range_header("bytes=0-499", SIZE).unwrap();
        assert_eq!(range, ByteRange { start: 0, end: 499 });
    }

    #[test]
    fn suffix_range_returns_last_n_bytes() {
        let range = parse_range_header("bytes=-100", SIZE).unwrap();
        assert_eq!(range, ByteRange { start: 900, end: 999 });
    }

    #[test]
    fn open_ended_range_runs_to_end_of_file() {
        let range = parse_range_header("bytes=2-", SIZE).unwrap();
        assert_eq!(range, ByteRange { start: 2, end: 999 });
    }

    #[test]
    fn end_past_file_size_clamps_to_last_byte() {
        let range = parse_range_header("bytes=900-10000", SIZE).unwrap();
        assert_eq!(range, ByteRange { start: 900, end: 999 });
    }

    #[test]
    fn start_past_file_size_is_unsatisfiable() {
        assert_eq!(parse_range_header("bytes=2000-", SIZE), Err(()));
    }

    #[test]
    fn missing_bytes_prefix_is_rejected() {
        assert_eq!(parse_range_header("0-499", SIZE), Err(()));
    }

    #[test]
    fn non_numeric_range_is_rejected() {
        assert_eq!(parse_range_header("bytes=a-b", SIZE), Err(()));
    }

    #[test]
    fn suffix_zero_is_rejected() {
        assert_eq!(parse_range_header("bytes=-0", SIZE), Err(()));
    }
}
