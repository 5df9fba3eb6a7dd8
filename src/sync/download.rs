//! Bounded-parallel asset download pass.
//!
//! Each worker streams one asset into a `.part` tempfile in the store,
//! verifies the byte count (and the checksum when it is a recognizable
//! SHA-256), renames it into place, and stamps the remote mtime. Download
//! URLs are short-lived signed URLs: a 410 or 403 triggers a record
//! re-fetch for a fresh URL before the next attempt. A persistently
//! failing asset is skipped with a warning and picked up again next sync.

use std::collections::HashMap;

use base64::Engine;
use futures_util::stream::{self, StreamExt};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use crate::events::{EventSink, Report};
use crate::library::asset::Asset;
use crate::library::store::AssetStore;
use crate::photos::error::QueryError;
use crate::photos::{AssetHandle, PhotosClient};
use crate::retry::{retry_with_backoff, Backoff, RetryAction, RetryOutcome};
use crate::shutdown::Interrupted;

/// Statuses that mean "the signed URL went stale, re-fetch the record".
fn url_expired(status: u16) -> bool {
    status == 410 || status == 403
}

#[derive(Debug, Error)]
enum DownloadError {
    #[error("HTTP {0} fetching asset bytes")]
    HttpStatus(u16),

    #[error("Asset has no download URL")]
    NoUrl,

    #[error("Checksum mismatch for {0}")]
    ChecksumMismatch(String),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Library(#[from] crate::library::error::LibraryError),

    #[error("I/O error writing asset: {0}")]
    Io(#[from] std::io::Error),
}

impl DownloadError {
    fn is_retryable(&self) -> bool {
        match self {
            DownloadError::HttpStatus(status) => {
                url_expired(*status) || *status == 429 || *status >= 500
            }
            // A truncated transfer shows up as a checksum or size problem.
            DownloadError::ChecksumMismatch(_) => true,
            DownloadError::Query(e) => e.is_retryable(),
            DownloadError::NoUrl => true,
            DownloadError::Library(_) | DownloadError::Io(_) => false,
        }
    }
}

/// Result of one download pass.
#[derive(Debug, Default)]
pub struct DownloadStats {
    pub downloaded: u64,
    pub skipped: u64,
}

/// Download every asset in `assets` with bounded concurrency. Individual
/// failures are warnings; only an interrupt aborts the pass.
pub async fn download_assets(
    photos: &PhotosClient,
    store: &AssetStore,
    handles: &HashMap<String, AssetHandle>,
    assets: Vec<Asset>,
    concurrency: usize,
    backoff: &Backoff,
    events: &EventSink,
    cancel: &CancellationToken,
) -> Result<DownloadStats, Interrupted> {
    if assets.is_empty() {
        return Ok(DownloadStats::default());
    }
    tracing::info!(
        "Downloading {} assets (concurrency {})",
        assets.len(),
        concurrency
    );

    let results: Vec<Option<bool>> = stream::iter(assets)
        .map(|asset| async move {
            if cancel.is_cancelled() {
                return None;
            }
            let filename = match asset.asset_filename() {
                Ok(f) => f,
                Err(_) => return Some(false),
            };

            let outcome = retry_with_backoff(
                backoff,
                cancel,
                |e: &DownloadError| {
                    if e.is_retryable() {
                        RetryAction::Retry
                    } else {
                        RetryAction::Abort
                    }
                },
                |attempt| {
                    let asset = asset.clone();
                    let filename = filename.clone();
                    async move {
                        download_one(photos, store, handles, &asset, &filename, attempt).await
                    }
                },
            )
            .await;

            match outcome {
                RetryOutcome::Ok(retried) => {
                    if retried > 0 {
                        events.warn(
                            Report::new("SYNC_WARNING", format!("Retried {retried} times"))
                                .with("recordName", &asset.record_name)
                                .with("filename", &filename),
                        );
                    }
                    Some(true)
                }
                RetryOutcome::Err { error, attempts } => {
                    store.discard_part(&filename);
                    events.warn(
                        Report::new("SYNC_WARNING", "Skipping asset after failed download")
                            .with("recordName", &asset.record_name)
                            .with("filename", &filename)
                            .with("attempts", attempts)
                            .with("cause", error),
                    );
                    Some(false)
                }
                RetryOutcome::Interrupted => {
                    store.discard_part(&filename);
                    None
                }
            }
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    let mut stats = DownloadStats::default();
    let mut interrupted = false;
    for result in results {
        match result {
            Some(true) => stats.downloaded += 1,
            Some(false) => stats.skipped += 1,
            None => interrupted = true,
        }
    }
    if interrupted || cancel.is_cancelled() {
        return Err(Interrupted);
    }
    Ok(stats)
}

/// One attempt for one asset. Attempts after the first re-fetch the
/// record to obtain a fresh signed URL.
async fn download_one(
    photos: &PhotosClient,
    store: &AssetStore,
    handles: &HashMap<String, AssetHandle>,
    asset: &Asset,
    filename: &str,
    attempt: u32,
) -> Result<u32, DownloadError> {
    let url = if attempt == 0 {
        asset.download_url.clone().ok_or(DownloadError::NoUrl)?
    } else {
        refresh_url(photos, handles, asset).await?
    };

    let response = photos.download_asset(&url).await.map_err(|e| match e {
        QueryError::HttpStatus(status) => DownloadError::HttpStatus(status),
        other => DownloadError::Query(other),
    })?;

    let part_path = store.part_path(filename);
    let mut file = tokio::fs::File::create(&part_path).await?;
    let mut hasher = Sha256::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(QueryError::from)?;
        hasher.update(&chunk);
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    file.sync_data().await?;
    drop(file);

    verify_checksum(asset, filename, hasher)?;

    store.finalize_part(filename, asset.size, asset.modified)?;
    tracing::debug!("Downloaded {}", filename);
    Ok(attempt)
}

/// Compare the streamed hash against the remote checksum when it decodes
/// to a recognizable SHA-256 (raw 32 bytes, or 33 with a type prefix).
/// Other formats are accepted as-is: the size check already ran and the
/// filename embeds the checksum.
fn verify_checksum(asset: &Asset, filename: &str, hasher: Sha256) -> Result<(), DownloadError> {
    let expected = match base64::engine::general_purpose::STANDARD.decode(&asset.file_checksum) {
        Ok(bytes) => bytes,
        Err(_) => return Ok(()),
    };
    let actual = hasher.finalize();
    let matches = match expected.len() {
        32 => actual.as_slice() == expected.as_slice(),
        33 => actual.as_slice() == &expected[1..],
        _ => true,
    };
    if matches {
        Ok(())
    } else {
        Err(DownloadError::ChecksumMismatch(filename.to_string()))
    }
}

/// Re-fetch the record pair and pull out a fresh URL for this asset's
/// origin and checksum.
async fn refresh_url(
    photos: &PhotosClient,
    handles: &HashMap<String, AssetHandle>,
    asset: &Asset,
) -> Result<String, DownloadError> {
    let fresh = photos
        .refetch_asset(&asset.record_name, handles.get(&asset.record_name))
        .await?;
    fresh
        .into_iter()
        .find(|f| f.origin == asset.origin && f.file_checksum == asset.file_checksum)
        .and_then(|f| f.download_url)
        .ok_or(DownloadError::NoUrl)
}
