//! Archive engine: freeze an album folder locally, optionally deleting
//! its remote originals.
//!
//! Archiving replaces every asset symlink in the album by a copy of its
//! target, so the files survive even when the shared asset is later
//! removed from the store. A `.archive` sentinel marks the album; from
//! then on the sync diff leaves it alone.

use std::path::Path;

use thiserror::Error;

use crate::events::{EventSink, Report};
use crate::library::album::AlbumKind;
use crate::library::error::LibraryError;
use crate::library::store::{mtime_millis, set_mtime_millis};
use crate::library::tree::ARCHIVED_SENTINEL;
use crate::library::PhotosLibrary;
use crate::photos::error::QueryError;
use crate::photos::PhotosClient;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Path does not name an album: {0}")]
    NotAnAlbum(String),

    #[error("Only plain albums can be archived, {0} is a folder")]
    FolderNotArchivable(String),

    #[error(transparent)]
    Library(#[from] LibraryError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error("{context}: {source}")]
    Io {
        context: String,
        source: std::io::Error,
    },
}

impl ArchiveError {
    pub fn exit_code(&self) -> i32 {
        7
    }
}

/// Archive the album named by `path` (a display-name symlink under the
/// data directory). With `remote_delete`, every contained non-favorite
/// asset is deleted remotely afterwards.
pub async fn archive_path(
    data_dir: &Path,
    path: &Path,
    photos: &PhotosClient,
    remote_delete: bool,
    events: &EventSink,
) -> Result<(), ArchiveError> {
    let library = PhotosLibrary::load(data_dir, events)?;
    tracing::debug!("Archiving within library at {}", library.root().display());

    let uuid = library
        .tree
        .resolve_album_path(path)
        .map_err(|_| ArchiveError::NotAnAlbum(path.display().to_string()))?;
    let album = library
        .albums
        .get(&uuid)
        .ok_or_else(|| ArchiveError::NotAnAlbum(path.display().to_string()))?;

    match album.kind {
        AlbumKind::Album => {}
        AlbumKind::Folder => return Err(ArchiveError::FolderNotArchivable(uuid)),
        AlbumKind::Archived => {
            events.warn(
                Report::new("ARCHIVE_WARNING", "Album is already archived").with("uuid", &uuid),
            );
            return Ok(());
        }
    }

    // Membership must be captured before freezing replaces the links.
    let targets: Vec<String> = album.links.values().cloned().collect();

    let copies = freeze_album_dir(&library, &uuid, &library.tree.album_dir(album))?;
    tracing::info!(
        "Archived {} ({}): {} assets copied",
        album.display_name,
        uuid,
        copies
    );

    if remote_delete {
        delete_remote_originals(photos, &targets, events).await?;
    }

    Ok(())
}

/// Replace every asset symlink in `album_dir` by a copy of its target,
/// preserving mtime, then drop the `.archive` sentinel. Returns the number
/// of copies made.
pub fn freeze_album_dir(
    library: &PhotosLibrary,
    uuid: &str,
    album_dir: &Path,
) -> Result<u64, ArchiveError> {
    let album = library
        .albums
        .get(uuid)
        .ok_or_else(|| ArchiveError::NotAnAlbum(uuid.to_string()))?;

    let mut copies = 0u64;
    for (link_name, target_filename) in &album.links {
        let link_path = album_dir.join(link_name);
        let source = library.store.asset_path(target_filename);

        let source_meta = std::fs::metadata(&source).map_err(|e| ArchiveError::Io {
            context: format!("Unable to stat {}", source.display()),
            source: e,
        })?;

        std::fs::remove_file(&link_path).map_err(|e| ArchiveError::Io {
            context: format!("Unable to unlink {}", link_path.display()),
            source: e,
        })?;
        std::fs::copy(&source, &link_path).map_err(|e| ArchiveError::Io {
            context: format!("Unable to copy {} into archive", source.display()),
            source: e,
        })?;
        set_mtime_millis(&link_path, mtime_millis(&source_meta)).map_err(|e| ArchiveError::Io {
            context: format!("Unable to set mtime on {}", link_path.display()),
            source: e,
        })?;
        copies += 1;
    }

    std::fs::write(album_dir.join(ARCHIVED_SENTINEL), b"").map_err(|e| ArchiveError::Io {
        context: format!("Unable to write sentinel in {}", album_dir.display()),
        source: e,
    })?;
    Ok(copies)
}

/// Delete the remote originals of the archived assets, skipping favorites.
async fn delete_remote_originals(
    photos: &PhotosClient,
    target_filenames: &[String],
    events: &EventSink,
) -> Result<(), ArchiveError> {
    let remote_albums = photos.fetch_all_albums(events).await?;
    let fetch = photos.fetch_all_assets(&remote_albums, events).await?;

    // Map store filenames back to remote records.
    let mut handles = Vec::new();
    let mut favorites = 0u64;
    let mut unmatched = 0u64;
    for filename in target_filenames {
        let found = fetch.assets.iter().find(|a| {
            a.asset_filename()
                .map(|f| &f == filename)
                .unwrap_or(false)
        });
        match found {
            Some(asset) if asset.favorite => favorites += 1,
            Some(asset) => match fetch.handles.get(&asset.record_name) {
                Some(handle) => handles.push(handle.clone()),
                None => unmatched += 1,
            },
            None => unmatched += 1,
        }
    }

    if favorites > 0 {
        tracing::info!("Keeping {} favorite assets remotely", favorites);
    }
    if unmatched > 0 {
        events.warn(
            Report::new("ARCHIVE_WARNING", "Some archived assets have no remote counterpart")
                .with("count", unmatched),
        );
    }

    photos.delete_assets(&handles).await?;
    Ok(())
}
