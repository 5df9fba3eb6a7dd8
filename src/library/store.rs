//! Content-addressed asset store: the `_All-Photos/` directory.
//!
//! One file per asset, named by checksum, mtime equal to the remote
//! `modified` timestamp. Writes go through `.part` tempfiles and an atomic
//! rename; leftovers from a crashed run are swept during load. Every worker
//! writes a unique filename, so the store needs no locking of its own.

use std::collections::HashMap;
use std::fs::FileTimes;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use super::asset::{Asset, LocalAsset};
use super::error::LibraryError;

pub const ASSET_DIR: &str = "_All-Photos";
const PART_SUFFIX: &str = ".part";

#[derive(Debug, Clone)]
pub struct AssetStore {
    dir: PathBuf,
}

impl AssetStore {
    pub fn new(library_root: &Path) -> Self {
        Self {
            dir: library_root.join(ASSET_DIR),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn asset_path(&self, filename: &str) -> PathBuf {
        self.dir.join(filename)
    }

    /// Tempfile path for an in-flight download of `filename`. Derived from
    /// the final name, so a crashed download of the same asset is resumed
    /// as garbage collection, not a collision.
    pub fn part_path(&self, filename: &str) -> PathBuf {
        self.dir.join(format!(".{filename}{PART_SUFFIX}"))
    }

    /// Enumerate the store, sweeping `.part` leftovers from interrupted runs.
    pub fn load(&self) -> Result<HashMap<String, LocalAsset>, LibraryError> {
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| LibraryError::io(format!("Unable to create {}", self.dir.display()), e))?;

        let mut assets = HashMap::new();
        let entries = std::fs::read_dir(&self.dir)
            .map_err(|e| LibraryError::io(format!("Unable to read {}", self.dir.display()), e))?;
        for entry in entries {
            let entry =
                entry.map_err(|e| LibraryError::io("Unable to read asset dir entry", e))?;
            let name = entry.file_name().to_string_lossy().into_owned();

            if name.ends_with(PART_SUFFIX) {
                tracing::warn!("Removing interrupted download {}", name);
                let _ = std::fs::remove_file(entry.path());
                continue;
            }
            if name.starts_with('.') {
                continue;
            }

            let meta = entry
                .metadata()
                .map_err(|e| LibraryError::io(format!("Unable to stat {}", name), e))?;
            if !meta.is_file() {
                continue;
            }
            assets.insert(
                name.clone(),
                LocalAsset {
                    filename: name,
                    size: meta.len(),
                    modified: mtime_millis(&meta),
                },
            );
        }
        Ok(assets)
    }

    /// Write an asset's bytes atomically: tempfile → fsync → rename →
    /// mtime. No-op (returns `false`) when a file of that name already
    /// exists with the expected size.
    pub fn write_asset(&self, asset: &Asset, bytes: &[u8]) -> Result<bool, LibraryError> {
        let filename = asset.asset_filename()?;
        let final_path = self.asset_path(&filename);

        if let Ok(meta) = std::fs::metadata(&final_path) {
            if meta.len() == asset.size {
                return Ok(false);
            }
        }

        let part = self.part_path(&filename);
        let mut file = std::fs::File::create(&part)
            .map_err(|e| LibraryError::io(format!("Unable to create {}", part.display()), e))?;
        file.write_all(bytes)
            .map_err(|e| LibraryError::io(format!("Unable to write {}", part.display()), e))?;
        file.sync_data()
            .map_err(|e| LibraryError::io(format!("Unable to sync {}", part.display()), e))?;
        drop(file);

        self.finalize_part(&filename, asset.size, asset.modified)?;
        Ok(true)
    }

    /// Promote a fully written `.part` file to its final name.
    ///
    /// Verifies the byte count first; a mismatch deletes the tempfile and
    /// signals the caller to redownload.
    pub fn finalize_part(
        &self,
        filename: &str,
        expected_size: u64,
        modified: i64,
    ) -> Result<(), LibraryError> {
        let part = self.part_path(filename);
        let final_path = self.asset_path(filename);

        let meta = std::fs::metadata(&part)
            .map_err(|e| LibraryError::io(format!("Unable to stat {}", part.display()), e))?;
        if meta.len() != expected_size {
            let _ = std::fs::remove_file(&part);
            return Err(LibraryError::io(
                format!(
                    "Size mismatch for {} (expected {}, wrote {})",
                    filename,
                    expected_size,
                    meta.len()
                ),
                std::io::Error::from(std::io::ErrorKind::InvalidData),
            ));
        }

        std::fs::rename(&part, &final_path).map_err(|e| {
            LibraryError::io(format!("Unable to rename into {}", final_path.display()), e)
        })?;
        set_mtime_millis(&final_path, modified)
            .map_err(|e| LibraryError::io(format!("Unable to set mtime on {}", filename), e))?;
        Ok(())
    }

    /// Discard the `.part` file of an aborted download, if any.
    pub fn discard_part(&self, filename: &str) {
        let _ = std::fs::remove_file(self.part_path(filename));
    }

    /// Size check against the remote record. On mismatch the local file is
    /// deleted and `false` returned so the caller schedules a redownload.
    pub fn verify_asset(&self, filename: &str, expected_size: u64) -> Result<bool, LibraryError> {
        let path = self.asset_path(filename);
        let meta = std::fs::metadata(&path)
            .map_err(|e| LibraryError::io(format!("Unable to stat {}", path.display()), e))?;
        if meta.len() == expected_size {
            return Ok(true);
        }
        tracing::warn!(
            "Local asset {} has size {}, expected {}; deleting for redownload",
            filename,
            meta.len(),
            expected_size
        );
        std::fs::remove_file(&path)
            .map_err(|e| LibraryError::io(format!("Unable to delete {}", path.display()), e))?;
        Ok(false)
    }

    /// Unlink an asset file. Callers guarantee no album still links to it.
    pub fn delete_asset(&self, filename: &str) -> Result<(), LibraryError> {
        let path = self.asset_path(filename);
        std::fs::remove_file(&path)
            .map_err(|e| LibraryError::io(format!("Unable to delete {}", path.display()), e))
    }
}

/// File mtime as unix milliseconds.
pub fn mtime_millis(meta: &std::fs::Metadata) -> i64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Stamp mtime (and atime) from unix milliseconds. Pre-epoch values clamp
/// to the epoch.
pub fn set_mtime_millis(path: &Path, millis: i64) -> std::io::Result<()> {
    let time = if millis >= 0 {
        UNIX_EPOCH + Duration::from_millis(millis as u64)
    } else {
        SystemTime::UNIX_EPOCH
    };
    let times = FileTimes::new().set_modified(time).set_accessed(time);
    let file = std::fs::File::options().write(true).open(path)?;
    file.set_times(times)?;
    Ok(())
}
