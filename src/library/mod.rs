//! Local library model: content-addressed asset store plus symlink album
//! tree. All state lives in the filesystem; this module's [`PhotosLibrary`]
//! is an in-memory projection rebuilt at the start of every sync and
//! mutated only through the store/tree operations.

pub mod album;
pub mod asset;
pub mod error;
pub mod store;
pub mod tree;

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use album::LocalAlbum;
use asset::LocalAsset;
use error::LibraryError;
use store::AssetStore;
use tree::{AlbumTree, ArchivedEntry};

use crate::events::EventSink;

/// In-memory projection of the on-disk library. Owned exclusively by the
/// sync engine for the duration of one sync; never cached between runs.
#[derive(Debug)]
pub struct PhotosLibrary {
    root: PathBuf,
    pub store: AssetStore,
    pub tree: AlbumTree,
    /// filename → asset, the contents of `_All-Photos/`.
    pub assets: HashMap<String, LocalAsset>,
    /// uuid → album, derived from the link structure.
    pub albums: HashMap<String, LocalAlbum>,
    /// Asset filenames kept alive by archived albums.
    protected: HashSet<String>,
}

impl PhotosLibrary {
    /// Construct the projection by walking the data directory, creating the
    /// fixed layout on first run and sweeping crash leftovers.
    pub fn load(root: &Path, events: &EventSink) -> Result<Self, LibraryError> {
        let store = AssetStore::new(root);
        let tree = AlbumTree::new(root);
        tree.ensure_layout()?;

        let assets = store.load()?;
        let albums = tree.load(&assets, events)?;
        let protected = compute_protected(&tree, &assets, &albums)?;

        tracing::info!(
            "Loaded local library: {} assets, {} albums ({} archived)",
            assets.len(),
            albums.len(),
            albums.values().filter(|a| a.is_archived()).count()
        );

        Ok(Self {
            root: root.to_path_buf(),
            store,
            tree,
            assets,
            albums,
            protected,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether an archived album keeps this asset alive, exempting it from
    /// removal when the remote no longer lists it.
    pub fn linked_by_archived_album(&self, local: &LocalAsset) -> bool {
        self.protected.contains(&local.filename)
    }
}

/// Assets referenced by any archived album: directly (a surviving symlink
/// in an auto-archived album) or as the source of a copy, identified by
/// matching (size, mtime).
fn compute_protected(
    tree: &AlbumTree,
    assets: &HashMap<String, LocalAsset>,
    albums: &HashMap<String, LocalAlbum>,
) -> Result<HashSet<String>, LibraryError> {
    let mut by_identity: HashMap<(u64, i64), Vec<&str>> = HashMap::new();
    for asset in assets.values() {
        by_identity
            .entry((asset.size, asset.modified))
            .or_default()
            .push(&asset.filename);
    }

    let mut protected = HashSet::new();
    for album in albums.values().filter(|a| a.is_archived()) {
        for entry in tree.archived_contents(album)? {
            match entry {
                ArchivedEntry::Link(filename) => {
                    protected.insert(filename);
                }
                ArchivedEntry::Copy { size, modified } => {
                    if let Some(names) = by_identity.get(&(size, modified)) {
                        protected.extend(names.iter().map(|n| n.to_string()));
                    }
                }
            }
        }
    }
    Ok(protected)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn load_creates_layout() {
        let dir = tempdir().unwrap();
        let lib = PhotosLibrary::load(dir.path(), &EventSink::disconnected()).unwrap();
        assert!(dir.path().join(store::ASSET_DIR).is_dir());
        assert!(dir
            .path()
            .join(tree::ARCHIVE_DIR)
            .join(tree::STASH_DIR)
            .is_dir());
        assert!(dir
            .path()
            .join(tree::ARCHIVE_DIR)
            .join(tree::LOST_FOUND_DIR)
            .is_dir());
        assert!(lib.assets.is_empty());
        assert!(lib.albums.is_empty());
    }

    #[test]
    fn archived_copy_protects_matching_asset() {
        let dir = tempdir().unwrap();
        {
            let lib = PhotosLibrary::load(dir.path(), &EventSink::disconnected()).unwrap();
            // Store asset with a fixed mtime.
            std::fs::write(lib.store.asset_path("aaa.jpg"), b"abc").unwrap();
            store::set_mtime_millis(&lib.store.asset_path("aaa.jpg"), 1_000).unwrap();
            // Archived album holding a copy with identical size and mtime.
            lib.tree.create_album("U1", "Family", None).unwrap();
            let copy = dir.path().join(".U1").join("A.jpg");
            std::fs::write(&copy, b"abc").unwrap();
            store::set_mtime_millis(&copy, 1_000).unwrap();
            std::fs::write(dir.path().join(".U1").join(tree::ARCHIVED_SENTINEL), b"").unwrap();
        }

        let lib = PhotosLibrary::load(dir.path(), &EventSink::disconnected()).unwrap();
        let local = lib.assets.get("aaa.jpg").unwrap();
        assert!(lib.linked_by_archived_album(local));
    }

    #[test]
    fn archived_symlink_protects_target() {
        let dir = tempdir().unwrap();
        {
            let lib = PhotosLibrary::load(dir.path(), &EventSink::disconnected()).unwrap();
            std::fs::write(lib.store.asset_path("bbb.mov"), b"video").unwrap();
            lib.tree.create_album("U1", "Clips", None).unwrap();
            lib.tree.link_asset("U1", "B.mov", "bbb.mov").unwrap();
            // Stray user file auto-archives the album, keeping its links.
            std::fs::write(dir.path().join(".U1").join("notes.txt"), b"mine").unwrap();
        }

        let lib = PhotosLibrary::load(dir.path(), &EventSink::disconnected()).unwrap();
        let local = lib.assets.get("bbb.mov").unwrap();
        assert!(lib.linked_by_archived_album(local));
    }

    #[test]
    fn unarchived_assets_are_unprotected() {
        let dir = tempdir().unwrap();
        {
            let lib = PhotosLibrary::load(dir.path(), &EventSink::disconnected()).unwrap();
            std::fs::write(lib.store.asset_path("ccc.heic"), b"pic").unwrap();
            lib.tree.create_album("U1", "Family", None).unwrap();
            lib.tree.link_asset("U1", "C.heic", "ccc.heic").unwrap();
        }

        let lib = PhotosLibrary::load(dir.path(), &EventSink::disconnected()).unwrap();
        let local = lib.assets.get("ccc.heic").unwrap();
        assert!(!lib.linked_by_archived_album(local));
    }
}
