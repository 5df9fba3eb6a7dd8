//! Album model for the local projection.
//!
//! The album tree is encoded entirely in the filesystem: a dot-hidden
//! backing directory `.<uuid>/` per album at the library root, a
//! display-name symlink per album at its parent's location, and one symlink
//! per contained asset. Loading resolves that structure back into
//! [`LocalAlbum`] values.

use std::collections::BTreeMap;

/// Folder (contains sub-albums), album (contains assets), or an archived
/// album frozen on disk and invisible to the diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlbumKind {
    Folder,
    Album,
    Archived,
}

/// One album as loaded from the local tree.
#[derive(Debug, Clone)]
pub struct LocalAlbum {
    pub uuid: String,
    pub display_name: String,
    /// `None` for a root-level album.
    pub parent_uuid: Option<String>,
    pub kind: AlbumKind,
    /// link name → target filename in `_All-Photos/`. Empty for folders
    /// and archived albums.
    pub links: BTreeMap<String, String>,
    /// Whether the backing directory currently sits in `_Archive/.stash/`.
    pub stashed: bool,
}

impl LocalAlbum {
    pub fn is_archived(&self) -> bool {
        self.kind == AlbumKind::Archived
    }
}

/// The desired state of one album, derived from the remote listing.
/// `links` is already resolved to (pretty name → asset filename).
#[derive(Debug, Clone)]
pub struct DesiredAlbum {
    pub uuid: String,
    pub display_name: String,
    pub parent_uuid: Option<String>,
    pub kind: AlbumKind,
    pub links: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn archived_flag_tracks_kind() {
        let album = LocalAlbum {
            uuid: "U1".into(),
            display_name: "Family".into(),
            parent_uuid: None,
            kind: AlbumKind::Archived,
            links: BTreeMap::new(),
            stashed: false,
        };
        assert!(album.is_archived());
    }
}
