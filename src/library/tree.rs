//! Symlink-based album tree.
//!
//! Backing directories named `.<uuid>/` sit flat at the library root; the
//! user-visible hierarchy is built from display-name symlinks (at the root
//! for top-level albums, inside the parent's backing directory otherwise).
//! Asset membership is one relative symlink per asset into `_All-Photos/`.
//! The layout is the serialization format: loading it reconstructs the
//! complete album state with no side database.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::{Path, PathBuf};

use super::album::{AlbumKind, LocalAlbum};
use super::asset::LocalAsset;
use super::error::LibraryError;
use super::store::ASSET_DIR;
use crate::events::{EventSink, Report};

pub const ARCHIVE_DIR: &str = "_Archive";
pub const STASH_DIR: &str = ".stash";
pub const LOST_FOUND_DIR: &str = "Lost+Found";
/// Sentinel dot-file marking a deliberately archived album.
pub const ARCHIVED_SENTINEL: &str = ".archive";

#[cfg(unix)]
fn symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(not(unix))]
fn symlink(_target: &Path, _link: &Path) -> std::io::Result<()> {
    Err(std::io::Error::from(std::io::ErrorKind::Unsupported))
}

#[derive(Debug, Clone)]
pub struct AlbumTree {
    root: PathBuf,
}

impl AlbumTree {
    pub fn new(library_root: &Path) -> Self {
        Self {
            root: library_root.to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn backing_dir(&self, uuid: &str) -> PathBuf {
        self.root.join(format!(".{uuid}"))
    }

    fn stash_dir(&self, uuid: &str) -> PathBuf {
        self.root.join(ARCHIVE_DIR).join(STASH_DIR).join(uuid)
    }

    fn lost_found_dir(&self) -> PathBuf {
        self.root.join(ARCHIVE_DIR).join(LOST_FOUND_DIR)
    }

    /// Directory that holds the display-name symlink of an album with the
    /// given parent.
    fn parent_location(&self, parent_uuid: Option<&str>) -> PathBuf {
        match parent_uuid {
            Some(p) => self.backing_dir(p),
            None => self.root.clone(),
        }
    }

    pub fn ensure_layout(&self) -> Result<(), LibraryError> {
        for dir in [
            self.root.join(ARCHIVE_DIR).join(STASH_DIR),
            self.lost_found_dir(),
        ] {
            std::fs::create_dir_all(&dir)
                .map_err(|e| LibraryError::io(format!("Unable to create {}", dir.display()), e))?;
        }
        Ok(())
    }

    // ── Loading ─────────────────────────────────────────────────────────

    /// Reconstruct all albums from the link structure.
    ///
    /// A dangling display or asset link is removed with a warning. A backing
    /// directory containing any non-safe entry (not a symlink, not a
    /// dot-file) is reclassified ARCHIVED.
    pub fn load(
        &self,
        assets: &HashMap<String, LocalAsset>,
        events: &EventSink,
    ) -> Result<HashMap<String, LocalAlbum>, LibraryError> {
        let mut albums: HashMap<String, LocalAlbum> = HashMap::new();
        let mut queue: VecDeque<(String, String, Option<String>)> = VecDeque::new();

        // Root-level display links seed the traversal.
        for (name, uuid) in self.display_links_in(&self.root)? {
            queue.push_back((uuid, name, None));
        }

        while let Some((uuid, display_name, parent_uuid)) = queue.pop_front() {
            if albums.contains_key(&uuid) {
                // The remote guarantees a tree; a repeated UUID means a
                // manually created extra link. Keep the first sighting.
                events.warn(
                    Report::new("LIBRARY_WARNING", "Duplicate album link ignored")
                        .with("uuid", &uuid)
                        .with("name", &display_name),
                );
                continue;
            }

            let dir = self.backing_dir(&uuid);
            let mut kind = AlbumKind::Album;
            let mut links = BTreeMap::new();
            let mut children: Vec<(String, String)> = Vec::new();

            let entries = std::fs::read_dir(&dir)
                .map_err(|e| LibraryError::io(format!("Unable to read {}", dir.display()), e))?;
            for entry in entries {
                let entry =
                    entry.map_err(|e| LibraryError::io("Unable to read album entry", e))?;
                let name = entry.file_name().to_string_lossy().into_owned();
                let path = entry.path();
                let meta = std::fs::symlink_metadata(&path).map_err(|e| {
                    LibraryError::io(format!("Unable to stat {}", path.display()), e)
                })?;

                if meta.is_symlink() {
                    match classify_link(&path)? {
                        LinkTarget::Asset(filename) => {
                            if assets.contains_key(&filename) {
                                links.insert(name, filename);
                            } else {
                                events.warn(
                                    Report::new("LIBRARY_WARNING", "Removing dangling asset link")
                                        .with("album", &uuid)
                                        .with("link", &name),
                                );
                                let _ = std::fs::remove_file(&path);
                            }
                        }
                        LinkTarget::Album(child_uuid) => {
                            if self.backing_dir(&child_uuid).is_dir() {
                                children.push((child_uuid, name));
                            } else {
                                events.warn(
                                    Report::new("LIBRARY_WARNING", "Removing dangling album link")
                                        .with("album", &uuid)
                                        .with("link", &name),
                                );
                                let _ = std::fs::remove_file(&path);
                            }
                        }
                        LinkTarget::Other => {
                            events.warn(
                                Report::new("LIBRARY_WARNING", "Ignoring foreign symlink")
                                    .with("album", &uuid)
                                    .with("link", &name),
                            );
                        }
                    }
                } else if name == ARCHIVED_SENTINEL {
                    kind = AlbumKind::Archived;
                } else if name.starts_with('.') {
                    // Dot-files are safe (sentinels, editor droppings).
                } else {
                    // A real file or directory means the user put content
                    // here; freeze the album rather than risk deleting it.
                    if kind != AlbumKind::Archived {
                        events.warn(
                            Report::new("LIBRARY_WARNING", "Album contains non-safe file, treating as archived")
                                .with("album", &uuid)
                                .with("entry", &name),
                        );
                        kind = AlbumKind::Archived;
                    }
                }
            }

            if kind != AlbumKind::Archived && !children.is_empty() {
                kind = AlbumKind::Folder;
            }
            if kind == AlbumKind::Archived {
                // Archived content is frozen; its links are not membership.
                links.clear();
            }

            for (child_uuid, child_name) in children {
                queue.push_back((child_uuid, child_name, Some(uuid.clone())));
            }

            albums.insert(
                uuid.clone(),
                LocalAlbum {
                    uuid,
                    display_name,
                    parent_uuid,
                    kind,
                    links,
                    stashed: false,
                },
            );
        }

        // Stashed archived albums wait for their parent to reappear.
        let stash_root = self.root.join(ARCHIVE_DIR).join(STASH_DIR);
        if stash_root.is_dir() {
            let entries = std::fs::read_dir(&stash_root).map_err(|e| {
                LibraryError::io(format!("Unable to read {}", stash_root.display()), e)
            })?;
            for entry in entries {
                let entry =
                    entry.map_err(|e| LibraryError::io("Unable to read stash entry", e))?;
                if !entry.path().is_dir() {
                    continue;
                }
                let uuid = entry.file_name().to_string_lossy().into_owned();
                albums.insert(
                    uuid.clone(),
                    LocalAlbum {
                        display_name: uuid.clone(),
                        uuid,
                        parent_uuid: None,
                        kind: AlbumKind::Archived,
                        links: BTreeMap::new(),
                        stashed: true,
                    },
                );
            }
        }

        Ok(albums)
    }

    /// Display-name symlinks (name → target uuid) directly inside `dir`.
    fn display_links_in(&self, dir: &Path) -> Result<Vec<(String, String)>, LibraryError> {
        let mut found = Vec::new();
        let entries = std::fs::read_dir(dir)
            .map_err(|e| LibraryError::io(format!("Unable to read {}", dir.display()), e))?;
        for entry in entries {
            let entry = entry.map_err(|e| LibraryError::io("Unable to read root entry", e))?;
            let path = entry.path();
            let meta = std::fs::symlink_metadata(&path)
                .map_err(|e| LibraryError::io(format!("Unable to stat {}", path.display()), e))?;
            if !meta.is_symlink() {
                continue;
            }
            if let LinkTarget::Album(uuid) = classify_link(&path)? {
                if self.backing_dir(&uuid).is_dir() {
                    found.push((entry.file_name().to_string_lossy().into_owned(), uuid));
                } else {
                    tracing::warn!("Removing dangling album link {}", path.display());
                    let _ = std::fs::remove_file(&path);
                }
            }
        }
        Ok(found)
    }

    // ── Mutations ───────────────────────────────────────────────────────

    /// Create the backing directory and display link for an album. The
    /// parent's backing directory must already exist (creation order is
    /// parent before child). Idempotent.
    pub fn create_album(
        &self,
        uuid: &str,
        display_name: &str,
        parent_uuid: Option<&str>,
    ) -> Result<(), LibraryError> {
        let dir = self.backing_dir(uuid);
        std::fs::create_dir_all(&dir)
            .map_err(|e| LibraryError::io(format!("Unable to create {}", dir.display()), e))?;
        self.create_display_link(uuid, display_name, parent_uuid)
    }

    fn create_display_link(
        &self,
        uuid: &str,
        display_name: &str,
        parent_uuid: Option<&str>,
    ) -> Result<(), LibraryError> {
        let location = self.parent_location(parent_uuid).join(display_name);
        let target = match parent_uuid {
            Some(_) => PathBuf::from(format!("../.{uuid}")),
            None => PathBuf::from(format!(".{uuid}")),
        };
        ensure_symlink(&location, &target)
    }

    /// Remove an album's display link and backing directory. Only safe for
    /// non-archived albums, whose contents are just links.
    pub fn delete_album(&self, album: &LocalAlbum) -> Result<(), LibraryError> {
        let link = self
            .parent_location(album.parent_uuid.as_deref())
            .join(&album.display_name);
        match std::fs::remove_file(&link) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(LibraryError::io(
                    format!("Unable to remove {}", link.display()),
                    e,
                ))
            }
        }
        let dir = self.backing_dir(&album.uuid);
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(LibraryError::io(
                format!("Unable to remove {}", dir.display()),
                e,
            )),
        }
    }

    /// Re-home an album under a new parent by moving its display link. The
    /// backing directory stays put, so contained links survive untouched.
    pub fn move_album(
        &self,
        album: &LocalAlbum,
        new_parent: Option<&str>,
        new_display_name: &str,
    ) -> Result<(), LibraryError> {
        let old = self
            .parent_location(album.parent_uuid.as_deref())
            .join(&album.display_name);
        match std::fs::remove_file(&old) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(LibraryError::io(
                    format!("Unable to remove {}", old.display()),
                    e,
                ))
            }
        }
        self.create_display_link(&album.uuid, new_display_name, new_parent)
    }

    /// Park an archived album in `_Archive/.stash/` while its parent is
    /// missing from the local tree.
    pub fn stash_album(&self, album: &LocalAlbum) -> Result<(), LibraryError> {
        let link = self
            .parent_location(album.parent_uuid.as_deref())
            .join(&album.display_name);
        let _ = std::fs::remove_file(&link);
        let from = self.backing_dir(&album.uuid);
        let to = self.stash_dir(&album.uuid);
        std::fs::rename(&from, &to).map_err(|e| {
            LibraryError::io(
                format!("Unable to stash {} into {}", from.display(), to.display()),
                e,
            )
        })
    }

    /// Pull a stashed album back under a (re)extant parent.
    pub fn recover_album(
        &self,
        uuid: &str,
        display_name: &str,
        parent_uuid: Option<&str>,
    ) -> Result<(), LibraryError> {
        let from = self.stash_dir(uuid);
        let to = self.backing_dir(uuid);
        std::fs::rename(&from, &to).map_err(|e| {
            LibraryError::io(
                format!("Unable to recover {} from stash", uuid),
                e,
            )
        })?;
        self.create_display_link(uuid, display_name, parent_uuid)
    }

    /// Move an album whose remote counterpart disappeared into
    /// `_Archive/Lost+Found/`, keeping its content. The destination name is
    /// suffixed with the UUID on collision.
    pub fn relocate_to_lost_found(&self, album: &LocalAlbum) -> Result<(), LibraryError> {
        let link = self
            .parent_location(album.parent_uuid.as_deref())
            .join(&album.display_name);
        let _ = std::fs::remove_file(&link);

        let from = if album.stashed {
            self.stash_dir(&album.uuid)
        } else {
            self.backing_dir(&album.uuid)
        };
        let mut to = self.lost_found_dir().join(&album.display_name);
        if to.exists() {
            to = self
                .lost_found_dir()
                .join(format!("{}-{}", album.display_name, album.uuid));
        }
        std::fs::rename(&from, &to).map_err(|e| {
            LibraryError::io(
                format!("Unable to move {} to {}", from.display(), to.display()),
                e,
            )
        })
    }

    /// Link one asset into an album under its pretty name. Idempotent; a
    /// link of the same name pointing elsewhere is replaced.
    pub fn link_asset(
        &self,
        album_uuid: &str,
        link_name: &str,
        asset_filename: &str,
    ) -> Result<(), LibraryError> {
        let link = self.backing_dir(album_uuid).join(link_name);
        let target = PathBuf::from(format!("../{ASSET_DIR}/{asset_filename}"));
        ensure_symlink(&link, &target)
    }

    pub fn unlink_asset(&self, album_uuid: &str, link_name: &str) -> Result<(), LibraryError> {
        let link = self.backing_dir(album_uuid).join(link_name);
        match std::fs::remove_file(&link) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(LibraryError::io(
                format!("Unable to remove {}", link.display()),
                e,
            )),
        }
    }

    /// Filesystem location of an album's backing directory, accounting for
    /// a stashed album living under `_Archive/.stash/`.
    pub fn album_dir(&self, album: &LocalAlbum) -> PathBuf {
        if album.stashed {
            self.stash_dir(&album.uuid)
        } else {
            self.backing_dir(&album.uuid)
        }
    }

    /// Inventory of an archived album's contents, used to decide which
    /// store assets it keeps alive: surviving symlinks protect their target
    /// directly, copied files protect by (size, mtime) identity.
    pub fn archived_contents(
        &self,
        album: &LocalAlbum,
    ) -> Result<Vec<ArchivedEntry>, LibraryError> {
        let dir = self.album_dir(album);
        let mut out = Vec::new();
        let entries = std::fs::read_dir(&dir)
            .map_err(|e| LibraryError::io(format!("Unable to read {}", dir.display()), e))?;
        for entry in entries {
            let entry = entry.map_err(|e| LibraryError::io("Unable to read archive entry", e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            let path = entry.path();
            let meta = std::fs::symlink_metadata(&path)
                .map_err(|e| LibraryError::io(format!("Unable to stat {}", path.display()), e))?;
            if meta.is_symlink() {
                if let LinkTarget::Asset(filename) = classify_link(&path)? {
                    out.push(ArchivedEntry::Link(filename));
                }
            } else if meta.is_file() {
                out.push(ArchivedEntry::Copy {
                    size: meta.len(),
                    modified: super::store::mtime_millis(&meta),
                });
            }
        }
        Ok(out)
    }

    /// Resolve a user-supplied path to the album it names. The path must be
    /// a display-name symlink pointing at a backing directory of this
    /// library.
    pub fn resolve_album_path(&self, path: &Path) -> Result<String, LibraryError> {
        let meta = std::fs::symlink_metadata(path)
            .map_err(|e| LibraryError::io(format!("Unable to stat {}", path.display()), e))?;
        if !meta.is_symlink() {
            return Err(LibraryError::NotAnAlbum(path.to_path_buf()));
        }
        match classify_link(path)? {
            LinkTarget::Album(uuid) if self.backing_dir(&uuid).is_dir() => Ok(uuid),
            _ => Err(LibraryError::NotAnAlbum(path.to_path_buf())),
        }
    }
}

/// What an archived album directory holds, as far as asset protection is
/// concerned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchivedEntry {
    /// Still a symlink into `_All-Photos/` (auto-archived album).
    Link(String),
    /// A real file copied out of the store at archive time.
    Copy { size: u64, modified: i64 },
}

/// What a symlink inside the library points at.
enum LinkTarget {
    /// `../_All-Photos/<filename>` (or root-relative equivalent).
    Asset(String),
    /// `.<uuid>` or `../.<uuid>`.
    Album(String),
    Other,
}

fn classify_link(link: &Path) -> Result<LinkTarget, LibraryError> {
    let target = std::fs::read_link(link)
        .map_err(|e| LibraryError::io(format!("Unable to read link {}", link.display()), e))?;

    let mut components = target
        .components()
        .filter_map(|c| match c {
            std::path::Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>();

    if components.len() == 2 && components[0] == ASSET_DIR {
        return Ok(LinkTarget::Asset(components.remove(1)));
    }
    if components.len() == 1 {
        if let Some(uuid) = components[0].strip_prefix('.') {
            if !uuid.is_empty() {
                return Ok(LinkTarget::Album(uuid.to_string()));
            }
        }
    }
    Ok(LinkTarget::Other)
}

/// Create `link` → `target`, replacing an existing symlink that points
/// elsewhere. A non-symlink in the way is an error.
fn ensure_symlink(link: &Path, target: &Path) -> Result<(), LibraryError> {
    match std::fs::symlink_metadata(link) {
        Ok(meta) if meta.is_symlink() => {
            let existing = std::fs::read_link(link)
                .map_err(|e| LibraryError::io(format!("Unable to read {}", link.display()), e))?;
            if existing.as_path() == target {
                return Ok(());
            }
            std::fs::remove_file(link)
                .map_err(|e| LibraryError::io(format!("Unable to replace {}", link.display()), e))?;
        }
        Ok(_) => return Err(LibraryError::Conflict(link.to_path_buf())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(LibraryError::io(
                format!("Unable to stat {}", link.display()),
                e,
            ))
        }
    }
    symlink(target, link).map_err(|e| {
        if e.kind() == std::io::ErrorKind::Unsupported {
            LibraryError::SymlinksUnsupported
        } else {
            LibraryError::io(
                format!("Unable to link {} -> {}", link.display(), target.display()),
                e,
            )
        }
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn setup(root: &Path) -> (AlbumTree, HashMap<String, LocalAsset>) {
        let tree = AlbumTree::new(root);
        tree.ensure_layout().unwrap();
        std::fs::create_dir_all(root.join(ASSET_DIR)).unwrap();
        (tree, HashMap::new())
    }

    fn add_asset(root: &Path, assets: &mut HashMap<String, LocalAsset>, name: &str) {
        std::fs::write(root.join(ASSET_DIR).join(name), b"x").unwrap();
        assets.insert(
            name.to_string(),
            LocalAsset {
                filename: name.to_string(),
                size: 1,
                modified: 0,
            },
        );
    }

    #[test]
    fn create_and_load_round_trip() {
        let dir = tempdir().unwrap();
        let (tree, mut assets) = setup(dir.path());
        add_asset(dir.path(), &mut assets, "aaa.jpg");

        tree.create_album("U2", "People", None).unwrap();
        tree.create_album("U1", "Family", Some("U2")).unwrap();
        tree.link_asset("U1", "A.jpg", "aaa.jpg").unwrap();

        let albums = tree.load(&assets, &EventSink::disconnected()).unwrap();
        assert_eq!(albums.len(), 2);
        let people = &albums["U2"];
        assert_eq!(people.kind, AlbumKind::Folder);
        assert_eq!(people.parent_uuid, None);
        let family = &albums["U1"];
        assert_eq!(family.parent_uuid.as_deref(), Some("U2"));
        assert_eq!(family.kind, AlbumKind::Album);
        assert_eq!(family.links.get("A.jpg").unwrap(), "aaa.jpg");
    }

    #[test]
    fn create_album_is_idempotent() {
        let dir = tempdir().unwrap();
        let (tree, assets) = setup(dir.path());
        tree.create_album("U1", "Family", None).unwrap();
        tree.create_album("U1", "Family", None).unwrap();
        let albums = tree.load(&assets, &EventSink::disconnected()).unwrap();
        assert_eq!(albums.len(), 1);
    }

    #[test]
    fn link_asset_replaces_divergent_target() {
        let dir = tempdir().unwrap();
        let (tree, mut assets) = setup(dir.path());
        add_asset(dir.path(), &mut assets, "aaa.jpg");
        add_asset(dir.path(), &mut assets, "bbb.jpg");

        tree.create_album("U1", "Family", None).unwrap();
        tree.link_asset("U1", "A.jpg", "aaa.jpg").unwrap();
        tree.link_asset("U1", "A.jpg", "bbb.jpg").unwrap();

        let albums = tree.load(&assets, &EventSink::disconnected()).unwrap();
        assert_eq!(albums["U1"].links.get("A.jpg").unwrap(), "bbb.jpg");
    }

    #[test]
    fn non_safe_file_archives_album() {
        let dir = tempdir().unwrap();
        let (tree, mut assets) = setup(dir.path());
        add_asset(dir.path(), &mut assets, "aaa.jpg");
        tree.create_album("U1", "Family", None).unwrap();
        tree.link_asset("U1", "A.jpg", "aaa.jpg").unwrap();
        std::fs::write(dir.path().join(".U1").join("notes.txt"), b"mine").unwrap();

        let albums = tree.load(&assets, &EventSink::disconnected()).unwrap();
        assert_eq!(albums["U1"].kind, AlbumKind::Archived);
        assert!(albums["U1"].links.is_empty());
    }

    #[test]
    fn sentinel_archives_album() {
        let dir = tempdir().unwrap();
        let (tree, assets) = setup(dir.path());
        tree.create_album("U1", "Family", None).unwrap();
        std::fs::write(dir.path().join(".U1").join(ARCHIVED_SENTINEL), b"").unwrap();

        let albums = tree.load(&assets, &EventSink::disconnected()).unwrap();
        assert_eq!(albums["U1"].kind, AlbumKind::Archived);
    }

    #[test]
    fn dangling_asset_link_is_removed_on_load() {
        let dir = tempdir().unwrap();
        let (tree, assets) = setup(dir.path());
        tree.create_album("U1", "Family", None).unwrap();
        tree.link_asset("U1", "A.jpg", "gone.jpg").unwrap();

        let albums = tree.load(&assets, &EventSink::disconnected()).unwrap();
        assert!(albums["U1"].links.is_empty());
        assert!(!dir.path().join(".U1").join("A.jpg").exists());
    }

    #[test]
    fn move_album_rewrites_display_link_only() {
        let dir = tempdir().unwrap();
        let (tree, mut assets) = setup(dir.path());
        add_asset(dir.path(), &mut assets, "aaa.jpg");
        tree.create_album("U1", "Family", None).unwrap();
        tree.link_asset("U1", "A.jpg", "aaa.jpg").unwrap();
        tree.create_album("U2", "People", None).unwrap();

        let albums = tree.load(&assets, &EventSink::disconnected()).unwrap();
        tree.move_album(&albums["U1"], Some("U2"), "Family").unwrap();

        let albums = tree.load(&assets, &EventSink::disconnected()).unwrap();
        assert_eq!(albums["U1"].parent_uuid.as_deref(), Some("U2"));
        // Asset links inside the backing dir are untouched by the move.
        assert_eq!(albums["U1"].links.get("A.jpg").unwrap(), "aaa.jpg");
    }

    #[test]
    fn delete_album_removes_link_and_backing_dir() {
        let dir = tempdir().unwrap();
        let (tree, assets) = setup(dir.path());
        tree.create_album("U1", "Family", None).unwrap();
        let albums = tree.load(&assets, &EventSink::disconnected()).unwrap();
        tree.delete_album(&albums["U1"]).unwrap();
        assert!(!dir.path().join("Family").exists());
        assert!(!dir.path().join(".U1").exists());
        assert!(tree.load(&assets, &EventSink::disconnected()).unwrap().is_empty());
    }

    #[test]
    fn stash_and_recover_round_trip() {
        let dir = tempdir().unwrap();
        let (tree, assets) = setup(dir.path());
        tree.create_album("U1", "Family", None).unwrap();
        std::fs::write(dir.path().join(".U1").join("photo.jpg"), b"copy").unwrap();

        let albums = tree.load(&assets, &EventSink::disconnected()).unwrap();
        tree.stash_album(&albums["U1"]).unwrap();
        assert!(dir
            .path()
            .join(ARCHIVE_DIR)
            .join(STASH_DIR)
            .join("U1")
            .is_dir());

        let albums = tree.load(&assets, &EventSink::disconnected()).unwrap();
        assert!(albums["U1"].stashed);

        tree.create_album("U2", "People", None).unwrap();
        tree.recover_album("U1", "Family", Some("U2")).unwrap();
        let albums = tree.load(&assets, &EventSink::disconnected()).unwrap();
        assert!(!albums["U1"].stashed);
        assert_eq!(albums["U1"].parent_uuid.as_deref(), Some("U2"));
        assert!(dir.path().join(".U1").join("photo.jpg").exists());
    }

    #[test]
    fn lost_found_keeps_content() {
        let dir = tempdir().unwrap();
        let (tree, assets) = setup(dir.path());
        tree.create_album("U1", "Family", None).unwrap();
        std::fs::write(dir.path().join(".U1").join("photo.jpg"), b"copy").unwrap();

        let albums = tree.load(&assets, &EventSink::disconnected()).unwrap();
        tree.relocate_to_lost_found(&albums["U1"]).unwrap();

        let relocated = dir
            .path()
            .join(ARCHIVE_DIR)
            .join(LOST_FOUND_DIR)
            .join("Family");
        assert!(relocated.join("photo.jpg").exists());
        assert!(tree.load(&assets, &EventSink::disconnected()).unwrap().is_empty());
    }

    #[test]
    fn resolve_album_path_accepts_only_album_links() {
        let dir = tempdir().unwrap();
        let (tree, _) = setup(dir.path());
        tree.create_album("U1", "Family", None).unwrap();

        let uuid = tree.resolve_album_path(&dir.path().join("Family")).unwrap();
        assert_eq!(uuid, "U1");

        std::fs::write(dir.path().join("plain.txt"), b"x").unwrap();
        assert!(matches!(
            tree.resolve_album_path(&dir.path().join("plain.txt")),
            Err(LibraryError::NotAnAlbum(_))
        ));
    }
}
