//! Pure plan computation: the three-way diff between the remote listing
//! and the local projection.
//!
//! No I/O happens here. The planner emits exactly the operations whose
//! postcondition does not already hold, which is what makes a repeated
//! sync a no-op and a crashed sync restartable: whatever the previous run
//! completed simply stops appearing in the next plan.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::library::album::{AlbumKind, DesiredAlbum, LocalAlbum};
use crate::library::asset::Asset;
use crate::library::PhotosLibrary;
use crate::photos::records::RemoteAlbum;

/// A display-link move: same backing directory, new location or name.
#[derive(Debug, Clone)]
pub struct AlbumMove {
    pub uuid: String,
    pub new_parent: Option<String>,
    pub new_display_name: String,
}

/// One symlink reconciliation inside an album.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkOp {
    pub album_uuid: String,
    pub link_name: String,
    /// Target filename in `_All-Photos/`; empty for removals.
    pub target: String,
}

/// The minimal operation set reconciling local with remote.
#[derive(Debug, Default)]
pub struct SyncPlan {
    /// Assets to download (missing locally, or present with wrong size).
    pub assets_to_add: Vec<Asset>,
    /// Local filenames with no remote counterpart and no archive
    /// protection. Removed last.
    pub assets_to_remove: Vec<String>,
    /// Creation order is parent before child.
    pub albums_to_add: Vec<DesiredAlbum>,
    /// Applied after creations, before deletions.
    pub albums_to_move: Vec<AlbumMove>,
    /// Stashed archived albums whose parent is available again.
    pub albums_to_recover: Vec<AlbumMove>,
    /// Archived albums whose remote parent is currently missing.
    pub albums_to_stash: Vec<String>,
    /// Removal order is leaf before parent.
    pub albums_to_remove: Vec<String>,
    /// Archived albums whose remote counterpart disappeared.
    pub albums_to_lost_found: Vec<String>,
    pub links_to_add: Vec<LinkOp>,
    pub links_to_remove: Vec<LinkOp>,
    /// Record names of remote assets that could not be planned
    /// (undecodable checksum); surfaced as warnings by the caller.
    pub unplannable: Vec<String>,
}

impl SyncPlan {
    pub fn is_empty(&self) -> bool {
        self.assets_to_add.is_empty()
            && self.assets_to_remove.is_empty()
            && self.albums_to_add.is_empty()
            && self.albums_to_move.is_empty()
            && self.albums_to_recover.is_empty()
            && self.albums_to_stash.is_empty()
            && self.albums_to_remove.is_empty()
            && self.albums_to_lost_found.is_empty()
            && self.links_to_add.is_empty()
            && self.links_to_remove.is_empty()
    }
}

/// Compute the plan. `remote_assets` carries every origin variant as its
/// own entry; `remote_albums` is the reachable album forest.
pub fn compute_plan(
    remote_assets: &[Asset],
    remote_albums: &[RemoteAlbum],
    library: &PhotosLibrary,
) -> SyncPlan {
    let mut plan = SyncPlan::default();

    // Remote assets keyed by their content-addressed filename, and grouped
    // by master record for album link resolution.
    let mut remote_by_filename: HashMap<String, &Asset> = HashMap::new();
    let mut remote_by_record: HashMap<&str, Vec<(&Asset, String)>> = HashMap::new();
    for asset in remote_assets {
        let filename = match asset.asset_filename() {
            Ok(f) => f,
            Err(_) => {
                plan.unplannable.push(asset.record_name.clone());
                continue;
            }
        };
        remote_by_record
            .entry(asset.record_name.as_str())
            .or_default()
            .push((asset, filename.clone()));
        remote_by_filename.entry(filename).or_insert(asset);
    }

    // ── Asset diff ──────────────────────────────────────────────────────
    for (filename, asset) in &remote_by_filename {
        match library.assets.get(filename) {
            Some(local) if local.size == asset.size => {}
            _ => plan.assets_to_add.push((*asset).clone()),
        }
    }
    for (filename, local) in &library.assets {
        if !remote_by_filename.contains_key(filename) && !library.linked_by_archived_album(local) {
            plan.assets_to_remove.push(filename.clone());
        }
    }
    plan.assets_to_add
        .sort_by(|a, b| a.record_name.cmp(&b.record_name));
    plan.assets_to_remove.sort();

    // ── Album diff, three-way by UUID ───────────────────────────────────
    let remote_by_uuid: HashMap<&str, &RemoteAlbum> =
        remote_albums.iter().map(|a| (a.uuid.as_str(), a)).collect();

    // Desired link set per remote plain album.
    let desired_links = |album: &RemoteAlbum| -> BTreeMap<String, String> {
        let mut links = BTreeMap::new();
        for record_name in &album.asset_record_names {
            for (asset, filename) in remote_by_record
                .get(record_name.as_str())
                .into_iter()
                .flatten()
            {
                let mut name = asset.pretty_filename();
                if let Some(existing) = links.get(&name) {
                    if existing == filename {
                        continue;
                    }
                    // Display-name collision between distinct assets:
                    // disambiguate with the checksum stem.
                    let stem = filename.split('.').next().unwrap_or("x");
                    name = match name.rsplit_once('.') {
                        Some((base, ext)) => format!("{base}-{stem}.{ext}"),
                        None => format!("{name}-{stem}"),
                    };
                }
                links.insert(name, filename.clone());
            }
        }
        links
    };

    // Added, created parent-before-child.
    for album in remote_albums {
        // remote_albums arrives in DFS order, so walking it in order is
        // already a topological order by parent.
        match library.albums.get(&album.uuid) {
            None => {
                let links = desired_links(album);
                for (name, target) in &links {
                    plan.links_to_add.push(LinkOp {
                        album_uuid: album.uuid.clone(),
                        link_name: name.clone(),
                        target: target.clone(),
                    });
                }
                plan.albums_to_add.push(DesiredAlbum {
                    uuid: album.uuid.clone(),
                    display_name: album.display_name.clone(),
                    parent_uuid: album.parent_uuid.clone(),
                    kind: if album.folder {
                        AlbumKind::Folder
                    } else {
                        AlbumKind::Album
                    },
                    links,
                });
            }
            Some(local) if local.is_archived() => {
                plan_archived_album(&mut plan, local, album, &remote_by_uuid, library);
            }
            Some(local) => {
                // Moved or renamed.
                if local.parent_uuid != album.parent_uuid
                    || local.display_name != album.display_name
                {
                    plan.albums_to_move.push(AlbumMove {
                        uuid: album.uuid.clone(),
                        new_parent: album.parent_uuid.clone(),
                        new_display_name: album.display_name.clone(),
                    });
                }
                // Content-changed.
                if !album.folder {
                    let desired = desired_links(album);
                    for (name, target) in &desired {
                        if local.links.get(name) != Some(target) {
                            plan.links_to_add.push(LinkOp {
                                album_uuid: album.uuid.clone(),
                                link_name: name.clone(),
                                target: target.clone(),
                            });
                        }
                    }
                    for name in local.links.keys() {
                        if !desired.contains_key(name) {
                            plan.links_to_remove.push(LinkOp {
                                album_uuid: album.uuid.clone(),
                                link_name: name.clone(),
                                target: String::new(),
                            });
                        }
                    }
                }
            }
        }
    }

    // Removed, leaf-first by local depth.
    let mut removals: Vec<&LocalAlbum> = library
        .albums
        .values()
        .filter(|local| !remote_by_uuid.contains_key(local.uuid.as_str()))
        .collect();
    removals.sort_by_key(|a| std::cmp::Reverse(local_depth(library, a)));
    for local in removals {
        if local.is_archived() {
            plan.albums_to_lost_found.push(local.uuid.clone());
        } else {
            plan.albums_to_remove.push(local.uuid.clone());
        }
    }

    plan
}

/// Archived albums are exempt from content reconciliation, but they do
/// follow remote moves: to the new parent when it exists, into the stash
/// while the parent is missing, and back out once it reappears.
fn plan_archived_album(
    plan: &mut SyncPlan,
    local: &LocalAlbum,
    remote: &RemoteAlbum,
    remote_by_uuid: &HashMap<&str, &RemoteAlbum>,
    library: &PhotosLibrary,
) {
    let parent_available = match remote.parent_uuid.as_deref() {
        None => true,
        Some(p) => remote_by_uuid.contains_key(p) || library.albums.contains_key(p),
    };

    if local.stashed {
        if parent_available {
            plan.albums_to_recover.push(AlbumMove {
                uuid: remote.uuid.clone(),
                new_parent: remote.parent_uuid.clone(),
                new_display_name: remote.display_name.clone(),
            });
        }
        return;
    }

    if !parent_available {
        plan.albums_to_stash.push(local.uuid.clone());
        return;
    }

    if local.parent_uuid != remote.parent_uuid || local.display_name != remote.display_name {
        plan.albums_to_move.push(AlbumMove {
            uuid: remote.uuid.clone(),
            new_parent: remote.parent_uuid.clone(),
            new_display_name: remote.display_name.clone(),
        });
    }
}

fn local_depth(library: &PhotosLibrary, album: &LocalAlbum) -> usize {
    let mut depth = 0;
    let mut cursor = album.parent_uuid.as_deref();
    let mut seen: HashSet<&str> = HashSet::new();
    while let Some(parent) = cursor {
        if !seen.insert(parent) {
            break;
        }
        depth += 1;
        cursor = library
            .albums
            .get(parent)
            .and_then(|a| a.parent_uuid.as_deref());
    }
    depth
}
