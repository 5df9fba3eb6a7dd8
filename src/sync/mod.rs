//! The sync engine: fetch remote state, diff against the local projection,
//! apply the plan in phases.
//!
//! One `sync()` call is the transaction. Remote fetches come first, then
//! the local load, then the pure plan, then application in a fixed order:
//! downloads, album structure (create → recover → move → stash →
//! lost+found → delete), link reconciliation, asset removal. Every step is
//! a no-op when its postcondition already holds, so a crashed run is
//! simply resumed by the next one.

pub mod download;
pub mod error;
pub mod plan;

use std::path::Path;

use tokio_util::sync::CancellationToken;

use crate::events::{EventSink, Report};
use crate::library::PhotosLibrary;
use crate::photos::PhotosClient;
use crate::retry::Backoff;
use crate::shutdown::Interrupted;
use download::download_assets;
use error::SyncError;
use plan::{compute_plan, SyncPlan};

/// Engine knobs, resolved from CLI/env by the caller.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Bounded download concurrency (`--download-threads`).
    pub download_threads: usize,
    /// Full-sync retries on fatal errors.
    pub max_retry: u32,
    /// Per-asset download retry/backoff.
    pub backoff: Backoff,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            download_threads: 16,
            max_retry: 2,
            backoff: Backoff::default(),
        }
    }
}

/// Counts reported after a sync.
#[derive(Debug, Default, Clone)]
pub struct SyncSummary {
    pub assets_downloaded: u64,
    pub assets_skipped: u64,
    pub assets_removed: u64,
    pub albums_created: u64,
    pub albums_removed: u64,
    pub albums_moved: u64,
    pub links_added: u64,
    pub links_removed: u64,
}

pub struct SyncEngine<'a> {
    pub photos: &'a PhotosClient,
    pub config: &'a SyncConfig,
    pub events: &'a EventSink,
    pub cancel: &'a CancellationToken,
}

impl SyncEngine<'_> {
    /// Run one complete sync transaction against `data_dir`.
    pub async fn sync(&self, data_dir: &Path) -> Result<SyncSummary, SyncError> {
        let remote_albums = self.photos.fetch_all_albums(self.events).await?;
        let fetch = self
            .photos
            .fetch_all_assets(&remote_albums, self.events)
            .await?;
        self.checkpoint()?;

        let library = PhotosLibrary::load(data_dir, self.events)?;
        let plan = compute_plan(&fetch.assets, &remote_albums, &library);
        for record_name in &plan.unplannable {
            self.events.warn(
                Report::new("SYNC_WARNING", "Asset not plannable, skipping")
                    .with("recordName", record_name),
            );
        }

        if plan.is_empty() {
            tracing::info!("Local library already matches remote");
            return Ok(SyncSummary::default());
        }
        tracing::info!(
            "Plan: {} downloads, {} asset removals, {} album creations, {} album removals, {} link ops",
            plan.assets_to_add.len(),
            plan.assets_to_remove.len(),
            plan.albums_to_add.len(),
            plan.albums_to_remove.len(),
            plan.links_to_add.len() + plan.links_to_remove.len(),
        );

        // ── Phase 1: downloads ──────────────────────────────────────────
        let stats = download_assets(
            self.photos,
            &library.store,
            &fetch.handles,
            plan.assets_to_add.clone(),
            self.config.download_threads,
            &self.config.backoff,
            self.events,
            self.cancel,
        )
        .await?;
        self.checkpoint()?;

        // ── Phases 2–4: structure, links, removals ──────────────────────
        let mut summary = apply_plan(&library, &plan, self.events)?;
        summary.assets_downloaded = stats.downloaded;
        summary.assets_skipped = stats.skipped;

        tracing::info!(
            "Sync done: {} downloaded, {} skipped, {} removed, {} albums created, {} albums removed",
            summary.assets_downloaded,
            summary.assets_skipped,
            summary.assets_removed,
            summary.albums_created,
            summary.albums_removed,
        );
        Ok(summary)
    }

    /// Run `sync()` with whole-sync retries, refreshing the session between
    /// attempts. Interrupts are never retried.
    pub async fn sync_with_retry(&self, data_dir: &Path) -> Result<SyncSummary, SyncError> {
        let attempts = self.config.max_retry + 1;
        let mut last: Option<SyncError> = None;
        for attempt in 0..attempts {
            if attempt > 0 {
                self.events.warn(
                    Report::new("SYNC_WARNING", "Retrying full sync after fatal error")
                        .with("attempt", attempt + 1),
                );
                if let Err(e) = self.photos.force_reauth().await {
                    tracing::warn!("Session refresh before retry failed: {}", e);
                }
            }
            match self.sync(data_dir).await {
                Ok(summary) => return Ok(summary),
                Err(SyncError::Interrupted(i)) => return Err(SyncError::Interrupted(i)),
                Err(e) => {
                    tracing::error!("Sync attempt {} failed: {}", attempt + 1, e);
                    last = Some(e);
                }
            }
        }
        Err(last.expect("at least one attempt ran"))
    }

    fn checkpoint(&self) -> Result<(), SyncError> {
        if self.cancel.is_cancelled() {
            Err(Interrupted.into())
        } else {
            Ok(())
        }
    }
}

/// Apply the non-download phases of a plan. Split from `sync()` so the
/// filesystem semantics are testable without a network.
pub fn apply_plan(
    library: &PhotosLibrary,
    plan: &SyncPlan,
    events: &EventSink,
) -> Result<SyncSummary, SyncError> {
    let mut summary = SyncSummary::default();

    // Album structure. Creation order is parent-before-child by plan
    // construction.
    for album in &plan.albums_to_add {
        library
            .tree
            .create_album(&album.uuid, &album.display_name, album.parent_uuid.as_deref())?;
        summary.albums_created += 1;
    }
    for mv in &plan.albums_to_recover {
        library
            .tree
            .recover_album(&mv.uuid, &mv.new_display_name, mv.new_parent.as_deref())?;
        summary.albums_moved += 1;
    }
    for mv in &plan.albums_to_move {
        let local = library
            .albums
            .get(&mv.uuid)
            .ok_or_else(|| crate::library::error::LibraryError::UnknownAlbum(mv.uuid.clone()))?;
        library
            .tree
            .move_album(local, mv.new_parent.as_deref(), &mv.new_display_name)?;
        summary.albums_moved += 1;
    }
    for uuid in &plan.albums_to_stash {
        let local = library
            .albums
            .get(uuid)
            .ok_or_else(|| crate::library::error::LibraryError::UnknownAlbum(uuid.clone()))?;
        events.warn(
            Report::new("LIBRARY_WARNING", "Stashing archived album with missing parent")
                .with("uuid", uuid),
        );
        library.tree.stash_album(local)?;
    }
    for uuid in &plan.albums_to_lost_found {
        let local = library
            .albums
            .get(uuid)
            .ok_or_else(|| crate::library::error::LibraryError::UnknownAlbum(uuid.clone()))?;
        events.warn(
            Report::new("LIBRARY_WARNING", "Remote album disappeared, keeping archive in Lost+Found")
                .with("uuid", uuid)
                .with("name", &local.display_name),
        );
        library.tree.relocate_to_lost_found(local)?;
    }
    for uuid in &plan.albums_to_remove {
        let local = library
            .albums
            .get(uuid)
            .ok_or_else(|| crate::library::error::LibraryError::UnknownAlbum(uuid.clone()))?;
        library.tree.delete_album(local)?;
        summary.albums_removed += 1;
    }

    // Link reconciliation.
    for op in &plan.links_to_remove {
        library.tree.unlink_asset(&op.album_uuid, &op.link_name)?;
        summary.links_removed += 1;
    }
    for op in &plan.links_to_add {
        // An asset that failed to download this run would leave a dangling
        // link; defer it to the next sync instead.
        if !library.store.asset_path(&op.target).exists() {
            events.warn(
                Report::new("SYNC_WARNING", "Deferring link to missing asset")
                    .with("album", &op.album_uuid)
                    .with("target", &op.target),
            );
            continue;
        }
        library
            .tree
            .link_asset(&op.album_uuid, &op.link_name, &op.target)?;
        summary.links_added += 1;
    }

    // Asset removal last: nothing links to these any more.
    for filename in &plan.assets_to_remove {
        library.store.delete_asset(filename)?;
        summary.assets_removed += 1;
    }

    Ok(summary)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::library::asset::{Asset, AssetOrigin};
    use crate::library::store::mtime_millis;
    use crate::photos::records::RemoteAlbum;
    use tempfile::tempdir;

    fn remote_asset(record: &str, checksum: &str, ext: &'static str, size: u64, mtime: i64, name: &str) -> Asset {
        Asset {
            record_name: record.into(),
            file_checksum: checksum.into(),
            size,
            modified: mtime,
            ext,
            remote_filename: name.into(),
            wrapping_key: None,
            reference_checksum: None,
            download_url: None,
            origin: AssetOrigin::Original,
            favorite: false,
        }
    }

    fn remote_album(uuid: &str, name: &str, parent: Option<&str>, folder: bool, members: &[&str]) -> RemoteAlbum {
        RemoteAlbum {
            uuid: uuid.into(),
            display_name: name.into(),
            parent_uuid: parent.map(str::to_string),
            folder,
            asset_record_names: members.iter().map(|m| m.to_string()).collect(),
        }
    }

    /// First-run pull: three assets, one album holding two of them. The
    /// download phase is emulated by seeding the store the way the workers
    /// would, then applying the structural plan.
    #[test]
    fn first_run_builds_expected_tree() {
        let dir = tempdir().unwrap();
        let events = EventSink::disconnected();

        let a = remote_asset("RA", "YWFh", "jpg", 3, 1_000, "A.jpg");
        let b = remote_asset("RB", "YmJi", "mov", 3, 2_000, "B.mov");
        let c = remote_asset("RC", "Y2Nj", "heic", 3, 3_000, "C.heic");
        let assets = vec![a.clone(), b.clone(), c.clone()];
        let albums = vec![remote_album("U1", "Family", None, false, &["RA", "RC"])];

        let library = PhotosLibrary::load(dir.path(), &events).unwrap();
        let plan = compute_plan(&assets, &albums, &library);
        assert_eq!(plan.assets_to_add.len(), 3);

        for (asset, bytes) in [(&a, b"abc"), (&b, b"mov"), (&c, b"pic")] {
            library.store.write_asset(asset, &bytes[..]).unwrap();
        }
        apply_plan(&library, &plan, &events).unwrap();

        // Tree shape: store contents with remote mtimes.
        let aaa = library.store.asset_path(&a.asset_filename().unwrap());
        assert_eq!(mtime_millis(&std::fs::metadata(&aaa).unwrap()), 1_000);
        // Album link layer: Family -> .U1, links for A and C only.
        let family = dir.path().join("Family");
        assert!(std::fs::symlink_metadata(&family).unwrap().is_symlink());
        let link = dir.path().join(".U1").join("A.jpg");
        let target = std::fs::read_link(&link).unwrap();
        assert_eq!(
            target,
            std::path::PathBuf::from(format!("../_All-Photos/{}", a.asset_filename().unwrap()))
        );
        assert!(dir.path().join(".U1").join("C.heic").exists());
        assert!(!dir.path().join(".U1").join("B.mov").exists());

        // Re-running against the same remote plans nothing.
        let library = PhotosLibrary::load(dir.path(), &events).unwrap();
        let plan = compute_plan(&assets, &albums, &library);
        assert!(plan.is_empty(), "second run not idempotent: {plan:?}");
    }

    /// Album move: `Family` gains a parent folder `People`; links survive.
    #[test]
    fn album_move_preserves_links() {
        let dir = tempdir().unwrap();
        let events = EventSink::disconnected();

        let a = remote_asset("RA", "YWFh", "jpg", 3, 1_000, "A.jpg");
        let assets = vec![a.clone()];
        let round1 = vec![remote_album("U1", "Family", None, false, &["RA"])];

        let library = PhotosLibrary::load(dir.path(), &events).unwrap();
        let plan = compute_plan(&assets, &round1, &library);
        library.store.write_asset(&a, b"abc").unwrap();
        apply_plan(&library, &plan, &events).unwrap();

        let round2 = vec![
            remote_album("U2", "People", None, true, &[]),
            remote_album("U1", "Family", Some("U2"), false, &["RA"]),
        ];
        let library = PhotosLibrary::load(dir.path(), &events).unwrap();
        let plan = compute_plan(&assets, &round2, &library);
        apply_plan(&library, &plan, &events).unwrap();

        let people = dir.path().join("People");
        assert!(std::fs::symlink_metadata(&people).unwrap().is_symlink());
        let nested = dir.path().join(".U2").join("Family");
        assert_eq!(
            std::fs::read_link(&nested).unwrap(),
            std::path::PathBuf::from("../.U1")
        );
        assert!(!dir.path().join("Family").exists());
        // Asset link untouched by the move.
        assert!(dir.path().join(".U1").join("A.jpg").exists());

        let library = PhotosLibrary::load(dir.path(), &events).unwrap();
        assert!(compute_plan(&assets, &round2, &library).is_empty());
    }

    /// Archive durability: an archived album's contents survive the remote
    /// deleting one of its assets.
    #[test]
    fn archived_album_protects_its_copies() {
        let dir = tempdir().unwrap();
        let events = EventSink::disconnected();

        let a = remote_asset("RA", "YWFh", "jpg", 3, 1_000, "A.jpg");
        let c = remote_asset("RC", "Y2Nj", "heic", 3, 3_000, "C.heic");
        let round1 = vec![remote_album("U1", "Family", None, false, &["RA", "RC"])];
        let assets1 = vec![a.clone(), c.clone()];

        let library = PhotosLibrary::load(dir.path(), &events).unwrap();
        let plan = compute_plan(&assets1, &round1, &library);
        library.store.write_asset(&a, b"abc").unwrap();
        library.store.write_asset(&c, b"pic").unwrap();
        apply_plan(&library, &plan, &events).unwrap();

        // Archive Family: symlinks become copies, sentinel written.
        let library = PhotosLibrary::load(dir.path(), &events).unwrap();
        crate::archive::freeze_album_dir(
            &library,
            "U1",
            &dir.path().join(".U1"),
        )
        .unwrap();

        // Remote drops asset A but keeps the album listing C.
        let round2 = vec![remote_album("U1", "Family", None, false, &["RC"])];
        let assets2 = vec![c.clone()];
        let library = PhotosLibrary::load(dir.path(), &events).unwrap();
        let plan = compute_plan(&assets2, &round2, &library);
        apply_plan(&library, &plan, &events).unwrap();

        // The store copy of A survives (archived album owns its identity),
        // and the archived album file is still a regular file.
        assert!(library
            .store
            .asset_path(&a.asset_filename().unwrap())
            .exists());
        let frozen = dir.path().join(".U1").join("A.jpg");
        assert!(std::fs::symlink_metadata(&frozen).unwrap().is_file());
    }

    /// Interrupted downloads leave a deferred link, cleaned up next run.
    #[test]
    fn links_to_missing_assets_are_deferred() {
        let dir = tempdir().unwrap();
        let events = EventSink::disconnected();

        let a = remote_asset("RA", "YWFh", "jpg", 3, 1_000, "A.jpg");
        let albums = vec![remote_album("U1", "Family", None, false, &["RA"])];
        let library = PhotosLibrary::load(dir.path(), &events).unwrap();
        let plan = compute_plan(&[a.clone()], &albums, &library);
        // Download "failed": store never received the asset.
        let summary = apply_plan(&library, &plan, &events).unwrap();
        assert_eq!(summary.links_added, 0);
        assert!(!dir.path().join(".U1").join("A.jpg").exists());

        // Next run: asset arrives, link is created.
        let library = PhotosLibrary::load(dir.path(), &events).unwrap();
        let plan = compute_plan(&[a.clone()], &albums, &library);
        library.store.write_asset(&a, b"abc").unwrap();
        let summary = apply_plan(&library, &plan, &events).unwrap();
        assert_eq!(summary.links_added, 1);
    }
}
