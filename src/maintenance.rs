//! Store maintenance.
//!
//! Each operation is individually transactional per file, so a run may
//! partially succeed: every file that could be handled is handled, and the
//! rest is reported.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Result;
use walkdir::WalkDir;

use crate::extrema;
use crate::store::Store;
use crate::{is_readable, FileInfo, ScenedupError};

/// Outcome of a purge pass.
#[derive(Debug, Default)]
pub struct PurgeReport {
    /// Files whose stored path is no longer readable.
    pub missing: Vec<FileInfo>,
    /// Rows actually deleted (0 on a dry run).
    pub deleted: usize,
}

/// Find stored files whose paths are gone; with `delete`, remove them and
/// everything cascading from them. Without it, only report.
pub fn purge(store: &mut Store, delete: bool) -> Result<PurgeReport> {
    let mut report = PurgeReport::default();
    for fi in store.get_file_infos()? {
        if is_readable(Path::new(&fi.name)) {
            continue;
        }
        if delete {
            store.del_file(fi.fid)?;
            report.deleted += 1;
            log::info!("purged {} (fid {})", fi.name, fi.fid);
        } else {
            log::info!("would purge {} (fid {})", fi.name, fi.fid);
        }
        report.missing.push(fi);
    }
    Ok(report)
}

/// Move a file on disk and update its store row. A no-op (with a warning)
/// when the store does not know `old`.
pub fn rename(store: &mut Store, old: &Path, new: &Path) -> Result<()> {
    if !is_readable(old) {
        return Err(ScenedupError::InvalidInput(format!(
            "rename source not readable: {}",
            old.display()
        ))
        .into());
    }
    if new.exists() {
        return Err(ScenedupError::InvalidInput(format!(
            "rename target already exists: {}",
            new.display()
        ))
        .into());
    }

    let old_name = old.to_string_lossy().to_string();
    let Some(fid) = store.get_id(&old_name)? else {
        log::warn!("{} is unknown to the store; nothing renamed", old.display());
        return Ok(());
    };

    std::fs::rename(old, new)?;
    store.update_name(fid, &new.to_string_lossy())?;
    log::info!("renamed {} -> {}", old.display(), new.display());
    Ok(())
}

/// Reconcile files that were moved on disk: any file under `dir` whose
/// basename matches exactly one stored entry with a different absolute path
/// gets that entry's name updated. Ambiguous basenames are skipped.
pub fn fix_moved(store: &mut Store, dir: &Path) -> Result<usize> {
    let mut by_basename: HashMap<String, Option<FileInfo>> = HashMap::new();
    for fi in store.get_file_infos()? {
        let basename = match Path::new(&fi.name).file_name() {
            Some(name) => name.to_string_lossy().to_string(),
            None => continue,
        };
        // A second stored file with the same basename makes it ambiguous.
        by_basename
            .entry(basename)
            .and_modify(|slot| *slot = None)
            .or_insert(Some(fi));
    }

    let mut updated = 0usize;
    for entry in WalkDir::new(dir).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                log::warn!("fixrenames: {}", err);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let basename = entry.file_name().to_string_lossy().to_string();
        let Some(slot) = by_basename.get_mut(&basename) else {
            continue;
        };
        let Some(fi) = slot.take() else {
            log::warn!("fixrenames: basename '{}' is ambiguous, skipping", basename);
            continue;
        };

        let disk_path = entry.path().to_string_lossy().to_string();
        if disk_path == fi.name {
            continue;
        }
        store.update_name(fi.fid, &disk_path)?;
        updated += 1;
        log::info!("fixrenames: {} -> {}", fi.name, disk_path);
    }
    Ok(updated)
}

/// Whitelist every pair among the given paths. Unknown paths are reported
/// and skipped; at least two must resolve for anything to be inserted.
pub fn whitelist_paths(store: &mut Store, paths: &[PathBuf]) -> Result<usize> {
    if paths.len() < 2 {
        return Err(
            ScenedupError::InvalidInput("whitelist needs at least two paths".into()).into(),
        );
    }

    let mut fids = Vec::new();
    for path in paths {
        let name = match std::fs::canonicalize(path) {
            Ok(abs) => abs.to_string_lossy().to_string(),
            Err(_) => path.to_string_lossy().to_string(),
        };
        match store.get_id(&name)? {
            Some(fid) => fids.push(fid),
            None => log::warn!("whitelist: {} is unknown to the store", path.display()),
        }
    }

    let mut inserted = 0usize;
    for (i, &a) in fids.iter().enumerate() {
        for &b in &fids[i + 1..] {
            if a != b {
                store.whitelist(a, b)?;
                inserted += 1;
            }
        }
    }
    Ok(inserted)
}

/// Re-hash every file that has stored brightness but no hashes, using the
/// stored fps. Lets fingerprints be rebuilt after a hash-format change
/// without touching the original videos.
pub fn migrate(store: &mut Store) -> Result<usize> {
    let mut migrated = 0usize;
    for fi in store.files_missing_hashes()? {
        let series = store.get_brightness(fi.fid)?;
        let points = extrema::hash_series(&series, fi.fps);
        if points.is_empty() {
            log::debug!("migrate: {} yields no extrema", fi.name);
            continue;
        }
        store.insert_hashes(fi.fid, &points)?;
        migrated += 1;
        log::info!("migrate: rehashed {} ({} extrema)", fi.name, points.len());
    }
    Ok(migrated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn touch(path: &Path) {
        std::fs::write(path, b"video bytes").unwrap();
    }

    #[test]
    fn purge_dry_run_reports_without_deleting() {
        let dir = tempdir().unwrap();
        let kept = dir.path().join("kept.mkv");
        touch(&kept);

        let mut store = Store::open_in_memory().unwrap();
        store
            .insert_file(&kept.to_string_lossy(), 25.0, 30.0)
            .unwrap();
        let gone = store.insert_file("/videos/gone.mkv", 25.0, 30.0).unwrap();

        let report = purge(&mut store, false).unwrap();
        assert_eq!(report.missing.len(), 1);
        assert_eq!(report.missing[0].fid, gone.fid);
        assert_eq!(report.deleted, 0);
        assert_eq!(store.get_file_infos().unwrap().len(), 2);
    }

    #[test]
    fn purge_delete_cascades() {
        let dir = tempdir().unwrap();
        let kept = dir.path().join("kept.mkv");
        touch(&kept);

        let mut store = Store::open_in_memory().unwrap();
        let a = store
            .insert_file(&kept.to_string_lossy(), 25.0, 30.0)
            .unwrap();
        let gone = store.insert_file("/videos/gone.mkv", 25.0, 30.0).unwrap();
        store.insert_brightness(gone.fid, &[1.0, 2.0]).unwrap();
        store.whitelist(a.fid, gone.fid).unwrap();

        let report = purge(&mut store, true).unwrap();
        assert_eq!(report.deleted, 1);
        assert_eq!(store.get_file_infos().unwrap().len(), 1);
        assert!(store.whitelist_pairs().unwrap().is_empty());
    }

    #[test]
    fn rename_moves_file_and_row() {
        let dir = tempdir().unwrap();
        let old = dir.path().join("x.mkv");
        let new = dir.path().join("y.mkv");
        touch(&old);

        let mut store = Store::open_in_memory().unwrap();
        let fi = store
            .insert_file(&old.to_string_lossy(), 25.0, 30.0)
            .unwrap();

        rename(&mut store, &old, &new).unwrap();
        assert!(!old.exists());
        assert!(new.exists());
        let infos = store.get_file_infos().unwrap();
        assert_eq!(infos[0].fid, fi.fid);
        assert_eq!(infos[0].name, new.to_string_lossy());
    }

    #[test]
    fn rename_of_unknown_path_is_a_noop() {
        let dir = tempdir().unwrap();
        let old = dir.path().join("x.mkv");
        let new = dir.path().join("y.mkv");
        touch(&old);

        let mut store = Store::open_in_memory().unwrap();
        rename(&mut store, &old, &new).unwrap();
        assert!(old.exists());
        assert!(!new.exists());
    }

    #[test]
    fn rename_onto_existing_target_fails() {
        let dir = tempdir().unwrap();
        let old = dir.path().join("x.mkv");
        let new = dir.path().join("y.mkv");
        touch(&old);
        touch(&new);

        let mut store = Store::open_in_memory().unwrap();
        assert!(rename(&mut store, &old, &new).is_err());
    }

    #[test]
    fn fix_moved_updates_unique_basenames_once() {
        let old_dir = tempdir().unwrap();
        let new_dir = tempdir().unwrap();
        let new_path = new_dir.path().join("x.mkv");
        touch(&new_path);

        let mut store = Store::open_in_memory().unwrap();
        let fi = store
            .insert_file(
                &old_dir.path().join("x.mkv").to_string_lossy(),
                25.0,
                30.0,
            )
            .unwrap();

        let updated = fix_moved(&mut store, new_dir.path()).unwrap();
        assert_eq!(updated, 1);
        assert_eq!(
            store.get_file_info(fi.fid).unwrap().unwrap().name,
            new_path.to_string_lossy()
        );

        // A second pass finds the stored path already current.
        assert_eq!(fix_moved(&mut store, new_dir.path()).unwrap(), 0);
    }

    #[test]
    fn fix_moved_skips_ambiguous_basenames() {
        let new_dir = tempdir().unwrap();
        touch(&new_dir.path().join("x.mkv"));

        let mut store = Store::open_in_memory().unwrap();
        store.insert_file("/somewhere/x.mkv", 25.0, 30.0).unwrap();
        store.insert_file("/elsewhere/x.mkv", 25.0, 30.0).unwrap();

        assert_eq!(fix_moved(&mut store, new_dir.path()).unwrap(), 0);
    }

    #[test]
    fn whitelist_paths_inserts_all_pairs() {
        let dir = tempdir().unwrap();
        let paths: Vec<PathBuf> = ["a.mkv", "b.mkv", "c.mkv"]
            .iter()
            .map(|name| dir.path().join(name))
            .collect();
        let mut store = Store::open_in_memory().unwrap();
        for path in &paths {
            touch(path);
            let canonical = std::fs::canonicalize(path).unwrap();
            store
                .insert_file(&canonical.to_string_lossy(), 25.0, 30.0)
                .unwrap();
        }

        let inserted = whitelist_paths(&mut store, &paths).unwrap();
        assert_eq!(inserted, 3);
        assert_eq!(store.whitelist_pairs().unwrap().len(), 3);
    }

    #[test]
    fn whitelist_needs_two_paths() {
        let mut store = Store::open_in_memory().unwrap();
        assert!(whitelist_paths(&mut store, &[PathBuf::from("/a.mkv")]).is_err());
    }

    #[test]
    fn migrate_rehashes_from_stored_brightness() {
        let mut store = Store::open_in_memory().unwrap();
        let fi = store.insert_file("/videos/a.mkv", 1.0, 120.0).unwrap();
        let series: Vec<f32> = (0..120)
            .map(|i| if i % 15 == 7 { 200.0 } else { 10.0 })
            .collect();
        store.insert_brightness(fi.fid, &series).unwrap();
        assert!(!store.has_hashes(fi.fid).unwrap());

        assert_eq!(migrate(&mut store).unwrap(), 1);
        assert!(store.has_hashes(fi.fid).unwrap());

        let (frames, gaps) = store.get_hashes(fi.fid, 0, u32::MAX).unwrap();
        assert_eq!(frames[0], 22);
        assert!((gaps[0] - 22.0).abs() < 1e-6);
        assert!(frames.windows(2).all(|w| w[0] < w[1]));
        assert!(gaps.iter().all(|&g| g >= 0.0));

        // Idempotent: the file no longer qualifies.
        assert_eq!(migrate(&mut store).unwrap(), 0);
    }
}
