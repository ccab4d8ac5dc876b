//! Maintenance scenarios across components: refresh, migrate, purge and
//! rename reconciliation against a live store.

use std::path::PathBuf;

use scenedup::config::SearchParams;
use scenedup::{import, maintenance, search, ImportOptions, KnnBackendKind, StopToken, Store};

const CLIP_A: &str = "stub://pulse?fps=1&frames=600&period=15&phase=7";
const CLIP_B: &str = "stub://pulse?fps=1&frames=601&period=15&phase=7";

fn kdtree_params() -> SearchParams {
    SearchParams {
        backend: KnnBackendKind::KdTree,
        ..SearchParams::default()
    }
}

fn import_clips(store: &mut Store, clips: &[&str], refresh: bool) -> import::ImportStats {
    let paths: Vec<PathBuf> = clips.iter().map(PathBuf::from).collect();
    let opts = ImportOptions {
        refresh,
        ..ImportOptions::default()
    };
    import::import_files(store, &paths, &opts, &StopToken::new()).unwrap()
}

#[test]
fn whitelist_survives_refresh() {
    let mut store = Store::open_in_memory().unwrap();
    import_clips(&mut store, &[CLIP_A, CLIP_B], false);

    let a = store.get_id(CLIP_A).unwrap().unwrap();
    let b = store.get_id(CLIP_B).unwrap().unwrap();
    store.whitelist(a, b).unwrap();

    let stats = import_clips(&mut store, &[CLIP_A, CLIP_B], true);
    assert_eq!(stats.imported, 2);

    // Same fids, whitelist intact, search still suppressed.
    assert_eq!(store.get_id(CLIP_A).unwrap().unwrap(), a);
    assert!(store.is_whitelisted(a, b).unwrap());
    let groups = search::find_duplicates(&store, &kdtree_params()).unwrap();
    assert!(groups.is_empty());
}

#[test]
fn migrated_file_matches_an_imported_twin() {
    let mut store = Store::open_in_memory().unwrap();
    import_clips(&mut store, &[CLIP_A], false);

    // A second file arrives as raw brightness only, as if hashed by an
    // older version.
    let series: Vec<f32> = (0..600)
        .map(|i| if i % 15 == 7 { 200.0 } else { 10.0 })
        .collect();
    let twin = store.insert_file("/videos/twin.mkv", 1.0, 600.0).unwrap();
    store.insert_brightness(twin.fid, &series).unwrap();

    assert_eq!(maintenance::migrate(&mut store).unwrap(), 1);

    let groups = search::find_duplicates(&store, &kdtree_params()).unwrap();
    assert_eq!(groups.len(), 1);
    let names: Vec<&str> = groups[0].iter().map(|m| m.file.name.as_str()).collect();
    assert_eq!(names, vec![CLIP_A, "/videos/twin.mkv"]);
}

#[test]
fn purge_dry_run_then_delete() {
    let dir = tempfile::tempdir().unwrap();
    let present = dir.path().join("present.mkv");
    std::fs::write(&present, b"bytes").unwrap();

    let mut store = Store::open_in_memory().unwrap();
    let kept = store
        .insert_file(&present.to_string_lossy(), 25.0, 30.0)
        .unwrap();
    let gone = store.insert_file("/videos/vanished.mkv", 25.0, 30.0).unwrap();
    store.insert_brightness(gone.fid, &[1.0, 2.0, 3.0]).unwrap();
    store.whitelist(kept.fid, gone.fid).unwrap();

    let dry = maintenance::purge(&mut store, false).unwrap();
    assert_eq!(dry.missing.len(), 1);
    assert_eq!(dry.deleted, 0);
    assert_eq!(store.get_file_infos().unwrap().len(), 2);

    let wet = maintenance::purge(&mut store, true).unwrap();
    assert_eq!(wet.deleted, 1);
    let survivors = store.get_file_infos().unwrap();
    assert_eq!(survivors.len(), 1);
    assert_eq!(survivors[0].fid, kept.fid);
    // No whitelist row may reference the purged fid.
    assert!(store.whitelist_pairs().unwrap().is_empty());
}

#[test]
fn moved_file_is_reconciled_exactly_once() {
    let old_dir = tempfile::tempdir().unwrap();
    let new_dir = tempfile::tempdir().unwrap();
    let old_path = old_dir.path().join("movie.mkv");
    let new_path = new_dir.path().join("movie.mkv");
    std::fs::write(&new_path, b"bytes").unwrap();

    let mut store = Store::open_in_memory().unwrap();
    let fi = store
        .insert_file(&old_path.to_string_lossy(), 25.0, 30.0)
        .unwrap();

    assert_eq!(maintenance::fix_moved(&mut store, new_dir.path()).unwrap(), 1);
    assert_eq!(
        store.get_file_info(fi.fid).unwrap().unwrap().name,
        new_path.to_string_lossy()
    );
    assert_eq!(maintenance::fix_moved(&mut store, new_dir.path()).unwrap(), 0);
}
