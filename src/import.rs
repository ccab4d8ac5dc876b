//! Import coordination.
//!
//! Walks candidate files through decode → brightness → extrema → store, one
//! file at a time. Every file is guarded by an advisory store lock; a failed
//! import leaves its lock to expire so a crashing decoder cannot be
//! re-entered immediately. A stop request is honored between files; the
//! in-flight file completes unless the token is escalated to an interrupt,
//! which aborts the current file and re-raises out of the run.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use walkdir::WalkDir;

use crate::brightness;
use crate::config::ImportOptions;
use crate::extrema;
use crate::source::{self, remux, VideoSource};
use crate::store::Store;
use crate::ScenedupError;

/// Process-wide cancellation token, flipped by the signal handler.
///
/// Two levels: a stop is checked between files and lets the in-flight file
/// complete; an interrupt is checked during decode and hashing, aborts the
/// current file (its transaction never commits, its lock expires via TTL)
/// and re-raises as `ScenedupError::Interrupted`.
#[derive(Clone, Default)]
pub struct StopToken {
    stop: Arc<AtomicBool>,
    interrupt: Arc<AtomicBool>,
}

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn interrupt(&self) {
        self.interrupt.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupt.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ImportStats {
    pub imported: usize,
    pub skipped: usize,
    pub failed: usize,
    /// True when the run ended early on a stop request.
    pub stopped: bool,
}

enum FileOutcome {
    Imported,
    SkippedKnown,
    SkippedLocked,
}

/// Recursively enumerate video files under `dir`: extension must be in
/// `extensions`, and files modified more recently than `min_age` are assumed
/// to still be downloading and are skipped. Results are sorted.
pub fn collect_video_files(
    dir: &Path,
    extensions: &[String],
    min_age: Duration,
) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for entry in WalkDir::new(dir).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                log::warn!("enumerate: {}", err);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        if !extensions.iter().any(|known| known == &ext) {
            continue;
        }
        let modified = entry.metadata().ok().and_then(|m| m.modified().ok());
        if let Some(age) = modified.and_then(|m| m.elapsed().ok()) {
            if age < min_age {
                log::info!("skipping {} (modified {}s ago)", path.display(), age.as_secs());
                continue;
            }
        }
        out.push(path.to_path_buf());
    }
    out.sort();
    Ok(out)
}

/// Expand a `--file` glob into a sorted path list.
pub fn expand_glob(pattern: &str) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for entry in glob::glob(pattern)
        .map_err(|e| ScenedupError::InvalidInput(format!("bad glob '{}': {}", pattern, e)))?
    {
        match entry {
            Ok(path) => out.push(path),
            Err(err) => log::warn!("glob: {}", err),
        }
    }
    out.sort();
    Ok(out)
}

/// Import `paths` in order. Per-file failures are logged and the run moves
/// on; only an interrupt aborts the whole pass.
pub fn import_files(
    store: &mut Store,
    paths: &[PathBuf],
    opts: &ImportOptions,
    stop: &StopToken,
) -> Result<ImportStats> {
    let mut stats = ImportStats::default();
    let bar = ProgressBar::new(paths.len() as u64);
    if let Ok(style) = ProgressStyle::with_template("[{bar:40}] {pos}/{len} {msg}") {
        bar.set_style(style);
    }

    for path in paths {
        if stop.is_stopped() {
            log::info!("stop requested; not starting further imports");
            stats.stopped = true;
            break;
        }
        bar.set_message(path.display().to_string());

        match import_one(store, path, opts, stop) {
            Ok(FileOutcome::Imported) => {
                stats.imported += 1;
                log::info!("imported {}", path.display());
            }
            Ok(FileOutcome::SkippedKnown) => {
                stats.skipped += 1;
                log::debug!("{} already imported", path.display());
            }
            Ok(FileOutcome::SkippedLocked) => {
                stats.skipped += 1;
                log::warn!("{} is locked by another import", path.display());
            }
            Err(err) => {
                if let Some(ScenedupError::Interrupted) = err.downcast_ref::<ScenedupError>() {
                    bar.finish_and_clear();
                    return Err(err);
                }
                stats.failed += 1;
                log::error!("import of {} failed: {:#}", path.display(), err);
            }
        }
        bar.inc(1);
    }

    bar.finish_and_clear();
    Ok(stats)
}

fn import_one(
    store: &mut Store,
    path: &Path,
    opts: &ImportOptions,
    stop: &StopToken,
) -> Result<FileOutcome> {
    let raw = path.to_string_lossy().to_string();
    let is_stub = raw.starts_with("stub://");

    let name = if is_stub {
        raw
    } else {
        std::fs::canonicalize(path)
            .map_err(|e| ScenedupError::SourceUnreadable(format!("{}: {}", path.display(), e)))?
            .to_string_lossy()
            .to_string()
    };

    let probe = if is_stub {
        None
    } else {
        Some(std::fs::File::open(path).map_err(|e| {
            ScenedupError::SourceUnreadable(format!("{}: {}", path.display(), e))
        })?)
    };

    if store.is_name_in_db(&name)? && !opts.refresh {
        return Ok(FileOutcome::SkippedKnown);
    }

    if let Err(err) = store.try_lock(&name, opts.lock_ttl) {
        if matches!(
            err.downcast_ref::<ScenedupError>(),
            Some(ScenedupError::AlreadyLocked(_))
        ) {
            return Ok(FileOutcome::SkippedLocked);
        }
        return Err(err);
    }

    // Touch the first KiB so a sleeping disk spins up before decode timing
    // matters.
    if let Some(mut probe) = probe {
        let mut buf = [0u8; 1024];
        let _ = probe.read(&mut buf);
    }

    // From here on a failure abandons the file but leaves the lock to expire
    // via its TTL.
    let imported = decode_and_store(store, path, &name, opts, stop)?;
    store.unlock(&name)?;
    log::debug!(
        "{}: fps {:.3}, duration {:.1}s",
        imported.name,
        imported.fps,
        imported.duration
    );
    Ok(FileOutcome::Imported)
}

fn decode_and_store(
    store: &mut Store,
    path: &Path,
    name: &str,
    opts: &ImportOptions,
    stop: &StopToken,
) -> Result<crate::FileInfo> {
    let mut source = open_with_repair(path, name, opts)?;
    let info = source.info();
    let series = brightness::collect(&mut source, stop)?;
    let points = extrema::hash_series(&series, info.fps);
    if stop.is_interrupted() {
        return Err(ScenedupError::Interrupted.into());
    }
    let duration = info
        .duration
        .unwrap_or_else(|| info.nframes as f64 / info.fps);

    store.import_file(name, info.fps, duration, &series, &points)
}

/// Open the source; when the repair policy applies, remux once and retry
/// with repair disabled.
fn open_with_repair(path: &Path, name: &str, opts: &ImportOptions) -> Result<VideoSource> {
    let source = VideoSource::open(name)?;
    if opts.repair && source::needs_repair(&source.info()) {
        log::warn!("{}: implausible duration, remuxing once", name);
        drop(source);
        remux::remux_in_place(path)?;
        return VideoSource::open(name);
    }
    Ok(source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn stub(path: &str) -> PathBuf {
        PathBuf::from(path)
    }

    #[test]
    fn stop_token_levels_are_independent() {
        let token = StopToken::new();
        assert!(!token.is_stopped());
        assert!(!token.is_interrupted());

        token.stop();
        assert!(token.is_stopped());
        assert!(!token.is_interrupted());
        assert!(token.clone().is_stopped());

        token.interrupt();
        assert!(token.is_interrupted());
    }

    #[test]
    fn stub_files_import_end_to_end() {
        let mut store = Store::open_in_memory().unwrap();
        let paths = vec![
            stub("stub://pulse?fps=1&frames=120&period=15&phase=7"),
            stub("stub://pulse?fps=1&frames=121&period=15&phase=7"),
        ];
        let stats =
            import_files(&mut store, &paths, &ImportOptions::default(), &StopToken::new()).unwrap();
        assert_eq!(stats.imported, 2);
        assert_eq!(stats.failed, 0);

        let infos = store.get_file_infos().unwrap();
        assert_eq!(infos.len(), 2);
        assert!(store.has_hashes(infos[0].fid).unwrap());
        assert!((infos[0].duration - 120.0).abs() < 1e-9);
    }

    #[test]
    fn known_files_are_skipped_without_refresh() {
        let mut store = Store::open_in_memory().unwrap();
        let paths = vec![stub("stub://pulse?fps=1&frames=120&period=15&phase=7")];
        let opts = ImportOptions::default();

        let first = import_files(&mut store, &paths, &opts, &StopToken::new()).unwrap();
        assert_eq!(first.imported, 1);

        let second = import_files(&mut store, &paths, &opts, &StopToken::new()).unwrap();
        assert_eq!(second.imported, 0);
        assert_eq!(second.skipped, 1);

        let refresh = ImportOptions {
            refresh: true,
            ..ImportOptions::default()
        };
        let third = import_files(&mut store, &paths, &refresh, &StopToken::new()).unwrap();
        assert_eq!(third.imported, 1);
    }

    #[test]
    fn locked_files_are_skipped() {
        let mut store = Store::open_in_memory().unwrap();
        let name = "stub://flat?fps=1&frames=60";
        store
            .try_lock(name, Duration::from_secs(3600))
            .unwrap();

        let stats = import_files(
            &mut store,
            &[stub(name)],
            &ImportOptions::default(),
            &StopToken::new(),
        )
        .unwrap();
        assert_eq!(stats.imported, 0);
        assert_eq!(stats.skipped, 1);
        assert!(!store.is_name_in_db(name).unwrap());
    }

    #[test]
    fn unreadable_files_fail_without_aborting_the_run() {
        let mut store = Store::open_in_memory().unwrap();
        let paths = vec![
            stub("/definitely/not/here.mkv"),
            stub("stub://pulse?fps=1&frames=120&period=15&phase=7"),
        ];
        let stats =
            import_files(&mut store, &paths, &ImportOptions::default(), &StopToken::new()).unwrap();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.imported, 1);
    }

    #[test]
    fn interrupt_aborts_the_in_flight_file_and_reraises() {
        let mut store = Store::open_in_memory().unwrap();
        let name = "stub://pulse?fps=1&frames=120&period=15&phase=7";
        let token = StopToken::new();
        token.interrupt();

        let err = import_files(
            &mut store,
            &[stub(name)],
            &ImportOptions::default(),
            &token,
        )
        .unwrap_err();
        let err = err.downcast::<ScenedupError>().unwrap();
        assert!(matches!(err, ScenedupError::Interrupted));

        // Nothing was committed for the aborted file, and its lock is left
        // to expire, so an immediate retry is refused as locked.
        assert!(!store.is_name_in_db(name).unwrap());
        let retry = import_files(
            &mut store,
            &[stub(name)],
            &ImportOptions::default(),
            &StopToken::new(),
        )
        .unwrap();
        assert_eq!(retry.imported, 0);
        assert_eq!(retry.skipped, 1);
    }

    #[test]
    fn stop_request_prevents_further_files() {
        let mut store = Store::open_in_memory().unwrap();
        let token = StopToken::new();
        token.stop();

        let paths = vec![stub("stub://pulse?fps=1&frames=120&period=15&phase=7")];
        let stats =
            import_files(&mut store, &paths, &ImportOptions::default(), &token).unwrap();
        assert!(stats.stopped);
        assert_eq!(stats.imported, 0);
    }

    #[test]
    fn enumeration_filters_extension_and_fresh_files() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.mkv"), b"x").unwrap();
        std::fs::write(dir.path().join("b.txt"), b"x").unwrap();
        std::fs::write(dir.path().join("c.MP4"), b"x").unwrap();

        let exts = vec!["mkv".to_string(), "mp4".to_string()];

        // Without an age floor both videos are seen, sorted.
        let all = collect_video_files(dir.path(), &exts, Duration::ZERO).unwrap();
        let names: Vec<String> = all
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.mkv", "c.MP4"]);

        // Freshly written files are held back by the in-flight guard.
        let guarded =
            collect_video_files(dir.path(), &exts, Duration::from_secs(36)).unwrap();
        assert!(guarded.is_empty());
    }
}
