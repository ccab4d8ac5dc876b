//! scenedup - find duplicate scenes across a video library
//!
//! One invocation can combine maintenance, import and search:
//! 1. Whitelist / purge / rename / fixrenames maintenance, if requested
//! 2. Import of `--dir` and `--file` candidates (with per-file locking)
//! 3. Re-hash migration for files that have brightness but no hashes
//! 4. Duplicate search, result printing, optional `--searchres` round trip
//!    and external review UI handoff

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use scenedup::config::{
    self, DEFAULT_DB_PATH, DEFAULT_INDEX_LENGTH, DEFAULT_KNN_BACKEND, DEFAULT_LOCK_TTL_SECS,
    DEFAULT_NICE_LEVEL, DEFAULT_RADIUS, DEFAULT_SCENE_LENGTH_SECS, DEFAULT_STEP,
    DEFAULT_VIDEO_EXTENSIONS, FRESH_FILE_GUARD_SECS,
};
use scenedup::{
    import, maintenance, results, search, ImportOptions, ScenedupError, SearchParams, StopToken,
    Store,
};

#[derive(Parser, Debug)]
#[command(name = "scenedup", version, about = "Find duplicate scenes across a video library")]
struct Cli {
    /// Import all videos beneath this directory (recursive).
    #[arg(long)]
    dir: Option<PathBuf>,

    /// Import files matching a glob.
    #[arg(long)]
    file: Option<String>,

    /// Re-import existing paths, preserving whitelists.
    #[arg(long)]
    refresh: bool,

    /// Run the duplicate search.
    #[arg(long)]
    search: bool,

    /// Hand the result set to the external review UI.
    #[arg(long)]
    ui: bool,

    /// Write (with --search) or read (with --ui) serialized duplicate groups.
    #[arg(long)]
    searchres: Option<PathBuf>,

    /// Report files whose stored path is no longer readable.
    #[arg(long)]
    purge: bool,

    /// With --purge: actually delete the missing files' rows.
    #[arg(long)]
    delete: bool,

    /// Rename a file on disk and update the store.
    #[arg(long, num_args = 2, value_names = ["OLD", "NEW"])]
    rename: Option<Vec<PathBuf>>,

    /// Reconcile moved files beneath --dir.
    #[arg(long)]
    fixrenames: bool,

    /// Whitelist all pairs among the given files.
    #[arg(long, num_args = 2.., value_name = "FILE")]
    whitelist: Option<Vec<PathBuf>>,

    /// Window dimension L.
    #[arg(long, default_value_t = DEFAULT_INDEX_LENGTH)]
    indexlength: usize,

    /// Per-window scene budget in seconds.
    #[arg(long, default_value_t = DEFAULT_SCENE_LENGTH_SECS)]
    scenelength: f32,

    /// L2 distance cutoff for neighbor hits.
    #[arg(long, default_value_t = DEFAULT_RADIUS)]
    radius: f32,

    /// Query stride over windows.
    #[arg(long, default_value_t = DEFAULT_STEP)]
    step: usize,

    /// Seconds ignored at the start of every file.
    #[arg(long, default_value_t = 0.0)]
    ignore_start: f64,

    /// Seconds ignored at the end of every file.
    #[arg(long, default_value_t = 0.0)]
    ignore_end: f64,

    /// Speed-normalize windows before indexing.
    #[arg(long)]
    fixspeed: bool,

    /// ANN backend: forest, kdtree or graph.
    #[arg(long, default_value = DEFAULT_KNN_BACKEND)]
    knnlib: String,

    /// Comma list of video extensions considered during import.
    #[arg(long, default_value = DEFAULT_VIDEO_EXTENSIONS)]
    vidext: String,

    /// SQLite database path.
    #[arg(long, default_value = DEFAULT_DB_PATH)]
    db: String,

    /// Process nice level, applied once at startup.
    #[arg(long, default_value_t = DEFAULT_NICE_LEVEL)]
    nice: i32,

    /// Remux-and-retry containers with missing or implausible durations.
    #[arg(long)]
    repair: bool,
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    set_nice(cli.nice);

    let params = SearchParams {
        index_length: cli.indexlength,
        scene_length: cli.scenelength,
        radius: cli.radius,
        step: cli.step,
        ignore_start: cli.ignore_start,
        ignore_end: cli.ignore_end,
        fix_speed: cli.fixspeed,
        backend: cli.knnlib.parse()?,
    };
    params.validate()?;

    let wants_import = cli.dir.is_some() || cli.file.is_some();
    let has_action = wants_import
        || cli.search
        || cli.ui
        || cli.purge
        || cli.rename.is_some()
        || cli.fixrenames
        || cli.whitelist.is_some();
    if !has_action {
        return Err(ScenedupError::InvalidInput(
            "nothing to do; pass --dir/--file, --search, or a maintenance flag".into(),
        )
        .into());
    }
    if cli.delete && !cli.purge {
        return Err(ScenedupError::InvalidInput("--delete requires --purge".into()).into());
    }
    if cli.fixrenames && cli.dir.is_none() {
        return Err(ScenedupError::InvalidInput("--fixrenames requires --dir".into()).into());
    }

    let mut store = Store::open(&cli.db)?;

    if let Some(paths) = &cli.whitelist {
        let inserted = maintenance::whitelist_paths(&mut store, paths)?;
        log::info!("whitelisted {} pair(s)", inserted);
    }

    if cli.purge {
        let report = maintenance::purge(&mut store, cli.delete)?;
        log::info!(
            "purge: {} missing file(s), {} deleted",
            report.missing.len(),
            report.deleted
        );
    }

    if let Some(pair) = &cli.rename {
        maintenance::rename(&mut store, &pair[0], &pair[1])?;
    }

    if cli.fixrenames {
        if let Some(dir) = &cli.dir {
            let updated = maintenance::fix_moved(&mut store, dir)?;
            log::info!("fixrenames: {} row(s) updated", updated);
        }
    }

    if wants_import && !cli.fixrenames {
        run_import(&mut store, &cli)?;
    }

    let mut groups = None;
    if cli.search {
        let migrated = maintenance::migrate(&mut store)?;
        if migrated > 0 {
            log::info!("rehashed {} file(s) from stored brightness", migrated);
        }

        let found = search::find_duplicates(&store, &params)?;
        log::info!("{} duplicate group(s) found", found.len());
        if let Some(path) = &cli.searchres {
            results::save(path, &found)?;
        }
        groups = Some(found);
    } else if cli.ui {
        if let Some(path) = &cli.searchres {
            let loaded = results::load(path)?;
            groups = Some(results::filter_stale(&store, loaded)?);
        }
    }

    if let Some(groups) = &groups {
        search::print_groups(groups);
    }

    if cli.ui {
        let Some(groups) = &groups else {
            return Err(ScenedupError::InvalidInput(
                "--ui needs --search or a --searchres file to read".into(),
            )
            .into());
        };
        let results_path = match &cli.searchres {
            Some(path) => path.clone(),
            None => {
                let path = std::env::temp_dir().join("scenedup-results.yaml");
                results::save(&path, groups)?;
                path
            }
        };
        launch_ui(&results_path)?;
    }

    Ok(())
}

fn run_import(store: &mut Store, cli: &Cli) -> Result<()> {
    let opts = ImportOptions {
        refresh: cli.refresh,
        repair: cli.repair,
        extensions: config::parse_extensions(&cli.vidext),
        lock_ttl: Duration::from_secs(DEFAULT_LOCK_TTL_SECS),
    };

    let mut paths = Vec::new();
    if let Some(dir) = &cli.dir {
        paths.extend(import::collect_video_files(
            dir,
            &opts.extensions,
            Duration::from_secs(FRESH_FILE_GUARD_SECS),
        )?);
    }
    if let Some(pattern) = &cli.file {
        paths.extend(import::expand_glob(pattern)?);
    }
    log::info!("{} file(s) queued for import", paths.len());

    // First ctrl-c stops after the current file; a second one interrupts it.
    let stop = StopToken::new();
    let handler_token = stop.clone();
    ctrlc::set_handler(move || {
        if handler_token.is_stopped() {
            handler_token.interrupt();
        } else {
            handler_token.stop();
        }
    })
    .context("install stop handler")?;

    let stats = import::import_files(store, &paths, &opts, &stop)?;
    log::info!(
        "import finished: {} imported, {} skipped, {} failed{}",
        stats.imported,
        stats.skipped,
        stats.failed,
        if stats.stopped { " (stopped early)" } else { "" }
    );
    Ok(())
}

/// Log lines are `<iso-timestamp>;<LEVEL>;<message>`.
fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            writeln!(
                buf,
                "{};{};{}",
                chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%z"),
                record.level(),
                record.args()
            )
        })
        .init();
}

#[cfg(unix)]
fn set_nice(level: i32) {
    let rc = unsafe { libc::nice(level) };
    if rc == -1 {
        log::warn!("could not set nice level {}", level);
    }
}

#[cfg(not(unix))]
fn set_nice(_level: i32) {}

fn launch_ui(results_path: &Path) -> Result<()> {
    let command = std::env::var("SCENEDUP_UI").unwrap_or_else(|_| "scenedup-ui".to_string());
    log::info!("launching review UI: {} {}", command, results_path.display());
    let status = Command::new(&command)
        .arg(results_path)
        .status()
        .with_context(|| format!("spawn review UI '{}'", command))?;
    if !status.success() {
        log::warn!("review UI exited with {}", status);
    }
    Ok(())
}
