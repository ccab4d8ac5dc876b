//! Search-result persistence.
//!
//! Groups round-trip through a self-describing YAML document of flat
//! records, one per member. Absolute paths are re-projected as stored;
//! filtering against the current disk and whitelist state is a separate,
//! explicit step so a saved result file stays a faithful record of the run.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::search::{MatchGroup, SceneMatch};
use crate::store::Store;
use crate::{is_readable, FileInfo};

#[derive(Debug, Serialize, Deserialize)]
struct ResultEntry {
    fid: i64,
    name: String,
    fps: f64,
    duration: f64,
    offset: f64,
}

impl From<&SceneMatch> for ResultEntry {
    fn from(m: &SceneMatch) -> Self {
        Self {
            fid: m.file.fid,
            name: m.file.name.clone(),
            fps: m.file.fps,
            duration: m.file.duration,
            offset: m.offset,
        }
    }
}

impl From<ResultEntry> for SceneMatch {
    fn from(entry: ResultEntry) -> Self {
        Self {
            file: FileInfo {
                fid: entry.fid,
                name: entry.name,
                fps: entry.fps,
                duration: entry.duration,
            },
            offset: entry.offset,
        }
    }
}

pub fn save(path: &Path, groups: &[MatchGroup]) -> Result<()> {
    let records: Vec<Vec<ResultEntry>> = groups
        .iter()
        .map(|group| group.iter().map(ResultEntry::from).collect())
        .collect();
    let file =
        File::create(path).with_context(|| format!("create result file {}", path.display()))?;
    serde_yaml::to_writer(BufWriter::new(file), &records)
        .with_context(|| format!("serialize results to {}", path.display()))?;
    Ok(())
}

pub fn load(path: &Path) -> Result<Vec<MatchGroup>> {
    let file =
        File::open(path).with_context(|| format!("open result file {}", path.display()))?;
    let records: Vec<Vec<ResultEntry>> = serde_yaml::from_reader(BufReader::new(file))
        .with_context(|| format!("parse results from {}", path.display()))?;
    Ok(records
        .into_iter()
        .map(|group| group.into_iter().map(SceneMatch::from).collect())
        .collect())
}

/// Drop members whose paths are no longer readable and members whose every
/// remaining pairing has since been whitelisted; groups shrinking below two
/// members disappear.
pub fn filter_stale(store: &Store, groups: Vec<MatchGroup>) -> Result<Vec<MatchGroup>> {
    let mut out = Vec::new();
    for group in groups {
        let readable: Vec<SceneMatch> = group
            .into_iter()
            .filter(|m| is_readable(Path::new(&m.file.name)))
            .collect();

        let mut live = Vec::new();
        for m in &readable {
            let mut paired = false;
            for other in &readable {
                if other.file.fid == m.file.fid {
                    continue;
                }
                if !store.is_whitelisted(m.file.fid, other.file.fid)? {
                    paired = true;
                    break;
                }
            }
            if paired {
                live.push(m.clone());
            }
        }
        if live.len() > 1 {
            out.push(live);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_groups(a_name: &str, b_name: &str) -> Vec<MatchGroup> {
        vec![vec![
            SceneMatch {
                file: FileInfo {
                    fid: 1,
                    name: a_name.to_string(),
                    fps: 25.0,
                    duration: 30.0,
                },
                offset: 12.5,
            },
            SceneMatch {
                file: FileInfo {
                    fid: 2,
                    name: b_name.to_string(),
                    fps: 25.0,
                    duration: 30.0,
                },
                offset: 12.5,
            },
        ]]
    }

    #[test]
    fn groups_round_trip_through_yaml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("results.yaml");
        let groups = sample_groups("/videos/a.mkv", "/videos/b.mkv");

        save(&path, &groups).unwrap();
        let loaded = load(&path).unwrap();
        assert_eq!(loaded, groups);
    }

    #[test]
    fn unreadable_members_are_filtered_on_reload() {
        let dir = tempdir().unwrap();
        let a_path = dir.path().join("a.mkv");
        std::fs::write(&a_path, b"x").unwrap();
        let missing = dir.path().join("gone.mkv");

        let store = Store::open_in_memory().unwrap();
        let groups = sample_groups(
            a_path.to_str().unwrap(),
            missing.to_str().unwrap(),
        );
        let filtered = filter_stale(&store, groups).unwrap();
        assert!(filtered.is_empty());
    }

    #[test]
    fn whitelisted_pairs_are_filtered_on_reload() {
        let dir = tempdir().unwrap();
        let a_path = dir.path().join("a.mkv");
        let b_path = dir.path().join("b.mkv");
        std::fs::write(&a_path, b"x").unwrap();
        std::fs::write(&b_path, b"x").unwrap();

        let mut store = Store::open_in_memory().unwrap();
        let a = store.insert_file(a_path.to_str().unwrap(), 25.0, 30.0).unwrap();
        let b = store.insert_file(b_path.to_str().unwrap(), 25.0, 30.0).unwrap();

        let mut groups = sample_groups(a_path.to_str().unwrap(), b_path.to_str().unwrap());
        groups[0][0].file.fid = a.fid;
        groups[0][1].file.fid = b.fid;

        assert_eq!(filter_stale(&store, groups.clone()).unwrap(), groups);

        store.whitelist(a.fid, b.fid).unwrap();
        assert!(filter_stale(&store, groups).unwrap().is_empty());
    }
}
