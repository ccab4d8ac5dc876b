//! Duplicate-scene search.
//!
//! Windows are queried against the vector index in stride order; each hit
//! set is reduced to the files involved, filtered against already-reported
//! and whitelisted pairs, and projected to `(file, offset)` groups. A group
//! lists each file once, at its earliest matching window. Per-window
//! failures are logged and skipped; an empty result is a successful run.

use std::collections::{BTreeSet, HashSet};

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::config::SearchParams;
use crate::knn::VectorIndex;
use crate::store::Store;
use crate::windows::{self, WindowRef};
use crate::{format_offset, FileInfo};

/// One member of a duplicate group: a file and the offset in seconds at
/// which its matching scene begins.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SceneMatch {
    pub file: FileInfo,
    pub offset: f64,
}

pub type MatchGroup = Vec<SceneMatch>;

/// Full search pass: build windows from the store, index them, and cluster
/// neighbor hits into duplicate groups.
pub fn find_duplicates(store: &Store, params: &SearchParams) -> Result<Vec<MatchGroup>> {
    params.validate()?;

    let set = windows::build(store, params)?;
    log::info!(
        "search over {} windows (backend {})",
        set.len(),
        params.backend.name()
    );
    if set.is_empty() {
        return Ok(Vec::new());
    }

    let windows::WindowSet { items, refs } = set;
    let index = VectorIndex::build(params.backend, items);
    run(store, &refs, &index, params)
}

/// Drive the grouping over an already-built index.
pub fn run(
    store: &Store,
    refs: &[WindowRef],
    index: &VectorIndex,
    params: &SearchParams,
) -> Result<Vec<MatchGroup>> {
    let mut known_pairs: HashSet<(i64, i64)> = HashSet::new();
    let mut groups = Vec::new();

    let mut i = 0usize;
    while i < index.len() {
        match group_for_window(store, refs, index, params, i, &mut known_pairs) {
            Ok(Some(group)) => groups.push(group),
            Ok(None) => {}
            Err(err) => log::warn!("window {} skipped: {}", i, err),
        }
        i += params.step;
    }

    Ok(groups)
}

fn group_for_window(
    store: &Store,
    refs: &[WindowRef],
    index: &VectorIndex,
    params: &SearchParams,
    i: usize,
    known_pairs: &mut HashSet<(i64, i64)>,
) -> Result<Option<MatchGroup>> {
    let neighbors = index.query(i, params.radius)?;
    if neighbors.len() <= 1 {
        return Ok(None);
    }

    let fids: BTreeSet<i64> = neighbors.iter().map(|&m| refs[m].file.fid).collect();
    let fid_list: Vec<i64> = fids.into_iter().collect();

    let mut candidate_pairs = Vec::new();
    for (ai, &a) in fid_list.iter().enumerate() {
        for &b in &fid_list[ai + 1..] {
            if known_pairs.contains(&(a, b)) {
                continue;
            }
            if store.is_whitelisted(a, b)? {
                continue;
            }
            candidate_pairs.push((a, b));
        }
    }
    if candidate_pairs.is_empty() {
        return Ok(None);
    }
    known_pairs.extend(candidate_pairs.iter().copied());

    let live: HashSet<i64> = candidate_pairs
        .iter()
        .flat_map(|&(a, b)| [a, b])
        .collect();

    // Neighbors are in ascending window order, so the first occurrence of a
    // file is its earliest matching window.
    let mut details: MatchGroup = Vec::new();
    let mut seen: HashSet<i64> = HashSet::new();
    for &m in &neighbors {
        let fid = refs[m].file.fid;
        if !live.contains(&fid) || seen.contains(&fid) {
            continue;
        }
        seen.insert(fid);
        details.push(SceneMatch {
            file: refs[m].file.clone(),
            offset: refs[m].offset_seconds(),
        });
    }

    if details.len() > 1 {
        Ok(Some(details))
    } else {
        Ok(None)
    }
}

/// Render groups as ready-to-paste `ffplay` invocations, one line per
/// member, groups separated by a blank line.
pub fn print_groups(groups: &[MatchGroup]) {
    for (i, group) in groups.iter().enumerate() {
        if i > 0 {
            println!();
        }
        for m in group {
            println!("ffplay -ss {} '{}'", format_offset(m.offset), m.file.name);
        }
    }
}
