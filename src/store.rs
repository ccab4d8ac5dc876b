//! SQLite gateway.
//!
//! The store exclusively owns persisted state: file rows, per-file
//! brightness, per-file extrema hashes, pairwise whitelists, and advisory
//! import locks. Reads are single statements (read committed); multi-row
//! writes run inside explicit transactions. Busy/locked failures are retried
//! once per statement and then surface as `StoreTransient`; everything else
//! is `StoreFatal`.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use crate::extrema::HashPoint;
use crate::{FileInfo, ScenedupError};

const RETRY_DELAY: Duration = Duration::from_millis(100);

pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).map_err(classify)?;
        let store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(classify)?;
        let store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&self) -> Result<()> {
        self.conn
            .execute_batch(
                r#"
            PRAGMA journal_mode=WAL;
            PRAGMA foreign_keys=ON;

            CREATE TABLE IF NOT EXISTS files (
              fid INTEGER PRIMARY KEY AUTOINCREMENT,
              name TEXT NOT NULL UNIQUE,
              fps REAL NOT NULL,
              duration REAL NOT NULL
            );

            CREATE TABLE IF NOT EXISTS brightness (
              fid INTEGER NOT NULL REFERENCES files(fid) ON DELETE CASCADE,
              frame_index INTEGER NOT NULL,
              value REAL NOT NULL,
              PRIMARY KEY (fid, frame_index)
            );

            CREATE TABLE IF NOT EXISTS hashes (
              fid INTEGER NOT NULL REFERENCES files(fid) ON DELETE CASCADE,
              frame_index INTEGER NOT NULL,
              gap REAL NOT NULL,
              PRIMARY KEY (fid, frame_index)
            );

            CREATE TABLE IF NOT EXISTS whitelist (
              fid_lo INTEGER NOT NULL REFERENCES files(fid) ON DELETE CASCADE,
              fid_hi INTEGER NOT NULL REFERENCES files(fid) ON DELETE CASCADE,
              PRIMARY KEY (fid_lo, fid_hi),
              CHECK (fid_lo < fid_hi)
            );

            CREATE TABLE IF NOT EXISTS import_locks (
              name TEXT PRIMARY KEY,
              acquired_at INTEGER NOT NULL
            );
            "#,
            )
            .map_err(classify)?;
        Ok(())
    }

    pub fn is_name_in_db(&self, path: &str) -> Result<bool> {
        Ok(self.get_id(path)?.is_some())
    }

    pub fn get_id(&self, path: &str) -> Result<Option<i64>> {
        with_retry(|| {
            self.conn
                .query_row("SELECT fid FROM files WHERE name = ?1", params![path], |row| {
                    row.get(0)
                })
                .optional()
        })
    }

    /// Acquire the advisory import lock for `path`. A lock younger than
    /// `ttl` is still owned by someone else; a stale one is taken over.
    pub fn try_lock(&mut self, path: &str, ttl: Duration) -> Result<()> {
        let now = now_s()? as i64;
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(classify)?;

        let acquired_at: Option<i64> = tx
            .query_row(
                "SELECT acquired_at FROM import_locks WHERE name = ?1",
                params![path],
                |row| row.get(0),
            )
            .optional()
            .map_err(classify)?;
        if let Some(acquired_at) = acquired_at {
            if now - acquired_at < ttl.as_secs() as i64 {
                return Err(ScenedupError::AlreadyLocked(path.to_string()).into());
            }
        }

        tx.execute(
            "INSERT OR REPLACE INTO import_locks(name, acquired_at) VALUES (?1, ?2)",
            params![path, now],
        )
        .map_err(classify)?;
        tx.commit().map_err(classify)?;
        Ok(())
    }

    pub fn unlock(&mut self, path: &str) -> Result<()> {
        with_retry(|| {
            self.conn
                .execute("DELETE FROM import_locks WHERE name = ?1", params![path])
        })?;
        Ok(())
    }

    pub fn insert_file(&mut self, path: &str, fps: f64, duration: f64) -> Result<FileInfo> {
        with_retry(|| {
            self.conn.execute(
                "INSERT INTO files(name, fps, duration) VALUES (?1, ?2, ?3)",
                params![path, fps, duration],
            )
        })?;
        Ok(FileInfo {
            fid: self.conn.last_insert_rowid(),
            name: path.to_string(),
            fps,
            duration,
        })
    }

    pub fn insert_brightness(&mut self, fid: i64, series: &[f32]) -> Result<()> {
        let tx = self.conn.transaction().map_err(classify)?;
        insert_brightness_rows(&tx, fid, series)?;
        tx.commit().map_err(classify)?;
        Ok(())
    }

    pub fn insert_hashes(&mut self, fid: i64, points: &[HashPoint]) -> Result<()> {
        let tx = self.conn.transaction().map_err(classify)?;
        insert_hash_rows(&tx, fid, points)?;
        tx.commit().map_err(classify)?;
        Ok(())
    }

    /// One import as a single transaction: file row (inserted, or refreshed
    /// in place so the fid and its whitelists survive), then brightness,
    /// then hashes.
    pub fn import_file(
        &mut self,
        path: &str,
        fps: f64,
        duration: f64,
        series: &[f32],
        points: &[HashPoint],
    ) -> Result<FileInfo> {
        let tx = self.conn.transaction().map_err(classify)?;

        let existing: Option<i64> = tx
            .query_row("SELECT fid FROM files WHERE name = ?1", params![path], |row| {
                row.get(0)
            })
            .optional()
            .map_err(classify)?;
        let fid = match existing {
            Some(fid) => {
                tx.execute("DELETE FROM brightness WHERE fid = ?1", params![fid])
                    .map_err(classify)?;
                tx.execute("DELETE FROM hashes WHERE fid = ?1", params![fid])
                    .map_err(classify)?;
                tx.execute(
                    "UPDATE files SET fps = ?2, duration = ?3 WHERE fid = ?1",
                    params![fid, fps, duration],
                )
                .map_err(classify)?;
                fid
            }
            None => {
                tx.execute(
                    "INSERT INTO files(name, fps, duration) VALUES (?1, ?2, ?3)",
                    params![path, fps, duration],
                )
                .map_err(classify)?;
                tx.last_insert_rowid()
            }
        };

        insert_brightness_rows(&tx, fid, series)?;
        insert_hash_rows(&tx, fid, points)?;
        tx.commit().map_err(classify)?;

        Ok(FileInfo {
            fid,
            name: path.to_string(),
            fps,
            duration,
        })
    }

    pub fn has_hashes(&self, fid: i64) -> Result<bool> {
        let count: i64 = with_retry(|| {
            self.conn.query_row(
                "SELECT COUNT(*) FROM hashes WHERE fid = ?1",
                params![fid],
                |row| row.get(0),
            )
        })?;
        Ok(count > 0)
    }

    pub fn get_brightness(&self, fid: i64) -> Result<Vec<f32>> {
        let mut stmt = self
            .conn
            .prepare("SELECT value FROM brightness WHERE fid = ?1 ORDER BY frame_index ASC")
            .map_err(classify)?;
        let rows = stmt
            .query_map(params![fid], |row| row.get::<_, f64>(0))
            .map_err(classify)?;
        let mut out = Vec::new();
        for value in rows {
            out.push(value.map_err(classify)? as f32);
        }
        Ok(out)
    }

    /// Hash rows with `min_frame <= frame_index < max_frame`, ordered by
    /// frame index, as parallel frame/gap vectors.
    pub fn get_hashes(&self, fid: i64, min_frame: u32, max_frame: u32) -> Result<(Vec<u32>, Vec<f32>)> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT frame_index, gap FROM hashes \
                 WHERE fid = ?1 AND frame_index >= ?2 AND frame_index < ?3 \
                 ORDER BY frame_index ASC",
            )
            .map_err(classify)?;
        let rows = stmt
            .query_map(params![fid, min_frame, max_frame], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, f64>(1)?))
            })
            .map_err(classify)?;
        let mut frames = Vec::new();
        let mut gaps = Vec::new();
        for row in rows {
            let (frame, gap) = row.map_err(classify)?;
            frames.push(frame as u32);
            gaps.push(gap as f32);
        }
        Ok((frames, gaps))
    }

    pub fn get_file_infos(&self) -> Result<Vec<FileInfo>> {
        let mut stmt = self
            .conn
            .prepare("SELECT fid, name, fps, duration FROM files ORDER BY fid ASC")
            .map_err(classify)?;
        let rows = stmt.query_map([], row_to_file_info).map_err(classify)?;
        let mut out = Vec::new();
        for fi in rows {
            out.push(fi.map_err(classify)?);
        }
        Ok(out)
    }

    pub fn get_file_info(&self, fid: i64) -> Result<Option<FileInfo>> {
        with_retry(|| {
            self.conn
                .query_row(
                    "SELECT fid, name, fps, duration FROM files WHERE fid = ?1",
                    params![fid],
                    row_to_file_info,
                )
                .optional()
        })
    }

    pub fn update_name(&mut self, fid: i64, new_path: &str) -> Result<()> {
        with_retry(|| {
            self.conn.execute(
                "UPDATE files SET name = ?2 WHERE fid = ?1",
                params![fid, new_path],
            )
        })?;
        Ok(())
    }

    /// Delete a file row; brightness, hashes and whitelist rows cascade.
    pub fn del_file(&mut self, fid: i64) -> Result<()> {
        with_retry(|| self.conn.execute("DELETE FROM files WHERE fid = ?1", params![fid]))?;
        Ok(())
    }

    /// Record that matches between `a` and `b` should be suppressed.
    /// Idempotent; the pair is stored with the smaller fid first.
    pub fn whitelist(&mut self, a: i64, b: i64) -> Result<()> {
        if a == b {
            return Err(
                ScenedupError::InvalidInput("cannot whitelist a file against itself".into()).into(),
            );
        }
        let (lo, hi) = (a.min(b), a.max(b));
        with_retry(|| {
            self.conn.execute(
                "INSERT OR IGNORE INTO whitelist(fid_lo, fid_hi) VALUES (?1, ?2)",
                params![lo, hi],
            )
        })?;
        Ok(())
    }

    pub fn is_whitelisted(&self, a: i64, b: i64) -> Result<bool> {
        let (lo, hi) = (a.min(b), a.max(b));
        let count: i64 = with_retry(|| {
            self.conn.query_row(
                "SELECT COUNT(*) FROM whitelist WHERE fid_lo = ?1 AND fid_hi = ?2",
                params![lo, hi],
                |row| row.get(0),
            )
        })?;
        Ok(count > 0)
    }

    /// Files that have a brightness series but no hashes yet; the migrate
    /// maintenance pass re-hashes exactly these.
    pub fn files_missing_hashes(&self) -> Result<Vec<FileInfo>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT f.fid, f.name, f.fps, f.duration FROM files f \
                 WHERE NOT EXISTS (SELECT 1 FROM hashes h WHERE h.fid = f.fid) \
                 AND EXISTS (SELECT 1 FROM brightness b WHERE b.fid = f.fid) \
                 ORDER BY f.fid ASC",
            )
            .map_err(classify)?;
        let rows = stmt.query_map([], row_to_file_info).map_err(classify)?;
        let mut out = Vec::new();
        for fi in rows {
            out.push(fi.map_err(classify)?);
        }
        Ok(out)
    }

    /// Live whitelist pairs (diagnostics and tests).
    pub fn whitelist_pairs(&self) -> Result<Vec<(i64, i64)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT fid_lo, fid_hi FROM whitelist ORDER BY fid_lo, fid_hi")
            .map_err(classify)?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .map_err(classify)?;
        let mut out = Vec::new();
        for pair in rows {
            out.push(pair.map_err(classify)?);
        }
        Ok(out)
    }
}

fn row_to_file_info(row: &rusqlite::Row<'_>) -> rusqlite::Result<FileInfo> {
    Ok(FileInfo {
        fid: row.get(0)?,
        name: row.get(1)?,
        fps: row.get(2)?,
        duration: row.get(3)?,
    })
}

fn insert_brightness_rows(tx: &rusqlite::Transaction<'_>, fid: i64, series: &[f32]) -> Result<()> {
    let mut stmt = tx
        .prepare("INSERT INTO brightness(fid, frame_index, value) VALUES (?1, ?2, ?3)")
        .map_err(classify)?;
    for (i, &value) in series.iter().enumerate() {
        stmt.execute(params![fid, i as i64, value as f64])
            .map_err(classify)?;
    }
    Ok(())
}

fn insert_hash_rows(tx: &rusqlite::Transaction<'_>, fid: i64, points: &[HashPoint]) -> Result<()> {
    let mut stmt = tx
        .prepare("INSERT INTO hashes(fid, frame_index, gap) VALUES (?1, ?2, ?3)")
        .map_err(classify)?;
    for point in points {
        stmt.execute(params![fid, point.frame, point.gap as f64])
            .map_err(classify)?;
    }
    Ok(())
}

fn is_transient(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(code, _)
            if matches!(
                code.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            )
    )
}

fn classify(err: rusqlite::Error) -> anyhow::Error {
    if is_transient(&err) {
        ScenedupError::StoreTransient(err.to_string()).into()
    } else {
        ScenedupError::StoreFatal(err.to_string()).into()
    }
}

/// Run a single statement, retrying once on a transient failure.
fn with_retry<T>(mut op: impl FnMut() -> rusqlite::Result<T>) -> Result<T> {
    match op() {
        Ok(value) => Ok(value),
        Err(err) if is_transient(&err) => {
            log::warn!("transient store error, retrying once: {}", err);
            std::thread::sleep(RETRY_DELAY);
            op().map_err(classify)
        }
        Err(err) => Err(classify(err)),
    }
}

fn now_s() -> Result<u64> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded_store() -> (Store, FileInfo, FileInfo) {
        let mut store = Store::open_in_memory().unwrap();
        let a = store.insert_file("/videos/a.mkv", 25.0, 30.0).unwrap();
        let b = store.insert_file("/videos/b.mkv", 25.0, 30.0).unwrap();
        (store, a, b)
    }

    #[test]
    fn file_rows_round_trip() {
        let (store, a, b) = seeded_store();
        assert!(a.fid < b.fid);
        assert!(store.is_name_in_db("/videos/a.mkv").unwrap());
        assert!(!store.is_name_in_db("/videos/c.mkv").unwrap());
        assert_eq!(store.get_id("/videos/b.mkv").unwrap(), Some(b.fid));
        assert_eq!(store.get_file_infos().unwrap(), vec![a, b]);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let (mut store, _, _) = seeded_store();
        assert!(store.insert_file("/videos/a.mkv", 30.0, 10.0).is_err());
    }

    #[test]
    fn hash_range_query_is_half_open() {
        let (mut store, a, _) = seeded_store();
        let points: Vec<HashPoint> = [(100u32, 4.0f32), (200, 4.0), (300, 4.0), (400, 4.0)]
            .iter()
            .map(|&(frame, gap)| HashPoint { frame, gap })
            .collect();
        store.insert_hashes(a.fid, &points).unwrap();
        assert!(store.has_hashes(a.fid).unwrap());

        let (frames, gaps) = store.get_hashes(a.fid, 200, 400).unwrap();
        assert_eq!(frames, vec![200, 300]);
        assert_eq!(gaps.len(), 2);
    }

    #[test]
    fn delete_cascades_to_dependents() {
        let (mut store, a, b) = seeded_store();
        store.insert_brightness(a.fid, &[1.0, 2.0, 3.0]).unwrap();
        store
            .insert_hashes(a.fid, &[HashPoint { frame: 10, gap: 0.4 }])
            .unwrap();
        store.whitelist(a.fid, b.fid).unwrap();

        store.del_file(a.fid).unwrap();
        assert!(store.get_file_info(a.fid).unwrap().is_none());
        assert!(store.get_brightness(a.fid).unwrap().is_empty());
        assert!(!store.has_hashes(a.fid).unwrap());
        assert!(store.whitelist_pairs().unwrap().is_empty());
    }

    #[test]
    fn whitelist_is_symmetric_and_idempotent() {
        let (mut store, a, b) = seeded_store();
        store.whitelist(b.fid, a.fid).unwrap();
        store.whitelist(a.fid, b.fid).unwrap();
        assert!(store.is_whitelisted(a.fid, b.fid).unwrap());
        assert!(store.is_whitelisted(b.fid, a.fid).unwrap());
        assert_eq!(store.whitelist_pairs().unwrap(), vec![(a.fid, b.fid)]);
        assert!(store.whitelist(a.fid, a.fid).is_err());
    }

    #[test]
    fn refresh_keeps_fid_and_whitelist() {
        let (mut store, a, b) = seeded_store();
        store.whitelist(a.fid, b.fid).unwrap();

        let refreshed = store
            .import_file(
                "/videos/a.mkv",
                30.0,
                42.0,
                &[5.0, 6.0],
                &[HashPoint { frame: 12, gap: 0.4 }],
            )
            .unwrap();
        assert_eq!(refreshed.fid, a.fid);
        assert!((refreshed.fps - 30.0).abs() < 1e-9);
        assert!(store.is_whitelisted(a.fid, b.fid).unwrap());
        assert_eq!(store.get_brightness(a.fid).unwrap(), vec![5.0, 6.0]);
    }

    #[test]
    fn fresh_lock_blocks_second_owner() {
        let mut store = Store::open_in_memory().unwrap();
        let ttl = Duration::from_secs(3600);
        store.try_lock("/videos/a.mkv", ttl).unwrap();

        let err = store.try_lock("/videos/a.mkv", ttl).unwrap_err();
        let err = err.downcast::<ScenedupError>().unwrap();
        assert!(matches!(err, ScenedupError::AlreadyLocked(_)));

        store.unlock("/videos/a.mkv").unwrap();
        store.try_lock("/videos/a.mkv", ttl).unwrap();
    }

    #[test]
    fn expired_lock_is_taken_over() {
        let mut store = Store::open_in_memory().unwrap();
        store.try_lock("/videos/a.mkv", Duration::from_secs(0)).unwrap();
        // TTL zero means the first lock is already stale.
        store.try_lock("/videos/a.mkv", Duration::from_secs(0)).unwrap();
    }

    #[test]
    fn migrate_candidates_need_brightness_without_hashes() {
        let (mut store, a, b) = seeded_store();
        store.insert_brightness(a.fid, &[1.0, 2.0]).unwrap();
        store.insert_brightness(b.fid, &[1.0, 2.0]).unwrap();
        store
            .insert_hashes(b.fid, &[HashPoint { frame: 5, gap: 0.2 }])
            .unwrap();

        let missing = store.files_missing_hashes().unwrap();
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].fid, a.fid);
    }
}
