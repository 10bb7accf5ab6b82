//! Target plates and the detection log.
//!
//! Schema (one SQLite file):
//! - `target_plats(id, plat_nomor UNIQUE)`
//! - `detection_logs(id, timestamp, plat_nomor, is_target, screenshot_path)`
//!
//! Every mutation is a single statement (or a single transaction for bulk
//! delete); nothing spans more than one logical write.

use chrono::{DateTime, Local};
use rand::RngCore;
use rusqlite::{params, params_from_iter, Connection, ErrorCode, OpenFlags, OptionalExtension};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

use crate::plate::{normalize_target, CanonicalPlate, TargetPlateSet};

/// Storage format for `detection_logs.timestamp`.
pub const LOG_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("plate number must not be empty")]
    EmptyPlate,
    #[error("plate \"{0}\" is already in the target list")]
    Duplicate(String),
    #[error("no target plate with id {0}")]
    NotFound(i64),
    #[error("no log entries selected")]
    NoIdsSelected,
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store lock poisoned")]
    Poisoned,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TargetPlate {
    pub id: i64,
    pub plat_nomor: String,
}

/// A detection about to be logged.
#[derive(Clone, Debug)]
pub struct NewDetection {
    pub at: DateTime<Local>,
    pub plate: CanonicalPlate,
    pub is_target: bool,
    pub screenshot_path: Option<PathBuf>,
}

/// A stored detection log row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DetectionLogEntry {
    pub id: i64,
    pub timestamp: String,
    pub plat_nomor: String,
    pub is_target: bool,
    pub screenshot_path: Option<String>,
}

pub trait TargetPlateStore: Send + Sync {
    /// Snapshot of all targets for membership tests.
    fn list_targets(&self) -> Result<TargetPlateSet, StoreError>;

    /// All targets ordered by plate text.
    fn list(&self) -> Result<Vec<TargetPlate>, StoreError>;

    fn add(&self, plate: &str) -> Result<TargetPlate, StoreError>;

    /// Rename target `id`. Fails with `Duplicate` when another id owns `plate`.
    fn edit(&self, id: i64, plate: &str) -> Result<TargetPlate, StoreError>;

    fn delete(&self, id: i64) -> Result<(), StoreError>;

    /// Returns the number of targets removed.
    fn delete_all(&self) -> Result<usize, StoreError>;

    /// Insert `plates`, skipping empty values and ones already present.
    fn seed(&self, plates: &[String]) -> Result<usize, StoreError> {
        let mut inserted = 0;
        for plate in plates {
            match self.add(plate) {
                Ok(_) => inserted += 1,
                Err(StoreError::Duplicate(_)) | Err(StoreError::EmptyPlate) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(inserted)
    }
}

pub trait DetectionLogStore: Send + Sync {
    /// Append one row; returns its id.
    fn append(&self, entry: &NewDetection) -> Result<i64, StoreError>;

    /// All rows, newest first.
    fn list(&self) -> Result<Vec<DetectionLogEntry>, StoreError>;

    /// Delete rows by id together with their screenshot files.
    ///
    /// Missing files are ignored. Returns the number of rows deleted.
    fn delete_by_ids(&self, ids: &[i64]) -> Result<usize, StoreError>;
}

fn clean_plate(plate: &str) -> Result<String, StoreError> {
    let cleaned = normalize_target(plate);
    if cleaned.is_empty() {
        return Err(StoreError::EmptyPlate);
    }
    Ok(cleaned)
}

fn remove_screenshot(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => log::info!("screenshot removed: {}", path.display()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => log::warn!("failed to remove screenshot {}: {}", path.display(), err),
    }
}

// ----------------------------------------------------------------------------
// SQLite
// ----------------------------------------------------------------------------

/// Unique URI for a shared in-memory database, for tests and dry runs.
pub fn shared_memory_uri() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!(
        "file:platewatch_{:x}?mode=memory&cache=shared",
        u64::from_le_bytes(bytes)
    )
}

pub(crate) fn open_db_connection(db_path: &str) -> Result<Connection, StoreError> {
    if db_path.starts_with("file:") {
        return Ok(Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI,
        )?);
    }
    Ok(Connection::open(db_path)?)
}

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(db_path: &str) -> Result<Self, StoreError> {
        let conn = open_db_connection(db_path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.ensure_schema()?;
        Ok(store)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    fn ensure_schema(&self) -> Result<(), StoreError> {
        self.conn()?.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS target_plats (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              plat_nomor TEXT NOT NULL UNIQUE
            );

            CREATE TABLE IF NOT EXISTS detection_logs (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              timestamp DATETIME NOT NULL,
              plat_nomor TEXT NOT NULL,
              is_target BOOLEAN NOT NULL,
              screenshot_path TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_logs_timestamp ON detection_logs(timestamp);
            "#,
        )?;
        Ok(())
    }
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

impl TargetPlateStore for SqliteStore {
    fn list_targets(&self) -> Result<TargetPlateSet, StoreError> {
        Ok(TargetPlateStore::list(self)?
            .into_iter()
            .map(|t| t.plat_nomor)
            .collect())
    }

    fn list(&self) -> Result<Vec<TargetPlate>, StoreError> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT id, plat_nomor FROM target_plats ORDER BY plat_nomor ASC")?;
        let rows = stmt.query_map([], |row| {
            Ok(TargetPlate {
                id: row.get(0)?,
                plat_nomor: row.get(1)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn add(&self, plate: &str) -> Result<TargetPlate, StoreError> {
        let plate = clean_plate(plate)?;
        let conn = self.conn()?;
        match conn.execute(
            "INSERT INTO target_plats (plat_nomor) VALUES (?1)",
            params![plate],
        ) {
            Ok(_) => Ok(TargetPlate {
                id: conn.last_insert_rowid(),
                plat_nomor: plate,
            }),
            Err(err) if is_unique_violation(&err) => Err(StoreError::Duplicate(plate)),
            Err(err) => Err(err.into()),
        }
    }

    fn edit(&self, id: i64, plate: &str) -> Result<TargetPlate, StoreError> {
        let plate = clean_plate(plate)?;
        let conn = self.conn()?;
        let taken: Option<i64> = conn
            .query_row(
                "SELECT id FROM target_plats WHERE plat_nomor = ?1 AND id != ?2",
                params![plate, id],
                |row| row.get(0),
            )
            .optional()?;
        if taken.is_some() {
            return Err(StoreError::Duplicate(plate));
        }
        let changed = conn.execute(
            "UPDATE target_plats SET plat_nomor = ?1 WHERE id = ?2",
            params![plate, id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(TargetPlate {
            id,
            plat_nomor: plate,
        })
    }

    fn delete(&self, id: i64) -> Result<(), StoreError> {
        let changed = self
            .conn()?
            .execute("DELETE FROM target_plats WHERE id = ?1", params![id])?;
        if changed == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    fn delete_all(&self) -> Result<usize, StoreError> {
        Ok(self.conn()?.execute("DELETE FROM target_plats", [])?)
    }
}

impl DetectionLogStore for SqliteStore {
    fn append(&self, entry: &NewDetection) -> Result<i64, StoreError> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO detection_logs (timestamp, plat_nomor, is_target, screenshot_path)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![
                entry.at.format(LOG_TIMESTAMP_FORMAT).to_string(),
                entry.plate.as_str(),
                entry.is_target,
                entry
                    .screenshot_path
                    .as_ref()
                    .map(|p| p.to_string_lossy().to_string()),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn list(&self) -> Result<Vec<DetectionLogEntry>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, timestamp, plat_nomor, is_target, screenshot_path
            FROM detection_logs ORDER BY timestamp DESC, id DESC
            "#,
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(DetectionLogEntry {
                id: row.get(0)?,
                timestamp: row.get(1)?,
                plat_nomor: row.get(2)?,
                is_target: row.get(3)?,
                screenshot_path: row.get(4)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn delete_by_ids(&self, ids: &[i64]) -> Result<usize, StoreError> {
        if ids.is_empty() {
            return Err(StoreError::NoIdsSelected);
        }
        let placeholders = vec!["?"; ids.len()].join(",");
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let paths = {
            let mut stmt = tx.prepare(&format!(
                "SELECT screenshot_path FROM detection_logs WHERE id IN ({}) AND screenshot_path IS NOT NULL",
                placeholders
            ))?;
            let rows = stmt.query_map(params_from_iter(ids.iter()), |row| row.get::<_, String>(0))?;
            let paths = rows.collect::<Result<Vec<_>, _>>()?;
            paths
        };
        let deleted = tx.execute(
            &format!("DELETE FROM detection_logs WHERE id IN ({})", placeholders),
            params_from_iter(ids.iter()),
        )?;
        tx.commit()?;

        for path in paths {
            remove_screenshot(Path::new(&path));
        }
        Ok(deleted)
    }
}

// ----------------------------------------------------------------------------
// In-memory
// ----------------------------------------------------------------------------

#[derive(Debug, Default)]
struct InMemoryState {
    next_target_id: i64,
    targets: BTreeMap<i64, String>,
    next_log_id: i64,
    logs: Vec<DetectionLogEntry>,
}

/// Process-local store with the same semantics as `SqliteStore`.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: Mutex<InMemoryState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, InMemoryState>, StoreError> {
        self.state.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl TargetPlateStore for InMemoryStore {
    fn list_targets(&self) -> Result<TargetPlateSet, StoreError> {
        Ok(self.state()?.targets.values().collect())
    }

    fn list(&self) -> Result<Vec<TargetPlate>, StoreError> {
        let mut out: Vec<_> = self
            .state()?
            .targets
            .iter()
            .map(|(id, plate)| TargetPlate {
                id: *id,
                plat_nomor: plate.clone(),
            })
            .collect();
        out.sort_by(|a, b| a.plat_nomor.cmp(&b.plat_nomor));
        Ok(out)
    }

    fn add(&self, plate: &str) -> Result<TargetPlate, StoreError> {
        let plate = clean_plate(plate)?;
        let mut state = self.state()?;
        if state.targets.values().any(|p| *p == plate) {
            return Err(StoreError::Duplicate(plate));
        }
        state.next_target_id += 1;
        let id = state.next_target_id;
        state.targets.insert(id, plate.clone());
        Ok(TargetPlate {
            id,
            plat_nomor: plate,
        })
    }

    fn edit(&self, id: i64, plate: &str) -> Result<TargetPlate, StoreError> {
        let plate = clean_plate(plate)?;
        let mut state = self.state()?;
        if state
            .targets
            .iter()
            .any(|(other, p)| *other != id && *p == plate)
        {
            return Err(StoreError::Duplicate(plate));
        }
        let slot = state.targets.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        *slot = plate.clone();
        Ok(TargetPlate {
            id,
            plat_nomor: plate,
        })
    }

    fn delete(&self, id: i64) -> Result<(), StoreError> {
        self.state()?
            .targets
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound(id))
    }

    fn delete_all(&self) -> Result<usize, StoreError> {
        let mut state = self.state()?;
        let count = state.targets.len();
        state.targets.clear();
        Ok(count)
    }
}

impl DetectionLogStore for InMemoryStore {
    fn append(&self, entry: &NewDetection) -> Result<i64, StoreError> {
        let mut state = self.state()?;
        state.next_log_id += 1;
        let id = state.next_log_id;
        state.logs.push(DetectionLogEntry {
            id,
            timestamp: entry.at.format(LOG_TIMESTAMP_FORMAT).to_string(),
            plat_nomor: entry.plate.as_str().to_string(),
            is_target: entry.is_target,
            screenshot_path: entry
                .screenshot_path
                .as_ref()
                .map(|p| p.to_string_lossy().to_string()),
        });
        Ok(id)
    }

    fn list(&self) -> Result<Vec<DetectionLogEntry>, StoreError> {
        let mut out = self.state()?.logs.clone();
        out.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        Ok(out)
    }

    fn delete_by_ids(&self, ids: &[i64]) -> Result<usize, StoreError> {
        if ids.is_empty() {
            return Err(StoreError::NoIdsSelected);
        }
        let removed: Vec<DetectionLogEntry> = {
            let mut state = self.state()?;
            let (removed, kept) = std::mem::take(&mut state.logs)
                .into_iter()
                .partition(|entry| ids.contains(&entry.id));
            state.logs = kept;
            removed
        };
        for path in removed.iter().filter_map(|e| e.screenshot_path.as_deref()) {
            remove_screenshot(Path::new(path));
        }
        Ok(removed.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plate::normalize;

    fn stores() -> Vec<(&'static str, Box<dyn TargetPlateStore>)> {
        let sqlite: Box<dyn TargetPlateStore> =
            Box::new(SqliteStore::open(&shared_memory_uri()).unwrap());
        let memory: Box<dyn TargetPlateStore> = Box::new(InMemoryStore::new());
        vec![("sqlite", sqlite), ("memory", memory)]
    }

    #[test]
    fn add_normalises_and_rejects_duplicates() {
        for (name, store) in stores() {
            let added = store.add("  b 1001   zzz ").unwrap();
            assert_eq!(added.plat_nomor, "B 1001 ZZZ", "{}", name);
            assert!(
                matches!(store.add("B1001ZZZ"), Err(StoreError::Duplicate(_))),
                "{}",
                name
            );
            assert!(matches!(
                store.add("B 1001 ZZZ"),
                Err(StoreError::Duplicate(_))
            ));
            assert!(matches!(store.add("   "), Err(StoreError::EmptyPlate)));
            assert!(store.list_targets().unwrap().contains(&normalize("B1001ZZZ")));
        }
    }

    #[test]
    fn edit_and_delete_report_missing_ids() {
        for (name, store) in stores() {
            let a = store.add("B 2156 TOR").unwrap();
            let b = store.add("F 9012 HIJ").unwrap();
            assert!(
                matches!(store.edit(a.id, "f 9012 hij"), Err(StoreError::Duplicate(_))),
                "{}",
                name
            );
            assert_eq!(store.edit(a.id, "B 2156 TOS").unwrap().plat_nomor, "B 2156 TOS");
            assert!(matches!(store.edit(999, "X 1 Y"), Err(StoreError::NotFound(999))));
            store.delete(b.id).unwrap();
            assert!(matches!(store.delete(b.id), Err(StoreError::NotFound(_))));
            let plates: Vec<_> = store.list().unwrap().into_iter().map(|t| t.plat_nomor).collect();
            assert_eq!(plates, vec!["B 2156 TOS"]);
        }
    }

    #[test]
    fn seed_skips_existing_and_delete_all_clears() {
        for (_, store) in stores() {
            store.add("B 1001 ZZZ").unwrap();
            let seeded = store
                .seed(&["B 1001 ZZZ".into(), "B 2156 TOR".into(), "".into()])
                .unwrap();
            assert_eq!(seeded, 1);
            assert_eq!(store.delete_all().unwrap(), 2);
            assert!(store.list_targets().unwrap().is_empty());
        }
    }

    #[test]
    fn sqlite_log_lists_newest_first() {
        let store = SqliteStore::open(&shared_memory_uri()).unwrap();
        let now = Local::now();
        for (offset, plate) in [(0, "B1001ZZZ"), (5, "B2156TOR")] {
            store
                .append(&NewDetection {
                    at: now + chrono::Duration::seconds(offset),
                    plate: normalize(plate),
                    is_target: offset == 0,
                    screenshot_path: None,
                })
                .unwrap();
        }
        let rows = DetectionLogStore::list(&store).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].plat_nomor, "B 2156 TOR");
        assert!(!rows[0].is_target);
        assert!(rows[1].is_target);
        assert!(matches!(
            store.delete_by_ids(&[]),
            Err(StoreError::NoIdsSelected)
        ));
    }
}
