//! CSV-backed user table and lookup logic for the identity daemon.
//!
//! Source format (`users.csv`): `id,name13,name8,name6,hash,flag` — one
//! record per line, `#` starts a comment, blank lines are skipped. `name6`
//! is the key presented on the wire by clients; `name13`/`name8` are carried
//! through for parity with other subsystems that key off the longer forms
//! (room-server login, filesystem sandbox naming) but are not queried by
//! this daemon's own socket protocol.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::SystemTime;

use hashbrown::HashMap;
use slog::Logger;

pub const RESERVED_GUEST_NAME6: &str = "000000";
pub const GUEST_USER_ID: u16 = 0xFFFF;

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct UserRecord {
    pub id: u32,
    pub name13: String,
    pub name8: String,
    pub name6: String,
    pub hash: String,
    pub flag: u32,
}

#[derive(thiserror::Error, Debug)]
pub enum LoadError {
    #[error("i/o error reading user table: {0}")]
    Io(#[from] io::Error),
    #[error("malformed csv reading user table: {0}")]
    Csv(#[from] csv::Error),
}

struct Indexes {
    by_name6: HashMap<String, u32>,
    by_name13: HashMap<String, u32>,
    by_user_id: HashMap<u32, UserRecord>,
}

impl Indexes {
    fn empty() -> Indexes {
        Indexes {
            by_name6: HashMap::new(),
            by_name13: HashMap::new(),
            by_user_id: HashMap::new(),
        }
    }
}

/// Parses one CSV record (already split into fields by the `csv` reader).
/// Malformed rows (wrong column count, unparsable id/flag) are reported as
/// `None` so the caller can skip and log them instead of aborting the
/// whole load.
fn parse_record(record: &csv::StringRecord) -> Option<UserRecord> {
    let mut fields = record.iter();
    let id: u32 = fields.next()?.trim().parse().ok()?;
    let name13 = fields.next()?.trim().to_string();
    let name8 = fields.next()?.trim().to_string();
    let name6 = fields.next()?.trim().to_string();
    let hash = fields.next()?.trim().to_string();
    let flag: u32 = fields.next()?.trim().parse().ok()?;

    Some(UserRecord { id, name13, name8, name6, hash, flag })
}

/// Hot-reloadable dual-indexed user table. `refresh_if_changed` re-reads the
/// CSV only when its mtime has advanced, building the new indexes off to
/// the side and swapping them in atomically so lookups never observe a
/// partially-loaded table.
pub struct UserTable {
    path: PathBuf,
    last_mtime: RwLock<Option<SystemTime>>,
    indexes: RwLock<Indexes>,
    log: Logger,
}

impl UserTable {
    pub fn load(path: impl Into<PathBuf>, log: &Logger) -> Result<UserTable, LoadError> {
        let table = UserTable {
            path: path.into(),
            last_mtime: RwLock::new(None),
            indexes: RwLock::new(Indexes::empty()),
            log: log.clone(),
        };
        table.refresh_if_changed()?;
        Ok(table)
    }

    /// Re-reads the CSV file if its mtime has changed since the last
    /// successful load. No-op (and cheap) otherwise.
    pub fn refresh_if_changed(&self) -> Result<bool, LoadError> {
        let metadata = fs::metadata(&self.path)?;
        let mtime = metadata.modified()?;

        {
            let last = self.last_mtime.read().unwrap();
            if *last == Some(mtime) {
                return Ok(false);
            }
        }

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .comment(Some(b'#'))
            .from_path(&self.path)?;
        let mut fresh = Indexes::empty();

        for row in reader.records() {
            let raw = match row {
                Ok(r) => r,
                Err(_) => continue,
            };
            if raw.iter().all(|field| field.trim().is_empty()) {
                continue;
            }
            let record = match parse_record(&raw) {
                Some(r) => r,
                None => continue,
            };

            if fresh.by_user_id.contains_key(&record.id) {
                slog::error!(
                    self.log,
                    "duplicate user_id in users.csv, skipping row";
                    "line" => raw.position().map(|p| p.line()).unwrap_or(0),
                    "user_id" => record.id,
                );
                continue;
            }

            fresh.by_name6.insert(record.name6.clone(), record.id);
            fresh.by_name13.insert(record.name13.clone(), record.id);
            fresh.by_user_id.insert(record.id, record);
        }

        slog::info!(
            self.log,
            "loaded user table";
            "path" => self.path.display().to_string(),
            "count" => fresh.by_user_id.len(),
        );

        *self.indexes.write().unwrap() = fresh;
        *self.last_mtime.write().unwrap() = Some(mtime);
        Ok(true)
    }

    /// Looks up a user by the 6-byte wire key. The reserved guest name
    /// `"000000"` always resolves to `0xFFFF` regardless of table content.
    pub fn lookup_name6(&self, name6: &str) -> Option<u16> {
        if name6 == RESERVED_GUEST_NAME6 {
            return Some(GUEST_USER_ID);
        }

        let indexes = self.indexes.read().unwrap();
        indexes.by_name6.get(name6).map(|&id| id as u16)
    }

    pub fn lookup_name13(&self, name13: &str) -> Option<u32> {
        let indexes = self.indexes.read().unwrap();
        indexes.by_name13.get(name13).copied()
    }

    pub fn get(&self, user_id: u32) -> Option<UserRecord> {
        let indexes = self.indexes.read().unwrap();
        indexes.by_user_id.get(&user_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.indexes.read().unwrap().by_user_id.len()
    }
}

pub fn sandbox_dir_name(user_id: u16) -> String {
    if user_id == GUEST_USER_ID {
        "uzenetfs-guest".to_string()
    } else {
        format!("uzenetfs-{}", user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn test_log() -> Logger {
        uzenet_wire::logging::test_logger()
    }

    fn write_csv(path: &Path, contents: &str) {
        let mut f = fs::File::create(path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
    }

    #[test]
    fn guest_key_resolves_without_table_entry() {
        let dir = tempfile::tempdir().unwrap();
        let csv = dir.path().join("users.csv");
        write_csv(&csv, "# empty\n");

        let table = UserTable::load(&csv, &test_log()).unwrap();
        assert_eq!(table.lookup_name6(RESERVED_GUEST_NAME6), Some(GUEST_USER_ID));
    }

    #[test]
    fn looks_up_registered_user_by_name6() {
        let dir = tempfile::tempdir().unwrap();
        let csv = dir.path().join("users.csv");
        write_csv(&csv, "1,alicealicea,aliceali,alice1,deadbeef,0\n");

        let table = UserTable::load(&csv, &test_log()).unwrap();
        assert_eq!(table.lookup_name6("alice1"), Some(1));
        assert_eq!(table.lookup_name6("nope99"), None);
    }

    #[test]
    fn duplicate_user_id_is_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let csv = dir.path().join("users.csv");
        write_csv(
            &csv,
            "1,alicealicea,aliceali,alice1,deadbeef,0\n1,bobbobbobbob,bobbobbo,bobbob,cafebabe,0\n",
        );

        let table = UserTable::load(&csv, &test_log()).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.lookup_name6("alice1"), Some(1));
        assert_eq!(table.lookup_name6("bobbob"), None);
    }

    #[test]
    fn blank_lines_and_comments_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let csv = dir.path().join("users.csv");
        write_csv(&csv, "\n# comment\n\n1,alicealicea,aliceali,alice1,deadbeef,0\n");

        let table = UserTable::load(&csv, &test_log()).unwrap();
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn refresh_is_noop_without_mtime_change() {
        let dir = tempfile::tempdir().unwrap();
        let csv = dir.path().join("users.csv");
        write_csv(&csv, "1,alicealicea,aliceali,alice1,deadbeef,0\n");

        let table = UserTable::load(&csv, &test_log()).unwrap();
        assert!(!table.refresh_if_changed().unwrap());
    }

    #[test]
    fn sandbox_dir_names_match_guest_and_user_conventions() {
        assert_eq!(sandbox_dir_name(GUEST_USER_ID), "uzenetfs-guest");
        assert_eq!(sandbox_dir_name(7), "uzenetfs-7");
    }
}
