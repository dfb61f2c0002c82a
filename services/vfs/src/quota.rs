//! Per-user quota tracking. A scanner thread recomputes usage for each
//! active user's sandbox directory every 60 seconds; writes and creates
//! consult the latest scan rather than walking the filesystem inline.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use slog::{info, warn, Logger};

use crate::opcode::{USER_FILE_LIMIT, USER_FILE_WARN_THRESHOLD, USER_QUOTA_BYTES};

const SCAN_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, Default)]
struct UsageSnapshot {
    usage_bytes: u64,
    file_count: u32,
    ready: bool,
}

struct Inner {
    bases: Mutex<HashMap<String, PathBuf>>,
    usage: Mutex<HashMap<String, UsageSnapshot>>,
}

/// Shared handle to the quota tracker. Clone freely; all clones see the
/// same underlying state.
#[derive(Clone)]
pub struct QuotaTracker {
    inner: Arc<Inner>,
    log: Logger,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum WriteCheck {
    Ok,
    NotReady,
    BytesExceeded,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum CreateCheck {
    Ok,
    NotReady,
    FileCountExceeded,
}

impl QuotaTracker {
    pub fn new(log: Logger) -> QuotaTracker {
        QuotaTracker {
            inner: Arc::new(Inner {
                bases: Mutex::new(HashMap::new()),
                usage: Mutex::new(HashMap::new()),
            }),
            log,
        }
    }

    /// Registers (or re-registers) a user's sandbox root for scanning.
    pub fn register(&self, user: &str, base_path: PathBuf) {
        self.inner.bases.lock().unwrap().insert(user.to_string(), base_path);
        self.inner
            .usage
            .lock()
            .unwrap()
            .entry(user.to_string())
            .or_insert_with(UsageSnapshot::default);
    }

    /// Spawns the 60-second background scanner. Returns a `JoinHandle` the
    /// caller may detach.
    pub fn spawn_scanner(&self) -> thread::JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        let log = self.log.clone();
        thread::spawn(move || loop {
            let users: Vec<(String, PathBuf)> = inner
                .bases
                .lock()
                .unwrap()
                .iter()
                .map(|(u, p)| (u.clone(), p.clone()))
                .collect();

            for (user, base) in users {
                let (bytes, files) = scan_directory(&base);
                let warn_hit = files >= USER_FILE_WARN_THRESHOLD;

                inner.usage.lock().unwrap().insert(
                    user.clone(),
                    UsageSnapshot {
                        usage_bytes: bytes,
                        file_count: files,
                        ready: true,
                    },
                );

                if warn_hit {
                    warn!(log, "user approaching file-count quota"; "user" => &user, "files" => files);
                }
                info!(log, "quota scan complete"; "user" => &user, "bytes" => bytes, "files" => files);
            }

            thread::sleep(SCAN_INTERVAL);
        })
    }

    pub fn check_write(&self, user: &str, new_bytes: u64) -> WriteCheck {
        let usage = self.inner.usage.lock().unwrap();
        match usage.get(user) {
            None => WriteCheck::NotReady,
            Some(snapshot) if !snapshot.ready => WriteCheck::NotReady,
            Some(snapshot) => {
                if snapshot.usage_bytes + new_bytes <= USER_QUOTA_BYTES {
                    WriteCheck::Ok
                } else {
                    WriteCheck::BytesExceeded
                }
            }
        }
    }

    pub fn check_create(&self, user: &str) -> CreateCheck {
        let usage = self.inner.usage.lock().unwrap();
        match usage.get(user) {
            None => CreateCheck::NotReady,
            Some(snapshot) if !snapshot.ready => CreateCheck::NotReady,
            Some(snapshot) => {
                if snapshot.file_count < USER_FILE_LIMIT {
                    CreateCheck::Ok
                } else {
                    CreateCheck::FileCountExceeded
                }
            }
        }
    }

    /// Test-only hook to seed a completed scan without waiting 60 seconds.
    #[cfg(test)]
    pub fn force_ready_for_test(&self, user: &str, usage_bytes: u64, file_count: u32) {
        self.inner.usage.lock().unwrap().insert(
            user.to_string(),
            UsageSnapshot { usage_bytes, file_count, ready: true },
        );
    }
}

fn scan_directory(path: &Path) -> (u64, u32) {
    let mut bytes = 0u64;
    let mut files = 0u32;
    let mut stack = vec![path.to_path_buf()];

    while let Some(dir) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else { continue };
        for entry in entries.flatten() {
            let Ok(metadata) = entry.metadata() else { continue };
            if metadata.is_dir() {
                stack.push(entry.path());
            } else if metadata.is_file() {
                bytes += metadata.len();
                files += 1;
            }
        }
    }

    (bytes, files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn test_log() -> Logger {
        uzenet_wire::logging::test_logger()
    }

    #[test]
    fn unregistered_user_is_not_ready() {
        let tracker = QuotaTracker::new(test_log());
        assert_eq!(tracker.check_write("nobody", 10), WriteCheck::NotReady);
        assert_eq!(tracker.check_create("nobody"), CreateCheck::NotReady);
    }

    #[test]
    fn scan_sums_file_sizes_recursively() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"12345").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/b.txt"), b"123").unwrap();

        let (bytes, files) = scan_directory(dir.path());
        assert_eq!(bytes, 8);
        assert_eq!(files, 2);
    }

    #[test]
    fn write_check_respects_scanned_usage() {
        let tracker = QuotaTracker::new(test_log());
        tracker.register("alice", PathBuf::from("/tmp/nonexistent-for-test"));

        {
            let mut usage = tracker.inner.usage.lock().unwrap();
            usage.insert(
                "alice".to_string(),
                UsageSnapshot { usage_bytes: USER_QUOTA_BYTES - 10, file_count: 0, ready: true },
            );
        }

        assert_eq!(tracker.check_write("alice", 5), WriteCheck::Ok);
        assert_eq!(tracker.check_write("alice", 20), WriteCheck::BytesExceeded);
    }
}
