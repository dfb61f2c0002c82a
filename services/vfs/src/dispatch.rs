//! Command dispatch for one VFS client connection. Each call to `dispatch`
//! consumes one complete command from a `Data` tunnel frame's payload and
//! returns the reply payload for the next outbound `Data` frame.

use std::fs;
use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use uzenet_wire::crc16::crc16_xmodem;

use crate::opcode::{self, status, Opcode, MAX_READ_SIZE};
use crate::quota::{CreateCheck, QuotaTracker, WriteCheck};
use crate::sandbox::Sandbox;

pub struct ClientSession {
    pub user: String,
    sandbox_root: PathBuf,
    sandbox: Option<Sandbox>,
    open_file: Option<fs::File>,
    offset: u32,
    enable_lfn: bool,
    enable_crc: bool,
    enable_hash: bool,
    quota: QuotaTracker,
}

impl ClientSession {
    pub fn new(user: String, sandbox_root: PathBuf, quota: QuotaTracker) -> ClientSession {
        ClientSession {
            user,
            sandbox_root,
            sandbox: None,
            open_file: None,
            offset: 0,
            enable_lfn: false,
            enable_crc: false,
            enable_hash: false,
            quota,
        }
    }

    fn resolve(&self, name: &str) -> Option<PathBuf> {
        self.sandbox.as_ref().and_then(|s| s.resolve(name).ok())
    }
}

fn read_len_prefixed(cursor: &mut &[u8]) -> Option<String> {
    let len = cursor.read_u16::<BigEndian>().ok()? as usize;
    if cursor.len() < len {
        return None;
    }
    let (name, rest) = cursor.split_at(len);
    *cursor = rest;
    Some(String::from_utf8_lossy(name).into_owned())
}

/// Dispatches one command. `payload` is the full contents of the triggering
/// `Data` frame (opcode byte followed by arguments). Returns the reply
/// bytes to carry in the next outbound `Data` frame, or `None` if the
/// opcode is unrecognized (caller must disconnect per the protocol-
/// violation rule).
pub fn dispatch(session: &mut ClientSession, payload: &[u8]) -> Option<Vec<u8>> {
    if payload.is_empty() {
        return None;
    }
    let opcode = Opcode::from_u8(payload[0])?;
    let mut cursor = &payload[1..];

    Some(match opcode {
        Opcode::Mount => {
            let relpath = read_len_prefixed(&mut cursor).unwrap_or_default();
            // Resolve against the per-user root through the same
            // canonicalize-and-check-within-root logic every other path
            // operation uses, before a new mount root is ever created.
            let resolved = Sandbox::new(session.sandbox_root.clone()).ok().and_then(|base| base.resolve(&relpath).ok());
            match resolved {
                Some(target) => match fs::create_dir_all(&target).and_then(|_| Sandbox::new(target)) {
                    Ok(sandbox) => {
                        session.sandbox = Some(sandbox);
                        vec![status::OK]
                    }
                    Err(_) => vec![status::FAIL],
                },
                None => vec![status::FAIL],
            }
        }

        Opcode::Readdir => {
            let mut out = Vec::new();
            if let Some(sandbox) = &session.sandbox {
                if let Ok(entries) = fs::read_dir(sandbox.root()) {
                    for entry in entries.flatten() {
                        let Ok(metadata) = entry.metadata() else { continue };
                        let name = entry.file_name();
                        let name = name.to_string_lossy();
                        let name_bytes = name.as_bytes();

                        out.write_u16::<BigEndian>(name_bytes.len() as u16).unwrap();
                        out.extend_from_slice(name_bytes);
                        out.write_u32::<BigEndian>(metadata.len() as u32).unwrap();
                        out.write_u8(if metadata.is_dir() { 0x10 } else { 0x00 }).unwrap();

                        if session.enable_hash {
                            out.write_u16::<BigEndian>(crc16_xmodem(name_bytes)).unwrap();
                        }
                    }
                }
            }
            out.write_u16::<BigEndian>(0).unwrap();
            out
        }

        Opcode::Open => {
            let name = read_len_prefixed(&mut cursor).unwrap_or_default();
            session.open_file = None;
            match session.resolve(&name).and_then(|p| fs::File::open(p).ok()) {
                Some(file) => {
                    session.open_file = Some(file);
                    session.offset = 0;
                    vec![status::OK]
                }
                None => vec![status::FAIL],
            }
        }

        Opcode::Read => {
            let want_offset = cursor.read_u32::<BigEndian>().unwrap_or(session.offset);
            let len = cursor.read_u16::<BigEndian>().unwrap_or(0).min(MAX_READ_SIZE as u16);
            let mut out = Vec::new();

            match &mut session.open_file {
                Some(file) => {
                    if file.seek(SeekFrom::Start(want_offset as u64)).is_ok() {
                        let mut buf = vec![0u8; len as usize];
                        let actual = file.read(&mut buf).unwrap_or(0);
                        session.offset = want_offset + actual as u32;
                        out.write_u8(status::OK).unwrap();
                        out.write_u16::<BigEndian>(actual as u16).unwrap();
                        out.extend_from_slice(&buf[..actual]);
                    } else {
                        out.write_u8(status::FAIL).unwrap();
                        out.write_u16::<BigEndian>(0).unwrap();
                    }
                }
                None => {
                    out.write_u8(status::FAIL).unwrap();
                    out.write_u16::<BigEndian>(0).unwrap();
                }
            }
            out
        }

        Opcode::Lseek => {
            session.offset = cursor.read_u32::<BigEndian>().unwrap_or(0);
            vec![status::OK]
        }

        Opcode::Close => {
            session.open_file = None;
            vec![status::OK]
        }

        Opcode::Opts => {
            let opt = cursor.read_u8().unwrap_or(0);
            let val = cursor.read_u32::<BigEndian>().unwrap_or(0);
            match opt {
                0 => session.enable_lfn = val != 0,
                1 => session.enable_crc = val != 0,
                2 => session.enable_hash = val != 0,
                _ => {}
            }
            vec![status::OK]
        }

        Opcode::Getopt => {
            let mut flags = 0u8;
            if session.enable_lfn {
                flags |= 0x01;
            }
            if session.enable_crc {
                flags |= 0x02;
            }
            if session.enable_hash {
                flags |= 0x04;
            }
            vec![flags]
        }

        Opcode::Hashindex => {
            let mut out = Vec::new();
            if let Some(sandbox) = &session.sandbox {
                if let Ok(entries) = fs::read_dir(sandbox.root()) {
                    for entry in entries.flatten() {
                        let name = entry.file_name();
                        let name = name.to_string_lossy();
                        let name_bytes = name.as_bytes();
                        out.write_u16::<BigEndian>(name_bytes.len() as u16).unwrap();
                        out.extend_from_slice(name_bytes);
                        out.write_u16::<BigEndian>(crc16_xmodem(name_bytes)).unwrap();
                    }
                }
            }
            out.write_u16::<BigEndian>(0).unwrap();
            out
        }

        Opcode::Stat => {
            let name = read_len_prefixed(&mut cursor).unwrap_or_default();
            let mut out = Vec::new();
            match session.resolve(&name).and_then(|p| fs::metadata(p).ok()) {
                Some(metadata) => {
                    out.write_u8(status::OK).unwrap();
                    out.write_u32::<BigEndian>(metadata.len() as u32).unwrap();
                    out.write_u8(if metadata.is_dir() { 0x10 } else { 0x00 }).unwrap();
                }
                None => {
                    out.write_u8(status::FAIL).unwrap();
                    out.write_u32::<BigEndian>(0).unwrap();
                    out.write_u8(0).unwrap();
                }
            }
            out
        }

        Opcode::Time => {
            let epoch = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as u32).unwrap_or(0);
            let mut out = vec![status::OK];
            out.write_u32::<BigEndian>(epoch).unwrap();
            out
        }

        Opcode::Rename => {
            let old = read_len_prefixed(&mut cursor).unwrap_or_default();
            let new = read_len_prefixed(&mut cursor).unwrap_or_default();
            match (session.resolve(&old), session.resolve(&new)) {
                (Some(from), Some(to)) => match fs::rename(from, to) {
                    Ok(_) => vec![status::OK],
                    Err(_) => vec![status::FAIL],
                },
                _ => vec![status::FAIL],
            }
        }

        Opcode::Create => {
            let name = read_len_prefixed(&mut cursor).unwrap_or_default();
            match session.quota.check_create(&session.user) {
                CreateCheck::NotReady => vec![status::WRITE_OTHER_FAILURE],
                CreateCheck::FileCountExceeded => vec![status::QUOTA_FILES_EXCEEDED],
                CreateCheck::Ok => match session.resolve(&name) {
                    Some(path) => match OpenOptions::new().write(true).create_new(true).open(path) {
                        Ok(_) => vec![status::OK],
                        Err(_) => vec![status::WRITE_OTHER_FAILURE],
                    },
                    None => vec![status::WRITE_OTHER_FAILURE],
                },
            }
        }

        Opcode::Write => {
            let name = read_len_prefixed(&mut cursor).unwrap_or_default();
            let len = cursor.read_u16::<BigEndian>().unwrap_or(0) as usize;
            if len > opcode::MAX_READ_SIZE {
                return Some(vec![status::WRITE_TOO_LONG]);
            }
            if cursor.len() < len {
                return Some(vec![status::WRITE_OTHER_FAILURE]);
            }
            let bytes = &cursor[..len];

            match session.quota.check_write(&session.user, len as u64) {
                WriteCheck::NotReady => vec![status::WRITE_OTHER_FAILURE],
                WriteCheck::BytesExceeded => vec![status::QUOTA_BYTES_EXCEEDED],
                WriteCheck::Ok => match session.resolve(&name) {
                    Some(path) => match OpenOptions::new().write(true).create(true).truncate(false).open(path) {
                        Ok(mut file) => match file.write_all(bytes) {
                            Ok(_) => vec![status::OK],
                            Err(_) => vec![status::WRITE_OTHER_FAILURE],
                        },
                        Err(_) => vec![status::WRITE_OTHER_FAILURE],
                    },
                    None => vec![status::WRITE_OTHER_FAILURE],
                },
            }
        }

        Opcode::Delete => {
            let name = read_len_prefixed(&mut cursor).unwrap_or_default();
            match session.resolve(&name).and_then(|p| fs::remove_file(p).ok()) {
                Some(_) => vec![status::OK],
                None => vec![status::FAIL],
            }
        }

        Opcode::Mkdir => {
            let name = read_len_prefixed(&mut cursor).unwrap_or_default();
            match session.resolve(&name).and_then(|p| fs::create_dir(p).ok()) {
                Some(_) => vec![status::OK],
                None => vec![status::FAIL],
            }
        }

        Opcode::Rmdir => {
            let name = read_len_prefixed(&mut cursor).unwrap_or_default();
            match session.resolve(&name).and_then(|p| fs::remove_dir(p).ok()) {
                Some(_) => vec![status::OK],
                None => vec![status::FAIL],
            }
        }

        Opcode::Truncate => {
            let name = read_len_prefixed(&mut cursor).unwrap_or_default();
            let size = cursor.read_u32::<BigEndian>().unwrap_or(0);
            match session.resolve(&name) {
                Some(path) => match OpenOptions::new().write(true).open(path) {
                    Ok(file) => match file.set_len(size as u64) {
                        Ok(_) => vec![status::OK],
                        Err(_) => vec![status::FAIL],
                    },
                    Err(_) => vec![status::FAIL],
                },
                None => vec![status::FAIL],
            }
        }

        Opcode::Label => {
            let label = b"UZENETVOL";
            let mut out = vec![status::OK, label.len() as u8];
            out.extend_from_slice(label);
            out
        }

        Opcode::Freespace => {
            let mut out = vec![status::OK];
            out.write_u32::<BigEndian>(1_000_000).unwrap();
            out.write_u32::<BigEndian>(4096).unwrap();
            out
        }

        Opcode::Login => vec![status::OK],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quota::QuotaTracker;
    use std::fs;

    fn session_in(dir: &std::path::Path) -> ClientSession {
        let quota = QuotaTracker::new(uzenet_wire::logging::test_logger());
        quota.register("alice", dir.to_path_buf());
        quota.force_ready_for_test("alice", 0, 0);
        ClientSession::new("alice".to_string(), dir.to_path_buf(), quota)
    }

    #[test]
    fn mount_then_create_then_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session_in(dir.path());

        let mut mount_cmd = vec![Opcode::Mount as u8];
        mount_cmd.write_u16::<BigEndian>(0).unwrap();
        let reply = dispatch(&mut session, &mount_cmd).unwrap();
        assert_eq!(reply, vec![status::OK]);

        let mut create_cmd = vec![Opcode::Create as u8];
        create_cmd.write_u16::<BigEndian>(5).unwrap();
        create_cmd.extend_from_slice(b"a.txt");
        let reply = dispatch(&mut session, &create_cmd).unwrap();
        assert_eq!(reply, vec![status::OK]);

        let mut write_cmd = vec![Opcode::Write as u8];
        write_cmd.write_u16::<BigEndian>(5).unwrap();
        write_cmd.extend_from_slice(b"a.txt");
        write_cmd.write_u16::<BigEndian>(5).unwrap();
        write_cmd.extend_from_slice(b"hello");
        let reply = dispatch(&mut session, &write_cmd).unwrap();
        assert_eq!(reply, vec![status::OK]);

        assert_eq!(fs::read(dir.path().join("a.txt")).unwrap(), b"hello");
    }

    #[test]
    fn mount_rejects_parent_traversal_and_leaves_sandbox_unset() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session_in(dir.path());

        let mut mount_cmd = vec![Opcode::Mount as u8];
        let relpath = b"../etc";
        mount_cmd.write_u16::<BigEndian>(relpath.len() as u16).unwrap();
        mount_cmd.extend_from_slice(relpath);
        let reply = dispatch(&mut session, &mount_cmd).unwrap();
        assert_eq!(reply, vec![status::FAIL]);
        assert!(session.sandbox.is_none());
    }

    #[test]
    fn unknown_opcode_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session_in(dir.path());
        assert!(dispatch(&mut session, &[0xEE]).is_none());
    }

    #[test]
    fn label_reports_volume_name() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session_in(dir.path());
        let reply = dispatch(&mut session, &[Opcode::Label as u8]).unwrap();
        assert_eq!(&reply[2..], b"UZENETVOL");
    }
}
