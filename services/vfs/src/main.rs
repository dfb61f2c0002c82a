use std::io::Write;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use clap::{App, Arg};
use slog::{error, info, o, warn};

use uzenet_vfs::config::VfsConfig;
use uzenet_vfs::dispatch::{self, ClientSession};
use uzenet_vfs::opcode::HANDSHAKE_STRING;
use uzenet_vfs::quota::QuotaTracker;
use uzenet_wire::frame::{self, Frame, FrameType, LoginPayload};

const GUEST_USER_ID: u16 = 0xFFFF;

fn user_dir_name(user_id: u16) -> String {
    if user_id == GUEST_USER_ID {
        "uzenetfs-guest".to_string()
    } else {
        format!("uzenetfs-{}", user_id)
    }
}

fn handle_connection(
    mut stream: UnixStream,
    quota_root: PathBuf,
    quota: Arc<QuotaTracker>,
    max_payload: usize,
    log: slog::Logger,
) {
    let login = match frame::read_frame(&mut stream, max_payload) {
        Ok(f) if f.kind == FrameType::Login => f,
        _ => {
            warn!(log, "vfs connection did not start with LOGIN, closing");
            return;
        }
    };

    let user_id = LoginPayload::decode(&login.payload).map(|p| p.user_id).unwrap_or(GUEST_USER_ID);
    let user = user_dir_name(user_id);
    let base_path = quota_root.join(&user);

    if std::fs::create_dir_all(&base_path).is_err() {
        error!(log, "failed to create sandbox root"; "user" => &user);
        return;
    }
    quota.register(&user, base_path.clone());

    let handshake = frame::read_frame(&mut stream, max_payload);
    match handshake {
        Ok(f) if f.kind == FrameType::Data && f.payload == HANDSHAKE_STRING.as_bytes() => {}
        _ => {
            warn!(log, "vfs handshake mismatch, closing"; "user" => &user);
            return;
        }
    }

    let mut session = ClientSession::new(user.clone(), base_path, (*quota).clone());

    loop {
        let frame = match frame::read_frame(&mut stream, max_payload) {
            Ok(f) => f,
            Err(_) => break,
        };

        if frame.kind != FrameType::Data {
            continue;
        }

        match dispatch::dispatch(&mut session, &frame.payload) {
            Some(reply) => {
                let out = Frame::data(reply);
                if frame::write_frame(&mut stream, &out, max_payload).is_err() {
                    break;
                }
            }
            None => {
                warn!(log, "unknown vfs opcode, disconnecting"; "user" => &user);
                break;
            }
        }
    }

    let _ = stream.flush();
    info!(log, "vfs connection closed"; "user" => &user);
}

pub fn main() {
    let matches = App::new("VFS Service")
        .version("1.0")
        .author("Bush Hammer Industries")
        .about("Sandboxed per-user virtual filesystem over a tunnel socket.")
        .arg(Arg::with_name("CONFIG_FILE").help("Path to the vfs config TOML").required(false))
        .get_matches();

    let config = match matches.value_of("CONFIG_FILE") {
        Some(path) => VfsConfig::load(path).expect("failed to load vfs config"),
        None => VfsConfig::default(),
    };

    let log = uzenet_wire::logging::init(slog::Level::Info).new(o!("service" => "vfs"));
    let quota = Arc::new(QuotaTracker::new(log.new(o!())));
    quota.spawn_scanner();

    let _ = std::fs::remove_file(&config.server.socket_path);
    let listener = UnixListener::bind(&config.server.socket_path).expect("failed to bind vfs socket");
    info!(log, "vfs daemon listening"; "socket" => &config.server.socket_path);

    let quota_root = PathBuf::from(&config.server.quota_root);
    let max_payload = config.server.frame_payload_cap as usize;

    for incoming in listener.incoming() {
        match incoming {
            Ok(stream) => {
                let quota = Arc::clone(&quota);
                let quota_root = quota_root.clone();
                let log = log.new(o!());
                thread::spawn(move || handle_connection(stream, quota_root, quota, max_payload, log));
            }
            Err(err) => warn!(log, "failed to accept vfs connection"; "error" => %err),
        }
    }
}
