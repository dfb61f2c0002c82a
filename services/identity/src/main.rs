mod core;

use std::io::{Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::thread;

use byteorder::{BigEndian, WriteBytesExt};
use clap::{App, Arg};
use slog::{error, info, o, warn};
use std::sync::Arc;

use self::core::UserTable;

const KEY_LEN: usize = 6;

fn handle_connection(mut stream: UnixStream, table: Arc<UserTable>, log: slog::Logger) {
    let mut key = [0u8; KEY_LEN];
    if let Err(err) = stream.read_exact(&mut key) {
        warn!(log, "short read on identity socket"; "error" => %err);
        return;
    }

    let key_str = match std::str::from_utf8(&key) {
        Ok(s) => s,
        Err(_) => {
            warn!(log, "non-utf8 identity key");
            return;
        }
    };

    let _ = table.refresh_if_changed();
    let user_id = table.lookup_name6(key_str).unwrap_or(0xFFFF);

    let mut reply = Vec::with_capacity(2);
    reply.write_u16::<BigEndian>(user_id).unwrap();

    if let Err(err) = stream.write_all(&reply) {
        warn!(log, "failed writing identity reply"; "error" => %err);
    }

    info!(log, "identity lookup"; "user_id" => user_id);
}

pub fn main() {
    let matches = App::new("Identity Daemon")
        .version("1.0")
        .author("Bush Hammer Industries")
        .about("Stateless user-key lookup service over a Unix socket.")
        .arg(
            Arg::with_name("SOCKET_PATH")
                .help("Unix socket path to listen on")
                .default_value("/run/uzenet/identity.sock"),
        )
        .arg(
            Arg::with_name("USER_FILE")
                .help("Path to users.csv")
                .default_value("/var/lib/uzenet/users.csv"),
        )
        .get_matches();

    let socket_path = matches.value_of("SOCKET_PATH").unwrap();
    let user_file_path = matches.value_of("USER_FILE").unwrap();

    let log = uzenet_wire::logging::init(slog::Level::Info);
    let log = log.new(o!("service" => "identity"));

    let table = match UserTable::load(user_file_path, &log) {
        Ok(table) => Arc::new(table),
        Err(err) => {
            error!(log, "failed to load user table"; "error" => %err);
            std::process::exit(1);
        }
    };

    let _ = std::fs::remove_file(socket_path);
    let listener = match UnixListener::bind(socket_path) {
        Ok(listener) => listener,
        Err(err) => {
            error!(log, "failed to bind identity socket"; "path" => socket_path, "error" => %err);
            std::process::exit(1);
        }
    };

    info!(log, "identity daemon listening"; "socket" => socket_path, "users" => table.len());

    for incoming in listener.incoming() {
        match incoming {
            Ok(stream) => {
                let table = Arc::clone(&table);
                let log = log.new(o!());
                thread::spawn(move || handle_connection(stream, table, log));
            }
            Err(err) => {
                warn!(log, "failed to accept identity connection"; "error" => %err);
            }
        }
    }
}
