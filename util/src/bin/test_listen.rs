//! One-shot connectivity probe: sends a LOGIN frame to a backend Unix
//! socket and prints whatever it gets back, for poking at a running
//! VFS/Lichess daemon without standing up a full client.

use std::os::unix::net::UnixStream;

use clap::{App, Arg};

use uzenet_wire::frame::{self, Frame, LoginPayload};

fn main() {
    let matches = App::new("Tunnel Probe")
        .version("1.0")
        .author("Bush Hammer Industries")
        .about("Sends a LOGIN frame to a backend socket and prints the reply.")
        .arg(Arg::with_name("SOCKET_PATH").help("Path to the backend Unix socket").required(true))
        .arg(Arg::with_name("USER_ID").help("User id to log in as").default_value("1"))
        .get_matches();

    let socket_path = matches.value_of("SOCKET_PATH").unwrap();
    let user_id: u16 = matches.value_of("USER_ID").unwrap().parse().expect("USER_ID must be a u16");

    let mut stream = UnixStream::connect(socket_path).expect("failed to connect to backend socket");

    let login = Frame::login(0, LoginPayload { user_id, reserved: 0 }.encode().to_vec());
    frame::write_frame(&mut stream, &login, frame::MAX_PAYLOAD).expect("failed to write LOGIN frame");

    match frame::read_frame(&mut stream, frame::MAX_PAYLOAD) {
        Ok(reply) => {
            println!("reply kind={:?} flags={} payload={:?}", reply.kind, reply.flags, reply.payload);
        }
        Err(err) => {
            println!("no reply (or connection closed): {}", err);
        }
    }
}
