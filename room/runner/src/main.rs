//! Room server binary: a single cooperative thread that multiplexes every
//! game-port and telnet-port client connection through `mio`, drives the
//! raw-byte-stream login and command interpreter
//! (`uzenet_room_core::interpreter::drive` plus per-player housekeeping) per
//! poll cycle, and bridges each Player's open service tunnels to the
//! backend services' AF_UNIX sockets using the tunnel-frame codec. The room
//! state itself is never shared across threads — see `RoomState`'s doc
//! comment.
//!
//! Two distinct wires meet here and must not be confused: the client↔room
//! wire is a raw opcode byte stream (spec.md §4.3.1/§4.3.3); the
//! room↔backend-service wire is the `{type, flags, length, payload}` tunnel
//! frame codec (spec.md §4.1), carried over per-(player, service) AF_UNIX
//! sockets.

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::os::unix::net::UnixStream;
use std::time::{Duration, Instant};

use byteorder::{BigEndian, ByteOrder};
use clap::{App, Arg};
use mio::net::TcpListener;
use mio::{Events, Poll, PollOpt, Ready, Token};
use slog::{info, o, warn};

use uzenet_room_core::arena::Index;
use uzenet_room_core::interpreter;
use uzenet_room_core::player::{Player, PlayerState};
use uzenet_room_core::{RoomConfig, RoomState, TELNET_GREETING};
use uzenet_wire::frame::{self, Frame, FrameType, LoginPayload};

const GAME_TOKEN: Token = Token(0);
const TELNET_TOKEN: Token = Token(1);
const FIRST_CONN_TOKEN: usize = 2;

const MAX_FRAME_PAYLOAD: usize = 256;
/// Identity daemon protocol (spec.md §4.2) is keyed on the first 6 bytes of
/// the room server's 8-byte login key; the trailing 2 bytes are carried on
/// the wire (Scenario S1 fixes the client key at 8 bytes) but unused by the
/// daemon's own lookup.
const IDENTITY_NAME_LEN: usize = 6;

struct Connection {
    stream: mio::net::TcpStream,
    addr: SocketAddr,
    player_index: Index<Player>,
    write_buf: Vec<u8>,
    closing: bool,
}

impl Connection {
    fn new(stream: mio::net::TcpStream, addr: SocketAddr, player_index: Index<Player>) -> Connection {
        Connection { stream, addr, player_index, write_buf: Vec::new(), closing: false }
    }

    /// Pulls everything currently available off the socket straight into
    /// `out`. Returns `false` once the peer has closed the connection or a
    /// hard I/O error occurred.
    fn pump_read(&mut self, out: &mut Vec<u8>) -> bool {
        let mut chunk = [0u8; 4096];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => return false,
                Ok(n) => out.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return true,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => return false,
            }
        }
    }

    /// Best-effort nonblocking flush. Leftover bytes stay buffered for the
    /// next writable readiness rather than blocking the tick loop.
    fn pump_write(&mut self) -> bool {
        while !self.write_buf.is_empty() {
            match self.stream.write(&self.write_buf) {
                Ok(0) => return false,
                Ok(n) => {
                    self.write_buf.drain(..n);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return true,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => return false,
            }
        }
        true
    }
}

fn accept_loop<F>(listener: &TcpListener, poll: &Poll, next_token: &mut usize, log: &slog::Logger, label: &str, mut on_accept: F)
where
    F: FnMut(Token, mio::net::TcpStream, SocketAddr),
{
    loop {
        match listener.accept() {
            Ok((stream, addr)) => {
                let token = Token(*next_token);
                *next_token += 1;
                if poll.register(&stream, token, Ready::readable() | Ready::writable(), PollOpt::edge()).is_err() {
                    warn!(log, "failed to register connection with poll"; "kind" => label);
                    continue;
                }
                on_accept(token, stream, addr);
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) => {
                warn!(log, "accept failed"; "kind" => label, "error" => %e);
                break;
            }
        }
    }
}

/// Queries the identity daemon (spec.md §4.2): connect, write the 6-byte
/// short name, read a 2-byte big-endian `user_id` reply. A connection the
/// daemon closes without replying (the non-guest, no-match case) surfaces
/// as `None`, same as any other lookup failure.
fn identity_lookup(socket_path: &str, name6: &[u8; IDENTITY_NAME_LEN]) -> Option<u16> {
    let mut stream = UnixStream::connect(socket_path).ok()?;
    stream.write_all(name6).ok()?;
    let mut reply = [0u8; 2];
    stream.read_exact(&mut reply).ok()?;
    Some(BigEndian::read_u16(&reply))
}

/// Services one client connection for a poll cycle: pumps readable bytes
/// into the Player's inbound buffer, advances login if still `Connecting`,
/// then drives the command interpreter if `Connected`.
fn service_client_connection(token: Token, connections: &mut HashMap<Token, Connection>, state: &mut RoomState, log: &slog::Logger) {
    let conn = match connections.get_mut(&token) {
        Some(c) => c,
        None => return,
    };
    let player_index = conn.player_index;
    let addr = conn.addr;

    let mut incoming = Vec::new();
    let alive = conn.pump_read(&mut incoming);
    if let Some(player) = state.players.get_mut(player_index) {
        player.inbound.extend(incoming);
    }
    if !alive {
        // Peer close: immediate disconnect, no grace (spec.md §4.3.7).
        if let Some(player) = state.players.get_mut(player_index) {
            player.disconnect_immediately();
        }
        conn.closing = true;
        return;
    }

    let player_state = state.players.get(player_index).map(|p| p.state);
    match player_state {
        Some(PlayerState::Connecting) => {
            let key = state.players.get_mut(player_index).and_then(|p| p.accumulate_login_key());
            if let Some(key) = key {
                let mut name6 = [0u8; IDENTITY_NAME_LEN];
                name6.copy_from_slice(&key[..IDENTITY_NAME_LEN]);
                let socket_path = state.config.services.identity_socket.clone();
                match identity_lookup(&socket_path, &name6) {
                    Some(user_id) => {
                        if let Some(player) = state.players.get_mut(player_index) {
                            player.complete_login(user_id);
                        }
                        info!(log, "player logged in"; "user_id" => user_id, "addr" => %addr);
                    }
                    None => {
                        state.ip_deny.strike(addr.ip());
                        if let Some(player) = state.players.get_mut(player_index) {
                            player.begin_disconnect();
                        }
                        warn!(log, "login key rejected"; "addr" => %addr);
                    }
                }
            }
        }
        Some(PlayerState::Connected) => {
            interpreter::drive(state, player_index);
        }
        _ => {}
    }
}

fn flush_client_outbound(connections: &mut HashMap<Token, Connection>, state: &mut RoomState) {
    for conn in connections.values_mut() {
        if let Some(player) = state.players.get_mut(conn.player_index) {
            if player.state == PlayerState::Disconnecting && player.disconnect_counter == 0 {
                conn.write_buf.push(uzenet_room_core::opcode::COMMAND_DISCONNECT_BYTE);
                player.state = PlayerState::Disconnected;
                conn.closing = true;
            }
            if !player.outbound.is_empty() {
                conn.write_buf.extend(player.outbound.drain(..));
            }
        }
        if !conn.pump_write() {
            conn.closing = true;
        }
    }
}

fn reap_connections(connections: &mut HashMap<Token, Connection>, state: &mut RoomState, poll: &Poll, log: &slog::Logger) {
    let dead: Vec<Token> = connections
        .iter()
        .filter(|(_, c)| c.closing || matches!(state.players.get(c.player_index).map(|p| p.state), Some(PlayerState::Disconnected)))
        .map(|(t, _)| *t)
        .collect();
    for token in dead {
        if let Some(conn) = connections.remove(&token) {
            let _ = poll.deregister(&conn.stream);
            state.leave_room(conn.player_index);
            state.players.remove(conn.player_index);
            info!(log, "connection closed"; "addr" => %conn.addr);
        }
    }
}

/// One open AF_UNIX connection to a backend service, keyed by the Player
/// and service id it tunnels for.
struct BackendLink {
    stream: UnixStream,
    read_buf: Vec<u8>,
}

/// Opens backend connections for tunnels the interpreter has staged
/// (`START_SERVICE`'s `Tunnel::new` but `backend_online == false`): connects
/// the service's AF_UNIX socket and sends the tunnel `LOGIN{user_id}` frame
/// (spec.md §4.3.3). Connect failure is surfaced to the client as
/// `OpenFail{code}` (spec.md §4.3.7) rather than torn down as a hard error.
fn open_pending_tunnels(backend_links: &mut HashMap<(Index<Player>, u8), BackendLink>, state: &mut RoomState, log: &slog::Logger) {
    let pending: Vec<(Index<Player>, u8, u16)> = state
        .players
        .iter()
        .flat_map(|(idx, p)| {
            let user_id = p.user_id;
            p.tunnels.iter().filter(|(_, t)| !t.backend_online).map(move |(&service_id, _)| (idx, service_id, user_id))
        })
        .collect();

    for (player_index, service_id, user_id) in pending {
        let socket_path = state.config.services.backend_sockets.get(service_id as usize).map(|(_, path)| path.clone());
        let Some(socket_path) = socket_path else {
            warn!(log, "start_service requested unknown service id"; "service_id" => service_id);
            if let Some(player) = state.players.get_mut(player_index) {
                player.tunnels.remove(&service_id);
            }
            continue;
        };

        match UnixStream::connect(&socket_path) {
            Ok(mut stream) => {
                let login = Frame::login(0, LoginPayload { user_id, reserved: 0 }.encode().to_vec());
                if frame::write_frame(&mut stream, &login, frame::MAX_PAYLOAD).is_err() {
                    warn!(log, "failed to send tunnel login"; "service_id" => service_id);
                    send_open_fail(state, player_index, service_id, 1);
                    if let Some(player) = state.players.get_mut(player_index) {
                        player.tunnels.remove(&service_id);
                    }
                    continue;
                }
                let _ = stream.set_nonblocking(true);
                if let Some(player) = state.players.get_mut(player_index) {
                    if let Some(tunnel) = player.tunnels.get_mut(&service_id) {
                        tunnel.backend_online = true;
                    }
                }
                backend_links.insert((player_index, service_id), BackendLink { stream, read_buf: Vec::new() });
                info!(log, "tunnel opened"; "service_id" => service_id, "user_id" => user_id);
            }
            Err(e) => {
                warn!(log, "service socket connect failed"; "service_id" => service_id, "error" => %e);
                send_open_fail(state, player_index, service_id, 2);
                if let Some(player) = state.players.get_mut(player_index) {
                    player.tunnels.remove(&service_id);
                }
            }
        }
    }
}

fn send_open_fail(state: &mut RoomState, player_index: Index<Player>, service_id: u8, code: u8) {
    if let Some(player) = state.players.get_mut(player_index) {
        player.outbound.push_back(0xFF);
        player.outbound.push_back(service_id);
        player.outbound.push_back(code);
    }
}

/// Drains each open tunnel's client→service byte queue to its backend
/// socket as a `DATA` frame, then drains any frames the backend has sent
/// back, routing `DATA` payloads into the tunnel's client-bound queue (and
/// resolving an outstanding `GET_FILE_CHUNK` await if one is pending on
/// that tunnel).
fn service_backend_tunnels(backend_links: &mut HashMap<(Index<Player>, u8), BackendLink>, state: &mut RoomState, log: &slog::Logger) {
    let keys: Vec<(Index<Player>, u8)> = backend_links.keys().copied().collect();
    let mut dead = Vec::new();

    for key @ (player_index, service_id) in keys {
        let to_send = state
            .players
            .get_mut(player_index)
            .and_then(|p| p.tunnels.get_mut(&service_id))
            .map(|t| t.drain_to_service())
            .filter(|b| !b.is_empty());

        let link = match backend_links.get_mut(&key) {
            Some(l) => l,
            None => continue,
        };

        if let Some(bytes) = to_send {
            let data = Frame::data(bytes);
            if frame::write_frame(&mut link.stream, &data, frame::MAX_PAYLOAD).is_err() {
                dead.push(key);
                continue;
            }
        }

        let mut chunk = [0u8; 4096];
        loop {
            match link.stream.read(&mut chunk) {
                Ok(0) => {
                    dead.push(key);
                    break;
                }
                Ok(n) => link.read_buf.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => {
                    dead.push(key);
                    break;
                }
            }
        }

        for (kind, payload) in drain_backend_frames(&mut link.read_buf, log) {
            if kind != FrameType::Data {
                continue;
            }
            let resolved = interpreter::complete_async(state, player_index, service_id, &payload);
            if !resolved {
                if let Some(player) = state.players.get_mut(player_index) {
                    if let Some(tunnel) = player.tunnels.get_mut(&service_id) {
                        tunnel.push(payload);
                    }
                }
            }
        }
    }

    for key in dead {
        backend_links.remove(&key);
        let (player_index, service_id) = key;
        if let Some(player) = state.players.get_mut(player_index) {
            player.tunnels.remove(&service_id);
        }
    }
}

const TUNNEL_HEADER_LEN: usize = 4;

/// Parses as many complete tunnel frames as `buf` currently holds. An
/// oversize header is logged and the remaining buffer dropped rather than
/// attempting to resync mid-stream.
fn drain_backend_frames(buf: &mut Vec<u8>, log: &slog::Logger) -> Vec<(FrameType, Vec<u8>)> {
    let mut frames = Vec::new();
    let mut consumed = 0;
    loop {
        let remaining = &buf[consumed..];
        if remaining.len() < TUNNEL_HEADER_LEN {
            break;
        }
        let kind = match remaining[0] {
            0x01 => FrameType::Login,
            0x02 => FrameType::Data,
            0x03 => FrameType::Ping,
            0x04 => FrameType::Pong,
            other => {
                warn!(log, "malformed tunnel frame from backend, dropping buffered bytes"; "byte" => other);
                buf.clear();
                return frames;
            }
        };
        let len = BigEndian::read_u16(&remaining[2..4]) as usize;
        if len > MAX_FRAME_PAYLOAD {
            warn!(log, "oversize tunnel frame from backend, dropping buffered bytes"; "len" => len);
            buf.clear();
            return frames;
        }
        if remaining.len() < TUNNEL_HEADER_LEN + len {
            break; // frame still arriving
        }
        let payload = remaining[TUNNEL_HEADER_LEN..TUNNEL_HEADER_LEN + len].to_vec();
        frames.push((kind, payload));
        consumed += TUNNEL_HEADER_LEN + len;
    }
    buf.drain(..consumed);
    frames
}

fn flush_tunnel_slots_for_all(connections: &HashMap<Token, Connection>, state: &mut RoomState) {
    for conn in connections.values() {
        interpreter::flush_tunnel_slots(state, conn.player_index);
    }
}

pub fn main() {
    let matches = App::new("Room Server")
        .version("1.0")
        .author("Bush Hammer Industries")
        .about("Accepts embedded game clients and runs the multi-tenant room simulation.")
        .arg(Arg::with_name("CONFIG_FILE").help("Path to the room server config TOML").required(false))
        .get_matches();

    let config = match matches.value_of("CONFIG_FILE") {
        Some(path) => RoomConfig::load(path),
        None => RoomConfig::default(),
    };

    let log = uzenet_wire::logging::init(slog::Level::Info).new(o!("service" => "room"));
    let tick_hz = config.server.tick_hz.max(1) as u64;
    let tick_interval = Duration::from_millis(1000 / tick_hz);

    let game_addr: SocketAddr = config.server.game_address.parse().expect("invalid game_address");
    let telnet_addr: SocketAddr = config.server.telnet_address.parse().expect("invalid telnet_address");

    let game_listener = TcpListener::bind(&game_addr).expect("failed to bind game port");
    let telnet_listener = TcpListener::bind(&telnet_addr).expect("failed to bind telnet port");

    let poll = Poll::new().expect("failed to create poll");
    poll.register(&game_listener, GAME_TOKEN, Ready::readable(), PollOpt::edge()).expect("failed to register game listener");
    poll.register(&telnet_listener, TELNET_TOKEN, Ready::readable(), PollOpt::edge()).expect("failed to register telnet listener");

    let mut events = Events::with_capacity(1024);
    let mut connections: HashMap<Token, Connection> = HashMap::new();
    let mut backend_links: HashMap<(Index<Player>, u8), BackendLink> = HashMap::new();
    let mut next_token = FIRST_CONN_TOKEN;

    let mut state = RoomState::new(config, log.new(o!()));
    let mut last_tick = Instant::now();

    info!(log, "room server listening"; "game" => %game_addr, "telnet" => %telnet_addr);

    loop {
        if poll.poll(&mut events, Some(tick_interval)).is_err() {
            warn!(log, "poll failed, continuing");
        }

        for event in &events {
            let token = event.token();
            if token == GAME_TOKEN {
                accept_loop(&game_listener, &poll, &mut next_token, &log, "game", |token, stream, addr| {
                    accept_client(token, stream, addr, None, &mut connections, &mut state, &log);
                });
            } else if token == TELNET_TOKEN {
                accept_loop(&telnet_listener, &poll, &mut next_token, &log, "telnet", |token, stream, addr| {
                    accept_client(token, stream, addr, Some(TELNET_GREETING), &mut connections, &mut state, &log);
                });
            } else if connections.contains_key(&token) {
                service_client_connection(token, &mut connections, &mut state, &log);
            }
        }

        let now = Instant::now();
        let elapsed_ms = now.duration_since(last_tick).as_millis() as u32;
        last_tick = now;

        let player_indices: Vec<Index<Player>> = state.players.iter().map(|(idx, _)| idx).collect();
        for idx in player_indices {
            state.tick_player(idx, elapsed_ms);
            interpreter::drive(&mut state, idx);
            if let Some(player) = state.players.get_mut(idx) {
                player.tick_timers(elapsed_ms);
            }
        }

        open_pending_tunnels(&mut backend_links, &mut state, &log);
        service_backend_tunnels(&mut backend_links, &mut state, &log);
        flush_tunnel_slots_for_all(&connections, &mut state);

        flush_client_outbound(&mut connections, &mut state);
        reap_connections(&mut connections, &mut state, &poll, &log);
    }
}

/// Registers a new Player in `Connecting` state and, for telnet clients,
/// writes the greeting banner. The wire is otherwise identical after the
/// banner (spec.md §6) — both ports go through the same login/command
/// processing in `service_client_connection`.
fn accept_client(
    token: Token,
    stream: mio::net::TcpStream,
    addr: SocketAddr,
    greeting: Option<&[u8]>,
    connections: &mut HashMap<Token, Connection>,
    state: &mut RoomState,
    log: &slog::Logger,
) {
    if state.ip_deny.is_denied(addr.ip()) {
        return;
    }

    let player_index = match state.players.insert(Player::new(0, addr.ip())) {
        Some(idx) => idx,
        None => {
            warn!(log, "player arena full, rejecting connection");
            return;
        }
    };

    info!(log, "accepted connection"; "addr" => %addr);
    let mut conn = Connection::new(stream, addr, player_index);
    if let Some(banner) = greeting {
        conn.write_buf.extend_from_slice(banner);
        conn.pump_write();
    }
    connections.insert(token, conn);
}
