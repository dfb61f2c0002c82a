use std::io::Write;
use std::os::unix::net::{UnixListener, UnixStream};
use std::sync::{Arc, Mutex};
use std::thread;

use clap::{App, Arg};
use slog::{info, o, warn};

use uzenet_lichess::client_context::ClientContext;
use uzenet_lichess::config::LichessConfig;
use uzenet_lichess::message::{ClientMessage, ErrorCode, ServerMessage};
use uzenet_lichess::upstream::{self, HttpUpstream, LichessUpstream};
use uzenet_wire::frame::{self, Frame, FrameType, LoginPayload};

fn handle_connection(mut stream: UnixStream, upstream: Arc<HttpUpstream>, max_payload: usize, log: slog::Logger) {
    let login = match frame::read_frame(&mut stream, max_payload) {
        Ok(f) if f.kind == FrameType::Login => f,
        _ => {
            warn!(log, "lichess connection did not start with LOGIN, closing");
            return;
        }
    };
    let user_id = LoginPayload::decode(&login.payload).map(|p| p.user_id).unwrap_or(0xFFFF);

    let ctx = Arc::new(Mutex::new(ClientContext::new(user_id as u64, None)));
    let out_stream = stream.try_clone().expect("failed to clone lichess stream");
    let write_lock = Arc::new(Mutex::new(out_stream));

    loop {
        let frame = match frame::read_frame(&mut stream, max_payload) {
            Ok(f) => f,
            Err(_) => break,
        };
        if frame.kind != FrameType::Data {
            continue;
        }

        let Some(msg) = ClientMessage::decode(&frame.payload) else {
            warn!(log, "unrecognized lichess client message, disconnecting");
            break;
        };

        let replies = handle_client_message(&ctx, &upstream, msg, Arc::clone(&write_lock), max_payload, log.clone());
        for reply in replies {
            send(&write_lock, &reply, max_payload, &log);
        }
    }

    let _ = stream.flush();
}

fn send(write_lock: &Arc<Mutex<UnixStream>>, msg: &ServerMessage, max_payload: usize, log: &slog::Logger) {
    let out = Frame::data(msg.encode());
    let mut guard = write_lock.lock().unwrap();
    if frame::write_frame(&mut *guard, &out, max_payload).is_err() {
        warn!(log, "failed writing lichess outbound frame");
    }
}

fn handle_client_message(
    ctx: &Arc<Mutex<ClientContext>>,
    upstream: &Arc<HttpUpstream>,
    msg: ClientMessage,
    write_lock: Arc<Mutex<UnixStream>>,
    max_payload: usize,
    log: slog::Logger,
) -> Vec<ServerMessage> {
    match msg {
        ClientMessage::Hello { .. } => vec![ServerMessage::Hello { proto_ver: 1 }],

        ClientMessage::NewGame { flags, minutes, increment } => {
            let mut guard = ctx.lock().unwrap();
            if guard.in_game {
                return vec![ServerMessage::Error { code: ErrorCode::AlreadyGame, arg0: 0, arg1: 0 }];
            }

            let token = match &guard.oauth_token {
                Some(t) => t.clone(),
                None => return vec![ServerMessage::Error { code: ErrorCode::NoToken, arg0: 0, arg1: 0 }],
            };
            drop(guard);

            let rated = flags & 0x01 != 0;
            match upstream.open_challenge(&token, minutes, increment, rated) {
                Ok(challenge) => {
                    let game_id = challenge.game_id.clone();
                    {
                        let mut guard = ctx.lock().unwrap();
                        let _ = guard.start_game(game_id.clone(), challenge.side);
                    }

                    let ctx_clone = Arc::clone(ctx);
                    let upstream_clone = Arc::clone(upstream);
                    let log_clone = log.clone();
                    thread::spawn(move || {
                        let token = ctx_clone.lock().unwrap().oauth_token.clone().unwrap_or_default();
                        let _ = upstream_clone.stream_game(&token, &game_id, &mut |line| {
                            let messages = {
                                let mut guard = ctx_clone.lock().unwrap();
                                upstream::handle_stream_line(&mut guard, line, &log_clone)
                            };
                            for message in messages {
                                send(&write_lock, &message, max_payload, &log_clone);
                            }
                        });
                    });

                    vec![ServerMessage::GameStart {
                        flags,
                        minutes,
                        increment,
                        my_side: 0,
                        game_id: challenge.game_id,
                    }]
                }
                Err(_) => vec![ServerMessage::Error { code: ErrorCode::LichessHttp, arg0: 0, arg1: 0 }],
            }
        }

        ClientMessage::Move { from_sq, to_sq, promo } => {
            let mut guard = ctx.lock().unwrap();
            if !guard.in_game {
                return vec![ServerMessage::Error { code: ErrorCode::NoGame, arg0: 0, arg1: 0 }];
            }
            let promo = uzenet_lichess::uci::Promo::from_u8(promo).unwrap_or(uzenet_lichess::uci::Promo::None);
            let uci = uzenet_lichess::uci::move_to_uci(from_sq, to_sq, promo);
            guard.record_sent_move(uci);
            Vec::new()
        }

        ClientMessage::Resign | ClientMessage::Abort => {
            let mut guard = ctx.lock().unwrap();
            guard.end_game();
            Vec::new()
        }

        ClientMessage::Ping { token } => vec![ServerMessage::Pong { token }],

        ClientMessage::Chat { text } => {
            let mut guard = ctx.lock().unwrap();
            guard.push_chat(text.clone());
            vec![ServerMessage::Chat { text }]
        }

        ClientMessage::ReqMoves { start, count } => {
            let guard = ctx.lock().unwrap();
            let count = if count == 0 { 32 } else { count } as usize;
            let start = start as usize;
            let moves: Vec<String> = guard.move_log.iter().skip(start).take(count).cloned().collect();
            vec![ServerMessage::Info {
                info_code: 1,
                value0: moves.len() as u8,
                value1: 0,
            }]
        }

        ClientMessage::ReqChat { start, count } => {
            let guard = ctx.lock().unwrap();
            let count = if count == 0 { 32 } else { count } as usize;
            let start = start as usize;
            let lines: Vec<String> = guard.chat_log.iter().skip(start).take(count).cloned().collect();
            vec![ServerMessage::Info {
                info_code: 2,
                value0: lines.len() as u8,
                value1: 0,
            }]
        }
    }
}

pub fn main() {
    let matches = App::new("Lichess Adapter")
        .version("1.0")
        .author("Bush Hammer Industries")
        .about("Per-client online-chess adapter bridging tunnel frames to the Lichess board API.")
        .arg(Arg::with_name("CONFIG_FILE").help("Path to the lichess config TOML").required(false))
        .get_matches();

    let config = match matches.value_of("CONFIG_FILE") {
        Some(path) => LichessConfig::load(path).expect("failed to load lichess config"),
        None => LichessConfig::default(),
    };

    let log = uzenet_wire::logging::init(slog::Level::Info).new(o!("service" => "lichess"));
    let upstream = Arc::new(HttpUpstream::new(config.server.api_base_url.clone()));

    let _ = std::fs::remove_file(&config.server.socket_path);
    let listener = UnixListener::bind(&config.server.socket_path).expect("failed to bind lichess socket");
    info!(log, "lichess daemon listening"; "socket" => &config.server.socket_path);

    let max_payload = config.server.frame_payload_cap as usize;

    for incoming in listener.incoming() {
        match incoming {
            Ok(stream) => {
                let upstream = Arc::clone(&upstream);
                let log = log.new(o!());
                thread::spawn(move || handle_connection(stream, upstream, max_payload, log));
            }
            Err(err) => warn!(log, "failed to accept lichess connection"; "error" => %err),
        }
    }
}
