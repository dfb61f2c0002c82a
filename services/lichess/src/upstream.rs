//! The Lichess HTTP collaborator. Everything network-facing sits behind the
//! `LichessUpstream` trait so the streaming-parser logic (the part this
//! crate actually owns) can be unit-tested without a live connection.

use std::io::BufRead;

use serde::Deserialize;
use slog::{info, warn, Logger};

use crate::client_context::{ClientContext, Side};
use crate::message::{Reason, Result_, ServerMessage};

#[derive(thiserror::Error, Debug)]
pub enum UpstreamError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("no oauth token on file for this client")]
    NoToken,
}

pub struct OpenChallenge {
    pub game_id: String,
    pub side: Side,
}

/// The external collaborator boundary: create an open challenge, then
/// stream its game state. A real implementation talks to the Lichess board
/// API over HTTP; tests substitute a fake.
pub trait LichessUpstream {
    fn open_challenge(&self, token: &str, minutes: u8, increment: u8, rated: bool) -> Result<OpenChallenge, UpstreamError>;

    /// Streams newline-delimited JSON game-state events, invoking `on_line`
    /// for each raw line. Blocks until the stream ends or the peer closes.
    fn stream_game(&self, token: &str, game_id: &str, on_line: &mut dyn FnMut(&str)) -> Result<(), UpstreamError>;
}

/// Blocking `reqwest`-backed implementation against the real Lichess board
/// API.
pub struct HttpUpstream {
    base_url: String,
    client: reqwest::blocking::Client,
}

impl HttpUpstream {
    pub fn new(base_url: String) -> HttpUpstream {
        HttpUpstream { base_url, client: reqwest::blocking::Client::new() }
    }
}

impl LichessUpstream for HttpUpstream {
    fn open_challenge(&self, token: &str, minutes: u8, increment: u8, rated: bool) -> Result<OpenChallenge, UpstreamError> {
        #[derive(Deserialize)]
        struct ChallengeResponse {
            challenge: ChallengeBody,
        }
        #[derive(Deserialize)]
        struct ChallengeBody {
            id: String,
        }

        let response: ChallengeResponse = self
            .client
            .post(format!("{}/api/challenge/open", self.base_url))
            .bearer_auth(token)
            .form(&[
                ("clock.limit", (minutes as u32 * 60).to_string()),
                ("clock.increment", increment.to_string()),
                ("rated", rated.to_string()),
            ])
            .send()?
            .error_for_status()?
            .json()?;

        Ok(OpenChallenge { game_id: response.challenge.id, side: Side::White })
    }

    fn stream_game(&self, token: &str, game_id: &str, on_line: &mut dyn FnMut(&str)) -> Result<(), UpstreamError> {
        let response = self
            .client
            .get(format!("{}/api/board/game/stream/{}", self.base_url, game_id))
            .bearer_auth(token)
            .send()?
            .error_for_status()?;

        let reader = std::io::BufReader::new(response);
        for line in reader.lines().flatten() {
            if !line.trim().is_empty() {
                on_line(&line);
            }
        }
        Ok(())
    }
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum StreamEvent {
    #[serde(rename = "gameFull")]
    GameFull { state: GameState },
    #[serde(rename = "gameState")]
    GameState(GameState),
    #[serde(rename = "chatLine")]
    ChatLine { text: String },
}

#[derive(Deserialize)]
struct GameState {
    moves: String,
    #[serde(default)]
    wtime: u64,
    #[serde(default)]
    btime: u64,
    status: String,
}

fn map_status(status: &str) -> Option<(Result_, Reason)> {
    match status {
        "started" | "created" => None,
        "draw" => Some((Result_::Draw, Reason::AgreedDraw)),
        "stalemate" => Some((Result_::Draw, Reason::Stalemate)),
        "aborted" => Some((Result_::Aborted, Reason::Aborted)),
        "mate" => Some((Result_::Unknown, Reason::Checkmate)),
        "resign" => Some((Result_::Unknown, Reason::Resign)),
        "timeout" | "outoftime" => Some((Result_::Unknown, Reason::Timeout)),
        _ => Some((Result_::Unknown, Reason::Server)),
    }
}

/// Parses one newline-delimited JSON line from the game stream, updating
/// `ctx` and returning the server messages it produces. Pure with respect
/// to I/O so it can be exercised directly in tests (see Scenario S6).
pub fn handle_stream_line(ctx: &mut ClientContext, line: &str, log: &Logger) -> Vec<ServerMessage> {
    let event: StreamEvent = match serde_json::from_str(line) {
        Ok(e) => e,
        Err(err) => {
            warn!(log, "ignoring unrecognized lichess stream event"; "error" => %err);
            return Vec::new();
        }
    };

    let state = match event {
        StreamEvent::GameFull { state } => state,
        StreamEvent::GameState(state) => state,
        StreamEvent::ChatLine { text } => {
            ctx.push_chat(text.clone());
            return vec![ServerMessage::Chat { text }];
        }
    };

    let mut out = Vec::new();

    let ply_count = state.moves.matches(' ').count() + if state.moves.is_empty() { 0 } else { 1 };
    let last_uci = state.moves.rsplit(' ').next().filter(|s| !s.is_empty());

    out.push(ServerMessage::Clock {
        side_to_move: (ply_count & 1) as u8,
        white_secs: (state.wtime / 1000) as u16,
        black_secs: (state.btime / 1000) as u16,
    });

    if let Some(uci) = last_uci {
        if ctx.observe_stream_move(uci) {
            if let Some((from_sq, to_sq, promo)) = crate::uci::uci_to_move(uci) {
                out.push(ServerMessage::OppMove { from_sq, to_sq, promo: promo as u8 });
            }
        }
    }

    if let Some((result, reason)) = map_status(&state.status) {
        info!(log, "lichess game ended"; "game_id" => ctx.game_id.clone(), "status" => &state.status);
        ctx.end_game();
        out.push(ServerMessage::GameEnd { result, reason });
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_log() -> Logger {
        uzenet_wire::logging::test_logger()
    }

    #[test]
    fn emits_clock_and_opp_move_for_new_ply() {
        let mut ctx = ClientContext::new(1, None);
        ctx.start_game("abc12345".to_string(), Side::White).unwrap();

        let line = r#"{"type":"gameState","moves":"e2e4","wtime":300000,"btime":300000,"status":"started"}"#;
        let msgs = handle_stream_line(&mut ctx, line, &test_log());

        assert!(msgs.iter().any(|m| matches!(m, ServerMessage::OppMove { .. })));
        assert!(msgs.iter().any(|m| matches!(m, ServerMessage::Clock { .. })));
    }

    #[test]
    fn suppresses_echo_of_own_move() {
        let mut ctx = ClientContext::new(1, None);
        ctx.start_game("abc12345".to_string(), Side::White).unwrap();
        ctx.record_sent_move("e2e4".to_string());

        let line = r#"{"type":"gameState","moves":"e2e4","wtime":300000,"btime":300000,"status":"started"}"#;
        let msgs = handle_stream_line(&mut ctx, line, &test_log());

        assert!(!msgs.iter().any(|m| matches!(m, ServerMessage::OppMove { .. })));
    }

    #[test]
    fn mate_status_ends_game() {
        let mut ctx = ClientContext::new(1, None);
        ctx.start_game("abc12345".to_string(), Side::White).unwrap();

        let line = r#"{"type":"gameState","moves":"e2e4 e7e5","wtime":300000,"btime":300000,"status":"mate"}"#;
        let msgs = handle_stream_line(&mut ctx, line, &test_log());

        assert!(!ctx.in_game);
        assert!(msgs.iter().any(|m| matches!(m, ServerMessage::GameEnd { reason: Reason::Checkmate, .. })));
    }

    #[test]
    fn chat_line_is_logged_and_emitted() {
        let mut ctx = ClientContext::new(1, None);
        let line = r#"{"type":"chatLine","text":"gg"}"#;
        let msgs = handle_stream_line(&mut ctx, line, &test_log());
        assert_eq!(ctx.chat_log.len(), 1);
        assert!(matches!(&msgs[0], ServerMessage::Chat { text } if text == "gg"));
    }
}
