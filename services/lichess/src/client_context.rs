//! Per-client Lichess adapter state: game membership, move/chat history,
//! and the bounded outbound message ring.

use std::collections::VecDeque;

use crate::message::ServerMessage;

pub const MAX_MOVE_LOG: usize = 512;
pub const MAX_CHAT_LOG: usize = 256;
pub const RING_SLOTS: usize = 16;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Side {
    White,
    Black,
}

/// Bounded 16-slot outbound ring. `push` drops the oldest non-terminal
/// message to make room rather than ever dropping a `GameEnd`; if the ring
/// is entirely full of undroppable terminal messages (impossible in
/// practice — there is ever only one in flight) `push` fails.
pub struct OutboundRing {
    slots: VecDeque<ServerMessage>,
}

impl OutboundRing {
    pub fn new() -> OutboundRing {
        OutboundRing { slots: VecDeque::with_capacity(RING_SLOTS) }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Enqueues `msg`. Returns `true` on success. Terminal messages
    /// (`GameEnd`) always succeed, evicting the oldest droppable slot if the
    /// ring is full; best-effort messages fail (`-2` in the original wire
    /// convention) once the ring is full.
    pub fn push(&mut self, msg: ServerMessage) -> bool {
        if self.slots.len() < RING_SLOTS {
            self.slots.push_back(msg);
            return true;
        }

        if msg.is_terminal() {
            if let Some(idx) = self.slots.iter().position(|m| !m.is_terminal()) {
                self.slots.remove(idx);
            } else {
                self.slots.pop_front();
            }
            self.slots.push_back(msg);
            true
        } else {
            false
        }
    }

    /// Drains at most one slot per write-ready event, matching the
    /// dispatcher's "one slot per tick" flush discipline.
    pub fn drain_one(&mut self) -> Option<ServerMessage> {
        self.slots.pop_front()
    }
}

pub struct ClientContext {
    pub user_id: u64,
    pub oauth_token: Option<String>,
    pub game_id: Option<String>,
    pub in_game: bool,
    pub my_side: Option<Side>,
    pub last_sent_uci: Option<String>,
    pub move_log: VecDeque<String>,
    pub chat_log: VecDeque<String>,
    pub outbound: OutboundRing,
}

#[derive(Debug, Eq, PartialEq)]
pub struct AlreadyInGame;

impl ClientContext {
    pub fn new(user_id: u64, oauth_token: Option<String>) -> ClientContext {
        ClientContext {
            user_id,
            oauth_token,
            game_id: None,
            in_game: false,
            my_side: None,
            last_sent_uci: None,
            move_log: VecDeque::new(),
            chat_log: VecDeque::new(),
            outbound: OutboundRing::new(),
        }
    }

    /// Starts tracking a new game. Fails if a game is already in progress —
    /// callers should reply with `ERROR{ALREADY_GAME}` in that case.
    pub fn start_game(&mut self, game_id: String, side: Side) -> Result<(), AlreadyInGame> {
        if self.in_game {
            return Err(AlreadyInGame);
        }
        self.game_id = Some(game_id);
        self.in_game = true;
        self.my_side = Some(side);
        self.last_sent_uci = None;
        self.move_log.clear();
        Ok(())
    }

    pub fn end_game(&mut self) {
        self.in_game = false;
        self.game_id = None;
        self.my_side = None;
    }

    pub fn record_sent_move(&mut self, uci: String) {
        self.last_sent_uci = Some(uci.clone());
        self.push_move(uci);
    }

    /// Appends a move observed from the game stream. Returns `true` if it
    /// should be emitted as `OppMove` (i.e. it was not this client's own
    /// move echoed back).
    pub fn observe_stream_move(&mut self, uci: &str) -> bool {
        if self.last_sent_uci.as_deref() == Some(uci) {
            self.last_sent_uci = None;
            false
        } else {
            self.push_move(uci.to_string());
            true
        }
    }

    fn push_move(&mut self, uci: String) {
        if self.move_log.len() == MAX_MOVE_LOG {
            self.move_log.pop_front();
        }
        self.move_log.push_back(uci);
    }

    pub fn push_chat(&mut self, line: String) {
        if self.chat_log.len() == MAX_CHAT_LOG {
            self.chat_log.pop_front();
        }
        self.chat_log.push_back(line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starting_game_while_in_game_fails() {
        let mut ctx = ClientContext::new(1, None);
        ctx.start_game("abc".to_string(), Side::White).unwrap();
        assert_eq!(ctx.start_game("def".to_string(), Side::Black), Err(AlreadyInGame));
    }

    #[test]
    fn echo_suppression_clears_flag() {
        let mut ctx = ClientContext::new(1, None);
        ctx.start_game("abc".to_string(), Side::White).unwrap();
        ctx.record_sent_move("e2e4".to_string());

        assert!(!ctx.observe_stream_move("e2e4"));
        assert!(ctx.last_sent_uci.is_none());

        assert!(ctx.observe_stream_move("e7e5"));
        assert_eq!(ctx.move_log.len(), 2);
    }

    #[test]
    fn ring_never_drops_game_end() {
        let mut ring = OutboundRing::new();
        for i in 0..RING_SLOTS {
            assert!(ring.push(ServerMessage::Pong { token: i as u8 }));
        }
        assert!(!ring.push(ServerMessage::Pong { token: 99 }));

        let end = ServerMessage::GameEnd { result: crate::message::Result_::Win, reason: crate::message::Reason::Checkmate };
        assert!(ring.push(end.clone()));
        assert_eq!(ring.len(), RING_SLOTS);
        assert!(ring.slots.iter().any(|m| *m == end));
    }

    #[test]
    fn move_log_is_bounded() {
        let mut ctx = ClientContext::new(1, None);
        for i in 0..(MAX_MOVE_LOG + 10) {
            ctx.push_move(format!("m{}", i));
        }
        assert_eq!(ctx.move_log.len(), MAX_MOVE_LOG);
    }
}
