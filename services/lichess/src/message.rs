//! Fixed-layout tagged-union messages carried inside `Data` tunnel frames.
//! The first byte of every message is its type tag.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

pub const CHAT_MAX_LEN: usize = 60;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[repr(u8)]
pub enum ErrorCode {
    Generic = 1,
    NoToken = 2,
    LichessHttp = 3,
    AlreadyGame = 4,
    NoGame = 5,
    BadMove = 6,
    RemoteClosed = 7,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[repr(u8)]
pub enum Result_ {
    Unknown = 0,
    Win = 1,
    Loss = 2,
    Draw = 3,
    Aborted = 4,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[repr(u8)]
pub enum Reason {
    None = 0,
    Checkmate = 1,
    Resign = 2,
    Timeout = 3,
    Stalemate = 4,
    AgreedDraw = 5,
    Repetition = 6,
    FiftyMove = 7,
    Material = 8,
    Aborted = 9,
    Server = 10,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    Hello { proto_ver: u8 },
    NewGame { flags: u8, minutes: u8, increment: u8 },
    Move { from_sq: u8, to_sq: u8, promo: u8 },
    Resign,
    Abort,
    Ping { token: u8 },
    Chat { text: String },
    ReqMoves { start: u16, count: u8 },
    ReqChat { start: u16, count: u8 },
}

impl ClientMessage {
    pub fn decode(bytes: &[u8]) -> Option<ClientMessage> {
        let tag = *bytes.first()?;
        Some(match tag {
            0x01 => ClientMessage::Hello { proto_ver: *bytes.get(1)? },
            0x02 => ClientMessage::NewGame {
                flags: *bytes.get(1)?,
                minutes: *bytes.get(2)?,
                increment: *bytes.get(3)?,
            },
            0x03 => ClientMessage::Move {
                from_sq: *bytes.get(1)?,
                to_sq: *bytes.get(2)?,
                promo: *bytes.get(3)?,
            },
            0x04 => ClientMessage::Resign,
            0x05 => ClientMessage::Abort,
            0x06 => ClientMessage::Ping { token: *bytes.get(1)? },
            0x07 => {
                let len = (*bytes.get(2)?).min(CHAT_MAX_LEN as u8) as usize;
                let text_bytes = bytes.get(3..3 + len)?;
                ClientMessage::Chat { text: String::from_utf8_lossy(text_bytes).into_owned() }
            }
            0x08 => {
                let mut cursor = bytes.get(1..4)?;
                let start = cursor.read_u16::<BigEndian>().ok()?;
                let count = cursor.read_u8().ok()?;
                ClientMessage::ReqMoves { start, count }
            }
            0x09 => {
                let mut cursor = bytes.get(1..4)?;
                let start = cursor.read_u16::<BigEndian>().ok()?;
                let count = cursor.read_u8().ok()?;
                ClientMessage::ReqChat { start, count }
            }
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    Hello { proto_ver: u8 },
    GameStart { flags: u8, minutes: u8, increment: u8, my_side: u8, game_id: String },
    OppMove { from_sq: u8, to_sq: u8, promo: u8 },
    GameEnd { result: Result_, reason: Reason },
    Error { code: ErrorCode, arg0: u8, arg1: u8 },
    Pong { token: u8 },
    Info { info_code: u8, value0: u8, value1: u8 },
    Clock { side_to_move: u8, white_secs: u16, black_secs: u16 },
    Chat { text: String },
}

impl ServerMessage {
    /// Serializes one message into a `Data` tunnel frame payload.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match self {
            ServerMessage::Hello { proto_ver } => {
                out.extend_from_slice(&[0x81, *proto_ver, 0, 0]);
            }
            ServerMessage::GameStart { flags, minutes, increment, my_side, game_id } => {
                out.push(0x82);
                out.push(*flags);
                out.push(*minutes);
                out.push(*increment);
                out.push(*my_side);
                let id_bytes = game_id.as_bytes();
                let len = id_bytes.len().min(8);
                out.push(len as u8);
                out.extend_from_slice(&id_bytes[..len]);
                out.resize(out.len() + (8 - len), 0);
            }
            ServerMessage::OppMove { from_sq, to_sq, promo } => {
                out.extend_from_slice(&[0x83, *from_sq, *to_sq, *promo]);
            }
            ServerMessage::GameEnd { result, reason } => {
                out.extend_from_slice(&[0x84, *result as u8, *reason as u8, 0]);
            }
            ServerMessage::Error { code, arg0, arg1 } => {
                out.extend_from_slice(&[0x85, *code as u8, *arg0, *arg1]);
            }
            ServerMessage::Pong { token } => {
                out.extend_from_slice(&[0x86, *token, 0, 0]);
            }
            ServerMessage::Info { info_code, value0, value1 } => {
                out.extend_from_slice(&[0x87, *info_code, *value0, *value1]);
            }
            ServerMessage::Clock { side_to_move, white_secs, black_secs } => {
                out.push(0x88);
                out.push(*side_to_move & 0x01);
                out.write_u16::<BigEndian>(*white_secs).unwrap();
                out.write_u16::<BigEndian>(*black_secs).unwrap();
            }
            ServerMessage::Chat { text } => {
                out.push(0x89);
                out.push(0);
                let bytes = text.as_bytes();
                let len = bytes.len().min(CHAT_MAX_LEN);
                out.push(len as u8);
                out.extend_from_slice(&bytes[..len]);
            }
        }
        out
    }

    /// `true` for messages that must never be dropped by the outbound ring
    /// buffer's backpressure discipline.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ServerMessage::GameEnd { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_new_game() {
        let bytes = [0x02, 0x01, 5, 3];
        let msg = ClientMessage::decode(&bytes).unwrap();
        assert_eq!(msg, ClientMessage::NewGame { flags: 1, minutes: 5, increment: 3 });
    }

    #[test]
    fn decode_move() {
        let bytes = [0x03, 12, 28, 0];
        let msg = ClientMessage::decode(&bytes).unwrap();
        assert_eq!(msg, ClientMessage::Move { from_sq: 12, to_sq: 28, promo: 0 });
    }

    #[test]
    fn decode_chat_truncates_to_max_len() {
        let mut bytes = vec![0x07, 0, 200];
        bytes.extend(std::iter::repeat(b'x').take(200));
        let msg = ClientMessage::decode(&bytes);
        assert!(msg.is_none(), "claimed length exceeds buffer, decode must fail rather than truncate silently");
    }

    #[test]
    fn unknown_tag_fails_decode() {
        assert!(ClientMessage::decode(&[0xAA]).is_none());
    }

    #[test]
    fn game_end_is_terminal() {
        let msg = ServerMessage::GameEnd { result: Result_::Win, reason: Reason::Checkmate };
        assert!(msg.is_terminal());
        let clock = ServerMessage::Clock { side_to_move: 0, white_secs: 10, black_secs: 10 };
        assert!(!clock.is_terminal());
    }

    #[test]
    fn encode_game_start_pads_game_id_to_8_bytes() {
        let msg = ServerMessage::GameStart {
            flags: 0,
            minutes: 5,
            increment: 0,
            my_side: 0,
            game_id: "abc123".to_string(),
        };
        let bytes = msg.encode();
        assert_eq!(bytes.len(), 1 + 4 + 1 + 8);
    }
}
