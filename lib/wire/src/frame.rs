//! The tunnel framing protocol shared by the room server and every backend
//! service: `{type: u8, flags: u8, length: u16 big-endian, payload: bytes}`.

use std::io::{Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{WireError, WireResult};

/// Default per-endpoint payload cap. Individual services (VFS) use a smaller
/// cap; the room server's client-facing tunnels use the full 256.
pub const MAX_PAYLOAD: usize = 256;

const HEADER_LEN: usize = 4;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[repr(u8)]
pub enum FrameType {
    Login = 0x01,
    Data = 0x02,
    Ping = 0x03,
    Pong = 0x04,
}

impl FrameType {
    #[inline]
    fn from_u8(value: u8) -> WireResult<FrameType> {
        match value {
            0x01 => Ok(FrameType::Login),
            0x02 => Ok(FrameType::Data),
            0x03 => Ok(FrameType::Ping),
            0x04 => Ok(FrameType::Pong),
            _ => Err(WireError::MalformedHeader),
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Frame {
    pub kind: FrameType,
    pub flags: u8,
    pub payload: Vec<u8>,
}

impl Frame {
    #[inline]
    pub fn new(kind: FrameType, flags: u8, payload: Vec<u8>) -> Frame {
        Frame { kind, flags, payload }
    }

    #[inline]
    pub fn login(flags: u8, payload: Vec<u8>) -> Frame {
        Frame::new(FrameType::Login, flags, payload)
    }

    #[inline]
    pub fn data(payload: Vec<u8>) -> Frame {
        Frame::new(FrameType::Data, 0, payload)
    }
}

/// Tunnel login payload: `{user_id: u16, reserved: u16}`.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct LoginPayload {
    pub user_id: u16,
    pub reserved: u16,
}

impl LoginPayload {
    pub const SIZE: usize = 4;

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        (&mut out[..]).write_u16::<BigEndian>(self.user_id).unwrap();
        (&mut out[2..]).write_u16::<BigEndian>(self.reserved).unwrap();
        out
    }

    pub fn decode(bytes: &[u8]) -> WireResult<LoginPayload> {
        if bytes.len() < Self::SIZE {
            return Err(WireError::MalformedHeader);
        }
        let mut cursor = bytes;
        let user_id = cursor.read_u16::<BigEndian>()?;
        let reserved = cursor.read_u16::<BigEndian>()?;
        Ok(LoginPayload { user_id, reserved })
    }
}

/// Reads one complete frame from `reader`, retrying on `EINTR` transparently
/// (the way `std::io` already surfaces EINTR as `Interrupted` for callers to
/// retry is handled by `read_exact`'s own retry loop). Rejects payload
/// lengths above `max_payload` without attempting to drain them — on a
/// stream transport the caller must treat this as fatal and drop the
/// connection.
pub fn read_frame<R: Read>(reader: &mut R, max_payload: usize) -> WireResult<Frame> {
    let mut header = [0u8; HEADER_LEN];
    if let Err(err) = reader.read_exact(&mut header) {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            return Err(WireError::Eof);
        }
        return Err(err.into());
    }

    let kind = FrameType::from_u8(header[0])?;
    let flags = header[1];
    let length = u16::from_be_bytes([header[2], header[3]]) as usize;

    if length > max_payload {
        return Err(WireError::PayloadTooLarge { len: length, max: max_payload });
    }

    let mut payload = vec![0u8; length];
    reader.read_exact(&mut payload)?;

    Ok(Frame { kind, flags, payload })
}

/// Writes a complete frame to `writer`. Returns `PayloadTooLarge` rather than
/// silently truncating an oversize payload, so that every frame that reaches
/// the wire round-trips through `read_frame` unchanged (see Testable
/// Property 7 / Scenario S5).
pub fn write_frame<W: Write>(writer: &mut W, frame: &Frame, max_payload: usize) -> WireResult<()> {
    if frame.payload.len() > max_payload {
        return Err(WireError::PayloadTooLarge {
            len: frame.payload.len(),
            max: max_payload,
        });
    }

    let mut header = [0u8; HEADER_LEN];
    header[0] = frame.kind as u8;
    header[1] = frame.flags;
    let len_bytes = (frame.payload.len() as u16).to_be_bytes();
    header[2] = len_bytes[0];
    header[3] = len_bytes[1];

    writer.write_all(&header)?;
    writer.write_all(&frame.payload)?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn round_trip_s5() {
        let input = [0x02u8, 0x00, 0x00, 0x03, b'a', b'b', b'c'];
        let mut cursor = Cursor::new(&input[..]);
        let frame = read_frame(&mut cursor, MAX_PAYLOAD).unwrap();

        assert_eq!(frame.kind, FrameType::Data);
        assert_eq!(frame.flags, 0);
        assert_eq!(frame.payload, b"abc");

        let mut out = Vec::new();
        write_frame(&mut out, &frame, MAX_PAYLOAD).unwrap();
        assert_eq!(&out[..], &input[..]);
    }

    #[test]
    fn rejects_oversize_length_on_read() {
        let mut header = vec![0x02u8, 0x00, 0x01, 0x01];
        header.extend(std::iter::repeat(0u8).take(257));
        let mut cursor = Cursor::new(header);
        let err = read_frame(&mut cursor, 256).unwrap_err();
        assert!(matches!(err, WireError::PayloadTooLarge { .. }));
    }

    #[test]
    fn rejects_oversize_payload_on_write() {
        let frame = Frame::data(vec![0u8; 300]);
        let mut out = Vec::new();
        let err = write_frame(&mut out, &frame, 256).unwrap_err();
        assert!(matches!(err, WireError::PayloadTooLarge { .. }));
    }

    #[test]
    fn eof_on_empty_stream() {
        let mut cursor = Cursor::new(Vec::<u8>::new());
        let err = read_frame(&mut cursor, MAX_PAYLOAD).unwrap_err();
        assert!(matches!(err, WireError::Eof));
    }

    #[test]
    fn login_payload_round_trip() {
        let payload = LoginPayload { user_id: 1234, reserved: 0 };
        let encoded = payload.encode();
        let decoded = LoginPayload::decode(&encoded).unwrap();
        assert_eq!(payload, decoded);
    }
}
