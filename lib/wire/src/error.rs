use std::io;

pub type WireResult<T> = Result<T, WireError>;

/// Errors surfaced at the tunnel-codec boundary.
///
/// `Io(WouldBlock)` is the normal "nothing to do yet" signal for non-blocking
/// callers; everything else is a hard protocol or transport failure.
#[derive(thiserror::Error, Debug)]
pub enum WireError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("payload of {len} bytes exceeds the {max} byte frame cap")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("peer closed the connection")]
    Eof,

    #[error("malformed frame header")]
    MalformedHeader,
}

impl WireError {
    #[inline]
    pub fn is_would_block(&self) -> bool {
        matches!(self, WireError::Io(e) if e.kind() == io::ErrorKind::WouldBlock)
    }
}
