#![allow(clippy::len_without_is_empty)]
#![allow(clippy::new_without_default)]

pub mod crc16;
pub mod error;
pub mod frame;
pub mod logging;
pub mod time;

pub use error::{WireError, WireResult};
pub use frame::{Frame, FrameType};
