pub mod client_context;
pub mod config;
pub mod message;
pub mod uci;
pub mod upstream;

pub use client_context::ClientContext;
pub use message::{ClientMessage, ServerMessage};
