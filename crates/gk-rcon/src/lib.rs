//! Remote-console client: executes administrative commands against a
//! running game server over a length-prefixed little-endian binary
//! protocol (Valve RCON-style), with auth handshake and bounded
//! reconnect-and-retry on I/O failure.

mod client;
mod error;
mod packet;

pub use client::RconClient;
pub use error::{RconError, Result};
