//! WebSocket transport for tether.
//!
//! Each connection gets a fresh session; inbound text frames are decoded
//! into shell inputs and replies are written back as text frames followed
//! by a prompt.

pub mod protocol;
mod server;

pub use server::Server;
