//! Handshake message catalogue, transcript, key schedule, and the
//! per-side state-machine drivers.

pub mod client;
pub mod key_schedule;
pub mod message;
pub mod server;
pub mod state;
pub mod transcript;
