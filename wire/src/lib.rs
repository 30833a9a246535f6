//! Bounds-checked wire codec shared by the TLS and DTLS record and
//! handshake layers.
//!
//! This crate knows nothing about TLS semantics — it has no notion of a
//! ClientHello or a cipher suite. It only knows how to walk a byte buffer
//! with bounds checks (`Reader`), how to build one with deferred
//! length-prefix patching (`Writer`), and the wire-level vocabulary for
//! alerts, which is shared unchanged between every protocol version this
//! workspace supports.

mod alert;
mod reader;
mod writer;

pub use alert::{Alert, AlertDescription, AlertLevel};
pub use reader::{DecodeError, Reader};
pub use writer::{LengthPrefixed, Writer};
