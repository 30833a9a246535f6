//! I/O-free TLS/DTLS handshake state machine and record layer.
//!
//! An embedder owns the socket; this crate owns the protocol. [`Client`]
//! and [`Server`] are fed inbound bytes through
//! [`endpoint::Client::received_data`]/[`endpoint::Server::received_data`]
//! and react by calling back into [`callbacks::EndpointCallbacks`] with
//! whatever bytes must now go out, mirroring the synchronous "hand it
//! bytes, get bytes back" posture the whole engine follows. Cryptographic
//! primitives, certificate storage, and session persistence are all
//! supplied by the embedder through the traits in [`crypto`],
//! [`callbacks`], and [`session`] — nothing in this crate implements a
//! cipher or validates a certificate chain itself.

pub mod callbacks;
pub mod crypto;
pub mod endpoint;
pub mod error;
pub mod extensions;
pub mod handshake;
pub mod policy;
pub mod record;
pub mod session;
pub mod side;
pub mod suite;
pub mod version;

pub use endpoint::{Client, Collaborators, Server};
pub use error::{Error, Result};
pub use policy::Policy;
pub use session::{InMemorySessionManager, Session, SessionManager};
pub use side::Side;
pub use version::ProtocolVersion;
