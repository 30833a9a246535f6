//! The callback surface invoked by the engine and implemented by the
//! embedder, and the credential provider surface.
//!
//! Modeled as a borrowed collaborator the engine holds a non-owning
//! reference to for the endpoint's lifetime rather than as an owned trait
//! object, so the embedder keeps ownership and can inspect/mutate its own
//! state from inside a callback without fighting the borrow checker.

use crate::crypto::{EphemeralSecret, Signer, Verifier};
use crate::error::Result;
use crate::extensions::Extension;
use crate::session::Session;
use crate::side::Side;
use tls_wire::Alert;

/// Invoked by the engine at well-defined points in the connection lifecycle.
/// Every method has a conservative default so an embedder only overrides what
/// it cares about.
pub trait EndpointCallbacks {
    /// Outbound wire bytes ready to be written to the transport.
    fn emit_data(&mut self, data: &[u8]);

    /// Decrypted application data, in receive order.
    fn record_received(&mut self, seq: u64, data: &[u8]) {
        let _ = (seq, data);
    }

    /// A peer or locally-generated alert.
    fn alert(&mut self, alert: Alert) {
        let _ = alert;
    }

    /// Fired once, on the transition to `Active`. Returning `false` vetoes
    /// session-cache insertion without affecting the connection itself.
    fn session_established(&mut self, session: &Session) -> bool {
        let _ = session;
        true
    }

    /// Validate a peer certificate chain. `ocsp_responses` is empty unless
    /// `status_request`/`status_request_v2` negotiated stapling.
    fn verify_cert_chain(
        &mut self,
        chain: &[Vec<u8>],
        ocsp_responses: &[Vec<u8>],
        hostname: Option<&str>,
    ) -> Result<()>;

    /// Inspect/add extensions before they are sent.
    fn modify_extensions(&mut self, extensions: &mut Vec<Extension>, side: Side) {
        let _ = (extensions, side);
    }

    /// Inspect extensions as received, including any `Extension::Unknown`.
    fn examine_extensions(&mut self, extensions: &[Extension], side: Side) {
        let _ = (extensions, side);
    }

    /// Server-side ALPN selection. Must return a member of `offered`, or
    /// `None` to signal `no_application_protocol`.
    fn server_choose_app_protocol(&mut self, offered: &[Vec<u8>]) -> Option<Vec<u8>> {
        let _ = offered;
        None
    }

    /// Hook for a custom signer, used for `CertificateVerify` and
    /// (non-ephemeral) `ServerKeyExchange` signatures.
    fn tls_sign_message(&mut self, key_id: &[u8]) -> Result<Box<dyn Signer>>;

    /// Hook for a custom verifier, matching `tls_sign_message`.
    fn tls_verify_message(&mut self, public_key: &[u8]) -> Result<Box<dyn Verifier>>;

    /// Hook for a custom ephemeral key-agreement implementation.
    fn tls_ephemeral_key_agreement(
        &mut self,
        group: crate::suite::NamedGroup,
    ) -> Result<(Box<dyn EphemeralSecret>, Vec<u8>)>;

    /// Decrypt/validate a session ticket the server previously issued.
    /// Returns `None` if the ticket cannot be decrypted (not an error — the
    /// handshake falls back to a full negotiation).
    fn tls_decrypt_session_ticket(&mut self, ticket: &[u8]) -> Option<Session> {
        let _ = ticket;
        None
    }
}

/// Implemented by the embedder to supply server/client credentials.
pub trait CredentialProvider {
    /// Trust anchors acceptable for the given certificate type/context.
    fn trusted_certificate_authorities(&self, cert_type: CertificateType, context: &str) -> Vec<Vec<u8>>;

    /// Select a certificate chain whose leaf key type is in
    /// `accepted_key_types` and whose issuer is acceptable to `acceptable_cas`
    /// (empty meaning "any").
    fn find_cert_chain(
        &self,
        accepted_key_types: &[KeyType],
        acceptable_cas: &[Vec<u8>],
        cert_type: CertificateType,
        context: &str,
    ) -> Option<Vec<Vec<u8>>>;

    /// The private key matching a chain previously returned by
    /// `find_cert_chain`, opaque to the engine (passed to `tls_sign_message`
    /// as the key id).
    fn private_key_for(&self, cert: &[u8], cert_type: CertificateType, context: &str) -> Option<Vec<u8>>;

    /// Pre-shared key lookup for PSK/DHE_PSK/ECDHE_PSK key exchange.
    fn psk(&self, context: &str, identity: &[u8]) -> Option<Vec<u8>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertificateType {
    X509,
    RawPublicKey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    Rsa,
    Ecdsa,
    Dsa,
}
