//! Connection policy.
//!
//! A plain, cloneable struct rather than a builder: every knob has a
//! conservative default via [`Policy::default`], and embedders override the
//! fields they care about with struct-update syntax
//! (`Policy { min_version: ProtocolVersion::TLS1_2, ..Policy::default() }`).

use crate::suite::{CipherSuite, KeyExchangeMethod, MacAlgorithm, NamedGroup, SignatureScheme};
use crate::version::ProtocolVersion;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtendedMasterSecretPolicy {
    /// Negotiate it if the peer offers it; never require it.
    Allow,
    /// Refuse to complete a handshake without it (RFC 7627 §5.4).
    Require,
    /// Never offer/accept it.
    Disable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientAuthPolicy {
    None,
    Optional,
    Required,
}

#[derive(Debug, Clone)]
pub struct Policy {
    /// Lowest acceptable negotiated version (inclusive).
    pub min_version: ProtocolVersion,
    /// Highest offered/accepted version (inclusive).
    pub max_version: ProtocolVersion,

    /// Cipher suites this endpoint offers/accepts, in preference order.
    /// Empty means "use the engine's built-in catalogue order"
    /// (`suite::ALL_CIPHER_SUITES`).
    pub cipher_suites: Vec<&'static CipherSuite>,

    pub extended_master_secret: ExtendedMasterSecretPolicy,

    /// Server: whether and how to request a client certificate.
    pub client_auth: ClientAuthPolicy,

    /// ALPN protocols offered (client) or accepted (server), in preference
    /// order.
    pub application_protocols: Vec<Vec<u8>>,

    /// Server: enable session-ticket issuance (RFC 5077) in addition to, or
    /// instead of, session-id caching.
    pub session_tickets_enabled: bool,
    /// Advisory lifetime hint sent in `NewSessionTicket`, in seconds.
    pub session_ticket_lifetime_hint: u32,

    /// Maximum plaintext fragment length the engine will ever emit,
    /// independent of any negotiated `max_fragment_length` extension.
    pub max_fragment_length: usize,

    /// DTLS: number of times a flight is retransmitted before the
    /// handshake fails with [`crate::error::Error::HandshakeTimeout`].
    pub dtls_max_retransmissions: u32,
    /// DTLS: initial retransmission timeout, doubled on each retry up to
    /// `dtls_max_retransmission_timeout`.
    pub dtls_initial_timeout_millis: u64,
    pub dtls_max_retransmission_timeout_millis: u64,

    /// Require the peer to demonstrate transport ownership via
    /// `HelloVerifyRequest` before the server commits handshake state
    /// (DTLS only; mandatory in practice, kept configurable for test harnesses
    /// that talk to a fixed peer).
    pub dtls_require_cookie_exchange: bool,

    /// (EC)DHE groups this endpoint offers/accepts, in preference order.
    /// Empty means "accept any group the suite catalogue names".
    pub allowed_groups: Vec<NamedGroup>,
    /// Signature schemes accepted for `ServerKeyExchange`/`CertificateVerify`.
    /// Empty means "accept any scheme the suite catalogue names".
    pub allowed_signature_methods: Vec<SignatureScheme>,
    /// MAC algorithms this endpoint will negotiate for CBC suites. Empty
    /// means "no additional restriction beyond the suite's own MAC".
    pub allowed_macs: Vec<MacAlgorithm>,
    /// Key-exchange methods this endpoint will negotiate. Empty means "no
    /// additional restriction beyond `cipher_suites`".
    pub allowed_key_exchange_methods: Vec<KeyExchangeMethod>,

    /// Reject RSA keys (certificate or key-exchange) below this size.
    pub minimum_rsa_bits: u32,
    /// Reject classical (non-elliptic) DHE groups below this size.
    pub minimum_dh_group_size: u32,
    /// Reject ECDHE groups below this size.
    pub minimum_ecdh_group_size: u32,
    /// Reject signatures whose algorithm provides less than this many bits
    /// of security strength.
    pub minimum_signature_strength: u32,

    /// Negotiate RFC 7366 Encrypt-then-MAC for CBC suites when the peer
    /// offers it.
    pub negotiate_encrypt_then_mac: bool,
    /// Send the TLS_FALLBACK_SCSV pseudo-suite when retrying a handshake at
    /// a lower version (RFC 7507), to let a patched peer detect a
    /// downgrade attack.
    pub send_fallback_scsv: bool,
    /// Server: offer the `status_request` extension and answer with a
    /// `CertificateStatus` message (RFC 6066 §8, OCSP stapling).
    pub support_cert_status_message: bool,
    /// Require a live OCSP/CRL check on the peer's certificate, not just
    /// chain validation, before completing the handshake.
    pub require_cert_revocation_info: bool,
    /// Offer/accept the deprecated `ec_point_formats` compressed-point
    /// encodings rather than uncompressed-only.
    pub allowed_ecc_curves_for_point_compression: bool,

    /// Client: permitted to send a `HelloRequest`-triggered or
    /// self-initiated renegotiation.
    pub allow_client_initiated_renegotiation: bool,
    /// Server: permitted to send `HelloRequest` to ask the client to
    /// renegotiate.
    pub allow_server_initiated_renegotiation: bool,

    /// DTLS-SRTP protection profiles (RFC 5764 §4.1.1) offered (client) or
    /// accepted (server), in preference order. Empty disables `use_srtp`
    /// entirely, on both sides.
    pub srtp_profiles: Vec<u16>,
}

impl Default for Policy {
    fn default() -> Self {
        Policy {
            min_version: ProtocolVersion::TLS1_2,
            max_version: ProtocolVersion::TLS1_2,
            cipher_suites: Vec::new(),
            extended_master_secret: ExtendedMasterSecretPolicy::Allow,
            client_auth: ClientAuthPolicy::None,
            application_protocols: Vec::new(),
            session_tickets_enabled: false,
            session_ticket_lifetime_hint: 7200,
            max_fragment_length: 1 << 14,
            dtls_max_retransmissions: 6,
            dtls_initial_timeout_millis: 1000,
            dtls_max_retransmission_timeout_millis: 60_000,
            dtls_require_cookie_exchange: true,
            allowed_groups: Vec::new(),
            allowed_signature_methods: Vec::new(),
            allowed_macs: Vec::new(),
            allowed_key_exchange_methods: Vec::new(),
            minimum_rsa_bits: 2048,
            minimum_dh_group_size: 2048,
            minimum_ecdh_group_size: 256,
            minimum_signature_strength: 128,
            negotiate_encrypt_then_mac: true,
            send_fallback_scsv: false,
            support_cert_status_message: false,
            require_cert_revocation_info: false,
            allowed_ecc_curves_for_point_compression: false,
            allow_client_initiated_renegotiation: false,
            allow_server_initiated_renegotiation: false,
            srtp_profiles: Vec::new(),
        }
    }
}

impl Policy {
    /// The effective suite preference list, falling back to the built-in
    /// catalogue when the embedder hasn't restricted it.
    pub fn effective_cipher_suites(&self) -> Vec<&'static CipherSuite> {
        if self.cipher_suites.is_empty() {
            crate::suite::ALL_CIPHER_SUITES.iter().copied().collect()
        } else {
            self.cipher_suites.clone()
        }
    }

    pub fn accepts_version(&self, v: ProtocolVersion) -> bool {
        if v.is_datagram() != self.min_version.is_datagram() {
            return false;
        }
        v.at_least(&self.min_version) && self.max_version.at_least(&v)
    }

    pub fn allows_group(&self, group: NamedGroup) -> bool {
        self.allowed_groups.is_empty() || self.allowed_groups.contains(&group)
    }

    pub fn allows_signature_scheme(&self, scheme: SignatureScheme) -> bool {
        self.allowed_signature_methods.is_empty() || self.allowed_signature_methods.contains(&scheme)
    }

    pub fn allows_mac(&self, mac: MacAlgorithm) -> bool {
        self.allowed_macs.is_empty() || self.allowed_macs.contains(&mac)
    }

    pub fn allows_key_exchange(&self, kex: KeyExchangeMethod) -> bool {
        self.allowed_key_exchange_methods.is_empty() || self.allowed_key_exchange_methods.contains(&kex)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_accepts_only_tls_1_2() {
        let p = Policy::default();
        assert!(p.accepts_version(ProtocolVersion::TLS1_2));
        assert!(!p.accepts_version(ProtocolVersion::TLS1_1));
        assert!(!p.accepts_version(ProtocolVersion::DTLS1_2));
    }

    #[test]
    fn empty_cipher_suites_falls_back_to_catalogue() {
        let p = Policy::default();
        assert_eq!(
            p.effective_cipher_suites().len(),
            crate::suite::ALL_CIPHER_SUITES.len()
        );
    }
}
