//! Client-side handshake driver; the client state graph lives in
//! [`crate::handshake::state::ClientState`].
//!
//! Owns the client's transcript, in-flight cipher-suite negotiation, and
//! pending key-schedule material. The driver never touches the network or
//! the record layer directly — it's handed already-defragmented handshake
//! message bodies by [`crate::endpoint::Client`] and returns the next
//! message(s) to send, mirroring the synchronous "hand it bytes, get bytes
//! back" shape the whole engine follows.

use crate::crypto::{EphemeralSecret, Prf, RandomSource};
use crate::error::{Error, Result};
use crate::extensions::{self, Extension};
use crate::handshake::key_schedule::{self, FinishedSender, KeyBlockLayout};
use crate::handshake::message::*;
use crate::handshake::state::ClientState;
use crate::policy::Policy;
use crate::session::Session;
use crate::suite::CipherSuite;
use crate::version::ProtocolVersion;

pub struct NegotiatedParams {
    pub version: ProtocolVersion,
    pub suite: &'static CipherSuite,
    pub session_id: Vec<u8>,
    pub client_random: [u8; 32],
    pub server_random: [u8; 32],
    pub extended_master_secret: bool,
    pub application_protocol: Option<Vec<u8>>,
    pub srtp_profile: Option<u16>,
    /// RFC 7366 Encrypt-then-MAC, negotiated only if we offered it, the
    /// server echoed it back, and the chosen suite is CBC-based.
    pub encrypt_then_mac: bool,
}

pub struct ClientDriver {
    pub state: ClientState,
    datagram: bool,
    policy_max_version: ProtocolVersion,
    policy_min_version: ProtocolVersion,
    pub negotiated: Option<NegotiatedParams>,
    pending_ephemeral: Option<Box<dyn EphemeralSecret>>,
    pending_server_public: Option<Vec<u8>>,
    own_ephemeral_public: Option<Vec<u8>>,
    resuming: Option<Session>,
    pub master_secret: Option<[u8; 48]>,
    pub server_cert_chain: Vec<Vec<u8>>,
    client_random: Option<[u8; 32]>,
    pub certificate_requested: bool,
    /// Set for the duration of one `ClientHello`/`ServerHello` exchange:
    /// whether we offered `encrypt_then_mac`, so the echoed extension in
    /// `ServerHello` (if any) can be trusted only when it answers an offer
    /// we actually made (RFC 7366 §3: the server MUST NOT send the
    /// extension unless the client did).
    offered_encrypt_then_mac: bool,
    /// Set for the duration of a renegotiation: a second
    /// pass through this same driver's state graph, started from `Active`
    /// rather than from a fresh connection. Governs whether `ServerHello`
    /// requires `RenegotiationInfo` (RFC 5746 §3.7: mandatory on a
    /// rehandshake, merely recommended on the first one).
    pub renegotiating: bool,
}

impl ClientDriver {
    pub fn new(policy: &Policy, datagram: bool) -> Self {
        ClientDriver {
            state: ClientState::Start,
            datagram,
            policy_max_version: policy.max_version,
            policy_min_version: policy.min_version,
            negotiated: None,
            pending_ephemeral: None,
            pending_server_public: None,
            own_ephemeral_public: None,
            resuming: None,
            master_secret: None,
            server_cert_chain: Vec::new(),
            client_random: None,
            certificate_requested: false,
            offered_encrypt_then_mac: false,
            renegotiating: false,
        }
    }

    /// Build the initial `ClientHello` (or a cookie-bearing retry).
    pub fn build_client_hello(
        &mut self,
        policy: &Policy,
        rng: &dyn RandomSource,
        resuming: Option<Session>,
        server_hostname: Option<String>,
        cookie: Vec<u8>,
    ) -> ClientHello {
        let random = Random::generate(rng);
        let session_id = resuming.as_ref().map(|s| s.id.clone()).unwrap_or_default();
        let mut exts = vec![];
        if let Some(name) = server_hostname {
            exts.push(Extension::ServerName(name));
        }
        if policy.extended_master_secret != crate::policy::ExtendedMasterSecretPolicy::Disable {
            exts.push(Extension::ExtendedMasterSecret);
        }
        if !policy.application_protocols.is_empty() {
            exts.push(Extension::Alpn(policy.application_protocols.clone()));
        }
        // RFC 5077 §3.2: advertise ticket-based resumption support with an
        // empty extension body, or echo back a previously-issued ticket to
        // resume against it (the server tells the two apart by whether the
        // body is empty).
        if policy.session_tickets_enabled {
            let ticket = resuming.as_ref().map(|s| s.ticket.clone()).unwrap_or_default();
            exts.push(Extension::SessionTicket(ticket));
        }
        exts.push(Extension::RenegotiationInfo(Vec::new()));
        self.offered_encrypt_then_mac = policy.negotiate_encrypt_then_mac;
        if policy.negotiate_encrypt_then_mac {
            exts.push(Extension::EncryptThenMac);
        }
        if !policy.srtp_profiles.is_empty() {
            exts.push(Extension::UseSrtp(extensions::srtp::encode_offer(&policy.srtp_profiles)));
        }

        let supported_versions =
            crate::version::known_versions_in_range(self.policy_min_version, self.policy_max_version);
        if supported_versions.len() > 1 {
            exts.push(Extension::SupportedVersions(supported_versions));
        }

        self.resuming = resuming;
        self.state = ClientState::SentClientHello;
        self.client_random = Some(random.0);

        let mut cipher_suites: Vec<u16> = policy.effective_cipher_suites().iter().map(|s| s.code).collect();
        if policy.send_fallback_scsv {
            cipher_suites.push(crate::suite::TLS_FALLBACK_SCSV);
        }

        ClientHello {
            client_version: self.policy_max_version,
            random,
            session_id,
            cookie,
            cipher_suites,
            compression_methods: vec![0],
            extensions: exts,
        }
    }

    pub fn on_hello_verify_request(&mut self, hvr: HelloVerifyRequest) -> Result<Vec<u8>> {
        if self.state != ClientState::SentClientHello {
            return Err(Error::UnexpectedMessage("HelloVerifyRequest outside Start"));
        }
        self.state = ClientState::ReceivedHelloVerifyRequest;
        Ok(hvr.cookie)
    }

    pub fn on_server_hello(
        &mut self,
        sh: ServerHello,
        offered_cipher_suites: &[&'static CipherSuite],
    ) -> Result<()> {
        let client_random = self
            .client_random
            .ok_or(Error::InternalError("ServerHello received before ClientHello was sent"))?;
        if !matches!(
            self.state,
            ClientState::SentClientHello | ClientState::ReceivedHelloVerifyRequest
        ) {
            return Err(Error::UnexpectedMessage("ServerHello outside hello exchange"));
        }
        if !sh.server_version.at_least(&self.policy_min_version) || !self.policy_max_version.at_least(&sh.server_version) {
            return Err(Error::ProtocolVersion("server chose an unacceptable version"));
        }
        if self.renegotiating && extensions::find(&sh.extensions, crate::extensions::ext_type::RENEGOTIATION_INFO).is_none() {
            return Err(Error::HandshakeFailure("renegotiation_info missing from ServerHello on a rehandshake"));
        }
        let suite = offered_cipher_suites
            .iter()
            .find(|s| s.code == sh.cipher_suite)
            .copied()
            .ok_or(Error::HandshakeFailure("server chose an unoffered cipher suite"))?;
        let extended_master_secret =
            extensions::find(&sh.extensions, crate::extensions::ext_type::EXTENDED_MASTER_SECRET).is_some();
        let application_protocol = extensions::find(&sh.extensions, crate::extensions::ext_type::APPLICATION_LAYER_PROTOCOL_NEGOTIATION)
            .and_then(|e| match e {
                Extension::Alpn(protocols) => protocols.first().cloned(),
                _ => None,
            });
        let srtp_profile = extensions::find(&sh.extensions, crate::extensions::ext_type::USE_SRTP)
            .and_then(|e| match e {
                Extension::UseSrtp(bytes) => extensions::srtp::decode_selection(bytes).ok(),
                _ => None,
            });
        let encrypt_then_mac = self.offered_encrypt_then_mac
            && suite.uses_encrypt_then_mac_eligible()
            && extensions::find(&sh.extensions, crate::extensions::ext_type::ENCRYPT_THEN_MAC).is_some();

        let resuming_matches = self
            .resuming
            .as_ref()
            .map(|s| s.id == sh.session_id && s.cipher_suite.code == suite.code)
            .unwrap_or(false);

        self.negotiated = Some(NegotiatedParams {
            version: sh.server_version,
            suite,
            session_id: sh.session_id,
            client_random,
            server_random: sh.random.0,
            extended_master_secret,
            application_protocol,
            srtp_profile,
            encrypt_then_mac,
        });

        if resuming_matches {
            self.master_secret = self.resuming.as_ref().map(|s| s.master_secret);
        }

        self.state = if resuming_matches {
            ClientState::WaitingServerChangeCipherSpecResumed
        } else {
            ClientState::ReceivedServerHello
        };
        Ok(())
    }

    pub fn is_resuming(&self) -> bool {
        matches!(self.state, ClientState::WaitingServerChangeCipherSpecResumed)
    }

    pub fn on_certificate(&mut self, cert: CertificateChain) -> Result<()> {
        if self.state != ClientState::ReceivedServerHello {
            return Err(Error::UnexpectedMessage("Certificate outside hello exchange"));
        }
        self.server_cert_chain = cert.certs;
        self.state = ClientState::ReceivedCertificate;
        Ok(())
    }

    pub fn on_server_key_exchange_ecdhe(
        &mut self,
        ske: ServerKeyExchangeEcdhe,
        transcript_snapshot: &[u8],
        verifier: &dyn crate::crypto::Verifier,
    ) -> Result<Vec<u8>> {
        if !matches!(self.state, ClientState::ReceivedCertificate | ClientState::ReceivedServerHello) {
            return Err(Error::UnexpectedMessage("ServerKeyExchange out of order"));
        }
        let mut signed = Vec::with_capacity(transcript_snapshot.len());
        signed.extend_from_slice(transcript_snapshot);
        verifier
            .verify(&signed, &ske.signature)
            .map_err(|_| Error::BadCertificate("ServerKeyExchange signature invalid".into()))?;
        self.state = ClientState::ReceivedServerKeyExchange;
        self.pending_server_public = Some(ske.public_key.clone());
        Ok(ske.public_key)
    }

    pub fn take_server_public_key(&mut self) -> Option<Vec<u8>> {
        self.pending_server_public.take()
    }

    pub fn store_own_ephemeral_public(&mut self, public_key: Vec<u8>) {
        self.own_ephemeral_public = Some(public_key);
    }

    pub fn take_own_ephemeral_public(&mut self) -> Option<Vec<u8>> {
        self.own_ephemeral_public.take()
    }

    pub fn expect_server_hello_done(&mut self) -> Result<()> {
        if !matches!(
            self.state,
            ClientState::ReceivedCertificate | ClientState::ReceivedServerKeyExchange | ClientState::ReceivedCertificateRequest
        ) {
            return Err(Error::UnexpectedMessage("ServerHelloDone out of order"));
        }
        self.state = ClientState::ReceivedServerHelloDone;
        Ok(())
    }

    /// Finish the key schedule once the pre-master secret is known (RSA:
    /// decided by the client itself; (EC)DHE: the agreed shared secret),
    /// and transition to "about to send ChangeCipherSpec".
    pub fn finish_key_exchange(
        &mut self,
        prf: &dyn Prf,
        pre_master_secret: &[u8],
        session_hash: Option<&[u8]>,
    ) {
        let negotiated = self.negotiated.as_ref().expect("negotiated params set before key exchange");
        let ms = key_schedule::master_secret(
            prf,
            pre_master_secret,
            &negotiated.client_random,
            &negotiated.server_random,
            if negotiated.extended_master_secret {
                session_hash
            } else {
                None
            },
        );
        self.master_secret = Some(ms);
        self.state = ClientState::SentClientKeyExchange;
    }

    pub fn verify_server_finished(
        &mut self,
        prf: &dyn Prf,
        transcript_hash: &[u8],
        received_verify_data: &[u8],
    ) -> Result<()> {
        let ms = self.master_secret.ok_or(Error::InternalError("Finished verified before key schedule ready"))?;
        let expected = key_schedule::verify_data(prf, &ms, FinishedSender::Server, transcript_hash);
        if expected != received_verify_data {
            return Err(Error::BadRecordMac);
        }
        self.state = ClientState::Active;
        self.renegotiating = false;
        Ok(())
    }

    pub fn store_ephemeral_secret(&mut self, secret: Box<dyn EphemeralSecret>) {
        self.pending_ephemeral = Some(secret);
    }

    pub fn take_ephemeral_secret(&mut self) -> Option<Box<dyn EphemeralSecret>> {
        self.pending_ephemeral.take()
    }

    pub fn key_block_layout(&self) -> KeyBlockLayout {
        let suite = self.negotiated.as_ref().expect("suite negotiated").suite;
        match &suite.bulk {
            crate::suite::BulkCipher::Block { key_len, .. } => KeyBlockLayout {
                mac_key_len: suite.mac.len(),
                enc_key_len: *key_len,
                fixed_iv_len: 0,
            },
            crate::suite::BulkCipher::AeadGcm { key_len, .. } | crate::suite::BulkCipher::AeadCcm { key_len, .. } | crate::suite::BulkCipher::AeadOcb { key_len, .. } => {
                KeyBlockLayout {
                    mac_key_len: 0,
                    enc_key_len: *key_len,
                    fixed_iv_len: 4,
                }
            }
            crate::suite::BulkCipher::AeadChaCha20Poly1305 => KeyBlockLayout {
                mac_key_len: 0,
                enc_key_len: 32,
                fixed_iv_len: 12,
            },
            crate::suite::BulkCipher::Stream { key_len, .. } => KeyBlockLayout {
                mac_key_len: suite.mac.len(),
                enc_key_len: *key_len,
                fixed_iv_len: 0,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::suite::TLS_RSA_WITH_AES_128_CBC_SHA;

    #[test]
    fn rejects_cipher_suite_server_never_offered() {
        let policy = Policy::default();
        let mut driver = ClientDriver::new(&policy, false);
        driver.state = ClientState::SentClientHello;
        driver.client_random = Some([0u8; 32]);
        let sh = ServerHello {
            server_version: ProtocolVersion::TLS1_2,
            random: Random([0u8; 32]),
            session_id: Vec::new(),
            cipher_suite: 0xFFFF,
            compression_method: 0,
            extensions: Vec::new(),
        };
        let err = driver
            .on_server_hello(sh, &[&TLS_RSA_WITH_AES_128_CBC_SHA])
            .unwrap_err();
        assert!(matches!(err, Error::HandshakeFailure(_)));
    }
}
