//! Server-side handshake driver; the server state graph lives in
//! [`crate::handshake::state::ServerState`].
//!
//! Mirrors [`crate::handshake::client::ClientDriver`]'s shape: it owns
//! negotiation state and the pending key schedule, and is handed already
//! defragmented handshake bodies by [`crate::endpoint::Server`].

use crate::crypto::{EphemeralSecret, Prf, RandomSource};
use crate::error::{Error, Result};
use crate::extensions::{self, Extension};
use crate::handshake::key_schedule::{self, FinishedSender, KeyBlockLayout};
use crate::handshake::message::*;
use crate::handshake::state::ServerState;
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
    /// RFC 7366 Encrypt-then-MAC, negotiated only if the client offered it,
    /// policy allows it, and the chosen suite is CBC-based.
    pub encrypt_then_mac: bool,
}

pub struct ServerDriver {
    pub state: ServerState,
    datagram: bool,
    policy_min_version: ProtocolVersion,
    policy_max_version: ProtocolVersion,
    pub negotiated: Option<NegotiatedParams>,
    pending_ephemeral: Option<Box<dyn EphemeralSecret>>,
    pub master_secret: Option<[u8; 48]>,
    pub client_cert_chain: Vec<Vec<u8>>,
    pub resumed_session: Option<Session>,
    /// Set once this negotiation's `ServerHelloDone` flight included a
    /// `CertificateRequest` — governs whether an empty client `Certificate`
    /// is tolerated (`ClientAuthPolicy::Optional`) or fatal
    /// (`ClientAuthPolicy::Required`).
    pub client_cert_requested: bool,
    /// Set for the duration of a renegotiation, mirroring
    /// [`crate::handshake::client::ClientDriver::renegotiating`].
    pub renegotiating: bool,
}

impl ServerDriver {
    pub fn new(policy: &Policy, datagram: bool) -> Self {
        ServerDriver {
            state: ServerState::Start,
            datagram,
            policy_min_version: policy.min_version,
            policy_max_version: policy.max_version,
            negotiated: None,
            pending_ephemeral: None,
            master_secret: None,
            client_cert_chain: Vec::new(),
            resumed_session: None,
            client_cert_requested: false,
            renegotiating: false,
        }
    }

    pub fn cookie_required(&self) -> bool {
        self.datagram
    }

    /// Evaluate a `ClientHello`, negotiate version/suite/extensions, and
    /// decide whether the offered session id is resumable (the caller
    /// looks it up via `SessionManager` and passes the result back in).
    pub fn on_client_hello(
        &mut self,
        ch: &ClientHello,
        policy: &Policy,
        resumable: Option<Session>,
        rng: &dyn RandomSource,
        new_session_id: Vec<u8>,
        alpn_selector: &mut dyn FnMut(&[Vec<u8>]) -> Option<Vec<u8>>,
    ) -> Result<ServerHello> {
        if self.state == ServerState::Active {
            // A ClientHello arriving after Active is a rehandshake: legal
            // only because the caller already checked
            // `allow_client_initiated_renegotiation`, so from here on this
            // is just a second pass through the same negotiation logic.
            self.renegotiating = true;
            self.client_cert_chain.clear();
            self.client_cert_requested = false;
            self.master_secret = None;
        } else if !matches!(self.state, ServerState::Start | ServerState::SentHelloVerifyRequest) {
            return Err(Error::UnexpectedMessage("ClientHello outside Start"));
        }
        if self.renegotiating
            && extensions::find(&ch.extensions, crate::extensions::ext_type::RENEGOTIATION_INFO).is_none()
        {
            return Err(Error::HandshakeFailure("renegotiation_info missing from ClientHello on a rehandshake"));
        }
        // RFC 7507: a client retrying after a prior attempt failed sends
        // TLS_FALLBACK_SCSV alongside its (now lower) offered version. If we
        // are capable of more than that, the failure wasn't a version
        // mismatch — something on the path forced it down.
        if ch.cipher_suites.contains(&crate::suite::TLS_FALLBACK_SCSV) && self.policy_max_version.at_least(&ch.client_version) && ch.client_version != self.policy_max_version {
            return Err(Error::InappropriateFallback);
        }
        // Prefer the client's full `supported_versions` list over its
        // legacy `client_version` field when present (RFC 8446 §4.2.1):
        // a version-intolerant path can force `client_version` down even
        // though the client's real ceiling, carried in the extension, is
        // still within what we accept.
        let client_max = extensions::find(&ch.extensions, crate::extensions::ext_type::SUPPORTED_VERSIONS)
            .and_then(|e| match e {
                Extension::SupportedVersions(versions) => versions
                    .iter()
                    .copied()
                    .filter(|v| v.is_datagram() == ch.client_version.is_datagram())
                    .max_by(|a, b| if a.at_least(b) { std::cmp::Ordering::Greater } else { std::cmp::Ordering::Less }),
                _ => None,
            })
            .unwrap_or(ch.client_version);
        if !client_max.at_least(&self.policy_min_version) {
            return Err(Error::ProtocolVersion("client's offered version is too old"));
        }
        let negotiated_version = if self.policy_max_version.at_least(&client_max) {
            client_max
        } else {
            self.policy_max_version
        };

        let acceptable = policy.effective_cipher_suites();
        let suite = pick_mutual_suite(&ch.cipher_suites, &acceptable)
            .ok_or(Error::HandshakeFailure("no cipher suite overlap with client"))?;

        let client_offers_ems =
            extensions::find(&ch.extensions, crate::extensions::ext_type::EXTENDED_MASTER_SECRET).is_some();
        if policy.extended_master_secret == crate::policy::ExtendedMasterSecretPolicy::Require && !client_offers_ems {
            return Err(Error::HandshakeFailure("extended_master_secret required by policy but not offered"));
        }
        let extended_master_secret =
            client_offers_ems && policy.extended_master_secret != crate::policy::ExtendedMasterSecretPolicy::Disable;

        // RFC 7301: the embedder's callback, not the policy, chooses among
        // the client's ordered offer; the result must be a member of that
        // offer or the handshake fails with `no_application_protocol`.
        let application_protocol = match extensions::find(&ch.extensions, crate::extensions::ext_type::APPLICATION_LAYER_PROTOCOL_NEGOTIATION) {
            Some(Extension::Alpn(offered)) => match alpn_selector(offered) {
                Some(chosen) if offered.contains(&chosen) => Some(chosen),
                _ => return Err(Error::NoApplicationProtocol),
            },
            _ => None,
        };

        let srtp_profile = extensions::find(&ch.extensions, crate::extensions::ext_type::USE_SRTP)
            .and_then(|e| match e {
                Extension::UseSrtp(bytes) => extensions::srtp::decode_offer(bytes).ok(),
                _ => None,
            })
            .and_then(|offered| policy.srtp_profiles.iter().find(|p| offered.contains(p)).copied());

        let client_offers_etm =
            extensions::find(&ch.extensions, crate::extensions::ext_type::ENCRYPT_THEN_MAC).is_some();
        let encrypt_then_mac =
            client_offers_etm && policy.negotiate_encrypt_then_mac && suite.uses_encrypt_then_mac_eligible();

        let resuming = resumable.filter(|s| s.cipher_suite.code == suite.code && s.protocol_version == negotiated_version);
        let session_id = resuming.as_ref().map(|s| s.id.clone()).unwrap_or(new_session_id);

        let server_random = Random::generate(rng);
        let mut exts = Vec::new();
        if extended_master_secret {
            exts.push(Extension::ExtendedMasterSecret);
        }
        if let Some(proto) = &application_protocol {
            exts.push(Extension::Alpn(vec![proto.clone()]));
        }
        if let Some(profile) = srtp_profile {
            exts.push(Extension::UseSrtp(extensions::srtp::encode_selection(profile)));
        }
        exts.push(Extension::RenegotiationInfo(Vec::new()));

        self.negotiated = Some(NegotiatedParams {
            version: negotiated_version,
            suite,
            session_id: session_id.clone(),
            client_random: ch.random.0,
            server_random: server_random.0,
            extended_master_secret,
            application_protocol,
            srtp_profile,
            encrypt_then_mac,
        });
        // An abbreviated handshake has no ClientKeyExchange to derive the
        // master secret from, so carry over the one already established
        // for this session instead of running `finish_key_exchange`.
        if let Some(s) = &resuming {
            self.master_secret = Some(s.master_secret);
        }
        self.resumed_session = resuming;
        self.state = ServerState::SentServerHello;

        Ok(ServerHello {
            server_version: negotiated_version,
            random: server_random,
            session_id,
            cipher_suite: suite.code,
            compression_method: 0,
            extensions: exts,
        })
    }

    pub fn is_resuming(&self) -> bool {
        self.resumed_session.is_some()
    }

    pub fn require_hello_verify(&mut self) {
        self.state = ServerState::SentHelloVerifyRequest;
    }

    pub fn on_client_key_exchange(&mut self) -> Result<()> {
        if !matches!(
            self.state,
            ServerState::SentServerHelloDone | ServerState::ReceivedClientCertificate
        ) {
            return Err(Error::UnexpectedMessage("ClientKeyExchange out of order"));
        }
        self.state = ServerState::ReceivedClientKeyExchange;
        Ok(())
    }

    pub fn on_client_certificate(&mut self, chain: CertificateChain) -> Result<()> {
        if self.state != ServerState::SentServerHelloDone {
            return Err(Error::UnexpectedMessage("client Certificate out of order"));
        }
        self.client_cert_chain = chain.certs;
        self.state = ServerState::ReceivedClientCertificate;
        Ok(())
    }

    pub fn on_certificate_verify(&mut self) -> Result<()> {
        if self.state != ServerState::ReceivedClientKeyExchange || self.client_cert_chain.is_empty() {
            return Err(Error::UnexpectedMessage("CertificateVerify out of order"));
        }
        self.state = ServerState::ReceivedCertificateVerify;
        Ok(())
    }

    pub fn finish_key_exchange(&mut self, prf: &dyn Prf, pre_master_secret: &[u8], session_hash: Option<&[u8]>) {
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
    }

    pub fn verify_client_finished(&mut self, prf: &dyn Prf, transcript_hash: &[u8], received_verify_data: &[u8]) -> Result<()> {
        let ms = self
            .master_secret
            .ok_or(Error::InternalError("Finished verified before key schedule ready"))?;
        let expected = key_schedule::verify_data(prf, &ms, FinishedSender::Client, transcript_hash);
        if expected != received_verify_data {
            return Err(Error::BadRecordMac);
        }
        self.state = ServerState::Active;
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
