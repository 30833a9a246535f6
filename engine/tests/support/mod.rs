//! Deterministic, NOT cryptographically sound collaborator implementations
//! used only to exercise the handshake state machine and record layer
//! end-to-end in integration tests.
//!
//! None of the primitives here provide real confidentiality or
//! authentication — the AEAD is an XOR stream with a digest-derived tag
//! (generalizing the inline `XorAead` helper in
//! `tls_engine::record::cipher`'s own unit tests), the PRF repeats a
//! byte-folded mix of its inputs (the same shape as the `ToyPrf` helper in
//! `tls_engine::handshake::key_schedule`'s tests), and the key-exchange
//! group is a 61-bit finite-field Diffie-Hellman toy, not a named elliptic
//! curve. They exist purely so two `tls_engine` endpoints can complete a
//! full, symmetric handshake against each other without pulling in a real
//! crypto backend.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use tls_engine::callbacks::{CertificateType, CredentialProvider, EndpointCallbacks, KeyType};
use tls_engine::crypto::{AeadSeal, BlockCipherCbc, CryptoProvider, EphemeralSecret, Hash, Hmac, KeyExchange, Prf, RandomSource, RunningHash, Signer, Verifier};
use tls_engine::extensions::Extension;
use tls_engine::suite::{BulkCipher, NamedGroup, PrfHash};
use tls_engine::{Error, Result, Session, Side};
use tls_wire::Alert;

/// A small, fast, non-cryptographic mixing function stretched to
/// `output_len` bytes. Every toy digest/HMAC/tag in this module bottoms
/// out here.
fn toy_digest(data: &[u8], output_len: usize) -> Vec<u8> {
    let mut state: u64 = 0xcbf2_9ce4_8422_2325;
    for &b in data {
        state ^= b as u64;
        state = state.wrapping_mul(0x0000_0100_0000_01b3);
    }
    let mut out = Vec::with_capacity(output_len);
    let mut counter: u64 = 0;
    while out.len() < output_len {
        let mut s = state ^ counter.wrapping_mul(0x9E37_79B9_7F4A_7C15);
        for _ in 0..8 {
            s ^= s << 13;
            s ^= s >> 7;
            s ^= s << 17;
            out.push((s & 0xff) as u8);
            if out.len() == output_len {
                break;
            }
        }
        counter += 1;
    }
    out
}

struct ToyRunningHash {
    output_len: usize,
    buf: Vec<u8>,
}

impl RunningHash for ToyRunningHash {
    fn update(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    fn finish(&self) -> Vec<u8> {
        toy_digest(&self.buf, self.output_len)
    }

    fn try_clone(&self) -> Box<dyn RunningHash> {
        Box::new(ToyRunningHash {
            output_len: self.output_len,
            buf: self.buf.clone(),
        })
    }
}

pub struct ToyHash {
    pub output_len: usize,
}

impl Hash for ToyHash {
    fn output_len(&self) -> usize {
        self.output_len
    }

    fn start(&self) -> Box<dyn RunningHash> {
        Box::new(ToyRunningHash {
            output_len: self.output_len,
            buf: Vec::new(),
        })
    }
}

pub struct ToyHmac {
    pub output_len: usize,
}

impl Hmac for ToyHmac {
    fn mac(&self, key: &[u8], data: &[u8]) -> Vec<u8> {
        let mut input = Vec::with_capacity(key.len() + data.len() + 1);
        input.extend_from_slice(key);
        input.push(0x36);
        input.extend_from_slice(data);
        toy_digest(&input, self.output_len)
    }
}

/// Mirrors `tls_engine::handshake::key_schedule`'s own `ToyPrf` test
/// helper: fold the label into one byte and XOR it, the secret, and the
/// seed across `output_len` bytes.
pub struct ToyPrf;

impl Prf for ToyPrf {
    fn prf(&self, secret: &[u8], label: &str, seed: &[u8], output_len: usize) -> Vec<u8> {
        let label_byte = label.bytes().fold(0u8, |a, b| a ^ b);
        (0..output_len)
            .map(|i| {
                let s = secret.get(i % secret.len().max(1)).copied().unwrap_or(0);
                let sd = seed.get(i % seed.len().max(1)).copied().unwrap_or(0);
                s ^ sd ^ label_byte ^ (i as u8)
            })
            .collect()
    }
}

pub struct ToyAead {
    pub key_len: usize,
    pub nonce_len: usize,
    pub tag_len: usize,
}

impl AeadSeal for ToyAead {
    fn key_len(&self) -> usize {
        self.key_len
    }

    fn nonce_len(&self) -> usize {
        self.nonce_len
    }

    fn tag_len(&self) -> usize {
        self.tag_len
    }

    fn seal(&self, key: &[u8], nonce: &[u8], aad: &[u8], plaintext: &[u8]) -> Vec<u8> {
        let mut out: Vec<u8> = plaintext
            .iter()
            .enumerate()
            .map(|(i, b)| b ^ key[i % key.len()] ^ nonce[i % nonce.len()])
            .collect();
        let mut tag_input = Vec::with_capacity(key.len() + nonce.len() + aad.len() + out.len());
        tag_input.extend_from_slice(key);
        tag_input.extend_from_slice(nonce);
        tag_input.extend_from_slice(aad);
        tag_input.extend_from_slice(&out);
        out.extend_from_slice(&toy_digest(&tag_input, self.tag_len));
        out
    }

    fn open(&self, key: &[u8], nonce: &[u8], aad: &[u8], ciphertext: &[u8]) -> Option<Vec<u8>> {
        if ciphertext.len() < self.tag_len {
            return None;
        }
        let (body, tag) = ciphertext.split_at(ciphertext.len() - self.tag_len);
        let mut tag_input = Vec::with_capacity(key.len() + nonce.len() + aad.len() + body.len());
        tag_input.extend_from_slice(key);
        tag_input.extend_from_slice(nonce);
        tag_input.extend_from_slice(aad);
        tag_input.extend_from_slice(body);
        if toy_digest(&tag_input, self.tag_len) != tag {
            return None;
        }
        Some(
            body.iter()
                .enumerate()
                .map(|(i, b)| b ^ key[i % key.len()] ^ nonce[i % nonce.len()])
                .collect(),
        )
    }
}

/// A toy "block cipher" in CBC mode: each block is XORed with the
/// previous ciphertext block and a key-derived pad, à la a one-time-pad
/// stream rather than a real substitution-permutation network. Still a
/// proper CBC chain (invertible only in order, tamper-evident block by
/// block), which is all the record layer's CBC path needs exercised.
pub struct ToyBlockCipherCbc {
    pub block_len: usize,
    pub key_len: usize,
}

impl ToyBlockCipherCbc {
    fn keystream_block(&self, key: &[u8], prev: &[u8]) -> Vec<u8> {
        (0..self.block_len)
            .map(|i| key[i % key.len()] ^ prev[i % prev.len().max(1)])
            .collect()
    }
}

impl BlockCipherCbc for ToyBlockCipherCbc {
    fn block_len(&self) -> usize {
        self.block_len
    }

    fn key_len(&self) -> usize {
        self.key_len
    }

    fn encrypt(&self, key: &[u8], iv: &[u8], plaintext: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(plaintext.len());
        let mut prev = iv.to_vec();
        for chunk in plaintext.chunks(self.block_len) {
            let ks = self.keystream_block(key, &prev);
            let block: Vec<u8> = chunk.iter().zip(ks.iter()).map(|(p, k)| p ^ k).collect();
            out.extend_from_slice(&block);
            prev = block;
        }
        out
    }

    fn decrypt(&self, key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(ciphertext.len());
        let mut prev = iv.to_vec();
        for chunk in ciphertext.chunks(self.block_len) {
            let ks = self.keystream_block(key, &prev);
            let block: Vec<u8> = chunk.iter().zip(ks.iter()).map(|(c, k)| c ^ k).collect();
            out.extend_from_slice(&block);
            prev = chunk.to_vec();
        }
        out
    }
}

/// 61-bit finite-field Diffie-Hellman (Mersenne prime `2^61 - 1`, a toy
/// group nowhere near any real named group's security level) standing in
/// for every `NamedGroup` the catalogue lists.
const TOY_DH_PRIME: u64 = 2_305_843_009_213_693_951;
const TOY_DH_GENERATOR: u64 = 7;

fn toy_modpow(base: u64, mut exp: u64, modulus: u64) -> u64 {
    let m = modulus as u128;
    let mut result: u128 = 1;
    let mut b: u128 = (base % modulus) as u128;
    while exp > 0 {
        if exp & 1 == 1 {
            result = (result * b) % m;
        }
        b = (b * b) % m;
        exp >>= 1;
    }
    result as u64
}

pub struct ToyKeyExchange;

impl KeyExchange for ToyKeyExchange {
    fn generate(&self, rng: &dyn RandomSource) -> (Box<dyn EphemeralSecret>, Vec<u8>) {
        let mut buf = [0u8; 8];
        rng.fill(&mut buf);
        let secret = u64::from_be_bytes(buf) % (TOY_DH_PRIME - 1) + 1;
        let public = toy_modpow(TOY_DH_GENERATOR, secret, TOY_DH_PRIME);
        (Box::new(ToyEphemeralSecret { secret }), public.to_be_bytes().to_vec())
    }
}

pub struct ToyEphemeralSecret {
    secret: u64,
}

impl EphemeralSecret for ToyEphemeralSecret {
    fn agree(self: Box<Self>, peer_public: &[u8]) -> Result<Vec<u8>> {
        if peer_public.len() != 8 {
            return Err(Error::IllegalParameter("toy DH public share must be 8 bytes"));
        }
        let mut buf = [0u8; 8];
        buf.copy_from_slice(peer_public);
        let peer = u64::from_be_bytes(buf);
        let shared = toy_modpow(peer, self.secret, TOY_DH_PRIME);
        Ok(shared.to_be_bytes().to_vec())
    }
}

/// Both sides of a signature are keyed by the same opaque token (in this
/// harness, a certificate's raw bytes double as its own "key id" and
/// "public key" — there is no real PKI underneath).
pub struct ToySigner {
    pub key: Vec<u8>,
}

impl Signer for ToySigner {
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        let mut input = Vec::with_capacity(self.key.len() + message.len());
        input.extend_from_slice(&self.key);
        input.extend_from_slice(message);
        Ok(toy_digest(&input, 32))
    }
}

pub struct ToyVerifier {
    pub key: Vec<u8>,
}

impl Verifier for ToyVerifier {
    fn verify(&self, message: &[u8], signature: &[u8]) -> Result<()> {
        let mut input = Vec::with_capacity(self.key.len() + message.len());
        input.extend_from_slice(&self.key);
        input.extend_from_slice(message);
        if toy_digest(&input, 32) == signature {
            Ok(())
        } else {
            Err(Error::BadCertificate("toy signature did not verify".to_string()))
        }
    }
}

/// A seeded xorshift64 PRNG — deterministic across a test run so failures
/// reproduce, not a source of real entropy.
pub struct ToyRandomSource {
    state: AtomicU64,
}

impl ToyRandomSource {
    pub fn new(seed: u64) -> Self {
        ToyRandomSource {
            state: AtomicU64::new(seed | 1),
        }
    }
}

impl RandomSource for ToyRandomSource {
    fn fill(&self, out: &mut [u8]) {
        for chunk in out.chunks_mut(8) {
            let mut s = self.state.load(Ordering::Relaxed);
            s ^= s << 13;
            s ^= s >> 7;
            s ^= s << 17;
            self.state.store(s, Ordering::Relaxed);
            let bytes = s.to_be_bytes();
            for (o, b) in chunk.iter_mut().zip(bytes.iter()) {
                *o = *b;
            }
        }
    }
}

fn prf_output_len(prf: PrfHash) -> usize {
    match prf {
        PrfHash::Md5Sha1 => 36,
        PrfHash::Sha256 => 32,
        PrfHash::Sha384 => 48,
    }
}

pub struct ToyCryptoProvider {
    rng: ToyRandomSource,
}

impl ToyCryptoProvider {
    pub fn new(seed: u64) -> Self {
        ToyCryptoProvider {
            rng: ToyRandomSource::new(seed),
        }
    }
}

impl CryptoProvider for ToyCryptoProvider {
    fn random_source(&self) -> &dyn RandomSource {
        &self.rng
    }

    fn hash(&self, prf: PrfHash) -> Box<dyn Hash> {
        Box::new(ToyHash { output_len: prf_output_len(prf) })
    }

    fn hmac(&self, prf: PrfHash) -> Box<dyn Hmac> {
        Box::new(ToyHmac { output_len: prf_output_len(prf) })
    }

    fn prf(&self, _prf: PrfHash) -> Box<dyn Prf> {
        Box::new(ToyPrf)
    }

    fn aead(&self, bulk: &BulkCipher) -> Box<dyn AeadSeal> {
        let (key_len, nonce_len, tag_len) = match bulk {
            BulkCipher::AeadGcm { key_len, .. } => (*key_len, 12, 16),
            BulkCipher::AeadCcm { key_len, tag_len, .. } => (*key_len, 12, *tag_len),
            BulkCipher::AeadOcb { key_len, .. } => (*key_len, 12, 16),
            BulkCipher::AeadChaCha20Poly1305 => (32, 12, 16),
            _ => panic!("toy crypto provider asked for an AEAD over a non-AEAD bulk cipher"),
        };
        Box::new(ToyAead { key_len, nonce_len, tag_len })
    }

    fn block_cipher_cbc(&self, bulk: &BulkCipher) -> Box<dyn BlockCipherCbc> {
        match bulk {
            BulkCipher::Block { key_len, block_len, .. } => Box::new(ToyBlockCipherCbc {
                block_len: *block_len,
                key_len: *key_len,
            }),
            _ => panic!("toy crypto provider asked for CBC over a non-block bulk cipher"),
        }
    }

    fn key_exchange(&self, _group: NamedGroup) -> Box<dyn KeyExchange> {
        Box::new(ToyKeyExchange)
    }

    fn rsa_encrypt_pms(&self, server_public_key: &[u8], pre_master_secret: &[u8]) -> Result<Vec<u8>> {
        let key = if server_public_key.is_empty() { &[0u8][..] } else { server_public_key };
        Ok(pre_master_secret.iter().enumerate().map(|(i, b)| b ^ key[i % key.len()]).collect())
    }

    fn rsa_decrypt_pms(&self, private_key: &[u8], encrypted: &[u8]) -> Result<Vec<u8>> {
        let key = if private_key.is_empty() { &[0u8][..] } else { private_key };
        Ok(encrypted.iter().enumerate().map(|(i, b)| b ^ key[i % key.len()]).collect())
    }
}

/// The one identity an endpoint can present: a cert chain whose sole
/// "certificate" doubles as the opaque key id/public key/private key
/// token the toy signer, verifier, and RSA PMS operations all key off of.
pub struct ToyCredentials {
    pub cert_chain: Vec<Vec<u8>>,
    pub key_type: KeyType,
}

impl ToyCredentials {
    pub fn new(identity: &[u8], key_type: KeyType) -> Self {
        ToyCredentials {
            cert_chain: vec![identity.to_vec()],
            key_type,
        }
    }

    pub fn none() -> Self {
        ToyCredentials {
            cert_chain: Vec::new(),
            key_type: KeyType::Rsa,
        }
    }
}

impl CredentialProvider for ToyCredentials {
    fn trusted_certificate_authorities(&self, _cert_type: CertificateType, _context: &str) -> Vec<Vec<u8>> {
        Vec::new()
    }

    fn find_cert_chain(
        &self,
        accepted_key_types: &[KeyType],
        _acceptable_cas: &[Vec<u8>],
        _cert_type: CertificateType,
        _context: &str,
    ) -> Option<Vec<Vec<u8>>> {
        if self.cert_chain.is_empty() || !accepted_key_types.contains(&self.key_type) {
            return None;
        }
        Some(self.cert_chain.clone())
    }

    fn private_key_for(&self, cert: &[u8], _cert_type: CertificateType, _context: &str) -> Option<Vec<u8>> {
        if self.cert_chain.first().map(Vec::as_slice) == Some(cert) {
            Some(cert.to_vec())
        } else {
            None
        }
    }

    fn psk(&self, _context: &str, _identity: &[u8]) -> Option<Vec<u8>> {
        None
    }
}

/// Shared, interior-mutable record of everything a [`ToyCallbacks`] saw,
/// so test code can inspect it even while the endpoint under test holds
/// the callbacks object borrowed for its entire lifetime.
#[derive(Default)]
pub struct ToyState {
    pub outbox: Vec<Vec<u8>>,
    pub received: Vec<Vec<u8>>,
    pub alerts: Vec<Alert>,
    pub established: Option<Session>,
    /// Type codes of every extension list handed to `examine_extensions`,
    /// tagged with whose hello it came from.
    pub examined_extensions: Vec<(Side, Vec<u16>)>,
}

pub struct ToyCallbacks {
    pub state: Rc<RefCell<ToyState>>,
    rng: ToyRandomSource,
    pub alpn_preference: Option<Vec<u8>>,
    /// When `true`, `server_choose_app_protocol` returns `alpn_preference`
    /// verbatim even if it isn't a member of the client's offer — used to
    /// exercise the engine's own `no_application_protocol` rejection of a
    /// misbehaving callback.
    pub ignore_alpn_offer: bool,
    /// If set, pushed into the outbound extension list on `modify_extensions`
    /// — lets a test exercise the "replace, not duplicate" merge as well as
    /// plain unknown-extension injection.
    pub inject_extension: Option<Extension>,
    /// When `true`, `session_established` vetoes caching (still records the
    /// session into `ToyState::established` so a test can tell the callback
    /// fired at all).
    pub veto_session: bool,
    /// Session-ticket decryption key, mirroring a `SessionManager`'s
    /// `session_ticket_key()`. `None` leaves `tls_decrypt_session_ticket`
    /// at its trait default (always miss), matching an embedder that
    /// hasn't wired ticket support up at all.
    pub ticket_key: Option<Vec<u8>>,
}

impl ToyCallbacks {
    pub fn new(seed: u64) -> (Self, Rc<RefCell<ToyState>>) {
        let state = Rc::new(RefCell::new(ToyState::default()));
        (
            ToyCallbacks {
                state: state.clone(),
                rng: ToyRandomSource::new(seed),
                alpn_preference: None,
                ignore_alpn_offer: false,
                inject_extension: None,
                veto_session: false,
                ticket_key: None,
            },
            state,
        )
    }
}

impl EndpointCallbacks for ToyCallbacks {
    fn emit_data(&mut self, data: &[u8]) {
        self.state.borrow_mut().outbox.push(data.to_vec());
    }

    fn record_received(&mut self, _seq: u64, data: &[u8]) {
        self.state.borrow_mut().received.push(data.to_vec());
    }

    fn alert(&mut self, alert: Alert) {
        self.state.borrow_mut().alerts.push(alert);
    }

    fn session_established(&mut self, session: &Session) -> bool {
        self.state.borrow_mut().established = Some(session.clone());
        !self.veto_session
    }

    fn verify_cert_chain(&mut self, _chain: &[Vec<u8>], _ocsp_responses: &[Vec<u8>], _hostname: Option<&str>) -> Result<()> {
        Ok(())
    }

    fn server_choose_app_protocol(&mut self, offered: &[Vec<u8>]) -> Option<Vec<u8>> {
        if self.ignore_alpn_offer {
            return self.alpn_preference.clone();
        }
        self.alpn_preference
            .clone()
            .filter(|p| offered.contains(p))
            .or_else(|| offered.first().cloned())
    }

    fn modify_extensions(&mut self, extensions: &mut Vec<Extension>, _side: Side) {
        if let Some(ext) = self.inject_extension.clone() {
            extensions.push(ext);
        }
    }

    fn examine_extensions(&mut self, extensions: &[Extension], side: Side) {
        self.state
            .borrow_mut()
            .examined_extensions
            .push((side, extensions.iter().map(Extension::type_code).collect()));
    }

    fn tls_sign_message(&mut self, key_id: &[u8]) -> Result<Box<dyn Signer>> {
        Ok(Box::new(ToySigner { key: key_id.to_vec() }))
    }

    fn tls_verify_message(&mut self, public_key: &[u8]) -> Result<Box<dyn Verifier>> {
        Ok(Box::new(ToyVerifier { key: public_key.to_vec() }))
    }

    fn tls_ephemeral_key_agreement(&mut self, _group: NamedGroup) -> Result<(Box<dyn EphemeralSecret>, Vec<u8>)> {
        Ok(ToyKeyExchange.generate(&self.rng))
    }

    fn tls_decrypt_session_ticket(&mut self, ticket: &[u8]) -> Option<Session> {
        let key = self.ticket_key.as_ref()?;
        let hmac = ToyHmac {
            output_len: prf_output_len(PrfHash::Sha256),
        };
        tls_engine::session::open_ticket(&hmac, key, ticket)
    }
}

/// Drain whatever either side has queued via `emit_data` into the other
/// side's `received_data`, repeating until neither side has anything left
/// to deliver. Stands in for the socket an embedder would otherwise own.
pub fn pump(
    client: &mut tls_engine::Client<'_>,
    client_state: &Rc<RefCell<ToyState>>,
    server: &mut tls_engine::Server<'_>,
    server_state: &Rc<RefCell<ToyState>>,
) -> Result<()> {
    loop {
        let client_out: Vec<Vec<u8>> = std::mem::take(&mut client_state.borrow_mut().outbox);
        let server_out: Vec<Vec<u8>> = std::mem::take(&mut server_state.borrow_mut().outbox);
        if client_out.is_empty() && server_out.is_empty() {
            return Ok(());
        }
        for msg in client_out {
            server.received_data(&msg)?;
        }
        for msg in server_out {
            client.received_data(&msg)?;
        }
    }
}

/// Like [`pump`], but feeds every emitted chunk to the peer one byte at a
/// time, the way a TCP stream can hand a reader arbitrarily small slices
/// regardless of how the writer grouped its `write()` calls. Exercises the
/// `recv_buffer` partial-record reassembly in `Client`/`Server::received_data`
/// instead of the whole-message delivery `pump` gives every other test.
pub fn pump_byte_at_a_time(
    client: &mut tls_engine::Client<'_>,
    client_state: &Rc<RefCell<ToyState>>,
    server: &mut tls_engine::Server<'_>,
    server_state: &Rc<RefCell<ToyState>>,
) -> Result<()> {
    loop {
        let client_out: Vec<Vec<u8>> = std::mem::take(&mut client_state.borrow_mut().outbox);
        let server_out: Vec<Vec<u8>> = std::mem::take(&mut server_state.borrow_mut().outbox);
        if client_out.is_empty() && server_out.is_empty() {
            return Ok(());
        }
        for msg in client_out {
            for byte in msg {
                server.received_data(&[byte])?;
            }
        }
        for msg in server_out {
            for byte in msg {
                client.received_data(&[byte])?;
            }
        }
    }
}
