//! Master-secret derivation, key-block expansion, and `Finished` computation.
//!
//! TLS 1.0–1.2 derive every per-connection secret from one 48-byte master
//! secret via the same construction: `PRF(secret, label, seed)` stretched to
//! however many bytes are needed. This module is the one place that
//! construction is expressed; callers never call [`crate::crypto::Prf`]
//! directly.

use crate::crypto::Prf;

pub const MASTER_SECRET_LEN: usize = 48;
pub const VERIFY_DATA_LEN: usize = 12;

/// RFC 5246 §8.1, as amended by RFC 7627 when `extended_master_secret` was
/// negotiated: this engine always prefers the extended form so the refined
/// master secret binds the full handshake transcript.
pub fn master_secret(
    prf: &dyn Prf,
    pre_master_secret: &[u8],
    client_random: &[u8; 32],
    server_random: &[u8; 32],
    session_hash: Option<&[u8]>,
) -> [u8; MASTER_SECRET_LEN] {
    let raw = if let Some(session_hash) = session_hash {
        prf.prf(
            pre_master_secret,
            "extended master secret",
            session_hash,
            MASTER_SECRET_LEN,
        )
    } else {
        let mut seed = Vec::with_capacity(64);
        seed.extend_from_slice(client_random);
        seed.extend_from_slice(server_random);
        prf.prf(pre_master_secret, "master secret", &seed, MASTER_SECRET_LEN)
    };
    let mut out = [0u8; MASTER_SECRET_LEN];
    out.copy_from_slice(&raw);
    out
}

/// The lengths of the six key-block components, derived from the bulk
/// cipher and MAC the negotiated suite selected.
#[derive(Debug, Clone, Copy)]
pub struct KeyBlockLayout {
    pub mac_key_len: usize,
    pub enc_key_len: usize,
    /// Explicit CBC: 0 (IV is carried in the record). Implicit AEAD nonce
    /// salt: the AEAD's fixed IV length.
    pub fixed_iv_len: usize,
}

impl KeyBlockLayout {
    pub fn total_len(&self) -> usize {
        2 * (self.mac_key_len + self.enc_key_len + self.fixed_iv_len)
    }
}

pub struct KeyBlock {
    pub client_write_mac_key: Vec<u8>,
    pub server_write_mac_key: Vec<u8>,
    pub client_write_key: Vec<u8>,
    pub server_write_key: Vec<u8>,
    pub client_write_iv: Vec<u8>,
    pub server_write_iv: Vec<u8>,
}

/// RFC 5246 §6.3: `key_block = PRF(master_secret, "key expansion",
/// server_random || client_random)`, split client-mac, server-mac,
/// client-key, server-key, client-iv, server-iv in that fixed order.
pub fn expand_key_block(
    prf: &dyn Prf,
    master_secret: &[u8; MASTER_SECRET_LEN],
    client_random: &[u8; 32],
    server_random: &[u8; 32],
    layout: &KeyBlockLayout,
) -> KeyBlock {
    let mut seed = Vec::with_capacity(64);
    seed.extend_from_slice(server_random);
    seed.extend_from_slice(client_random);
    let block = prf.prf(master_secret, "key expansion", &seed, layout.total_len());

    let mut pos = 0;
    let mut take = |n: usize| {
        let out = block[pos..pos + n].to_vec();
        pos += n;
        out
    };
    KeyBlock {
        client_write_mac_key: take(layout.mac_key_len),
        server_write_mac_key: take(layout.mac_key_len),
        client_write_key: take(layout.enc_key_len),
        server_write_key: take(layout.enc_key_len),
        client_write_iv: take(layout.fixed_iv_len),
        server_write_iv: take(layout.fixed_iv_len),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishedSender {
    Client,
    Server,
}

impl FinishedSender {
    fn label(&self) -> &'static str {
        match self {
            FinishedSender::Client => "client finished",
            FinishedSender::Server => "server finished",
        }
    }
}

/// RFC 5246 §7.4.9: `verify_data = PRF(master_secret, label,
/// Hash(handshake_messages))[0..12]`.
pub fn verify_data(
    prf: &dyn Prf,
    master_secret: &[u8; MASTER_SECRET_LEN],
    sender: FinishedSender,
    transcript_hash: &[u8],
) -> Vec<u8> {
    prf.prf(master_secret, sender.label(), transcript_hash, VERIFY_DATA_LEN)
}

/// RFC 5705 keying material export, offered to embedders via the endpoint
/// façade's `key_material_export`.
pub fn export_keying_material(
    prf: &dyn Prf,
    master_secret: &[u8; MASTER_SECRET_LEN],
    label: &str,
    client_random: &[u8; 32],
    server_random: &[u8; 32],
    context: Option<&[u8]>,
    output_len: usize,
) -> Vec<u8> {
    let mut seed = Vec::with_capacity(64 + context.map_or(0, |c| c.len()));
    seed.extend_from_slice(client_random);
    seed.extend_from_slice(server_random);
    if let Some(context) = context {
        seed.extend_from_slice(context);
    }
    prf.prf(master_secret, label, &seed, output_len)
}
