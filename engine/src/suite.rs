//! Cipher-suite catalogue.
//!
//! A static mapping from the 16-bit suite codepoint to its derived
//! attributes, in the shape of `SupportedCipherSuite` in the rustls
//! lineage (`examples/other_examples/.../tailhook-rustls__src-suites.rs.rs`):
//! each suite is a `&'static` table entry rather than a constructed value,
//! so the catalogue can be iterated and searched without allocation.

use crate::error::{Error, Result};

/// RFC 7507 `TLS_FALLBACK_SCSV`: a fake suite codepoint a client offers
/// (never one it picks, never one a server offers back) purely to let a
/// patched server detect that this is a deliberate downgrade retry rather
/// than the client's actual maximum version.
pub const TLS_FALLBACK_SCSV: u16 = 0x5600;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyExchangeMethod {
    Rsa,
    Dh,
    Dhe,
    Ecdh,
    Ecdhe,
    Psk,
    DhePsk,
    EcdhePsk,
    Cecpq1,
}

impl KeyExchangeMethod {
    pub fn is_ephemeral(&self) -> bool {
        matches!(
            self,
            Self::Dhe | Self::Ecdhe | Self::DhePsk | Self::EcdhePsk | Self::Cecpq1
        )
    }

    pub fn uses_psk(&self) -> bool {
        matches!(self, Self::Psk | Self::DhePsk | Self::EcdhePsk)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthMethod {
    Rsa,
    Ecdsa,
    Dsa,
    Anonymous,
    /// Authentication is implicit in the key-exchange method itself (plain
    /// PSK: knowledge of the PSK *is* the authentication).
    ImplicitByKex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BulkCipher {
    Block { name: &'static str, key_len: usize, block_len: usize },
    AeadGcm { name: &'static str, key_len: usize },
    AeadCcm { name: &'static str, key_len: usize, tag_len: usize },
    AeadOcb { name: &'static str, key_len: usize },
    AeadChaCha20Poly1305,
    Stream { name: &'static str, key_len: usize },
}

impl BulkCipher {
    pub fn key_len(&self) -> usize {
        match self {
            BulkCipher::Block { key_len, .. } => *key_len,
            BulkCipher::AeadGcm { key_len, .. } => *key_len,
            BulkCipher::AeadCcm { key_len, .. } => *key_len,
            BulkCipher::AeadOcb { key_len, .. } => *key_len,
            BulkCipher::AeadChaCha20Poly1305 => 32,
            BulkCipher::Stream { key_len, .. } => *key_len,
        }
    }

    pub fn is_aead(&self) -> bool {
        matches!(
            self,
            BulkCipher::AeadGcm { .. }
                | BulkCipher::AeadCcm { .. }
                | BulkCipher::AeadOcb { .. }
                | BulkCipher::AeadChaCha20Poly1305
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MacAlgorithm {
    HmacSha1 { len: usize },
    HmacSha256 { len: usize },
    HmacSha384 { len: usize },
    None,
}

impl MacAlgorithm {
    pub fn len(&self) -> usize {
        match self {
            MacAlgorithm::HmacSha1 { len } => *len,
            MacAlgorithm::HmacSha256 { len } => *len,
            MacAlgorithm::HmacSha384 { len } => *len,
            MacAlgorithm::None => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrfHash {
    /// TLS 1.0/1.1's MD5/SHA-1 split PRF (Glossary: "PRF").
    Md5Sha1,
    Sha256,
    Sha384,
}

/// A supported named group for (EC)DHE key exchange (RFC 4492/7919).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum NamedGroup {
    Secp256r1 = 23,
    Secp384r1 = 24,
    Secp521r1 = 25,
    X25519 = 29,
    Ffdhe2048 = 256,
    Ffdhe3072 = 257,
}

impl NamedGroup {
    pub fn code(&self) -> u16 {
        *self as u16
    }

    pub fn from_code(code: u16) -> Option<Self> {
        Some(match code {
            23 => Self::Secp256r1,
            24 => Self::Secp384r1,
            25 => Self::Secp521r1,
            29 => Self::X25519,
            256 => Self::Ffdhe2048,
            257 => Self::Ffdhe3072,
            _ => return None,
        })
    }
}

/// A TLS 1.2 `SignatureScheme` (hash, signature) pair, RFC 5246 §7.4.1.4.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SignatureScheme {
    pub hash: u8,
    pub signature: u8,
}

impl SignatureScheme {
    pub const RSA_PKCS1_SHA1: Self = Self { hash: 2, signature: 1 };
    pub const RSA_PKCS1_SHA256: Self = Self { hash: 4, signature: 1 };
    pub const RSA_PKCS1_SHA384: Self = Self { hash: 5, signature: 1 };
    pub const ECDSA_SHA1: Self = Self { hash: 2, signature: 3 };
    pub const ECDSA_SECP256R1_SHA256: Self = Self { hash: 4, signature: 3 };
    pub const ECDSA_SECP384R1_SHA384: Self = Self { hash: 5, signature: 3 };

    pub fn code(&self) -> u16 {
        ((self.hash as u16) << 8) | self.signature as u16
    }

    pub fn from_code(code: u16) -> Self {
        Self {
            hash: (code >> 8) as u8,
            signature: (code & 0xff) as u8,
        }
    }
}

/// A cipher suite's full derived attribute set.
#[derive(Debug, Clone, Copy)]
pub struct CipherSuite {
    pub code: u16,
    pub name: &'static str,
    pub kex: KeyExchangeMethod,
    pub auth: AuthMethod,
    pub bulk: BulkCipher,
    pub mac: MacAlgorithm,
    pub prf: PrfHash,
    pub minimum_version_major: u8,
    pub minimum_version_minor: u8,
}

impl PartialEq for CipherSuite {
    fn eq(&self, other: &Self) -> bool {
        self.code == other.code
    }
}
impl Eq for CipherSuite {}

impl CipherSuite {
    pub fn uses_encrypt_then_mac_eligible(&self) -> bool {
        !self.bulk.is_aead()
    }
}

macro_rules! suite {
    ($code:expr, $name:expr, $kex:expr, $auth:expr, $bulk:expr, $mac:expr, $prf:expr) => {
        CipherSuite {
            code: $code,
            name: $name,
            kex: $kex,
            auth: $auth,
            bulk: $bulk,
            mac: $mac,
            prf: $prf,
            minimum_version_major: 3,
            minimum_version_minor: 1,
        }
    };
}

pub static TLS_RSA_WITH_AES_128_GCM_SHA256: CipherSuite = suite!(
    0x009C,
    "TLS_RSA_WITH_AES_128_GCM_SHA256",
    KeyExchangeMethod::Rsa,
    AuthMethod::Rsa,
    BulkCipher::AeadGcm { name: "AES-128-GCM", key_len: 16 },
    MacAlgorithm::None,
    PrfHash::Sha256
);

pub static TLS_RSA_WITH_AES_128_CBC_SHA: CipherSuite = suite!(
    0x002F,
    "TLS_RSA_WITH_AES_128_CBC_SHA",
    KeyExchangeMethod::Rsa,
    AuthMethod::Rsa,
    BulkCipher::Block { name: "AES-128-CBC", key_len: 16, block_len: 16 },
    MacAlgorithm::HmacSha1 { len: 20 },
    PrfHash::Md5Sha1
);

pub static TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256: CipherSuite = suite!(
    0xC02F,
    "TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256",
    KeyExchangeMethod::Ecdhe,
    AuthMethod::Rsa,
    BulkCipher::AeadGcm { name: "AES-128-GCM", key_len: 16 },
    MacAlgorithm::None,
    PrfHash::Sha256
);

pub static TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384: CipherSuite = suite!(
    0xC02C,
    "TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384",
    KeyExchangeMethod::Ecdhe,
    AuthMethod::Ecdsa,
    BulkCipher::AeadGcm { name: "AES-256-GCM", key_len: 32 },
    MacAlgorithm::None,
    PrfHash::Sha384
);

pub static TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256: CipherSuite = suite!(
    0xCCA8,
    "TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256",
    KeyExchangeMethod::Ecdhe,
    AuthMethod::Rsa,
    BulkCipher::AeadChaCha20Poly1305,
    MacAlgorithm::None,
    PrfHash::Sha256
);

pub static TLS_ECDHE_PSK_WITH_AES_128_CBC_SHA256: CipherSuite = suite!(
    0xC037,
    "TLS_ECDHE_PSK_WITH_AES_128_CBC_SHA256",
    KeyExchangeMethod::EcdhePsk,
    AuthMethod::ImplicitByKex,
    BulkCipher::Block { name: "AES-128-CBC", key_len: 16, block_len: 16 },
    MacAlgorithm::HmacSha256 { len: 32 },
    PrfHash::Sha256
);

/// Every cipher suite the engine knows the attributes of. `Policy` further
/// restricts which of these may actually be negotiated.
pub static ALL_CIPHER_SUITES: &[&CipherSuite] = &[
    &TLS_RSA_WITH_AES_128_GCM_SHA256,
    &TLS_RSA_WITH_AES_128_CBC_SHA,
    &TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
    &TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384,
    &TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256,
    &TLS_ECDHE_PSK_WITH_AES_128_CBC_SHA256,
];

pub fn lookup(code: u16) -> Result<&'static CipherSuite> {
    ALL_CIPHER_SUITES
        .iter()
        .find(|s| s.code == code)
        .copied()
        .ok_or(Error::HandshakeFailure("unknown cipher suite codepoint"))
}

pub fn lookup_by_name(name: &str) -> Option<&'static CipherSuite> {
    ALL_CIPHER_SUITES.iter().find(|s| s.name == name).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalogue_entries_round_trip_by_code() {
        for suite in ALL_CIPHER_SUITES {
            assert_eq!(lookup(suite.code).unwrap().code, suite.code);
        }
    }

    #[test]
    fn unknown_code_fails_handshake() {
        assert!(lookup(0xFFFF).is_err());
    }
}
