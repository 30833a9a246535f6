//! Handshake message bodies.
//!
//! Each message type encodes/decodes only its own body — the four-byte
//! `(HandshakeType, u24 length)` header that wraps every TLS handshake
//! message (and the additional DTLS `message_seq`/fragment fields) is the
//! record layer's concern (`crate::record`), not this module's, so a body
//! can be reused unchanged by both transports.

use crate::crypto::RandomSource;
use crate::error::{Error, Result};
use crate::extensions::{self, Extension};
use crate::suite::{CipherSuite, SignatureScheme};
use crate::version::ProtocolVersion;
use tls_wire::{Reader, Writer};

pub const RANDOM_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HandshakeType {
    HelloRequest = 0,
    ClientHello = 1,
    ServerHello = 2,
    HelloVerifyRequest = 3,
    NewSessionTicket = 4,
    CertificateStatus = 22,
    Certificate = 11,
    ServerKeyExchange = 12,
    CertificateRequest = 13,
    ServerHelloDone = 14,
    CertificateVerify = 15,
    ClientKeyExchange = 16,
    Finished = 20,
}

impl HandshakeType {
    pub fn from_u8(v: u8) -> Result<Self> {
        Ok(match v {
            0 => Self::HelloRequest,
            1 => Self::ClientHello,
            2 => Self::ServerHello,
            3 => Self::HelloVerifyRequest,
            4 => Self::NewSessionTicket,
            22 => Self::CertificateStatus,
            11 => Self::Certificate,
            12 => Self::ServerKeyExchange,
            13 => Self::CertificateRequest,
            14 => Self::ServerHelloDone,
            15 => Self::CertificateVerify,
            16 => Self::ClientKeyExchange,
            20 => Self::Finished,
            _ => return Err(Error::UnexpectedMessage("unknown handshake type")),
        })
    }
}

/// `gmt_unix_time || random_bytes[28]`, RFC 5246 §7.4.1.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Random(pub [u8; RANDOM_LEN]);

impl Random {
    pub fn generate(rng: &dyn RandomSource) -> Self {
        let mut bytes = [0u8; RANDOM_LEN];
        rng.fill(&mut bytes);
        Random(bytes)
    }

    pub fn write(&self, w: &mut Writer) {
        w.put_bytes(&self.0);
    }

    pub fn read(r: &mut Reader<'_>) -> Result<Self> {
        let mut out = [0u8; RANDOM_LEN];
        out.copy_from_slice(r.take(RANDOM_LEN)?);
        Ok(Random(out))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientHello {
    pub client_version: ProtocolVersion,
    pub random: Random,
    pub session_id: Vec<u8>,
    /// DTLS only; empty for a fresh flight or a TLS handshake.
    pub cookie: Vec<u8>,
    pub cipher_suites: Vec<u16>,
    pub compression_methods: Vec<u8>,
    pub extensions: Vec<Extension>,
}

impl ClientHello {
    pub fn write(&self, w: &mut Writer, datagram: bool) {
        self.client_version.write(w);
        self.random.write(w);
        {
            let mut g = w.start_u8_length_prefixed();
            g.put_bytes(&self.session_id);
        }
        if datagram {
            let mut g = w.start_u8_length_prefixed();
            g.put_bytes(&self.cookie);
        }
        {
            let mut g = w.start_u16_length_prefixed();
            for cs in &self.cipher_suites {
                g.put_u16(*cs);
            }
        }
        {
            let mut g = w.start_u8_length_prefixed();
            g.put_bytes(&self.compression_methods);
        }
        extensions::write_list(w, &self.extensions);
    }

    pub fn read(r: &mut Reader<'_>, datagram: bool) -> Result<Self> {
        let client_version = ProtocolVersion::read(r)?;
        let random = Random::read(r)?;
        let session_id = r.read_vec_u8(0, 32)?.to_vec();
        let cookie = if datagram {
            r.read_vec_u8(0, 255)?.to_vec()
        } else {
            Vec::new()
        };
        let cipher_suites = {
            let raw = r.read_vec_of(2, 2)?;
            let mut rr = Reader::new(raw);
            let mut out = Vec::with_capacity(raw.len() / 2);
            while !rr.is_empty() {
                out.push(rr.read_u16()?);
            }
            out
        };
        let compression_methods = r.read_vec_u8(1, 255)?.to_vec();
        let extensions = extensions::read_list(r)?;
        Ok(ClientHello {
            client_version,
            random,
            session_id,
            cookie,
            cipher_suites,
            compression_methods,
            extensions,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerHello {
    pub server_version: ProtocolVersion,
    pub random: Random,
    pub session_id: Vec<u8>,
    pub cipher_suite: u16,
    pub compression_method: u8,
    pub extensions: Vec<Extension>,
}

impl ServerHello {
    pub fn write(&self, w: &mut Writer) {
        self.server_version.write(w);
        self.random.write(w);
        {
            let mut g = w.start_u8_length_prefixed();
            g.put_bytes(&self.session_id);
        }
        w.put_u16(self.cipher_suite);
        w.put_u8(self.compression_method);
        extensions::write_list(w, &self.extensions);
    }

    pub fn read(r: &mut Reader<'_>) -> Result<Self> {
        Ok(ServerHello {
            server_version: ProtocolVersion::read(r)?,
            random: Random::read(r)?,
            session_id: r.read_vec_u8(0, 32)?.to_vec(),
            cipher_suite: r.read_u16()?,
            compression_method: r.read_u8()?,
            extensions: extensions::read_list(r)?,
        })
    }
}

/// DTLS only (RFC 6347 §4.2.1): server demands proof of source-address
/// ownership before committing any state for this ClientHello.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelloVerifyRequest {
    pub server_version: ProtocolVersion,
    pub cookie: Vec<u8>,
}

impl HelloVerifyRequest {
    pub fn write(&self, w: &mut Writer) {
        self.server_version.write(w);
        let mut g = w.start_u8_length_prefixed();
        g.put_bytes(&self.cookie);
    }

    pub fn read(r: &mut Reader<'_>) -> Result<Self> {
        Ok(HelloVerifyRequest {
            server_version: ProtocolVersion::read(r)?,
            cookie: r.read_vec_u8(0, 255)?.to_vec(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CertificateChain {
    /// DER-encoded certificates, leaf first.
    pub certs: Vec<Vec<u8>>,
}

impl CertificateChain {
    pub fn write(&self, w: &mut Writer) {
        let mut list = w.start_u24_length_prefixed();
        for cert in &self.certs {
            let mut g = list.start_u24_length_prefixed();
            g.put_bytes(cert);
        }
    }

    pub fn read(r: &mut Reader<'_>) -> Result<Self> {
        let raw = r.read_vec_u24(0, (1 << 24) - 1)?;
        let mut list = Reader::new(raw);
        let mut certs = Vec::new();
        while !list.is_empty() {
            certs.push(list.read_vec_u24(0, (1 << 24) - 1)?.to_vec());
        }
        Ok(CertificateChain { certs })
    }
}

/// OCSP stapling response body (RFC 6066 §8), sent as its own handshake
/// message immediately after `Certificate` when `status_request` was
/// negotiated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateStatus {
    pub ocsp_response: Vec<u8>,
}

impl CertificateStatus {
    pub fn write(&self, w: &mut Writer) {
        w.put_u8(1); // status_type: ocsp
        let mut g = w.start_u24_length_prefixed();
        g.put_bytes(&self.ocsp_response);
    }

    pub fn read(r: &mut Reader<'_>) -> Result<Self> {
        let status_type = r.read_u8()?;
        if status_type != 1 {
            return Err(Error::IllegalParameter("unsupported certificate status type"));
        }
        Ok(CertificateStatus {
            ocsp_response: r.read_vec_u24(0, (1 << 24) - 1)?.to_vec(),
        })
    }
}

/// `ServerKeyExchange` for an (EC)DHE suite. The
/// signature covers `client_random || server_random || params`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerKeyExchangeEcdhe {
    pub named_group: u16,
    pub public_key: Vec<u8>,
    pub signature_scheme: SignatureScheme,
    pub signature: Vec<u8>,
}

impl ServerKeyExchangeEcdhe {
    pub fn write(&self, w: &mut Writer) {
        w.put_u8(3); // curve_type: named_curve
        w.put_u16(self.named_group);
        {
            let mut g = w.start_u8_length_prefixed();
            g.put_bytes(&self.public_key);
        }
        w.put_u16(self.signature_scheme.code());
        {
            let mut g = w.start_u16_length_prefixed();
            g.put_bytes(&self.signature);
        }
    }

    pub fn read(r: &mut Reader<'_>) -> Result<Self> {
        let curve_type = r.read_u8()?;
        if curve_type != 3 {
            return Err(Error::IllegalParameter("only named_curve ECParameters supported"));
        }
        let named_group = r.read_u16()?;
        let public_key = r.read_vec_u8(1, 255)?.to_vec();
        let signature_scheme = SignatureScheme::from_code(r.read_u16()?);
        let signature = r.read_vec_u16(0, (1 << 16) - 1)?.to_vec();
        Ok(ServerKeyExchangeEcdhe {
            named_group,
            public_key,
            signature_scheme,
            signature,
        })
    }
}

/// `ClientKeyExchange` body shapes, keyed by the negotiated key-exchange
/// method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientKeyExchange {
    /// RSA: the PKCS#1 v1.5-encrypted `PreMasterSecret`.
    EncryptedPreMasterSecret(Vec<u8>),
    /// (EC)DHE: the client's ephemeral public share.
    ClientDiffieHellmanPublic(Vec<u8>),
    /// PSK-only key exchange: the client's identity hint.
    PskIdentity(Vec<u8>),
}

impl ClientKeyExchange {
    pub fn write(&self, w: &mut Writer) {
        match self {
            ClientKeyExchange::EncryptedPreMasterSecret(bytes)
            | ClientKeyExchange::ClientDiffieHellmanPublic(bytes)
            | ClientKeyExchange::PskIdentity(bytes) => {
                let mut g = w.start_u16_length_prefixed();
                g.put_bytes(bytes);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateRequest {
    pub certificate_types: Vec<u8>,
    pub signature_schemes: Vec<SignatureScheme>,
    /// DER-encoded `DistinguishedName`s of acceptable CAs; empty means any.
    pub certificate_authorities: Vec<Vec<u8>>,
}

impl CertificateRequest {
    pub fn write(&self, w: &mut Writer) {
        {
            let mut g = w.start_u8_length_prefixed();
            g.put_bytes(&self.certificate_types);
        }
        {
            let mut g = w.start_u16_length_prefixed();
            for s in &self.signature_schemes {
                g.put_u16(s.code());
            }
        }
        {
            let mut list = w.start_u16_length_prefixed();
            for ca in &self.certificate_authorities {
                let mut g = list.start_u16_length_prefixed();
                g.put_bytes(ca);
            }
        }
    }

    pub fn read(r: &mut Reader<'_>) -> Result<Self> {
        let certificate_types = r.read_vec_u8(0, 255)?.to_vec();
        let signature_schemes = {
            let raw = r.read_vec_of(2, 2)?;
            let mut rr = Reader::new(raw);
            let mut out = Vec::with_capacity(raw.len() / 2);
            while !rr.is_empty() {
                out.push(SignatureScheme::from_code(rr.read_u16()?));
            }
            out
        };
        let ca_len = r.read_u16()? as usize;
        let mut list = r.sub(ca_len)?;
        let mut certificate_authorities = Vec::new();
        while !list.is_empty() {
            certificate_authorities.push(list.read_vec_u16(0, (1 << 16) - 1)?.to_vec());
        }
        Ok(CertificateRequest {
            certificate_types,
            signature_schemes,
            certificate_authorities,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateVerify {
    pub signature_scheme: SignatureScheme,
    pub signature: Vec<u8>,
}

impl CertificateVerify {
    pub fn write(&self, w: &mut Writer) {
        w.put_u16(self.signature_scheme.code());
        let mut g = w.start_u16_length_prefixed();
        g.put_bytes(&self.signature);
    }

    pub fn read(r: &mut Reader<'_>) -> Result<Self> {
        Ok(CertificateVerify {
            signature_scheme: SignatureScheme::from_code(r.read_u16()?),
            signature: r.read_vec_u16(0, (1 << 16) - 1)?.to_vec(),
        })
    }
}

/// Fixed-length `verify_data` (RFC 5246 §7.4.9: 12 bytes for the PRFs this
/// engine supports).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finished {
    pub verify_data: Vec<u8>,
}

impl Finished {
    pub fn write(&self, w: &mut Writer) {
        w.put_bytes(&self.verify_data);
    }

    pub fn read(r: &mut Reader<'_>, len: usize) -> Result<Self> {
        Ok(Finished {
            verify_data: r.take(len)?.to_vec(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSessionTicket {
    pub lifetime_hint: u32,
    pub ticket: Vec<u8>,
}

impl NewSessionTicket {
    pub fn write(&self, w: &mut Writer) {
        w.put_u32(self.lifetime_hint);
        let mut g = w.start_u16_length_prefixed();
        g.put_bytes(&self.ticket);
    }

    pub fn read(r: &mut Reader<'_>) -> Result<Self> {
        Ok(NewSessionTicket {
            lifetime_hint: r.read_u32()?,
            ticket: r.read_vec_u16(0, (1 << 16) - 1)?.to_vec(),
        })
    }
}

pub fn pick_mutual_suite(
    offered: &[u16],
    acceptable: &[&'static CipherSuite],
) -> Option<&'static CipherSuite> {
    acceptable.iter().find(|s| offered.contains(&s.code)).copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extensions::Extension;

    #[test]
    fn client_hello_round_trips_without_cookie() {
        let ch = ClientHello {
            client_version: ProtocolVersion::TLS1_2,
            random: Random([7u8; RANDOM_LEN]),
            session_id: vec![1, 2, 3],
            cookie: Vec::new(),
            cipher_suites: vec![0x009C, 0xC02F],
            compression_methods: vec![0],
            extensions: vec![Extension::ExtendedMasterSecret],
        };
        let mut w = Writer::new();
        ch.write(&mut w, false);
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes);
        assert_eq!(ClientHello::read(&mut r, false).unwrap(), ch);
    }

    #[test]
    fn client_hello_round_trips_with_dtls_cookie() {
        let ch = ClientHello {
            client_version: ProtocolVersion::DTLS1_2,
            random: Random([9u8; RANDOM_LEN]),
            session_id: Vec::new(),
            cookie: vec![0xAA; 16],
            cipher_suites: vec![0x009C],
            compression_methods: vec![0],
            extensions: Vec::new(),
        };
        let mut w = Writer::new();
        ch.write(&mut w, true);
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes);
        assert_eq!(ClientHello::read(&mut r, true).unwrap(), ch);
    }

    #[test]
    fn certificate_chain_round_trips() {
        let chain = CertificateChain {
            certs: vec![vec![1, 2, 3], vec![4, 5]],
        };
        let mut w = Writer::new();
        chain.write(&mut w);
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes);
        assert_eq!(CertificateChain::read(&mut r).unwrap(), chain);
    }

    #[test]
    fn mutual_suite_prefers_acceptable_order() {
        let acceptable = [&crate::suite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256, &crate::suite::TLS_RSA_WITH_AES_128_CBC_SHA];
        let offered = [0x002F, 0xC02F];
        let picked = pick_mutual_suite(&offered, &acceptable).unwrap();
        assert_eq!(picked.code, 0xC02F);
    }
}
