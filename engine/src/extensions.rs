//! The `Extension` catalogue.
//!
//! Modeled on the typed-enum-plus-`Unknown`-passthrough shape used by
//! `TLSExtension` in `examples/other_examples/.../collinsrhuffiii-tls-parser__src-tls_extensions.rs.rs`
//! and by `dacha`'s extension list (`.../dennisss-dacha__pkg-crypto-src-tls-extensions.rs.rs`):
//! every extension type this engine understands gets its own variant with
//! typed fields, and anything else round-trips losslessly through
//! `Extension::Unknown` so an embedder (or a future extension) never loses
//! bytes it didn't ask to interpret.

use crate::suite::{NamedGroup, SignatureScheme};
use crate::version::ProtocolVersion;
use tls_wire::{DecodeError, Reader, Writer};

macro_rules! ext_type {
    ($name:ident = $val:expr) => {
        pub const $name: u16 = $val;
    };
}

pub mod ext_type {
    ext_type!(SERVER_NAME = 0);
    ext_type!(MAX_FRAGMENT_LENGTH = 1);
    ext_type!(STATUS_REQUEST = 5);
    ext_type!(SUPPORTED_GROUPS = 10);
    ext_type!(EC_POINT_FORMATS = 11);
    ext_type!(SIGNATURE_ALGORITHMS = 13);
    ext_type!(USE_SRTP = 14);
    ext_type!(APPLICATION_LAYER_PROTOCOL_NEGOTIATION = 16);
    ext_type!(ENCRYPT_THEN_MAC = 22);
    ext_type!(EXTENDED_MASTER_SECRET = 23);
    ext_type!(SESSION_TICKET = 35);
    ext_type!(SUPPORTED_VERSIONS = 43);
    ext_type!(RENEGOTIATION_INFO = 0xff01);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extension {
    ServerName(String),
    /// RFC 6066 §4 codepoint (1 = 2^9, 2 = 2^10, 3 = 2^11, 4 = 2^12).
    MaxFragmentLength(u8),
    /// Present and empty on the ClientHello; carries the stapled response
    /// bytes (already re-encoded as a `CertificateStatus` body) elsewhere.
    StatusRequest,
    SupportedGroups(Vec<NamedGroup>),
    EcPointFormats(Vec<u8>),
    SignatureAlgorithms(Vec<SignatureScheme>),
    /// DTLS-SRTP protection profiles (RFC 5764), carried opaquely.
    UseSrtp(Vec<u8>),
    Alpn(Vec<Vec<u8>>),
    EncryptThenMac,
    ExtendedMasterSecret,
    /// Opaque ticket blob; empty on a ClientHello signaling support without
    /// a stored ticket.
    SessionTicket(Vec<u8>),
    RenegotiationInfo(Vec<u8>),
    /// RFC 8446 §4.2.1 `supported_versions`, carried on the `ClientHello`
    /// only: this engine negotiates nothing above TLS 1.2/DTLS 1.2, but a
    /// peer may still send its full version list for downgrade-indication
    /// purposes (a version-intolerant path between the peers can force a
    /// lower `legacy_version` than the client actually supports).
    SupportedVersions(Vec<ProtocolVersion>),
    Unknown { type_: u16, bytes: Vec<u8> },
}

impl Extension {
    pub fn type_code(&self) -> u16 {
        match self {
            Extension::ServerName(_) => ext_type::SERVER_NAME,
            Extension::MaxFragmentLength(_) => ext_type::MAX_FRAGMENT_LENGTH,
            Extension::StatusRequest => ext_type::STATUS_REQUEST,
            Extension::SupportedGroups(_) => ext_type::SUPPORTED_GROUPS,
            Extension::EcPointFormats(_) => ext_type::EC_POINT_FORMATS,
            Extension::SignatureAlgorithms(_) => ext_type::SIGNATURE_ALGORITHMS,
            Extension::UseSrtp(_) => ext_type::USE_SRTP,
            Extension::Alpn(_) => ext_type::APPLICATION_LAYER_PROTOCOL_NEGOTIATION,
            Extension::EncryptThenMac => ext_type::ENCRYPT_THEN_MAC,
            Extension::ExtendedMasterSecret => ext_type::EXTENDED_MASTER_SECRET,
            Extension::SessionTicket(_) => ext_type::SESSION_TICKET,
            Extension::RenegotiationInfo(_) => ext_type::RENEGOTIATION_INFO,
            Extension::SupportedVersions(_) => ext_type::SUPPORTED_VERSIONS,
            Extension::Unknown { type_, .. } => *type_,
        }
    }

    pub fn write(&self, w: &mut Writer) {
        w.put_u16(self.type_code());
        let mut body = w.start_u16_length_prefixed();
        match self {
            Extension::ServerName(name) => {
                let mut list = body.start_u16_length_prefixed();
                list.put_u8(0); // name_type: host_name
                let mut host = list.start_u16_length_prefixed();
                host.put_bytes(name.as_bytes());
            }
            Extension::MaxFragmentLength(code) => body.put_u8(*code),
            Extension::StatusRequest => {
                body.put_u8(1); // ocsp
                body.put_u16(0); // empty responder_id_list
                body.put_u16(0); // empty request_extensions
            }
            Extension::SupportedGroups(groups) => {
                let mut list = body.start_u16_length_prefixed();
                for g in groups {
                    list.put_u16(g.code());
                }
            }
            Extension::EcPointFormats(formats) => {
                let mut list = body.start_u8_length_prefixed();
                list.put_bytes(formats);
            }
            Extension::SignatureAlgorithms(schemes) => {
                let mut list = body.start_u16_length_prefixed();
                for s in schemes {
                    list.put_u16(s.code());
                }
            }
            Extension::UseSrtp(profiles) => body.put_bytes(profiles),
            Extension::Alpn(protocols) => {
                let mut list = body.start_u16_length_prefixed();
                for p in protocols {
                    let mut entry = list.start_u8_length_prefixed();
                    entry.put_bytes(p);
                }
            }
            Extension::EncryptThenMac | Extension::ExtendedMasterSecret => {}
            Extension::SessionTicket(ticket) => body.put_bytes(ticket),
            Extension::RenegotiationInfo(info) => {
                let mut list = body.start_u8_length_prefixed();
                list.put_bytes(info);
            }
            Extension::SupportedVersions(versions) => {
                let mut list = body.start_u8_length_prefixed();
                for v in versions {
                    v.write(&mut list);
                }
            }
            Extension::Unknown { bytes, .. } => body.put_bytes(bytes),
        }
    }

    pub fn read(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let type_ = r.read_u16()?;
        let len = r.read_u16()? as usize;
        let mut body = r.sub(len)?;
        Ok(match type_ {
            ext_type::SERVER_NAME => {
                if body.is_empty() {
                    Extension::ServerName(String::new())
                } else {
                    let name_list_len = body.read_u16()? as usize;
                    let mut list = body.sub(name_list_len)?;
                    let _name_type = list.read_u8()?;
                    let host = list.read_vec_u16(0, 255)?;
                    Extension::ServerName(
                        String::from_utf8(host.to_vec())
                            .map_err(|_| DecodeError { reason: "server_name is not UTF-8", offset: list.offset() })?,
                    )
                }
            }
            ext_type::MAX_FRAGMENT_LENGTH => Extension::MaxFragmentLength(body.read_u8()?),
            ext_type::STATUS_REQUEST => Extension::StatusRequest,
            ext_type::SUPPORTED_GROUPS => {
                let raw = body.read_vec_of(2, 2)?;
                let mut groups = Vec::with_capacity(raw.len() / 2);
                let mut gr = Reader::new(raw);
                while !gr.is_empty() {
                    let code = gr.read_u16()?;
                    if let Some(g) = NamedGroup::from_code(code) {
                        groups.push(g);
                    }
                }
                Extension::SupportedGroups(groups)
            }
            ext_type::EC_POINT_FORMATS => {
                Extension::EcPointFormats(body.read_vec_u8(0, 255)?.to_vec())
            }
            ext_type::SIGNATURE_ALGORITHMS => {
                let raw = body.read_vec_of(2, 2)?;
                let mut schemes = Vec::with_capacity(raw.len() / 2);
                let mut sr = Reader::new(raw);
                while !sr.is_empty() {
                    schemes.push(SignatureScheme::from_code(sr.read_u16()?));
                }
                Extension::SignatureAlgorithms(schemes)
            }
            ext_type::USE_SRTP => Extension::UseSrtp(body.rest().to_vec()),
            ext_type::APPLICATION_LAYER_PROTOCOL_NEGOTIATION => {
                let protocol_list_len = body.read_u16()? as usize;
                let mut list = body.sub(protocol_list_len)?;
                let mut protocols = Vec::new();
                while !list.is_empty() {
                    protocols.push(list.read_vec_u8(1, 255)?.to_vec());
                }
                Extension::Alpn(protocols)
            }
            ext_type::ENCRYPT_THEN_MAC => Extension::EncryptThenMac,
            ext_type::EXTENDED_MASTER_SECRET => Extension::ExtendedMasterSecret,
            ext_type::SESSION_TICKET => Extension::SessionTicket(body.rest().to_vec()),
            ext_type::RENEGOTIATION_INFO => {
                Extension::RenegotiationInfo(body.read_vec_u8(0, 255)?.to_vec())
            }
            ext_type::SUPPORTED_VERSIONS => {
                let raw = body.read_vec_of(1, 2)?;
                let mut versions = Vec::with_capacity(raw.len() / 2);
                let mut vr = Reader::new(raw);
                while !vr.is_empty() {
                    versions.push(ProtocolVersion::read(&mut vr)?);
                }
                Extension::SupportedVersions(versions)
            }
            other => Extension::Unknown {
                type_: other,
                bytes: body.rest().to_vec(),
            },
        })
    }
}

/// RFC 5764 §4.1.2 protection profile codepoints.
pub mod srtp_profile {
    pub const SRTP_AES128_CM_HMAC_SHA1_80: u16 = 0x0001;
    pub const SRTP_AES128_CM_HMAC_SHA1_32: u16 = 0x0002;
    pub const SRTP_NULL_HMAC_SHA1_80: u16 = 0x0005;
    pub const SRTP_NULL_HMAC_SHA1_32: u16 = 0x0006;
}

/// The typed content of `Extension::UseSrtp` (RFC 5764 §4.1.1), carried
/// opaquely by the enum variant itself since the body's shape differs
/// between `ClientHello` (a profile list plus an MKI) and `ServerHello` (a
/// single chosen profile plus an MKI) — distinguishing the two would need a
/// second variant for no benefit beyond this module's own callers.
pub mod srtp {
    use tls_wire::{DecodeError, Reader, Writer};

    pub fn encode_offer(profiles: &[u16]) -> Vec<u8> {
        let mut w = Writer::new();
        {
            let mut list = w.start_u16_length_prefixed();
            for p in profiles {
                list.put_u16(*p);
            }
        }
        w.put_u8(0); // srtp_mki: none
        w.into_bytes()
    }

    pub fn decode_offer(bytes: &[u8]) -> Result<Vec<u16>, DecodeError> {
        let mut r = Reader::new(bytes);
        let raw = r.read_vec_of(2, 2)?;
        let mut profiles = Vec::with_capacity(raw.len() / 2);
        let mut pr = Reader::new(raw);
        while !pr.is_empty() {
            profiles.push(pr.read_u16()?);
        }
        Ok(profiles)
    }

    pub fn encode_selection(profile: u16) -> Vec<u8> {
        let mut w = Writer::new();
        {
            let mut list = w.start_u16_length_prefixed();
            list.put_u16(profile);
        }
        w.put_u8(0); // srtp_mki: none
        w.into_bytes()
    }

    pub fn decode_selection(bytes: &[u8]) -> Result<u16, DecodeError> {
        let mut r = Reader::new(bytes);
        let raw = r.read_vec_of(2, 2)?;
        let mut pr = Reader::new(raw);
        pr.read_u16()
    }
}

/// Encode a full extension list with its outer u16 total-length prefix, as
/// carried at the tail of `ClientHello`/`ServerHello`/`EncryptedExtensions`-
/// equivalent messages.
pub fn write_list(w: &mut Writer, extensions: &[Extension]) {
    let mut list = w.start_u16_length_prefixed();
    for ext in extensions {
        ext.write(&mut list);
    }
}

pub fn read_list(r: &mut Reader<'_>) -> Result<Vec<Extension>, DecodeError> {
    if r.is_empty() {
        return Ok(Vec::new());
    }
    let list_len = r.read_u16()? as usize;
    let mut list = r.sub(list_len)?;
    let mut out = Vec::new();
    while !list.is_empty() {
        out.push(Extension::read(&mut list)?);
    }
    Ok(out)
}

/// Find the first extension of a given type code, preserving the "first
/// occurrence wins, duplicates are a protocol error the caller should
/// reject" reading posture.
pub fn find(extensions: &[Extension], type_code: u16) -> Option<&Extension> {
    extensions.iter().find(|e| e.type_code() == type_code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_extension_round_trips_losslessly() {
        let ext = Extension::Unknown {
            type_: 0xABCD,
            bytes: vec![1, 2, 3, 4],
        };
        let mut w = Writer::new();
        ext.write(&mut w);
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes);
        let decoded = Extension::read(&mut r).unwrap();
        assert_eq!(decoded, ext);
    }

    #[test]
    fn alpn_list_round_trips() {
        let ext = Extension::Alpn(vec![b"h2".to_vec(), b"http/1.1".to_vec()]);
        let mut w = Writer::new();
        ext.write(&mut w);
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes);
        assert_eq!(Extension::read(&mut r).unwrap(), ext);
    }

    #[test]
    fn list_preserves_order() {
        let exts = vec![Extension::ExtendedMasterSecret, Extension::EncryptThenMac];
        let mut w = Writer::new();
        write_list(&mut w, &exts);
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes);
        let decoded = read_list(&mut r).unwrap();
        assert_eq!(decoded, exts);
    }

    #[test]
    fn use_srtp_offer_and_selection_round_trip() {
        let offer = srtp::encode_offer(&[srtp_profile::SRTP_AES128_CM_HMAC_SHA1_80, srtp_profile::SRTP_AES128_CM_HMAC_SHA1_32]);
        assert_eq!(
            srtp::decode_offer(&offer).unwrap(),
            vec![srtp_profile::SRTP_AES128_CM_HMAC_SHA1_80, srtp_profile::SRTP_AES128_CM_HMAC_SHA1_32]
        );
        let selection = srtp::encode_selection(srtp_profile::SRTP_AES128_CM_HMAC_SHA1_32);
        assert_eq!(srtp::decode_selection(&selection).unwrap(), srtp_profile::SRTP_AES128_CM_HMAC_SHA1_32);
    }

    #[test]
    fn supported_versions_round_trips() {
        let ext = Extension::SupportedVersions(vec![ProtocolVersion::TLS1_2, ProtocolVersion::TLS1_1, ProtocolVersion::TLS1_0]);
        let mut w = Writer::new();
        ext.write(&mut w);
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes);
        assert_eq!(Extension::read(&mut r).unwrap(), ext);
    }

    #[test]
    fn empty_client_hello_extension_list_is_optional() {
        let bytes: [u8; 0] = [];
        let mut r = Reader::new(&bytes);
        assert!(read_list(&mut r).unwrap().is_empty());
    }
}
