//! The record layer.
//!
//! A `Record` is the unit every protected byte crosses the wire as:
//! `ContentType || ProtocolVersion || (epoch || sequence_number)? || u16
//! length || fragment`. The `(epoch || sequence_number)` pair is present
//! only for DTLS (RFC 6347 §4.1); TLS instead tracks an implicit,
//! monotonically increasing sequence number per [`cipher::CipherState`].
//!
//! This module owns content-type framing and plaintext fragmentation; the
//! cipher transforms themselves live in [`cipher`], and DTLS's additional
//! reordering/retransmission machinery lives in [`dtls`].

pub mod cipher;
pub mod dtls;
pub mod framing;

use crate::error::{Error, Result};
use crate::version::ProtocolVersion;
use tls_wire::{Reader, Writer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ContentType {
    ChangeCipherSpec = 20,
    Alert = 21,
    Handshake = 22,
    ApplicationData = 23,
}

impl ContentType {
    pub fn from_u8(v: u8) -> Result<Self> {
        Ok(match v {
            20 => Self::ChangeCipherSpec,
            21 => Self::Alert,
            22 => Self::Handshake,
            23 => Self::ApplicationData,
            _ => return Err(Error::UnexpectedMessage("unknown record content type")),
        })
    }
}

/// A single on-the-wire record, after the transport (and, for DTLS, the
/// epoch/sequence header) framing has been stripped. `payload` is still
/// ciphertext if the record's epoch has an active cipher.
#[derive(Debug, Clone)]
pub struct PlaintextRecord {
    pub content_type: ContentType,
    pub version: ProtocolVersion,
    pub payload: Vec<u8>,
}

/// Split plaintext into fragments no larger than `max_len`, as TLS requires
/// for any content type. A single empty fragment is emitted for
/// empty input so e.g. a zero-length `ApplicationData` write still produces
/// a record.
pub fn fragment(content_type: ContentType, version: ProtocolVersion, data: &[u8], max_len: usize) -> Vec<PlaintextRecord> {
    if data.is_empty() {
        return vec![PlaintextRecord {
            content_type,
            version,
            payload: Vec::new(),
        }];
    }
    data.chunks(max_len.max(1))
        .map(|chunk| PlaintextRecord {
            content_type,
            version,
            payload: chunk.to_vec(),
        })
        .collect()
}

/// Encode a TLS record header (`ContentType || ProtocolVersion || u16
/// length`) followed by `payload`.
pub fn write_tls_header(w: &mut Writer, content_type: ContentType, version: ProtocolVersion, payload: &[u8]) {
    w.put_u8(content_type as u8);
    version.write(w);
    w.put_u16(payload.len() as u16);
    w.put_bytes(payload);
}

/// Parse one TLS record header and return its content type, version, and
/// payload slice (borrowing from `r`'s underlying buffer).
pub fn read_tls_record<'a>(r: &mut Reader<'a>) -> Result<(ContentType, ProtocolVersion, &'a [u8])> {
    let content_type = ContentType::from_u8(r.read_u8()?)?;
    let version = ProtocolVersion::read(r)?;
    let len = r.read_u16()? as usize;
    if len > (1 << 14) + 2048 {
        return Err(Error::IllegalParameter("record length exceeds protocol maximum"));
    }
    let payload = r.take(len)?;
    Ok((content_type, version, payload))
}

/// Encode a DTLS record header (`ContentType || ProtocolVersion || u16 epoch
/// || u48 sequence_number || u16 length`) followed by `payload` (RFC 6347
/// §4.1).
pub fn write_dtls_header(
    w: &mut Writer,
    content_type: ContentType,
    version: ProtocolVersion,
    epoch: u16,
    sequence_number: u64,
    payload: &[u8],
) {
    w.put_u8(content_type as u8);
    version.write(w);
    w.put_u16(epoch);
    w.put_u48(sequence_number & 0x0000_FFFF_FFFF_FFFF);
    w.put_u16(payload.len() as u16);
    w.put_bytes(payload);
}

/// The length of a TLS record header (`ContentType || ProtocolVersion ||
/// u16 length`), used by the stream-reassembly buffer in
/// [`crate::endpoint`] to tell "header not fully arrived yet" apart from
/// "header arrived, body still short" before committing to a parse.
pub const TLS_HEADER_LEN: usize = 5;

/// If `buf` starts with a complete TLS record header, return the total
/// byte length of that record (header plus body) so a caller buffering a
/// TCP stream can tell whether the rest of the record has arrived yet.
/// Returns `None` when fewer than [`TLS_HEADER_LEN`] bytes are available;
/// does not validate the body length against the protocol maximum (that
/// check happens in [`read_tls_record`] once the record is actually
/// parsed).
pub fn peek_tls_record_len(buf: &[u8]) -> Option<usize> {
    if buf.len() < TLS_HEADER_LEN {
        return None;
    }
    let len = u16::from_be_bytes([buf[3], buf[4]]) as usize;
    Some(TLS_HEADER_LEN + len)
}

/// Parse one DTLS record header and return its content type, version,
/// epoch, sequence number, and payload slice.
pub fn read_dtls_record<'a>(r: &mut Reader<'a>) -> Result<(ContentType, ProtocolVersion, u16, u64, &'a [u8])> {
    let content_type = ContentType::from_u8(r.read_u8()?)?;
    let version = ProtocolVersion::read(r)?;
    let epoch = r.read_u16()?;
    let sequence_number = r.read_u48()?;
    let len = r.read_u16()? as usize;
    if len > (1 << 14) + 2048 {
        return Err(Error::IllegalParameter("record length exceeds protocol maximum"));
    }
    let payload = r.take(len)?;
    Ok((content_type, version, epoch, sequence_number, payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fragments_respect_max_len() {
        let data = vec![0xAAu8; 50];
        let fragments = fragment(ContentType::ApplicationData, ProtocolVersion::TLS1_2, &data, 16);
        assert_eq!(fragments.len(), 4);
        assert!(fragments.iter().all(|f| f.payload.len() <= 16));
        let total: usize = fragments.iter().map(|f| f.payload.len()).sum();
        assert_eq!(total, 50);
    }

    #[test]
    fn empty_payload_still_produces_one_record() {
        let fragments = fragment(ContentType::ApplicationData, ProtocolVersion::TLS1_2, &[], 16);
        assert_eq!(fragments.len(), 1);
        assert!(fragments[0].payload.is_empty());
    }

    #[test]
    fn header_round_trips() {
        let mut w = Writer::new();
        write_tls_header(&mut w, ContentType::Handshake, ProtocolVersion::TLS1_2, &[1, 2, 3]);
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes);
        let (ct, v, payload) = read_tls_record(&mut r).unwrap();
        assert_eq!(ct, ContentType::Handshake);
        assert_eq!(v, ProtocolVersion::TLS1_2);
        assert_eq!(payload, &[1, 2, 3]);
    }

    #[test]
    fn peek_tls_record_len_waits_for_full_header() {
        assert_eq!(peek_tls_record_len(&[22, 3, 3, 0]), None);
        assert_eq!(peek_tls_record_len(&[22, 3, 3, 0, 5]), Some(10));
        assert_eq!(peek_tls_record_len(&[22, 3, 3, 0, 5, 1, 2, 3]), Some(10));
    }

    #[test]
    fn dtls_header_round_trips_with_epoch_and_sequence() {
        let mut w = Writer::new();
        write_dtls_header(&mut w, ContentType::ApplicationData, ProtocolVersion::DTLS1_2, 3, 0x0000_1234_5678, &[9, 9]);
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes);
        let (ct, v, epoch, seq, payload) = read_dtls_record(&mut r).unwrap();
        assert_eq!(ct, ContentType::ApplicationData);
        assert_eq!(v, ProtocolVersion::DTLS1_2);
        assert_eq!(epoch, 3);
        assert_eq!(seq, 0x0000_1234_5678);
        assert_eq!(payload, &[9, 9]);
    }
}
