//! The handshake message header: `(HandshakeType, u24 length)` for TLS,
//! extended with `(u16 message_seq, u24 fragment_offset, u24
//! fragment_length)` for DTLS (RFC 6347 §4.2.2). This is the seam between
//! the generic handshake message bodies in [`crate::handshake::message`]
//! and the per-transport framing/reassembly this module and
//! [`crate::record::dtls`] own.

use crate::error::{Error, Result};
use crate::handshake::message::HandshakeType;
use tls_wire::{Reader, Writer};

/// The fully decoded header of one on-the-wire handshake fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeHeader {
    pub msg_type: HandshakeType,
    pub length: u32,
    /// DTLS only; `0` for TLS (every TLS handshake message is its own
    /// implicit sequence item, tracked by the transcript instead).
    pub message_seq: u16,
    pub fragment_offset: u32,
    pub fragment_length: u32,
}

pub fn write_tls(w: &mut Writer, msg_type: HandshakeType, body: &[u8]) {
    w.put_u8(msg_type as u8);
    w.put_u24(body.len() as u32);
    w.put_bytes(body);
}

pub fn read_tls_header(r: &mut Reader<'_>) -> Result<HandshakeHeader> {
    let msg_type = HandshakeType::from_u8(r.read_u8()?)?;
    let length = r.read_u24()?;
    Ok(HandshakeHeader {
        msg_type,
        length,
        message_seq: 0,
        fragment_offset: 0,
        fragment_length: length,
    })
}

/// Write one complete handshake message as a single DTLS fragment
/// (`fragment_offset = 0`, `fragment_length = length`). Splitting a message
/// across multiple fragments is only necessary when `body` exceeds the
/// path MTU, which the sender decides at the record layer; this helper
/// covers the common unfragmented case used by every message this engine
/// originates.
pub fn write_dtls(w: &mut Writer, msg_type: HandshakeType, message_seq: u16, body: &[u8]) {
    w.put_u8(msg_type as u8);
    w.put_u24(body.len() as u32);
    w.put_u16(message_seq);
    w.put_u24(0);
    w.put_u24(body.len() as u32);
    w.put_bytes(body);
}

pub fn read_dtls_header(r: &mut Reader<'_>) -> Result<HandshakeHeader> {
    let msg_type = HandshakeType::from_u8(r.read_u8()?)?;
    let length = r.read_u24()?;
    let message_seq = r.read_u16()?;
    let fragment_offset = r.read_u24()?;
    let fragment_length = r.read_u24()?;
    if fragment_offset.saturating_add(fragment_length) > length {
        return Err(Error::IllegalParameter("DTLS fragment exceeds declared message length"));
    }
    Ok(HandshakeHeader {
        msg_type,
        length,
        message_seq,
        fragment_offset,
        fragment_length,
    })
}
