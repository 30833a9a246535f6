//! Error kinds and their mapping to outbound alerts.

use tls_wire::{Alert, AlertDescription, DecodeError};

/// Every fallible engine operation returns this type. Each variant maps to
/// exactly one [`Alert`] via [`Error::alert`], asserted here once instead of
/// being re-derived at every call site.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("malformed record or handshake message: {0}")]
    Decode(#[from] DecodeError),

    #[error("field value out of range: {0}")]
    IllegalParameter(&'static str),

    #[error("unexpected handshake message for current state: {0}")]
    UnexpectedMessage(&'static str),

    #[error("record MAC/AEAD verification failed")]
    BadRecordMac,

    #[error("no acceptable cipher suite/version overlap: {0}")]
    HandshakeFailure(&'static str),

    #[error("certificate chain failed verification: {0}")]
    BadCertificate(String),

    #[error("peer certificate has expired")]
    CertificateExpired,

    #[error("peer certificate has been revoked")]
    CertificateRevoked,

    #[error("certificate key type or signature scheme unsupported: {0}")]
    UnsupportedCertificate(&'static str),

    #[error("protocol version unacceptable: {0}")]
    ProtocolVersion(&'static str),

    #[error("client signalled TLS_FALLBACK_SCSV at a version below our maximum")]
    InappropriateFallback,

    #[error("no mutually acceptable application-layer protocol")]
    NoApplicationProtocol,

    #[error("security parameters below configured minimum: {0}")]
    InsufficientSecurity(&'static str),

    #[error("internal invariant violated: {0}")]
    InternalError(&'static str),

    #[error("local user_canceled before handshake completed")]
    UserCanceled,

    #[error("DTLS flight exceeded the configured retransmission budget")]
    HandshakeTimeout,

    #[error("operation requires an Active connection")]
    NotActive,

    #[error("operation invalid on an already-Closed connection")]
    AlreadyClosed,
}

impl Error {
    /// The alert this error kind is surfaced as. Programmer misuse variants
    /// (`NotActive`, `AlreadyClosed`) have no alert — they never reach the
    /// wire.
    pub fn alert(&self) -> Option<Alert> {
        let description = match self {
            Error::Decode(_) => AlertDescription::DecodeError,
            Error::IllegalParameter(_) => AlertDescription::IllegalParameter,
            Error::UnexpectedMessage(_) => AlertDescription::UnexpectedMessage,
            Error::BadRecordMac => AlertDescription::BadRecordMac,
            Error::HandshakeFailure(_) => AlertDescription::HandshakeFailure,
            Error::BadCertificate(_) => AlertDescription::BadCertificate,
            Error::CertificateExpired => AlertDescription::CertificateExpired,
            Error::CertificateRevoked => AlertDescription::CertificateRevoked,
            Error::UnsupportedCertificate(_) => AlertDescription::UnsupportedCertificate,
            Error::ProtocolVersion(_) => AlertDescription::ProtocolVersion,
            Error::InappropriateFallback => AlertDescription::InappropriateFallback,
            Error::NoApplicationProtocol => AlertDescription::NoApplicationProtocol,
            Error::InsufficientSecurity(_) => AlertDescription::InsufficientSecurity,
            Error::InternalError(_) => AlertDescription::InternalError,
            Error::UserCanceled => AlertDescription::UserCanceled,
            Error::HandshakeTimeout => AlertDescription::InternalError,
            Error::NotActive | Error::AlreadyClosed => return None,
        };
        let level = if matches!(self, Error::UserCanceled) {
            tls_wire::AlertLevel::Warning
        } else {
            tls_wire::AlertLevel::Fatal
        };
        Some(Alert {
            level,
            description,
        })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
