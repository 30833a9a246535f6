//! The TLS/DTLS alert vocabulary (RFC 5246 §7.2, RFC 8446 §6).
//!
//! Unchanged across every protocol version this workspace speaks, so it
//! lives in the protocol-agnostic `wire` crate rather than in `engine`.

/// Alert severity.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AlertLevel {
    Warning = 1,
    Fatal = 2,
}

impl From<AlertLevel> for u8 {
    fn from(level: AlertLevel) -> Self {
        level as u8
    }
}

impl TryFrom<u8> for AlertLevel {
    type Error = u8;
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            x if x == Self::Warning as u8 => Ok(Self::Warning),
            x if x == Self::Fatal as u8 => Ok(Self::Fatal),
            _ => Err(value),
        }
    }
}

/// Alert description. Every fatal kind in `engine::error::Error` maps to
/// exactly one of these.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertDescription {
    CloseNotify = 0,
    UnexpectedMessage = 10,
    BadRecordMac = 20,
    RecordOverflow = 22,
    HandshakeFailure = 40,
    BadCertificate = 42,
    UnsupportedCertificate = 43,
    CertificateRevoked = 44,
    CertificateExpired = 45,
    CertificateUnknown = 46,
    IllegalParameter = 47,
    UnknownCa = 48,
    AccessDenied = 49,
    DecodeError = 50,
    DecryptError = 51,
    ProtocolVersion = 70,
    InsufficientSecurity = 71,
    InternalError = 80,
    InappropriateFallback = 86,
    UserCanceled = 90,
    NoRenegotiation = 100,
    MissingExtension = 109,
    UnsupportedExtension = 110,
    UnrecognizedName = 112,
    BadCertificateStatusResponse = 113,
    UnknownPskIdentity = 115,
    CertificateRequired = 116,
    NoApplicationProtocol = 120,
}

impl From<AlertDescription> for u8 {
    fn from(description: AlertDescription) -> Self {
        description as u8
    }
}

impl TryFrom<u8> for AlertDescription {
    type Error = u8;
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        use AlertDescription::*;
        // Order matches the RFC 5246 / 8446 codepoint table.
        for candidate in [
            CloseNotify,
            UnexpectedMessage,
            BadRecordMac,
            RecordOverflow,
            HandshakeFailure,
            BadCertificate,
            UnsupportedCertificate,
            CertificateRevoked,
            CertificateExpired,
            CertificateUnknown,
            IllegalParameter,
            UnknownCa,
            AccessDenied,
            DecodeError,
            DecryptError,
            ProtocolVersion,
            InsufficientSecurity,
            InternalError,
            InappropriateFallback,
            UserCanceled,
            NoRenegotiation,
            MissingExtension,
            UnsupportedExtension,
            UnrecognizedName,
            BadCertificateStatusResponse,
            UnknownPskIdentity,
            CertificateRequired,
            NoApplicationProtocol,
        ] {
            if candidate as u8 == value {
                return Ok(candidate);
            }
        }
        Err(value)
    }
}

/// A `(level, description)` alert, as exchanged on the wire or surfaced to
/// the embedder's `alert` callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Alert {
    pub level: AlertLevel,
    pub description: AlertDescription,
}

impl Alert {
    pub const fn fatal(description: AlertDescription) -> Self {
        Self {
            level: AlertLevel::Fatal,
            description,
        }
    }

    pub const fn warning(description: AlertDescription) -> Self {
        Self {
            level: AlertLevel::Warning,
            description,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.level == AlertLevel::Fatal
    }

    pub fn encode(&self) -> [u8; 2] {
        [self.level.into(), self.description.into()]
    }

    pub fn decode(bytes: [u8; 2]) -> Result<Self, u8> {
        Ok(Self {
            level: AlertLevel::try_from(bytes[0]).map_err(|_| bytes[0])?,
            description: AlertDescription::try_from(bytes[1]).map_err(|_| bytes[1])?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_known_description() {
        let all = [
            AlertDescription::CloseNotify,
            AlertDescription::UnexpectedMessage,
            AlertDescription::BadRecordMac,
            AlertDescription::HandshakeFailure,
            AlertDescription::ProtocolVersion,
            AlertDescription::InsufficientSecurity,
            AlertDescription::InternalError,
            AlertDescription::NoApplicationProtocol,
        ];
        for d in all {
            let alert = Alert::fatal(d);
            let encoded = alert.encode();
            let decoded = Alert::decode(encoded).unwrap();
            assert_eq!(decoded, alert);
        }
    }

    #[test]
    fn rejects_unknown_description() {
        assert!(AlertDescription::try_from(255).is_err());
    }
}
