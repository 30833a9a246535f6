//! Protocol version identifiers.

use tls_wire::{DecodeError, Reader, Writer};

/// A `(major, minor)` protocol version pair, as carried on the wire by
/// every TLS/DTLS record and `ClientHello`/`ServerHello`.
///
/// DTLS versions are encoded as the one's complement of their notional TLS
/// version per RFC 6347 §4.1 (`{254, 253}` for DTLS 1.2, not `{3, 3}`);
/// `ProtocolVersion` stores the wire bytes directly so encode/decode is a
/// straight round trip, and exposes [`ProtocolVersion::is_datagram`] for
/// callers that need to branch on the family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProtocolVersion {
    pub major: u8,
    pub minor: u8,
}

impl ProtocolVersion {
    pub const TLS1_0: Self = Self { major: 3, minor: 1 };
    pub const TLS1_1: Self = Self { major: 3, minor: 2 };
    pub const TLS1_2: Self = Self { major: 3, minor: 3 };
    pub const DTLS1_0: Self = Self {
        major: 254,
        minor: 255,
    };
    pub const DTLS1_2: Self = Self {
        major: 254,
        minor: 253,
    };

    pub fn is_datagram(&self) -> bool {
        self.major == 254
    }

    /// Total order within a family (stream or datagram); comparing across
    /// families is meaningless and callers should not rely on it.
    pub fn is_tls(&self) -> bool {
        !self.is_datagram()
    }

    /// Whether `self` is at least as new as `other`, honoring that DTLS
    /// minor version numbering counts *down* as the protocol gets newer.
    pub fn at_least(&self, other: &Self) -> bool {
        debug_assert_eq!(self.is_datagram(), other.is_datagram());
        if self.is_datagram() {
            (self.major, self.minor) <= (other.major, other.minor)
        } else {
            (self.major, self.minor) >= (other.major, other.minor)
        }
    }

    pub fn read(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            major: r.read_u8()?,
            minor: r.read_u8()?,
        })
    }

    pub fn write(&self, w: &mut Writer) {
        w.put_u8(self.major);
        w.put_u8(self.minor);
    }
}

/// Enumerate every well-known version between `min` and `max` (inclusive,
/// newest first) within `max`'s family, for the `supported_versions`
/// extension (RFC 8446 §4.2.1). Versions outside the four known constants
/// are never synthesized even if `min`/`max` are themselves unrecognized.
pub fn known_versions_in_range(min: ProtocolVersion, max: ProtocolVersion) -> Vec<ProtocolVersion> {
    let family: &[ProtocolVersion] = if max.is_datagram() {
        &[ProtocolVersion::DTLS1_2, ProtocolVersion::DTLS1_0]
    } else {
        &[ProtocolVersion::TLS1_2, ProtocolVersion::TLS1_1, ProtocolVersion::TLS1_0]
    };
    family
        .iter()
        .copied()
        .filter(|v| v.at_least(&min) && max.at_least(v))
        .collect()
}

impl std::fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Self::TLS1_0 => write!(f, "TLS1.0"),
            Self::TLS1_1 => write!(f, "TLS1.1"),
            Self::TLS1_2 => write!(f, "TLS1.2"),
            Self::DTLS1_0 => write!(f, "DTLS1.0"),
            Self::DTLS1_2 => write!(f, "DTLS1.2"),
            other => write!(f, "unknown({}, {})", other.major, other.minor),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn datagram_predicate() {
        assert!(!ProtocolVersion::TLS1_2.is_datagram());
        assert!(ProtocolVersion::DTLS1_2.is_datagram());
    }

    #[test]
    fn dtls_ordering_is_inverted() {
        assert!(ProtocolVersion::DTLS1_2.at_least(&ProtocolVersion::DTLS1_0));
        assert!(!ProtocolVersion::DTLS1_0.at_least(&ProtocolVersion::DTLS1_2));
    }

    #[test]
    fn round_trips() {
        let mut w = Writer::new();
        ProtocolVersion::TLS1_2.write(&mut w);
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes);
        assert_eq!(ProtocolVersion::read(&mut r).unwrap(), ProtocolVersion::TLS1_2);
    }
}
