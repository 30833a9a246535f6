//! Session resumption state.
//!
//! A [`Session`] is everything needed to skip the full handshake on a
//! future connection: the negotiated suite and master secret, plus enough
//! of the original handshake's negotiated parameters that resumption can't
//! silently downgrade security (extended_master_secret and the peer
//! identity must match, RFC 5246 §7.4.1.2 / RFC 7627 §5.3).

use crate::crypto::Hmac;
use crate::suite::{self, CipherSuite};
use crate::version::ProtocolVersion;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, SystemTime};
use subtle::ConstantTimeEq;
use tls_wire::{Reader, Writer};
use zeroize::Zeroize;

#[derive(Debug, Clone)]
pub struct Session {
    pub id: Vec<u8>,
    pub protocol_version: ProtocolVersion,
    pub cipher_suite: &'static CipherSuite,
    pub master_secret: [u8; 48],
    /// Opaque session ticket (RFC 5077), if the original handshake issued
    /// one. A session may carry an id, a ticket, or both.
    pub ticket: Vec<u8>,
    /// DER-encoded peer certificate chain from the original handshake, if
    /// any, re-asserted (not re-verified) on resumption.
    pub peer_cert_chain: Vec<Vec<u8>>,
    /// Hostname the original handshake was made to (SNI value, client side)
    /// or presented as (server side), used by `load_from_server_info`.
    pub server_hostname: Option<String>,
    /// When the original handshake completed.
    pub start_time: SystemTime,
    /// Advisory validity period communicated at issuance (`NewSessionTicket`
    /// lifetime hint or, for id-only caching, the policy default).
    pub lifetime_hint: Duration,
    /// DTLS-SRTP protection profile negotiated via `use_srtp`, if any.
    pub srtp_profile: Option<u16>,
    pub extended_master_secret: bool,
    /// RFC 7366 Encrypt-then-MAC negotiated for this session's CBC suite.
    pub encrypt_then_mac: bool,
}

impl Session {
    /// Whether `now` is still within this session's lifetime hint.
    pub fn is_expired(&self, now: SystemTime) -> bool {
        match now.duration_since(self.start_time) {
            Ok(elapsed) => elapsed > self.lifetime_hint,
            Err(_) => false,
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.master_secret.zeroize();
    }
}

/// Implemented by the embedder (or used via [`InMemorySessionManager`]) to
/// store/retrieve resumable sessions. Every method must be safe
/// under concurrent calls from multiple connections.
pub trait SessionManager: Send + Sync {
    fn save(&self, session: Session);
    fn load_from_session_id(&self, id: &[u8]) -> Option<Session>;
    fn load_from_server_info(&self, hostname: &str, port: u16) -> Option<Session>;
    fn remove(&self, id: &[u8]);
    fn remove_all(&self);
    /// Stable, server-side key used to encrypt/authenticate issued session
    /// tickets (RFC 5077 §4). Stable across calls so a ticket issued before
    /// a process restart can still be decrypted after one, as long as the
    /// embedder's `SessionManager` persists it.
    fn session_ticket_key(&self) -> Vec<u8>;
}

/// A bounded, `Mutex`-guarded in-memory session cache, evicting the
/// least-recently-inserted entry once `capacity` is reached. Suitable as a
/// default for embedders that don't need cross-process sharing; production
/// servers fronting many processes will want their own `SessionManager`
/// backed by a shared cache.
pub struct InMemorySessionManager {
    capacity: usize,
    ticket_key: Vec<u8>,
    inner: Mutex<InMemorySessionManagerInner>,
}

struct InMemorySessionManagerInner {
    sessions: HashMap<Vec<u8>, Session>,
    /// Insertion order, for LRU-ish eviction without a full LRU list.
    order: Vec<Vec<u8>>,
}

impl InMemorySessionManager {
    pub fn new(capacity: usize) -> Self {
        Self::with_ticket_key(capacity, vec![0u8; 32])
    }

    /// Construct with an explicit session-ticket key, for embedders that
    /// need it to survive a process restart (RFC 5077 §4).
    pub fn with_ticket_key(capacity: usize, ticket_key: Vec<u8>) -> Self {
        InMemorySessionManager {
            capacity: capacity.max(1),
            ticket_key,
            inner: Mutex::new(InMemorySessionManagerInner {
                sessions: HashMap::new(),
                order: Vec::new(),
            }),
        }
    }

    fn expire_locked(inner: &mut InMemorySessionManagerInner, now: SystemTime) {
        let expired: Vec<Vec<u8>> = inner
            .sessions
            .iter()
            .filter(|(_, s)| s.is_expired(now))
            .map(|(id, _)| id.clone())
            .collect();
        for id in expired {
            inner.sessions.remove(&id);
            inner.order.retain(|k| k != &id);
        }
    }
}

impl SessionManager for InMemorySessionManager {
    fn save(&self, session: Session) {
        let mut inner = self.inner.lock().expect("session cache mutex poisoned");
        if !inner.sessions.contains_key(&session.id) {
            inner.order.push(session.id.clone());
        }
        if inner.sessions.len() >= self.capacity && !inner.sessions.contains_key(&session.id) {
            if !inner.order.is_empty() {
                let evict = inner.order.remove(0);
                inner.sessions.remove(&evict);
            }
        }
        inner.sessions.insert(session.id.clone(), session);
    }

    fn load_from_session_id(&self, id: &[u8]) -> Option<Session> {
        let mut inner = self.inner.lock().expect("session cache mutex poisoned");
        Self::expire_locked(&mut inner, SystemTime::now());
        inner.sessions.get(id).cloned()
    }

    fn load_from_server_info(&self, hostname: &str, _port: u16) -> Option<Session> {
        let mut inner = self.inner.lock().expect("session cache mutex poisoned");
        Self::expire_locked(&mut inner, SystemTime::now());
        inner
            .sessions
            .values()
            .find(|s| s.server_hostname.as_deref() == Some(hostname))
            .cloned()
    }

    fn remove(&self, id: &[u8]) {
        let mut inner = self.inner.lock().expect("session cache mutex poisoned");
        inner.sessions.remove(id);
        inner.order.retain(|k| k != id);
    }

    fn remove_all(&self) {
        let mut inner = self.inner.lock().expect("session cache mutex poisoned");
        inner.sessions.clear();
        inner.order.clear();
    }

    fn session_ticket_key(&self) -> Vec<u8> {
        self.ticket_key.clone()
    }
}

/// Serializes `session` into an opaque, integrity-protected ticket (RFC
/// 5077 §4) under `key` (the issuing `SessionManager`'s
/// `session_ticket_key`). Ticket integrity uses whatever `hmac` the
/// caller supplies, independent of the session's own negotiated PRF,
/// since the ticket key is a server-local secret, not a
/// handshake-negotiated one.
pub fn seal_ticket(hmac: &dyn Hmac, key: &[u8], session: &Session) -> Vec<u8> {
    let mut w = Writer::new();
    w.put_u16(session.cipher_suite.code);
    w.put_u8(session.protocol_version.major);
    w.put_u8(session.protocol_version.minor);
    w.put_bytes(&session.master_secret);
    w.put_u8(session.extended_master_secret as u8);
    w.put_u8(session.encrypt_then_mac as u8);
    w.put_u32(session.lifetime_hint.as_secs().min(u32::MAX as u64) as u32);
    {
        let mut name = w.start_u8_length_prefixed();
        if let Some(hostname) = &session.server_hostname {
            name.put_bytes(hostname.as_bytes());
        }
    }
    let body = w.into_bytes();
    let tag = hmac.mac(key, &body);
    let mut out = Vec::with_capacity(body.len() + tag.len());
    out.extend_from_slice(&body);
    out.extend_from_slice(&tag);
    out
}

/// Inverse of [`seal_ticket`]. Returns `None` on any malformed or
/// tampered ticket; the caller treats that identically to a cache miss
/// and falls back to a full handshake.
pub fn open_ticket(hmac: &dyn Hmac, key: &[u8], ticket: &[u8]) -> Option<Session> {
    let tag_len = hmac.mac(key, &[]).len();
    if ticket.len() < tag_len {
        return None;
    }
    let (body, tag) = ticket.split_at(ticket.len() - tag_len);
    let expected = hmac.mac(key, body);
    if expected.ct_eq(tag).unwrap_u8() != 1 {
        return None;
    }
    let mut r = Reader::new(body);
    let suite_code = r.read_u16().ok()?;
    let cipher_suite = suite::lookup(suite_code).ok()?;
    let major = r.read_u8().ok()?;
    let minor = r.read_u8().ok()?;
    let master_secret: [u8; 48] = r.take(48).ok()?.try_into().ok()?;
    let extended_master_secret = r.read_u8().ok()? != 0;
    let encrypt_then_mac = r.read_u8().ok()? != 0;
    let lifetime_hint = Duration::from_secs(r.read_u32().ok()? as u64);
    let hostname_bytes = r.read_vec_u8(0, 255).ok()?;
    let server_hostname = if hostname_bytes.is_empty() {
        None
    } else {
        Some(String::from_utf8(hostname_bytes.to_vec()).ok()?)
    };
    Some(Session {
        id: Vec::new(),
        protocol_version: ProtocolVersion { major, minor },
        cipher_suite,
        master_secret,
        ticket: ticket.to_vec(),
        peer_cert_chain: Vec::new(),
        server_hostname,
        start_time: SystemTime::now(),
        lifetime_hint,
        srtp_profile: None,
        extended_master_secret,
        encrypt_then_mac,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::suite::TLS_RSA_WITH_AES_128_GCM_SHA256;

    fn sample(id: &[u8]) -> Session {
        Session {
            id: id.to_vec(),
            protocol_version: ProtocolVersion::TLS1_2,
            cipher_suite: &TLS_RSA_WITH_AES_128_GCM_SHA256,
            master_secret: [0u8; 48],
            ticket: Vec::new(),
            peer_cert_chain: Vec::new(),
            server_hostname: Some("example.test".to_string()),
            start_time: SystemTime::now(),
            lifetime_hint: Duration::from_secs(7200),
            srtp_profile: None,
            extended_master_secret: true,
            encrypt_then_mac: false,
        }
    }

    #[test]
    fn stores_and_retrieves() {
        let mgr = InMemorySessionManager::new(4);
        mgr.save(sample(b"session-1"));
        assert!(mgr.load_from_session_id(b"session-1").is_some());
        assert!(mgr.load_from_session_id(b"missing").is_none());
    }

    #[test]
    fn evicts_oldest_once_capacity_is_reached() {
        let mgr = InMemorySessionManager::new(2);
        mgr.save(sample(b"a"));
        mgr.save(sample(b"b"));
        mgr.save(sample(b"c"));
        assert!(mgr.load_from_session_id(b"a").is_none());
        assert!(mgr.load_from_session_id(b"b").is_some());
        assert!(mgr.load_from_session_id(b"c").is_some());
    }

    #[test]
    fn remove_drops_entry() {
        let mgr = InMemorySessionManager::new(4);
        mgr.save(sample(b"a"));
        mgr.remove(b"a");
        assert!(mgr.load_from_session_id(b"a").is_none());
    }

    #[test]
    fn remove_all_clears_every_entry() {
        let mgr = InMemorySessionManager::new(4);
        mgr.save(sample(b"a"));
        mgr.save(sample(b"b"));
        mgr.remove_all();
        assert!(mgr.load_from_session_id(b"a").is_none());
        assert!(mgr.load_from_session_id(b"b").is_none());
    }

    #[test]
    fn loads_by_server_hostname() {
        let mgr = InMemorySessionManager::new(4);
        mgr.save(sample(b"a"));
        let found = mgr.load_from_server_info("example.test", 443).unwrap();
        assert_eq!(found.id, b"a");
        assert!(mgr.load_from_server_info("other.test", 443).is_none());
    }

    #[test]
    fn expired_session_is_not_returned() {
        let mgr = InMemorySessionManager::new(4);
        let mut s = sample(b"a");
        s.start_time = SystemTime::now() - Duration::from_secs(10_000);
        s.lifetime_hint = Duration::from_secs(7200);
        mgr.save(s);
        assert!(mgr.load_from_session_id(b"a").is_none());
    }

    #[test]
    fn session_ticket_key_is_stable_across_calls() {
        let mgr = InMemorySessionManager::new(4);
        assert_eq!(mgr.session_ticket_key(), mgr.session_ticket_key());
    }
}
