//! The embedder-facing connection façade: `Client` and
//! `Server`.
//!
//! Both types are pure, synchronous, I/O-free state machines — they never
//! own a socket. `received_data` is handed bytes that
//! arrived on the wire and reacts by calling back into
//! [`crate::callbacks::EndpointCallbacks::emit_data`] with whatever bytes
//! must now be sent in response; `send` does the same for outbound
//! application data: a self-contained, embedder-driven state object rather
//! than a connection that drives its own I/O loop.

use crate::callbacks::{CredentialProvider, EndpointCallbacks};
use crate::crypto::CryptoProvider;
use crate::error::{Error, Result};
use crate::extensions::{self, Extension};
use crate::handshake::client::ClientDriver;
use crate::handshake::key_schedule;
use crate::handshake::message::*;
use crate::handshake::server::ServerDriver;
use crate::handshake::state::{ClientState, ServerState};
use crate::handshake::transcript::Transcript;
use crate::policy::Policy;
use crate::record::cipher::CipherState;
use crate::record::dtls::{FragmentReassembler, ReplayWindow, RetransmitTimer, TickOutcome};
use crate::record::framing::{self, HandshakeHeader};
use crate::record::{self, ContentType};
use crate::session::{Session, SessionManager};
use crate::side::Side;
use crate::suite::KeyExchangeMethod;
use crate::version::ProtocolVersion;
use std::time::Duration;
use subtle::ConstantTimeEq;
use tls_wire::{Alert, AlertDescription, AlertLevel, Reader, Writer};

/// Let the embedder add extensions to an outbound `ClientHello`/`ServerHello`
/// via [`crate::callbacks::EndpointCallbacks::modify_extensions`], then
/// enforce "replace, not duplicate": if the callback pushed an
/// extension whose type code was already present, the callback's entry wins
/// and the earlier one is dropped.
fn apply_extension_overrides(exts: &mut Vec<Extension>, callbacks: &mut dyn EndpointCallbacks, side: Side) {
    callbacks.modify_extensions(exts, side);
    let mut seen = std::collections::HashSet::new();
    let mut deduped = Vec::with_capacity(exts.len());
    for ext in exts.drain(..).rev() {
        if seen.insert(ext.type_code()) {
            deduped.push(ext);
        }
    }
    deduped.reverse();
    *exts = deduped;
}

/// Collaborators every connection needs but doesn't own: borrowed
/// rather than held by `Arc`, so the embedder keeps full control of their
/// lifetime and can mutate its own state from inside a callback.
pub struct Collaborators<'a> {
    pub callbacks: &'a mut dyn EndpointCallbacks,
    pub credentials: &'a dyn CredentialProvider,
    pub crypto: &'a dyn CryptoProvider,
    pub session_manager: Option<&'a dyn SessionManager>,
}

struct RecordState {
    read: CipherState,
    write: CipherState,
    version: ProtocolVersion,
    datagram: bool,
    /// Per-direction record sequence number, reset to zero whenever a new
    /// [`CipherState`] is installed (a `ChangeCipherSpec` epoch boundary).
    /// TLS runs one counter across every content type in a direction, not
    /// one per content type, so every record this endpoint emits or
    /// consumes draws from the same counter. For DTLS this is the
    /// per-epoch sequence number; `read_epoch`/`write_epoch` carry the
    /// epoch half of the `(epoch, sequence_number)` pair.
    write_seq: u64,
    read_seq: u64,
    read_epoch: u16,
    write_epoch: u16,
    /// The anti-replay window for the current read epoch (RFC 6347
    /// §4.1.2.6). Unused outside DTLS.
    read_replay: ReplayWindow,
    /// The previous read epoch's cipher and window, retained briefly so a
    /// reordered record from just before the last `ChangeCipherSpec` still
    /// authenticates instead of being dropped.
    prev_epoch: Option<(u16, CipherState, ReplayWindow)>,
}

impl RecordState {
    fn initial(datagram: bool) -> Self {
        RecordState {
            read: CipherState::null(),
            write: CipherState::null(),
            version: if datagram { ProtocolVersion::DTLS1_2 } else { ProtocolVersion::TLS1_2 },
            datagram,
            write_seq: 0,
            read_seq: 0,
            read_epoch: 0,
            write_epoch: 0,
            read_replay: ReplayWindow::new(),
            prev_epoch: None,
        }
    }

    fn next_write_seq(&mut self) -> u64 {
        let s = self.write_seq;
        self.write_seq += 1;
        s
    }

    /// TLS-only: the implicit sequence number for the next record read
    /// under the current read epoch. DTLS records carry their sequence
    /// number explicitly on the wire instead (see [`RecordState::open_dtls`]).
    fn next_read_seq(&mut self) -> u64 {
        let s = self.read_seq;
        self.read_seq += 1;
        s
    }

    fn install_write_cipher(&mut self, cipher: CipherState) {
        self.write = cipher;
        self.write_seq = 0;
        if self.datagram {
            self.write_epoch += 1;
        }
    }

    fn install_read_cipher(&mut self, cipher: CipherState) {
        if self.datagram {
            let old_epoch = self.read_epoch;
            let old_cipher = std::mem::replace(&mut self.read, cipher);
            let old_replay = std::mem::replace(&mut self.read_replay, ReplayWindow::new());
            self.prev_epoch = Some((old_epoch, old_cipher, old_replay));
            self.read_epoch += 1;
        } else {
            self.read = cipher;
        }
        self.read_seq = 0;
    }

    /// Authenticate and decrypt one already-epoch-matched record, checking
    /// and updating the anti-replay window for that epoch. Returns `Ok(None)`
    /// for a record that should be silently dropped per RFC 6347 §4.1.2.7
    /// (a duplicate, too old, from an epoch this endpoint no longer
    /// recognizes, or one that fails to authenticate) rather than failing
    /// the whole connection the way a bad TLS record does.
    fn open_dtls(&mut self, content_type: ContentType, version: ProtocolVersion, epoch: u16, seq: u64, payload: &[u8]) -> Option<Vec<u8>> {
        if epoch == self.read_epoch {
            if !self.read_replay.is_fresh(seq) {
                return None;
            }
            let plaintext = self.read.open(content_type, version, seq, payload).ok()?;
            self.read_replay.accept(seq);
            Some(plaintext)
        } else if let Some((prev_epoch, cipher, replay)) = &mut self.prev_epoch {
            if epoch != *prev_epoch || !replay.is_fresh(seq) {
                return None;
            }
            let plaintext = cipher.open(content_type, version, seq, payload).ok()?;
            replay.accept(seq);
            Some(plaintext)
        } else {
            None
        }
    }
}

/// DTLS-only flight retransmission bookkeeping: the raw
/// wire bytes sent since the last flight boundary, plus the timer deciding
/// when to re-emit them. `None` once the handshake is done (or on the TLS
/// side, always).
struct FlightTracker {
    timer: RetransmitTimer,
    wire_bytes: Vec<u8>,
    elapsed_since_send: Duration,
}

impl FlightTracker {
    fn new(policy: &Policy) -> Self {
        FlightTracker {
            timer: RetransmitTimer::new(
                Duration::from_millis(policy.dtls_initial_timeout_millis),
                Duration::from_millis(policy.dtls_max_retransmission_timeout_millis),
                policy.dtls_max_retransmissions,
            ),
            wire_bytes: Vec::new(),
            elapsed_since_send: Duration::ZERO,
        }
    }

    /// Call at the start of a new outbound flight, once the previous one
    /// (if any) has been acknowledged by the peer's next message.
    fn begin_flight(&mut self) {
        self.wire_bytes.clear();
        self.elapsed_since_send = Duration::ZERO;
        self.timer.reset();
    }

    /// Accumulate bytes sent as part of the flight currently awaiting a
    /// response. Alerts and application data are never part of a flight.
    fn record_sent(&mut self, wire: &[u8]) {
        self.wire_bytes.extend_from_slice(wire);
    }

    fn next_timeout(&self) -> Option<Duration> {
        if self.wire_bytes.is_empty() {
            return None;
        }
        Some(self.timer.deadline(Duration::ZERO).saturating_sub(self.elapsed_since_send))
    }

    fn tick(&mut self, elapsed: Duration) -> Result<Option<Vec<u8>>> {
        if self.wire_bytes.is_empty() {
            return Ok(None);
        }
        self.elapsed_since_send += elapsed;
        match self.timer.tick(self.elapsed_since_send) {
            TickOutcome::Idle => Ok(None),
            TickOutcome::Retransmit => {
                self.timer.armed_after_retransmit();
                self.elapsed_since_send = Duration::ZERO;
                Ok(Some(self.wire_bytes.clone()))
            }
            TickOutcome::GiveUp => Err(Error::HandshakeTimeout),
        }
    }
}

fn send_alert(records: &mut RecordState, collab: &mut Collaborators<'_>, alert: Alert) {
    let payload = alert.encode();
    let wire = seal_and_wrap(records, collab.crypto.random_source(), ContentType::Alert, &payload);
    collab.callbacks.emit_data(&wire);
    collab.callbacks.alert(alert);
}

/// Protect `plaintext` under the current write epoch (a no-op when the
/// epoch is still [`crate::record::cipher::CipherMode::Null`]) and frame it
/// as one complete record ready for the wire. Every content type goes
/// through here — `ChangeCipherSpec` is the only one that is ever sent
/// unprotected by construction, since it always precedes the epoch it
/// announces. `rng` supplies the unpredictable explicit IV a CBC suite's
/// write epoch needs (RFC 5246 §6.2.3.2); AEAD/Null epochs ignore it.
fn seal_and_wrap(records: &mut RecordState, rng: &dyn crate::crypto::RandomSource, content_type: ContentType, plaintext: &[u8]) -> Vec<u8> {
    let seq = records.next_write_seq();
    let ciphertext = records.write.seal(content_type, records.version, seq, plaintext, rng);
    let mut w = Writer::new();
    if records.datagram {
        record::write_dtls_header(&mut w, content_type, records.version, records.write_epoch, seq, &ciphertext);
    } else {
        record::write_tls_header(&mut w, content_type, records.version, &ciphertext);
    }
    w.into_bytes()
}

/// Inverse of [`seal_and_wrap`] for TLS: unprotect a record payload under
/// the current read epoch, advancing its sequence counter. DTLS goes
/// through [`RecordState::open_dtls`] instead, since its sequence number
/// comes from the wire rather than an implicit counter.
fn open_sealed(records: &mut RecordState, content_type: ContentType, version: ProtocolVersion, payload: &[u8]) -> Result<Vec<u8>> {
    let seq = records.next_read_seq();
    records.read.open(content_type, version, seq, payload)
}

/// Unprotect one received record, TLS or DTLS. `dtls_epoch_seq` is `Some`
/// for DTLS (the `(epoch, sequence_number)` pair read off the wire header)
/// and `None` for TLS. A bad TLS record is always fatal (`Err`); a bad DTLS
/// record — forged, a duplicate, or outside the epochs this endpoint still
/// recognizes — is silently dropped (`Ok(None)`) per RFC 6347 §4.1.2.7
/// rather than ending the connection, since datagram transport already
/// tolerates lost and reordered traffic.
fn open_record(
    records: &mut RecordState,
    content_type: ContentType,
    version: ProtocolVersion,
    dtls_epoch_seq: Option<(u16, u64)>,
    payload: &[u8],
) -> Result<Option<Vec<u8>>> {
    match dtls_epoch_seq {
        Some((epoch, seq)) => Ok(records.open_dtls(content_type, version, epoch, seq, payload)),
        None => open_sealed(records, content_type, version, payload).map(Some),
    }
}

fn emit_handshake_message(w: &mut Writer, msg_type: HandshakeType, body: &[u8], datagram: bool, message_seq: u16) {
    if datagram {
        framing::write_dtls(w, msg_type, message_seq, body);
    } else {
        framing::write_tls(w, msg_type, body);
    }
}

/// Frame an unprotected record (only ever `ChangeCipherSpec`, which always
/// precedes the epoch it announces). DTLS still needs an explicit
/// epoch/sequence-number pair on the wire even though the payload itself
/// carries no cipher protection.
fn wrap_record(records: &mut RecordState, content_type: ContentType, payload: &[u8]) -> Vec<u8> {
    let mut w = Writer::new();
    if records.datagram {
        let seq = records.next_write_seq();
        record::write_dtls_header(&mut w, content_type, records.version, records.write_epoch, seq, payload);
    } else {
        record::write_tls_header(&mut w, content_type, records.version, payload);
    }
    w.into_bytes()
}

/// The TLS/DTLS client endpoint.
pub struct Client<'a> {
    driver: ClientDriver,
    policy: Policy,
    datagram: bool,
    collab: Collaborators<'a>,
    records: RecordState,
    transcript: Option<Transcript>,
    next_message_seq: u16,
    server_pubkey_for_rsa: Option<Vec<u8>>,
    pending_cookie: Vec<u8>,
    /// SNI value sent in `ClientHello` and used as the hostname argument to
    /// `verify_cert_chain`/as the key for `load_from_server_info`.
    server_hostname: Option<String>,
    /// Opaque ticket from the most recent `NewSessionTicket`, carried into
    /// the next saved [`Session`].
    pending_ticket: Vec<u8>,
    /// `Some` only in DTLS mode, and only while a flight is outstanding.
    flight: Option<FlightTracker>,
    /// The framed `ClientHello` most recently sent, held here until
    /// `ServerHello` fixes the transcript hash algorithm and it can be fed
    /// in retroactively: the transcript starts at `ClientHello`, but
    /// which hash to run isn't known until the server picks a suite.
    /// Overwritten on a HelloVerifyRequest-triggered resend, so only the
    /// cookie-bearing `ClientHello` that's actually used ends up in the
    /// transcript — matching RFC 6347 §4.2.1's exclusion of the first,
    /// rejected attempt.
    pending_client_hello: Vec<u8>,
    /// In-progress DTLS handshake fragment reassembly (RFC 6347 §4.2.3), for
    /// the one message currently being collected: its `message_seq`,
    /// `msg_type`, and the bytes seen so far. `None` in TLS mode, and
    /// between messages in DTLS mode.
    reassembly: Option<(u16, HandshakeType, FragmentReassembler)>,
    /// The `verify_data` of whichever `Finished` message — sent or
    /// received — completed first on this connection, for the `tls-unique`
    /// channel binding (RFC 5929 §3.1). Renegotiation does not overwrite
    /// this: `tls-unique` is always pinned to the initial handshake.
    first_finished_verify_data: Option<Vec<u8>>,
    /// Bytes carried over between [`Client::received_data`] calls when the
    /// caller handed in fewer than one complete TLS record (the normal
    /// case for a TCP-backed embedder, which has no notion of record
    /// boundaries). Always empty in DTLS mode: each call is one datagram.
    recv_buffer: Vec<u8>,
}

impl<'a> Client<'a> {
    pub fn new(policy: Policy, datagram: bool, collab: Collaborators<'a>) -> Self {
        let records = RecordState::initial(datagram);
        let flight = datagram.then(|| FlightTracker::new(&policy));
        Client {
            driver: ClientDriver::new(&policy, datagram),
            policy,
            datagram,
            collab,
            records,
            transcript: None,
            next_message_seq: 0,
            server_pubkey_for_rsa: None,
            pending_cookie: Vec::new(),
            server_hostname: None,
            pending_ticket: Vec::new(),
            flight,
            pending_client_hello: Vec::new(),
            reassembly: None,
            first_finished_verify_data: None,
            recv_buffer: Vec::new(),
        }
    }

    /// The `tls-unique` channel binding value (RFC 5929 §3.1): the
    /// `verify_data` of the first `Finished` message exchanged on this
    /// connection, regardless of which side sent it. `None` before the
    /// initial handshake has exchanged its first `Finished`.
    pub fn channel_binding_tls_unique(&self) -> Option<&[u8]> {
        self.first_finished_verify_data.as_deref()
    }

    fn note_first_finished(&mut self, verify_data: &[u8]) {
        if self.first_finished_verify_data.is_none() {
            self.first_finished_verify_data = Some(verify_data.to_vec());
        }
    }

    /// Start tracking a new outbound flight, discarding whatever the
    /// previous one left behind (the peer's next message is itself the
    /// acknowledgement that ends a flight).
    fn begin_flight(&mut self) {
        if let Some(f) = &mut self.flight {
            f.begin_flight();
        }
    }

    fn record_flight_bytes(&mut self, wire: &[u8]) {
        if let Some(f) = &mut self.flight {
            f.record_sent(wire);
        }
    }

    /// Stop retransmitting: the handshake either finished or the connection
    /// closed, so nothing is awaiting a response anymore.
    fn disarm_flight(&mut self) {
        if let Some(f) = &mut self.flight {
            f.wire_bytes.clear();
        }
    }

    /// How long the embedder should wait before calling [`Client::tick`]
    /// again, or `None` if no DTLS flight is currently outstanding.
    pub fn next_timeout(&self) -> Option<Duration> {
        self.flight.as_ref().and_then(FlightTracker::next_timeout)
    }

    /// Advance the DTLS retransmission clock by `elapsed`, re-emitting the
    /// outstanding flight via
    /// [`crate::callbacks::EndpointCallbacks::emit_data`] if its timer has
    /// expired. A no-op outside DTLS or when no flight is outstanding.
    /// Returns [`Error::HandshakeTimeout`] once the retransmission budget is
    /// exhausted.
    pub fn tick(&mut self, elapsed: Duration) -> Result<()> {
        let Some(f) = &mut self.flight else { return Ok(()) };
        match f.tick(elapsed) {
            Ok(Some(bytes)) => {
                self.collab.callbacks.emit_data(&bytes);
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(e) => {
                self.driver.state = ClientState::Closed;
                Err(e)
            }
        }
    }

    /// Begin the handshake by sending `ClientHello` for `server_hostname`
    /// (sent as a `server_name` extension and used for certificate
    /// verification and session lookup), optionally resuming `resuming`.
    pub fn initiate(&mut self, server_hostname: Option<String>, resuming: Option<Session>) -> Result<()> {
        self.server_hostname = server_hostname;
        self.begin_flight();
        let mut ch = self.driver.build_client_hello(
            &self.policy,
            self.collab.crypto.random_source(),
            resuming,
            self.server_hostname.clone(),
            self.pending_cookie.clone(),
        );
        apply_extension_overrides(&mut ch.extensions, self.collab.callbacks, Side::Client);
        self.send_client_hello(&ch)
    }

    fn send_client_hello(&mut self, ch: &ClientHello) -> Result<()> {
        let mut body = Writer::new();
        ch.write(&mut body, self.datagram);
        let body = body.into_bytes();
        let mut w = Writer::new();
        emit_handshake_message(&mut w, HandshakeType::ClientHello, &body, self.datagram, self.next_message_seq);
        self.next_message_seq += 1;
        let framed = w.into_bytes();
        if let Some(t) = &mut self.transcript {
            t.feed(&framed);
        }
        self.pending_client_hello = framed.clone();
        let record = seal_and_wrap(&mut self.records, self.collab.crypto.random_source(), ContentType::Handshake, &framed);
        self.collab.callbacks.emit_data(&record);
        self.record_flight_bytes(&record);
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.driver.state == ClientState::Active
    }

    pub fn is_closed(&self) -> bool {
        self.driver.state == ClientState::Closed
    }

    /// Start a renegotiation: a second pass through the handshake state
    /// graph over the already-Active connection. The
    /// current epoch stays in force for anything already queued or
    /// received until the rehandshake installs a new one. Fails with
    /// `Error::HandshakeFailure` if `policy.allow_client_initiated_renegotiation`
    /// is unset, or `Error::NotActive` outside `Active`.
    pub fn renegotiate(&mut self, resuming: Option<Session>) -> Result<()> {
        if !self.policy.allow_client_initiated_renegotiation {
            return Err(Error::HandshakeFailure("client-initiated renegotiation disabled by policy"));
        }
        if !self.is_active() {
            return Err(Error::NotActive);
        }
        self.driver = ClientDriver::new(&self.policy, self.datagram);
        self.driver.renegotiating = true;
        self.transcript = None;
        self.server_pubkey_for_rsa = None;
        self.pending_cookie.clear();
        self.begin_flight();
        let mut ch = self.driver.build_client_hello(
            &self.policy,
            self.collab.crypto.random_source(),
            resuming,
            self.server_hostname.clone(),
            Vec::new(),
        );
        apply_extension_overrides(&mut ch.extensions, self.collab.callbacks, Side::Client);
        self.send_client_hello(&ch)
    }

    pub fn application_protocol(&self) -> Option<&[u8]> {
        self.driver.negotiated.as_ref().and_then(|n| n.application_protocol.as_deref())
    }

    pub fn peer_cert_chain(&self) -> &[Vec<u8>] {
        &self.driver.server_cert_chain
    }

    pub fn key_material_export(&self, label: &str, context: Option<&[u8]>, output_len: usize) -> Result<Vec<u8>> {
        let negotiated = self.driver.negotiated.as_ref().ok_or(Error::NotActive)?;
        let ms = self.driver.master_secret.ok_or(Error::NotActive)?;
        let prf = self.collab.crypto.prf(negotiated.suite.prf);
        Ok(key_schedule::export_keying_material(
            prf.as_ref(),
            &ms,
            label,
            &negotiated.client_random,
            &negotiated.server_random,
            context,
            output_len,
        ))
    }

    /// Send application data, fragmenting and protecting it under the
    /// current write epoch.
    pub fn send(&mut self, data: &[u8]) -> Result<()> {
        if !self.is_active() {
            return Err(Error::NotActive);
        }
        send_application_data(&mut self.records, &mut self.collab, self.policy.max_fragment_length, data)
    }

    /// Send a warning-level alert without closing the connection.
    pub fn send_warning_alert(&mut self, description: AlertDescription) {
        send_alert(&mut self.records, &mut self.collab, Alert::warning(description));
    }

    /// Send a fatal alert and transition to `Closed`.
    pub fn send_fatal_alert(&mut self, description: AlertDescription) {
        if self.is_closed() {
            return;
        }
        send_alert(&mut self.records, &mut self.collab, Alert::fatal(description));
        self.driver.state = ClientState::Closed;
    }

    pub fn close(&mut self) {
        if self.is_closed() {
            return;
        }
        let alert = Alert::warning(AlertDescription::CloseNotify);
        send_alert(&mut self.records, &mut self.collab, alert);
        self.driver.state = ClientState::Closed;
    }

    /// Feed freshly received wire bytes through the record layer and
    /// handshake driver. In DTLS mode `data` must be exactly one datagram;
    /// in TLS mode it may be an arbitrary slice of the underlying byte
    /// stream — fewer than one record, exactly one, or several — since a
    /// stream transport has no notion of record boundaries. A trailing
    /// partial record is held in an internal buffer and completed by a
    /// later call rather than rejected. Any error surfaced while
    /// processing is converted into a queued fatal alert (via
    /// [`Error::alert`]) before the connection transitions to `Closed` and
    /// the error is handed back to the caller; a no-op once already
    /// `Closed` (idempotent after the first invocation).
    pub fn received_data(&mut self, data: &[u8]) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }
        match self.received_data_inner(data) {
            Ok(()) => Ok(()),
            Err(e) => Err(self.fail(e)),
        }
    }

    fn received_data_inner(&mut self, data: &[u8]) -> Result<()> {
        if self.datagram {
            let mut r = Reader::new(data);
            while !r.is_empty() {
                let (content_type, version, epoch, seq, payload) = record::read_dtls_record(&mut r)?;
                self.handle_record(content_type, version, Some((epoch, seq)), payload)?;
            }
            return Ok(());
        }
        self.recv_buffer.extend_from_slice(data);
        let mut consumed = 0;
        while let Some(record_len) = record::peek_tls_record_len(&self.recv_buffer[consumed..]) {
            if self.recv_buffer.len() - consumed < record_len {
                break;
            }
            // Copied out of `recv_buffer` so `handle_record`'s `&mut self`
            // doesn't conflict with a `payload` slice borrowed from it.
            let record_bytes = self.recv_buffer[consumed..consumed + record_len].to_vec();
            let mut r = Reader::new(&record_bytes);
            let (content_type, version, payload) = record::read_tls_record(&mut r)?;
            self.handle_record(content_type, version, None, payload)?;
            consumed += record_len;
        }
        self.recv_buffer.drain(..consumed);
        Ok(())
    }

    /// Surface `err` as a fatal alert (if it maps to one) and close the
    /// connection, mirroring [`Client::send_fatal_alert`] but driven by an
    /// internally detected failure rather than an embedder call.
    fn fail(&mut self, err: Error) -> Error {
        log::warn!("client handshake failed, closing: {err}");
        if let Some(alert) = err.alert() {
            if !self.is_closed() {
                send_alert(&mut self.records, &mut self.collab, alert);
            }
        }
        self.driver.state = ClientState::Closed;
        err
    }

    fn handle_record(&mut self, content_type: ContentType, version: ProtocolVersion, dtls_epoch_seq: Option<(u16, u64)>, payload: &[u8]) -> Result<()> {
        match content_type {
            ContentType::ChangeCipherSpec => {
                if payload.is_empty() {
                    return Err(Error::IllegalParameter("empty ChangeCipherSpec record"));
                }
                // The client always installs its read epoch before the
                // peer's ChangeCipherSpec can arrive: at ServerHello for a
                // resumed handshake, or when sending its own Finished for a
                // full one. This record is an announcement, not a trigger.
                Ok(())
            }
            ContentType::Alert => {
                let Some(plaintext) = open_record(&mut self.records, content_type, version, dtls_epoch_seq, payload)? else {
                    return Ok(());
                };
                if plaintext.is_empty() {
                    return Err(Error::IllegalParameter("empty Alert record"));
                }
                let mut ar = Reader::new(&plaintext);
                let level = ar.read_u8()?;
                let description = ar.read_u8()?;
                let level = AlertLevel::try_from(level).map_err(|_| Error::IllegalParameter("unknown alert level"))?;
                let description = AlertDescription::try_from(description).map_err(|_| Error::IllegalParameter("unknown alert description"))?;
                let alert = Alert { level, description };
                self.collab.callbacks.alert(alert);
                if alert.is_fatal() || description == AlertDescription::CloseNotify {
                    self.driver.state = ClientState::Closed;
                }
                Ok(())
            }
            ContentType::Handshake => {
                let Some(plaintext) = open_record(&mut self.records, content_type, version, dtls_epoch_seq, payload)? else {
                    return Ok(());
                };
                self.handle_handshake_payload(version, &plaintext)
            }
            ContentType::ApplicationData => {
                let Some(plaintext) = open_record(&mut self.records, content_type, version, dtls_epoch_seq, payload)? else {
                    return Ok(());
                };
                self.collab.callbacks.record_received(0, &plaintext);
                Ok(())
            }
        }
    }

    fn handle_handshake_payload(&mut self, version: ProtocolVersion, payload: &[u8]) -> Result<()> {
        if payload.is_empty() {
            return Err(Error::IllegalParameter("empty Handshake record"));
        }
        let mut r = Reader::new(payload);
        while !r.is_empty() {
            if !self.datagram {
                let header = framing::read_tls_header(&mut r)?;
                let body = r.take(header.fragment_length as usize)?;
                self.process_handshake_message(version, header, body)?;
                continue;
            }
            let header = framing::read_dtls_header(&mut r)?;
            let fragment = r.take(header.fragment_length as usize)?;
            if header.fragment_offset == 0 && header.fragment_length == header.length {
                // Whole message in one fragment, the common case — no
                // reassembly buffer needed.
                self.process_handshake_message(version, header, fragment)?;
                continue;
            }
            let needs_new_reassembler = match &self.reassembly {
                Some((seq, ty, _)) => *seq != header.message_seq || *ty != header.msg_type,
                None => true,
            };
            if needs_new_reassembler {
                self.reassembly = Some((header.message_seq, header.msg_type, FragmentReassembler::new(header.length)));
            }
            if let Some((_, _, reassembler)) = &mut self.reassembly {
                reassembler.add_fragment(header.fragment_offset, fragment);
            }
            let complete = self.reassembly.as_ref().map_or(false, |(_, _, r)| r.is_complete());
            if complete {
                let (_, _, reassembler) = self.reassembly.take().expect("just checked Some");
                let body = reassembler.into_bytes();
                self.process_handshake_message(version, header, &body)?;
            }
        }
        Ok(())
    }

    fn process_handshake_message(&mut self, version: ProtocolVersion, header: HandshakeHeader, body: &[u8]) -> Result<()> {
        match header.msg_type {
            HandshakeType::HelloRequest => {
                if !self.is_active() {
                    return Err(Error::UnexpectedMessage("HelloRequest before the initial handshake completed"));
                }
                if self.policy.allow_client_initiated_renegotiation {
                    self.renegotiate(None)
                } else {
                    // no_renegotiation is always accepted as an
                    // answer to a HelloRequest — a warning, not a failure.
                    self.send_warning_alert(AlertDescription::NoRenegotiation);
                    Ok(())
                }
            }
            HandshakeType::HelloVerifyRequest => {
                let mut br = Reader::new(body);
                let hvr = HelloVerifyRequest::read(&mut br)?;
                self.pending_cookie = self.driver.on_hello_verify_request(hvr)?;
                self.begin_flight();
                let mut ch = self.driver.build_client_hello(&self.policy.clone(), self.collab.crypto.random_source(), None, self.server_hostname.clone(), self.pending_cookie.clone());
                apply_extension_overrides(&mut ch.extensions, self.collab.callbacks, Side::Client);
                self.send_client_hello(&ch)
            }
            HandshakeType::ServerHello => {
                let mut br = Reader::new(body);
                let sh = ServerHello::read(&mut br)?;
                self.collab.callbacks.examine_extensions(&sh.extensions, Side::Server);
                let acceptable = self.policy.effective_cipher_suites();
                self.driver.on_server_hello(sh, &acceptable)?;
                let negotiated = self.driver.negotiated.as_ref().expect("just negotiated");
                let hash = self.collab.crypto.hash(negotiated.suite.prf);
                let mut transcript = Transcript::new(&[hash.as_ref()]);
                transcript.feed(&std::mem::take(&mut self.pending_client_hello));
                self.transcript = Some(transcript);
                self.feed_transcript(version, header, body);
                if self.driver.is_resuming() {
                    // Abbreviated handshake (RFC 5246 §7.3): the server's
                    // ChangeCipherSpec/Finished come next, with no
                    // Certificate/KeyExchange flight in between, so the read
                    // epoch must be ready before they arrive.
                    let suite = self.driver.negotiated.as_ref().expect("just negotiated").suite;
                    let kb = self.expand_current_key_block();
                    self.records.install_read_cipher(build_cipher_state(self.collab.crypto, suite, &kb, false));
                }
                Ok(())
            }
            HandshakeType::Certificate => {
                self.feed_transcript(version, header, body);
                let mut br = Reader::new(body);
                let chain = CertificateChain::read(&mut br)?;
                self.server_pubkey_for_rsa = chain.certs.first().cloned();
                self.driver.on_certificate(chain.clone())?;
                self.collab.callbacks.verify_cert_chain(&chain.certs, &[], self.server_hostname.as_deref())
            }
            HandshakeType::ServerKeyExchange => {
                self.feed_transcript(version, header, body);
                let negotiated = self.driver.negotiated.as_ref().expect("suite negotiated");
                if !negotiated.suite.kex.is_ephemeral() {
                    return Err(Error::UnexpectedMessage("ServerKeyExchange without an ephemeral suite"));
                }
                let mut br = Reader::new(body);
                let ske = ServerKeyExchangeEcdhe::read(&mut br)?;
                let mut signed = Vec::with_capacity(64 + ske.public_key.len());
                signed.extend_from_slice(&negotiated.client_random);
                signed.extend_from_slice(&negotiated.server_random);
                signed.extend_from_slice(&ske.public_key);
                let verifier = self.collab.callbacks.tls_verify_message(self.server_pubkey_for_rsa.as_deref().unwrap_or(&[]))?;
                let group = crate::suite::NamedGroup::from_code(ske.named_group)
                    .ok_or(Error::IllegalParameter("unsupported named group"))?;
                let (secret, our_public) = self.collab.callbacks.tls_ephemeral_key_agreement(group)?;
                self.driver.store_ephemeral_secret(secret);
                self.driver.store_own_ephemeral_public(our_public);
                self.driver.on_server_key_exchange_ecdhe(ske, &signed, verifier.as_ref())?;
                Ok(())
            }
            HandshakeType::CertificateRequest => {
                self.feed_transcript(version, header, body);
                let mut br = Reader::new(body);
                let _cr = CertificateRequest::read(&mut br)?;
                self.driver.certificate_requested = true;
                self.driver.state = ClientState::ReceivedCertificateRequest;
                Ok(())
            }
            HandshakeType::ServerHelloDone => {
                self.feed_transcript(version, header, body);
                self.driver.expect_server_hello_done()?;
                self.respond_to_server_hello_done(version)
            }
            HandshakeType::NewSessionTicket => {
                self.feed_transcript(version, header, body);
                let mut br = Reader::new(body);
                let ticket = NewSessionTicket::read(&mut br)?;
                self.pending_ticket = ticket.ticket;
                Ok(())
            }
            HandshakeType::Finished => {
                let negotiated = self.driver.negotiated.as_ref().expect("suite negotiated");
                let prf = self.collab.crypto.prf(negotiated.suite.prf);
                let transcript_hash = self.transcript.as_ref().expect("transcript started at ServerHello").current();
                let mut br = Reader::new(body);
                let hash_len = transcript_hash.len();
                let _ = hash_len;
                let finished = Finished::read(&mut br, body.len())?;
                self.driver.verify_server_finished(prf.as_ref(), &transcript_hash, &finished.verify_data)?;
                self.note_first_finished(&finished.verify_data);
                self.feed_transcript(version, header, body);
                if self.driver.is_resuming() {
                    self.send_resumed_change_cipher_spec_and_finished(version)?;
                }
                self.disarm_flight();
                let session = self.current_session();
                if self.collab.callbacks.session_established(&session) {
                    if let Some(mgr) = self.collab.session_manager {
                        mgr.save(session);
                    }
                }
                Ok(())
            }
            other => Err(Error::UnexpectedMessage(handshake_type_name(other))),
        }
    }

    fn feed_transcript(&mut self, _version: ProtocolVersion, header: HandshakeHeader, body: &[u8]) {
        if let Some(t) = &mut self.transcript {
            let mut w = Writer::new();
            emit_handshake_message(&mut w, header.msg_type, body, self.datagram, header.message_seq);
            t.feed(&w.into_bytes());
        }
    }

    fn respond_to_server_hello_done(&mut self, version: ProtocolVersion) -> Result<()> {
        self.begin_flight();
        let client_cert_chain = if self.driver.certificate_requested {
            let accepted = &[crate::callbacks::KeyType::Rsa, crate::callbacks::KeyType::Ecdsa];
            let chain = self
                .collab
                .credentials
                .find_cert_chain(accepted, &[], crate::callbacks::CertificateType::X509, "")
                .unwrap_or_default();
            let cc = CertificateChain { certs: chain.clone() };
            let mut body = Writer::new();
            cc.write(&mut body);
            self.send_handshake(version, HandshakeType::Certificate, &body.into_bytes())?;
            Some(chain)
        } else {
            None
        };

        let negotiated = self.driver.negotiated.as_ref().expect("negotiated by ServerHelloDone");
        let pre_master_secret = match negotiated.suite.kex {
            KeyExchangeMethod::Rsa => {
                let pms = {
                    let mut pms = vec![0u8; 48];
                    pms[0] = self.policy.max_version.major;
                    pms[1] = self.policy.max_version.minor;
                    self.collab.crypto.random_source().fill(&mut pms[2..]);
                    pms
                };
                let encrypted = self
                    .collab
                    .crypto
                    .rsa_encrypt_pms(self.server_pubkey_for_rsa.as_deref().unwrap_or(&[]), &pms)?;
                self.send_handshake(version, HandshakeType::ClientKeyExchange, &{
                    let mut w = Writer::new();
                    ClientKeyExchange::EncryptedPreMasterSecret(encrypted).write(&mut w);
                    w.into_bytes()
                })?;
                pms
            }
            _ => {
                let secret = self.driver.take_ephemeral_secret().ok_or(Error::InternalError("ephemeral secret missing"))?;
                let server_public = self
                    .driver
                    .take_server_public_key()
                    .ok_or(Error::InternalError("server's ephemeral public key missing"))?;
                let client_public = self.driver.take_own_ephemeral_public().unwrap_or_default();
                self.send_handshake(version, HandshakeType::ClientKeyExchange, &{
                    let mut w = Writer::new();
                    ClientKeyExchange::ClientDiffieHellmanPublic(client_public).write(&mut w);
                    w.into_bytes()
                })?;
                secret.agree(&server_public)?
            }
        };

        if let Some(chain) = client_cert_chain.filter(|c| !c.is_empty()) {
            let transcript_hash = self.transcript.as_ref().expect("transcript present").current();
            let signer = self.collab.callbacks.tls_sign_message(&chain[0])?;
            let signature = signer.sign(&transcript_hash)?;
            let cv = CertificateVerify {
                signature_scheme: crate::suite::SignatureScheme::ECDSA_SECP256R1_SHA256,
                signature,
            };
            let mut body = Writer::new();
            cv.write(&mut body);
            self.send_handshake(version, HandshakeType::CertificateVerify, &body.into_bytes())?;
        }

        self.driver.finish_key_exchange(
            self.collab.crypto.prf(negotiated.suite.prf).as_ref(),
            &pre_master_secret,
            self.transcript.as_ref().map(|t| t.current()).as_deref(),
        );
        self.send_change_cipher_spec_and_finished(version)
    }

    fn send_handshake(&mut self, version: ProtocolVersion, msg_type: HandshakeType, body: &[u8]) -> Result<()> {
        let mut w = Writer::new();
        emit_handshake_message(&mut w, msg_type, body, self.datagram, self.next_message_seq);
        self.next_message_seq += 1;
        let framed = w.into_bytes();
        if let Some(t) = &mut self.transcript {
            t.feed(&framed);
        }
        let record = seal_and_wrap(&mut self.records, self.collab.crypto.random_source(), ContentType::Handshake, &framed);
        self.collab.callbacks.emit_data(&record);
        self.record_flight_bytes(&record);
        Ok(())
    }

    fn send_change_cipher_spec_and_finished(&mut self, version: ProtocolVersion) -> Result<()> {
        let ccs = wrap_record(&mut self.records, ContentType::ChangeCipherSpec, &[1]);
        self.collab.callbacks.emit_data(&ccs);
        self.record_flight_bytes(&ccs);

        let negotiated = self.driver.negotiated.as_ref().expect("negotiated before Finished");
        let layout = self.driver.key_block_layout();
        let ms = self.driver.master_secret.expect("master secret set");
        let kb = key_schedule::expand_key_block(
            self.collab.crypto.prf(negotiated.suite.prf).as_ref(),
            &ms,
            &negotiated.client_random,
            &negotiated.server_random,
            &layout,
        );
        self.records.install_write_cipher(build_cipher_state(self.collab.crypto, negotiated.suite, &kb, true));

        let transcript_hash = self.transcript.as_ref().expect("transcript present").current();
        let verify_data = key_schedule::verify_data(
            self.collab.crypto.prf(negotiated.suite.prf).as_ref(),
            &ms,
            key_schedule::FinishedSender::Client,
            &transcript_hash,
        );
        self.note_first_finished(&verify_data);
        self.send_handshake(version, HandshakeType::Finished, &verify_data)?;
        self.records.install_read_cipher(build_cipher_state(self.collab.crypto, negotiated.suite, &kb, false));
        Ok(())
    }

    fn current_session(&self) -> Session {
        let negotiated = self.driver.negotiated.as_ref().expect("negotiated by session_established");
        Session {
            id: negotiated.session_id.clone(),
            protocol_version: negotiated.version,
            cipher_suite: negotiated.suite,
            master_secret: self.driver.master_secret.unwrap_or([0u8; 48]),
            ticket: self.pending_ticket.clone(),
            peer_cert_chain: self.driver.server_cert_chain.clone(),
            server_hostname: self.server_hostname.clone(),
            start_time: std::time::SystemTime::now(),
            lifetime_hint: std::time::Duration::from_secs(self.policy.session_ticket_lifetime_hint as u64),
            srtp_profile: negotiated.srtp_profile,
            extended_master_secret: negotiated.extended_master_secret,
            encrypt_then_mac: negotiated.encrypt_then_mac,
        }
    }

    /// The key block for the currently negotiated suite/master secret,
    /// derived fresh each time it's needed rather than cached (RFC 5246
    /// §6.3: cheap to recompute, and the master secret is what's carried
    /// across a resumption, not the expanded block).
    fn expand_current_key_block(&self) -> key_schedule::KeyBlock {
        let negotiated = self.driver.negotiated.as_ref().expect("negotiated");
        let ms = self.driver.master_secret.expect("master secret set");
        let layout = self.driver.key_block_layout();
        key_schedule::expand_key_block(
            self.collab.crypto.prf(negotiated.suite.prf).as_ref(),
            &ms,
            &negotiated.client_random,
            &negotiated.server_random,
            &layout,
        )
    }

    /// The client's half of an abbreviated (session-resumption) handshake:
    /// sent once the server's Finished has verified, after the read epoch
    /// was already switched over in the `ServerHello` handler.
    fn send_resumed_change_cipher_spec_and_finished(&mut self, version: ProtocolVersion) -> Result<()> {
        let suite = self.driver.negotiated.as_ref().expect("negotiated").suite;
        let kb = self.expand_current_key_block();
        let ccs = wrap_record(&mut self.records, ContentType::ChangeCipherSpec, &[1]);
        self.collab.callbacks.emit_data(&ccs);
        self.record_flight_bytes(&ccs);
        self.records.install_write_cipher(build_cipher_state(self.collab.crypto, suite, &kb, true));

        let ms = self.driver.master_secret.expect("master secret set");
        let transcript_hash = self.transcript.as_ref().expect("transcript present").current();
        let verify_data = key_schedule::verify_data(
            self.collab.crypto.prf(suite.prf).as_ref(),
            &ms,
            key_schedule::FinishedSender::Client,
            &transcript_hash,
        );
        self.note_first_finished(&verify_data);
        self.send_handshake(version, HandshakeType::Finished, &verify_data)
    }
}

fn build_cipher_state(
    crypto: &dyn CryptoProvider,
    suite: &'static crate::suite::CipherSuite,
    kb: &key_schedule::KeyBlock,
    for_client_write: bool,
) -> CipherState {
    let (enc_key, mac_key, iv) = if for_client_write {
        (&kb.client_write_key, &kb.client_write_mac_key, &kb.client_write_iv)
    } else {
        (&kb.server_write_key, &kb.server_write_mac_key, &kb.server_write_iv)
    };
    if suite.bulk.is_aead() {
        CipherState::aead(crypto.aead(&suite.bulk), enc_key.clone(), iv.clone())
    } else {
        CipherState::cbc(
            crypto.block_cipher_cbc(&suite.bulk),
            crypto.hmac(suite.prf),
            enc_key.clone(),
            mac_key.clone(),
            true,
        )
    }
}

fn send_application_data(
    records: &mut RecordState,
    collab: &mut Collaborators<'_>,
    max_fragment_length: usize,
    data: &[u8],
) -> Result<()> {
    for fragment in record::fragment(ContentType::ApplicationData, records.version, data, max_fragment_length) {
        let wire = seal_and_wrap(records, collab.crypto.random_source(), ContentType::ApplicationData, &fragment.payload);
        collab.callbacks.emit_data(&wire);
    }
    Ok(())
}

fn handshake_type_name(t: HandshakeType) -> &'static str {
    match t {
        HandshakeType::HelloRequest => "HelloRequest",
        HandshakeType::ClientHello => "ClientHello",
        HandshakeType::ServerHello => "ServerHello",
        HandshakeType::HelloVerifyRequest => "HelloVerifyRequest",
        HandshakeType::NewSessionTicket => "NewSessionTicket",
        HandshakeType::CertificateStatus => "CertificateStatus",
        HandshakeType::Certificate => "Certificate",
        HandshakeType::ServerKeyExchange => "ServerKeyExchange",
        HandshakeType::CertificateRequest => "CertificateRequest",
        HandshakeType::ServerHelloDone => "ServerHelloDone",
        HandshakeType::CertificateVerify => "CertificateVerify",
        HandshakeType::ClientKeyExchange => "ClientKeyExchange",
        HandshakeType::Finished => "Finished",
    }
}

/// The TLS/DTLS server endpoint.
pub struct Server<'a> {
    driver: ServerDriver,
    policy: Policy,
    datagram: bool,
    collab: Collaborators<'a>,
    records: RecordState,
    transcript: Option<Transcript>,
    next_message_seq: u16,
    client_random: [u8; 32],
    /// `server_name` value the client offered in its `ClientHello`, if any.
    client_hostname: Option<String>,
    /// Set once this negotiation's `ClientKeyExchange` (and, if requested,
    /// `CertificateVerify`) has produced a fresh master secret, cleared
    /// once the matching `ChangeCipherSpec` installs the new read epoch.
    /// `records.read.is_protected()` can't serve as that signal on its own
    /// once renegotiation is in play — the *previous* epoch is already
    /// protected by the time a rehandshake's `ChangeCipherSpec` arrives.
    awaiting_client_change_cipher_spec: bool,
    /// `Some` only in DTLS mode, and only while a flight is outstanding
    /// (mirrors [`Client::flight`]: the retransmission timer applies to
    /// whichever side most recently sent a flight and is awaiting the
    /// peer's next message, not just the client).
    flight: Option<FlightTracker>,
    /// See [`Client::reassembly`].
    reassembly: Option<(u16, HandshakeType, FragmentReassembler)>,
    /// See [`Client::first_finished_verify_data`].
    first_finished_verify_data: Option<Vec<u8>>,
    /// See [`Client::recv_buffer`].
    recv_buffer: Vec<u8>,
    /// Cookie issued in this server's own `HelloVerifyRequest`, stored so
    /// the retried `ClientHello`'s echoed cookie can be checked against
    /// what was actually handed out rather than just for non-emptiness
    /// (RFC 6347 §4.2.1 anti-DoS address ownership proof).
    dtls_cookie: Option<Vec<u8>>,
}

impl<'a> Server<'a> {
    pub fn new(policy: Policy, datagram: bool, collab: Collaborators<'a>) -> Self {
        let records = RecordState::initial(datagram);
        let flight = datagram.then(|| FlightTracker::new(&policy));
        Server {
            driver: ServerDriver::new(&policy, datagram),
            policy,
            datagram,
            collab,
            records,
            dtls_cookie: None,
            transcript: None,
            next_message_seq: 0,
            client_random: [0u8; 32],
            client_hostname: None,
            awaiting_client_change_cipher_spec: false,
            flight,
            reassembly: None,
            first_finished_verify_data: None,
            recv_buffer: Vec::new(),
        }
    }

    /// See [`Client::channel_binding_tls_unique`].
    pub fn channel_binding_tls_unique(&self) -> Option<&[u8]> {
        self.first_finished_verify_data.as_deref()
    }

    fn note_first_finished(&mut self, verify_data: &[u8]) {
        if self.first_finished_verify_data.is_none() {
            self.first_finished_verify_data = Some(verify_data.to_vec());
        }
    }

    fn begin_flight(&mut self) {
        if let Some(f) = &mut self.flight {
            f.begin_flight();
        }
    }

    fn record_flight_bytes(&mut self, wire: &[u8]) {
        if let Some(f) = &mut self.flight {
            f.record_sent(wire);
        }
    }

    fn disarm_flight(&mut self) {
        if let Some(f) = &mut self.flight {
            f.wire_bytes.clear();
        }
    }

    /// How long the embedder should wait before calling [`Server::tick`]
    /// again, or `None` if no DTLS flight is currently outstanding.
    pub fn next_timeout(&self) -> Option<Duration> {
        self.flight.as_ref().and_then(FlightTracker::next_timeout)
    }

    /// See [`Client::tick`].
    pub fn tick(&mut self, elapsed: Duration) -> Result<()> {
        let Some(f) = &mut self.flight else { return Ok(()) };
        match f.tick(elapsed) {
            Ok(Some(bytes)) => {
                self.collab.callbacks.emit_data(&bytes);
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(e) => {
                self.driver.state = ServerState::Closed;
                Err(e)
            }
        }
    }

    pub fn is_active(&self) -> bool {
        self.driver.state == ServerState::Active
    }

    pub fn is_closed(&self) -> bool {
        self.driver.state == ServerState::Closed
    }

    pub fn application_protocol(&self) -> Option<&[u8]> {
        self.driver.negotiated.as_ref().and_then(|n| n.application_protocol.as_deref())
    }

    pub fn peer_cert_chain(&self) -> &[Vec<u8>] {
        &self.driver.client_cert_chain
    }

    /// Ask the client to renegotiate by sending a `HelloRequest`.
    /// Purely advisory: the client may answer with a fresh
    /// `ClientHello` (handled by the normal `ClientHello` path, which
    /// accepts it from `Active` once this has been sent) or with a
    /// `no_renegotiation` warning alert, which this engine always accepts.
    pub fn request_renegotiation(&mut self) -> Result<()> {
        if !self.policy.allow_server_initiated_renegotiation {
            return Err(Error::HandshakeFailure("server-initiated renegotiation disabled by policy"));
        }
        if !self.is_active() {
            return Err(Error::NotActive);
        }
        let version = self.driver.negotiated.as_ref().map(|n| n.version).unwrap_or(self.records.version);
        self.send_handshake(version, HandshakeType::HelloRequest, &[])
    }

    pub fn send(&mut self, data: &[u8]) -> Result<()> {
        if !self.is_active() {
            return Err(Error::NotActive);
        }
        send_application_data(&mut self.records, &mut self.collab, self.policy.max_fragment_length, data)
    }

    /// Send a warning-level alert without closing the connection.
    pub fn send_warning_alert(&mut self, description: AlertDescription) {
        send_alert(&mut self.records, &mut self.collab, Alert::warning(description));
    }

    /// Send a fatal alert and transition to `Closed`.
    pub fn send_fatal_alert(&mut self, description: AlertDescription) {
        if self.is_closed() {
            return;
        }
        send_alert(&mut self.records, &mut self.collab, Alert::fatal(description));
        self.driver.state = ServerState::Closed;
    }

    pub fn close(&mut self) {
        if self.is_closed() {
            return;
        }
        let alert = Alert::warning(AlertDescription::CloseNotify);
        send_alert(&mut self.records, &mut self.collab, alert);
        self.driver.state = ServerState::Closed;
    }

    /// See [`Client::received_data`] for the error/alert contract.
    pub fn received_data(&mut self, data: &[u8]) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }
        match self.received_data_inner(data) {
            Ok(()) => Ok(()),
            Err(e) => Err(self.fail(e)),
        }
    }

    fn received_data_inner(&mut self, data: &[u8]) -> Result<()> {
        if self.datagram {
            let mut r = Reader::new(data);
            while !r.is_empty() {
                let (content_type, version, epoch, seq, payload) = record::read_dtls_record(&mut r)?;
                self.handle_record(content_type, version, Some((epoch, seq)), payload)?;
            }
            return Ok(());
        }
        self.recv_buffer.extend_from_slice(data);
        let mut consumed = 0;
        while let Some(record_len) = record::peek_tls_record_len(&self.recv_buffer[consumed..]) {
            if self.recv_buffer.len() - consumed < record_len {
                break;
            }
            let record_bytes = self.recv_buffer[consumed..consumed + record_len].to_vec();
            let mut r = Reader::new(&record_bytes);
            let (content_type, version, payload) = record::read_tls_record(&mut r)?;
            self.handle_record(content_type, version, None, payload)?;
            consumed += record_len;
        }
        self.recv_buffer.drain(..consumed);
        Ok(())
    }

    fn fail(&mut self, err: Error) -> Error {
        if let Some(alert) = err.alert() {
            if !self.is_closed() {
                send_alert(&mut self.records, &mut self.collab, alert);
            }
        }
        self.driver.state = ServerState::Closed;
        err
    }

    fn handle_record(&mut self, content_type: ContentType, version: ProtocolVersion, dtls_epoch_seq: Option<(u16, u64)>, payload: &[u8]) -> Result<()> {
        match content_type {
            ContentType::ChangeCipherSpec => {
                if payload.is_empty() {
                    return Err(Error::IllegalParameter("empty ChangeCipherSpec record"));
                }
                // A full (non-resumed) handshake has no separate signal that
                // the client's key exchange flight is over other than this
                // record; the abbreviated-handshake case already installed
                // both epochs back in `send_server_hello_flight`'s resumed
                // branch, so this is a no-op there.
                if self.awaiting_client_change_cipher_spec {
                    let suite = self.driver.negotiated.as_ref().expect("negotiated before ChangeCipherSpec").suite;
                    let kb = self.expand_current_key_block();
                    self.records.install_read_cipher(build_cipher_state(self.collab.crypto, suite, &kb, true));
                    self.awaiting_client_change_cipher_spec = false;
                }
                Ok(())
            }
            ContentType::Alert => {
                let Some(plaintext) = open_record(&mut self.records, content_type, version, dtls_epoch_seq, payload)? else {
                    return Ok(());
                };
                if plaintext.is_empty() {
                    return Err(Error::IllegalParameter("empty Alert record"));
                }
                let mut ar = Reader::new(&plaintext);
                let level = AlertLevel::try_from(ar.read_u8()?).map_err(|_| Error::IllegalParameter("unknown alert level"))?;
                let description = AlertDescription::try_from(ar.read_u8()?).map_err(|_| Error::IllegalParameter("unknown alert description"))?;
                let alert = Alert { level, description };
                self.collab.callbacks.alert(alert);
                if alert.is_fatal() || description == AlertDescription::CloseNotify {
                    self.driver.state = ServerState::Closed;
                }
                Ok(())
            }
            ContentType::Handshake => {
                let Some(plaintext) = open_record(&mut self.records, content_type, version, dtls_epoch_seq, payload)? else {
                    return Ok(());
                };
                self.handle_handshake_payload(version, &plaintext)
            }
            ContentType::ApplicationData => {
                let Some(plaintext) = open_record(&mut self.records, content_type, version, dtls_epoch_seq, payload)? else {
                    return Ok(());
                };
                self.collab.callbacks.record_received(0, &plaintext);
                Ok(())
            }
        }
    }

    fn handle_handshake_payload(&mut self, version: ProtocolVersion, payload: &[u8]) -> Result<()> {
        if payload.is_empty() {
            return Err(Error::IllegalParameter("empty Handshake record"));
        }
        let mut r = Reader::new(payload);
        while !r.is_empty() {
            if !self.datagram {
                let header = framing::read_tls_header(&mut r)?;
                let body = r.take(header.fragment_length as usize)?;
                self.process_handshake_message(version, header, body)?;
                continue;
            }
            let header = framing::read_dtls_header(&mut r)?;
            let fragment = r.take(header.fragment_length as usize)?;
            if header.fragment_offset == 0 && header.fragment_length == header.length {
                // Whole message in one fragment, the common case — no
                // reassembly buffer needed.
                self.process_handshake_message(version, header, fragment)?;
                continue;
            }
            let needs_new_reassembler = match &self.reassembly {
                Some((seq, ty, _)) => *seq != header.message_seq || *ty != header.msg_type,
                None => true,
            };
            if needs_new_reassembler {
                self.reassembly = Some((header.message_seq, header.msg_type, FragmentReassembler::new(header.length)));
            }
            if let Some((_, _, reassembler)) = &mut self.reassembly {
                reassembler.add_fragment(header.fragment_offset, fragment);
            }
            let complete = self.reassembly.as_ref().map_or(false, |(_, _, r)| r.is_complete());
            if complete {
                let (_, _, reassembler) = self.reassembly.take().expect("just checked Some");
                let body = reassembler.into_bytes();
                self.process_handshake_message(version, header, &body)?;
            }
        }
        Ok(())
    }

    fn feed_transcript(&mut self, header: HandshakeHeader, body: &[u8]) {
        if let Some(t) = &mut self.transcript {
            let mut w = Writer::new();
            emit_handshake_message(&mut w, header.msg_type, body, self.datagram, header.message_seq);
            t.feed(&w.into_bytes());
        }
    }

    fn process_handshake_message(&mut self, version: ProtocolVersion, header: HandshakeHeader, body: &[u8]) -> Result<()> {
        match header.msg_type {
            HandshakeType::ClientHello => {
                if self.is_active() && !self.policy.allow_client_initiated_renegotiation {
                    return Err(Error::HandshakeFailure("client-initiated renegotiation disabled by policy"));
                }
                let mut br = Reader::new(body);
                let ch = ClientHello::read(&mut br, self.datagram)?;
                self.collab.callbacks.examine_extensions(&ch.extensions, Side::Client);
                self.client_hostname = extensions::find(&ch.extensions, extensions::ext_type::SERVER_NAME).and_then(|e| match e {
                    extensions::Extension::ServerName(name) if !name.is_empty() => Some(name.clone()),
                    _ => None,
                });
                if self.datagram && self.policy.dtls_require_cookie_exchange {
                    if ch.cookie.is_empty() {
                        let cookie = self.collab.crypto.random_source().bytes(16);
                        self.dtls_cookie = Some(cookie.clone());
                        self.driver.require_hello_verify();
                        return self.send_handshake(version, HandshakeType::HelloVerifyRequest, &{
                            let mut w = Writer::new();
                            HelloVerifyRequest {
                                server_version: version,
                                cookie,
                            }
                            .write(&mut w);
                            w.into_bytes()
                        });
                    }
                    let issued = self.dtls_cookie.as_deref().unwrap_or(&[]);
                    if issued.is_empty() || issued.len() != ch.cookie.len() || issued.ct_eq(ch.cookie.as_slice()).unwrap_u8() != 1 {
                        return Err(Error::HandshakeFailure("DTLS cookie did not match the one this server issued"));
                    }
                }
                self.client_random = ch.random.0;
                let resumable = self
                    .collab
                    .session_manager
                    .and_then(|m| m.load_from_session_id(&ch.session_id))
                    .or_else(|| {
                        if !self.policy.session_tickets_enabled {
                            return None;
                        }
                        let ticket = match extensions::find(&ch.extensions, extensions::ext_type::SESSION_TICKET) {
                            Some(extensions::Extension::SessionTicket(t)) if !t.is_empty() => t.as_slice(),
                            _ => return None,
                        };
                        self.collab.callbacks.tls_decrypt_session_ticket(ticket).map(|mut s| {
                            // A ticket carries no session id of its own; adopt
                            // the one the client offered alongside it so the
                            // client's own `sh.session_id == resuming.id` match
                            // (`ClientDriver::on_server_hello`) still succeeds.
                            s.id = ch.session_id.clone();
                            s
                        })
                    });
                let new_session_id = self.collab.crypto.random_source().bytes(32);
                let mut alpn_selector = |offered: &[Vec<u8>]| self.collab.callbacks.server_choose_app_protocol(offered);
                let mut sh = self.driver.on_client_hello(
                    &ch,
                    &self.policy.clone(),
                    resumable,
                    self.collab.crypto.random_source(),
                    new_session_id,
                    &mut alpn_selector,
                )?;
                apply_extension_overrides(&mut sh.extensions, self.collab.callbacks, Side::Server);
                let negotiated = self.driver.negotiated.as_ref().expect("just negotiated");
                let hash = self.collab.crypto.hash(negotiated.suite.prf);
                self.transcript = Some(Transcript::new(&[hash.as_ref()]));
                self.feed_transcript(header, body);
                self.send_server_hello_flight(version, &sh)
            }
            HandshakeType::Certificate => {
                self.feed_transcript(header, body);
                let mut br = Reader::new(body);
                let chain = CertificateChain::read(&mut br)?;
                self.driver.on_client_certificate(chain.clone())?;
                self.collab.callbacks.verify_cert_chain(&chain.certs, &[], None)
            }
            HandshakeType::ClientKeyExchange => {
                if self.policy.client_auth == crate::policy::ClientAuthPolicy::Required
                    && self.driver.client_cert_requested
                    && self.driver.client_cert_chain.is_empty()
                {
                    return Err(Error::HandshakeFailure("client certificate required but none was presented"));
                }
                self.feed_transcript(header, body);
                self.driver.on_client_key_exchange()?;
                self.process_client_key_exchange(body)
            }
            HandshakeType::CertificateVerify => {
                let transcript_hash_before = self.transcript.as_ref().expect("transcript started").current();
                self.feed_transcript(header, body);
                let mut br = Reader::new(body);
                let cv = CertificateVerify::read(&mut br)?;
                let client_cert = self
                    .driver
                    .client_cert_chain
                    .first()
                    .ok_or(Error::BadCertificate("CertificateVerify without a client certificate".into()))?;
                let verifier = self.collab.callbacks.tls_verify_message(client_cert)?;
                verifier
                    .verify(&transcript_hash_before, &cv.signature)
                    .map_err(|_| Error::BadCertificate("CertificateVerify signature invalid".into()))?;
                self.driver.on_certificate_verify()?;
                Ok(())
            }
            HandshakeType::Finished => {
                let negotiated = self.driver.negotiated.as_ref().expect("negotiated before client Finished");
                let prf = self.collab.crypto.prf(negotiated.suite.prf);
                let transcript_hash = self.transcript.as_ref().expect("transcript started").current();
                let mut br = Reader::new(body);
                let finished = Finished::read(&mut br, body.len())?;
                self.driver.verify_client_finished(prf.as_ref(), &transcript_hash, &finished.verify_data)?;
                self.note_first_finished(&finished.verify_data);
                self.feed_transcript(header, body);
                if !self.driver.is_resuming() {
                    self.send_server_finished_after_client(version)?;
                }
                self.disarm_flight();
                let session = self.current_session();
                if self.collab.callbacks.session_established(&session) {
                    if let Some(mgr) = self.collab.session_manager {
                        mgr.save(session);
                    }
                }
                Ok(())
            }
            other => Err(Error::UnexpectedMessage(handshake_type_name(other))),
        }
    }

    fn send_handshake(&mut self, version: ProtocolVersion, msg_type: HandshakeType, body: &[u8]) -> Result<()> {
        let mut w = Writer::new();
        emit_handshake_message(&mut w, msg_type, body, self.datagram, self.next_message_seq);
        self.next_message_seq += 1;
        let framed = w.into_bytes();
        if let Some(t) = &mut self.transcript {
            t.feed(&framed);
        }
        let record = seal_and_wrap(&mut self.records, self.collab.crypto.random_source(), ContentType::Handshake, &framed);
        self.collab.callbacks.emit_data(&record);
        self.record_flight_bytes(&record);
        Ok(())
    }

    fn send_server_hello_flight(&mut self, version: ProtocolVersion, sh: &ServerHello) -> Result<()> {
        self.begin_flight();
        let mut body = Writer::new();
        sh.write(&mut body);
        self.send_handshake(version, HandshakeType::ServerHello, &body.into_bytes())?;

        if self.driver.is_resuming() {
            return self.send_change_cipher_spec_and_finished_resumed(version);
        }

        let accepted_key_types = &[crate::callbacks::KeyType::Rsa, crate::callbacks::KeyType::Ecdsa];
        if let Some(chain) = self
            .collab
            .credentials
            .find_cert_chain(accepted_key_types, &[], crate::callbacks::CertificateType::X509, "")
        {
            let cc = CertificateChain { certs: chain };
            let mut body = Writer::new();
            cc.write(&mut body);
            self.send_handshake(version, HandshakeType::Certificate, &body.into_bytes())?;
        }

        let negotiated = self.driver.negotiated.as_ref().expect("negotiated");
        if negotiated.suite.kex.is_ephemeral() {
            let group = crate::suite::NamedGroup::Secp256r1;
            let (secret, public_share) = self.collab.callbacks.tls_ephemeral_key_agreement(group)?;
            self.driver.store_ephemeral_secret(secret);
            let mut signed = Vec::with_capacity(64);
            signed.extend_from_slice(&negotiated.client_random);
            signed.extend_from_slice(&negotiated.server_random);
            signed.extend_from_slice(&public_share);
            let signer = self.collab.callbacks.tls_sign_message(&[])?;
            let signature = signer.sign(&signed)?;
            let ske = ServerKeyExchangeEcdhe {
                named_group: group.code(),
                public_key: public_share,
                signature_scheme: crate::suite::SignatureScheme::ECDSA_SECP256R1_SHA256,
                signature,
            };
            let mut body = Writer::new();
            ske.write(&mut body);
            self.send_handshake(version, HandshakeType::ServerKeyExchange, &body.into_bytes())?;
        }

        if self.policy.client_auth != crate::policy::ClientAuthPolicy::None {
            let certificate_authorities = self
                .collab
                .credentials
                .trusted_certificate_authorities(crate::callbacks::CertificateType::X509, "");
            let cr = CertificateRequest {
                certificate_types: vec![1, 64],
                signature_schemes: vec![
                    crate::suite::SignatureScheme::ECDSA_SECP256R1_SHA256,
                    crate::suite::SignatureScheme::RSA_PKCS1_SHA256,
                ],
                certificate_authorities,
            };
            let mut body = Writer::new();
            cr.write(&mut body);
            self.send_handshake(version, HandshakeType::CertificateRequest, &body.into_bytes())?;
            self.driver.client_cert_requested = true;
            self.driver.state = crate::handshake::state::ServerState::SentCertificateRequest;
        }

        self.send_handshake(version, HandshakeType::ServerHelloDone, &[])?;
        self.driver.state = crate::handshake::state::ServerState::SentServerHelloDone;
        Ok(())
    }

    fn process_client_key_exchange(&mut self, body: &[u8]) -> Result<()> {
        let negotiated = self.driver.negotiated.as_ref().expect("negotiated before ClientKeyExchange");
        let pre_master_secret = match negotiated.suite.kex {
            KeyExchangeMethod::Rsa => {
                let mut br = Reader::new(body);
                let encrypted = br.read_vec_u16(0, (1 << 16) - 1)?.to_vec();
                let private_key = self
                    .collab
                    .credentials
                    .private_key_for(&[], crate::callbacks::CertificateType::X509, "")
                    .unwrap_or_default();
                self.collab.crypto.rsa_decrypt_pms(&private_key, &encrypted)?
            }
            _ => {
                let mut br = Reader::new(body);
                let client_public = br.read_vec_u16(0, (1 << 16) - 1)?.to_vec();
                let secret = self.driver.take_ephemeral_secret().ok_or(Error::InternalError("ephemeral secret missing"))?;
                secret.agree(&client_public)?
            }
        };
        self.driver.finish_key_exchange(
            self.collab.crypto.prf(negotiated.suite.prf).as_ref(),
            &pre_master_secret,
            self.transcript.as_ref().map(|t| t.current()).as_deref(),
        );
        self.awaiting_client_change_cipher_spec = true;
        Ok(())
    }

    fn send_change_cipher_spec_and_finished_resumed(&mut self, version: ProtocolVersion) -> Result<()> {
        self.install_server_write_keys_and_send_finished(version)
    }

    fn expand_current_key_block(&self) -> key_schedule::KeyBlock {
        let negotiated = self.driver.negotiated.as_ref().expect("negotiated");
        let ms = self.driver.master_secret.expect("master secret set");
        let layout = self.driver.key_block_layout();
        key_schedule::expand_key_block(
            self.collab.crypto.prf(negotiated.suite.prf).as_ref(),
            &ms,
            &negotiated.client_random,
            &negotiated.server_random,
            &layout,
        )
    }

    /// Issues a session ticket (RFC 5077 §3.3) for the session just
    /// negotiated, when a `SessionManager` is attached to hold the ticket
    /// key stable across issuance/decryption. No-op without one; a server
    /// that wants tickets without session-id caching still needs a
    /// `SessionManager` purely as the ticket key's home.
    fn send_new_session_ticket(&mut self, version: ProtocolVersion) -> Result<()> {
        let Some(mgr) = self.collab.session_manager else {
            return Ok(());
        };
        let session = self.current_session();
        let hmac = self.collab.crypto.hmac(crate::suite::PrfHash::Sha256);
        let ticket = crate::session::seal_ticket(hmac.as_ref(), &mgr.session_ticket_key(), &session);
        let nst = NewSessionTicket {
            lifetime_hint: self.policy.session_ticket_lifetime_hint,
            ticket,
        };
        let mut body = Writer::new();
        nst.write(&mut body);
        self.send_handshake(version, HandshakeType::NewSessionTicket, &body.into_bytes())
    }

    /// The server's half of a full handshake's Finished exchange: sent
    /// once the client's Finished has verified. The read epoch was already
    /// switched over when the client's `ChangeCipherSpec` arrived, so only
    /// the write side is installed here.
    fn send_server_finished_after_client(&mut self, version: ProtocolVersion) -> Result<()> {
        self.begin_flight();
        let suite = self.driver.negotiated.as_ref().expect("negotiated").suite;
        if self.policy.session_tickets_enabled {
            self.send_new_session_ticket(version)?;
        }
        let kb = self.expand_current_key_block();
        let ccs = wrap_record(&mut self.records, ContentType::ChangeCipherSpec, &[1]);
        self.collab.callbacks.emit_data(&ccs);
        self.record_flight_bytes(&ccs);
        self.records.install_write_cipher(build_cipher_state(self.collab.crypto, suite, &kb, false));

        let ms = self.driver.master_secret.expect("master secret set");
        let transcript_hash = self.transcript.as_ref().expect("transcript present").current();
        let verify_data = key_schedule::verify_data(
            self.collab.crypto.prf(suite.prf).as_ref(),
            &ms,
            key_schedule::FinishedSender::Server,
            &transcript_hash,
        );
        self.note_first_finished(&verify_data);
        self.send_handshake(version, HandshakeType::Finished, &verify_data)
    }

    fn install_server_write_keys_and_send_finished(&mut self, version: ProtocolVersion) -> Result<()> {
        let negotiated = self.driver.negotiated.as_ref().expect("negotiated");
        let ms = self.driver.master_secret.expect("master secret set");
        let layout = self.driver.key_block_layout();
        let kb = key_schedule::expand_key_block(
            self.collab.crypto.prf(negotiated.suite.prf).as_ref(),
            &ms,
            &negotiated.client_random,
            &negotiated.server_random,
            &layout,
        );
        let ccs = wrap_record(&mut self.records, ContentType::ChangeCipherSpec, &[1]);
        self.collab.callbacks.emit_data(&ccs);
        self.record_flight_bytes(&ccs);
        self.records.install_write_cipher(build_cipher_state(self.collab.crypto, negotiated.suite, &kb, false));

        let transcript_hash = self.transcript.as_ref().expect("transcript present").current();
        let verify_data = key_schedule::verify_data(
            self.collab.crypto.prf(negotiated.suite.prf).as_ref(),
            &ms,
            key_schedule::FinishedSender::Server,
            &transcript_hash,
        );
        self.note_first_finished(&verify_data);
        self.send_handshake(version, HandshakeType::Finished, &verify_data)?;
        self.records.install_read_cipher(build_cipher_state(self.collab.crypto, negotiated.suite, &kb, true));
        Ok(())
    }

    fn current_session(&self) -> Session {
        let negotiated = self.driver.negotiated.as_ref().expect("negotiated by session_established");
        Session {
            id: negotiated.session_id.clone(),
            protocol_version: negotiated.version,
            cipher_suite: negotiated.suite,
            master_secret: self.driver.master_secret.unwrap_or([0u8; 48]),
            ticket: Vec::new(),
            peer_cert_chain: self.driver.client_cert_chain.clone(),
            server_hostname: self.client_hostname.clone(),
            start_time: std::time::SystemTime::now(),
            lifetime_hint: std::time::Duration::from_secs(self.policy.session_ticket_lifetime_hint as u64),
            srtp_profile: negotiated.srtp_profile,
            extended_master_secret: negotiated.extended_master_secret,
            encrypt_then_mac: negotiated.encrypt_then_mac,
        }
    }
}
