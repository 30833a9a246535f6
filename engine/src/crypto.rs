//! Trait contracts for the cryptographic primitives the engine relies on as
//! external collaborators.
//!
//! Nothing in this module implements a cipher, a hash, or a signature
//! scheme — the engine links against whatever the embedder supplies. The
//! shape of the split (an abstract base parametrized only by the sizes it
//! needs) is grounded on Botan's `BlockCipher`/`SymmetricAlgorithm`
//! interface (`original_source/src/block/block_cipher.h`: `encrypt`/
//! `decrypt` are pure virtual methods on an object that only knows its own
//! block size) and on the `&'static` algorithm-table pattern used by
//! `SupportedCipherSuite` in the rustls lineage
//! (`examples/other_examples/.../tailhook-rustls__src-suites.rs.rs`).
//!
//! `engine/tests/support` provides one deterministic, NOT cryptographically
//! sound implementation of this surface purely so the state machine and
//! record layer can be exercised end-to-end in tests.

use crate::error::Result;

/// A keyed hash transform (HMAC) plus a matching unkeyed digest, as needed
/// by the PRF (TLS 1.0–1.1's MD5/SHA-1 split, TLS 1.2's single HMAC hash)
/// and by the transcript accumulator.
pub trait Hash: Send + Sync {
    /// Output length in bytes (e.g. 32 for SHA-256).
    fn output_len(&self) -> usize;

    /// A fresh running digest.
    fn start(&self) -> Box<dyn RunningHash>;

    fn digest(&self, data: &[u8]) -> Vec<u8> {
        let mut h = self.start();
        h.update(data);
        h.finish()
    }
}

/// An in-progress digest computation, used for the transcript accumulator
/// which must be forked/cloned before the hash algorithm is fixed.
pub trait RunningHash: Send {
    fn update(&mut self, data: &[u8]);
    fn finish(&self) -> Vec<u8>;
    fn try_clone(&self) -> Box<dyn RunningHash>;
}

/// HMAC over a chosen [`Hash`].
pub trait Hmac: Send + Sync {
    fn mac(&self, key: &[u8], data: &[u8]) -> Vec<u8>;
}

/// The TLS 1.0–1.2 pseudo-random function (Glossary: "PRF").
pub trait Prf: Send + Sync {
    fn prf(&self, secret: &[u8], label: &str, seed: &[u8], output_len: usize) -> Vec<u8>;
}

/// Authenticated encryption with associated data, for the AEAD record
/// modes (GCM, CCM, ChaCha20-Poly1305).
pub trait AeadSeal: Send + Sync {
    fn key_len(&self) -> usize;
    fn nonce_len(&self) -> usize;
    fn tag_len(&self) -> usize;

    fn seal(&self, key: &[u8], nonce: &[u8], aad: &[u8], plaintext: &[u8]) -> Vec<u8>;

    /// Returns `None` on authentication failure; callers must treat that
    /// uniformly with any other decrypt failure (`Error::BadRecordMac`) and
    /// must not leak which step failed.
    fn open(&self, key: &[u8], nonce: &[u8], aad: &[u8], ciphertext: &[u8]) -> Option<Vec<u8>>;
}

/// A block cipher in CBC mode, for the legacy MAC-then-encrypt /
/// encrypt-then-MAC record modes. Mirrors Botan's
/// `BlockCipher::encrypt_n`/`decrypt_n` split at the interface level.
pub trait BlockCipherCbc: Send + Sync {
    fn block_len(&self) -> usize;
    fn key_len(&self) -> usize;

    fn encrypt(&self, key: &[u8], iv: &[u8], plaintext: &[u8]) -> Vec<u8>;
    fn decrypt(&self, key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Vec<u8>;
}

/// An ephemeral key-agreement group (FFDHE or an elliptic curve).
pub trait KeyExchange: Send + Sync {
    /// Generate an ephemeral key pair, returning the encoded public share.
    fn generate(&self, rng: &dyn RandomSource) -> (Box<dyn EphemeralSecret>, Vec<u8>);
}

pub trait EphemeralSecret {
    /// Complete the exchange against the peer's encoded public share,
    /// producing the raw (unhashed) shared secret.
    fn agree(self: Box<Self>, peer_public: &[u8]) -> Result<Vec<u8>>;
}

/// Sign/verify over a transcript hash, for `CertificateVerify` and
/// `ServerKeyExchange` signatures.
pub trait Signer: Send + Sync {
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>>;
}

pub trait Verifier: Send + Sync {
    fn verify(&self, message: &[u8], signature: &[u8]) -> Result<()>;
}

/// Thread-safe source of cryptographically secure random bytes.
pub trait RandomSource: Send + Sync {
    fn fill(&self, out: &mut [u8]);

    fn bytes(&self, len: usize) -> Vec<u8> {
        let mut out = vec![0u8; len];
        self.fill(&mut out);
        out
    }
}

/// The bundle of cryptographic primitives a connection needs for its
/// negotiated cipher suite, resolved once per handshake rather than per
/// operation. An embedder supplies one implementation backed by whatever
/// crypto library it prefers; `engine/tests/support` supplies a
/// deterministic, NOT cryptographically sound implementation purely so the
/// state machine and record layer can be exercised end-to-end.
pub trait CryptoProvider: Send + Sync {
    fn random_source(&self) -> &dyn RandomSource;

    fn hash(&self, prf: crate::suite::PrfHash) -> Box<dyn Hash>;
    fn hmac(&self, prf: crate::suite::PrfHash) -> Box<dyn Hmac>;
    fn prf(&self, prf: crate::suite::PrfHash) -> Box<dyn Prf>;

    fn aead(&self, bulk: &crate::suite::BulkCipher) -> Box<dyn AeadSeal>;
    fn block_cipher_cbc(&self, bulk: &crate::suite::BulkCipher) -> Box<dyn BlockCipherCbc>;
    fn key_exchange(&self, group: crate::suite::NamedGroup) -> Box<dyn KeyExchange>;

    /// RSA PKCS#1 v1.5 encryption of a `PreMasterSecret` under the peer's
    /// public key, for the plain-RSA key-exchange method.
    fn rsa_encrypt_pms(&self, server_public_key: &[u8], pre_master_secret: &[u8]) -> Result<Vec<u8>>;
    /// The server side of the same operation.
    fn rsa_decrypt_pms(&self, private_key: &[u8], encrypted: &[u8]) -> Result<Vec<u8>>;
}

/// X.509 chain validation, OCSP/CRL checking: entirely external.
/// Invoked by the engine only through the `verify_cert_chain` callback,
/// not through this trait directly — `CertVerifier` exists so an
/// embedder can share one implementation across the credential and
/// callback surfaces without the engine caring.
pub trait CertVerifier: Send + Sync {
    fn verify_chain(
        &self,
        chain: &[Vec<u8>],
        ocsp_responses: &[Vec<u8>],
        hostname: Option<&str>,
    ) -> Result<()>;
}
