//! Authenticated encryption of frame bodies.
//!
//! The handshake performs an X25519 agreement; both sides derive the same
//! session key and wrap every subsequent frame body in ChaCha20-Poly1305.
//! Nonces are a direction tag plus a 64-bit counter, so each direction has
//! its own nonce space and replayed or reordered frames fail to open.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use sha2::{Digest, Sha256};
use x25519_dalek::{PublicKey, StaticSecret};

/// Domain separation for session key derivation.
const KEY_CONTEXT: &[u8] = b"rondo-session-key-v1";

/// Nonce direction tags. The initiator is the connecting peer.
const TAG_INITIATOR: u8 = 0x01;
const TAG_RESPONDER: u8 = 0x02;

/// Envelope failure. Deliberately carries no detail: a failed open is
/// either tampering or desynchronization, and both end the connection.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SealError {
    #[error("encryption failed")]
    Seal,
    #[error("decryption failed")]
    Open,
}

/// One side of an X25519 key agreement.
pub struct KeyExchange {
    secret: StaticSecret,
}

impl KeyExchange {
    /// Generate a fresh ephemeral key pair.
    pub fn new() -> Self {
        Self {
            secret: StaticSecret::random_from_rng(rand::rngs::OsRng),
        }
    }

    /// Public key to send to the other side.
    pub fn public_key(&self) -> [u8; 32] {
        PublicKey::from(&self.secret).to_bytes()
    }

    /// Consume the secret and compute the shared secret.
    pub fn agree(self, peer_public: &[u8; 32]) -> [u8; 32] {
        self.secret
            .diffie_hellman(&PublicKey::from(*peer_public))
            .to_bytes()
    }
}

impl Default for KeyExchange {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-connection sealing state: one cipher, two nonce counters.
pub struct SessionCrypto {
    cipher: ChaCha20Poly1305,
    send_tag: u8,
    recv_tag: u8,
    send_counter: u64,
    recv_counter: u64,
}

impl SessionCrypto {
    /// Derive the session key from a shared secret.
    ///
    /// `initiator` selects which nonce space this side seals into; the two
    /// sides of a connection must pass opposite values.
    pub fn new(shared_secret: &[u8; 32], initiator: bool) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(KEY_CONTEXT);
        hasher.update(shared_secret);
        let key_bytes = hasher.finalize();
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key_bytes));
        let (send_tag, recv_tag) = if initiator {
            (TAG_INITIATOR, TAG_RESPONDER)
        } else {
            (TAG_RESPONDER, TAG_INITIATOR)
        };
        Self {
            cipher,
            send_tag,
            recv_tag,
            send_counter: 0,
            recv_counter: 0,
        }
    }

    fn nonce(tag: u8, counter: u64) -> Nonce {
        let mut bytes = [0u8; 12];
        bytes[0] = tag;
        bytes[4..].copy_from_slice(&counter.to_be_bytes());
        *Nonce::from_slice(&bytes)
    }

    /// Encrypt one frame body, advancing the send counter.
    pub fn seal(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, SealError> {
        let nonce = Self::nonce(self.send_tag, self.send_counter);
        let sealed = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| SealError::Seal)?;
        self.send_counter += 1;
        Ok(sealed)
    }

    /// Decrypt one frame body, advancing the receive counter.
    ///
    /// Any failure leaves the counter untouched, but the connection must
    /// be closed regardless: the stream is no longer trustworthy.
    pub fn open(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, SealError> {
        let nonce = Self::nonce(self.recv_tag, self.recv_counter);
        let plain = self
            .cipher
            .decrypt(&nonce, ciphertext)
            .map_err(|_| SealError::Open)?;
        self.recv_counter += 1;
        Ok(plain)
    }
}
