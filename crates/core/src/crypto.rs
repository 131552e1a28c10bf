//! Secure channel: end-to-end encryption against a recipient's
//! published public key.
//!
//! Sealed-box construction: an ephemeral X25519 key agreement against
//! the recipient's static key, a BLAKE3 keyed KDF with domain
//! separation, and ChaCha20-Poly1305 with a random nonce. The sealed
//! output is `ephemeral_pub(32) || nonce(12) || ciphertext`.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use rand::RngCore;
use std::sync::Arc;
use x25519_dalek::{EphemeralSecret, PublicKey as X25519PublicKey, SharedSecret, StaticSecret};

use crate::identity::{public_key_from_pem, IdentityError, IdentityManager};
use peernet_common::protocol::MAX_MESSAGE_SIZE;

const KDF_CONTEXT: &[u8] = b"PEERNET-SEALED-V1";

/// Bytes added to a plaintext by sealing: ephemeral key, nonce, AEAD tag
pub const SEALED_OVERHEAD: usize = 32 + 12 + 16;

/// Payload ceiling so a sealed event always fits in one wire frame.
/// JSON renders payload bytes as a numeric array, up to four output
/// bytes per input byte, so the bound is a quarter of the frame limit
/// less headroom for the event envelope.
pub const MAX_SEALED_PAYLOAD: usize = MAX_MESSAGE_SIZE / 4 - 1024;

fn derive_key(shared: &SharedSecret) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new_keyed(shared.as_bytes());
    hasher.update(KDF_CONTEXT);
    *hasher.finalize().as_bytes()
}

/// Encrypt `plaintext` so only the holder of the private key matching
/// `recipient_public_pem` can read it. Pure function of its inputs.
pub fn seal(plaintext: &[u8], recipient_public_pem: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if plaintext.len() > MAX_SEALED_PAYLOAD {
        return Err(CryptoError::PayloadTooLarge(plaintext.len()));
    }

    let recipient =
        public_key_from_pem(recipient_public_pem).map_err(|_| CryptoError::InvalidPublicKey)?;

    // Fresh ephemeral key per message; the secret is consumed by the
    // key agreement and never stored.
    let ephemeral = EphemeralSecret::random_from_rng(rand::thread_rng());
    let ephemeral_pub = X25519PublicKey::from(&ephemeral);
    let shared = ephemeral.diffie_hellman(&recipient);

    let cipher = ChaCha20Poly1305::new(&derive_key(&shared).into());

    let mut nonce_bytes = [0u8; 12];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| CryptoError::EncryptionFailed)?;

    let mut sealed = Vec::with_capacity(32 + 12 + ciphertext.len());
    sealed.extend_from_slice(ephemeral_pub.as_bytes());
    sealed.extend_from_slice(&nonce_bytes);
    sealed.extend_from_slice(&ciphertext);

    Ok(sealed)
}

/// Decrypt a sealed payload with this node's static secret
pub fn open(sealed: &[u8], secret: &StaticSecret) -> Result<Vec<u8>, CryptoError> {
    if sealed.len() < SEALED_OVERHEAD {
        return Err(CryptoError::Truncated(sealed.len()));
    }

    let mut ephemeral_bytes = [0u8; 32];
    ephemeral_bytes.copy_from_slice(&sealed[..32]);
    let ephemeral_pub = X25519PublicKey::from(ephemeral_bytes);

    let shared = secret.diffie_hellman(&ephemeral_pub);
    let cipher = ChaCha20Poly1305::new(&derive_key(&shared).into());

    let nonce = Nonce::from_slice(&sealed[32..44]);

    cipher
        .decrypt(nonce, &sealed[44..])
        .map_err(|_| CryptoError::DecryptionFailed)
}

/// Encrypt/decrypt operations bound to this node's identity keys
#[derive(Clone)]
pub struct SecureChannel {
    identity: Arc<IdentityManager>,
}

impl SecureChannel {
    pub fn new(identity: Arc<IdentityManager>) -> Self {
        Self { identity }
    }

    /// Seal a message for a recipient's published public PEM
    pub fn encrypt(
        &self,
        plaintext: &[u8],
        recipient_public_pem: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        seal(plaintext, recipient_public_pem)
    }

    /// Open a sealed message with this node's private key.
    /// Fails with `NoPrivateKey` before identity bootstrap completes.
    pub async fn decrypt(&self, sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let secret = self.identity.private_key().await.map_err(|e| match e {
            IdentityError::NotLoaded => CryptoError::NoPrivateKey,
            other => CryptoError::Identity(other.to_string()),
        })?;

        open(sealed, &secret)
    }
}

/// Cryptographic errors
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("Decryption failed")]
    DecryptionFailed,

    #[error("Invalid recipient public key")]
    InvalidPublicKey,

    #[error("No private key loaded")]
    NoPrivateKey,

    #[error("Payload too large to seal: {0} bytes (max {MAX_SEALED_PAYLOAD})")]
    PayloadTooLarge(usize),

    #[error("Sealed payload truncated: {0} bytes")]
    Truncated(usize),

    #[error("Identity error: {0}")]
    Identity(String),
}
