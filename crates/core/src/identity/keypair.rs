use data_encoding::BASE64;
use rand::rngs::OsRng;
use std::fmt;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};

pub const PUBLIC_KEY_LABEL: &str = "PEERNET PUBLIC KEY";
pub const PRIVATE_KEY_LABEL: &str = "PEERNET PRIVATE KEY";

/// This node's long-lived asymmetric key pair.
///
/// X25519 keys, exchanged between nodes as PEM-armored text; the
/// private PEM only ever travels to the local key store.
#[derive(Clone)]
pub struct KeyPair {
    secret: StaticSecret,
    public: X25519PublicKey,
}

impl KeyPair {
    /// Generate a new random key pair
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = X25519PublicKey::from(&secret);

        Self { secret, public }
    }

    /// Restore a key pair from its persisted private PEM encoding
    pub fn from_private_pem(pem: &[u8]) -> Result<Self, KeyPairError> {
        let bytes = decode_pem(PRIVATE_KEY_LABEL, pem)?;
        let secret = StaticSecret::from(bytes);
        let public = X25519PublicKey::from(&secret);

        Ok(Self { secret, public })
    }

    /// The private half, PEM-armored for persistence
    pub fn private_pem(&self) -> Vec<u8> {
        encode_pem(PRIVATE_KEY_LABEL, &self.secret.to_bytes())
    }

    /// The public half, PEM-armored for publication
    pub fn public_pem(&self) -> Vec<u8> {
        encode_pem(PUBLIC_KEY_LABEL, self.public.as_bytes())
    }

    pub fn secret(&self) -> &StaticSecret {
        &self.secret
    }

    pub fn public_bytes(&self) -> [u8; 32] {
        *self.public.as_bytes()
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &hex::encode(self.public_bytes()))
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

/// Parse a PEM-armored public key
pub fn public_key_from_pem(pem: &[u8]) -> Result<X25519PublicKey, KeyPairError> {
    decode_pem(PUBLIC_KEY_LABEL, pem).map(X25519PublicKey::from)
}

fn encode_pem(label: &str, key: &[u8; 32]) -> Vec<u8> {
    format!(
        "-----BEGIN {label}-----\n{}\n-----END {label}-----\n",
        BASE64.encode(key)
    )
    .into_bytes()
}

fn decode_pem(label: &str, pem: &[u8]) -> Result<[u8; 32], KeyPairError> {
    let text = std::str::from_utf8(pem).map_err(|_| KeyPairError::NotPem)?;

    let begin = format!("-----BEGIN {label}-----");
    let end = format!("-----END {label}-----");

    let mut lines = text.lines();
    if lines.next().map(str::trim) != Some(begin.as_str()) {
        return Err(KeyPairError::WrongLabel {
            expected: label.to_string(),
        });
    }

    let body: String = lines
        .by_ref()
        .take_while(|line| line.trim() != end)
        .map(str::trim)
        .collect();

    let decoded = BASE64
        .decode(body.as_bytes())
        .map_err(|e| KeyPairError::InvalidBase64(e.to_string()))?;

    decoded
        .try_into()
        .map_err(|_| KeyPairError::InvalidKeyLength)
}

/// Errors related to key encoding and decoding
#[derive(Debug, thiserror::Error)]
pub enum KeyPairError {
    #[error("Key material is not PEM text")]
    NotPem,

    #[error("PEM label mismatch: expected {expected}")]
    WrongLabel { expected: String },

    #[error("Invalid base64 in PEM body: {0}")]
    InvalidBase64(String),

    #[error("Invalid key length, expected 32 bytes")]
    InvalidKeyLength,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keypair_generation() {
        let a = KeyPair::generate();
        let b = KeyPair::generate();
        assert_ne!(a.public_bytes(), b.public_bytes());
    }

    #[test]
    fn test_private_pem_roundtrip() {
        let keypair = KeyPair::generate();
        let restored = KeyPair::from_private_pem(&keypair.private_pem()).unwrap();

        assert_eq!(keypair.public_bytes(), restored.public_bytes());
    }

    #[test]
    fn test_public_pem_parses() {
        let keypair = KeyPair::generate();
        let public = public_key_from_pem(&keypair.public_pem()).unwrap();

        assert_eq!(*public.as_bytes(), keypair.public_bytes());
    }

    #[test]
    fn test_label_mismatch_rejected() {
        let keypair = KeyPair::generate();

        // Feeding the public PEM where a private one is expected must fail
        let err = KeyPair::from_private_pem(&keypair.public_pem()).unwrap_err();
        assert!(matches!(err, KeyPairError::WrongLabel { .. }));
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(public_key_from_pem(b"not a pem at all").is_err());
        assert!(public_key_from_pem(&[0xff, 0xfe, 0x00]).is_err());
    }

    #[test]
    fn test_debug_redacts_secret() {
        let keypair = KeyPair::generate();
        let debug = format!("{:?}", keypair);

        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains(&hex::encode(keypair.secret().to_bytes())));
    }
}
