use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;
use x25519_dalek::StaticSecret;

use super::keypair::{KeyPair, KeyPairError};
use peernet_common::Username;

/// Persistent key-value store for key material.
///
/// An external collaborator in the original design; kept behind a trait
/// so tests can run many simulated nodes against in-memory stores.
#[async_trait]
pub trait KeyStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KeyStoreError>;
    async fn set(&self, key: &str, value: &[u8]) -> Result<(), KeyStoreError>;
}

/// Publishes a public key to the rendezvous directory.
/// Implemented by the directory client.
#[async_trait]
pub trait KeyPublisher: Send + Sync {
    async fn publish_public_key(
        &self,
        username: &Username,
        public_key_pem: &[u8],
    ) -> anyhow::Result<()>;
}

/// Key store errors
#[derive(Debug, thiserror::Error)]
pub enum KeyStoreError {
    #[error("Key store backend error: {0}")]
    Backend(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// In-memory key store for tests and ephemeral nodes
#[derive(Default)]
pub struct MemoryKeyStore {
    entries: std::sync::Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyStore for MemoryKeyStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KeyStoreError> {
        Ok(self.entries.lock().expect("key store lock").get(key).cloned())
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<(), KeyStoreError> {
        self.entries
            .lock()
            .expect("key store lock")
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }
}

/// File-backed key store, one file per slot under a data directory
pub struct FileKeyStore {
    dir: PathBuf,
}

impl FileKeyStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }
}

#[async_trait]
impl KeyStore for FileKeyStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KeyStoreError> {
        match tokio::fs::read(self.path_for(key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<(), KeyStoreError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(self.path_for(key), value).await?;
        Ok(())
    }
}

fn private_key_slot(username: &Username) -> String {
    format!("{}.private.pem", username)
}

fn public_key_slot(username: &Username) -> String {
    format!("{}.public.pem", username)
}

/// Owns this node's key pair: bootstraps it on first use (generate,
/// publish, persist) or restores it from the key store.
pub struct IdentityManager {
    store: Arc<dyn KeyStore>,
    state: RwLock<Option<KeyPair>>,
}

impl IdentityManager {
    pub fn new(store: Arc<dyn KeyStore>) -> Self {
        Self {
            store,
            state: RwLock::new(None),
        }
    }

    /// Load this node's key pair, generating and publishing one if the
    /// store holds no private key for `username`.
    ///
    /// Must complete before any encrypt/decrypt call; idempotent once
    /// keys are loaded. The public PEM is published exactly once, on
    /// first generation.
    pub async fn ensure_loaded(
        &self,
        username: &Username,
        publisher: &dyn KeyPublisher,
    ) -> Result<(), IdentityError> {
        if self.state.read().await.is_some() {
            return Ok(());
        }

        let private_slot = private_key_slot(username);

        let keypair = match self.store.get(&private_slot).await? {
            Some(pem) => {
                let keypair = KeyPair::from_private_pem(&pem)?;
                info!("Loaded persisted identity key for {}", username);
                keypair
            }
            None => {
                let keypair = KeyPair::generate();

                publisher
                    .publish_public_key(username, &keypair.public_pem())
                    .await
                    .map_err(|e| IdentityError::PublishFailed(e.to_string()))?;

                self.store.set(&private_slot, &keypair.private_pem()).await?;
                self.store
                    .set(&public_key_slot(username), &keypair.public_pem())
                    .await?;

                info!("Generated and published identity key for {}", username);
                keypair
            }
        };

        *self.state.write().await = Some(keypair);
        Ok(())
    }

    pub async fn is_loaded(&self) -> bool {
        self.state.read().await.is_some()
    }

    /// This node's private key; fails before `ensure_loaded` completes
    pub async fn private_key(&self) -> Result<StaticSecret, IdentityError> {
        self.state
            .read()
            .await
            .as_ref()
            .map(|kp| kp.secret().clone())
            .ok_or(IdentityError::NotLoaded)
    }

    /// This node's public PEM; fails before `ensure_loaded` completes
    pub async fn public_key_pem(&self) -> Result<Vec<u8>, IdentityError> {
        self.state
            .read()
            .await
            .as_ref()
            .map(|kp| kp.public_pem())
            .ok_or(IdentityError::NotLoaded)
    }
}

/// Identity bootstrap errors
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("Identity keys not loaded yet")]
    NotLoaded,

    #[error("Failed to publish public key: {0}")]
    PublishFailed(String),

    #[error(transparent)]
    Store(#[from] KeyStoreError),

    #[error(transparent)]
    Key(#[from] KeyPairError),
}
