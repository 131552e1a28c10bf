//! Outbound event dispatch: resolve the destination user, optionally
//! seal the payload for them, and emit one event on the peer link.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::warn;

use crate::crypto::{CryptoError, SecureChannel};
use crate::directory::{DirectoryClient, DirectoryError, KeyLookup};
use crate::protocol::Event;
use crate::registry::{ConnectionRegistry, RegistryError};
use peernet_common::Username;

/// Sends named events to users, by username
pub struct Dispatcher {
    directory: Arc<DirectoryClient>,
    registry: Arc<ConnectionRegistry>,
    secure: SecureChannel,
    peer_port: u16,
}

impl Dispatcher {
    pub fn new(
        directory: Arc<DirectoryClient>,
        registry: Arc<ConnectionRegistry>,
        secure: SecureChannel,
        peer_port: u16,
    ) -> Self {
        Self {
            directory,
            registry,
            secure,
            peer_port,
        }
    }

    /// Deliver one event to `dest`.
    ///
    /// Encrypted sends resolve both address and key before anything
    /// goes on the wire; a recipient with no published key aborts the
    /// send with nothing emitted.
    pub async fn try_send(
        &self,
        event_name: &str,
        dest: &Username,
        encrypt: bool,
        payload: &[u8],
    ) -> Result<(), SendError> {
        let (ip, event) = if encrypt {
            let (ip, key) = self.directory.resolve_ip_and_key(dest).await?;

            let pem = match key {
                KeyLookup::Found(pem) => pem,
                KeyLookup::Missing => return Err(SendError::NoPublicKey(dest.clone())),
            };

            let sealed = self.secure.encrypt(payload, &pem)?;
            (ip, Event::signed_placeholder(event_name, sealed))
        } else {
            let ip = self.directory.resolve_ip(dest).await?;
            (ip, Event::new(event_name, payload.to_vec()))
        };

        let remote = SocketAddr::new(ip, self.peer_port);
        let link = self.registry.outbound(remote).await?;
        link.emit(&event).await?;

        Ok(())
    }

    /// Fire-and-forget delivery; failures are logged, not surfaced
    pub async fn send(&self, event_name: &str, dest: &Username, encrypt: bool, payload: &[u8]) {
        if let Err(e) = self.try_send(event_name, dest, encrypt, payload).await {
            warn!("Failed to send {} to {}: {}", event_name, dest, e);
        }
    }
}

/// Dispatch errors
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("{0} has not published a public key")]
    NoPublicKey(Username),

    #[error(transparent)]
    Directory(#[from] DirectoryError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Flatten a dispatch failure into the shared error type for embedders
/// that do not want to match on per-module enums.
impl From<SendError> for peernet_common::PeerNetError {
    fn from(e: SendError) -> Self {
        use peernet_common::PeerNetError;

        match e {
            SendError::NoPublicKey(user) => {
                PeerNetError::Protocol(format!("{user} has not published a public key"))
            }
            SendError::Directory(DirectoryError::UnknownUser(user)) => {
                PeerNetError::UserNotFound(user.to_string())
            }
            SendError::Directory(DirectoryError::Timeout(_)) => PeerNetError::Timeout,
            SendError::Directory(other) => PeerNetError::Protocol(other.to_string()),
            SendError::Crypto(e) => PeerNetError::Internal(e.to_string()),
            SendError::Registry(e) => PeerNetError::Network(e.to_string()),
        }
    }
}
