//! The node context object: one value owning every long-lived piece of
//! a running peer, wired together at construction.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::info;

use crate::crypto::{CryptoError, SecureChannel};
use crate::directory::DirectoryClient;
use crate::dispatch::{Dispatcher, SendError};
use crate::identity::{IdentityError, IdentityManager, KeyStore};
use crate::registry::{ConnectionRegistry, Listener, RegistryError};
use peernet_common::{NodeConfig, Username};

/// A peer node: registry, directory client, identity, and dispatcher
/// over one shared transport.
pub struct PeerNode {
    config: NodeConfig,
    registry: Arc<ConnectionRegistry>,
    directory: Arc<DirectoryClient>,
    identity: Arc<IdentityManager>,
    secure: SecureChannel,
    dispatcher: Dispatcher,
}

impl PeerNode {
    /// Wire up a node against its rendezvous service.
    ///
    /// The rendezvous link itself connects lazily, on the first
    /// directory operation.
    pub async fn new(config: NodeConfig, store: Arc<dyn KeyStore>) -> Result<Self, NodeError> {
        let rendezvous: SocketAddr = config
            .rendezvous_addr
            .parse()
            .map_err(|_| NodeError::BadRendezvousAddr(config.rendezvous_addr.clone()))?;

        let registry = Arc::new(ConnectionRegistry::new());
        let link = registry.outbound(rendezvous).await?;
        let directory = DirectoryClient::new(link, config.lookup_timeout());

        let identity = Arc::new(IdentityManager::new(store));
        let secure = SecureChannel::new(identity.clone());
        let dispatcher = Dispatcher::new(
            directory.clone(),
            registry.clone(),
            secure.clone(),
            config.peer_port,
        );

        info!("Node {} wired against rendezvous {}", config.username, rendezvous);

        Ok(Self {
            config,
            registry,
            directory,
            identity,
            secure,
            dispatcher,
        })
    }

    /// Bind the peer listener and start accepting inbound events
    pub async fn start(&self) -> Result<Arc<Listener>, NodeError> {
        Ok(self.registry.listener(self.config.peer_port).await?)
    }

    /// Bootstrap this node's identity keys: load them from the store,
    /// or generate and publish a fresh pair.
    pub async fn ensure_identity(&self) -> Result<(), NodeError> {
        self.identity
            .ensure_loaded(&self.config.username, self.directory.as_ref())
            .await?;
        Ok(())
    }

    /// Deliver one event to a user, surfacing failures
    pub async fn try_send(
        &self,
        event_name: &str,
        dest: &Username,
        encrypt: bool,
        payload: &[u8],
    ) -> Result<(), SendError> {
        self.dispatcher.try_send(event_name, dest, encrypt, payload).await
    }

    /// Fire-and-forget delivery
    pub async fn send(&self, event_name: &str, dest: &Username, encrypt: bool, payload: &[u8]) {
        self.dispatcher.send(event_name, dest, encrypt, payload).await
    }

    /// Open a sealed payload addressed to this node
    pub async fn decrypt(&self, sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.secure.decrypt(sealed).await
    }

    pub fn username(&self) -> &Username {
        &self.config.username
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn directory(&self) -> &Arc<DirectoryClient> {
        &self.directory
    }

    pub fn identity(&self) -> &Arc<IdentityManager> {
        &self.identity
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }
}

/// Node wiring errors
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("Invalid rendezvous address: {0}")]
    BadRendezvousAddr(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Identity(#[from] IdentityError),
}
