//! Core peer-to-peer overlay: connection registry, rendezvous
//! directory client, identity management, sealed-box encryption, and
//! event dispatch over QUIC.

pub mod crypto;
pub mod directory;
pub mod dispatch;
pub mod identity;
pub mod node;
pub mod protocol;
pub mod registry;
pub mod transport;

pub use crypto::{open, seal, CryptoError, SecureChannel};
pub use directory::{DirectoryClient, DirectoryError, KeyLookup, PendingLookups};
pub use dispatch::{Dispatcher, SendError};
pub use identity::{
    FileKeyStore, IdentityManager, KeyPair, KeyPublisher, KeyStore, MemoryKeyStore,
};
pub use node::{NodeError, PeerNode};
pub use protocol::{read_event, write_event, CodecError, Event, PublishKey};
pub use registry::{ConnectionRegistry, InboundEvent, Listener, PeerLink, RegistryError};
pub use transport::{Connection, Endpoint};
