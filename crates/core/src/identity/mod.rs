pub mod keypair;
pub mod manager;

pub use keypair::{public_key_from_pem, KeyPair, KeyPairError};
pub use manager::{
    FileKeyStore, IdentityError, IdentityManager, KeyPublisher, KeyStore, KeyStoreError,
    MemoryKeyStore,
};
