pub mod config;
pub mod error;
pub mod types;

pub use config::{protocol, ConfigError, NodeConfig};
pub use error::{PeerNetError, Result};
pub use types::{Username, UsernameError};
