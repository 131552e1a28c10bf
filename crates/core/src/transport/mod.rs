pub mod connection;
pub mod endpoint;

pub use connection::{Connection, ConnectionError, RecvStream, SendStream};
pub use endpoint::{Endpoint, EndpointError};
