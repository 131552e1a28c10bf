//! Wire protocol: named events over unidirectional QUIC streams.
//!
//! Every message in the system is an [`Event`]: directory requests and
//! replies on the rendezvous connection, and direct peer deliveries.
//! Frames are length-prefixed JSON, one frame per stream.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::transport::{RecvStream, SendStream};
use peernet_common::protocol::MAX_MESSAGE_SIZE;
use peernet_common::Username;

/// Request event: resolve a username to an IP address
pub const GET_IP: &str = "getIP";

/// Request event: resolve a username to a public key
pub const GET_PUB_KEY: &str = "getPubKey";

/// Request event: publish this node's public key
pub const PUBLISH_PUB_KEY: &str = "publickey";

/// In-band sentinel the rendezvous service returns for a directory miss
pub const ERROR_SENTINEL: &[u8] = b"error";

/// Placeholder signature carried on encrypted deliveries; never verified
pub const PLACEHOLDER_SIGNATURE: &str = "unsigned";

/// Reply-event name for an IP lookup, scoped to the requested username
pub fn receive_ip_event(username: &Username) -> String {
    format!("receiveIP{}", username)
}

/// Reply-event name for a public-key lookup, scoped to the requested username
pub fn recv_pub_key_event(username: &Username) -> String {
    format!("recvPubKey{}", username)
}

/// A single named event on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Event name; replies embed the subject username
    pub name: String,

    /// Application payload: plaintext, ciphertext, or a directory value
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,

    /// Placeholder origin signature on encrypted deliveries
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl Event {
    pub fn new(name: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            payload: payload.into(),
            signature: None,
        }
    }

    pub fn signed_placeholder(name: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            payload: payload.into(),
            signature: Some(PLACEHOLDER_SIGNATURE.to_string()),
        }
    }

    /// Whether the payload is the directory-miss sentinel
    pub fn is_miss(&self) -> bool {
        self.payload == ERROR_SENTINEL
    }
}

/// Body of the `publickey` event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishKey {
    pub username: Username,
    #[serde(with = "serde_bytes")]
    pub public_key_pem: Vec<u8>,
}

/// Codec errors
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("Frame too large: {0} bytes (max {MAX_MESSAGE_SIZE})")]
    FrameTooLarge(usize),

    #[error("Incomplete frame: expected {expected} bytes, got {actual}")]
    Incomplete { expected: usize, actual: usize },

    #[error("Malformed frame: {0}")]
    Malformed(String),

    #[error(transparent)]
    Transport(#[from] crate::transport::ConnectionError),
}

/// Write one event frame and finish the stream
pub async fn write_event(mut send: SendStream, event: &Event) -> Result<(), CodecError> {
    let serialized =
        serde_json::to_vec(event).map_err(|e| CodecError::Malformed(e.to_string()))?;

    if serialized.len() > MAX_MESSAGE_SIZE {
        return Err(CodecError::FrameTooLarge(serialized.len()));
    }

    let len = serialized.len() as u32;
    send.write(&len.to_le_bytes()).await?;
    send.write(&serialized).await?;
    send.finish()?;

    debug!("Sent {} event ({} bytes)", event.name, serialized.len());
    Ok(())
}

/// Read one event frame from a stream.
///
/// Returns `Ok(None)` when the stream closes before a length prefix
/// arrives; a truncated or oversized body is an error.
pub async fn read_event(recv: &mut RecvStream) -> Result<Option<Event>, CodecError> {
    let mut len_buf = [0u8; 4];
    if recv.read_exact(&mut len_buf).await.is_err() {
        return Ok(None);
    }

    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_MESSAGE_SIZE {
        return Err(CodecError::FrameTooLarge(len));
    }

    let data = recv.read_to_end(len).await?;
    if data.len() != len {
        return Err(CodecError::Incomplete {
            expected: len,
            actual: data.len(),
        });
    }

    let event: Event =
        serde_json::from_slice(&data).map_err(|e| CodecError::Malformed(e.to_string()))?;

    debug!("Received {} event ({} bytes)", event.name, len);
    Ok(Some(event))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Endpoint;

    #[test]
    fn reply_event_names_embed_username() {
        let user = Username::new("alice").unwrap();
        assert_eq!(receive_ip_event(&user), "receiveIPalice");
        assert_eq!(recv_pub_key_event(&user), "recvPubKeyalice");
    }

    #[test]
    fn sentinel_detection() {
        let miss = Event::new("recvPubKeybob", ERROR_SENTINEL.to_vec());
        assert!(miss.is_miss());

        let hit = Event::new("recvPubKeybob", b"some-pem".to_vec());
        assert!(!hit.is_miss());
    }

    #[test]
    fn placeholder_signature_is_carried() {
        let event = Event::signed_placeholder("SendMessage", b"ct".to_vec());
        assert_eq!(event.signature.as_deref(), Some(PLACEHOLDER_SIGNATURE));
    }

    #[tokio::test]
    async fn event_frame_roundtrip_over_stream() {
        let server = Endpoint::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let server_addr = server.local_addr();
        let client = Endpoint::bind("127.0.0.1:0".parse().unwrap()).unwrap();

        let accept_task = tokio::spawn(async move { server.accept().await });
        let client_conn = client.connect(server_addr).await.unwrap();
        let server_conn = accept_task.await.unwrap().unwrap();

        let event = Event::new("SendMessage", b"hello".to_vec());
        let send = client_conn.open_uni().await.unwrap();
        write_event(send, &event).await.unwrap();

        let mut recv = server_conn.accept_uni().await.unwrap();
        let received = read_event(&mut recv).await.unwrap().unwrap();

        assert_eq!(received, event);
    }
}
