use quinn::{
    Connection as QuinnConnection, RecvStream as QuinnRecvStream, SendStream as QuinnSendStream,
};
use std::net::SocketAddr;

/// A QUIC connection to a remote peer.
///
/// Events travel on unidirectional streams, one event per stream, in
/// either direction: a client emits requests on its own streams and the
/// remote pushes replies back on streams it opens.
#[derive(Debug, Clone)]
pub struct Connection {
    inner: QuinnConnection,
}

impl Connection {
    pub(crate) fn new(inner: QuinnConnection) -> Self {
        Self { inner }
    }

    /// Open a unidirectional stream for emitting one event
    pub async fn open_uni(&self) -> Result<SendStream, ConnectionError> {
        let send = self
            .inner
            .open_uni()
            .await
            .map_err(|e| ConnectionError::StreamOpen(e.to_string()))?;

        Ok(SendStream::new(send))
    }

    /// Accept an incoming unidirectional stream
    pub async fn accept_uni(&self) -> Result<RecvStream, ConnectionError> {
        let recv = self
            .inner
            .accept_uni()
            .await
            .map_err(|e| ConnectionError::StreamAccept(e.to_string()))?;

        Ok(RecvStream::new(recv))
    }

    /// Get remote address
    pub fn remote_addr(&self) -> SocketAddr {
        self.inner.remote_address()
    }

    /// Close the connection gracefully
    pub fn close(&self, error_code: u32, reason: &str) {
        self.inner.close(error_code.into(), reason.as_bytes());
    }

    /// Check if connection is closed
    pub fn is_closed(&self) -> bool {
        self.inner.close_reason().is_some()
    }
}

/// A send stream for writing one event frame
pub struct SendStream {
    inner: QuinnSendStream,
}

impl SendStream {
    pub(crate) fn new(inner: QuinnSendStream) -> Self {
        Self { inner }
    }

    /// Write data to the stream
    pub async fn write(&mut self, data: &[u8]) -> Result<(), ConnectionError> {
        self.inner
            .write_all(data)
            .await
            .map_err(|e| ConnectionError::Write(e.to_string()))?;

        Ok(())
    }

    /// Finish the stream (close for writing)
    pub fn finish(mut self) -> Result<(), ConnectionError> {
        self.inner
            .finish()
            .map_err(|e| ConnectionError::Finish(e.to_string()))?;

        Ok(())
    }
}

/// A receive stream for reading one event frame
pub struct RecvStream {
    inner: QuinnRecvStream,
}

impl RecvStream {
    pub(crate) fn new(inner: QuinnRecvStream) -> Self {
        Self { inner }
    }

    /// Read exact amount of data
    pub async fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), ConnectionError> {
        self.inner
            .read_exact(buf)
            .await
            .map_err(|e| ConnectionError::Read(e.to_string()))?;

        Ok(())
    }

    /// Read all remaining data up to `max_size`
    pub async fn read_to_end(&mut self, max_size: usize) -> Result<Vec<u8>, ConnectionError> {
        let mut buf = Vec::new();
        let mut temp = vec![0u8; 8192];
        let mut total_read = 0;

        loop {
            let remaining = max_size.saturating_sub(total_read);
            if remaining == 0 {
                break;
            }

            let to_read = remaining.min(temp.len());
            match self.inner.read(&mut temp[..to_read]).await {
                Ok(Some(n)) => {
                    buf.extend_from_slice(&temp[..n]);
                    total_read += n;
                }
                Ok(None) => break,
                Err(e) => return Err(ConnectionError::Read(e.to_string())),
            }
        }

        Ok(buf)
    }
}

/// Connection errors
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Failed to open stream: {0}")]
    StreamOpen(String),

    #[error("Failed to accept stream: {0}")]
    StreamAccept(String),

    #[error("Write error: {0}")]
    Write(String),

    #[error("Read error: {0}")]
    Read(String),

    #[error("Finish error: {0}")]
    Finish(String),

    #[error("Connection closed: {0}")]
    Closed(String),
}
