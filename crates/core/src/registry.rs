//! Connection registry: lazily created, reused transport resources.
//!
//! Listeners are keyed by port; outbound links by remote address+port.
//! Both are created on first use under the registry lock, so two
//! concurrent first-sends to the same new peer share one link.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::protocol::{read_event, write_event, CodecError, Event};
use crate::transport::{Connection, ConnectionError, Endpoint, EndpointError};

/// An event received on a listening socket, tagged with its origin
#[derive(Debug)]
pub struct InboundEvent {
    pub from: SocketAddr,
    pub event: Event,
}

/// A bound listening socket accepting events from many remote peers
pub struct Listener {
    endpoint: Arc<Endpoint>,
    port: u16,
    inbound: Mutex<mpsc::UnboundedReceiver<InboundEvent>>,
}

impl Listener {
    fn bind(port: u16) -> Result<Self, RegistryError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let endpoint = Arc::new(Endpoint::bind(addr)?);
        let (tx, rx) = mpsc::unbounded_channel();

        let accept_endpoint = endpoint.clone();
        tokio::spawn(async move {
            loop {
                let conn = match accept_endpoint.accept().await {
                    Ok(conn) => conn,
                    Err(EndpointError::Closed) => break,
                    Err(e) => {
                        warn!("Failed to accept connection: {}", e);
                        continue;
                    }
                };

                let from = conn.remote_addr();
                debug!("Peer connected from {}", from);
                tokio::spawn(Self::serve_peer(conn, from, tx.clone()));
            }
        });

        Ok(Self {
            endpoint,
            port,
            inbound: Mutex::new(rx),
        })
    }

    /// Read event frames from one remote peer until it disconnects.
    /// A malformed frame is dropped, never fatal to the listener.
    async fn serve_peer(
        conn: Connection,
        from: SocketAddr,
        tx: mpsc::UnboundedSender<InboundEvent>,
    ) {
        loop {
            let mut recv = match conn.accept_uni().await {
                Ok(recv) => recv,
                Err(_) => break,
            };

            match read_event(&mut recv).await {
                Ok(Some(event)) => {
                    if tx.send(InboundEvent { from, event }).is_err() {
                        break;
                    }
                }
                Ok(None) => continue,
                Err(e) => {
                    warn!("Dropping malformed frame from {}: {}", from, e);
                    continue;
                }
            }
        }
        debug!("Peer {} disconnected", from);
    }

    /// Receive the next inbound event; `None` after the listener closes
    pub async fn next_event(&self) -> Option<InboundEvent> {
        self.inbound.lock().await.recv().await
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.endpoint.local_addr()
    }
}

/// An outbound link to one peer, connected lazily and reconnected
/// after a transport-level drop.
pub struct PeerLink {
    endpoint: Arc<Endpoint>,
    remote: SocketAddr,
    conn: Mutex<Option<Connection>>,
    inbound_tx: mpsc::UnboundedSender<Event>,
    inbound_rx: std::sync::Mutex<Option<mpsc::UnboundedReceiver<Event>>>,
}

impl PeerLink {
    fn new(endpoint: Arc<Endpoint>, remote: SocketAddr) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            endpoint,
            remote,
            conn: Mutex::new(None),
            inbound_tx: tx,
            inbound_rx: std::sync::Mutex::new(Some(rx)),
        }
    }

    pub fn remote(&self) -> SocketAddr {
        self.remote
    }

    /// Take the stream of events the remote pushes over this link.
    /// There is a single consumer; the directory client takes it for
    /// the rendezvous connection.
    pub fn take_inbound(&self) -> Option<mpsc::UnboundedReceiver<Event>> {
        self.inbound_rx.lock().expect("inbound receiver lock").take()
    }

    async fn ensure_connected(&self) -> Result<Connection, RegistryError> {
        let mut guard = self.conn.lock().await;

        if let Some(conn) = guard.as_ref() {
            if !conn.is_closed() {
                return Ok(conn.clone());
            }
            debug!("Connection to {} dropped, reconnecting", self.remote);
        }

        let conn = self.endpoint.connect(self.remote).await?;
        debug!("Connected to peer {}", self.remote);

        let reader_conn = conn.clone();
        let tx = self.inbound_tx.clone();
        tokio::spawn(async move {
            loop {
                let mut recv = match reader_conn.accept_uni().await {
                    Ok(recv) => recv,
                    Err(_) => break,
                };

                match read_event(&mut recv).await {
                    Ok(Some(event)) => {
                        if tx.send(event).is_err() {
                            break;
                        }
                    }
                    Ok(None) => continue,
                    Err(e) => {
                        warn!("Dropping malformed pushed frame: {}", e);
                        continue;
                    }
                }
            }
        });

        *guard = Some(conn.clone());
        Ok(conn)
    }

    /// Emit one event on this link, reconnecting once if the cached
    /// connection turns out to be stale.
    pub async fn emit(&self, event: &Event) -> Result<(), RegistryError> {
        let mut last_err = None;

        for attempt in 0..2 {
            let conn = self.ensure_connected().await?;

            let result: Result<(), RegistryError> = async {
                let send = conn.open_uni().await?;
                write_event(send, event).await?;
                Ok(())
            }
            .await;

            match result {
                Ok(()) => return Ok(()),
                Err(e) => {
                    self.conn.lock().await.take();
                    if attempt == 0 {
                        debug!("Emit to {} failed ({}), retrying once", self.remote, e);
                    }
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.expect("emit attempted at least once"))
    }
}

/// Registry of listening sockets and outbound peer links
pub struct ConnectionRegistry {
    listeners: Mutex<HashMap<u16, Arc<Listener>>>,
    links: Mutex<HashMap<SocketAddr, Arc<PeerLink>>>,
    client_endpoint: Mutex<Option<Arc<Endpoint>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(HashMap::new()),
            links: Mutex::new(HashMap::new()),
            client_endpoint: Mutex::new(None),
        }
    }

    /// Get the listener for `port`, binding it on first use.
    /// Idempotent per port for the process lifetime.
    pub async fn listener(&self, port: u16) -> Result<Arc<Listener>, RegistryError> {
        let mut listeners = self.listeners.lock().await;

        if let Some(listener) = listeners.get(&port) {
            return Ok(listener.clone());
        }

        let listener = Arc::new(Listener::bind(port)?);
        listeners.insert(port, listener.clone());
        info!("Listening for peers on port {}", listener.local_addr().port());

        Ok(listener)
    }

    /// Get the outbound link for `remote`, creating it on first use.
    /// Idempotent per (address, port); creation happens under the map
    /// lock so concurrent first-sends share one link.
    pub async fn outbound(&self, remote: SocketAddr) -> Result<Arc<PeerLink>, RegistryError> {
        let endpoint = self.client_endpoint().await?;

        let mut links = self.links.lock().await;
        if let Some(link) = links.get(&remote) {
            return Ok(link.clone());
        }

        let link = Arc::new(PeerLink::new(endpoint, remote));
        links.insert(remote, link.clone());
        debug!("Registered outbound link to {}", remote);

        Ok(link)
    }

    /// The single ephemeral endpoint shared by all outbound links
    async fn client_endpoint(&self) -> Result<Arc<Endpoint>, RegistryError> {
        let mut guard = self.client_endpoint.lock().await;

        if let Some(endpoint) = guard.as_ref() {
            return Ok(endpoint.clone());
        }

        let endpoint = Arc::new(Endpoint::bind("0.0.0.0:0".parse().expect("valid bind addr"))?);
        *guard = Some(endpoint.clone());

        Ok(endpoint)
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry errors
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error(transparent)]
    Endpoint(#[from] EndpointError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Codec(#[from] CodecError),
}
