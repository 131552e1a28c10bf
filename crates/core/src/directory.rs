//! Directory client for the rendezvous service.
//!
//! Lookups are request/reply over a single long-lived link: the request
//! is a named event, and the reply arrives later as a push event whose
//! name embeds the requested username. A correlation map of pending
//! lookups routes each reply to its waiting caller; replies that match
//! nothing are dropped.

use async_trait::async_trait;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::identity::KeyPublisher;
use crate::protocol::{
    receive_ip_event, recv_pub_key_event, Event, PublishKey, GET_IP, GET_PUB_KEY, PUBLISH_PUB_KEY,
};
use crate::registry::{PeerLink, RegistryError};
use peernet_common::Username;

/// Outcome of a public-key lookup; a user can be reachable without
/// ever having published a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyLookup {
    Found(Vec<u8>),
    Missing,
}

/// Correlation map from reply-event name to the waiting callers.
///
/// One in-flight request per reply name: the first registration for a
/// key is the leader and emits the request; later registrations for
/// the same key join it and share the one reply. Each entry fires at
/// most once and is removed whether it resolves, times out, or is
/// cancelled.
#[derive(Clone, Default)]
pub struct PendingLookups {
    inner: Arc<Mutex<HashMap<String, Vec<oneshot::Sender<Vec<u8>>>>>>,
}

impl PendingLookups {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register interest in a reply name. Returns the receiver and
    /// whether this registration is the leader (and must emit the
    /// request) or a joiner on an in-flight lookup.
    pub fn register(&self, key: &str) -> (oneshot::Receiver<Vec<u8>>, bool) {
        let mut inner = self.inner.lock().expect("pending lookups lock");

        let (tx, rx) = oneshot::channel();
        match inner.get_mut(key) {
            Some(waiters) => {
                waiters.push(tx);
                (rx, false)
            }
            None => {
                inner.insert(key.to_string(), vec![tx]);
                (rx, true)
            }
        }
    }

    /// Deliver a reply to every waiter under that name. Returns false
    /// when nothing is waiting, in which case the payload is dropped.
    pub fn complete(&self, key: &str, payload: Vec<u8>) -> bool {
        let waiters = self.inner.lock().expect("pending lookups lock").remove(key);

        match waiters {
            Some(waiters) => {
                let mut delivered = false;
                for tx in waiters {
                    delivered |= tx.send(payload.clone()).is_ok();
                }
                delivered
            }
            None => false,
        }
    }

    /// Deregister a lookup that will no longer be awaited
    pub fn cancel(&self, key: &str) {
        self.inner.lock().expect("pending lookups lock").remove(key);
    }
}

/// Client side of the rendezvous directory
pub struct DirectoryClient {
    link: Arc<PeerLink>,
    pending: PendingLookups,
    timeout: Duration,
}

impl DirectoryClient {
    /// Wrap the rendezvous link, taking over its pushed-event stream
    pub fn new(link: Arc<PeerLink>, timeout: Duration) -> Arc<Self> {
        let pending = PendingLookups::new();

        if let Some(inbound) = link.take_inbound() {
            tokio::spawn(Self::route_replies(inbound, pending.clone()));
        } else {
            warn!("Rendezvous link inbound stream already taken");
        }

        Arc::new(Self {
            link,
            pending,
            timeout,
        })
    }

    async fn route_replies(
        mut inbound: mpsc::UnboundedReceiver<Event>,
        pending: PendingLookups,
    ) {
        while let Some(event) = inbound.recv().await {
            if !pending.complete(&event.name, event.payload) {
                // Late reply after a timeout, or a name we never asked for
                debug!("Dropping unmatched directory reply: {}", event.name);
            }
        }
    }

    /// Issue one lookup and wait for the matching reply. A concurrent
    /// lookup for the same reply name piggybacks on the in-flight
    /// request instead of issuing its own.
    async fn lookup(
        &self,
        request_name: &str,
        reply_name: String,
        username: &Username,
    ) -> Result<Vec<u8>, DirectoryError> {
        let (rx, leader) = self.pending.register(&reply_name);

        if leader {
            let request = Event::new(request_name, username.as_str().as_bytes().to_vec());
            if let Err(e) = self.link.emit(&request).await {
                self.pending.cancel(&reply_name);
                return Err(e.into());
            }
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(payload)) => Ok(payload),
            Ok(Err(_)) => {
                self.pending.cancel(&reply_name);
                Err(DirectoryError::ChannelClosed)
            }
            Err(_) => {
                self.pending.cancel(&reply_name);
                Err(DirectoryError::Timeout(username.clone()))
            }
        }
    }

    /// Resolve a username to the IP address the rendezvous service
    /// last observed for it.
    pub async fn resolve_ip(&self, username: &Username) -> Result<IpAddr, DirectoryError> {
        let payload = self
            .lookup(GET_IP, receive_ip_event(username), username)
            .await?;

        if payload == crate::protocol::ERROR_SENTINEL {
            return Err(DirectoryError::UnknownUser(username.clone()));
        }

        let text = String::from_utf8(payload)
            .map_err(|_| DirectoryError::BadAddress(username.clone()))?;
        text.parse()
            .map_err(|_| DirectoryError::BadAddress(username.clone()))
    }

    /// Resolve a username to its published public key PEM
    pub async fn resolve_public_key(
        &self,
        username: &Username,
    ) -> Result<KeyLookup, DirectoryError> {
        let payload = self
            .lookup(GET_PUB_KEY, recv_pub_key_event(username), username)
            .await?;

        if payload == crate::protocol::ERROR_SENTINEL {
            return Ok(KeyLookup::Missing);
        }

        Ok(KeyLookup::Found(payload))
    }

    /// Resolve address then key, strictly in that order. An unknown
    /// user fails the whole resolution; a known user without a key
    /// resolves with `KeyLookup::Missing`.
    pub async fn resolve_ip_and_key(
        &self,
        username: &Username,
    ) -> Result<(IpAddr, KeyLookup), DirectoryError> {
        let ip = self.resolve_ip(username).await?;
        let key = self.resolve_public_key(username).await?;

        Ok((ip, key))
    }

    /// Publish this node's public key under its username
    pub async fn publish(
        &self,
        username: &Username,
        public_key_pem: &[u8],
    ) -> Result<(), DirectoryError> {
        let body = PublishKey {
            username: username.clone(),
            public_key_pem: public_key_pem.to_vec(),
        };
        let payload =
            serde_json::to_vec(&body).map_err(|e| DirectoryError::Encode(e.to_string()))?;

        self.link.emit(&Event::new(PUBLISH_PUB_KEY, payload)).await?;
        debug!("Published public key for {}", username);

        Ok(())
    }
}

#[async_trait]
impl KeyPublisher for DirectoryClient {
    async fn publish_public_key(
        &self,
        username: &Username,
        public_key_pem: &[u8],
    ) -> anyhow::Result<()> {
        self.publish(username, public_key_pem).await?;
        Ok(())
    }
}

/// Directory lookup errors
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("Unknown user: {0}")]
    UnknownUser(Username),

    #[error("Directory lookup for {0} timed out")]
    Timeout(Username),

    #[error("Directory reply channel closed")]
    ChannelClosed,

    #[error("Directory returned an unparseable address for {0}")]
    BadAddress(Username),

    #[error("Failed to encode directory request: {0}")]
    Encode(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reply_reaches_its_registered_waiter() {
        let pending = PendingLookups::new();
        let (rx, leader) = pending.register("receiveIPalice");
        assert!(leader);

        assert!(pending.complete("receiveIPalice", b"10.0.0.1".to_vec()));
        assert_eq!(rx.await.unwrap(), b"10.0.0.1");
    }

    #[tokio::test]
    async fn replies_do_not_cross_talk() {
        let pending = PendingLookups::new();
        let (alice, _) = pending.register("receiveIPalice");
        let (bob, _) = pending.register("receiveIPbob");

        pending.complete("receiveIPbob", b"10.0.0.2".to_vec());
        pending.complete("receiveIPalice", b"10.0.0.1".to_vec());

        assert_eq!(alice.await.unwrap(), b"10.0.0.1");
        assert_eq!(bob.await.unwrap(), b"10.0.0.2");
    }

    #[tokio::test]
    async fn completion_is_at_most_once() {
        let pending = PendingLookups::new();
        let (_rx, _) = pending.register("recvPubKeyalice");

        assert!(pending.complete("recvPubKeyalice", b"pem".to_vec()));
        // Entry is gone; a second reply under the same name is dropped
        assert!(!pending.complete("recvPubKeyalice", b"pem".to_vec()));
    }

    #[tokio::test]
    async fn duplicate_registration_joins_the_inflight_lookup() {
        let pending = PendingLookups::new();
        let (first, leader) = pending.register("receiveIPalice");
        let (second, joiner_is_leader) = pending.register("receiveIPalice");

        // Only the first registration owns the request emission
        assert!(leader);
        assert!(!joiner_is_leader);

        assert!(pending.complete("receiveIPalice", b"10.0.0.1".to_vec()));
        assert_eq!(first.await.unwrap(), b"10.0.0.1");
        assert_eq!(second.await.unwrap(), b"10.0.0.1");
    }

    #[tokio::test]
    async fn cancelled_lookup_drops_late_replies() {
        let pending = PendingLookups::new();
        let (_rx, _) = pending.register("receiveIPalice");

        pending.cancel("receiveIPalice");
        assert!(!pending.complete("receiveIPalice", b"10.0.0.1".to_vec()));

        // The name is free for a fresh leader again
        let (_rx, leader) = pending.register("receiveIPalice");
        assert!(leader);
    }
}
