//! End-to-end tests: two live nodes exchanging events through an
//! in-process rendezvous service.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use peernet_common::{NodeConfig, Username};
use peernet_core::directory::{DirectoryClient, DirectoryError};
use peernet_core::dispatch::SendError;
use peernet_core::identity::MemoryKeyStore;
use peernet_core::protocol::{
    read_event, receive_ip_event, recv_pub_key_event, write_event, Event, PublishKey,
    ERROR_SENTINEL, GET_IP, GET_PUB_KEY, PLACEHOLDER_SIGNATURE, PUBLISH_PUB_KEY,
};
use peernet_core::registry::ConnectionRegistry;
use peernet_core::transport::Endpoint;
use peernet_core::PeerNode;

#[derive(Default, Clone)]
struct DirectoryEntry {
    ip: Option<String>,
    public_key_pem: Option<Vec<u8>>,
}

type Records = Arc<Mutex<HashMap<String, DirectoryEntry>>>;

/// An in-process rendezvous service speaking the directory protocol
struct Rendezvous {
    addr: SocketAddr,
    records: Records,
}

impl Rendezvous {
    async fn spawn() -> Self {
        let endpoint = Arc::new(Endpoint::bind("127.0.0.1:0".parse().unwrap()).unwrap());
        let addr = endpoint.local_addr();
        let records: Records = Arc::default();

        let accept_records = records.clone();
        tokio::spawn(async move {
            loop {
                let conn = match endpoint.accept().await {
                    Ok(conn) => conn,
                    Err(_) => break,
                };

                let records = accept_records.clone();
                tokio::spawn(async move {
                    loop {
                        let mut recv = match conn.accept_uni().await {
                            Ok(recv) => recv,
                            Err(_) => break,
                        };

                        let event = match read_event(&mut recv).await {
                            Ok(Some(event)) => event,
                            _ => continue,
                        };

                        if let Some(reply) = handle_request(&records, event) {
                            if let Ok(send) = conn.open_uni().await {
                                let _ = write_event(send, &reply).await;
                            }
                        }
                    }
                });
            }
        });

        Self { addr, records }
    }

    fn register_ip(&self, username: &str, ip: &str) {
        self.records
            .lock()
            .unwrap()
            .entry(username.to_string())
            .or_default()
            .ip = Some(ip.to_string());
    }

    fn public_key_of(&self, username: &str) -> Option<Vec<u8>> {
        self.records
            .lock()
            .unwrap()
            .get(username)
            .and_then(|entry| entry.public_key_pem.clone())
    }

    fn addr_string(&self) -> String {
        self.addr.to_string()
    }
}

fn handle_request(records: &Records, event: Event) -> Option<Event> {
    match event.name.as_str() {
        GET_IP => {
            let username = requested_user(&event)?;
            let payload = records
                .lock()
                .unwrap()
                .get(username.as_str())
                .and_then(|entry| entry.ip.clone())
                .map(String::into_bytes)
                .unwrap_or_else(|| ERROR_SENTINEL.to_vec());

            Some(Event::new(receive_ip_event(&username), payload))
        }
        GET_PUB_KEY => {
            let username = requested_user(&event)?;
            let payload = records
                .lock()
                .unwrap()
                .get(username.as_str())
                .and_then(|entry| entry.public_key_pem.clone())
                .unwrap_or_else(|| ERROR_SENTINEL.to_vec());

            Some(Event::new(recv_pub_key_event(&username), payload))
        }
        PUBLISH_PUB_KEY => {
            let body: PublishKey = serde_json::from_slice(&event.payload).ok()?;
            records
                .lock()
                .unwrap()
                .entry(body.username.to_string())
                .or_default()
                .public_key_pem = Some(body.public_key_pem);
            None
        }
        _ => None,
    }
}

fn requested_user(event: &Event) -> Option<Username> {
    let name = String::from_utf8(event.payload.clone()).ok()?;
    Username::new(name).ok()
}

fn user(name: &str) -> Username {
    Username::new(name).unwrap()
}

/// Publication is fire-and-forget on the wire; wait until the stub
/// has actually recorded the key.
async fn wait_for_key(rendezvous: &Rendezvous, username: &str) {
    for _ in 0..100 {
        if rendezvous.public_key_of(username).is_some() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("public key for {username} never reached the rendezvous");
}

async fn spawn_node(rendezvous: &Rendezvous, username: &str, peer_port: u16) -> PeerNode {
    let config = NodeConfig::new(user(username))
        .with_rendezvous_addr(rendezvous.addr_string())
        .with_peer_port(peer_port)
        .with_lookup_timeout(Duration::from_secs(2));

    PeerNode::new(config, Arc::new(MemoryKeyStore::new()))
        .await
        .unwrap()
}

#[tokio::test]
async fn encrypted_message_delivered_end_to_end() {
    let rendezvous = Rendezvous::spawn().await;

    // Bob comes online: listener up, identity published
    let bob = spawn_node(&rendezvous, "bob", 0).await;
    let bob_listener = bob.start().await.unwrap();
    bob.ensure_identity().await.unwrap();
    rendezvous.register_ip("bob", "127.0.0.1");
    wait_for_key(&rendezvous, "bob").await;

    // Alice targets the port bob actually listens on
    let alice = spawn_node(&rendezvous, "alice", bob_listener.local_addr().port()).await;
    alice
        .try_send("SendMessage", &user("bob"), true, b"hello")
        .await
        .unwrap();

    let inbound = bob_listener.next_event().await.unwrap();
    assert_eq!(inbound.event.name, "SendMessage");
    assert_eq!(inbound.event.signature.as_deref(), Some(PLACEHOLDER_SIGNATURE));

    // Ciphertext on the wire, plaintext only after bob decrypts
    assert_ne!(inbound.event.payload, b"hello");
    assert_eq!(bob.decrypt(&inbound.event.payload).await.unwrap(), b"hello");
}

#[tokio::test]
async fn plaintext_send_delivers_payload_verbatim() {
    let rendezvous = Rendezvous::spawn().await;

    let bob = spawn_node(&rendezvous, "bob", 0).await;
    let bob_listener = bob.start().await.unwrap();
    rendezvous.register_ip("bob", "127.0.0.1");

    let alice = spawn_node(&rendezvous, "alice", bob_listener.local_addr().port()).await;
    alice
        .try_send("Ping", &user("bob"), false, b"hi")
        .await
        .unwrap();

    let inbound = bob_listener.next_event().await.unwrap();
    assert_eq!(inbound.event.name, "Ping");
    assert_eq!(inbound.event.payload, b"hi");
    assert_eq!(inbound.event.signature, None);
}

#[tokio::test]
async fn encrypted_send_without_published_key_emits_nothing() {
    let rendezvous = Rendezvous::spawn().await;

    // Carol is reachable but never published a key
    let carol = spawn_node(&rendezvous, "carol", 0).await;
    let carol_listener = carol.start().await.unwrap();
    rendezvous.register_ip("carol", "127.0.0.1");

    let alice = spawn_node(&rendezvous, "alice", carol_listener.local_addr().port()).await;
    let err = alice
        .try_send("SendMessage", &user("carol"), true, b"secret")
        .await
        .unwrap_err();

    assert!(matches!(err, SendError::NoPublicKey(_)));

    // The aborted send must not have put anything on the wire
    let nothing =
        tokio::time::timeout(Duration::from_millis(300), carol_listener.next_event()).await;
    assert!(nothing.is_err());
}

#[tokio::test]
async fn unknown_user_fails_the_send() {
    let rendezvous = Rendezvous::spawn().await;
    let alice = spawn_node(&rendezvous, "alice", 0).await;

    let err = alice
        .try_send("Ping", &user("nobody"), false, b"hi")
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        SendError::Directory(DirectoryError::UnknownUser(_))
    ));
}

#[tokio::test]
async fn silent_directory_times_out_and_frees_the_lookup() {
    // A rendezvous that accepts requests but never replies
    let endpoint = Arc::new(Endpoint::bind("127.0.0.1:0".parse().unwrap()).unwrap());
    let silent_addr = endpoint.local_addr();
    tokio::spawn(async move {
        loop {
            let conn = match endpoint.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            tokio::spawn(async move {
                loop {
                    let mut recv = match conn.accept_uni().await {
                        Ok(recv) => recv,
                        Err(_) => break,
                    };
                    let _ = read_event(&mut recv).await;
                }
            });
        }
    });

    let registry = ConnectionRegistry::new();
    let link = registry.outbound(silent_addr).await.unwrap();
    let directory = DirectoryClient::new(link, Duration::from_millis(300));

    let err = directory.resolve_ip(&user("bob")).await.unwrap_err();
    assert!(matches!(err, DirectoryError::Timeout(_)));

    // The timed-out lookup must deregister itself, so retrying the
    // same user times out again instead of failing as in-flight
    let err = directory.resolve_ip(&user("bob")).await.unwrap_err();
    assert!(matches!(err, DirectoryError::Timeout(_)));
}

#[tokio::test]
async fn concurrent_lookups_resolve_independently() {
    let rendezvous = Rendezvous::spawn().await;
    rendezvous.register_ip("dave", "10.0.0.4");
    rendezvous.register_ip("erin", "10.0.0.5");

    let registry = ConnectionRegistry::new();
    let link = registry.outbound(rendezvous.addr).await.unwrap();
    let directory = DirectoryClient::new(link, Duration::from_secs(2));

    let dave = user("dave");
    let erin = user("erin");
    let (dave_ip, erin_ip) = tokio::join!(
        directory.resolve_ip(&dave),
        directory.resolve_ip(&erin),
    );

    assert_eq!(dave_ip.unwrap().to_string(), "10.0.0.4");
    assert_eq!(erin_ip.unwrap().to_string(), "10.0.0.5");
}

#[tokio::test]
async fn concurrent_lookups_for_the_same_user_both_resolve() {
    let rendezvous = Rendezvous::spawn().await;
    rendezvous.register_ip("dave", "10.0.0.4");

    let registry = ConnectionRegistry::new();
    let link = registry.outbound(rendezvous.addr).await.unwrap();
    let directory = DirectoryClient::new(link, Duration::from_secs(2));

    // The second lookup joins the first's in-flight request; neither
    // caller is refused and both see the same answer
    let dave = user("dave");
    let (first, second) = tokio::join!(
        directory.resolve_ip(&dave),
        directory.resolve_ip(&dave),
    );

    assert_eq!(first.unwrap().to_string(), "10.0.0.4");
    assert_eq!(second.unwrap().to_string(), "10.0.0.4");
}
