use quinn::Endpoint as QuinnEndpoint;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use peernet_common::protocol::{IDLE_TIMEOUT_SECS, KEEPALIVE_INTERVAL_SECS};

/// A QUIC endpoint that can both accept inbound peers and dial out.
///
/// Peer identity lives at the application layer (usernames resolved via
/// the rendezvous directory), so TLS runs with a throwaway self-signed
/// certificate and client-side verification is skipped.
pub struct Endpoint {
    inner: QuinnEndpoint,
    local_addr: SocketAddr,
}

impl Endpoint {
    /// Bind an endpoint to the given address.
    ///
    /// Port 0 binds an ephemeral port; outbound-only endpoints use that.
    pub fn bind(bind_addr: SocketAddr) -> Result<Self, EndpointError> {
        let server_config = Self::server_config()?;
        let client_config = Self::client_config()?;

        let mut endpoint = QuinnEndpoint::server(server_config, bind_addr)
            .map_err(|e| EndpointError::BindFailed(bind_addr.port(), e.to_string()))?;

        endpoint.set_default_client_config(client_config);

        let local_addr = endpoint.local_addr()?;

        Ok(Self {
            inner: endpoint,
            local_addr,
        })
    }

    fn server_config() -> Result<quinn::ServerConfig, EndpointError> {
        let cert = rcgen::generate_simple_self_signed(vec!["peernet.local".to_string()])
            .map_err(|e| EndpointError::CertGeneration(e.to_string()))?;

        let cert_der = cert.cert.der().to_vec();
        let key_der = cert.key_pair.serialize_der();

        let cert_chain = vec![rustls::pki_types::CertificateDer::from(cert_der)];
        let key = rustls::pki_types::PrivateKeyDer::try_from(key_der)
            .map_err(|e| EndpointError::CertGeneration(format!("Invalid key: {:?}", e)))?;

        let server_crypto = rustls::ServerConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .map_err(|e| EndpointError::ConfigCreation(format!("protocol versions: {:?}", e)))?
        .with_no_client_auth()
        .with_single_cert(cert_chain, key)
        .map_err(|e| EndpointError::ConfigCreation(e.to_string()))?;

        let mut server_config = quinn::ServerConfig::with_crypto(Arc::new(
            quinn::crypto::rustls::QuicServerConfig::try_from(server_crypto)
                .map_err(|e| EndpointError::ConfigCreation(format!("QUIC server config: {:?}", e)))?,
        ));

        server_config.transport_config(Arc::new(Self::transport_config()));

        Ok(server_config)
    }

    fn client_config() -> Result<quinn::ClientConfig, EndpointError> {
        let crypto = rustls::ClientConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .map_err(|e| EndpointError::ConfigCreation(format!("protocol versions: {:?}", e)))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(SkipServerVerification))
        .with_no_client_auth();

        let mut client_config = quinn::ClientConfig::new(Arc::new(
            quinn::crypto::rustls::QuicClientConfig::try_from(crypto)
                .map_err(|e| EndpointError::ConfigCreation(format!("QUIC client config: {:?}", e)))?,
        ));

        client_config.transport_config(Arc::new(Self::transport_config()));

        Ok(client_config)
    }

    fn transport_config() -> quinn::TransportConfig {
        let mut transport_config = quinn::TransportConfig::default();
        transport_config.max_idle_timeout(Some(
            Duration::from_secs(IDLE_TIMEOUT_SECS).try_into().unwrap(),
        ));
        transport_config.keep_alive_interval(Some(Duration::from_secs(KEEPALIVE_INTERVAL_SECS)));
        transport_config
    }

    /// Dial a remote endpoint
    pub async fn connect(&self, addr: SocketAddr) -> Result<super::Connection, EndpointError> {
        let connecting = self
            .inner
            .connect(addr, "peernet.local")
            .map_err(|e| EndpointError::ConnectionFailed(e.to_string()))?;

        let connection = connecting
            .await
            .map_err(|e| EndpointError::ConnectionFailed(e.to_string()))?;

        Ok(super::Connection::new(connection))
    }

    /// Accept the next inbound connection
    pub async fn accept(&self) -> Result<super::Connection, EndpointError> {
        let connecting = self.inner.accept().await.ok_or(EndpointError::Closed)?;

        let connection = connecting
            .await
            .map_err(|e| EndpointError::ConnectionFailed(e.to_string()))?;

        Ok(super::Connection::new(connection))
    }

    /// Get local address.
    /// If bound to 0.0.0.0, returns 127.0.0.1 instead for local connections.
    pub fn local_addr(&self) -> SocketAddr {
        let mut addr = self.local_addr;
        if addr.ip().is_unspecified() {
            addr.set_ip(std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST));
        }
        addr
    }

    /// Close the endpoint
    pub fn close(&self) {
        self.inner.close(0u32.into(), b"shutdown");
    }
}

/// Skip certificate verification; peers are not authenticated at the
/// transport layer in this design.
#[derive(Debug)]
struct SkipServerVerification;

impl rustls::client::danger::ServerCertVerifier for SkipServerVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA384,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::RSA_PKCS1_SHA512,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA512,
            rustls::SignatureScheme::ED25519,
        ]
    }
}

/// Endpoint errors
#[derive(Debug, thiserror::Error)]
pub enum EndpointError {
    #[error("Failed to bind port {0}: {1}")]
    BindFailed(u16, String),

    #[error("Failed to generate certificate: {0}")]
    CertGeneration(String),

    #[error("Failed to create config: {0}")]
    ConfigCreation(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Endpoint is closed")]
    Closed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
