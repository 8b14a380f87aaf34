//! rustls configuration for both ends of the tunnel.
//!
//! Both sides pin TLS 1.3 and require a certificate from the other side.

use std::sync::Arc;
use std::time::Duration;

use rustls::crypto::CryptoProvider;
use rustls::pki_types::ServerName;
use rustls::server::WebPkiClientVerifier;
use rustls::{ClientConfig, ServerConfig};
use tokio_rustls::{TlsAcceptor, TlsConnector};

use rcp_certs::{CertProvider, PEER_SERVER_NAME};

use crate::error::TunnelError;

/// Upper bound for a single TLS handshake.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

static PROTOCOL_VERSIONS: &[&rustls::SupportedProtocolVersion] = &[&rustls::version::TLS13];

fn crypto_provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Server-side config: present our identity, demand one chaining to the
/// peer trust bundle.
pub fn server_config(certs: &dyn CertProvider) -> Result<Arc<ServerConfig>, TunnelError> {
    let provider = crypto_provider();
    let roots = Arc::new(certs.peer_roots()?);
    let verifier = WebPkiClientVerifier::builder_with_provider(roots, Arc::clone(&provider))
        .build()?;
    let identity = certs.local_identity()?;

    let config = ServerConfig::builder_with_provider(provider)
        .with_protocol_versions(PROTOCOL_VERSIONS)
        .map_err(TunnelError::TlsConfig)?
        .with_client_cert_verifier(verifier)
        .with_single_cert(identity.cert_chain, identity.key)
        .map_err(TunnelError::TlsConfig)?;
    Ok(Arc::new(config))
}

/// Client-side config: trust only the peer bundle, present our identity.
pub fn client_config(certs: &dyn CertProvider) -> Result<Arc<ClientConfig>, TunnelError> {
    let roots = certs.peer_roots()?;
    let identity = certs.local_identity()?;

    let config = ClientConfig::builder_with_provider(crypto_provider())
        .with_protocol_versions(PROTOCOL_VERSIONS)
        .map_err(TunnelError::TlsConfig)?
        .with_root_certificates(roots)
        .with_client_auth_cert(identity.cert_chain, identity.key)
        .map_err(TunnelError::TlsConfig)?;
    Ok(Arc::new(config))
}

pub fn acceptor(certs: &dyn CertProvider) -> Result<TlsAcceptor, TunnelError> {
    Ok(TlsAcceptor::from(server_config(certs)?))
}

pub fn connector(certs: &dyn CertProvider) -> Result<TlsConnector, TunnelError> {
    Ok(TlsConnector::from(client_config(certs)?))
}

/// The fixed name the dialer expects on the listener's certificate.
pub fn peer_server_name() -> Result<ServerName<'static>, TunnelError> {
    ServerName::try_from(PEER_SERVER_NAME)
        .map_err(|_| TunnelError::ServerName(PEER_SERVER_NAME.to_string()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use rcp_certs::EmbeddedCertProvider;

    #[test]
    fn configs_build_from_embedded_material() {
        let server = server_config(&EmbeddedCertProvider::listener()).unwrap();
        let client = client_config(&EmbeddedCertProvider::agent()).unwrap();
        assert!(server.alpn_protocols.is_empty());
        assert!(client.alpn_protocols.is_empty());
    }

    #[test]
    fn configs_build_from_generated_material() {
        let pki = rcp_certs::test_pki().unwrap();
        assert!(server_config(&pki.listener).is_ok());
        assert!(client_config(&pki.agent).is_ok());
    }

    #[test]
    fn peer_name_is_a_valid_dns_name() {
        let name = peer_server_name().unwrap();
        assert!(matches!(name, ServerName::DnsName(_)));
    }
}
