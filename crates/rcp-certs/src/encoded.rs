//! Provider backed by base64-encoded PEM fields from configuration.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tracing::debug;

use crate::error::CertError;
use crate::provider::{CertProvider, Identity};

/// Identity material decoded from the agent config's `[tls]` table.
///
/// All decoding and parsing happens in the constructors, so a broken
/// deployment fails at startup instead of on the first dial.
#[derive(Clone)]
pub struct EncodedCertProvider {
    cert_pem: Vec<u8>,
    key_pem: Vec<u8>,
    peer_pem: Vec<u8>,
}

impl EncodedCertProvider {
    /// Decode base64 fields: local certificate, local key and the peer
    /// certificate(s) to trust.
    pub fn from_base64(cert: &str, key: &str, peer: &str) -> Result<Self, CertError> {
        Self::from_pem(
            decode_field(cert, "client_cert")?,
            decode_field(key, "client_key")?,
            decode_field(peer, "server_cert")?,
        )
    }

    /// Build from already-decoded PEM blobs.
    pub fn from_pem(
        cert_pem: impl Into<Vec<u8>>,
        key_pem: impl Into<Vec<u8>>,
        peer_pem: impl Into<Vec<u8>>,
    ) -> Result<Self, CertError> {
        let provider = Self {
            cert_pem: cert_pem.into(),
            key_pem: key_pem.into(),
            peer_pem: peer_pem.into(),
        };
        let identity = provider.local_identity()?;
        let roots = provider.peer_roots()?;
        debug!(
            chain_len = identity.cert_chain.len(),
            trust_anchors = roots.len(),
            "Loaded encoded TLS material"
        );
        Ok(provider)
    }
}

impl CertProvider for EncodedCertProvider {
    fn local_identity(&self) -> Result<Identity, CertError> {
        Identity::from_pem(&self.cert_pem, &self.key_pem)
    }

    fn peer_trust_pem(&self) -> &[u8] {
        &self.peer_pem
    }
}

/// Decode one base64 field, tolerating line wrapping.
fn decode_field(value: &str, field: &'static str) -> Result<Vec<u8>, CertError> {
    let compact: String = value.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    STANDARD
        .decode(compact)
        .map_err(|source| CertError::Decode { field, source })
}
