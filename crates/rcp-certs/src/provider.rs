//! The certificate-provider capability.

use std::fmt;
use std::sync::Arc;

use rustls::RootCertStore;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::sign::CertifiedKey;

use crate::error::CertError;
use crate::pem;

/// A local mTLS identity: certificate chain plus the matching private key.
pub struct Identity {
    pub cert_chain: Vec<CertificateDer<'static>>,
    pub key: PrivateKeyDer<'static>,
}

impl Identity {
    /// Parse an identity from PEM blobs and make sure the key is one rustls
    /// can sign with and belongs to the leaf certificate.
    pub fn from_pem(cert_pem: &[u8], key_pem: &[u8]) -> Result<Self, CertError> {
        let cert_chain = pem::parse_certificates(cert_pem, "local certificate")?;
        let key = pem::parse_private_key(key_pem, "local key")?;
        CertifiedKey::from_der(
            cert_chain.clone(),
            key.clone_key(),
            &rustls::crypto::ring::default_provider(),
        )
        .map_err(|e| match e {
            rustls::Error::InconsistentKeys(_) => CertError::KeyMismatch(e),
            other => CertError::UnusableKey(other),
        })?;
        Ok(Self { cert_chain, key })
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("cert_chain_len", &self.cert_chain.len())
            .finish_non_exhaustive()
    }
}

/// Source of the local identity and the counterpart's trust bundle.
///
/// The TLS plumbing depends only on this trait, never on a concrete variant.
pub trait CertProvider: Send + Sync {
    /// The identity this side presents during the handshake.
    fn local_identity(&self) -> Result<Identity, CertError>;

    /// PEM bytes of the certificates the counterpart must chain to.
    fn peer_trust_pem(&self) -> &[u8];

    /// Trust bundle as a rustls root store.
    fn peer_roots(&self) -> Result<RootCertStore, CertError> {
        pem::root_store(self.peer_trust_pem(), "peer trust bundle")
    }
}

impl<T: CertProvider + ?Sized> CertProvider for Arc<T> {
    fn local_identity(&self) -> Result<Identity, CertError> {
        (**self).local_identity()
    }

    fn peer_trust_pem(&self) -> &[u8] {
        (**self).peer_trust_pem()
    }
}
