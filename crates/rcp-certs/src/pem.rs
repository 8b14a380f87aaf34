//! PEM parsing helpers shared by every provider.

use std::io::Cursor;

use rustls::RootCertStore;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};

use crate::error::CertError;

/// Parse every certificate in a PEM blob. At least one is required.
pub fn parse_certificates(
    pem: &[u8],
    field: &'static str,
) -> Result<Vec<CertificateDer<'static>>, CertError> {
    let certs = rustls_pemfile::certs(&mut Cursor::new(pem))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| CertError::Pem { field, source })?;
    if certs.is_empty() {
        return Err(CertError::MissingCertificate(field));
    }
    Ok(certs)
}

/// Parse the first private key (PKCS#8, PKCS#1 or SEC1) in a PEM blob.
pub fn parse_private_key(
    pem: &[u8],
    field: &'static str,
) -> Result<PrivateKeyDer<'static>, CertError> {
    rustls_pemfile::private_key(&mut Cursor::new(pem))
        .map_err(|source| CertError::Pem { field, source })?
        .ok_or(CertError::MissingKey(field))
}

/// Build a root store holding every certificate in the PEM blob.
pub fn root_store(pem: &[u8], field: &'static str) -> Result<RootCertStore, CertError> {
    let mut roots = RootCertStore::empty();
    for cert in parse_certificates(pem, field)? {
        roots
            .add(cert)
            .map_err(|source| CertError::TrustAnchor { field, source })?;
    }
    Ok(roots)
}
