//! Certificate generation using rcgen.
//!
//! Generates a throwaway CA plus listener and agent leaf certificates for
//! tests and local development. NOT suitable for production use.
//!
//! Requires the `certs` feature to be enabled.

use rcgen::{
    BasicConstraints, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa, Issuer, KeyPair,
    KeyUsagePurpose,
};

use crate::PEER_SERVER_NAME;
use crate::encoded::EncodedCertProvider;
use crate::error::CertError;

/// CA material for signing leaf certificates.
pub struct CaBundle {
    /// CA certificate parameters (needed for signing).
    pub params: CertificateParams,
    /// CA key pair.
    pub key_pair: KeyPair,
    /// PEM-encoded CA certificate.
    pub ca_cert_pem: String,
}

/// PEM-encoded leaf certificate and key.
pub struct LeafBundle {
    pub cert_pem: String,
    pub key_pem: String,
}

/// Generate a self-signed CA.
pub fn generate_ca(org_name: &str) -> Result<CaBundle, CertError> {
    let mut params = CertificateParams::default();
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params
        .distinguished_name
        .push(DnType::CommonName, format!("{org_name} CA"));
    params
        .distinguished_name
        .push(DnType::OrganizationName, org_name);
    params.key_usages.push(KeyUsagePurpose::KeyCertSign);
    params.key_usages.push(KeyUsagePurpose::CrlSign);

    let key_pair = KeyPair::generate().map_err(|e| CertError::Generation(e.to_string()))?;
    let ca_cert = params
        .self_signed(&key_pair)
        .map_err(|e| CertError::Generation(e.to_string()))?;

    Ok(CaBundle {
        ca_cert_pem: ca_cert.pem(),
        params,
        key_pair,
    })
}

/// Generate a leaf certificate signed by the given CA.
///
/// Every leaf carries [`PEER_SERVER_NAME`] as its DNS name and both
/// server and client auth usages, so the same issuance works for either
/// role.
pub fn generate_leaf(ca: &CaBundle, common_name: &str) -> Result<LeafBundle, CertError> {
    let issuer = Issuer::from_params(&ca.params, &ca.key_pair);

    let mut params = CertificateParams::new(vec![PEER_SERVER_NAME.to_string()])
        .map_err(|e| CertError::Generation(e.to_string()))?;
    params
        .distinguished_name
        .push(DnType::CommonName, common_name);
    params.key_usages.push(KeyUsagePurpose::DigitalSignature);
    params
        .extended_key_usages
        .push(ExtendedKeyUsagePurpose::ServerAuth);
    params
        .extended_key_usages
        .push(ExtendedKeyUsagePurpose::ClientAuth);

    let leaf_key = KeyPair::generate().map_err(|e| CertError::Generation(e.to_string()))?;
    let leaf_cert = params
        .signed_by(&leaf_key, &issuer)
        .map_err(|e| CertError::Generation(e.to_string()))?;

    Ok(LeafBundle {
        cert_pem: leaf_cert.pem(),
        key_pem: leaf_key.serialize_pem(),
    })
}

/// Complementary providers issued by one fresh CA.
pub struct TestPki {
    pub listener: EncodedCertProvider,
    pub agent: EncodedCertProvider,
}

/// Generate a CA and one identity per role, each trusting the CA.
pub fn test_pki() -> Result<TestPki, CertError> {
    let ca = generate_ca("rcp Test")?;
    let listener = generate_leaf(&ca, "rcp-listener")?;
    let agent = generate_leaf(&ca, "rcp-agent")?;

    Ok(TestPki {
        listener: EncodedCertProvider::from_pem(
            listener.cert_pem,
            listener.key_pem,
            ca.ca_cert_pem.clone(),
        )?,
        agent: EncodedCertProvider::from_pem(agent.cert_pem, agent.key_pem, ca.ca_cert_pem)?,
    })
}
