//! Certificate error types.

/// Errors from loading or generating certificate material.
///
/// Every variant except `Generation` signals a broken deployment and is
/// fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum CertError {
    #[error("Invalid base64 in {field}: {source}")]
    Decode {
        field: &'static str,
        #[source]
        source: base64::DecodeError,
    },

    #[error("Malformed PEM in {field}: {source}")]
    Pem {
        field: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("No certificate found in {0}")]
    MissingCertificate(&'static str),

    #[error("No private key found in {0}")]
    MissingKey(&'static str),

    #[error("Unusable private key: {0}")]
    UnusableKey(rustls::Error),

    #[error("Private key does not match the certificate: {0}")]
    KeyMismatch(rustls::Error),

    #[error("Untrusted anchor in {field}: {source}")]
    TrustAnchor {
        field: &'static str,
        #[source]
        source: rustls::Error,
    },

    #[error("Certificate generation error: {0}")]
    Generation(String),
}
