//! Tunnel error types and failure classification.

use std::io;

use rcp_certs::CertError;

/// Errors that can occur while establishing or relaying a tunnel session.
#[derive(Debug, thiserror::Error)]
pub enum TunnelError {
    #[error("Certificate error: {0}")]
    Cert(#[from] CertError),

    #[error("TLS configuration error: {0}")]
    TlsConfig(#[source] rustls::Error),

    #[error("Client verifier error: {0}")]
    Verifier(#[from] rustls::server::VerifierBuilderError),

    #[error("Invalid peer name {0:?}")]
    ServerName(String),

    #[error("Failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("TLS handshake failed: {0}")]
    Handshake(#[source] io::Error),

    #[error("Local target {address} unavailable: {source}")]
    LocalTarget {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("Timed out {0}")]
    Timeout(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Cancelled")]
    Cancelled,
}

impl TunnelError {
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Classify this error for logging and retry decisions.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Connect { source, .. }
            | Self::LocalTarget { source, .. }
            | Self::Handshake(source)
            | Self::Io(source) => classify_io_error(source),
            _ => ErrorClass::Other,
        }
    }
}

/// Coarse outcome of a failed network operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Nothing is listening at the destination.
    Refused,
    /// The peer went away: clean close, broken pipe, reset or an operation
    /// on an already closed connection.
    Closed,
    /// Anything else, usually a misconfiguration.
    Other,
}

/// Classify an I/O error.
pub fn classify_io_error(err: &io::Error) -> ErrorClass {
    match err.kind() {
        io::ErrorKind::ConnectionRefused => ErrorClass::Refused,
        io::ErrorKind::UnexpectedEof
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::NotConnected => ErrorClass::Closed,
        _ => ErrorClass::Other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refused_is_recognised() {
        let err = io::Error::from(io::ErrorKind::ConnectionRefused);
        assert_eq!(classify_io_error(&err), ErrorClass::Refused);

        let wrapped = TunnelError::Connect {
            address: "127.0.0.1:1".into(),
            source: err,
        };
        assert_eq!(wrapped.class(), ErrorClass::Refused);
    }

    #[test]
    fn peer_closure_kinds_are_benign() {
        for kind in [
            io::ErrorKind::UnexpectedEof,
            io::ErrorKind::BrokenPipe,
            io::ErrorKind::ConnectionReset,
            io::ErrorKind::NotConnected,
        ] {
            assert_eq!(classify_io_error(&io::Error::from(kind)), ErrorClass::Closed);
        }
    }

    #[test]
    fn everything_else_is_other() {
        let err = io::Error::new(io::ErrorKind::InvalidData, "bad certificate");
        assert_eq!(classify_io_error(&err), ErrorClass::Other);
        assert_eq!(TunnelError::Handshake(err).class(), ErrorClass::Other);
        assert_eq!(TunnelError::Timeout("dialing".into()).class(), ErrorClass::Other);
        assert_eq!(TunnelError::Cancelled.class(), ErrorClass::Other);
        assert!(TunnelError::Cancelled.is_cancelled());
    }
}
