//! Local target endpoints: the service the tunnel ultimately reaches.

use std::fmt;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::debug;

pub use rcp_core::TargetKind;

use crate::error::TunnelError;

/// A bidirectional async byte stream.
///
/// Trait objects can only have a single non-auto principal trait, so
/// `AsyncRead + AsyncWrite` is wrapped into one.
pub trait AsyncStream: AsyncRead + AsyncWrite {}
impl<T> AsyncStream for T where T: AsyncRead + AsyncWrite + ?Sized {}

/// A connection whose concrete transport (TLS, TCP, unix) is erased.
pub type BoxedStream = Box<dyn AsyncStream + Unpin + Send>;

/// Where the local side of a session lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalTarget {
    pub kind: TargetKind,
    /// Socket path for `Unix`, `host:port` for `Tcp`.
    pub address: String,
}

impl LocalTarget {
    pub fn new(kind: TargetKind, address: impl Into<String>) -> Self {
        Self {
            kind,
            address: address.into(),
        }
    }

    pub fn unix(path: impl Into<String>) -> Self {
        Self::new(TargetKind::Unix, path)
    }

    pub fn tcp(addr: impl Into<String>) -> Self {
        Self::new(TargetKind::Tcp, addr)
    }

    /// Dial the target.
    pub async fn connect(&self) -> Result<BoxedStream, TunnelError> {
        debug!(target_kind = %self.kind, address = %self.address, "Dialing local target");
        match self.kind {
            TargetKind::Tcp => {
                let stream = TcpStream::connect(&self.address)
                    .await
                    .map_err(|source| self.unavailable(source))?;
                let _ = stream.set_nodelay(true);
                Ok(Box::new(stream))
            }
            TargetKind::Unix => self.connect_unix().await,
        }
    }

    #[cfg(unix)]
    async fn connect_unix(&self) -> Result<BoxedStream, TunnelError> {
        let stream = tokio::net::UnixStream::connect(&self.address)
            .await
            .map_err(|source| self.unavailable(source))?;
        Ok(Box::new(stream))
    }

    #[cfg(not(unix))]
    async fn connect_unix(&self) -> Result<BoxedStream, TunnelError> {
        Err(TunnelError::Unsupported(format!(
            "unix socket target {} on this platform",
            self.address
        )))
    }

    fn unavailable(&self, source: std::io::Error) -> TunnelError {
        TunnelError::LocalTarget {
            address: self.to_string(),
            source,
        }
    }
}

impl fmt::Display for LocalTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.address)
    }
}
