//! Local endpoint on the listener side.
//!
//! Once the rendezvous connection is up, a local client (on a unix socket
//! or a TCP port) is accepted and bridged to it, so that local tooling can
//! reach the agent's service as if it were local.

use std::path::{Path, PathBuf};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bridge::{self, Leg, SessionEnd};
use crate::error::TunnelError;
use crate::target::{BoxedStream, LocalTarget, TargetKind};

/// Removes the socket file when dropped.
#[cfg(unix)]
#[derive(Debug)]
pub struct SocketFileGuard {
    path: PathBuf,
}

#[cfg(unix)]
impl Drop for SocketFileGuard {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to remove socket file");
            }
        }
    }
}

#[derive(Debug)]
pub enum LocalListener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix {
        listener: tokio::net::UnixListener,
        guard: SocketFileGuard,
    },
}

impl LocalListener {
    /// Bind the local endpoint described by `target`. A stale unix socket
    /// left at the path by an earlier run is replaced.
    pub async fn bind(target: &LocalTarget) -> Result<Self, TunnelError> {
        let bind_err = |source| TunnelError::Bind {
            address: target.to_string(),
            source,
        };
        match target.kind {
            TargetKind::Tcp => {
                let listener = TcpListener::bind(&target.address).await.map_err(bind_err)?;
                Ok(Self::Tcp(listener))
            }
            TargetKind::Unix => Self::bind_unix(Path::new(&target.address)).map_err(bind_err),
        }
    }

    #[cfg(unix)]
    fn bind_unix(path: &Path) -> std::io::Result<Self> {
        match std::fs::remove_file(path) {
            Ok(()) => debug!(path = %path.display(), "Removed stale socket"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        let listener = tokio::net::UnixListener::bind(path)?;
        Ok(Self::Unix {
            listener,
            guard: SocketFileGuard {
                path: path.to_path_buf(),
            },
        })
    }

    #[cfg(not(unix))]
    fn bind_unix(path: &Path) -> std::io::Result<Self> {
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            format!("unix socket {} on this platform", path.display()),
        ))
    }

    /// Printable bound address: `host:port` or the socket path.
    pub fn local_addr(&self) -> String {
        match self {
            Self::Tcp(listener) => listener
                .local_addr()
                .map_or_else(|_| "tcp:?".to_string(), |addr| addr.to_string()),
            #[cfg(unix)]
            Self::Unix { guard, .. } => guard.path.display().to_string(),
        }
    }

    /// Accept a single local client. The endpoint is closed (and a unix
    /// socket file removed) once this returns.
    pub async fn accept(self, cancel: &CancellationToken) -> Result<BoxedStream, TunnelError> {
        let addr = self.local_addr();
        let stream: BoxedStream = match self {
            Self::Tcp(listener) => tokio::select! {
                biased;
                accepted = listener.accept() => {
                    let (stream, peer) = accepted?;
                    let _ = stream.set_nodelay(true);
                    debug!(peer = %peer, "Accepted local client");
                    Box::new(stream)
                }
                () = cancel.cancelled() => return Err(TunnelError::Cancelled),
            },
            #[cfg(unix)]
            Self::Unix { listener, guard } => {
                let accepted = tokio::select! {
                    biased;
                    accepted = listener.accept() => accepted,
                    () = cancel.cancelled() => return Err(TunnelError::Cancelled),
                };
                drop(guard);
                let (stream, _) = accepted?;
                Box::new(stream)
            }
        };
        info!(addr = %addr, "Local client connected");
        Ok(stream)
    }
}

/// Accept one local client on `listener` and bridge it to `remote` until
/// either side closes or `cancel` fires.
pub async fn serve_local<S>(
    cancel: &CancellationToken,
    listener: LocalListener,
    remote: S,
) -> Result<SessionEnd, TunnelError>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let local = listener.accept(cancel).await?;
    Ok(bridge::relay(cancel, Leg::new("local", local), Leg::new("remote", remote)).await)
}
