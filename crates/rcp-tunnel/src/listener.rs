//! One-shot mutual-TLS rendezvous listener.
//!
//! The listener is a bootstrap rendezvous, not a server: it accepts exactly
//! one connection and is consumed doing so, so no second caller can race
//! for the slot.

use std::net::{Ipv4Addr, SocketAddr};

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use rcp_certs::CertProvider;

use crate::error::TunnelError;
use crate::tls::{self, HANDSHAKE_TIMEOUT};

/// The accepted, authenticated rendezvous connection.
pub type RendezvousStream = tokio_rustls::server::TlsStream<TcpStream>;

pub struct RendezvousListener {
    listener: TcpListener,
    acceptor: TlsAcceptor,
    local_addr: SocketAddr,
}

impl RendezvousListener {
    /// Bind on all interfaces. Port 0 picks an ephemeral port, available
    /// through [`local_addr`](Self::local_addr).
    pub async fn bind(certs: &dyn CertProvider, port: u16) -> Result<Self, TunnelError> {
        Self::bind_addr(certs, SocketAddr::from((Ipv4Addr::UNSPECIFIED, port))).await
    }

    pub async fn bind_addr(
        certs: &dyn CertProvider,
        addr: SocketAddr,
    ) -> Result<Self, TunnelError> {
        let acceptor = tls::acceptor(certs)?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| TunnelError::Bind {
                address: addr.to_string(),
                source,
            })?;
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, "Rendezvous listener bound");
        Ok(Self {
            listener,
            acceptor,
            local_addr,
        })
    }

    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept one connection and complete the mutual-TLS handshake.
    ///
    /// Returns `TunnelError::Cancelled` if `cancel` fires before a
    /// connection is accepted. Once a connection is accepted, cancellation no
    /// longer applies: the handshake runs to completion, bounded only by
    /// [`HANDSHAKE_TIMEOUT`]. The listening socket is closed once this
    /// returns, whatever the outcome.
    pub async fn accept(self, cancel: &CancellationToken) -> Result<RendezvousStream, TunnelError> {
        let Self {
            listener,
            acceptor,
            local_addr,
        } = self;

        // Scoped to the wait for a connection.
        let accept_cancel = cancel.child_token();

        let (stream, peer) = tokio::select! {
            biased;
            accepted = listener.accept() => accepted?,
            () = accept_cancel.cancelled() => {
                info!(addr = %local_addr, "Rendezvous listener cancelled");
                return Err(TunnelError::Cancelled);
            }
        };
        // Accepted: from here on only the handshake timeout applies.
        accept_cancel.cancel();
        drop(listener);
        info!(peer = %peer, "Accepted rendezvous connection");

        match tokio::time::timeout(HANDSHAKE_TIMEOUT, acceptor.accept(stream)).await {
            Ok(Ok(tls)) => {
                info!(peer = %peer, "Rendezvous peer authenticated");
                Ok(tls)
            }
            Ok(Err(e)) => {
                warn!(peer = %peer, error = %e, "Rendezvous handshake rejected");
                Err(TunnelError::Handshake(e))
            }
            Err(_) => Err(TunnelError::Timeout(format!(
                "waiting for handshake from {peer}"
            ))),
        }
    }
}

/// Bind, report the bound address through `bound`, then accept exactly one
/// authenticated connection.
pub async fn listen_and_accept(
    cancel: &CancellationToken,
    certs: &dyn CertProvider,
    port: u16,
    bound: oneshot::Sender<SocketAddr>,
) -> Result<RendezvousStream, TunnelError> {
    let listener = RendezvousListener::bind(certs, port).await?;
    let _ = bound.send(listener.local_addr());
    listener.accept(cancel).await
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;
    use rcp_certs::EmbeddedCertProvider;

    async fn loopback_listener() -> RendezvousListener {
        RendezvousListener::bind_addr(
            &EmbeddedCertProvider::listener(),
            "127.0.0.1:0".parse().unwrap(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn ephemeral_port_is_reported() {
        let listener = loopback_listener().await;
        assert_ne!(listener.local_addr().port(), 0);
    }

    #[tokio::test]
    async fn cancelled_before_connect_returns_cancelled() {
        let listener = loopback_listener().await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_secs(1), listener.accept(&cancel))
            .await
            .unwrap();
        assert!(matches!(result, Err(TunnelError::Cancelled)));
    }

    #[tokio::test]
    async fn cancel_while_waiting_unblocks() {
        let listener = loopback_listener().await;
        let addr = listener.local_addr();
        let cancel = CancellationToken::new();

        let accept = tokio::spawn({
            let cancel = cancel.clone();
            async move { listener.accept(&cancel).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_secs(1), accept)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(TunnelError::Cancelled)));

        // The listening socket is gone once accept returned.
        let err = TcpStream::connect(addr).await.err().unwrap();
        assert_eq!(err.kind(), std::io::ErrorKind::ConnectionRefused);
    }

    #[tokio::test]
    async fn pending_connection_is_delivered_despite_cancellation() {
        let listener = loopback_listener().await;
        let addr = listener.local_addr();

        // The agent's TCP connection is queued before the token fires.
        let raw = TcpStream::connect(addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let connector = tls::connector(&EmbeddedCertProvider::agent()).unwrap();
        let name = tls::peer_server_name().unwrap();
        let client = tokio::spawn(async move { connector.connect(name, raw).await });

        let accepted = tokio::time::timeout(Duration::from_secs(5), listener.accept(&cancel))
            .await
            .unwrap();
        assert!(accepted.is_ok(), "{:?}", accepted.err());
        assert!(client.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn plain_tcp_client_fails_the_handshake() {
        use tokio::io::AsyncWriteExt;

        let listener = loopback_listener().await;
        let addr = listener.local_addr();
        let cancel = CancellationToken::new();
        let accept = tokio::spawn(async move { listener.accept(&cancel).await });

        let mut raw = TcpStream::connect(addr).await.unwrap();
        raw.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();

        let result = accept.await.unwrap();
        assert!(matches!(result, Err(TunnelError::Handshake(_))));
    }

    #[tokio::test]
    async fn listen_and_accept_reports_port() {
        let cancel = CancellationToken::new();
        let (tx, rx) = oneshot::channel();
        let task = tokio::spawn({
            let cancel = cancel.clone();
            async move {
                listen_and_accept(&cancel, &EmbeddedCertProvider::listener(), 0, tx).await
            }
        });

        let addr = rx.await.unwrap();
        assert_ne!(addr.port(), 0);
        cancel.cancel();
        assert!(matches!(task.await.unwrap(), Err(TunnelError::Cancelled)));
    }
}
