//! Reverse-connect driver.
//!
//! Dials out to the rendezvous listener, and for every authenticated
//! connection dials the local target and bridges the two. The loop only
//! ends on cancellation: an unreachable rendezvous or target is always
//! treated as transient.

use std::time::Instant;

use rustls::pki_types::ServerName;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use rcp_certs::CertProvider;

use crate::bridge::{self, Leg, SessionEnd};
use crate::config::TunnelConfig;
use crate::error::{ErrorClass, TunnelError};
use crate::tls;

/// The dialer's side of an authenticated rendezvous connection.
pub type DialedStream = tokio_rustls::client::TlsStream<TcpStream>;

/// Per-driver retry bookkeeping.
#[derive(Debug, Default, Clone)]
pub struct RetryState {
    refusing: bool,
    last_attempt: Option<Instant>,
    attempts: u64,
}

impl RetryState {
    pub fn record_attempt(&mut self) {
        self.attempts = self.attempts.saturating_add(1);
        self.last_attempt = Some(Instant::now());
    }

    /// Record a refused dial. Returns `true` only for the first refusal of
    /// a streak, which is the only one worth logging.
    pub const fn record_refused(&mut self) -> bool {
        let first = !self.refusing;
        self.refusing = true;
        first
    }

    pub const fn record_success(&mut self) {
        self.refusing = false;
    }

    pub const fn in_refusal_streak(&self) -> bool {
        self.refusing
    }

    pub const fn last_attempt(&self) -> Option<Instant> {
        self.last_attempt
    }

    pub const fn attempts(&self) -> u64 {
        self.attempts
    }
}

pub struct ReverseConnectDriver {
    config: TunnelConfig,
    connector: TlsConnector,
    server_name: ServerName<'static>,
    retry: RetryState,
}

impl ReverseConnectDriver {
    /// Build the TLS client from `certs`. Bad material fails here, before
    /// any dialing starts.
    pub fn new(certs: &dyn CertProvider, config: TunnelConfig) -> Result<Self, TunnelError> {
        Ok(Self {
            connector: tls::connector(certs)?,
            server_name: tls::peer_server_name()?,
            config,
            retry: RetryState::default(),
        })
    }

    pub const fn config(&self) -> &TunnelConfig {
        &self.config
    }

    pub const fn retry_state(&self) -> &RetryState {
        &self.retry
    }

    /// Run sessions until `cancel` fires, then return
    /// `TunnelError::Cancelled`. Sessions are strictly sequential.
    ///
    /// After a session ends normally the rendezvous is redialed at once.
    /// After a failed dial, or when the local target cannot be reached, the
    /// driver waits `retry_interval` first. An unreachable target would
    /// otherwise make the agent reconnect to the listener in a tight loop.
    pub async fn run(&mut self, cancel: &CancellationToken) -> Result<(), TunnelError> {
        info!(
            rendezvous = %self.config.rendezvous_addr,
            target = %self.config.target,
            retry_ms = self.config.retry_interval.as_millis(),
            "Starting reverse-connect driver"
        );

        loop {
            if cancel.is_cancelled() {
                return Err(TunnelError::Cancelled);
            }

            self.retry.record_attempt();
            let dialed = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(TunnelError::Cancelled),
                result = self.dial_rendezvous() => result,
            };

            let rendezvous = match dialed {
                Ok(stream) => stream,
                Err(e) => {
                    self.report_dial_failure(&e);
                    self.wait_retry(cancel).await?;
                    continue;
                }
            };

            if cancel.is_cancelled() {
                drop(rendezvous);
                return Err(TunnelError::Cancelled);
            }
            self.retry.record_success();

            let peer = rendezvous.get_ref().0.peer_addr().ok();
            info!(peer = ?peer, "Rendezvous connected");

            match self.run_session(cancel, rendezvous).await {
                Ok(SessionEnd::Closed(direction)) => {
                    info!(%direction, "Session ended");
                }
                Ok(SessionEnd::Cancelled) => return Err(TunnelError::Cancelled),
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    error!(error = %e, target = %self.config.target, "Session failed");
                    self.wait_retry(cancel).await?;
                }
            }
        }
    }

    /// TCP connect plus mutual-TLS handshake, bounded by the dial timeout.
    pub async fn dial_rendezvous(&self) -> Result<DialedStream, TunnelError> {
        let addr = &self.config.rendezvous_addr;
        let dial = async {
            let tcp = TcpStream::connect(addr)
                .await
                .map_err(|source| TunnelError::Connect {
                    address: addr.clone(),
                    source,
                })?;
            let _ = tcp.set_nodelay(true);
            self.connector
                .connect(self.server_name.clone(), tcp)
                .await
                .map_err(TunnelError::Handshake)
        };

        tokio::time::timeout(self.config.dial_timeout, dial)
            .await
            .map_err(|_| TunnelError::Timeout(format!("dialing {addr}")))?
    }

    /// Dial the local target and bridge it to `rendezvous`. Both
    /// connections are closed when this returns.
    async fn run_session(
        &self,
        cancel: &CancellationToken,
        rendezvous: DialedStream,
    ) -> Result<SessionEnd, TunnelError> {
        let local = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(TunnelError::Cancelled),
            local = self.config.target.connect() => local?,
        };
        debug!(target = %self.config.target, "Local target connected");

        Ok(bridge::relay(
            cancel,
            Leg::new("rendezvous", rendezvous),
            Leg::new("local", local),
        )
        .await)
    }

    fn report_dial_failure(&mut self, err: &TunnelError) {
        let addr = &self.config.rendezvous_addr;
        match err.class() {
            ErrorClass::Refused => {
                if self.retry.record_refused() {
                    warn!(addr = %addr, "Rendezvous connection refused, will retry silently");
                } else {
                    debug!(addr = %addr, attempt = self.retry.attempts(), "Rendezvous still refusing");
                }
            }
            ErrorClass::Closed | ErrorClass::Other => {
                error!(addr = %addr, error = %err, "Failed to establish rendezvous connection");
            }
        }
    }

    async fn wait_retry(&self, cancel: &CancellationToken) -> Result<(), TunnelError> {
        tokio::select! {
            () = tokio::time::sleep(self.config.retry_interval) => Ok(()),
            () = cancel.cancelled() => Err(TunnelError::Cancelled),
        }
    }
}

/// Build a driver from `certs` and `config` and run it until `cancel`
/// fires.
pub async fn run(
    cancel: &CancellationToken,
    certs: &dyn CertProvider,
    config: TunnelConfig,
) -> Result<(), TunnelError> {
    ReverseConnectDriver::new(certs, config)?.run(cancel).await
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::target::LocalTarget;
    use rcp_certs::EmbeddedCertProvider;

    #[test]
    fn refusal_streak_logs_once() {
        let mut retry = RetryState::default();
        assert!(retry.record_refused());
        assert!(!retry.record_refused());
        assert!(!retry.record_refused());
        assert!(retry.in_refusal_streak());

        retry.record_success();
        assert!(!retry.in_refusal_streak());
        assert!(retry.record_refused());
    }

    #[test]
    fn attempts_are_counted() {
        let mut retry = RetryState::default();
        assert!(retry.last_attempt().is_none());
        retry.record_attempt();
        retry.record_attempt();
        assert_eq!(retry.attempts(), 2);
        assert!(retry.last_attempt().is_some());
    }

    #[tokio::test]
    async fn pre_cancelled_run_returns_immediately() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let config = TunnelConfig::new("127.0.0.1:9", LocalTarget::tcp("127.0.0.1:9"));

        let mut driver = ReverseConnectDriver::new(&EmbeddedCertProvider::agent(), config).unwrap();
        let result = tokio::time::timeout(Duration::from_secs(1), driver.run(&cancel))
            .await
            .unwrap();
        assert!(matches!(result, Err(TunnelError::Cancelled)));
        assert_eq!(driver.retry_state().attempts(), 0);
    }

    #[tokio::test]
    async fn refused_dial_is_classified() {
        let addr = {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };
        let config = TunnelConfig::new(addr.to_string(), LocalTarget::tcp("127.0.0.1:9"));
        let driver = ReverseConnectDriver::new(&EmbeddedCertProvider::agent(), config).unwrap();

        let err = driver.dial_rendezvous().await.err().unwrap();
        assert_eq!(err.class(), ErrorClass::Refused);
    }
}
