//! Tunnel driver configuration.

use std::time::Duration;

use rcp_core::AgentConfig;

use crate::target::LocalTarget;

/// Configuration for one reverse-connect driver.
#[derive(Debug, Clone)]
pub struct TunnelConfig {
    /// `host:port` of the rendezvous listener.
    pub rendezvous_addr: String,

    /// The local service each session is bridged to.
    pub target: LocalTarget,

    /// Delay between failed dial attempts.
    pub retry_interval: Duration,

    /// Upper bound for TCP connect plus TLS handshake to the rendezvous.
    pub dial_timeout: Duration,
}

impl TunnelConfig {
    /// Create a config with the default retry interval (1s) and dial
    /// timeout (10s).
    pub fn new(rendezvous_addr: impl Into<String>, target: LocalTarget) -> Self {
        Self {
            rendezvous_addr: rendezvous_addr.into(),
            target,
            retry_interval: Duration::from_secs(1),
            dial_timeout: Duration::from_secs(10),
        }
    }

    #[must_use]
    pub const fn with_retry_interval(mut self, retry_interval: Duration) -> Self {
        self.retry_interval = retry_interval;
        self
    }

    #[must_use]
    pub const fn with_dial_timeout(mut self, dial_timeout: Duration) -> Self {
        self.dial_timeout = dial_timeout;
        self
    }

    /// Derive the tunnel settings from an agent config. `None` when no
    /// rendezvous address is configured.
    pub fn from_agent_config(config: &AgentConfig) -> Option<Self> {
        let rendezvous = config.rendezvous_address.as_ref()?;
        Some(
            Self::new(
                rendezvous.clone(),
                LocalTarget::new(config.local_kind, config.local_address.clone()),
            )
            .with_retry_interval(config.retry_interval())
            .with_dial_timeout(config.dial_timeout()),
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use rcp_core::TargetKind;

    #[test]
    fn tunnel_config_new() {
        let config = TunnelConfig::new("10.0.0.1:8123", LocalTarget::unix("/run/t.sock"));
        assert_eq!(config.rendezvous_addr, "10.0.0.1:8123");
        assert_eq!(config.retry_interval, Duration::from_secs(1));
        assert_eq!(config.dial_timeout, Duration::from_secs(10));
        assert_eq!(config.target.kind, TargetKind::Unix);
    }

    #[test]
    fn builder_overrides() {
        let config = TunnelConfig::new("h:1", LocalTarget::tcp("127.0.0.1:2"))
            .with_retry_interval(Duration::from_millis(50))
            .with_dial_timeout(Duration::from_millis(500));
        assert_eq!(config.retry_interval, Duration::from_millis(50));
        assert_eq!(config.dial_timeout, Duration::from_millis(500));
    }

    #[test]
    fn from_agent_config_requires_rendezvous() {
        let mut agent = AgentConfig::default();
        assert!(TunnelConfig::from_agent_config(&agent).is_none());

        agent.rendezvous_address = Some("192.168.1.5:7000".into());
        agent.local_kind = TargetKind::Tcp;
        agent.local_address = "127.0.0.1:50051".into();
        agent.retry_interval_ms = 200;

        let config = TunnelConfig::from_agent_config(&agent).unwrap();
        assert_eq!(config.rendezvous_addr, "192.168.1.5:7000");
        assert_eq!(config.target, LocalTarget::tcp("127.0.0.1:50051"));
        assert_eq!(config.retry_interval, Duration::from_millis(200));
    }
}
