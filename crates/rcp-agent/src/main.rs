//! `rcp` Agent
//!
//! Runs on the network-isolated host. Provisions auxiliary files and
//! services, then keeps a reverse-connect tunnel to the rendezvous listener
//! so the operator can reach the local target service.

mod provision;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use rcp_certs::{CertProvider, EmbeddedCertProvider, EncodedCertProvider};
use rcp_core::config::load_config;
use rcp_core::tracing_init::{default_filter, init_tracing};
use rcp_core::{AgentConfig, TargetKind};
use rcp_tunnel::{ReverseConnectDriver, TunnelConfig, TunnelError};

use crate::provision::Provisioner;

#[derive(Parser, Debug)]
#[command(name = "rcp-agent")]
#[command(
    version,
    about = "rcp agent - reverse-connect proxy from this host to an operator's listener"
)]
struct Args {
    /// Config file (TOML). Defaults to /etc/rcp-agent/config.toml, then
    /// ./rcp-agent.toml.
    #[arg(long, env = "RCP_AGENT_CONFIG")]
    config: Option<PathBuf>,

    /// Rendezvous listener address (`host:port`). Overrides the config file.
    #[arg(long, env = "RCP_RENDEZVOUS_ADDRESS")]
    rendezvous_address: Option<String>,

    /// Local target address: socket path or `host:port`.
    #[arg(long, env = "RCP_LOCAL_ADDRESS")]
    local_address: Option<String>,

    /// Local target kind.
    #[arg(long, env = "RCP_LOCAL_KIND", value_parser = ["unix", "tcp"])]
    local_kind: Option<String>,

    /// Milliseconds between failed dial attempts.
    #[arg(long, env = "RCP_RETRY_INTERVAL_MS")]
    retry_interval_ms: Option<u64>,

    /// Log level filter (e.g. "info", "debug", "warn").
    #[arg(long, default_value = "info", env = "RCP_LOG_LEVEL")]
    log_level: String,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, env = "RCP_LOG_JSON")]
    log_json: bool,
}

impl Args {
    /// Apply command-line and environment overrides on top of the file.
    fn apply(&self, config: &mut AgentConfig) -> anyhow::Result<()> {
        if let Some(addr) = &self.rendezvous_address {
            config.rendezvous_address = Some(addr.clone());
        }
        if let Some(addr) = &self.local_address {
            config.local_address.clone_from(addr);
        }
        if let Some(kind) = &self.local_kind {
            config.local_kind = kind.parse::<TargetKind>().map_err(anyhow::Error::msg)?;
        }
        if let Some(ms) = self.retry_interval_ms {
            config.retry_interval_ms = ms;
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_tracing(&default_filter("rcp_agent", &args.log_level), args.log_json);

    let mut config = load_config(args.config.as_deref()).context("Failed to load config")?;
    args.apply(&mut config)?;
    config.validate().context("Invalid configuration")?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        rendezvous = config.rendezvous_address.as_deref().unwrap_or("-"),
        files = config.files.len(),
        services = config.services.len(),
        "Starting rcp-agent"
    );

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone())?;

    // TLS material is checked before provisioning touches the host.
    let driver = prepare_driver(&config)?;

    if !config.files.is_empty() || !config.services.is_empty() {
        Provisioner::new()?.run(&config).await?;
    }

    let Some(mut driver) = driver else {
        warn!("No rendezvous address configured, exiting after provisioning");
        return Ok(());
    };

    match driver.run(&cancel).await {
        Ok(()) | Err(TunnelError::Cancelled) => {}
        Err(e) => return Err(e).context("Reverse-connect proxy error"),
    }

    info!("Shutdown complete");
    Ok(())
}

/// Build the reverse-connect driver, or `None` when no rendezvous address
/// is configured. Broken TLS material fails here.
fn prepare_driver(config: &AgentConfig) -> anyhow::Result<Option<ReverseConnectDriver>> {
    let Some(tunnel_config) = TunnelConfig::from_agent_config(config) else {
        return Ok(None);
    };
    let certs = cert_provider(config)?;
    info!(
        rendezvous = %tunnel_config.rendezvous_addr,
        target = %tunnel_config.target,
        "Starting reverse-connect proxy"
    );
    let driver = ReverseConnectDriver::new(certs.as_ref(), tunnel_config)
        .context("Failed to set up reverse-connect proxy")?;
    Ok(Some(driver))
}

/// Identity from the `[tls]` table, or the compiled-in agent identity when
/// the table is empty.
fn cert_provider(config: &AgentConfig) -> anyhow::Result<Arc<dyn CertProvider>> {
    if config.tls.is_empty() {
        info!("No TLS material configured, using embedded agent identity");
        return Ok(Arc::new(EmbeddedCertProvider::agent()));
    }
    let provider = EncodedCertProvider::from_base64(
        &config.tls.client_cert,
        &config.tls.client_key,
        &config.tls.server_cert,
    )
    .context("Invalid TLS material in config")?;
    Ok(Arc::new(provider))
}

/// Cancel `cancel` on Ctrl+C or SIGTERM.
fn spawn_signal_handler(cancel: CancellationToken) -> anyhow::Result<()> {
    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::spawn(async move {
        #[cfg(unix)]
        let sigterm_future = sigterm.recv();
        #[cfg(not(unix))]
        let sigterm_future = std::future::pending::<Option<()>>();

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C shutdown signal");
            }
            _ = sigterm_future => {
                info!("Received SIGTERM shutdown signal");
            }
        }
        cancel.cancel();
    });
    Ok(())
}
