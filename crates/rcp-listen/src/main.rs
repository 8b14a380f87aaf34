//! `rcp` Listener
//!
//! Operator-side rendezvous point. Waits for exactly one agent to dial in
//! over mutual TLS, then exposes that connection on a local socket so local
//! tooling can talk to the agent's target service.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;

use rcp_certs::{CertProvider, EmbeddedCertProvider, EncodedCertProvider};
use rcp_core::TargetKind;
use rcp_core::tracing_init::{default_filter, init_tracing};
use rcp_tunnel::{LocalListener, LocalTarget, RendezvousListener, SessionEnd, TunnelError};

#[derive(Parser, Debug)]
#[command(name = "rcp-listen")]
#[command(
    version,
    about = "rcp listener - accept one agent and bridge it to a local socket"
)]
struct Args {
    /// Rendezvous port. 0 picks an ephemeral port.
    #[arg(long, default_value_t = 0, env = "RCP_LISTEN_PORT")]
    port: u16,

    /// Address to bind the rendezvous listener on.
    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED), env = "RCP_LISTEN_BIND")]
    bind: IpAddr,

    /// Local endpoint to expose the tunnel on: socket path or `host:port`.
    #[arg(long, default_value = "/tmp/rcp-listen.sock", env = "RCP_LOCAL_ADDRESS")]
    local_address: String,

    /// Local endpoint kind.
    #[arg(long, default_value = "unix", env = "RCP_LOCAL_KIND", value_parser = ["unix", "tcp"])]
    local_kind: String,

    /// Listener certificate (PEM). Uses the embedded identity if absent.
    #[arg(long, env = "RCP_LISTEN_CERT", requires_all = ["key", "ca"])]
    cert: Option<PathBuf>,

    /// Listener private key (PEM).
    #[arg(long, env = "RCP_LISTEN_KEY", requires_all = ["cert", "ca"])]
    key: Option<PathBuf>,

    /// Trust bundle for agent certificates (PEM).
    #[arg(long, env = "RCP_LISTEN_CA", requires_all = ["cert", "key"])]
    ca: Option<PathBuf>,

    /// Write the bound rendezvous address to this file once listening.
    #[arg(long, env = "RCP_ADDRESS_FILE")]
    address_file: Option<PathBuf>,

    /// Log level filter (e.g. "info", "debug", "warn").
    #[arg(long, default_value = "info", env = "RCP_LOG_LEVEL")]
    log_level: String,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, env = "RCP_LOG_JSON")]
    log_json: bool,
}

impl Args {
    fn local_target(&self) -> anyhow::Result<LocalTarget> {
        let kind = self
            .local_kind
            .parse::<TargetKind>()
            .map_err(anyhow::Error::msg)?;
        Ok(LocalTarget::new(kind, self.local_address.clone()))
    }

    fn cert_provider(&self) -> anyhow::Result<Box<dyn CertProvider>> {
        let (Some(cert), Some(key), Some(ca)) = (&self.cert, &self.key, &self.ca) else {
            return Ok(Box::new(EmbeddedCertProvider::listener()));
        };
        let provider = EncodedCertProvider::from_pem(read(cert)?, read(key)?, read(ca)?)
            .context("Invalid listener TLS material")?;
        Ok(Box::new(provider))
    }
}

fn read(path: &Path) -> anyhow::Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_tracing(&default_filter("rcp_listen", &args.log_level), args.log_json);

    let certs = args.cert_provider()?;
    let target = args.local_target()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = args.port,
        local = %target,
        "Starting rcp-listen"
    );

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone())?;

    match serve(&cancel, certs.as_ref(), &args, &target).await {
        Ok(end) => info!(?end, "Session finished"),
        Err(TunnelError::Cancelled) => info!("Cancelled before the session ended"),
        Err(e) => return Err(e).context("Rendezvous failed"),
    }

    info!("Shutdown complete");
    Ok(())
}

async fn serve(
    cancel: &CancellationToken,
    certs: &dyn CertProvider,
    args: &Args,
    target: &LocalTarget,
) -> Result<SessionEnd, TunnelError> {
    let listener = RendezvousListener::bind_addr(certs, SocketAddr::new(args.bind, args.port)).await?;
    let bound = listener.local_addr();
    info!(addr = %bound, "Waiting for agent");
    if let Some(path) = &args.address_file {
        std::fs::write(path, bound.to_string())?;
    }

    let remote = listener.accept(cancel).await?;

    let local = LocalListener::bind(target).await?;
    info!(addr = %local.local_addr(), "Waiting for local client");
    rcp_tunnel::serve_local(cancel, local, remote).await
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
