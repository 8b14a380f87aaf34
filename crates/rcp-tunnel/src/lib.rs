//! `rcp` reverse-connect tunnel
//!
//! A machine with no inbound reachability (the agent) dials out to a
//! rendezvous listener over mutually authenticated TLS 1.3. Each
//! connection is then bridged to a service that is only reachable on the
//! agent's side, so the listener's side can talk to it.
//!
//! ## Parts
//!
//! - [`listener`]: one-shot rendezvous listener (accept exactly one peer)
//! - [`driver`]: reverse-connect loop on the agent with quiet retry
//! - [`bridge`]: duplex byte relay between two established connections
//! - [`local_proxy`]: listener-side local endpoint for local clients
//! - [`target`]: the local service the agent bridges to

pub mod bridge;
pub mod config;
pub mod driver;
pub mod error;
pub mod listener;
pub mod local_proxy;
pub mod target;
pub mod tls;

pub use bridge::{Direction, Leg, SessionEnd, relay};
pub use config::TunnelConfig;
pub use driver::{DialedStream, RetryState, ReverseConnectDriver, run};
pub use error::{ErrorClass, TunnelError, classify_io_error};
pub use listener::{RendezvousListener, RendezvousStream, listen_and_accept};
pub use local_proxy::{LocalListener, serve_local};
pub use target::{AsyncStream, BoxedStream, LocalTarget, TargetKind};
