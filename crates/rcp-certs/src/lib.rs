//! `rcp` certificate providers
//!
//! Supplies the local mTLS identity and the trust bundle used to verify the
//! counterpart. The dialing agent and the rendezvous listener each need the
//! complementary provider: the agent's identity must chain to the listener's
//! trust bundle and vice versa.
//!
//! ## Variants
//!
//! - [`EncodedCertProvider`]: base64 PEM fields from the agent config
//! - [`EmbeddedCertProvider`]: compiled-in material for self-contained setups
//! - `generate` (feature `certs`): rcgen-backed PKI for tests and dev

pub mod embedded;
pub mod encoded;
pub mod error;
#[cfg(any(test, feature = "certs"))]
pub mod generate;
pub mod pem;
pub mod provider;

pub use embedded::EmbeddedCertProvider;
pub use encoded::EncodedCertProvider;
pub use error::CertError;
#[cfg(feature = "test-utils")]
pub use generate::{TestPki, test_pki};
pub use provider::{CertProvider, Identity};

/// Name both sides agree on for the listener's certificate. The rendezvous
/// point is not reachable through ordinary name resolution, so the dialer
/// verifies against this fixed name instead of the address it dialed.
pub const PEER_SERVER_NAME: &str = "rcp-server";
