//! Compiled-in identities for self-contained deployments.
//!
//! Both roles are issued by the same embedded CA, so an agent built from
//! this crate reaches a listener built from this crate with no extra
//! configuration. Anyone holding the binary holds the keys: use encoded
//! material for anything that must keep other parties out.

use crate::error::CertError;
use crate::provider::{CertProvider, Identity};

const CA_PEM: &[u8] = include_bytes!("../certs/ca.pem");
const LISTENER_CERT_PEM: &[u8] = include_bytes!("../certs/server.pem");
const LISTENER_KEY_PEM: &[u8] = include_bytes!("../certs/server-key.pem");
const AGENT_CERT_PEM: &[u8] = include_bytes!("../certs/client.pem");
const AGENT_KEY_PEM: &[u8] = include_bytes!("../certs/client-key.pem");

/// Which side of the tunnel the identity belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The isolated side that dials out.
    Agent,
    /// The passively reachable side at the rendezvous point.
    Listener,
}

#[derive(Debug, Clone, Copy)]
pub struct EmbeddedCertProvider {
    role: Role,
}

impl EmbeddedCertProvider {
    pub const fn agent() -> Self {
        Self { role: Role::Agent }
    }

    pub const fn listener() -> Self {
        Self {
            role: Role::Listener,
        }
    }

    pub const fn role(&self) -> Role {
        self.role
    }
}

impl CertProvider for EmbeddedCertProvider {
    fn local_identity(&self) -> Result<Identity, CertError> {
        match self.role {
            Role::Agent => Identity::from_pem(AGENT_CERT_PEM, AGENT_KEY_PEM),
            Role::Listener => Identity::from_pem(LISTENER_CERT_PEM, LISTENER_KEY_PEM),
        }
    }

    fn peer_trust_pem(&self) -> &[u8] {
        CA_PEM
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn both_roles_load() {
        for provider in [EmbeddedCertProvider::agent(), EmbeddedCertProvider::listener()] {
            let identity = provider.local_identity().unwrap();
            assert_eq!(identity.cert_chain.len(), 1);
            assert_eq!(provider.peer_roots().unwrap().len(), 1);
        }
    }

    #[test]
    fn roles_present_different_certificates() {
        let agent = EmbeddedCertProvider::agent().local_identity().unwrap();
        let listener = EmbeddedCertProvider::listener().local_identity().unwrap();
        assert_ne!(agent.cert_chain[0], listener.cert_chain[0]);
        assert_eq!(EmbeddedCertProvider::agent().role(), Role::Agent);
    }
}
