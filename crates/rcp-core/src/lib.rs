//! `rcp` Core Library
//!
//! Shared functionality for the `rcp` binaries:
//! - Agent configuration document and loading
//! - Tracing/logging initialization
//! - Common error types

pub mod config;
pub mod error;
pub mod tracing_init;

pub use config::{AgentConfig, AuxiliaryFile, TargetKind, TlsFields};
pub use error::{Error, Result};
