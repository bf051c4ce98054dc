//! Shared plumbing for the AethonX workspace.
//!
//! Error taxonomy, cancellation tokens, configuration (environment and
//! per-source), untyped-config readers, validators, and logging bootstrap.
//! Everything here is domain-free; the artifact model lives in
//! `aethonx-artifacts`.

pub mod cancel;
pub mod config;
pub mod error;
pub mod mem;
pub mod telemetry;
pub mod validate;

pub use cancel::CancelToken;
pub use config::{Config, SourceConfig};
pub use error::AethonxError;
