//! nodegate - bootstrap and control transport for remotely managed proxy nodes
//!
//! Guarantees a server credential exists, resolves the TLS policy that
//! decides who may issue commands, and starts exactly one control transport
//! (RPC or HTTP) configured for that policy.

pub mod bootstrap;
pub mod certificate;
pub mod config;
pub mod error;
pub mod middleware;
pub mod policy;
pub mod service;
pub mod transport;

pub use bootstrap::{prepare, run, Startup};
pub use error::*;
