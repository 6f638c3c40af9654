//! MailDCN Common - Shared types and configuration
//!
//! This crate provides the configuration, error type and wire types
//! shared by the monitor library and the `maildcn` binary.

pub mod config;
pub mod error;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use types::{ProtocolEvent, ProtocolKind};
