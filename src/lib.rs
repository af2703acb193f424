//! labprov: configuration composition and remote command execution for
//! provisioning lab machines.
//!
//! [`compose`] merges provisioner documents with the OS catalog into a
//! [`model::ResolvedConfig`]; [`remote`] connects to the target over SSH or
//! WinRM and runs commands on it; [`orchestrator::Provisioner`] ties the two
//! together for the CLI.

pub mod compose;
pub mod config;
pub mod error;
pub mod model;
pub mod orchestrator;
pub mod remote;

pub use error::{Error, ProvisionError, Result};
pub use orchestrator::Provisioner;
