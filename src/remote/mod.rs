//! Remote execution on provisioned targets.
//!
//! This module owns the connection to one target host and everything that
//! runs over it: connect-with-retry, SSH and WinRM adapters behind a common
//! session trait, streamed command execution, file upload and the completion
//! marker.

pub mod marker;
pub mod retry;
pub mod runner;
pub mod session;
pub mod ssh;
pub mod stream;
pub mod transfer;
pub mod winrm;

pub use marker::{is_target_configured, mark_target_configured};
pub use retry::{diagnose_connect_error, is_transient, retry_transient, RetryConfig};
pub use runner::{CommandResult, CommandRunner, RunOptions};
pub use session::{
    Connector, RemoteSession, RemoteStat, Session, SessionManager, SessionState, Target,
};
pub use stream::{LineSplitter, LogSink, OutputCollector, OutputHandler};
pub use transfer::{copy_from_remote, copy_local, copy_to_remote};
