//! Session ownership and protocol selection.
//!
//! A [`SessionManager`] holds at most one live [`Session`]. Connecting again
//! closes the previous session first. Protocol adapters plug in through the
//! [`Connector`] and [`RemoteSession`] traits, so nothing above this module
//! knows whether it is talking SSH or WinRM.

use log::{info, warn};
use std::fmt;
use std::time::{Duration, SystemTime};

use crate::config::WinRmSettings;
use crate::error::{Error, Result};
use crate::model::{Protocol, ResolvedConfig};
use crate::remote::retry::{retry_transient, RetryConfig};
use crate::remote::runner::RunOptions;
use crate::remote::ssh::SshConnector;
use crate::remote::stream::OutputHandler;
use crate::remote::winrm::WinRmConnector;

/// Default SSH port
const DEFAULT_SSH_PORT: u16 = 22;

/// Lower bound for the per-attempt socket timeout
const MIN_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// An open connection to a target, as implemented by a protocol adapter.
pub trait RemoteSession {
    fn protocol(&self) -> Protocol;

    /// Runs `command`, feeding output chunks to `output` as they arrive.
    ///
    /// Returns once both output streams are drained, with the exit status.
    fn exec(
        &mut self,
        command: &str,
        options: &RunOptions,
        output: &mut dyn OutputHandler,
    ) -> Result<i32>;

    /// Reads a remote file. `Ok(None)` if it does not exist.
    fn read_file(&mut self, path: &str) -> Result<Option<Vec<u8>>>;

    fn write_file(&mut self, path: &str, contents: &[u8], mode: i32) -> Result<()>;

    /// Creates a directory if it does not exist yet.
    fn make_dir(&mut self, path: &str) -> Result<()>;

    /// Kind and permission bits of a remote path. `Ok(None)` if it does not exist.
    fn stat(&mut self, path: &str) -> Result<Option<RemoteStat>>;

    /// Entry names of a remote directory, in no particular order.
    fn list_dir(&mut self, path: &str) -> Result<Vec<String>>;

    fn close(&mut self) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteStat {
    pub is_dir: bool,
    /// Permission bits (`0o777` mask)
    pub mode: i32,
}

/// Opens sessions of one protocol.
pub trait Connector {
    /// A single connection attempt, without retries.
    fn connect_once(&self, target: &Target) -> Result<Box<dyn RemoteSession>>;
}

/// Identity and credentials of a target host.
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub protocol: Protocol,
    /// Socket timeout for a single attempt
    pub timeout: Duration,
}

impl Target {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
        protocol: Protocol,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            password: password.into(),
            protocol,
            timeout: Duration::from_secs(10),
        }
    }

    /// Builds a target from a resolved configuration.
    ///
    /// The protocol is checked first so that an invalid `conn_type` fails
    /// before anything else is looked at.
    pub fn from_config(cfg: &ResolvedConfig, winrm_default_port: u16) -> Result<Self> {
        let protocol = cfg.protocol()?;
        let host = cfg
            .ip_address()
            .ok_or_else(|| Error::Config("ip_address is required to connect".to_string()))?;
        let username = cfg
            .dev_username()
            .ok_or_else(|| Error::Config("dev_username is required to connect".to_string()))?;
        let password = cfg.dev_password().unwrap_or_default();
        let port = match protocol {
            Protocol::Ssh => cfg.port().unwrap_or(DEFAULT_SSH_PORT),
            Protocol::WinRm => cfg.winrm_port().unwrap_or(winrm_default_port),
        };
        Ok(Self::new(host, port, username, password, protocol))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{} ({})", self.username, self.host, self.port, self.protocol)
    }
}

/// A live connection owned by a [`SessionManager`].
pub struct Session {
    target: Target,
    connected_at: SystemTime,
    handle: Box<dyn RemoteSession>,
}

impl Session {
    pub fn protocol(&self) -> Protocol {
        self.handle.protocol()
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn connected_at(&self) -> SystemTime {
        self.connected_at
    }

    pub(crate) fn handle_mut(&mut self) -> &mut dyn RemoteSession {
        self.handle.as_mut()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("target", &self.target)
            .field("connected_at", &self.connected_at)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Sole owner of the session to one target.
pub struct SessionManager {
    active: Option<Session>,
    state: SessionState,
    winrm: WinRmSettings,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new(WinRmSettings::default())
    }
}

impl SessionManager {
    pub fn new(winrm: WinRmSettings) -> Self {
        Self {
            active: None,
            state: SessionState::Disconnected,
            winrm,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.active.is_some()
    }

    /// Connects to the target described by `cfg`, picking the adapter from `conn_type`.
    pub fn connect(&mut self, cfg: &ResolvedConfig, retry: &RetryConfig) -> Result<&Session> {
        let target = Target::from_config(cfg, self.winrm.port)?
            .with_timeout(retry.delay.max(MIN_CONNECT_TIMEOUT));
        match target.protocol {
            Protocol::Ssh => self.connect_with(&SshConnector, target, retry),
            Protocol::WinRm => {
                let connector = WinRmConnector::new(self.winrm.timeout());
                self.connect_with(&connector, target, retry)
            }
        }
    }

    /// Connects through an explicit connector.
    pub fn connect_with(
        &mut self,
        connector: &dyn Connector,
        target: Target,
        retry: &RetryConfig,
    ) -> Result<&Session> {
        self.close()?;
        self.state = SessionState::Connecting;
        info!("Connecting to {}", target);

        let description = target.to_string();
        match retry_transient(retry, &description, |_| connector.connect_once(&target)) {
            Ok(handle) => {
                self.state = SessionState::Connected;
                let session = Session {
                    target,
                    connected_at: SystemTime::now(),
                    handle,
                };
                Ok(&*self.active.insert(session))
            }
            Err(e) => {
                self.state = SessionState::Disconnected;
                Err(e)
            }
        }
    }

    pub fn session(&self) -> Result<&Session> {
        self.active.as_ref().ok_or(Error::NotConnected)
    }

    pub fn session_mut(&mut self) -> Result<&mut Session> {
        self.active.as_mut().ok_or(Error::NotConnected)
    }

    /// Closes the active session, if any.
    ///
    /// The handle is released even when the adapter reports an error while
    /// closing; that error is logged, not returned.
    pub fn close(&mut self) -> Result<()> {
        if let Some(mut session) = self.active.take() {
            info!("Closing session to {}", session.target);
            if let Err(e) = session.handle.close() {
                warn!("Error while closing session to {}: {}", session.target, e);
            }
        }
        self.state = SessionState::Disconnected;
        Ok(())
    }
}
