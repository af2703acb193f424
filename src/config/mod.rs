//! Tool settings for labprov.
//!
//! These are settings of the tool itself (where the configuration repository
//! lives, retry budget, log file), not the provisioner documents inside the
//! repository, which are handled by [`crate::compose`].
//!
//! # Settings File Location
//!
//! - Linux: `~/.config/labprov/config.yml`
//! - macOS: `~/Library/Application Support/labprov/config.yml`
//! - Windows: `C:\Users\<User>\AppData\Roaming\labprov\config.yml`
//!
//! # Example
//!
//! ```yaml
//! repo_dir: /srv/lab-config
//! provisioner_file: provision.json
//! catalog_file: os.json
//! log_file: /var/log/labprov/run.log
//! connect:
//!   attempts: 50
//!   delay_secs: 10
//! winrm:
//!   port: 5985
//!   timeout_secs: 60
//! ```

pub mod paths;

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::remote::retry::RetryConfig;

pub use paths::RepoPaths;

/// Default number of connection attempts before giving up on a target
const DEFAULT_CONNECT_ATTEMPTS: u32 = 50;

/// Default pause between connection attempts in seconds
const DEFAULT_CONNECT_DELAY: u64 = 10;

/// Default WinRM HTTP port
const DEFAULT_WINRM_PORT: u16 = 5985;

/// Default WinRM HTTP timeout in seconds
const DEFAULT_WINRM_TIMEOUT: u64 = 60;

/// Main settings structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Path to the configuration repository
    #[serde(default = "default_repo_dir")]
    pub repo_dir: PathBuf,

    /// Provisioner file name inside the repository
    #[serde(default = "default_provisioner_file")]
    pub provisioner_file: String,

    /// OS catalog file name inside the repository
    #[serde(default = "default_catalog_file")]
    pub catalog_file: String,

    /// File that receives a copy of all command output
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    #[serde(default)]
    pub connect: ConnectSettings,

    #[serde(default)]
    pub winrm: WinRmSettings,
}

/// Connection retry budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectSettings {
    #[serde(default = "default_connect_attempts")]
    pub attempts: u32,

    #[serde(default = "default_connect_delay")]
    pub delay_secs: u64,
}

/// WinRM transport settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WinRmSettings {
    /// Port used when the provisioner document has no `winrm_port`
    #[serde(default = "default_winrm_port")]
    pub port: u16,

    #[serde(default = "default_winrm_timeout")]
    pub timeout_secs: u64,
}

impl WinRmSettings {
    /// Per-request HTTP timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_repo_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_provisioner_file() -> String {
    "provision.json".to_string()
}

fn default_catalog_file() -> String {
    "os.json".to_string()
}

fn default_connect_attempts() -> u32 {
    DEFAULT_CONNECT_ATTEMPTS
}

fn default_connect_delay() -> u64 {
    DEFAULT_CONNECT_DELAY
}

fn default_winrm_port() -> u16 {
    DEFAULT_WINRM_PORT
}

fn default_winrm_timeout() -> u64 {
    DEFAULT_WINRM_TIMEOUT
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            repo_dir: default_repo_dir(),
            provisioner_file: default_provisioner_file(),
            catalog_file: default_catalog_file(),
            log_file: None,
            connect: ConnectSettings::default(),
            winrm: WinRmSettings::default(),
        }
    }
}

impl Default for ConnectSettings {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_CONNECT_ATTEMPTS,
            delay_secs: DEFAULT_CONNECT_DELAY,
        }
    }
}

impl Default for WinRmSettings {
    fn default() -> Self {
        Self {
            port: DEFAULT_WINRM_PORT,
            timeout_secs: DEFAULT_WINRM_TIMEOUT,
        }
    }
}

impl Settings {
    /// Returns the default settings file path for the current platform.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("labprov").join("config.yml"))
    }

    /// Loads settings from the default location.
    ///
    /// Returns `Ok(Settings::default())` if no settings file exists.
    pub fn load() -> Result<Self> {
        match Self::default_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(Settings::default()),
        }
    }

    /// Loads settings from a specific file path.
    ///
    /// Returns `Ok(Settings::default())` if the file doesn't exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Settings::default());
        }

        let contents = fs::read_to_string(path).map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!(
                    "Failed to read settings file: {}\n\n\
                     File path: {}\n\n\
                     Suggestions:\n\
                     • Check file permissions: ls -la {}\n\
                     • Verify the file is readable",
                    e,
                    path.display(),
                    path.display()
                ),
            ))
        })?;

        serde_yaml::from_str(&contents).map_err(|e| {
            Error::Config(format!(
                "Failed to parse settings file: {}\n\n\
                 File path: {}\n\n\
                 Suggestions:\n\
                 • Check YAML syntax in the settings file\n\
                 • Verify indentation uses spaces, not tabs\n\n\
                 Example valid settings:\n\
                 repo_dir: /srv/lab-config\n\
                 connect:\n\
                   attempts: 50\n\
                   delay_secs: 10",
                e,
                path.display()
            ))
        })
    }

    /// Saves settings to a specific file path.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                Error::Io(std::io::Error::new(
                    e.kind(),
                    format!(
                        "Failed to create settings directory: {}\n\n\
                         Directory: {}\n\n\
                         Suggestions:\n\
                         • Check write permissions for parent directory\n\
                         • Create directory manually: mkdir -p {}",
                        e,
                        parent.display(),
                        parent.display()
                    ),
                ))
            })?;
        }

        let contents = serde_yaml::to_string(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Builder method to set the configuration repository.
    pub fn with_repo_dir(mut self, repo_dir: impl Into<PathBuf>) -> Self {
        self.repo_dir = repo_dir.into();
        self
    }

    /// Builder method to set the log file.
    pub fn with_log_file(mut self, log_file: impl Into<PathBuf>) -> Self {
        self.log_file = Some(log_file.into());
        self
    }

    /// Builder method to set the retry budget.
    pub fn with_connect(mut self, attempts: u32, delay_secs: u64) -> Self {
        self.connect = ConnectSettings {
            attempts,
            delay_secs,
        };
        self
    }

    /// Retry configuration for connecting to targets.
    pub fn retry_config(&self, quiet: bool) -> RetryConfig {
        RetryConfig {
            attempts: self.connect.attempts,
            delay: Duration::from_secs(self.connect.delay_secs),
            quiet,
        }
    }
}
