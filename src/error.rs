use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Settings error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("SSH error: {0}")]
    Ssh(#[from] ssh2::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Cannot merge '{key}': {existing} value conflicts with {incoming} value")]
    MergeConflict {
        key: String,
        existing: &'static str,
        incoming: &'static str,
    },

    #[error("Invalid os \"{name}\" supplied. Valid choices are [{}]", choices.join(", "))]
    UnknownOs { name: String, choices: Vec<String> },

    #[error("Couldn't connect to {target} after {attempts} attempt(s): {last}")]
    Connect {
        target: String,
        attempts: u32,
        last: String,
    },

    #[error("conn_type {0} is not valid")]
    InvalidProtocol(String),

    #[error("Client is not initialized: connect to a target before running remote commands")]
    NotConnected,

    #[error("'{cmd}' failed with code {status}")]
    CommandFailed { cmd: String, status: i32 },

    #[error("Authentication failed for {user}@{host}")]
    AuthFailed { user: String, host: String },

    #[error("Host unreachable: {0}")]
    Unreachable(String),

    #[error("WinRM error: {0}")]
    WinRm(String),
}

impl ProvisionError {
    /// Returns true for errors caused by bad or inconsistent configuration input.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            ProvisionError::Config(_)
                | ProvisionError::MergeConflict { .. }
                | ProvisionError::UnknownOs { .. }
                | ProvisionError::Json(_)
                | ProvisionError::Yaml(_)
        )
    }
}

pub type Error = ProvisionError;
pub type Result<T> = std::result::Result<T, Error>;
