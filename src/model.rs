//! The resolved configuration for one target host.
//!
//! A [`ResolvedConfig`] is produced by [`crate::compose::ConfigComposer`] and
//! consumed read-only by everything downstream. It keeps the merged document
//! as an insertion-ordered JSON map so that it serializes back out exactly as
//! composed (this is what gets written to the remote completion marker), and
//! offers typed accessors for the fields the engine itself relies on.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::error::{Error, Result};

/// Remote session protocol of a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Ssh,
    WinRm,
}

impl Protocol {
    /// Maps a `conn_type` value to a protocol. A missing value means SSH.
    pub fn from_conn_type(conn_type: Option<&str>) -> Result<Self> {
        match conn_type {
            None | Some("ssh") => Ok(Protocol::Ssh),
            Some("winrm") => Ok(Protocol::WinRm),
            Some(other) => Err(Error::InvalidProtocol(other.to_string())),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Ssh => write!(f, "ssh"),
            Protocol::WinRm => write!(f, "winrm"),
        }
    }
}

/// One entry of the `test_scripts` list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestScript {
    pub name: String,
    pub repo: String,
    pub commands: Vec<String>,
    pub logs: Value,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub svn_user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub svn_pass: Option<String>,
}

/// Fully merged configuration for one target host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResolvedConfig {
    fields: Map<String, Value>,
}

impl ResolvedConfig {
    pub(crate) fn from_map(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.fields.clone())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    fn str_field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    pub fn mac_address(&self) -> Option<&str> {
        self.str_field("mac_address")
    }

    pub fn ip_address(&self) -> Option<&str> {
        self.str_field("ip_address")
    }

    pub fn gateway(&self) -> Option<&str> {
        self.str_field("gateway")
    }

    pub fn system_name(&self) -> Option<&str> {
        self.str_field("system_name")
    }

    pub fn dev_username(&self) -> Option<&str> {
        self.str_field("dev_username")
    }

    pub fn dev_password(&self) -> Option<&str> {
        self.str_field("dev_password")
    }

    /// SSH port. Accepts numbers and numeric strings.
    pub fn port(&self) -> Option<u16> {
        match self.fields.get("port")? {
            Value::Number(n) => n.as_u64().and_then(|p| u16::try_from(p).ok()),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn winrm_port(&self) -> Option<u16> {
        self.fields
            .get("winrm_port")
            .and_then(Value::as_u64)
            .and_then(|p| u16::try_from(p).ok())
    }

    pub fn conn_type(&self) -> Option<&str> {
        self.str_field("conn_type")
    }

    pub fn protocol(&self) -> Result<Protocol> {
        Protocol::from_conn_type(self.conn_type())
    }

    /// The resolved `os` mapping.
    pub fn os(&self) -> Option<&Map<String, Value>> {
        self.fields.get("os").and_then(Value::as_object)
    }

    pub fn os_profile(&self) -> Option<&str> {
        self.os()?.get("profile").and_then(Value::as_str)
    }

    pub fn packages(&self) -> &[Value] {
        self.os_list("packages")
    }

    pub fn repos(&self) -> &[Value] {
        self.os_list("repos")
    }

    fn os_list(&self, key: &str) -> &[Value] {
        self.os()
            .and_then(|os| os.get(key))
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// A top-level list such as `drivers`, `prereqs` or `postreqs`. Empty if absent.
    pub fn list(&self, key: &str) -> &[Value] {
        self.fields
            .get(key)
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// The paired host's resolved configuration, if one was attached.
    pub fn uat(&self) -> Option<ResolvedConfig> {
        self.fields
            .get("uat")
            .and_then(Value::as_object)
            .map(|m| ResolvedConfig::from_map(m.clone()))
    }

    pub fn test_scripts(&self) -> Result<Vec<TestScript>> {
        match self.fields.get("test_scripts") {
            None => Ok(Vec::new()),
            Some(v) => serde_json::from_value(v.clone())
                .map_err(|e| Error::Config(format!("invalid test_scripts: {}", e))),
        }
    }

    /// Short human-readable identity used in log lines.
    pub fn describe(&self) -> String {
        format!(
            "{} ({})",
            self.system_name().unwrap_or("<unnamed>"),
            self.ip_address().unwrap_or("<no ip>")
        )
    }
}

impl TryFrom<Value> for ResolvedConfig {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(ResolvedConfig::from_map(map)),
            other => Err(Error::Config(format!(
                "configuration must be a JSON object, got {}",
                crate::compose::merge::kind_of(&other)
            ))),
        }
    }
}
