//! Loading raw JSON documents from a configuration repository.

use log::{debug, info};
use serde::Serialize;
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};

use crate::compose::catalog::OsCatalog;
use crate::error::{Error, Result};

/// Where a provisioner document comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum ProvisionerSource {
    /// File name relative to the repository directory.
    File(String),
    /// An already-loaded document.
    Inline(Map<String, Value>),
}

impl Default for ProvisionerSource {
    fn default() -> Self {
        ProvisionerSource::File("provision.json".to_string())
    }
}

impl ProvisionerSource {
    /// Interprets a `uat` field: a string names a file, a mapping is inline.
    pub fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::String(name) => Ok(ProvisionerSource::File(name.clone())),
            Value::Object(map) => Ok(ProvisionerSource::Inline(map.clone())),
            other => Err(Error::Config(format!(
                "uat must be a file name or a mapping, got {}",
                crate::compose::merge::kind_of(other)
            ))),
        }
    }
}

/// Read access to the JSON documents of a configuration repository.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    repo_dir: PathBuf,
}

impl ConfigStore {
    pub fn new(repo_dir: impl Into<PathBuf>) -> Self {
        Self {
            repo_dir: repo_dir.into(),
        }
    }

    pub fn repo_dir(&self) -> &Path {
        &self.repo_dir
    }

    pub fn path_of(&self, name: &str) -> PathBuf {
        self.repo_dir.join(name)
    }

    /// Loads a JSON document that must be an object.
    pub fn load_document(&self, name: &str) -> Result<Map<String, Value>> {
        let path = self.path_of(name);
        debug!("Loading {}", path.display());

        let contents = fs::read_to_string(&path).map_err(|e| {
            Error::Config(format!(
                "Failed to read {}: {}\n\n\
                 Suggestions:\n\
                 • Check that the configuration repository path is correct\n\
                 • Verify the file exists: ls -la {}",
                path.display(),
                e,
                path.display()
            ))
        })?;

        match serde_json::from_str::<Value>(&contents) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(other) => Err(Error::Config(format!(
                "{} must contain a JSON object, found {}",
                path.display(),
                crate::compose::merge::kind_of(&other)
            ))),
            Err(e) => Err(Error::Config(format!(
                "Failed to parse {}: {}",
                path.display(),
                e
            ))),
        }
    }

    /// Loads a provisioner document, applying and persisting a MAC override first.
    ///
    /// The override is written back only for file sources; inline documents
    /// are updated in memory.
    pub fn load_provisioner(
        &self,
        source: &ProvisionerSource,
        mac: Option<&str>,
    ) -> Result<Map<String, Value>> {
        match source {
            ProvisionerSource::Inline(map) => {
                let mut doc = map.clone();
                if let Some(mac) = mac {
                    doc.insert("mac_address".to_string(), Value::String(mac.to_string()));
                }
                Ok(doc)
            }
            ProvisionerSource::File(name) => {
                let mut doc = self.load_document(name)?;
                if let Some(mac) = mac {
                    doc.insert("mac_address".to_string(), Value::String(mac.to_string()));
                    self.write_document(name, &doc)?;
                    info!("Saved MAC address {} to {}", mac, name);
                }
                Ok(doc)
            }
        }
    }

    pub fn load_catalog(&self, name: &str) -> Result<OsCatalog> {
        OsCatalog::from_document(self.load_document(name)?)
    }

    /// Writes a document back with four-space indentation.
    pub fn write_document(&self, name: &str, doc: &Map<String, Value>) -> Result<()> {
        let path = self.path_of(name);
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        doc.serialize(&mut ser)?;
        fs::write(&path, buf)?;
        Ok(())
    }
}
