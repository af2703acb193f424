//! Local and remote path tables derived from the configuration repository.
//!
//! Provisioner documents may override individual entries through their
//! `local_filepaths` and `remote_filepaths` mappings. Local overrides are
//! relative to the repository; remote ones are used verbatim.

use log::warn;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const LOCAL_KEYS: &[(&str, &str)] = &[
    ("sshconfig", "config/ssh"),
    ("prereqscripts", "scripts/prereqs"),
    ("postreqscripts", "scripts/postreqs"),
    ("driverscripts", "scripts/driver_installers"),
    ("posttestscripts", "scripts/post_test"),
    ("logs", "logs"),
    ("host_logs", "tests/logs"),
    ("tests", "tests"),
];

const REMOTE_KEYS: &[(&str, &str)] = &[
    ("prereqscripts", ".scripts/abacoprecfg"),
    ("postreqscripts", ".scripts/abacopostcfg"),
    ("driverscripts", "drivers"),
    ("sshconfig", ".ssh"),
    ("complete_flag", ".installed_config.json"),
    ("tests", "tests"),
];

#[derive(Debug, Clone, PartialEq)]
pub struct RepoPaths {
    repo_dir: PathBuf,
    local: BTreeMap<String, PathBuf>,
    remote: BTreeMap<String, String>,
}

impl RepoPaths {
    pub fn new(repo_dir: impl Into<PathBuf>) -> Self {
        let repo_dir = repo_dir.into();
        let local = LOCAL_KEYS
            .iter()
            .map(|(k, v)| (k.to_string(), repo_dir.join(v)))
            .collect();
        let remote = REMOTE_KEYS
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Self {
            repo_dir,
            local,
            remote,
        }
    }

    pub fn repo_dir(&self) -> &Path {
        &self.repo_dir
    }

    pub fn local(&self, key: &str) -> Option<&Path> {
        self.local.get(key).map(PathBuf::as_path)
    }

    pub fn remote(&self, key: &str) -> Option<&str> {
        self.remote.get(key).map(String::as_str)
    }

    /// Remote path of the completion marker.
    pub fn complete_flag(&self) -> &str {
        self.remote("complete_flag")
            .unwrap_or(".installed_config.json")
    }

    /// Applies `local_filepaths` / `remote_filepaths` overrides from a document.
    ///
    /// Unknown keys are reported and skipped.
    pub fn apply_overrides(&mut self, doc: &Map<String, Value>) {
        if let Some(Value::Object(local)) = doc.get("local_filepaths") {
            for (key, value) in local {
                match (self.local.contains_key(key), value.as_str()) {
                    (true, Some(rel)) => {
                        self.local.insert(key.clone(), self.repo_dir.join(rel));
                    }
                    _ => warn!("Invalid key {} in local_filepaths", key),
                }
            }
        }
        if let Some(Value::Object(remote)) = doc.get("remote_filepaths") {
            for (key, value) in remote {
                match (self.remote.contains_key(key), value.as_str()) {
                    (true, Some(path)) => {
                        self.remote.insert(key.clone(), path.to_string());
                    }
                    _ => warn!("Invalid key {} in remote_filepaths", key),
                }
            }
        }
    }
}
