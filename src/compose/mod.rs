//! Layered configuration composition.
//!
//! A provisioner document describes one host. Its `os` field refers to the OS
//! catalog (by catalog file, by allow-list, or inline), and it may pair the
//! host with a UAT host described by another provisioner document. The
//! [`ConfigComposer`] turns all of that into a single [`ResolvedConfig`].

pub mod catalog;
pub mod merge;
pub mod store;
pub mod validate;

use log::{debug, info};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::model::ResolvedConfig;

pub use catalog::OsCatalog;
pub use store::{ConfigStore, ProvisionerSource};
pub use validate::{validate_catalog, validate_provisioner, ValidationReport};

/// Mapping-valued `os` fields that stay under `os` instead of being lifted.
pub const OS_DICT_WHITELIST: &[&str] = &["netboot"];

const DEFAULT_CATALOG: &str = "os.json";

/// Options for [`ConfigComposer::build`].
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// The provisioner document of the target.
    pub provisioner: ProvisionerSource,
    /// Catalog file used when `os` is an allow-list.
    pub catalog: String,
    /// Explicit UAT document; overrides the document's own `uat` field.
    pub uat: Option<ProvisionerSource>,
    /// Target OS for the UAT. Defaults to the first OS listed for it.
    pub uat_os: Option<String>,
    /// Do not resolve or attach any UAT.
    pub skip_uat: bool,
    pub override_ip: Option<String>,
    /// MAC address to store in the provisioner file.
    pub mac: Option<String>,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            provisioner: ProvisionerSource::default(),
            catalog: DEFAULT_CATALOG.to_string(),
            uat: None,
            uat_os: None,
            skip_uat: false,
            override_ip: None,
            mac: None,
        }
    }
}

/// Builds resolved configurations from a configuration repository.
#[derive(Debug, Clone)]
pub struct ConfigComposer {
    store: ConfigStore,
}

impl ConfigComposer {
    pub fn new(store: ConfigStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    /// Resolves the configuration of a target for `target_os`.
    pub fn build(&self, target_os: Option<&str>, options: &BuildOptions) -> Result<ResolvedConfig> {
        let mut doc = self
            .store
            .load_provisioner(&options.provisioner, options.mac.as_deref())?;

        let report = validate_provisioner(&doc);
        for warning in &report.warnings {
            debug!("{}", warning);
        }
        if !report.is_valid() {
            return Err(Error::Config(format!(
                "invalid provisioner config:\n  {}",
                report.errors.join("\n  ")
            )));
        }

        let uat = if options.skip_uat {
            None
        } else {
            let source = match (&options.uat, doc.get("uat")) {
                (Some(explicit), _) => Some(explicit.clone()),
                (None, Some(declared)) => Some(ProvisionerSource::from_value(declared)?),
                (None, None) => None,
            };
            match source {
                Some(source) => Some(self.build_uat(source, options)?),
                None => None,
            }
        };
        doc.remove("uat");

        let (mut os, selected) = self.resolve_os(&doc, target_os, &options.catalog)?;
        doc.remove("os");

        if let Some(profile) = selected.as_deref() {
            let distro = os.get("profile_name").cloned().unwrap_or(Value::Null);
            let test_target = doc
                .get("test_target")
                .or_else(|| doc.get("system_name"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            os.insert("profile".to_string(), Value::String(profile.to_string()));
            os.insert("distro".to_string(), distro);
            os.insert(
                "profile_name".to_string(),
                Value::String(format!("{}-{}", profile, test_target)),
            );
        }

        apply_extra_lists(&mut doc, &mut os)?;
        lift_os_mappings(&mut doc, &mut os)?;
        doc.insert("os".to_string(), Value::Object(os));

        if let Some(uat) = uat {
            doc.insert("uat".to_string(), uat.to_value());
        }
        if let Some(ip) = &options.override_ip {
            doc.insert("ip_address".to_string(), Value::String(ip.clone()));
        }

        let cfg = ResolvedConfig::from_map(doc);
        info!(
            "Built configuration for {} with OS {}",
            cfg.describe(),
            cfg.os_profile().unwrap_or("<inline>")
        );
        Ok(cfg)
    }

    fn build_uat(&self, source: ProvisionerSource, options: &BuildOptions) -> Result<ResolvedConfig> {
        let uat_doc = self.store.load_provisioner(&source, None)?;
        let uat_os = match &options.uat_os {
            Some(os) => Some(os.clone()),
            None => match uat_doc.get("os") {
                Some(Value::Array(list)) => list.first().and_then(Value::as_str).map(str::to_string),
                _ => None,
            },
        };
        debug!("Resolving UAT with OS {:?}", uat_os);

        let uat_options = BuildOptions {
            provisioner: ProvisionerSource::Inline(uat_doc),
            catalog: options.catalog.clone(),
            skip_uat: true,
            ..BuildOptions::default()
        };
        self.build(uat_os.as_deref(), &uat_options)
    }

    /// Turns the document's `os` field into a mapping.
    ///
    /// Returns the mapping and the profile name it was selected as, if any.
    fn resolve_os(
        &self,
        doc: &Map<String, Value>,
        target_os: Option<&str>,
        default_catalog: &str,
    ) -> Result<(Map<String, Value>, Option<String>)> {
        match doc.get("os") {
            Some(Value::String(catalog_file)) => {
                let catalog = self.store.load_catalog(catalog_file)?;
                let target = target_os.ok_or_else(|| Error::UnknownOs {
                    name: String::new(),
                    choices: catalog.profile_names(),
                })?;
                let entry = catalog.select(target, None)?;
                Ok((entry, Some(target.to_string())))
            }
            Some(Value::Array(names)) => {
                let allowed = names
                    .iter()
                    .map(|n| {
                        n.as_str().map(str::to_string).ok_or_else(|| {
                            Error::Config("os list must only contain profile names".to_string())
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                let target = match target_os {
                    Some(t) => t.to_string(),
                    None => allowed.first().cloned().ok_or_else(|| {
                        Error::Config("os list is empty".to_string())
                    })?,
                };
                let catalog = self.store.load_catalog(default_catalog)?;
                let entry = catalog.select(&target, Some(&allowed))?;
                Ok((entry, Some(target)))
            }
            Some(Value::Object(os)) => Ok((os.clone(), target_os.map(str::to_string))),
            Some(other) => Err(Error::Config(format!(
                "os must be a catalog name, a list or a mapping, got {}",
                merge::kind_of(other)
            ))),
            None => Err(Error::Config("Required field os is missing".to_string())),
        }
    }
}

/// Extends top-level lists with the ones named in `os.extra_lists`.
fn apply_extra_lists(doc: &mut Map<String, Value>, os: &mut Map<String, Value>) -> Result<()> {
    let Some(extra) = os.remove("extra_lists") else {
        return Ok(());
    };
    let Value::Object(extra) = extra else {
        return Err(Error::Config(format!(
            "os.extra_lists must be a mapping, got {}",
            merge::kind_of(&extra)
        )));
    };

    for (field, items) in extra {
        let Value::Array(items) = items else {
            return Err(Error::MergeConflict {
                key: format!("extra_lists.{}", field),
                existing: "list",
                incoming: merge::kind_of(&items),
            });
        };
        match doc.get_mut(&field) {
            Some(Value::Array(existing)) => existing.extend(items),
            Some(other) => {
                return Err(Error::MergeConflict {
                    key: field,
                    existing: merge::kind_of(other),
                    incoming: "list",
                })
            }
            None => {
                doc.insert(field, Value::Array(items));
            }
        }
    }
    Ok(())
}

/// Moves mapping-valued `os` fields to the top level, merging with what is there.
fn lift_os_mappings(doc: &mut Map<String, Value>, os: &mut Map<String, Value>) -> Result<()> {
    let lifted: Vec<String> = os
        .iter()
        .filter(|(k, v)| v.is_object() && !OS_DICT_WHITELIST.contains(&k.as_str()))
        .map(|(k, _)| k.clone())
        .collect();

    for field in lifted {
        let Some(from_os) = os.remove(&field) else {
            continue;
        };
        let merged = match doc.remove(&field) {
            Some(existing) => merge::merge_values(&field, from_os, existing)?,
            None => from_os,
        };
        doc.insert(field, merged);
    }
    Ok(())
}
