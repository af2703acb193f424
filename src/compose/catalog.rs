//! The OS catalog: reusable OS profile definitions grouped by family.
//!
//! ```json
//! {
//!   "linux":   { "global": {...}, "centos7": {...}, "ubuntu1804": {...} },
//!   "windows": { "global": {...}, "win10": {...} }
//! }
//! ```
//!
//! Families are searched in the order they appear in the file, so when the
//! same profile name exists in two families the earlier family wins.

use serde_json::{Map, Value};

use crate::compose::merge::{kind_of, merge_maps};
use crate::error::{Error, Result};

/// Name of the per-family entry holding merge defaults.
pub const GLOBAL_ENTRY: &str = "global";

#[derive(Debug, Clone, PartialEq)]
pub struct OsCatalog {
    families: Map<String, Value>,
}

impl OsCatalog {
    pub fn from_document(doc: Map<String, Value>) -> Result<Self> {
        for (family, entries) in &doc {
            if !entries.is_object() {
                return Err(Error::Config(format!(
                    "OS family '{}' must be a mapping of profiles, got {}",
                    family,
                    kind_of(entries)
                )));
            }
        }
        Ok(Self { families: doc })
    }

    /// Family names in catalog order.
    pub fn families(&self) -> impl Iterator<Item = &str> {
        self.families.keys().map(String::as_str)
    }

    fn entries(&self) -> impl Iterator<Item = (&str, &Map<String, Value>)> {
        self.families
            .iter()
            .filter_map(|(name, v)| v.as_object().map(|m| (name.as_str(), m)))
    }

    /// Every selectable profile name, in catalog order.
    pub fn profile_names(&self) -> Vec<String> {
        self.entries()
            .flat_map(|(_, profiles)| profiles.keys())
            .filter(|name| name.as_str() != GLOBAL_ENTRY)
            .cloned()
            .collect()
    }

    /// Finds `target` and returns its entry with the family's `global` merged in.
    ///
    /// When `allowed` is given, only those names may be selected.
    pub fn select(&self, target: &str, allowed: Option<&[String]>) -> Result<Map<String, Value>> {
        let choices = match allowed {
            Some(list) => list.to_vec(),
            None => self.profile_names(),
        };
        if target == GLOBAL_ENTRY || !choices.iter().any(|c| c == target) {
            return Err(Error::UnknownOs {
                name: target.to_string(),
                choices,
            });
        }

        for (family, profiles) in self.entries() {
            let Some(entry) = profiles.get(target) else {
                continue;
            };
            let entry = entry.as_object().cloned().ok_or_else(|| {
                Error::Config(format!(
                    "OS profile '{}' in family '{}' must be a mapping",
                    target, family
                ))
            })?;

            return match profiles.get(GLOBAL_ENTRY) {
                Some(Value::Object(global)) => merge_maps(entry, global.clone()),
                Some(other) => Err(Error::Config(format!(
                    "global entry of family '{}' must be a mapping, got {}",
                    family,
                    kind_of(other)
                ))),
                None => Ok(entry),
            };
        }

        Err(Error::UnknownOs {
            name: target.to_string(),
            choices: self.profile_names(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn catalog() -> OsCatalog {
        let doc = json!({
            "linux": {
                "global": {"packages": ["b"], "repos": ["base"], "kickstart": "global.ks"},
                "centos7": {"packages": ["a"], "repos": [], "kickstart": "c7.ks", "profile_name": "CentOS-7"},
                "shared": {"packages": [], "repos": [], "profile_name": "linux-shared"}
            },
            "windows": {
                "win10": {"packages": ["w"], "repos": [], "profile_name": "Win10"},
                "shared": {"packages": [], "repos": [], "profile_name": "windows-shared"}
            }
        });
        OsCatalog::from_document(doc.as_object().unwrap().clone()).unwrap()
    }

    #[test]
    fn test_global_is_merged_entry_first() {
        let entry = catalog().select("centos7", None).unwrap();
        assert_eq!(entry["packages"], json!(["a", "b"]));
        assert_eq!(entry["repos"], json!(["base"]));
        assert_eq!(entry["kickstart"], "c7.ks");
    }

    #[test]
    fn test_family_without_global() {
        let entry = catalog().select("win10", None).unwrap();
        assert_eq!(entry["packages"], json!(["w"]));
    }

    #[test]
    fn test_first_family_wins() {
        let entry = catalog().select("shared", None).unwrap();
        assert_eq!(entry["profile_name"], "linux-shared");
    }

    #[test]
    fn test_profile_names_skip_global() {
        assert_eq!(
            catalog().profile_names(),
            vec!["centos7", "shared", "win10", "shared"]
        );
        assert_eq!(
            catalog().families().collect::<Vec<_>>(),
            vec!["linux", "windows"]
        );
    }

    #[test]
    fn test_allow_list_restricts_selection() {
        let allowed = vec!["win10".to_string()];
        let err = catalog().select("centos7", Some(&allowed)).unwrap_err();
        match err {
            Error::UnknownOs { name, choices } => {
                assert_eq!(name, "centos7");
                assert_eq!(choices, allowed);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(catalog().select("win10", Some(&allowed)).is_ok());
    }

    #[test]
    fn test_unknown_and_global_names() {
        assert!(matches!(
            catalog().select("solaris", None),
            Err(Error::UnknownOs { .. })
        ));
        assert!(matches!(
            catalog().select("global", None),
            Err(Error::UnknownOs { .. })
        ));
        // Allowed but not present in the catalog.
        let allowed = vec!["rhel9".to_string()];
        assert!(matches!(
            catalog().select("rhel9", Some(&allowed)),
            Err(Error::UnknownOs { .. })
        ));
    }

    #[test]
    fn test_non_mapping_family_rejected() {
        let doc = json!({"linux": ["centos7"]});
        assert!(OsCatalog::from_document(doc.as_object().unwrap().clone()).is_err());
    }
}
