//! Structural validation of provisioner documents and OS catalogs.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::compose::catalog::GLOBAL_ENTRY;

/// JSON types accepted for a field.
#[derive(Debug, Clone, Copy)]
enum Kind {
    Str,
    Int,
    List,
    Mapping,
}

impl Kind {
    fn matches(self, value: &Value) -> bool {
        match self {
            Kind::Str => value.is_string(),
            Kind::Int => value.is_i64() || value.is_u64(),
            Kind::List => value.is_array(),
            Kind::Mapping => value.is_object(),
        }
    }

    fn name(self) -> &'static str {
        match self {
            Kind::Str => "string",
            Kind::Int => "integer",
            Kind::List => "list",
            Kind::Mapping => "mapping",
        }
    }
}

const REQUIRED_FIELDS: &[(&str, &[Kind])] = &[
    ("mac_address", &[Kind::Str]),
    ("ip_address", &[Kind::Str]),
    ("port", &[Kind::Int]),
    ("gateway", &[Kind::Str]),
    ("system_name", &[Kind::Str]),
    ("dev_username", &[Kind::Str]),
    ("dev_password", &[Kind::Str]),
    ("os", &[Kind::List, Kind::Mapping, Kind::Str]),
    ("drivers", &[Kind::List]),
];

const OPTIONAL_FIELDS: &[(&str, &[Kind])] = &[
    ("conn_type", &[Kind::Str]),
    ("ksmeta", &[Kind::Mapping]),
    ("prereqs", &[Kind::List]),
    ("postreqs", &[Kind::List]),
    ("post_test_scripts", &[Kind::List]),
];

const CONN_TYPES: &[&str] = &["ssh", "winrm"];
const OS_FAMILIES: &[&str] = &["linux", "windows"];
const OS_ENTRY_FIELDS: &[&str] = &["path", "kickstart", "profile_name", "os_type"];
const OS_LIST_FIELDS: &[&str] = &["repos", "packages"];

/// Outcome of a validation pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, msg: String) {
        self.errors.push(msg);
    }

    fn warning(&mut self, msg: String) {
        self.warnings.push(msg);
    }

    fn absorb(&mut self, prefix: &str, other: ValidationReport) {
        self.errors
            .extend(other.errors.into_iter().map(|e| format!("{}: {}", prefix, e)));
        self.warnings
            .extend(other.warnings.into_iter().map(|w| format!("{}: {}", prefix, w)));
    }
}

fn check_type(report: &mut ValidationReport, doc: &Map<String, Value>, field: &str, kinds: &[Kind]) {
    if let Some(value) = doc.get(field) {
        if !kinds.iter().any(|k| k.matches(value)) {
            let names: Vec<&str> = kinds.iter().map(|k| k.name()).collect();
            report.error(format!("{} must be of type {}", field, names.join(" or ")));
        }
    }
}

/// Validates a provisioner document.
pub fn validate_provisioner(doc: &Map<String, Value>) -> ValidationReport {
    let mut report = ValidationReport::default();

    for (field, kinds) in REQUIRED_FIELDS {
        if doc.contains_key(*field) {
            check_type(&mut report, doc, field, kinds);
        } else {
            report.error(format!("Required field {} is missing", field));
        }
    }

    for (field, kinds) in OPTIONAL_FIELDS {
        if doc.contains_key(*field) {
            check_type(&mut report, doc, field, kinds);
        } else {
            report.warning(format!("Optional field {} is missing", field));
        }
    }

    if let Some(conn_type) = doc.get("conn_type").and_then(Value::as_str) {
        if !CONN_TYPES.contains(&conn_type) {
            report.error(format!(
                "conn_type must be one of {}",
                CONN_TYPES.join(", ")
            ));
        }
    }

    if let Some(scripts) = doc.get("test_scripts") {
        match scripts.as_array() {
            Some(scripts) => {
                for (idx, script) in scripts.iter().enumerate() {
                    validate_test_script(&mut report, idx + 1, script);
                }
            }
            None => report.error("test_scripts must be of type list".to_string()),
        }
    }

    if let Some(Value::Object(uat)) = doc.get("uat") {
        report.absorb("uat", validate_provisioner(uat));
    }

    report
}

fn validate_test_script(report: &mut ValidationReport, num: usize, script: &Value) {
    let Some(script) = script.as_object() else {
        report.error(format!("Test {} is not a mapping", num));
        return;
    };

    for field in ["name", "repo", "logs"] {
        if !script.contains_key(field) {
            report.error(format!("Test {} has no {}", num, field));
        }
    }
    match script.get("commands") {
        None => report.error(format!("Test {} has no commands", num)),
        Some(c) if !c.is_array() => report.error(format!("Test {} commands are not a list", num)),
        Some(_) => {}
    }

    if script.get("type").and_then(Value::as_str) == Some("svn") {
        for field in ["svn_user", "svn_pass"] {
            if !script.contains_key(field) {
                report.error(format!("{} is not set in test {}", field, num));
            }
        }
    } else if !script.contains_key("branch") {
        report.error(format!("branch is not set in test {}", num));
    }
}

/// Validates an OS catalog document.
pub fn validate_catalog(doc: &Map<String, Value>) -> ValidationReport {
    let mut report = ValidationReport::default();

    for family in OS_FAMILIES {
        let Some(profiles) = doc.get(*family) else {
            continue;
        };
        let Some(profiles) = profiles.as_object() else {
            report.error(format!("OS family {} must be a mapping", family));
            continue;
        };

        for (name, entry) in profiles {
            let Some(entry) = entry.as_object() else {
                report.error(format!("{}.{} must be a mapping", family, name));
                continue;
            };

            if name != GLOBAL_ENTRY {
                for field in OS_ENTRY_FIELDS {
                    match entry.get(*field) {
                        None => report.error(format!(
                            "{}.{}: required field {} is missing",
                            family, name, field
                        )),
                        Some(v) if !v.is_string() => report.error(format!(
                            "{}.{}: {} must be of type string",
                            family, name, field
                        )),
                        Some(_) => {}
                    }
                }
                if let Some(os_type) = entry.get("os_type").and_then(Value::as_str) {
                    if !OS_FAMILIES.contains(&os_type) {
                        report.error(format!(
                            "{}.{}: os_type must be one of {}",
                            family,
                            name,
                            OS_FAMILIES.join(", ")
                        ));
                    }
                }
            }

            for field in OS_LIST_FIELDS {
                match entry.get(*field) {
                    None => report.error(format!(
                        "{}.{}: required field {} is missing",
                        family, name, field
                    )),
                    Some(v) if !v.is_array() => report.error(format!(
                        "{}.{}: {} must be of type list",
                        family, name, field
                    )),
                    Some(_) => {}
                }
            }
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid_doc() -> Map<String, Value> {
        json!({
            "mac_address": "00:11:22:33:44:55",
            "ip_address": "10.0.0.5",
            "port": 22,
            "gateway": "10.0.0.1",
            "system_name": "uut-01",
            "dev_username": "root",
            "dev_password": "password",
            "os": ["centos7"],
            "drivers": [],
            "conn_type": "ssh",
            "ksmeta": {},
            "prereqs": [],
            "postreqs": [],
            "post_test_scripts": []
        })
        .as_object()
        .unwrap()
        .clone()
    }

    #[test]
    fn test_valid_document() {
        let report = validate_provisioner(&valid_doc());
        assert!(report.is_valid(), "{:?}", report.errors);
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn test_missing_required_and_optional_fields() {
        let mut doc = valid_doc();
        doc.remove("gateway");
        doc.remove("ksmeta");
        let report = validate_provisioner(&doc);
        assert_eq!(report.errors, vec!["Required field gateway is missing"]);
        assert_eq!(report.warnings, vec!["Optional field ksmeta is missing"]);
    }

    #[test]
    fn test_wrong_types_and_conn_type() {
        let mut doc = valid_doc();
        doc.insert("port".into(), json!("22"));
        doc.insert("conn_type".into(), json!("telnet"));
        doc.insert("os".into(), json!(7));
        let report = validate_provisioner(&doc);
        assert_eq!(report.errors.len(), 3);
        assert!(report.errors.iter().any(|e| e.contains("port must be of type integer")));
        assert!(report.errors.iter().any(|e| e.contains("conn_type must be one of")));
    }

    #[test]
    fn test_test_scripts() {
        let mut doc = valid_doc();
        doc.insert(
            "test_scripts".into(),
            json!([
                {"name": "git", "repo": "r", "commands": ["make"], "logs": "l", "branch": "main"},
                {"name": "svn", "repo": "r", "commands": "make", "logs": "l", "type": "svn", "svn_user": "u"},
                {"repo": "r", "commands": []}
            ]),
        );
        let report = validate_provisioner(&doc);
        assert!(report.errors.contains(&"Test 2 commands are not a list".to_string()));
        assert!(report.errors.contains(&"svn_pass is not set in test 2".to_string()));
        assert!(report.errors.contains(&"Test 3 has no name".to_string()));
        assert!(report.errors.contains(&"Test 3 has no logs".to_string()));
        assert!(report.errors.contains(&"branch is not set in test 3".to_string()));
        assert_eq!(report.errors.len(), 5);
    }

    #[test]
    fn test_nested_uat_is_prefixed() {
        let mut doc = valid_doc();
        let mut uat = valid_doc();
        uat.remove("ip_address");
        doc.insert("uat".into(), Value::Object(uat));
        let report = validate_provisioner(&doc);
        assert_eq!(report.errors, vec!["uat: Required field ip_address is missing"]);
    }

    #[test]
    fn test_catalog_validation() {
        let doc = json!({
            "linux": {
                "global": {"repos": [], "packages": []},
                "centos7": {"path": "/p", "kickstart": "k", "profile_name": "c7", "os_type": "linux", "repos": [], "packages": []},
                "broken": {"path": "/p", "profile_name": "b", "os_type": "beos", "repos": "x", "packages": []}
            },
            "solaris": {"ignored": {}}
        });
        let report = validate_catalog(doc.as_object().unwrap());
        assert_eq!(
            report.errors,
            vec![
                "linux.broken: required field kickstart is missing",
                "linux.broken: os_type must be one of linux, windows",
                "linux.broken: repos must be of type list",
            ]
        );
    }
}
