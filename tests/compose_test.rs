//! End-to-end configuration composition against a throwaway repository.

use labprov::compose::{BuildOptions, ConfigComposer, ConfigStore, ProvisionerSource};
use labprov::Error;
use serde_json::{json, Value};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn write_json(dir: &Path, name: &str, value: Value) {
    fs::write(dir.join(name), serde_json::to_string_pretty(&value).unwrap()).unwrap();
}

fn provisioner(system_name: &str, ip: &str, os: Value) -> Value {
    json!({
        "mac_address": "aa:bb:cc:dd:ee:ff",
        "ip_address": ip,
        "port": 22,
        "gateway": "10.0.0.1",
        "system_name": system_name,
        "dev_username": "root",
        "dev_password": "password",
        "os": os,
        "drivers": ["nic"],
        "ksmeta": {"tree": "base"}
    })
}

fn setup_repo() -> TempDir {
    let dir = TempDir::new().unwrap();

    let mut target = provisioner("lab05", "10.0.0.5", json!(["rhel9", "ubuntu22"]));
    target["uat"] = json!("uat.json");
    write_json(dir.path(), "provision.json", target);
    write_json(
        dir.path(),
        "uat.json",
        provisioner("lab06", "10.0.0.6", json!(["ubuntu22"])),
    );
    write_json(
        dir.path(),
        "os.json",
        json!({
            "linux": {
                "global": {
                    "repos": ["base-repo"],
                    "packages": ["b"],
                    "ksmeta": {"lang": "en_US"}
                },
                "rhel9": {
                    "path": "/mnt/rhel9",
                    "kickstart": "rhel.ks",
                    "profile_name": "RHEL-9",
                    "os_type": "linux",
                    "repos": ["appstream"],
                    "packages": ["a"],
                    "extra_lists": {"drivers": ["rhel-nic"]},
                    "netboot": {"kopts": "inst.text"}
                },
                "ubuntu22": {
                    "path": "/mnt/jammy",
                    "kickstart": "ubuntu.seed",
                    "profile_name": "Ubuntu-22.04",
                    "os_type": "linux",
                    "repos": [],
                    "packages": ["ubuntu-minimal"]
                }
            },
            "windows": {
                "global": {"repos": [], "packages": []},
                "win2022": {
                    "path": "/mnt/win2022",
                    "kickstart": "unattend.xml",
                    "profile_name": "Windows-2022",
                    "os_type": "windows",
                    "repos": [],
                    "packages": []
                }
            }
        }),
    );
    dir
}

fn composer(dir: &TempDir) -> ConfigComposer {
    ConfigComposer::new(ConfigStore::new(dir.path()))
}

#[test]
fn test_build_resolves_catalog_entry() {
    let dir = setup_repo();
    let cfg = composer(&dir)
        .build(Some("rhel9"), &BuildOptions::default())
        .unwrap();

    let os = cfg.os().unwrap();
    assert_eq!(os["profile"], "rhel9");
    assert_eq!(os["distro"], "RHEL-9");
    assert_eq!(os["profile_name"], "rhel9-lab05");
    assert_eq!(os["netboot"], json!({"kopts": "inst.text"}));
    assert!(!os.contains_key("extra_lists"));
    assert!(!os.contains_key("ksmeta"));

    assert_eq!(cfg.packages(), &[json!("a"), json!("b")]);
    assert_eq!(cfg.repos(), &[json!("appstream"), json!("base-repo")]);
    assert_eq!(cfg.list("drivers"), &[json!("nic"), json!("rhel-nic")]);
    assert_eq!(
        cfg.get("ksmeta").unwrap(),
        &json!({"lang": "en_US", "tree": "base"})
    );
}

#[test]
fn test_build_attaches_uat() {
    let dir = setup_repo();
    let cfg = composer(&dir)
        .build(Some("rhel9"), &BuildOptions::default())
        .unwrap();

    let uat = cfg.uat().expect("uat attached");
    assert_eq!(uat.system_name(), Some("lab06"));
    assert_eq!(uat.os_profile(), Some("ubuntu22"));
    assert!(uat.get("uat").is_none());

    let skipped = composer(&dir)
        .build(
            Some("rhel9"),
            &BuildOptions {
                skip_uat: true,
                ..BuildOptions::default()
            },
        )
        .unwrap();
    assert!(skipped.uat().is_none());
}

#[test]
fn test_build_is_deterministic() {
    let dir = setup_repo();
    let composer = composer(&dir);
    let first = composer.build(Some("rhel9"), &BuildOptions::default()).unwrap();
    let second = composer.build(Some("rhel9"), &BuildOptions::default()).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_os_list_defaults_to_first_entry() {
    let dir = setup_repo();
    let cfg = composer(&dir).build(None, &BuildOptions::default()).unwrap();
    assert_eq!(cfg.os_profile(), Some("rhel9"));
}

#[test]
fn test_os_outside_allow_list() {
    let dir = setup_repo();
    let err = composer(&dir)
        .build(Some("win2022"), &BuildOptions::default())
        .unwrap_err();
    match err {
        Error::UnknownOs { name, choices } => {
            assert_eq!(name, "win2022");
            assert_eq!(choices, vec!["rhel9", "ubuntu22"]);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_catalog_string_os() {
    let dir = setup_repo();
    let doc = provisioner("lab07", "10.0.0.7", json!("os.json"));
    let options = BuildOptions {
        provisioner: ProvisionerSource::Inline(doc.as_object().unwrap().clone()),
        ..BuildOptions::default()
    };

    let cfg = composer(&dir).build(Some("win2022"), &options).unwrap();
    assert_eq!(cfg.os().unwrap()["os_type"], "windows");

    let err = composer(&dir).build(None, &options).unwrap_err();
    assert!(matches!(err, Error::UnknownOs { ref name, .. } if name.is_empty()));
}

#[test]
fn test_inline_os_mapping() {
    let dir = setup_repo();
    let doc = provisioner(
        "lab08",
        "10.0.0.8",
        json!({"profile": "custom", "packages": ["x"]}),
    );
    let options = BuildOptions {
        provisioner: ProvisionerSource::Inline(doc.as_object().unwrap().clone()),
        ..BuildOptions::default()
    };
    let cfg = composer(&dir).build(None, &options).unwrap();
    assert_eq!(cfg.os_profile(), Some("custom"));
    assert_eq!(cfg.packages(), &[json!("x")]);
}

#[test]
fn test_ip_override_and_mac_persistence() {
    let dir = setup_repo();
    let options = BuildOptions {
        override_ip: Some("192.168.1.50".to_string()),
        mac: Some("11:22:33:44:55:66".to_string()),
        skip_uat: true,
        ..BuildOptions::default()
    };
    let cfg = composer(&dir).build(Some("rhel9"), &options).unwrap();
    assert_eq!(cfg.ip_address(), Some("192.168.1.50"));
    assert_eq!(cfg.mac_address(), Some("11:22:33:44:55:66"));

    let saved: Value =
        serde_json::from_str(&fs::read_to_string(dir.path().join("provision.json")).unwrap())
            .unwrap();
    assert_eq!(saved["mac_address"], "11:22:33:44:55:66");
    assert_eq!(saved["ip_address"], "10.0.0.5");
}

#[test]
fn test_invalid_provisioner_is_rejected() {
    let dir = setup_repo();
    let mut doc = provisioner("lab09", "10.0.0.9", json!(["rhel9"]));
    doc["conn_type"] = json!("telnet");
    doc.as_object_mut().unwrap().remove("gateway");
    let options = BuildOptions {
        provisioner: ProvisionerSource::Inline(doc.as_object().unwrap().clone()),
        ..BuildOptions::default()
    };

    match composer(&dir).build(Some("rhel9"), &options).unwrap_err() {
        Error::Config(msg) => {
            assert!(msg.contains("Required field gateway is missing"), "{msg}");
            assert!(msg.contains("conn_type must be one of"), "{msg}");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_missing_provisioner_file() {
    let dir = TempDir::new().unwrap();
    let err = composer(&dir)
        .build(Some("rhel9"), &BuildOptions::default())
        .unwrap_err();
    assert!(err.is_config_error());
}
