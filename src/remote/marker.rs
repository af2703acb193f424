//! The completion marker: a copy of the resolved configuration left on the
//! target once provisioning finished.

use log::info;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::model::ResolvedConfig;
use crate::remote::session::RemoteSession;

const MARKER_MODE: i32 = 0o644;

/// Returns true if the marker at `path` matches `cfg` exactly.
///
/// A missing marker means "not configured". A marker that is not valid JSON
/// is an error rather than a mismatch, so a corrupted target is not silently
/// reprovisioned.
pub fn is_target_configured(
    session: &mut dyn RemoteSession,
    cfg: &ResolvedConfig,
    path: &str,
) -> Result<bool> {
    info!("Checking current configuration of target...");
    let Some(contents) = session.read_file(path)? else {
        return Ok(false);
    };

    let installed: Value = serde_json::from_slice(&contents)
        .map_err(|e| Error::Config(format!("Unreadable completion marker {}: {}", path, e)))?;

    if let Some(profile) = installed
        .get("os")
        .and_then(|os| os.get("profile"))
        .and_then(Value::as_str)
    {
        info!("Target machine is configured for {}", profile);
    }
    Ok(installed == cfg.to_value())
}

/// Writes `cfg` to the marker at `path`.
pub fn mark_target_configured(
    session: &mut dyn RemoteSession,
    cfg: &ResolvedConfig,
    path: &str,
) -> Result<()> {
    info!("Copying config to target to mark provisioning as complete...");
    let contents = serde_json::to_vec_pretty(cfg)?;
    session.write_file(path, &contents, MARKER_MODE)
}
