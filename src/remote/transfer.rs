//! Recursive copies of files and directories between the orchestration host
//! and the target.

use log::{error, info};
use std::fs;
use std::io::{self, ErrorKind};
use std::path::Path;

use crate::error::{Error, Result};
use crate::remote::session::{RemoteSession, RemoteStat};

/// Mode used where the local filesystem has no permission bits.
#[cfg(not(unix))]
const DEFAULT_FILE_MODE: i32 = 0o644;

/// Copies `local` (a file or a directory tree) to `remote`.
///
/// Relative remote paths are anchored at the login directory as `./...`.
/// Missing parent directories are created, and file permission bits are kept.
/// Returns the number of files copied.
pub fn copy_to_remote(session: &mut dyn RemoteSession, local: &Path, remote: &str) -> Result<usize> {
    let remote = normalize_remote(remote);

    let parts: Vec<&str> = remote.split('/').collect();
    let mut crawl = parts[0].to_string();
    for part in parts.iter().skip(1).take(parts.len().saturating_sub(2)) {
        crawl = format!("{}/{}", crawl, part);
        session.make_dir(&crawl)?;
    }

    copy_entry(session, local, &remote)
}

fn copy_entry(session: &mut dyn RemoteSession, local: &Path, remote: &str) -> Result<usize> {
    let metadata = fs::metadata(local).map_err(|e| {
        Error::Io(std::io::Error::new(
            e.kind(),
            format!("Failed to read {}: {}", local.display(), e),
        ))
    })?;

    if metadata.is_dir() {
        session.make_dir(remote)?;
        let mut entries = fs::read_dir(local)?
            .map(|entry| entry.map(|e| e.file_name()))
            .collect::<std::io::Result<Vec<_>>>()?;
        entries.sort();

        let mut copied = 0;
        for name in entries {
            let name = name.to_string_lossy();
            copied += copy_entry(session, &local.join(name.as_ref()), &format!("{}/{}", remote, name))?;
        }
        return Ok(copied);
    }

    info!("Copying \"{}\" => \"{}\"", local.display(), remote);
    let contents = fs::read(local)?;
    session.write_file(remote, &contents, file_mode(&metadata))?;
    Ok(1)
}

/// Copies `remote` (a file or a directory tree) from the target into `local`.
///
/// Missing local directories are created and file permission bits are kept.
/// Returns the number of files fetched, or `None` when `remote` does not exist.
pub fn copy_from_remote(
    session: &mut dyn RemoteSession,
    remote: &str,
    local: &Path,
) -> Result<Option<usize>> {
    let remote = normalize_remote(remote);
    match session.stat(&remote)? {
        Some(stat) => fetch_entry(session, &remote, stat, local).map(Some),
        None => {
            error!("Failed to get \"{}\" from remote", remote);
            Ok(None)
        }
    }
}

fn fetch_entry(
    session: &mut dyn RemoteSession,
    remote: &str,
    stat: RemoteStat,
    local: &Path,
) -> Result<usize> {
    if stat.is_dir {
        ensure_local_dir(local)?;
        let mut names = session.list_dir(remote)?;
        names.sort();

        let mut fetched = 0;
        for name in names {
            let child = format!("{}/{}", remote, name);
            // Entries can vanish between listing and fetching, e.g. rotated logs.
            let Some(child_stat) = session.stat(&child)? else {
                continue;
            };
            fetched += fetch_entry(session, &child, child_stat, &local.join(&name))?;
        }
        return Ok(fetched);
    }

    info!("Fetching \"{}\" <= \"{}\"", local.display(), remote);
    let contents = session.read_file(remote)?.ok_or_else(|| {
        Error::Io(io::Error::new(
            ErrorKind::NotFound,
            format!("{} disappeared while fetching", remote),
        ))
    })?;
    if let Some(parent) = local.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(local, contents)?;
    set_file_mode(local, stat.mode)?;
    Ok(1)
}

/// Copies `source` (a file or a directory tree) to `dest` on the orchestration host.
///
/// Used for targets that are the orchestration host itself. Same contract as
/// [`copy_from_remote`].
pub fn copy_local(source: &Path, dest: &Path) -> Result<Option<usize>> {
    match fs::metadata(source) {
        Ok(metadata) => copy_local_entry(source, &metadata, dest).map(Some),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            error!("Failed to get \"{}\" from localhost", source.display());
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

fn copy_local_entry(source: &Path, metadata: &fs::Metadata, dest: &Path) -> Result<usize> {
    if metadata.is_dir() {
        ensure_local_dir(dest)?;
        let mut entries = fs::read_dir(source)?
            .map(|entry| entry.map(|e| e.file_name()))
            .collect::<std::io::Result<Vec<_>>>()?;
        entries.sort();

        let mut copied = 0;
        for name in entries {
            let child = source.join(&name);
            copied += copy_local_entry(&child, &fs::metadata(&child)?, &dest.join(&name))?;
        }
        return Ok(copied);
    }

    info!("Fetching \"{}\" <= \"{}\"", dest.display(), source.display());
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    // fs::copy carries the permission bits over.
    fs::copy(source, dest)?;
    Ok(1)
}

fn ensure_local_dir(path: &Path) -> Result<()> {
    if path.exists() && !path.is_dir() {
        return Err(Error::Io(io::Error::new(
            ErrorKind::AlreadyExists,
            format!("{} exists and is not a directory", path.display()),
        )));
    }
    fs::create_dir_all(path)?;
    Ok(())
}

#[cfg(unix)]
fn set_file_mode(path: &Path, mode: i32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode((mode & 0o777) as u32))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_file_mode(_path: &Path, _mode: i32) -> Result<()> {
    Ok(())
}

#[cfg(unix)]
fn file_mode(metadata: &fs::Metadata) -> i32 {
    use std::os::unix::fs::PermissionsExt;
    (metadata.permissions().mode() & 0o777) as i32
}

#[cfg(not(unix))]
fn file_mode(_metadata: &fs::Metadata) -> i32 {
    DEFAULT_FILE_MODE
}

/// Anchors relative paths at `./`; absolute POSIX and Windows paths pass through.
fn normalize_remote(remote: &str) -> String {
    let remote = remote.trim_end_matches('/');
    let is_absolute = remote.starts_with('/')
        || remote.starts_with('\\')
        || remote.as_bytes().get(1) == Some(&b':');
    if is_absolute || remote.starts_with("./") {
        remote.to_string()
    } else {
        format!("./{}", remote)
    }
}
