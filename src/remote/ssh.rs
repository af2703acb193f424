//! SSH adapter built on libssh2.
//!
//! Commands run over an exec channel; files move over SFTP. The socket stays
//! blocking, so stdout is drained to EOF before stderr is read.

use log::{debug, warn};
use ssh2::{FileStat, OpenFlags, OpenType, Session as Ssh2Session};
use std::io::{ErrorKind, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::model::Protocol;
use crate::remote::runner::RunOptions;
use crate::remote::session::{Connector, RemoteSession, RemoteStat, Target};
use crate::remote::stream::{OutputHandler, STREAM_CHUNK_SIZE};

/// SFTP status code for a missing file
const SFTP_NO_SUCH_FILE: i32 = 2;

/// Prefix that gives remote commands the login environment.
const PROFILE_PREFIX: &str = "source /etc/profile && ";

pub struct SshConnector;

impl Connector for SshConnector {
    fn connect_once(&self, target: &Target) -> Result<Box<dyn RemoteSession>> {
        debug!("Attempting SSH connection to {}:{}", target.host, target.port);

        let addr = format!("{}:{}", target.host, target.port)
            .to_socket_addrs()
            .map_err(|e| Error::Config(format!("Failed to resolve host '{}': {}", target.host, e)))?
            .next()
            .ok_or_else(|| {
                Error::Config(format!("No addresses found for host '{}'", target.host))
            })?;

        let tcp = TcpStream::connect_timeout(&addr, target.timeout).map_err(|e| match e.kind() {
            ErrorKind::ConnectionRefused | ErrorKind::TimedOut => Error::Io(e),
            _ => Error::Unreachable(format!("{}: {}", target.host, e)),
        })?;

        let mut sess = Ssh2Session::new()?;
        sess.set_tcp_stream(tcp);
        // Bounds the handshake against hosts that accept TCP before sshd is up.
        sess.set_timeout(timeout_millis(target.timeout));
        sess.handshake()?;
        authenticate(&sess, target)?;
        // Command output may legitimately stall for longer than the connect timeout.
        sess.set_timeout(0);

        debug!("SSH connection to {} established", target.host);
        Ok(Box::new(SshSession { sess }))
    }
}

/// libssh2 timeout in milliseconds, where 0 means none.
fn timeout_millis(timeout: Duration) -> u32 {
    u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX).max(1)
}

/// Password authentication, falling back to the local agent.
fn authenticate(sess: &Ssh2Session, target: &Target) -> Result<()> {
    debug!("Authenticating as user: {}", target.username);

    if !target.password.is_empty() {
        match sess.userauth_password(&target.username, &target.password) {
            Ok(()) => return Ok(()),
            Err(e) => warn!("Password authentication failed: {}", e),
        }
    }

    match sess.userauth_agent(&target.username) {
        Ok(()) => return Ok(()),
        Err(e) => debug!("Agent authentication failed: {}", e),
    }

    Err(Error::AuthFailed {
        user: target.username.clone(),
        host: target.host.clone(),
    })
}

pub struct SshSession {
    sess: Ssh2Session,
}

impl SshSession {
    fn drain<R: Read>(mut stream: R, mut sink: impl FnMut(&[u8])) -> Result<()> {
        let mut buffer = [0u8; STREAM_CHUNK_SIZE];
        loop {
            match stream.read(&mut buffer) {
                Ok(0) => return Ok(()),
                Ok(n) => sink(&buffer[..n]),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::Io(e)),
            }
        }
    }
}

impl RemoteSession for SshSession {
    fn protocol(&self) -> Protocol {
        Protocol::Ssh
    }

    fn exec(
        &mut self,
        command: &str,
        _options: &RunOptions,
        output: &mut dyn OutputHandler,
    ) -> Result<i32> {
        let mut channel = self.sess.channel_session()?;
        channel.exec(&format!("{}{}", PROFILE_PREFIX, command))?;

        Self::drain(&mut channel, |chunk| output.stdout(chunk))?;
        Self::drain(channel.stderr(), |chunk| output.stderr(chunk))?;

        channel.wait_close()?;
        let status = channel.exit_status()?;
        debug!("Command exit code: {}", status);
        Ok(status)
    }

    fn read_file(&mut self, path: &str) -> Result<Option<Vec<u8>>> {
        let sftp = self.sess.sftp()?;
        let mut file = match sftp.open(Path::new(path)) {
            Ok(file) => file,
            Err(e) if matches!(e.code(), ssh2::ErrorCode::SFTP(SFTP_NO_SUCH_FILE)) => {
                return Ok(None)
            }
            Err(e) => return Err(e.into()),
        };
        let mut contents = Vec::new();
        file.read_to_end(&mut contents)?;
        Ok(Some(contents))
    }

    fn write_file(&mut self, path: &str, contents: &[u8], mode: i32) -> Result<()> {
        let sftp = self.sess.sftp()?;
        let mut file = sftp.open_mode(
            Path::new(path),
            OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::TRUNCATE,
            mode,
            OpenType::File,
        )?;
        file.write_all(contents)?;
        drop(file);

        // open_mode only applies the mode to newly created files
        sftp.setstat(
            Path::new(path),
            FileStat {
                size: None,
                uid: None,
                gid: None,
                perm: Some(mode as u32),
                atime: None,
                mtime: None,
            },
        )?;
        Ok(())
    }

    fn make_dir(&mut self, path: &str) -> Result<()> {
        let sftp = self.sess.sftp()?;
        if sftp.stat(Path::new(path)).is_ok() {
            return Ok(());
        }
        sftp.mkdir(Path::new(path), 0o755)?;
        Ok(())
    }

    fn stat(&mut self, path: &str) -> Result<Option<RemoteStat>> {
        let sftp = self.sess.sftp()?;
        match sftp.stat(Path::new(path)) {
            Ok(stat) => Ok(Some(RemoteStat {
                is_dir: stat.is_dir(),
                mode: stat.perm.map_or(0o644, |perm| (perm & 0o777) as i32),
            })),
            Err(e) if matches!(e.code(), ssh2::ErrorCode::SFTP(SFTP_NO_SUCH_FILE)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn list_dir(&mut self, path: &str) -> Result<Vec<String>> {
        let sftp = self.sess.sftp()?;
        let entries = sftp.readdir(Path::new(path))?;
        Ok(entries
            .iter()
            .filter_map(|(entry, _)| entry.file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .collect())
    }

    fn close(&mut self) -> Result<()> {
        self.sess.disconnect(None, "closing", None)?;
        Ok(())
    }
}
