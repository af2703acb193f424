//! Connect-with-retry for targets that may still be booting.
//!
//! Only failures that are expected while a machine reboots are retried. All
//! other errors end the attempt loop immediately and propagate unchanged.

use crate::error::{Error, Result};
use crate::remote::session::Target;
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, warn};
use std::io::ErrorKind;
use std::thread;
use std::time::Duration;

// libssh2 session error codes seen while sshd is still coming up.
const LIBSSH2_ERROR_BANNER_RECV: i32 = -2;
const LIBSSH2_ERROR_KEX_FAILURE: i32 = -5;
const LIBSSH2_ERROR_SOCKET_SEND: i32 = -7;
const LIBSSH2_ERROR_KEY_EXCHANGE_FAILURE: i32 = -8;
const LIBSSH2_ERROR_TIMEOUT: i32 = -9;
const LIBSSH2_ERROR_SOCKET_DISCONNECT: i32 = -13;
const LIBSSH2_ERROR_SOCKET_TIMEOUT: i32 = -30;
const LIBSSH2_ERROR_SOCKET_RECV: i32 = -43;

const TRANSIENT_SSH_CODES: &[i32] = &[
    LIBSSH2_ERROR_BANNER_RECV,
    LIBSSH2_ERROR_KEX_FAILURE,
    LIBSSH2_ERROR_SOCKET_SEND,
    LIBSSH2_ERROR_KEY_EXCHANGE_FAILURE,
    LIBSSH2_ERROR_TIMEOUT,
    LIBSSH2_ERROR_SOCKET_DISCONNECT,
    LIBSSH2_ERROR_SOCKET_TIMEOUT,
    LIBSSH2_ERROR_SOCKET_RECV,
];

/// Retry budget for connecting to a target.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total connection attempts, including the first one
    pub attempts: u32,
    /// Pause between attempts
    pub delay: Duration,
    /// Hide the countdown on the console
    pub quiet: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 50,
            delay: Duration::from_secs(10),
            quiet: false,
        }
    }
}

impl RetryConfig {
    /// Creates a new retry configuration.
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts,
            delay,
            quiet: false,
        }
    }

    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }
}

/// Returns true if `error` is expected while a target is booting or rebooting.
pub fn is_transient(error: &Error) -> bool {
    match error {
        Error::Io(e) => matches!(
            e.kind(),
            ErrorKind::ConnectionRefused
                | ErrorKind::ConnectionReset
                | ErrorKind::ConnectionAborted
                | ErrorKind::NotConnected
                | ErrorKind::TimedOut
                | ErrorKind::WouldBlock
                | ErrorKind::UnexpectedEof
        ),
        Error::Ssh(e) => match e.code() {
            ssh2::ErrorCode::Session(code) => TRANSIENT_SSH_CODES.contains(&code),
            ssh2::ErrorCode::SFTP(_) => false,
        },
        Error::AuthFailed { .. } | Error::Unreachable(_) => true,
        _ => false,
    }
}

/// Runs `operation` until it succeeds, retrying transient failures.
///
/// `operation` receives the 1-based attempt number. After `config.attempts`
/// transient failures this returns [`Error::Connect`]; a non-transient error
/// is returned as-is on the attempt it happens.
pub fn retry_transient<T, F>(config: &RetryConfig, target: &str, mut operation: F) -> Result<T>
where
    F: FnMut(u32) -> Result<T>,
{
    let attempts = config.attempts.max(1);
    let width = attempts.to_string().len();
    let mut last_error = String::new();

    for attempt in 1..=attempts {
        match operation(attempt) {
            Ok(result) => {
                debug!("Connected to {} on attempt {}", target, attempt);
                return Ok(result);
            }
            Err(e) if is_transient(&e) => {
                last_error = e.to_string();
                if attempt == attempts {
                    break;
                }
                warn!(
                    "{:<width$}: Failed to connect to {}. Waiting {}s and trying again. ({})",
                    attempt,
                    target,
                    config.delay.as_secs(),
                    e,
                    width = width
                );
                wait_with_progress(config.delay, config.quiet, target);
            }
            Err(e) => {
                debug!("Giving up on {} after non-transient error: {}", target, e);
                return Err(e);
            }
        }
    }

    Err(Error::Connect {
        target: target.to_string(),
        attempts,
        last: last_error,
    })
}

/// Sleeps for `delay`, ticking a progress bar once per second.
fn wait_with_progress(delay: Duration, quiet: bool, target: &str) {
    if delay.is_zero() {
        return;
    }

    let secs = delay.as_secs();
    let pb = if quiet {
        ProgressBar::hidden()
    } else {
        ProgressBar::new(secs)
    };
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{msg} [{bar:20.cyan/blue}] {pos}/{len}s")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );
    pb.set_message(format!("Waiting for {}", target));

    for _ in 0..secs {
        thread::sleep(Duration::from_secs(1));
        pb.inc(1);
    }
    thread::sleep(delay - Duration::from_secs(secs));
    pb.finish_and_clear();
}

/// Provides troubleshooting suggestions for a failed connection.
pub fn diagnose_connect_error(error: &Error, target: &Target) -> String {
    let error_str = error.to_string().to_lowercase();
    let host = &target.host;
    let port = target.port;

    let mut suggestions = Vec::new();

    if let Error::InvalidProtocol(kind) = error {
        suggestions.push(format!(
            "• conn_type '{}' is not supported; use \"ssh\" or \"winrm\"",
            kind
        ));
    } else if error_str.contains("refused")
        || error_str.contains("unreachable")
        || error_str.contains("timed out")
        || error_str.contains("no route to host")
    {
        suggestions.push(format!("• Verify the host '{}' is powered on and reachable", host));
        suggestions.push(format!(
            "• Check that {} is listening on port {}",
            target.protocol, port
        ));
        suggestions.push(
            "• If the target was just imaged, it may still be installing; raise connect.attempts"
                .to_string(),
        );
    }

    if error_str.contains("authentication") {
        suggestions.push(format!(
            "• Verify dev_username '{}' and dev_password in the provisioner config",
            target.username
        ));
        suggestions.push("• Check that the kickstart created the development user".to_string());
    }

    if suggestions.is_empty() {
        suggestions.push("• Verify the remote host is accessible".to_string());
        match target.protocol {
            crate::model::Protocol::Ssh => suggestions.push(format!(
                "• Test the connection manually: ssh -p {} {}@{}",
                port, target.username, host
            )),
            crate::model::Protocol::WinRm => suggestions.push(format!(
                "• Test WinRM manually: curl -u {} http://{}:{}/wsman",
                target.username, host, port
            )),
        }
    }

    format!(
        "Connection failed: {}\n\nTroubleshooting suggestions:\n{}",
        error,
        suggestions.join("\n")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Protocol;
    use std::io;

    fn fast(attempts: u32) -> RetryConfig {
        RetryConfig::new(attempts, Duration::ZERO).quiet(true)
    }

    fn refused() -> Error {
        Error::Io(io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused"))
    }

    #[test]
    fn test_retry_config_default() {
        let config = RetryConfig::default();
        assert_eq!(config.attempts, 50);
        assert_eq!(config.delay, Duration::from_secs(10));
        assert!(!config.quiet);
    }

    #[test]
    fn test_transient_classification() {
        assert!(is_transient(&refused()));
        assert!(is_transient(&Error::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "eof"
        ))));
        assert!(is_transient(&Error::Unreachable("10.0.0.5".into())));
        assert!(is_transient(&Error::AuthFailed {
            user: "root".into(),
            host: "h".into()
        }));
        assert!(!is_transient(&Error::Io(io::Error::new(
            io::ErrorKind::PermissionDenied,
            "denied"
        ))));
        assert!(!is_transient(&Error::Config("bad".into())));
        assert!(!is_transient(&Error::InvalidProtocol("telnet".into())));
    }

    #[test]
    fn test_success_on_first_attempt() {
        let mut calls = 0;
        let result = retry_transient(&fast(3), "host", |_| {
            calls += 1;
            Ok::<i32, Error>(42)
        });
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_success_on_second_attempt() {
        let mut seen = Vec::new();
        let result = retry_transient(&fast(3), "host", |attempt| {
            seen.push(attempt);
            if attempt < 2 {
                Err(refused())
            } else {
                Ok("session")
            }
        });
        assert_eq!(result.unwrap(), "session");
        assert_eq!(seen, vec![1, 2]);
    }

    #[test]
    fn test_exhaustion_makes_exact_attempts() {
        let mut calls = 0;
        let result: Result<()> = retry_transient(&fast(3), "host", |_| {
            calls += 1;
            Err(refused())
        });
        assert_eq!(calls, 3);
        match result.unwrap_err() {
            Error::Connect {
                target,
                attempts,
                last,
            } => {
                assert_eq!(target, "host");
                assert_eq!(attempts, 3);
                assert!(last.contains("connection refused"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_non_transient_fails_immediately() {
        let mut calls = 0;
        let result: Result<()> = retry_transient(&fast(5), "host", |_| {
            calls += 1;
            Err(Error::Config("no such host".into()))
        });
        assert_eq!(calls, 1);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_zero_attempts_still_tries_once() {
        let mut calls = 0;
        let _: Result<()> = retry_transient(&fast(0), "host", |_| {
            calls += 1;
            Err(refused())
        });
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_diagnose_refused() {
        let target = Target::new("10.0.0.5", 22, "root", "pw", Protocol::Ssh);
        let diagnosis = diagnose_connect_error(&refused(), &target);
        assert!(diagnosis.contains("Verify the host '10.0.0.5' is powered on"));
        assert!(diagnosis.contains("ssh is listening on port 22"));
    }

    #[test]
    fn test_diagnose_auth_and_generic() {
        let target = Target::new("win01", 5985, "Administrator", "pw", Protocol::WinRm);
        let auth = Error::AuthFailed {
            user: "Administrator".into(),
            host: "win01".into(),
        };
        assert!(diagnose_connect_error(&auth, &target).contains("dev_username 'Administrator'"));

        let generic = diagnose_connect_error(&Error::WinRm("fault".into()), &target);
        assert!(generic.contains("curl -u Administrator http://win01:5985/wsman"));
    }
}
