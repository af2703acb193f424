//! Command execution on the target or on the orchestration host.

use log::{debug, warn};
use std::io::{ErrorKind, Read};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use crate::error::{Error, Result};
use crate::remote::session::SessionManager;
use crate::remote::stream::{LogSink, OutputCollector, OutputHandler, STREAM_CHUNK_SIZE};

/// Options for a single command.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOptions {
    /// Run on the orchestration host instead of the target
    pub local: bool,
    /// Turn a nonzero exit status into [`Error::CommandFailed`]
    pub strict: bool,
    /// Keep output off the console; the log file still gets it
    pub quiet: bool,
    /// Return the full stdout text in [`CommandResult::output`]
    pub capture_output: bool,
    /// Wrap WinRM commands in PowerShell rather than cmd
    pub use_powershell: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            local: false,
            strict: false,
            quiet: false,
            capture_output: false,
            use_powershell: true,
        }
    }
}

impl RunOptions {
    pub fn strict() -> Self {
        Self {
            strict: true,
            ..Self::default()
        }
    }

    pub fn local() -> Self {
        Self {
            local: true,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommandResult {
    pub status: i32,
    /// Captured stdout, when requested
    pub output: Option<String>,
    pub ran_locally: bool,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// Runs commands through a session manager, echoing output to a log sink.
pub struct CommandRunner<'a> {
    sessions: &'a mut SessionManager,
    log: &'a LogSink,
}

impl<'a> CommandRunner<'a> {
    pub fn new(sessions: &'a mut SessionManager, log: &'a LogSink) -> Self {
        Self { sessions, log }
    }

    pub fn run(&mut self, cmd: &str, options: &RunOptions) -> Result<CommandResult> {
        let mut collector = OutputCollector::new(self.log, options.quiet, options.capture_output);

        let status = if options.local {
            self.log
                .status(&format!("Running '{}' locally", cmd), options.quiet);
            run_local(cmd, &mut collector)?
        } else {
            let session = self.sessions.session_mut()?;
            self.log
                .status(&format!("Running '{}' remotely", cmd), options.quiet);
            session.handle_mut().exec(cmd, options, &mut collector)?
        };
        let output = collector.finish();
        debug!("'{}' exited with status {}", cmd, status);

        if options.strict && status != 0 {
            return Err(Error::CommandFailed {
                cmd: cmd.to_string(),
                status,
            });
        }

        Ok(CommandResult {
            status,
            output,
            ran_locally: options.local,
        })
    }
}

/// Runs `cmd` with `/bin/sh -c`, streaming both pipes.
///
/// stderr is read on a helper thread so a chatty child cannot block on a
/// full pipe while stdout is being drained.
fn run_local(cmd: &str, output: &mut dyn OutputHandler) -> Result<i32> {
    let mut child = Command::new("/bin/sh")
        .arg("-c")
        .arg(cmd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;
    let stdout = child.stdout.take();
    drive_child(cmd, &mut child, stdout, output)
}

/// Streams a spawned child's output and waits for it.
///
/// The child is always reaped, also when reading its stdout fails.
fn drive_child<R: Read>(
    cmd: &str,
    child: &mut Child,
    stdout: Option<R>,
    output: &mut dyn OutputHandler,
) -> Result<i32> {
    let (tx, rx) = mpsc::channel::<Vec<u8>>();
    let stderr_reader = child.stderr.take().map(|stderr| {
        thread::spawn(move || {
            read_chunks(stderr, |chunk| {
                let _ = tx.send(chunk.to_vec());
            })
        })
    });

    let streamed = match stdout {
        Some(stdout) => read_chunks(stdout, |chunk| {
            output.stdout(chunk);
            for pending in rx.try_iter() {
                output.stderr(&pending);
            }
        }),
        None => Ok(()),
    };

    if let Err(e) = streamed {
        warn!("Failed to read stdout of '{}': {}", cmd, e);
        if let Err(kill_err) = child.kill() {
            debug!("Failed to kill '{}': {}", cmd, kill_err);
        }
        if let Err(wait_err) = child.wait() {
            debug!("Failed to reap '{}': {}", cmd, wait_err);
        }
        join_stderr(cmd, stderr_reader);
        return Err(Error::Io(e));
    }

    join_stderr(cmd, stderr_reader);
    for pending in rx.try_iter() {
        output.stderr(&pending);
    }

    let status = child.wait()?;
    Ok(status.code().unwrap_or(-1))
}

fn join_stderr(cmd: &str, reader: Option<JoinHandle<std::io::Result<()>>>) {
    if let Some(handle) = reader {
        match handle.join() {
            Ok(Err(e)) => warn!("Failed to read stderr of '{}': {}", cmd, e),
            Err(_) => warn!("stderr reader for '{}' panicked", cmd),
            Ok(Ok(())) => {}
        }
    }
}

fn read_chunks<R: Read>(mut reader: R, mut sink: impl FnMut(&[u8])) -> std::io::Result<()> {
    let mut buffer = [0u8; STREAM_CHUNK_SIZE];
    loop {
        match reader.read(&mut buffer) {
            Ok(0) => return Ok(()),
            Ok(n) => sink(&buffer[..n]),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::session::testing::{fast_retry, target, Reply, ScriptedConnector};
    use tempfile::TempDir;

    fn quiet(strict: bool) -> RunOptions {
        RunOptions {
            strict,
            quiet: true,
            capture_output: true,
            ..RunOptions::default()
        }
    }

    #[test]
    fn test_run_options_default() {
        let options = RunOptions::default();
        assert!(!options.local && !options.strict && !options.quiet);
        assert!(!options.capture_output);
        assert!(options.use_powershell);
        assert!(RunOptions::strict().strict);
        assert!(RunOptions::local().local);
    }

    #[test]
    fn test_remote_requires_session() {
        let mut sessions = SessionManager::default();
        let log = LogSink::console();
        let mut runner = CommandRunner::new(&mut sessions, &log);
        assert!(matches!(
            runner.run("uname", &quiet(false)),
            Err(Error::NotConnected)
        ));
    }

    #[test]
    fn test_strict_and_lenient_exit_status() {
        let connector = ScriptedConnector::new(0).with_replies(vec![
            Reply::status(3),
            Reply::status(3),
        ]);
        let mut sessions = SessionManager::default();
        sessions
            .connect_with(&connector, target(), &fast_retry(1))
            .unwrap();
        let log = LogSink::console();
        let mut runner = CommandRunner::new(&mut sessions, &log);

        match runner.run("false", &quiet(true)) {
            Err(Error::CommandFailed { cmd, status }) => {
                assert_eq!(cmd, "false");
                assert_eq!(status, 3);
            }
            other => panic!("unexpected result: {other:?}"),
        }

        let result = runner.run("false", &quiet(false)).unwrap();
        assert_eq!(result.status, 3);
        assert!(!result.success());
        assert!(!result.ran_locally);
        assert_eq!(connector.state.borrow().commands, vec!["false", "false"]);
    }

    #[test]
    fn test_remote_output_is_logged_and_captured() {
        let dir = TempDir::new().unwrap();
        let log_path = dir.path().join("run.log");
        let reply = Reply {
            stdout: vec![b"abc\nde".to_vec(), b"f\n".to_vec()],
            stderr: vec![b"warn\n".to_vec()],
            status: 0,
        };
        let connector = ScriptedConnector::new(0).with_replies(vec![reply]);
        let mut sessions = SessionManager::default();
        sessions
            .connect_with(&connector, target(), &fast_retry(1))
            .unwrap();

        let mut log = LogSink::with_file(&log_path).unwrap();
        {
            let mut runner = CommandRunner::new(&mut sessions, &log);
            let result = runner.run("cat notes", &quiet(true)).unwrap();
            assert_eq!(result.output.as_deref(), Some("abc\ndef\n"));
        }
        log.close().unwrap();

        let logged = std::fs::read_to_string(&log_path).unwrap();
        assert_eq!(
            logged,
            "Running 'cat notes' remotely\nabc\ndef\nstderr: warn\n"
        );
    }

    #[test]
    fn test_local_command() {
        let mut sessions = SessionManager::default();
        let log = LogSink::console();
        let mut runner = CommandRunner::new(&mut sessions, &log);
        let options = RunOptions {
            local: true,
            ..quiet(false)
        };

        let result = runner
            .run("printf 'one\\ntwo'; echo err >&2; exit 4", &options)
            .unwrap();
        assert_eq!(result.status, 4);
        assert_eq!(result.output.as_deref(), Some("one\ntwo"));
        assert!(result.ran_locally);
    }

    #[test]
    fn test_local_strict_failure() {
        let mut sessions = SessionManager::default();
        let log = LogSink::console();
        let mut runner = CommandRunner::new(&mut sessions, &log);
        let options = RunOptions {
            local: true,
            ..quiet(true)
        };
        assert!(matches!(
            runner.run("exit 2", &options),
            Err(Error::CommandFailed { status: 2, .. })
        ));
        assert!(runner.run("true", &options).unwrap().success());
    }

    #[test]
    fn test_local_stderr_goes_to_log() {
        let dir = TempDir::new().unwrap();
        let log_path = dir.path().join("local.log");
        let mut log = LogSink::with_file(&log_path).unwrap();
        let mut sessions = SessionManager::default();
        {
            let mut runner = CommandRunner::new(&mut sessions, &log);
            let options = RunOptions {
                local: true,
                quiet: true,
                ..RunOptions::default()
            };
            runner.run("echo problem >&2", &options).unwrap();
        }
        log.close().unwrap();

        let logged = std::fs::read_to_string(&log_path).unwrap();
        assert!(logged.contains("stderr: problem\n"));
    }

    struct BrokenPipe;

    impl Read for BrokenPipe {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(ErrorKind::BrokenPipe, "pipe closed"))
        }
    }

    #[test]
    fn test_stdout_failure_reaps_child() {
        let mut child = Command::new("sleep")
            .arg("30")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .unwrap();
        let started = std::time::Instant::now();
        let log = LogSink::console();
        let mut collector = OutputCollector::new(&log, true, false);

        let err =
            drive_child("sleep 30", &mut child, Some(BrokenPipe), &mut collector).unwrap_err();
        assert!(matches!(err, Error::Io(ref e) if e.kind() == ErrorKind::BrokenPipe));
        assert!(child.try_wait().unwrap().is_some());
        assert!(started.elapsed() < std::time::Duration::from_secs(10));
    }
}
