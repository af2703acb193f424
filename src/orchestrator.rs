//! High-level provisioning workflow for one target.
//!
//! [`Provisioner`] ties the configuration repository to the remote side: it
//! owns the log sink and the session manager, builds resolved configurations,
//! and runs commands, uploads and marker checks against the connected target.

use log::{debug, info, warn};
use std::path::Path;
use std::thread;
use std::time::Duration;

use crate::compose::{BuildOptions, ConfigComposer, ConfigStore, ProvisionerSource};
use crate::config::{RepoPaths, Settings};
use crate::error::{Error, Result};
use crate::model::{Protocol, ResolvedConfig};
use crate::remote::retry::is_transient;
use crate::remote::{
    copy_from_remote, copy_local, copy_to_remote, is_target_configured, mark_target_configured,
    CommandResult, CommandRunner, Connector, LogSink, RunOptions, Session, SessionManager, Target,
};

/// Pause between issuing a reboot and reconnecting.
const REBOOT_PAUSE: Duration = Duration::from_secs(2);

/// Provisioning driver for a single target host.
pub struct Provisioner {
    settings: Settings,
    composer: ConfigComposer,
    paths: RepoPaths,
    sessions: SessionManager,
    log: LogSink,
    quiet: bool,
}

impl Provisioner {
    /// Opens the configuration repository and log file named in `settings`.
    pub fn open(settings: Settings) -> Result<Self> {
        let log = match &settings.log_file {
            Some(path) => {
                info!("Writing command output to {}", path.display());
                LogSink::with_file(path)?
            }
            None => LogSink::console(),
        };
        Ok(Self {
            composer: ConfigComposer::new(ConfigStore::new(&settings.repo_dir)),
            paths: RepoPaths::new(&settings.repo_dir),
            sessions: SessionManager::new(settings.winrm.clone()),
            log,
            quiet: false,
            settings,
        })
    }

    /// Hides command output and retry countdowns on the console.
    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn paths(&self) -> &RepoPaths {
        &self.paths
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Build options pointing at the provisioner and catalog files from the settings.
    pub fn build_options(&self) -> BuildOptions {
        BuildOptions {
            provisioner: ProvisionerSource::File(self.settings.provisioner_file.clone()),
            catalog: self.settings.catalog_file.clone(),
            ..BuildOptions::default()
        }
    }

    /// Resolves the target configuration and applies its path overrides.
    pub fn build_config(
        &mut self,
        target_os: Option<&str>,
        options: &BuildOptions,
    ) -> Result<ResolvedConfig> {
        let cfg = self.composer.build(target_os, options)?;
        self.paths.apply_overrides(cfg.as_map());
        info!("Resolved configuration for {}", cfg.describe());
        Ok(cfg)
    }

    /// Connects to the target, retrying per the settings.
    pub fn connect(&mut self, cfg: &ResolvedConfig) -> Result<&Session> {
        let retry = self.settings.retry_config(self.quiet);
        self.sessions.connect(cfg, &retry)
    }

    /// Connects through an explicit connector, for adapters not chosen by `conn_type`.
    pub fn connect_with(
        &mut self,
        connector: &dyn Connector,
        cfg: &ResolvedConfig,
    ) -> Result<&Session> {
        let retry = self.settings.retry_config(self.quiet);
        let target = Target::from_config(cfg, self.settings.winrm.port)?;
        self.sessions.connect_with(connector, target, &retry)
    }

    pub fn run(&mut self, cmd: &str, options: &RunOptions) -> Result<CommandResult> {
        let options = RunOptions {
            quiet: options.quiet || self.quiet,
            ..options.clone()
        };
        CommandRunner::new(&mut self.sessions, &self.log).run(cmd, &options)
    }

    /// Runs `cmd` on the orchestration host.
    pub fn run_local(&mut self, cmd: &str, options: &RunOptions) -> Result<CommandResult> {
        let options = RunOptions {
            local: true,
            ..options.clone()
        };
        self.run(cmd, &options)
    }

    pub fn is_target_configured(&mut self, cfg: &ResolvedConfig) -> Result<bool> {
        let marker = self.paths.complete_flag().to_string();
        let session = self.sessions.session_mut()?;
        is_target_configured(session.handle_mut(), cfg, &marker)
    }

    pub fn mark_target_configured(&mut self, cfg: &ResolvedConfig) -> Result<()> {
        let marker = self.paths.complete_flag().to_string();
        let session = self.sessions.session_mut()?;
        mark_target_configured(session.handle_mut(), cfg, &marker)
    }

    /// Uploads a local file or directory to the target. Returns the number of files copied.
    pub fn copy_to_target(&mut self, local: &Path, remote: &str) -> Result<usize> {
        let session = self.sessions.session_mut()?;
        copy_to_remote(session.handle_mut(), local, remote)
    }

    /// Downloads a remote file or directory. `None` if `remote` does not exist.
    pub fn fetch_from_target(&mut self, remote: &str, local: &Path) -> Result<Option<usize>> {
        let session = self.sessions.session_mut()?;
        copy_from_remote(session.handle_mut(), remote, local)
    }

    /// Like [`Provisioner::fetch_from_target`], for targets that are this host.
    pub fn fetch_local(&self, source: &Path, dest: &Path) -> Result<Option<usize>> {
        copy_local(source, dest)
    }

    /// Reboots the target and, unless `wait` is false, reconnects once it is back.
    pub fn reboot(&mut self, cfg: &ResolvedConfig, wait: bool) -> Result<()> {
        if !self.sessions.is_connected() {
            self.connect(cfg)?;
        }
        let protocol = self.sessions.session()?.protocol();
        let (cmd, options) = match protocol {
            Protocol::Ssh => ("sudo reboot", RunOptions::default()),
            Protocol::WinRm => (
                "shutdown /r /t 0",
                RunOptions {
                    use_powershell: false,
                    ..RunOptions::default()
                },
            ),
        };

        info!("Rebooting {}", cfg.describe());
        match self.run(cmd, &options) {
            Ok(result) => debug!("Reboot command returned {}", result.status),
            // The target may drop the connection before reporting a status.
            Err(e) if is_transient(&e) => debug!("Connection dropped during reboot: {}", e),
            Err(e) => return Err(e),
        }
        self.sessions.close()?;

        thread::sleep(REBOOT_PAUSE);
        if wait {
            self.connect(cfg)?;
        }
        Ok(())
    }

    /// Closes the session and flushes the log file.
    pub fn close(mut self) -> Result<()> {
        self.sessions.close()?;
        self.log.close()
    }

    /// Runs `body`, then closes the provisioner whether or not it failed.
    ///
    /// An error from `body` takes precedence over one from closing.
    pub fn scoped<T, E>(
        mut self,
        body: impl FnOnce(&mut Self) -> std::result::Result<T, E>,
    ) -> std::result::Result<T, E>
    where
        E: From<Error>,
    {
        let outcome = body(&mut self);
        let closed = self.close();
        match outcome {
            Ok(value) => closed.map(|()| value).map_err(E::from),
            Err(e) => {
                if let Err(close_err) = closed {
                    warn!("Error while closing after a failure: {}", close_err);
                }
                Err(e)
            }
        }
    }
}
