//! Running a single command on the target or locally.

use anyhow::{bail, Result};
use clap::Args;

use labprov::config::Settings;
use labprov::remote::RunOptions;
use labprov::Provisioner;

use super::TargetArgs;

#[derive(Args)]
#[command(about = "Connect to the target and run a command")]
pub struct ExecCommand {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Run on this machine instead of the target
    #[arg(long)]
    pub local: bool,

    /// Hide command output on the console
    #[arg(short, long)]
    pub quiet: bool,

    /// Run WinRM commands through cmd instead of PowerShell
    #[arg(long)]
    pub cmd_shell: bool,

    /// Connection attempts before giving up (default from settings)
    #[arg(long)]
    pub attempts: Option<u32>,

    /// Command to run
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

impl ExecCommand {
    pub fn execute(&self, mut settings: Settings) -> Result<()> {
        if let Some(attempts) = self.attempts {
            settings.connect.attempts = attempts;
        }
        let command = self.command.join(" ");
        let options = RunOptions {
            quiet: self.quiet,
            use_powershell: !self.cmd_shell,
            ..RunOptions::default()
        };

        let prov = Provisioner::open(settings)?.quiet(self.quiet);
        let result = prov.scoped(|prov| -> Result<_> {
            if self.local {
                return Ok(prov.run_local(&command, &options)?);
            }
            let cfg = self.target.resolve(prov)?;
            super::connect(prov, &cfg)?;
            Ok(prov.run(&command, &options)?)
        })?;

        if !result.success() {
            bail!("'{}' exited with status {}", command, result.status);
        }
        Ok(())
    }
}
