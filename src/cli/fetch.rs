//! Retrieving logs and results from the target.

use anyhow::{bail, Result};
use clap::Args;
use std::path::{Path, PathBuf};

use labprov::config::Settings;
use labprov::Provisioner;

use super::TargetArgs;

#[derive(Args)]
#[command(about = "Copy a file or directory from the target to this machine")]
pub struct FetchCommand {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Treat the source as a path on this machine (for localhost targets)
    #[arg(long)]
    pub local: bool,

    /// Remote file or directory
    pub remote: String,

    /// Local destination
    pub dest: PathBuf,
}

impl FetchCommand {
    pub fn execute(&self, settings: Settings) -> Result<()> {
        let fetched = Provisioner::open(settings)?.scoped(|prov| -> Result<_> {
            if self.local {
                return Ok(prov.fetch_local(Path::new(&self.remote), &self.dest)?);
            }
            let cfg = self.target.resolve(prov)?;
            super::connect(prov, &cfg)?;
            Ok(prov.fetch_from_target(&self.remote, &self.dest)?)
        })?;

        match fetched {
            Some(count) => {
                println!("Fetched {} file(s) into {}", count, self.dest.display());
                Ok(())
            }
            None => bail!("'{}' does not exist", self.remote),
        }
    }
}
