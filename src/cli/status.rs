//! Checking (and recording) whether the target is already provisioned.

use anyhow::Result;
use clap::Args;
use console::style;

use labprov::config::Settings;
use labprov::Provisioner;

use super::TargetArgs;

#[derive(Args)]
#[command(about = "Check whether the target carries a matching completion marker")]
pub struct StatusCommand {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Write the completion marker for the resolved configuration
    #[arg(long)]
    pub mark: bool,
}

impl StatusCommand {
    pub fn execute(&self, settings: Settings) -> Result<()> {
        Provisioner::open(settings)?.scoped(|prov| self.check(prov))
    }

    fn check(&self, prov: &mut Provisioner) -> Result<()> {
        let cfg = self.target.resolve(prov)?;
        super::connect(prov, &cfg)?;

        if prov.is_target_configured(&cfg)? {
            println!(
                "{} {} is configured for {}",
                style("✓").green(),
                cfg.describe(),
                cfg.os_profile().unwrap_or("<unknown profile>")
            );
        } else if self.mark {
            prov.mark_target_configured(&cfg)?;
            println!("{} Marked {} as configured", style("✓").green(), cfg.describe());
        } else {
            println!(
                "{} {} does not match the resolved configuration",
                style("✗").yellow(),
                cfg.describe()
            );
        }
        Ok(())
    }
}
