//! Command-line interface.

pub mod config;
pub mod exec;
pub mod fetch;
pub mod status;
pub mod validate;

use anyhow::{anyhow, Result};
use clap::Args;

use labprov::compose::ProvisionerSource;
use labprov::model::ResolvedConfig;
use labprov::remote::{diagnose_connect_error, Target};
use labprov::Provisioner;

/// Options selecting and resolving the target configuration.
#[derive(Args, Debug, Clone, Default)]
pub struct TargetArgs {
    /// Target OS profile to resolve from the catalog
    #[arg(long)]
    pub os: Option<String>,

    /// Provisioner file inside the repository (default from settings)
    #[arg(long)]
    pub provisioner: Option<String>,

    /// Provisioner file of the UAT host
    #[arg(long, conflicts_with = "skip_uat")]
    pub uat: Option<String>,

    /// Target OS profile for the UAT host
    #[arg(long)]
    pub uat_os: Option<String>,

    /// Do not resolve the UAT host
    #[arg(long)]
    pub skip_uat: bool,

    /// Override the target IP address
    #[arg(long)]
    pub ip: Option<String>,

    /// Store this MAC address in the provisioner file
    #[arg(long)]
    pub mac: Option<String>,
}

impl TargetArgs {
    /// Resolves the configuration these arguments describe.
    pub fn resolve(&self, prov: &mut Provisioner) -> Result<ResolvedConfig> {
        let mut options = prov.build_options();
        if let Some(file) = &self.provisioner {
            options.provisioner = ProvisionerSource::File(file.clone());
        }
        options.uat = self.uat.clone().map(ProvisionerSource::File);
        options.uat_os = self.uat_os.clone();
        options.skip_uat = self.skip_uat;
        options.override_ip = self.ip.clone();
        options.mac = self.mac.clone();

        Ok(prov.build_config(self.os.as_deref(), &options)?)
    }
}

/// Connects to the target, printing troubleshooting suggestions on failure.
pub fn connect(prov: &mut Provisioner, cfg: &ResolvedConfig) -> Result<()> {
    match prov.connect(cfg) {
        Ok(session) => {
            log::info!("Connected to {}", session.target());
            Ok(())
        }
        Err(e) => match Target::from_config(cfg, prov.settings().winrm.port) {
            Ok(target) => Err(anyhow!(diagnose_connect_error(&e, &target))),
            Err(_) => Err(e.into()),
        },
    }
}
