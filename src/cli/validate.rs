//! Validation of the provisioner and catalog documents in the repository.

use anyhow::{bail, Result};
use clap::Args;
use console::style;

use labprov::compose::{validate_catalog, validate_provisioner, ConfigStore, ValidationReport};
use labprov::config::Settings;

#[derive(Args)]
#[command(about = "Validate the provisioner file and the OS catalog")]
pub struct ValidateCommand {
    /// Provisioner file inside the repository (default from settings)
    #[arg(long)]
    pub provisioner: Option<String>,

    /// OS catalog file inside the repository (default from settings)
    #[arg(long)]
    pub catalog: Option<String>,

    /// Only validate the provisioner file
    #[arg(long)]
    pub skip_catalog: bool,

    /// Print the reports as JSON
    #[arg(long)]
    pub json: bool,
}

impl ValidateCommand {
    pub fn execute(&self, settings: Settings) -> Result<()> {
        let store = ConfigStore::new(&settings.repo_dir);
        let provisioner_file = self
            .provisioner
            .clone()
            .unwrap_or(settings.provisioner_file);
        let catalog_file = self.catalog.clone().unwrap_or(settings.catalog_file);

        let mut reports = vec![(
            provisioner_file.clone(),
            validate_provisioner(&store.load_document(&provisioner_file)?),
        )];
        if !self.skip_catalog {
            reports.push((
                catalog_file.clone(),
                validate_catalog(&store.load_document(&catalog_file)?),
            ));
        }

        if self.json {
            let mut by_file = serde_json::Map::new();
            for (name, report) in &reports {
                by_file.insert(name.clone(), serde_json::to_value(report)?);
            }
            println!("{}", serde_json::to_string_pretty(&by_file)?);
        } else {
            for (name, report) in &reports {
                print_report(name, report);
            }
        }

        let failed: Vec<&str> = reports
            .iter()
            .filter(|(_, report)| !report.is_valid())
            .map(|(name, _)| name.as_str())
            .collect();
        if !failed.is_empty() {
            bail!("Validation failed for {}", failed.join(", "));
        }
        Ok(())
    }
}

fn print_report(name: &str, report: &ValidationReport) {
    if report.is_valid() {
        println!("{} {}", style("✓").green(), name);
    } else {
        println!("{} {}", style("✗").red(), name);
    }
    for error in &report.errors {
        println!("  {} {}", style("error:").red().bold(), error);
    }
    for warning in &report.warnings {
        println!("  {} {}", style("warning:").yellow(), warning);
    }
}
