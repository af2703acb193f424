//! CLI command for inspecting resolved configurations and tool settings.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use labprov::config::Settings;
use labprov::Provisioner;

use super::TargetArgs;

#[derive(Args)]
#[command(about = "Show resolved target configurations and labprov settings")]
pub struct ConfigCommand {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print the resolved configuration of the target as JSON
    Show {
        #[command(flatten)]
        target: TargetArgs,
    },

    /// List the OS profiles available in the catalog
    Profiles,

    /// Print the effective labprov settings
    Settings,

    /// Show the settings file path
    Path,

    /// Write a settings file with default values
    Init {
        /// Overwrite an existing settings file
        #[arg(long)]
        force: bool,
    },
}

impl ConfigCommand {
    pub fn execute(&self, settings: Settings) -> Result<()> {
        match &self.action {
            ConfigAction::Show { target } => self.show_config(settings, target),
            ConfigAction::Profiles => self.list_profiles(&settings),
            ConfigAction::Settings => self.show_settings(&settings),
            ConfigAction::Path => self.show_path(),
            ConfigAction::Init { force } => self.init_settings(&settings, *force),
        }
    }

    fn show_config(&self, settings: Settings, target: &TargetArgs) -> Result<()> {
        Provisioner::open(settings)?.scoped(|prov| {
            let cfg = target.resolve(prov)?;
            println!("{}", serde_json::to_string_pretty(&cfg)?);
            Ok(())
        })
    }

    fn list_profiles(&self, settings: &Settings) -> Result<()> {
        let store = labprov::compose::ConfigStore::new(&settings.repo_dir);
        let catalog = store
            .load_catalog(&settings.catalog_file)
            .with_context(|| format!("Failed to load catalog {}", settings.catalog_file))?;

        let families: Vec<&str> = catalog.families().collect();
        println!("Families: {}", families.join(", "));
        println!("Profiles:");
        for name in catalog.profile_names() {
            println!("  {}", name);
        }
        Ok(())
    }

    fn show_settings(&self, settings: &Settings) -> Result<()> {
        let yaml = serde_yaml::to_string(settings)?;
        println!("{}", yaml);
        Ok(())
    }

    fn show_path(&self) -> Result<()> {
        match Settings::default_path() {
            Some(path) => {
                println!("Settings file path: {}", path.display());
                if path.exists() {
                    println!("Status: File exists");
                } else {
                    println!("Status: File does not exist");
                }
            }
            None => {
                println!("Could not determine configuration directory");
            }
        }
        Ok(())
    }

    fn init_settings(&self, settings: &Settings, force: bool) -> Result<()> {
        let path = Settings::default_path()
            .context("Could not determine configuration directory")?;

        if path.exists() && !force {
            println!("Settings file already exists at: {}", path.display());
            println!("Use --force to overwrite");
            return Ok(());
        }

        settings.save_to(&path)?;
        println!("Created settings file at: {}", path.display());
        Ok(())
    }
}
