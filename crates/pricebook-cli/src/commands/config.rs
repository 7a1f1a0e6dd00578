//! Config command - inspect and scaffold pipeline configuration.

use std::path::PathBuf;

use clap::{Args, Subcommand};

use pricebook_core::PricebookConfig;

/// Arguments for the config command.
#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    action: ConfigAction,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write a default configuration file
    Init {
        /// Destination path
        #[arg(default_value = "pricebook.json")]
        path: PathBuf,
    },

    /// Print the effective configuration
    Show {
        /// Config file to show (defaults show built-in values)
        path: Option<PathBuf>,
    },
}

pub async fn run(args: ConfigArgs) -> anyhow::Result<()> {
    match args.action {
        ConfigAction::Init { path } => {
            if path.exists() {
                anyhow::bail!("Refusing to overwrite {}", path.display());
            }
            PricebookConfig::default().save(&path)?;
            println!("Wrote default configuration to {}", path.display());
        }
        ConfigAction::Show { path } => {
            let config = match path {
                Some(path) => PricebookConfig::from_file(&path)?,
                None => PricebookConfig::default(),
            };
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }
    Ok(())
}
