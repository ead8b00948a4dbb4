use crate::output::print_json;
use adpilot_core::config::{Config, WarnLevel};
use anyhow::Context;
use clap::Subcommand;
use std::path::Path;

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Print the effective config
    Show,

    /// Validate the config for common mistakes
    Validate,

    /// Set the marketplace and optional timezone override for an account
    SetAccount {
        account_id: String,
        #[arg(long)]
        marketplace: String,
        /// IANA timezone, overriding the marketplace default
        #[arg(long)]
        timezone: Option<String>,
    },
}

pub fn run(root: &Path, subcmd: ConfigSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        ConfigSubcommand::Show => show(root, json),
        ConfigSubcommand::Validate => validate(root, json),
        ConfigSubcommand::SetAccount {
            account_id,
            marketplace,
            timezone,
        } => set_account(root, &account_id, &marketplace, timezone),
    }
}

fn show(root: &Path, json: bool) -> anyhow::Result<()> {
    let config = Config::load(root).context("failed to load config")?;
    if json {
        print_json(&config)?;
    } else {
        print!("{}", serde_yaml::to_string(&config)?);
    }
    Ok(())
}

fn validate(root: &Path, json: bool) -> anyhow::Result<()> {
    let config = Config::load(root).context("failed to load config")?;
    let warnings = config.validate();

    if json {
        print_json(&serde_json::json!({ "warnings": warnings }))?;
    } else if warnings.is_empty() {
        println!("Config is valid. No warnings.");
    } else {
        for w in &warnings {
            let prefix = match w.level {
                WarnLevel::Warning => "warning",
                WarnLevel::Error => "error",
            };
            println!("[{prefix}] {}", w.message);
        }
    }

    if warnings.iter().any(|w| w.level == WarnLevel::Error) {
        anyhow::bail!("config validation found errors");
    }
    Ok(())
}

fn set_account(
    root: &Path,
    account_id: &str,
    marketplace: &str,
    timezone: Option<String>,
) -> anyhow::Result<()> {
    let mut config = Config::load(root).context("failed to load config")?;
    let entry = config.accounts.entry(account_id.to_string()).or_default();
    entry.marketplace = Some(marketplace.to_uppercase());
    entry.timezone = timezone;
    config.save(root).context("failed to write config.yaml")?;
    println!("Account '{account_id}' set to marketplace {}.", marketplace.to_uppercase());
    Ok(())
}
