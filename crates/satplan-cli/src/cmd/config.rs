use crate::output::print_json;
use anyhow::Context;
use clap::Subcommand;
use satplan_core::config::{PlannerConfig, WarnLevel, CONFIG_FILE};
use std::path::Path;

// ---------------------------------------------------------------------------
// Subcommand types
// ---------------------------------------------------------------------------

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Print the effective configuration
    Show,

    /// Validate the config for common mistakes
    Validate,

    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn run(path: Option<&Path>, subcmd: ConfigSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        ConfigSubcommand::Show => show(path, json),
        ConfigSubcommand::Validate => validate(path, json),
        ConfigSubcommand::Init { force } => init(path, force),
    }
}

fn load(path: Option<&Path>) -> anyhow::Result<PlannerConfig> {
    PlannerConfig::load_or_default(path).context("failed to load config")
}

// ---------------------------------------------------------------------------
// show
// ---------------------------------------------------------------------------

fn show(path: Option<&Path>, json: bool) -> anyhow::Result<()> {
    let config = load(path)?;
    if json {
        print_json(&config)?;
    } else {
        print!("{}", serde_yaml::to_string(&config)?);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// validate
// ---------------------------------------------------------------------------

fn validate(path: Option<&Path>, json: bool) -> anyhow::Result<()> {
    let config = load(path)?;
    let warnings = config.validate();

    if json {
        let value = serde_json::json!({
            "warnings": warnings,
        });
        print_json(&value)?;
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

// ---------------------------------------------------------------------------
// init
// ---------------------------------------------------------------------------

fn init(path: Option<&Path>, force: bool) -> anyhow::Result<()> {
    let target = path.unwrap_or_else(|| Path::new(CONFIG_FILE));
    if target.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            target.display()
        );
    }
    PlannerConfig::default()
        .save(target)
        .with_context(|| format!("failed to write {}", target.display()))?;
    println!("Wrote {}", target.display());
    Ok(())
}
