mod cmd;
mod output;

use anyhow::Context;
use clap::{Parser, Subcommand};
use cmd::{config::ConfigSubcommand, verify::VerifySubcommand};
use satplan_core::config::PlannerConfig;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(
    name = "satplan",
    about = "Satellite plan feasibility gate: stage, check and verify tasking plans",
    version,
    propagate_version = true
)]
struct Cli {
    /// Planner config file (default: ./satplan.yaml if present)
    #[arg(long, global = true, env = "SATPLAN_CONFIG")]
    config: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    /// Log checks and transitions to stderr
    #[arg(long, global = true, short = 'v')]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stage every action of a file against a scenario, then commit
    Plan {
        /// Scenario file (JSON or YAML)
        #[arg(long)]
        scenario: PathBuf,
        /// Actions file: a list of action records, or a document with `actions`
        #[arg(long)]
        actions: PathBuf,
        /// Write the committed plan here
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },

    /// Score a committed plan against case requirements
    Verify {
        #[command(subcommand)]
        subcommand: VerifySubcommand,
    },

    /// Compute the minimum slew time between two attitudes
    Slew {
        /// Start attitude quaternion as w,x,y,z
        #[arg(long, value_parser = cmd::slew::parse_quaternion)]
        from: satplan_core::attitude::Quaternion,
        /// End attitude quaternion as w,x,y,z
        #[arg(long, value_parser = cmd::slew::parse_quaternion)]
        to: satplan_core::attitude::Quaternion,
        /// Maximum angular velocity (deg/s)
        #[arg(long)]
        velocity: f64,
        /// Maximum angular acceleration (deg/s^2)
        #[arg(long)]
        acceleration: f64,
        /// Maximum angular jerk (deg/s^3)
        #[arg(long)]
        jerk: Option<f64>,
        /// Settling time after the maneuver (s)
        #[arg(long, default_value_t = 0.0)]
        settling: f64,
    },

    /// Inspect the planner configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config_path = cli.config.as_deref();
    let result = match cli.command {
        Commands::Plan {
            scenario,
            actions,
            output,
        } => load_config(config_path).and_then(|config| {
            cmd::plan::run(&config, &scenario, &actions, output.as_deref(), cli.json)
        }),
        Commands::Verify { subcommand } => {
            load_config(config_path).and_then(|config| cmd::verify::run(&config, subcommand))
        }
        Commands::Slew {
            from,
            to,
            velocity,
            acceleration,
            jerk,
            settling,
        } => cmd::slew::run(&from, &to, velocity, acceleration, jerk, settling, cli.json),
        Commands::Config { subcommand } => cmd::config::run(config_path, subcommand, cli.json),
    };

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<PlannerConfig> {
    PlannerConfig::load_or_default(path).context("failed to load config")
}
