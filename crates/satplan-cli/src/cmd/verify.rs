use crate::output::print_json;
use clap::Subcommand;
use satplan_core::config::PlannerConfig;
use satplan_core::verify::{verify_coverage_files, verify_revisit_files, VerifierOutput};
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum VerifySubcommand {
    /// Revisit-gap statistics and mapping quotas
    Revisit {
        /// Committed plan file
        #[arg(long)]
        plan: PathBuf,
        /// Case requirements with a `revisit_optimization` block
        #[arg(long)]
        requirements: PathBuf,
    },

    /// Regional polygon coverage
    Coverage {
        /// Committed plan file
        #[arg(long)]
        plan: PathBuf,
        /// Case requirements with a `regional_coverage` block
        #[arg(long)]
        requirements: PathBuf,
    },
}

/// Verifier output is always JSON. Malformed input still prints the
/// `{valid: false, error}` document before exiting non-zero.
pub fn run(config: &PlannerConfig, subcmd: VerifySubcommand) -> anyhow::Result<()> {
    let output = match subcmd {
        VerifySubcommand::Revisit { plan, requirements } => {
            verify_revisit_files(&plan, &requirements)
        }
        VerifySubcommand::Coverage { plan, requirements } => {
            verify_coverage_files(&plan, &requirements, &config.coverage)
        }
    };
    print_json(&output)?;

    if let VerifierOutput::Failed { error, .. } = &output {
        anyhow::bail!("verification failed: {error}");
    }
    Ok(())
}
