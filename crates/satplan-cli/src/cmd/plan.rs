use crate::output::{fmt_f64, print_json, print_table};
use anyhow::Context;
use satplan_core::action::{Action, ActionRecord};
use satplan_core::config::PlannerConfig;
use satplan_core::scenario::Scenario;
use satplan_core::session::{CommitResult, PlanSession, Violation, ViolationType};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Actions input: a bare list, or any document with an `actions` list
/// (a persisted plan replays this way).
#[derive(Deserialize)]
#[serde(untagged)]
enum ActionsDocument {
    List(Vec<ActionRecord>),
    Wrapped { actions: Vec<ActionRecord> },
}

impl ActionsDocument {
    fn into_records(self) -> Vec<ActionRecord> {
        match self {
            ActionsDocument::List(r) | ActionsDocument::Wrapped { actions: r } => r,
        }
    }
}

#[derive(Serialize)]
struct StageOutcome {
    action_id: String,
    success: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    violations: Vec<Violation>,
}

#[derive(Serialize)]
struct PlanReport<'a> {
    session_id: &'a str,
    scenario_id: &'a str,
    stages: Vec<StageOutcome>,
    commit: &'a CommitResult,
}

pub fn run(
    config: &PlannerConfig,
    scenario_path: &Path,
    actions_path: &Path,
    output: Option<&Path>,
    json: bool,
) -> anyhow::Result<()> {
    let scenario = Scenario::load(scenario_path)
        .with_context(|| format!("failed to load scenario {}", scenario_path.display()))?;
    let records = satplan_core::io::read_document::<ActionsDocument>(actions_path)
        .with_context(|| format!("failed to load actions {}", actions_path.display()))?
        .into_records();

    let mut session = PlanSession::from_scenario(scenario, config.clone());
    let mut stages = Vec::with_capacity(records.len());
    for record in records {
        let action_id = record.action_id.clone();
        let outcome = match Action::try_from(record) {
            Ok(action) => {
                let r = session.stage(action);
                StageOutcome {
                    action_id: r.action_id,
                    success: r.success,
                    violations: r.violations,
                }
            }
            Err(e) => StageOutcome {
                action_id: action_id.clone(),
                success: false,
                violations: vec![Violation {
                    action_id,
                    violation_type: ViolationType::AccessInvalid,
                    message: e.to_string(),
                    conflicting_action_ids: Vec::new(),
                    magnitude: None,
                }],
            },
        };
        stages.push(outcome);
    }

    let commit = session.commit(output).context("failed to commit plan")?;

    if json {
        print_json(&PlanReport {
            session_id: session.id(),
            scenario_id: session.scenario().id(),
            stages,
            commit: &commit,
        })?;
    } else {
        print_text(&stages, &commit, output);
    }

    if !commit.valid {
        anyhow::bail!("plan is invalid: {} violation(s)", commit.violations.len());
    }
    Ok(())
}

fn print_text(stages: &[StageOutcome], commit: &CommitResult, output: Option<&Path>) {
    let rows = stages
        .iter()
        .map(|s| {
            let detail = s
                .violations
                .iter()
                .map(|v| format!("{}: {}", v.violation_type, v.message))
                .collect::<Vec<_>>()
                .join("; ");
            let result = if s.success { "staged" } else { "rejected" };
            vec![s.action_id.clone(), result.to_string(), detail]
        })
        .collect();
    print_table(&["ACTION", "RESULT", "DETAIL"], rows);
    println!();

    let sat_rows = commit
        .metrics
        .satellites
        .values()
        .map(|m| {
            vec![
                m.satellite_id.clone(),
                m.observations.to_string(),
                m.downlinks.to_string(),
                m.intersatellite_links.to_string(),
                fmt_f64(m.battery_min_wh, 2),
                fmt_f64(m.storage_peak_gb, 3),
            ]
        })
        .collect();
    print_table(
        &["SATELLITE", "OBS", "DL", "ISL", "BATT MIN (Wh)", "STORAGE PEAK (GB)"],
        sat_rows,
    );
    println!();

    let accepted = stages.iter().filter(|s| s.success).count();
    if commit.valid {
        match output {
            Some(p) => println!(
                "Committed {accepted} of {} action(s) to {}.",
                stages.len(),
                p.display()
            ),
            None => println!("Committed {accepted} of {} action(s).", stages.len()),
        }
    } else {
        println!("Commit refused:");
        for v in &commit.violations {
            println!("  [{}] {}: {}", v.violation_type, v.action_id, v.message);
        }
    }
}
