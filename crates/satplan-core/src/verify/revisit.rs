use super::{CaseMeta, VerificationReport, VerifierOutput};
use crate::action::ActionType;
use crate::error::Result;
use crate::persist::PersistedPlan;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

const SECONDS_PER_HOUR: f64 = 3600.0;

// ---------------------------------------------------------------------------
// Requirements
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevisitRequirements {
    pub meta: CaseMeta,
    pub revisit_optimization: RevisitTargets,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RevisitTargets {
    /// Targets whose revisit gaps are scored.
    #[serde(default)]
    pub monitoring_targets: Vec<String>,
    /// Targets with an observation quota.
    #[serde(default)]
    pub mapping_targets: BTreeMap<String, u32>,
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GapStats {
    pub num_observations: usize,
    pub min_gap_hours: f64,
    pub max_gap_hours: f64,
    pub avg_gap_hours: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevisitMetrics {
    /// Only targets observed at least once appear here.
    pub targets: BTreeMap<String, GapStats>,
    /// Mean of the per-target maximum gaps over observed monitoring targets.
    pub mean_max_gap_hours: Option<f64>,
    pub total_observed: u64,
    pub total_required: u64,
    /// `total_observed / total_required`, 0 without quota targets.
    pub target_coverage: f64,
}

/// Bookend-inclusive gaps in hours: `n` observations give `n + 1` gaps.
pub fn revisit_gaps(
    horizon_start: DateTime<Utc>,
    horizon_end: DateTime<Utc>,
    observations: &[DateTime<Utc>],
) -> Vec<f64> {
    let mut times = observations.to_vec();
    times.sort();
    std::iter::once(horizon_start)
        .chain(times)
        .chain(std::iter::once(horizon_end))
        .collect::<Vec<_>>()
        .windows(2)
        .map(|w| crate::action::seconds_between(w[0], w[1]) / SECONDS_PER_HOUR)
        .collect()
}

fn gap_stats(gaps: &[f64], num_observations: usize) -> GapStats {
    let min = gaps.iter().copied().fold(f64::INFINITY, f64::min);
    let max = gaps.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let avg = gaps.iter().sum::<f64>() / gaps.len() as f64;
    GapStats {
        num_observations,
        min_gap_hours: min,
        max_gap_hours: max,
        avg_gap_hours: avg,
    }
}

// ---------------------------------------------------------------------------
// Verification
// ---------------------------------------------------------------------------

pub fn verify_revisit(
    plan: &PersistedPlan,
    req: &RevisitRequirements,
) -> Result<VerificationReport<RevisitMetrics>> {
    let horizon = req.meta.horizon()?;
    let actions = plan.typed_actions()?;
    let goals = &req.revisit_optimization;
    let mut violations = Vec::new();

    let mut seen: BTreeMap<&str, Vec<DateTime<Utc>>> = BTreeMap::new();
    for a in &actions {
        if a.action_type() != ActionType::Observation {
            continue;
        }
        let Some(target) = a.target_id() else {
            continue;
        };
        if a.start() < horizon.start || a.start() > horizon.end {
            violations.push(format!(
                "observation '{}' of '{target}' starts outside the case horizon",
                a.id()
            ));
            continue;
        }
        seen.entry(target).or_default().push(a.start());
    }

    let scored: BTreeSet<&str> = goals
        .monitoring_targets
        .iter()
        .map(String::as_str)
        .chain(goals.mapping_targets.keys().map(String::as_str))
        .collect();

    let mut targets = BTreeMap::new();
    for id in &scored {
        if let Some(times) = seen.get(id) {
            let gaps = revisit_gaps(horizon.start, horizon.end, times);
            targets.insert(id.to_string(), gap_stats(&gaps, times.len()));
        }
    }

    for id in &goals.monitoring_targets {
        if !seen.contains_key(id.as_str()) {
            violations.push(format!("monitoring target '{id}' is never observed"));
        }
    }

    let mut total_observed = 0u64;
    let mut total_required = 0u64;
    for (id, required) in &goals.mapping_targets {
        let observed = seen.get(id.as_str()).map_or(0, Vec::len) as u64;
        total_observed += observed;
        total_required += u64::from(*required);
        if observed < u64::from(*required) {
            violations.push(format!(
                "mapping target '{id}' observed {observed} of {required} required times"
            ));
        }
    }
    let target_coverage = if total_required == 0 {
        0.0
    } else {
        total_observed as f64 / total_required as f64
    };

    let monitored_max: Vec<f64> = goals
        .monitoring_targets
        .iter()
        .filter_map(|id| targets.get(id).map(|s: &GapStats| s.max_gap_hours))
        .collect();
    let mean_max_gap_hours = (!monitored_max.is_empty())
        .then(|| monitored_max.iter().sum::<f64>() / monitored_max.len() as f64);

    tracing::debug!(
        case = %req.meta.case_id,
        observed_targets = targets.len(),
        violations = violations.len(),
        "revisit verified"
    );

    Ok(VerificationReport {
        valid: true,
        metrics: RevisitMetrics {
            targets,
            mean_max_gap_hours,
            total_observed,
            total_required,
            target_coverage,
        },
        violations,
    })
}

pub fn verify_revisit_files(plan_path: &Path, requirements_path: &Path) -> VerifierOutput {
    let result = PersistedPlan::load(plan_path).and_then(|plan| {
        let req: RevisitRequirements = crate::io::read_document(requirements_path)?;
        verify_revisit(&plan, &req)
    });
    VerifierOutput::from_result(result)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
