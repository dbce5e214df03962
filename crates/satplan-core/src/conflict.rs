//! Pairwise and capacity conflict detection for a candidate action.
//!
//! Rules by candidate type:
//! - observation vs observation: time overlap, or a gap shorter than the slew
//!   between the earlier one's end attitude and the later one's start attitude;
//! - link vs link: concurrent terminal use above the satellite's terminal
//!   count, checked on the peer as well for intersatellite links;
//! - observation vs link: never conflicting.
//!
//! Detection is pure. Attitudes are read through [`AttitudeLookup`], which the
//! caller fills beforehand.

use crate::action::{seconds_between, Action, ActionType};
use crate::attitude::{AttitudeLookup, Endpoint};
use crate::config::SlewPolicy;
use crate::scenario::Satellite;
use crate::slew::{required_slew_time, slew_time_for_angle};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

// ---------------------------------------------------------------------------
// Output types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictCause {
    TimeOverlap,
    SlewInfeasible,
    TerminalCapacity,
}

impl fmt::Display for ConflictCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConflictCause::TimeOverlap => "time_overlap",
            ConflictCause::SlewInfeasible => "slew_infeasible",
            ConflictCause::TerminalCapacity => "terminal_capacity",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    pub action_id: String,
    pub cause: ConflictCause,
    /// Satellite whose constraint is violated.
    pub satellite_id: String,
    pub detail: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_gap_s: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available_gap_s: Option<f64>,
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// Cross-satellite view needed for intersatellite links.
pub trait PlanLookup {
    fn satellite(&self, id: &str) -> Option<&Satellite>;

    /// Staged actions occupying a terminal on `satellite_id`.
    fn terminal_users(&self, satellite_id: &str) -> Vec<&Action>;
}

pub struct DetectorContext<'a> {
    pub satellite: &'a Satellite,
    pub peers: &'a dyn PlanLookup,
    pub attitudes: &'a dyn AttitudeLookup,
    pub slew_policy: SlewPolicy,
    pub tolerance_s: f64,
}

// ---------------------------------------------------------------------------
// Detection
// ---------------------------------------------------------------------------

/// Conflicts between `candidate` and the staged actions that involve its
/// satellite. `same_satellite` may include the candidate itself; it is skipped.
pub fn detect(candidate: &Action, same_satellite: &[&Action], ctx: &DetectorContext) -> Vec<Conflict> {
    let others: Vec<&Action> = same_satellite
        .iter()
        .copied()
        .filter(|a| a.id() != candidate.id())
        .collect();

    let conflicts = match candidate.action_type() {
        ActionType::Observation => observation_conflicts(candidate, &others, ctx),
        ActionType::Downlink | ActionType::IntersatelliteLink => {
            let mut found = terminal_conflicts(candidate, &others, ctx.satellite, ctx.tolerance_s);
            if let Some(peer_id) = candidate.peer_satellite_id() {
                match ctx.peers.satellite(peer_id) {
                    Some(peer) => {
                        let peer_users: Vec<&Action> = ctx
                            .peers
                            .terminal_users(peer_id)
                            .into_iter()
                            .filter(|a| a.id() != candidate.id())
                            .collect();
                        found.extend(terminal_conflicts(
                            candidate,
                            &peer_users,
                            peer,
                            ctx.tolerance_s,
                        ));
                    }
                    None => {
                        tracing::debug!(peer = peer_id, "peer satellite unknown; skipping peer terminal check");
                    }
                }
            }
            found
        }
    };

    tracing::debug!(
        action_id = candidate.id(),
        conflicts = conflicts.len(),
        "conflict check"
    );
    conflicts
}

/// Ids involved in any conflict, sorted and de-duplicated.
pub fn check_conflicts(
    candidate: &Action,
    same_satellite: &[&Action],
    ctx: &DetectorContext,
) -> Vec<String> {
    conflict_ids(&detect(candidate, same_satellite, ctx))
}

pub fn conflict_ids(conflicts: &[Conflict]) -> Vec<String> {
    conflicts
        .iter()
        .map(|c| c.action_id.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn observation_conflicts(candidate: &Action, others: &[&Action], ctx: &DetectorContext) -> Vec<Conflict> {
    let sat = ctx.satellite;
    let tol = ctx.tolerance_s;
    let observations = others.iter().copied().filter(|a| {
        a.action_type() == ActionType::Observation && a.satellite_id() == candidate.satellite_id()
    });

    let mut conflicts = Vec::new();
    for other in observations {
        if candidate.overlaps(other, tol) {
            conflicts.push(Conflict {
                action_id: other.id().to_string(),
                cause: ConflictCause::TimeOverlap,
                satellite_id: sat.id.clone(),
                detail: format!("'{}' overlaps '{}' on {}", candidate.id(), other.id(), sat.id),
                required_gap_s: None,
                available_gap_s: None,
            });
            continue;
        }
        let (first, second) = if other.start() < candidate.start() {
            (other, candidate)
        } else {
            (candidate, other)
        };
        conflicts.extend(slew_conflict(first, second, other, ctx));
    }
    conflicts
}

fn slew_conflict(first: &Action, second: &Action, other: &Action, ctx: &DetectorContext) -> Option<Conflict> {
    let sat = ctx.satellite;
    let gap = seconds_between(first.end(), second.start());

    let conflict = |required: Option<f64>, detail: String| Conflict {
        action_id: other.id().to_string(),
        cause: ConflictCause::SlewInfeasible,
        satellite_id: sat.id.clone(),
        detail,
        required_gap_s: required,
        available_gap_s: Some(gap),
    };

    // A gap that fits the worst-case half-turn needs no attitude lookup.
    if let Ok(worst) = slew_time_for_angle(180.0, &sat.slew) {
        if gap + ctx.tolerance_s >= worst {
            return None;
        }
    }

    let q_end = ctx.attitudes.lookup(first.id(), Endpoint::End);
    let q_start = ctx.attitudes.lookup(second.id(), Endpoint::Start);
    let (Some(q_end), Some(q_start)) = (q_end, q_start) else {
        return match ctx.slew_policy {
            SlewPolicy::FailClosed => {
                tracing::warn!(
                    first = first.id(),
                    second = second.id(),
                    "attitude unresolved; treating slew as infeasible"
                );
                Some(conflict(
                    None,
                    format!(
                        "cannot verify slew from '{}' to '{}': attitude unresolved",
                        first.id(),
                        second.id()
                    ),
                ))
            }
            SlewPolicy::Lenient => None,
        };
    };

    match required_slew_time(&q_end, &q_start, &sat.slew) {
        Ok(required) if gap + ctx.tolerance_s < required => Some(conflict(
            Some(required),
            format!(
                "slew from '{}' to '{}' needs {:.3} s, only {:.3} s available",
                first.id(),
                second.id(),
                required,
                gap
            ),
        )),
        Ok(_) => None,
        Err(e) => match ctx.slew_policy {
            SlewPolicy::FailClosed => {
                tracing::warn!(satellite = %sat.id, error = %e, "slew unverifiable");
                Some(conflict(
                    None,
                    format!("cannot verify slew from '{}' to '{}': {e}", first.id(), second.id()),
                ))
            }
            SlewPolicy::Lenient => None,
        },
    }
}

/// Capacity check of `candidate` against the terminal users of `sat`.
/// On overflow every overlapping user is reported, the candidate included.
fn terminal_conflicts(candidate: &Action, users: &[&Action], sat: &Satellite, tol: f64) -> Vec<Conflict> {
    let overlapping: Vec<&Action> = users
        .iter()
        .copied()
        .filter(|a| a.uses_terminal_of(&sat.id) && candidate.overlaps(a, tol))
        .collect();

    let concurrent = 1 + peak_concurrency(candidate, &overlapping);
    if concurrent <= sat.num_terminal as usize {
        return Vec::new();
    }

    let detail = format!(
        "{concurrent} concurrent links on {} exceed {} terminal(s)",
        sat.id, sat.num_terminal
    );
    std::iter::once(candidate)
        .chain(overlapping)
        .map(|a| Conflict {
            action_id: a.id().to_string(),
            cause: ConflictCause::TerminalCapacity,
            satellite_id: sat.id.clone(),
            detail: detail.clone(),
            required_gap_s: None,
            available_gap_s: None,
        })
        .collect()
}

/// Highest number of `users` simultaneously active inside the candidate window.
fn peak_concurrency(candidate: &Action, users: &[&Action]) -> usize {
    let window = candidate.duration_s();
    let mut edges: Vec<(f64, i32)> = Vec::with_capacity(users.len() * 2);
    for u in users {
        let s = seconds_between(candidate.start(), u.start()).max(0.0);
        let e = seconds_between(candidate.start(), u.end()).min(window);
        if e > s {
            edges.push((s, 1));
            edges.push((e, -1));
        }
    }
    // Ends sort before starts at the same instant: intervals are half-open.
    edges.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

    let mut active = 0i32;
    let mut peak = 0i32;
    for (_, delta) in edges {
        active += delta;
        peak = peak.max(active);
    }
    peak.max(0) as usize
}

// ---------------------------------------------------------------------------
// Diagnostics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictExplanation {
    pub summary: String,
    pub reasons: Vec<String>,
    pub suggestions: Vec<String>,
}

/// Human-readable account of why `candidate` was rejected and what to try next.
pub fn explain(candidate: &Action, conflicts: &[Conflict]) -> ConflictExplanation {
    let others: Vec<String> = conflict_ids(conflicts)
        .into_iter()
        .filter(|id| id != candidate.id())
        .collect();
    let summary = if conflicts.is_empty() {
        format!("'{}' has no conflicts", candidate.id())
    } else {
        format!(
            "'{}' conflicts with {} staged action(s): {}",
            candidate.id(),
            others.len(),
            others.join(", ")
        )
    };

    let mut reasons = Vec::new();
    let mut suggestions = BTreeSet::new();
    for c in conflicts {
        if !reasons.contains(&c.detail) {
            reasons.push(c.detail.clone());
        }
        if c.action_id == candidate.id() {
            continue;
        }
        let suggestion = match c.cause {
            ConflictCause::TimeOverlap => format!(
                "move '{}' so it no longer overlaps '{}'",
                candidate.id(),
                c.action_id
            ),
            ConflictCause::SlewInfeasible => match (c.required_gap_s, c.available_gap_s) {
                (Some(req), Some(avail)) => format!(
                    "widen the gap to '{}' by at least {:.1} s",
                    c.action_id,
                    req - avail
                ),
                _ => format!(
                    "provide attitudes for '{}' and '{}' or increase their separation",
                    candidate.id(),
                    c.action_id
                ),
            },
            ConflictCause::TerminalCapacity => format!(
                "unstage '{}' or move '{}' outside its window to free a terminal on {}",
                c.action_id,
                candidate.id(),
                c.satellite_id
            ),
        };
        suggestions.insert(suggestion);
    }

    ConflictExplanation {
        summary,
        reasons,
        suggestions: suggestions.into_iter().collect(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
