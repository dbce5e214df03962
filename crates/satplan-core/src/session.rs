//! Plan lifecycle: `empty -> staged(n) -> committed`.
//!
//! A [`PlanSession`] owns the staged action set for one scenario. Every
//! transition checks first and mutates only when every check passes, so a
//! rejected `stage` leaves the session exactly as it was.

use crate::action::{Action, ActionType};
use crate::attitude::{AttitudeCache, AttitudeProvider, Endpoint, Quaternion};
use crate::config::PlannerConfig;
use crate::conflict::{self, Conflict, ConflictExplanation, DetectorContext, PlanLookup};
use crate::error::{PlanError, Result};
use crate::persist::PersistedPlan;
use crate::resource::{project_satellite, CurvePoint, SatelliteResources};
use crate::scenario::{Satellite, Scenario};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

// ---------------------------------------------------------------------------
// Violations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationType {
    TimeConflict,
    Power,
    Storage,
    AccessInvalid,
}

impl fmt::Display for ViolationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ViolationType::TimeConflict => "time_conflict",
            ViolationType::Power => "power",
            ViolationType::Storage => "storage",
            ViolationType::AccessInvalid => "access_invalid",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub action_id: String,
    pub violation_type: ViolationType,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conflicting_action_ids: Vec<String>,
    /// How far out of bounds, in Wh for power and GB for storage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub magnitude: Option<f64>,
}

impl Violation {
    fn new(action_id: &str, violation_type: ViolationType, message: impl Into<String>) -> Self {
        Self {
            action_id: action_id.to_string(),
            violation_type,
            message: message.into(),
            conflicting_action_ids: Vec::new(),
            magnitude: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AttitudeSample {
    pub t_s: f64,
    pub quaternion: Quaternion,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SatelliteMetrics {
    pub satellite_id: String,
    pub observations: usize,
    pub downlinks: usize,
    pub intersatellite_links: usize,
    pub power_violated: bool,
    pub storage_violated: bool,
    pub battery_min_wh: f64,
    pub battery_peak_wh: f64,
    pub battery_final_wh: f64,
    pub storage_peak_gb: f64,
    pub storage_final_gb: f64,
    pub power_curve: Vec<CurvePoint>,
    pub storage_curve: Vec<CurvePoint>,
    /// Resolved start/end attitudes of observations, in time order.
    pub quaternion_trace: Vec<AttitudeSample>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanMetrics {
    pub total_actions: usize,
    pub total_observations: usize,
    pub total_downlinks: usize,
    pub total_intersatellite_links: usize,
    pub any_violation: bool,
    pub satellites: BTreeMap<String, SatelliteMetrics>,
}

// ---------------------------------------------------------------------------
// Transition results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanState {
    Empty,
    Staged(usize),
    Committed,
}

impl fmt::Display for PlanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanState::Empty => f.write_str("empty"),
            PlanState::Staged(n) => write!(f, "staged({n})"),
            PlanState::Committed => f.write_str("committed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    pub action_id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<PlanMetrics>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub violations: Vec<Violation>,
}

impl StageResult {
    fn rejected(action_id: &str, violations: Vec<Violation>) -> Self {
        Self {
            action_id: action_id.to_string(),
            success: false,
            metrics: None,
            violations,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnstageResult {
    pub action: Action,
    pub metrics: PlanMetrics,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitResult {
    pub valid: bool,
    pub metrics: PlanMetrics,
    #[serde(default)]
    pub violations: Vec<Violation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<PersistedPlan>,
}

// ---------------------------------------------------------------------------
// PlanSession
// ---------------------------------------------------------------------------

pub struct PlanSession {
    id: String,
    scenario: Scenario,
    config: PlannerConfig,
    provider: Box<dyn AttitudeProvider + Send>,
    cache: AttitudeCache,
    staged: BTreeMap<String, Action>,
    metrics: PlanMetrics,
    committed: bool,
}

/// Staged actions seen from the conflict detector.
struct StagedView<'a> {
    scenario: &'a Scenario,
    staged: &'a BTreeMap<String, Action>,
}

impl PlanLookup for StagedView<'_> {
    fn satellite(&self, id: &str) -> Option<&Satellite> {
        self.scenario.satellite(id)
    }

    fn terminal_users(&self, satellite_id: &str) -> Vec<&Action> {
        self.staged
            .values()
            .filter(|a| a.uses_terminal_of(satellite_id))
            .collect()
    }
}

impl PlanSession {
    pub fn new(
        scenario: Scenario,
        config: PlannerConfig,
        provider: Box<dyn AttitudeProvider + Send>,
    ) -> Self {
        let mut session = Self {
            id: uuid::Uuid::new_v4().to_string(),
            scenario,
            config,
            provider,
            cache: AttitudeCache::new(),
            staged: BTreeMap::new(),
            metrics: PlanMetrics::default(),
            committed: false,
        };
        session.recompute_all();
        tracing::info!(session = %session.id, scenario = session.scenario.id(), "session started");
        session
    }

    /// Session whose attitudes come from the scenario's own table.
    pub fn from_scenario(scenario: Scenario, config: PlannerConfig) -> Self {
        let provider = Box::new(scenario.attitudes().clone());
        Self::new(scenario, config, provider)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn scenario(&self) -> &Scenario {
        &self.scenario
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// Replace the configuration. Staged actions are not re-checked until
    /// the next commit.
    pub fn set_config(&mut self, config: PlannerConfig) {
        self.config = config;
        self.committed = false;
        self.recompute_all();
    }

    pub fn state(&self) -> PlanState {
        if self.committed {
            PlanState::Committed
        } else if self.staged.is_empty() {
            PlanState::Empty
        } else {
            PlanState::Staged(self.staged.len())
        }
    }

    /// Staged actions ordered by id.
    pub fn staged(&self) -> impl Iterator<Item = &Action> {
        self.staged.values()
    }

    pub fn metrics(&self) -> &PlanMetrics {
        &self.metrics
    }

    /// Drop every staged action and start a fresh session on the same scenario.
    pub fn reset(&mut self) {
        self.staged.clear();
        self.cache.clear();
        self.committed = false;
        self.id = uuid::Uuid::new_v4().to_string();
        self.recompute_all();
        tracing::info!(session = %self.id, "session reset");
    }

    // -----------------------------------------------------------------------
    // stage / unstage
    // -----------------------------------------------------------------------

    pub fn stage(&mut self, action: Action) -> StageResult {
        let id = action.id().to_string();

        if self.staged.contains_key(&id) {
            return self.reject(
                action,
                vec![Violation::new(
                    &id,
                    ViolationType::AccessInvalid,
                    format!("action '{id}' is already staged"),
                )],
            );
        }
        if let Err(reason) = self.scenario.check_access(&action) {
            let violation = Violation::new(&id, ViolationType::AccessInvalid, reason);
            return self.reject(action, vec![violation]);
        }

        if action.action_type() == ActionType::Observation {
            self.cache.warm(&action, self.provider.as_ref());
        }

        let conflicts = self.detect(&action);
        if !conflicts.is_empty() {
            let violation = conflict_violation(&action, &conflicts);
            return self.reject(action, vec![violation]);
        }

        let violations = self.resource_violations(&action, self.staged.values().chain([&action]));
        if !violations.is_empty() {
            return self.reject(action, violations);
        }

        let affected: Vec<String> = action.satellites().into_iter().map(str::to_string).collect();
        self.staged.insert(id.clone(), action);
        self.committed = false;
        self.recompute(&affected);

        tracing::info!(session = %self.id, action_id = %id, staged = self.staged.len(), "action staged");
        StageResult {
            action_id: id,
            success: true,
            metrics: Some(self.metrics.clone()),
            violations: Vec::new(),
        }
    }

    fn reject(&mut self, action: Action, violations: Vec<Violation>) -> StageResult {
        for v in &violations {
            tracing::info!(
                session = %self.id,
                action_id = action.id(),
                violation = %v.violation_type,
                "stage rejected: {}",
                v.message
            );
        }
        // Attitudes resolved for a rejected candidate are not kept.
        if !self.staged.contains_key(action.id()) {
            self.cache.invalidate(action.id());
        }
        StageResult::rejected(action.id(), violations)
    }

    pub fn unstage(&mut self, action_id: &str) -> Result<UnstageResult> {
        let action = self
            .staged
            .remove(action_id)
            .ok_or_else(|| PlanError::UnknownAction(action_id.to_string()))?;
        self.cache.invalidate(action_id);
        self.committed = false;

        let affected: Vec<String> = action.satellites().into_iter().map(str::to_string).collect();
        self.recompute(&affected);

        tracing::info!(session = %self.id, action_id, staged = self.staged.len(), "action unstaged");
        Ok(UnstageResult {
            action,
            metrics: self.metrics.clone(),
        })
    }

    // -----------------------------------------------------------------------
    // commit
    // -----------------------------------------------------------------------

    /// Re-validate the whole staged set and, when it is clean, build the
    /// persisted plan and write it to `output` if given. Nothing is written
    /// for an invalid plan.
    pub fn commit(&mut self, output: Option<&Path>) -> Result<CommitResult> {
        let violations = self.revalidate();
        if !violations.is_empty() {
            tracing::warn!(
                session = %self.id,
                violations = violations.len(),
                "commit refused"
            );
            return Ok(CommitResult {
                valid: false,
                metrics: self.metrics.clone(),
                violations,
                plan: None,
            });
        }

        let plan = PersistedPlan::from_actions(&self.scenario, self.staged.values());
        if let Some(path) = output {
            plan.save(path)?;
            tracing::info!(session = %self.id, path = %path.display(), "plan written");
        }
        self.committed = true;
        tracing::info!(session = %self.id, actions = plan.actions.len(), "plan committed");

        Ok(CommitResult {
            valid: true,
            metrics: self.metrics.clone(),
            violations: Vec::new(),
            plan: Some(plan),
        })
    }

    fn revalidate(&mut self) -> Vec<Violation> {
        let actions: Vec<Action> = self.staged.values().cloned().collect();
        for a in actions.iter().filter(|a| a.action_type() == ActionType::Observation) {
            self.cache.warm(a, self.provider.as_ref());
        }

        let mut violations = Vec::new();
        for a in &actions {
            if let Err(reason) = self.scenario.check_access(a) {
                violations.push(Violation::new(a.id(), ViolationType::AccessInvalid, reason));
            }
            let conflicts = self.detect(a);
            if !conflicts.is_empty() {
                violations.push(conflict_violation(a, &conflicts));
            }
        }

        for sat in self.scenario.satellites() {
            let res = project_satellite(sat, self.staged.values(), self.scenario.horizon(), &self.config);
            violations.extend(resource_violations_for("", &res));
        }
        violations
    }

    // -----------------------------------------------------------------------
    // Checks
    // -----------------------------------------------------------------------

    /// Conflicts `candidate` would have with the staged set. Resolves the
    /// candidate's attitudes through the cache; entries for an unstaged
    /// candidate are dropped again afterwards.
    pub fn conflicts_for(&mut self, candidate: &Action) -> Vec<Conflict> {
        if candidate.action_type() == ActionType::Observation {
            self.cache.warm(candidate, self.provider.as_ref());
        }
        let conflicts = self.detect(candidate);
        if !self.staged.contains_key(candidate.id()) {
            self.cache.invalidate(candidate.id());
        }
        conflicts
    }

    pub fn explain(&mut self, candidate: &Action) -> ConflictExplanation {
        let conflicts = self.conflicts_for(candidate);
        conflict::explain(candidate, &conflicts)
    }

    fn detect(&self, candidate: &Action) -> Vec<Conflict> {
        let Some(sat) = self.scenario.satellite(candidate.satellite_id()) else {
            return Vec::new();
        };
        let same_satellite: Vec<&Action> = self
            .staged
            .values()
            .filter(|a| a.satellite_id() == sat.id || a.uses_terminal_of(&sat.id))
            .collect();
        let view = StagedView {
            scenario: &self.scenario,
            staged: &self.staged,
        };
        let ctx = DetectorContext {
            satellite: sat,
            peers: &view,
            attitudes: &self.cache,
            slew_policy: self.config.slew_policy,
            tolerance_s: self.config.time_tolerance_s,
        };
        conflict::detect(candidate, &same_satellite, &ctx)
    }

    fn resource_violations<'a>(
        &self,
        candidate: &Action,
        actions: impl IntoIterator<Item = &'a Action> + Clone,
    ) -> Vec<Violation> {
        candidate
            .satellites()
            .into_iter()
            .filter_map(|id| self.scenario.satellite(id))
            .flat_map(|sat| {
                let res =
                    project_satellite(sat, actions.clone(), self.scenario.horizon(), &self.config);
                resource_violations_for(candidate.id(), &res)
            })
            .collect()
    }

    // -----------------------------------------------------------------------
    // Metrics
    // -----------------------------------------------------------------------

    fn recompute_all(&mut self) {
        let ids: Vec<String> = self.scenario.satellites().map(|s| s.id.clone()).collect();
        self.metrics.satellites.clear();
        self.recompute(&ids);
    }

    fn recompute(&mut self, satellite_ids: &[String]) {
        let updated: Vec<SatelliteMetrics> = satellite_ids
            .iter()
            .filter_map(|id| self.scenario.satellite(id))
            .map(|sat| self.satellite_metrics(sat))
            .collect();
        for m in updated {
            self.metrics.satellites.insert(m.satellite_id.clone(), m);
        }

        let count = |t: ActionType| self.staged.values().filter(|a| a.action_type() == t).count();
        self.metrics.total_actions = self.staged.len();
        self.metrics.total_observations = count(ActionType::Observation);
        self.metrics.total_downlinks = count(ActionType::Downlink);
        self.metrics.total_intersatellite_links = count(ActionType::IntersatelliteLink);
        self.metrics.any_violation = self
            .metrics
            .satellites
            .values()
            .any(|m| m.power_violated || m.storage_violated);
    }

    fn satellite_metrics(&self, sat: &Satellite) -> SatelliteMetrics {
        let horizon = self.scenario.horizon();
        let res = project_satellite(sat, self.staged.values(), horizon, &self.config);

        let own = |t: ActionType| {
            self.staged
                .values()
                .filter(|a| a.action_type() == t && a.satellite_id() == sat.id)
                .count()
        };
        let intersatellite_links = self
            .staged
            .values()
            .filter(|a| a.action_type() == ActionType::IntersatelliteLink && a.uses_terminal_of(&sat.id))
            .count();

        let mut observations: Vec<&Action> = self
            .staged
            .values()
            .filter(|a| a.action_type() == ActionType::Observation && a.satellite_id() == sat.id)
            .collect();
        observations.sort_by(|a, b| a.start().cmp(&b.start()).then_with(|| a.id().cmp(b.id())));
        let quaternion_trace = observations
            .iter()
            .flat_map(|a| {
                [
                    (horizon.offset_s(a.start()), self.cache.get(a.id(), Endpoint::Start)),
                    (horizon.offset_s(a.end()), self.cache.get(a.id(), Endpoint::End)),
                ]
            })
            .filter_map(|(t_s, q)| q.map(|quaternion| AttitudeSample { t_s, quaternion }))
            .collect();

        SatelliteMetrics {
            satellite_id: sat.id.clone(),
            observations: own(ActionType::Observation),
            downlinks: own(ActionType::Downlink),
            intersatellite_links,
            power_violated: res.power_check.is_violated(),
            storage_violated: res.storage_check.is_violated(),
            battery_min_wh: res.power.trough,
            battery_peak_wh: res.power.peak,
            battery_final_wh: res.power.final_level,
            storage_peak_gb: res.storage.peak,
            storage_final_gb: res.storage.final_level,
            power_curve: res.power.curve,
            storage_curve: res.storage.curve,
            quaternion_trace,
        }
    }
}

fn conflict_violation(candidate: &Action, conflicts: &[Conflict]) -> Violation {
    let explanation = conflict::explain(candidate, conflicts);
    let mut message = explanation.summary;
    if !explanation.reasons.is_empty() {
        message.push_str(": ");
        message.push_str(&explanation.reasons.join("; "));
    }
    Violation {
        action_id: candidate.id().to_string(),
        violation_type: ViolationType::TimeConflict,
        message,
        conflicting_action_ids: conflict::conflict_ids(conflicts)
            .into_iter()
            .filter(|id| id != candidate.id())
            .collect(),
        magnitude: None,
    }
}

/// Power and storage violations for one projected satellite. An empty
/// `action_id` attributes the violation to the satellite as a whole.
fn resource_violations_for(action_id: &str, res: &SatelliteResources) -> Vec<Violation> {
    let owner = if action_id.is_empty() {
        res.satellite_id.as_str()
    } else {
        action_id
    };
    let mut out = Vec::new();
    let power = &res.power_check;
    if power.undershot() {
        out.push(Violation {
            magnitude: Some(power.undershoot),
            ..Violation::new(
                owner,
                ViolationType::Power,
                format!(
                    "battery on {} drops {:.3} Wh below empty",
                    res.satellite_id, power.undershoot
                ),
            )
        });
    }
    let storage = &res.storage_check;
    if storage.overflowed() {
        out.push(Violation {
            magnitude: Some(storage.overflow),
            ..Violation::new(
                owner,
                ViolationType::Storage,
                format!(
                    "storage on {} exceeds capacity by {:.3} GB",
                    res.satellite_id, storage.overflow
                ),
            )
        });
    }
    if storage.undershot() {
        out.push(Violation {
            magnitude: Some(storage.undershoot),
            ..Violation::new(
                owner,
                ViolationType::Storage,
                format!(
                    "storage on {} drops {:.3} GB below empty",
                    res.satellite_id, storage.undershoot
                ),
            )
        });
    }
    out
}

// ---------------------------------------------------------------------------
// SharedSession
// ---------------------------------------------------------------------------

/// A session shared between threads. Every transition holds the lock for
/// its whole check-then-apply sequence.
#[derive(Clone)]
pub struct SharedSession {
    inner: Arc<Mutex<PlanSession>>,
}

impl SharedSession {
    pub fn new(session: PlanSession) -> Self {
        Self {
            inner: Arc::new(Mutex::new(session)),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, PlanSession> {
        // A panic mid-transition never leaves partial state, so a poisoned
        // lock is still usable.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn stage(&self, action: Action) -> StageResult {
        self.lock().stage(action)
    }

    pub fn unstage(&self, action_id: &str) -> Result<UnstageResult> {
        self.lock().unstage(action_id)
    }

    pub fn commit(&self, output: Option<&Path>) -> Result<CommitResult> {
        self.lock().commit(output)
    }

    pub fn state(&self) -> PlanState {
        self.lock().state()
    }

    pub fn metrics(&self) -> PlanMetrics {
        self.lock().metrics().clone()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attitude::{AttitudePair, AttitudeTable};
    use crate::config::SlewPolicy;
    use crate::scenario::{Horizon, ScenarioFile, Station, Target};
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use tempfile::TempDir;

    fn t(sec: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap() + Duration::seconds(sec)
    }

    fn scenario_with(sats: Vec<Satellite>) -> Scenario {
        let mut attitudes = AttitudeTable::new();
        for id in ["o1", "o2", "o3"] {
            attitudes.insert(
                id,
                AttitudePair {
                    start: Quaternion::IDENTITY,
                    end: Quaternion::IDENTITY,
                },
            );
        }
        Scenario::new(ScenarioFile {
            id: "case".into(),
            horizon: Horizon {
                start: t(0),
                end: t(3600),
            },
            satellites: sats,
            targets: vec![Target {
                id: "tgt-1".into(),
                latitude_deg: 10.0,
                longitude_deg: 20.0,
            }],
            stations: vec![Station {
                id: "gs-1".into(),
                latitude_deg: 50.0,
                longitude_deg: 5.0,
                altitude_m: 0.0,
            }],
            strips: vec![],
            access_windows: vec![],
            attitudes,
        })
        .unwrap()
    }

    fn session() -> PlanSession {
        let sats = vec![Satellite::new("sat-1"), Satellite::new("sat-2")];
        PlanSession::from_scenario(scenario_with(sats), PlannerConfig::default())
    }

    fn obs(id: &str, s: i64, e: i64) -> Action {
        Action::observation(id, "sat-1", Some("tgt-1".into()), t(s), t(e)).unwrap()
    }

    /// Points every observation starting before t(500) 90 deg off nadir.
    struct TimeDependentAttitudes;

    impl AttitudeProvider for TimeDependentAttitudes {
        fn attitude(&self, action: &Action, _endpoint: Endpoint) -> Option<Quaternion> {
            if action.start() < t(500) {
                Some(Quaternion::from_axis_angle([1.0, 0.0, 0.0], 90.0))
            } else {
                Some(Quaternion::IDENTITY)
            }
        }
    }

    #[test]
    fn explain_leaves_no_cached_attitude_behind() {
        let sats = vec![Satellite::new("sat-1")];
        let mut s = PlanSession::new(
            scenario_with(sats),
            PlannerConfig::default(),
            Box::new(TimeDependentAttitudes),
        );
        assert!(s.stage(obs("o1", 1000, 1060)).success);

        // Same id, different window: the early attitude must not stick.
        let explained = s.explain(&obs("o2", 0, 60));
        assert!(explained.reasons.is_empty());

        let staged = s.stage(obs("o2", 1070, 1100));
        assert!(staged.success, "{:?}", staged.violations);
    }

    #[test]
    fn state_transitions() {
        let mut s = session();
        assert_eq!(s.state(), PlanState::Empty);
        assert!(s.stage(obs("o1", 0, 60)).success);
        assert_eq!(s.state(), PlanState::Staged(1));
        assert!(s.commit(None).unwrap().valid);
        assert_eq!(s.state(), PlanState::Committed);
        assert!(s.stage(obs("o2", 600, 660)).success);
        assert_eq!(s.state(), PlanState::Staged(2));
        s.reset();
        assert_eq!(s.state(), PlanState::Empty);
    }

    #[test]
    fn stage_then_unstage_restores_metrics() {
        let mut s = session();
        assert!(s.stage(obs("o1", 0, 60)).success);
        let before = s.metrics().clone();

        let dl = Action::downlink("d1", "sat-1", "gs-1", t(100), t(200)).unwrap();
        let staged = s.stage(dl);
        assert!(staged.success);
        assert_ne!(s.metrics(), &before);

        let undone = s.unstage("d1").unwrap();
        assert_eq!(undone.action.id(), "d1");
        assert_eq!(s.metrics(), &before);
        let a = &s.metrics().satellites["sat-1"];
        let b = &before.satellites["sat-1"];
        assert_eq!(a.battery_final_wh.to_bits(), b.battery_final_wh.to_bits());
        assert_eq!(a.storage_peak_gb.to_bits(), b.storage_peak_gb.to_bits());
    }

    #[test]
    fn conflicting_stage_leaves_state_untouched() {
        let mut s = session();
        assert!(s.stage(obs("o1", 0, 60)).success);
        let before = s.metrics().clone();

        let result = s.stage(obs("o2", 30, 90));
        assert!(!result.success);
        assert_eq!(result.violations.len(), 1);
        let v = &result.violations[0];
        assert_eq!(v.violation_type, ViolationType::TimeConflict);
        assert_eq!(v.conflicting_action_ids, vec!["o1".to_string()]);
        assert_eq!(s.metrics(), &before);
        assert_eq!(s.state(), PlanState::Staged(1));
    }

    #[test]
    fn slew_gap_enforced_through_session() {
        // identical attitudes: only the 5 s settle is needed
        let mut s = session();
        assert!(s.stage(obs("o1", 0, 60)).success);
        assert!(!s.stage(obs("o2", 63, 120)).success);
        assert!(s.stage(obs("o2", 65, 120)).success);
    }

    #[test]
    fn unresolved_attitude_fails_closed_by_default() {
        let mut s = session();
        assert!(s.stage(obs("o1", 0, 60)).success);
        // "ox" has no attitude entry
        let result = s.stage(obs("ox", 100, 160));
        assert!(!result.success);

        let mut lenient = session();
        lenient.set_config(PlannerConfig {
            slew_policy: SlewPolicy::Lenient,
            ..PlannerConfig::default()
        });
        assert!(lenient.stage(obs("o1", 0, 60)).success);
        assert!(lenient.stage(obs("ox", 100, 160)).success);
    }

    #[test]
    fn power_violation_reports_magnitude() {
        let mut sat = Satellite::new("sat-1");
        sat.battery_capacity_wh = 10.0;
        sat.charge_rate_w = 0.0;
        sat.obs_discharge_rate_w = 3600.0; // 1 Wh per second
        let mut s = PlanSession::from_scenario(scenario_with(vec![sat]), PlannerConfig::default());

        let result = s.stage(obs("o1", 0, 20));
        assert!(!result.success);
        let v = &result.violations[0];
        assert_eq!(v.violation_type, ViolationType::Power);
        assert!((v.magnitude.unwrap() - 10.0).abs() < 1e-9);
        assert_eq!(s.state(), PlanState::Empty);
    }

    #[test]
    fn storage_violation_reports_magnitude() {
        let mut sat = Satellite::new("sat-1");
        sat.storage_capacity_gb = 1.0;
        sat.obs_data_rate_gb_s = 0.1;
        let mut s = PlanSession::from_scenario(scenario_with(vec![sat]), PlannerConfig::default());

        let result = s.stage(obs("o1", 0, 20));
        assert!(!result.success);
        let v = &result.violations[0];
        assert_eq!(v.violation_type, ViolationType::Storage);
        assert!((v.magnitude.unwrap() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn downlink_frees_storage_for_later_observation() {
        let mut sat = Satellite::new("sat-1");
        sat.storage_capacity_gb = 1.0;
        sat.obs_data_rate_gb_s = 0.1;
        sat.downlink_data_rate_gb_s = 0.1;
        let mut s = PlanSession::from_scenario(scenario_with(vec![sat]), PlannerConfig::default());

        assert!(s.stage(obs("o1", 0, 10)).success);
        assert!(!s.stage(obs("o2", 100, 110)).success);
        let dl = Action::downlink("d1", "sat-1", "gs-1", t(20), t(30)).unwrap();
        assert!(s.stage(dl).success);
        assert!(s.stage(obs("o2", 100, 110)).success);
        assert!(s.metrics().satellites["sat-1"].storage_peak_gb <= 1.0 + 1e-9);
    }

    #[test]
    fn access_invalid_rejections() {
        let mut s = session();
        let unknown_station = Action::downlink("d1", "sat-1", "gs-x", t(0), t(10)).unwrap();
        let outside = obs("o1", 3590, 3700);
        let unknown_sat = Action::observation("o2", "sat-9", None, t(0), t(10)).unwrap();
        for a in [unknown_station, outside, unknown_sat] {
            let r = s.stage(a);
            assert!(!r.success);
            assert_eq!(r.violations[0].violation_type, ViolationType::AccessInvalid);
        }

        assert!(s.stage(obs("o1", 0, 10)).success);
        let dup = s.stage(obs("o1", 1000, 1010));
        assert_eq!(dup.violations[0].violation_type, ViolationType::AccessInvalid);
    }

    #[test]
    fn isl_counts_on_both_satellites() {
        let mut s = session();
        let isl = Action::intersatellite_link("l1", "sat-1", "sat-2", t(0), t(100)).unwrap();
        assert!(s.stage(isl).success);
        let m = s.metrics();
        assert_eq!(m.satellites["sat-1"].intersatellite_links, 1);
        assert_eq!(m.satellites["sat-2"].intersatellite_links, 1);
        assert_eq!(m.total_intersatellite_links, 1);

        // sat-2's single terminal is busy
        let dl = Action::downlink("d2", "sat-2", "gs-1", t(50), t(60)).unwrap();
        let r = s.stage(dl);
        assert!(!r.success);
        assert_eq!(r.violations[0].conflicting_action_ids, vec!["l1".to_string()]);
    }

    #[test]
    fn unstage_unknown_is_error() {
        let mut s = session();
        assert!(matches!(s.unstage("nope"), Err(PlanError::UnknownAction(_))));
    }

    #[test]
    fn commit_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("plan.json");
        let mut s = session();
        assert!(s.stage(obs("o1", 0, 60)).success);
        let dl = Action::downlink("d1", "sat-1", "gs-1", t(100), t(200)).unwrap();
        assert!(s.stage(dl).success);

        let first = s.commit(Some(&path)).unwrap();
        let bytes_first = std::fs::read(&path).unwrap();
        let second = s.commit(Some(&path)).unwrap();
        let bytes_second = std::fs::read(&path).unwrap();

        assert!(first.valid && second.valid);
        assert_eq!(first, second);
        assert_eq!(bytes_first, bytes_second);
        let plan = PersistedPlan::load(&path).unwrap();
        assert_eq!(plan.actions.len(), 2);
        assert_eq!(plan.actions[0].action_id, "o1");
    }

    #[test]
    fn commit_revalidates_after_config_change() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("plan.json");
        let mut s = session();
        s.set_config(PlannerConfig {
            time_tolerance_s: 10.0,
            slew_policy: SlewPolicy::Lenient,
            ..PlannerConfig::default()
        });
        assert!(s.stage(obs("o1", 0, 60)).success);
        assert!(s.stage(obs("o2", 55, 120)).success);

        s.set_config(PlannerConfig::default());
        let result = s.commit(Some(&path)).unwrap();
        assert!(!result.valid);
        assert!(result.plan.is_none());
        assert!(!path.exists());
        assert!(result
            .violations
            .iter()
            .all(|v| v.violation_type == ViolationType::TimeConflict));
        assert_eq!(result.violations.len(), 2);
    }

    #[test]
    fn explain_describes_conflict() {
        let mut s = session();
        assert!(s.stage(obs("o1", 0, 60)).success);
        let ex = s.explain(&obs("o2", 30, 90));
        assert!(ex.summary.contains("o1"));
        assert!(!ex.suggestions.is_empty());
    }

    #[test]
    fn quaternion_trace_follows_observations() {
        let mut s = session();
        assert!(s.stage(obs("o2", 600, 660)).success);
        assert!(s.stage(obs("o1", 0, 60)).success);
        let trace = &s.metrics().satellites["sat-1"].quaternion_trace;
        let times: Vec<f64> = trace.iter().map(|p| p.t_s).collect();
        assert_eq!(times, vec![0.0, 60.0, 600.0, 660.0]);
    }

    #[test]
    fn shared_session_serializes_concurrent_stages() {
        let shared = SharedSession::new(session());
        std::thread::scope(|scope| {
            for i in 0..4 {
                let shared = shared.clone();
                scope.spawn(move || {
                    let a = Action::downlink(
                        format!("d{i}"),
                        "sat-1",
                        "gs-1",
                        t(1000),
                        t(1100),
                    )
                    .unwrap();
                    shared.stage(a);
                });
            }
        });
        // one terminal: exactly one of the identical downlinks wins
        assert_eq!(shared.state(), PlanState::Staged(1));
        assert_eq!(shared.metrics().total_downlinks, 1);
    }
}
