use crate::action::{Action, ActionRecord, ActionType};
use crate::error::{PlanError, Result};
use crate::scenario::{Horizon, Scenario};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

// ---------------------------------------------------------------------------
// PersistedPlan
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanMetadata {
    pub horizon_start: DateTime<Utc>,
    pub horizon_end: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scenario_id: Option<String>,
    /// Swath widths of the observing satellites that declare one.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub satellite_swaths_km: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisteredStrip {
    pub id: String,
    pub points: Vec<[f64; 2]>,
}

/// Committed plan as written to disk and read by the verifiers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedPlan {
    pub metadata: PlanMetadata,
    pub actions: Vec<ActionRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub registered_strips: Vec<RegisteredStrip>,
}

impl PersistedPlan {
    /// Build from a committed action set. Actions are ordered by start time,
    /// then id, and only strips referenced by an observation are registered.
    /// Observing satellites carry their swath width into the metadata.
    pub fn from_actions<'a>(
        scenario: &Scenario,
        actions: impl IntoIterator<Item = &'a Action>,
    ) -> Self {
        let mut actions: Vec<&Action> = actions.into_iter().collect();
        actions.sort_by(|a, b| a.start().cmp(&b.start()).then_with(|| a.id().cmp(b.id())));

        let strip_ids: BTreeSet<&str> = actions.iter().filter_map(|a| a.strip_id()).collect();
        let registered_strips = strip_ids
            .into_iter()
            .filter_map(|id| scenario.strip(id))
            .map(|s| RegisteredStrip {
                id: s.id.clone(),
                points: s.points.clone(),
            })
            .collect();

        let satellite_swaths_km = actions
            .iter()
            .filter(|a| a.action_type() == ActionType::Observation)
            .filter_map(|a| scenario.satellite(a.satellite_id()))
            .filter_map(|s| s.swath_width_km.map(|w| (s.id.clone(), w)))
            .collect();

        let horizon = scenario.horizon();
        Self {
            metadata: PlanMetadata {
                horizon_start: horizon.start,
                horizon_end: horizon.end,
                scenario_id: Some(scenario.id().to_string()),
                satellite_swaths_km,
            },
            actions: actions.into_iter().map(ActionRecord::from).collect(),
            registered_strips,
        }
    }

    pub fn horizon(&self) -> Result<Horizon> {
        Horizon::new(self.metadata.horizon_start, self.metadata.horizon_end)
            .map_err(|e| PlanError::MalformedInput(e.to_string()))
    }

    /// Typed actions; any record that does not describe a valid action is
    /// malformed input.
    pub fn typed_actions(&self) -> Result<Vec<Action>> {
        self.actions
            .iter()
            .cloned()
            .map(|r| Action::try_from(r).map_err(|e| PlanError::MalformedInput(e.to_string())))
            .collect()
    }

    pub fn strip(&self, id: &str) -> Option<&RegisteredStrip> {
        self.registered_strips.iter().find(|s| s.id == id)
    }

    pub fn load(path: &Path) -> Result<Self> {
        crate::io::read_document(path)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        crate::io::write_json(path, self)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
