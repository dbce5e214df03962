use crate::error::{PlanError, Result};
use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Identifier validation
// ---------------------------------------------------------------------------

static ID_RE: OnceLock<Regex> = OnceLock::new();

fn id_re() -> &'static Regex {
    ID_RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.:\-]*$").expect("identifier pattern is valid")
    })
}

pub fn validate_id(id: &str) -> Result<()> {
    if id.is_empty() || id.len() > 128 || !id_re().is_match(id) {
        return Err(PlanError::InvalidId(id.to_string()));
    }
    Ok(())
}

/// Signed elapsed seconds from `from` to `to`.
pub fn seconds_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    duration_secs(to - from)
}

pub fn duration_secs(d: Duration) -> f64 {
    d.num_seconds() as f64 + f64::from(d.subsec_nanos()) * 1e-9
}

// ---------------------------------------------------------------------------
// ActionType
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Observation,
    Downlink,
    IntersatelliteLink,
}

impl ActionType {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionType::Observation => "observation",
            ActionType::Downlink => "downlink",
            ActionType::IntersatelliteLink => "intersatellite_link",
        }
    }

    /// Links occupy a communication terminal; observations do not.
    pub fn is_link(self) -> bool {
        !matches!(self, ActionType::Observation)
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ActionType {
    type Err = PlanError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "observation" => Ok(ActionType::Observation),
            "downlink" => Ok(ActionType::Downlink),
            "intersatellite_link" | "isl" => Ok(ActionType::IntersatelliteLink),
            _ => Err(PlanError::MalformedInput(format!("unknown action type '{s}'"))),
        }
    }
}

// ---------------------------------------------------------------------------
// ActionKind
// ---------------------------------------------------------------------------

/// Variant-specific payload of an action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionKind {
    Observation {
        target_id: Option<String>,
        strip_id: Option<String>,
    },
    Downlink {
        station_id: String,
    },
    IntersatelliteLink {
        peer_satellite_id: String,
    },
}

impl ActionKind {
    pub fn action_type(&self) -> ActionType {
        match self {
            ActionKind::Observation { .. } => ActionType::Observation,
            ActionKind::Downlink { .. } => ActionType::Downlink,
            ActionKind::IntersatelliteLink { .. } => ActionType::IntersatelliteLink,
        }
    }
}

// ---------------------------------------------------------------------------
// Action
// ---------------------------------------------------------------------------

/// An immutable tasking request. Corrections are an unstage plus a restage
/// under a new id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ActionRecord", into = "ActionRecord")]
pub struct Action {
    action_id: String,
    satellite_id: String,
    kind: ActionKind,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl Action {
    pub fn new(
        action_id: impl Into<String>,
        satellite_id: impl Into<String>,
        kind: ActionKind,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Self> {
        let action_id = action_id.into();
        let satellite_id = satellite_id.into();
        validate_id(&action_id)?;
        validate_id(&satellite_id)?;

        let invalid = |reason: String| PlanError::InvalidAction {
            action_id: action_id.clone(),
            reason,
        };

        if start >= end {
            return Err(invalid(format!(
                "start {} must precede end {}",
                start.to_rfc3339(),
                end.to_rfc3339()
            )));
        }
        match &kind {
            ActionKind::Observation { target_id, strip_id } => {
                for id in [target_id, strip_id].into_iter().flatten() {
                    validate_id(id)?;
                }
            }
            ActionKind::Downlink { station_id } => validate_id(station_id)?,
            ActionKind::IntersatelliteLink { peer_satellite_id } => {
                validate_id(peer_satellite_id)?;
                if *peer_satellite_id == satellite_id {
                    return Err(invalid("intersatellite link peer is the satellite itself".into()));
                }
            }
        }

        Ok(Self {
            action_id,
            satellite_id,
            kind,
            start,
            end,
        })
    }

    pub fn observation(
        action_id: impl Into<String>,
        satellite_id: impl Into<String>,
        target_id: Option<String>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Self> {
        Self::new(
            action_id,
            satellite_id,
            ActionKind::Observation {
                target_id,
                strip_id: None,
            },
            start,
            end,
        )
    }

    pub fn downlink(
        action_id: impl Into<String>,
        satellite_id: impl Into<String>,
        station_id: impl Into<String>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Self> {
        Self::new(
            action_id,
            satellite_id,
            ActionKind::Downlink {
                station_id: station_id.into(),
            },
            start,
            end,
        )
    }

    pub fn intersatellite_link(
        action_id: impl Into<String>,
        satellite_id: impl Into<String>,
        peer_satellite_id: impl Into<String>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Self> {
        Self::new(
            action_id,
            satellite_id,
            ActionKind::IntersatelliteLink {
                peer_satellite_id: peer_satellite_id.into(),
            },
            start,
            end,
        )
    }

    pub fn id(&self) -> &str {
        &self.action_id
    }

    pub fn satellite_id(&self) -> &str {
        &self.satellite_id
    }

    pub fn kind(&self) -> &ActionKind {
        &self.kind
    }

    pub fn action_type(&self) -> ActionType {
        self.kind.action_type()
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn duration_s(&self) -> f64 {
        seconds_between(self.start, self.end)
    }

    pub fn target_id(&self) -> Option<&str> {
        match &self.kind {
            ActionKind::Observation { target_id, .. } => target_id.as_deref(),
            _ => None,
        }
    }

    pub fn strip_id(&self) -> Option<&str> {
        match &self.kind {
            ActionKind::Observation { strip_id, .. } => strip_id.as_deref(),
            _ => None,
        }
    }

    pub fn station_id(&self) -> Option<&str> {
        match &self.kind {
            ActionKind::Downlink { station_id } => Some(station_id),
            _ => None,
        }
    }

    pub fn peer_satellite_id(&self) -> Option<&str> {
        match &self.kind {
            ActionKind::IntersatelliteLink { peer_satellite_id } => Some(peer_satellite_id),
            _ => None,
        }
    }

    /// Satellites whose resources this action consumes: the primary and, for
    /// an intersatellite link, the peer.
    pub fn satellites(&self) -> Vec<&str> {
        let mut ids = vec![self.satellite_id.as_str()];
        if let Some(peer) = self.peer_satellite_id() {
            ids.push(peer);
        }
        ids
    }

    /// True if this action occupies a communication terminal on `satellite_id`.
    pub fn uses_terminal_of(&self, satellite_id: &str) -> bool {
        match &self.kind {
            ActionKind::Observation { .. } => false,
            ActionKind::Downlink { .. } => self.satellite_id == satellite_id,
            ActionKind::IntersatelliteLink { peer_satellite_id } => {
                self.satellite_id == satellite_id || peer_satellite_id == satellite_id
            }
        }
    }

    /// Half-open interval overlap with a slack of `tolerance_s` seconds.
    pub fn overlaps(&self, other: &Action, tolerance_s: f64) -> bool {
        let latest_start = self.start.max(other.start);
        let earliest_end = self.end.min(other.end);
        seconds_between(latest_start, earliest_end) > tolerance_s
    }
}

// ---------------------------------------------------------------------------
// ActionRecord (flat wire form)
// ---------------------------------------------------------------------------

/// Flat record used in persisted plans and agent requests. Fields that do not
/// apply to the action type are `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub action_id: String,
    #[serde(rename = "type")]
    pub action_type: ActionType,
    pub satellite_id: String,
    #[serde(default)]
    pub target_id: Option<String>,
    #[serde(default)]
    pub station_id: Option<String>,
    #[serde(default)]
    pub strip_id: Option<String>,
    #[serde(default)]
    pub peer_satellite_id: Option<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TryFrom<ActionRecord> for Action {
    type Error = PlanError;

    fn try_from(r: ActionRecord) -> Result<Self> {
        let stray = |field: &str| PlanError::InvalidAction {
            action_id: r.action_id.clone(),
            reason: format!("field '{field}' does not apply to a {} action", r.action_type),
        };
        let missing = |field: &str| PlanError::InvalidAction {
            action_id: r.action_id.clone(),
            reason: format!("{} action requires '{field}'", r.action_type),
        };

        let kind = match r.action_type {
            ActionType::Observation => {
                if r.station_id.is_some() {
                    return Err(stray("station_id"));
                }
                if r.peer_satellite_id.is_some() {
                    return Err(stray("peer_satellite_id"));
                }
                ActionKind::Observation {
                    target_id: r.target_id.clone(),
                    strip_id: r.strip_id.clone(),
                }
            }
            ActionType::Downlink => {
                if r.target_id.is_some() {
                    return Err(stray("target_id"));
                }
                if r.strip_id.is_some() {
                    return Err(stray("strip_id"));
                }
                if r.peer_satellite_id.is_some() {
                    return Err(stray("peer_satellite_id"));
                }
                ActionKind::Downlink {
                    station_id: r.station_id.clone().ok_or_else(|| missing("station_id"))?,
                }
            }
            ActionType::IntersatelliteLink => {
                if r.target_id.is_some() {
                    return Err(stray("target_id"));
                }
                if r.strip_id.is_some() {
                    return Err(stray("strip_id"));
                }
                if r.station_id.is_some() {
                    return Err(stray("station_id"));
                }
                ActionKind::IntersatelliteLink {
                    peer_satellite_id: r
                        .peer_satellite_id
                        .clone()
                        .ok_or_else(|| missing("peer_satellite_id"))?,
                }
            }
        };

        Action::new(r.action_id, r.satellite_id, kind, r.start, r.end)
    }
}

impl From<Action> for ActionRecord {
    fn from(a: Action) -> Self {
        ActionRecord::from(&a)
    }
}

impl From<&Action> for ActionRecord {
    fn from(a: &Action) -> Self {
        Self {
            action_id: a.action_id.clone(),
            action_type: a.action_type(),
            satellite_id: a.satellite_id.clone(),
            target_id: a.target_id().map(str::to_string),
            station_id: a.station_id().map(str::to_string),
            strip_id: a.strip_id().map(str::to_string),
            peer_satellite_id: a.peer_satellite_id().map(str::to_string),
            start: a.start,
            end: a.end,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
