use crate::action::{validate_id, Action, ActionKind};
use crate::attitude::AttitudeTable;
use crate::error::{PlanError, Result};
use crate::slew::SlewLimits;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

// ---------------------------------------------------------------------------
// Horizon
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Horizon {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Horizon {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        if start >= end {
            return Err(PlanError::InvalidScenario(format!(
                "horizon start {} must precede end {}",
                start.to_rfc3339(),
                end.to_rfc3339()
            )));
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, action: &Action) -> bool {
        action.start() >= self.start && action.end() <= self.end
    }

    /// Seconds from horizon start to `t`.
    pub fn offset_s(&self, t: DateTime<Utc>) -> f64 {
        crate::action::seconds_between(self.start, t)
    }

    pub fn duration_s(&self) -> f64 {
        self.offset_s(self.end)
    }
}

// ---------------------------------------------------------------------------
// Reference entities
// ---------------------------------------------------------------------------

/// Keplerian elements. Carried for downstream tools; never propagated here.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrbitElements {
    pub semi_major_axis_km: f64,
    pub eccentricity: f64,
    pub inclination_deg: f64,
    pub raan_deg: f64,
    pub arg_perigee_deg: f64,
    pub mean_anomaly_deg: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Satellite {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orbit: Option<OrbitElements>,
    pub storage_capacity_gb: f64,
    #[serde(default)]
    pub initial_storage_gb: f64,
    pub obs_data_rate_gb_s: f64,
    pub downlink_data_rate_gb_s: f64,
    pub battery_capacity_wh: f64,
    /// Defaults to a full battery.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_battery_wh: Option<f64>,
    #[serde(default)]
    pub charge_rate_w: f64,
    pub obs_discharge_rate_w: f64,
    pub link_discharge_rate_w: f64,
    pub slew: SlewLimits,
    #[serde(default = "default_num_terminal")]
    pub num_terminal: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub swath_width_km: Option<f64>,
}

fn default_num_terminal() -> u32 {
    1
}

impl Satellite {
    /// A satellite with generous resources and a single terminal.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            orbit: None,
            storage_capacity_gb: 100.0,
            initial_storage_gb: 0.0,
            obs_data_rate_gb_s: 0.01,
            downlink_data_rate_gb_s: 0.02,
            battery_capacity_wh: 1000.0,
            initial_battery_wh: None,
            charge_rate_w: 100.0,
            obs_discharge_rate_w: 200.0,
            link_discharge_rate_w: 100.0,
            slew: SlewLimits::new(1.0, 0.1, 5.0),
            num_terminal: default_num_terminal(),
            swath_width_km: None,
        }
    }

    pub fn initial_battery(&self) -> f64 {
        self.initial_battery_wh.unwrap_or(self.battery_capacity_wh)
    }

    pub fn validate(&self) -> Result<()> {
        validate_id(&self.id)?;
        let bad = |what: &str, v: f64| {
            PlanError::InvalidScenario(format!("satellite '{}': invalid {what} {v}", self.id))
        };
        let non_negative = [
            ("storage_capacity_gb", self.storage_capacity_gb),
            ("initial_storage_gb", self.initial_storage_gb),
            ("obs_data_rate_gb_s", self.obs_data_rate_gb_s),
            ("downlink_data_rate_gb_s", self.downlink_data_rate_gb_s),
            ("battery_capacity_wh", self.battery_capacity_wh),
            ("charge_rate_w", self.charge_rate_w),
            ("obs_discharge_rate_w", self.obs_discharge_rate_w),
            ("link_discharge_rate_w", self.link_discharge_rate_w),
            ("max_velocity_deg_s", self.slew.max_velocity_deg_s),
            ("max_acceleration_deg_s2", self.slew.max_acceleration_deg_s2),
            ("settling_time_s", self.slew.settling_time_s),
        ];
        for (name, v) in non_negative {
            if !v.is_finite() || v < 0.0 {
                return Err(bad(name, v));
            }
        }
        if let Some(j) = self.slew.max_jerk_deg_s3 {
            if !j.is_finite() || j < 0.0 {
                return Err(bad("max_jerk_deg_s3", j));
            }
        }
        if let Some(w) = self.swath_width_km {
            if !w.is_finite() || w < 0.0 {
                return Err(bad("swath_width_km", w));
            }
        }
        if self.initial_storage_gb > self.storage_capacity_gb {
            return Err(bad("initial_storage_gb", self.initial_storage_gb));
        }
        let battery = self.initial_battery();
        if !battery.is_finite() || battery < 0.0 || battery > self.battery_capacity_wh {
            return Err(bad("initial_battery_wh", battery));
        }
        if self.num_terminal == 0 {
            return Err(PlanError::InvalidScenario(format!(
                "satellite '{}': num_terminal must be at least 1",
                self.id
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub id: String,
    pub latitude_deg: f64,
    pub longitude_deg: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Station {
    pub id: String,
    pub latitude_deg: f64,
    pub longitude_deg: f64,
    #[serde(default)]
    pub altitude_m: f64,
}

/// A registered observation strip: a ground-track polyline of `[lat, lon]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Strip {
    pub id: String,
    pub points: Vec<[f64; 2]>,
}

/// Visibility window from the external propagation service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessWindow {
    pub satellite_id: String,
    /// Target, station or peer satellite.
    pub counterpart_id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default)]
    pub max_elevation_deg: f64,
    #[serde(default)]
    pub azimuth_deg: f64,
    #[serde(default)]
    pub range_km: f64,
}

impl AccessWindow {
    pub fn contains(&self, action: &Action) -> bool {
        action.start() >= self.start && action.end() <= self.end
    }
}

fn validate_lat_lon(owner: &str, lat: f64, lon: f64) -> Result<()> {
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
        return Err(PlanError::InvalidScenario(format!(
            "{owner}: coordinate ({lat}, {lon}) out of range"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Scenario
// ---------------------------------------------------------------------------

/// On-disk scenario document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioFile {
    pub id: String,
    pub horizon: Horizon,
    pub satellites: Vec<Satellite>,
    #[serde(default)]
    pub targets: Vec<Target>,
    #[serde(default)]
    pub stations: Vec<Station>,
    #[serde(default)]
    pub strips: Vec<Strip>,
    #[serde(default)]
    pub access_windows: Vec<AccessWindow>,
    #[serde(default)]
    pub attitudes: AttitudeTable,
}

/// Read-only reference data shared by every check in a planning session.
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "ScenarioFile")]
pub struct Scenario {
    id: String,
    horizon: Horizon,
    satellites: BTreeMap<String, Satellite>,
    targets: BTreeMap<String, Target>,
    stations: BTreeMap<String, Station>,
    strips: BTreeMap<String, Strip>,
    access_windows: Vec<AccessWindow>,
    attitudes: AttitudeTable,
}

fn index_unique<T>(
    kind: &str,
    items: Vec<T>,
    id_of: impl Fn(&T) -> &str,
) -> Result<BTreeMap<String, T>> {
    let mut map = BTreeMap::new();
    for item in items {
        let id = id_of(&item).to_string();
        validate_id(&id)?;
        if map.contains_key(&id) {
            return Err(PlanError::InvalidScenario(format!("duplicate {kind} id '{id}'")));
        }
        map.insert(id, item);
    }
    Ok(map)
}

impl TryFrom<ScenarioFile> for Scenario {
    type Error = PlanError;

    fn try_from(file: ScenarioFile) -> Result<Self> {
        Scenario::new(file)
    }
}

impl Scenario {
    pub fn new(file: ScenarioFile) -> Result<Self> {
        validate_id(&file.id)?;
        let horizon = Horizon::new(file.horizon.start, file.horizon.end)?;

        for sat in &file.satellites {
            sat.validate()?;
        }
        for t in &file.targets {
            validate_lat_lon(&format!("target '{}'", t.id), t.latitude_deg, t.longitude_deg)?;
        }
        for s in &file.stations {
            validate_lat_lon(&format!("station '{}'", s.id), s.latitude_deg, s.longitude_deg)?;
        }
        for strip in &file.strips {
            if strip.points.is_empty() {
                return Err(PlanError::InvalidScenario(format!(
                    "strip '{}' has no points",
                    strip.id
                )));
            }
            for p in &strip.points {
                validate_lat_lon(&format!("strip '{}'", strip.id), p[0], p[1])?;
            }
        }

        let satellites = index_unique("satellite", file.satellites, |s| s.id.as_str())?;
        let targets = index_unique("target", file.targets, |t| t.id.as_str())?;
        let stations = index_unique("station", file.stations, |s| s.id.as_str())?;
        let strips = index_unique("strip", file.strips, |s| s.id.as_str())?;

        for w in &file.access_windows {
            if w.start >= w.end {
                return Err(PlanError::InvalidScenario(format!(
                    "access window {} -> {} is empty",
                    w.satellite_id, w.counterpart_id
                )));
            }
            if !satellites.contains_key(&w.satellite_id) {
                return Err(PlanError::UnknownSatellite(w.satellite_id.clone()));
            }
        }

        Ok(Self {
            id: file.id,
            horizon,
            satellites,
            targets,
            stations,
            strips,
            access_windows: file.access_windows,
            attitudes: file.attitudes,
        })
    }

    /// Scenario with only satellites, for callers that bring their own
    /// references.
    pub fn with_satellites(
        id: impl Into<String>,
        horizon: Horizon,
        satellites: Vec<Satellite>,
    ) -> Result<Self> {
        Self::new(ScenarioFile {
            id: id.into(),
            horizon,
            satellites,
            targets: Vec::new(),
            stations: Vec::new(),
            strips: Vec::new(),
            access_windows: Vec::new(),
            attitudes: AttitudeTable::default(),
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        crate::io::read_document(path)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn horizon(&self) -> &Horizon {
        &self.horizon
    }

    pub fn satellite(&self, id: &str) -> Option<&Satellite> {
        self.satellites.get(id)
    }

    pub fn satellites(&self) -> impl Iterator<Item = &Satellite> {
        self.satellites.values()
    }

    pub fn target(&self, id: &str) -> Option<&Target> {
        self.targets.get(id)
    }

    pub fn station(&self, id: &str) -> Option<&Station> {
        self.stations.get(id)
    }

    pub fn strip(&self, id: &str) -> Option<&Strip> {
        self.strips.get(id)
    }

    pub fn strips(&self) -> impl Iterator<Item = &Strip> {
        self.strips.values()
    }

    pub fn attitudes(&self) -> &AttitudeTable {
        &self.attitudes
    }

    pub fn set_attitudes(&mut self, attitudes: AttitudeTable) {
        self.attitudes = attitudes;
    }

    pub fn add_access_window(&mut self, window: AccessWindow) {
        self.access_windows.push(window);
    }

    /// Windows between `satellite_id` and `counterpart_id`. Intersatellite
    /// windows are symmetric, so both orderings match.
    pub fn access_windows_for<'a>(
        &'a self,
        satellite_id: &'a str,
        counterpart_id: &'a str,
    ) -> impl Iterator<Item = &'a AccessWindow> + 'a {
        self.access_windows.iter().filter(move |w| {
            (w.satellite_id == satellite_id && w.counterpart_id == counterpart_id)
                || (w.satellite_id == counterpart_id && w.counterpart_id == satellite_id)
        })
    }

    /// Check that everything `action` references exists, that it lies inside
    /// the horizon, and that it fits an access window when the scenario
    /// carries windows for that pair. Returns a human-readable reason on failure.
    pub fn check_access(&self, action: &Action) -> std::result::Result<(), String> {
        if self.satellite(action.satellite_id()).is_none() {
            return Err(format!("unknown satellite '{}'", action.satellite_id()));
        }
        if !self.horizon.contains(action) {
            return Err(format!(
                "action [{}, {}] lies outside the horizon [{}, {}]",
                action.start().to_rfc3339(),
                action.end().to_rfc3339(),
                self.horizon.start.to_rfc3339(),
                self.horizon.end.to_rfc3339()
            ));
        }

        let counterpart = match action.kind() {
            ActionKind::Observation {
                target_id,
                strip_id,
            } => {
                if let Some(strip) = strip_id {
                    if self.strip(strip).is_none() {
                        return Err(format!("unknown strip '{strip}'"));
                    }
                }
                if let Some(target) = target_id {
                    if self.target(target).is_none() {
                        return Err(format!("unknown target '{target}'"));
                    }
                }
                target_id.as_deref()
            }
            ActionKind::Downlink { station_id } => {
                if self.station(station_id).is_none() {
                    return Err(format!("unknown station '{station_id}'"));
                }
                Some(station_id.as_str())
            }
            ActionKind::IntersatelliteLink { peer_satellite_id } => {
                if self.satellite(peer_satellite_id).is_none() {
                    return Err(format!("unknown peer satellite '{peer_satellite_id}'"));
                }
                Some(peer_satellite_id.as_str())
            }
        };

        if let Some(counterpart) = counterpart {
            let windows: Vec<&AccessWindow> = self
                .access_windows_for(action.satellite_id(), counterpart)
                .collect();
            if !windows.is_empty() && !windows.iter().any(|w| w.contains(action)) {
                return Err(format!(
                    "no access window between '{}' and '{counterpart}' covers the action",
                    action.satellite_id()
                ));
            }
        }
        Ok(())
    }

    /// Ids of every satellite, target, station and strip, for diagnostics.
    pub fn known_ids(&self) -> BTreeSet<&str> {
        self.satellites
            .keys()
            .chain(self.targets.keys())
            .chain(self.stations.keys())
            .chain(self.strips.keys())
            .map(String::as_str)
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
