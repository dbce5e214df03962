//! Piecewise-constant resource integration for battery and onboard storage.
//!
//! Each [`ResourceEvent`] contributes a constant rate over a half-open
//! interval. Between consecutive breakpoints the sum of active rates is
//! constant, so integration is exact and extrema only occur at breakpoints.

use crate::action::{Action, ActionType};
use crate::config::PlannerConfig;
use crate::scenario::{Horizon, Satellite};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Level differences below this are float noise, not violations.
pub const LEVEL_EPSILON: f64 = 1e-9;

const SECONDS_PER_HOUR: f64 = 3600.0;

// ---------------------------------------------------------------------------
// Events and model
// ---------------------------------------------------------------------------

/// A constant rate (units per second) applied over `[start, end)` seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceEvent {
    pub start: f64,
    pub end: f64,
    pub rate_change: f64,
}

impl ResourceEvent {
    pub fn new(start: f64, end: f64, rate_change: f64) -> Self {
        Self {
            start,
            end,
            rate_change,
        }
    }

    fn canonical_cmp(&self, other: &Self) -> Ordering {
        self.start
            .total_cmp(&other.start)
            .then(self.end.total_cmp(&other.end))
            .then(self.rate_change.total_cmp(&other.rate_change))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaselineMode {
    /// Baseline applies at every instant.
    Always,
    /// Baseline applies only while no explicit event is active.
    WhenIdle,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceModel {
    pub initial_level: f64,
    pub baseline_rate: f64,
    pub baseline: BaselineMode,
    /// The level saturates here instead of going lower.
    pub floor: Option<f64>,
    /// The level saturates here instead of going higher.
    pub ceiling: Option<f64>,
}

impl ResourceModel {
    pub fn flat(initial_level: f64) -> Self {
        Self {
            initial_level,
            baseline_rate: 0.0,
            baseline: BaselineMode::Always,
            floor: None,
            ceiling: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Trace
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CurvePoint {
    pub t_s: f64,
    pub level: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceTrace {
    pub peak: f64,
    pub trough: f64,
    pub final_level: f64,
    pub curve: Vec<CurvePoint>,
}

impl ResourceTrace {
    /// How far the trace leaves `[lower, upper]`, in resource units.
    pub fn check(&self, lower: Option<f64>, upper: Option<f64>) -> ResourceCheck {
        ResourceCheck {
            peak: self.peak,
            trough: self.trough,
            final_level: self.final_level,
            overflow: upper.map_or(0.0, |u| (self.peak - u).max(0.0)),
            undershoot: lower.map_or(0.0, |l| (l - self.trough).max(0.0)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceCheck {
    pub peak: f64,
    pub trough: f64,
    pub final_level: f64,
    pub overflow: f64,
    pub undershoot: f64,
}

impl ResourceCheck {
    pub fn overflowed(&self) -> bool {
        self.overflow > LEVEL_EPSILON
    }

    pub fn undershot(&self) -> bool {
        self.undershoot > LEVEL_EPSILON
    }

    pub fn is_violated(&self) -> bool {
        self.overflowed() || self.undershot()
    }
}

// ---------------------------------------------------------------------------
// Simulation
// ---------------------------------------------------------------------------

/// Integrate `events` from `initial_level` with no baseline and no saturation.
pub fn simulate(events: &[ResourceEvent], initial_level: f64) -> ResourceTrace {
    simulate_with(events, &ResourceModel::flat(initial_level), None)
}

/// Integrate `events` under `model`. When `span` is given, integration runs
/// from `span.0` to `span.1` in addition to the event breakpoints, so idle
/// baseline before the first and after the last event is accounted for.
pub fn simulate_with(
    events: &[ResourceEvent],
    model: &ResourceModel,
    span: Option<(f64, f64)>,
) -> ResourceTrace {
    let mut events: Vec<ResourceEvent> = events
        .iter()
        .copied()
        .filter(|e| {
            e.start.is_finite() && e.end.is_finite() && e.rate_change.is_finite() && e.end > e.start
        })
        .collect();
    events.sort_by(|a, b| a.canonical_cmp(b));

    let mut breakpoints: Vec<f64> = events.iter().flat_map(|e| [e.start, e.end]).collect();
    if let Some((s, e)) = span {
        breakpoints.push(s);
        breakpoints.push(e);
    }
    breakpoints.sort_by(|a, b| a.total_cmp(b));
    breakpoints.dedup();

    let mut level = clamp(model.initial_level, model);
    let mut peak = level;
    let mut trough = level;
    let mut curve = Vec::with_capacity(breakpoints.len());
    if let Some(&first) = breakpoints.first() {
        curve.push(CurvePoint { t_s: first, level });
    }

    for pair in breakpoints.windows(2) {
        let (t0, t1) = (pair[0], pair[1]);
        let mut rate = 0.0;
        let mut active = false;
        for e in &events {
            if e.start <= t0 && e.end >= t1 {
                rate += e.rate_change;
                active = true;
            }
        }
        if model.baseline == BaselineMode::Always || !active {
            rate += model.baseline_rate;
        }

        level = clamp(level + rate * (t1 - t0), model);
        peak = peak.max(level);
        trough = trough.min(level);
        curve.push(CurvePoint { t_s: t1, level });
    }

    ResourceTrace {
        peak,
        trough,
        final_level: level,
        curve,
    }
}

fn clamp(level: f64, model: &ResourceModel) -> f64 {
    let mut level = level;
    if let Some(floor) = model.floor {
        level = level.max(floor);
    }
    if let Some(ceiling) = model.ceiling {
        level = level.min(ceiling);
    }
    level
}

// ---------------------------------------------------------------------------
// Domain call sites
// ---------------------------------------------------------------------------

/// Projected battery and storage for one satellite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SatelliteResources {
    pub satellite_id: String,
    pub power: ResourceTrace,
    pub power_check: ResourceCheck,
    pub storage: ResourceTrace,
    pub storage_check: ResourceCheck,
}

/// Storage events for `sat`: observations fill at the observation data rate,
/// downlinks drain at the downlink rate.
pub fn storage_events<'a>(
    sat: &Satellite,
    actions: impl IntoIterator<Item = &'a Action>,
    horizon: &Horizon,
) -> Vec<ResourceEvent> {
    actions
        .into_iter()
        .filter(|a| a.satellite_id() == sat.id)
        .filter_map(|a| {
            let rate = match a.action_type() {
                ActionType::Observation => sat.obs_data_rate_gb_s,
                ActionType::Downlink => -sat.downlink_data_rate_gb_s,
                ActionType::IntersatelliteLink => return None,
            };
            Some(ResourceEvent::new(
                horizon.offset_s(a.start()),
                horizon.offset_s(a.end()),
                rate,
            ))
        })
        .collect()
}

/// Power events for `sat` in Wh per second: observations and any link that
/// occupies one of its terminals draw from the battery.
pub fn power_events<'a>(
    sat: &Satellite,
    actions: impl IntoIterator<Item = &'a Action>,
    horizon: &Horizon,
) -> Vec<ResourceEvent> {
    actions
        .into_iter()
        .filter_map(|a| {
            let draw_w = match a.action_type() {
                ActionType::Observation if a.satellite_id() == sat.id => sat.obs_discharge_rate_w,
                ActionType::Downlink | ActionType::IntersatelliteLink
                    if a.uses_terminal_of(&sat.id) =>
                {
                    sat.link_discharge_rate_w
                }
                _ => return None,
            };
            Some(ResourceEvent::new(
                horizon.offset_s(a.start()),
                horizon.offset_s(a.end()),
                -draw_w / SECONDS_PER_HOUR,
            ))
        })
        .collect()
}

/// Project battery and storage for `sat` across the whole horizon.
pub fn project_satellite<'a>(
    sat: &Satellite,
    actions: impl IntoIterator<Item = &'a Action> + Clone,
    horizon: &Horizon,
    config: &PlannerConfig,
) -> SatelliteResources {
    let span = Some((0.0, horizon.duration_s()));

    let power_model = ResourceModel {
        initial_level: sat.initial_battery(),
        baseline_rate: sat.charge_rate_w / SECONDS_PER_HOUR,
        baseline: BaselineMode::WhenIdle,
        floor: None,
        ceiling: Some(sat.battery_capacity_wh),
    };
    let power = simulate_with(&power_events(sat, actions.clone(), horizon), &power_model, span);
    // Charging saturates at capacity, so only the empty side can be crossed.
    let power_check = power.check(Some(0.0), None);

    let storage_model = ResourceModel {
        initial_level: sat.initial_storage_gb,
        baseline_rate: 0.0,
        baseline: BaselineMode::Always,
        floor: config.storage.saturate_at_zero.then_some(0.0),
        ceiling: None,
    };
    let storage = simulate_with(&storage_events(sat, actions, horizon), &storage_model, span);
    let storage_check = storage.check(None, Some(sat.storage_capacity_gb));

    tracing::debug!(
        satellite = %sat.id,
        battery_min = power.trough,
        storage_peak = storage.peak,
        "resources projected"
    );

    SatelliteResources {
        satellite_id: sat.id.clone(),
        power,
        power_check,
        storage,
        storage_check,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn t(min: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(min)
    }

    fn horizon() -> Horizon {
        Horizon::new(t(0), t(600)).unwrap()
    }

    #[test]
    fn empty_events_keep_initial_level() {
        let trace = simulate(&[], 5.0);
        assert_eq!(trace.peak, 5.0);
        assert_eq!(trace.trough, 5.0);
        assert_eq!(trace.final_level, 5.0);
        assert!(trace.curve.is_empty());
    }

    #[test]
    fn overlapping_rates_sum() {
        let events = [
            ResourceEvent::new(0.0, 10.0, 1.0),
            ResourceEvent::new(5.0, 15.0, 2.0),
            ResourceEvent::new(15.0, 20.0, -4.0),
        ];
        let trace = simulate(&events, 0.0);
        // 0..5: +5, 5..10: +15, 10..15: +10, 15..20: -20
        assert!((trace.peak - 30.0).abs() < 1e-12);
        assert!((trace.final_level - 10.0).abs() < 1e-12);
        assert_eq!(trace.trough, 0.0);
        assert_eq!(trace.curve.len(), 5);
    }

    #[test]
    fn order_independent_and_deterministic() {
        let events = vec![
            ResourceEvent::new(0.1, 7.3, 0.3),
            ResourceEvent::new(2.2, 9.9, -0.7),
            ResourceEvent::new(4.0, 4.5, 1.1),
            ResourceEvent::new(1.0, 12.0, 0.05),
        ];
        let forward = simulate(&events, 1.0);
        let mut reversed = events.clone();
        reversed.reverse();
        let backward = simulate(&reversed, 1.0);
        assert_eq!(forward, backward);
        assert_eq!(forward, simulate(&events, 1.0));
    }

    #[test]
    fn non_negative_rates_peak_bounds() {
        let events = [
            ResourceEvent::new(0.0, 3.0, 0.5),
            ResourceEvent::new(1.0, 2.0, 2.0),
        ];
        let trace = simulate(&events, 4.0);
        assert!(trace.peak >= trace.final_level);
        assert!(trace.peak >= 4.0);
    }

    #[test]
    fn degenerate_events_ignored() {
        let events = [
            ResourceEvent::new(5.0, 5.0, 100.0),
            ResourceEvent::new(6.0, 1.0, 100.0),
            ResourceEvent::new(0.0, f64::NAN, 100.0),
        ];
        assert_eq!(simulate(&events, 2.0).peak, 2.0);
    }

    #[test]
    fn idle_baseline_only_between_events() {
        let model = ResourceModel {
            initial_level: 10.0,
            baseline_rate: 1.0,
            baseline: BaselineMode::WhenIdle,
            floor: None,
            ceiling: None,
        };
        let events = [ResourceEvent::new(2.0, 4.0, -3.0)];
        let trace = simulate_with(&events, &model, Some((0.0, 6.0)));
        // +2 idle, -6 active, +2 idle
        assert!((trace.trough - 6.0).abs() < 1e-12);
        assert!((trace.final_level - 8.0).abs() < 1e-12);
        assert!((trace.peak - 12.0).abs() < 1e-12);
    }

    #[test]
    fn saturation_clamps_level() {
        let model = ResourceModel {
            initial_level: 9.0,
            baseline_rate: 1.0,
            baseline: BaselineMode::WhenIdle,
            floor: Some(0.0),
            ceiling: Some(10.0),
        };
        let events = [ResourceEvent::new(5.0, 30.0, -1.0)];
        let trace = simulate_with(&events, &model, Some((0.0, 30.0)));
        assert_eq!(trace.peak, 10.0);
        assert_eq!(trace.final_level, 0.0);
        assert_eq!(trace.trough, 0.0);
    }

    #[test]
    fn check_reports_magnitudes() {
        let trace = simulate(&[ResourceEvent::new(0.0, 10.0, 2.0)], 0.0);
        let check = trace.check(Some(0.0), Some(15.0));
        assert!((check.overflow - 5.0).abs() < 1e-12);
        assert_eq!(check.undershoot, 0.0);
        assert!(check.is_violated());

        let drained = simulate(&[ResourceEvent::new(0.0, 10.0, -1.0)], 4.0);
        let check = drained.check(Some(0.0), None);
        assert!((check.undershoot - 6.0).abs() < 1e-12);
        assert!(check.undershot());
        assert!(!check.overflowed());
    }

    #[test]
    fn storage_overflow_for_long_observation() {
        let mut sat = Satellite::new("sat-1");
        sat.storage_capacity_gb = 10.0;
        sat.obs_data_rate_gb_s = 0.01;
        // 30 minutes = 18 GB
        let obs = Action::observation("o1", "sat-1", None, t(0), t(30)).unwrap();
        let res = project_satellite(&sat, [&obs], &horizon(), &PlannerConfig::default());
        assert!(res.storage_check.overflowed());
        assert!((res.storage_check.overflow - 8.0).abs() < 1e-6);
        assert!(!res.power_check.is_violated());
    }

    #[test]
    fn downlink_drains_storage_but_not_below_zero() {
        let mut sat = Satellite::new("sat-1");
        sat.obs_data_rate_gb_s = 0.01;
        sat.downlink_data_rate_gb_s = 0.05;
        let obs = Action::observation("o1", "sat-1", None, t(0), t(10)).unwrap();
        let dl = Action::downlink("d1", "sat-1", "gs-1", t(20), t(40)).unwrap();
        let res = project_satellite(&sat, [&obs, &dl], &horizon(), &PlannerConfig::default());
        assert!((res.storage.peak - 6.0).abs() < 1e-9);
        assert_eq!(res.storage.final_level, 0.0);
    }

    #[test]
    fn battery_drain_undershoots() {
        let mut sat = Satellite::new("sat-1");
        sat.battery_capacity_wh = 100.0;
        sat.obs_discharge_rate_w = 600.0;
        sat.charge_rate_w = 0.0;
        // 20 minutes at 600 W = 200 Wh from a 100 Wh battery
        let obs = Action::observation("o1", "sat-1", None, t(10), t(30)).unwrap();
        let res = project_satellite(&sat, [&obs], &horizon(), &PlannerConfig::default());
        assert!(res.power_check.undershot());
        assert!((res.power_check.undershoot - 100.0).abs() < 1e-6);
    }

    #[test]
    fn charging_stops_at_capacity() {
        let mut sat = Satellite::new("sat-1");
        sat.battery_capacity_wh = 100.0;
        sat.initial_battery_wh = Some(50.0);
        sat.charge_rate_w = 600.0;
        let obs = Action::observation("o1", "sat-1", None, t(10), t(11)).unwrap();
        let res = project_satellite(&sat, [&obs], &horizon(), &PlannerConfig::default());
        assert!((res.power.peak - 100.0).abs() < 1e-9);
        assert!(!res.power_check.is_violated());
    }

    #[test]
    fn isl_draws_power_on_both_ends() {
        let a = Satellite::new("sat-a");
        let b = Satellite::new("sat-b");
        let isl = Action::intersatellite_link("l1", "sat-a", "sat-b", t(0), t(60)).unwrap();
        let h = horizon();
        assert_eq!(power_events(&a, [&isl], &h).len(), 1);
        assert_eq!(power_events(&b, [&isl], &h).len(), 1);
        assert!(storage_events(&b, [&isl], &h).is_empty());
    }
}
