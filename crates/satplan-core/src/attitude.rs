//! Spacecraft orientations and the memoized lookup used by slew checks.
//!
//! Orientations come from an external attitude solver. The session owns an
//! [`AttitudeCache`] and warms it before asking the conflict detector a
//! question; the detector only ever reads through [`AttitudeLookup`].

use crate::action::Action;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ---------------------------------------------------------------------------
// Quaternion
// ---------------------------------------------------------------------------

/// Orientation quaternion, scalar first. Serialized as `[w, x, y, z]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct Quaternion {
    pub w: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Quaternion {
    pub const IDENTITY: Quaternion = Quaternion {
        w: 1.0,
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub fn new(w: f64, x: f64, y: f64, z: f64) -> Self {
        Self { w, x, y, z }
    }

    /// Rotation of `angle_deg` about the (not necessarily unit) `axis`.
    pub fn from_axis_angle(axis: [f64; 3], angle_deg: f64) -> Self {
        let n = (axis[0] * axis[0] + axis[1] * axis[1] + axis[2] * axis[2]).sqrt();
        if n == 0.0 {
            return Self::IDENTITY;
        }
        let half = angle_deg.to_radians() / 2.0;
        let s = half.sin() / n;
        Self::new(half.cos(), axis[0] * s, axis[1] * s, axis[2] * s)
    }

    pub fn norm(&self) -> f64 {
        self.dot(self).sqrt()
    }

    /// Unit quaternion in the same direction. `None` for a zero or non-finite input.
    pub fn normalized(&self) -> Option<Self> {
        let n = self.norm();
        if !n.is_finite() || n == 0.0 {
            return None;
        }
        Some(Self::new(self.w / n, self.x / n, self.y / n, self.z / n))
    }

    pub fn dot(&self, other: &Quaternion) -> f64 {
        self.w * other.w + self.x * other.x + self.y * other.y + self.z * other.z
    }

    /// Minimal rotation angle in degrees between two orientations.
    /// `q` and `-q` describe the same attitude, hence the absolute value.
    pub fn angle_to_deg(&self, other: &Quaternion) -> Option<f64> {
        let a = self.normalized()?;
        let b = other.normalized()?;
        let d = a.dot(&b).abs().min(1.0);
        Some((2.0 * d.acos()).to_degrees())
    }
}

impl From<[f64; 4]> for Quaternion {
    fn from(v: [f64; 4]) -> Self {
        Self::new(v[0], v[1], v[2], v[3])
    }
}

impl From<Quaternion> for [f64; 4] {
    fn from(q: Quaternion) -> Self {
        [q.w, q.x, q.y, q.z]
    }
}

// ---------------------------------------------------------------------------
// Endpoint
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Endpoint {
    Start,
    End,
}

// ---------------------------------------------------------------------------
// Provider / lookup seams
// ---------------------------------------------------------------------------

/// External attitude solver. May be slow or fail; `None` means unresolved.
pub trait AttitudeProvider {
    fn attitude(&self, action: &Action, endpoint: Endpoint) -> Option<Quaternion>;
}

/// Read-only view over already-resolved attitudes.
pub trait AttitudeLookup {
    fn lookup(&self, action_id: &str, endpoint: Endpoint) -> Option<Quaternion>;
}

/// Start/end pair as stored in scenario files.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AttitudePair {
    pub start: Quaternion,
    pub end: Quaternion,
}

/// Precomputed attitudes keyed by action id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttitudeTable {
    entries: HashMap<String, AttitudePair>,
}

impl AttitudeTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, action_id: impl Into<String>, pair: AttitudePair) {
        self.entries.insert(action_id.into(), pair);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl AttitudeLookup for AttitudeTable {
    fn lookup(&self, action_id: &str, endpoint: Endpoint) -> Option<Quaternion> {
        self.entries.get(action_id).map(|p| match endpoint {
            Endpoint::Start => p.start,
            Endpoint::End => p.end,
        })
    }
}

impl AttitudeProvider for AttitudeTable {
    fn attitude(&self, action: &Action, endpoint: Endpoint) -> Option<Quaternion> {
        self.lookup(action.id(), endpoint)
    }
}

// ---------------------------------------------------------------------------
// AttitudeCache
// ---------------------------------------------------------------------------

/// Memoizes provider answers, including failures, per `(action_id, endpoint)`.
#[derive(Debug, Clone, Default)]
pub struct AttitudeCache {
    entries: HashMap<(String, Endpoint), Option<Quaternion>>,
}

impl AttitudeCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_compute(
        &mut self,
        action: &Action,
        endpoint: Endpoint,
        provider: &dyn AttitudeProvider,
    ) -> Option<Quaternion> {
        *self
            .entries
            .entry((action.id().to_string(), endpoint))
            .or_insert_with(|| {
                let q = provider.attitude(action, endpoint);
                if q.is_none() {
                    tracing::warn!(action_id = action.id(), ?endpoint, "attitude unresolved");
                }
                q
            })
    }

    /// Resolve both endpoints of `action`.
    pub fn warm(&mut self, action: &Action, provider: &dyn AttitudeProvider) {
        self.get_or_compute(action, Endpoint::Start, provider);
        self.get_or_compute(action, Endpoint::End, provider);
    }

    pub fn get(&self, action_id: &str, endpoint: Endpoint) -> Option<Quaternion> {
        self.entries
            .get(&(action_id.to_string(), endpoint))
            .copied()
            .flatten()
    }

    pub fn invalidate(&mut self, action_id: &str) {
        self.entries.retain(|(id, _), _| id != action_id);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl AttitudeLookup for AttitudeCache {
    fn lookup(&self, action_id: &str, endpoint: Endpoint) -> Option<Quaternion> {
        self.get(action_id, endpoint)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::cell::Cell;

    struct Counting {
        calls: Cell<u32>,
        answer: Option<Quaternion>,
    }

    impl AttitudeProvider for Counting {
        fn attitude(&self, _action: &Action, _endpoint: Endpoint) -> Option<Quaternion> {
            self.calls.set(self.calls.get() + 1);
            self.answer
        }
    }

    fn obs(id: &str) -> Action {
        let t0 = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        Action::observation(id, "sat-1", None, t0, t0 + chrono::Duration::minutes(1)).unwrap()
    }

    #[test]
    fn angle_between_axis_rotations() {
        let a = Quaternion::IDENTITY;
        let b = Quaternion::from_axis_angle([0.0, 0.0, 1.0], 30.0);
        assert!((a.angle_to_deg(&b).unwrap() - 30.0).abs() < 1e-9);
    }

    #[test]
    fn angle_ignores_double_cover() {
        let q = Quaternion::from_axis_angle([1.0, 0.0, 0.0], 45.0);
        let neg = Quaternion::new(-q.w, -q.x, -q.y, -q.z);
        assert!(q.angle_to_deg(&neg).unwrap().abs() < 1e-6);
    }

    #[test]
    fn angle_normalizes_inputs() {
        let a = Quaternion::new(2.0, 0.0, 0.0, 0.0);
        let b = Quaternion::from_axis_angle([0.0, 1.0, 0.0], 90.0);
        let scaled = Quaternion::new(b.w * 3.0, b.x * 3.0, b.y * 3.0, b.z * 3.0);
        assert!((a.angle_to_deg(&scaled).unwrap() - 90.0).abs() < 1e-9);
    }

    #[test]
    fn zero_quaternion_has_no_angle() {
        let z = Quaternion::new(0.0, 0.0, 0.0, 0.0);
        assert!(Quaternion::IDENTITY.angle_to_deg(&z).is_none());
    }

    #[test]
    fn quaternion_serializes_as_array() {
        let json = serde_json::to_string(&Quaternion::IDENTITY).unwrap();
        assert_eq!(json, "[1.0,0.0,0.0,0.0]");
    }

    #[test]
    fn cache_calls_provider_once_per_key() {
        let provider = Counting {
            calls: Cell::new(0),
            answer: Some(Quaternion::IDENTITY),
        };
        let mut cache = AttitudeCache::new();
        let a = obs("o1");
        cache.get_or_compute(&a, Endpoint::Start, &provider);
        cache.get_or_compute(&a, Endpoint::Start, &provider);
        cache.get_or_compute(&a, Endpoint::End, &provider);
        assert_eq!(provider.calls.get(), 2);
        assert_eq!(cache.lookup("o1", Endpoint::End), Some(Quaternion::IDENTITY));
    }

    #[test]
    fn cache_remembers_failures() {
        let provider = Counting {
            calls: Cell::new(0),
            answer: None,
        };
        let mut cache = AttitudeCache::new();
        let a = obs("o1");
        assert!(cache.get_or_compute(&a, Endpoint::Start, &provider).is_none());
        assert!(cache.get_or_compute(&a, Endpoint::Start, &provider).is_none());
        assert_eq!(provider.calls.get(), 1);
        assert!(cache.get("o1", Endpoint::Start).is_none());
    }

    #[test]
    fn invalidate_drops_both_endpoints() {
        let provider = Counting {
            calls: Cell::new(0),
            answer: Some(Quaternion::IDENTITY),
        };
        let mut cache = AttitudeCache::new();
        cache.warm(&obs("o1"), &provider);
        cache.warm(&obs("o2"), &provider);
        cache.invalidate("o1");
        assert_eq!(cache.len(), 2);
        assert!(cache.get("o1", Endpoint::Start).is_none());
        assert!(cache.get("o2", Endpoint::Start).is_some());
    }

    #[test]
    fn table_from_yaml() {
        let yaml = "o1:\n  start: [1.0, 0.0, 0.0, 0.0]\n  end: [0.0, 1.0, 0.0, 0.0]\n";
        let table: AttitudeTable = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(
            table.lookup("o1", Endpoint::End),
            Some(Quaternion::new(0.0, 1.0, 0.0, 0.0))
        );
        assert!(table.lookup("o2", Endpoint::Start).is_none());
    }
}
