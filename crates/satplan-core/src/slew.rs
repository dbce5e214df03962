//! Minimum reorientation time between two attitudes.
//!
//! The rotation is treated as a single-axis eigen-axis maneuver with a
//! time-optimal bang-coast-bang profile. With only velocity and acceleration
//! bounds the profile is triangular for short moves and trapezoidal once the
//! velocity limit is reached. A jerk bound, when present, rounds the
//! acceleration steps into S-curves.

use crate::attitude::Quaternion;
use crate::error::{PlanError, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SlewLimits {
    pub max_velocity_deg_s: f64,
    pub max_acceleration_deg_s2: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_jerk_deg_s3: Option<f64>,
    #[serde(default)]
    pub settling_time_s: f64,
}

impl SlewLimits {
    pub fn new(max_velocity_deg_s: f64, max_acceleration_deg_s2: f64, settling_time_s: f64) -> Self {
        Self {
            max_velocity_deg_s,
            max_acceleration_deg_s2,
            max_jerk_deg_s3: None,
            settling_time_s,
        }
    }

    pub fn with_jerk(mut self, max_jerk_deg_s3: f64) -> Self {
        self.max_jerk_deg_s3 = Some(max_jerk_deg_s3);
        self
    }

    /// Velocity and acceleration bounds are usable for a time computation.
    pub fn is_defined(&self) -> bool {
        positive(self.max_velocity_deg_s) && positive(self.max_acceleration_deg_s2)
    }

    fn jerk(&self) -> Option<f64> {
        self.max_jerk_deg_s3.filter(|j| positive(*j))
    }
}

fn positive(v: f64) -> bool {
    v.is_finite() && v > 0.0
}

/// Time in seconds to rotate from `q_end_first` to `q_start_second` and settle.
pub fn required_slew_time(
    q_end_first: &Quaternion,
    q_start_second: &Quaternion,
    limits: &SlewLimits,
) -> Result<f64> {
    let theta = q_end_first
        .angle_to_deg(q_start_second)
        .ok_or_else(|| PlanError::SlewUndefined("degenerate attitude quaternion".into()))?;
    slew_time_for_angle(theta, limits)
}

/// Time in seconds to rotate through `theta_deg` and settle.
pub fn slew_time_for_angle(theta_deg: f64, limits: &SlewLimits) -> Result<f64> {
    if !limits.is_defined() {
        return Err(PlanError::SlewUndefined(format!(
            "velocity {} deg/s and acceleration {} deg/s^2 must both be positive",
            limits.max_velocity_deg_s, limits.max_acceleration_deg_s2
        )));
    }
    if !theta_deg.is_finite() || theta_deg < 0.0 {
        return Err(PlanError::SlewUndefined(format!("invalid angle {theta_deg}")));
    }
    let settle = limits.settling_time_s.max(0.0);
    if theta_deg == 0.0 {
        return Ok(settle);
    }

    let v = limits.max_velocity_deg_s;
    let a = limits.max_acceleration_deg_s2;
    let rotate = match limits.jerk() {
        Some(j) => jerk_limited_time(theta_deg, v, a, j),
        None => accel_limited_time(theta_deg, v, a),
    };
    Ok(rotate + settle)
}

fn accel_limited_time(theta: f64, v: f64, a: f64) -> f64 {
    let t_ramp = v / a;
    let theta_triangle = v * t_ramp;
    if theta <= theta_triangle {
        2.0 * (theta / a).sqrt()
    } else {
        2.0 * t_ramp + (theta - theta_triangle) / v
    }
}

fn jerk_limited_time(theta: f64, v: f64, a: f64, j: f64) -> f64 {
    // Acceleration cannot usefully exceed what the jerk ramp reaches before
    // hitting the velocity limit.
    let a = a.min((v * j).sqrt());
    let t_jerk = a / j;

    // Never reaches peak acceleration: four jerk segments of equal length.
    if theta <= 2.0 * a.powi(3) / (j * j) {
        return 4.0 * (theta / (2.0 * j)).cbrt();
    }

    // Reaches peak acceleration but not peak velocity.
    let t_total = t_jerk + (t_jerk * t_jerk + 4.0 * theta / a).sqrt();
    let peak_velocity = a * (t_total / 2.0 - t_jerk);
    if peak_velocity <= v {
        return t_total;
    }

    // Cruise at peak velocity.
    theta / v + v / a + t_jerk
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
