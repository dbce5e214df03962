//! Regional polygon coverage by swath-buffered observation strips.
//!
//! Each polygon is projected onto a local equirectangular plane in km
//! centred on its vertex mean, then sampled at the cell centres of a regular
//! grid over its bounding box. A sample inside the polygon is covered when it
//! lies within half a swath of any strip segment.

use super::{CaseMeta, VerificationReport, VerifierOutput};
use crate::action::ActionType;
use crate::config::CoverageConfig;
use crate::error::{PlanError, Result};
use crate::persist::PersistedPlan;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Mean Earth radius in km.
const EARTH_RADIUS_KM: f64 = 6371.0088;

// ---------------------------------------------------------------------------
// Requirements
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageRequirements {
    pub meta: CaseMeta,
    pub regional_coverage: RegionalCoverage,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegionalCoverage {
    pub polygons: Vec<PolygonRequirement>,
    #[serde(default)]
    pub satellite_swaths_km: BTreeMap<String, f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_swath_km: Option<f64>,
    /// Target locations `[lat, lon]` for observations without a strip.
    #[serde(default)]
    pub targets: BTreeMap<String, [f64; 2]>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolygonRequirement {
    pub id: String,
    /// `[lat, lon]` vertices; the ring closes implicitly.
    pub vertices: Vec<[f64; 2]>,
    #[serde(default)]
    pub required_coverage_percentage: f64,
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolygonCoverage {
    pub coverage_percentage: f64,
    pub required_coverage_percentage: f64,
    pub area_km2: f64,
    pub covered_area_km2: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageMetrics {
    pub polygons: BTreeMap<String, PolygonCoverage>,
    pub mean_coverage_percentage: f64,
    pub num_strips: usize,
}

/// An observation footprint: a `[lat, lon]` polyline (one point for a
/// target fallback) swept by `swath_km`.
#[derive(Debug, Clone, PartialEq)]
pub struct SwathStrip {
    pub points: Vec<[f64; 2]>,
    pub swath_km: f64,
}

// ---------------------------------------------------------------------------
// Strip derivation
// ---------------------------------------------------------------------------

/// Footprints of every observation in `plan`.
pub fn derive_strips(plan: &PersistedPlan, req: &RegionalCoverage) -> Result<Vec<SwathStrip>> {
    let mut strips = Vec::new();
    for a in plan.typed_actions()? {
        if a.action_type() != ActionType::Observation {
            continue;
        }
        let points = if let Some(strip_id) = a.strip_id() {
            let strip = plan.strip(strip_id).ok_or_else(|| {
                PlanError::MalformedInput(format!(
                    "observation '{}' references unregistered strip '{strip_id}'",
                    a.id()
                ))
            })?;
            strip.points.clone()
        } else if let Some(loc) = a.target_id().and_then(|t| req.targets.get(t)) {
            vec![*loc]
        } else {
            tracing::debug!(action_id = a.id(), "observation has no footprint");
            continue;
        };

        let swath_km = req
            .satellite_swaths_km
            .get(a.satellite_id())
            .or_else(|| plan.metadata.satellite_swaths_km.get(a.satellite_id()))
            .copied()
            .or(req.default_swath_km)
            .ok_or_else(|| {
                PlanError::MalformedInput(format!(
                    "no swath width for satellite '{}'",
                    a.satellite_id()
                ))
            })?;
        if !swath_km.is_finite() || swath_km < 0.0 {
            return Err(PlanError::MalformedInput(format!(
                "invalid swath width {swath_km} for satellite '{}'",
                a.satellite_id()
            )));
        }
        strips.push(SwathStrip { points, swath_km });
    }
    Ok(strips)
}

// ---------------------------------------------------------------------------
// Geometry
// ---------------------------------------------------------------------------

/// Local equirectangular projection around `origin` (`[lat, lon]`), in km.
struct LocalPlane {
    lat0: f64,
    lon0: f64,
    cos_lat0: f64,
}

impl LocalPlane {
    fn new(origin: [f64; 2]) -> Self {
        Self {
            lat0: origin[0],
            lon0: origin[1],
            cos_lat0: origin[0].to_radians().cos(),
        }
    }

    fn project(&self, p: [f64; 2]) -> (f64, f64) {
        let mut dlon = p[1] - self.lon0;
        if dlon > 180.0 {
            dlon -= 360.0;
        } else if dlon < -180.0 {
            dlon += 360.0;
        }
        let x = EARTH_RADIUS_KM * dlon.to_radians() * self.cos_lat0;
        let y = EARTH_RADIUS_KM * (p[0] - self.lat0).to_radians();
        (x, y)
    }
}

fn point_in_polygon(p: (f64, f64), ring: &[(f64, f64)]) -> bool {
    let mut inside = false;
    let mut j = ring.len() - 1;
    for i in 0..ring.len() {
        let (xi, yi) = ring[i];
        let (xj, yj) = ring[j];
        if (yi > p.1) != (yj > p.1) && p.0 < (xj - xi) * (p.1 - yi) / (yj - yi) + xi {
            inside = !inside;
        }
        j = i;
    }
    inside
}

fn shoelace_area(ring: &[(f64, f64)]) -> f64 {
    let n = ring.len();
    let twice: f64 = (0..n)
        .map(|i| {
            let (x1, y1) = ring[i];
            let (x2, y2) = ring[(i + 1) % n];
            x1 * y2 - x2 * y1
        })
        .sum();
    twice.abs() / 2.0
}

fn distance_to_segment(p: (f64, f64), a: (f64, f64), b: (f64, f64)) -> f64 {
    let (dx, dy) = (b.0 - a.0, b.1 - a.1);
    let len2 = dx * dx + dy * dy;
    let t = if len2 == 0.0 {
        0.0
    } else {
        (((p.0 - a.0) * dx + (p.1 - a.1) * dy) / len2).clamp(0.0, 1.0)
    };
    let (cx, cy) = (a.0 + t * dx, a.1 + t * dy);
    ((p.0 - cx).powi(2) + (p.1 - cy).powi(2)).sqrt()
}

/// A strip projected into a polygon's plane, as segments plus half-width.
struct PlaneStrip {
    segments: Vec<((f64, f64), (f64, f64))>,
    half_width: f64,
}

impl PlaneStrip {
    fn covers(&self, p: (f64, f64)) -> bool {
        self.segments
            .iter()
            .any(|(a, b)| distance_to_segment(p, *a, *b) <= self.half_width)
    }
}

/// Covered fraction of `vertices` and its area in km².
pub fn polygon_coverage(
    vertices: &[[f64; 2]],
    strips: &[SwathStrip],
    resolution: usize,
) -> Result<(f64, f64)> {
    if vertices.len() < 3 {
        return Err(PlanError::MalformedInput(format!(
            "polygon needs at least 3 vertices, got {}",
            vertices.len()
        )));
    }
    if resolution == 0 {
        return Err(PlanError::MalformedInput("grid resolution must be positive".into()));
    }

    let n = vertices.len() as f64;
    let origin = [
        vertices.iter().map(|v| v[0]).sum::<f64>() / n,
        vertices.iter().map(|v| v[1]).sum::<f64>() / n,
    ];
    let plane = LocalPlane::new(origin);
    let ring: Vec<(f64, f64)> = vertices.iter().map(|v| plane.project(*v)).collect();
    let area = shoelace_area(&ring);

    let (min_x, max_x) = ring
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), p| (lo.min(p.0), hi.max(p.0)));
    let (min_y, max_y) = ring
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), p| (lo.min(p.1), hi.max(p.1)));

    let plane_strips: Vec<PlaneStrip> = strips
        .iter()
        .map(|s| {
            let pts: Vec<(f64, f64)> = s.points.iter().map(|p| plane.project(*p)).collect();
            let segments = if pts.len() == 1 {
                vec![(pts[0], pts[0])]
            } else {
                pts.windows(2).map(|w| (w[0], w[1])).collect()
            };
            PlaneStrip {
                segments,
                half_width: s.swath_km / 2.0,
            }
        })
        .filter(|s| {
            // Drop strips whose buffer cannot reach the bounding box.
            s.segments.iter().any(|(a, b)| {
                a.0.min(b.0) - s.half_width <= max_x
                    && a.0.max(b.0) + s.half_width >= min_x
                    && a.1.min(b.1) - s.half_width <= max_y
                    && a.1.max(b.1) + s.half_width >= min_y
            })
        })
        .collect();

    let step_x = (max_x - min_x) / resolution as f64;
    let step_y = (max_y - min_y) / resolution as f64;
    let mut inside = 0usize;
    let mut covered = 0usize;
    for i in 0..resolution {
        let x = min_x + (i as f64 + 0.5) * step_x;
        for j in 0..resolution {
            let p = (x, min_y + (j as f64 + 0.5) * step_y);
            if !point_in_polygon(p, &ring) {
                continue;
            }
            inside += 1;
            if plane_strips.iter().any(|s| s.covers(p)) {
                covered += 1;
            }
        }
    }

    let ratio = if inside == 0 {
        0.0
    } else {
        covered as f64 / inside as f64
    };
    Ok((ratio, area))
}

// ---------------------------------------------------------------------------
// Verification
// ---------------------------------------------------------------------------

pub fn verify_regional_coverage(
    plan: &PersistedPlan,
    req: &CoverageRequirements,
    config: &CoverageConfig,
) -> Result<VerificationReport<CoverageMetrics>> {
    req.meta.horizon()?;
    let region = &req.regional_coverage;
    let strips = derive_strips(plan, region)?;

    let mut polygons = BTreeMap::new();
    let mut violations = Vec::new();
    for poly in &region.polygons {
        let (ratio, area_km2) = polygon_coverage(&poly.vertices, &strips, config.grid_resolution)
            .map_err(|e| PlanError::MalformedInput(format!("polygon '{}': {e}", poly.id)))?;
        let pct = ratio * 100.0;
        if pct + 1e-9 < poly.required_coverage_percentage {
            violations.push(format!(
                "polygon '{}' covered {pct:.2}% < required {:.2}%",
                poly.id, poly.required_coverage_percentage
            ));
        }
        polygons.insert(
            poly.id.clone(),
            PolygonCoverage {
                coverage_percentage: pct,
                required_coverage_percentage: poly.required_coverage_percentage,
                area_km2,
                covered_area_km2: area_km2 * ratio,
            },
        );
    }

    let mean_coverage_percentage = if polygons.is_empty() {
        0.0
    } else {
        polygons.values().map(|p| p.coverage_percentage).sum::<f64>() / polygons.len() as f64
    };

    tracing::debug!(
        case = %req.meta.case_id,
        polygons = polygons.len(),
        strips = strips.len(),
        "regional coverage verified"
    );

    Ok(VerificationReport {
        valid: true,
        metrics: CoverageMetrics {
            polygons,
            mean_coverage_percentage,
            num_strips: strips.len(),
        },
        violations,
    })
}

pub fn verify_coverage_files(
    plan_path: &Path,
    requirements_path: &Path,
    config: &CoverageConfig,
) -> VerifierOutput {
    let result = PersistedPlan::load(plan_path).and_then(|plan| {
        let req: CoverageRequirements = crate::io::read_document(requirements_path)?;
        verify_regional_coverage(&plan, &req, config)
    });
    VerifierOutput::from_result(result)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{Action, ActionKind, ActionRecord};
    use crate::persist::{PlanMetadata, RegisteredStrip};
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use tempfile::TempDir;

    fn t(min: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(min)
    }

    fn square() -> Vec<[f64; 2]> {
        vec![[0.0, 0.0], [0.0, 1.0], [1.0, 1.0], [1.0, 0.0]]
    }

    fn strip_obs(id: &str, strip: &str) -> ActionRecord {
        let a = Action::new(
            id,
            "sat-1",
            ActionKind::Observation {
                target_id: None,
                strip_id: Some(strip.into()),
            },
            t(1),
            t(2),
        )
        .unwrap();
        ActionRecord::from(a)
    }

    fn plan(actions: Vec<ActionRecord>, strips: Vec<RegisteredStrip>) -> PersistedPlan {
        PersistedPlan {
            metadata: PlanMetadata {
                horizon_start: t(0),
                horizon_end: t(600),
                scenario_id: None,
                satellite_swaths_km: BTreeMap::new(),
            },
            actions,
            registered_strips: strips,
        }
    }

    fn requirements(swath: f64, required: f64) -> CoverageRequirements {
        CoverageRequirements {
            meta: CaseMeta {
                case_id: "cov".into(),
                horizon_start: t(0),
                horizon_end: t(600),
            },
            regional_coverage: RegionalCoverage {
                polygons: vec![PolygonRequirement {
                    id: "p1".into(),
                    vertices: square(),
                    required_coverage_percentage: required,
                }],
                satellite_swaths_km: BTreeMap::from([("sat-1".to_string(), swath)]),
                default_swath_km: None,
                targets: BTreeMap::from([("tgt-1".to_string(), [0.5, 0.5])]),
            },
        }
    }

    fn cfg() -> CoverageConfig {
        CoverageConfig { grid_resolution: 50 }
    }

    #[test]
    fn wide_strip_covers_square_fully() {
        // 1 deg square is ~157 km across the diagonal
        let p = plan(
            vec![strip_obs("o1", "s1")],
            vec![RegisteredStrip {
                id: "s1".into(),
                points: vec![[0.0, 0.5], [1.0, 0.5]],
            }],
        );
        let report = verify_regional_coverage(&p, &requirements(400.0, 90.0), &cfg()).unwrap();
        let poly = &report.metrics.polygons["p1"];
        assert_eq!(poly.coverage_percentage, 100.0);
        assert!(report.violations.is_empty());
        assert!((poly.area_km2 - 12364.0).abs() / 12364.0 < 0.01);
    }

    #[test]
    fn empty_plan_has_zero_coverage_and_violation() {
        let p = plan(vec![], vec![]);
        let report = verify_regional_coverage(&p, &requirements(10.0, 50.0), &cfg()).unwrap();
        assert!(report.valid);
        assert_eq!(report.metrics.polygons["p1"].coverage_percentage, 0.0);
        assert_eq!(report.violations.len(), 1);
    }

    #[test]
    fn narrow_strip_covers_a_band() {
        // ~111 km wide square, 22 km swath through the middle: ~20%
        let p = plan(
            vec![strip_obs("o1", "s1")],
            vec![RegisteredStrip {
                id: "s1".into(),
                points: vec![[-0.5, 0.5], [1.5, 0.5]],
            }],
        );
        let report = verify_regional_coverage(&p, &requirements(22.2, 0.0), &cfg()).unwrap();
        let pct = report.metrics.polygons["p1"].coverage_percentage;
        assert!(pct > 15.0 && pct < 25.0, "coverage {pct}");
    }

    #[test]
    fn target_fallback_is_a_disc() {
        let a = Action::observation("o1", "sat-1", Some("tgt-1".into()), t(1), t(2)).unwrap();
        let p = plan(vec![ActionRecord::from(a)], vec![]);
        let report = verify_regional_coverage(&p, &requirements(50.0, 0.0), &cfg()).unwrap();
        let pct = report.metrics.polygons["p1"].coverage_percentage;
        // disc of radius 25 km over ~12 364 km^2 is ~16%
        assert!(pct > 12.0 && pct < 20.0, "coverage {pct}");
        assert_eq!(report.metrics.num_strips, 1);
    }

    #[test]
    fn unregistered_strip_is_malformed() {
        let p = plan(vec![strip_obs("o1", "ghost")], vec![]);
        assert!(matches!(
            verify_regional_coverage(&p, &requirements(10.0, 0.0), &cfg()),
            Err(PlanError::MalformedInput(_))
        ));
    }

    #[test]
    fn missing_swath_is_malformed() {
        let p = plan(
            vec![strip_obs("o1", "s1")],
            vec![RegisteredStrip {
                id: "s1".into(),
                points: vec![[0.0, 0.5]],
            }],
        );
        let mut req = requirements(10.0, 0.0);
        req.regional_coverage.satellite_swaths_km.clear();
        assert!(verify_regional_coverage(&p, &req, &cfg()).is_err());

        req.regional_coverage.default_swath_km = Some(10.0);
        assert!(verify_regional_coverage(&p, &req, &cfg()).is_ok());
    }

    #[test]
    fn swath_falls_back_to_plan_metadata() {
        let mut p = plan(
            vec![strip_obs("o1", "s1")],
            vec![RegisteredStrip {
                id: "s1".into(),
                points: vec![[0.0, 0.5], [1.0, 0.5]],
            }],
        );
        p.metadata.satellite_swaths_km.insert("sat-1".into(), 30.0);
        let mut req = requirements(10.0, 0.0);
        req.regional_coverage.satellite_swaths_km.clear();
        req.regional_coverage.default_swath_km = Some(5.0);

        let strips = derive_strips(&p, &req.regional_coverage).unwrap();
        assert_eq!(strips[0].swath_km, 30.0);

        // Requirements still win over the plan.
        req.regional_coverage.satellite_swaths_km.insert("sat-1".into(), 12.0);
        let strips = derive_strips(&p, &req.regional_coverage).unwrap();
        assert_eq!(strips[0].swath_km, 12.0);
    }

    #[test]
    fn degenerate_polygon_is_malformed() {
        let p = plan(vec![], vec![]);
        let mut req = requirements(10.0, 0.0);
        req.regional_coverage.polygons[0].vertices.truncate(2);
        assert!(verify_regional_coverage(&p, &req, &cfg()).is_err());
    }

    #[test]
    fn files_report_error_for_garbage_requirements() {
        let dir = TempDir::new().unwrap();
        let plan_path = dir.path().join("plan.json");
        let req_path = dir.path().join("req.json");
        plan(vec![], vec![]).save(&plan_path).unwrap();
        std::fs::write(&req_path, "{not json").unwrap();

        let out = verify_coverage_files(&plan_path, &req_path, &cfg());
        assert!(!out.is_valid());
        assert!(matches!(out, VerifierOutput::Failed { .. }));
    }
}
