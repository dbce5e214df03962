//! Benchmark verifiers over a committed plan.
//!
//! Verifiers never fail past their file-level entry points: malformed input
//! becomes `{valid: false, error}`. Constraint shortfalls are listed as
//! violations on an otherwise valid report.

pub mod coverage;
pub mod revisit;

pub use coverage::{verify_coverage_files, verify_regional_coverage, CoverageRequirements};
pub use revisit::{verify_revisit, verify_revisit_files, RevisitRequirements};

use crate::error::{PlanError, Result};
use crate::scenario::Horizon;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `meta` block shared by every requirements document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseMeta {
    pub case_id: String,
    pub horizon_start: DateTime<Utc>,
    pub horizon_end: DateTime<Utc>,
}

impl CaseMeta {
    pub fn horizon(&self) -> Result<Horizon> {
        Horizon::new(self.horizon_start, self.horizon_end)
            .map_err(|e| PlanError::MalformedInput(format!("case '{}': {e}", self.case_id)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationReport<M> {
    pub valid: bool,
    pub metrics: M,
    pub violations: Vec<String>,
}

/// Serialized verifier answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VerifierOutput {
    Report(VerificationReport<serde_json::Value>),
    Failed { valid: bool, error: String },
}

impl VerifierOutput {
    pub fn failed(error: impl Into<String>) -> Self {
        VerifierOutput::Failed {
            valid: false,
            error: error.into(),
        }
    }

    pub fn is_valid(&self) -> bool {
        match self {
            VerifierOutput::Report(r) => r.valid,
            VerifierOutput::Failed { .. } => false,
        }
    }

    /// Collapse a typed verifier result, turning any error into `Failed`.
    pub fn from_result<M: Serialize>(result: Result<VerificationReport<M>>) -> Self {
        let report = match result {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "verification failed");
                return Self::failed(e.to_string());
            }
        };
        match serde_json::to_value(&report.metrics) {
            Ok(metrics) => VerifierOutput::Report(VerificationReport {
                valid: report.valid,
                metrics,
                violations: report.violations,
            }),
            Err(e) => Self::failed(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_output_shape() {
        let out = VerifierOutput::failed("boom");
        let json = serde_json::to_value(&out).unwrap();
        assert_eq!(json, serde_json::json!({"valid": false, "error": "boom"}));
        assert!(!out.is_valid());
    }

    #[test]
    fn error_result_collapses_to_failed() {
        let out = VerifierOutput::from_result::<u32>(Err(PlanError::MalformedInput("x".into())));
        assert!(matches!(out, VerifierOutput::Failed { .. }));
    }

    #[test]
    fn report_output_parses_back() {
        let text = r#"{"valid": true, "metrics": {"a": 1}, "violations": []}"#;
        let out: VerifierOutput = serde_json::from_str(text).unwrap();
        assert!(out.is_valid());
    }

    #[test]
    fn inverted_meta_horizon_is_malformed() {
        let meta = CaseMeta {
            case_id: "c".into(),
            horizon_start: "2025-01-02T00:00:00Z".parse().unwrap(),
            horizon_end: "2025-01-01T00:00:00Z".parse().unwrap(),
        };
        assert!(matches!(meta.horizon(), Err(PlanError::MalformedInput(_))));
    }
}
