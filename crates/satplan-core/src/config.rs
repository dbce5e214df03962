use crate::error::{PlanError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const CONFIG_FILE: &str = "satplan.yaml";

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// SlewPolicy
// ---------------------------------------------------------------------------

/// What to do when a slew check cannot be evaluated, either because an
/// attitude is unresolved or because the satellite has no usable slew bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlewPolicy {
    /// Treat the pair as conflicting.
    #[default]
    FailClosed,
    /// Treat the pair as compatible.
    Lenient,
}

// ---------------------------------------------------------------------------
// Section configs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageConfig {
    #[serde(default = "default_grid_resolution")]
    pub grid_resolution: usize,
}

fn default_grid_resolution() -> usize {
    200
}

impl Default for CoverageConfig {
    fn default() -> Self {
        Self {
            grid_resolution: default_grid_resolution(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_true")]
    pub saturate_at_zero: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            saturate_at_zero: true,
        }
    }
}

fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// PlannerConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannerConfig {
    #[serde(default)]
    pub slew_policy: SlewPolicy,
    #[serde(default = "default_time_tolerance")]
    pub time_tolerance_s: f64,
    #[serde(default)]
    pub coverage: CoverageConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

fn default_time_tolerance() -> f64 {
    1e-6
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            slew_policy: SlewPolicy::default(),
            time_tolerance_s: default_time_tolerance(),
            coverage: CoverageConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl PlannerConfig {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(PlanError::MalformedInput(format!(
                "config not found: {}",
                path.display()
            )));
        }
        let data = std::fs::read_to_string(path)?;
        if data.trim().is_empty() {
            return Ok(Self::default());
        }
        let cfg: PlannerConfig = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    /// Load `path` if given, otherwise `satplan.yaml` in the working
    /// directory if present, otherwise defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => {
                let local = Path::new(CONFIG_FILE);
                if local.exists() {
                    Self::load(local)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(path, data.as_bytes())
    }

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if !self.time_tolerance_s.is_finite() || self.time_tolerance_s < 0.0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: format!(
                    "time_tolerance_s must be a non-negative number, got {}",
                    self.time_tolerance_s
                ),
            });
        } else if self.time_tolerance_s > 1.0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "time_tolerance_s={} hides conflicts shorter than a second",
                    self.time_tolerance_s
                ),
            });
        }

        if self.coverage.grid_resolution == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "coverage.grid_resolution must be at least 1".to_string(),
            });
        } else if self.coverage.grid_resolution < 20 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "coverage.grid_resolution={} gives coarse coverage estimates",
                    self.coverage.grid_resolution
                ),
            });
        } else if self.coverage.grid_resolution > 2000 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "coverage.grid_resolution={} is slow for large polygon sets",
                    self.coverage.grid_resolution
                ),
            });
        }

        if self.slew_policy == SlewPolicy::Lenient {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "slew_policy=lenient accepts observation pairs whose slew cannot be verified"
                    .to_string(),
            });
        }

        warnings
    }

    pub fn has_errors(&self) -> bool {
        self.validate().iter().any(|w| w.level == WarnLevel::Error)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
