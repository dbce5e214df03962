use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("malformed input: {0}")]
    MalformedInput(String),

    #[error("satellite not found: {0}")]
    UnknownSatellite(String),

    #[error("action not found: {0}")]
    UnknownAction(String),

    #[error("invalid action '{action_id}': {reason}")]
    InvalidAction { action_id: String, reason: String },

    #[error("invalid id '{0}': must start with an alphanumeric and contain only [A-Za-z0-9_.:-]")]
    InvalidId(String),

    #[error("invalid scenario: {0}")]
    InvalidScenario(String),

    #[error("slew time undefined: {0}")]
    SlewUndefined(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PlanError>;
