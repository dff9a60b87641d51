//! Pipeline stage façade
//!
//! The scheduling loop, task queueing, and liveness sweeps belong to an
//! external supervisor; this crate only signals per-stage success or
//! failure with enough classification for the supervisor to decide whether
//! re-queueing the stage could help.

use crate::TributaryError;

/// Pipeline stages, run sequentially within one pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Extract,
    Transform,
    Transfer,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Extract => "extract",
            Stage::Transform => "transform",
            Stage::Transfer => "transfer",
        }
    }
}

/// Captured failure of one stage
#[derive(Debug, Clone)]
pub struct StageError {
    /// Whether re-queueing the stage later could succeed
    pub fatal: bool,
    /// Error variant name, mirrored into task bookkeeping
    pub error_type: &'static str,
    pub message: String,
}

/// Result of running one stage
#[derive(Debug, Clone)]
pub struct StageOutcome {
    pub stage: Stage,
    pub error: Option<StageError>,
}

impl StageOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Converts a stage result into a reportable outcome, logging it
pub fn outcome(stage: Stage, result: &crate::Result<()>) -> StageOutcome {
    match result {
        Ok(()) => {
            tracing::info!("Stage {} completed", stage.as_str());
            StageOutcome { stage, error: None }
        }
        Err(err) => {
            tracing::error!("Stage {} failed: {}", stage.as_str(), err);
            StageOutcome {
                stage,
                error: Some(StageError {
                    fatal: err.is_fatal(),
                    error_type: error_type(err),
                    message: err.to_string(),
                }),
            }
        }
    }
}

fn error_type(err: &TributaryError) -> &'static str {
    match err {
        TributaryError::Config(_) => "Config",
        TributaryError::Http { .. } => "Http",
        TributaryError::ClientStatus { .. } => "ClientStatus",
        TributaryError::RetryExhausted { .. } => "RetryExhausted",
        TributaryError::IterationCap { .. } => "IterationCap",
        TributaryError::MissingField { .. } => "MissingField",
        TributaryError::SchemaDriftExhausted { .. } => "SchemaDriftExhausted",
        TributaryError::UnsupportedDestination(_) => "UnsupportedDestination",
        TributaryError::Database(_) => "Database",
        TributaryError::State(_) => "State",
        TributaryError::Json(_) => "Json",
        TributaryError::Xml(_) => "Xml",
        TributaryError::Io(_) => "Io",
        TributaryError::UrlParse(_) => "UrlParse",
        TributaryError::Reqwest(_) => "Reqwest",
    }
}
