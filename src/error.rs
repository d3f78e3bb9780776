use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("session {0} is not in the expected state")]
    InvalidTransition(Uuid),
    #[error("unexpected stored value: {0}")]
    Decode(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Failures surfaced by the analysis pipeline.
///
/// Degraded analyses and nutrient-lookup misses are not errors; they show up
/// as a partial status and fallback data sources on the outcome.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("analysis failed: {0}")]
    AnalysisFailure(String),
    #[error("failed to persist analysis: {0}")]
    Persistence(#[from] StoreError),
}
