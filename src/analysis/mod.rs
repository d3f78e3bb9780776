pub mod dto;
pub mod handlers;
pub mod ledger;
#[cfg(test)]
pub mod memory;
pub mod repo;
pub mod repo_types;
pub mod services;

use crate::state::AppState;
use axum::Router;

pub use repo::{AnalysisStore, PgAnalysisStore};
pub use services::{AnalysisOutcome, AnalysisPipeline, AnalysisRequest};

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(handlers::analysis_routes())
        .merge(handlers::ledger_routes())
}
