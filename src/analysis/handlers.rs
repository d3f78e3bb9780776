use std::fmt::Display;

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tracing::{error, instrument, warn};
use uuid::Uuid;

use super::dto::{parse_date, AnalysisUpload, DailyTotalResponse};
use super::repo_types::SessionDetails;
use super::services::AnalysisOutcome;
use crate::{auth::AuthUser, error::AnalysisError, state::AppState, vision::ImageInput};

pub fn analysis_routes() -> Router<AppState> {
    Router::new()
        .route("/analyses", post(create_analysis))
        .route("/analyses/:id", get(get_analysis))
        .layer(DefaultBodyLimit::max(20 * 1024 * 1024)) // 20MB
}

pub fn ledger_routes() -> Router<AppState> {
    Router::new().route("/daily-totals/:date", get(get_daily_total))
}

/// POST /analyses (multipart: image, meal_type?, notes?, meal_date?)
#[instrument(skip(state, mp))]
pub async fn create_analysis(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    mut mp: Multipart,
) -> Result<(StatusCode, Json<AnalysisOutcome>), (StatusCode, String)> {
    let mut upload = AnalysisUpload::default();
    while let Some(field) = mp.next_field().await.map_err(bad_request)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "image" => {
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let data = field.bytes().await.map_err(bad_request)?;
                upload.image = Some(ImageInput::new(data, content_type));
            }
            "meal_type" => upload.meal_type = Some(field.text().await.map_err(bad_request)?),
            "notes" => upload.notes = Some(field.text().await.map_err(bad_request)?),
            "meal_date" => upload.meal_date = Some(field.text().await.map_err(bad_request)?),
            other => warn!(field = other, "ignoring unknown multipart field"),
        }
    }

    let request = upload.into_request(user_id).map_err(|e| {
        warn!(error = %e.message(), "invalid analysis upload");
        (StatusCode::BAD_REQUEST, e.message())
    })?;

    let outcome = state
        .pipeline
        .run_analysis(request)
        .await
        .map_err(analysis_rejection)?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

#[instrument(skip(state))]
pub async fn get_analysis(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionDetails>, (StatusCode, String)> {
    match state.pipeline.store().load_session(user_id, id).await {
        Ok(Some(details)) => Ok(Json(details)),
        Ok(None) => Err((StatusCode::NOT_FOUND, "Analysis not found".into())),
        Err(e) => {
            error!(error = %e, %user_id, %id, "load_session failed");
            Err(internal(e))
        }
    }
}

#[instrument(skip(state))]
pub async fn get_daily_total(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(date): Path<String>,
) -> Result<Json<DailyTotalResponse>, (StatusCode, String)> {
    let date = parse_date(&date)
        .ok_or((StatusCode::BAD_REQUEST, "date must be YYYY-MM-DD".to_string()))?;
    let row = state
        .pipeline
        .store()
        .daily_total(user_id, date)
        .await
        .map_err(|e| {
            error!(error = %e, %user_id, "daily_total failed");
            internal(e)
        })?;
    Ok(Json(DailyTotalResponse::from_ledger(date, row)))
}

fn analysis_rejection(e: AnalysisError) -> (StatusCode, String) {
    match e {
        AnalysisError::AnalysisFailure(reason) => {
            warn!(%reason, "analysis failed");
            (StatusCode::BAD_GATEWAY, format!("analysis failed: {reason}"))
        }
        AnalysisError::Persistence(e) => {
            error!(error = %e, "analysis could not be saved");
            (StatusCode::INTERNAL_SERVER_ERROR, "analysis could not be saved".into())
        }
    }
}

fn bad_request<E: Display>(e: E) -> (StatusCode, String) {
    (StatusCode::BAD_REQUEST, e.to_string())
}

fn internal<E: Display>(e: E) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}
