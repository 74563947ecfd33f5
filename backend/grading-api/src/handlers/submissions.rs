use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use std::sync::Arc;

use super::ApiError;
use crate::{extractors::AppJson, models::SubmitExerciseRequest, services::AppState};

pub async fn submit_exercise(
    State(state): State<Arc<AppState>>,
    Path(submission_id): Path<String>,
    AppJson(req): AppJson<SubmitExerciseRequest>,
) -> Result<impl IntoResponse, ApiError> {
    tracing::info!(submission_id = %submission_id, "Submitting exercise");

    let response = state
        .submissions
        .submit_exercise(&submission_id, req)
        .await?;

    Ok((StatusCode::ACCEPTED, Json(response)))
}

pub async fn get_submission(
    State(state): State<Arc<AppState>>,
    Path(submission_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let submission = state.submissions.get_submission(&submission_id).await?;
    Ok(Json(submission))
}
