use axum::{extract::State, response::IntoResponse, Json};
use std::sync::Arc;

use super::ApiError;
use crate::services::AppState;

pub async fn cache_statistics(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let stats = state.evaluation_cache.statistics().await?;
    Ok(Json(stats))
}
