use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub mod config;
pub mod extractors;
pub mod handlers;
pub mod ielts;
pub mod metrics;
pub mod middlewares;
pub mod models;
pub mod services;
pub mod utils;

pub use config::Config;
pub use services::AppState;

pub fn create_router(app_state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics_handler))
        .nest("/api/v1/submissions", submission_routes())
        .nest("/api/v1/ai", ai_routes())
        .with_state(app_state)
        .layer(middleware::from_fn(
            middlewares::metrics::metrics_middleware,
        ))
        .layer(middleware::from_fn(
            middlewares::trace::trace_context_middleware,
        ))
        .layer(TraceLayer::new_for_http())
}

fn submission_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/{id}", get(handlers::submissions::get_submission))
        .route("/{id}/submit", post(handlers::submissions::submit_exercise))
}

fn ai_routes() -> Router<Arc<AppState>> {
    Router::new().route(
        "/cache/stats",
        get(handlers::evaluation_cache::cache_statistics),
    )
}
