use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge, Encoder, HistogramVec,
    IntCounterVec, IntGauge, TextEncoder,
};

lazy_static! {
    // HTTP Metrics
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "http_requests_total",
        "Total number of HTTP requests",
        &["method", "path", "status"]
    )
    .unwrap();

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds",
        &["method", "path"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .unwrap();

    // Database Metrics (MongoDB)
    pub static ref DB_OPERATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "db_operations_total",
        "Total number of database operations",
        &["operation", "collection", "status"]
    )
    .unwrap();

    pub static ref DB_OPERATION_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "db_operation_duration_seconds",
        "Database operation duration in seconds",
        &["operation", "collection"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .unwrap();

    // Cache Metrics (Redis)
    pub static ref CACHE_OPERATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "cache_operations_total",
        "Total number of cache operations",
        &["operation", "status"]
    )
    .unwrap();

    pub static ref AI_CACHE_LOOKUPS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "ai_cache_lookups_total",
        "AI evaluation cache lookups",
        &["result"]
    )
    .unwrap();

    // Grading Metrics
    pub static ref SUBMISSIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "submissions_total",
        "Total number of accepted submissions",
        &["skill"]
    )
    .unwrap();

    pub static ref EVALUATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "evaluations_total",
        "AI evaluations that reached a terminal state",
        &["skill", "status"]
    )
    .unwrap();

    pub static ref EVALUATION_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "evaluation_duration_seconds",
        "Wall time of a background evaluation pipeline",
        &["skill"],
        vec![0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]
    )
    .unwrap();

    pub static ref RETRY_ATTEMPTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "retry_attempts_total",
        "Attempts made by the retry executor",
        &["operation", "outcome"]
    )
    .unwrap();

    pub static ref USER_SERVICE_SYNC_TOTAL: IntCounterVec = register_int_counter_vec!(
        "user_service_sync_total",
        "Results reported to the user service",
        &["status"]
    )
    .unwrap();

    pub static ref BACKGROUND_TASKS_ACTIVE: IntGauge = register_int_gauge!(
        "background_tasks_active",
        "Number of background tasks currently running"
    )
    .unwrap();

    pub static ref SYNC_REPLAY_TICKS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "sync_replay_worker_ticks_total",
        "Total number of sync replay worker ticks",
        &["status"]
    )
    .unwrap();
}

/// Renders all metrics in Prometheus text format
pub fn render_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer)
        .map_err(|e| prometheus::Error::Msg(format!("Failed to convert metrics to UTF-8: {}", e)))
}

/// Helper: track database operation with metrics
pub async fn track_db_operation<F, T>(
    operation: &str,
    collection: &str,
    future: F,
) -> Result<T, anyhow::Error>
where
    F: std::future::Future<Output = Result<T, anyhow::Error>>,
{
    let start = std::time::Instant::now();
    let result = future.await;
    let duration = start.elapsed().as_secs_f64();

    let status = if result.is_ok() { "success" } else { "error" };

    DB_OPERATIONS_TOTAL
        .with_label_values(&[operation, collection, status])
        .inc();

    DB_OPERATION_DURATION_SECONDS
        .with_label_values(&[operation, collection])
        .observe(duration);

    result
}

/// Helper: track cache operation with metrics
pub async fn track_cache_operation<F, T>(operation: &str, future: F) -> Result<T, anyhow::Error>
where
    F: std::future::Future<Output = Result<T, anyhow::Error>>,
{
    let result = future.await;
    let status = if result.is_ok() { "success" } else { "error" };

    CACHE_OPERATIONS_TOTAL
        .with_label_values(&[operation, status])
        .inc();

    result
}

pub fn record_cache_hit() {
    AI_CACHE_LOOKUPS_TOTAL.with_label_values(&["hit"]).inc();
}

pub fn record_cache_miss() {
    AI_CACHE_LOOKUPS_TOTAL.with_label_values(&["miss"]).inc();
}
