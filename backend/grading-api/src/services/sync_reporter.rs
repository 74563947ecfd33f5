use std::sync::Arc;

use anyhow::{anyhow, Result};

use crate::metrics::USER_SERVICE_SYNC_TOTAL;
use crate::models::{Exercise, SyncPayload, SyncStatus};
use crate::services::submission_repository::SubmissionRepository;
use crate::services::user_service_client::UserServiceClient;
use crate::utils::retry::{retry_async_with_config, RetryConfig};

/// Propagates finished grades to the user service. Failure is recorded on the
/// submission and never bubbles into grading.
#[derive(Clone)]
pub struct SyncReporter {
    repository: Arc<dyn SubmissionRepository>,
    user_service: Arc<dyn UserServiceClient>,
    retry: RetryConfig,
}

impl SyncReporter {
    pub fn new(
        repository: Arc<dyn SubmissionRepository>,
        user_service: Arc<dyn UserServiceClient>,
    ) -> Self {
        Self {
            repository,
            user_service,
            retry: RetryConfig::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub async fn report_result(
        &self,
        submission_id: &str,
        exercise: &Exercise,
        band_score: f64,
    ) -> Result<SyncStatus> {
        let submission = self
            .repository
            .get_submission(submission_id)
            .await?
            .ok_or_else(|| anyhow!("Submission {} not found", submission_id))?;

        let payload = SyncPayload::build(&submission, exercise, band_score);
        if let SyncPayload::Official(result) = &payload {
            if let Err(e) = result.validate() {
                tracing::error!(submission_id, error = %e, "Refusing to sync invalid official result");
                self.repository
                    .mark_sync_failed(submission_id, &e.to_string(), 0)
                    .await?;
                USER_SERVICE_SYNC_TOTAL.with_label_values(&["failed"]).inc();
                return Ok(SyncStatus::Failed);
            }
        }

        let user_id = submission.user_id.as_str();
        let mut attempts = 0;
        let outcome = retry_async_with_config(&self.retry, "user_service.sync", || {
            attempts += 1;
            let payload = &payload;
            async move {
                match payload {
                    SyncPayload::Official(result) => {
                        self.user_service
                            .record_official_test_result(user_id, result)
                            .await
                    }
                    SyncPayload::Practice(activity) => {
                        self.user_service
                            .record_practice_activity(user_id, activity)
                            .await
                    }
                }
            }
        })
        .await;

        match outcome {
            Ok(()) => {
                self.repository
                    .mark_sync_success(submission_id, attempts)
                    .await?;
                USER_SERVICE_SYNC_TOTAL.with_label_values(&["synced"]).inc();
                tracing::info!(
                    submission_id,
                    kind = payload.kind(),
                    attempts,
                    "Synced result to user service"
                );
                Ok(SyncStatus::Synced)
            }
            Err(e) => {
                let tried = e.attempts();
                let message = format!("failed after {} attempts: {:#}", tried, e.into_last());
                tracing::warn!(submission_id, error = %message, "User service sync failed");
                self.repository
                    .mark_sync_failed(submission_id, &message, attempts)
                    .await?;
                USER_SERVICE_SYNC_TOTAL.with_label_values(&["failed"]).inc();
                Ok(SyncStatus::Failed)
            }
        }
    }
}
