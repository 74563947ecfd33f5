use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::{
    metrics::SYNC_REPLAY_TICKS_TOTAL,
    models::SyncStatus,
    services::{
        evaluation_cache::EvaluationCache, submission_repository::SubmissionRepository,
        sync_reporter::SyncReporter,
    },
};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReplaySummary {
    pub scanned: usize,
    pub synced: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Re-runs the sync reporter for submissions whose last sync failed, and
/// sweeps expired evaluation cache entries while it is at it.
pub struct SyncReplayWorker {
    repository: Arc<dyn SubmissionRepository>,
    reporter: SyncReporter,
    cache: Option<EvaluationCache>,
    interval: Duration,
    batch_size: i64,
}

impl SyncReplayWorker {
    pub fn new(
        repository: Arc<dyn SubmissionRepository>,
        reporter: SyncReporter,
        interval: Duration,
        batch_size: i64,
    ) -> Self {
        Self {
            repository,
            reporter,
            cache: None,
            interval,
            batch_size,
        }
    }

    pub fn with_cache(mut self, cache: EvaluationCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub async fn run(&self) -> Result<()> {
        info!(
            "Starting sync replay worker loop (interval {}s, batch {})",
            self.interval.as_secs(),
            self.batch_size
        );

        loop {
            match self.run_once().await {
                Ok(summary) => {
                    SYNC_REPLAY_TICKS_TOTAL.with_label_values(&["success"]).inc();
                    if summary.scanned > 0 {
                        info!(
                            scanned = summary.scanned,
                            synced = summary.synced,
                            failed = summary.failed,
                            skipped = summary.skipped,
                            "Sync replay tick completed"
                        );
                    }
                }
                Err(err) => {
                    SYNC_REPLAY_TICKS_TOTAL.with_label_values(&["error"]).inc();
                    warn!(error = %err, "Sync replay tick failed");
                }
            }

            sleep(self.interval).await;
        }
    }

    pub async fn run_once(&self) -> Result<ReplaySummary> {
        let mut summary = ReplaySummary::default();

        for submission in self.repository.list_failed_syncs(self.batch_size).await? {
            summary.scanned += 1;

            let Some(band_score) = submission.band_score else {
                summary.skipped += 1;
                continue;
            };
            let Some(exercise) = self.repository.get_exercise(&submission.exercise_id).await?
            else {
                warn!(
                    submission_id = %submission.id,
                    exercise_id = %submission.exercise_id,
                    "Exercise missing; cannot replay sync"
                );
                summary.skipped += 1;
                continue;
            };

            match self
                .reporter
                .report_result(&submission.id, &exercise, band_score)
                .await
            {
                Ok(SyncStatus::Synced) => summary.synced += 1,
                Ok(_) => summary.failed += 1,
                Err(err) => {
                    warn!(submission_id = %submission.id, error = %err, "Sync replay failed");
                    summary.failed += 1;
                }
            }
        }

        if let Some(cache) = &self.cache {
            if let Err(err) = cache.purge_expired().await {
                warn!(error = %err, "Evaluation cache purge failed");
            }
        }

        Ok(summary)
    }
}
