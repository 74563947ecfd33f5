use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::{Notify, Semaphore};
use tracing::Instrument;

use crate::metrics::BACKGROUND_TASKS_ACTIVE;

/// Bounded pool for fire-and-forget work. Tasks are spawned immediately but
/// only `concurrency` of them run their body at a time; the rest wait for a
/// permit. A panicking task is reported to its fault handler instead of
/// taking anything else down.
#[derive(Clone)]
pub struct TaskPool {
    permits: Arc<Semaphore>,
    in_flight: Arc<AtomicUsize>,
    idle: Arc<Notify>,
}

impl TaskPool {
    pub fn new(concurrency: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
            in_flight: Arc::new(AtomicUsize::new(0)),
            idle: Arc::new(Notify::new()),
        }
    }

    /// Number of tasks spawned and not yet finished, queued ones included.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn spawn<F, H, HF>(&self, kind: &'static str, submission_id: &str, task: F, on_fault: H)
    where
        F: Future<Output = ()> + Send + 'static,
        H: FnOnce(String) -> HF + Send + 'static,
        HF: Future<Output = ()> + Send + 'static,
    {
        let permits = self.permits.clone();
        let in_flight = self.in_flight.clone();
        let idle = self.idle.clone();
        let span = tracing::info_span!("background_task", kind, submission_id = %submission_id);

        in_flight.fetch_add(1, Ordering::SeqCst);

        tokio::spawn(
            async move {
                // The semaphore is never closed, so acquire only fails on shutdown.
                let _permit = permits.acquire_owned().await.ok();
                BACKGROUND_TASKS_ACTIVE.inc();

                if let Err(panic) = AssertUnwindSafe(task).catch_unwind().await {
                    let message = panic_message(panic.as_ref());
                    tracing::error!(error = %message, "background task panicked");
                    if AssertUnwindSafe(on_fault(message))
                        .catch_unwind()
                        .await
                        .is_err()
                    {
                        tracing::error!("fault handler panicked");
                    }
                }

                BACKGROUND_TASKS_ACTIVE.dec();
                if in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
                    idle.notify_waiters();
                }
            }
            .instrument(span),
        );
    }

    /// Resolves once every spawned task has finished.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.in_flight() == 0 {
                return;
            }
            notified.await;
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
