//! Periodic maintenance jobs
//!
//! Runs the session-summarize sweep, relationship freshness cleanup, and
//! expired-counter purge on cron schedules. `GET /jobs/health` reports the
//! liveness flag maintained here.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio_cron_scheduler::{Job, JobScheduler};

use crate::dialogue::DialogueService;
use crate::error::{Error, Result};
use crate::relationships::RelationshipDiscoverer;
use crate::usage::MemoryCounterStore;

/// Sessions summarized per sweep
const SUMMARIZE_SWEEP_BATCH: i64 = 20;

/// Relationships older than this many days are pruned
const RELATIONSHIP_MAX_AGE_DAYS: i64 = 90;

/// Liveness flag shared with the jobs endpoint
#[derive(Clone, Default)]
pub struct SchedulerStatus {
    running: Arc<AtomicBool>,
}

impl SchedulerStatus {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    fn set_running(&self, value: bool) {
        self.running.store(value, Ordering::Relaxed);
    }
}

pub struct Scheduler {
    inner: JobScheduler,
    status: SchedulerStatus,
}

impl Scheduler {
    pub async fn new(
        dialogue: DialogueService,
        discoverer: RelationshipDiscoverer,
        counters: MemoryCounterStore,
    ) -> Result<Self> {
        let inner = JobScheduler::new()
            .await
            .map_err(|e| Error::Other(format!("Failed to create scheduler: {e}")))?;

        // Session summarize sweep, every 5 minutes
        let dialogue_job = dialogue.clone();
        inner
            .add(
                Job::new_async("0 */5 * * * *", move |_id, _sched| {
                    let dialogue = dialogue_job.clone();
                    Box::pin(async move {
                        match run_summarize_sweep(&dialogue, SUMMARIZE_SWEEP_BATCH).await {
                            Ok(0) => {}
                            Ok(count) => tracing::info!(count, "summarize sweep completed"),
                            Err(e) => tracing::warn!(error = %e, "summarize sweep failed"),
                        }
                    })
                })
                .map_err(|e| Error::Other(format!("Failed to build summarize job: {e}")))?,
            )
            .await
            .map_err(|e| Error::Other(format!("Failed to schedule summarize job: {e}")))?;

        // Relationship cleanup, daily at 03:10 UTC
        inner
            .add(
                Job::new_async("0 10 3 * * *", move |_id, _sched| {
                    let discoverer = discoverer.clone();
                    Box::pin(async move {
                        match discoverer.cleanup_older_than(RELATIONSHIP_MAX_AGE_DAYS).await {
                            Ok(0) => {}
                            Ok(removed) => tracing::info!(removed, "stale relationships pruned"),
                            Err(e) => tracing::warn!(error = %e, "relationship cleanup failed"),
                        }
                    })
                })
                .map_err(|e| Error::Other(format!("Failed to build cleanup job: {e}")))?,
            )
            .await
            .map_err(|e| Error::Other(format!("Failed to schedule cleanup job: {e}")))?;

        // Counter purge, hourly
        inner
            .add(
                Job::new_async("0 0 * * * *", move |_id, _sched| {
                    let counters = counters.clone();
                    Box::pin(async move {
                        let purged = counters.purge_expired();
                        if purged > 0 {
                            tracing::debug!(purged, "expired counters purged");
                        }
                    })
                })
                .map_err(|e| Error::Other(format!("Failed to build purge job: {e}")))?,
            )
            .await
            .map_err(|e| Error::Other(format!("Failed to schedule purge job: {e}")))?;

        Ok(Self {
            inner,
            status: SchedulerStatus::default(),
        })
    }

    pub fn status(&self) -> SchedulerStatus {
        self.status.clone()
    }

    pub async fn start(&self) -> Result<()> {
        self.inner
            .start()
            .await
            .map_err(|e| Error::Other(format!("Failed to start scheduler: {e}")))?;
        self.status.set_running(true);
        tracing::info!("maintenance scheduler started");
        Ok(())
    }

    pub async fn shutdown(&mut self) {
        self.status.set_running(false);
        if let Err(e) = self.inner.shutdown().await {
            tracing::warn!(error = %e, "scheduler shutdown failed");
        }
    }
}

/// Summarize every session currently over a threshold, bounded by `batch`.
pub async fn run_summarize_sweep(dialogue: &DialogueService, batch: i64) -> Result<usize> {
    let due = dialogue.list_due_for_summary(batch).await?;
    let mut summarized = 0usize;
    for (tenant_id, session_id) in due {
        match dialogue.summarize_session(&tenant_id, &session_id).await {
            Ok(Some(_)) => summarized += 1,
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(
                    tenant_id = %tenant_id,
                    session_id = %session_id,
                    error = %e,
                    "session summarization failed"
                );
            }
        }
    }
    Ok(summarized)
}
