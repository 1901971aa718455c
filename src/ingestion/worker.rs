//! Bounded ingestion queue and worker pool
//!
//! Post-response work runs here so slow extraction never occupies request
//! capacity. The queue is bounded; on overflow the oldest pending job is
//! dropped (with a log line) rather than blocking the request path.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

use super::{IngestionPipeline, TurnEnvelope};

pub struct IngestionQueue {
    jobs: Mutex<VecDeque<TurnEnvelope>>,
    notify: Notify,
    depth: usize,
    in_flight: AtomicUsize,
    dropped: AtomicUsize,
}

impl IngestionQueue {
    pub fn new(depth: usize) -> Arc<Self> {
        Arc::new(Self {
            jobs: Mutex::new(VecDeque::with_capacity(depth)),
            notify: Notify::new(),
            depth: depth.max(1),
            in_flight: AtomicUsize::new(0),
            dropped: AtomicUsize::new(0),
        })
    }

    /// Enqueue a job, evicting the oldest pending one on overflow.
    pub fn enqueue(&self, job: TurnEnvelope) {
        {
            let mut jobs = self.jobs.lock().expect("ingestion queue poisoned");
            if jobs.len() >= self.depth {
                if let Some(evicted) = jobs.pop_front() {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        tenant_id = %evicted.tenant_id,
                        request_id = %evicted.request_id,
                        "ingestion queue full, dropping oldest pending job"
                    );
                }
            }
            jobs.push_back(job);
        }
        self.notify.notify_one();
    }

    /// Wait for the next job. Marks it in-flight before returning.
    async fn next(&self) -> TurnEnvelope {
        loop {
            {
                let mut jobs = self.jobs.lock().expect("ingestion queue poisoned");
                if let Some(job) = jobs.pop_front() {
                    self.in_flight.fetch_add(1, Ordering::SeqCst);
                    if !jobs.is_empty() {
                        // Forward the wakeup so a sibling worker picks up
                        // the rest of the backlog
                        self.notify.notify_one();
                    }
                    return job;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Take a job without waiting.
    fn try_next(&self) -> Option<TurnEnvelope> {
        let mut jobs = self.jobs.lock().expect("ingestion queue poisoned");
        let job = jobs.pop_front();
        if job.is_some() {
            self.in_flight.fetch_add(1, Ordering::SeqCst);
        }
        job
    }

    fn finish(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    /// Queued plus in-flight jobs.
    pub fn pending(&self) -> usize {
        let queued = self.jobs.lock().expect("ingestion queue poisoned").len();
        queued + self.in_flight.load(Ordering::SeqCst)
    }

    /// Jobs evicted due to backpressure since startup.
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Wait until every enqueued job has been processed.
    pub async fn drain(&self) {
        while self.pending() > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

/// Spawn the worker pool. Workers stop when `shutdown` flips to true,
/// after finishing the current job and draining the remaining backlog.
pub fn spawn_workers(
    queue: Arc<IngestionQueue>,
    pipeline: Arc<IngestionPipeline>,
    count: usize,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    (0..count.max(1))
        .map(|worker_id| {
            let queue = queue.clone();
            let pipeline = pipeline.clone();
            let mut shutdown = shutdown.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        job = queue.next() => {
                            run_job(&pipeline, &queue, job).await;
                        }
                        _ = shutdown.changed() => {
                            if *shutdown.borrow() {
                                while let Some(job) = queue.try_next() {
                                    run_job(&pipeline, &queue, job).await;
                                }
                                tracing::debug!(worker_id, "ingestion worker stopped");
                                break;
                            }
                        }
                    }
                }
            })
        })
        .collect()
}

async fn run_job(pipeline: &IngestionPipeline, queue: &IngestionQueue, job: TurnEnvelope) {
    let tenant_id = job.tenant_id.clone();
    let request_id = job.request_id.clone();
    if let Err(e) = pipeline.run(job).await {
        tracing::error!(
            tenant_id = %tenant_id,
            request_id = %request_id,
            error = %e,
            "turn ingestion failed"
        );
    }
    queue.finish();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(request_id: &str) -> TurnEnvelope {
        TurnEnvelope {
            tenant_id: "t1".to_string(),
            session_id: "s1".to_string(),
            user_id: None,
            request_id: request_id.to_string(),
            user_message: "hello".to_string(),
            assistant_message: "hi".to_string(),
            context_text: None,
            metadata: serde_json::json!({}),
            prompt_tokens: 1,
            completion_tokens: 1,
            knowledge_tokens: 0,
        }
    }

    #[tokio::test]
    async fn overflow_drops_oldest() {
        let queue = IngestionQueue::new(2);
        queue.enqueue(envelope("r1"));
        queue.enqueue(envelope("r2"));
        queue.enqueue(envelope("r3"));

        assert_eq!(queue.dropped(), 1);
        let first = queue.try_next().unwrap();
        assert_eq!(first.request_id, "r2");
    }

    #[tokio::test]
    async fn pending_counts_queued_and_in_flight() {
        let queue = IngestionQueue::new(4);
        queue.enqueue(envelope("r1"));
        queue.enqueue(envelope("r2"));
        assert_eq!(queue.pending(), 2);

        let _job = queue.try_next().unwrap();
        // One dequeued but still in flight
        assert_eq!(queue.pending(), 2);
        queue.finish();
        assert_eq!(queue.pending(), 1);
    }
}
