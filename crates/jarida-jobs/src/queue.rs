//! Worker pool for re-enrichment jobs.
//!
//! Jobs are enqueued by id, picked up by a fixed set of workers, and run
//! under the shared rate limiter. Transient failures are requeued with
//! backoff up to the attempt cap; everything else fails the job. Finished
//! jobs stay queryable for the retention window, then are swept.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use jarida_common::config::QueueConfig;
use jarida_common::retry::RetryPolicy;
use jarida_common::Result;

use crate::job::{EnrichmentJob, JobState};
use crate::limiter::RateLimiter;

/// The enrichment work itself. The implementation re-reads the tender by
/// id; jobs never carry stale snapshots.
#[async_trait]
pub trait Enricher: Send + Sync + 'static {
    async fn enrich(&self, tender_id: Uuid) -> Result<()>;
}

pub struct EnrichmentQueue {
    jobs:  Mutex<HashMap<Uuid, EnrichmentJob>>,
    tx:    mpsc::UnboundedSender<Uuid>,
    cfg:   QueueConfig,
    retry: RetryPolicy,
}

impl EnrichmentQueue {
    /// Start the queue with `cfg.workers` workers sharing one rate limiter.
    pub fn start(cfg: QueueConfig, enricher: Arc<dyn Enricher>) -> Arc<Self> {
        Self::start_with_backoff(cfg, enricher, RetryPolicy::default())
    }

    pub fn start_with_backoff(
        cfg: QueueConfig,
        enricher: Arc<dyn Enricher>,
        retry: RetryPolicy,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel::<Uuid>();
        let limiter = Arc::new(RateLimiter::new(
            cfg.max_concurrent,
            Duration::from_millis(cfg.min_spacing_ms),
        ));

        let queue = Arc::new(Self { jobs: Mutex::new(HashMap::new()), tx, cfg, retry });

        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        for worker in 0..queue.cfg.workers {
            tokio::spawn(worker_loop(
                worker,
                queue.clone(),
                rx.clone(),
                enricher.clone(),
                limiter.clone(),
            ));
        }
        queue
    }

    /// Queue a record for re-enrichment. Returns the job id for status
    /// lookup.
    pub fn enqueue(&self, tender_id: Uuid) -> Uuid {
        self.sweep();
        let job = EnrichmentJob::new(tender_id);
        let id = job.id;
        self.jobs.lock().unwrap_or_else(|e| e.into_inner()).insert(id, job);
        // Send fails only when all workers are gone; the job then stays
        // queued and visible in status.
        if self.tx.send(id).is_err() {
            warn!(%id, "No workers available for queued job");
        }
        id
    }

    pub fn enqueue_batch(&self, tender_ids: &[Uuid]) -> Vec<Uuid> {
        tender_ids.iter().map(|&t| self.enqueue(t)).collect()
    }

    /// Snapshot of a job's current state, if it is still retained.
    pub fn status(&self, job_id: Uuid) -> Option<EnrichmentJob> {
        self.sweep();
        self.jobs.lock().unwrap_or_else(|e| e.into_inner()).get(&job_id).cloned()
    }

    pub fn pending(&self) -> usize {
        self.jobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|j| !j.state.is_finished())
            .count()
    }

    /// Drop finished jobs older than the retention window.
    fn sweep(&self) {
        let cutoff = Utc::now() - ChronoDuration::hours(self.cfg.retention_hours);
        self.jobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|_, j| !(j.state.is_finished() && j.updated_at <= cutoff));
    }

    fn requeue_after(self: &Arc<Self>, job_id: Uuid, attempt: u32) {
        let delay = self.retry.delay_for(attempt);
        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if queue.tx.send(job_id).is_err() {
                warn!(%job_id, "Requeue failed, workers gone");
            }
        });
    }
}

async fn worker_loop(
    worker: usize,
    queue: Arc<EnrichmentQueue>,
    rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Uuid>>>,
    enricher: Arc<dyn Enricher>,
    limiter: Arc<RateLimiter>,
) {
    loop {
        let job_id = match rx.lock().await.recv().await {
            Some(id) => id,
            None => break,
        };
        run_job(worker, &queue, job_id, enricher.as_ref(), &limiter).await;
    }
}

#[instrument(skip(queue, enricher, limiter), fields(worker))]
async fn run_job(
    worker: usize,
    queue: &Arc<EnrichmentQueue>,
    job_id: Uuid,
    enricher: &dyn Enricher,
    limiter: &RateLimiter,
) {
    let Some((tender_id, attempt)) = ({
        let mut jobs = queue.jobs.lock().unwrap_or_else(|e| e.into_inner());
        jobs.get_mut(&job_id).map(|job| {
            job.start_attempt();
            (job.tender_id, job.attempts)
        })
    }) else {
        // Swept between enqueue and pickup.
        return;
    };

    let result = {
        let _permit = limiter.acquire().await;
        enricher.enrich(tender_id).await
    };

    let mut jobs = queue.jobs.lock().unwrap_or_else(|e| e.into_inner());
    let Some(job) = jobs.get_mut(&job_id) else {
        return;
    };

    match result {
        Ok(()) => {
            job.succeed();
            info!(%job_id, %tender_id, attempt, "Enrichment job succeeded");
        }
        Err(e) => {
            let requeued = job.fail(&e, queue.cfg.max_attempts);
            warn!(
                %job_id,
                %tender_id,
                attempt,
                requeued,
                class = e.class_label(),
                error = %e,
                "Enrichment job attempt failed"
            );
            if requeued {
                drop(jobs);
                queue.requeue_after(job_id, attempt);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jarida_common::JaridaError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast_cfg() -> QueueConfig {
        QueueConfig {
            max_concurrent:  2,
            min_spacing_ms:  0,
            max_attempts:    3,
            retention_hours: 24,
            workers:         2,
        }
    }

    fn fast_backoff() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay:   Duration::from_millis(1),
            max_delay:    Duration::from_millis(4),
        }
    }

    async fn wait_finished(queue: &EnrichmentQueue, id: Uuid) -> EnrichmentJob {
        for _ in 0..200 {
            if let Some(job) = queue.status(id) {
                if job.state.is_finished() {
                    return job;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("job {id} did not finish");
    }

    struct FlakyEnricher {
        calls:         AtomicUsize,
        fail_first_n:  usize,
    }

    #[async_trait]
    impl Enricher for FlakyEnricher {
        async fn enrich(&self, _tender_id: Uuid) -> Result<()> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first_n {
                Err(JaridaError::TransientProvider("rate limited".into()))
            } else {
                Ok(())
            }
        }
    }

    struct RejectingEnricher {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Enricher for RejectingEnricher {
        async fn enrich(&self, _tender_id: Uuid) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(JaridaError::Validation("no record".into()))
        }
    }

    #[tokio::test]
    async fn transient_failures_retried_to_success() {
        let enricher = Arc::new(FlakyEnricher { calls: AtomicUsize::new(0), fail_first_n: 2 });
        let queue = EnrichmentQueue::start_with_backoff(fast_cfg(), enricher.clone(), fast_backoff());

        let id = queue.enqueue(Uuid::new_v4());
        let job = wait_finished(&queue, id).await;
        assert_eq!(job.state, JobState::Succeeded);
        assert_eq!(job.attempts, 3);
        assert_eq!(enricher.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn terminal_error_fails_on_first_attempt() {
        let enricher = Arc::new(RejectingEnricher { calls: AtomicUsize::new(0) });
        let queue = EnrichmentQueue::start_with_backoff(fast_cfg(), enricher.clone(), fast_backoff());

        let id = queue.enqueue(Uuid::new_v4());
        let job = wait_finished(&queue, id).await;
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.attempts, 1);
        assert_eq!(job.error_class, Some("validation"));
        assert_eq!(enricher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn attempts_exhausted_fails_with_last_error() {
        let enricher = Arc::new(FlakyEnricher { calls: AtomicUsize::new(0), fail_first_n: 99 });
        let queue = EnrichmentQueue::start_with_backoff(fast_cfg(), enricher.clone(), fast_backoff());

        let id = queue.enqueue(Uuid::new_v4());
        let job = wait_finished(&queue, id).await;
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.attempts, 3);
        assert!(job.last_error.unwrap().contains("rate limited"));
    }

    #[tokio::test]
    async fn finished_jobs_expire_after_retention() {
        let enricher = Arc::new(FlakyEnricher { calls: AtomicUsize::new(0), fail_first_n: 0 });
        let cfg = QueueConfig { retention_hours: 0, ..fast_cfg() };
        let queue = EnrichmentQueue::start_with_backoff(cfg, enricher, fast_backoff());

        let id = queue.enqueue(Uuid::new_v4());
        // Retention zero: the first sweep after completion removes the job,
        // so it disappears instead of reporting a finished state.
        for _ in 0..200 {
            if queue.status(id).is_none() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("finished job was never swept");
    }

    #[tokio::test]
    async fn unknown_job_id_has_no_status() {
        let enricher = Arc::new(FlakyEnricher { calls: AtomicUsize::new(0), fail_first_n: 0 });
        let queue = EnrichmentQueue::start_with_backoff(fast_cfg(), enricher, fast_backoff());
        assert!(queue.status(Uuid::new_v4()).is_none());
    }

    #[tokio::test]
    async fn batch_enqueue_returns_one_id_per_record() {
        let enricher = Arc::new(FlakyEnricher { calls: AtomicUsize::new(0), fail_first_n: 0 });
        let queue = EnrichmentQueue::start_with_backoff(fast_cfg(), enricher, fast_backoff());
        let targets: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();
        let ids = queue.enqueue_batch(&targets);
        assert_eq!(ids.len(), 4);
        for id in ids {
            wait_finished(&queue, id).await;
        }
    }
}
