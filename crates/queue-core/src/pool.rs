use crate::jobs::{settings::SettingsRepo, HandlerOutcome, JobError, JobLifecycle, JobsRepo};
use crate::registry::{HandlerRegistry, JobContext};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;

#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    pub worker_id: String,
    pub lease_ms: i64,
    pub poll_ms: u64,
    pub heartbeat_ms: u64,
}

/// Process-wide scheduler: polls the Claimer, dispatches to handlers with
/// bounded concurrency, runs heartbeats, classifies outcomes (§4.4).
#[derive(Clone)]
pub struct WorkerPool {
    cfg: WorkerPoolConfig,
    jobs: JobsRepo,
    settings: SettingsRepo,
    lifecycle: JobLifecycle,
    registry: Arc<HandlerRegistry>,
    ctx: JobContext,
}

impl WorkerPool {
    pub fn new(
        cfg: WorkerPoolConfig,
        jobs: JobsRepo,
        settings: SettingsRepo,
        registry: Arc<HandlerRegistry>,
        ctx: JobContext,
    ) -> Self {
        let lifecycle = JobLifecycle::new(jobs.clone());
        Self {
            cfg,
            jobs,
            settings,
            lifecycle,
            registry,
            ctx,
        }
    }

    /// Runs the scheduler loop wrapped in a supervisor that restarts it up to
    /// 3 times with exponential backoff `min(5000, 500 * 2^(restart-1))` ms.
    /// Individual job task failures never bring this down; only a panic in
    /// the loop itself triggers a restart.
    pub async fn run_supervised(self, mut stop_rx: watch::Receiver<bool>) {
        let mut restarts = 0u32;
        loop {
            let pool = self.clone();
            let mut rx = stop_rx.clone();
            let handle = tokio::spawn(async move { pool.scheduler_loop(&mut rx).await });

            match handle.await {
                Ok(()) => return, // clean stop signal
                Err(join_err) => {
                    eprintln!("[{}] worker pool scheduler loop panicked: {join_err}", self.cfg.worker_id);
                    if *stop_rx.borrow() {
                        return;
                    }
                    restarts += 1;
                    if restarts > 3 {
                        eprintln!("[{}] worker pool: exceeded restart budget, giving up", self.cfg.worker_id);
                        return;
                    }
                    let exp = restarts.saturating_sub(1);
                    let delay_ms = (500_u64.saturating_mul(1u64 << exp)).min(5000);
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                }
            }
        }
    }

    async fn scheduler_loop(&self, stop_rx: &mut watch::Receiver<bool>) {
        let mut in_flight: JoinSet<()> = JoinSet::new();

        loop {
            if *stop_rx.borrow() {
                break;
            }

            let concurrency = self
                .settings
                .get()
                .await
                .map(|s| s.concurrency.max(1) as usize)
                .unwrap_or(2);

            while in_flight.len() < concurrency && !*stop_rx.borrow() {
                let paused = self.settings.get().await.map(|s| s.paused).unwrap_or(false);
                if paused {
                    break;
                }

                match self.jobs.claim_next_job(&self.cfg.worker_id, self.cfg.lease_ms).await {
                    Ok(Some(job)) => {
                        let task = self.clone().run_job_task(job);
                        in_flight.spawn(task);
                    }
                    Ok(None) => break,
                    Err(e) => {
                        eprintln!("[{}] claim failed: {e:#}", self.cfg.worker_id);
                        break;
                    }
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(self.cfg.poll_ms)) => {}
                _ = stop_rx.changed() => {}
                Some(_) = in_flight.join_next(), if !in_flight.is_empty() => {}
            }
        }

        while in_flight.join_next().await.is_some() {}
    }

    async fn run_job_task(self, job: crate::jobs::Job) {
        let worker_id = self.cfg.worker_id.clone();
        let (hb_stop_tx, mut hb_stop_rx) = watch::channel(false);

        let heartbeat_handle = {
            let lifecycle = self.lifecycle.clone();
            let job_id = job.id;
            let worker_id = worker_id.clone();
            let lease_ms = self.cfg.lease_ms;
            let interval = Duration::from_millis(self.cfg.heartbeat_ms);
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = tokio::time::sleep(interval) => {
                            if let Err(e) = lifecycle.heartbeat(job_id, &worker_id, lease_ms).await {
                                eprintln!("[{worker_id}] heartbeat failed for job {job_id}: {e:#}");
                            }
                        }
                        _ = hb_stop_rx.changed() => break,
                    }
                }
            })
        };

        let outcome = match self.registry.handler_for(&job.job_type) {
            Some(entry) => entry.run(&job, &self.ctx).await,
            None => HandlerOutcome::Failed(JobError::new(
                "UNKNOWN_JOB_TYPE",
                format!("no handler registered for job_type={}", job.job_type),
            )),
        };

        let _ = hb_stop_tx.send(true);
        let _ = heartbeat_handle.await;

        self.apply_outcome(&job, outcome).await;
    }

    async fn apply_outcome(&self, job: &crate::jobs::Job, outcome: HandlerOutcome) {
        let worker_id = &self.cfg.worker_id;
        let result = match outcome {
            HandlerOutcome::Done => self.lifecycle.complete(job.id, worker_id).await,
            HandlerOutcome::Reschedule(delay) => self.lifecycle.reschedule(job.id, worker_id, delay).await,
            HandlerOutcome::Cancelled => self.lifecycle.cancel(job.id, worker_id).await,
            HandlerOutcome::Failed(err) => {
                if job.attempts < job.max_attempts {
                    let delay = Duration::from_millis(crate::jobs::retry::pool_backoff_ms(job.attempts) as u64);
                    self.lifecycle.retry(job.id, worker_id, delay, &err).await
                } else {
                    self.lifecycle.fail(job.id, worker_id, &err).await
                }
            }
        };

        if let Err(e) = result {
            eprintln!("[{worker_id}] lifecycle transition failed for job {}: {e:#}", job.id);
        }
    }
}
