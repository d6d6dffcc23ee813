use crate::jobs::error_codes::JobError;
use crate::jobs::model::JobState;
use crate::jobs::repo::JobsRepo;
use chrono::{Duration as ChronoDuration, Utc};
use std::time::Duration;
use uuid::Uuid;

/// Mutations a worker performs on a job it holds the lease for (§4.3). Every
/// operation requires `(job_id, worker_id)` and no-ops silently if the lease
/// no longer belongs to `worker_id` — this is the correctness anchor against
/// a stale worker stomping on a job the Recovery Loop already resurrected.
#[derive(Clone)]
pub struct JobLifecycle {
    repo: JobsRepo,
}

impl JobLifecycle {
    pub fn new(repo: JobsRepo) -> Self {
        Self { repo }
    }

    pub async fn heartbeat(&self, job_id: Uuid, worker_id: &str, lease_ms: i64) -> anyhow::Result<bool> {
        let new_expiry = Utc::now() + ChronoDuration::milliseconds(lease_ms);
        self.repo.update_lease_expiry(job_id, worker_id, new_expiry).await
    }

    pub async fn complete(&self, job_id: Uuid, worker_id: &str) -> anyhow::Result<bool> {
        self.repo
            .transition_to_terminal(job_id, worker_id, JobState::Succeeded, None)
            .await
    }

    pub async fn fail(&self, job_id: Uuid, worker_id: &str, err: &JobError) -> anyhow::Result<bool> {
        self.repo
            .transition_to_terminal(job_id, worker_id, JobState::Failed, Some(&err.as_last_error()))
            .await
    }

    pub async fn cancel(&self, job_id: Uuid, worker_id: &str) -> anyhow::Result<bool> {
        self.repo
            .transition_to_terminal(job_id, worker_id, JobState::Cancelled, None)
            .await
    }

    /// Back to `queued`, keep `attempts`, store `last_error`. Used after a
    /// handler fails and `attempts < max_attempts`.
    pub async fn retry(
        &self,
        job_id: Uuid,
        worker_id: &str,
        delay: Duration,
        err: &JobError,
    ) -> anyhow::Result<bool> {
        let next_run_at = Utc::now() + ChronoDuration::milliseconds(delay.as_millis() as i64);
        self.repo
            .retry_job(job_id, worker_id, next_run_at, &err.as_last_error())
            .await
    }

    /// Back to `queued`, decrement `attempts` to undo the claim's increment,
    /// leave `last_error` untouched. Used by "wait" handlers (§4.7).
    pub async fn reschedule(&self, job_id: Uuid, worker_id: &str, delay: Duration) -> anyhow::Result<bool> {
        let next_run_at = Utc::now() + ChronoDuration::milliseconds(delay.as_millis() as i64);
        self.repo.reschedule_job(job_id, worker_id, next_run_at).await
    }
}
