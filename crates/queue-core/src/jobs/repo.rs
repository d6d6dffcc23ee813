// crates/queue-core/src/jobs/repo.rs
use crate::jobs::model::{Job, JobState, NewJob};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

/// Result of an `enqueue` call: either the row that was inserted, or the
/// existing active row with the same dedupe key (§4.1 `InsertJob`).
pub enum EnqueueOutcome {
    Inserted(Job),
    Existing(Job),
}

impl EnqueueOutcome {
    pub fn job(&self) -> &Job {
        match self {
            EnqueueOutcome::Inserted(j) => j,
            EnqueueOutcome::Existing(j) => j,
        }
    }

    pub fn into_job(self) -> Job {
        match self {
            EnqueueOutcome::Inserted(j) => j,
            EnqueueOutcome::Existing(j) => j,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct JobFilters {
    pub state: Option<String>,
    pub job_type: Option<String>,
    pub project_id: Option<String>,
    pub text: Option<String>,
}

#[derive(Clone)]
pub struct JobsRepo {
    pool: PgPool,
}

impl JobsRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // ----------------------------
    // Enqueue
    // ----------------------------

    /// Inserts a queued job. If `dedupe_key` collides with an active row, returns
    /// that existing row instead (idempotent enqueue, §4.1).
    pub async fn enqueue(&self, job: NewJob) -> anyhow::Result<EnqueueOutcome> {
        let dedupe_active = job.dedupe_key.as_ref().map(|_| "active".to_string());

        let inserted = sqlx::query_as::<_, Job>(
            r#"
            INSERT INTO queue_jobs (
                job_type, project_id, payload_json, priority, attempts, max_attempts,
                run_at, state, dedupe_key, dedupe_active
            )
            VALUES ($1, $2, $3, $4, 0, $5, $6, $7, $8, $9)
            ON CONFLICT (dedupe_key) WHERE dedupe_active = 'active' DO NOTHING
            RETURNING *
            "#,
        )
        .bind(&job.job_type)
        .bind(&job.project_id)
        .bind(&job.payload_json)
        .bind(job.priority)
        .bind(job.max_attempts)
        .bind(job.run_at)
        .bind(JobState::Queued.as_str())
        .bind(&job.dedupe_key)
        .bind(&dedupe_active)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = inserted {
            return Ok(EnqueueOutcome::Inserted(row));
        }

        // Conflict: a row with this dedupe key is already active. Return it.
        let existing = sqlx::query_as::<_, Job>(
            "SELECT * FROM queue_jobs WHERE dedupe_key = $1 AND dedupe_active = 'active'",
        )
        .bind(&job.dedupe_key)
        .fetch_one(&self.pool)
        .await?;

        Ok(EnqueueOutcome::Existing(existing))
    }

    // ----------------------------
    // Reads
    // ----------------------------

    pub async fn get_job(&self, job_id: Uuid) -> anyhow::Result<Option<Job>> {
        let job = sqlx::query_as::<_, Job>("SELECT * FROM queue_jobs WHERE id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(job)
    }

    pub async fn list_jobs(
        &self,
        filters: &JobFilters,
        limit: i64,
        offset: i64,
    ) -> anyhow::Result<Vec<Job>> {
        let limit = limit.clamp(1, 500);
        let rows = sqlx::query_as::<_, Job>(
            r#"
            SELECT * FROM queue_jobs
            WHERE ($1::text IS NULL OR state = $1)
              AND ($2::text IS NULL OR job_type = $2)
              AND ($3::text IS NULL OR project_id = $3)
              AND ($4::text IS NULL OR payload_json::text ILIKE '%' || $4 || '%'
                   OR last_error ILIKE '%' || $4 || '%')
            ORDER BY created_at DESC, id DESC
            LIMIT $5 OFFSET $6
            "#,
        )
        .bind(&filters.state)
        .bind(&filters.job_type)
        .bind(&filters.project_id)
        .bind(&filters.text)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn count_jobs(&self, filters: &JobFilters) -> anyhow::Result<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM queue_jobs
            WHERE ($1::text IS NULL OR state = $1)
              AND ($2::text IS NULL OR job_type = $2)
              AND ($3::text IS NULL OR project_id = $3)
              AND ($4::text IS NULL OR payload_json::text ILIKE '%' || $4 || '%'
                   OR last_error ILIKE '%' || $4 || '%')
            "#,
        )
        .bind(&filters.state)
        .bind(&filters.job_type)
        .bind(&filters.project_id)
        .bind(&filters.text)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    // ----------------------------
    // Claimer (§4.2) — one atomic statement.
    // ----------------------------

    /// Finds the highest-priority eligible queued job and leases it to `worker_id`,
    /// all in one round trip. Returns `None` when nothing is eligible.
    pub async fn claim_next_job(&self, worker_id: &str, lease_ms: i64) -> anyhow::Result<Option<Job>> {
        let leased = sqlx::query_as::<_, Job>(
            r#"
            UPDATE queue_jobs
            SET state = 'running',
                locked_at = now(),
                locked_by = $1,
                lock_expires_at = now() + ($2::bigint * interval '1 millisecond'),
                attempts = attempts + 1,
                updated_at = now()
            WHERE id = (
                SELECT id FROM queue_jobs
                WHERE state = 'queued'
                  AND run_at <= now()
                  AND attempts < max_attempts
                  AND (lock_expires_at IS NULL OR lock_expires_at < now())
                  AND (
                        project_id IS NULL
                        OR NOT EXISTS (
                            SELECT 1 FROM queue_jobs other
                            WHERE other.project_id = queue_jobs.project_id
                              AND other.state = 'running'
                        )
                      )
                ORDER BY priority DESC, run_at ASC, created_at ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING *
            "#,
        )
        .bind(worker_id)
        .bind(lease_ms)
        .fetch_optional(&self.pool)
        .await?;

        Ok(leased)
    }

    // ----------------------------
    // Lifecycle support (§4.1, §4.3)
    // ----------------------------

    pub async fn update_lease_expiry(
        &self,
        job_id: Uuid,
        worker_id: &str,
        new_expiry: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        let res = sqlx::query(
            r#"
            UPDATE queue_jobs
            SET lock_expires_at = $3, updated_at = now()
            WHERE id = $1 AND locked_by = $2 AND state = 'running'
            "#,
        )
        .bind(job_id)
        .bind(worker_id)
        .bind(new_expiry)
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected() > 0)
    }

    pub async fn transition_to_terminal(
        &self,
        job_id: Uuid,
        worker_id: &str,
        state: JobState,
        last_error: Option<&str>,
    ) -> anyhow::Result<bool> {
        let cancelled_at = matches!(state, JobState::Cancelled).then(Utc::now);

        let res = sqlx::query(
            r#"
            UPDATE queue_jobs
            SET state = $3,
                last_error = COALESCE($4, last_error),
                locked_at = NULL,
                locked_by = NULL,
                lock_expires_at = NULL,
                dedupe_active = NULL,
                cancelled_at = COALESCE($5, cancelled_at),
                updated_at = now()
            WHERE id = $1 AND locked_by = $2 AND state = 'running'
            "#,
        )
        .bind(job_id)
        .bind(worker_id)
        .bind(state.as_str())
        .bind(last_error)
        .bind(cancelled_at)
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected() > 0)
    }

    /// Retry: back to `queued`, new `run_at`, attempts untouched, `last_error` stored.
    pub async fn retry_job(
        &self,
        job_id: Uuid,
        worker_id: &str,
        new_run_at: DateTime<Utc>,
        last_error: &str,
    ) -> anyhow::Result<bool> {
        let res = sqlx::query(
            r#"
            UPDATE queue_jobs
            SET state = 'queued',
                run_at = $3,
                last_error = $4,
                locked_at = NULL,
                locked_by = NULL,
                lock_expires_at = NULL,
                updated_at = now()
            WHERE id = $1 AND locked_by = $2 AND state = 'running'
            "#,
        )
        .bind(job_id)
        .bind(worker_id)
        .bind(new_run_at)
        .bind(last_error)
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected() > 0)
    }

    /// Reschedule: back to `queued`, new `run_at`, **decrement attempts** so the
    /// claim's increment is undone (polling must not burn retry budget, §4.3).
    /// `last_error` is left untouched.
    pub async fn reschedule_job(
        &self,
        job_id: Uuid,
        worker_id: &str,
        new_run_at: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        let res = sqlx::query(
            r#"
            UPDATE queue_jobs
            SET state = 'queued',
                run_at = $3,
                attempts = GREATEST(attempts - 1, 0),
                locked_at = NULL,
                locked_by = NULL,
                lock_expires_at = NULL,
                updated_at = now()
            WHERE id = $1 AND locked_by = $2 AND state = 'running'
            "#,
        )
        .bind(job_id)
        .bind(worker_id)
        .bind(new_run_at)
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected() > 0)
    }

    pub async fn request_cancel(&self, job_id: Uuid) -> anyhow::Result<bool> {
        let res = sqlx::query(
            "UPDATE queue_jobs SET cancel_requested_at = now(), updated_at = now() WHERE id = $1",
        )
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected() > 0)
    }

    pub async fn cancel_queued(&self, job_id: Uuid) -> anyhow::Result<bool> {
        let res = sqlx::query(
            r#"
            UPDATE queue_jobs
            SET state = 'cancelled',
                cancelled_at = now(),
                dedupe_active = NULL,
                updated_at = now()
            WHERE id = $1 AND state = 'queued'
            "#,
        )
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected() > 0)
    }

    pub async fn is_cancel_requested(&self, job_id: Uuid) -> anyhow::Result<bool> {
        let flag: Option<DateTime<Utc>> = sqlx::query_scalar(
            "SELECT cancel_requested_at FROM queue_jobs WHERE id = $1",
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?
        .flatten();
        Ok(flag.is_some())
    }

    /// Bulk move `running` rows whose lease lapsed back to `queued`, without
    /// touching `attempts` or `last_error` (§4.1, §4.9).
    pub async fn expire_leases(&self, now: DateTime<Utc>) -> anyhow::Result<u64> {
        let res = sqlx::query(
            r#"
            UPDATE queue_jobs
            SET state = 'queued',
                locked_at = NULL,
                locked_by = NULL,
                lock_expires_at = NULL,
                updated_at = now()
            WHERE state = 'running'
              AND lock_expires_at IS NOT NULL
              AND lock_expires_at < $1
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected())
    }

    // ----------------------------
    // Admin escape hatches (§4.8)
    // ----------------------------

    pub async fn run_now(&self, job_id: Uuid) -> anyhow::Result<bool> {
        let res = sqlx::query(
            "UPDATE queue_jobs SET run_at = now(), updated_at = now() WHERE id = $1 AND state = 'queued'",
        )
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected() > 0)
    }

    pub async fn force_unlock(&self, job_id: Uuid, synthetic_error: &str) -> anyhow::Result<bool> {
        let res = sqlx::query(
            r#"
            UPDATE queue_jobs
            SET state = 'failed',
                last_error = $2,
                locked_at = NULL,
                locked_by = NULL,
                lock_expires_at = NULL,
                dedupe_active = NULL,
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(synthetic_error)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected() > 0)
    }

    pub async fn delete_job(&self, job_id: Uuid) -> anyhow::Result<bool> {
        let res = sqlx::query(
            "DELETE FROM queue_jobs WHERE id = $1 AND state IN ('succeeded', 'failed', 'cancelled')",
        )
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected() > 0)
    }

    pub async fn delete_jobs_by_state(&self, state: &str) -> anyhow::Result<u64> {
        if !matches!(state, "succeeded" | "failed" | "cancelled") {
            return Ok(0);
        }
        let res = sqlx::query("DELETE FROM queue_jobs WHERE state = $1")
            .bind(state)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected())
    }
}
