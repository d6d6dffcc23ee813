mod common;

use common::{insert_job, insert_job_full, job_fields, job_state, setup_db};
use chrono::{Duration as ChronoDuration, Utc};
use queue_core::jobs::{JobError, JobLifecycle, JobsRepo};
use serial_test::serial;
use std::time::Duration;

#[tokio::test]
#[serial]
async fn complete_clears_lock_and_marks_succeeded() {
    let pool = setup_db().await;
    let repo = JobsRepo::new(pool.clone());
    let lifecycle = JobLifecycle::new(repo.clone());

    let job_id = insert_job(&pool, "docker.composeUp", None).await;
    let leased = repo.claim_next_job("worker-a", 30_000).await.unwrap().unwrap();
    assert_eq!(leased.id, job_id);

    assert!(lifecycle.complete(job_id, "worker-a").await.unwrap());

    let (state, _attempts, locked_by, lock_expires_at) = job_fields(&pool, job_id).await;
    assert_eq!(state, "succeeded");
    assert!(locked_by.is_none());
    assert!(lock_expires_at.is_none());
}

#[tokio::test]
#[serial]
async fn fail_is_terminal_and_keeps_last_error() {
    let pool = setup_db().await;
    let repo = JobsRepo::new(pool.clone());
    let lifecycle = JobLifecycle::new(repo.clone());

    let job_id = insert_job(&pool, "docker.composeUp", None).await;
    repo.claim_next_job("worker-a", 30_000).await.unwrap();

    let err = JobError::new("DEPENDENCY_DOWN", "compose exited 1");
    assert!(lifecycle.fail(job_id, "worker-a", &err).await.unwrap());

    assert_eq!(job_state(&pool, job_id).await, "failed");
}

#[tokio::test]
#[serial]
async fn retry_returns_job_to_queue_without_resetting_attempts() {
    let pool = setup_db().await;
    let repo = JobsRepo::new(pool.clone());
    let lifecycle = JobLifecycle::new(repo.clone());

    let job_id = insert_job(&pool, "docker.composeUp", None).await;
    let leased = repo.claim_next_job("worker-a", 30_000).await.unwrap().unwrap();
    assert_eq!(leased.attempts, 1);

    let err = JobError::new("DEPENDENCY_DOWN", "transient failure");
    lifecycle
        .retry(job_id, "worker-a", Duration::from_millis(0), &err)
        .await
        .unwrap();

    let (state, attempts, locked_by, _) = job_fields(&pool, job_id).await;
    assert_eq!(state, "queued");
    assert_eq!(attempts, 1, "retry must not reset the attempt counter");
    assert!(locked_by.is_none());
}

#[tokio::test]
#[serial]
async fn reschedule_undoes_the_claim_increment() {
    let pool = setup_db().await;
    let repo = JobsRepo::new(pool.clone());
    let lifecycle = JobLifecycle::new(repo.clone());

    let job_id = insert_job(&pool, "docker.waitReady", Some("proj-1")).await;
    let leased = repo.claim_next_job("worker-a", 30_000).await.unwrap().unwrap();
    assert_eq!(leased.attempts, 1);

    lifecycle
        .reschedule(job_id, "worker-a", Duration::from_millis(0))
        .await
        .unwrap();

    let (state, attempts, _, _) = job_fields(&pool, job_id).await;
    assert_eq!(state, "queued");
    assert_eq!(attempts, 0, "reschedule must not consume retry budget");
}

#[tokio::test]
#[serial]
async fn cancel_clears_lock_and_sets_cancelled_at() {
    let pool = setup_db().await;
    let repo = JobsRepo::new(pool.clone());
    let lifecycle = JobLifecycle::new(repo.clone());

    let job_id = insert_job(&pool, "docker.composeUp", None).await;
    repo.claim_next_job("worker-a", 30_000).await.unwrap();

    assert!(lifecycle.cancel(job_id, "worker-a").await.unwrap());
    assert_eq!(job_state(&pool, job_id).await, "cancelled");

    let cancelled_at: Option<chrono::DateTime<Utc>> =
        sqlx::query_scalar("SELECT cancelled_at FROM queue_jobs WHERE id = $1")
            .bind(job_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert!(cancelled_at.is_some());
}

#[tokio::test]
#[serial]
async fn heartbeat_extends_lease_only_for_current_holder() {
    let pool = setup_db().await;
    let repo = JobsRepo::new(pool.clone());
    let lifecycle = JobLifecycle::new(repo.clone());

    let job_id = insert_job(&pool, "docker.composeUp", None).await;
    repo.claim_next_job("worker-a", 5_000).await.unwrap();

    assert!(lifecycle.heartbeat(job_id, "worker-a", 60_000).await.unwrap());
    assert!(!lifecycle.heartbeat(job_id, "worker-b", 60_000).await.unwrap());
}

#[tokio::test]
#[serial]
async fn expired_lease_is_requeued_by_recovery_sweep() {
    let pool = setup_db().await;
    let repo = JobsRepo::new(pool.clone());

    let job_id = insert_job(&pool, "docker.composeUp", None).await;
    repo.claim_next_job("worker-a", 200).await.unwrap();

    let still_running_sweep = repo.expire_leases(Utc::now()).await.unwrap();
    assert_eq!(still_running_sweep, 0);

    tokio::time::sleep(Duration::from_millis(300)).await;

    let reaped = repo.expire_leases(Utc::now()).await.unwrap();
    assert_eq!(reaped, 1);

    let (state, attempts, locked_by, _) = job_fields(&pool, job_id).await;
    assert_eq!(state, "queued");
    assert_eq!(attempts, 1, "recovery does not touch attempts");
    assert!(locked_by.is_none());
}

#[tokio::test]
#[serial]
async fn jobs_with_exhausted_attempts_past_due_run_at_stay_unclaimable_after_expire() {
    let pool = setup_db().await;
    let repo = JobsRepo::new(pool.clone());

    let job_id = insert_job_full(&pool, "docker.composeUp", None, 0, 0, 3, 2).await;
    let leased = repo.claim_next_job("worker-a", 100).await.unwrap().unwrap();
    assert_eq!(leased.attempts, 3);

    tokio::time::sleep(Duration::from_millis(200)).await;
    repo.expire_leases(Utc::now()).await.unwrap();

    assert_eq!(job_state(&pool, job_id).await, "queued");
    assert!(
        repo.claim_next_job("worker-b", 30_000).await.unwrap().is_none(),
        "job with attempts == max_attempts must never be claimed again"
    );
}

#[tokio::test]
#[serial]
async fn run_now_moves_run_at_to_the_present_for_queued_jobs_only() {
    let pool = setup_db().await;
    let repo = JobsRepo::new(pool.clone());

    let future_id = insert_job_full(&pool, "docker.composeUp", None, 3600, 0, 3, 0).await;
    assert!(repo.run_now(future_id).await.unwrap());

    let run_at: chrono::DateTime<Utc> = sqlx::query_scalar("SELECT run_at FROM queue_jobs WHERE id = $1")
        .bind(future_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert!(run_at <= Utc::now() + ChronoDuration::seconds(1));
}
