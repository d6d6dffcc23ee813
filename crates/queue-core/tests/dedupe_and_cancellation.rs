mod common;

use common::{insert_job, setup_db};
use queue_core::jobs::{EnqueueOutcome, JobsRepo, NewJob};
use serial_test::serial;
use serde_json::json;

#[tokio::test]
#[serial]
async fn enqueue_with_same_dedupe_key_returns_existing_active_row() {
    let pool = setup_db().await;
    let repo = JobsRepo::new(pool.clone());

    let job = NewJob::now("docker.composeUp", Some("proj-1".into()), json!({"projectId": "proj-1", "reason": "boot"}))
        .with_dedupe_key("docker.composeUp:proj-1");

    let first = match repo.enqueue(job.clone()).await.unwrap() {
        EnqueueOutcome::Inserted(j) => j,
        EnqueueOutcome::Existing(_) => panic!("expected first enqueue to insert"),
    };

    let second = match repo.enqueue(job).await.unwrap() {
        EnqueueOutcome::Existing(j) => j,
        EnqueueOutcome::Inserted(_) => panic!("expected second enqueue to hit the dedupe key"),
    };

    assert_eq!(first.id, second.id);

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM queue_jobs")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
#[serial]
async fn dedupe_key_is_reusable_once_the_prior_job_reaches_a_terminal_state() {
    let pool = setup_db().await;
    let repo = JobsRepo::new(pool.clone());

    let job = NewJob::now("docker.composeUp", Some("proj-1".into()), json!({"projectId": "proj-1", "reason": "boot"}))
        .with_dedupe_key("docker.composeUp:proj-1");

    let first = repo.enqueue(job.clone()).await.unwrap().into_job();
    let leased = repo.claim_next_job("worker-a", 30_000).await.unwrap().unwrap();
    assert_eq!(leased.id, first.id);

    repo.transition_to_terminal(first.id, "worker-a", queue_core::jobs::JobState::Succeeded, None)
        .await
        .unwrap();

    let second = match repo.enqueue(job).await.unwrap() {
        EnqueueOutcome::Inserted(j) => j,
        EnqueueOutcome::Existing(_) => panic!("dedupe key should be free after the prior job completed"),
    };
    assert_ne!(first.id, second.id);
}

#[tokio::test]
#[serial]
async fn cancel_queued_job_transitions_directly_to_cancelled() {
    let pool = setup_db().await;
    let repo = JobsRepo::new(pool.clone());

    let job_id = insert_job(&pool, "docker.composeUp", None).await;
    assert!(repo.cancel_queued(job_id).await.unwrap());

    let state: String = sqlx::query_scalar("SELECT state FROM queue_jobs WHERE id = $1")
        .bind(job_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(state, "cancelled");
}

#[tokio::test]
#[serial]
async fn cancel_queued_is_a_noop_once_the_job_is_running() {
    let pool = setup_db().await;
    let repo = JobsRepo::new(pool.clone());

    let job_id = insert_job(&pool, "docker.composeUp", None).await;
    repo.claim_next_job("worker-a", 30_000).await.unwrap();

    assert!(!repo.cancel_queued(job_id).await.unwrap());
}

#[tokio::test]
#[serial]
async fn request_cancel_sets_flag_observable_by_running_handler() {
    let pool = setup_db().await;
    let repo = JobsRepo::new(pool.clone());

    let job_id = insert_job(&pool, "docker.composeUp", None).await;
    repo.claim_next_job("worker-a", 30_000).await.unwrap();

    assert!(!repo.is_cancel_requested(job_id).await.unwrap());
    assert!(repo.request_cancel(job_id).await.unwrap());
    assert!(repo.is_cancel_requested(job_id).await.unwrap());
}
