mod common;

use common::{insert_job, insert_job_full, job_state, setup_db};
use queue_core::jobs::JobsRepo;
use serial_test::serial;
use std::collections::HashSet;
use std::time::Duration;
use uuid::Uuid;

#[tokio::test]
#[serial]
async fn two_workers_never_claim_the_same_job() {
    let pool = setup_db().await;
    let repo = JobsRepo::new(pool.clone());

    let _job_id = insert_job(&pool, "docker.composeUp", None).await;

    let repo_a = repo.clone();
    let repo_b = repo.clone();

    let (a, b) = tokio::join!(
        async move { repo_a.claim_next_job("worker-a", 30_000).await.unwrap() },
        async move { repo_b.claim_next_job("worker-b", 30_000).await.unwrap() },
    );

    assert!(a.is_some() ^ b.is_some(), "exactly one worker should win the claim");

    let (locked_by, state): (Option<String>, String) =
        sqlx::query_as("SELECT locked_by, state FROM queue_jobs LIMIT 1")
            .fetch_one(&pool)
            .await
            .unwrap();

    assert_eq!(state, "running");
    assert!(locked_by.as_deref() == Some("worker-a") || locked_by.as_deref() == Some("worker-b"));
}

#[tokio::test]
#[serial]
async fn claim_increments_attempts() {
    let pool = setup_db().await;
    let repo = JobsRepo::new(pool.clone());

    let job_id = insert_job(&pool, "docker.composeUp", None).await;
    let leased = repo.claim_next_job("worker-a", 30_000).await.unwrap().unwrap();

    assert_eq!(leased.id, job_id);
    assert_eq!(leased.attempts, 1);
}

#[tokio::test]
#[serial]
async fn respects_priority_then_run_at_then_created_at() {
    let pool = setup_db().await;
    let repo = JobsRepo::new(pool.clone());

    let low = insert_job_full(&pool, "low", None, 0, 0, 3, 0).await;
    let high = insert_job_full(&pool, "high", None, 0, 10, 3, 0).await;
    let future = insert_job_full(&pool, "future", None, 30, 100, 3, 0).await;

    let j1 = repo.claim_next_job("worker-a", 30_000).await.unwrap().unwrap();
    assert_eq!(j1.id, high);

    let j2 = repo.claim_next_job("worker-a", 30_000).await.unwrap().unwrap();
    assert_eq!(j2.id, low);

    assert_eq!(job_state(&pool, future).await, "queued");
}

#[tokio::test]
#[serial]
async fn delayed_job_not_claimed_before_run_at() {
    let pool = setup_db().await;
    let repo = JobsRepo::new(pool.clone());

    let delayed = insert_job_full(&pool, "delayed", None, 2, 0, 3, 0).await;

    assert!(repo.claim_next_job("worker-a", 30_000).await.unwrap().is_none());

    tokio::time::sleep(Duration::from_millis(2200)).await;

    let leased = repo.claim_next_job("worker-a", 30_000).await.unwrap().unwrap();
    assert_eq!(leased.id, delayed);
}

#[tokio::test]
#[serial]
async fn exhausted_attempts_never_claimed() {
    let pool = setup_db().await;
    let repo = JobsRepo::new(pool.clone());

    let _exhausted = insert_job_full(&pool, "docker.composeUp", None, 0, 0, 3, 3).await;

    assert!(repo.claim_next_job("worker-a", 30_000).await.unwrap().is_none());
}

#[tokio::test]
#[serial]
async fn same_project_jobs_are_mutually_exclusive_at_claim_time() {
    let pool = setup_db().await;
    let repo = JobsRepo::new(pool.clone());

    let first = insert_job(&pool, "docker.composeUp", Some("proj-1")).await;
    let _second = insert_job(&pool, "docker.waitReady", Some("proj-1")).await;

    let leased = repo.claim_next_job("worker-a", 30_000).await.unwrap().unwrap();
    assert_eq!(leased.id, first);

    // second job for the same project must not be claimable while the first is running.
    assert!(repo.claim_next_job("worker-b", 30_000).await.unwrap().is_none());
}

#[tokio::test]
#[serial]
async fn different_projects_can_run_concurrently() {
    let pool = setup_db().await;
    let repo = JobsRepo::new(pool.clone());

    let a = insert_job(&pool, "docker.composeUp", Some("proj-a")).await;
    let b = insert_job(&pool, "docker.composeUp", Some("proj-b")).await;

    let leased_a = repo.claim_next_job("worker-a", 30_000).await.unwrap().unwrap();
    let leased_b = repo.claim_next_job("worker-b", 30_000).await.unwrap().unwrap();

    let ids: HashSet<Uuid> = [leased_a.id, leased_b.id].into_iter().collect();
    assert_eq!(ids, [a, b].into_iter().collect());
}

#[tokio::test]
#[serial]
async fn project_null_jobs_are_never_mutually_exclusive() {
    let pool = setup_db().await;
    let repo = JobsRepo::new(pool.clone());

    let _a = insert_job(&pool, "projects.deleteAllForUser", None).await;
    let _b = insert_job(&pool, "projects.deleteAllForUser", None).await;

    let leased_1 = repo.claim_next_job("worker-a", 30_000).await.unwrap();
    let leased_2 = repo.claim_next_job("worker-b", 30_000).await.unwrap();

    assert!(leased_1.is_some());
    assert!(leased_2.is_some());
}
