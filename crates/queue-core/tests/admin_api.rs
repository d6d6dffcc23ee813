mod common;

use common::setup_db;
use queue_core::jobs::{AdminApi, EnqueueOutcome, JobFilters, JobsRepo, SettingsRepo};
use serial_test::serial;

fn admin(pool: sqlx::PgPool) -> AdminApi {
    AdminApi::new(JobsRepo::new(pool.clone()), SettingsRepo::new(pool))
}

#[tokio::test]
#[serial]
async fn enqueue_docker_wait_ready_uses_spec_mandated_dedupe_key_and_max_attempts() {
    let pool = setup_db().await;
    let admin = admin(pool.clone());

    let outcome = admin.enqueue_docker_wait_ready("proj-1").await.unwrap();
    let job = match outcome {
        EnqueueOutcome::Inserted(j) => j,
        EnqueueOutcome::Existing(_) => panic!("expected a fresh insert"),
    };

    assert_eq!(job.job_type, "docker.waitReady");
    assert_eq!(job.dedupe_key.as_deref(), Some("docker.waitReady:proj-1"));
    assert_eq!(job.max_attempts, 300);
}

#[tokio::test]
#[serial]
async fn enqueue_production_build_shares_dedupe_key_with_deploy_chain() {
    let pool = setup_db().await;
    let admin = admin(pool.clone());

    let outcome = admin.enqueue_production_build("proj-1").await.unwrap();
    assert_eq!(outcome.job().dedupe_key.as_deref(), Some("production.deploy:proj-1"));
}

#[tokio::test]
#[serial]
async fn list_and_count_jobs_respect_filters() {
    let pool = setup_db().await;
    let admin = admin(pool.clone());

    admin.enqueue_docker_compose_up("proj-1", "boot").await.unwrap();
    admin.enqueue_docker_compose_up("proj-2", "boot").await.unwrap();

    let filters = JobFilters {
        project_id: Some("proj-1".to_string()),
        ..Default::default()
    };

    assert_eq!(admin.count_jobs(&filters).await.unwrap(), 1);
    let jobs = admin.list_jobs(&filters, 10, 0).await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].project_id.as_deref(), Some("proj-1"));
}

#[tokio::test]
#[serial]
async fn retry_job_preserves_fields_under_a_fresh_id() {
    let pool = setup_db().await;
    let admin = admin(pool.clone());

    let outcome = admin.enqueue_docker_compose_up("proj-1", "boot").await.unwrap();
    let original = outcome.into_job();

    sqlx::query("UPDATE queue_jobs SET state = 'failed' WHERE id = $1")
        .bind(original.id)
        .execute(&pool)
        .await
        .unwrap();

    let retried = admin.retry_job(original.id).await.unwrap().unwrap();

    assert_ne!(retried.id, original.id);
    assert_eq!(retried.job_type, original.job_type);
    assert_eq!(retried.project_id, original.project_id);
    assert_eq!(retried.payload_json, original.payload_json);
    assert_eq!(retried.priority, original.priority);
    assert_eq!(retried.max_attempts, original.max_attempts);
    assert_eq!(retried.dedupe_key, original.dedupe_key);
    assert_eq!(retried.attempts, 0);
    assert_eq!(retried.state, "queued");
}

#[tokio::test]
#[serial]
async fn pause_prevents_nothing_at_the_store_layer_but_persists_the_flag() {
    let pool = setup_db().await;
    let admin = admin(pool.clone());

    admin.set_paused(true).await.unwrap();
    let settings = SettingsRepo::new(pool.clone()).get().await.unwrap();
    assert!(settings.paused);

    admin.set_paused(false).await.unwrap();
    let settings = SettingsRepo::new(pool).get().await.unwrap();
    assert!(!settings.paused);
}

#[tokio::test]
#[serial]
async fn set_concurrency_floors_at_one() {
    let pool = setup_db().await;
    let admin = admin(pool.clone());

    admin.set_concurrency(0).await.unwrap();
    let settings = SettingsRepo::new(pool).get().await.unwrap();
    assert_eq!(settings.concurrency, 1);
}

#[tokio::test]
#[serial]
async fn delete_job_only_succeeds_for_terminal_states() {
    let pool = setup_db().await;
    let admin = admin(pool.clone());

    let outcome = admin.enqueue_docker_compose_up("proj-1", "boot").await.unwrap();
    let job = outcome.into_job();

    assert!(!admin.delete_job(job.id).await.unwrap(), "queued jobs must not be deletable");

    sqlx::query("UPDATE queue_jobs SET state = 'succeeded' WHERE id = $1")
        .bind(job.id)
        .execute(&pool)
        .await
        .unwrap();

    assert!(admin.delete_job(job.id).await.unwrap());
}
