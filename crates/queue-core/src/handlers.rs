//! The thirteen pipeline handlers (§4.6). Each is idempotent and, on
//! success, enqueues its successor via the Admin API with its own dedupe key.

use crate::collaborators::ProjectStatus;
use crate::jobs::model::{
    DockerComposeUpPayload, ProductionStartPayload, ProductionWaitReadyPayload, ProjectCreatePayload,
    ProjectDeletePayload, ProjectIdPayload, ProjectsDeleteAllForUserPayload, WaitReadyPayload,
};
use crate::jobs::{HandlerOutcome, Job, JobError};
use crate::registry::{boxed, HandlerRegistry, JobContext};
use chrono::Utc;
use std::time::Duration;

fn parse<T: for<'de> serde::Deserialize<'de>>(job: &Job) -> Result<T, JobError> {
    serde_json::from_value(job.payload_json.clone()).map_err(|e| JobError::new("BAD_PAYLOAD", e.to_string()))
}

fn into_outcome(res: Result<HandlerOutcome, JobError>) -> HandlerOutcome {
    match res {
        Ok(outcome) => outcome,
        Err(e) => HandlerOutcome::Failed(e),
    }
}

pub fn build_registry() -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();

    registry.register_with_timeout("project.create", |job, ctx| boxed(project_create(job, ctx)), Duration::from_secs(30));
    registry.register_with_timeout("docker.composeUp", |job, ctx| boxed(docker_compose_up(job, ctx)), Duration::from_secs(60));
    registry.register_with_timeout("docker.waitReady", |job, ctx| boxed(docker_wait_ready(job, ctx)), Duration::from_secs(10));
    registry.register_with_timeout("docker.ensureRunning", |job, ctx| boxed(docker_ensure_running(job, ctx)), Duration::from_secs(30));
    registry.register_with_timeout("docker.stop", |job, ctx| boxed(docker_stop(job, ctx)), Duration::from_secs(30));
    registry.register_with_timeout("opencode.sessionCreate", |job, ctx| boxed(opencode_session_create(job, ctx)), Duration::from_secs(10));
    registry.register_with_timeout("opencode.sendUserPrompt", |job, ctx| boxed(opencode_send_user_prompt(job, ctx)), Duration::from_secs(10));
    registry.register_with_timeout("production.build", |job, ctx| boxed(production_build(job, ctx)), Duration::from_secs(300));
    registry.register_with_timeout("production.start", |job, ctx| boxed(production_start(job, ctx)), Duration::from_secs(60));
    registry.register_with_timeout("production.waitReady", |job, ctx| boxed(production_wait_ready(job, ctx)), Duration::from_secs(10));
    registry.register_with_timeout("production.stop", |job, ctx| boxed(production_stop(job, ctx)), Duration::from_secs(30));
    registry.register_with_timeout("project.delete", |job, ctx| boxed(project_delete(job, ctx)), Duration::from_secs(60));
    registry.register_with_timeout("projects.deleteAllForUser", |job, ctx| boxed(projects_delete_all_for_user(job, ctx)), Duration::from_secs(10));

    registry
}

// ---------------------------------------------------------------------------
// Create-and-boot chain
// ---------------------------------------------------------------------------

async fn project_create(job: &Job, ctx: &JobContext) -> HandlerOutcome {
    into_outcome(project_create_inner(job, ctx).await)
}

async fn project_create_inner(job: &Job, ctx: &JobContext) -> Result<HandlerOutcome, JobError> {
    let payload: ProjectCreatePayload = parse(job)?;

    // Idempotent: if the project already exists, the create step already ran.
    if ctx.projects.get_project(&payload.project_id).await.map_err(infra)?.is_none() {
        let images = serde_json::to_value(&payload.images).map_err(|e| JobError::new("BAD_PAYLOAD", e.to_string()))?;
        ctx.projects
            .create_project(
                &payload.project_id,
                &payload.owner_user_id,
                &payload.prompt,
                payload.model.as_deref(),
                &images,
            )
            .await
            .map_err(infra)?;
    }

    ctx.admin
        .enqueue_docker_compose_up(&payload.project_id, "initial create")
        .await
        .map_err(infra)?;

    Ok(HandlerOutcome::Done)
}

async fn docker_compose_up(job: &Job, ctx: &JobContext) -> HandlerOutcome {
    into_outcome(docker_compose_up_inner(job, ctx).await)
}

async fn docker_compose_up_inner(job: &Job, ctx: &JobContext) -> Result<HandlerOutcome, JobError> {
    let payload: DockerComposeUpPayload = parse(job)?;

    if project_gone_or_deleting(ctx, &payload.project_id).await? {
        return Ok(HandlerOutcome::Done);
    }

    ctx.projects
        .update_status(&payload.project_id, ProjectStatus::Starting)
        .await
        .map_err(infra)?;

    let out = ctx.containers.compose_up(&payload.project_id).await.map_err(infra)?;
    if !out.success {
        ctx.projects
            .update_status(&payload.project_id, ProjectStatus::Error)
            .await
            .map_err(infra)?;
        return Err(JobError::from_collaborator("docker compose up", &out.stderr));
    }

    ctx.admin
        .enqueue_docker_wait_ready(&payload.project_id)
        .await
        .map_err(infra)?;

    Ok(HandlerOutcome::Done)
}

async fn docker_wait_ready(job: &Job, ctx: &JobContext) -> HandlerOutcome {
    into_outcome(docker_wait_ready_inner(job, ctx).await)
}

async fn docker_wait_ready_inner(job: &Job, ctx: &JobContext) -> Result<HandlerOutcome, JobError> {
    let payload: WaitReadyPayload = parse(job)?;
    let project_id = &payload.project_id;

    if project_gone_or_deleting(ctx, project_id).await? {
        return Ok(HandlerOutcome::Done);
    }

    let record = ctx.projects.get_project(project_id).await.map_err(infra)?;
    let Some(record) = record else {
        return Ok(HandlerOutcome::Done);
    };

    let preview_up = ctx.health.is_up(&record.preview_health_url).await;
    let session_up = ctx.health.is_up(&record.session_health_url).await;

    if preview_up && session_up {
        let out = ctx.containers.push_auth_material(project_id).await.map_err(infra)?;
        if !out.success {
            ctx.projects
                .update_status(project_id, ProjectStatus::Error)
                .await
                .map_err(infra)?;
            return Err(JobError::from_collaborator("push auth material", &out.stderr));
        }

        ctx.projects
            .update_status(project_id, ProjectStatus::Running)
            .await
            .map_err(infra)?;

        let record = ctx.projects.get_project(project_id).await.map_err(infra)?;
        let already_sent = record.map(|p| p.initial_prompt_sent).unwrap_or(true);
        if !already_sent {
            ctx.admin
                .enqueue_opencode_session_create(project_id)
                .await
                .map_err(infra)?;
        }

        return Ok(HandlerOutcome::Done);
    }

    let elapsed_ms = Utc::now().timestamp_millis() - payload.started_at;
    if elapsed_ms < 300_000 && job.attempts < 10 {
        return Ok(HandlerOutcome::Reschedule(Duration::from_millis(1_000)));
    }

    ctx.projects
        .update_status(project_id, ProjectStatus::Error)
        .await
        .map_err(infra)?;
    Err(JobError::new("DEPENDENCY_DOWN", "docker readiness deadline exceeded"))
}

async fn opencode_session_create(job: &Job, ctx: &JobContext) -> HandlerOutcome {
    into_outcome(opencode_session_create_inner(job, ctx).await)
}

async fn opencode_session_create_inner(job: &Job, ctx: &JobContext) -> Result<HandlerOutcome, JobError> {
    let payload: ProjectIdPayload = parse(job)?;
    let project_id = &payload.project_id;

    let Some(record) = ctx.projects.get_project(project_id).await.map_err(infra)? else {
        return Ok(HandlerOutcome::Done);
    };
    if record.status == ProjectStatus::Deleting.as_str() {
        return Ok(HandlerOutcome::Done);
    }
    if record.bootstrap_session_id.is_some() {
        return Ok(HandlerOutcome::Done);
    }

    let session_id = ctx.sessions.create_session(project_id).await.map_err(infra)?;
    ctx.projects
        .set_bootstrap_session_id(project_id, &session_id)
        .await
        .map_err(infra)?;

    ctx.admin
        .enqueue_opencode_send_user_prompt(project_id)
        .await
        .map_err(infra)?;

    Ok(HandlerOutcome::Done)
}

async fn opencode_send_user_prompt(job: &Job, ctx: &JobContext) -> HandlerOutcome {
    into_outcome(opencode_send_user_prompt_inner(job, ctx).await)
}

async fn opencode_send_user_prompt_inner(job: &Job, ctx: &JobContext) -> Result<HandlerOutcome, JobError> {
    let payload: ProjectIdPayload = parse(job)?;
    let project_id = &payload.project_id;

    let Some(record) = ctx.projects.get_project(project_id).await.map_err(infra)? else {
        return Ok(HandlerOutcome::Done);
    };
    if record.status == ProjectStatus::Deleting.as_str() {
        return Ok(HandlerOutcome::Done);
    }
    if record.initial_prompt_sent {
        return Ok(HandlerOutcome::Done);
    }
    let Some(session_id) = record.bootstrap_session_id.clone() else {
        return Err(JobError::new("DEPENDENCY_DOWN", "no bootstrap session yet"));
    };

    let images: Vec<serde_json::Value> = record.staged_images.as_array().cloned().unwrap_or_default();
    ctx.sessions
        .send_user_prompt_async(&session_id, &record.staged_prompt, record.staged_model.as_deref(), &images)
        .await
        .map_err(infra)?;

    tokio::time::sleep(Duration::from_millis(1_000)).await;

    let messages = ctx.sessions.list_messages(&session_id).await.map_err(infra)?;
    // Known limitation (§9): prefix match against the prompt text, falling back
    // to the last user message when nothing matches — may associate the wrong id.
    let sent_id = messages
        .iter()
        .rev()
        .find(|m| m.role == "user" && !record.staged_prompt.is_empty() && m.text.starts_with(&record.staged_prompt))
        .or_else(|| messages.iter().rev().find(|m| m.role == "user"))
        .map(|m| m.id.clone());

    ctx.projects
        .set_initial_prompt_sent(project_id, sent_id.as_deref())
        .await
        .map_err(infra)?;

    Ok(HandlerOutcome::Done)
}

// ---------------------------------------------------------------------------
// Production deploy chain
// ---------------------------------------------------------------------------

async fn production_build(job: &Job, ctx: &JobContext) -> HandlerOutcome {
    into_outcome(production_build_inner(job, ctx).await)
}

async fn production_build_inner(job: &Job, ctx: &JobContext) -> Result<HandlerOutcome, JobError> {
    let payload: ProjectIdPayload = parse(job)?;
    let project_id = &payload.project_id;

    if project_gone_or_deleting(ctx, project_id).await? {
        return Ok(HandlerOutcome::Done);
    }
    if ctx.cancel_requested(job).await {
        return Ok(HandlerOutcome::Cancelled);
    }

    ctx.projects
        .set_production(project_id, None, None, None, Some("building"))
        .await
        .map_err(infra)?;

    let (out, hash) = ctx.containers.run_build_command(project_id).await.map_err(infra)?;
    if !out.success {
        ctx.projects
            .set_production(project_id, None, None, None, Some("failed"))
            .await
            .map_err(infra)?;
        return Err(JobError::from_collaborator("build command", &out.stderr));
    }

    if ctx.cancel_requested(job).await {
        return Ok(HandlerOutcome::Cancelled);
    }

    ctx.admin
        .enqueue_production_start(project_id, &hash)
        .await
        .map_err(infra)?;

    Ok(HandlerOutcome::Done)
}

async fn production_start(job: &Job, ctx: &JobContext) -> HandlerOutcome {
    into_outcome(production_start_inner(job, ctx).await)
}

async fn production_start_inner(job: &Job, ctx: &JobContext) -> Result<HandlerOutcome, JobError> {
    let payload: ProductionStartPayload = parse(job)?;
    let project_id = &payload.project_id;

    if project_gone_or_deleting(ctx, project_id).await? {
        return Ok(HandlerOutcome::Done);
    }

    let record = ctx.projects.get_project(project_id).await.map_err(infra)?;
    let port = record.and_then(|p| p.production_port).unwrap_or_else(|| allocate_port(project_id));

    ctx.containers
        .build_image(project_id, &payload.production_hash)
        .await
        .map_err(infra)?;
    ctx.containers.stop_production_container(project_id).await.map_err(infra)?;

    let out = ctx
        .containers
        .run_production_container(project_id, &payload.production_hash, port as u16)
        .await
        .map_err(infra)?;
    if !out.success {
        return Err(JobError::from_collaborator("run production container", &out.stderr));
    }

    ctx.projects
        .set_production(project_id, Some(&payload.production_hash), Some(port), None, Some("starting"))
        .await
        .map_err(infra)?;

    ctx.admin
        .enqueue_production_wait_ready(project_id, port as u16, &payload.production_hash)
        .await
        .map_err(infra)?;

    Ok(HandlerOutcome::Done)
}

async fn production_wait_ready(job: &Job, ctx: &JobContext) -> HandlerOutcome {
    into_outcome(production_wait_ready_inner(job, ctx).await)
}

async fn production_wait_ready_inner(job: &Job, ctx: &JobContext) -> Result<HandlerOutcome, JobError> {
    let payload: ProductionWaitReadyPayload = parse(job)?;
    let project_id = &payload.project_id;

    if project_gone_or_deleting(ctx, project_id).await? {
        return Ok(HandlerOutcome::Done);
    }

    let url = format!("http://127.0.0.1:{}/", payload.production_port);
    if ctx.health.is_up(&url).await {
        ctx.projects
            .set_production(project_id, Some(&payload.production_hash), Some(payload.production_port as i32), Some(&url), Some("running"))
            .await
            .map_err(infra)?;
        return Ok(HandlerOutcome::Done);
    }

    let elapsed_ms = Utc::now().timestamp_millis() - payload.started_at;
    if elapsed_ms < 300_000 && job.attempts < 300 {
        return Ok(HandlerOutcome::Reschedule(Duration::from_millis(1_000)));
    }

    ctx.projects
        .set_production(project_id, None, None, None, Some("failed"))
        .await
        .map_err(infra)?;
    Err(JobError::new("DEPENDENCY_DOWN", "production readiness deadline exceeded"))
}

async fn production_stop(job: &Job, ctx: &JobContext) -> HandlerOutcome {
    into_outcome(production_stop_inner(job, ctx).await)
}

async fn production_stop_inner(job: &Job, ctx: &JobContext) -> Result<HandlerOutcome, JobError> {
    let payload: ProjectIdPayload = parse(job)?;
    let project_id = &payload.project_id;

    // Best-effort: failures here don't block marking the project stopped.
    let _ = ctx.containers.stop_production_container(project_id).await;

    ctx.projects
        .set_production(project_id, None, None, None, Some("stopped"))
        .await
        .map_err(infra)?;

    Ok(HandlerOutcome::Done)
}

// ---------------------------------------------------------------------------
// Teardown chain
// ---------------------------------------------------------------------------

async fn docker_stop(job: &Job, ctx: &JobContext) -> HandlerOutcome {
    into_outcome(docker_stop_inner(job, ctx).await)
}

async fn docker_stop_inner(job: &Job, ctx: &JobContext) -> Result<HandlerOutcome, JobError> {
    let payload: ProjectIdPayload = parse(job)?;
    let project_id = &payload.project_id;

    let filters = crate::jobs::JobFilters {
        state: Some("queued".to_string()),
        job_type: Some("docker.ensureRunning".to_string()),
        project_id: Some(project_id.clone()),
        text: None,
    };
    for queued in ctx.jobs.list_jobs(&filters, 50, 0).await.map_err(infra)? {
        let _ = ctx.jobs.cancel_queued(queued.id).await;
    }
    let running_filters = crate::jobs::JobFilters {
        state: Some("running".to_string()),
        ..filters
    };
    for running in ctx.jobs.list_jobs(&running_filters, 50, 0).await.map_err(infra)? {
        let _ = ctx.jobs.request_cancel(running.id).await;
    }

    let out = ctx.containers.compose_stop(project_id).await.map_err(infra)?;
    let status = if out.success { ProjectStatus::Stopped } else { ProjectStatus::Error };
    ctx.projects.update_status(project_id, status).await.map_err(infra)?;

    if !out.success {
        return Err(JobError::from_collaborator("docker compose stop", &out.stderr));
    }
    Ok(HandlerOutcome::Done)
}

async fn docker_ensure_running(job: &Job, ctx: &JobContext) -> HandlerOutcome {
    into_outcome(docker_ensure_running_inner(job, ctx).await)
}

async fn docker_ensure_running_inner(job: &Job, ctx: &JobContext) -> Result<HandlerOutcome, JobError> {
    let payload: ProjectIdPayload = parse(job)?;
    let project_id = &payload.project_id;

    if project_gone_or_deleting(ctx, project_id).await? {
        return Ok(HandlerOutcome::Done);
    }
    if ctx.cancel_requested(job).await {
        return Ok(HandlerOutcome::Cancelled);
    }

    let out = ctx.containers.compose_up(project_id).await.map_err(infra)?;
    if !out.success {
        return Err(JobError::from_collaborator("docker compose up", &out.stderr));
    }

    let record = ctx.projects.get_project(project_id).await.map_err(infra)?;
    let Some(record) = record else {
        return Ok(HandlerOutcome::Done);
    };

    let deadline = Utc::now() + chrono::Duration::seconds(30);
    loop {
        let preview_up = ctx.health.is_up(&record.preview_health_url).await;
        let session_up = ctx.health.is_up(&record.session_health_url).await;
        if preview_up && session_up {
            break;
        }
        if Utc::now() >= deadline {
            return Err(JobError::new("DEPENDENCY_DOWN", "ensureRunning deadline exceeded"));
        }
        if ctx.cancel_requested(job).await {
            return Ok(HandlerOutcome::Cancelled);
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }

    ctx.projects
        .update_status(project_id, ProjectStatus::Running)
        .await
        .map_err(infra)?;

    let record = ctx.projects.get_project(project_id).await.map_err(infra)?;
    if record.map(|p| p.bootstrap_session_id.is_none()).unwrap_or(false) {
        ctx.admin
            .enqueue_opencode_session_create(project_id)
            .await
            .map_err(infra)?;
    }

    Ok(HandlerOutcome::Done)
}

async fn project_delete(job: &Job, ctx: &JobContext) -> HandlerOutcome {
    into_outcome(project_delete_inner(job, ctx).await)
}

async fn project_delete_inner(job: &Job, ctx: &JobContext) -> Result<HandlerOutcome, JobError> {
    let payload: ProjectDeletePayload = parse(job)?;
    let project_id = &payload.project_id;

    let Some(record) = ctx.projects.get_project(project_id).await.map_err(infra)? else {
        return Ok(HandlerOutcome::Done);
    };
    if ctx.cancel_requested(job).await {
        return Ok(HandlerOutcome::Cancelled);
    }

    let _ = ctx.projects.update_status(project_id, ProjectStatus::Deleting).await;

    if ctx.cancel_requested(job).await {
        return Ok(HandlerOutcome::Cancelled);
    }
    let _ = ctx.containers.compose_stop(project_id).await;
    let _ = ctx.containers.compose_remove_volumes(project_id).await;
    let _ = ctx.containers.stop_production_container(project_id).await;
    if let Some(hash) = record.production_hash.as_deref() {
        let _ = ctx.containers.remove_production_image(project_id, hash).await;
    }

    if ctx.cancel_requested(job).await {
        return Ok(HandlerOutcome::Cancelled);
    }

    // Hard-delete the DB row is the critical step: if it fails, the job retries.
    ctx.projects.hard_delete(project_id).await.map_err(infra)?;

    Ok(HandlerOutcome::Done)
}

async fn projects_delete_all_for_user(job: &Job, ctx: &JobContext) -> HandlerOutcome {
    into_outcome(projects_delete_all_for_user_inner(job, ctx).await)
}

async fn projects_delete_all_for_user_inner(job: &Job, ctx: &JobContext) -> Result<HandlerOutcome, JobError> {
    let payload: ProjectsDeleteAllForUserPayload = parse(job)?;

    let project_ids = ctx.projects.list_project_ids_for_user(&payload.user_id).await.map_err(infra)?;
    for project_id in project_ids {
        ctx.admin
            .enqueue_project_delete(&project_id, &payload.user_id)
            .await
            .map_err(infra)?;
    }

    Ok(HandlerOutcome::Done)
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

fn infra(e: anyhow::Error) -> JobError {
    JobError::new("DEPENDENCY_DOWN", e.to_string())
}

async fn project_gone_or_deleting(ctx: &JobContext, project_id: &str) -> Result<bool, JobError> {
    let record = ctx.projects.get_project(project_id).await.map_err(infra)?;
    Ok(match record {
        None => true,
        Some(p) => p.status == ProjectStatus::Deleting.as_str(),
    })
}

/// Deterministic port assignment from the project id, used when no production
/// port has been allocated yet.
fn allocate_port(project_id: &str) -> i32 {
    let mut hash: u32 = 2166136261;
    for b in project_id.as_bytes() {
        hash ^= *b as u32;
        hash = hash.wrapping_mul(16777619);
    }
    20000 + (hash % 20000) as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_port_is_deterministic_and_in_range() {
        let a = allocate_port("proj-1");
        let b = allocate_port("proj-1");
        assert_eq!(a, b);
        assert!((20000..40000).contains(&a));
    }

    #[test]
    fn allocate_port_differs_across_projects() {
        assert_ne!(allocate_port("proj-1"), allocate_port("proj-2"));
    }

    #[test]
    fn into_outcome_passes_through_ok() {
        let outcome = into_outcome(Ok(HandlerOutcome::Done));
        assert!(matches!(outcome, HandlerOutcome::Done));
    }

    #[test]
    fn into_outcome_converts_err_to_failed() {
        let outcome = into_outcome(Err(JobError::new("DEPENDENCY_DOWN", "boom")));
        match outcome {
            HandlerOutcome::Failed(err) => assert_eq!(err.code, "DEPENDENCY_DOWN"),
            _ => panic!("expected Failed"),
        }
    }

    #[test]
    fn parse_rejects_payload_missing_required_fields() {
        let job = Job {
            id: uuid::Uuid::nil(),
            job_type: "project.create".into(),
            state: "running".into(),
            project_id: None,
            payload_json: serde_json::json!({}),
            priority: 0,
            attempts: 1,
            max_attempts: 3,
            run_at: Utc::now(),
            locked_at: None,
            locked_by: None,
            lock_expires_at: None,
            dedupe_key: None,
            dedupe_active: None,
            cancel_requested_at: None,
            cancelled_at: None,
            last_error: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let result: Result<ProjectCreatePayload, JobError> = parse(&job);
        assert!(result.is_err());
    }
}
