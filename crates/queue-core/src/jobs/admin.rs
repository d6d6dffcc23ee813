use crate::jobs::model::{Job, JobType, NewJob};
use crate::jobs::repo::{EnqueueOutcome, JobFilters, JobsRepo};
use crate::jobs::settings::SettingsRepo;
use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;

/// Programmatic entry points backing the HTTP/admin surface (§4.8). This is
/// the only thing external callers touch; nobody composes their own SQL.
#[derive(Clone)]
pub struct AdminApi {
    jobs: JobsRepo,
    settings: SettingsRepo,
}

impl AdminApi {
    pub fn new(jobs: JobsRepo, settings: SettingsRepo) -> Self {
        Self { jobs, settings }
    }

    pub async fn enqueue(&self, job: NewJob) -> anyhow::Result<Job> {
        Ok(self.jobs.enqueue(job).await?.into_job())
    }

    pub async fn list_jobs(&self, filters: &JobFilters, limit: i64, offset: i64) -> anyhow::Result<Vec<Job>> {
        self.jobs.list_jobs(filters, limit, offset).await
    }

    pub async fn count_jobs(&self, filters: &JobFilters) -> anyhow::Result<i64> {
        self.jobs.count_jobs(filters).await
    }

    pub async fn get_job(&self, id: Uuid) -> anyhow::Result<Option<Job>> {
        self.jobs.get_job(id).await
    }

    pub async fn request_cancel(&self, id: Uuid) -> anyhow::Result<bool> {
        self.jobs.request_cancel(id).await
    }

    pub async fn cancel_queued_job(&self, id: Uuid) -> anyhow::Result<bool> {
        self.jobs.cancel_queued(id).await
    }

    /// Re-enqueues a copy of a terminal job, preserving type/payload/priority/
    /// max_attempts/project_id/dedupe_key, under a new id.
    pub async fn retry_job(&self, id: Uuid) -> anyhow::Result<Option<Job>> {
        let Some(src) = self.jobs.get_job(id).await? else {
            return Ok(None);
        };
        let new_job = NewJob {
            job_type: src.job_type.clone(),
            project_id: src.project_id.clone(),
            payload_json: src.payload_json.clone(),
            priority: src.priority,
            max_attempts: src.max_attempts,
            run_at: Utc::now(),
            dedupe_key: src.dedupe_key.clone(),
        };
        Ok(Some(self.jobs.enqueue(new_job).await?.into_job()))
    }

    pub async fn delete_job(&self, id: Uuid) -> anyhow::Result<bool> {
        self.jobs.delete_job(id).await
    }

    pub async fn delete_jobs_by_state(&self, state: &str) -> anyhow::Result<u64> {
        self.jobs.delete_jobs_by_state(state).await
    }

    pub async fn run_now(&self, id: Uuid) -> anyhow::Result<bool> {
        self.jobs.run_now(id).await
    }

    pub async fn force_unlock(&self, id: Uuid) -> anyhow::Result<bool> {
        self.jobs.force_unlock(id, "FORCE_UNLOCK: admin escape hatch").await
    }

    pub async fn set_paused(&self, paused: bool) -> anyhow::Result<()> {
        self.settings.set_paused(paused).await
    }

    pub async fn set_concurrency(&self, concurrency: i32) -> anyhow::Result<()> {
        self.settings.set_concurrency(concurrency).await
    }

    // ------------------------------------------------------------------
    // Type-specific enqueue helpers with dedupe-key construction (§4.6, §6.2).
    // ------------------------------------------------------------------

    pub async fn enqueue_project_create(
        &self,
        project_id: &str,
        owner_user_id: &str,
        prompt: &str,
        model: Option<String>,
        images: Value,
    ) -> anyhow::Result<EnqueueOutcome> {
        let payload = json!({
            "projectId": project_id,
            "ownerUserId": owner_user_id,
            "prompt": prompt,
            "model": model,
            "images": images,
        });
        self.enqueue_for_project(JobType::ProjectCreate, project_id, payload, &format!("project.create:{project_id}"))
            .await
    }

    pub async fn enqueue_project_delete(
        &self,
        project_id: &str,
        requested_by_user_id: &str,
    ) -> anyhow::Result<EnqueueOutcome> {
        let payload = json!({ "projectId": project_id, "requestedByUserId": requested_by_user_id });
        self.enqueue_for_project(JobType::ProjectDelete, project_id, payload, &format!("project.delete:{project_id}"))
            .await
    }

    pub async fn enqueue_projects_delete_all_for_user(&self, user_id: &str) -> anyhow::Result<EnqueueOutcome> {
        let payload = json!({ "userId": user_id });
        let job = NewJob::now(JobType::ProjectsDeleteAllForUser.as_str(), None, payload)
            .with_dedupe_key(format!("projects.deleteAllForUser:{user_id}"));
        self.jobs.enqueue(job).await
    }

    pub async fn enqueue_docker_compose_up(&self, project_id: &str, reason: &str) -> anyhow::Result<EnqueueOutcome> {
        let payload = json!({ "projectId": project_id, "reason": reason });
        self.enqueue_for_project(
            JobType::DockerComposeUp,
            project_id,
            payload,
            &format!("docker.composeUp:{project_id}"),
        )
        .await
    }

    pub async fn enqueue_docker_wait_ready(&self, project_id: &str) -> anyhow::Result<EnqueueOutcome> {
        let payload = json!({
            "projectId": project_id,
            "startedAt": Utc::now().timestamp_millis(),
            "rescheduleCount": 0,
        });
        let job = NewJob::now(JobType::DockerWaitReady.as_str(), Some(project_id.to_string()), payload)
            .with_dedupe_key(format!("docker.waitReady:{project_id}"))
            .with_max_attempts(JobType::DockerWaitReady.default_max_attempts());
        self.jobs.enqueue(job).await
    }

    pub async fn enqueue_docker_ensure_running(&self, project_id: &str) -> anyhow::Result<EnqueueOutcome> {
        let payload = json!({ "projectId": project_id });
        self.enqueue_for_project(
            JobType::DockerEnsureRunning,
            project_id,
            payload,
            &format!("docker.ensureRunning:{project_id}"),
        )
        .await
    }

    pub async fn enqueue_docker_stop(&self, project_id: &str) -> anyhow::Result<EnqueueOutcome> {
        let payload = json!({ "projectId": project_id });
        self.enqueue_for_project(JobType::DockerStop, project_id, payload, &format!("docker.stop:{project_id}"))
            .await
    }

    pub async fn enqueue_opencode_session_create(&self, project_id: &str) -> anyhow::Result<EnqueueOutcome> {
        let payload = json!({ "projectId": project_id });
        self.enqueue_for_project(
            JobType::OpencodeSessionCreate,
            project_id,
            payload,
            &format!("opencode.sessionCreate:{project_id}"),
        )
        .await
    }

    pub async fn enqueue_opencode_send_user_prompt(&self, project_id: &str) -> anyhow::Result<EnqueueOutcome> {
        let payload = json!({ "projectId": project_id });
        self.enqueue_for_project(
            JobType::OpencodeSendUserPrompt,
            project_id,
            payload,
            &format!("opencode.sendUserPrompt:{project_id}"),
        )
        .await
    }

    pub async fn enqueue_production_build(&self, project_id: &str) -> anyhow::Result<EnqueueOutcome> {
        let payload = json!({ "projectId": project_id });
        // dedupe key covers the whole deploy chain, per §6.2.
        self.enqueue_for_project(
            JobType::ProductionBuild,
            project_id,
            payload,
            &format!("production.deploy:{project_id}"),
        )
        .await
    }

    pub async fn enqueue_production_start(&self, project_id: &str, production_hash: &str) -> anyhow::Result<EnqueueOutcome> {
        let payload = json!({ "projectId": project_id, "productionHash": production_hash });
        let job = NewJob::now(JobType::ProductionStart.as_str(), Some(project_id.to_string()), payload);
        self.jobs.enqueue(job).await
    }

    pub async fn enqueue_production_wait_ready(
        &self,
        project_id: &str,
        production_port: u16,
        production_hash: &str,
    ) -> anyhow::Result<EnqueueOutcome> {
        let payload = json!({
            "projectId": project_id,
            "productionPort": production_port,
            "productionHash": production_hash,
            "startedAt": Utc::now().timestamp_millis(),
            "rescheduleCount": 0,
        });
        let job = NewJob::now(JobType::ProductionWaitReady.as_str(), Some(project_id.to_string()), payload)
            .with_max_attempts(JobType::ProductionWaitReady.default_max_attempts());
        self.jobs.enqueue(job).await
    }

    pub async fn enqueue_production_stop(&self, project_id: &str) -> anyhow::Result<EnqueueOutcome> {
        let payload = json!({ "projectId": project_id });
        self.enqueue_for_project(
            JobType::ProductionStop,
            project_id,
            payload,
            &format!("production.stop:{project_id}"),
        )
        .await
    }

    async fn enqueue_for_project(
        &self,
        job_type: JobType,
        project_id: &str,
        payload: Value,
        dedupe_key: &str,
    ) -> anyhow::Result<EnqueueOutcome> {
        let job = NewJob::now(job_type.as_str(), Some(project_id.to_string()), payload)
            .with_dedupe_key(dedupe_key.to_string())
            .with_max_attempts(job_type.default_max_attempts());
        self.jobs.enqueue(job).await
    }
}
