use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::jobs::error_codes::JobError;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Job {
    pub id: Uuid,
    pub job_type: String,
    pub state: String,
    pub project_id: Option<String>,
    pub payload_json: Value,
    pub priority: i32,
    pub attempts: i32,
    pub max_attempts: i32,
    pub run_at: DateTime<Utc>,

    pub locked_at: Option<DateTime<Utc>>,
    pub locked_by: Option<String>,
    pub lock_expires_at: Option<DateTime<Utc>>,

    pub dedupe_key: Option<String>,
    pub dedupe_active: Option<String>,

    pub cancel_requested_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,

    pub last_error: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn job_type(&self) -> Option<JobType> {
        JobType::from_str(&self.job_type)
    }
}

#[derive(Debug, Clone)]
pub struct NewJob {
    pub job_type: String,
    pub project_id: Option<String>,
    pub payload_json: Value,
    pub priority: i32,
    pub max_attempts: i32,
    pub run_at: DateTime<Utc>,
    pub dedupe_key: Option<String>,
}

impl NewJob {
    pub fn now(job_type: &str, project_id: Option<String>, payload_json: Value) -> Self {
        Self {
            job_type: job_type.to_string(),
            project_id,
            payload_json,
            priority: 0,
            max_attempts: 3,
            run_at: Utc::now(),
            dedupe_key: None,
        }
    }

    pub fn with_dedupe_key(mut self, key: impl Into<String>) -> Self {
        self.dedupe_key = Some(key.into());
        self
    }

    pub fn with_max_attempts(mut self, n: i32) -> Self {
        self.max_attempts = n;
        self
    }

    pub fn with_priority(mut self, p: i32) -> Self {
        self.priority = p;
        self
    }
}

pub enum JobState {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        }
    }
}

/// Closed set of job types (§6.2). Claim-time validation rejects anything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobType {
    ProjectCreate,
    ProjectDelete,
    ProjectsDeleteAllForUser,
    DockerComposeUp,
    DockerWaitReady,
    DockerEnsureRunning,
    DockerStop,
    OpencodeSessionCreate,
    OpencodeSendUserPrompt,
    ProductionBuild,
    ProductionStart,
    ProductionWaitReady,
    ProductionStop,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::ProjectCreate => "project.create",
            JobType::ProjectDelete => "project.delete",
            JobType::ProjectsDeleteAllForUser => "projects.deleteAllForUser",
            JobType::DockerComposeUp => "docker.composeUp",
            JobType::DockerWaitReady => "docker.waitReady",
            JobType::DockerEnsureRunning => "docker.ensureRunning",
            JobType::DockerStop => "docker.stop",
            JobType::OpencodeSessionCreate => "opencode.sessionCreate",
            JobType::OpencodeSendUserPrompt => "opencode.sendUserPrompt",
            JobType::ProductionBuild => "production.build",
            JobType::ProductionStart => "production.start",
            JobType::ProductionWaitReady => "production.waitReady",
            JobType::ProductionStop => "production.stop",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "project.create" => JobType::ProjectCreate,
            "project.delete" => JobType::ProjectDelete,
            "projects.deleteAllForUser" => JobType::ProjectsDeleteAllForUser,
            "docker.composeUp" => JobType::DockerComposeUp,
            "docker.waitReady" => JobType::DockerWaitReady,
            "docker.ensureRunning" => JobType::DockerEnsureRunning,
            "docker.stop" => JobType::DockerStop,
            "opencode.sessionCreate" => JobType::OpencodeSessionCreate,
            "opencode.sendUserPrompt" => JobType::OpencodeSendUserPrompt,
            "production.build" => JobType::ProductionBuild,
            "production.start" => JobType::ProductionStart,
            "production.waitReady" => JobType::ProductionWaitReady,
            "production.stop" => JobType::ProductionStop,
            _ => return None,
        })
    }

    /// Default `max_attempts` assigned at enqueue time (§6.4): high for wait jobs,
    /// low for everything else.
    pub fn default_max_attempts(&self) -> i32 {
        match self {
            JobType::DockerWaitReady | JobType::ProductionWaitReady => 300,
            _ => 3,
        }
    }
}

// ---------------------------------------------------------------------------
// Payload contracts (§6.2). Deserialized via `validate_payload` right after claim.
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageAttachment {
    pub filename: String,
    pub mime: String,
    pub data_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectCreatePayload {
    pub project_id: String,
    pub owner_user_id: String,
    pub prompt: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub images: Vec<ImageAttachment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectDeletePayload {
    pub project_id: String,
    pub requested_by_user_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectsDeleteAllForUserPayload {
    pub user_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectIdPayload {
    pub project_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DockerComposeUpPayload {
    pub project_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitReadyPayload {
    pub project_id: String,
    pub started_at: i64,
    #[serde(default)]
    pub reschedule_count: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductionStartPayload {
    pub project_id: String,
    pub production_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductionWaitReadyPayload {
    pub project_id: String,
    pub production_port: u16,
    pub production_hash: String,
    pub started_at: i64,
    #[serde(default)]
    pub reschedule_count: i32,
}

/// Validates that `payload` deserializes into the shape required by `job_type`.
/// Called by the Claimer right after a successful atomic claim (§6.2, §9).
pub fn validate_payload(job_type: &str, payload: &Value) -> Result<(), JobError> {
    let Some(jt) = JobType::from_str(job_type) else {
        return Err(JobError::new(
            "UNKNOWN_JOB_TYPE",
            format!("no handler registered for job_type={job_type}"),
        ));
    };

    let payload = payload.clone();
    let ok = match jt {
        JobType::ProjectCreate => serde_json::from_value::<ProjectCreatePayload>(payload).is_ok(),
        JobType::ProjectDelete => serde_json::from_value::<ProjectDeletePayload>(payload).is_ok(),
        JobType::ProjectsDeleteAllForUser => {
            serde_json::from_value::<ProjectsDeleteAllForUserPayload>(payload).is_ok()
        }
        JobType::DockerComposeUp => serde_json::from_value::<DockerComposeUpPayload>(payload).is_ok(),
        JobType::DockerWaitReady => serde_json::from_value::<WaitReadyPayload>(payload).is_ok(),
        JobType::ProductionWaitReady => {
            serde_json::from_value::<ProductionWaitReadyPayload>(payload).is_ok()
        }
        JobType::DockerEnsureRunning
        | JobType::DockerStop
        | JobType::OpencodeSessionCreate
        | JobType::OpencodeSendUserPrompt
        | JobType::ProductionBuild
        | JobType::ProductionStop => serde_json::from_value::<ProjectIdPayload>(payload).is_ok(),
        JobType::ProductionStart => serde_json::from_value::<ProductionStartPayload>(payload).is_ok(),
    };

    if ok {
        Ok(())
    } else {
        Err(JobError::new(
            "BAD_PAYLOAD",
            format!("payload does not match schema for job_type={job_type}"),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unknown_job_type_is_rejected() {
        let err = validate_payload("nonsense.type", &json!({})).unwrap_err();
        assert_eq!(err.code, "UNKNOWN_JOB_TYPE");
    }

    #[test]
    fn project_create_accepts_camel_case_payload() {
        let payload = json!({
            "projectId": "proj-1",
            "ownerUserId": "user-1",
            "prompt": "build me a todo app",
        });
        assert!(validate_payload("project.create", &payload).is_ok());
    }

    #[test]
    fn project_create_rejects_missing_required_field() {
        let payload = json!({ "projectId": "proj-1" });
        let err = validate_payload("project.create", &payload).unwrap_err();
        assert_eq!(err.code, "BAD_PAYLOAD");
    }

    #[test]
    fn docker_wait_ready_accepts_reschedule_count_default() {
        let payload = json!({ "projectId": "proj-1", "startedAt": 1_700_000_000_000_i64 });
        assert!(validate_payload("docker.waitReady", &payload).is_ok());
    }

    #[test]
    fn production_start_requires_production_hash() {
        let payload = json!({ "projectId": "proj-1" });
        assert!(validate_payload("production.start", &payload).is_err());

        let payload = json!({ "projectId": "proj-1", "productionHash": "abc123" });
        assert!(validate_payload("production.start", &payload).is_ok());
    }

    #[test]
    fn bare_project_id_payload_covers_simple_job_types() {
        for job_type in ["docker.ensureRunning", "docker.stop", "opencode.sessionCreate", "production.stop"] {
            let payload = json!({ "projectId": "proj-1" });
            assert!(validate_payload(job_type, &payload).is_ok(), "failed for {job_type}");
        }
    }

    #[test]
    fn default_max_attempts_matches_wait_job_carveout() {
        assert_eq!(JobType::DockerWaitReady.default_max_attempts(), 300);
        assert_eq!(JobType::ProductionWaitReady.default_max_attempts(), 300);
        assert_eq!(JobType::ProjectCreate.default_max_attempts(), 3);
    }
}
