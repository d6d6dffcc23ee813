//! Interfaces to systems the core treats as opaque (§6.3). Production
//! implementations live in `queue-worker`; tests use the fakes in this
//! module's `testing` submodule.

use async_trait::async_trait;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectStatus {
    Created,
    Starting,
    Running,
    Stopping,
    Stopped,
    Error,
    Deleting,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Created => "created",
            ProjectStatus::Starting => "starting",
            ProjectStatus::Running => "running",
            ProjectStatus::Stopping => "stopping",
            ProjectStatus::Stopped => "stopped",
            ProjectStatus::Error => "error",
            ProjectStatus::Deleting => "deleting",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProjectRecord {
    pub project_id: String,
    pub owner_user_id: String,
    pub status: String,
    pub bootstrap_session_id: Option<String>,
    pub initial_prompt_sent: bool,
    pub staged_prompt: String,
    pub staged_model: Option<String>,
    pub staged_images: Value,
    pub preview_health_url: String,
    pub session_health_url: String,
    pub production_hash: Option<String>,
    pub production_port: Option<i32>,
    pub production_url: Option<String>,
    pub production_status: Option<String>,
}

/// `GetProject`/`UpdateStatus`/field setters/`HardDelete` (§6.3). Handlers
/// must tolerate `get_project` returning `None` as a no-op success.
#[async_trait]
pub trait ProjectStore: Send + Sync {
    /// Creates the project row and stages the prompt/model/images from the
    /// originating `project.create` payload for `opencode.sendUserPrompt` to
    /// pick up once the bootstrap session exists.
    async fn create_project(
        &self,
        project_id: &str,
        owner_user_id: &str,
        prompt: &str,
        model: Option<&str>,
        images: &Value,
    ) -> anyhow::Result<()>;
    async fn get_project(&self, project_id: &str) -> anyhow::Result<Option<ProjectRecord>>;
    async fn update_status(&self, project_id: &str, status: ProjectStatus) -> anyhow::Result<()>;
    async fn set_bootstrap_session_id(&self, project_id: &str, session_id: &str) -> anyhow::Result<()>;
    async fn set_initial_prompt_sent(&self, project_id: &str, sent_message_id: Option<&str>) -> anyhow::Result<()>;
    async fn set_production(
        &self,
        project_id: &str,
        hash: Option<&str>,
        port: Option<i32>,
        url: Option<&str>,
        status: Option<&str>,
    ) -> anyhow::Result<()>;
    async fn hard_delete(&self, project_id: &str) -> anyhow::Result<()>;
    async fn list_project_ids_for_user(&self, user_id: &str) -> anyhow::Result<Vec<String>>;
}

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

/// Opaque command executor for a project's container set (§6.3). Every
/// invocation is consumed only through `{success, stdout, stderr, exit_code}`.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn compose_up(&self, project_id: &str) -> anyhow::Result<CommandOutput>;
    async fn compose_stop(&self, project_id: &str) -> anyhow::Result<CommandOutput>;
    async fn compose_remove_volumes(&self, project_id: &str) -> anyhow::Result<CommandOutput>;
    async fn build_image(&self, project_id: &str, hash: &str) -> anyhow::Result<CommandOutput>;
    async fn run_production_container(
        &self,
        project_id: &str,
        hash: &str,
        port: u16,
    ) -> anyhow::Result<CommandOutput>;
    async fn stop_production_container(&self, project_id: &str) -> anyhow::Result<CommandOutput>;
    async fn remove_production_image(&self, project_id: &str, hash: &str) -> anyhow::Result<CommandOutput>;
    async fn run_build_command(&self, project_id: &str) -> anyhow::Result<(CommandOutput, String)>;
    /// Pushes the session server's auth material into the already-running
    /// session container (§4.6 step 3), once preview and session health
    /// checks both pass.
    async fn push_auth_material(&self, project_id: &str) -> anyhow::Result<CommandOutput>;
}

#[derive(Debug, Clone)]
pub struct SessionMessage {
    pub id: String,
    pub role: String,
    pub text: String,
}

/// `POST /session`, `POST /session/{id}/prompt_async`, `GET /session/{id}/message`,
/// `GET /session` (§6.3).
#[async_trait]
pub trait SessionServerClient: Send + Sync {
    async fn create_session(&self, project_id: &str) -> anyhow::Result<String>;
    async fn send_user_prompt_async(
        &self,
        session_id: &str,
        prompt: &str,
        model: Option<&str>,
        images: &[Value],
    ) -> anyhow::Result<()>;
    async fn list_messages(&self, session_id: &str) -> anyhow::Result<Vec<SessionMessage>>;
}

/// 1xx-5xx counts as "up" (§6.3).
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn is_up(&self, url: &str) -> bool;
}

/// In-memory stand-ins for the four collaborator traits, used by the
/// scenario tests in `queue-core/tests/` so handler logic can be exercised
/// end to end without a container runtime or session server. Only compiled
/// in when the `testing` feature is enabled, which `[dev-dependencies]`
/// turns on for this crate's own test binaries.
#[cfg(feature = "testing")]
pub mod testing {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct FakeProjectStore {
        projects: Mutex<HashMap<String, ProjectRecord>>,
    }

    impl FakeProjectStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn get(&self, project_id: &str) -> Option<ProjectRecord> {
            self.projects.lock().unwrap().get(project_id).cloned()
        }
    }

    #[async_trait]
    impl ProjectStore for FakeProjectStore {
        async fn create_project(
            &self,
            project_id: &str,
            owner_user_id: &str,
            prompt: &str,
            model: Option<&str>,
            images: &Value,
        ) -> anyhow::Result<()> {
            let record = ProjectRecord {
                project_id: project_id.to_string(),
                owner_user_id: owner_user_id.to_string(),
                status: ProjectStatus::Created.as_str().to_string(),
                bootstrap_session_id: None,
                initial_prompt_sent: false,
                staged_prompt: prompt.to_string(),
                staged_model: model.map(str::to_string),
                staged_images: images.clone(),
                preview_health_url: format!("fake://{project_id}/preview"),
                session_health_url: format!("fake://{project_id}/session"),
                production_hash: None,
                production_port: None,
                production_url: None,
                production_status: None,
            };
            self.projects.lock().unwrap().insert(project_id.to_string(), record);
            Ok(())
        }

        async fn get_project(&self, project_id: &str) -> anyhow::Result<Option<ProjectRecord>> {
            Ok(self.projects.lock().unwrap().get(project_id).cloned())
        }

        async fn update_status(&self, project_id: &str, status: ProjectStatus) -> anyhow::Result<()> {
            if let Some(p) = self.projects.lock().unwrap().get_mut(project_id) {
                p.status = status.as_str().to_string();
            }
            Ok(())
        }

        async fn set_bootstrap_session_id(&self, project_id: &str, session_id: &str) -> anyhow::Result<()> {
            if let Some(p) = self.projects.lock().unwrap().get_mut(project_id) {
                p.bootstrap_session_id = Some(session_id.to_string());
            }
            Ok(())
        }

        async fn set_initial_prompt_sent(&self, project_id: &str, _sent_message_id: Option<&str>) -> anyhow::Result<()> {
            if let Some(p) = self.projects.lock().unwrap().get_mut(project_id) {
                p.initial_prompt_sent = true;
            }
            Ok(())
        }

        async fn set_production(
            &self,
            project_id: &str,
            hash: Option<&str>,
            port: Option<i32>,
            url: Option<&str>,
            status: Option<&str>,
        ) -> anyhow::Result<()> {
            if let Some(p) = self.projects.lock().unwrap().get_mut(project_id) {
                if let Some(hash) = hash {
                    p.production_hash = Some(hash.to_string());
                }
                if port.is_some() {
                    p.production_port = port;
                }
                if let Some(url) = url {
                    p.production_url = Some(url.to_string());
                }
                if let Some(status) = status {
                    p.production_status = Some(status.to_string());
                }
            }
            Ok(())
        }

        async fn hard_delete(&self, project_id: &str) -> anyhow::Result<()> {
            self.projects.lock().unwrap().remove(project_id);
            Ok(())
        }

        async fn list_project_ids_for_user(&self, user_id: &str) -> anyhow::Result<Vec<String>> {
            Ok(self
                .projects
                .lock()
                .unwrap()
                .values()
                .filter(|p| p.owner_user_id == user_id)
                .map(|p| p.project_id.clone())
                .collect())
        }
    }

    fn ok(stdout: &str) -> CommandOutput {
        CommandOutput {
            success: true,
            stdout: stdout.to_string(),
            stderr: String::new(),
            exit_code: Some(0),
        }
    }

    fn err(stderr: &str) -> CommandOutput {
        CommandOutput {
            success: false,
            stdout: String::new(),
            stderr: stderr.to_string(),
            exit_code: Some(1),
        }
    }

    /// Container runtime whose `compose_up` fails its first `compose_up_failures`
    /// calls, then succeeds; every other operation always succeeds.
    #[derive(Default)]
    pub struct FakeContainerRuntime {
        pub compose_up_failures: AtomicI64,
        pub compose_up_calls: AtomicU64,
    }

    impl FakeContainerRuntime {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn failing_compose_up(times: i64) -> Self {
            Self {
                compose_up_failures: AtomicI64::new(times),
                compose_up_calls: AtomicU64::new(0),
            }
        }

        pub fn compose_up_call_count(&self) -> u64 {
            self.compose_up_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ContainerRuntime for FakeContainerRuntime {
        async fn compose_up(&self, _project_id: &str) -> anyhow::Result<CommandOutput> {
            self.compose_up_calls.fetch_add(1, Ordering::SeqCst);
            let remaining = self.compose_up_failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.compose_up_failures.fetch_sub(1, Ordering::SeqCst);
                return Ok(err("compose up failed"));
            }
            Ok(ok("containers started"))
        }

        async fn compose_stop(&self, _project_id: &str) -> anyhow::Result<CommandOutput> {
            Ok(ok("stopped"))
        }

        async fn compose_remove_volumes(&self, _project_id: &str) -> anyhow::Result<CommandOutput> {
            Ok(ok("volumes removed"))
        }

        async fn build_image(&self, _project_id: &str, _hash: &str) -> anyhow::Result<CommandOutput> {
            Ok(ok("image built"))
        }

        async fn run_production_container(
            &self,
            _project_id: &str,
            _hash: &str,
            _port: u16,
        ) -> anyhow::Result<CommandOutput> {
            Ok(ok("container running"))
        }

        async fn stop_production_container(&self, _project_id: &str) -> anyhow::Result<CommandOutput> {
            Ok(ok("stopped"))
        }

        async fn remove_production_image(&self, _project_id: &str, _hash: &str) -> anyhow::Result<CommandOutput> {
            Ok(ok("image removed"))
        }

        async fn run_build_command(&self, _project_id: &str) -> anyhow::Result<(CommandOutput, String)> {
            Ok((ok("build succeeded"), "hash-abc123".to_string()))
        }

        async fn push_auth_material(&self, _project_id: &str) -> anyhow::Result<CommandOutput> {
            Ok(ok("auth pushed"))
        }
    }

    #[derive(Default)]
    pub struct FakeSessionServer {
        next_id: AtomicU64,
        messages: Mutex<HashMap<String, Vec<SessionMessage>>>,
    }

    impl FakeSessionServer {
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl SessionServerClient for FakeSessionServer {
        async fn create_session(&self, _project_id: &str) -> anyhow::Result<String> {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            let session_id = format!("session-{id}");
            self.messages.lock().unwrap().insert(session_id.clone(), Vec::new());
            Ok(session_id)
        }

        async fn send_user_prompt_async(
            &self,
            session_id: &str,
            prompt: &str,
            _model: Option<&str>,
            _images: &[Value],
        ) -> anyhow::Result<()> {
            let mut messages = self.messages.lock().unwrap();
            let entry = messages.entry(session_id.to_string()).or_default();
            let id = format!("msg-{}", entry.len());
            entry.push(SessionMessage {
                id,
                role: "user".to_string(),
                text: prompt.to_string(),
            });
            Ok(())
        }

        async fn list_messages(&self, session_id: &str) -> anyhow::Result<Vec<SessionMessage>> {
            Ok(self.messages.lock().unwrap().get(session_id).cloned().unwrap_or_default())
        }
    }

    /// Health probe whose answers are keyed per URL: each URL starts "down" for
    /// `not_ready_calls` calls, then reports "up" forever after.
    #[derive(Default)]
    pub struct FakeHealthProbe {
        not_ready_remaining: Mutex<HashMap<String, i64>>,
    }

    impl FakeHealthProbe {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set_not_ready_calls(&self, url: &str, calls: i64) {
            self.not_ready_remaining.lock().unwrap().insert(url.to_string(), calls);
        }
    }

    #[async_trait]
    impl HealthProbe for FakeHealthProbe {
        async fn is_up(&self, url: &str) -> bool {
            let mut remaining = self.not_ready_remaining.lock().unwrap();
            let entry = remaining.entry(url.to_string()).or_insert(0);
            if *entry > 0 {
                *entry -= 1;
                false
            } else {
                true
            }
        }
    }
}
