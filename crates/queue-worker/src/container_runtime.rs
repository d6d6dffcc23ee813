use async_trait::async_trait;
use queue_core::collaborators::{CommandOutput, ContainerRuntime};
use sha2_or_fallback::content_hash;
use std::path::PathBuf;
use tokio::process::Command;

/// Command executor rooted at `projects_dir/{project_id}`. Every invocation
/// is consumed only through `{success, stdout, stderr, exit_code}` (§6.3);
/// the core never parses stdout/stderr itself.
#[derive(Clone)]
pub struct ShellContainerRuntime {
    projects_dir: PathBuf,
}

impl ShellContainerRuntime {
    pub fn new(projects_dir: PathBuf) -> Self {
        Self { projects_dir }
    }

    fn project_dir(&self, project_id: &str) -> PathBuf {
        self.projects_dir.join(project_id)
    }

    async fn run(&self, project_id: &str, args: &[&str]) -> anyhow::Result<CommandOutput> {
        let output = Command::new("docker")
            .current_dir(self.project_dir(project_id))
            .args(args)
            .output()
            .await?;

        Ok(CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code(),
        })
    }
}

#[async_trait]
impl ContainerRuntime for ShellContainerRuntime {
    async fn compose_up(&self, project_id: &str) -> anyhow::Result<CommandOutput> {
        self.run(project_id, &["compose", "up", "-d"]).await
    }

    async fn compose_stop(&self, project_id: &str) -> anyhow::Result<CommandOutput> {
        self.run(project_id, &["compose", "down"]).await
    }

    async fn compose_remove_volumes(&self, project_id: &str) -> anyhow::Result<CommandOutput> {
        self.run(project_id, &["compose", "down", "--volumes"]).await
    }

    async fn build_image(&self, project_id: &str, hash: &str) -> anyhow::Result<CommandOutput> {
        let tag = format!("queueflow-prod-{project_id}-{hash}");
        self.run(project_id, &["build", "-t", &tag, "."]).await
    }

    async fn run_production_container(
        &self,
        project_id: &str,
        hash: &str,
        port: u16,
    ) -> anyhow::Result<CommandOutput> {
        let tag = format!("queueflow-prod-{project_id}-{hash}");
        let container_name = format!("queueflow-prod-{project_id}");
        let port_mapping = format!("{port}:3000");
        self.run(
            project_id,
            &[
                "run",
                "-d",
                "--name",
                &container_name,
                "-p",
                &port_mapping,
                &tag,
            ],
        )
        .await
    }

    async fn stop_production_container(&self, project_id: &str) -> anyhow::Result<CommandOutput> {
        let container_name = format!("queueflow-prod-{project_id}");
        self.run(project_id, &["rm", "-f", &container_name]).await
    }

    async fn remove_production_image(&self, project_id: &str, hash: &str) -> anyhow::Result<CommandOutput> {
        let tag = format!("queueflow-prod-{project_id}-{hash}");
        self.run(project_id, &["rmi", "-f", &tag]).await
    }

    async fn push_auth_material(&self, project_id: &str) -> anyhow::Result<CommandOutput> {
        let api_key = std::env::var("OPENCODE_API_KEY").unwrap_or_default();
        let script = format!(
            "mkdir -p /root/.config/opencode && printf '%s' '{api_key}' > /root/.config/opencode/auth.json"
        );
        self.run(project_id, &["compose", "exec", "-T", "session", "sh", "-c", &script]).await
    }

    async fn run_build_command(&self, project_id: &str) -> anyhow::Result<(CommandOutput, String)> {
        let output = Command::new("npm")
            .current_dir(self.project_dir(project_id))
            .args(["run", "build"])
            .output()
            .await?;

        let out = CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code(),
        };

        let hash = content_hash(&out.stdout);
        Ok((out, hash))
    }
}

/// Content hash of build output, used as the `productionHash` (§4.6 step 6).
/// Not a cryptographic hash — just a short, stable fingerprint.
mod sha2_or_fallback {
    pub fn content_hash(content: &str) -> String {
        let mut hash: u64 = 1469598103934665603;
        for b in content.as_bytes() {
            hash ^= *b as u64;
            hash = hash.wrapping_mul(1099511628211);
        }
        format!("{hash:016x}")
    }
}
