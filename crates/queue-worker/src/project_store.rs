use async_trait::async_trait;
use queue_core::collaborators::{ProjectRecord, ProjectStatus, ProjectStore};
use serde_json::Value;
use sqlx::PgPool;

#[derive(Clone)]
pub struct PgProjectStore {
    pool: PgPool,
}

impl PgProjectStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProjectStore for PgProjectStore {
    async fn create_project(
        &self,
        project_id: &str,
        owner_user_id: &str,
        prompt: &str,
        model: Option<&str>,
        images: &Value,
    ) -> anyhow::Result<()> {
        let preview_health_url = format!("http://127.0.0.1:3000/preview/{project_id}/health");
        let session_health_url = format!("http://127.0.0.1:3000/session/{project_id}/health");
        sqlx::query(
            r#"
            INSERT INTO projects (
                project_id, owner_user_id, status, preview_health_url, session_health_url,
                staged_prompt, staged_model, staged_images
            )
            VALUES ($1, $2, 'created', $3, $4, $5, $6, $7)
            ON CONFLICT (project_id) DO NOTHING
            "#,
        )
        .bind(project_id)
        .bind(owner_user_id)
        .bind(preview_health_url)
        .bind(session_health_url)
        .bind(prompt)
        .bind(model)
        .bind(images)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_project(&self, project_id: &str) -> anyhow::Result<Option<ProjectRecord>> {
        let row = sqlx::query_as::<_, ProjectRow>("SELECT * FROM projects WHERE project_id = $1")
            .bind(project_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Into::into))
    }

    async fn update_status(&self, project_id: &str, status: ProjectStatus) -> anyhow::Result<()> {
        sqlx::query("UPDATE projects SET status = $2, updated_at = now() WHERE project_id = $1")
            .bind(project_id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_bootstrap_session_id(&self, project_id: &str, session_id: &str) -> anyhow::Result<()> {
        sqlx::query("UPDATE projects SET bootstrap_session_id = $2, updated_at = now() WHERE project_id = $1")
            .bind(project_id)
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_initial_prompt_sent(&self, project_id: &str, sent_message_id: Option<&str>) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE projects
            SET initial_prompt_sent = true, initial_prompt_message_id = $2, updated_at = now()
            WHERE project_id = $1
            "#,
        )
        .bind(project_id)
        .bind(sent_message_id)
        .execute(&self.pool)
        .await?;
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
        sqlx::query(
            r#"
            UPDATE projects
            SET production_hash = COALESCE($2, production_hash),
                production_port = COALESCE($3, production_port),
                production_url = COALESCE($4, production_url),
                production_status = COALESCE($5, production_status),
                updated_at = now()
            WHERE project_id = $1
            "#,
        )
        .bind(project_id)
        .bind(hash)
        .bind(port)
        .bind(url)
        .bind(status)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn hard_delete(&self, project_id: &str) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM projects WHERE project_id = $1")
            .bind(project_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_project_ids_for_user(&self, user_id: &str) -> anyhow::Result<Vec<String>> {
        let ids: Vec<String> = sqlx::query_scalar("SELECT project_id FROM projects WHERE owner_user_id = $1")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(ids)
    }
}

#[derive(sqlx::FromRow)]
struct ProjectRow {
    project_id: String,
    owner_user_id: String,
    status: String,
    bootstrap_session_id: Option<String>,
    initial_prompt_sent: bool,
    staged_prompt: String,
    staged_model: Option<String>,
    staged_images: Value,
    production_hash: Option<String>,
    production_port: Option<i32>,
    production_url: Option<String>,
    production_status: Option<String>,
    preview_health_url: String,
    session_health_url: String,
}

impl From<ProjectRow> for ProjectRecord {
    fn from(r: ProjectRow) -> Self {
        ProjectRecord {
            project_id: r.project_id,
            owner_user_id: r.owner_user_id,
            status: r.status,
            bootstrap_session_id: r.bootstrap_session_id,
            initial_prompt_sent: r.initial_prompt_sent,
            staged_prompt: r.staged_prompt,
            staged_model: r.staged_model,
            staged_images: r.staged_images,
            production_hash: r.production_hash,
            production_port: r.production_port,
            production_url: r.production_url,
            production_status: r.production_status,
            preview_health_url: r.preview_health_url,
            session_health_url: r.session_health_url,
        }
    }
}
