use async_trait::async_trait;
use queue_core::collaborators::{SessionMessage, SessionServerClient};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

#[derive(Clone)]
pub struct ReqwestSessionServerClient {
    base_url: String,
    client: reqwest::Client,
}

impl ReqwestSessionServerClient {
    pub fn new(base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("reqwest client");
        Self { base_url, client }
    }
}

#[derive(Deserialize)]
struct CreateSessionResponse {
    id: String,
}

#[derive(Deserialize)]
struct MessageResponse {
    id: String,
    role: String,
    text: String,
}

#[async_trait]
impl SessionServerClient for ReqwestSessionServerClient {
    async fn create_session(&self, project_id: &str) -> anyhow::Result<String> {
        let url = format!("{}/session", self.base_url);
        let resp = self
            .client
            .post(url)
            .json(&json!({ "projectId": project_id }))
            .send()
            .await?
            .error_for_status()?
            .json::<CreateSessionResponse>()
            .await?;
        Ok(resp.id)
    }

    async fn send_user_prompt_async(
        &self,
        session_id: &str,
        prompt: &str,
        model: Option<&str>,
        images: &[Value],
    ) -> anyhow::Result<()> {
        let url = format!("{}/session/{session_id}/prompt_async", self.base_url);
        self.client
            .post(url)
            .json(&json!({
                "prompt": prompt,
                "model": model,
                "images": images,
            }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn list_messages(&self, session_id: &str) -> anyhow::Result<Vec<SessionMessage>> {
        let url = format!("{}/session/{session_id}/message", self.base_url);
        let resp = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json::<Vec<MessageResponse>>()
            .await?;

        Ok(resp
            .into_iter()
            .map(|m| SessionMessage {
                id: m.id,
                role: m.role,
                text: m.text,
            })
            .collect())
    }
}
