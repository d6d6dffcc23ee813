use async_trait::async_trait;
use queue_core::collaborators::HealthProbe;
use std::time::Duration;

#[derive(Clone)]
pub struct ReqwestHealthProbe {
    client: reqwest::Client,
}

impl ReqwestHealthProbe {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .expect("reqwest client");
        Self { client }
    }
}

impl Default for ReqwestHealthProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HealthProbe for ReqwestHealthProbe {
    async fn is_up(&self, url: &str) -> bool {
        matches!(self.client.get(url).send().await, Ok(resp) if resp.status().as_u16() < 600)
    }
}
