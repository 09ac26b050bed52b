//! Liveness and readiness endpoints

use crate::OrchestratorClient;
use crate::error::Result;

impl OrchestratorClient {
    /// Liveness text from `GET /health`
    pub async fn health(&self) -> Result<String> {
        let url = format!("{}/health", self.base_url);
        let response = self.client.get(&url).send().await?;

        self.handle_text(response).await
    }

    /// Readiness text from `GET /status`
    pub async fn status(&self) -> Result<String> {
        let url = format!("{}/status", self.base_url);
        let response = self.client.get(&url).send().await?;

        self.handle_text(response).await
    }
}
