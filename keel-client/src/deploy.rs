//! Deployment trigger endpoint

use crate::OrchestratorClient;
use crate::error::Result;
use keel_core::dto::trigger::TriggerAck;

impl OrchestratorClient {
    /// Triggers a deployment
    ///
    /// Returns the acknowledgement as soon as the orchestrator has scheduled
    /// the run. A refusal under the reject policy surfaces as a 409
    /// `ApiError` (see `ClientError::is_conflict`).
    pub async fn trigger_deploy(&self, payload: Vec<u8>) -> Result<TriggerAck> {
        let url = format!("{}/deploy", self.base_url);
        tracing::debug!("POST {}", url);
        let response = self.client.post(&url).body(payload).send().await?;

        self.handle_response(response).await
    }
}
