//! Run history endpoints

use crate::OrchestratorClient;
use crate::error::Result;
use keel_core::domain::run::DeploymentRun;
use keel_core::dto::run::RunSummary;
use uuid::Uuid;

impl OrchestratorClient {
    /// Lists recent runs, newest first
    pub async fn list_runs(&self, limit: usize) -> Result<Vec<RunSummary>> {
        let url = format!("{}/runs?limit={}", self.base_url, limit);
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// Gets a full run record
    pub async fn get_run(&self, id: Uuid) -> Result<DeploymentRun> {
        let url = format!("{}/runs/{}", self.base_url, id);
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }
}
