//! Post-deployment verifier
//!
//! Every finding is a warning. Verification never aborts or rolls back the
//! run; it only enriches the log with diagnostics.

use keel_core::domain::plan::VerifySpec;
use std::time::Duration;
use tokio::net::TcpStream;

use crate::context::RunContext;
use crate::error::PipelineError;

/// Findings of a verification pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyReport {
    pub bound_ports: Vec<u16>,
    pub reachable: Vec<String>,
    pub warnings: Vec<String>,
}

/// Checks ports, endpoints and the processes that failed to start
pub async fn verify(
    ctx: &RunContext,
    spec: &VerifySpec,
    failed_processes: &[String],
) -> VerifyReport {
    let timeout = Duration::from_secs(spec.timeout_secs.max(1));
    let mut report = VerifyReport::default();

    if !failed_processes.is_empty() {
        let warning = PipelineError::ProcessCheckWarning(format!(
            "processes failed to start: {}",
            failed_processes.join(", ")
        ));
        report.warnings.push(warning.to_string());
    }

    for &port in &spec.ports {
        if port_bound(port, timeout).await {
            report.bound_ports.push(port);
        } else {
            report.warnings.push(
                PipelineError::ProcessCheckWarning(format!("nothing listening on port {}", port))
                    .to_string(),
            );
        }
    }

    if !spec.endpoints.is_empty() {
        match reqwest::Client::builder().timeout(timeout).build() {
            Ok(client) => {
                for url in &spec.endpoints {
                    match probe_endpoint(&client, url).await {
                        Ok(()) => report.reachable.push(url.clone()),
                        Err(reason) => report.warnings.push(
                            PipelineError::ProcessCheckWarning(format!("{}: {}", url, reason))
                                .to_string(),
                        ),
                    }
                }
            }
            Err(e) => report
                .warnings
                .push(format!("could not build HTTP client: {}", e)),
        }
    }

    for warning in &report.warnings {
        ctx.log_warning(warning.clone());
    }
    ctx.log_info(format!(
        "Verification: {}/{} ports bound, {}/{} endpoints reachable",
        report.bound_ports.len(),
        spec.ports.len(),
        report.reachable.len(),
        spec.endpoints.len()
    ));

    report
}

async fn port_bound(port: u16, timeout: Duration) -> bool {
    matches!(
        tokio::time::timeout(timeout, TcpStream::connect(("127.0.0.1", port))).await,
        Ok(Ok(_))
    )
}

/// Any response short of a server error counts as reachable
async fn probe_endpoint(client: &reqwest::Client, url: &str) -> Result<(), String> {
    let response = client.get(url).send().await.map_err(|e| e.to_string())?;
    if response.status().is_server_error() {
        return Err(format!("responded with {}", response.status()));
    }
    Ok(())
}
