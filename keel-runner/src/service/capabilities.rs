//! Capability probes and provisioners
//!
//! Probing is side-effect-free: it runs the plan's detection command and,
//! for service-backed capabilities, asks both the service manager and the
//! process table whether the capability is actually running. Provisioning
//! installs missing capabilities (primary procedure, then fallback), starts
//! and enables their service, waits for it to settle and probes again.

use keel_core::domain::capability::{
    Availability, CapabilityReport, CapabilitySpec, CommandLine, ProbeResult,
};

use crate::context::RunContext;
use crate::error::Result;
use crate::exec::CommandSpec;

/// Outcome of provisioning every capability of a plan
#[derive(Debug, Clone, Default)]
pub struct ProvisionSummary {
    pub reports: Vec<CapabilityReport>,
}

impl ProvisionSummary {
    /// Names of capabilities that are still missing or not running
    pub fn unavailable(&self) -> Vec<String> {
        self.reports
            .iter()
            .filter(|r| r.availability == Availability::Unavailable)
            .map(|r| r.name.clone())
            .collect()
    }

    pub fn installed(&self) -> Vec<String> {
        self.reports
            .iter()
            .filter(|r| r.installed)
            .map(|r| r.name.clone())
            .collect()
    }

    pub fn started(&self) -> Vec<String> {
        self.reports
            .iter()
            .filter(|r| r.started)
            .map(|r| r.name.clone())
            .collect()
    }

    /// True when nothing had to be installed or started
    pub fn already_satisfied(&self) -> bool {
        self.reports
            .iter()
            .all(|r| !r.installed && !r.started && r.availability == Availability::Available)
    }
}

/// Checks whether a capability is present and running
pub async fn probe(ctx: &RunContext, spec: &CapabilitySpec) -> Result<ProbeResult> {
    let present = succeeds(ctx, &CommandSpec::from_line(&spec.probe)?).await;
    if !present {
        return Ok(ProbeResult::default());
    }

    // The service manager may report "active" for a unit whose process died,
    // so both checks must pass.
    let service_active = match &spec.service {
        Some(unit) => {
            succeeds(
                ctx,
                &CommandSpec::new("systemctl").args(["is-active", "--quiet", unit.as_str()]),
            )
            .await
        }
        None => true,
    };

    let process_alive = match &spec.process {
        Some(name) => succeeds(ctx, &CommandSpec::new("pgrep").args(["-x", name.as_str()])).await,
        None => true,
    };

    Ok(ProbeResult {
        present,
        running: service_active && process_alive,
    })
}

/// Brings one capability to the present-and-running state if possible
pub async fn provision(ctx: &RunContext, spec: &CapabilitySpec) -> Result<CapabilityReport> {
    let before = probe(ctx, spec).await?;
    if before.is_satisfied() {
        ctx.log_debug(format!("Capability '{}' present and running", spec.name));
        return Ok(CapabilityReport {
            name: spec.name.clone(),
            availability: Availability::Available,
            installed: false,
            started: false,
            probe: before,
        });
    }

    let mut installed = false;
    if !before.present {
        ctx.log_info(format!("Capability '{}' not present, installing", spec.name));
        installed = true;
        install(ctx, spec).await;
    }

    let mut started = false;
    if let Some(unit) = &spec.service {
        started = true;
        start_service(ctx, unit).await;
        tokio::time::sleep(ctx.settle_interval).await;
    }

    let after = probe(ctx, spec).await?;
    let availability = if after.is_satisfied() {
        ctx.log_info(format!("Capability '{}' is available", spec.name));
        Availability::Available
    } else {
        ctx.log_warning(format!(
            "Capability '{}' unavailable after provisioning (present={}, running={})",
            spec.name, after.present, after.running
        ));
        Availability::Unavailable
    };

    Ok(CapabilityReport {
        name: spec.name.clone(),
        availability,
        installed,
        started,
        probe: after,
    })
}

/// Provisions every capability in declaration order
///
/// A capability that cannot be provisioned at all is reported unavailable;
/// the remaining capabilities are still probed.
pub async fn provision_all(ctx: &RunContext, specs: &[CapabilitySpec]) -> ProvisionSummary {
    let mut summary = ProvisionSummary::default();
    for spec in specs {
        let report = match provision(ctx, spec).await {
            Ok(report) => report,
            Err(e) => {
                ctx.log_warning(format!(
                    "Capability '{}' could not be provisioned: {}",
                    spec.name, e
                ));
                CapabilityReport {
                    name: spec.name.clone(),
                    availability: Availability::Unavailable,
                    installed: false,
                    started: false,
                    probe: ProbeResult::default(),
                }
            }
        };
        summary.reports.push(report);
    }
    summary
}

/// Runs the primary install procedure, then the fallback if it fails
async fn install(ctx: &RunContext, spec: &CapabilitySpec) {
    if run_install(ctx, &spec.install).await {
        return;
    }

    match &spec.fallback {
        Some(fallback) => {
            ctx.log_warning(format!(
                "Primary install of '{}' failed, trying fallback `{}`",
                spec.name, fallback
            ));
            if !run_install(ctx, fallback).await {
                ctx.log_warning(format!("Fallback install of '{}' failed", spec.name));
            }
        }
        None => ctx.log_warning(format!("Install of '{}' failed", spec.name)),
    }
}

/// Runs one install procedure; a malformed procedure counts as a failed install
async fn run_install(ctx: &RunContext, line: &CommandLine) -> bool {
    match CommandSpec::from_line(line) {
        Ok(spec) => succeeds(ctx, &spec).await,
        Err(e) => {
            ctx.log_warning(format!("Cannot run install procedure: {}", e));
            false
        }
    }
}

/// Asks the service manager to start and enable a unit
///
/// Failures are only logged; the follow-up probe decides availability.
async fn start_service(ctx: &RunContext, unit: &str) {
    for action in ["start", "enable"] {
        let spec = CommandSpec::new("systemctl").args([action, unit]);
        if !succeeds(ctx, &spec).await {
            ctx.log_warning(format!("`systemctl {} {}` failed", action, unit));
        }
    }
}

/// Runs a command and reports whether it exited successfully
///
/// A command that cannot be spawned counts as a failure.
async fn succeeds(ctx: &RunContext, spec: &CommandSpec) -> bool {
    match ctx.exec(spec).await {
        Ok(output) => output.success(),
        Err(e) => {
            ctx.log_debug(format!("{}", e));
            false
        }
    }
}
