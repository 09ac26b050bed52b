//! Reverse proxy configurator
//!
//! Renders one server block for the site, most specific location first, with
//! static assets as the fallback for unmatched paths. The file is written in
//! full, activated through an atomic symlink swap, validated and reloaded.

use keel_core::domain::plan::ProxySpec;
use keel_core::domain::route::RouteTable;
use std::fmt::Write;
use std::io;
use std::path::{Path, PathBuf};

use crate::context::RunContext;
use crate::error::{PipelineError, Result};
use crate::exec::CommandSpec;
use crate::service::atomic::{swap_symlink, write_atomic};

const FORWARD_HEADERS: &[(&str, &str)] = &[
    ("Host", "$host"),
    ("X-Real-IP", "$remote_addr"),
    ("X-Forwarded-For", "$proxy_add_x_forwarded_for"),
    ("X-Forwarded-Proto", "$scheme"),
    ("Upgrade", "$http_upgrade"),
    ("Connection", "\"upgrade\""),
];

/// Files touched by an activation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyActivation {
    pub config: PathBuf,
    pub link: PathBuf,
    pub routes: usize,
}

/// Renders the site configuration
pub fn render_config(spec: &ProxySpec) -> String {
    let table = RouteTable::new(spec.routes.clone());
    let mut out = String::new();

    // Writing into a String cannot fail
    let _ = writeln!(out, "server {{");
    let _ = writeln!(out, "    listen {};", spec.listen);
    let _ = writeln!(out, "    server_name {};", spec.server_name);
    let _ = writeln!(out);

    for rule in table.rules() {
        let _ = writeln!(out, "    location {} {{", rule.prefix);
        let _ = writeln!(out, "        proxy_pass {};", rule.upstream());
        let _ = writeln!(out, "        proxy_http_version 1.1;");
        for (header, value) in FORWARD_HEADERS {
            let _ = writeln!(out, "        proxy_set_header {} {};", header, value);
        }
        let _ = writeln!(out, "    }}");
        let _ = writeln!(out);
    }

    let _ = writeln!(out, "    location / {{");
    let _ = writeln!(out, "        root {};", spec.static_root.display());
    let _ = writeln!(out, "        try_files $uri $uri/ /index.html;");
    let _ = writeln!(out, "    }}");
    let _ = writeln!(out, "}}");
    out
}

/// Site files as they were before this activation
struct PreviousActivation {
    config: Option<String>,
    link_target: Option<PathBuf>,
}

impl PreviousActivation {
    async fn capture(config: &Path, link: &Path) -> Self {
        Self {
            config: tokio::fs::read_to_string(config).await.ok(),
            link_target: tokio::fs::read_link(link).await.ok(),
        }
    }

    /// Puts the previous file and link back so a later reload or reboot
    /// does not pick up a configuration that was rejected
    async fn restore(self, config: &Path, link: &Path) -> io::Result<()> {
        match self.config {
            Some(contents) => write_atomic(config, &contents).await?,
            None => remove_if_present(config).await?,
        }
        match self.link_target {
            Some(target) => swap_symlink(&target, link).await,
            None => remove_if_present(link).await,
        }
    }
}

async fn remove_if_present(path: &Path) -> io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Writes, activates, validates and reloads the proxy configuration
///
/// When validation or reload fails the previous site file and link are
/// restored before the error is returned.
pub async fn configure(ctx: &RunContext, spec: &ProxySpec) -> Result<ProxyActivation> {
    let config = spec.available_dir.join(&spec.site);
    let link = spec.enabled_dir.join(&spec.site);
    let previous = PreviousActivation::capture(&config, &link).await;

    write_atomic(&config, &render_config(spec))
        .await
        .map_err(|e| {
            PipelineError::ProxyReloadFailure(format!(
                "failed to write {}: {}",
                config.display(),
                e
            ))
        })?;

    swap_symlink(&config, &link).await.map_err(|e| {
        PipelineError::ProxyReloadFailure(format!(
            "failed to enable {}: {}",
            link.display(),
            e
        ))
    })?;
    ctx.log_info(format!(
        "Activated {} with {} routes",
        config.display(),
        spec.routes.len()
    ));

    if let Err(err) = validate_and_reload(ctx, spec).await {
        match previous.restore(&config, &link).await {
            Ok(()) => ctx.log_warning(format!(
                "Restored previous proxy configuration at {}",
                config.display()
            )),
            Err(e) => ctx.log_error(format!(
                "Failed to restore previous proxy configuration at {}: {}",
                config.display(),
                e
            )),
        }
        return Err(err);
    }

    Ok(ProxyActivation {
        config,
        link,
        routes: spec.routes.len(),
    })
}

async fn validate_and_reload(ctx: &RunContext, spec: &ProxySpec) -> Result<()> {
    for line in [&spec.test_command, &spec.reload_command] {
        let command = CommandSpec::from_line(line)?;
        let output = ctx
            .exec(&command)
            .await
            .map_err(|e| PipelineError::ProxyReloadFailure(e.to_string()))?;
        if !output.success() {
            return Err(PipelineError::ProxyReloadFailure(format!(
                "`{}` failed ({})",
                command,
                output.failure_summary()
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::MemoryLogSink;
    use crate::testing::{ScriptedRunner, sample_plan};
    use std::sync::Arc;
    use std::time::Duration;
    use uuid::Uuid;

    fn context(runner: Arc<ScriptedRunner>) -> RunContext {
        RunContext::new(
            Uuid::new_v4(),
            Arc::new(MemoryLogSink::new()),
            runner,
            Duration::ZERO,
        )
    }

    fn locations(config: &str) -> Vec<&str> {
        config
            .lines()
            .filter_map(|l| l.trim().strip_prefix("location "))
            .filter_map(|l| l.strip_suffix(" {"))
            .collect()
    }

    #[test]
    fn test_render_orders_specific_locations_first() {
        let dir = tempfile::tempdir().unwrap();
        let plan = sample_plan(dir.path());

        let config = render_config(&plan.proxy);
        let order = locations(&config);

        assert_eq!(order.len(), 10);
        assert_eq!(order.last(), Some(&"/"));

        let position = |prefix: &str| order.iter().position(|p| *p == prefix).unwrap();
        assert!(position("/api/templates") < position("/api/"));
        assert!(position("/api/endpoints") < position("/api/"));
        assert!(position("/api/templates/render") < position("/api/templates"));
        assert!(position("/api/endpoints/logs") < position("/api/endpoints"));
    }

    #[test]
    fn test_render_upstreams_and_static_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let plan = sample_plan(dir.path());

        let config = render_config(&plan.proxy);

        assert!(config.contains("proxy_pass http://127.0.0.1:5001/api/templates;"));
        assert!(config.contains("proxy_pass http://127.0.0.1:5000/api/health;"));
        assert!(config.contains("try_files $uri $uri/ /index.html;"));
        assert!(config.contains(&format!("root {};", plan.proxy.static_root.display())));
    }

    #[tokio::test]
    async fn test_configure_activates_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let plan = sample_plan(dir.path());
        let runner = Arc::new(ScriptedRunner::new());
        let ctx = context(runner.clone());

        let activation = configure(&ctx, &plan.proxy).await.unwrap();

        assert_eq!(activation.routes, 9);
        assert_eq!(std::fs::read_link(&activation.link).unwrap(), activation.config);
        assert_eq!(runner.calls(), vec!["nginx -t", "systemctl reload nginx"]);
    }

    #[tokio::test]
    async fn test_invalid_config_is_not_reloaded() {
        let dir = tempfile::tempdir().unwrap();
        let plan = sample_plan(dir.path());
        let runner = Arc::new(ScriptedRunner::new().fail("nginx -t"));
        let ctx = context(runner.clone());

        let err = configure(&ctx, &plan.proxy).await.unwrap_err();

        assert!(matches!(err, PipelineError::ProxyReloadFailure(_)));
        assert!(!runner.called("systemctl reload"));
    }

    #[tokio::test]
    async fn test_rejected_config_restores_previous_site() {
        let dir = tempfile::tempdir().unwrap();
        let plan = sample_plan(dir.path());
        let config = plan.proxy.available_dir.join(&plan.proxy.site);
        let link = plan.proxy.enabled_dir.join(&plan.proxy.site);
        write_atomic(&config, "# previous good config\n").await.unwrap();
        swap_symlink(&config, &link).await.unwrap();

        let ctx = context(Arc::new(ScriptedRunner::new().fail("nginx -t")));
        let err = configure(&ctx, &plan.proxy).await.unwrap_err();

        assert!(matches!(err, PipelineError::ProxyReloadFailure(_)));
        assert_eq!(
            std::fs::read_to_string(&config).unwrap(),
            "# previous good config\n"
        );
        assert_eq!(std::fs::read_link(&link).unwrap(), config);
    }

    #[tokio::test]
    async fn test_rejected_first_activation_leaves_nothing_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let plan = sample_plan(dir.path());
        let ctx = context(Arc::new(ScriptedRunner::new().fail("systemctl reload nginx")));

        configure(&ctx, &plan.proxy).await.unwrap_err();

        assert!(!plan.proxy.available_dir.join(&plan.proxy.site).exists());
        let link = plan.proxy.enabled_dir.join(&plan.proxy.site);
        assert!(std::fs::symlink_metadata(link).is_err());
    }

    #[tokio::test]
    async fn test_reload_failure_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let plan = sample_plan(dir.path());
        let ctx = context(Arc::new(ScriptedRunner::new().fail("systemctl reload nginx")));

        let err = configure(&ctx, &plan.proxy).await.unwrap_err();

        assert!(matches!(err, PipelineError::ProxyReloadFailure(_)));
    }
}
