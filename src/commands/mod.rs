//! Implementations of the CLI subcommands.

use crate::cli::{KindArg, PortsCommands};
use crate::output::UserOutput;
use anyhow::Context;
use devdock::detect::{detect_stack, Stack};
use devdock::registry::{Project, Registry};
use devdock::service::{ServiceKind, ServiceSpec, StopOutcome};
use devdock::{Confidence, Error as DockError, PortAllocator};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

impl From<KindArg> for ServiceKind {
    fn from(value: KindArg) -> Self {
        match value {
            KindArg::Frontend => ServiceKind::Frontend,
            KindArg::Backend => ServiceKind::Backend,
        }
    }
}

/// Pick a port for a new service: the stack's conventional default when
/// free, otherwise the first free port in the stack's range.
fn pick_port(ports: &PortAllocator, stack: Stack) -> anyhow::Result<u16> {
    let default = stack.default_port();
    if ports.is_free(default) {
        return Ok(default);
    }
    let (start, end) = stack.suggestion_range();
    Ok(ports.suggest_free(default, start, end)?)
}

fn build_service(
    project_id: &str,
    kind: ServiceKind,
    command: String,
    port: Option<u16>,
    root: &Path,
    ports: &PortAllocator,
    out: &dyn UserOutput,
) -> anyhow::Result<ServiceSpec> {
    let port = match port {
        Some(p) => p,
        None => {
            let stack = detect_stack(&command, root);
            let suggested = pick_port(ports, stack)?;
            out.status(&format!(
                "Detected {stack} for the {kind} service, assigning port {suggested}"
            ));
            suggested
        }
    };
    Ok(
        ServiceSpec::new(project_id, kind, kind.to_string(), command, root)
            .with_port(port),
    )
}

#[allow(clippy::too_many_arguments)]
pub fn run_add(
    registry: &Registry,
    path: PathBuf,
    name: Option<String>,
    frontend: Option<String>,
    frontend_port: Option<u16>,
    backend: Option<String>,
    backend_port: Option<u16>,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    let root = path
        .canonicalize()
        .with_context(|| format!("project directory {} not accessible", path.display()))?;
    let name = name.unwrap_or_else(|| {
        root.file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "project".to_string())
    });

    let mut project = Project::new(name.clone(), root.clone());
    let id = project.id.clone();

    if let Some(command) = backend {
        project.services.push(build_service(
            &id,
            ServiceKind::Backend,
            command,
            backend_port,
            &root,
            registry.ports(),
            out,
        )?);
    }
    if let Some(command) = frontend {
        project.services.push(build_service(
            &id,
            ServiceKind::Frontend,
            command,
            frontend_port,
            &root,
            registry.ports(),
            out,
        )?);
    }

    registry.add_project(project)?;
    out.success(&format!("Added project '{name}' ({id})"));
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub fn run_edit(
    registry: &Registry,
    project: &str,
    name: Option<String>,
    frontend: Option<String>,
    frontend_port: Option<u16>,
    backend: Option<String>,
    backend_port: Option<u16>,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    let mut existing = registry.project(project)?;
    if let Some(name) = name {
        existing.name = name;
    }

    let mut update = |kind: ServiceKind,
                      command: Option<String>,
                      port: Option<u16>|
     -> anyhow::Result<()> {
        if command.is_none() && port.is_none() {
            return Ok(());
        }
        if let Some(slot) = existing.services.iter_mut().find(|s| s.kind == kind) {
            if let Some(command) = command {
                slot.command = command;
            }
            if let Some(port) = port {
                slot.port = Some(port);
            }
        } else if let Some(command) = command {
            let spec = build_service(
                &existing.id,
                kind,
                command,
                port,
                &existing.root_path,
                registry.ports(),
                out,
            )?;
            existing.services.push(spec);
        } else {
            anyhow::bail!("project has no {kind} service; pass --{kind} to add one");
        }
        Ok(())
    };
    update(ServiceKind::Backend, backend, backend_port)?;
    update(ServiceKind::Frontend, frontend, frontend_port)?;

    let name = existing.name.clone();
    registry.edit_project(existing)?;
    out.success(&format!("Updated project '{name}'"));
    Ok(())
}

pub async fn run_remove(
    registry: &Registry,
    project: &str,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    let project = registry.project(project)?;
    registry.delete_project(&project.id).await?;
    out.success(&format!("Removed project '{}'", project.name));
    Ok(())
}

/// Resolve a project selector plus optional kind to concrete service ids,
/// in declared order.
fn resolve_services(
    registry: &Registry,
    project: &str,
    kind: Option<KindArg>,
) -> anyhow::Result<Vec<String>> {
    let project = registry.project(project)?;
    let kind: Option<ServiceKind> = kind.map(Into::into);
    let ids: Vec<String> = project
        .services
        .iter()
        .filter(|s| kind.map_or(true, |k| s.kind == k))
        .map(|s| s.id.clone())
        .collect();
    if ids.is_empty() {
        match kind {
            Some(k) => anyhow::bail!("project '{}' has no {k} service", project.name),
            None => anyhow::bail!("project '{}' has no services defined", project.name),
        }
    }
    Ok(ids)
}

pub async fn run_start(
    registry: &Arc<Registry>,
    project: &str,
    service: Option<KindArg>,
    detach: bool,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    let ids = resolve_services(registry, project, service)?;

    let mut started = 0usize;
    for id in &ids {
        match registry.start_service(id).await {
            Ok(pid) => {
                out.success(&format!("Started {id} (pid {pid})"));
                started += 1;
            }
            Err(e) => {
                out.error(&format!("Failed to start {id}: {e}"));
                if let Some(hint) = e.suggestion() {
                    out.status(&format!("Hint: {hint}"));
                }
            }
        }
    }
    if started == 0 {
        anyhow::bail!("no service started");
    }

    if detach {
        out.status("Detached; processes keep running. Re-attach with `devdock stop` or `devdock adopt`.");
        return Ok(());
    }

    out.blank();
    out.status("Attached. Press Ctrl-C to stop the services.");
    let cancel = CancellationToken::new();
    let reconciler = spawn_reconcile_loop(Arc::clone(registry), cancel.clone());

    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;
    cancel.cancel();
    reconciler.await.ok();

    out.blank();
    out.status("Stopping services...");
    registry.shutdown().await;
    out.success("All services stopped");
    Ok(())
}

/// Periodic reconciliation while a start session is attached, so crashes
/// show up without the user running `devdock scan` by hand.
fn spawn_reconcile_loop(
    registry: Arc<Registry>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(5));
        interval.tick().await; // first tick fires immediately
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    let report = registry.reconcile().await;
                    for id in report.crashed {
                        eprintln!("\x1b[33mService {id} exited unexpectedly (see `devdock logs`)\x1b[0m");
                    }
                }
            }
        }
    })
}

pub async fn run_stop(
    registry: &Registry,
    project: &str,
    service: Option<KindArg>,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    let ids = resolve_services(registry, project, service)?;

    // A fresh invocation starts with every service Stopped; re-attach to
    // anything the scanner can confidently tie to this project first.
    let report = registry.reconcile().await;
    for suggestion in report.suggestions {
        if let Ok(id) = registry.adopt(suggestion.pid).await {
            tracing::debug!("Re-attached pid {} as {}", suggestion.pid, id);
        }
    }

    let mut stopped_any = false;
    for id in &ids {
        match registry.stop_service(id).await {
            Ok(StopOutcome::AlreadyStopped) => out.status(&format!("{id}: not running")),
            Ok(StopOutcome::Stopped) => {
                out.success(&format!("Stopped {id}"));
                stopped_any = true;
            }
            Ok(StopOutcome::ForceKilled) => {
                out.warning(&format!("{id} ignored SIGTERM and was force killed"));
                stopped_any = true;
            }
            Err(e) => out.error(&format!("Failed to stop {id}: {e}")),
        }
    }
    if !stopped_any {
        out.status("Nothing to stop");
    }
    Ok(())
}

pub async fn run_status(
    registry: &Registry,
    project: Option<String>,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    // Refresh liveness before reporting
    let _ = registry.reconcile().await;

    let projects = match project {
        Some(selector) => vec![registry.project(&selector)?],
        None => registry.projects(),
    };
    if projects.is_empty() {
        out.status("No projects registered. Add one with `devdock add <path>`.");
        return Ok(());
    }

    for project in projects {
        out.status(&format!("{} ({})", project.name, project.root_path.display()));
        for spec in &project.services {
            let view = registry.service_status(&spec.id)?;
            let port = spec
                .port
                .map(|p| format!(":{p}"))
                .unwrap_or_default();
            let pid = view
                .pid
                .map(|p| format!(" pid {p}"))
                .unwrap_or_default();
            let uptime = view
                .uptime()
                .map(|d| format!(" up {}s", d.num_seconds()))
                .unwrap_or_default();
            out.status(&format!(
                "  {:<9} {:<8}{}{}{}",
                spec.kind.to_string(),
                view.status.to_string(),
                port,
                pid,
                uptime
            ));
        }
        out.blank();
    }
    Ok(())
}

pub fn run_logs(
    registry: &Registry,
    project: &str,
    service: Option<KindArg>,
    tail: Option<usize>,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    let ids = resolve_services(registry, project, service)?;
    for id in &ids {
        if ids.len() > 1 {
            out.status(&format!("==> {id} <=="));
        }
        for line in registry.logs(id, tail)? {
            out.status(&line);
        }
    }
    Ok(())
}

pub fn run_ports(
    registry: &Registry,
    command: &PortsCommands,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    match command {
        PortsCommands::List => {
            let bindings = registry.list_port_bindings();
            if bindings.is_empty() {
                out.status("No ports currently claimed");
                return Ok(());
            }
            for claim in bindings {
                out.status(&format!(
                    "{:<6} {} (since {})",
                    claim.port,
                    claim.service_id,
                    claim.bound_at.format("%H:%M:%S")
                ));
            }
        }
        PortsCommands::Suggest { command, dir } => {
            let cwd = dir.clone().unwrap_or_else(|| PathBuf::from("."));
            let stack = detect_stack(command, &cwd);
            let port = pick_port(registry.ports(), stack)?;
            out.status(&format!("{stack}: port {port}"));
        }
    }
    Ok(())
}

pub async fn run_scan(registry: &Registry, out: &dyn UserOutput) -> anyhow::Result<()> {
    let report = registry.reconcile().await;

    for id in &report.crashed {
        out.warning(&format!("{id}: process gone, marked crashed"));
    }

    let matches = registry.scan();
    let matched: Vec<_> = matches
        .iter()
        .filter(|m| m.matched_project.is_some())
        .collect();
    if matched.is_empty() {
        out.status("No project-related processes found");
        return Ok(());
    }

    for m in matched {
        let confidence = match m.confidence {
            Some(Confidence::High) => "high",
            Some(Confidence::Low) => "low",
            None => "-",
        };
        let kind = m
            .matched_kind
            .map(|k| k.to_string())
            .unwrap_or_else(|| "?".to_string());
        out.status(&format!(
            "pid {:<7} {:<22} [{} confidence, {}] {}",
            m.pid,
            m.matched_project.as_deref().unwrap_or("-"),
            confidence,
            kind,
            m.command_line
        ));
    }
    if !report.suggestions.is_empty() {
        out.blank();
        for s in &report.suggestions {
            out.status(&format!(
                "pid {} looks like an externally started service; attach it with `devdock adopt {}`",
                s.pid, s.pid
            ));
        }
    }
    Ok(())
}

pub async fn run_adopt(registry: &Registry, pid: u32, out: &dyn UserOutput) -> anyhow::Result<()> {
    match registry.adopt(pid).await {
        Ok(id) => {
            out.success(&format!("Adopted pid {pid} as {id}"));
            Ok(())
        }
        Err(e @ DockError::NoAdoptableMatch(_)) => {
            out.error(&format!("{e}"));
            out.status("Run `devdock scan` to see which processes can be matched to a project.");
            Err(e.into())
        }
        Err(e) => Err(e.into()),
    }
}
