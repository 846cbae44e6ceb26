//! Reconciliation and adoption against a controllable process table.

use devdock::port::PortAllocator;
use devdock::registry::{Project, Registry};
use devdock::scanner::{OsProcess, ProcessTable};
use devdock::service::{ServiceKind, ServiceSpec, Status};
use devdock::store::Store;
use std::path::PathBuf;
use std::sync::Arc;

/// Process table whose contents tests mutate between scans.
#[derive(Clone, Default)]
struct ScriptedTable {
    procs: Arc<parking_lot::Mutex<Vec<OsProcess>>>,
}

impl ScriptedTable {
    fn set(&self, procs: Vec<OsProcess>) {
        *self.procs.lock() = procs;
    }
}

impl ProcessTable for ScriptedTable {
    fn snapshot(&self) -> Vec<OsProcess> {
        self.procs.lock().clone()
    }
}

fn external(pid: u32, name: &str, cmdline: &str, cwd: &str) -> OsProcess {
    OsProcess {
        pid,
        name: name.to_string(),
        command_line: cmdline.to_string(),
        cwd: Some(PathBuf::from(cwd)),
    }
}

fn project(root: &str) -> Project {
    let mut project = Project::new("shop", root);
    let id = project.id.clone();
    project.services.push(ServiceSpec::new(
        &id,
        ServiceKind::Frontend,
        "web",
        "sleep 60",
        "/tmp",
    ));
    project.services.push(ServiceSpec::new(
        &id,
        ServiceKind::Backend,
        "api",
        "sleep 60",
        "/tmp",
    ));
    project
}

fn setup() -> (Registry, ScriptedTable, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path()).unwrap();
    let table = ScriptedTable::default();
    let registry = Registry::open_with(
        store,
        Arc::new(PortAllocator::new()),
        Box::new(table.clone()),
    )
    .unwrap();
    (registry, table, dir)
}

#[tokio::test]
async fn adoption_round_trip() {
    let (registry, table, _dir) = setup();
    registry.add_project(project("/srv/shop")).unwrap();

    // Spawn a real process so adoption's liveness check passes, and list it
    // in the scripted table at a High-confidence cwd. Own process group so
    // the stop path's group signal cannot reach the test runner.
    let mut cmd = tokio::process::Command::new("sleep");
    cmd.arg("60");
    #[cfg(unix)]
    cmd.process_group(0);
    let mut child = cmd.spawn().unwrap();
    let pid = child.id().unwrap();
    // Reap in the background so the PID disappears promptly once killed
    tokio::spawn(async move {
        let _ = child.wait().await;
    });
    table.set(vec![external(pid, "node", "npm run dev", "/srv/shop/web")]);

    let report = registry.reconcile().await;
    assert_eq!(report.suggestions.len(), 1, "external process should be suggested");

    let service_id = registry.adopt(pid).await.unwrap();
    assert!(service_id.ends_with(":frontend"));
    let view = registry.service_status(&service_id).unwrap();
    assert_eq!(view.status, Status::Running);
    assert_eq!(view.pid, Some(pid));

    // Adopted service no longer shows up as a suggestion
    let report = registry.reconcile().await;
    assert!(report.suggestions.is_empty());

    // And can be stopped through the normal signal path
    registry.stop_service(&service_id).await.unwrap();
    assert_eq!(
        registry.service_status(&service_id).unwrap().status,
        Status::Stopped
    );
}

#[tokio::test]
async fn adopting_a_dead_pid_fails() {
    let (registry, table, _dir) = setup();
    registry.add_project(project("/srv/shop")).unwrap();

    // Listed in the scan but no such OS process exists
    table.set(vec![external(999_999, "node", "npm run dev", "/srv/shop/web")]);
    assert!(registry.adopt(999_999).await.is_err());
}

#[tokio::test]
async fn low_confidence_match_is_not_suggested() {
    let (registry, table, _dir) = setup();
    registry.add_project(project("/srv/shop")).unwrap();

    table.set(vec![OsProcess {
        pid: 777,
        name: "node".to_string(),
        command_line: "node /srv/shop/web/server.js".to_string(),
        cwd: None,
    }]);

    let report = registry.reconcile().await;
    assert!(report.suggestions.is_empty());
}

#[tokio::test]
async fn nested_project_takes_precedence() {
    let (registry, table, _dir) = setup();
    registry.add_project(project("/srv/mono")).unwrap();
    registry.add_project(project("/srv/mono/packages/web")).unwrap();

    table.set(vec![external(
        888,
        "node",
        "npm run dev",
        "/srv/mono/packages/web/src",
    )]);

    let matches = registry.scan();
    let m = matches.iter().find(|m| m.pid == 888).unwrap();
    let projects = registry.projects();
    let nested = projects
        .iter()
        .find(|p| p.root_path == PathBuf::from("/srv/mono/packages/web"))
        .unwrap();
    assert_eq!(m.matched_project.as_deref(), Some(nested.id.as_str()));
}

#[tokio::test]
async fn scan_errors_never_surface_for_unreadable_processes() {
    // An empty table (everything unreadable) just produces no matches
    let (registry, _table, _dir) = setup();
    registry.add_project(project("/srv/shop")).unwrap();
    assert!(registry.scan().is_empty());
    let report = registry.reconcile().await;
    assert!(report.crashed.is_empty());
    assert!(report.suggestions.is_empty());
}
