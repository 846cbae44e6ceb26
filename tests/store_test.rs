//! Persistence behaviour across engine restarts.

use devdock::port::PortAllocator;
use devdock::registry::{Project, Registry};
use devdock::scanner::{OsProcess, ProcessTable};
use devdock::service::{ServiceKind, ServiceSpec, Status};
use devdock::store::Store;
use std::sync::Arc;

struct EmptyTable;

impl ProcessTable for EmptyTable {
    fn snapshot(&self) -> Vec<OsProcess> {
        Vec::new()
    }
}

fn open_registry(dir: &std::path::Path) -> Registry {
    let store = Store::open(dir).unwrap();
    Registry::open_with(store, Arc::new(PortAllocator::new()), Box::new(EmptyTable)).unwrap()
}

fn sample_project() -> Project {
    let mut project = Project::new("blog", "/srv/blog");
    let id = project.id.clone();
    project.services.push(
        ServiceSpec::new(&id, ServiceKind::Backend, "api", "sleep 60", "/tmp").with_port(39510),
    );
    project
}

#[tokio::test]
async fn definitions_persist_but_runtime_state_does_not() {
    let dir = tempfile::tempdir().unwrap();
    let project = sample_project();
    let project_id = project.id.clone();
    let service_id = project.services[0].id.clone();

    let leaked_pid;
    {
        let registry = open_registry(dir.path());
        registry.add_project(project).unwrap();
        leaked_pid = registry.start_service(&service_id).await.unwrap();
        assert_eq!(
            registry.service_status(&service_id).unwrap().status,
            Status::Running
        );
        // Simulate a hard exit: no shutdown, the process outlives us
    }

    let registry = open_registry(dir.path());
    let loaded = registry.project(&project_id).unwrap();
    assert_eq!(loaded.name, "blog");
    assert_eq!(loaded.services[0].port, Some(39510));
    // Prior Running status is never trusted across a restart
    assert_eq!(
        registry.service_status(&service_id).unwrap().status,
        Status::Stopped
    );

    let report = registry.reconcile().await;
    assert!(report.crashed.is_empty());

    // Clean up the intentionally leaked process
    #[cfg(unix)]
    {
        let _ = nix::sys::signal::kill(
            nix::unistd::Pid::from_raw(leaked_pid as i32),
            nix::sys::signal::Signal::SIGKILL,
        );
    }
    #[cfg(not(unix))]
    let _ = leaked_pid;
}

#[tokio::test]
async fn port_history_accumulates() {
    let dir = tempfile::tempdir().unwrap();
    let service_id;
    {
        let registry = open_registry(dir.path());
        let project = sample_project();
        service_id = project.services[0].id.clone();
        registry.add_project(project).unwrap();
        registry.start_service(&service_id).await.unwrap();
        registry.stop_service(&service_id).await.unwrap();
    }

    let store = Store::open(dir.path()).unwrap();
    let records = store.load_port_records().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].port, 39510);
    assert_eq!(records[0].service_id, service_id);
}

#[tokio::test]
async fn removing_a_project_persists() {
    let dir = tempfile::tempdir().unwrap();
    let project = sample_project();
    let project_id = project.id.clone();

    {
        let registry = open_registry(dir.path());
        registry.add_project(project).unwrap();
        registry.delete_project(&project_id).await.unwrap();
    }

    let registry = open_registry(dir.path());
    assert!(registry.project(&project_id).is_err());
    assert!(registry.projects().is_empty());
}

#[test]
fn corrupt_store_is_reported_not_paniced() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("projects.json"), "][").unwrap();

    let store = Store::open(dir.path()).unwrap();
    let err = Registry::open_with(
        store,
        Arc::new(PortAllocator::new()),
        Box::new(EmptyTable),
    )
    .unwrap_err();
    assert!(matches!(err, devdock::Error::Store(_)));
}
