//! The registry: authoritative in-memory state for projects and services.
//!
//! Owns the project definitions, one [`ServiceHandle`] per service, the
//! shared port allocator, and the process table used for reconciliation.
//! Persistence goes through the [`Store`] on every definition change;
//! runtime state is never persisted. After a restart every service starts
//! out Stopped and live processes are rediscovered through scan/reconcile.

pub mod project;

pub use project::{project_id, Project};

use crate::error::{Error, Result};
use crate::port::{PortAllocator, PortClaim};
use crate::scanner::{match_processes, Confidence, ProcessTable, ScanMatch, SystemProcessTable};
use crate::service::{ServiceHandle, ServiceKind, ServiceStatusView, StopOutcome};
use crate::store::Store;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

/// Result of starting one service during a project-wide start.
#[derive(Debug)]
pub struct ProjectStartOutcome {
    pub service_id: String,
    pub result: Result<u32>,
}

/// Result of stopping one service during a project-wide stop.
#[derive(Debug)]
pub struct ProjectStopOutcome {
    pub service_id: String,
    pub result: Result<StopOutcome>,
}

/// What one reconciliation pass changed and noticed.
#[derive(Debug, Default)]
pub struct ReconcileReport {
    /// Services marked Crashed because their PID vanished.
    pub crashed: Vec<String>,
    /// High-confidence external processes that look adoptable.
    pub suggestions: Vec<ScanMatch>,
}

/// Top-level engine state.
///
/// Lock discipline: `projects` before `handles`, neither held across an
/// await. Handles are `Arc`s cloned out of the map before any async work.
pub struct Registry {
    store: Store,
    ports: Arc<PortAllocator>,
    table: Box<dyn ProcessTable>,
    projects: RwLock<Vec<Project>>,
    handles: RwLock<HashMap<String, Arc<ServiceHandle>>>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry").finish_non_exhaustive()
    }
}

impl Registry {
    /// Build a registry from persisted state. Every service starts Stopped.
    pub fn open(store: Store) -> Result<Self> {
        Self::open_with(store, Arc::new(PortAllocator::new()), Box::new(SystemProcessTable))
    }

    /// Variant with injectable allocator and process table, used by tests.
    pub fn open_with(
        store: Store,
        ports: Arc<PortAllocator>,
        table: Box<dyn ProcessTable>,
    ) -> Result<Self> {
        let projects = store.load_projects()?;
        let mut handles = HashMap::new();
        for project in &projects {
            for spec in &project.services {
                handles.insert(
                    spec.id.clone(),
                    Arc::new(ServiceHandle::new(spec.clone(), Arc::clone(&ports))),
                );
            }
        }
        tracing::info!(
            "Registry loaded: {} project(s), {} service(s)",
            projects.len(),
            handles.len()
        );
        Ok(Self {
            store,
            ports,
            table,
            projects: RwLock::new(projects),
            handles: RwLock::new(handles),
        })
    }

    pub fn ports(&self) -> &PortAllocator {
        &self.ports
    }

    pub fn projects(&self) -> Vec<Project> {
        self.projects.read().clone()
    }

    pub fn project(&self, project_id: &str) -> Result<Project> {
        self.projects
            .read()
            .iter()
            .find(|p| p.id == project_id || p.name == project_id)
            .cloned()
            .ok_or_else(|| Error::ProjectNotFound(project_id.to_string()))
    }

    fn handle(&self, service_id: &str) -> Result<Arc<ServiceHandle>> {
        self.handles
            .read()
            .get(service_id)
            .cloned()
            .ok_or_else(|| Error::ServiceNotFound(service_id.to_string()))
    }

    /// Register a new project and persist the definition.
    pub fn add_project(&self, project: Project) -> Result<()> {
        {
            let mut projects = self.projects.write();
            if projects.iter().any(|p| p.id == project.id) {
                return Err(Error::ProjectExists(project.id.clone()));
            }
            let mut handles = self.handles.write();
            for spec in &project.services {
                handles.insert(
                    spec.id.clone(),
                    Arc::new(ServiceHandle::new(spec.clone(), Arc::clone(&self.ports))),
                );
            }
            projects.push(project);
        }
        self.persist()
    }

    /// Replace a project definition.
    ///
    /// Refused while any of the project's services is active, since live
    /// handles would go stale underneath a running process.
    pub fn edit_project(&self, project: Project) -> Result<()> {
        let old = self.project(&project.id)?;
        for spec in &old.services {
            if let Ok(handle) = self.handle(&spec.id) {
                if handle.status().status.is_active() {
                    return Err(Error::AlreadyActive(spec.name.clone()));
                }
            }
        }

        {
            let mut projects = self.projects.write();
            let mut handles = self.handles.write();
            for spec in &old.services {
                handles.remove(&spec.id);
            }
            for spec in &project.services {
                handles.insert(
                    spec.id.clone(),
                    Arc::new(ServiceHandle::new(spec.clone(), Arc::clone(&self.ports))),
                );
            }
            if let Some(slot) = projects.iter_mut().find(|p| p.id == project.id) {
                *slot = project;
            }
        }
        self.persist()
    }

    /// Remove a project, stopping any of its services that still run.
    pub async fn delete_project(&self, project_id: &str) -> Result<()> {
        let project = self.project(project_id)?;

        for outcome in self.stop_project(&project.id).await? {
            if let Err(e) = outcome.result {
                tracing::warn!(
                    "Stopping '{}' during delete failed: {}",
                    outcome.service_id,
                    e
                );
            }
        }

        {
            let mut projects = self.projects.write();
            let mut handles = self.handles.write();
            for spec in &project.services {
                handles.remove(&spec.id);
            }
            projects.retain(|p| p.id != project.id);
        }
        self.persist()
    }

    pub async fn start_service(&self, service_id: &str) -> Result<u32> {
        let handle = self.handle(service_id)?;
        let pid = handle.start().await?;
        if let Some(port) = handle.spec().port {
            // Allocation history is best-effort bookkeeping
            if let Err(e) = self.store.touch_port_record(port, service_id) {
                tracing::warn!("Could not record port allocation: {}", e);
            }
        }
        Ok(pid)
    }

    pub async fn stop_service(&self, service_id: &str) -> Result<StopOutcome> {
        self.handle(service_id)?.stop().await
    }

    /// Start every service of a project in declared order.
    ///
    /// Outcomes are independent: one service failing (say, a port conflict)
    /// does not prevent the others from starting.
    pub async fn start_project(&self, project_id: &str) -> Result<Vec<ProjectStartOutcome>> {
        let project = self.project(project_id)?;
        let mut outcomes = Vec::with_capacity(project.services.len());
        for spec in &project.services {
            let result = self.start_service(&spec.id).await;
            outcomes.push(ProjectStartOutcome {
                service_id: spec.id.clone(),
                result,
            });
        }
        Ok(outcomes)
    }

    /// Stop every service of a project, in reverse declared order.
    pub async fn stop_project(&self, project_id: &str) -> Result<Vec<ProjectStopOutcome>> {
        let project = self.project(project_id)?;
        let mut outcomes = Vec::with_capacity(project.services.len());
        for spec in project.services.iter().rev() {
            let result = self.stop_service(&spec.id).await;
            outcomes.push(ProjectStopOutcome {
                service_id: spec.id.clone(),
                result,
            });
        }
        Ok(outcomes)
    }

    pub fn service_status(&self, service_id: &str) -> Result<ServiceStatusView> {
        Ok(self.handle(service_id)?.status())
    }

    /// Snapshot of the last `tail` log lines (all of them when `None`).
    pub fn logs(&self, service_id: &str, tail: Option<usize>) -> Result<Vec<String>> {
        let handle = self.handle(service_id)?;
        let logs = handle.logs();
        Ok(match tail {
            Some(n) => logs.tail(n),
            None => logs.snapshot(),
        })
    }

    pub fn list_port_bindings(&self) -> Vec<PortClaim> {
        self.ports.list_bindings()
    }

    /// Enumerate OS processes and match them against project roots.
    pub fn scan(&self) -> Vec<ScanMatch> {
        let roots: Vec<(String, PathBuf)> = self
            .projects
            .read()
            .iter()
            .map(|p| (p.id.clone(), p.root_path.clone()))
            .collect();
        match_processes(self.table.snapshot(), &roots)
    }

    /// Reconcile tracked state against a fresh scan.
    ///
    /// Running services whose PID is gone become Crashed. High-confidence
    /// matches with no corresponding running service are surfaced as
    /// adoption suggestions; nothing is adopted automatically.
    pub async fn reconcile(&self) -> ReconcileReport {
        let matches = self.scan();
        let live: HashSet<u32> = matches.iter().map(|m| m.pid).collect();

        let handles: Vec<Arc<ServiceHandle>> =
            self.handles.read().values().cloned().collect();

        let mut report = ReconcileReport::default();
        for handle in &handles {
            let view = handle.status();
            if !view.status.is_active() {
                continue;
            }
            let Some(pid) = view.pid else { continue };
            if !live.contains(&pid) && handle.mark_crashed(pid).await {
                report.crashed.push(handle.spec().id.clone());
            }
        }

        let managed: HashSet<u32> = handles
            .iter()
            .filter_map(|h| h.status().pid)
            .collect();

        for m in matches {
            if m.confidence != Some(Confidence::High) {
                continue;
            }
            let (Some(project), Some(kind)) = (&m.matched_project, m.matched_kind) else {
                continue;
            };
            if managed.contains(&m.pid) {
                continue;
            }
            if self.running_service_of_kind(project, kind).is_some() {
                continue;
            }
            report.suggestions.push(m);
        }

        report
    }

    /// Attach an external process to the matching service slot.
    ///
    /// Requires a high-confidence match and a service of the matched kind
    /// that is not currently active.
    pub async fn adopt(&self, pid: u32) -> Result<String> {
        let Some(m) = self.scan().into_iter().find(|m| m.pid == pid) else {
            return Err(Error::NoAdoptableMatch(pid));
        };
        if m.confidence != Some(Confidence::High) {
            return Err(Error::NoAdoptableMatch(pid));
        }
        let (Some(project), Some(kind)) = (m.matched_project, m.matched_kind) else {
            return Err(Error::NoAdoptableMatch(pid));
        };

        let spec_id = {
            let projects = self.projects.read();
            let project = projects
                .iter()
                .find(|p| p.id == project)
                .ok_or(Error::NoAdoptableMatch(pid))?;
            project
                .services
                .iter()
                .find(|s| s.kind == kind)
                .map(|s| s.id.clone())
                .ok_or(Error::NoAdoptableMatch(pid))?
        };

        let handle = self.handle(&spec_id)?;
        handle.adopt(pid).await?;
        Ok(spec_id)
    }

    /// Stop everything that is still running. Called on engine shutdown.
    pub async fn shutdown(&self) {
        let project_ids: Vec<String> =
            self.projects.read().iter().map(|p| p.id.clone()).collect();
        for project_id in project_ids {
            match self.stop_project(&project_id).await {
                Ok(outcomes) => {
                    for outcome in outcomes {
                        if let Err(e) = outcome.result {
                            tracing::warn!(
                                "Shutdown: stopping '{}' failed: {}",
                                outcome.service_id,
                                e
                            );
                        }
                    }
                }
                Err(e) => tracing::warn!("Shutdown: {}", e),
            }
        }
    }

    fn running_service_of_kind(&self, project_id: &str, kind: ServiceKind) -> Option<String> {
        let projects = self.projects.read();
        let project = projects.iter().find(|p| p.id == project_id)?;
        for spec in project.services.iter().filter(|s| s.kind == kind) {
            if let Some(handle) = self.handles.read().get(&spec.id) {
                if handle.status().status.is_active() {
                    return Some(spec.id.clone());
                }
            }
        }
        None
    }

    fn persist(&self) -> Result<()> {
        let projects = self.projects.read().clone();
        self.store.save_projects(&projects)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::OsProcess;
    use crate::service::{ServiceSpec, Status};

    /// Process table returning a fixed snapshot.
    struct FakeTable {
        procs: parking_lot::Mutex<Vec<OsProcess>>,
    }

    impl FakeTable {
        fn new(procs: Vec<OsProcess>) -> Box<Self> {
            Box::new(Self {
                procs: parking_lot::Mutex::new(procs),
            })
        }
    }

    impl ProcessTable for FakeTable {
        fn snapshot(&self) -> Vec<OsProcess> {
            self.procs.lock().clone()
        }
    }

    fn registry_with(procs: Vec<OsProcess>) -> (Registry, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let registry = Registry::open_with(
            store,
            Arc::new(PortAllocator::new()),
            FakeTable::new(procs),
        )
        .unwrap();
        (registry, dir)
    }

    fn shop_project(root: &str) -> Project {
        let mut project = Project::new("shop", root);
        let id = project.id.clone();
        project.services.push(ServiceSpec::new(
            &id,
            ServiceKind::Backend,
            "api",
            "sleep 30",
            "/tmp",
        ));
        project.services.push(ServiceSpec::new(
            &id,
            ServiceKind::Frontend,
            "web",
            "sleep 30",
            "/tmp",
        ));
        project
    }

    #[tokio::test]
    async fn add_start_stop_project() {
        let (registry, _dir) = registry_with(vec![]);
        let project = shop_project("/srv/shop");
        let pid = project.id.clone();
        registry.add_project(project).unwrap();

        let outcomes = registry.start_project(&pid).await.unwrap();
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|o| o.result.is_ok()));

        let outcomes = registry.stop_project(&pid).await.unwrap();
        assert!(outcomes.iter().all(|o| o.result.is_ok()));
        // Reverse declared order: frontend stops before backend
        assert!(outcomes[0].service_id.ends_with(":frontend"));
    }

    #[tokio::test]
    async fn duplicate_project_is_rejected() {
        let (registry, _dir) = registry_with(vec![]);
        registry.add_project(shop_project("/srv/shop")).unwrap();
        let err = registry.add_project(shop_project("/srv/shop")).unwrap_err();
        assert!(matches!(err, Error::ProjectExists(_)));
    }

    #[tokio::test]
    async fn one_port_conflict_does_not_block_siblings() {
        let (registry, _dir) = registry_with(vec![]);
        let mut project = shop_project("/srv/shop");
        // Both services want the same port
        project.services[0].port = Some(39321);
        project.services[1].port = Some(39321);
        let pid = project.id.clone();
        registry.add_project(project).unwrap();

        let outcomes = registry.start_project(&pid).await.unwrap();
        assert!(outcomes[0].result.is_ok());
        assert!(matches!(
            outcomes[1].result,
            Err(Error::PortConflict { .. })
        ));
        // The loser stays Stopped
        let loser = &outcomes[1].service_id;
        assert_eq!(
            registry.service_status(loser).unwrap().status,
            Status::Stopped
        );
        registry.stop_project(&pid).await.unwrap();
    }

    #[tokio::test]
    async fn reconcile_marks_vanished_pid_crashed() {
        let (registry, _dir) = registry_with(vec![]);
        let project = shop_project("/srv/shop");
        let pid = project.id.clone();
        let api_id = project.services[0].id.clone();
        registry.add_project(project).unwrap();
        registry.start_service(&api_id).await.unwrap();

        // Fake table never lists the spawned pid, so the service looks dead
        let report = registry.reconcile().await;
        assert_eq!(report.crashed, vec![api_id.clone()]);
        assert_eq!(
            registry.service_status(&api_id).unwrap().status,
            Status::Crashed
        );

        // Restart works after the crash
        registry.start_service(&api_id).await.unwrap();
        registry.stop_project(&pid).await.unwrap();
    }

    #[tokio::test]
    async fn reconcile_suggests_adoptable_processes() {
        let external = OsProcess {
            pid: 4242,
            name: "node".to_string(),
            command_line: "npm run dev".to_string(),
            cwd: Some(PathBuf::from("/srv/shop/web")),
        };
        let (registry, _dir) = registry_with(vec![external]);
        registry.add_project(shop_project("/srv/shop")).unwrap();

        let report = registry.reconcile().await;
        assert_eq!(report.suggestions.len(), 1);
        assert_eq!(report.suggestions[0].pid, 4242);
        assert_eq!(report.suggestions[0].matched_kind, Some(ServiceKind::Frontend));
    }

    #[tokio::test]
    async fn adopt_requires_high_confidence() {
        // Command line mentions the root but cwd is elsewhere: Low
        let external = OsProcess {
            pid: 5151,
            name: "node".to_string(),
            command_line: "node /srv/shop/web/server.js".to_string(),
            cwd: Some(PathBuf::from("/home/dev")),
        };
        let (registry, _dir) = registry_with(vec![external]);
        registry.add_project(shop_project("/srv/shop")).unwrap();

        let err = registry.adopt(5151).await.unwrap_err();
        assert!(matches!(err, Error::NoAdoptableMatch(5151)));
    }

    #[tokio::test]
    async fn definitions_survive_reopen_as_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let project = shop_project("/srv/shop");
        let pid = project.id.clone();
        let api_id = project.services[0].id.clone();

        {
            let store = Store::open(dir.path()).unwrap();
            let registry = Registry::open_with(
                store,
                Arc::new(PortAllocator::new()),
                FakeTable::new(vec![]),
            )
            .unwrap();
            registry.add_project(project).unwrap();
            registry.start_service(&api_id).await.unwrap();
            registry.shutdown().await;
        }

        let store = Store::open(dir.path()).unwrap();
        let registry =
            Registry::open_with(store, Arc::new(PortAllocator::new()), FakeTable::new(vec![]))
                .unwrap();
        assert_eq!(registry.projects().len(), 1);
        assert_eq!(registry.project(&pid).unwrap().services.len(), 2);
        assert_eq!(
            registry.service_status(&api_id).unwrap().status,
            Status::Stopped
        );
    }

    #[tokio::test]
    async fn delete_project_stops_services_first() {
        let (registry, _dir) = registry_with(vec![]);
        let project = shop_project("/srv/shop");
        let pid = project.id.clone();
        let api_id = project.services[0].id.clone();
        registry.add_project(project).unwrap();
        registry.start_service(&api_id).await.unwrap();

        registry.delete_project(&pid).await.unwrap();
        assert!(registry.project(&pid).is_err());
        assert!(matches!(
            registry.service_status(&api_id),
            Err(Error::ServiceNotFound(_))
        ));
    }

    #[tokio::test]
    async fn edit_is_refused_while_active() {
        let (registry, _dir) = registry_with(vec![]);
        let project = shop_project("/srv/shop");
        let pid = project.id.clone();
        let api_id = project.services[0].id.clone();
        registry.add_project(project.clone()).unwrap();
        registry.start_service(&api_id).await.unwrap();

        let err = registry.edit_project(project.clone()).unwrap_err();
        assert!(matches!(err, Error::AlreadyActive(_)));

        registry.stop_project(&pid).await.unwrap();
        registry.edit_project(project).unwrap();
    }
}
