//! Service definitions and the lifecycle state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Role a service plays within its project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    Frontend,
    Backend,
}

impl std::fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceKind::Frontend => f.write_str("frontend"),
            ServiceKind::Backend => f.write_str("backend"),
        }
    }
}

/// Persistent definition of a service: what to run, where, and on which port.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSpec {
    /// Unique within the registry, `<project_id>:<kind>`.
    pub id: String,
    pub project_id: String,
    pub kind: ServiceKind,
    pub name: String,
    /// Shell command line, run via `/bin/sh -c`.
    pub command: String,
    pub working_dir: PathBuf,
    pub port: Option<u16>,
    /// Extra environment merged over the inherited environment.
    #[serde(default)]
    pub runtime_env: HashMap<String, String>,
}

impl ServiceSpec {
    pub fn new(
        project_id: impl Into<String>,
        kind: ServiceKind,
        name: impl Into<String>,
        command: impl Into<String>,
        working_dir: impl Into<PathBuf>,
    ) -> Self {
        let project_id = project_id.into();
        Self {
            id: format!("{project_id}:{kind}"),
            project_id,
            kind,
            name: name.into(),
            command: command.into(),
            working_dir: working_dir.into(),
            port: None,
            runtime_env: HashMap::new(),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }
}

/// Service lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Stopped,
    Starting,
    Running,
    Stopping,
    /// The process exited while the service was supposed to be running.
    Crashed,
}

impl Status {
    /// Whether a transition from `self` to `next` is legal.
    ///
    /// Same-state transitions are allowed (idempotent operations). A crashed
    /// service may be started again without passing through Stopped.
    pub fn is_valid_transition(self, next: Status) -> bool {
        use Status::*;
        if self == next {
            return true;
        }
        matches!(
            (self, next),
            (Stopped, Starting)
                | (Crashed, Starting)
                | (Starting, Running)
                | (Starting, Crashed)
                | (Starting, Stopping)
                | (Running, Stopping)
                | (Running, Crashed)
                | (Stopping, Stopped)
        )
    }

    /// States in which the service owns (or may own) a live process.
    pub fn is_active(self) -> bool {
        matches!(self, Status::Starting | Status::Running | Status::Stopping)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Status::Stopped => "stopped",
            Status::Starting => "starting",
            Status::Running => "running",
            Status::Stopping => "stopping",
            Status::Crashed => "crashed",
        };
        f.write_str(s)
    }
}

/// Point-in-time view of a service's runtime state.
#[derive(Debug, Clone)]
pub struct ServiceStatusView {
    pub status: Status,
    pub pid: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
    /// Exit code of the last observed process exit, if any.
    pub last_exit: Option<i32>,
}

impl ServiceStatusView {
    pub fn uptime(&self) -> Option<chrono::Duration> {
        match (self.status, self.started_at) {
            (Status::Running, Some(at)) => Some(Utc::now() - at),
            _ => None,
        }
    }
}
