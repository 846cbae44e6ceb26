use miette::Diagnostic;
use std::io;
use thiserror::Error;

/// Why a port reservation was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictKind {
    /// The port is already claimed by another service managed by this engine.
    Managed { held_by: String },
    /// The port is bound by a listening socket outside our bookkeeping.
    External {
        pid: Option<u32>,
        process_name: Option<String>,
    },
}

impl std::fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConflictKind::Managed { held_by } => write!(f, "held by managed service '{held_by}'"),
            ConflictKind::External { pid, process_name } => match (pid, process_name) {
                (Some(pid), Some(name)) => write!(f, "bound by external process '{name}' (PID {pid})"),
                (Some(pid), None) => write!(f, "bound by external process (PID {pid})"),
                _ => write!(f, "bound by an external process"),
            },
        }
    }
}

#[derive(Error, Diagnostic, Debug)]
pub enum Error {
    #[error("Service '{0}' is already active")]
    #[diagnostic(
        code(devdock::service::already_active),
        help("Stop the service first with `devdock stop {0}`")
    )]
    AlreadyActive(String),

    #[error("Port {port} is unavailable: {kind}")]
    #[diagnostic(
        code(devdock::port::conflict),
        help("Find what's using the port with: lsof -i :{port} (macOS/Linux)\nOr pick a different port with `devdock ports suggest`")
    )]
    PortConflict { port: u16, kind: ConflictKind },

    #[error("Port {0} is outside the valid range 1-65535")]
    PortOutOfRange(u32),

    #[error("No free port found in range {start}-{end}")]
    #[diagnostic(
        code(devdock::port::exhausted),
        help("Free up ports in the range or widen it")
    )]
    PortExhausted { start: u16, end: u16 },

    #[error("Service '{service}' failed to spawn: {source}")]
    #[diagnostic(
        code(devdock::service::spawn_failed),
        help("Check that the command exists and is executable, and that the working directory is valid")
    )]
    SpawnFailed {
        service: String,
        #[source]
        source: io::Error,
    },

    #[error("Service '{0}' did not terminate, even after SIGKILL")]
    #[diagnostic(
        code(devdock::service::stop_timeout),
        help("The process may be stuck in uninterruptible sleep. Inspect it with: ps -o stat -p <pid>")
    )]
    StopTimeout(String),

    #[error("Service not found: {0}")]
    #[diagnostic(
        code(devdock::service::not_found),
        help("List known services with `devdock status`")
    )]
    ServiceNotFound(String),

    #[error("Project already exists: {0}")]
    #[diagnostic(
        code(devdock::project::exists),
        help("Use `devdock edit` to change the existing project")
    )]
    ProjectExists(String),

    #[error("Project not found: {0}")]
    #[diagnostic(
        code(devdock::project::not_found),
        help("List known projects with `devdock status`")
    )]
    ProjectNotFound(String),

    #[error("No adoptable match for PID {0}")]
    NoAdoptableMatch(u32),

    #[error("Store error: {0}")]
    #[diagnostic(code(devdock::store::error))]
    Store(String),

    #[error("Invalid PID {pid}: {reason}")]
    InvalidPid { pid: u32, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns a helpful suggestion for resolving this error, if available.
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Error::AlreadyActive(name) => Some(format!(
                "Stop the service first with: devdock stop {name}"
            )),
            Error::PortConflict { port, kind } => match kind {
                ConflictKind::Managed { held_by } => Some(format!(
                    "Port {port} is claimed by '{held_by}'. Stop it or configure a different port."
                )),
                ConflictKind::External { pid: Some(pid), process_name } => {
                    let name = process_name.as_deref().unwrap_or("the process");
                    Some(format!(
                        "Port {port} is used by {name} (PID {pid}). Stop it or pick a different port."
                    ))
                }
                ConflictKind::External { .. } => Some(format!(
                    "Port {port} is bound outside devdock. Find the owner with: lsof -i :{port}"
                )),
            },
            Error::ServiceNotFound(_) | Error::ProjectNotFound(_) => {
                Some("Check `devdock status` for known projects and services.".to_string())
            }
            Error::SpawnFailed { .. } => {
                Some("Check that the command exists and is executable".to_string())
            }
            Error::Store(_) => Some(
                "The data directory may be corrupted. Inspect the JSON files under ~/.devdock/".to_string(),
            ),
            _ => None,
        }
    }
}

/// Validates and converts a u32 PID to nix::unistd::Pid safely.
/// Returns Err for PID 0 (process group), PID 1 (init), or values > i32::MAX.
#[cfg(unix)]
pub fn validate_pid(pid: u32, service_name: &str) -> Result<nix::unistd::Pid> {
    if pid == 0 {
        return Err(Error::InvalidPid {
            pid,
            reason: format!(
                "PID 0 is invalid for service '{service_name}' (refers to process group, not a process)"
            ),
        });
    }
    if pid == 1 {
        return Err(Error::InvalidPid {
            pid,
            reason: format!("refusing to operate on PID 1 (init) for service '{service_name}'"),
        });
    }
    if pid > i32::MAX as u32 {
        return Err(Error::InvalidPid {
            pid,
            reason: format!(
                "PID {pid} exceeds i32::MAX for service '{service_name}', cannot convert safely"
            ),
        });
    }
    Ok(nix::unistd::Pid::from_raw(pid as i32))
}

/// Same as validate_pid but allows PID 1 to pass for existence checks.
/// Use validate_pid for signal operations; use this for read-only checks.
#[cfg(unix)]
pub fn validate_pid_for_check(pid: u32) -> Option<nix::unistd::Pid> {
    if pid == 0 || pid > i32::MAX as u32 {
        return None;
    }
    Some(nix::unistd::Pid::from_raw(pid as i32))
}

/// Check whether a process with the given PID currently exists.
///
/// Uses `kill(pid, 0)` which probes existence without delivering a signal.
/// Note this also returns true for zombies that haven't been reaped yet.
#[cfg(unix)]
pub fn is_pid_alive(pid: u32) -> bool {
    match validate_pid_for_check(pid) {
        Some(pid) => nix::sys::signal::kill(pid, None).is_ok(),
        None => false,
    }
}

#[cfg(not(unix))]
pub fn is_pid_alive(_pid: u32) -> bool {
    false
}
