//! Runtime handle for a single managed service.
//!
//! A [`ServiceHandle`] owns everything that changes while a service runs:
//! the lifecycle state, the captured log buffer, and the background tasks
//! reading process output and waiting for exit. The persistent definition
//! lives in the [`ServiceSpec`] it was built from.
//!
//! # Concurrency
//!
//! Every state transition (start, stop, adopt, crash detection) runs under
//! a per-service async mutex, so concurrent commands against the same
//! service serialise instead of racing. The runtime snapshot itself sits
//! behind a synchronous `RwLock` held only for field access, so `status()`
//! never blocks behind a slow stop.

use crate::error::{is_pid_alive, Error, Result};
use crate::logbuf::LogBuffer;
use crate::port::PortAllocator;
use crate::service::types::{ServiceSpec, ServiceStatusView, Status};
use chrono::{DateTime, Local, Utc};
use parking_lot::RwLock;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Mutex;

/// How long `stop` waits after SIGTERM before escalating to SIGKILL.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How a stop request concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The process exited within the grace period after SIGTERM.
    Stopped,
    /// The process ignored SIGTERM and was SIGKILLed.
    ForceKilled,
    /// There was no live process to stop.
    AlreadyStopped,
}

#[derive(Debug)]
struct Runtime {
    status: Status,
    pid: Option<u32>,
    started_at: Option<DateTime<Utc>>,
    last_exit: Option<i32>,
}

/// Live state and operations for one service.
pub struct ServiceHandle {
    spec: ServiceSpec,
    runtime: Arc<RwLock<Runtime>>,
    /// Serialises start/stop/adopt and the exit watcher's crash transition.
    transition: Arc<Mutex<()>>,
    logs: Arc<LogBuffer>,
    ports: Arc<PortAllocator>,
    grace_period: Duration,
}

impl ServiceHandle {
    pub fn new(spec: ServiceSpec, ports: Arc<PortAllocator>) -> Self {
        Self {
            spec,
            runtime: Arc::new(RwLock::new(Runtime {
                status: Status::Stopped,
                pid: None,
                started_at: None,
                last_exit: None,
            })),
            transition: Arc::new(Mutex::new(())),
            logs: Arc::new(LogBuffer::new()),
            ports,
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }

    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }

    pub fn spec(&self) -> &ServiceSpec {
        &self.spec
    }

    pub fn logs(&self) -> Arc<LogBuffer> {
        Arc::clone(&self.logs)
    }

    /// Non-blocking snapshot of the runtime state.
    pub fn status(&self) -> ServiceStatusView {
        let rt = self.runtime.read();
        ServiceStatusView {
            status: rt.status,
            pid: rt.pid,
            started_at: rt.started_at,
            last_exit: rt.last_exit,
        }
    }

    /// Spawn the service process and begin capturing its output.
    ///
    /// Reserves the configured port first, so a conflict is reported before
    /// anything is launched. Returns the PID on success.
    #[tracing::instrument(skip(self), fields(service.id = %self.spec.id))]
    pub async fn start(&self) -> Result<u32> {
        let _guard = self.transition.lock().await;

        {
            let rt = self.runtime.read();
            if rt.status.is_active() {
                return Err(Error::AlreadyActive(self.spec.name.clone()));
            }
        }

        if let Some(port) = self.spec.port {
            self.ports.reserve(port, &self.spec.id)?;
        }

        self.set_status(Status::Starting);

        // Keep output from the previous run visible behind a separator
        // instead of wiping the buffer.
        if !self.logs.is_empty() {
            self.logs.restart_marker();
        }
        let stamp = Local::now().format("%H:%M:%S");
        self.logs
            .append(format!("[{stamp}] starting: {}", self.spec.command));
        self.logs.append(format!(
            "[{stamp}] working dir: {}",
            self.spec.working_dir.display()
        ));

        let mut cmd = tokio::process::Command::new("/bin/sh");
        cmd.arg("-c")
            .arg(&self.spec.command)
            .current_dir(&self.spec.working_dir)
            .envs(&self.spec.runtime_env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(false);

        // New process group so stop can signal the whole tree
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                tracing::error!(
                    "Failed to spawn '{}': {} (work_dir: {:?})",
                    self.spec.name,
                    e,
                    self.spec.working_dir
                );
                if self.spec.port.is_some() {
                    self.ports.release(&self.spec.id);
                }
                self.set_status(Status::Crashed);
                self.logs.append(format!("[devdock] failed to start: {e}"));
                return Err(Error::SpawnFailed {
                    service: self.spec.name.clone(),
                    source: e,
                });
            }
        };

        let pid = child.id().ok_or_else(|| Error::SpawnFailed {
            service: self.spec.name.clone(),
            source: std::io::Error::other("process exited before a PID could be read"),
        })?;

        {
            let mut rt = self.runtime.write();
            rt.pid = Some(pid);
            rt.started_at = Some(Utc::now());
            rt.last_exit = None;
        }

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(read_lines(stdout, Arc::clone(&self.logs), None));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(read_lines(stderr, Arc::clone(&self.logs), Some("[stderr] ")));
        }

        self.spawn_exit_watcher(child, pid);

        self.set_status(Status::Running);
        tracing::info!("Started '{}' (pid {})", self.spec.name, pid);
        Ok(pid)
    }

    /// The exit watcher owns the `Child`: it reaps the process as soon as
    /// it dies and, if nothing else explains the exit, marks the service
    /// crashed and frees its port.
    fn spawn_exit_watcher(&self, mut child: tokio::process::Child, watched_pid: u32) {
        let runtime = Arc::clone(&self.runtime);
        let transition = Arc::clone(&self.transition);
        let logs = Arc::clone(&self.logs);
        let ports = Arc::clone(&self.ports);
        let service_id = self.spec.id.clone();
        let service_name = self.spec.name.clone();
        let has_port = self.spec.port.is_some();

        tokio::spawn(async move {
            let exit = child.wait().await;

            // If a stop is in flight it holds this lock until the service
            // is Stopped; acquiring it afterwards makes the checks below
            // see the final state instead of racing it.
            let _guard = transition.lock().await;

            let code = match &exit {
                Ok(status) => status.code(),
                Err(_) => None,
            };

            let mut rt = runtime.write();
            if rt.pid != Some(watched_pid) {
                // A newer run replaced this process; nothing to record.
                return;
            }
            rt.last_exit = code;

            if rt.status == Status::Running || rt.status == Status::Starting {
                let desc = match code {
                    Some(c) => format!("code {c}"),
                    None => "signal".to_string(),
                };
                logs.append(format!("[devdock] process exited with {desc}"));
                tracing::warn!("Service '{}' exited unexpectedly ({})", service_name, desc);
                rt.pid = None;
                rt.status = Status::Crashed;
                drop(rt);
                if has_port {
                    ports.release(&service_id);
                }
            }
        });
    }

    /// Stop the service: SIGTERM to the process group, then SIGKILL after
    /// the grace period.
    ///
    /// Works both for processes we spawned and for adopted ones, since it
    /// signals by PID rather than through a child handle.
    #[tracing::instrument(skip(self), fields(service.id = %self.spec.id))]
    pub async fn stop(&self) -> Result<StopOutcome> {
        let _guard = self.transition.lock().await;

        let pid = {
            let rt = self.runtime.read();
            match rt.status {
                Status::Stopped | Status::Crashed => return Ok(StopOutcome::AlreadyStopped),
                _ => rt.pid,
            }
        };

        self.set_status(Status::Stopping);

        let Some(pid) = pid else {
            self.finish_stop();
            return Ok(StopOutcome::AlreadyStopped);
        };

        let outcome = self.terminate(pid).await?;
        self.finish_stop();
        self.logs.append("[devdock] service stopped".to_string());
        tracing::info!("Stopped '{}'", self.spec.name);
        Ok(outcome)
    }

    #[cfg(unix)]
    async fn terminate(&self, pid: u32) -> Result<StopOutcome> {
        use nix::sys::signal::{self, killpg, Signal};

        let nix_pid = crate::error::validate_pid(pid, &self.spec.name)?;

        // Signal the whole process group; shell commands routinely leave
        // grandchildren behind if only the leader is killed.
        let pgid = nix::unistd::getpgid(Some(nix_pid)).unwrap_or(nix_pid);
        let sent = killpg(pgid, Signal::SIGTERM).or_else(|_| signal::kill(nix_pid, Signal::SIGTERM));

        if sent.is_err() {
            // Nothing to signal; the process is already gone
            return Ok(StopOutcome::AlreadyStopped);
        }

        if self.wait_for_death(pid, self.grace_period).await {
            return Ok(StopOutcome::Stopped);
        }

        tracing::warn!(
            "Process {} ('{}') did not exit after SIGTERM (grace period: {:?}), sending SIGKILL",
            pid,
            self.spec.name,
            self.grace_period
        );
        self.logs.append(format!(
            "[devdock] process ignored SIGTERM, sent SIGKILL after {:?}",
            self.grace_period
        ));
        let _ = killpg(pgid, Signal::SIGKILL).or_else(|_| signal::kill(nix_pid, Signal::SIGKILL));

        if self.wait_for_death(pid, Duration::from_secs(2)).await {
            return Ok(StopOutcome::ForceKilled);
        }

        // Likely stuck in uninterruptible sleep; leave state as Stopping so
        // a retry can attempt the kill again.
        Err(Error::StopTimeout(self.spec.name.clone()))
    }

    #[cfg(not(unix))]
    async fn terminate(&self, _pid: u32) -> Result<StopOutcome> {
        Err(Error::StopTimeout(self.spec.name.clone()))
    }

    /// Poll PID liveness until the process disappears or `limit` elapses.
    async fn wait_for_death(&self, pid: u32, limit: Duration) -> bool {
        let polls = (limit.as_millis() / POLL_INTERVAL.as_millis()).max(1) as u64;
        for _ in 0..polls {
            tokio::time::sleep(POLL_INTERVAL).await;
            if !is_pid_alive(pid) {
                return true;
            }
        }
        !is_pid_alive(pid)
    }

    fn finish_stop(&self) {
        {
            let mut rt = self.runtime.write();
            rt.pid = None;
            rt.status = Status::Stopped;
        }
        if self.spec.port.is_some() {
            self.ports.release(&self.spec.id);
        }
    }

    /// Attach an already-running external process to this service.
    ///
    /// Used after reconciliation finds a high-confidence match. The adopted
    /// process has no child handle; stop and crash detection go through the
    /// PID signal paths.
    pub async fn adopt(&self, pid: u32) -> Result<()> {
        let _guard = self.transition.lock().await;

        {
            let rt = self.runtime.read();
            if rt.status.is_active() {
                return Err(Error::AlreadyActive(self.spec.name.clone()));
            }
        }
        if !is_pid_alive(pid) {
            return Err(Error::InvalidPid {
                pid,
                reason: format!("no such process to adopt for service '{}'", self.spec.name),
            });
        }

        self.set_status(Status::Starting);
        {
            let mut rt = self.runtime.write();
            rt.pid = Some(pid);
            rt.started_at = Some(Utc::now());
            rt.last_exit = None;
        }
        if let Some(port) = self.spec.port {
            self.ports.mark_claimed(port, &self.spec.id);
        }
        self.set_status(Status::Running);
        self.logs
            .append(format!("[devdock] adopted running process (pid {pid})"));
        tracing::info!("Adopted pid {} as '{}'", pid, self.spec.name);
        Ok(())
    }

    /// Mark the service crashed after reconciliation found its PID gone.
    ///
    /// Returns false if the state moved on in the meantime (a concurrent
    /// stop, or a restart with a fresh PID).
    pub async fn mark_crashed(&self, expected_pid: u32) -> bool {
        let _guard = self.transition.lock().await;

        let mut rt = self.runtime.write();
        if rt.pid != Some(expected_pid) || !matches!(rt.status, Status::Running | Status::Starting)
        {
            return false;
        }
        rt.pid = None;
        rt.status = Status::Crashed;
        drop(rt);

        self.logs
            .append("[devdock] process no longer present, marking crashed".to_string());
        tracing::warn!("Service '{}' lost its process (pid {})", self.spec.name, expected_pid);
        if self.spec.port.is_some() {
            self.ports.release(&self.spec.id);
        }
        true
    }

    fn set_status(&self, next: Status) {
        let mut rt = self.runtime.write();
        debug_assert!(
            rt.status.is_valid_transition(next),
            "illegal transition {} -> {}",
            rt.status,
            next
        );
        tracing::debug!("Service '{}': {} -> {}", self.spec.name, rt.status, next);
        rt.status = next;
    }
}

/// Forward lines from a process output stream into the log buffer.
///
/// Ends at EOF, which arrives when the process (and anything inheriting
/// its descriptors) exits.
async fn read_lines<R>(stream: R, logs: Arc<LogBuffer>, prefix: Option<&'static str>)
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        match prefix {
            Some(p) => logs.append(format!("{p}{line}")),
            None => logs.append(line),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::types::ServiceKind;

    fn handle(command: &str) -> ServiceHandle {
        let spec = ServiceSpec::new("proj", ServiceKind::Backend, "svc", command, "/tmp");
        ServiceHandle::new(spec, Arc::new(PortAllocator::new()))
    }

    #[tokio::test]
    async fn start_and_stop_round_trip() {
        let svc = handle("sleep 30");
        let pid = svc.start().await.unwrap();
        assert!(pid > 0);

        let view = svc.status();
        assert_eq!(view.status, Status::Running);
        assert_eq!(view.pid, Some(pid));

        let outcome = svc.stop().await.unwrap();
        assert_eq!(outcome, StopOutcome::Stopped);
        let view = svc.status();
        assert_eq!(view.status, Status::Stopped);
        assert_eq!(view.pid, None);
    }

    #[tokio::test]
    async fn double_start_is_rejected() {
        let svc = handle("sleep 30");
        svc.start().await.unwrap();
        let err = svc.start().await.unwrap_err();
        assert!(matches!(err, Error::AlreadyActive(_)));
        svc.stop().await.unwrap();
    }

    #[tokio::test]
    async fn stop_when_stopped_is_a_no_op() {
        let svc = handle("sleep 30");
        assert_eq!(svc.stop().await.unwrap(), StopOutcome::AlreadyStopped);
    }

    #[tokio::test]
    async fn captures_stdout_and_stderr() {
        let svc = handle("echo out-line; echo err-line 1>&2; sleep 30");
        svc.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;

        let snap = svc.logs().snapshot();
        assert!(snap.iter().any(|l| l == "out-line"));
        assert!(snap.iter().any(|l| l == "[stderr] err-line"));
        svc.stop().await.unwrap();
    }

    #[tokio::test]
    async fn exit_is_detected_as_crash() {
        let svc = handle("exit 3");
        svc.start().await.unwrap();

        // Give the watcher time to reap and transition
        for _ in 0..50 {
            if svc.status().status == Status::Crashed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        let view = svc.status();
        assert_eq!(view.status, Status::Crashed);
        assert_eq!(view.pid, None);
        assert_eq!(view.last_exit, Some(3));
        assert!(svc
            .logs()
            .snapshot()
            .iter()
            .any(|l| l.contains("process exited with code 3")));
    }

    #[tokio::test]
    async fn crashed_service_can_restart() {
        let svc = handle("true");
        svc.start().await.unwrap();
        for _ in 0..50 {
            if svc.status().status == Status::Crashed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert_eq!(svc.status().status, Status::Crashed);

        // Second start succeeds and rolls the log buffer over
        svc.start().await.unwrap();
        assert!(svc
            .logs()
            .snapshot()
            .iter()
            .any(|l| l.starts_with("---- restart ")));
        svc.stop().await.unwrap();
    }

    #[tokio::test]
    async fn spawn_failure_releases_port_and_marks_crashed() {
        let ports = Arc::new(PortAllocator::new());
        let spec = ServiceSpec::new(
            "proj",
            ServiceKind::Backend,
            "svc",
            "sleep 30",
            "/nonexistent-dir-devdock",
        )
        .with_port(39251);
        let svc = ServiceHandle::new(spec, Arc::clone(&ports));

        let err = svc.start().await.unwrap_err();
        assert!(matches!(err, Error::SpawnFailed { .. }));
        assert_eq!(svc.status().status, Status::Crashed);
        assert!(ports.list_bindings().is_empty());
    }

    #[tokio::test]
    async fn pid_present_only_while_active() {
        let svc = handle("sleep 30");
        assert!(svc.status().pid.is_none());
        svc.start().await.unwrap();
        assert!(svc.status().pid.is_some());
        svc.stop().await.unwrap();
        assert!(svc.status().pid.is_none());
    }
}
