//! OS-level socket probing.
//!
//! The allocator consults a [`SocketProbe`] to detect "external" conflicts:
//! ports bound by listening sockets outside our own bookkeeping. The system
//! implementation uses bind checks for detection and `ss`/`lsof` for
//! identifying the occupant; tests substitute an in-memory fake.

use std::net::TcpListener;
use std::process::Command;

/// Information about the process holding a port, when it can be determined.
#[derive(Debug, Clone)]
pub struct PortOccupant {
    pub pid: u32,
    pub name: String,
    pub command: Option<String>,
}

/// Queries the OS network table for listening sockets.
pub trait SocketProbe: Send + Sync {
    /// True if something is currently listening on the port.
    fn is_port_bound(&self, port: u16) -> bool;

    /// Best-effort lookup of the process bound to the port.
    fn occupant(&self, _port: u16) -> Option<PortOccupant> {
        None
    }
}

/// Probe backed by real bind attempts and the system socket table.
#[derive(Debug, Default)]
pub struct SystemProbe;

impl SocketProbe for SystemProbe {
    fn is_port_bound(&self, port: u16) -> bool {
        // Try binding to both addresses. On macOS, binding 127.0.0.1 can
        // succeed even when 0.0.0.0 is in use, so both must succeed for the
        // port to count as free.
        let localhost_free = TcpListener::bind(("127.0.0.1", port)).is_ok();
        let any_free = TcpListener::bind(("0.0.0.0", port)).is_ok();
        !(localhost_free && any_free)
    }

    fn occupant(&self, port: u16) -> Option<PortOccupant> {
        #[cfg(target_os = "linux")]
        {
            find_occupant_ss(port).or_else(|| find_occupant_lsof(port))
        }

        #[cfg(target_os = "macos")]
        {
            find_occupant_lsof(port)
        }

        #[cfg(not(any(target_os = "linux", target_os = "macos")))]
        {
            let _ = port;
            None
        }
    }
}

#[cfg(target_os = "linux")]
fn find_occupant_ss(port: u16) -> Option<PortOccupant> {
    let output = Command::new("ss")
        .args(["-tlnp", &format!("sport = :{port}")])
        .output()
        .ok()?;

    if !output.status.success() {
        return None;
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    // Parse ss output: look for pid=PID,fd=... in the trailing users column
    for line in stdout.lines().skip(1) {
        let Some(users_part) = line.split_whitespace().last() else {
            continue;
        };
        for part in users_part.split(',') {
            let Some(pid_str) = part.strip_prefix("pid=") else {
                continue;
            };
            let Ok(pid) = pid_str.parse::<u32>() else {
                continue;
            };
            let name = std::fs::read_to_string(format!("/proc/{pid}/comm"))
                .map(|s| s.trim().to_string())
                .unwrap_or_else(|_| "unknown".to_string());
            let command = std::fs::read_to_string(format!("/proc/{pid}/cmdline"))
                .ok()
                .map(|s| s.replace('\0', " ").trim().to_string());
            return Some(PortOccupant { pid, name, command });
        }
    }
    None
}

#[cfg(any(target_os = "linux", target_os = "macos"))]
fn find_occupant_lsof(port: u16) -> Option<PortOccupant> {
    let output = Command::new("lsof")
        .args(["-i", &format!(":{port}"), "-P", "-n", "-F", "pcn"])
        .output()
        .ok()?;

    if !output.status.success() {
        return None;
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let mut pid: Option<u32> = None;
    let mut name: Option<String> = None;

    // lsof field format: pPID, cCOMMAND, nNAME; first process block wins
    for line in stdout.lines() {
        if let Some(stripped) = line.strip_prefix('p') {
            if pid.is_some() {
                break;
            }
            pid = stripped.parse::<u32>().ok();
        } else if let Some(stripped) = line.strip_prefix('c') {
            if name.is_none() {
                name = Some(stripped.to_string());
            }
        }
    }

    pid.map(|pid| PortOccupant {
        pid,
        name: name.clone().unwrap_or_else(|| "unknown".to_string()),
        command: name,
    })
}
