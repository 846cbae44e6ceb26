//! Enumeration of the OS process table.

use std::path::PathBuf;

/// One row of the process table, as much as we were allowed to read.
#[derive(Debug, Clone)]
pub struct OsProcess {
    pub pid: u32,
    /// Executable name (`comm`), empty when unreadable.
    pub name: String,
    pub command_line: String,
    /// Working directory; `None` when the OS denied access.
    pub cwd: Option<PathBuf>,
}

/// Source of process snapshots. The system implementation reads the live
/// table; tests substitute a fixed list.
pub trait ProcessTable: Send + Sync {
    /// Enumerate all visible processes.
    ///
    /// Processes that cannot be inspected (permission errors, races with
    /// exit) are skipped, never reported as failures.
    fn snapshot(&self) -> Vec<OsProcess>;
}

/// Live process table.
///
/// On Linux this walks `/proc` directly, which also yields working
/// directories via `/proc/<pid>/cwd`. Elsewhere it falls back to parsing
/// `ps` output, which carries no cwd.
#[derive(Debug, Default)]
pub struct SystemProcessTable;

impl ProcessTable for SystemProcessTable {
    fn snapshot(&self) -> Vec<OsProcess> {
        #[cfg(target_os = "linux")]
        {
            scan_proc()
        }

        #[cfg(not(target_os = "linux"))]
        {
            scan_ps()
        }
    }
}

#[cfg(target_os = "linux")]
fn scan_proc() -> Vec<OsProcess> {
    let own_pid = std::process::id();
    let mut processes = Vec::new();

    let Ok(entries) = std::fs::read_dir("/proc") else {
        return processes;
    };

    for entry in entries.flatten() {
        let Some(pid) = entry
            .file_name()
            .to_str()
            .and_then(|s| s.parse::<u32>().ok())
        else {
            continue;
        };
        if pid == own_pid {
            continue;
        }

        let base = entry.path();

        // cmdline is NUL-separated; a process that exited mid-scan or that
        // we lack permission for simply gets skipped.
        let Ok(raw_cmdline) = std::fs::read(base.join("cmdline")) else {
            continue;
        };
        let command_line = String::from_utf8_lossy(&raw_cmdline)
            .split('\0')
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        if command_line.is_empty() {
            // Kernel thread
            continue;
        }

        let name = std::fs::read_to_string(base.join("comm"))
            .map(|s| s.trim().to_string())
            .unwrap_or_default();

        // cwd readlink fails for other users' processes; keep the row
        let cwd = std::fs::read_link(base.join("cwd")).ok();

        processes.push(OsProcess {
            pid,
            name,
            command_line,
            cwd,
        });
    }

    processes
}

#[cfg(not(target_os = "linux"))]
fn scan_ps() -> Vec<OsProcess> {
    let own_pid = std::process::id();
    let mut processes = Vec::new();

    let Ok(output) = std::process::Command::new("ps")
        .args(["-axo", "pid=,comm=,args="])
        .output()
    else {
        return processes;
    };
    if !output.status.success() {
        return processes;
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    for line in stdout.lines() {
        let mut parts = line.trim().splitn(3, char::is_whitespace);
        let Some(pid) = parts.next().and_then(|p| p.parse::<u32>().ok()) else {
            continue;
        };
        if pid == own_pid {
            continue;
        }
        let name = parts.next().unwrap_or("").trim().to_string();
        let command_line = parts.next().unwrap_or("").trim().to_string();
        processes.push(OsProcess {
            pid,
            name,
            command_line,
            cwd: None,
        });
    }

    processes
}
