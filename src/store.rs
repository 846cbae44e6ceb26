//! JSON persistence for project definitions and port claim history.
//!
//! Two files live under the data directory (default `~/.devdock`):
//! `projects.json` holding project and service definitions, and
//! `ports.json` holding the port allocation history. Writes go through a
//! temp file and an atomic rename so a crash mid-write never leaves a
//! half-written file behind.

use crate::error::{Error, Result};
use crate::registry::Project;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const PROJECTS_FILE: &str = "projects.json";
const PORTS_FILE: &str = "ports.json";

/// Historical record of a port allocation, kept across restarts so the
/// same service tends to get the same port again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortRecord {
    pub port: u16,
    pub service_id: String,
    pub allocated_at: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ProjectsFile {
    projects: Vec<Project>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PortsFile {
    records: Vec<PortRecord>,
}

/// File-backed store rooted at a data directory.
pub struct Store {
    dir: PathBuf,
}

impl Store {
    /// Open (creating if needed) a store under `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .map_err(|e| Error::Store(format!("cannot create data dir {}: {e}", dir.display())))?;
        Ok(Self { dir })
    }

    /// Open the default per-user store (`~/.devdock`).
    pub fn open_default() -> Result<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| Error::Store("cannot determine home directory".to_string()))?;
        Self::open(home.join(".devdock"))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Load all project definitions. A missing file is an empty store.
    ///
    /// Runtime status is never read from disk; callers construct every
    /// service as Stopped and rely on reconciliation for live state.
    pub fn load_projects(&self) -> Result<Vec<Project>> {
        let path = self.dir.join(PROJECTS_FILE);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let data = std::fs::read_to_string(&path)
            .map_err(|e| Error::Store(format!("cannot read {}: {e}", path.display())))?;
        let file: ProjectsFile = serde_json::from_str(&data)
            .map_err(|e| Error::Store(format!("invalid {}: {e}", path.display())))?;
        Ok(file.projects)
    }

    pub fn save_projects(&self, projects: &[Project]) -> Result<()> {
        let file = ProjectsFile {
            projects: projects.to_vec(),
        };
        self.write_atomic(PROJECTS_FILE, &file)
    }

    pub fn load_port_records(&self) -> Result<Vec<PortRecord>> {
        let path = self.dir.join(PORTS_FILE);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let data = std::fs::read_to_string(&path)
            .map_err(|e| Error::Store(format!("cannot read {}: {e}", path.display())))?;
        let file: PortsFile = serde_json::from_str(&data)
            .map_err(|e| Error::Store(format!("invalid {}: {e}", path.display())))?;
        Ok(file.records)
    }

    pub fn save_port_records(&self, records: &[PortRecord]) -> Result<()> {
        let file = PortsFile {
            records: records.to_vec(),
        };
        self.write_atomic(PORTS_FILE, &file)
    }

    /// Record that `service_id` holds `port` right now, updating `last_used`
    /// for an existing record or appending a new one.
    pub fn touch_port_record(&self, port: u16, service_id: &str) -> Result<()> {
        let mut records = self.load_port_records()?;
        let now = Utc::now();
        match records
            .iter_mut()
            .find(|r| r.port == port && r.service_id == service_id)
        {
            Some(record) => record.last_used = now,
            None => records.push(PortRecord {
                port,
                service_id: service_id.to_string(),
                allocated_at: now,
                last_used: now,
            }),
        }
        self.save_port_records(&records)
    }

    fn write_atomic<T: Serialize>(&self, file_name: &str, value: &T) -> Result<()> {
        let path = self.dir.join(file_name);
        let tmp = self.dir.join(format!(".{file_name}.tmp"));
        let data = serde_json::to_string_pretty(value)?;
        std::fs::write(&tmp, data)
            .map_err(|e| Error::Store(format!("cannot write {}: {e}", tmp.display())))?;
        std::fs::rename(&tmp, &path)
            .map_err(|e| Error::Store(format!("cannot replace {}: {e}", path.display())))?;
        Ok(())
    }
}
