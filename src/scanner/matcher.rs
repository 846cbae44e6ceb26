//! Matching scanned processes to known projects.

use crate::scanner::process_table::OsProcess;
use crate::service::ServiceKind;
use std::path::{Path, PathBuf};

/// How strongly a process was tied to a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Confidence {
    /// Only the command line mentions the project path.
    Low,
    /// The working directory is inside the project root.
    High,
}

/// Transient result of one scan pass. Never persisted.
#[derive(Debug, Clone)]
pub struct ScanMatch {
    pub pid: u32,
    pub process_name: String,
    pub command_line: String,
    pub cwd: Option<PathBuf>,
    pub matched_project: Option<String>,
    pub matched_kind: Option<ServiceKind>,
    pub confidence: Option<Confidence>,
}

/// Match processes against `(project_id, root_path)` pairs.
///
/// A working directory equal to or under a root is a [`Confidence::High`]
/// match; a command line containing the root path is [`Confidence::Low`].
/// When several roots match, the longest (most specific) wins, so a nested
/// project beats its parent. Best-effort by design: substring matches can
/// misfire on unrelated paths sharing a prefix, which is why callers treat
/// these as suggestions.
pub fn match_processes(
    processes: Vec<OsProcess>,
    roots: &[(String, PathBuf)],
) -> Vec<ScanMatch> {
    processes
        .into_iter()
        .map(|proc| {
            let mut best: Option<(&str, &Path, Confidence)> = None;

            for (project_id, root) in roots {
                let confidence = classify(&proc, root);
                let Some(confidence) = confidence else {
                    continue;
                };
                let better = match best {
                    None => true,
                    Some((_, best_root, best_conf)) => {
                        confidence > best_conf
                            || (confidence == best_conf
                                && root.as_os_str().len() > best_root.as_os_str().len())
                    }
                };
                if better {
                    best = Some((project_id, root, confidence));
                }
            }

            let matched_kind = best.and_then(|_| guess_kind(&proc));
            ScanMatch {
                pid: proc.pid,
                matched_project: best.map(|(id, _, _)| id.to_string()),
                matched_kind,
                confidence: best.map(|(_, _, c)| c),
                process_name: proc.name,
                command_line: proc.command_line,
                cwd: proc.cwd,
            }
        })
        .collect()
}

fn classify(proc: &OsProcess, root: &Path) -> Option<Confidence> {
    if let Some(cwd) = &proc.cwd {
        // Component-wise check so /srv/app2 does not match root /srv/app
        if cwd.starts_with(root) {
            return Some(Confidence::High);
        }
    }
    if proc.command_line.contains(root.to_string_lossy().as_ref()) {
        return Some(Confidence::Low);
    }
    None
}

/// Guess which service kind a process corresponds to, from its command.
fn guess_kind(proc: &OsProcess) -> Option<ServiceKind> {
    let text = format!(
        "{} {}",
        proc.name.to_lowercase(),
        proc.command_line.to_lowercase()
    );
    if ["node", "npm", "vite", "webpack", "yarn", "pnpm"]
        .iter()
        .any(|t| text.contains(t))
    {
        return Some(ServiceKind::Frontend);
    }
    if ["python", "uvicorn", "gunicorn", "flask", "django"]
        .iter()
        .any(|t| text.contains(t))
    {
        return Some(ServiceKind::Backend);
    }
    None
}
