//! Project definitions.

use crate::service::ServiceSpec;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A development project: a root directory plus the services run from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    /// Stable identifier derived from the root path.
    pub id: String,
    pub name: String,
    pub root_path: PathBuf,
    #[serde(default)]
    pub services: Vec<ServiceSpec>,
}

impl Project {
    pub fn new(name: impl Into<String>, root_path: impl Into<PathBuf>) -> Self {
        let root_path = root_path.into();
        Self {
            id: project_id(&root_path),
            name: name.into(),
            root_path,
            services: Vec::new(),
        }
    }

    pub fn with_service(mut self, spec: ServiceSpec) -> Self {
        self.services.push(spec);
        self
    }
}

/// Derive a stable project id from its root path: the sanitised directory
/// name plus a short path hash, so two checkouts with the same name stay
/// distinct.
pub fn project_id(root_path: &Path) -> String {
    let stem = root_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "project".to_string());
    let slug: String = stem
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    let slug = slug.trim_matches('-');
    let slug = if slug.is_empty() { "project" } else { slug };
    format!("{slug}-{:08x}", fnv1a_32(root_path.to_string_lossy().as_bytes()))
}

fn fnv1a_32(data: &[u8]) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for byte in data {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_is_stable_for_a_path() {
        let a = project_id(Path::new("/srv/my-shop"));
        let b = project_id(Path::new("/srv/my-shop"));
        assert_eq!(a, b);
        assert!(a.starts_with("my-shop-"));
    }

    #[test]
    fn same_name_different_path_differ() {
        let a = project_id(Path::new("/srv/shop"));
        let b = project_id(Path::new("/home/dev/shop"));
        assert_ne!(a, b);
    }

    #[test]
    fn odd_directory_names_are_sanitised() {
        let id = project_id(Path::new("/srv/My Shop (v2)"));
        let slug = id.rsplit_once('-').unwrap().0;
        assert!(slug.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'));
    }
}
