//! Python build-system detection from `pyproject.toml`

use std::fs;
use std::path::Path;
use tracing::{debug, warn};

/// Python project managers with their own export step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildSystem {
    Poetry,
    Uv,
}

/// Detect the build system of a `pyproject.toml`.
///
/// Poetry is recognized by its build backend; uv by a `[tool.uv]` table or
/// a `uv.lock` next to the file. Missing or unreadable files yield `None`.
pub fn detect_build_system(pyproject: &Path) -> Option<BuildSystem> {
    if !pyproject.is_file() {
        return None;
    }

    let content = match fs::read_to_string(pyproject) {
        Ok(content) => content,
        Err(e) => {
            warn!("Failed to read {}: {}", pyproject.display(), e);
            return None;
        }
    };
    let table: toml::Table = match toml::from_str(&content) {
        Ok(table) => table,
        Err(e) => {
            warn!("Failed to parse {}: {}", pyproject.display(), e);
            return None;
        }
    };

    let backend = table
        .get("build-system")
        .and_then(|bs| bs.get("build-backend"))
        .and_then(|b| b.as_str())
        .unwrap_or_default();
    if backend.contains("poetry") {
        debug!("{}: poetry build backend", pyproject.display());
        return Some(BuildSystem::Poetry);
    }

    let has_uv_table = table
        .get("tool")
        .and_then(|tool| tool.get("uv"))
        .is_some_and(|uv| uv.is_table());
    let has_uv_lock = pyproject
        .parent()
        .is_some_and(|dir| dir.join("uv.lock").is_file());
    if has_uv_table || has_uv_lock {
        debug!("{}: uv project", pyproject.display());
        return Some(BuildSystem::Uv);
    }

    None
}
