//! Poetry installer
//!
//! Poetry cannot install into an arbitrary target directory, so the lock is
//! exported to a flat `requirements.txt` and installed with `pip --no-deps`.

use super::{pip_install_command, DependencyInstaller, Ecosystem, InstallRequest};
use crate::error::PackError;
use std::path::Path;

/// Installs a Poetry project's locked dependencies
pub struct PoetryInstaller;

impl DependencyInstaller for PoetryInstaller {
    fn ecosystem(&self) -> Ecosystem {
        Ecosystem::Poetry
    }

    fn staged_files(&self, _request: &InstallRequest<'_>) -> Vec<(String, bool)> {
        vec![
            ("pyproject.toml".to_string(), true),
            ("poetry.lock".to_string(), false),
            ("poetry.toml".to_string(), false),
        ]
    }

    fn export_commands(&self, request: &InstallRequest<'_>, _staging: &Path) -> Vec<Vec<String>> {
        let config = |key: &str| -> Vec<String> {
            ["poetry", "config", "--no-interaction", key, "true"]
                .map(String::from)
                .to_vec()
        };

        let mut export: Vec<String> = [
            "poetry",
            "export",
            "--format",
            "requirements.txt",
            "--output",
            "requirements.txt",
            "--with-credentials",
        ]
        .map(String::from)
        .to_vec();
        export.extend(request.export_args.iter().cloned());

        vec![
            config("virtualenvs.create"),
            config("virtualenvs.in-project"),
            export,
        ]
    }

    fn install_commands(&self, request: &InstallRequest<'_>) -> Vec<Vec<String>> {
        vec![pip_install_command(request.runtime, "requirements.txt", true)]
    }

    fn generated_files(&self) -> &'static [&'static str] {
        &["requirements.txt"]
    }

    fn missing_tool(&self, _request: &InstallRequest<'_>) -> PackError {
        PackError::tool_not_found("poetry", "poetry should be available in system PATH")
    }
}
