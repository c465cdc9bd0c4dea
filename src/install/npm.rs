//! npm installer

use super::{DependencyInstaller, Ecosystem, InstallRequest};
use crate::error::PackError;

/// Installs production dependencies of a `package.json`
pub struct NpmInstaller;

impl DependencyInstaller for NpmInstaller {
    fn ecosystem(&self) -> Ecosystem {
        Ecosystem::Npm
    }

    fn staged_files(&self, request: &InstallRequest<'_>) -> Vec<(String, bool)> {
        vec![
            (request.manifest_file_name(), true),
            ("package-lock.json".to_string(), false),
        ]
    }

    fn install_commands(&self, _request: &InstallRequest<'_>) -> Vec<Vec<String>> {
        vec![["npm", "install", "--omit=dev"].map(String::from).to_vec()]
    }

    fn missing_tool(&self, _request: &InstallRequest<'_>) -> PackError {
        PackError::tool_not_found(
            "npm",
            "Nodejs package manager (npm) should be available in system PATH",
        )
    }
}
