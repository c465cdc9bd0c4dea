//! pip requirements installer

use super::{pip_install_command, DependencyInstaller, Ecosystem, InstallRequest};
use crate::error::PackError;

/// Installs a `requirements.txt` with the runtime's interpreter
pub struct PipInstaller;

impl DependencyInstaller for PipInstaller {
    fn ecosystem(&self) -> Ecosystem {
        Ecosystem::Pip
    }

    fn staged_files(&self, request: &InstallRequest<'_>) -> Vec<(String, bool)> {
        vec![(request.manifest_file_name(), true)]
    }

    fn install_commands(&self, request: &InstallRequest<'_>) -> Vec<Vec<String>> {
        vec![pip_install_command(
            request.runtime,
            &request.manifest_file_name(),
            false,
        )]
    }

    fn missing_tool(&self, request: &InstallRequest<'_>) -> PackError {
        PackError::tool_not_found(
            request.runtime,
            format!(
                "Python interpreter version equal to defined lambda runtime ({}) should be available in system PATH",
                request.runtime
            ),
        )
    }
}
