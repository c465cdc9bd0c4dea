//! uv installer
//!
//! Exports the (possibly freshly generated) lock to `requirements.txt`,
//! drops editable and local path requirements that cannot be packaged, and
//! installs the rest with `pip --no-deps`.

use super::{pip_install_command, DependencyInstaller, Ecosystem, InstallRequest};
use crate::error::{PackError, PackResult};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

const LOCK_FILE: &str = "uv.lock";
const EXPORTED: &str = "requirements.txt";

/// Installs a uv project's locked dependencies
pub struct UvInstaller;

impl DependencyInstaller for UvInstaller {
    fn ecosystem(&self) -> Ecosystem {
        Ecosystem::Uv
    }

    fn staged_files(&self, _request: &InstallRequest<'_>) -> Vec<(String, bool)> {
        vec![
            ("pyproject.toml".to_string(), true),
            (LOCK_FILE.to_string(), false),
        ]
    }

    fn export_commands(&self, request: &InstallRequest<'_>, staging: &Path) -> Vec<Vec<String>> {
        let mut commands = Vec::new();
        if !staging.join(LOCK_FILE).exists() {
            info!("No uv.lock found, generating it from pyproject.toml");
            commands.push(vec!["uv".to_string(), "lock".to_string()]);
        }

        let mut export: Vec<String> = [
            "uv",
            "export",
            "--format",
            "requirements-txt",
            "--no-hashes",
            "--no-dev",
            "--output-file",
            EXPORTED,
        ]
        .map(String::from)
        .to_vec();
        export.extend(request.export_args.iter().cloned());
        commands.push(export);
        commands
    }

    fn post_export(&self, request: &InstallRequest<'_>, staging: &Path) -> PackResult<()> {
        let exported = staging.join(EXPORTED);
        let content = fs::read_to_string(&exported)
            .map_err(|e| PackError::io(format!("reading {}", exported.display()), e))?;
        fs::write(&exported, strip_local_requirements(&content))
            .map_err(|e| PackError::io(format!("writing {}", exported.display()), e))?;

        // Keep a generated lock next to the project for the next build
        let source_lock = request.source_dir().join(LOCK_FILE);
        let staged_lock = staging.join(LOCK_FILE);
        if !source_lock.exists() && staged_lock.exists() {
            match fs::copy(&staged_lock, &source_lock) {
                Ok(_) => info!("Saved generated uv.lock to {}", source_lock.display()),
                Err(e) => warn!(
                    "Could not copy generated uv.lock to {}: {}",
                    source_lock.display(),
                    e
                ),
            }
        }
        Ok(())
    }

    fn install_commands(&self, request: &InstallRequest<'_>) -> Vec<Vec<String>> {
        vec![pip_install_command(request.runtime, EXPORTED, true)]
    }

    fn generated_files(&self) -> &'static [&'static str] {
        &[EXPORTED, LOCK_FILE]
    }

    fn probe(&self) -> Option<Vec<String>> {
        Some(vec!["uv".to_string(), "--version".to_string()])
    }

    fn missing_tool(&self, _request: &InstallRequest<'_>) -> PackError {
        PackError::tool_not_found("uv", "uv must be installed and available in PATH")
    }
}

/// Drop editable installs and local path requirements from an exported list
pub fn strip_local_requirements(content: &str) -> String {
    let mut out = String::with_capacity(content.len());
    for line in content.lines() {
        let trimmed = line.trim_start();
        let local = trimmed.starts_with("-e ")
            || trimmed.starts_with("--editable")
            || trimmed.starts_with("file:")
            || trimmed.starts_with("./")
            || trimmed.starts_with("../")
            || trimmed.starts_with('/')
            || trimmed.contains(" @ file:");
        if local {
            info!("Skipping local requirement: {}", trimmed);
            continue;
        }
        out.push_str(line);
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn strips_editable_and_paths() {
        let exported = "requests==2.31.0\n-e .\nurllib3==2.6.2\n-e file:///path/to/local\nlib @ file:///src/lib\n./vendored\nidna==3.11\n";
        assert_eq!(
            strip_local_requirements(exported),
            "requests==2.31.0\nurllib3==2.6.2\nidna==3.11\n"
        );
    }

    #[test]
    fn lock_generated_only_when_missing() {
        let staging = TempDir::new().unwrap();
        let request = InstallRequest {
            runtime: "python3.12",
            manifest: Path::new("app/pyproject.toml"),
            tmp_dir: None,
            export_args: &[],
        };

        let commands = UvInstaller.export_commands(&request, staging.path());
        assert_eq!(commands[0], vec!["uv", "lock"]);
        assert_eq!(commands[1][1], "export");

        fs::write(staging.path().join(LOCK_FILE), "version = 1\n").unwrap();
        let commands = UvInstaller.export_commands(&request, staging.path());
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0][1], "export");
    }

    #[test]
    fn post_export_saves_generated_lock() {
        let source = TempDir::new().unwrap();
        let staging = TempDir::new().unwrap();
        let manifest = source.path().join("pyproject.toml");
        fs::write(&manifest, "[tool.uv]\n").unwrap();
        fs::write(staging.path().join(EXPORTED), "-e .\nrequests==2.31.0\n").unwrap();
        fs::write(staging.path().join(LOCK_FILE), "version = 1\n").unwrap();

        let request = InstallRequest {
            runtime: "python3.12",
            manifest: &manifest,
            tmp_dir: None,
            export_args: &[],
        };
        UvInstaller.post_export(&request, staging.path()).unwrap();

        assert_eq!(
            fs::read_to_string(staging.path().join(EXPORTED)).unwrap(),
            "requests==2.31.0\n"
        );
        assert!(source.path().join(LOCK_FILE).is_file());
    }

    #[test]
    fn missing_tool_message() {
        let request = InstallRequest {
            runtime: "python3.12",
            manifest: Path::new("pyproject.toml"),
            tmp_dir: None,
            export_args: &[],
        };
        assert!(UvInstaller
            .missing_tool(&request)
            .to_string()
            .contains("uv must be installed and available in PATH"));
    }
}
