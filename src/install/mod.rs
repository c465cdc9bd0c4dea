//! Dependency installer adapters
//!
//! Each ecosystem adapter describes which manifest files it needs, which
//! commands export a flat requirements list (if any) and which commands
//! install into the working directory. [`install`] drives an adapter either
//! on the host or inside a build container and hands back a scoped temporary
//! directory holding only the installed files.

mod npm;
mod pip;
mod poetry;
pub mod pyproject;
mod staging;
mod uv;

pub use npm::NpmInstaller;
pub use pip::PipInstaller;
pub use poetry::PoetryInstaller;
pub use pyproject::{detect_build_system, BuildSystem};
pub use staging::{remove_if_exists, TemporaryCopy};
pub use uv::{strip_local_requirements, UvInstaller};

use crate::error::{PackError, PackResult};
use crate::orchestration::BuildContainer;
use crate::process;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tokio::process::Command;
use tracing::{debug, info};

/// Supported package ecosystems
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ecosystem {
    /// pip (requirements.txt)
    Pip,
    /// Poetry (pyproject.toml, poetry.lock)
    Poetry,
    /// npm (package.json, package-lock.json)
    Npm,
    /// uv (pyproject.toml, uv.lock)
    Uv,
}

impl Ecosystem {
    /// Directory name of this ecosystem's cache under `<artifacts_dir>/cache`
    pub fn cache_dir(&self) -> &'static str {
        match self {
            Self::Pip => "pip",
            Self::Poetry => "poetry",
            Self::Npm => "npm",
            Self::Uv => "uv",
        }
    }

    /// Cache location inside build containers
    pub fn container_cache_path(&self) -> Option<&'static str> {
        match self {
            Self::Pip => Some("/root/.cache/pip"),
            Self::Poetry => Some("/root/.cache/pypoetry"),
            Self::Uv => Some("/root/.cache/uv"),
            Self::Npm => None,
        }
    }

    /// Manifest file looked up when a directory is given
    pub fn manifest_name(&self) -> &'static str {
        match self {
            Self::Pip => "requirements.txt",
            Self::Poetry | Self::Uv => "pyproject.toml",
            Self::Npm => "package.json",
        }
    }

    /// Runtime prefix this ecosystem applies to
    pub fn runtime_family(&self) -> &'static str {
        match self {
            Self::Pip | Self::Poetry | Self::Uv => "python",
            Self::Npm => "nodejs",
        }
    }

    /// Whether `runtime` (e.g. `python3.12`) belongs to this ecosystem
    pub fn supports_runtime(&self, runtime: &str) -> bool {
        runtime.starts_with(self.runtime_family())
    }
}

impl fmt::Display for Ecosystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.cache_dir())
    }
}

/// Parameters of one install step
#[derive(Debug, Clone)]
pub struct InstallRequest<'a> {
    /// Function runtime, also the Python interpreter name
    pub runtime: &'a str,
    /// Resolved manifest file
    pub manifest: &'a Path,
    /// Parent for the temporary install directory
    pub tmp_dir: Option<&'a Path>,
    /// Extra arguments for the export command
    pub export_args: &'a [String],
}

impl InstallRequest<'_> {
    /// Directory holding the manifest and its companion files
    pub fn source_dir(&self) -> PathBuf {
        self.manifest
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    fn manifest_file_name(&self) -> String {
        self.manifest
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// One ecosystem's install procedure
pub trait DependencyInstaller: Send + Sync {
    fn ecosystem(&self) -> Ecosystem;

    /// Files staged into the install directory: (file name, required)
    fn staged_files(&self, request: &InstallRequest<'_>) -> Vec<(String, bool)>;

    /// Commands run before `post_export`, in the install directory
    fn export_commands(&self, _request: &InstallRequest<'_>, _staging: &Path) -> Vec<Vec<String>> {
        Vec::new()
    }

    /// Host-side fixups between export and install
    fn post_export(&self, _request: &InstallRequest<'_>, _staging: &Path) -> PackResult<()> {
        Ok(())
    }

    /// Commands that install dependencies into the current directory
    fn install_commands(&self, request: &InstallRequest<'_>) -> Vec<Vec<String>>;

    /// Files produced by the export phase, removed before archiving
    fn generated_files(&self) -> &'static [&'static str] {
        &[]
    }

    /// Host command proving the tool is usable, run before staging
    fn probe(&self) -> Option<Vec<String>> {
        None
    }

    /// Error reported when the host lacks the tool
    fn missing_tool(&self, request: &InstallRequest<'_>) -> PackError;
}

static PIP: PipInstaller = PipInstaller;
static POETRY: PoetryInstaller = PoetryInstaller;
static NPM: NpmInstaller = NpmInstaller;
static UV: UvInstaller = UvInstaller;

/// Adapter for an ecosystem
pub fn installer_for(ecosystem: Ecosystem) -> &'static dyn DependencyInstaller {
    match ecosystem {
        Ecosystem::Pip => &PIP,
        Ecosystem::Poetry => &POETRY,
        Ecosystem::Npm => &NPM,
        Ecosystem::Uv => &UV,
    }
}

/// Install dependencies for `request`.
///
/// Returns `None` when the manifest does not exist. The returned directory is
/// deleted when dropped.
pub async fn install(
    installer: &dyn DependencyInstaller,
    request: &InstallRequest<'_>,
    container: Option<&BuildContainer>,
) -> PackResult<Option<TempDir>> {
    if !request.manifest.exists() {
        debug!("no manifest at {}, skipping", request.manifest.display());
        return Ok(None);
    }

    let ecosystem = installer.ecosystem();
    info!(
        "Installing {} dependencies: {}",
        ecosystem,
        request.manifest.display()
    );

    if container.is_none() {
        if let Some(probe) = installer.probe() {
            run_host(installer, request, &probe, None).await?;
        }
    }

    let staging = make_tempdir(request.tmp_dir)?;
    let mut copy = TemporaryCopy::new(request.source_dir(), staging.path());
    for (filename, required) in installer.staged_files(request) {
        copy.add(&filename, required)?;
    }
    copy.copy_to_target_dir()?;

    let export = installer.export_commands(request, staging.path());
    if !export.is_empty() {
        run_phase(installer, request, staging.path(), &export, container).await?;
    }
    installer.post_export(request, staging.path())?;

    let commands = installer.install_commands(request);
    run_phase(installer, request, staging.path(), &commands, container).await?;

    copy.remove_from_target_dir()?;
    for generated in installer.generated_files() {
        remove_if_exists(&staging.path().join(generated))?;
    }

    Ok(Some(staging))
}

fn make_tempdir(parent: Option<&Path>) -> PackResult<TempDir> {
    let mut builder = tempfile::Builder::new();
    builder.prefix("lambda-pack-");
    match parent {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .map_err(|e| PackError::io(format!("creating {}", dir.display()), e))?;
            builder.tempdir_in(dir)
        }
        None => builder.tempdir(),
    }
    .map_err(|e| PackError::io("creating temporary install directory", e))
}

async fn run_phase(
    installer: &dyn DependencyInstaller,
    request: &InstallRequest<'_>,
    staging: &Path,
    commands: &[Vec<String>],
    container: Option<&BuildContainer>,
) -> PackResult<()> {
    match container {
        Some(container) => {
            let mut parts: Vec<String> = commands.iter().map(shell_words::join).collect();
            let owner = owner_mask();
            parts.push(shell_words::join(["chown", "-R", owner.as_str(), "."]));
            let script = parts.join(" && ");
            let spec = container
                .spec(request.runtime, staging, script, Some(installer.ecosystem()))
                .await?;
            container.run(&spec).await?;
        }
        None => {
            for command in commands {
                run_host(installer, request, command, Some(staging)).await?;
            }
        }
    }
    Ok(())
}

async fn run_host(
    installer: &dyn DependencyInstaller,
    request: &InstallRequest<'_>,
    argv: &[String],
    cwd: Option<&Path>,
) -> PackResult<()> {
    let Some((program, args)) = argv.split_first() else {
        return Ok(());
    };
    let mut cmd = Command::new(program);
    cmd.args(args);
    if let Some(cwd) = cwd {
        cmd.current_dir(cwd);
    }
    if cfg!(target_os = "macos") && installer.ecosystem().runtime_family() == "python" {
        // Command line tools' python may shadow the runtime interpreter
        let path = std::env::var("PATH").unwrap_or_default();
        cmd.env(
            "PATH",
            format!("{}:/Library/Developer/CommandLineTools/usr/bin", path),
        );
    }

    process::run(cmd).await.map(|_| ()).map_err(|e| match e {
        PackError::CommandSpawn { source, .. } if source.kind() == ErrorKind::NotFound => {
            installer.missing_tool(request)
        }
        other => other,
    })
}

/// `uid:gid` of the current user, used to hand container output back
pub(crate) fn owner_mask() -> String {
    #[cfg(unix)]
    {
        // SAFETY: getuid/getgid have no preconditions and cannot fail
        let (uid, gid) = unsafe { (libc::getuid(), libc::getgid()) };
        format!("{}:{}", uid, gid)
    }
    #[cfg(not(unix))]
    {
        "0:0".to_string()
    }
}

/// `python -m pip install` into the current directory
fn pip_install_command(python: &str, requirements: &str, no_deps: bool) -> Vec<String> {
    let mut cmd = vec![
        python.to_string(),
        "-m".to_string(),
        "pip".to_string(),
        "install".to_string(),
        "--no-compile".to_string(),
    ];
    if no_deps {
        cmd.push("--no-deps".to_string());
    }
    cmd.extend([
        "--prefix=".to_string(),
        "--target=.".to_string(),
        format!("--requirement={}", requirements),
    ]);
    cmd
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    /// Installer running plain shell commands, for driving `install` on any unix host
    struct ShellInstaller;

    impl DependencyInstaller for ShellInstaller {
        fn ecosystem(&self) -> Ecosystem {
            Ecosystem::Npm
        }

        fn staged_files(&self, request: &InstallRequest<'_>) -> Vec<(String, bool)> {
            vec![(request.manifest_file_name(), true), ("extra.lock".into(), false)]
        }

        fn export_commands(&self, _request: &InstallRequest<'_>, _staging: &Path) -> Vec<Vec<String>> {
            vec![vec!["sh".into(), "-c".into(), "cp deps.txt exported.txt".into()]]
        }

        fn install_commands(&self, _request: &InstallRequest<'_>) -> Vec<Vec<String>> {
            vec![vec![
                "sh".into(),
                "-c".into(),
                "mkdir -p lib && cp exported.txt lib/installed.txt".into(),
            ]]
        }

        fn generated_files(&self) -> &'static [&'static str] {
            &["exported.txt"]
        }

        fn missing_tool(&self, _request: &InstallRequest<'_>) -> PackError {
            PackError::tool_not_found("sh", "sh should be available in PATH")
        }
    }

    #[test]
    fn ecosystem_properties() {
        assert_eq!(Ecosystem::Poetry.to_string(), "poetry");
        assert_eq!(Ecosystem::Uv.manifest_name(), "pyproject.toml");
        assert!(Ecosystem::Pip.supports_runtime("python3.12"));
        assert!(!Ecosystem::Npm.supports_runtime("python3.12"));
        assert_eq!(
            serde_json::to_string(&Ecosystem::Npm).unwrap(),
            "\"npm\""
        );
    }

    #[test]
    fn installer_lookup() {
        for eco in [Ecosystem::Pip, Ecosystem::Poetry, Ecosystem::Npm, Ecosystem::Uv] {
            assert_eq!(installer_for(eco).ecosystem(), eco);
        }
    }

    #[test]
    fn pip_command_shape() {
        assert_eq!(
            pip_install_command("python3.12", "requirements.txt", true),
            vec![
                "python3.12",
                "-m",
                "pip",
                "install",
                "--no-compile",
                "--no-deps",
                "--prefix=",
                "--target=.",
                "--requirement=requirements.txt",
            ]
        );
    }

    #[tokio::test]
    async fn missing_manifest_skips() {
        let dir = tempfile::TempDir::new().unwrap();
        let manifest = dir.path().join("deps.txt");
        let request = InstallRequest {
            runtime: "nodejs20.x",
            manifest: &manifest,
            tmp_dir: None,
            export_args: &[],
        };
        assert!(install(&ShellInstaller, &request, None).await.unwrap().is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn host_install_leaves_only_output() {
        let src = tempfile::TempDir::new().unwrap();
        let tmp_parent = tempfile::TempDir::new().unwrap();
        let manifest = src.path().join("deps.txt");
        fs::write(&manifest, b"left-pad==1.0\n").unwrap();

        let request = InstallRequest {
            runtime: "nodejs20.x",
            manifest: &manifest,
            tmp_dir: Some(tmp_parent.path()),
            export_args: &[],
        };
        let installed = install(&ShellInstaller, &request, None)
            .await
            .unwrap()
            .unwrap();

        assert!(installed.path().starts_with(tmp_parent.path()));
        let names: Vec<String> = crate::hash::list_files(installed.path()).unwrap();
        assert_eq!(names, vec!["lib/installed.txt"]);

        let kept = installed.path().to_path_buf();
        drop(installed);
        assert!(!kept.exists());
    }
}
