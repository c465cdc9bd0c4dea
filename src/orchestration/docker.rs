//! CLI-driven container engine (docker or podman)
//!
//! Implements the ContainerRuntime trait by shelling out to the engine
//! binary. Both engines accept the same `images`, `build` and `run` syntax.

use crate::error::{PackError, PackResult};
use crate::orchestration::runtime::{ContainerRuntime, RunSpec};
use crate::process::{self, Captured};
use async_trait::async_trait;
use std::path::Path;
use tokio::process::Command;
use tracing::debug;

/// Container runtime invoking an engine CLI
pub struct DockerCli {
    engine: String,
}

impl DockerCli {
    /// Create a runtime for the given engine binary
    pub fn new(engine: impl Into<String>) -> Self {
        Self {
            engine: engine.into(),
        }
    }

    fn command<I, S>(&self, args: I) -> Command
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        let mut cmd = Command::new(&self.engine);
        cmd.args(args);
        cmd
    }

    /// Execute an engine command, mapping a missing binary to a tool error
    async fn exec(&self, cmd: Command) -> PackResult<Captured> {
        process::run(cmd).await.map_err(|e| match e {
            PackError::CommandSpawn { source, .. }
                if source.kind() == std::io::ErrorKind::NotFound =>
            {
                PackError::tool_not_found(
                    self.engine.clone(),
                    format!("{} must be installed to build inside a container", self.engine),
                )
            }
            other => other,
        })
    }
}

/// Arguments of `build` for a tag, Dockerfile and build root
pub fn build_args(
    tag: &str,
    docker_file: Option<&Path>,
    build_root: Option<&Path>,
) -> PackResult<Vec<String>> {
    let root = match (build_root, docker_file) {
        (Some(root), _) => root.to_path_buf(),
        (None, Some(file)) => file
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| ".".into()),
        (None, None) => {
            return Err(PackError::Request(
                "docker_build_root or docker_file must be provided".to_string(),
            ))
        }
    };

    let mut args = vec!["build".to_string(), "--tag".to_string(), tag.to_string()];
    if let Some(file) = docker_file {
        args.push("--file".to_string());
        args.push(file.display().to_string());
    }
    args.push(root.display().to_string());
    Ok(args)
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn image_id(&self, tag: &str) -> PackResult<Option<String>> {
        let output = self
            .exec(self.command(["images", "--format={{.ID}}", tag]))
            .await?;
        let id = output
            .stdout_text()
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_string);
        debug!("image id: {} -> {:?}", tag, id);
        Ok(id)
    }

    async fn build_image(
        &self,
        tag: &str,
        docker_file: Option<&Path>,
        build_root: Option<&Path>,
    ) -> PackResult<()> {
        let args = build_args(tag, docker_file, build_root)?;
        self.exec(self.command(args)).await.map_err(|e| match e {
            PackError::CommandFailed { stderr, .. } => PackError::ImageBuild(stderr),
            other => other,
        })?;
        Ok(())
    }

    async fn run(&self, spec: &RunSpec) -> PackResult<Captured> {
        self.exec(self.command(spec.args())).await
    }

    fn runtime_name(&self) -> &str {
        &self.engine
    }
}
