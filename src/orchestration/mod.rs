//! Container builds
//!
//! Installers and shell steps can run inside a throwaway container instead
//! of on the host. [`BuildContainer`] binds a [`ContainerRuntime`] to the
//! request's docker options and renders the per-invocation [`RunSpec`].

mod docker;
mod factory;
mod runtime;

pub use docker::DockerCli;
pub use factory::{create_runtime, Platform};
pub use runtime::{ContainerRuntime, RunSpec, SshAgent};

use crate::config::Config;
use crate::error::{PackError, PackResult};
use crate::install::Ecosystem;
use crate::paths::resolve;
use crate::process::Captured;
use crate::request::{DockerOptions, FlagOrPath};
use std::path::{Path, PathBuf};
use tokio::sync::OnceCell;
use tracing::{debug, info};

/// Container settings that come from the process configuration
#[derive(Debug, Clone)]
pub struct ContainerSettings {
    /// Directory relative paths in the options are resolved against
    pub root: PathBuf,
    /// Artifacts directory; default caches live under `<artifacts_dir>/cache`
    pub artifacts_dir: PathBuf,
    pub image_prefix: String,
    pub workdir: String,
    pub shell: String,
}

impl ContainerSettings {
    pub fn from_config(config: &Config, root: &Path, artifacts_dir: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            artifacts_dir: artifacts_dir.to_path_buf(),
            image_prefix: config.container.image_prefix.clone(),
            workdir: config.container.workdir.clone(),
            shell: config.packaging.shell.clone(),
        }
    }
}

/// A container runtime bound to one build's docker options
pub struct BuildContainer {
    runtime: Box<dyn ContainerRuntime>,
    options: DockerOptions,
    settings: ContainerSettings,
    custom_image: OnceCell<String>,
}

impl BuildContainer {
    /// Validate the options and bind them to a runtime
    pub fn new(
        runtime: Box<dyn ContainerRuntime>,
        options: DockerOptions,
        settings: ContainerSettings,
    ) -> PackResult<Self> {
        if options.docker_image.is_none()
            && (options.docker_file.is_some() || options.docker_build_root.is_some())
        {
            return Err(PackError::Request(
                "docker_image must be specified for a custom image future references"
                    .to_string(),
            ));
        }
        Ok(Self {
            runtime,
            options,
            settings,
            custom_image: OnceCell::new(),
        })
    }

    /// Working directory inside the container
    pub fn workdir(&self) -> &str {
        &self.settings.workdir
    }

    pub fn runtime_name(&self) -> &str {
        self.runtime.runtime_name()
    }

    /// Image to run for a given function runtime.
    ///
    /// A custom `docker_image` is looked up once (and built when missing and
    /// build inputs are given); otherwise the prefixed runtime image is used.
    pub async fn image(&self, runtime: &str) -> PackResult<String> {
        match &self.options.docker_image {
            Some(tag) => self
                .custom_image
                .get_or_try_init(|| self.resolve_custom_image(tag))
                .await
                .cloned(),
            None => Ok(format!("{}{}", self.settings.image_prefix, runtime)),
        }
    }

    async fn resolve_custom_image(&self, tag: &str) -> PackResult<String> {
        if let Some(id) = self.runtime.image_id(tag).await? {
            debug!("DOCKER TAG ID: {} -> {}", tag, id);
            return Ok(id);
        }

        let docker_file = self
            .options
            .docker_file
            .as_deref()
            .map(|p| resolve(&self.settings.root, p));
        let build_root = self
            .options
            .docker_build_root
            .as_deref()
            .map(|p| resolve(&self.settings.root, p));

        if docker_file.is_none() && build_root.is_none() {
            info!("image {} not present locally, the engine will pull it", tag);
            return Ok(tag.to_string());
        }

        info!("building image {}", tag);
        self.runtime
            .build_image(tag, docker_file.as_deref(), build_root.as_deref())
            .await?;
        Ok(self
            .runtime
            .image_id(tag)
            .await?
            .unwrap_or_else(|| tag.to_string()))
    }

    /// Host directory mounted as the cache of `ecosystem`, if configured
    pub fn cache_dir(&self, ecosystem: Ecosystem) -> Option<PathBuf> {
        let option = match ecosystem {
            Ecosystem::Pip => self.options.docker_pip_cache.as_ref(),
            Ecosystem::Poetry => self.options.docker_poetry_cache.as_ref(),
            Ecosystem::Uv => self.options.docker_uv_cache.as_ref(),
            Ecosystem::Npm => None,
        }?;
        match option {
            FlagOrPath::Flag(false) => None,
            FlagOrPath::Flag(true) => Some(resolve(
                &self.settings.root,
                &self
                    .settings
                    .artifacts_dir
                    .join("cache")
                    .join(ecosystem.cache_dir()),
            )),
            FlagOrPath::Path(path) => Some(resolve(&self.settings.root, Path::new(path))),
        }
    }

    /// Render the run spec for `command` with `mount` as the working directory
    pub async fn spec(
        &self,
        runtime: &str,
        mount: &Path,
        command: String,
        ecosystem: Option<Ecosystem>,
    ) -> PackResult<RunSpec> {
        let mut spec = RunSpec::new(self.image(runtime).await?, mount, command);
        spec.workdir = self.settings.workdir.clone();
        spec.shell = self.settings.shell.clone();
        spec.additional_options = self.options.docker_additional_options.clone();
        spec.entrypoint = self.options.docker_entrypoint.clone();

        spec.known_hosts = dirs::home_dir()
            .map(|home| home.join(".ssh").join("known_hosts"))
            .filter(|path| path.is_file());

        if self.options.with_ssh_agent {
            let sock = std::env::var_os("SSH_AUTH_SOCK").map(PathBuf::from);
            spec.ssh_agent = Some(Platform::detect().ssh_agent(sock)?);
        }

        if let Some(ecosystem) = ecosystem {
            if let (Some(host), Some(target)) =
                (self.cache_dir(ecosystem), ecosystem.container_cache_path())
            {
                std::fs::create_dir_all(&host).map_err(|e| {
                    PackError::io(format!("creating cache directory {}", host.display()), e)
                })?;
                spec.caches.push((host, target.to_string()));
            }
        }

        Ok(spec)
    }

    /// Run a prepared spec
    pub async fn run(&self, spec: &RunSpec) -> PackResult<Captured> {
        self.runtime.run(spec).await
    }
}
