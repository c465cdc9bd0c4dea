//! Container runtime abstraction
//!
//! Provides a trait for the container operations a build needs, plus the
//! `RunSpec` describing one throwaway build container.

use crate::error::PackResult;
use crate::process::Captured;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// How the host SSH agent is exposed to the container
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SshAgent {
    /// Docker Desktop's forwarded socket on macOS
    HostServices,
    /// A host socket path bind-mounted into the container
    Socket(PathBuf),
}

/// Mount point of the forwarded agent socket on Linux
const SSH_SOCK_TARGET: &str = "/tmp/ssh_sock";

/// Mount point of the agent socket provided by Docker Desktop on macOS
const HOST_SERVICES_SOCK: &str = "/run/host-services/ssh-auth.sock";

/// One `run --rm` invocation of a build container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSpec {
    /// Image reference or id
    pub image: String,
    /// Working directory inside the container, also the mount target of `mount`
    pub workdir: String,
    /// Host directory mounted read-write at `workdir`
    pub mount: PathBuf,
    /// Additional bind mounts (host path, container path)
    pub volumes: Vec<(PathBuf, String)>,
    /// User's `known_hosts`, mounted for git+ssh dependencies
    pub known_hosts: Option<PathBuf>,
    /// Options passed through verbatim before the image
    pub additional_options: Vec<String>,
    pub ssh_agent: Option<SshAgent>,
    /// Package manager cache mounts (host path, container path)
    pub caches: Vec<(PathBuf, String)>,
    /// `None` clears the image entrypoint
    pub entrypoint: Option<String>,
    /// Shell used to run `command`
    pub shell: String,
    pub command: String,
}

impl RunSpec {
    /// Create a spec running `command` in `image` with `mount` as workdir
    pub fn new(image: impl Into<String>, mount: impl Into<PathBuf>, command: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            workdir: "/var/task".to_string(),
            mount: mount.into(),
            volumes: Vec::new(),
            known_hosts: None,
            additional_options: Vec::new(),
            ssh_agent: None,
            caches: Vec::new(),
            entrypoint: None,
            shell: "/bin/sh".to_string(),
            command: command.into(),
        }
    }

    /// Engine arguments, starting with `run`
    pub fn args(&self) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "--rm".to_string(),
            "-w".to_string(),
            self.workdir.clone(),
        ];

        push_volume(&mut args, &self.mount, &self.workdir);
        for (host, target) in &self.volumes {
            push_volume(&mut args, host, target);
        }
        if let Some(known_hosts) = &self.known_hosts {
            push_volume(&mut args, known_hosts, "/root/.ssh/known_hosts");
        }

        args.extend(self.additional_options.iter().cloned());

        match &self.ssh_agent {
            Some(SshAgent::HostServices) => {
                args.push("--mount".to_string());
                args.push(format!(
                    "type=bind,src={0},target={0}",
                    HOST_SERVICES_SOCK
                ));
                args.push("-e".to_string());
                args.push(format!("SSH_AUTH_SOCK={}", HOST_SERVICES_SOCK));
            }
            Some(SshAgent::Socket(sock)) => {
                push_volume(&mut args, sock, SSH_SOCK_TARGET);
                args.push("-e".to_string());
                args.push(format!("SSH_AUTH_SOCK={}", SSH_SOCK_TARGET));
            }
            None => {}
        }

        for (host, target) in &self.caches {
            push_volume(&mut args, host, target);
        }

        args.push("--entrypoint".to_string());
        args.push(self.entrypoint.clone().unwrap_or_default());

        args.push(self.image.clone());
        args.push(self.shell.clone());
        args.push("-c".to_string());
        args.push(self.command.clone());
        args
    }
}

fn push_volume(args: &mut Vec<String>, host: &Path, target: &str) {
    args.push("-v".to_string());
    args.push(format!("{}:{}:z", host.display(), target));
}

/// Abstract container engine interface
///
/// Implemented by the CLI-driven engines (`docker`, `podman`); tests can
/// substitute their own implementation.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Local image id for `tag`, `None` when the image is not present
    async fn image_id(&self, tag: &str) -> PackResult<Option<String>>;

    /// Build and tag an image from a Dockerfile and/or build root
    async fn build_image(
        &self,
        tag: &str,
        docker_file: Option<&Path>,
        build_root: Option<&Path>,
    ) -> PackResult<()>;

    /// Run a throwaway container, failing on a non-zero exit status
    async fn run(&self, spec: &RunSpec) -> PackResult<Captured>;

    /// Engine name for display
    fn runtime_name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_run_args() {
        let spec = RunSpec::new("public.ecr.aws/sam/build-python3.12", "/tmp/build", "pip install");
        assert_eq!(
            spec.args(),
            vec![
                "run",
                "--rm",
                "-w",
                "/var/task",
                "-v",
                "/tmp/build:/var/task:z",
                "--entrypoint",
                "",
                "public.ecr.aws/sam/build-python3.12",
                "/bin/sh",
                "-c",
                "pip install",
            ]
        );
    }

    #[test]
    fn full_run_args_order() {
        let mut spec = RunSpec::new("img", "/src", "make");
        spec.known_hosts = Some(PathBuf::from("/home/u/.ssh/known_hosts"));
        spec.additional_options = vec!["--network".into(), "host".into()];
        spec.ssh_agent = Some(SshAgent::Socket(PathBuf::from("/run/agent.sock")));
        spec.caches = vec![(PathBuf::from("/cache/pip"), "/root/.cache/pip".into())];
        spec.entrypoint = Some("/entry".into());

        let args = spec.args();
        let pos = |needle: &str| args.iter().position(|a| a == needle).unwrap();

        assert!(pos("/home/u/.ssh/known_hosts:/root/.ssh/known_hosts:z") < pos("--network"));
        assert!(pos("--network") < pos("/run/agent.sock:/tmp/ssh_sock:z"));
        assert!(pos("SSH_AUTH_SOCK=/tmp/ssh_sock") < pos("/cache/pip:/root/.cache/pip:z"));
        assert_eq!(args[pos("--entrypoint") + 1], "/entry");
        assert_eq!(&args[args.len() - 4..], &["img", "/bin/sh", "-c", "make"]);
    }

    #[test]
    fn host_services_agent() {
        let mut spec = RunSpec::new("img", "/src", "true");
        spec.ssh_agent = Some(SshAgent::HostServices);
        let args = spec.args();
        assert!(args.contains(&"SSH_AUTH_SOCK=/run/host-services/ssh-auth.sock".to_string()));
        assert!(args.contains(&"--mount".to_string()));
    }
}
