//! Runtime factory for creating platform-appropriate container runtimes

use crate::config::Config;
use crate::error::{PackError, PackResult};
use crate::orchestration::docker::DockerCli;
use crate::orchestration::runtime::{ContainerRuntime, SshAgent};
use std::path::PathBuf;

/// Detected platform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    MacOS,
    Linux,
    /// Container builds are not supported
    Unsupported,
}

impl Platform {
    /// Detect the current platform
    pub fn detect() -> Self {
        match std::env::consts::OS {
            "macos" => Platform::MacOS,
            "linux" => Platform::Linux,
            _ => Platform::Unsupported,
        }
    }

    /// Get a human-readable platform name
    pub fn name(&self) -> &'static str {
        match self {
            Platform::MacOS => "macOS",
            Platform::Linux => "Linux",
            Platform::Unsupported => "Unsupported",
        }
    }

    /// How to forward the SSH agent into a container on this platform
    pub fn ssh_agent(&self, auth_sock: Option<PathBuf>) -> PackResult<SshAgent> {
        match self {
            Platform::MacOS => Ok(SshAgent::HostServices),
            Platform::Linux => auth_sock.map(SshAgent::Socket).ok_or_else(|| {
                PackError::Request(
                    "with_ssh_agent requires SSH_AUTH_SOCK to be set".to_string(),
                )
            }),
            Platform::Unsupported => Err(PackError::UnsupportedPlatform(
                std::env::consts::OS.to_string(),
            )),
        }
    }
}

/// Create the container runtime configured for this platform
pub fn create_runtime(config: &Config) -> PackResult<Box<dyn ContainerRuntime>> {
    match Platform::detect() {
        Platform::MacOS | Platform::Linux => {
            Ok(Box::new(DockerCli::new(config.container.engine.clone())))
        }
        Platform::Unsupported => Err(PackError::UnsupportedPlatform(
            std::env::consts::OS.to_string(),
        )),
    }
}
