//! Configuration schema for lambda-pack
//!
//! Configuration is stored at `~/.config/lambda-pack/config.toml`. Every
//! section is optional; environment toggles override the file.

use serde::{Deserialize, Serialize};

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Logging settings
    pub general: GeneralConfig,

    /// Plan compilation and archive settings
    pub packaging: PackagingConfig,

    /// Container build settings
    pub container: ContainerConfig,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Default log level (`error`, `warn`, `info`, `debug`, `trace`)
    pub log_level: Option<String>,

    /// Log format: "text" or "json"
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: None,
            log_format: "text".to_string(),
        }
    }
}

/// Packaging behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PackagingConfig {
    /// Strip `  # comment` tails from filter patterns
    pub pattern_comments: bool,

    /// Report a missing artifact so the caller rebuilds it, used when
    /// neither the environment nor the request decides
    pub recreate_missing_package: bool,

    /// Shell running command steps on the host and in containers
    pub shell: String,
}

impl Default for PackagingConfig {
    fn default() -> Self {
        Self {
            pattern_comments: false,
            recreate_missing_package: false,
            shell: "/bin/sh".to_string(),
        }
    }
}

/// Container engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    /// Engine binary (`docker` or `podman`)
    pub engine: String,

    /// Prefix of the default build image, followed by the runtime
    pub image_prefix: String,

    /// Working directory inside build containers
    pub workdir: String,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            engine: "docker".to_string(),
            image_prefix: "public.ecr.aws/sam/build-".to_string(),
            workdir: "/var/task".to_string(),
        }
    }
}
