//! Error types for lambda-pack
//!
//! All modules use `PackResult<T>` as their return type.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for packaging operations
pub type PackResult<T> = Result<T, PackError>;

/// All errors that can occur while planning or building an archive
#[derive(Error, Debug)]
pub enum PackError {
    // Validation errors
    #[error("Could not locate source_path \"{path}\". Paths are relative to directory where `terraform plan` is being run (\"{cwd}\")")]
    ClaimPathNotFound { path: String, cwd: PathBuf },

    #[error("Invalid :zip directive '{0}', use: ':zip [path [prefix_in_zip]]'")]
    InvalidZipDirective(String),

    #[error("File not found: {0}")]
    ManifestNotFound(PathBuf),

    #[error("Conflicting source_path entry: {0}")]
    ConflictingClaim(String),

    #[error("Unsupported boolean value: {0}")]
    InvalidBool(String),

    #[error("Invalid filter pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Invalid request: {0}")]
    Request(String),

    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    // Tool availability errors
    #[error("Required tool not found: {tool}. {hint}")]
    ToolNotFound { tool: String, hint: String },

    #[error("Unsupported platform for container builds: {0}")]
    UnsupportedPlatform(String),

    // Process errors
    #[error("Command failed with exit code {code}: {command}\n{stdout}\n{stderr}")]
    CommandFailed {
        command: String,
        code: i32,
        stdout: String,
        stderr: String,
    },

    #[error("Failed to spawn command: {command}")]
    CommandSpawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Container image build failed: {0}")]
    ImageBuild(String),

    // Archive errors
    #[error("Archive error: {0}")]
    ArchiveState(String),

    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    // Timestamp errors
    #[error("ZIP does not support timestamps before 1980: {0}")]
    TimestampBeforeZipEpoch(String),

    #[error("Invalid timestamp '{value}': {reason}")]
    InvalidTimestamp { value: String, reason: String },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Directory walk failed: {0}")]
    Walk(#[from] walkdir::Error),

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PackError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a command failure from captured output
    pub fn command_failed(
        command: impl Into<String>,
        code: i32,
        stdout: &[u8],
        stderr: &[u8],
    ) -> Self {
        Self::CommandFailed {
            command: command.into(),
            code,
            stdout: String::from_utf8_lossy(stdout).trim().to_string(),
            stderr: String::from_utf8_lossy(stderr).trim().to_string(),
        }
    }

    /// Create a tool-not-found error
    pub fn tool_not_found(tool: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::ToolNotFound {
            tool: tool.into(),
            hint: hint.into(),
        }
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::ToolNotFound { .. } => {
                Some("Install the tool on the host or set `docker` to build inside a container")
            }
            Self::ManifestNotFound(_) => {
                Some("Check the dependency manifest path or drop the requirement flag")
            }
            Self::TimestampBeforeZipEpoch(_) => {
                Some("Zip archives store dates from 1980-01-01 onwards")
            }
            Self::UnsupportedPlatform(_) => Some("Container builds run on Linux and macOS only"),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = PackError::InvalidZipDirective(":zip a b c".to_string());
        assert!(err.to_string().contains(":zip [path [prefix_in_zip]]"));
    }

    #[test]
    fn error_hint() {
        let err = PackError::tool_not_found("npm", "npm should be available in PATH");
        assert!(err.hint().is_some());
        assert_eq!(PackError::Internal("x".into()).hint(), None);
    }

    #[test]
    fn command_failed_trims_output() {
        let err = PackError::command_failed("sh -c false", 1, b" out \n", b"\nerr ");
        match err {
            PackError::CommandFailed { stdout, stderr, .. } => {
                assert_eq!(stdout, "out");
                assert_eq!(stderr, "err");
            }
            _ => panic!("expected CommandFailed"),
        }
    }
}
