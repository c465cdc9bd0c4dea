//! CLI argument definitions using clap derive

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

/// lambda-pack - reproducible deployment archives
///
/// Compiles a packaging request into a build plan and a content hash
/// (`prepare`), then materializes the archive only when it is missing
/// (`build`).
#[derive(Parser, Debug)]
#[command(name = "lambda-pack")]
#[command(author, version, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "LAMBDA_PACK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log level (CRITICAL, ERROR, WARNING, INFO, DEBUG, DEBUG2, DEBUG3, DUMP_ENV)
    #[arg(long, global = true, env = "TF_LAMBDA_PACKAGE_LOG_LEVEL", hide = true)]
    pub log_level: Option<String>,

    /// Strip trailing `  # comment` from filter patterns (yes/no)
    #[arg(long, global = true, env = "TF_LAMBDA_PACKAGE_PATTERN_COMMENTS", hide = true)]
    pub pattern_comments: Option<String>,

    /// Report missing artifacts so they are rebuilt (yes/no)
    #[arg(long, global = true, env = "TF_RECREATE_MISSING_LAMBDA_PACKAGE", hide = true)]
    pub recreate_missing_package: Option<String>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Compute the content hash and build plan from a JSON request on stdin
    Prepare,

    /// Build the archive described by a plan file
    Build(BuildArgs),

    /// Zip directories into an archive
    Zip(ZipArgs),

    /// Print the base64-encoded SHA-256 of a file
    Hash(HashArgs),
}

/// Arguments for the build command
#[derive(Parser, Debug)]
pub struct BuildArgs {
    /// Plan file written by the prepare command
    #[arg(value_name = "PLAN_FILE")]
    pub plan_file: PathBuf,

    /// Archive modification time in nanoseconds, as reported by prepare
    #[arg(short, long = "timestamp", required = true)]
    pub timestamp: String,

    /// Rebuild even when the archive already exists
    #[arg(short, long)]
    pub force: bool,
}

/// Arguments for the zip command
#[derive(Parser, Debug)]
pub struct ZipArgs {
    /// Archive to create
    #[arg(value_name = "ZIPFILE")]
    pub zipfile: PathBuf,

    /// Directories whose contents are archived
    #[arg(value_name = "DIR", required = true)]
    pub dirs: Vec<PathBuf>,

    /// Timestamp applied to every entry (seconds or an RFC 3339 date)
    #[arg(short, long)]
    pub timestamp: Option<String>,
}

/// Arguments for the hash command
#[derive(Parser, Debug)]
pub struct HashArgs {
    /// File to hash
    pub file: PathBuf,
}
