//! Build command - materialize the archive described by a plan file

use crate::archive::ZipWriteStream;
use crate::cli::args::BuildArgs;
use crate::config::Config;
use crate::error::{PackError, PackResult};
use crate::hash::source_code_hash;
use crate::orchestration::{create_runtime, BuildContainer, ContainerSettings};
use crate::paths::resolve;
use crate::plan::Executor;
use crate::request::BuildData;
use std::fs::{self, File, FileTimes};
use std::path::Path;
use std::time::{Duration, SystemTime};
use tracing::{debug, info, Instrument, Level};

/// Execute the build command
pub async fn execute(args: BuildArgs, config: &Config) -> PackResult<()> {
    let root = std::env::current_dir()
        .map_err(|e| PackError::io("getting current directory", e))?;
    build(&args, config, &root)
        .instrument(tracing::info_span!("build"))
        .await
}

/// Build relative to `root`, skipping the work when the archive exists
pub async fn build(args: &BuildArgs, config: &Config, root: &Path) -> PackResult<()> {
    let content = fs::read_to_string(&args.plan_file).map_err(|e| {
        PackError::io(format!("reading plan file {}", args.plan_file.display()), e)
    })?;
    let data: BuildData = serde_json::from_str(&content)?;
    let timestamp = parse_nanos(&args.timestamp);

    let filename = resolve(root, &data.filename);
    if filename.exists() && !args.force {
        info!("Reused: {}", shell_words::quote(&data.filename.to_string_lossy()));
        return Ok(());
    }

    let container = match &data.docker {
        Some(options) => Some(BuildContainer::new(
            create_runtime(config)?,
            options.clone(),
            ContainerSettings::from_config(config, root, &data.artifacts_dir),
        )?),
        None => None,
    };

    let executor = Executor::new(root, data.runtime.clone())
        .with_shell(config.packaging.shell.clone())
        .with_container(container.as_ref());

    let mut zip = ZipWriteStream::new(&filename)?;
    zip.open()?;
    let result = executor.execute(&data.build_plan, &mut zip).await;
    if let Err(e) = &result {
        tracing::error!("Error during zip archive creation: {}", e);
    }
    zip.close(result.is_err())?;
    result?;

    set_file_times(&filename, timestamp)?;
    info!("Created: {}", shell_words::quote(&data.filename.to_string_lossy()));

    if tracing::enabled!(Level::DEBUG) {
        let bytes = fs::read(&filename)
            .map_err(|e| PackError::io(format!("reading {}", filename.display()), e))?;
        debug!("Base64sha256: {}", source_code_hash(&bytes));
    }
    Ok(())
}

/// Numeric values are nanoseconds since the epoch; anything else means 0
fn parse_nanos(value: &str) -> u64 {
    let value = value.trim();
    if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) {
        value.parse().unwrap_or(0)
    } else {
        0
    }
}

fn set_file_times(path: &Path, nanos: u64) -> PackResult<()> {
    let time = SystemTime::UNIX_EPOCH + Duration::from_nanos(nanos);
    let file = File::options()
        .write(true)
        .open(path)
        .map_err(|e| PackError::io(format!("opening {}", path.display()), e))?;
    file.set_times(FileTimes::new().set_accessed(time).set_modified(time))
        .map_err(|e| PackError::io(format!("setting times of {}", path.display()), e))
}
