//! Zip command - archive directories with an optional fixed timestamp

use crate::archive::{write_archive, Timestamp};
use crate::cli::args::ZipArgs;
use crate::error::{PackError, PackResult};
use crate::hash::source_code_hash;
use std::fs;
use tracing::debug;

/// Execute the zip command
pub async fn execute(args: ZipArgs) -> PackResult<()> {
    let timestamp = args
        .timestamp
        .as_deref()
        .map(str::parse::<Timestamp>)
        .transpose()?;

    // Rejected before the temporary archive is created
    if let Some(ts) = &timestamp {
        ts.to_zip_datetime()?;
    }

    write_archive(&args.zipfile, timestamp, |zs| {
        zs.write_dirs(args.dirs.as_slice(), None, None)
    })?;

    let bytes = fs::read(&args.zipfile)
        .map_err(|e| PackError::io(format!("reading {}", args.zipfile.display()), e))?;
    debug!("Source code hash: {}", source_code_hash(&bytes));
    Ok(())
}
