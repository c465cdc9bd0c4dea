//! Hash command - print a file's base64-encoded SHA-256

use crate::cli::args::HashArgs;
use crate::error::{PackError, PackResult};
use crate::hash::source_code_hash;
use tokio::fs;

/// Execute the hash command
pub async fn execute(args: HashArgs) -> PackResult<()> {
    let bytes = fs::read(&args.file)
        .await
        .map_err(|e| PackError::io(format!("reading {}", args.file.display()), e))?;
    println!("{}", source_code_hash(&bytes));
    Ok(())
}
