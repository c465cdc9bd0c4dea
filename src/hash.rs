//! Content hashing for archive cache keys
//!
//! A cache key folds file names and file bytes of every declared input into a
//! single SHA-256 digest. Traversal order is fixed (lexicographic by relative
//! path) and file metadata is never read, so touching a file or copying the
//! tree to another machine does not change the key.

use crate::error::{PackError, PackResult};
use crate::paths::to_slash;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, trace};
use walkdir::WalkDir;

/// Read buffer size used when streaming file contents into the digest
const CHUNK_SIZE: usize = 8 * 1024;

/// One declared hash input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashInput {
    path: PathBuf,
    /// Directory the hashed names are made relative to, when fixed by the caller
    base: Option<PathBuf>,
}

impl HashInput {
    /// A file or directory hashed under its own name.
    ///
    /// Directories contribute names relative to themselves, files contribute
    /// their file name.
    pub fn path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            base: None,
        }
    }

    /// A file hashed under its name relative to `base`
    pub fn within(base: impl Into<PathBuf>, path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            base: Some(base.into()),
        }
    }

    /// Filesystem path of this input
    pub fn as_path(&self) -> &Path {
        &self.path
    }
}

/// Incremental content hasher
pub struct ContentHasher {
    hasher: Sha256,
}

impl ContentHasher {
    pub fn new() -> Self {
        Self {
            hasher: Sha256::new(),
        }
    }

    /// Fold every input's names and contents into the digest, in order
    pub fn update_inputs(&mut self, inputs: &[HashInput]) -> PackResult<()> {
        for input in inputs {
            self.update_input(input)?;
        }
        Ok(())
    }

    fn update_input(&mut self, input: &HashInput) -> PackResult<()> {
        let path = &input.path;

        if let Some(base) = &input.base {
            let name = path
                .strip_prefix(base)
                .map(to_slash)
                .unwrap_or_else(|_| file_name(path));
            return self.update_file(&name, path);
        }

        if path.is_dir() {
            for relative in list_files(path)? {
                self.update_file(&relative, &path.join(&relative))?;
            }
        } else {
            self.update_file(&file_name(path), path)?;
        }
        Ok(())
    }

    /// Feed a name followed by the file's bytes.
    ///
    /// A file that vanished (or a dangling symlink) contributes its name only.
    fn update_file(&mut self, name: &str, path: &Path) -> PackResult<()> {
        self.hasher.update(name.as_bytes());

        let mut file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("Skipping missing file: {}", path.display());
                return Ok(());
            }
            Err(e) => return Err(PackError::io(format!("opening {}", path.display()), e)),
        };

        let mut buffer = [0u8; CHUNK_SIZE];
        loop {
            let read = file
                .read(&mut buffer)
                .map_err(|e| PackError::io(format!("reading {}", path.display()), e))?;
            if read == 0 {
                break;
            }
            self.hasher.update(&buffer[..read]);
        }
        trace!("hashed {}", path.display());
        Ok(())
    }

    /// Feed raw bytes (runtime, salt, serialized plan)
    pub fn update(&mut self, bytes: impl AsRef<[u8]>) {
        self.hasher.update(bytes.as_ref());
    }

    /// Finish and return the lowercase hex digest
    pub fn hexdigest(self) -> String {
        hex::encode(self.hasher.finalize())
    }
}

impl Default for ContentHasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Hash the given inputs followed by extra scalar values
pub fn content_hash(inputs: &[HashInput], extra: &[&[u8]]) -> PackResult<String> {
    let mut hasher = ContentHasher::new();
    hasher.update_inputs(inputs)?;
    for bytes in extra {
        hasher.update(bytes);
    }
    Ok(hasher.hexdigest())
}

/// List every regular file under `dir`, following symlinks.
///
/// Returns slash-separated paths relative to `dir`, sorted lexicographically.
/// Entries that disappear or dangle during the walk are skipped.
pub fn list_files(dir: &Path) -> PackResult<Vec<String>> {
    let mut files = Vec::new();

    for entry in WalkDir::new(dir).follow_links(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if is_not_found(&e) => {
                debug!("Skipping dangling entry: {}", e);
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        if entry.file_type().is_dir() {
            continue;
        }
        if let Ok(relative) = entry.path().strip_prefix(dir) {
            files.push(to_slash(relative));
        }
    }

    files.sort();
    Ok(files)
}

/// Base64-encoded SHA-256 of a byte slice, the format deployment APIs report
pub fn source_code_hash(bytes: &[u8]) -> String {
    BASE64.encode(Sha256::digest(bytes))
}

fn is_not_found(err: &walkdir::Error) -> bool {
    err.io_error()
        .map(|e| e.kind() == ErrorKind::NotFound)
        .unwrap_or(false)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| to_slash(path))
}
