//! Atomic, deterministic zip writer
//!
//! Entries are written to `<filename>.tmp`; a successful close renames the
//! temporary file over the final name, a failed close (or dropping an open
//! writer) deletes it. A previously published archive is therefore never
//! replaced by a partial one.

use crate::archive::timestamp::{from_system_time, Timestamp};
use crate::error::{PackError, PackResult};
use crate::filter::PatternFilter;
use crate::paths::archive_name;
use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime as ZipDateTime, ZipWriter};

/// Read buffer size used when streaming file contents into the archive
const CHUNK_SIZE: usize = 8 * 1024;

/// Entries at or above this size need zip64 headers
const ZIP64_THRESHOLD: u64 = u32::MAX as u64;

enum State {
    Fresh,
    Open {
        zip: ZipWriter<File>,
        default_time: Option<ZipDateTime>,
    },
    Closed,
}

/// Streaming zip writer publishing atomically on close
pub struct ZipWriteStream {
    filename: PathBuf,
    tmp_filename: PathBuf,
    timestamp: Option<Timestamp>,
    state: State,
}

impl ZipWriteStream {
    /// Create a writer for `filename`; nothing touches the disk until `open`
    pub fn new(filename: impl Into<PathBuf>) -> PackResult<Self> {
        let filename = filename.into();
        if filename.as_os_str().is_empty() {
            return Err(PackError::ArchiveState(
                "zip file path must be provided".to_string(),
            ));
        }

        let mut tmp = filename.clone().into_os_string();
        tmp.push(".tmp");

        Ok(Self {
            filename,
            tmp_filename: PathBuf::from(tmp),
            timestamp: None,
            state: State::Fresh,
        })
    }

    /// Use one timestamp for every entry that has no per-call override
    pub fn with_timestamp(mut self, timestamp: Option<Timestamp>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Final archive path
    pub fn filename(&self) -> &Path {
        &self.filename
    }

    /// Temporary path entries are written to while open
    pub fn tmp_filename(&self) -> &Path {
        &self.tmp_filename
    }

    /// Create the temporary file. A writer can be opened exactly once.
    pub fn open(&mut self) -> PackResult<()> {
        match self.state {
            State::Fresh => {}
            State::Open { .. } => {
                return Err(PackError::ArchiveState(
                    "zip stream is already open".to_string(),
                ))
            }
            State::Closed => {
                return Err(PackError::ArchiveState(
                    "zip stream object can't be reused".to_string(),
                ))
            }
        }

        // Reject an unusable default before anything is written
        let default_time = self
            .timestamp
            .as_ref()
            .map(Timestamp::to_zip_datetime)
            .transpose()?;

        if let Some(parent) = self.filename.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                info!("creating {}", parent.display());
                fs::create_dir_all(parent)
                    .map_err(|e| PackError::io(format!("creating {}", parent.display()), e))?;
            }
        }

        info!("creating '{}' archive", self.filename.display());
        let file = File::create(&self.tmp_filename).map_err(|e| {
            PackError::io(format!("creating {}", self.tmp_filename.display()), e)
        })?;

        self.state = State::Open {
            zip: ZipWriter::new(file),
            default_time,
        };
        Ok(())
    }

    /// Finish the archive.
    ///
    /// With `failed` the temporary file is discarded and the final path is
    /// left untouched; otherwise it atomically replaces the final path.
    pub fn close(&mut self, failed: bool) -> PackResult<()> {
        let zip = match std::mem::replace(&mut self.state, State::Closed) {
            State::Open { zip, .. } => zip,
            State::Fresh => {
                return Err(PackError::ArchiveState(
                    "zip stream should be opened first".to_string(),
                ))
            }
            State::Closed => {
                return Err(PackError::ArchiveState(
                    "zip stream is already closed".to_string(),
                ))
            }
        };

        if failed {
            drop(zip);
            self.discard_tmp();
            return Ok(());
        }

        let published = zip
            .finish()
            .map_err(PackError::from)
            .and_then(|file| {
                file.sync_all()
                    .map_err(|e| PackError::io("flushing archive", e))
            })
            .and_then(|()| {
                fs::rename(&self.tmp_filename, &self.filename).map_err(|e| {
                    PackError::io(format!("publishing {}", self.filename.display()), e)
                })
            });

        if published.is_err() {
            self.discard_tmp();
        }
        published
    }

    /// Write the contents of each directory (not the directory itself)
    pub fn write_dirs<P: AsRef<Path>>(
        &mut self,
        dirs: &[P],
        prefix: Option<&str>,
        timestamp: Option<&Timestamp>,
    ) -> PackResult<()> {
        let explicit = timestamp.map(Timestamp::to_zip_datetime).transpose()?;
        let everything = PatternFilter::default();

        for dir in dirs {
            let dir = dir.as_ref();
            info!("adding content of directory: {}", dir.display());
            for path in everything.filter(dir, None) {
                let path = path?;
                let relative = path
                    .strip_prefix(dir)
                    .map(crate::paths::to_slash)
                    .map_err(|_| PackError::Internal(format!("{} escaped its root", path.display())))?;
                self.write_entry(&path, prefix, Some(&relative), explicit)?;
            }
        }
        Ok(())
    }

    /// Write one file (or a directory entry) under `prefix`.
    ///
    /// `name` defaults to the file name of `path`.
    pub fn write_file(
        &mut self,
        path: &Path,
        prefix: Option<&str>,
        name: Option<&str>,
        timestamp: Option<&Timestamp>,
    ) -> PackResult<()> {
        let explicit = timestamp.map(Timestamp::to_zip_datetime).transpose()?;
        self.write_entry(path, prefix, name, explicit)
    }

    fn write_entry(
        &mut self,
        path: &Path,
        prefix: Option<&str>,
        name: Option<&str>,
        explicit: Option<ZipDateTime>,
    ) -> PackResult<()> {
        let (zip, default_time) = match &mut self.state {
            State::Open { zip, default_time } => (zip, *default_time),
            State::Fresh => {
                return Err(PackError::ArchiveState(
                    "zip stream should be opened first".to_string(),
                ))
            }
            State::Closed => {
                return Err(PackError::ArchiveState(
                    "attempt to write to zip archive that was already closed".to_string(),
                ))
            }
        };

        let metadata = fs::metadata(path)
            .map_err(|e| PackError::io(format!("reading metadata of {}", path.display()), e))?;

        let base_name = match name {
            Some(n) => n.to_string(),
            None => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        };
        let arcname = archive_name(prefix, &base_name);
        if arcname.is_empty() {
            return Err(PackError::ArchiveState(format!(
                "empty archive name for {}",
                path.display()
            )));
        }

        let modified = match explicit.or(default_time) {
            Some(dt) => dt,
            None => {
                let mtime = metadata
                    .modified()
                    .map_err(|e| PackError::io(format!("reading mtime of {}", path.display()), e))?;
                from_system_time(mtime)
            }
        };

        let options = SimpleFileOptions::default()
            .last_modified_time(modified)
            .unix_permissions(unix_mode(&metadata));

        if metadata.is_dir() {
            info!("adding: {}/", arcname);
            zip.add_directory(arcname, options)?;
            return Ok(());
        }

        info!("adding: {}", arcname);
        let options = options
            .compression_method(CompressionMethod::Deflated)
            .large_file(metadata.len() >= ZIP64_THRESHOLD);
        zip.start_file(arcname, options)?;

        let source = File::open(path)
            .map_err(|e| PackError::io(format!("opening {}", path.display()), e))?;
        let mut reader = BufReader::with_capacity(CHUNK_SIZE, source);
        io::copy(&mut reader, zip)
            .map_err(|e| PackError::io(format!("writing {} to archive", path.display()), e))?;
        Ok(())
    }

    fn discard_tmp(&self) {
        match fs::remove_file(&self.tmp_filename) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                "Failed to remove {}: {}",
                self.tmp_filename.display(),
                e
            ),
        }
    }
}

impl Drop for ZipWriteStream {
    fn drop(&mut self) {
        if let State::Open { .. } = self.state {
            warn!(
                "zip stream for '{}' dropped while open, discarding",
                self.filename.display()
            );
            self.state = State::Closed;
            self.discard_tmp();
        }
    }
}

/// Open `filename`, run `write`, and publish or discard depending on its result.
///
/// The error from `write` is returned after the temporary file is removed.
pub fn write_archive<F>(filename: &Path, timestamp: Option<Timestamp>, write: F) -> PackResult<()>
where
    F: FnOnce(&mut ZipWriteStream) -> PackResult<()>,
{
    let mut stream = ZipWriteStream::new(filename)?.with_timestamp(timestamp);
    stream.open()?;
    match write(&mut stream) {
        Ok(()) => stream.close(false),
        Err(e) => {
            tracing::error!("Error during zip archive creation: {}", e);
            stream.close(true)?;
            Err(e)
        }
    }
}

#[cfg(unix)]
fn unix_mode(metadata: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn unix_mode(metadata: &fs::Metadata) -> u32 {
    if metadata.is_dir() {
        0o755
    } else {
        0o644
    }
}
