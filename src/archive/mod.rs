//! Deterministic zip archive output

pub mod timestamp;
mod writer;

pub use timestamp::{Timestamp, MIN_ZIP_EPOCH};
pub use writer::{write_archive, ZipWriteStream};
