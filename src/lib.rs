//! lambda-pack - reproducible deployment archives
//!
//! Compiles declarative source claims into a serializable build plan and a
//! content hash, then executes the plan into a byte-deterministic zip
//! archive named after that hash.

pub mod archive;
pub mod cli;
pub mod config;
pub mod error;
pub mod filter;
pub mod hash;
pub mod install;
pub mod orchestration;
pub mod paths;
pub mod plan;
pub mod process;
pub mod request;

pub use error::{PackError, PackResult};
