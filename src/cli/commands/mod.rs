//! CLI command implementations

pub mod build;
pub mod hash;
pub mod prepare;
pub mod zip;

pub use build::execute as build;
pub use hash::execute as hash;
pub use prepare::execute as prepare;
pub use zip::execute as zip;
