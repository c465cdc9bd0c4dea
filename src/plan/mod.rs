//! Build plans: compilation from claims and execution into an archive

mod compiler;
mod executor;
mod types;

pub use compiler::{CompileOptions, CompiledPlan, Compiler, PlanBuilder};
pub use executor::Executor;
pub use types::{BuildPlan, BuildStep};
