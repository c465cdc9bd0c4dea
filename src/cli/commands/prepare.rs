//! Prepare command - compute the content hash and persist the build plan

use crate::config::Config;
use crate::error::{PackError, PackResult};
use crate::hash::{ContentHasher, HashInput};
use crate::paths::{resolve, to_slash};
use crate::plan::{CompileOptions, Compiler};
use crate::request::{BuildData, PrepareRequest};
use serde::Serialize;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info_span, trace};

/// Reported instead of a timestamp when missing artifacts are not recreated
pub const NOT_RESTORED_MARKER: &str = "<WARNING: Missing lambda zip artifacts wouldn't be restored>";

/// Settings of one prepare run that do not come from the request
#[derive(Debug, Clone)]
pub struct PrepareOptions {
    /// Directory relative request paths are resolved against
    pub root: PathBuf,
    pub pattern_comments: bool,
    /// Environment override of the request's `recreate_missing_package`
    pub recreate_missing_package: Option<bool>,
    /// Used when neither the environment nor the request decides
    pub recreate_default: bool,
}

/// JSON document written to stdout; every value is a string
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrepareResponse {
    pub filename: String,
    pub build_plan: String,
    pub build_plan_filename: String,
    pub timestamp: String,
    pub was_missing: String,
}

/// Execute the prepare command, reading the request from stdin
pub async fn execute(config: &Config, recreate_missing_package: Option<bool>) -> PackResult<()> {
    let mut input = String::new();
    std::io::stdin()
        .read_to_string(&mut input)
        .map_err(|e| PackError::io("reading request from stdin", e))?;

    let root = std::env::current_dir()
        .map_err(|e| PackError::io("getting current directory", e))?;
    let options = PrepareOptions {
        root,
        pattern_comments: config.packaging.pattern_comments,
        recreate_missing_package,
        recreate_default: config.packaging.recreate_missing_package,
    };

    let request = PrepareRequest::from_json(&input)?;
    let response = prepare(&request, &options)?;

    let output = serde_json::to_string_pretty(&response)?;
    println!("{}", output);
    Ok(())
}

/// Compile the request, hash its inputs and write the plan file
pub fn prepare(request: &PrepareRequest, options: &PrepareOptions) -> PackResult<PrepareResponse> {
    let _span = info_span!("prepare").entered();
    if let Some(name) = &request.function_name {
        debug!("function: {}", name);
    }

    let compiler = Compiler::new(
        &options.root,
        CompileOptions {
            runtime: request.runtime.clone(),
            use_container: request.docker.is_some(),
            pattern_comments: options.pattern_comments,
        },
    );
    let compiled = compiler.compile(&request.source_path)?;
    let plan_json = compiled.plan.to_canonical_json()?;
    trace!("BUILD_PLAN: {}", String::from_utf8_lossy(&plan_json));

    let mut inputs = compiled.hash_inputs;
    for extra in request.expanded_hash_extra_paths() {
        inputs.push(HashInput::path(resolve(&options.root, Path::new(&extra))));
    }

    debug!("Computing content hash on files...");
    let mut hasher = ContentHasher::new();
    hasher.update_inputs(&inputs)?;
    hasher.update(&plan_json);
    hasher.update(request.runtime.as_bytes());
    hasher.update(request.hash_extra.as_bytes());
    let content_hash = hasher.hexdigest();

    let filename = request.artifacts_dir.join(format!("{}.zip", content_hash));
    let plan_filename = request
        .artifacts_dir
        .join(format!("{}.plan.json", content_hash));

    let recreate = options
        .recreate_missing_package
        .or(request.recreate_missing_package)
        .unwrap_or(options.recreate_default);
    let (timestamp, was_missing) = if recreate {
        artifact_timestamp(&resolve(&options.root, &filename))?
    } else {
        (NOT_RESTORED_MARKER.to_string(), false)
    };

    let build_data = BuildData {
        filename: filename.clone(),
        runtime: request.runtime.clone(),
        artifacts_dir: request.artifacts_dir.clone(),
        build_plan: compiled.plan,
        docker: request.docker.clone(),
    };
    let build_plan = serde_json::to_string(&build_data)?;

    let artifacts_dir = resolve(&options.root, &request.artifacts_dir);
    fs::create_dir_all(&artifacts_dir)
        .map_err(|e| PackError::io(format!("creating {}", artifacts_dir.display()), e))?;
    let plan_path = resolve(&options.root, &plan_filename);
    fs::write(&plan_path, &build_plan)
        .map_err(|e| PackError::io(format!("writing {}", plan_path.display()), e))?;

    Ok(PrepareResponse {
        filename: to_slash(&filename),
        build_plan,
        build_plan_filename: to_slash(&plan_filename),
        timestamp,
        was_missing: was_missing.to_string(),
    })
}

/// Existing artifact's mtime in nanoseconds, or now when it is missing
fn artifact_timestamp(path: &Path) -> PackResult<(String, bool)> {
    match fs::metadata(path) {
        Ok(metadata) => {
            let modified = metadata
                .modified()
                .map_err(|e| PackError::io(format!("reading mtime of {}", path.display()), e))?;
            Ok((nanos_since_epoch(modified).to_string(), false))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            // Coarsened to 100ns so every platform can store it back exactly
            let now = nanos_since_epoch(SystemTime::now()) / 100 * 100;
            Ok((now.to_string(), true))
        }
        Err(e) => Err(PackError::io(format!("reading {}", path.display()), e)),
    }
}

fn nanos_since_epoch(time: SystemTime) -> u128 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0)
}
