//! Claim to build plan compilation
//!
//! Compilation walks the claims in order and produces two things at once:
//! the step groups that `build` will execute and the list of inputs that
//! feed the cache key. Nothing is installed or archived here; only cheap
//! filesystem checks (existence, manifest detection, tool lookup) are made.

use super::types::{BuildPlan, BuildStep};
use crate::error::{PackError, PackResult};
use crate::filter::{pattern_lines, PatternFilter};
use crate::hash::HashInput;
use crate::install::{detect_build_system, installer_for, BuildSystem, Ecosystem, InstallRequest};
use crate::paths::{normalize, resolve, to_slash};
use crate::request::{Claim, FlagOrPath, Lines, RuleClaim};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Plan and hash inputs produced by [`Compiler::compile`]
#[derive(Debug, Clone, Default)]
pub struct CompiledPlan {
    pub plan: BuildPlan,
    /// Inputs whose names and bytes feed the cache key, in order
    pub hash_inputs: Vec<HashInput>,
}

/// Accumulates step groups and hash inputs while claims are compiled
#[derive(Debug, Default)]
pub struct PlanBuilder {
    groups: Vec<Vec<BuildStep>>,
    current: Vec<BuildStep>,
    hash_inputs: Vec<HashInput>,
}

impl PlanBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_step(&mut self, step: BuildStep) {
        debug!("plan step: {:?}", step);
        self.current.push(step);
    }

    pub fn add_hash_path(&mut self, input: HashInput) {
        self.hash_inputs.push(input);
    }

    /// Close the current group; empty groups are dropped
    pub fn finish_group(&mut self) {
        if !self.current.is_empty() {
            self.groups.push(std::mem::take(&mut self.current));
        }
    }

    pub fn build(mut self) -> CompiledPlan {
        self.finish_group();
        CompiledPlan {
            plan: BuildPlan {
                groups: self.groups,
            },
            hash_inputs: self.hash_inputs,
        }
    }
}

/// Settings that influence compilation but are not part of a claim
#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// Request runtime, e.g. `python3.12`
    pub runtime: String,
    /// Installers run in a container, so host tools are not checked
    pub use_container: bool,
    /// Strip `  # comment` tails from pattern lines
    pub pattern_comments: bool,
}

/// Where an install step finds its manifest
struct ManifestSpec<'a> {
    /// Declared manifest file, as written into the plan
    declared: String,
    runtime: &'a str,
    prefix: Option<&'a str>,
    tmp_dir: Option<&'a str>,
    required: bool,
}

/// Compiles claims relative to an invocation root
pub struct Compiler {
    root: PathBuf,
    options: CompileOptions,
}

impl Compiler {
    pub fn new(root: impl Into<PathBuf>, options: CompileOptions) -> Self {
        Self {
            root: root.into(),
            options,
        }
    }

    /// Compile claims into one step group each
    pub fn compile(&self, claims: &[Claim]) -> PackResult<CompiledPlan> {
        let mut builder = PlanBuilder::new();
        for claim in claims {
            match claim {
                Claim::Path(path) => self.path_claim(&mut builder, path)?,
                Claim::Rule(rule) => self.rule_claim(&mut builder, rule)?,
            }
            builder.finish_group();
        }
        Ok(builder.build())
    }

    fn resolve(&self, declared: &str) -> PathBuf {
        resolve(&self.root, Path::new(declared))
    }

    fn require_exists(&self, declared: &str) -> PackResult<PathBuf> {
        let resolved = self.resolve(declared);
        if resolved.exists() {
            Ok(resolved)
        } else {
            Err(PackError::ClaimPathNotFound {
                path: declared.to_string(),
                cwd: self.root.clone(),
            })
        }
    }

    /// A bare path: opportunistic installs for the runtime, then the path itself
    fn path_claim(&self, builder: &mut PlanBuilder, path: &str) -> PackResult<()> {
        let resolved = self.require_exists(path)?;
        let runtime = self.options.runtime.as_str();

        if Ecosystem::Pip.supports_runtime(runtime) {
            let pip = self.manifest(path, Ecosystem::Pip, runtime, None, None, false);
            self.install_step(builder, Ecosystem::Pip, pip, &[])?;

            let pyproject = joined(path, "pyproject.toml");
            match detect_build_system(&self.resolve(&pyproject)) {
                Some(BuildSystem::Poetry) => {
                    let spec = self.manifest(path, Ecosystem::Poetry, runtime, None, None, false);
                    self.install_step(builder, Ecosystem::Poetry, spec, &[])?;
                }
                Some(BuildSystem::Uv) => {
                    let spec = self.manifest(path, Ecosystem::Uv, runtime, None, None, false);
                    self.install_step(builder, Ecosystem::Uv, spec, &[])?;
                }
                None => {}
            }
        } else if Ecosystem::Npm.supports_runtime(runtime) {
            let npm = self.manifest(path, Ecosystem::Npm, runtime, None, None, false);
            self.install_step(builder, Ecosystem::Npm, npm, &[])?;
        }

        builder.add_step(BuildStep::Zip {
            source_path: Some(declared_path(path)),
            prefix: None,
        });
        builder.add_hash_path(HashInput::path(resolved));
        Ok(())
    }

    fn rule_claim(&self, builder: &mut PlanBuilder, rule: &RuleClaim) -> PackResult<()> {
        let patterns = rule
            .patterns
            .as_ref()
            .map(|p| pattern_lines(p.lines(), self.options.pattern_comments))
            .filter(|p| !p.is_empty());
        if let Some(patterns) = &patterns {
            builder.add_step(BuildStep::SetFilter {
                patterns: patterns.clone(),
            });
        }

        if let Some(commands) = rule.commands.as_ref().filter(|c| !c.is_empty()) {
            let shortcuts = rule.shortcut_fields();
            if !shortcuts.is_empty() {
                return Err(PackError::ConflictingClaim(format!(
                    "`commands` cannot be combined with {}",
                    shortcuts.join(", ")
                )));
            }
            return commands_steps(builder, rule.path.as_deref(), commands);
        }

        let path = rule.path.as_deref().filter(|p| !p.is_empty());
        let resolved = path.map(|p| self.require_exists(p)).transpose()?;
        let prefix = rule.prefix_in_zip.as_deref().filter(|p| !p.is_empty());
        let runtime = rule.runtime.as_deref().unwrap_or(&self.options.runtime);

        if let Some(pip) = rule.pip_requirements.as_ref().filter(|p| p.is_enabled()) {
            if Ecosystem::Pip.supports_runtime(runtime) {
                let source = self.flag_or_path_source(pip, path, "pip_requirements")?;
                let spec = self.manifest(
                    &source,
                    Ecosystem::Pip,
                    runtime,
                    prefix,
                    rule.pip_tmp_dir.as_deref(),
                    true,
                );
                self.install_step(builder, Ecosystem::Pip, spec, &[])?;
            }
        }

        if rule.poetry_install && Ecosystem::Poetry.supports_runtime(runtime) {
            if let Some(path) = path {
                let spec = self.manifest(
                    path,
                    Ecosystem::Poetry,
                    runtime,
                    prefix,
                    rule.poetry_tmp_dir.as_deref(),
                    true,
                );
                self.install_step(
                    builder,
                    Ecosystem::Poetry,
                    spec,
                    &rule.poetry_export_extra_args,
                )?;
            }
        }

        if rule.uv_install && Ecosystem::Uv.supports_runtime(runtime) {
            if let Some(path) = path {
                let spec = self.manifest(
                    path,
                    Ecosystem::Uv,
                    runtime,
                    prefix,
                    rule.uv_tmp_dir.as_deref(),
                    true,
                );
                self.install_step(builder, Ecosystem::Uv, spec, &[])?;
            }
        }

        if let Some(npm) = rule.npm_requirements.as_ref().filter(|p| p.is_enabled()) {
            if Ecosystem::Npm.supports_runtime(runtime) {
                let source = self.flag_or_path_source(npm, path, "npm_requirements")?;
                let spec = self.manifest(
                    &source,
                    Ecosystem::Npm,
                    runtime,
                    prefix,
                    rule.npm_tmp_dir.as_deref(),
                    true,
                );
                self.install_step(builder, Ecosystem::Npm, spec, &[])?;
            }
        }

        if let (Some(path), Some(resolved)) = (path, resolved) {
            builder.add_step(BuildStep::Zip {
                source_path: Some(declared_path(path)),
                prefix: prefix.map(str::to_string),
            });
            match &patterns {
                Some(patterns) => {
                    filtered_hash_inputs(builder, &resolved, prefix, patterns)?
                }
                None => builder.add_hash_path(HashInput::path(resolved)),
            }
        }
        Ok(())
    }

    /// `true` means the claim path; a string names the manifest or its directory
    fn flag_or_path_source(
        &self,
        value: &FlagOrPath,
        path: Option<&str>,
        field: &str,
    ) -> PackResult<String> {
        match value {
            FlagOrPath::Path(p) => Ok(p.clone()),
            FlagOrPath::Flag(_) => path.map(str::to_string).ok_or_else(|| {
                PackError::Request(format!("`{}: true` requires `path`", field))
            }),
        }
    }

    /// Locate the manifest of `ecosystem` for a declared file or directory
    fn manifest<'a>(
        &self,
        source: &str,
        ecosystem: Ecosystem,
        runtime: &'a str,
        prefix: Option<&'a str>,
        tmp_dir: Option<&'a str>,
        required: bool,
    ) -> ManifestSpec<'a> {
        let declared = if self.resolve(source).is_dir() {
            joined(source, ecosystem.manifest_name())
        } else {
            declared_path(source)
        };
        ManifestSpec {
            declared,
            runtime,
            prefix,
            tmp_dir,
            required,
        }
    }

    fn install_step(
        &self,
        builder: &mut PlanBuilder,
        ecosystem: Ecosystem,
        spec: ManifestSpec<'_>,
        export_args: &[String],
    ) -> PackResult<()> {
        let manifest = self.resolve(&spec.declared);
        let manifest_dir = manifest.parent().map(Path::to_path_buf).unwrap_or_default();

        // npm lock files feed the key even when package.json is optional and absent
        if ecosystem == Ecosystem::Npm {
            let lock = manifest_dir.join("package-lock.json");
            if lock.is_file() {
                info!("Added npm lock file: {}", lock.display());
                builder.add_hash_path(HashInput::path(lock));
            }
        }

        let present = match ecosystem {
            Ecosystem::Poetry => detect_build_system(&manifest) == Some(BuildSystem::Poetry),
            Ecosystem::Uv => detect_build_system(&manifest) == Some(BuildSystem::Uv),
            Ecosystem::Pip | Ecosystem::Npm => manifest.is_file(),
        };
        if !present {
            if !spec.required {
                return Ok(());
            }
            return Err(match ecosystem {
                Ecosystem::Poetry | Ecosystem::Uv if manifest.is_file() => PackError::Request(
                    format!("{} configuration not found: {}", ecosystem, manifest.display()),
                ),
                _ => PackError::ManifestNotFound(manifest),
            });
        }

        if !self.options.use_container {
            let tool = match ecosystem {
                Ecosystem::Pip => spec.runtime,
                Ecosystem::Poetry => "poetry",
                Ecosystem::Uv => "uv",
                Ecosystem::Npm => "npm",
            };
            if which::which(tool).is_err() {
                let request = InstallRequest {
                    runtime: spec.runtime,
                    manifest: &manifest,
                    tmp_dir: None,
                    export_args,
                };
                return Err(installer_for(ecosystem).missing_tool(&request));
            }
        }

        builder.add_step(BuildStep::Install {
            ecosystem,
            runtime: spec.runtime.to_string(),
            manifest: spec.declared,
            prefix: spec.prefix.map(str::to_string),
            tmp_dir: spec.tmp_dir.map(str::to_string),
            export_args: export_args.to_vec(),
        });

        builder.add_hash_path(HashInput::path(&manifest));
        let companions: &[&str] = match ecosystem {
            Ecosystem::Poetry => &["poetry.lock", "poetry.toml"],
            Ecosystem::Uv => &["uv.lock"],
            Ecosystem::Pip | Ecosystem::Npm => &[],
        };
        for companion in companions {
            let file = manifest_dir.join(companion);
            if file.is_file() {
                builder.add_hash_path(HashInput::path(file));
            }
        }
        Ok(())
    }
}

/// Shell batches and `:zip` directives of a command claim.
///
/// Output of the commands is never hashed by content; the script text
/// reaches the cache key through the serialized plan.
fn commands_steps(builder: &mut PlanBuilder, path: Option<&str>, commands: &Lines) -> PackResult<()> {
    if let Some(path) = path.filter(|p| !p.is_empty()) {
        builder.add_step(BuildStep::SetWorkdir {
            path: declared_path(path),
        });
    }

    let mut batch: Vec<&str> = Vec::new();
    for line in commands.lines() {
        if line.split_whitespace().next() != Some(":zip") {
            batch.push(line);
            continue;
        }

        if !batch.is_empty() {
            builder.add_step(BuildStep::Shell {
                script: batch.join("\n"),
            });
            batch.clear();
        }

        let words = shell_words::split(line)
            .map_err(|_| PackError::InvalidZipDirective(line.to_string()))?;
        let step = match words.as_slice() {
            [_] => BuildStep::ZipEmbedded {
                source_path: None,
                prefix: None,
            },
            [_, path] => BuildStep::ZipEmbedded {
                source_path: Some(declared_path(path)),
                prefix: None,
            },
            [_, path, prefix] => BuildStep::ZipEmbedded {
                source_path: Some(declared_path(path)),
                prefix: Some(prefix.trim().to_string()).filter(|p| !p.is_empty()),
            },
            _ => return Err(PackError::InvalidZipDirective(line.to_string())),
        };
        builder.add_step(step);
    }

    if !batch.is_empty() {
        builder.add_step(BuildStep::Shell {
            script: batch.join("\n"),
        });
    }
    Ok(())
}

/// Hash only the files a pattern filter keeps, named relative to the claim
fn filtered_hash_inputs(
    builder: &mut PlanBuilder,
    root: &Path,
    prefix: Option<&str>,
    patterns: &[String],
) -> PackResult<()> {
    let filter = PatternFilter::compile(patterns)?;
    let base = if root.is_dir() {
        root.to_path_buf()
    } else {
        root.parent().map(Path::to_path_buf).unwrap_or_default()
    };
    for path in filter.filter(root, prefix) {
        let path = path?;
        if path.is_dir() {
            continue;
        }
        builder.add_hash_path(HashInput::within(&base, path));
    }
    Ok(())
}

fn declared_path(path: &str) -> String {
    to_slash(&normalize(Path::new(path)))
}

fn joined(dir: &str, name: &str) -> String {
    to_slash(&normalize(&Path::new(dir).join(name)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::content_hash;
    use std::fs;
    use tempfile::TempDir;

    fn options(runtime: &str) -> CompileOptions {
        CompileOptions {
            runtime: runtime.to_string(),
            use_container: true,
            pattern_comments: false,
        }
    }

    fn claims(json: &str) -> Vec<Claim> {
        serde_json::from_str(json).unwrap()
    }

    fn python_app() -> TempDir {
        let root = TempDir::new().unwrap();
        fs::create_dir_all(root.path().join("app")).unwrap();
        fs::write(root.path().join("app/handler.py"), b"def handler(e, c): pass\n").unwrap();
        fs::write(root.path().join("app/requirements.txt"), b"requests==2.31.0\n").unwrap();
        root
    }

    #[test]
    fn plain_python_claim_installs_then_zips() {
        let root = python_app();
        let compiled = Compiler::new(root.path(), options("python3.12"))
            .compile(&claims(r#"["app/"]"#))
            .unwrap();

        assert_eq!(
            compiled.plan.groups,
            vec![vec![
                BuildStep::Install {
                    ecosystem: Ecosystem::Pip,
                    runtime: "python3.12".into(),
                    manifest: "app/requirements.txt".into(),
                    prefix: None,
                    tmp_dir: None,
                    export_args: vec![],
                },
                BuildStep::Zip {
                    source_path: Some("app".into()),
                    prefix: None,
                },
            ]]
        );
        assert_eq!(
            compiled.hash_inputs,
            vec![
                HashInput::path(root.path().join("app/requirements.txt")),
                HashInput::path(root.path().join("app")),
            ]
        );
    }

    #[test]
    fn non_matching_runtime_skips_installs() {
        let root = python_app();
        let compiled = Compiler::new(root.path(), options("provided.al2"))
            .compile(&claims(r#"["app"]"#))
            .unwrap();
        assert_eq!(compiled.plan.steps().count(), 1);
    }

    #[test]
    fn missing_claim_path_aborts() {
        let root = TempDir::new().unwrap();
        let err = Compiler::new(root.path(), options("python3.12"))
            .compile(&claims(r#"["nope"]"#))
            .unwrap_err();
        assert!(matches!(err, PackError::ClaimPathNotFound { .. }));
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn poetry_detected_for_plain_claim() {
        let root = python_app();
        fs::write(
            root.path().join("app/pyproject.toml"),
            "[build-system]\nbuild-backend = \"poetry.core.masonry.api\"\n",
        )
        .unwrap();
        fs::write(root.path().join("app/poetry.lock"), "").unwrap();

        let compiled = Compiler::new(root.path(), options("python3.12"))
            .compile(&claims(r#"["app"]"#))
            .unwrap();
        let ecosystems: Vec<Ecosystem> = compiled
            .plan
            .steps()
            .filter_map(|s| match s {
                BuildStep::Install { ecosystem, .. } => Some(*ecosystem),
                _ => None,
            })
            .collect();
        assert_eq!(ecosystems, vec![Ecosystem::Pip, Ecosystem::Poetry]);
        assert!(compiled
            .hash_inputs
            .contains(&HashInput::path(root.path().join("app/poetry.lock"))));
    }

    #[test]
    fn required_manifest_must_exist() {
        let root = TempDir::new().unwrap();
        fs::create_dir_all(root.path().join("src")).unwrap();
        let err = Compiler::new(root.path(), options("python3.12"))
            .compile(&claims(r#"[{"path": "src", "pip_requirements": true}]"#))
            .unwrap_err();
        assert!(matches!(err, PackError::ManifestNotFound(_)));

        let err = Compiler::new(root.path(), options("nodejs20.x"))
            .compile(&claims(r#"[{"path": "src", "npm_requirements": true}]"#))
            .unwrap_err();
        assert!(matches!(err, PackError::ManifestNotFound(_)));
    }

    #[test]
    fn rule_claim_with_prefix_and_explicit_manifest() {
        let root = python_app();
        fs::write(root.path().join("deps.txt"), "boto3\n").unwrap();
        let compiled = Compiler::new(root.path(), options("python3.12"))
            .compile(&claims(
                r#"[{"path": "app", "pip_requirements": "deps.txt", "prefix_in_zip": "vendor", "pip_tmp_dir": "/tmp/pip"}]"#,
            ))
            .unwrap();
        assert_eq!(
            compiled.plan.groups[0],
            vec![
                BuildStep::Install {
                    ecosystem: Ecosystem::Pip,
                    runtime: "python3.12".into(),
                    manifest: "deps.txt".into(),
                    prefix: Some("vendor".into()),
                    tmp_dir: Some("/tmp/pip".into()),
                    export_args: vec![],
                },
                BuildStep::Zip {
                    source_path: Some("app".into()),
                    prefix: Some("vendor".into()),
                },
            ]
        );
    }

    #[test]
    fn command_batches_and_zip_directives() {
        let root = TempDir::new().unwrap();
        let compiled = Compiler::new(root.path(), options("nodejs20.x"))
            .compile(&claims(
                r#"[{"path": "web", "commands": ["npm ci", "npm run build", ":zip dist 'static files'", "cd ..", ":zip"]}]"#,
            ))
            .unwrap();

        assert_eq!(
            compiled.plan.groups[0],
            vec![
                BuildStep::SetWorkdir { path: "web".into() },
                BuildStep::Shell {
                    script: "npm ci\nnpm run build".into()
                },
                BuildStep::ZipEmbedded {
                    source_path: Some("dist".into()),
                    prefix: Some("static files".into()),
                },
                BuildStep::Shell {
                    script: "cd ..".into()
                },
                BuildStep::ZipEmbedded {
                    source_path: None,
                    prefix: None,
                },
            ]
        );
        assert!(compiled.hash_inputs.is_empty());
    }

    #[test]
    fn invalid_zip_directive_aborts() {
        let root = TempDir::new().unwrap();
        let err = Compiler::new(root.path(), options("python3.12"))
            .compile(&claims(r#"[{"commands": ":zip a b c"}]"#))
            .unwrap_err();
        assert!(matches!(err, PackError::InvalidZipDirective(_)));
    }

    #[test]
    fn commands_conflict_with_shortcuts() {
        let root = TempDir::new().unwrap();
        let err = Compiler::new(root.path(), options("python3.12"))
            .compile(&claims(
                r#"[{"path": "x", "commands": "make", "pip_requirements": true}]"#,
            ))
            .unwrap_err();
        assert!(matches!(err, PackError::ConflictingClaim(_)));
    }

    #[test]
    fn excluded_files_do_not_affect_hash() {
        let root = TempDir::new().unwrap();
        let src = root.path().join("src");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("main.py"), "print(1)\n").unwrap();

        let compiler = Compiler::new(root.path(), options("provided.al2"));
        let request = claims(r#"[{"path": "src", "patterns": ["!.*", ".*\\.py$"]}]"#);
        let key = || {
            let compiled = compiler.compile(&request).unwrap();
            content_hash(&compiled.hash_inputs, &[]).unwrap()
        };

        let before = key();
        fs::write(src.join("main.pyc"), b"\x00\x01").unwrap();
        assert_eq!(before, key());

        fs::write(src.join("util.py"), "X = 1\n").unwrap();
        assert_ne!(before, key());
    }

    #[test]
    fn one_group_per_claim() {
        let root = python_app();
        fs::write(root.path().join("extra.txt"), "x").unwrap();
        let compiled = Compiler::new(root.path(), options("provided.al2"))
            .compile(&claims(
                r#"["app", {"path": "extra.txt", "patterns": "extra\\.txt"}]"#,
            ))
            .unwrap();
        assert_eq!(compiled.plan.groups.len(), 2);
        assert!(matches!(
            compiled.plan.groups[1][0],
            BuildStep::SetFilter { .. }
        ));
        assert_eq!(
            compiled.hash_inputs[1],
            HashInput::within(root.path(), root.path().join("extra.txt"))
        );
    }
}
