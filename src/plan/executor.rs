//! Build plan execution
//!
//! Steps run strictly in order against one open [`ZipWriteStream`]. Every
//! step group starts over from the invocation root with no active filter, so
//! a claim's shell side effects never leak into the next claim.

use super::types::{BuildPlan, BuildStep};
use crate::archive::{Timestamp, ZipWriteStream};
use crate::error::{PackError, PackResult};
use crate::filter::PatternFilter;
use crate::install::{install, installer_for, owner_mask, InstallRequest};
use crate::orchestration::BuildContainer;
use crate::paths::{resolve, to_slash};
use crate::process;
use std::fs;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, trace, warn};

/// Mount point of the working-directory probe inside build containers
const CONTAINER_PROBE_DIR: &str = "/tmp/lambda-pack-probe";

const PROBE_FILE: &str = "pwd";

/// Mutable state of one step group
struct GroupState {
    workdir: PathBuf,
    filter: Option<PatternFilter>,
}

/// Interprets a [`BuildPlan`] relative to an invocation root
pub struct Executor<'a> {
    root: PathBuf,
    runtime: String,
    shell: String,
    container: Option<&'a BuildContainer>,
}

impl<'a> Executor<'a> {
    pub fn new(root: impl Into<PathBuf>, runtime: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            runtime: runtime.into(),
            shell: "/bin/sh".to_string(),
            container: None,
        }
    }

    /// Shell used for host shell steps
    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    /// Run shell and install steps inside `container`
    pub fn with_container(mut self, container: Option<&'a BuildContainer>) -> Self {
        self.container = container;
        self
    }

    /// Execute every step of `plan`, writing into the open stream `zip`
    pub async fn execute(&self, plan: &BuildPlan, zip: &mut ZipWriteStream) -> PackResult<()> {
        for group in &plan.groups {
            let mut state = GroupState {
                workdir: self.root.clone(),
                filter: None,
            };
            debug!("STEPDIR: {}", state.workdir.display());

            for step in group {
                self.execute_step(step, &mut state, zip).await?;
            }
        }
        Ok(())
    }

    async fn execute_step(
        &self,
        step: &BuildStep,
        state: &mut GroupState,
        zip: &mut ZipWriteStream,
    ) -> PackResult<()> {
        match step {
            BuildStep::SetWorkdir { path } => {
                state.workdir = resolve(&self.root, Path::new(path));
                debug!("WORKDIR: {}", state.workdir.display());
            }
            BuildStep::SetFilter { patterns } => {
                state.filter = Some(PatternFilter::compile(patterns)?);
            }
            BuildStep::Shell { script } => {
                state.workdir = match self.container {
                    Some(container) => {
                        self.run_shell_in_container(container, script, &state.workdir)
                            .await?
                    }
                    None => self.run_shell(script, &state.workdir).await?,
                };
                debug!("WORKDIR: {}", state.workdir.display());
            }
            BuildStep::Zip {
                source_path,
                prefix,
            } => {
                let source = self.source(source_path.as_deref(), &state.workdir);
                write_source(zip, state.filter.as_ref(), &source, prefix.as_deref(), None)?;
            }
            BuildStep::ZipEmbedded {
                source_path,
                prefix,
            } => {
                let source = self.source(source_path.as_deref(), &state.workdir);
                let generated = Timestamp::GENERATED;
                write_source(
                    zip,
                    state.filter.as_ref(),
                    &source,
                    prefix.as_deref(),
                    Some(&generated),
                )?;
            }
            BuildStep::Install {
                ecosystem,
                runtime,
                manifest,
                prefix,
                tmp_dir,
                export_args,
            } => {
                let manifest = resolve(&self.root, Path::new(manifest));
                let tmp_dir = tmp_dir.as_deref().map(|d| resolve(&self.root, Path::new(d)));
                let request = InstallRequest {
                    runtime,
                    manifest: &manifest,
                    tmp_dir: tmp_dir.as_deref(),
                    export_args,
                };
                let installed = install(installer_for(*ecosystem), &request, self.container).await?;
                if let Some(dir) = installed {
                    let generated = Timestamp::GENERATED;
                    write_source(
                        zip,
                        state.filter.as_ref(),
                        dir.path(),
                        prefix.as_deref(),
                        Some(&generated),
                    )?;
                }
            }
        }
        Ok(())
    }

    fn source(&self, source_path: Option<&str>, workdir: &Path) -> PathBuf {
        match source_path {
            Some(path) => resolve(workdir, Path::new(path)),
            None => workdir.to_path_buf(),
        }
    }

    /// Run `script` on the host and return the directory it finished in
    async fn run_shell(&self, script: &str, workdir: &Path) -> PackResult<PathBuf> {
        log_script(script);
        let probe = probe_dir()?;
        let probe_file = probe.path().join(PROBE_FILE);

        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c")
            .arg(with_probe(script, &to_slash(&probe_file), None))
            .current_dir(workdir);
        process::run(cmd).await?;

        Ok(read_probe(&probe_file)
            .map(PathBuf::from)
            .unwrap_or_else(|| workdir.to_path_buf()))
    }

    /// Run `script` in the build container with `workdir` mounted as the
    /// container's working directory
    async fn run_shell_in_container(
        &self,
        container: &BuildContainer,
        script: &str,
        workdir: &Path,
    ) -> PackResult<PathBuf> {
        log_script(script);
        let probe = probe_dir()?;
        let container_workdir = container.workdir().to_string();
        let probe_target = format!("{}/{}", CONTAINER_PROBE_DIR, PROBE_FILE);
        let owner = owner_mask();
        let command = with_probe(
            script,
            &probe_target,
            Some((owner.as_str(), container_workdir.as_str())),
        );

        let mut spec = container
            .spec(&self.runtime, workdir, command, None)
            .await?;
        spec.volumes
            .push((probe.path().to_path_buf(), CONTAINER_PROBE_DIR.to_string()));
        container.run(&spec).await?;

        let Some(finished) = read_probe(&probe.path().join(PROBE_FILE)) else {
            return Ok(workdir.to_path_buf());
        };
        match Path::new(&finished).strip_prefix(&container_workdir) {
            Ok(relative) => Ok(workdir.join(relative)),
            Err(_) => {
                warn!(
                    "script finished in {} outside of {}, keeping {}",
                    finished,
                    container_workdir,
                    workdir.display()
                );
                Ok(workdir.to_path_buf())
            }
        }
    }
}

/// Append the working-directory probe, preserving the script's exit status
fn with_probe(script: &str, probe_file: &str, chown: Option<(&str, &str)>) -> String {
    let mut lines = vec![
        script.to_string(),
        "retcode=$?".to_string(),
        format!("pwd > {}", shell_words::quote(probe_file)),
    ];
    if let Some((owner, dir)) = chown {
        lines.push(format!(
            "chown -R {} {} 2>/dev/null",
            shell_words::quote(owner),
            shell_words::quote(dir)
        ));
    }
    lines.push("exit $retcode".to_string());
    lines.join("\n")
}

fn probe_dir() -> PackResult<tempfile::TempDir> {
    tempfile::Builder::new()
        .prefix("lambda-pack-")
        .tempdir()
        .map_err(|e| PackError::io("creating working directory probe", e))
}

fn read_probe(file: &Path) -> Option<String> {
    fs::read_to_string(file)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn log_script(script: &str) {
    debug!("exec shell script ...");
    for line in script.lines() {
        trace!("sh: {}", line);
    }
}

/// Write a file or the contents of a directory, through the filter if active
fn write_source(
    zip: &mut ZipWriteStream,
    filter: Option<&PatternFilter>,
    source: &Path,
    prefix: Option<&str>,
    timestamp: Option<&Timestamp>,
) -> PackResult<()> {
    let Some(filter) = filter else {
        return if source.is_dir() {
            zip.write_dirs(&[source], prefix, timestamp)
        } else {
            zip.write_file(source, prefix, None, timestamp)
        };
    };

    let is_dir = source.is_dir();
    for path in filter.filter(source, prefix) {
        let path = path?;
        let name = if is_dir {
            path.strip_prefix(source).map(to_slash).map_err(|_| {
                PackError::Internal(format!("{} escaped {}", path.display(), source.display()))
            })?
        } else {
            path.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        };
        zip.write_file(&path, prefix, Some(&name), timestamp)?;
    }
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::TempDir;
    use zip::ZipArchive;

    fn entries(path: &Path) -> Vec<String> {
        let mut archive = ZipArchive::new(File::open(path).unwrap()).unwrap();
        (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect()
    }

    async fn build(root: &Path, plan: &BuildPlan) -> PackResult<PathBuf> {
        let target = root.join("builds/out.zip");
        let mut zip = ZipWriteStream::new(&target)?;
        zip.open()?;
        let result = Executor::new(root, "provided.al2").execute(plan, &mut zip).await;
        zip.close(result.is_err())?;
        result.map(|_| target)
    }

    #[tokio::test]
    async fn shell_output_and_working_directory() {
        let root = TempDir::new().unwrap();
        fs::create_dir_all(root.path().join("web")).unwrap();
        fs::write(root.path().join("top.txt"), "top").unwrap();

        let plan = BuildPlan {
            groups: vec![
                vec![
                    BuildStep::SetWorkdir { path: "web".into() },
                    BuildStep::Shell {
                        script: "mkdir -p dist\necho built > dist/index.html\ncd dist".into(),
                    },
                    BuildStep::ZipEmbedded {
                        source_path: None,
                        prefix: Some("static".into()),
                    },
                ],
                vec![BuildStep::Zip {
                    source_path: Some("top.txt".into()),
                    prefix: None,
                }],
            ],
        };

        let target = build(root.path(), &plan).await.unwrap();
        assert_eq!(entries(&target), vec!["static/index.html", "top.txt"]);

        let mut archive = ZipArchive::new(File::open(&target).unwrap()).unwrap();
        let embedded = archive.by_name("static/index.html").unwrap();
        let modified = embedded.last_modified().unwrap();
        assert_eq!((modified.year(), modified.month(), modified.day()), (1980, 1, 1));
    }

    #[tokio::test]
    async fn filter_resets_between_groups() {
        let root = TempDir::new().unwrap();
        for dir in ["a", "b"] {
            fs::create_dir_all(root.path().join(dir)).unwrap();
            fs::write(root.path().join(dir).join("keep.py"), "").unwrap();
            fs::write(root.path().join(dir).join("drop.txt"), "").unwrap();
        }

        let plan = BuildPlan {
            groups: vec![
                vec![
                    BuildStep::SetFilter {
                        patterns: vec!["!.*".into(), r".*\.py".into()],
                    },
                    BuildStep::Zip {
                        source_path: Some("a".into()),
                        prefix: Some("a".into()),
                    },
                ],
                vec![BuildStep::Zip {
                    source_path: Some("b".into()),
                    prefix: Some("b".into()),
                }],
            ],
        };

        let target = build(root.path(), &plan).await.unwrap();
        assert_eq!(
            entries(&target),
            vec!["a/keep.py", "b/drop.txt", "b/keep.py"]
        );
    }

    #[tokio::test]
    async fn failing_script_discards_archive() {
        let root = TempDir::new().unwrap();
        let plan = BuildPlan {
            groups: vec![vec![BuildStep::Shell {
                script: "echo broken >&2\nexit 3".into(),
            }]],
        };

        let err = build(root.path(), &plan).await.unwrap_err();
        match err {
            PackError::CommandFailed { code, stderr, .. } => {
                assert_eq!(code, 3);
                assert!(stderr.contains("broken"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!root.path().join("builds/out.zip").exists());
        assert!(!root.path().join("builds/out.zip.tmp").exists());
    }

    #[test]
    fn probe_keeps_exit_status() {
        let script = with_probe("false", "/tmp/probe/pwd", Some(("1000:1000", "/var/task")));
        let lines: Vec<&str> = script.lines().collect();
        assert_eq!(
            lines,
            vec![
                "false",
                "retcode=$?",
                "pwd > /tmp/probe/pwd",
                "chown -R 1000:1000 /var/task 2>/dev/null",
                "exit $retcode",
            ]
        );
    }
}
