//! Build plan data model
//!
//! A plan is pure data: it is serialized by `prepare`, hashed into the cache
//! key and deserialized again by `build`. Paths are stored as declared
//! (relative to the invocation root) so plans are portable between machines.

use crate::install::Ecosystem;
use serde::{Deserialize, Serialize};

/// One typed build action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum BuildStep {
    /// Archive a source file or directory with its filesystem timestamps
    Zip {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source_path: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prefix: Option<String>,
    },
    /// Archive command output; entries get the generated-content timestamp
    ZipEmbedded {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source_path: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prefix: Option<String>,
    },
    /// Install dependencies from a manifest and archive the result
    Install {
        ecosystem: Ecosystem,
        runtime: String,
        manifest: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prefix: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tmp_dir: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        export_args: Vec<String>,
    },
    /// Run a shell script in the current working directory
    Shell { script: String },
    /// Rebase the working directory onto the invocation root
    SetWorkdir { path: String },
    /// Activate a pattern filter for the rest of the group
    SetFilter { patterns: Vec<String> },
}

/// Ordered step groups, one per claim
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BuildPlan {
    pub groups: Vec<Vec<BuildStep>>,
}

impl BuildPlan {
    pub fn is_empty(&self) -> bool {
        self.groups.iter().all(Vec::is_empty)
    }

    /// All steps in execution order
    pub fn steps(&self) -> impl Iterator<Item = &BuildStep> {
        self.groups.iter().flatten()
    }

    /// Canonical serialized form, fed into the cache key
    pub fn to_canonical_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_json_shape() {
        let plan = BuildPlan {
            groups: vec![vec![
                BuildStep::SetFilter {
                    patterns: vec!["!.*".into()],
                },
                BuildStep::Zip {
                    source_path: Some("src".into()),
                    prefix: None,
                },
            ]],
        };
        let json = String::from_utf8(plan.to_canonical_json().unwrap()).unwrap();
        assert_eq!(
            json,
            r#"[[{"action":"set_filter","patterns":["!.*"]},{"action":"zip","source_path":"src"}]]"#
        );
    }

    #[test]
    fn install_step_parses() {
        let step: BuildStep = serde_json::from_str(
            r#"{"action":"install","ecosystem":"pip","runtime":"python3.12","manifest":"app/requirements.txt"}"#,
        )
        .unwrap();
        assert_eq!(
            step,
            BuildStep::Install {
                ecosystem: Ecosystem::Pip,
                runtime: "python3.12".into(),
                manifest: "app/requirements.txt".into(),
                prefix: None,
                tmp_dir: None,
                export_args: vec![],
            }
        );
    }
}
