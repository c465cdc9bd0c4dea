//! Typed request model
//!
//! The calling tool sends a flat JSON object whose values are frequently
//! JSON documents encoded as strings (lists of claims, docker options).
//! Those are decoded first, then the object is deserialized into explicit
//! structures. Keys outside the schema land in an `ignored` map and are
//! logged, never consulted.

use crate::error::{PackError, PackResult};
use crate::plan::BuildPlan;
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, trace};

/// Parse a yes/no style boolean
///
/// Accepts `true/false/yes/no/y/n` in any case and decimal integers.
pub fn parse_yes_no(value: &str) -> PackResult<bool> {
    let trimmed = value.trim();
    if !trimmed.is_empty() && trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return Ok(trimmed.bytes().any(|b| b != b'0'));
    }
    match trimmed.to_ascii_lowercase().as_str() {
        "true" | "yes" | "y" => Ok(true),
        "false" | "no" | "n" => Ok(false),
        _ => Err(PackError::InvalidBool(value.to_string())),
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BoolLike {
    Bool(bool),
    Int(i64),
    Text(String),
}

impl BoolLike {
    fn into_bool(self) -> PackResult<bool> {
        match self {
            Self::Bool(b) => Ok(b),
            Self::Int(i) => Ok(i != 0),
            Self::Text(s) => parse_yes_no(&s),
        }
    }
}

fn yes_no<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    Ok(opt_yes_no(deserializer)?.unwrap_or(false))
}

fn opt_yes_no<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<bool>, D::Error> {
    Option::<BoolLike>::deserialize(deserializer)?
        .map(BoolLike::into_bool)
        .transpose()
        .map_err(de::Error::custom)
}

/// A boolean switch or an explicit path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FlagOrPath {
    Flag(bool),
    Path(String),
}

impl FlagOrPath {
    /// Whether the option asks for anything at all
    pub fn is_enabled(&self) -> bool {
        match self {
            Self::Flag(b) => *b,
            Self::Path(p) => !p.is_empty(),
        }
    }
}

/// A list of lines or a single multi-line string
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Lines {
    Many(Vec<String>),
    Text(String),
}

impl Lines {
    /// Individual lines, trimmed, blank lines dropped
    pub fn lines(&self) -> Vec<&str> {
        let raw: Vec<&str> = match self {
            Self::Many(items) => items.iter().flat_map(|s| s.lines()).collect(),
            Self::Text(text) => text.lines().collect(),
        };
        raw.into_iter()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.lines().is_empty()
    }
}

/// One element of `source_path`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Claim {
    /// A file or directory packaged as is
    Path(String),
    /// A path with patterns, commands or dependency installation
    Rule(RuleClaim),
}

/// Rich source claim
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RuleClaim {
    pub path: Option<String>,
    pub patterns: Option<Lines>,
    pub commands: Option<Lines>,
    pub prefix_in_zip: Option<String>,
    /// Overrides the request runtime for this claim's installers
    pub runtime: Option<String>,

    pub pip_requirements: Option<FlagOrPath>,
    pub pip_tmp_dir: Option<String>,

    #[serde(deserialize_with = "yes_no")]
    pub poetry_install: bool,
    pub poetry_export_extra_args: Vec<String>,
    pub poetry_tmp_dir: Option<String>,

    #[serde(deserialize_with = "yes_no")]
    pub uv_install: bool,
    pub uv_tmp_dir: Option<String>,

    #[serde(alias = "npm_package_json")]
    pub npm_requirements: Option<FlagOrPath>,
    pub npm_tmp_dir: Option<String>,

    #[serde(flatten)]
    pub ignored: BTreeMap<String, Value>,
}

impl RuleClaim {
    /// Names of the install/zip shortcut fields that are set
    pub fn shortcut_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.pip_requirements.as_ref().is_some_and(FlagOrPath::is_enabled) {
            fields.push("pip_requirements");
        }
        if self.poetry_install {
            fields.push("poetry_install");
        }
        if self.uv_install {
            fields.push("uv_install");
        }
        if self.npm_requirements.as_ref().is_some_and(FlagOrPath::is_enabled) {
            fields.push("npm_requirements");
        }
        if self.prefix_in_zip.as_deref().is_some_and(|p| !p.is_empty()) {
            fields.push("prefix_in_zip");
        }
        fields
    }
}

/// Container build options
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docker_image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docker_file: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docker_build_root: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docker_entrypoint: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub docker_additional_options: Vec<String>,
    #[serde(deserialize_with = "yes_no", skip_serializing_if = "std::ops::Not::not")]
    pub with_ssh_agent: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docker_pip_cache: Option<FlagOrPath>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docker_poetry_cache: Option<FlagOrPath>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docker_uv_cache: Option<FlagOrPath>,
}

const DOCKER_KEYS: &[&str] = &[
    "docker_image",
    "docker_file",
    "docker_build_root",
    "docker_entrypoint",
    "docker_additional_options",
    "with_ssh_agent",
    "docker_pip_cache",
    "docker_poetry_cache",
    "docker_uv_cache",
];

/// `docker` is `false`/absent (host build), `true` or a possibly empty
/// options map (container build). Empty and false-valued options are dropped.
fn docker_spec<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<DockerOptions>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    match value {
        Value::Null => Ok(None),
        Value::Bool(enabled) => Ok(enabled.then(DockerOptions::default)),
        Value::Number(n) => Ok((n.as_i64() != Some(0)).then(DockerOptions::default)),
        Value::String(s) if s.trim().is_empty() => Ok(None),
        Value::String(s) => parse_yes_no(&s)
            .map(|enabled| enabled.then(DockerOptions::default))
            .map_err(de::Error::custom),
        Value::Object(map) => {
            let cleaned: Map<String, Value> = map
                .into_iter()
                .filter(|(key, value)| {
                    if !DOCKER_KEYS.contains(&key.as_str()) {
                        debug!("ignoring unknown docker option: {}", key);
                        return false;
                    }
                    !is_empty_value(value)
                })
                .collect();
            DockerOptions::deserialize(Value::Object(cleaned))
                .map(Some)
                .map_err(de::Error::custom)
        }
        Value::Array(_) => Err(de::Error::custom("docker must be a boolean or a map")),
    }
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null | Value::Bool(false) => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        Value::Number(_) | Value::Bool(true) => false,
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

fn claims<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Claim>, D::Error> {
    Ok(match OneOrMany::<Claim>::deserialize(deserializer)? {
        OneOrMany::Many(claims) => claims,
        OneOrMany::One(claim) => vec![claim],
    })
}

/// Module/root/cwd paths used to expand `{path.*}` placeholders
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PathVars {
    pub module: Option<String>,
    pub root: Option<String>,
    pub cwd: Option<String>,
}

impl PathVars {
    /// Replace `{path.module}`, `{path.root}` and `{path.cwd}` in `value`
    pub fn expand(&self, value: &str) -> String {
        let mut out = value.to_string();
        for (name, replacement) in [
            ("module", &self.module),
            ("root", &self.root),
            ("cwd", &self.cwd),
        ] {
            if let Some(replacement) = replacement {
                out = out.replace(&format!("{{path.{}}}", name), replacement);
            }
        }
        out
    }
}

fn default_artifacts_dir() -> PathBuf {
    PathBuf::from("builds")
}

/// Input of the `prepare` command
#[derive(Debug, Clone, Deserialize)]
pub struct PrepareRequest {
    pub runtime: String,
    #[serde(deserialize_with = "claims")]
    pub source_path: Vec<Claim>,
    #[serde(default = "default_artifacts_dir")]
    pub artifacts_dir: PathBuf,
    #[serde(default)]
    pub hash_extra_paths: Vec<String>,
    #[serde(default)]
    pub hash_extra: String,
    #[serde(default, deserialize_with = "docker_spec")]
    pub docker: Option<DockerOptions>,
    #[serde(default, deserialize_with = "opt_yes_no")]
    pub recreate_missing_package: Option<bool>,
    #[serde(default)]
    pub paths: PathVars,
    #[serde(default)]
    pub function_name: Option<String>,

    #[serde(flatten)]
    pub ignored: BTreeMap<String, Value>,
}

impl PrepareRequest {
    /// Parse a request, decoding string-encoded JSON values first
    pub fn from_json(text: &str) -> PackResult<Self> {
        let value: Value = serde_json::from_str(text)?;
        let Value::Object(map) = value else {
            return Err(PackError::Request(
                "request must be a JSON object".to_string(),
            ));
        };
        let decoded = decode_nested(map);
        let query = Value::Object(decoded.clone());
        trace!("QUERY: {}", query);

        let request: Self = serde_json::from_value(Value::Object(decoded))
            .map_err(|e| PackError::Request(e.to_string()))?;
        for key in request.ignored.keys() {
            debug!("ignoring unknown request key: {}", key);
        }
        Ok(request)
    }

    /// `hash_extra_paths` with placeholders expanded
    pub fn expanded_hash_extra_paths(&self) -> Vec<String> {
        self.hash_extra_paths
            .iter()
            .map(|p| self.paths.expand(p))
            .collect()
    }
}

/// Decode string values that hold JSON documents, one level deep into maps
fn decode_nested(map: Map<String, Value>) -> Map<String, Value> {
    map.into_iter()
        .map(|(key, value)| {
            let value = match value {
                Value::Object(inner) => Value::Object(decode_nested(inner)),
                Value::String(s) => decode_json_string(s),
                other => other,
            };
            (key, value)
        })
        .collect()
}

fn decode_json_string(s: String) -> Value {
    if matches!(s.chars().next(), Some('"' | '[' | '{')) {
        if let Ok(decoded) = serde_json::from_str::<Value>(&s) {
            return decoded;
        }
    }
    Value::String(s)
}

/// Persisted plan file handed from `prepare` to `build`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildData {
    pub filename: PathBuf,
    pub runtime: String,
    pub artifacts_dir: PathBuf,
    pub build_plan: BuildPlan,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docker: Option<DockerOptions>,
}
