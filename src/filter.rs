//! Pattern-based content filter
//!
//! Each pattern is a regular expression matched against the whole candidate
//! path (`prefix/relative/path`, directories with a trailing `/`). A leading
//! `!` negates the rule. Every rule is evaluated and the last matching rule
//! decides; with no matching rule the path is kept.
//!
//! Directories and files are decided independently: an excluded directory
//! loses its own archive entry, but the files below it are still evaluated
//! one by one.

use crate::error::{PackError, PackResult};
use crate::paths::{archive_name, to_slash};
use regex::Regex;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::debug;
use walkdir::WalkDir;

/// Splits a pattern line from a trailing `  # comment`
static COMMENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.*?)[ \t]*(?:[ \t]{2}#.*)?$").expect("comment regex is valid")
});

/// A single compiled include/exclude rule
#[derive(Debug, Clone)]
pub struct FilterRule {
    /// `true` for `!pattern` rules
    pub negated: bool,
    regex: Regex,
}

impl FilterRule {
    fn matches(&self, candidate: &str) -> bool {
        self.regex.is_match(candidate)
    }
}

/// Ordered rule set deciding which paths enter an archive or a hash
#[derive(Debug, Clone, Default)]
pub struct PatternFilter {
    rules: Vec<FilterRule>,
}

impl PatternFilter {
    /// Compile pattern lines in declaration order
    pub fn compile<S: AsRef<str>>(patterns: &[S]) -> PackResult<Self> {
        let mut rules = Vec::with_capacity(patterns.len());

        for pattern in patterns {
            let pattern = pattern.as_ref();
            debug!("filter pattern: {}", pattern);
            let (negated, body) = match pattern.strip_prefix('!') {
                Some(rest) => (true, rest),
                None => (false, pattern),
            };
            let regex =
                Regex::new(&format!("^(?:{})$", body)).map_err(|e| PackError::InvalidPattern {
                    pattern: pattern.to_string(),
                    source: e,
                })?;
            rules.push(FilterRule { negated, regex });
        }

        Ok(Self { rules })
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Decide a normalized candidate path: the last matching rule wins
    pub fn is_kept(&self, candidate: &str) -> bool {
        let mut keep = true;
        for rule in &self.rules {
            if rule.matches(candidate) {
                keep = !rule.negated;
            }
        }
        keep
    }

    /// Lazily yield the retained paths under `root`.
    ///
    /// For a directory root every entry below it is evaluated (the root
    /// itself is never yielded); a file root is evaluated by its file name.
    /// Yielded paths are `root` joined with the entry's relative path.
    pub fn filter(&self, root: &Path, prefix: Option<&str>) -> Filtered<'_> {
        let inner = if root.is_file() {
            FilteredInner::File(Some(root.to_path_buf()))
        } else {
            let walker = WalkDir::new(root)
                .follow_links(true)
                .min_depth(1)
                .sort_by(|a, b| {
                    // Files before subdirectories, each group by name
                    let a_dir = a.path().is_dir();
                    let b_dir = b.path().is_dir();
                    a_dir
                        .cmp(&b_dir)
                        .then_with(|| a.file_name().cmp(b.file_name()))
                });
            FilteredInner::Walk(walker.into_iter())
        };

        Filtered {
            filter: self,
            root: root.to_path_buf(),
            prefix: prefix.filter(|p| !p.is_empty()).map(str::to_string),
            inner,
        }
    }
}

/// Iterator over retained paths, see [`PatternFilter::filter`]
pub struct Filtered<'a> {
    filter: &'a PatternFilter,
    root: PathBuf,
    prefix: Option<String>,
    inner: FilteredInner,
}

enum FilteredInner {
    File(Option<PathBuf>),
    Walk(walkdir::IntoIter),
}

impl Iterator for Filtered<'_> {
    type Item = PackResult<PathBuf>;

    fn next(&mut self) -> Option<Self::Item> {
        match &mut self.inner {
            FilteredInner::File(slot) => {
                let path = slot.take()?;
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let candidate = archive_name(self.prefix.as_deref(), &name);
                if self.filter.is_kept(&candidate) {
                    Some(Ok(path))
                } else {
                    debug!("skip:   {}", candidate);
                    None
                }
            }
            FilteredInner::Walk(walker) => loop {
                let entry = match walker.next()? {
                    Ok(entry) => entry,
                    Err(e)
                        if e.io_error().map(|io| io.kind()) == Some(ErrorKind::NotFound) =>
                    {
                        debug!("Skipping dangling entry: {}", e);
                        continue;
                    }
                    Err(e) => return Some(Err(e.into())),
                };

                let relative = match entry.path().strip_prefix(&self.root) {
                    Ok(rel) => to_slash(rel),
                    Err(_) => continue,
                };
                let mut candidate = archive_name(self.prefix.as_deref(), &relative);
                if entry.file_type().is_dir() {
                    candidate.push('/');
                }

                if self.filter.is_kept(&candidate) {
                    return Some(Ok(entry.into_path()));
                }
                debug!("skip:   {}", candidate);
            },
        }
    }
}

/// Turn raw pattern lines into rule lines.
///
/// Lines are trimmed and blank lines dropped. With `strip_comments`, a
/// trailing comment introduced by two blanks and `#` is removed and lines
/// starting with `#` are skipped.
pub fn pattern_lines<'a, I>(lines: I, strip_comments: bool) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    lines
        .into_iter()
        .filter_map(|line| {
            let line = line.trim();
            if !strip_comments {
                return (!line.is_empty()).then(|| line.to_string());
            }
            let body = COMMENT_RE
                .captures(line)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().trim_end())
                .unwrap_or(line);
            if body.is_empty() || body.starts_with('#') {
                None
            } else {
                Some(body.to_string())
            }
        })
        .collect()
}
