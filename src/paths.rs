//! Lexical path helpers shared by hashing, filtering and archiving

use std::path::{Component, Path, PathBuf};

/// Render a path with forward slashes regardless of platform
pub fn to_slash(path: &Path) -> String {
    let s = path.to_string_lossy();
    if std::path::MAIN_SEPARATOR == '/' {
        s.into_owned()
    } else {
        s.replace(std::path::MAIN_SEPARATOR, "/")
    }
}

/// Lexically normalize a path: drop `.` components and fold `..` where possible.
///
/// Never touches the filesystem, so symlinks are not resolved. An empty
/// result becomes `.`.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out: Vec<Component<'_>> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.last() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(component),
            },
            other => out.push(other),
        }
    }
    if out.is_empty() {
        return PathBuf::from(".");
    }
    out.iter().collect()
}

/// Resolve `path` against `base` unless it is already absolute, then normalize
pub fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        normalize(path)
    } else {
        normalize(&base.join(path))
    }
}

/// Build a zip entry name from an optional prefix and a relative name.
///
/// Leading separators, `.` components and empty segments are removed so the
/// result never escapes the archive root.
pub fn archive_name(prefix: Option<&str>, name: &str) -> String {
    let joined = match prefix {
        Some(p) if !p.is_empty() => format!("{}/{}", p, name),
        _ => name.to_string(),
    };

    let mut parts: Vec<&str> = Vec::new();
    for part in joined.split(['/', '\\']) {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            p => parts.push(p),
        }
    }
    parts.join("/")
}
