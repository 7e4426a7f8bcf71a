//! Lexical path safety: every user-supplied path is resolved relative to a base directory and
//! rejected when it is absolute or climbs above the base.

use crate::{ErrorCode, HasErrorCode};
use std::path::{Component, Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    #[error("absolute paths are not allowed: {0}")]
    Absolute(String),

    #[error("path escapes the base directory: {0}")]
    Traversal(String),
}

impl HasErrorCode for PathError {
    fn code(&self) -> ErrorCode {
        ErrorCode::PathTraversal
    }
}

/// Normalizes `raw` into a relative path without `.`/`..` components.
///
/// An empty string or `.` yields an empty path (the base itself).
pub fn normalize_relative(raw: &str) -> Result<PathBuf, PathError> {
    let value = raw.trim().replace('\\', "/");
    if value.starts_with('/') || Path::new(&value).is_absolute() {
        return Err(PathError::Absolute(raw.to_string()));
    }

    let mut out: Vec<String> = Vec::new();
    for component in Path::new(&value).components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if out.pop().is_none() {
                    return Err(PathError::Traversal(raw.to_string()));
                }
            }
            Component::Normal(name) => out.push(name.to_string_lossy().into_owned()),
            Component::RootDir | Component::Prefix(_) => {
                return Err(PathError::Absolute(raw.to_string()));
            }
        }
    }

    Ok(out.iter().collect())
}

/// Resolves `raw` against `base`, refusing anything that leaves `base`.
///
/// Existing targets are also checked after symlink resolution.
pub fn resolve_within(base: &Path, raw: &str) -> Result<PathBuf, PathError> {
    let relative = normalize_relative(raw)?;
    let candidate = base.join(&relative);

    if let (Ok(real_base), Ok(real_candidate)) = (base.canonicalize(), candidate.canonicalize()) {
        if !real_candidate.starts_with(&real_base) {
            return Err(PathError::Traversal(raw.to_string()));
        }
    }

    Ok(candidate)
}

/// `path` relative to `base` with forward slashes, or `None` when outside `base`.
pub fn relative_display(base: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(base).ok()?;
    let parts: Vec<String> = relative
        .components()
        .filter_map(|component| match component {
            Component::Normal(name) => Some(name.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    Some(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn normalizes_dot_segments() {
        assert_eq!(
            normalize_relative("./src/../src/lib.rs").expect("ok"),
            PathBuf::from("src/lib.rs")
        );
        assert_eq!(normalize_relative("").expect("ok"), PathBuf::new());
        assert_eq!(normalize_relative(".").expect("ok"), PathBuf::new());
    }

    #[test]
    fn rejects_parent_escape() {
        assert!(matches!(
            normalize_relative("../etc/passwd"),
            Err(PathError::Traversal(_))
        ));
        assert!(matches!(
            normalize_relative("a/../../b"),
            Err(PathError::Traversal(_))
        ));
    }

    #[test]
    fn rejects_absolute() {
        assert!(matches!(
            normalize_relative("/etc/passwd"),
            Err(PathError::Absolute(_))
        ));
        assert_eq!(
            normalize_relative("/etc/passwd").unwrap_err().code(),
            ErrorCode::PathTraversal
        );
    }

    #[test]
    fn display_is_slash_separated() {
        let base = Path::new("/repo");
        assert_eq!(
            relative_display(base, Path::new("/repo/internal/x.go")).as_deref(),
            Some("internal/x.go")
        );
        assert_eq!(relative_display(base, Path::new("/other/x.go")), None);
    }
}
