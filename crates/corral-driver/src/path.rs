//! Path-convention translation between the orchestrator and the sandbox.
//!
//! Orchestrators may send paths in either convention (`c:\data\in` or
//! `/data/in`). Everything here is pure: no filesystem access, so the same
//! functions serve archive transfer and working-directory resolution.

use crate::error::{DriverError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

/// Path convention used inside a sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PathStyle {
    /// Forward slashes, single root.
    #[default]
    Unix,
    /// Backslashes, drive-letter roots.
    Windows,
}

impl PathStyle {
    /// Native separator for this style.
    pub fn separator(self) -> char {
        match self {
            Self::Unix => '/',
            Self::Windows => '\\',
        }
    }

    /// Parse from string (case-insensitive), defaulting to Unix.
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "windows" | "win" => Self::Windows,
            _ => Self::Unix,
        }
    }
}

/// Split a path into its non-empty segments, dropping any drive prefix.
///
/// Both separators are accepted regardless of the target style.
fn segments(path: &str) -> (Option<&str>, Vec<&str>) {
    let (drive, rest) = split_drive(path);
    let parts = rest
        .split(['/', '\\'])
        .filter(|s| !s.is_empty())
        .collect();
    (drive, parts)
}

fn split_drive(path: &str) -> (Option<&str>, &str) {
    let bytes = path.as_bytes();
    if bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic() {
        (Some(&path[..2]), &path[2..])
    } else {
        (None, path)
    }
}

/// Translate a path into the sandbox convention.
///
/// Separators are rewritten; for `Unix` a drive prefix is dropped and the
/// result is rooted at `/`, for `Windows` a bare rooted path gets `c:`.
/// Relative inputs stay relative.
pub fn translate(path: &str, style: PathStyle) -> String {
    let trimmed = path.trim();
    let (drive, parts) = segments(trimmed);
    let rest = match drive {
        Some(_) => &trimmed[2..],
        None => trimmed,
    };
    let rooted = drive.is_some() || rest.starts_with(['/', '\\']);
    let sep = style.separator().to_string();
    let joined = parts.join(&sep);

    match style {
        PathStyle::Unix if rooted => format!("/{joined}"),
        PathStyle::Unix => joined,
        PathStyle::Windows if rooted => {
            let drive = drive.map(str::to_lowercase).unwrap_or_else(|| "c:".into());
            format!("{drive}\\{joined}")
        }
        PathStyle::Windows => joined,
    }
}

/// Lexically normalize a relative path, resolving `.` and `..`.
///
/// Leading roots and drive prefixes are stripped so the result is always
/// relative. Returns `None` when a `..` climbs above the start.
pub fn normalize_relative(path: &Path) -> Option<PathBuf> {
    let mut out: Vec<&std::ffi::OsStr> = Vec::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir | Component::CurDir => {}
            Component::ParentDir => {
                out.pop()?;
            }
            Component::Normal(part) => out.push(part),
        }
    }
    Some(out.iter().collect())
}

/// Resolve a sandbox path under the host-visible sandbox root.
///
/// The path is translated from either convention first. Absolute paths are
/// taken relative to the sandbox root; anything that would resolve above the
/// root is rejected rather than clamped.
pub fn resolve_in_root(root: &Path, sandbox_path: &str) -> Result<PathBuf> {
    let translated = translate(sandbox_path, PathStyle::Unix);
    let relative = normalize_relative(Path::new(&translated))
        .ok_or_else(|| DriverError::PathEscape(PathBuf::from(sandbox_path)))?;
    Ok(root.join(relative))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_translate_windows_to_unix() {
        assert_eq!(translate("\\testfiles", PathStyle::Unix), "/testfiles");
        assert_eq!(translate("c:\\testfiles\\a", PathStyle::Unix), "/testfiles/a");
        assert_eq!(translate("C:\\", PathStyle::Unix), "/");
    }

    #[test]
    fn test_translate_unix_to_windows() {
        assert_eq!(translate("/testfiles/a", PathStyle::Windows), "c:\\testfiles\\a");
        assert_eq!(translate("d:/data", PathStyle::Windows), "d:\\data");
        assert_eq!(translate("rel/dir", PathStyle::Windows), "rel\\dir");
    }

    #[test]
    fn test_translate_mixed_separators() {
        assert_eq!(translate("/a\\b//c/", PathStyle::Unix), "/a/b/c");
        assert_eq!(translate("a/b\\c", PathStyle::Unix), "a/b/c");
    }

    #[test]
    fn test_normalize_relative() {
        assert_eq!(
            normalize_relative(Path::new("./a/../b/c")),
            Some(PathBuf::from("b/c"))
        );
        assert_eq!(normalize_relative(Path::new("/etc/passwd")), Some(PathBuf::from("etc/passwd")));
        assert_eq!(normalize_relative(Path::new("../../escape.txt")), None);
        assert_eq!(normalize_relative(Path::new("a/../../b")), None);
        assert_eq!(normalize_relative(Path::new(".")), Some(PathBuf::new()));
    }

    #[test]
    fn test_resolve_in_root() {
        let root = Path::new("/var/lib/corral/sb/rootfs");
        assert_eq!(
            resolve_in_root(root, "c:\\testfiles").unwrap(),
            root.join("testfiles")
        );
        assert_eq!(resolve_in_root(root, "/").unwrap(), root.to_path_buf());
        assert!(matches!(
            resolve_in_root(root, "/../outside"),
            Err(DriverError::PathEscape(_))
        ));
    }

    #[test]
    fn test_path_style_parse() {
        assert_eq!(PathStyle::parse("Windows"), PathStyle::Windows);
        assert_eq!(PathStyle::parse("linux"), PathStyle::Unix);
    }
}
