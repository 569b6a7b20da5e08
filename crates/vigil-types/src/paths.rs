//! Lexical path normalization.
//!
//! Both the approval broker (path-scoped trust) and the tool sandbox
//! (blocklist checks) need a canonical absolute form of paths that may not
//! exist yet, so `std::fs::canonicalize` is not usable. This normalization
//! is purely lexical: it absolutizes against the current directory and
//! resolves `.` and `..` components without touching the filesystem.

use std::path::{Component, Path, PathBuf};

/// Normalize a path to a canonical absolute form without filesystem access.
///
/// Relative paths are resolved against the process working directory.
/// `..` at the root is dropped rather than escaping it.
pub fn normalize_path(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("/"))
            .join(path)
    };

    let mut out = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::RootDir | Component::Prefix(_) => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(part) => out.push(part),
        }
    }
    if out.as_os_str().is_empty() {
        out.push("/");
    }
    out
}

/// Normalize a directory prefix so prefix matching cannot be confused by a
/// missing trailing separator: the result always ends with `/`.
pub fn normalize_prefix(path: &str) -> String {
    let normalized = normalize_path(Path::new(path));
    let mut s = normalized.to_string_lossy().into_owned();
    if !s.ends_with('/') {
        s.push('/');
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_dot_and_dotdot() {
        assert_eq!(
            normalize_path(Path::new("/workspace/./proj/../a.txt")),
            PathBuf::from("/workspace/a.txt")
        );
    }

    #[test]
    fn parent_of_root_stays_at_root() {
        assert_eq!(
            normalize_path(Path::new("/../../etc/passwd")),
            PathBuf::from("/etc/passwd")
        );
    }

    #[test]
    fn relative_paths_become_absolute() {
        let normalized = normalize_path(Path::new("some/file.txt"));
        assert!(normalized.is_absolute());
        assert!(normalized.ends_with("some/file.txt"));
    }

    #[test]
    fn prefix_always_ends_with_separator() {
        assert_eq!(normalize_prefix("/workspace/proj"), "/workspace/proj/");
        assert_eq!(normalize_prefix("/workspace/proj/"), "/workspace/proj/");
    }
}
