//! Translation between catalog paths (forward-slash strings relative to the
//! content root) and OS-native absolute paths.

use std::path::{Path, PathBuf};

use crate::error::StorageError;

/// Resolves a catalog-relative path against the content root.
///
/// Rejects absolute paths and `..` segments so a catalog row can never point
/// outside the root. Empty and `.` segments are ignored.
pub fn resolve(root: &Path, relative: &str) -> Result<PathBuf, StorageError> {
    if relative.starts_with('/') || relative.contains('\\') {
        return Err(StorageError::InvalidRelativePath(relative.to_string()));
    }

    let mut path = root.to_path_buf();
    for segment in relative.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return Err(StorageError::InvalidRelativePath(relative.to_string())),
            s => path.push(s),
        }
    }
    Ok(path)
}

/// Directory part of a relative path (`""` for a file at the root).
pub fn parent_dir(relative: &str) -> &str {
    match relative.rfind('/') {
        Some(pos) => &relative[..pos],
        None => "",
    }
}

/// Final segment of a relative path.
pub fn file_name(relative: &str) -> &str {
    match relative.rfind('/') {
        Some(pos) => &relative[pos + 1..],
        None => relative,
    }
}

/// Joins a relative directory and a file name with a forward slash.
pub fn join(dir: &str, name: &str) -> String {
    let dir = dir.trim_end_matches('/');
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_nested() {
        let root = Path::new("/content");
        let path = resolve(root, "u1/a1/a1_p0.jpg").unwrap();
        assert_eq!(path, root.join("u1").join("a1").join("a1_p0.jpg"));
    }

    #[test]
    fn test_resolve_ignores_empty_and_dot_segments() {
        let root = Path::new("/content");
        let path = resolve(root, "old//./a1_p0.jpg").unwrap();
        assert_eq!(path, root.join("old").join("a1_p0.jpg"));
    }

    #[test]
    fn test_resolve_rejects_parent_segments() {
        let root = Path::new("/content");
        assert!(matches!(
            resolve(root, "old/../../etc/passwd"),
            Err(StorageError::InvalidRelativePath(_))
        ));
    }

    #[test]
    fn test_resolve_rejects_absolute() {
        let root = Path::new("/content");
        assert!(resolve(root, "/etc/passwd").is_err());
        assert!(resolve(root, "old\\a1.jpg").is_err());
    }

    #[test]
    fn test_parent_and_file_name() {
        assert_eq!(parent_dir("old/sub/a1_p0.jpg"), "old/sub");
        assert_eq!(parent_dir("a1_p0.jpg"), "");
        assert_eq!(file_name("old/sub/a1_p0.jpg"), "a1_p0.jpg");
        assert_eq!(file_name("a1_p0.jpg"), "a1_p0.jpg");
    }

    #[test]
    fn test_join() {
        assert_eq!(join("u1/a1", "a1_p0.jpg"), "u1/a1/a1_p0.jpg");
        assert_eq!(join("u1/a1/", "a1_p0.jpg"), "u1/a1/a1_p0.jpg");
        assert_eq!(join("", "a1_p0.jpg"), "a1_p0.jpg");
    }
}
