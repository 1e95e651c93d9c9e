// Path Utilities
// Conversion between workspace-relative paths and absolute device paths

use std::path::{Component, Path, PathBuf};

/// Collapse repeated `/` and drop a trailing `/` (except for the bare root)
pub fn normalize_path(path: &str) -> String {
    let mut normalized = String::with_capacity(path.len());
    let mut last_was_slash = false;

    for ch in path.chars() {
        if ch == '/' {
            if !last_was_slash {
                normalized.push(ch);
            }
            last_was_slash = true;
        } else {
            normalized.push(ch);
            last_was_slash = false;
        }
    }

    if normalized.len() > 1 && normalized.ends_with('/') {
        normalized.pop();
    }

    normalized
}

fn normalize_root(root: &str) -> String {
    let root = normalize_path(root);
    if root.is_empty() || root == "/" {
        "/".to_string()
    } else if root.starts_with('/') {
        root
    } else {
        format!("/{}", root)
    }
}

/// Convert a workspace-relative path to an absolute device path under `root`
pub fn to_device_path(rel_local: &str, root: &str) -> String {
    let root = normalize_root(root);
    let local = normalize_path(rel_local);
    let local = local.trim_start_matches('/');

    if local.is_empty() {
        return root;
    }

    if root == "/" {
        format!("/{}", local)
    } else {
        format!("{}/{}", root, local)
    }
}

/// Convert an absolute device path back to a workspace-relative path.
///
/// Paths outside `root` fall back to having their leading slashes stripped.
pub fn to_local_relative(abs_device: &str, root: &str) -> String {
    let root = normalize_root(root);
    let device = normalize_path(abs_device);

    if root == "/" {
        return device.trim_start_matches('/').to_string();
    }

    if device == root {
        return String::new();
    }

    match device.strip_prefix(&root).and_then(|rest| rest.strip_prefix('/')) {
        Some(rest) => rest.to_string(),
        None => device.trim_start_matches('/').to_string(),
    }
}

/// Whether `abs_device` is `root` itself or lives below it
pub fn is_under_root(abs_device: &str, root: &str) -> bool {
    let root = normalize_root(root);
    let device = normalize_path(abs_device);

    if root == "/" {
        return device.starts_with('/');
    }

    device == root
        || device
            .strip_prefix(&root)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// Join a child name onto a device directory
pub fn join_device(dir: &str, name: &str) -> String {
    let dir = normalize_path(dir);
    let name = name.trim_matches('/');
    if dir.is_empty() || dir == "/" {
        format!("/{}", name)
    } else {
        format!("{}/{}", dir, name)
    }
}

/// Strict ancestor directories of a device path, shallowest first.
/// The bare root is never included.
pub fn parent_dirs(abs_device: &str) -> Vec<String> {
    let device = normalize_path(abs_device);
    let mut parents = Vec::new();
    let mut current = String::new();

    let segments: Vec<&str> = device.split('/').filter(|s| !s.is_empty()).collect();
    if segments.len() < 2 {
        return parents;
    }

    for segment in &segments[..segments.len() - 1] {
        current.push('/');
        current.push_str(segment);
        parents.push(current.clone());
    }

    parents
}

/// Number of path segments (`/` is 0, `/a/b` is 2)
pub fn depth(path: &str) -> usize {
    path.split('/').filter(|s| !s.is_empty()).count()
}

/// Parent directory of a device path (`/` for top-level entries)
pub fn device_parent(abs_device: &str) -> String {
    let device = normalize_path(abs_device);
    match device.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => device[..idx].to_string(),
    }
}

/// Workspace-relative key for a local file, always `/`-separated
pub fn relative_key(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();

    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Local absolute path for a workspace-relative key
pub fn local_path(root: &Path, rel_key: &str) -> PathBuf {
    rel_key
        .split('/')
        .filter(|s| !s.is_empty())
        .fold(root.to_path_buf(), |acc, part| acc.join(part))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("a//b///c/"), "a/b/c");
        assert_eq!(normalize_path("/"), "/");
        assert_eq!(normalize_path("//"), "/");
        assert_eq!(normalize_path(""), "");
    }

    #[test]
    fn test_to_device_path_root() {
        assert_eq!(to_device_path("lib/utils.py", "/"), "/lib/utils.py");
        assert_eq!(to_device_path("a.py", ""), "/a.py");
        assert_eq!(to_device_path("", "/"), "/");
    }

    #[test]
    fn test_to_device_path_nested_root() {
        assert_eq!(to_device_path("lib/utils.py", "/code"), "/code/lib/utils.py");
        assert_eq!(to_device_path("lib//utils.py/", "/code/"), "/code/lib/utils.py");
        assert_eq!(to_device_path("", "/code"), "/code");
    }

    #[test]
    fn test_to_local_relative() {
        assert_eq!(to_local_relative("/lib/utils.py", "/"), "lib/utils.py");
        assert_eq!(to_local_relative("/code/lib/utils.py", "/code"), "lib/utils.py");
        assert_eq!(to_local_relative("/code", "/code"), "");
        // prefix must match on a separator boundary
        assert_eq!(to_local_relative("/codex/a.py", "/code"), "codex/a.py");
    }

    #[test]
    fn test_is_under_root() {
        assert!(is_under_root("/code/a.py", "/code"));
        assert!(!is_under_root("/codex/a.py", "/code"));
        assert!(is_under_root("/anything", "/"));
    }

    #[test]
    fn test_parent_dirs() {
        assert_eq!(parent_dirs("/a/b/c.py"), vec!["/a", "/a/b"]);
        assert!(parent_dirs("/c.py").is_empty());
        assert_eq!(device_parent("/a/b/c.py"), "/a/b");
        assert_eq!(device_parent("/c.py"), "/");
        assert_eq!(depth("/a/b/c.py"), 3);
    }

    #[test]
    fn test_relative_key() {
        let root = Path::new("/work");
        assert_eq!(
            relative_key(root, Path::new("/work/lib/a.py")).as_deref(),
            Some("lib/a.py")
        );
        assert_eq!(relative_key(root, root), None);
        assert_eq!(local_path(root, "lib/a.py"), PathBuf::from("/work/lib/a.py"));
    }
}
