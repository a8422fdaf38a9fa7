// ABOUTME: Workspace path guard — confines all filesystem tool paths to one root.
// ABOUTME: Rejects NUL bytes, absolute paths, traversal escapes, and symlinked ancestors.

use std::path::{Component, Path, PathBuf};

use thiserror::Error;

/// A user-supplied path escaped (or tried to escape) the workspace.
///
/// This is its own kind so callers never mistake a containment violation for
/// a missing file.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct WorkspacePathError(String);

impl WorkspacePathError {
    fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Resolve `user_path` inside `workspace` and return the absolute path, or
/// fail if the path cannot be proven to stay inside the workspace.
///
/// The final component need not exist; every ancestor that does exist is
/// fully resolved and re-checked so a symlinked intermediate directory cannot
/// smuggle the path outside the root.
pub fn resolve_in_workspace(
    workspace: &Path,
    user_path: &str,
) -> Result<PathBuf, WorkspacePathError> {
    if user_path.contains('\0') {
        return Err(WorkspacePathError::new("NUL byte in path"));
    }

    let p = Path::new(user_path);
    if p.is_absolute() {
        return Err(WorkspacePathError::new("Absolute paths are not allowed"));
    }

    let root = workspace
        .canonicalize()
        .map_err(|e| WorkspacePathError::new(format!("Workspace root unavailable: {e}")))?;

    // Normalise lexically: `.` drops out, `..` pops, and popping past the
    // root is an escape even if a later component would dive back in.
    let mut resolved = root.clone();
    for component in p.components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if resolved == root || !resolved.pop() {
                    return Err(WorkspacePathError::new("Path escapes workspace"));
                }
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(WorkspacePathError::new("Absolute paths are not allowed"));
            }
        }
    }

    if !resolved.starts_with(&root) {
        return Err(WorkspacePathError::new("Path escapes workspace"));
    }

    // Re-resolve every existing ancestor up to the root; a symlink anywhere
    // along the chain must still land inside the workspace.
    for ancestor in resolved.ancestors() {
        if ancestor == root {
            break;
        }
        if ancestor.exists() {
            let real = ancestor
                .canonicalize()
                .map_err(|e| WorkspacePathError::new(format!("Cannot resolve path: {e}")))?;
            if !real.starts_with(&root) {
                return Err(WorkspacePathError::new("Symlink escape detected"));
            }
        }
    }

    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn workspace() -> (tempfile::TempDir, PathBuf) {
        let tmp = tempfile::tempdir().unwrap();
        let ws = tmp.path().join("ws");
        fs::create_dir_all(&ws).unwrap();
        (tmp, ws)
    }

    #[test]
    fn relative_path_resolves_inside_root() {
        let (_tmp, ws) = workspace();
        let p = resolve_in_workspace(&ws, "a/b.txt").unwrap();
        assert!(p.starts_with(ws.canonicalize().unwrap()));
        assert!(p.ends_with("a/b.txt"));
    }

    #[test]
    fn nonexistent_final_component_is_allowed() {
        let (_tmp, ws) = workspace();
        let p = resolve_in_workspace(&ws, "does/not/exist/yet.txt").unwrap();
        assert!(p.starts_with(ws.canonicalize().unwrap()));
    }

    #[test]
    fn rejects_absolute_path() {
        let (tmp, ws) = workspace();
        let outside = tmp.path().join("x.txt");
        let err = resolve_in_workspace(&ws, outside.to_str().unwrap()).unwrap_err();
        assert!(err.to_string().contains("Absolute"));
    }

    #[test]
    fn rejects_traversal_out_of_root() {
        let (_tmp, ws) = workspace();
        assert!(resolve_in_workspace(&ws, "../evil.txt").is_err());
        assert!(resolve_in_workspace(&ws, "a/../../evil.txt").is_err());
    }

    #[test]
    fn traversal_within_root_is_fine() {
        let (_tmp, ws) = workspace();
        let p = resolve_in_workspace(&ws, "a/../b.txt").unwrap();
        assert!(p.ends_with("b.txt"));
    }

    #[test]
    fn rejects_nul_byte() {
        let (_tmp, ws) = workspace();
        let err = resolve_in_workspace(&ws, "a\0b").unwrap_err();
        assert!(err.to_string().contains("NUL"));
    }

    #[cfg(unix)]
    #[test]
    fn rejects_symlinked_intermediate_directory() {
        let (tmp, ws) = workspace();
        let outside = tmp.path().join("outside");
        fs::create_dir_all(&outside).unwrap();
        std::os::unix::fs::symlink(&outside, ws.join("link")).unwrap();

        let err = resolve_in_workspace(&ws, "link/file.txt").unwrap_err();
        assert!(err.to_string().contains("Symlink escape"));
    }
}
