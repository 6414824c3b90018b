use std::path::{Component, Path, PathBuf};

use crate::PathError;

/// Resolves a repo-relative `path` under `root`.
///
/// Both sides are made absolute and normalised lexically (`.` dropped, `..`
/// pops a component) before comparing, so the check does not depend on what
/// currently exists on disk. The result must be a strict component-wise
/// descendant of the root.
pub fn resolve_within(root: &Path, path: &str) -> Result<PathBuf, PathError> {
    if path.is_empty() {
        return Err(PathError::Empty);
    }

    let root = normalize(&std::path::absolute(root)?);
    let target = normalize(&root.join(path));

    if target == root || !target.starts_with(&root) {
        return Err(PathError::Escapes(path.to_string()));
    }
    Ok(target)
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            Component::Prefix(_) | Component::RootDir | Component::Normal(_) => {
                out.push(component.as_os_str());
            }
        }
    }
    out
}
