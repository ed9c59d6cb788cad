//! Path resolution against a session's working directory.
//!
//! Every path the host or the agent names is resolved relative to the
//! session's working directory; `..` traversal and symlinks that lead
//! outside of it are rejected.

use std::path::{Component, Path, PathBuf};

use crate::{AppError, Result};

/// Canonicalize `dir` and require it to be an existing directory.
///
/// # Errors
///
/// Returns `AppError::InvalidRequest` if the path does not exist or is not
/// a directory.
pub fn canonical_dir(dir: &Path) -> Result<PathBuf> {
    let canonical = dir.canonicalize().map_err(|err| {
        AppError::InvalidRequest(format!(
            "working directory '{}' invalid: {err}",
            dir.display()
        ))
    })?;

    if !canonical.is_dir() {
        return Err(AppError::InvalidRequest(format!(
            "working directory '{}' is not a directory",
            canonical.display()
        )));
    }

    Ok(canonical)
}

/// Resolve `candidate` inside `root`, returning an absolute path.
///
/// `root` must already be canonical. Relative candidates are joined onto
/// it; absolute candidates must lie underneath it.
///
/// # Errors
///
/// Returns `AppError::PathViolation` if:
/// - The candidate path contains `..` segments that escape the root.
/// - The resolved path does not start with the root.
/// - The resolved path is a symlink whose target escapes the root.
pub fn resolve_within(root: &Path, candidate: impl AsRef<Path>) -> Result<PathBuf> {
    let candidate = candidate.as_ref();
    let mut normalized = if candidate.is_absolute() {
        PathBuf::new()
    } else {
        root.to_path_buf()
    };

    for component in candidate.components() {
        match component {
            Component::ParentDir => {
                if !normalized.pop() || !normalized.starts_with(root) {
                    return Err(AppError::PathViolation(format!(
                        "'{}' escapes the working directory",
                        candidate.display()
                    )));
                }
            }
            Component::CurDir => {}
            Component::RootDir | Component::Prefix(_) => normalized.push(component),
            Component::Normal(part) => normalized.push(part),
        }
    }

    if !normalized.starts_with(root) {
        return Err(AppError::PathViolation(format!(
            "'{}' is outside the working directory",
            candidate.display()
        )));
    }

    // Symlink escape detection: if the path exists, canonicalize resolves
    // symlinks and we verify the final target is still within the root.
    if normalized.exists() {
        let canonical = normalized.canonicalize().map_err(|err| {
            AppError::PathViolation(format!("cannot resolve '{}': {err}", candidate.display()))
        })?;

        if !canonical.starts_with(root) {
            return Err(AppError::PathViolation(format!(
                "'{}' links outside the working directory",
                candidate.display()
            )));
        }

        Ok(canonical)
    } else {
        Ok(normalized)
    }
}
