//! Path validation
//!
//! Clients see a virtual tree rooted at `/` that maps onto their home
//! directory. Every client-supplied path goes through `resolve_virtual_path`
//! before it touches the filesystem.

use std::path::{Path, PathBuf};

use crate::error::StorageError;

/// Deepest virtual path a client may address.
pub const MAX_DIRECTORY_DEPTH: usize = 32;

/// Resolves `target` (absolute, or relative to `cwd`) to a normalized
/// virtual path. `..` may climb only as far as `/`.
pub fn resolve_virtual_path(cwd: &str, target: &str) -> Result<String, StorageError> {
    if target.contains('\0') {
        return Err(StorageError::InvalidPath(target.escape_default().to_string()));
    }

    let mut parts: Vec<&str> = Vec::new();
    if !target.starts_with('/') {
        parts.extend(cwd.split('/').filter(|p| !p.is_empty()));
    }

    for component in target.split(['/', '\\']) {
        match component {
            "" | "." => {}
            ".." => {
                if parts.pop().is_none() {
                    return Err(StorageError::PathTraversal(target.to_string()));
                }
            }
            name => parts.push(name),
        }
    }

    if parts.len() > MAX_DIRECTORY_DEPTH {
        return Err(StorageError::InvalidPath(target.to_string()));
    }

    Ok(format!("/{}", parts.join("/")))
}

/// Maps a normalized virtual path onto the real filesystem under `root`.
pub fn virtual_to_real_path(root: &Path, virtual_path: &str) -> PathBuf {
    let relative = virtual_path.trim_start_matches('/');
    if relative.is_empty() {
        root.to_path_buf()
    } else {
        root.join(relative)
    }
}

/// Validates a CWD target and returns the new virtual directory.
pub fn change_directory(root: &Path, cwd: &str, target: &str) -> Result<String, StorageError> {
    if target.is_empty() {
        return Err(StorageError::InvalidPath("Empty path provided".into()));
    }

    let new_virtual_path = resolve_virtual_path(cwd, target)?;
    let real_path = virtual_to_real_path(root, &new_virtual_path);

    if !real_path.is_dir() {
        return Err(StorageError::DirectoryNotFound(new_virtual_path));
    }

    // Symlinks may still point outside the home directory
    let canonical = real_path.canonicalize()?;
    let root_canonical = root.canonicalize()?;
    if !canonical.starts_with(&root_canonical) {
        return Err(StorageError::PathTraversal(target.into()));
    }

    Ok(new_virtual_path)
}

/// Resolves a file argument to its virtual and real paths.
pub fn resolve_file_path(
    root: &Path,
    cwd: &str,
    target: &str,
) -> Result<(String, PathBuf), StorageError> {
    let trimmed = target.trim();
    if trimmed.is_empty() {
        return Err(StorageError::InvalidPath("Missing file name".into()));
    }

    let virtual_path = resolve_virtual_path(cwd, trimmed)?;
    if virtual_path == "/" {
        return Err(StorageError::NotAFile(virtual_path));
    }

    let real_path = virtual_to_real_path(root, &virtual_path);
    Ok((virtual_path, real_path))
}
