//! File system operations
//!
//! Helpers used by transfers and quota checks.

use std::fs;
use std::io::Result;
use std::path::{Path, PathBuf};

/// Check if file exists
pub fn file_exists(path: &Path) -> bool {
    path.is_file()
}

/// Total size of all regular files below `path`.
pub fn directory_size(path: &Path) -> Result<u64> {
    let mut total = 0;
    if !path.exists() {
        return Ok(0);
    }
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            total += directory_size(&entry.path())?;
        } else if file_type.is_file() {
            total += entry.metadata()?.len();
        }
    }
    Ok(total)
}

/// First of `path`, `path.1`, `path.2`, ... that does not exist yet.
pub fn unique_path(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    (1u32..)
        .map(|n| path.with_file_name(format!("{}.{}", name, n)))
        .find(|candidate| !candidate.exists())
        .unwrap_or_else(|| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sums_nested_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a"), b"12345").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/b"), b"123").unwrap();
        assert_eq!(directory_size(dir.path()).unwrap(), 8);
        assert_eq!(directory_size(&dir.path().join("missing")).unwrap(), 0);
    }

    #[test]
    fn unique_path_appends_a_counter() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("report.txt");
        assert_eq!(unique_path(&target), target);

        fs::write(&target, b"x").unwrap();
        fs::write(dir.path().join("report.txt.1"), b"x").unwrap();
        assert_eq!(unique_path(&target), dir.path().join("report.txt.2"));
    }
}
