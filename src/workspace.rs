use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::PipelineError;

/// Project subdirectories that only ever hold generated state, removed before every run.
pub const TEMP_DIRS: &[&str] = &[
    "Binaries",
    "Build",
    "Intermediate",
    "DerivedDataCache",
    "Saved",
    "Plugins",
    ".vs",
];

/// Removes [`TEMP_DIRS`] below `project_root`. Returns the directories actually removed.
pub fn clean_workspace(project_root: &Path) -> Result<Vec<PathBuf>, PipelineError> {
    let mut removed = Vec::new();
    for name in TEMP_DIRS {
        let path = project_root.join(name);
        if fs::symlink_metadata(&path).is_err() {
            debug!(path = %path.display(), "Nothing to remove");
            continue;
        }
        info!(path = %path.display(), "Removing");
        remove_tree(&path).map_err(|source| PipelineError::Cleanup {
            path: path.clone(),
            source,
        })?;
        removed.push(path);
    }
    Ok(removed)
}

/// Deletes `path` and everything below it. An entry that cannot be removed because it
/// (or its parent directory) is read-only gets its read-only flag cleared, then the
/// removal is retried once.
pub fn remove_tree(path: &Path) -> io::Result<()> {
    let metadata = fs::symlink_metadata(path)?;
    if metadata.is_dir() {
        for entry in with_write_access(path, |p| fs::read_dir(p))? {
            remove_tree(&entry?.path())?;
        }
        with_write_access(path, |p| fs::remove_dir(p))
    } else {
        with_write_access(path, remove_entry)
    }
}

fn remove_entry(path: &Path) -> io::Result<()> {
    let result = fs::remove_file(path);
    // Directory symlinks on Windows are removed as directories.
    if result.is_err()
        && cfg!(windows)
        && fs::symlink_metadata(path).is_ok_and(|m| m.file_type().is_symlink())
    {
        return fs::remove_dir(path);
    }
    result
}

fn with_write_access<T>(path: &Path, op: impl Fn(&Path) -> io::Result<T>) -> io::Result<T> {
    match op(path) {
        Err(err) if err.kind() == io::ErrorKind::PermissionDenied => {
            debug!(path = %path.display(), "Clearing read-only flag and retrying");
            clear_readonly(path)?;
            if let Some(parent) = path.parent() {
                clear_readonly(parent)?;
            }
            op(path)
        }
        other => other,
    }
}

fn clear_readonly(path: &Path) -> io::Result<()> {
    let metadata = fs::symlink_metadata(path)?;
    if metadata.file_type().is_symlink() {
        return Ok(());
    }
    let mut permissions = metadata.permissions();
    if permissions.readonly() {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = permissions.mode();
            // Directories also need the search bit to be traversed.
            let extra = if metadata.is_dir() { 0o700 } else { 0o200 };
            permissions.set_mode(mode | extra);
        }
        #[cfg(not(unix))]
        permissions.set_readonly(false);
        fs::set_permissions(path, permissions)?;
    }
    Ok(())
}

/// Replaces whatever is at `dir` with a fresh, empty directory.
pub fn recreate_dir(dir: &Path) -> Result<(), PipelineError> {
    if fs::symlink_metadata(dir).is_ok() {
        debug!(path = %dir.display(), "Replacing existing directory");
        remove_tree(dir).map_err(|source| PipelineError::Cleanup {
            path: dir.to_path_buf(),
            source,
        })?;
    }
    fs::create_dir_all(dir).map_err(|source| PipelineError::Io {
        path: dir.to_path_buf(),
        source,
    })
}

/// Creates `dir` and its parents; an already existing directory is fine.
pub fn ensure_dir(dir: &Path) -> Result<(), PipelineError> {
    match fs::create_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(_) if dir.is_dir() => Ok(()),
        Err(source) => Err(PipelineError::Io {
            path: dir.to_path_buf(),
            source,
        }),
    }
}
