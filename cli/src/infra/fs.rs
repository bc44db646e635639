//! Filesystem helpers shared by the on-disk stores.

use std::path::Path;

use anyhow::{Context, Result};

/// Write `content` to `path` atomically: temp file in the same directory,
/// owner-only permissions, then rename over the target.
///
/// # Errors
///
/// Returns an error if the parent directory cannot be created or any step of
/// the write fails.
pub fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating directory {}", parent.display()))?;
    }
    let temp_path = temp_sibling(path);
    std::fs::write(&temp_path, content)
        .with_context(|| format!("writing temp file {}", temp_path.display()))?;
    restrict_permissions(&temp_path)?;
    if let Err(e) = std::fs::rename(&temp_path, path) {
        let _ = std::fs::remove_file(&temp_path);
        return Err(e).with_context(|| format!("finalizing {}", path.display()));
    }
    Ok(())
}

/// A unique temporary path next to `path`.
#[must_use]
pub fn temp_sibling(path: &Path) -> std::path::PathBuf {
    let name = path
        .file_name()
        .map_or_else(String::new, |n| n.to_string_lossy().into_owned());
    path.with_file_name(format!(".{name}.{}.tmp", uuid::Uuid::new_v4().simple()))
}

/// Owner read/write only (unix).
///
/// # Errors
///
/// Returns an error if permissions cannot be set.
pub fn restrict_permissions(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .with_context(|| format!("setting permissions on {}", path.display()))?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

/// Remove a file, treating "already gone" as success. Returns whether a file
/// was removed.
///
/// # Errors
///
/// Returns any other I/O error.
pub fn remove_if_exists(path: &Path) -> Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e).with_context(|| format!("removing {}", path.display())),
    }
}
