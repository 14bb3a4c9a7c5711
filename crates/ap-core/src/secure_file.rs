//! Owner-only file writes
//!
//! Everything apssh persists (session tokens, private keys, certificates)
//! is bearer-equivalent, so files are created with mode 0600 on Unix
//! before any content reaches them, and replaced by rename so readers
//! never observe a half-written file.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Suffix for in-progress writes
const TMP_SUFFIX: &str = ".tmp";

/// Path used to stage a write to `path`
pub fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(TMP_SUFFIX);
    PathBuf::from(name)
}

/// Create (or truncate) `path` with owner-only permissions and write `contents`
///
/// Creates the parent directory if it doesn't exist.
pub fn write_private(path: &Path, contents: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path)?;
    file.write_all(contents)?;
    file.sync_all()?;

    // The mode passed to open() only applies to new files.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }

    Ok(())
}

/// Write `contents` to a staging file next to `path`
///
/// Returns the staging path; call [`commit`] to move it into place.
pub fn stage_private(path: &Path, contents: &[u8]) -> io::Result<PathBuf> {
    let staged = staging_path(path);
    write_private(&staged, contents)?;
    Ok(staged)
}

/// Move a staged file over its final path
pub fn commit(staged: &Path, path: &Path) -> io::Result<()> {
    fs::rename(staged, path)
}

/// Remove a file, ignoring a missing file
pub fn discard(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => tracing::debug!("Failed to remove {:?}: {}", path, e),
    }
}

/// Atomically replace `path` with `contents`, owner-only
pub fn atomic_write_private(path: &Path, contents: &[u8]) -> io::Result<()> {
    let staged = stage_private(path, contents)?;
    if let Err(e) = commit(&staged, path) {
        discard(&staged);
        return Err(e);
    }
    Ok(())
}
