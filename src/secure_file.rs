//! Atomic, permission-first artifact writes
//!
//! Content goes to a temporary file in the destination directory, which is created
//! owner-only and given its final mode before any byte is written. The temporary file
//! is then synced and renamed over the target, so readers see either the old artifact
//! or the complete new one.

use crate::error::{BootstrapError, Result};
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::{Builder, NamedTempFile};

/// Owner read/write only
pub const PRIVATE_MODE: u32 = 0o600;
/// Owner read/write, group and other read
pub const PUBLIC_MODE: u32 = 0o644;

/// Atomically replace `path` with `contents`, leaving it with permission `mode`
pub fn write_atomic(path: &Path, contents: &[u8], mode: u32) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut temp: NamedTempFile = Builder::new()
        .prefix(".pki-bootstrap-")
        .tempfile_in(dir)
        .map_err(|e| BootstrapError::io(dir, e))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        temp.as_file()
            .set_permissions(fs::Permissions::from_mode(mode))
            .map_err(|e| BootstrapError::io(temp.path(), e))?;
    }
    #[cfg(not(unix))]
    let _ = mode;

    temp.write_all(contents)
        .map_err(|e| BootstrapError::io(temp.path(), e))?;
    temp.as_file()
        .sync_all()
        .map_err(|e| BootstrapError::io(temp.path(), e))?;

    temp.persist(path).map_err(|e| BootstrapError::io(path, e.error))?;
    Ok(())
}

/// Byte-identical copy of `source` to `destination` with permission `mode`
pub fn copy_artifact(source: &Path, destination: &Path, mode: u32) -> Result<()> {
    let contents = fs::read(source).map_err(|e| BootstrapError::io(source, e))?;
    write_atomic(destination, &contents, mode)
}

/// Force an existing artifact to permission `mode`
///
/// Used when material from an earlier run is kept, so a key that was loosened in the
/// meantime is owner-only again before it is reported as in use.
pub fn restrict_permissions(path: &Path, mode: u32) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let current = fs::metadata(path)
            .map_err(|e| BootstrapError::io(path, e))?
            .permissions()
            .mode()
            & 0o777;
        if current != mode {
            fs::set_permissions(path, fs::Permissions::from_mode(mode))
                .map_err(|e| BootstrapError::io(path, e))?;
            tracing::warn!(
                path = %path.display(),
                from = %format!("{:o}", current),
                to = %format!("{:o}", mode),
                "tightened permissions on existing artifact"
            );
        }
    }
    #[cfg(not(unix))]
    let _ = (path, mode);
    Ok(())
}

/// Create `dir` and any missing parents
pub fn ensure_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).map_err(|e| BootstrapError::io(dir, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    fn mode_of(path: &Path) -> u32 {
        use std::os::unix::fs::PermissionsExt;
        fs::metadata(path).unwrap().permissions().mode() & 0o777
    }

    #[test]
    fn test_write_atomic_creates_and_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("artifact.pem");

        write_atomic(&path, b"first", PRIVATE_MODE).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"first");

        write_atomic(&path, b"second", PRIVATE_MODE).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"second");

        // no temporary files are left behind
        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_write_atomic_tightens_existing_world_readable_file() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secret.key");
        fs::write(&path, b"old").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o666)).unwrap();

        write_atomic(&path, b"new", PRIVATE_MODE).unwrap();
        assert_eq!(mode_of(&path), 0o600);
    }

    #[cfg(unix)]
    #[test]
    fn test_public_mode_applied() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ca.crt");
        write_atomic(&path, b"cert", PUBLIC_MODE).unwrap();
        assert_eq!(mode_of(&path), 0o644);
    }

    #[test]
    fn test_copy_artifact_is_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("postgres.key");
        let destination = dir.path().join("server.key");
        write_atomic(&source, b"\x00binary\xffcontent", PRIVATE_MODE).unwrap();

        copy_artifact(&source, &destination, PRIVATE_MODE).unwrap();
        assert_eq!(fs::read(&source).unwrap(), fs::read(&destination).unwrap());
    }

    #[cfg(unix)]
    #[test]
    fn test_restrict_permissions_tightens_loose_file() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kept.key");
        fs::write(&path, b"key").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();

        restrict_permissions(&path, PRIVATE_MODE).unwrap();
        assert_eq!(mode_of(&path), 0o600);
        assert_eq!(fs::read(&path).unwrap(), b"key");
    }

    #[test]
    fn test_restrict_permissions_missing_file_fails_with_io() {
        let dir = tempfile::tempdir().unwrap();
        let result = restrict_permissions(&dir.path().join("absent.key"), PRIVATE_MODE);
        if cfg!(unix) {
            assert!(matches!(result, Err(BootstrapError::Io { .. })));
        }
    }

    #[test]
    fn test_write_into_missing_directory_fails_with_io() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("file");
        assert!(matches!(
            write_atomic(&path, b"x", PRIVATE_MODE),
            Err(BootstrapError::Io { .. })
        ));
    }
}
