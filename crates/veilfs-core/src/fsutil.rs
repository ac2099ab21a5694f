//! Crash-safe file replacement.
//!
//! Files are written to a temp file in the destination directory, synced, and
//! renamed over the target, so readers only ever see the old or the new
//! content.

use std::io::{self, Write};
use std::path::Path;

use tempfile::NamedTempFile;

/// Atomically replace `path` with `data`.
pub fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    let tmp = staged(path, data)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Atomically create `path` with `data`. Fails with `AlreadyExists` if the
/// target is present; the temp file is cleaned up in that case.
pub fn write_new_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    let tmp = staged(path, data)?;
    tmp.persist_noclobber(path).map_err(|e| e.error)?;
    Ok(())
}

fn staged(path: &Path, data: &[u8]) -> io::Result<NamedTempFile> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    Ok(tmp)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_existing_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file.conf");
        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"second");
    }

    #[test]
    fn new_refuses_existing_target() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file.conf");
        write_new_atomic(&path, b"first").unwrap();

        let err = write_new_atomic(&path, b"second").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
        assert_eq!(std::fs::read(&path).unwrap(), b"first");
        // Only the original file remains; no stray temp files.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
