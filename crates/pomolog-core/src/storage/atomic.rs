//! Write-to-temp-then-rename file replacement.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use tempfile::NamedTempFile;

/// Replace `path` with `bytes` atomically.
///
/// The bytes go to a temp file in the same directory which is then renamed
/// over `path`. If anything fails the temp file is removed and `path` keeps
/// its previous contents.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    write_atomic_with(path, bytes, |tmp, dest| {
        tmp.persist(dest).map(|_| ()).map_err(|e| e.error)
    })
}

/// [`write_atomic`] with a caller-supplied commit step (the rename).
pub(crate) fn write_atomic_with<F>(path: &Path, bytes: &[u8], commit: F) -> io::Result<()>
where
    F: FnOnce(NamedTempFile, &Path) -> io::Result<()>,
{
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".pomolog-")
        .suffix(".tmp")
        .tempfile_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    commit(tmp, path)
}
