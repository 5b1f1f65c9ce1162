//! Crash-safe replacement of small bus documents.
//!
//! Readers must only ever see the complete old document or the complete new
//! one. Writes go to a uniquely named `<file>.*.tmp` staging file in the same
//! directory and are then persisted over the canonical path; the rename is
//! atomic on every platform we target.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

/// `<path>.<suffix>`, keeping the original extension (`bus.json.bak`).
pub fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

pub fn backup_path(path: &Path) -> PathBuf {
    sibling(path, "bak")
}

/// Whether `candidate` is a staging file left behind for `path`.
pub fn is_staging_file(path: &Path, candidate: &Path) -> bool {
    let (Some(name), Some(other)) = (path.file_name(), candidate.file_name()) else {
        return false;
    };
    let (name, other) = (name.to_string_lossy(), other.to_string_lossy());
    other.len() > name.len() && other.starts_with(name.as_ref()) && other.ends_with(".tmp")
}

fn write_temp(path: &Path, data: &[u8]) -> io::Result<NamedTempFile> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let prefix = match path.file_name() {
        Some(name) => format!("{}.", name.to_string_lossy()),
        None => String::from("bus."),
    };
    let mut temp = tempfile::Builder::new()
        .prefix(&prefix)
        .suffix(".tmp")
        .tempfile_in(dir)?;
    temp.write_all(data)?;
    temp.as_file().sync_all()?;
    Ok(temp)
}

fn persist(temp: NamedTempFile, path: &Path) -> io::Result<()> {
    temp.persist(path).map(|_| ()).map_err(|e| e.error)
}

/// Write `data` to a fresh staging file, then rename it over `path`.
pub fn replace(path: &Path, data: &[u8]) -> io::Result<()> {
    let temp = write_temp(path, data)?;
    persist(temp, path)
}

/// Like [`replace`], but first copies the current document to `.bak`.
///
/// If the process dies between the copy and the rename, the canonical file is
/// still the complete old document; if the canonical file is ever found empty
/// or damaged, `.bak` holds the last complete one.
pub fn replace_with_backup(path: &Path, data: &[u8]) -> io::Result<()> {
    let temp = write_temp(path, data)?;

    match fs::copy(path, backup_path(path)) {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => log::debug!("Could not refresh backup of {:?}: {}", path, e),
    }

    persist(temp, path)
}

/// Read a document, mapping "missing" to `None`.
pub fn read_optional(path: &Path) -> io::Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}
