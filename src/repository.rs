//! File-backed entry repository.
//!
//! One JSON file per transfer under the store directory, addressed by the
//! escaped transfer id. Every write goes to a temp file in the same
//! directory and is renamed into place, so a concurrent reader sees either
//! the old record or the new one, never a partial write.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::model::TransferEntry;

const FILE_PREFIX: &str = "transfer_";
const FILE_SUFFIX: &str = ".json";

/// Durable storage for transfer entries. Holds no state besides its root.
#[derive(Debug, Clone)]
pub struct EntryRepository {
    dir: PathBuf,
}

impl EntryRepository {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The directory holding the entry files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file for `id`.
    pub fn path_for(&self, id: &str) -> PathBuf {
        self.dir
            .join(format!("{FILE_PREFIX}{}{FILE_SUFFIX}", sanitize_id(id)))
    }

    /// Write `entry` atomically, creating the store directory if needed.
    ///
    /// Refuses to replace a file that holds a different transfer, which can
    /// only happen on a case-insensitive filesystem or after a hand edit.
    pub fn save(&self, entry: &TransferEntry) -> Result<()> {
        fs::create_dir_all(&self.dir)?;

        let path = self.path_for(&entry.id);
        if let Some(existing) = read_entry(&path)? {
            if existing.id != entry.id {
                return Err(Error::InvalidInput(format!(
                    "{} already holds transfer '{}', not '{}'",
                    path.display(),
                    existing.id,
                    entry.id
                )));
            }
        }

        let data = serde_json::to_vec(entry)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(&data)?;
        tmp.persist(&path).map_err(|e| e.error)?;
        Ok(())
    }

    /// Read the entry for `id`.
    ///
    /// A missing file, an unparseable file, or a record that belongs to a
    /// different id all read as `None`. Only unexpected I/O failures are errors.
    pub fn load(&self, id: &str) -> Result<Option<TransferEntry>> {
        let path = self.path_for(id);
        let Some(entry) = read_entry(&path)? else {
            return Ok(None);
        };

        if entry.id != id {
            warn!(
                requested = id,
                stored = %entry.id,
                path = %path.display(),
                "transfer file holds a different id"
            );
            return Ok(None);
        }
        Ok(Some(entry))
    }

    /// Remove the file for `id`. A missing file is not an error.
    pub fn delete(&self, id: &str) -> Result<()> {
        match fs::remove_file(self.path_for(id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Read every entry file in the directory.
    ///
    /// Corrupt or unreadable files, and files whose record belongs to a
    /// different id, are logged and skipped; one bad file never stops the
    /// rest of the scan. A missing directory is an empty store.
    pub fn scan(&self) -> Result<Vec<TransferEntry>> {
        let dir = match fs::read_dir(&self.dir) {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        for item in dir {
            let path = match item {
                Ok(item) => item.path(),
                Err(e) => {
                    warn!(dir = %self.dir.display(), "skipping unreadable directory entry: {e}");
                    continue;
                }
            };
            if !is_entry_file(&path) {
                continue;
            }

            match read_entry(&path) {
                Ok(Some(entry)) if self.path_for(&entry.id) != path => {
                    warn!(
                        path = %path.display(),
                        stored = %entry.id,
                        "skipping transfer file named for a different id"
                    );
                }
                Ok(Some(entry)) => entries.push(entry),
                Ok(None) => {}
                Err(e) => warn!(path = %path.display(), "skipping transfer file: {e}"),
            }
        }
        Ok(entries)
    }
}

/// File-name form of an id: `[A-Za-z0-9._-]` pass through, every other
/// byte (including `%`) becomes `%XX`. Distinct ids never share a name.
pub fn sanitize_id(id: &str) -> String {
    let mut out = String::with_capacity(id.len());
    for byte in id.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.') {
            out.push(char::from(byte));
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

fn is_entry_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with(FILE_PREFIX) && name.ends_with(FILE_SUFFIX))
}

/// Read and parse one entry file. Missing and corrupt files are `None`.
fn read_entry(path: &Path) -> Result<Option<TransferEntry>> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    match serde_json::from_slice::<TransferEntry>(&data) {
        Ok(entry) if !entry.id.is_empty() => Ok(Some(entry)),
        Ok(_) => {
            debug!(path = %path.display(), "ignoring transfer file with empty id");
            Ok(None)
        }
        Err(e) => {
            debug!(path = %path.display(), "ignoring corrupt transfer file: {e}");
            Ok(None)
        }
    }
}
