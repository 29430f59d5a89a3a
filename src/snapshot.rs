//! Ordered sources of raw feed snapshots.
//!
//! A snapshot is one capture of the realtime feed. Sources yield one
//! `Result` per snapshot so the converter can skip a broken capture and
//! keep going; only failing to open the source itself is fatal.

use std::fs::{self, File};
use std::io::{Cursor, Read, Seek};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tracing::debug;
use zip::ZipArchive;
use zip::result::ZipError;

use crate::error::PipelineError;

/// One feed capture: where it came from and its protobuf payload.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub name: String,
    pub payload: Bytes,
}

/// Reads `member` out of a snapshot archive.
fn read_member<R: Read + Seek>(
    reader: R,
    name: &str,
    member: &str,
) -> Result<Bytes, PipelineError> {
    let archive_err = |source| PipelineError::Archive {
        name: name.to_string(),
        source,
    };

    let mut archive = ZipArchive::new(reader).map_err(archive_err)?;
    let mut file = match archive.by_name(member) {
        Ok(file) => file,
        Err(ZipError::FileNotFound) => {
            return Err(PipelineError::MissingArchiveMember {
                snapshot: name.to_string(),
                member: member.to_string(),
            });
        }
        Err(e) => return Err(archive_err(e)),
    };

    // header sizes are untrusted; let the buffer grow as bytes arrive
    let mut payload = Vec::new();
    file.read_to_end(&mut payload)
        .map_err(|e| archive_err(ZipError::Io(e)))?;
    Ok(Bytes::from(payload))
}

/// A day archive whose entries are themselves snapshot archives.
pub struct NestedZipSnapshots {
    path: PathBuf,
    archive: ZipArchive<File>,
    member: String,
    next_index: usize,
}

impl NestedZipSnapshots {
    /// Opens the outer archive.
    ///
    /// # Errors
    ///
    /// [`PipelineError::MissingData`] if the archive does not exist; an
    /// archive error if it is not a readable zip.
    pub fn open(path: &Path, member: &str) -> Result<Self, PipelineError> {
        if !path.exists() {
            return Err(PipelineError::missing("realtime archive", path));
        }
        let file = File::open(path).map_err(|e| PipelineError::io(path, e))?;
        let archive = ZipArchive::new(file).map_err(|source| PipelineError::Archive {
            name: path.display().to_string(),
            source,
        })?;

        Ok(Self {
            path: path.to_path_buf(),
            archive,
            member: member.to_string(),
            next_index: 0,
        })
    }

    /// Number of entries in the outer archive.
    pub fn len(&self) -> usize {
        self.archive.len()
    }

    pub fn is_empty(&self) -> bool {
        self.archive.len() == 0
    }

    fn read_entry(&mut self, index: usize) -> Option<Result<Snapshot, PipelineError>> {
        let mut entry = match self.archive.by_index(index) {
            Ok(entry) => entry,
            Err(source) => {
                return Some(Err(PipelineError::Archive {
                    name: format!("{}#{}", self.path.display(), index),
                    source,
                }));
            }
        };
        if entry.is_dir() {
            return None;
        }

        let name = entry.name().to_string();
        let mut inner = Vec::new();
        if let Err(e) = entry.read_to_end(&mut inner) {
            return Some(Err(PipelineError::Archive {
                name,
                source: ZipError::Io(e),
            }));
        }
        drop(entry);

        let payload = read_member(Cursor::new(inner), &name, &self.member);
        Some(payload.map(|payload| Snapshot { name, payload }))
    }
}

impl Iterator for NestedZipSnapshots {
    type Item = Result<Snapshot, PipelineError>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.next_index < self.archive.len() {
            let index = self.next_index;
            self.next_index += 1;
            if let Some(item) = self.read_entry(index) {
                return Some(item);
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.archive.len() - self.next_index;
        (0, Some(remaining))
    }
}

/// A directory of snapshot archives (`*.zip`) and/or raw payloads (`*.bin`),
/// visited in file-name order.
pub struct DirectorySnapshots {
    paths: std::vec::IntoIter<PathBuf>,
    member: String,
}

impl DirectorySnapshots {
    pub fn open(dir: &Path, member: &str) -> Result<Self, PipelineError> {
        if !dir.is_dir() {
            return Err(PipelineError::missing("snapshot directory", dir));
        }

        let mut paths = Vec::new();
        for entry in fs::read_dir(dir).map_err(|e| PipelineError::io(dir, e))? {
            let path = entry.map_err(|e| PipelineError::io(dir, e))?.path();
            match path.extension().and_then(|e| e.to_str()) {
                Some("zip") | Some("bin") => paths.push(path),
                _ => debug!(path = %path.display(), "Not a snapshot file, ignoring"),
            }
        }
        paths.sort();

        Ok(Self {
            paths: paths.into_iter(),
            member: member.to_string(),
        })
    }

    /// Snapshot files not yet visited.
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.len() == 0
    }

    fn read(&self, path: &Path) -> Result<Snapshot, PipelineError> {
        let name = path.display().to_string();
        let payload = if path.extension().and_then(|e| e.to_str()) == Some("zip") {
            let file = File::open(path).map_err(|e| PipelineError::io(path, e))?;
            read_member(file, &name, &self.member)?
        } else {
            Bytes::from(fs::read(path).map_err(|e| PipelineError::io(path, e))?)
        };
        Ok(Snapshot { name, payload })
    }
}

impl Iterator for DirectorySnapshots {
    type Item = Result<Snapshot, PipelineError>;

    fn next(&mut self) -> Option<Self::Item> {
        let path = self.paths.next()?;
        Some(self.read(&path))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.paths.size_hint()
    }
}
