use fs2::FileExt;
use log::warn;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::schedule::BroadcastWindow;

/// Filename → broadcast window, the whole metadata document
pub type Playlist = BTreeMap<String, BroadcastWindow>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error on metadata file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize metadata: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Metadata lock poisoned")]
    Poisoned,
}

/// File-backed metadata store
///
/// Reads never fail: a missing or malformed document is an empty playlist.
/// Writes are whole-document read-modify-write, serialized by an in-process
/// mutex and an exclusive lock on `<document>.lock` so another process
/// sharing the same media directory cannot interleave with us.
#[derive(Debug)]
pub struct MetadataStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl MetadataStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sibling file holding the cross-process write lock
    pub fn lock_path(&self) -> PathBuf {
        lock_path_for(&self.path)
    }

    /// Load the whole playlist
    pub fn load(&self) -> Playlist {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Playlist::new(),
            Err(e) => {
                warn!(
                    "Failed to read metadata file '{}': {}, treating as empty",
                    self.path.display(),
                    e
                );
                return Playlist::new();
            }
        };

        match serde_json::from_str(&content) {
            Ok(playlist) => playlist,
            Err(e) => {
                warn!(
                    "Malformed metadata file '{}': {}, treating as empty",
                    self.path.display(),
                    e
                );
                Playlist::new()
            }
        }
    }

    /// Replace the whole document
    pub fn save(&self, playlist: &Playlist) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().map_err(|_| StoreError::Poisoned)?;
        let _file_lock = self.lock_file()?;
        self.write_document(playlist)
    }

    /// Insert or replace the window for `track`
    pub fn upsert(&self, track: &str, window: BroadcastWindow) -> Result<(), StoreError> {
        self.update(|playlist| {
            playlist.insert(track.to_string(), window);
            true
        })
        .map(|_| ())
    }

    /// Remove the entry for `track`, returns whether it existed
    ///
    /// The document is only rewritten when something was removed.
    pub fn remove(&self, track: &str) -> Result<bool, StoreError> {
        self.update(|playlist| playlist.remove(track).is_some())
    }

    fn update<F>(&self, modify: F) -> Result<bool, StoreError>
    where
        F: FnOnce(&mut Playlist) -> bool,
    {
        let _guard = self.write_lock.lock().map_err(|_| StoreError::Poisoned)?;
        let _file_lock = self.lock_file()?;

        let mut playlist = self.load();
        let changed = modify(&mut playlist);
        if changed {
            self.write_document(&playlist)?;
        }
        Ok(changed)
    }

    /// Acquire the cross-process lock; released when the returned file drops
    fn lock_file(&self) -> Result<File, StoreError> {
        let lock_path = self.lock_path();
        let file = File::create(&lock_path).map_err(|source| StoreError::Io {
            path: lock_path.clone(),
            source,
        })?;
        file.lock_exclusive().map_err(|source| StoreError::Io {
            path: lock_path,
            source,
        })?;
        Ok(file)
    }

    /// Write via a temp file in the same directory and rename over the
    /// document, so readers see either the old or the new version.
    fn write_document(&self, playlist: &Playlist) -> Result<(), StoreError> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let io_err = |source: std::io::Error| StoreError::Io {
            path: self.path.clone(),
            source,
        };

        let json = to_pretty_json(playlist)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(io_err)?;
        tmp.write_all(json.as_bytes()).map_err(io_err)?;
        tmp.flush().map_err(io_err)?;
        tmp.persist(&self.path).map_err(|e| io_err(e.error))?;
        Ok(())
    }
}

fn lock_path_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".lock");
    PathBuf::from(name)
}

/// JSON with 4-space indentation, matching the document layout clients expect
fn to_pretty_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value.serialize(&mut ser)?;
    // serde_json only ever emits valid UTF-8
    Ok(String::from_utf8_lossy(&buf).into_owned())
}
