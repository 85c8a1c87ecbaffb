//! # Entity Store
//!
//! A keyed, in-memory map of entities mirrored to one pretty-printed JSON file
//! per entity.
//!
//! ## Invariants
//!
//! 1. A key's file is written (or deleted) while that key's map entry is
//!    locked, so a reader never sees the map ahead of the disk.
//! 2. File names are the escaped key plus `.json`. The escape is reversible,
//!    so two keys never share a file; after `replace_all` or `reload` the
//!    directory holds exactly one file per stored key.
//! 3. Writes go through a temporary file and a rename.

use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;
use std::path::PathBuf;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use serde::de::DeserializeOwned;

#[derive(Debug)]
pub enum Error {
    Io { path: PathBuf, source: io::Error },
    Json { path: PathBuf, source: serde_json::Error },
    /// A legacy file exists but lacks the expected array field.
    MissingField { path: PathBuf, field: String },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, source } => write!(f, "{}: {}", path.display(), source),
            Self::Json { path, source } => write!(f, "{}: invalid json: {}", path.display(), source),
            Self::MissingField { path, field } => {
                write!(f, "{}: missing array field '{}'", path.display(), field)
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Json { source, .. } => Some(source),
            Self::MissingField { .. } => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> Error + '_ {
    move |source| Error::Io { path: path.to_path_buf(), source }
}

fn json_err(path: &Path) -> impl FnOnce(serde_json::Error) -> Error + '_ {
    move |source| Error::Json { path: path.to_path_buf(), source }
}

/// Maps a key to a file stem that is safe on every platform.
///
/// Bytes outside `[A-Za-z0-9._-]`, `%` itself and a leading `.` are written as
/// `%XX`, so distinct keys always get distinct files. The empty key is `%`.
pub fn sanitize(key: &str) -> String {
    if key.is_empty() {
        return "%".to_string();
    }
    let mut stem = String::with_capacity(key.len());
    for (i, byte) in key.bytes().enumerate() {
        let plain = byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' || (byte == b'.' && i > 0);
        if plain {
            stem.push(char::from(byte));
        } else {
            stem.push_str(&format!("%{:02X}", byte));
        }
    }
    stem
}

pub struct EntityStore<T> {
    directory: PathBuf,
    entries: DashMap<String, T>,
    key: fn(&T) -> String,
}

impl<T> EntityStore<T>
where
    T: Serialize + DeserializeOwned + Clone,
{
    /// Opens `directory`, creating it if needed, and loads every entity in it.
    pub fn open(directory: impl Into<PathBuf>, key: fn(&T) -> String) -> Result<Self> {
        let directory = directory.into();
        fs::create_dir_all(&directory).map_err(io_err(&directory))?;
        let store = Self { directory, entries: DashMap::new(), key };
        store.load()?;
        Ok(store)
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn file_of(&self, key: &str) -> PathBuf {
        self.directory.join(format!("{}.json", sanitize(key)))
    }

    pub fn get(&self, key: &str) -> Option<T> {
        self.entries.get(key).map(|e| e.value().clone())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn all(&self) -> Vec<T> {
        self.entries.iter().map(|e| e.value().clone()).collect()
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Inserts or replaces the entity under its key.
    pub fn put(&self, entity: T) -> Result<()> {
        let key = (self.key)(&entity);
        let path = self.file_of(&key);
        let slot = self.entries.entry(key);
        write_json(&path, &entity)?;
        slot.insert(entity);
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Result<Option<T>> {
        let path = self.file_of(key);
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(slot) => {
                delete_file(&path)?;
                Ok(Some(slot.remove()))
            }
            Entry::Vacant(_) => {
                delete_file(&path)?;
                Ok(None)
            }
        }
    }

    /// Makes the store hold exactly `entities`, deleting every other file.
    pub fn replace_all(&self, entities: Vec<T>) -> Result<()> {
        let keep: HashSet<String> = entities.iter().map(|e| (self.key)(e)).collect();
        for entity in entities {
            self.put(entity)?;
        }
        for key in self.keys() {
            if !keep.contains(&key) {
                self.remove(&key)?;
            }
        }
        self.delete_stale_files()
    }

    /// Drops the in-memory state and reads the directory again.
    pub fn reload(&self) -> Result<()> {
        self.entries.clear();
        self.load()
    }

    /// Folds a legacy single-file layout, `{ "<field>": [ ... ] }`, into the
    /// store and deletes it. Returns the number of migrated entities.
    pub fn migrate_legacy(&self, file: &Path, field: &str) -> Result<usize> {
        if !file.exists() {
            return Ok(0);
        }
        let text = fs::read_to_string(file).map_err(io_err(file))?;
        let mut document: serde_json::Value = serde_json::from_str(&text).map_err(json_err(file))?;
        let array = document
            .get_mut(field)
            .map(serde_json::Value::take)
            .ok_or_else(|| Error::MissingField { path: file.to_path_buf(), field: field.to_string() })?;
        let entities: Vec<T> = serde_json::from_value(array).map_err(json_err(file))?;

        let count = entities.len();
        for entity in entities {
            self.put(entity)?;
        }
        delete_file(file)?;
        tracing::info!(file = %file.display(), count, "migrated legacy entity file");
        Ok(count)
    }

    fn load(&self) -> Result<()> {
        for path in self.json_files()? {
            let text = fs::read_to_string(&path).map_err(io_err(&path))?;
            let entity: T = match serde_json::from_str(&text) {
                Ok(entity) => entity,
                Err(e) => {
                    tracing::warn!(file = %path.display(), error = %e, "skipping unreadable entity file");
                    continue;
                }
            };
            let key = (self.key)(&entity);
            let expected = self.file_of(&key);
            if path != expected {
                // the entity was renamed since the file was written
                fs::rename(&path, &expected).map_err(io_err(&path))?;
            }
            self.entries.insert(key, entity);
        }
        Ok(())
    }

    fn delete_stale_files(&self) -> Result<()> {
        let known: HashSet<PathBuf> = self.keys().iter().map(|k| self.file_of(k)).collect();
        for path in self.json_files()? {
            if !known.contains(&path) {
                tracing::debug!(file = %path.display(), "deleting stale entity file");
                delete_file(&path)?;
            }
        }
        Ok(())
    }

    fn json_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.directory).map_err(io_err(&self.directory))? {
            let path = entry.map_err(io_err(&self.directory))?.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).map_err(json_err(path))?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, text).map_err(io_err(&tmp))?;
    fs::rename(&tmp, path).map_err(io_err(path))
}

fn delete_file(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(Error::Io { path: path.to_path_buf(), source }),
    }
}

impl<T> fmt::Debug for EntityStore<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityStore")
            .field("directory", &self.directory)
            .field("entries", &self.entries.len())
            .finish()
    }
}
