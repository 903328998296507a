//! Durable key/record store with atomic replacement
//!
//! Each key maps to `<dir>/<key>.json`. A write serializes the record into a
//! temporary file in the same directory, flushes it to disk and renames it over
//! the target, so readers see either the previous record or the new one and
//! never a partially written file.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;

/// Format version written into every record
pub const RECORD_VERSION: u32 = 1;

/// A cached snapshot as stored on disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheRecord<T> {
    /// Record format version
    pub version: u32,
    /// When the snapshot was taken
    pub timestamp: DateTime<Utc>,
    /// The cached payload
    pub data: T,
}

impl<T> CacheRecord<T> {
    /// Creates a record stamped with the current time
    pub fn new(data: T) -> Self {
        Self::at(data, Utc::now())
    }

    /// Creates a record with an explicit timestamp
    pub fn at(data: T, timestamp: DateTime<Utc>) -> Self {
        Self {
            version: RECORD_VERSION,
            timestamp,
            data,
        }
    }
}

/// Version probe read before the full record
#[derive(Deserialize)]
struct RecordHeader {
    version: u32,
}

/// Errors that can occur when reading or writing the cache
#[derive(Debug, Error)]
pub enum CacheError {
    /// No record has been written for this key
    #[error("no cache record for key '{0}'")]
    NotFound(String),

    /// Keys become file names, so only `[A-Za-z0-9_-]` is accepted
    #[error("invalid cache key '{0}'")]
    InvalidKey(String),

    /// Filesystem failure
    #[error("cache I/O error: {0}")]
    Io(#[from] io::Error),

    /// The record could not be serialized
    #[error("failed to serialize cache record: {0}")]
    Serialize(#[source] serde_json::Error),

    /// The file exists but is not a valid record
    #[error("cache record '{key}' is corrupt: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// The record was written by an incompatible format version
    #[error("cache record '{key}' has unsupported version {version}")]
    UnsupportedVersion { key: String, version: u32 },
}

/// A record serialized to a temporary file, not yet visible to readers
///
/// Dropping it without calling [`StagedWrite::commit`] discards the temporary
/// file and leaves the current record untouched.
#[derive(Debug)]
pub struct StagedWrite {
    file: NamedTempFile,
    target: PathBuf,
}

impl StagedWrite {
    /// Atomically replaces the target record with the staged one
    pub fn commit(self) -> Result<(), CacheError> {
        self.file
            .persist(&self.target)
            .map_err(|e| CacheError::Io(e.error))?;
        Ok(())
    }
}

/// File-backed record store rooted at one directory
#[derive(Debug, Clone)]
pub struct CacheStore {
    /// Directory where record files are stored
    dir: PathBuf,
}

impl CacheStore {
    /// Creates a store rooted at `dir`; the directory is created on first write
    pub fn with_dir(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the path of the record file for a key
    pub fn record_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    fn check_key(key: &str) -> Result<(), CacheError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if valid {
            Ok(())
        } else {
            Err(CacheError::InvalidKey(key.to_string()))
        }
    }

    /// Serializes a record into a temporary file next to its target
    pub fn stage<T: Serialize>(
        &self,
        key: &str,
        record: &CacheRecord<T>,
    ) -> Result<StagedWrite, CacheError> {
        Self::check_key(key)?;
        fs::create_dir_all(&self.dir)?;

        let json = serde_json::to_vec_pretty(record).map_err(CacheError::Serialize)?;

        let mut file = tempfile::Builder::new()
            .prefix(&format!(".{}.", key))
            .suffix(".tmp")
            .tempfile_in(&self.dir)?;
        file.write_all(&json)?;
        file.as_file().sync_all()?;

        Ok(StagedWrite {
            file,
            target: self.record_path(key),
        })
    }

    /// Writes a record, replacing any previous one atomically
    pub fn write<T: Serialize>(&self, key: &str, record: &CacheRecord<T>) -> Result<(), CacheError> {
        self.stage(key, record)?.commit()
    }

    /// Reads the record for a key
    ///
    /// # Returns
    /// * `Ok(CacheRecord<T>)` - the last committed record
    /// * `Err(CacheError::NotFound)` - nothing was ever committed for this key
    /// * `Err(..)` - the file is unreadable, corrupt or of another version
    pub fn read<T: DeserializeOwned>(&self, key: &str) -> Result<CacheRecord<T>, CacheError> {
        Self::check_key(key)?;

        let content = match fs::read(self.record_path(key)) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(CacheError::NotFound(key.to_string()))
            }
            Err(e) => return Err(CacheError::Io(e)),
        };

        let corrupt = |source| CacheError::Corrupt {
            key: key.to_string(),
            source,
        };

        let header: RecordHeader = serde_json::from_slice(&content).map_err(corrupt)?;
        if header.version != RECORD_VERSION {
            return Err(CacheError::UnsupportedVersion {
                key: key.to_string(),
                version: header.version,
            });
        }

        serde_json::from_slice(&content).map_err(corrupt)
    }
}
