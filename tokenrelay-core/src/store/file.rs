//! JSON file-backed secret storage.
//!
//! Entries live in a single JSON document. Every mutation rewrites the
//! document to a sibling temp file and renames it over the original, so a
//! crash mid-write leaves either the old or the new document on disk.
//!
//! # Storage Location
//!
//! Defaults to `credentials.json` in the platform data directory
//! (`~/.local/share/tokenrelay` on Linux).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use super::{Secret, SecretStore, StoreError};

const FILE_NAME: &str = "credentials.json";

/// On-disk document format.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct FileStoreData {
    /// Format version (for future migrations).
    version: u32,

    /// Time of the last successful write.
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,

    entries: BTreeMap<String, Secret>,
}

impl Default for FileStoreData {
    fn default() -> Self {
        Self {
            version: 1,
            updated_at: None,
            entries: BTreeMap::new(),
        }
    }
}

/// Secret store persisted to a JSON file.
///
/// The whole document is cached in memory; reads never touch the disk.
pub struct FileStore {
    path: PathBuf,
    data: Mutex<FileStoreData>,
}

impl FileStore {
    /// Default location of the credentials file.
    pub fn default_path() -> Result<PathBuf, StoreError> {
        let dirs = directories::ProjectDirs::from("com", "raibid-labs", "tokenrelay")
            .ok_or(StoreError::DataDirUnavailable)?;
        Ok(dirs.data_dir().join(FILE_NAME))
    }

    /// Open the store at `path`, creating parent directories as needed.
    ///
    /// A missing file is an empty store; it is created on the first write.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let data = if path.exists() {
            let contents = fs::read_to_string(&path)?;
            serde_json::from_str(&contents)?
        } else {
            FileStoreData::default()
        };

        Ok(Self {
            path,
            data: Mutex::new(data),
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// When the file was last written by this process or a previous one.
    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.data.lock().updated_at
    }

    /// Apply `mutate` and persist. The in-memory copy only changes if the
    /// write succeeded.
    fn update<F>(&self, mutate: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut FileStoreData),
    {
        let mut data = self.data.lock();
        let mut next = data.clone();
        mutate(&mut next);
        next.updated_at = Some(Utc::now());
        write_atomically(&self.path, &next)?;
        *data = next;
        Ok(())
    }
}

/// Write to a sibling temp file readable only by the owner, then rename it
/// over `path`.
fn write_atomically(path: &Path, data: &FileStoreData) -> Result<(), StoreError> {
    let contents = serde_json::to_string_pretty(data)?;
    let tmp = path.with_extension("json.tmp");
    if tmp.exists() {
        // Left by an interrupted write; recreate it with our permissions.
        fs::remove_file(&tmp)?;
    }

    let mut file = private_file_options().open(&tmp)?;
    file.write_all(contents.as_bytes())?;
    file.sync_all()?;
    drop(file);

    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(unix)]
fn private_file_options() -> OpenOptions {
    use std::os::unix::fs::OpenOptionsExt;

    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true).mode(0o600);
    options
}

#[cfg(not(unix))]
fn private_file_options() -> OpenOptions {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    options
}

impl std::fmt::Debug for FileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStore")
            .field("path", &self.path)
            .field("keys_count", &self.data.lock().entries.len())
            .finish()
    }
}

#[async_trait]
impl SecretStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<Secret>, StoreError> {
        Ok(self.data.lock().entries.get(key).cloned())
    }

    async fn set(&self, key: &str, secret: &Secret) -> Result<(), StoreError> {
        self.update(|data| {
            data.entries.insert(key.to_string(), secret.clone());
        })
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        if !self.data.lock().entries.contains_key(key) {
            return Ok(());
        }
        self.update(|data| {
            data.entries.remove(key);
        })
    }
}
