//! File stores used by save/restore test bodies to verify configuration files.
//!
//! The device uploads configuration to a remote location identified by
//! [`FileStore::url`]; test bodies then read and remove the file through the
//! same store. Protocol clients plug in behind the trait.

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::config::{StoreConfig, StoreKind};
use crate::core::errors::{Result, ShtError};

/// URL of the in-memory store when none is configured.
pub const DEFAULT_MEMORY_URL: &str = "memory://shell-tests";

/// Named-file storage reachable by both the device and the harness.
pub trait FileStore: Send + Sync {
    /// Location handed to the device as the save folder.
    fn url(&self) -> String;
    fn get_file(&self, name: &str) -> Result<Vec<u8>>;
    fn put_file(&self, name: &str, contents: &[u8]) -> Result<()>;
    fn delete_file(&self, name: &str) -> Result<()>;
    fn list_files(&self) -> Result<Vec<String>>;
}

/// Resolve the bare file name from a path or URL handed back by a device.
#[must_use]
pub fn file_name_of(location: &str) -> &str {
    location
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(location)
}

/// Build the store described by the `[store]` section.
pub fn open_store(config: &StoreConfig) -> Result<Arc<dyn FileStore>> {
    match config.kind {
        StoreKind::Memory => Ok(Arc::new(MemoryStore::new(
            config.url.clone().unwrap_or_else(|| DEFAULT_MEMORY_URL.to_string()),
        ))),
        StoreKind::Local => {
            let root = config.path.clone().ok_or_else(|| ShtError::InvalidConfig {
                details: "store.path is required when store.kind = \"local\"".to_string(),
            })?;
            Ok(Arc::new(LocalDirStore::open(root, config.url.clone())?))
        }
    }
}

/// Directory-backed store (e.g. a TFTP root or a mounted share).
#[derive(Debug, Clone)]
pub struct LocalDirStore {
    root: PathBuf,
    url: String,
}

impl LocalDirStore {
    pub fn open(root: impl Into<PathBuf>, url: Option<String>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| ShtError::io(&root, source))?;
        let url = url.unwrap_or_else(|| format!("file://{}", root.display()));
        Ok(Self { root, url })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, name: &str) -> Result<PathBuf> {
        let name = file_name_of(name);
        if name.is_empty() || name == "." || name == ".." {
            return Err(ShtError::Transport {
                location: self.url.clone(),
                details: format!("invalid file name {name:?}"),
            });
        }
        Ok(self.root.join(name))
    }
}

impl FileStore for LocalDirStore {
    fn url(&self) -> String {
        self.url.clone()
    }

    fn get_file(&self, name: &str) -> Result<Vec<u8>> {
        let path = self.path_for(name)?;
        fs::read(&path).map_err(|source| ShtError::io(&path, source))
    }

    fn put_file(&self, name: &str, contents: &[u8]) -> Result<()> {
        let path = self.path_for(name)?;
        fs::write(&path, contents).map_err(|source| ShtError::io(&path, source))
    }

    fn delete_file(&self, name: &str) -> Result<()> {
        let path = self.path_for(name)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Err(ShtError::Transport {
                location: self.url.clone(),
                details: format!("file {} not found", file_name_of(name)),
            }),
            Err(source) => Err(ShtError::io(&path, source)),
        }
    }

    fn list_files(&self) -> Result<Vec<String>> {
        let entries = fs::read_dir(&self.root).map_err(|source| ShtError::io(&self.root, source))?;
        let mut names: Vec<String> = entries
            .filter_map(std::result::Result::ok)
            .filter(|entry| entry.file_type().is_ok_and(|t| t.is_file()))
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        Ok(names)
    }
}

/// In-memory store for dry runs and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    url: String,
    files: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            files: Mutex::new(BTreeMap::new()),
        }
    }
}

impl FileStore for MemoryStore {
    fn url(&self) -> String {
        self.url.clone()
    }

    fn get_file(&self, name: &str) -> Result<Vec<u8>> {
        self.files
            .lock()
            .get(file_name_of(name))
            .cloned()
            .ok_or_else(|| ShtError::Transport {
                location: self.url.clone(),
                details: format!("file {} not found", file_name_of(name)),
            })
    }

    fn put_file(&self, name: &str, contents: &[u8]) -> Result<()> {
        self.files
            .lock()
            .insert(file_name_of(name).to_string(), contents.to_vec());
        Ok(())
    }

    fn delete_file(&self, name: &str) -> Result<()> {
        self.files
            .lock()
            .remove(file_name_of(name))
            .map(|_| ())
            .ok_or_else(|| ShtError::Transport {
                location: self.url.clone(),
                details: format!("file {} not found", file_name_of(name)),
            })
    }

    fn list_files(&self) -> Result<Vec<String>> {
        Ok(self.files.lock().keys().cloned().collect())
    }
}
