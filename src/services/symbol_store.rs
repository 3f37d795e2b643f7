//! On-disk symbol storage.
//!
//! Files live under `root/{filename}/{identifier}/{filename}` so that files
//! sharing a name but built differently never collide. Writes go to a
//! uniquely named temp file in the target directory and are renamed into
//! place, so a concurrent reader sees either the old file or the new one.
//! The cache manifest is stored beside the symbol tree as
//! `root/cacheManifest.json`.

use crate::models::symbol::{SymbolFile, SymbolId};
use serde::{Serialize, de::DeserializeOwned};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::{debug, info};
use uuid::Uuid;

/// Name of the manifest file under the cache root.
pub const MANIFEST_FILE: &str = "cacheManifest.json";

const MAX_FILENAME_LEN: usize = 255;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid symbol key `{0}`")]
    InvalidKey(String),
    #[error("manifest is not valid JSON: {0}")]
    Manifest(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// A stored symbol file opened for streaming.
#[derive(Debug)]
pub struct StoredSymbol {
    pub file: File,
    pub size: u64,
}

#[derive(Clone, Debug)]
pub struct SymbolStore {
    root: PathBuf,
}

impl SymbolStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the root directory if it does not exist yet.
    pub async fn ensure_root(&self) -> StorageResult<()> {
        fs::create_dir_all(&self.root).await?;
        Ok(())
    }

    /// Reject file names that could escape the store or alias another key.
    pub fn ensure_filename_safe(filename: &str) -> StorageResult<()> {
        let invalid = filename.is_empty()
            || filename.len() > MAX_FILENAME_LEN
            || filename == "."
            || filename == ".."
            || filename.starts_with(".tmp-")
            || filename.eq_ignore_ascii_case(MANIFEST_FILE)
            || filename
                .chars()
                .any(|c| c == '/' || c == '\\' || c.is_control());
        if invalid {
            return Err(StorageError::InvalidKey(filename.to_string()));
        }
        Ok(())
    }

    fn symbol_path(&self, filename: &str, id: &SymbolId) -> StorageResult<PathBuf> {
        Self::ensure_filename_safe(filename)?;
        // SymbolId only ever holds ASCII alphanumerics
        Ok(self.root.join(filename).join(id.as_str()).join(filename))
    }

    /// Open the stored file for `(filename, id)`, if present.
    pub async fn get(&self, filename: &str, id: &SymbolId) -> StorageResult<Option<StoredSymbol>> {
        let path = self.symbol_path(filename, id)?;
        let file = match File::open(&path).await {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(StorageError::Io(err)),
        };
        let metadata = file.metadata().await?;
        if !metadata.is_file() {
            return Ok(None);
        }
        Ok(Some(StoredSymbol {
            file,
            size: metadata.len(),
        }))
    }

    /// True if a file is stored for `(filename, id)`.
    pub async fn contains(&self, filename: &str, id: &SymbolId) -> StorageResult<bool> {
        let path = self.symbol_path(filename, id)?;
        match fs::metadata(&path).await {
            Ok(metadata) => Ok(metadata.is_file()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(StorageError::Io(err)),
        }
    }

    /// Store every file. Not transactional across files; a file that is
    /// already present is overwritten with the new bytes.
    pub async fn put(&self, files: &[SymbolFile]) -> StorageResult<()> {
        for file in files {
            let path = self.symbol_path(&file.filename, &file.id)?;
            self.write_atomic(&path, &file.bytes).await?;
            debug!(
                filename = %file.filename,
                id = %file.id,
                size = file.bytes.len(),
                "stored symbol file"
            );
        }
        Ok(())
    }

    /// Remove everything under the root, then recreate it empty.
    pub async fn clear(&self) -> StorageResult<()> {
        match fs::remove_dir_all(&self.root).await {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(StorageError::Io(err)),
        }
        fs::create_dir_all(&self.root).await?;
        info!(root = %self.root.display(), "symbol store cleared");
        Ok(())
    }

    /// Load the persisted manifest; `None` when none has been written yet.
    pub async fn read_manifest<T: DeserializeOwned>(&self) -> StorageResult<Option<T>> {
        let path = self.root.join(MANIFEST_FILE);
        let raw = match fs::read(&path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(StorageError::Io(err)),
        };
        Ok(Some(serde_json::from_slice(&raw)?))
    }

    /// Persist the manifest, replacing the previous one atomically.
    pub async fn write_manifest<T: Serialize>(&self, manifest: &T) -> StorageResult<()> {
        let body = serde_json::to_vec_pretty(manifest)?;
        self.write_atomic(&self.root.join(MANIFEST_FILE), &body).await
    }

    /// Write/read/delete a scratch file under the root.
    pub async fn check_writable(&self) -> Result<(), String> {
        let path = self.root.join(format!(".readyz-{}", Uuid::new_v4()));
        fs::write(&path, b"readyz")
            .await
            .map_err(|err| format!("could not write check file: {err}"))?;
        let read = fs::read(&path).await;
        let removed = fs::remove_file(&path).await;
        match read {
            Ok(bytes) if bytes == b"readyz" => {}
            Ok(_) => return Err("check file content mismatch".into()),
            Err(err) => return Err(format!("could not read check file: {err}")),
        }
        removed.map_err(|err| format!("could not remove check file: {err}"))
    }

    /// Write `bytes` to a temp file next to `path`, fsync, then rename over it.
    async fn write_atomic(&self, path: &Path, bytes: &[u8]) -> StorageResult<()> {
        let parent = path.parent().map(Path::to_path_buf).ok_or_else(|| {
            StorageError::Io(io::Error::new(ErrorKind::Other, "path has no parent directory"))
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));

        let written = async {
            let mut file = File::create(&tmp_path).await?;
            file.write_all(bytes).await?;
            file.flush().await?;
            file.sync_all().await?;
            fs::rename(&tmp_path, path).await
        }
        .await;

        if let Err(err) = written {
            let _ = fs::remove_file(&tmp_path).await;
            self.prune_empty_dirs(&parent).await;
            return Err(StorageError::Io(err));
        }
        Ok(())
    }

    /// Remove empty directories from `start` upward, stopping at the root.
    async fn prune_empty_dirs(&self, start: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(&self.root) && current != self.root {
            match fs::remove_dir(&current).await {
                Ok(()) => match current.parent() {
                    Some(parent) => current = parent.to_path_buf(),
                    None => break,
                },
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}
