//! Lookup pipeline for `/{filename}/{hash}/{filename}` requests.
//!
//! A lookup is answered from the [`SymbolStore`] when possible. On a miss,
//! every not-yet-processed symbol package matching the file name is
//! downloaded and unpacked into the store, then the store is asked again.
//! There is never a second discovery round for the same lookup.

use crate::{
    models::{
        artifact::{ArtifactBytes, ArtifactDescriptor},
        symbol::{SymbolFile, SymbolId, has_symbol_extension},
    },
    services::{
        archive,
        manifest::CacheManifest,
        registry_client::{GitLabClient, PackageSource, RegistryError, RegistryErrors},
        symbol_store::{StorageError, StoredSymbol, SymbolStore},
    },
};
use futures::future::join_all;
use regex::Regex;
use std::{collections::HashSet, sync::Arc};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("registry unavailable: {0}")]
    Registry(#[from] RegistryErrors),
    #[error("symbol storage failed: {0}")]
    Storage(#[from] StorageError),
}

/// Why a lookup was turned away before touching the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    NameMismatch,
    NotASymbolFile,
    UnsafeName,
    InvalidHash,
    NotSupported,
}

/// Outcome of populating the cache from the registry.
#[derive(Debug, Default)]
struct Population {
    attempted: usize,
    downloaded: usize,
    failures: Vec<RegistryError>,
}

pub struct SymbolResolver<S = GitLabClient> {
    source: Arc<S>,
    store: SymbolStore,
    manifest: Arc<CacheManifest>,
    supported_names: Arc<[Regex]>,
}

impl<S> Clone for SymbolResolver<S> {
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
            store: self.store.clone(),
            manifest: self.manifest.clone(),
            supported_names: self.supported_names.clone(),
        }
    }
}

impl<S: PackageSource> SymbolResolver<S> {
    /// `supported_names` empty means every file name is served.
    pub fn new(
        source: S,
        store: SymbolStore,
        manifest: Arc<CacheManifest>,
        supported_names: Vec<Regex>,
    ) -> Self {
        Self {
            source: Arc::new(source),
            store,
            manifest,
            supported_names: supported_names.into(),
        }
    }

    #[cfg(test)]
    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn store(&self) -> &SymbolStore {
        &self.store
    }

    pub fn manifest(&self) -> &CacheManifest {
        &self.manifest
    }

    /// Check the request shape; returns the normalised identifier.
    pub fn validate(
        &self,
        filename: &str,
        hash: &str,
        filename2: &str,
    ) -> Result<SymbolId, Rejection> {
        if filename != filename2 {
            return Err(Rejection::NameMismatch);
        }
        if !has_symbol_extension(filename) {
            return Err(Rejection::NotASymbolFile);
        }
        if SymbolStore::ensure_filename_safe(filename).is_err() {
            return Err(Rejection::UnsafeName);
        }
        let id = SymbolId::parse_request(hash).ok_or(Rejection::InvalidHash)?;
        if !self.supported_names.is_empty()
            && !self.supported_names.iter().any(|re| re.is_match(filename))
        {
            return Err(Rejection::NotSupported);
        }
        Ok(id)
    }

    /// Resolve one lookup. `Ok(None)` is a plain "not found".
    pub async fn resolve(
        &self,
        filename: &str,
        hash: &str,
        filename2: &str,
    ) -> Result<Option<StoredSymbol>, ResolveError> {
        let id = match self.validate(filename, hash, filename2) {
            Ok(id) => id,
            Err(reason) => {
                info!(
                    filename,
                    filename2,
                    hash,
                    ?reason,
                    "ignoring unsupported symbol request"
                );
                return Ok(None);
            }
        };

        if let Some(found) = self.store.get(filename, &id).await? {
            debug!(filename, hash = %id, "served from cache");
            return Ok(Some(found));
        }

        info!(filename, hash = %id, "symbol not cached, searching registry");
        let population = self.populate(filename).await?;

        match self.store.get(filename, &id).await? {
            Some(found) => {
                info!(filename, hash = %id, "symbol found after cache population");
                Ok(Some(found))
            }
            None if population.attempted > 0 && population.downloaded == 0 => {
                Err(ResolveError::Registry(RegistryErrors(population.failures)))
            }
            None => {
                info!(filename, hash = %id, "symbol not found in registry");
                Ok(None)
            }
        }
    }

    /// Discover, download, unpack and store every unprocessed package for
    /// `filename`. Artifact buffers are dropped before this returns.
    async fn populate(&self, filename: &str) -> Result<Population, ResolveError> {
        let discovered = self.source.discover(filename).await?;
        let mut candidates = Vec::with_capacity(discovered.len());
        for descriptor in discovered {
            match descriptor.advertised_key() {
                Some(key) if self.manifest.is_known_artifact(&key).await => {
                    debug!(
                        package = %descriptor.package_name,
                        version = %descriptor.version,
                        "artifact already processed"
                    );
                }
                _ => candidates.push(descriptor),
            }
        }
        debug!(filename, count = candidates.len(), "symbol packages to download");

        let mut population = Population {
            attempted: candidates.len(),
            ..Population::default()
        };
        let artifacts = self.download_all(&candidates, &mut population).await;

        let mut processed = Vec::new();
        let mut files = Vec::new();
        let extracted =
            join_all(artifacts.iter().map(|a| archive::extract_symbol_files(a))).await;
        for (artifact, result) in artifacts.iter().zip(extracted) {
            match result {
                Ok(found) => {
                    processed.push(artifact.key().clone());
                    files.extend(found);
                }
                Err(err) => {
                    warn!(
                        package = %artifact.descriptor.package_name,
                        version = %artifact.descriptor.version,
                        error = %err,
                        "could not unpack symbol package"
                    );
                }
            }
        }
        drop(artifacts);

        let files = self.unstored(files).await?;
        self.store.put(&files).await?;
        self.manifest.mark_known(processed.iter().cloned()).await?;
        self.manifest
            .record_symbols(files.iter().map(SymbolFile::key))
            .await?;

        info!(
            filename,
            attempted = population.attempted,
            downloaded = population.downloaded,
            unpacked = processed.len(),
            stored = files.len(),
            "symbol cache populated"
        );
        Ok(population)
    }

    /// Download candidates concurrently, keeping only unseen content.
    async fn download_all(
        &self,
        candidates: &[ArtifactDescriptor],
        population: &mut Population,
    ) -> Vec<ArtifactBytes> {
        let results = join_all(candidates.iter().map(|d| self.source.download(d))).await;

        let mut seen = HashSet::new();
        let mut artifacts = Vec::new();
        for (descriptor, result) in candidates.iter().zip(results) {
            let artifact = match result {
                Ok(artifact) => artifact,
                Err(err) => {
                    warn!(
                        package = %descriptor.package_name,
                        version = %descriptor.version,
                        error = %err,
                        "symbol package download failed"
                    );
                    population.failures.push(err);
                    continue;
                }
            };
            population.downloaded += 1;

            if let Some(advertised) = descriptor.advertised_key() {
                if &advertised != artifact.key() {
                    warn!(
                        package = %descriptor.package_name,
                        version = %descriptor.version,
                        advertised = %advertised,
                        computed = %artifact.key(),
                        "registry checksum does not match downloaded content"
                    );
                }
            }
            if !seen.insert(artifact.key().clone())
                || self.manifest.is_known_artifact(artifact.key()).await
            {
                debug!(
                    package = %descriptor.package_name,
                    version = %descriptor.version,
                    "downloaded content already processed"
                );
                continue;
            }
            artifacts.push(artifact);
        }
        artifacts
    }

    /// Drop files that are already stored or repeated within the batch.
    async fn unstored(
        &self,
        files: Vec<SymbolFile>,
    ) -> Result<Vec<SymbolFile>, StorageError> {
        let mut seen = HashSet::new();
        let mut keep = Vec::with_capacity(files.len());
        for file in files {
            let key = file.key();
            if !seen.insert(key.clone()) {
                continue;
            }
            if self.manifest.is_known_symbol(&key).await
                && self.store.contains(&file.filename, &file.id).await?
            {
                continue;
            }
            keep.push(file);
        }
        Ok(keep)
    }
}
