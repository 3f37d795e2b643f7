//! Cache manifest: which artifacts have already been unpacked and which
//! symbol files have already been stored.
//!
//! State is held behind one `RwLock`. Readers proceed concurrently; every
//! mutation builds the next state on a copy, persists it through the
//! [`SymbolStore`], and only then publishes it, all while holding the write
//! lock. A reader therefore sees either the old or the new state, and a
//! failed write leaves the in-memory state untouched.

use crate::{
    models::artifact::ArtifactKey,
    services::symbol_store::{StorageResult, SymbolStore},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Persisted manifest document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestState {
    #[serde(default)]
    pub known_artifacts: BTreeSet<ArtifactKey>,
    /// `"{filename}/{identifier}"` keys.
    #[serde(default)]
    pub known_symbols: BTreeSet<String>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct CacheManifest {
    store: SymbolStore,
    state: RwLock<ManifestState>,
}

impl CacheManifest {
    /// Load the manifest persisted in `store`, or start empty.
    pub async fn load(store: SymbolStore) -> StorageResult<Self> {
        let state: ManifestState = store.read_manifest().await?.unwrap_or_default();
        info!(
            artifacts = state.known_artifacts.len(),
            symbols = state.known_symbols.len(),
            "cache manifest loaded"
        );
        Ok(Self {
            store,
            state: RwLock::new(state),
        })
    }

    pub async fn is_known_artifact(&self, key: &ArtifactKey) -> bool {
        self.state.read().await.known_artifacts.contains(key)
    }

    pub async fn is_known_symbol(&self, key: &str) -> bool {
        self.state.read().await.known_symbols.contains(key)
    }

    /// Record artifacts as processed. Persisted before returning.
    pub async fn mark_known<I>(&self, keys: I) -> StorageResult<()>
    where
        I: IntoIterator<Item = ArtifactKey>,
    {
        self.update(|state| {
            let mut changed = false;
            for key in keys {
                changed |= state.known_artifacts.insert(key);
            }
            changed
        })
        .await
    }

    /// Record symbol keys as stored. Persisted before returning.
    pub async fn record_symbols<I>(&self, keys: I) -> StorageResult<()>
    where
        I: IntoIterator<Item = String>,
    {
        self.update(|state| {
            let mut changed = false;
            for key in keys {
                changed |= state.known_symbols.insert(key);
            }
            changed
        })
        .await
    }

    /// Wipe the symbol store and replace the manifest with an empty one.
    pub async fn clear(&self) -> StorageResult<()> {
        let mut guard = self.state.write().await;
        self.store.clear().await?;
        let next = ManifestState {
            updated_at: Some(Utc::now()),
            ..ManifestState::default()
        };
        self.store.write_manifest(&next).await?;
        *guard = next;
        Ok(())
    }

    /// Copy of the current state.
    #[cfg(test)]
    pub async fn snapshot(&self) -> ManifestState {
        self.state.read().await.clone()
    }

    /// Apply `mutate` to a copy; persist and publish only if it changed.
    async fn update<F>(&self, mutate: F) -> StorageResult<()>
    where
        F: FnOnce(&mut ManifestState) -> bool,
    {
        let mut guard = self.state.write().await;
        let mut next = guard.clone();
        if !mutate(&mut next) {
            return Ok(());
        }
        next.updated_at = Some(Utc::now());
        self.store.write_manifest(&next).await?;
        debug!(
            artifacts = next.known_artifacts.len(),
            symbols = next.known_symbols.len(),
            "cache manifest persisted"
        );
        *guard = next;
        Ok(())
    }
}
