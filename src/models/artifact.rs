//! Registry artifacts: what discovery finds and what download produces.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// File extension of symbol packages published to the registry.
pub const ARTIFACT_EXTENSION: &str = ".snupkg";

/// Dedup key for an artifact: lowercase hex SHA-256 of its bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactKey(String);

impl ArtifactKey {
    /// Hash artifact content into its key.
    pub fn of_content(bytes: &[u8]) -> Self {
        Self(format!("{:x}", Sha256::digest(bytes)))
    }

    /// Accept a registry-advertised SHA-256, normalising case.
    ///
    /// Returns `None` for anything that is not 64 hex digits.
    pub fn from_advertised(hex: &str) -> Option<Self> {
        let hex = hex.trim();
        if hex.len() == 64 && hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            Some(Self(hex.to_ascii_lowercase()))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One candidate package file in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactDescriptor {
    /// Project that owns the package.
    pub project_id: u64,
    pub package_id: u64,
    pub package_file_id: u64,
    pub package_name: String,
    pub version: String,
    /// Package file name, e.g. `App.1.2.0.snupkg`.
    pub filename: String,
    /// SHA-256 the registry reports for this file, if any.
    pub file_sha256: Option<String>,
}

impl ArtifactDescriptor {
    /// Key the registry claims this artifact has, usable before download.
    pub fn advertised_key(&self) -> Option<ArtifactKey> {
        self.file_sha256
            .as_deref()
            .and_then(ArtifactKey::from_advertised)
    }
}

impl fmt::Display for ArtifactDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({})", self.package_name, self.version, self.filename)
    }
}

/// Downloaded artifact content, kept in memory for random access.
#[derive(Debug, Clone)]
pub struct ArtifactBytes {
    pub descriptor: ArtifactDescriptor,
    pub bytes: Bytes,
    key: ArtifactKey,
}

impl ArtifactBytes {
    /// Wrap downloaded bytes; the content hash is computed once here.
    pub fn new(descriptor: ArtifactDescriptor, bytes: Bytes) -> Self {
        let key = ArtifactKey::of_content(&bytes);
        Self {
            descriptor,
            bytes,
            key,
        }
    }

    pub fn key(&self) -> &ArtifactKey {
        &self.key
    }

    /// Size of the downloaded content in bytes.
    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}
