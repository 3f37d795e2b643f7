//! Extraction of symbol files from downloaded symbol packages.
//!
//! A symbol package is a zip archive. Every entry whose name ends in `.pdb`
//! is inflated fully into memory (zip entries cannot seek) and identified.
//! Entries are processed on blocking workers, each with its own handle on
//! the shared, immutable archive bytes.

use crate::{
    models::{
        artifact::ArtifactBytes,
        symbol::{SymbolFile, has_symbol_extension},
    },
    services::{
        identifier::{self, IdentifierError},
        symbol_store::{StorageError, SymbolStore},
    },
};
use bytes::Bytes;
use std::io::{self, Cursor, Read};
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, warn};
use zip::{ZipArchive, result::ZipError};

/// Upper bound on buffer pre-allocation from the entry's declared size.
const MAX_PREALLOC: usize = 64 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("artifact `{artifact}` is not a readable archive: {source}")]
    Unreadable {
        artifact: String,
        #[source]
        source: ZipError,
    },
}

#[derive(Debug, Error)]
enum EntryError {
    #[error(transparent)]
    Zip(#[from] ZipError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Identifier(#[from] IdentifierError),
    #[error(transparent)]
    Unstorable(#[from] StorageError),
    #[error("worker failed: {0}")]
    Join(String),
}

/// Extract every symbol file in `artifact`.
///
/// An entry that fails to inflate or whose debug header is malformed is
/// logged and skipped; the rest of the artifact is still returned. Only an
/// artifact that cannot be opened as an archive at all is an error.
pub async fn extract_symbol_files(
    artifact: &ArtifactBytes,
) -> Result<Vec<SymbolFile>, ArchiveError> {
    let label = artifact.descriptor.to_string();
    let archive = ZipArchive::new(Cursor::new(artifact.bytes.clone())).map_err(|source| {
        ArchiveError::Unreadable {
            artifact: label.clone(),
            source,
        }
    })?;

    let entries: Vec<(usize, String)> = (0..archive.len())
        .filter_map(|index| {
            archive
                .name_for_index(index)
                .filter(|name| has_symbol_extension(name))
                .map(|name| (index, name.to_string()))
        })
        .collect();
    debug!(artifact = %label, count = entries.len(), "symbol entries found in archive");

    let mut workers = JoinSet::new();
    for (index, name) in entries {
        let mut archive = archive.clone();
        workers.spawn_blocking(move || {
            let result = read_symbol_entry(&mut archive, index);
            (name, result)
        });
    }

    let mut files = Vec::new();
    while let Some(joined) = workers.join_next().await {
        let (name, result) = match joined {
            Ok(done) => done,
            Err(err) => (
                String::from("<unknown>"),
                Err(EntryError::Join(err.to_string())),
            ),
        };
        match result {
            Ok(Some(mut file)) => {
                file.source = Some(artifact.key().clone());
                debug!(
                    artifact = %label,
                    filename = %file.filename,
                    id = %file.id,
                    "extracted symbol file"
                );
                files.push(file);
            }
            Ok(None) => {}
            Err(err) => {
                warn!(
                    artifact = %label,
                    entry = %name,
                    error = %err,
                    "skipping unreadable symbol entry"
                );
            }
        }
    }
    Ok(files)
}

/// Inflate one entry and compute its identifier. `None` for directories.
///
/// Entries whose base name cannot be used as a store key are rejected
/// before inflating.
fn read_symbol_entry(
    archive: &mut ZipArchive<Cursor<Bytes>>,
    index: usize,
) -> Result<Option<SymbolFile>, EntryError> {
    let mut entry = archive.by_index(index)?;
    if !entry.is_file() {
        return Ok(None);
    }
    let filename = entry
        .name()
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .to_string();
    SymbolStore::ensure_filename_safe(&filename)?;
    let capacity = usize::try_from(entry.size()).unwrap_or(0).min(MAX_PREALLOC);
    let mut buffer = Vec::with_capacity(capacity);
    entry.read_to_end(&mut buffer)?;

    let mut cursor = Cursor::new(buffer);
    let id = identifier::symbol_id(&mut cursor)?;
    Ok(Some(SymbolFile {
        filename,
        bytes: Bytes::from(cursor.into_inner()),
        id,
        source: None,
    }))
}


#[cfg(test)]
mod tests {
    use super::fixtures::zip_archive;
    use super::*;
    use crate::models::artifact::ArtifactDescriptor;
    use crate::services::identifier::fixtures::{guid, portable_pdb};

    fn artifact(bytes: Vec<u8>) -> ArtifactBytes {
        ArtifactBytes::new(
            ArtifactDescriptor {
                project_id: 1,
                package_id: 1,
                package_file_id: 1,
                package_name: "App".into(),
                version: "1.0.0".into(),
                filename: "App.1.0.0.snupkg".into(),
                file_sha256: None,
            },
            Bytes::from(bytes),
        )
    }

    #[tokio::test]
    async fn extracts_only_symbol_entries() {
        let pdb = portable_pdb(guid(1));
        let zip = zip_archive(&[
            ("lib/net8.0/App.pdb", pdb.as_slice()),
            ("lib/net8.0/App.xml", b"<doc/>"),
            ("App.nuspec", b"<package/>"),
        ]);
        let artifact = artifact(zip);

        let files = extract_symbol_files(&artifact).await.unwrap();
        assert_eq!(files.len(), 1);
        let file = &files[0];
        assert_eq!(file.filename, "App.pdb");
        assert_eq!(file.bytes.as_ref(), pdb.as_slice());
        assert_eq!(file.id, identifier::symbol_id_of(&pdb).unwrap());
        assert_eq!(file.source.as_ref(), Some(artifact.key()));
    }

    #[tokio::test]
    async fn extension_match_ignores_case() {
        let pdb = portable_pdb(guid(2));
        let zip = zip_archive(&[("lib/App.Core.PDB", pdb.as_slice())]);
        let files = extract_symbol_files(&artifact(zip)).await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].filename, "App.Core.PDB");
    }

    #[tokio::test]
    async fn malformed_entries_are_skipped() {
        let good = portable_pdb(guid(3));
        let zip = zip_archive(&[
            ("lib/a/Good.pdb", good.as_slice()),
            ("lib/b/Broken.pdb", b"this is not a pdb"),
        ]);
        let files = extract_symbol_files(&artifact(zip)).await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].filename, "Good.pdb");
    }

    #[tokio::test]
    async fn entries_with_unstorable_names_are_skipped() {
        let good = portable_pdb(guid(4));
        let also_valid = portable_pdb(guid(5));
        let long_name = format!("lib/{}.pdb", "A".repeat(260));
        let zip = zip_archive(&[
            ("lib/App.pdb", good.as_slice()),
            (long_name.as_str(), also_valid.as_slice()),
            ("lib/.tmp-App.pdb", also_valid.as_slice()),
        ]);
        let files = extract_symbol_files(&artifact(zip)).await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].filename, "App.pdb");
    }

    #[tokio::test]
    async fn non_archive_artifact_is_an_error() {
        let result = extract_symbol_files(&artifact(b"definitely not a zip".to_vec())).await;
        assert!(matches!(result, Err(ArchiveError::Unreadable { .. })));
    }
}
