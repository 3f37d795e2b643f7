//! Canonical identifier extraction for portable PDB files.
//!
//! A portable PDB is an ECMA-335 metadata root (`BSJB` signature, version
//! string, stream directory). The `#Pdb` stream begins with a 20-byte PDB id
//! whose first 16 bytes are the GUID half used to build the [`SymbolId`].

use crate::models::symbol::SymbolId;
use std::io::{self, Read, Seek, SeekFrom};
use thiserror::Error;

const METADATA_SIGNATURE: u32 = 0x424A_5342;
const PDB_STREAM_NAME: &[u8] = b"#Pdb";
const PDB_ID_LEN: u32 = 20;
const MAX_VERSION_LEN: u32 = 255;
const MAX_STREAM_NAME_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum IdentifierError {
    #[error("malformed symbol file: {0}")]
    MalformedSymbolFile(String),
    #[error(transparent)]
    Io(io::Error),
}

impl From<io::Error> for IdentifierError {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            IdentifierError::MalformedSymbolFile("truncated metadata".into())
        } else {
            IdentifierError::Io(err)
        }
    }
}

fn malformed(reason: impl Into<String>) -> IdentifierError {
    IdentifierError::MalformedSymbolFile(reason.into())
}

/// Compute the canonical identifier of the symbol file starting at the
/// reader's current position.
///
/// The reader is put back at that position afterwards, on success and on
/// failure, so the same buffer can be copied to storage.
pub fn symbol_id<R: Read + Seek>(reader: &mut R) -> Result<SymbolId, IdentifierError> {
    let start = reader.stream_position()?;
    let result = read_symbol_id(reader, start);
    reader.seek(SeekFrom::Start(start))?;
    result
}

/// Convenience wrapper for in-memory files.
pub fn symbol_id_of(bytes: &[u8]) -> Result<SymbolId, IdentifierError> {
    symbol_id(&mut io::Cursor::new(bytes))
}

fn read_symbol_id<R: Read + Seek>(reader: &mut R, start: u64) -> Result<SymbolId, IdentifierError> {
    if read_u32(reader)? != METADATA_SIGNATURE {
        return Err(malformed("missing metadata signature"));
    }
    // major, minor, reserved
    let mut skip = [0u8; 8];
    reader.read_exact(&mut skip)?;

    let version_len = read_u32(reader)?;
    if version_len > MAX_VERSION_LEN {
        return Err(malformed(format!("version string length {version_len}")));
    }
    reader.seek(SeekFrom::Current(i64::from(version_len)))?;

    let _flags = read_u16(reader)?;
    let stream_count = read_u16(reader)?;

    for _ in 0..stream_count {
        let offset = read_u32(reader)?;
        let size = read_u32(reader)?;
        let name = read_stream_name(reader)?;
        if name != PDB_STREAM_NAME {
            continue;
        }
        if size < PDB_ID_LEN {
            return Err(malformed(format!("#Pdb stream too small ({size} bytes)")));
        }
        reader.seek(SeekFrom::Start(start + u64::from(offset)))?;
        let mut guid = [0u8; 16];
        reader.read_exact(&mut guid)?;
        return Ok(SymbolId::from_guid_bytes(&guid));
    }

    Err(malformed("no debug metadata header (#Pdb stream)"))
}

/// Null-terminated name, padded to a 4-byte boundary.
fn read_stream_name<R: Read>(reader: &mut R) -> Result<Vec<u8>, IdentifierError> {
    let mut name = Vec::new();
    loop {
        let mut chunk = [0u8; 4];
        reader.read_exact(&mut chunk)?;
        if let Some(nul) = chunk.iter().position(|b| *b == 0) {
            name.extend_from_slice(&chunk[..nul]);
            return Ok(name);
        }
        name.extend_from_slice(&chunk);
        if name.len() > MAX_STREAM_NAME_LEN {
            return Err(malformed("unterminated stream name"));
        }
    }
}

fn read_u32<R: Read>(reader: &mut R) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u16<R: Read>(reader: &mut R) -> io::Result<u16> {
    let mut buf = [0u8; 2];
    reader.read_exact(&mut buf)?;
    Ok(u16::from_le_bytes(buf))
}


#[cfg(test)]
mod tests {
    use super::fixtures::{guid, portable_pdb};
    use super::*;
    use std::io::Cursor;

    #[test]
    fn extracts_identifier_from_pdb_stream() {
        let bytes = portable_pdb([
            0x78, 0x56, 0x34, 0x12, 0xbc, 0x9a, 0xf0, 0xde, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06,
            0x07, 0x08,
        ]);
        let id = symbol_id_of(&bytes).unwrap();
        assert_eq!(id.as_str(), "123456789ABCDEF00102030405060708FFFFFFFF");
    }

    #[test]
    fn identifier_is_deterministic() {
        let bytes = portable_pdb(guid(7));
        let first = symbol_id_of(&bytes).unwrap();
        let second = symbol_id_of(&bytes).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.as_str().len(), 40);
    }

    #[test]
    fn reader_position_is_restored() {
        let mut prefixed = vec![0xAAu8; 5];
        prefixed.extend(portable_pdb(guid(1)));
        let mut cursor = Cursor::new(prefixed);
        cursor.set_position(5);

        symbol_id(&mut cursor).unwrap();
        assert_eq!(cursor.position(), 5);

        let mut garbage = Cursor::new(vec![0u8; 3]);
        assert!(symbol_id(&mut garbage).is_err());
        assert_eq!(garbage.position(), 0);
    }

    #[test]
    fn corrupted_signature_is_malformed() {
        let mut bytes = portable_pdb(guid(3));
        bytes[0] = b'X';
        assert!(matches!(
            symbol_id_of(&bytes),
            Err(IdentifierError::MalformedSymbolFile(_))
        ));
    }

    #[test]
    fn missing_pdb_stream_is_malformed() {
        let mut bytes = portable_pdb(guid(3));
        let at = bytes.windows(4).position(|w| w == b"#Pdb").unwrap();
        bytes[at..at + 4].copy_from_slice(b"#Blb");
        assert!(matches!(
            symbol_id_of(&bytes),
            Err(IdentifierError::MalformedSymbolFile(_))
        ));
    }

    #[test]
    fn truncated_file_is_malformed() {
        let bytes = portable_pdb(guid(3));
        assert!(matches!(
            symbol_id_of(&bytes[..40]),
            Err(IdentifierError::MalformedSymbolFile(_))
        ));
    }
}
