//! Debug-symbol files and their canonical identifiers.

use crate::models::artifact::ArtifactKey;
use bytes::Bytes;
use std::fmt;

/// Extension of the symbol files this proxy serves.
pub const SYMBOL_EXTENSION: &str = ".pdb";

/// Constant age suffix appended to portable PDB identifiers.
pub const AGE_SUFFIX: &str = "FFFFFFFF";

const MAX_ID_LEN: usize = 64;

/// Canonical symbol identifier: 32 uppercase hex digits plus [`AGE_SUFFIX`].
///
/// Also used for identifiers taken from lookup requests, which are only
/// normalised (upper-cased) and sanity checked, not required to be 40 chars.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymbolId(String);

impl SymbolId {
    /// Build the identifier from the 16-byte id of a debug metadata header.
    ///
    /// The first three fields are little-endian, matching how the id is
    /// rendered as a GUID by the toolchains that produce these files.
    pub fn from_guid_bytes(guid: &[u8; 16]) -> Self {
        let data1 = u32::from_le_bytes([guid[0], guid[1], guid[2], guid[3]]);
        let data2 = u16::from_le_bytes([guid[4], guid[5]]);
        let data3 = u16::from_le_bytes([guid[6], guid[7]]);
        let mut id = format!("{data1:08X}{data2:04X}{data3:04X}");
        for byte in &guid[8..] {
            id.push_str(&format!("{byte:02X}"));
        }
        id.push_str(AGE_SUFFIX);
        Self(id)
    }

    /// Normalise an identifier from a request path.
    ///
    /// Returns `None` unless it is 1 to 64 ASCII alphanumerics.
    pub fn parse_request(raw: &str) -> Option<Self> {
        if raw.is_empty() || raw.len() > MAX_ID_LEN {
            return None;
        }
        if !raw.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return None;
        }
        Some(Self(raw.to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SymbolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// True if `name` ends in the symbol extension, ignoring case.
pub fn has_symbol_extension(name: &str) -> bool {
    name.len() >= SYMBOL_EXTENSION.len()
        && name
            .get(name.len() - SYMBOL_EXTENSION.len()..)
            .is_some_and(|ext| ext.eq_ignore_ascii_case(SYMBOL_EXTENSION))
}

/// One extracted symbol file.
#[derive(Debug, Clone)]
pub struct SymbolFile {
    pub filename: String,
    pub bytes: Bytes,
    pub id: SymbolId,
    /// Artifact the file was extracted from.
    pub source: Option<ArtifactKey>,
}

impl SymbolFile {
    /// Manifest key: `{filename}/{identifier}`.
    pub fn key(&self) -> String {
        symbol_key(&self.filename, &self.id)
    }
}

pub fn symbol_key(filename: &str, id: &SymbolId) -> String {
    format!("{filename}/{id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guid_bytes_render_mixed_endian_uppercase() {
        let guid = [
            0x33, 0x22, 0x11, 0x00, 0x55, 0x44, 0x77, 0x66, 0x88, 0x99, 0xaa, 0xbb, 0xcc, 0xdd,
            0xee, 0xff,
        ];
        let id = SymbolId::from_guid_bytes(&guid);
        assert_eq!(id.as_str(), "00112233445566778899AABBCCDDEEFFFFFFFFFF");
        assert_eq!(id.as_str().len(), 40);
    }

    #[test]
    fn request_ids_are_upper_cased() {
        let id = SymbolId::parse_request("abcdef0123ffffffff").unwrap();
        assert_eq!(id.as_str(), "ABCDEF0123FFFFFFFF");
    }

    #[test]
    fn request_ids_reject_path_like_values() {
        assert!(SymbolId::parse_request("").is_none());
        assert!(SymbolId::parse_request("..").is_none());
        assert!(SymbolId::parse_request("abc/def").is_none());
        assert!(SymbolId::parse_request(&"A".repeat(65)).is_none());
    }

    #[test]
    fn symbol_extension_is_case_insensitive() {
        assert!(has_symbol_extension("App.pdb"));
        assert!(has_symbol_extension("APP.PDB"));
        assert!(!has_symbol_extension("App.dll"));
        assert!(!has_symbol_extension("pdb"));
        assert!(!has_symbol_extension("ø.pd"));
    }
}
