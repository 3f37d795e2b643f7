//! Wire shapes of the GitLab package registry API.
//!
//! Only the fields the proxy reads are declared; serde ignores the rest.

use serde::{Deserialize, Serialize};

/// A group from `GET /api/v4/groups`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Group {
    pub id: u64,
}

/// A package from `GET /api/v4/groups/{id}/packages`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Package {
    pub id: u64,
    pub project_id: u64,
    pub name: String,
    pub version: String,
}

/// A file from `GET /api/v4/projects/{id}/packages/{id}/package_files`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PackageFile {
    pub id: u64,
    pub package_id: u64,
    pub file_name: String,
    #[serde(default)]
    pub file_sha256: Option<String>,
}
