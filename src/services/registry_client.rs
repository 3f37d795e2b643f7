//! Client for the GitLab package registry.
//!
//! Discovery walks three paginated listings: top-level groups, the NuGet
//! packages of each group matching a name, and the files of each package.
//! Groups and packages are fanned out concurrently; branch failures are
//! collected with [`aggregate::gather`] so a failed discovery reports every
//! upstream error, not just the first one to complete.

use crate::{
    models::{
        artifact::{ARTIFACT_EXTENSION, ArtifactBytes, ArtifactDescriptor},
        registry::{Group, Package, PackageFile},
        symbol::SYMBOL_EXTENSION,
    },
    services::{
        aggregate::{self, Gathered},
        link_header::PageLinks,
    },
};
use base64::{Engine as _, engine::general_purpose};
use futures::future::join_all;
use reqwest::{
    Client, RequestBuilder, Response, StatusCode, Url,
    header::{AUTHORIZATION, LINK},
};
use serde::de::DeserializeOwned;
use std::{collections::HashSet, fmt, future::Future, time::Duration};
use thiserror::Error;
use tracing::{debug, warn};

/// Header carrying a GitLab personal access token.
pub const PRIVATE_TOKEN_HEADER: &str = "PRIVATE-TOKEN";

/// Stop following `next` links after this many pages of one listing.
const MAX_PAGES: usize = 10_000;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry URL `{url}` is invalid: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("failed to build HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),
    #[error("request to {url} failed: {source}")]
    Network {
        url: Url,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} returned HTTP {status}")]
    HttpStatus { url: Url, status: StatusCode },
    #[error("could not decode response from {url}: {source}")]
    Decode {
        url: Url,
        #[source]
        source: reqwest::Error,
    },
}

/// One or more registry failures from parallel branches.
#[derive(Debug)]
pub struct RegistryErrors(pub Vec<RegistryError>);

impl RegistryErrors {
    pub fn errors(&self) -> &[RegistryError] {
        &self.0
    }
}

impl From<RegistryError> for RegistryErrors {
    fn from(err: RegistryError) -> Self {
        Self(vec![err])
    }
}

impl fmt::Display for RegistryErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} registry request(s) failed", self.errors().len())?;
        for (i, err) in self.errors().iter().enumerate() {
            let sep = if i == 0 { ": " } else { "; " };
            write!(f, "{sep}{err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for RegistryErrors {}

/// Where symbol packages come from.
pub trait PackageSource: Send + Sync + 'static {
    /// Find candidate symbol packages for a symbol file name (extension
    /// optional).
    fn discover(
        &self,
        name: &str,
    ) -> impl Future<Output = Result<Vec<ArtifactDescriptor>, RegistryErrors>> + Send;

    /// Download one package into memory. Never retried here.
    fn download(
        &self,
        descriptor: &ArtifactDescriptor,
    ) -> impl Future<Output = Result<ArtifactBytes, RegistryError>> + Send;
}

#[derive(Clone, Copy)]
enum Auth {
    /// API listings.
    Api,
    /// NuGet download endpoint; basic auth when a username is configured.
    Download,
}

/// GitLab registry client.
#[derive(Clone)]
pub struct GitLabClient {
    http: Client,
    base_url: Url,
    token: String,
    username: Option<String>,
}

impl fmt::Debug for GitLabClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitLabClient")
            .field("base_url", &self.base_url.as_str())
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl GitLabClient {
    /// Build a client for the instance at `base_url` (origin, optionally
    /// with a path prefix).
    pub fn new(
        base_url: &str,
        token: impl Into<String>,
        username: Option<String>,
        timeout: Duration,
    ) -> Result<Self, RegistryError> {
        let base_url = Url::parse(base_url).map_err(|err| RegistryError::InvalidUrl {
            url: base_url.to_string(),
            reason: err.to_string(),
        })?;
        if base_url.cannot_be_a_base() {
            return Err(RegistryError::InvalidUrl {
                url: base_url.to_string(),
                reason: "not a base URL".into(),
            });
        }
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(format!("symbol-proxy/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(RegistryError::ClientBuild)?;
        Ok(Self {
            http,
            base_url,
            token: token.into(),
            username: username.filter(|u| !u.is_empty()),
        })
    }

    /// `{base}/api/v4/{segments...}`, each segment percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, RegistryError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| RegistryError::InvalidUrl {
                url: self.base_url.to_string(),
                reason: "not a base URL".into(),
            })?
            .pop_if_empty()
            .extend(["api", "v4"])
            .extend(segments);
        Ok(url)
    }

    fn groups_url(&self) -> Result<Url, RegistryError> {
        let mut url = self.endpoint(&["groups"])?;
        url.query_pairs_mut().append_pair("top_level_only", "true");
        Ok(url)
    }

    fn packages_url(&self, group_id: u64, name: &str) -> Result<Url, RegistryError> {
        let group = group_id.to_string();
        let mut url = self.endpoint(&["groups", &group, "packages"])?;
        url.query_pairs_mut()
            .append_pair("package_type", "nuget")
            .append_pair("status", "default")
            .append_pair("package_name", name);
        Ok(url)
    }

    fn package_files_url(&self, package: &Package) -> Result<Url, RegistryError> {
        let project = package.project_id.to_string();
        let id = package.id.to_string();
        self.endpoint(&["projects", &project, "packages", &id, "package_files"])
    }

    fn download_url(&self, descriptor: &ArtifactDescriptor) -> Result<Url, RegistryError> {
        let project = descriptor.project_id.to_string();
        self.endpoint(&[
            "projects",
            &project,
            "packages",
            "nuget",
            "download",
            &descriptor.package_name,
            &descriptor.version,
            &descriptor.filename,
        ])
    }

    fn authorize(&self, request: RequestBuilder, auth: Auth) -> RequestBuilder {
        match (auth, &self.username) {
            (Auth::Download, Some(username)) => {
                let credentials = format!("{username}:{}", self.token);
                let encoded = general_purpose::STANDARD.encode(credentials);
                request.header(AUTHORIZATION, format!("Basic {encoded}"))
            }
            _ => request.header(PRIVATE_TOKEN_HEADER, &self.token),
        }
    }

    /// Authenticated GET that fails on any non-2xx status.
    async fn get(&self, url: &Url, auth: Auth) -> Result<Response, RegistryError> {
        let response = self
            .authorize(self.http.get(url.clone()), auth)
            .send()
            .await
            .map_err(|source| RegistryError::Network {
                url: url.clone(),
                source,
            })?;
        let status = response.status();
        if !status.is_success() {
            warn!(url = %url, status = %status, "registry returned an error status");
            return Err(RegistryError::HttpStatus {
                url: url.clone(),
                status,
            });
        }
        Ok(response)
    }

    /// Follow `rel="next"` links from `first`, concatenating every page.
    async fn fetch_all<T: DeserializeOwned>(&self, first: Url) -> Result<Vec<T>, RegistryError> {
        let mut items = Vec::new();
        let mut next = Some(first);
        let mut pages = 0usize;
        while let Some(url) = next.take() {
            pages += 1;
            let response = self.get(&url, Auth::Api).await?;
            next = response
                .headers()
                .get(LINK)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| PageLinks::parse(value).next);
            let page: Vec<T> = response
                .json()
                .await
                .map_err(|source| RegistryError::Decode {
                    url: url.clone(),
                    source,
                })?;
            debug!(url = %url, count = page.len(), "fetched registry page");
            items.extend(page);

            if pages >= MAX_PAGES && next.is_some() {
                warn!(url = %url, pages, "page limit reached, ignoring further pages");
                break;
            }
        }
        Ok(items)
    }

    async fn group_artifacts(
        &self,
        group_id: u64,
        name: &str,
    ) -> Gathered<ArtifactDescriptor, RegistryError> {
        let url = self.packages_url(group_id, name).map_err(|err| vec![err])?;
        let packages: Vec<Package> = self.fetch_all(url).await.map_err(|err| vec![err])?;
        debug!(group = group_id, count = packages.len(), "matching packages in group");

        let branches = join_all(packages.iter().map(|pkg| self.package_artifacts(pkg))).await;
        aggregate::gather(branches.into_iter().map(aggregate::single))
    }

    async fn package_artifacts(
        &self,
        package: &Package,
    ) -> Result<Vec<ArtifactDescriptor>, RegistryError> {
        let url = self.package_files_url(package)?;
        let files: Vec<PackageFile> = self.fetch_all(url).await?;
        Ok(files
            .into_iter()
            .filter(|file| is_symbol_package(&file.file_name))
            .map(|file| ArtifactDescriptor {
                project_id: package.project_id,
                package_id: package.id,
                package_file_id: file.id,
                package_name: package.name.clone(),
                version: package.version.clone(),
                filename: file.file_name,
                file_sha256: file.file_sha256,
            })
            .collect())
    }
}

impl PackageSource for GitLabClient {
    async fn discover(&self, name: &str) -> Result<Vec<ArtifactDescriptor>, RegistryErrors> {
        let name = strip_symbol_extension(name);
        let groups: Vec<Group> = self.fetch_all(self.groups_url()?).await?;
        debug!(count = groups.len(), "top-level groups listed");

        let branches =
            join_all(groups.iter().map(|group| self.group_artifacts(group.id, name))).await;
        let found = aggregate::gather(branches).map_err(RegistryErrors)?;

        let mut seen = HashSet::new();
        Ok(found
            .into_iter()
            .filter(|d| seen.insert((d.project_id, d.package_file_id)))
            .collect())
    }

    async fn download(
        &self,
        descriptor: &ArtifactDescriptor,
    ) -> Result<ArtifactBytes, RegistryError> {
        let url = self.download_url(descriptor)?;
        debug!(
            package = %descriptor.package_name,
            version = %descriptor.version,
            filename = %descriptor.filename,
            "downloading symbol package"
        );
        let response = self.get(&url, Auth::Download).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|source| RegistryError::Network { url, source })?;
        let artifact = ArtifactBytes::new(descriptor.clone(), bytes);
        debug!(
            package = %descriptor.package_name,
            size = artifact.size(),
            key = %artifact.key(),
            "symbol package downloaded"
        );
        Ok(artifact)
    }
}

fn is_symbol_package(filename: &str) -> bool {
    filename.len() >= ARTIFACT_EXTENSION.len()
        && filename
            .get(filename.len() - ARTIFACT_EXTENSION.len()..)
            .is_some_and(|ext| ext.eq_ignore_ascii_case(ARTIFACT_EXTENSION))
}

/// `App.Core.pdb` -> `App.Core`; names without the extension pass through.
pub fn strip_symbol_extension(name: &str) -> &str {
    let cut = name.len().saturating_sub(SYMBOL_EXTENSION.len());
    match name.get(cut..) {
        Some(ext) if ext.eq_ignore_ascii_case(SYMBOL_EXTENSION) => &name[..cut],
        _ => name,
    }
}


#[cfg(test)]
mod tests {
    use super::fake_registry::{Registry, file, package, spawn};
    use super::*;
    use base64::Engine as _;
    use std::sync::atomic::Ordering;

    fn client(base: &str, username: Option<&str>) -> GitLabClient {
        GitLabClient::new(
            base,
            "secret-token",
            username.map(str::to_string),
            Duration::from_secs(10),
        )
        .unwrap()
    }

    #[test]
    fn strips_symbol_extension_case_insensitively() {
        assert_eq!(strip_symbol_extension("App.Core.pdb"), "App.Core");
        assert_eq!(strip_symbol_extension("App.PDB"), "App");
        assert_eq!(strip_symbol_extension("App"), "App");
    }

    #[test]
    fn endpoints_are_built_under_the_base_path() {
        let client = client("https://gitlab.example.com/prefix/", None);
        let url = client
            .download_url(&ArtifactDescriptor {
                project_id: 7,
                package_id: 1,
                package_file_id: 2,
                package_name: "My App".into(),
                version: "1.0.0".into(),
                filename: "My.App.1.0.0.snupkg".into(),
                file_sha256: None,
            })
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://gitlab.example.com/prefix/api/v4/projects/7/packages/nuget/download/My%20App/1.0.0/My.App.1.0.0.snupkg"
        );
        assert_eq!(
            client.groups_url().unwrap().as_str(),
            "https://gitlab.example.com/prefix/api/v4/groups?top_level_only=true"
        );
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        let result = GitLabClient::new("not a url", "t", None, Duration::from_secs(1));
        assert!(matches!(result, Err(RegistryError::InvalidUrl { .. })));
    }

    #[tokio::test]
    async fn pagination_makes_one_request_per_page() {
        let (base, registry) = spawn(Registry {
            group_pages: vec![vec![1], vec![2], vec![3]],
            ..Registry::default()
        })
        .await;

        let found = client(&base, None).discover("App.pdb").await.unwrap();
        assert!(found.is_empty());
        assert_eq!(registry.group_requests.load(Ordering::SeqCst), 3);
        // one package listing per discovered group
        assert_eq!(registry.requests.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn discovery_keeps_only_symbol_packages() {
        let sha = "ab".repeat(32);
        let (base, registry) = spawn(Registry {
            group_pages: vec![vec![1, 2]],
            packages: [
                (1, vec![package(10, 100, "App", "1.0.0")]),
                (2, vec![package(20, 200, "App", "2.0.0")]),
            ]
            .into(),
            files: [
                (
                    10,
                    vec![
                        file(1000, 10, "App.1.0.0.nupkg", None),
                        file(1001, 10, "App.1.0.0.snupkg", Some(sha.as_str())),
                    ],
                ),
                (20, vec![file(2001, 20, "App.2.0.0.SNUPKG", None)]),
            ]
            .into(),
            ..Registry::default()
        })
        .await;

        let mut found = client(&base, None).discover("App.pdb").await.unwrap();
        found.sort_by_key(|d| d.package_file_id);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].package_file_id, 1001);
        assert_eq!(found[0].project_id, 100);
        assert_eq!(found[0].version, "1.0.0");
        assert_eq!(found[0].file_sha256.as_deref(), Some(sha.as_str()));
        assert_eq!(found[1].filename, "App.2.0.0.SNUPKG");

        let tokens = registry.list_tokens.lock().unwrap();
        assert!(tokens.iter().all(|t| t.as_deref() == Some("secret-token")));
    }

    #[tokio::test]
    async fn every_failing_branch_is_reported() {
        let (base, _registry) = spawn(Registry {
            group_pages: vec![vec![1, 2, 3]],
            packages: [(1, vec![package(10, 100, "App", "1.0.0")])].into(),
            failing_groups: [2, 3].into(),
            ..Registry::default()
        })
        .await;

        let errors = client(&base, None).discover("App").await.unwrap_err();
        assert_eq!(errors.errors().len(), 2);
        assert!(errors.errors().iter().all(|err| matches!(
            err,
            RegistryError::HttpStatus {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                ..
            }
        )));
    }

    #[tokio::test]
    async fn download_uses_basic_auth_when_username_is_set() {
        let body = b"package bytes".to_vec();
        let (base, registry) = spawn(Registry {
            artifacts: [("App.1.0.0.snupkg".to_string(), body.clone())].into(),
            ..Registry::default()
        })
        .await;
        let descriptor = ArtifactDescriptor {
            project_id: 100,
            package_id: 10,
            package_file_id: 1001,
            package_name: "App".into(),
            version: "1.0.0".into(),
            filename: "App.1.0.0.snupkg".into(),
            file_sha256: None,
        };

        let artifact = client(&base, Some("ci-bot"))
            .download(&descriptor)
            .await
            .unwrap();
        assert_eq!(artifact.bytes.as_ref(), body.as_slice());

        client(&base, None).download(&descriptor).await.unwrap();

        let auth = registry.download_auth.lock().unwrap();
        let expected = format!(
            "Basic {}",
            general_purpose::STANDARD.encode("ci-bot:secret-token")
        );
        assert_eq!(auth[0], (Some(expected), None));
        assert_eq!(auth[1], (None, Some("secret-token".to_string())));
    }

    #[tokio::test]
    async fn download_failure_is_an_http_status_error() {
        let (base, _registry) = spawn(Registry::default()).await;
        let descriptor = ArtifactDescriptor {
            project_id: 1,
            package_id: 1,
            package_file_id: 1,
            package_name: "Missing".into(),
            version: "0.0.1".into(),
            filename: "Missing.0.0.1.snupkg".into(),
            file_sha256: None,
        };
        let err = client(&base, None).download(&descriptor).await.unwrap_err();
        assert!(matches!(
            err,
            RegistryError::HttpStatus {
                status: StatusCode::NOT_FOUND,
                ..
            }
        ));
    }
}
