use clap::Parser;
use regex::Regex;
use reqwest::Url;
use std::{env, fmt, path::PathBuf, str::FromStr, time::Duration};
use thiserror::Error;

const ENV_PREFIX: &str = "SYMBOL_PROXY_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub registry_url: Url,
    pub access_token: String,
    pub username: Option<String>,
    pub cache_root: PathBuf,
    /// Empty means every `.pdb` name is served.
    pub supported_pdb_names: Vec<Regex>,
    pub request_timeout: Duration,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let patterns: Vec<&str> = self.supported_pdb_names.iter().map(Regex::as_str).collect();
        f.debug_struct("AppConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("registry_url", &self.registry_url.as_str())
            .field("access_token", &"<redacted>")
            .field("username", &self.username)
            .field("cache_root", &self.cache_root)
            .field("supported_pdb_names", &patterns)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Symbol server proxy for a GitLab package registry")]
pub struct Args {
    /// Host to bind to (overrides SYMBOL_PROXY_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides SYMBOL_PROXY_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Base URL of the GitLab instance (overrides SYMBOL_PROXY_REGISTRY_URL)
    #[arg(long)]
    pub registry_url: Option<String>,

    /// Access token for the registry (overrides SYMBOL_PROXY_ACCESS_TOKEN)
    #[arg(long)]
    pub access_token: Option<String>,

    /// Username for basic auth on downloads (overrides SYMBOL_PROXY_USERNAME)
    #[arg(long)]
    pub username: Option<String>,

    /// Directory holding cached symbols (overrides SYMBOL_PROXY_CACHE_ROOT)
    #[arg(long)]
    pub cache_root: Option<PathBuf>,

    /// Regex a requested file name must match; repeatable
    /// (overrides comma-separated SYMBOL_PROXY_SUPPORTED_PDB_NAMES)
    #[arg(long = "supported-pdb-name")]
    pub supported_pdb_names: Vec<String>,

    /// Timeout for each registry request, in seconds
    /// (overrides SYMBOL_PROXY_REQUEST_TIMEOUT_SECS)
    #[arg(long)]
    pub request_timeout_secs: Option<u64>,

    /// Wipe the symbol cache and manifest, then exit
    #[arg(long)]
    pub clear_cache: bool,
}

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::InvalidConfiguration(msg.into())
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and clear-cache flag.
    pub fn from_env_and_args() -> Result<(Self, bool), ConfigError> {
        Self::from_sources(Args::parse(), |name| env::var(name).ok())
    }

    /// Merge `args` over variables read through `lookup` (unprefixed names
    /// are prefixed here).
    pub fn from_sources<F>(args: Args, lookup: F) -> Result<(Self, bool), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = |name: &str| {
            lookup(&format!("{ENV_PREFIX}{name}"))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let arg = |value: Option<String>| {
            value
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let host = arg(args.host)
            .or_else(|| env("HOST"))
            .unwrap_or_else(|| "0.0.0.0".into());
        let port = match args.port {
            Some(port) => port,
            None => parse_env(env("PORT"), "PORT")?.unwrap_or(5000),
        };

        let raw_url = arg(args.registry_url)
            .or_else(|| env("REGISTRY_URL"))
            .ok_or_else(|| invalid(format!("{ENV_PREFIX}REGISTRY_URL is required")))?;
        let registry_url = Url::parse(&raw_url)
            .map_err(|err| invalid(format!("registry URL `{raw_url}`: {err}")))?;

        let access_token = arg(args.access_token)
            .or_else(|| env("ACCESS_TOKEN"))
            .ok_or_else(|| invalid(format!("{ENV_PREFIX}ACCESS_TOKEN is required")))?;
        let username = arg(args.username).or_else(|| env("USERNAME"));

        let cache_root = args
            .cache_root
            .filter(|p| !p.as_os_str().is_empty())
            .or_else(|| env("CACHE_ROOT").map(PathBuf::from))
            .ok_or_else(|| invalid(format!("{ENV_PREFIX}CACHE_ROOT is required")))?;

        let patterns: Vec<String> = if args.supported_pdb_names.is_empty() {
            env("SUPPORTED_PDB_NAMES")
                .map(|list| list.split(',').map(str::to_string).collect())
                .unwrap_or_default()
        } else {
            args.supported_pdb_names
        };
        let supported_pdb_names = patterns
            .iter()
            .map(|p| p.trim())
            .filter(|p| !p.is_empty())
            .map(|p| Regex::new(p).map_err(|err| invalid(format!("pattern `{p}`: {err}"))))
            .collect::<Result<Vec<_>, _>>()?;

        let timeout_secs = match args.request_timeout_secs {
            Some(secs) => secs,
            None => parse_env(env("REQUEST_TIMEOUT_SECS"), "REQUEST_TIMEOUT_SECS")?.unwrap_or(60),
        };
        if timeout_secs == 0 {
            return Err(invalid("request timeout must be at least one second"));
        }

        let cfg = Self {
            host,
            port,
            registry_url,
            access_token,
            username,
            cache_root,
            supported_pdb_names,
            request_timeout: Duration::from_secs(timeout_secs),
        };
        Ok((cfg, args.clear_cache))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_env<T: FromStr>(value: Option<String>, name: &str) -> Result<Option<T>, ConfigError>
where
    T::Err: fmt::Display,
{
    value
        .map(|raw| {
            raw.parse::<T>()
                .map_err(|err| invalid(format!("parsing {ENV_PREFIX}{name} value `{raw}`: {err}")))
        })
        .transpose()
}
