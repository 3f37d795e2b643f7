use anyhow::{Context, Result};
use axum::Router;
use std::{io::ErrorKind, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;

use services::{
    manifest::CacheManifest, registry_client::GitLabClient, resolver::SymbolResolver,
    symbol_store::SymbolStore,
};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // --- Parse config + clear-cache flag ---
    let (cfg, clear_cache) = config::AppConfig::from_env_and_args()?;

    tracing::info!("Starting symbol-proxy with config: {:?}", cfg);

    // --- Cache root + manifest ---
    let store = SymbolStore::new(&cfg.cache_root);
    store
        .ensure_root()
        .await
        .with_context(|| format!("creating cache root {}", cfg.cache_root.display()))?;
    let manifest = Arc::new(
        CacheManifest::load(store.clone())
            .await
            .context("loading cache manifest")?,
    );

    // --- Handle clear-cache mode ---
    if clear_cache {
        manifest.clear().await.context("clearing symbol cache")?;
        tracing::info!("Symbol cache cleared.");
        return Ok(()); // exit after clearing
    }

    // --- Initialize core services ---
    let client = GitLabClient::new(
        cfg.registry_url.as_str(),
        cfg.access_token.clone(),
        cfg.username.clone(),
        cfg.request_timeout,
    )
    .context("building registry client")?;
    let resolver = SymbolResolver::new(client, store, manifest, cfg.supported_pdb_names.clone());

    // --- Build router ---
    let app: Router = routes::routes::routes().with_state(resolver);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
