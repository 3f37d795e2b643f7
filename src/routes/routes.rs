//! Routes of the symbol proxy.
//!
//! - `GET /{filename}/{hash}/{filename2}` — symbol lookup (two-tier layout)
//! - `GET /index2.txt` — always 404, so debuggers skip the three-tier layout
//! - `GET /version` — crate version as plain text
//! - `GET /healthz`, `GET /readyz` — liveness and readiness

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        symbol_handlers::{get_symbol, index2, version},
    },
    services::resolver::SymbolResolver,
};
use axum::{Router, routing::get};

/// Build the router. Handlers share one [`SymbolResolver`] as state.
pub fn routes() -> Router<SymbolResolver> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/version", get(version))
        .route("/index2.txt", get(index2))
        .route("/{filename}/{hash}/{filename2}", get(get_symbol))
}
