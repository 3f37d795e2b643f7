//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that checks the cache root is writable

use crate::services::resolver::SymbolResolver;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::collections::HashMap;
use tracing::warn;

/// `GET /healthz`
///
/// Liveness only; never touches disk or the registry.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// Write/read/delete check under the cache root. HTTP 200 when it passes,
/// HTTP 503 otherwise.
pub async fn readyz(State(resolver): State<SymbolResolver>) -> impl IntoResponse {
    let disk_check = resolver.store().check_writable().await;
    if let Err(reason) = &disk_check {
        warn!(
            root = %resolver.store().root().display(),
            reason = %reason,
            "readiness check failed"
        );
    }
    let disk_ok = disk_check.is_ok();

    let mut checks = HashMap::new();
    checks.insert(
        "disk",
        CheckStatus {
            ok: disk_ok,
            error: disk_check.err(),
        },
    );

    let body = ReadyResponse {
        status: if disk_ok { "ok".into() } else { "error".into() },
        checks,
    };
    let status = if disk_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    checks: HashMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}
