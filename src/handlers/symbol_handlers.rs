//! Symbol-server endpoints.
//!
//! Only the simple two-tier layout is supported: `/{file}/{id}/{file}`.
//! Bodies are streamed from disk.

use crate::{errors::AppError, services::resolver::SymbolResolver};
use axum::{
    body::Body,
    extract::{Path, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use tokio_util::io::ReaderStream;
use tracing::error;

/// `GET /{filename}/{hash}/{filename2}`
pub async fn get_symbol(
    State(resolver): State<SymbolResolver>,
    Path((filename, hash, filename2)): Path<(String, String, String)>,
) -> Result<Response, AppError> {
    let found = resolver
        .resolve(&filename, &hash, &filename2)
        .await
        .map_err(|err| {
            error!(filename = %filename, hash = %hash, error = %err, "symbol lookup failed");
            AppError::from(err)
        })?;
    let Some(symbol) = found else {
        return Ok(StatusCode::NOT_FOUND.into_response());
    };

    let body = Body::from_stream(ReaderStream::new(symbol.file));
    let mut response = Response::new(body);
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(symbol.size));
    Ok(response)
}

/// `GET /index2.txt`. Always 404: clients fall back to the flat layout.
pub async fn index2() -> StatusCode {
    StatusCode::NOT_FOUND
}

/// `GET /version`
pub async fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
