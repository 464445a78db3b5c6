//! Request logging: one span per request, annotated with the caller
//! identity headers the firewall routes and audits on.

use std::time::Instant;

use axum::body::Body;
use axum::http::{HeaderMap, Request};
use axum::middleware::Next;
use axum::response::Response;
use tracing::Instrument as _;

use crate::http::HttpError;

fn identity_header<'h>(headers: &'h HeaderMap, name: &str) -> &'h str {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .unwrap_or("-")
}

pub async fn log_middleware(request: Request<Body>, next: Next) -> Result<Response, HttpError> {
    let method = request.method().clone();
    let caller = identity_header(request.headers(), "x-mcp-caller").to_owned();
    let region = identity_header(request.headers(), "x-mcp-region").to_owned();

    // Routes are fixed except for the Google model segment; clip anything
    // longer before it reaches the log. Percent-encoded paths are ASCII, so
    // the byte cut is safe.
    let path = request.uri().path();
    let path = path[..path.len().min(256)].to_owned();

    let is_health_check = path == "/health";

    let span = info_span!("request", %method, %path, %caller, %region);

    async move {
        let started = Instant::now();

        let response = next.run(request).await;

        let status = response.status();

        // Health probes arrive every few seconds; keep them out of the
        // default log level.
        if is_health_check {
            debug!(duration = ?started.elapsed(), %status);
        } else {
            info!(duration = ?started.elapsed(), %status);
        }

        Ok(response)
    }
    .instrument(span)
    .await
}
