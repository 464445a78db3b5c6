//! Transparent provider proxy: redact → forward → detokenize.
//!
//! Three adapters translate between the provider wire formats; everything
//! else — context derivation, policy, token handling, auditing, streaming —
//! is shared. Bodies are manipulated as `serde_json::Value` so unknown
//! provider fields pass through byte-for-byte.

pub(crate) mod anthropic;
pub(crate) mod google;
pub(crate) mod openai;
pub mod stream;

use axum::Router;
use axum::body::Body;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse as _, Response};
use bytes::Bytes;
use futures::StreamExt as _;
use uuid::Uuid;

use crate::FwState;
use crate::audit::{AuditAction, AuditRecord};
use crate::config::Conf;
use crate::error::FirewallError;
use crate::http::HttpError;
use crate::pipeline::BatchRedaction;
use crate::policy::{Action, Context};
use stream::{SseRelay, StreamDetokenizer, relay_stream};

/// Upstream connect deadline.
pub(crate) const CONNECT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

/// Total deadline for non-streaming upstream exchanges.
const REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProviderKind {
    OpenAi,
    Anthropic,
    Google,
}

impl ProviderKind {
    pub(crate) fn name(self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Google => "google",
        }
    }

    fn default_caller(self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai-proxy",
            ProviderKind::Anthropic => "anthropic-proxy",
            ProviderKind::Google => "google-proxy",
        }
    }

    fn visit_request_texts(self, body: &mut serde_json::Value, visit: &mut dyn FnMut(&mut String)) {
        match self {
            ProviderKind::OpenAi => openai::visit_request_texts(body, visit),
            ProviderKind::Anthropic => anthropic::visit_request_texts(body, visit),
            ProviderKind::Google => google::visit_request_texts(body, visit),
        }
    }

    fn visit_response_texts(self, body: &mut serde_json::Value, visit: &mut dyn FnMut(&mut String)) {
        match self {
            ProviderKind::OpenAi => openai::visit_response_texts(body, visit),
            ProviderKind::Anthropic => anthropic::visit_response_texts(body, visit),
            ProviderKind::Google => google::visit_response_texts(body, visit),
        }
    }

    pub(crate) fn visit_delta_texts(self, frame: &mut serde_json::Value, visit: &mut dyn FnMut(&mut String)) {
        match self {
            ProviderKind::OpenAi => openai::visit_delta_texts(frame, visit),
            ProviderKind::Anthropic => anthropic::visit_delta_texts(frame, visit),
            ProviderKind::Google => google::visit_response_texts(frame, visit),
        }
    }

    pub(crate) fn error_body(self, message: &str, kind: &str) -> serde_json::Value {
        match self {
            ProviderKind::OpenAi => openai::error_body(message, kind),
            ProviderKind::Anthropic => anthropic::error_body(message, kind),
            ProviderKind::Google => google::error_body(message, kind),
        }
    }

    fn wants_stream(self, body: &serde_json::Value) -> bool {
        match self {
            ProviderKind::OpenAi | ProviderKind::Anthropic => {
                body.get("stream").and_then(serde_json::Value::as_bool) == Some(true)
            }
            // Google signals streaming through the path or `alt=sse`; handled
            // by the google adapter before `forward` is called.
            ProviderKind::Google => false,
        }
    }
}

pub(crate) fn make_router(state: FwState) -> Router<FwState> {
    Router::new()
        .route("/v1/chat/completions", axum::routing::post(openai::chat_completions))
        .route("/v1/messages", axum::routing::post(anthropic::messages))
        .route("/v1/models/{model_op}", axum::routing::post(google::generate_content_v1))
        .route("/v1beta/models/{model_op}", axum::routing::post(google::generate_content_v1beta))
        .with_state(state)
}

/// Derives the request [`Context`] from the `X-MCP-*` headers, with
/// configuration defaults and a fresh conversation id as fallbacks.
fn derive_context(headers: &HeaderMap, conf: &Conf, provider: ProviderKind) -> Context {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .filter(|value| !value.is_empty())
            .map(str::to_owned)
    };

    Context {
        caller: header("x-mcp-caller").unwrap_or_else(|| provider.default_caller().to_owned()),
        region: header("x-mcp-region").unwrap_or_else(|| conf.default_region.clone()),
        env: header("x-mcp-env").unwrap_or_else(|| conf.default_env.clone()),
        conversation_id: header("x-mcp-conversation-id").unwrap_or_else(|| Uuid::new_v4().to_string()),
    }
}

/// Headers that must not be forwarded to the upstream. `Authorization` is
/// deliberately absent: the caller's credentials pass through verbatim.
fn skip_request_header(name: &str) -> bool {
    matches!(
        name,
        "host" | "content-length" | "connection" | "transfer-encoding" | "accept-encoding" | "expect"
    ) || name.starts_with("x-mcp-")
}

fn skip_response_header(name: &str) -> bool {
    matches!(name, "content-length" | "transfer-encoding" | "connection" | "content-encoding")
}

struct PreparedRequest {
    body: serde_json::Value,
    ctx: Context,
    redaction: BatchRedaction,
    wants_stream: bool,
}

/// Runs the ingress half of the pipeline: parse, derive context, redact,
/// apply policy, rewrite the model field, audit.
async fn prepare(
    state: &FwState,
    provider: ProviderKind,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<PreparedRequest, Response> {
    let conf = state.conf_handle.get_conf();
    let ctx = derive_context(headers, &conf, provider);

    let mut body: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(body) => body,
        Err(error) => {
            debug!(%error, "Malformed provider request body");
            return Err(provider_error_response(
                provider,
                StatusCode::BAD_REQUEST,
                "request body is not valid JSON",
                "invalid_request_error",
            ));
        }
    };

    let mut texts = Vec::new();
    provider.visit_request_texts(&mut body, &mut |text| texts.push(text.clone()));

    let wants_stream = provider.wants_stream(&body);

    let redaction = match state.pipeline.redact_batch(&texts, &ctx).await {
        Ok(redaction) => redaction,
        Err(FirewallError::PolicyBlocked(reason)) => {
            let mut record = AuditRecord {
                payload_bytes: texts.iter().map(String::len).sum(),
                ..AuditRecord::new(AuditAction::Route, ctx.clone())
            };

            if let Some(inspection) = first_blocking_inspection(state, &texts, &ctx) {
                record = record
                    .with_spans(inspection.spans.iter().cloned().chain(inspection.advisory.clone()))
                    .with_decision(inspection.decision);
            }

            state.audit.emit(record);

            info!(provider = provider.name(), %reason, "Request blocked by policy");

            return Err(provider_error_response(
                provider,
                StatusCode::UNAVAILABLE_FOR_LEGAL_REASONS,
                "request blocked by policy",
                "policy_blocked",
            ));
        }
        Err(error) => return Err(HttpError::from(error).into_response_for(provider)),
    };

    let mut sanitized = redaction.sanitized.iter();
    provider.visit_request_texts(&mut body, &mut |text| {
        if let Some(replacement) = sanitized.next() {
            *text = replacement.clone();
        }
    });

    // Internal-only routing rewrites the model field when it differs. The
    // Google adapter carries the model in the path; `forward` handles it.
    if redaction.decision.action == Action::InternalOnly && provider != ProviderKind::Google {
        if let Some(target) = &redaction.decision.target_model {
            if let Some(model) = body.get_mut("model") {
                if model.as_str() != Some(target.as_str()) {
                    *model = serde_json::Value::String(target.clone());
                }
            }
        }
    }

    state.audit.emit(
        AuditRecord {
            redacted: redaction.replaced,
            payload_bytes: texts.iter().map(String::len).sum(),
            ..AuditRecord::new(AuditAction::Redact, ctx.clone())
        }
        .with_spans(redaction.spans.iter().cloned()),
    );

    Ok(PreparedRequest {
        body,
        ctx,
        redaction,
        wants_stream,
    })
}

/// Finds the message whose own decision was `block`; its inspection feeds
/// the audit record for the refused request.
fn first_blocking_inspection(state: &FwState, texts: &[String], ctx: &Context) -> Option<crate::pipeline::Inspection> {
    texts.iter().find_map(|text| {
        state
            .pipeline
            .inspect(text, ctx)
            .ok()
            .filter(|inspection| inspection.decision.action == Action::Block)
    })
}

impl HttpError {
    /// Renders this error in the provider's own error shape so client SDKs
    /// degrade gracefully.
    fn into_response_for(self, provider: ProviderKind) -> Response {
        error!(error = %self);

        let message = self
            .msg
            .unwrap_or_else(|| self.code.canonical_reason().unwrap_or("unknown error"));

        provider_error_response(provider, self.code, message, "upstream_error")
    }
}

fn provider_error_response(provider: ProviderKind, status: StatusCode, message: &str, kind: &str) -> Response {
    let body = provider.error_body(message, kind);

    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap_or_else(|_| status.into_response())
}

/// The whole proxy pipeline for one request.
pub(crate) async fn forward(
    state: FwState,
    provider: ProviderKind,
    upstream_path: String,
    force_stream: bool,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, HttpError> {
    let conf = state.conf_handle.get_conf();

    let prepared = match prepare(&state, provider, &headers, body).await {
        Ok(prepared) => prepared,
        Err(response) => return Ok(response),
    };

    let wants_stream = prepared.wants_stream || force_stream;

    let upstream_path = if provider == ProviderKind::Google
        && prepared.redaction.decision.action == Action::InternalOnly
    {
        match &prepared.redaction.decision.target_model {
            Some(target) => google::rewrite_model_path(&upstream_path, target),
            None => upstream_path,
        }
    } else {
        upstream_path
    };

    let base = match provider {
        ProviderKind::OpenAi => &conf.upstream_openai,
        ProviderKind::Anthropic => &conf.upstream_anthropic,
        ProviderKind::Google => &conf.upstream_google,
    };
    let url = format!("{}{}", base.as_str().trim_end_matches('/'), upstream_path);

    let mut request = state.upstream.post(&url);

    for (name, value) in headers.iter() {
        if !skip_request_header(name.as_str()) {
            request = request.header(name, value);
        }
    }

    if !wants_stream {
        request = request.timeout(REQUEST_TIMEOUT);
    }

    debug!(%url, provider = provider.name(), stream = wants_stream, "Forwarding sanitized request");

    let upstream_response = request
        .json(&prepared.body)
        .send()
        .await
        .map_err(HttpError::bad_gateway().with_msg("upstream request failed").err())?;

    let status = upstream_response.status();

    // Restoration is attempted only for trusted callers; everyone else gets
    // placeholders back.
    let allow = if state.pipeline.policy().is_trusted(&prepared.ctx.caller) {
        state
            .pipeline
            .effective_allowance(&prepared.redaction.decision.allowed_detokenize_categories, &prepared.ctx.caller)
    } else {
        Default::default()
    };

    let mut route_record = AuditRecord {
        upstream_status: Some(status.as_u16()),
        ..AuditRecord::new(AuditAction::Route, prepared.ctx.clone())
    }
    .with_decision(prepared.redaction.decision.clone());

    if !status.is_success() {
        // Relay the upstream failure verbatim; no detokenization on error
        // bodies.
        info!(provider = provider.name(), %status, "Upstream responded with a failure status");
        state.audit.emit(route_record);

        let mut response = Response::builder().status(status);
        for (name, value) in upstream_response.headers() {
            if !skip_response_header(name.as_str()) {
                response = response.header(name, value);
            }
        }

        let bytes = upstream_response
            .bytes()
            .await
            .map_err(HttpError::bad_gateway().with_msg("failed to read upstream error body").err())?;

        return response
            .body(Body::from(bytes))
            .map_err(HttpError::internal().err());
    }

    if wants_stream {
        let mut response = Response::builder().status(status);
        for (name, value) in upstream_response.headers() {
            if !skip_response_header(name.as_str()) {
                response = response.header(name, value);
            }
        }
        if !upstream_response.headers().contains_key(header::CONTENT_TYPE) {
            response = response.header(header::CONTENT_TYPE, "text/event-stream");
        }

        let detok = (!allow.is_empty())
            .then(|| StreamDetokenizer::new(prepared.redaction.record.clone(), allow));

        let relay = SseRelay::new(upstream_response.bytes_stream().boxed(), provider, detok);

        state.audit.emit(route_record);

        return response
            .body(Body::from_stream(relay_stream(relay)))
            .map_err(HttpError::internal().err());
    }

    let upstream_headers = upstream_response.headers().clone();

    let bytes = upstream_response
        .bytes()
        .await
        .map_err(HttpError::bad_gateway().with_msg("failed to read upstream response").err())?;

    let mut response_body: serde_json::Value = serde_json::from_slice(&bytes)
        .map_err(HttpError::bad_gateway().with_msg("upstream response is not valid JSON").err())?;

    let mut restored = 0;
    if !allow.is_empty() {
        provider.visit_response_texts(&mut response_body, &mut |text| {
            let (new_text, count) = crate::token::substitute(text, &prepared.redaction.record, &allow);
            *text = new_text;
            restored += count;
        });
    }

    route_record.restored = restored;
    state.audit.emit(route_record);

    let mut response = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    for (name, value) in &upstream_headers {
        if !skip_response_header(name.as_str()) && name != header::CONTENT_TYPE {
            response = response.header(name, value);
        }
    }

    response
        .body(Body::from(response_body.to_string()))
        .map_err(HttpError::internal().err())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_derivation_prefers_headers() {
        let conf = crate::config::test_conf(crate::policy::PolicyDocument::builtin());
        let mut headers = HeaderMap::new();
        headers.insert("x-mcp-caller", HeaderValue::from_static("svc-a"));
        headers.insert("x-mcp-region", HeaderValue::from_static("eu"));
        headers.insert("x-mcp-conversation-id", HeaderValue::from_static("c9"));

        let ctx = derive_context(&headers, &conf, ProviderKind::OpenAi);

        assert_eq!(ctx.caller, "svc-a");
        assert_eq!(ctx.region, "eu");
        assert_eq!(ctx.env, "prod");
        assert_eq!(ctx.conversation_id, "c9");
    }

    #[test]
    fn context_derivation_falls_back_to_defaults() {
        let conf = crate::config::test_conf(crate::policy::PolicyDocument::builtin());
        let ctx = derive_context(&HeaderMap::new(), &conf, ProviderKind::Anthropic);

        assert_eq!(ctx.caller, "anthropic-proxy");
        assert_eq!(ctx.region, "us");
        // A fresh conversation id is a UUID.
        assert_eq!(ctx.conversation_id.len(), 36);
    }

    #[test]
    fn mcp_headers_never_reach_the_upstream() {
        assert!(skip_request_header("x-mcp-caller"));
        assert!(skip_request_header("host"));
        assert!(!skip_request_header("authorization"));
        assert!(!skip_request_header("anthropic-version"));
    }
}
