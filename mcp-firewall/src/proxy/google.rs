//! Google generateContent wire format.
//!
//! The model name rides in the path (`/v1beta/models/{model}:generateContent`),
//! and streaming is requested through `:streamGenerateContent` or `alt=sse`.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, Uri};
use axum::response::Response;
use serde_json::Value;

use crate::FwState;
use crate::http::HttpError;
use crate::proxy::{ProviderKind, forward};

pub(crate) async fn generate_content_v1(
    State(state): State<FwState>,
    Path(model_op): Path<String>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, HttpError> {
    generate_content(state, "v1", model_op, uri, headers, body).await
}

pub(crate) async fn generate_content_v1beta(
    State(state): State<FwState>,
    Path(model_op): Path<String>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, HttpError> {
    generate_content(state, "v1beta", model_op, uri, headers, body).await
}

async fn generate_content(
    state: FwState,
    version: &str,
    model_op: String,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, HttpError> {
    let query = uri.query().map(|q| format!("?{q}")).unwrap_or_default();

    let wants_stream = model_op.contains(":streamGenerateContent") || query.contains("alt=sse");

    let upstream_path = format!("/{version}/models/{model_op}{query}");

    forward(state, ProviderKind::Google, upstream_path, wants_stream, headers, body).await
}

/// Replaces the model segment of `/{version}/models/{model}:{op}{query}`.
pub(crate) fn rewrite_model_path(path: &str, target_model: &str) -> String {
    let Some(models_at) = path.find("/models/") else {
        return path.to_owned();
    };

    let prefix_end = models_at + "/models/".len();
    let rest = &path[prefix_end..];

    match rest.find(':') {
        Some(colon) => format!("{}{}{}", &path[..prefix_end], target_model, &rest[colon..]),
        None => format!("{}{}", &path[..prefix_end], target_model),
    }
}

/// `contents[*].parts[*].text` plus `systemInstruction.parts[*].text`.
pub(crate) fn visit_request_texts(body: &mut Value, visit: &mut dyn FnMut(&mut String)) {
    if let Some(parts) = body
        .get_mut("systemInstruction")
        .and_then(|si| si.get_mut("parts"))
        .and_then(Value::as_array_mut)
    {
        for part in parts {
            if let Some(Value::String(text)) = part.get_mut("text") {
                visit(text);
            }
        }
    }

    let Some(contents) = body.get_mut("contents").and_then(Value::as_array_mut) else {
        return;
    };

    for content in contents {
        let Some(parts) = content.get_mut("parts").and_then(Value::as_array_mut) else {
            continue;
        };

        for part in parts {
            if let Some(Value::String(text)) = part.get_mut("text") {
                visit(text);
            }
        }
    }
}

/// `candidates[*].content.parts[*].text`; the SSE frames share this shape.
pub(crate) fn visit_response_texts(body: &mut Value, visit: &mut dyn FnMut(&mut String)) {
    let Some(candidates) = body.get_mut("candidates").and_then(Value::as_array_mut) else {
        return;
    };

    for candidate in candidates {
        let Some(parts) = candidate
            .get_mut("content")
            .and_then(|content| content.get_mut("parts"))
            .and_then(Value::as_array_mut)
        else {
            continue;
        };

        for part in parts {
            if let Some(Value::String(text)) = part.get_mut("text") {
                visit(text);
            }
        }
    }
}

pub(crate) fn error_body(message: &str, kind: &str) -> Value {
    let code = match kind {
        "policy_blocked" => 451,
        "invalid_request_error" => 400,
        _ => 502,
    };

    serde_json::json!({
        "error": {
            "code": code,
            "message": message,
            "status": kind.to_uppercase(),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_texts_cover_system_instruction_and_contents() {
        let mut body = serde_json::json!({
            "systemInstruction": { "parts": [{ "text": "be brief" }] },
            "contents": [
                { "role": "user", "parts": [{ "text": "question" }, { "inlineData": { "data": "..." } }] }
            ]
        });

        let mut seen = Vec::new();
        visit_request_texts(&mut body, &mut |text| seen.push(text.clone()));

        assert_eq!(seen, vec!["be brief".to_owned(), "question".to_owned()]);
    }

    #[test]
    fn response_texts_walk_candidates() {
        let mut body = serde_json::json!({
            "candidates": [
                { "content": { "parts": [{ "text": "answer" }], "role": "model" } }
            ]
        });

        let mut seen = Vec::new();
        visit_response_texts(&mut body, &mut |text| seen.push(text.clone()));
        assert_eq!(seen, vec!["answer".to_owned()]);
    }

    #[test]
    fn model_path_rewrites_keep_operation_and_query() {
        assert_eq!(
            rewrite_model_path("/v1beta/models/gemini-pro:generateContent?alt=sse", "internal-7b"),
            "/v1beta/models/internal-7b:generateContent?alt=sse"
        );
        assert_eq!(
            rewrite_model_path("/v1/models/gemini-pro:streamGenerateContent", "internal-7b"),
            "/v1/models/internal-7b:streamGenerateContent"
        );
    }
}
