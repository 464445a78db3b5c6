//! Anthropic Messages wire format.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::Response;
use serde_json::Value;

use crate::FwState;
use crate::http::HttpError;
use crate::proxy::{ProviderKind, forward};

/// POST /v1/messages — streaming and non-streaming.
pub(crate) async fn messages(
    State(state): State<FwState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, HttpError> {
    forward(
        state,
        ProviderKind::Anthropic,
        "/v1/messages".to_owned(),
        false,
        headers,
        body,
    )
    .await
}

fn visit_content(content: &mut Value, visit: &mut dyn FnMut(&mut String)) {
    match content {
        Value::String(text) => visit(text),
        Value::Array(parts) => {
            for part in parts {
                if part.get("type").and_then(Value::as_str) == Some("text") {
                    if let Some(Value::String(text)) = part.get_mut("text") {
                        visit(text);
                    }
                }
            }
        }
        _ => {}
    }
}

/// Top-level `system` plus `messages[*].content`, both shapes.
pub(crate) fn visit_request_texts(body: &mut Value, visit: &mut dyn FnMut(&mut String)) {
    if let Some(system) = body.get_mut("system") {
        visit_content(system, visit);
    }

    let Some(messages) = body.get_mut("messages").and_then(Value::as_array_mut) else {
        return;
    };

    for message in messages {
        if let Some(content) = message.get_mut("content") {
            visit_content(content, visit);
        }
    }
}

/// `content[*].text` for text blocks.
pub(crate) fn visit_response_texts(body: &mut Value, visit: &mut dyn FnMut(&mut String)) {
    let Some(content) = body.get_mut("content").and_then(Value::as_array_mut) else {
        return;
    };

    for block in content {
        if block.get("type").and_then(Value::as_str) == Some("text") {
            if let Some(Value::String(text)) = block.get_mut("text") {
                visit(text);
            }
        }
    }
}

/// SSE `content_block_delta` frames carrying `text_delta`.
pub(crate) fn visit_delta_texts(frame: &mut Value, visit: &mut dyn FnMut(&mut String)) {
    if frame.get("type").and_then(Value::as_str) != Some("content_block_delta") {
        return;
    }

    let Some(delta) = frame.get_mut("delta") else {
        return;
    };

    if delta.get("type").and_then(Value::as_str) == Some("text_delta") {
        if let Some(Value::String(text)) = delta.get_mut("text") {
            visit(text);
        }
    }
}

pub(crate) fn error_body(message: &str, kind: &str) -> Value {
    serde_json::json!({
        "type": "error",
        "error": {
            "type": kind,
            "message": message,
        }
    })
}
