//! OpenAI chat-completions wire format.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::Response;
use serde_json::Value;

use crate::FwState;
use crate::http::HttpError;
use crate::proxy::{ProviderKind, forward};

/// POST /v1/chat/completions — streaming and non-streaming.
pub(crate) async fn chat_completions(
    State(state): State<FwState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, HttpError> {
    forward(
        state,
        ProviderKind::OpenAi,
        "/v1/chat/completions".to_owned(),
        false,
        headers,
        body,
    )
    .await
}

/// `messages[*].content`, both the plain-string and array-of-parts shapes.
pub(crate) fn visit_request_texts(body: &mut Value, visit: &mut dyn FnMut(&mut String)) {
    let Some(messages) = body.get_mut("messages").and_then(Value::as_array_mut) else {
        return;
    };

    for message in messages {
        match message.get_mut("content") {
            Some(Value::String(text)) => visit(text),
            Some(Value::Array(parts)) => {
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
}

/// `choices[*].message.content`.
pub(crate) fn visit_response_texts(body: &mut Value, visit: &mut dyn FnMut(&mut String)) {
    let Some(choices) = body.get_mut("choices").and_then(Value::as_array_mut) else {
        return;
    };

    for choice in choices {
        if let Some(Value::String(text)) = choice.get_mut("message").and_then(|m| m.get_mut("content")) {
            visit(text);
        }
    }
}

/// SSE `choices[*].delta.content`.
pub(crate) fn visit_delta_texts(frame: &mut Value, visit: &mut dyn FnMut(&mut String)) {
    let Some(choices) = frame.get_mut("choices").and_then(Value::as_array_mut) else {
        return;
    };

    for choice in choices {
        if let Some(Value::String(text)) = choice.get_mut("delta").and_then(|d| d.get_mut("content")) {
            visit(text);
        }
    }
}

pub(crate) fn error_body(message: &str, kind: &str) -> Value {
    serde_json::json!({
        "error": {
            "message": message,
            "type": kind,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_texts_cover_both_content_shapes() {
        let mut body = serde_json::json!({
            "model": "gpt-4o",
            "messages": [
                { "role": "system", "content": "be terse" },
                { "role": "user", "content": [
                    { "type": "text", "text": "hello" },
                    { "type": "image_url", "image_url": { "url": "https://x/img.png" } },
                ]},
            ]
        });

        let mut seen = Vec::new();
        visit_request_texts(&mut body, &mut |text| seen.push(text.clone()));

        assert_eq!(seen, vec!["be terse".to_owned(), "hello".to_owned()]);
    }

    #[test]
    fn response_and_delta_texts() {
        let mut response = serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": "answer" } }]
        });
        let mut seen = Vec::new();
        visit_response_texts(&mut response, &mut |text| seen.push(text.clone()));
        assert_eq!(seen, vec!["answer".to_owned()]);

        let mut frame = serde_json::json!({
            "choices": [{ "delta": { "content": "chunk" }, "index": 0 }]
        });
        seen.clear();
        visit_delta_texts(&mut frame, &mut |text| seen.push(text.clone()));
        assert_eq!(seen, vec!["chunk".to_owned()]);
    }

    #[test]
    fn tool_call_arguments_pass_untouched() {
        let mut frame = serde_json::json!({
            "choices": [{ "delta": { "tool_calls": [{ "function": { "arguments": "{\"q\":1}" } }] } }]
        });
        let mut seen = Vec::new();
        visit_delta_texts(&mut frame, &mut |text| seen.push(text.clone()));
        assert!(seen.is_empty());
    }
}
