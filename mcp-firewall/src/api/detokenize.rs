use std::collections::BTreeSet;

use axum::Json;
use axum::extract::State;
use serde::{Deserialize, Serialize};

use crate::FwState;
use crate::audit::{AuditAction, AuditRecord};
use crate::detect::Category;
use crate::extract::JsonBody;
use crate::http::HttpError;
use crate::policy::Context;

#[derive(Debug, Deserialize)]
pub(crate) struct DetokenizeRequest {
    payload: String,
    token_map_handle: String,
    #[serde(default)]
    allow_categories: BTreeSet<Category>,
    context: Context,
}

#[derive(Serialize)]
pub(crate) struct DetokenizeResponse {
    restored_payload: String,
}

/// Restores the allowed placeholders. Untrusted callers get 403, unknown or
/// expired handles 410; `secret` placeholders are never restored.
pub(super) async fn post_detokenize(
    State(state): State<FwState>,
    JsonBody(request): JsonBody<DetokenizeRequest>,
) -> Result<Json<DetokenizeResponse>, HttpError> {
    let result = state
        .pipeline
        .detokenize(
            &request.payload,
            &request.token_map_handle,
            &request.allow_categories,
            &request.context.caller,
        )
        .await?;

    state.audit.emit(AuditRecord {
        restored: result.count,
        payload_bytes: request.payload.len(),
        ..AuditRecord::new(AuditAction::Detokenize, request.context)
    });

    Ok(Json(DetokenizeResponse {
        restored_payload: result.restored,
    }))
}
