use axum::Json;
use axum::extract::State;
use serde::{Deserialize, Serialize};

use crate::FwState;
use crate::audit::{AuditAction, AuditRecord};
use crate::error::FirewallError;
use crate::extract::JsonBody;
use crate::http::HttpError;
use crate::policy::Context;

#[derive(Debug, Deserialize)]
pub(crate) struct RedactRequest {
    payload: String,
    context: Context,
}

#[derive(Serialize)]
pub(crate) struct RedactResponse {
    sanitized_payload: String,
    token_map_handle: String,
}

/// Replaces detected spans with placeholders and returns the record handle.
/// A `block` decision answers 451 and creates no record.
pub(super) async fn post_redact(
    State(state): State<FwState>,
    JsonBody(request): JsonBody<RedactRequest>,
) -> Result<Json<RedactResponse>, HttpError> {
    match state.pipeline.redact(&request.payload, &request.context).await {
        Ok(redaction) => {
            state.audit.emit(
                AuditRecord {
                    redacted: redaction.replaced,
                    payload_bytes: request.payload.len(),
                    ..AuditRecord::new(AuditAction::Redact, request.context)
                }
                .with_spans(redaction.spans.iter().cloned())
                .with_decision(redaction.decision),
            );

            Ok(Json(RedactResponse {
                sanitized_payload: redaction.sanitized,
                token_map_handle: redaction.record.handle,
            }))
        }
        Err(error @ FirewallError::PolicyBlocked(_)) => {
            // Re-inspect for the audit trail; the redaction path dropped its
            // work before creating any record.
            if let Ok(inspection) = state.pipeline.inspect(&request.payload, &request.context) {
                state.audit.emit(
                    AuditRecord {
                        payload_bytes: request.payload.len(),
                        ..AuditRecord::new(AuditAction::Redact, request.context)
                    }
                    .with_spans(inspection.spans.iter().cloned().chain(inspection.advisory))
                    .with_decision(inspection.decision),
                );
            }

            Err(error.into())
        }
        Err(error) => Err(error.into()),
    }
}
