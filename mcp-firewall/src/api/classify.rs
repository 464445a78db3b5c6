use axum::Json;
use axum::extract::State;
use serde::{Deserialize, Serialize};

use crate::FwState;
use crate::audit::{AuditAction, AuditRecord, CategoryObservation};
use crate::extract::JsonBody;
use crate::http::HttpError;
use crate::policy::{Context, Decision};

#[derive(Debug, Deserialize)]
pub(crate) struct ClassifyRequest {
    payload: String,
    context: Context,
}

#[derive(Serialize)]
pub(crate) struct ClassifyResponse {
    ok: bool,
    categories: Vec<CategoryObservation>,
    decision: Decision,
    suggested_action: &'static str,
}

/// Categories and the dry-run decision for a payload; nothing is stored.
pub(super) async fn post_classify(
    State(state): State<FwState>,
    JsonBody(request): JsonBody<ClassifyRequest>,
) -> Result<Json<ClassifyResponse>, HttpError> {
    let inspection = state.pipeline.inspect(&request.payload, &request.context)?;

    let record = AuditRecord {
        payload_bytes: request.payload.len(),
        ..AuditRecord::new(AuditAction::Classify, request.context)
    }
    .with_spans(inspection.spans.iter().cloned().chain(inspection.advisory.clone()))
    .with_decision(inspection.decision.clone());

    let response = ClassifyResponse {
        ok: true,
        categories: record.categories.clone(),
        suggested_action: inspection.decision.action.as_str(),
        decision: inspection.decision,
    };

    state.audit.emit(record);

    Ok(Json(response))
}
