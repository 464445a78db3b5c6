use axum::Json;
use axum::extract::State;
use serde::{Deserialize, Serialize};

use crate::FwState;
use crate::audit::{AuditAction, AuditRecord};
use crate::extract::JsonBody;
use crate::http::HttpError;
use crate::policy::{Action, Context, Decision};

#[derive(Debug, Deserialize)]
pub(crate) struct RouteRequest {
    model_request: ModelRequest,
    context: Context,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ModelRequest {
    text: String,
}

#[derive(Serialize)]
pub(crate) struct RouteResponse {
    decision: Decision,
    pre_steps: Vec<&'static str>,
    post_steps: Vec<&'static str>,
}

/// Dry-run of the policy: which steps would the proxy take for this text?
pub(super) async fn post_route(
    State(state): State<FwState>,
    JsonBody(request): JsonBody<RouteRequest>,
) -> Result<Json<RouteResponse>, HttpError> {
    let inspection = state.pipeline.inspect(&request.model_request.text, &request.context)?;
    let decision = inspection.decision.clone();

    let mut pre_steps = vec!["classify"];
    let mut post_steps = Vec::new();

    if decision.action == Action::Block {
        post_steps.push("audit");
    } else {
        if decision.requires_redaction || !inspection.spans.is_empty() {
            pre_steps.push("redact");
        }
        if !decision.allowed_detokenize_categories.is_empty() {
            post_steps.push("detokenize");
        }
        post_steps.push("audit");
    }

    state.audit.emit(
        AuditRecord {
            payload_bytes: request.model_request.text.len(),
            ..AuditRecord::new(AuditAction::Route, request.context)
        }
        .with_spans(inspection.spans.iter().cloned().chain(inspection.advisory))
        .with_decision(inspection.decision),
    );

    Ok(Json(RouteResponse {
        decision,
        pre_steps,
        post_steps,
    }))
}
