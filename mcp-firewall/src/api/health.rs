use axum::Json;
use axum::extract::State;
use serde::Serialize;

use crate::FwState;

#[derive(Serialize)]
pub(crate) struct HealthResponse {
    status: &'static str,
    version: &'static str,
    token_backend: &'static str,
    policy_version: u32,
    siem_enabled: bool,
}

/// Performs a health check
pub(super) async fn get_health(State(state): State<FwState>) -> Json<HealthResponse> {
    let conf = state.conf_handle.get_conf();

    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        token_backend: state.pipeline.store().backend_name(),
        policy_version: conf.policy.version,
        siem_enabled: state.audit.siem_enabled(),
    })
}
