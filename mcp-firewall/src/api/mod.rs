pub mod audit_query;
pub mod classify;
pub mod detokenize;
pub mod health;
pub mod redact;
pub mod route;

use crate::FwState;

pub fn make_router(state: FwState) -> axum::Router {
    let mut router = axum::Router::new()
        .route("/health", axum::routing::get(health::get_health))
        .route("/classify", axum::routing::post(classify::post_classify))
        .route("/redact", axum::routing::post(redact::post_redact))
        .route("/detokenize", axum::routing::post(detokenize::post_detokenize))
        .route("/route", axum::routing::post(route::post_route))
        .route("/audit/query", axum::routing::post(audit_query::post_query));

    if state.conf_handle.get_conf().proxy_enabled {
        router = router.merge(crate::proxy::make_router(state.clone()));
    }

    router
        .layer(axum::middleware::from_fn(crate::middleware::log::log_middleware))
        .with_state(state)
}
