use axum::Json;
use axum::extract::State;
use serde::{Deserialize, Serialize};

use crate::FwState;
use crate::extract::JsonBody;
use crate::http::HttpError;

const DEFAULT_LIMIT: usize = 100;
const MAX_LIMIT: usize = 1000;

#[derive(Debug, Deserialize)]
pub(crate) struct QueryRequest {
    #[serde(default)]
    q: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
}

#[derive(Serialize)]
pub(crate) struct QueryResponse {
    records: Vec<serde_json::Value>,
}

/// Substring search over the local audit log; newest records win when the
/// result set is clipped.
pub(super) async fn post_query(
    State(state): State<FwState>,
    JsonBody(request): JsonBody<QueryRequest>,
) -> Result<Json<QueryResponse>, HttpError> {
    let conf = state.conf_handle.get_conf();
    let limit = request.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);

    let contents = match tokio::fs::read_to_string(conf.audit_path.as_std_path()).await {
        Ok(contents) => contents,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(error) => return Err(HttpError::internal().with_msg("failed to read the audit log").err()(error)),
    };

    let matching: Vec<&str> = contents
        .lines()
        .filter(|line| match &request.q {
            Some(q) => line.contains(q.as_str()),
            None => true,
        })
        .collect();

    let records = matching
        .iter()
        .rev()
        .take(limit)
        .rev()
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect();

    Ok(Json(QueryResponse { records }))
}
