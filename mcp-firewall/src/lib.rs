#[macro_use]
extern crate tracing;

pub mod api;
pub mod audit;
pub mod classify;
pub mod config;
pub mod detect;
pub mod error;
pub mod extract;
pub mod http;
pub mod log;
pub mod middleware;
pub mod pipeline;
pub mod policy;
pub mod proxy;
pub mod service;
pub mod siem;
pub mod task;
pub mod token;

use std::sync::Arc;

use crate::audit::AuditHandle;
use crate::config::ConfHandle;
use crate::pipeline::Pipeline;
use crate::task::ShutdownSignal;

/// Process-wide state shared by every request handler.
#[derive(Clone)]
pub struct FwState {
    pub conf_handle: ConfHandle,
    pub pipeline: Arc<Pipeline>,
    pub audit: AuditHandle,
    pub upstream: reqwest::Client,
    pub shutdown_signal: ShutdownSignal,
}
