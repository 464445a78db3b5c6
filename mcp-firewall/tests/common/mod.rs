//! Shared fixtures for the integration suite.

// Each test binary uses its own subset of these helpers.
#![allow(dead_code)]

use std::sync::Arc;

use camino::Utf8PathBuf;
use mcp_firewall::FwState;
use mcp_firewall::audit::{AuditReceiver, audit_channel};
use mcp_firewall::classify::Classifier;
use mcp_firewall::config::{Conf, ConfHandle, TokenBackend};
use mcp_firewall::detect::Detector;
use mcp_firewall::pipeline::Pipeline;
use mcp_firewall::policy::PolicyDocument;
use mcp_firewall::task::ShutdownHandle;
use mcp_firewall::token::store::MemoryTokenStore;
use mcp_firewall::token::{DEFAULT_TTL, Tokenizer};
use url::Url;
use zeroize::Zeroizing;

pub const TEST_SALT: &[u8] = b"integration-salt-0123456789";

/// Policy exercised by the scenarios: secrets block, PII redacts, region
/// `cn` is restricted, `incident-mgr` is trusted for PII.
pub fn scenario_policy() -> PolicyDocument {
    serde_yaml::from_str(
        r#"
version: 7
restricted_regions: [cn]
region_routing:
  us:
    allow_external: true
    preferred_models: [gpt-4o]
    internal_fallback: [llama-70b]
  restricted:
    allow_external: false
    internal_fallback: [internal-7b]
trusted_callers: [incident-mgr]
caller_routing:
  incident-mgr:
    allow_categories: [pii, ops_sensitive]
routes:
  - name: block-secrets
    match: { category: secret }
    action: block
  - name: redact-pii
    match: { category: pii }
    action: redact
    allow_categories: [pii]
  - name: default-allow
    match: { category: null }
    action: allow
"#,
    )
    .expect("scenario policy parses")
}

/// Route ordering that exposes cross-message decision mixing: a permissive
/// PII route sits in front of an ops_sensitive block. A message carrying
/// only ops_sensitive content must still block, even when another message
/// in the same request matched the PII route.
pub fn layered_policy() -> PolicyDocument {
    serde_yaml::from_str(
        r#"
version: 9
region_routing:
  us:
    allow_external: true
    preferred_models: [gpt-4o]
    internal_fallback: [llama-70b]
trusted_callers: [incident-mgr]
caller_routing:
  incident-mgr:
    allow_categories: [pii]
routes:
  - name: redact-pii
    match: { category: pii }
    action: redact
    allow_categories: [pii]
  - name: block-ops
    match: { category: ops_sensitive }
    action: block
  - name: default-allow
    match: { category: null }
    action: allow
"#,
    )
    .expect("layered policy parses")
}

/// Variant used for the deterministic-redaction and zero-leak scenarios:
/// secrets are redacted rather than blocked.
pub fn redacting_policy() -> PolicyDocument {
    serde_yaml::from_str(
        r#"
version: 8
region_routing:
  us:
    allow_external: true
    preferred_models: [gpt-4o]
trusted_callers: [incident-mgr]
caller_routing:
  incident-mgr: {}
routes:
  - name: redact-secrets
    match: { category: secret }
    action: redact
  - name: redact-pii
    match: { category: pii }
    action: redact
  - name: default-allow
    match: { category: null }
    action: allow
"#,
    )
    .expect("redacting policy parses")
}

pub fn conf_with(policy: PolicyDocument) -> Conf {
    Conf {
        listen_addr: "127.0.0.1:0".parse().expect("valid addr"),
        salt: Zeroizing::new(TEST_SALT.to_vec()),
        token_backend: TokenBackend::Memory,
        remote_url: None,
        encryption_key: None,
        policy: Arc::new(policy),
        audit_path: Utf8PathBuf::from("target/test-audit.jsonl"),
        max_payload_bytes: 256 * 1024,
        proxy_enabled: true,
        upstream_openai: Url::parse("https://api.openai.com").expect("valid URL"),
        upstream_anthropic: Url::parse("https://api.anthropic.com").expect("valid URL"),
        upstream_google: Url::parse("https://generativelanguage.googleapis.com").expect("valid URL"),
        siem: None,
        default_region: "us".to_owned(),
        default_env: "prod".to_owned(),
        token_ttl: DEFAULT_TTL,
        internal_domain_suffixes: vec!["internal".to_owned()],
        classifier_keywords: Vec::new(),
        classifier_threshold: 2,
        log_path: None,
        log_filter: "info".to_owned(),
    }
}

pub fn pipeline_with(conf: &Conf) -> Pipeline {
    Pipeline::new(
        Detector::new(&conf.internal_domain_suffixes),
        Classifier::new(&conf.classifier_keywords, conf.classifier_threshold),
        Arc::clone(&conf.policy),
        Tokenizer::new(conf.salt.to_vec()),
        Arc::new(MemoryTokenStore::new(conf.token_ttl)),
        conf.token_ttl,
        conf.max_payload_bytes,
    )
}

/// Full state for router-level tests. The returned receiver and handle keep
/// the audit channel and shutdown watch alive for the test's duration.
pub fn state_with(conf: Conf) -> (FwState, AuditReceiver, ShutdownHandle) {
    let pipeline = pipeline_with(&conf);
    let (audit, audit_rx) = audit_channel(None);
    let (shutdown_handle, shutdown_signal) = ShutdownHandle::new();

    let state = FwState {
        conf_handle: ConfHandle::mock(conf),
        pipeline: Arc::new(pipeline),
        audit,
        upstream: reqwest::Client::new(),
        shutdown_signal,
    };

    (state, audit_rx, shutdown_handle)
}
