//! Environment-driven configuration.
//!
//! Everything is resolved once at startup; a missing salt, an unreadable or
//! malformed policy file, or an incomplete remote-store setup is a fatal
//! startup error. The resulting `Conf` is immutable and shared read-only.

use std::collections::BTreeSet;
use std::env;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context as _;
use base64::Engine as _;
use camino::Utf8PathBuf;
use url::Url;
use zeroize::Zeroizing;

use crate::policy::PolicyDocument;
use crate::siem::{SiemConf, SiemKind};

pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 262_144;
pub const DEFAULT_TOKEN_TTL_SECS: u64 = 24 * 60 * 60;

const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_UPSTREAM_OPENAI: &str = "https://api.openai.com";
const DEFAULT_UPSTREAM_ANTHROPIC: &str = "https://api.anthropic.com";
const DEFAULT_UPSTREAM_GOOGLE: &str = "https://generativelanguage.googleapis.com";
const DEFAULT_INTERNAL_DOMAIN_SUFFIXES: &str = "internal,corp,local,lan";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenBackend {
    Memory,
    Remote,
}

impl TokenBackend {
    pub fn as_str(self) -> &'static str {
        match self {
            TokenBackend::Memory => "memory",
            TokenBackend::Remote => "remote",
        }
    }
}

#[derive(Clone)]
pub struct Conf {
    pub listen_addr: SocketAddr,
    /// Process-wide HMAC salt for placeholder generation.
    pub salt: Zeroizing<Vec<u8>>,
    pub token_backend: TokenBackend,
    pub remote_url: Option<Url>,
    /// Key material for the remote store cipher.
    pub encryption_key: Option<Zeroizing<Vec<u8>>>,
    pub policy: Arc<PolicyDocument>,
    pub audit_path: Utf8PathBuf,
    pub max_payload_bytes: usize,
    pub proxy_enabled: bool,
    pub upstream_openai: Url,
    pub upstream_anthropic: Url,
    pub upstream_google: Url,
    pub siem: Option<SiemConf>,
    pub default_region: String,
    pub default_env: String,
    pub token_ttl: time::Duration,
    pub internal_domain_suffixes: Vec<String>,
    pub classifier_keywords: Vec<String>,
    pub classifier_threshold: usize,
    pub log_path: Option<Utf8PathBuf>,
    pub log_filter: String,
}

impl Conf {
    pub fn from_env() -> anyhow::Result<Self> {
        let salt = env::var("SALT_ENV").context("SALT_ENV is required")?;
        anyhow::ensure!(salt.len() >= 16, "SALT_ENV must be at least 16 bytes");
        let salt = Zeroizing::new(salt.into_bytes());

        let token_backend = match env_opt("TOKEN_BACKEND").as_deref() {
            None | Some("memory") => TokenBackend::Memory,
            Some("remote") => TokenBackend::Remote,
            Some(other) => anyhow::bail!("unknown TOKEN_BACKEND '{other}' (expected memory or remote)"),
        };

        let remote_url = env_opt("REMOTE_URL")
            .map(|raw| Url::parse(&raw).context("invalid REMOTE_URL"))
            .transpose()?;

        let encryption_key = env_opt("ENCRYPTION_KEY").map(|raw| Zeroizing::new(decode_key_material(&raw)));

        if token_backend == TokenBackend::Remote {
            anyhow::ensure!(remote_url.is_some(), "REMOTE_URL is required when TOKEN_BACKEND=remote");
            anyhow::ensure!(
                encryption_key.is_some(),
                "ENCRYPTION_KEY is required when TOKEN_BACKEND=remote"
            );
        }

        let policy = match env_opt("POLICY_PATH") {
            Some(path) => {
                let raw = std::fs::read_to_string(&path)
                    .with_context(|| format!("failed to read policy file at {path}"))?;
                let document: PolicyDocument =
                    serde_yaml::from_str(&raw).with_context(|| format!("malformed policy file at {path}"))?;
                validate_policy(&document)?;
                document
            }
            None => PolicyDocument::builtin(),
        };

        let listen_addr = env_opt("LISTEN_ADDR")
            .unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_owned())
            .parse()
            .context("invalid LISTEN_ADDR")?;

        let audit_path = env_opt("AUDIT_PATH")
            .map(Utf8PathBuf::from)
            .unwrap_or_else(|| Utf8PathBuf::from("firewall-audit.jsonl"));

        let max_payload_bytes = match env_opt("MAX_PAYLOAD_BYTES") {
            Some(raw) => raw.parse().context("invalid MAX_PAYLOAD_BYTES")?,
            None => DEFAULT_MAX_PAYLOAD_BYTES,
        };

        let token_ttl_secs = match env_opt("TOKEN_TTL_SECS") {
            Some(raw) => raw.parse::<i64>().context("invalid TOKEN_TTL_SECS")?,
            None => i64::try_from(DEFAULT_TOKEN_TTL_SECS).expect("default TTL fits"),
        };
        anyhow::ensure!(token_ttl_secs > 0, "TOKEN_TTL_SECS must be positive");

        let siem = match env_opt("SIEM_TYPE").as_deref() {
            None | Some("none") => None,
            Some(kind) => {
                let kind = match kind {
                    "splunk" => SiemKind::Splunk,
                    "elasticsearch" => SiemKind::Elasticsearch,
                    "datadog" => SiemKind::Datadog,
                    "syslog" => SiemKind::Syslog,
                    other => anyhow::bail!("unknown SIEM_TYPE '{other}'"),
                };

                Some(SiemConf {
                    kind,
                    url: env_opt("SIEM_URL").context("SIEM_URL is required when SIEM_TYPE is set")?,
                    token: env_opt("SIEM_TOKEN"),
                    index: env_opt("SIEM_INDEX"),
                })
            }
        };

        Ok(Self {
            listen_addr,
            salt,
            token_backend,
            remote_url,
            encryption_key,
            policy: Arc::new(policy),
            audit_path,
            max_payload_bytes,
            proxy_enabled: env_bool("PROXY_ENABLED"),
            upstream_openai: upstream_url("UPSTREAM_OPENAI_URL", DEFAULT_UPSTREAM_OPENAI)?,
            upstream_anthropic: upstream_url("UPSTREAM_ANTHROPIC_URL", DEFAULT_UPSTREAM_ANTHROPIC)?,
            upstream_google: upstream_url("UPSTREAM_GOOGLE_URL", DEFAULT_UPSTREAM_GOOGLE)?,
            siem,
            default_region: env_opt("DEFAULT_REGION").unwrap_or_else(|| "us".to_owned()),
            default_env: env_opt("DEFAULT_ENV").unwrap_or_else(|| "prod".to_owned()),
            token_ttl: time::Duration::seconds(token_ttl_secs),
            internal_domain_suffixes: env_list("INTERNAL_DOMAIN_SUFFIXES", DEFAULT_INTERNAL_DOMAIN_SUFFIXES),
            classifier_keywords: env_list("CLASSIFIER_KEYWORDS", ""),
            classifier_threshold: match env_opt("CLASSIFIER_THRESHOLD") {
                Some(raw) => raw.parse().context("invalid CLASSIFIER_THRESHOLD")?,
                None => crate::classify::DEFAULT_THRESHOLD,
            },
            log_path: env_opt("LOG_PATH").map(Utf8PathBuf::from),
            log_filter: env_opt("LOG_FILTER").unwrap_or_else(|| "info".to_owned()),
        })
    }
}

fn env_opt(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.is_empty())
}

fn env_bool(name: &str) -> bool {
    env_opt(name).is_some_and(|value| matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

fn env_list(name: &str, default: &str) -> Vec<String> {
    env_opt(name)
        .unwrap_or_else(|| default.to_owned())
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_owned)
        .collect()
}

fn upstream_url(name: &str, default: &str) -> anyhow::Result<Url> {
    Url::parse(&env_opt(name).unwrap_or_else(|| default.to_owned())).with_context(|| format!("invalid {name}"))
}

/// `ENCRYPTION_KEY` accepts raw or base64 key material.
fn decode_key_material(raw: &str) -> Vec<u8> {
    base64::engine::general_purpose::STANDARD
        .decode(raw)
        .unwrap_or_else(|_| raw.as_bytes().to_vec())
}

fn validate_policy(policy: &PolicyDocument) -> anyhow::Result<()> {
    let known_regions: BTreeSet<&str> = policy.region_routing.keys().map(String::as_str).collect();

    for restricted in &policy.restricted_regions {
        if known_regions.contains(restricted.as_str()) {
            warn!(
                region = %restricted,
                "restricted region has its own region_routing entry; the 'restricted' entry is used instead"
            );
        }
    }

    Ok(())
}

/// Shared, immutable configuration handle.
#[derive(Clone)]
pub struct ConfHandle {
    inner: Arc<Conf>,
}

impl ConfHandle {
    /// Initializes configuration for this instance. Call once at startup.
    pub fn init() -> anyhow::Result<Self> {
        let conf = Conf::from_env()?;
        Ok(Self { inner: Arc::new(conf) })
    }

    #[doc(hidden)]
    pub fn mock(conf: Conf) -> Self {
        Self { inner: Arc::new(conf) }
    }

    pub fn get_conf(&self) -> Arc<Conf> {
        Arc::clone(&self.inner)
    }
}

#[cfg(test)]
pub(crate) fn test_conf(policy: PolicyDocument) -> Conf {
    Conf {
        listen_addr: "127.0.0.1:0".parse().expect("valid addr"),
        salt: Zeroizing::new(b"test-salt-0123456789abcdef".to_vec()),
        token_backend: TokenBackend::Memory,
        remote_url: None,
        encryption_key: None,
        policy: Arc::new(policy),
        audit_path: Utf8PathBuf::from("firewall-audit.jsonl"),
        max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
        proxy_enabled: true,
        upstream_openai: Url::parse(DEFAULT_UPSTREAM_OPENAI).expect("valid URL"),
        upstream_anthropic: Url::parse(DEFAULT_UPSTREAM_ANTHROPIC).expect("valid URL"),
        upstream_google: Url::parse(DEFAULT_UPSTREAM_GOOGLE).expect("valid URL"),
        siem: None,
        default_region: "us".to_owned(),
        default_env: "prod".to_owned(),
        token_ttl: crate::token::DEFAULT_TTL,
        internal_domain_suffixes: vec!["internal".to_owned()],
        classifier_keywords: Vec::new(),
        classifier_threshold: crate::classify::DEFAULT_THRESHOLD,
        log_path: None,
        log_filter: "info".to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use base64::Engine as _;

    use super::*;

    #[test]
    fn key_material_accepts_base64_and_raw() {
        let encoded = base64::engine::general_purpose::STANDARD.encode(b"sixteen-byte-key");
        assert_eq!(decode_key_material(&encoded), b"sixteen-byte-key");
        assert_eq!(decode_key_material("not base64 !!!"), b"not base64 !!!");
    }

    #[test]
    fn builtin_policy_passes_validation() {
        validate_policy(&PolicyDocument::builtin()).expect("builtin policy is valid");
    }
}
