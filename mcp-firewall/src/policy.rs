//! Policy engine: composes detector/classifier output with the request
//! context and the loaded policy document into a routing decision.
//!
//! The engine is a pure function over `(spans, context, policy)`; the policy
//! document is loaded once at startup and never mutated.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::detect::{Category, Span};

/// Effective region substituted for any region listed in
/// `restricted_regions`.
pub const RESTRICTED_REGION: &str = "restricted";

/// Request context. All four fields are required at the boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Context {
    pub caller: String,
    pub region: String,
    pub env: String,
    pub conversation_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Block,
    Redact,
    InternalOnly,
    Allow,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Block => "block",
            Action::Redact => "redact",
            Action::InternalOnly => "internal_only",
            Action::Allow => "allow",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyDocument {
    pub version: u32,
    #[serde(default)]
    pub restricted_regions: BTreeSet<String>,
    #[serde(default)]
    pub region_routing: BTreeMap<String, RegionRouting>,
    #[serde(default)]
    pub trusted_callers: BTreeSet<String>,
    #[serde(default)]
    pub caller_routing: BTreeMap<String, CallerRouting>,
    #[serde(default)]
    pub routes: Vec<Route>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionRouting {
    #[serde(default = "default_true")]
    pub allow_external: bool,
    #[serde(default)]
    pub preferred_models: Vec<String>,
    #[serde(default)]
    pub internal_fallback: Vec<String>,
    #[serde(default)]
    pub data_residency: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallerRouting {
    /// `None` leaves the caller unrestricted.
    #[serde(default)]
    pub allow_categories: Option<BTreeSet<Category>>,
    #[serde(default = "default_true")]
    pub max_detokenize: bool,
    #[serde(default)]
    pub force_redact: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "match")]
    pub matcher: RouteMatch,
    pub action: Action,
    #[serde(default)]
    pub applies_to: AppliesTo,
    #[serde(default)]
    pub allow_models: Vec<String>,
    /// `None` leaves the route unrestricted.
    #[serde(default)]
    pub allow_categories: Option<BTreeSet<Category>>,
}

/// `category: null` (or omitted) matches only when no category is present.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouteMatch {
    #[serde(default)]
    pub category: Option<Category>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppliesTo {
    #[serde(default = "wildcard")]
    pub regions: Vec<String>,
    #[serde(default = "wildcard")]
    pub callers: Vec<String>,
}

impl Default for AppliesTo {
    fn default() -> Self {
        Self {
            regions: wildcard(),
            callers: wildcard(),
        }
    }
}

fn wildcard() -> Vec<String> {
    vec!["*".to_owned()]
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize)]
pub struct Decision {
    pub action: Action,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_model: Option<String>,
    pub requires_redaction: bool,
    pub allowed_detokenize_categories: BTreeSet<Category>,
    pub policy_version: u32,
    pub reason: String,
}

impl Route {
    fn matches(&self, categories: &BTreeSet<Category>, region: &str, caller: &str) -> bool {
        let category_ok = match self.matcher.category {
            Some(category) => categories.contains(&category),
            None => categories.is_empty(),
        };

        category_ok && applies(&self.applies_to.regions, region) && applies(&self.applies_to.callers, caller)
    }

    fn label(&self, index: usize) -> String {
        match &self.name {
            Some(name) => format!("route '{name}' (#{index})"),
            None => format!("route #{index}"),
        }
    }
}

fn applies(list: &[String], value: &str) -> bool {
    list.iter().any(|entry| entry == "*" || entry == value)
}

impl PolicyDocument {
    /// Built-in document used when no policy file is configured: block
    /// secrets everywhere, redact everything else sensitive, allow the rest.
    pub fn builtin() -> Self {
        let yaml = r#"
version: 1
restricted_regions: []
region_routing:
  restricted:
    allow_external: false
    internal_fallback: [internal-default]
trusted_callers: []
caller_routing: {}
routes:
  - name: block-secrets
    match: { category: secret }
    action: block
  - name: redact-pii
    match: { category: pii }
    action: redact
  - name: redact-ops
    match: { category: ops_sensitive }
    action: redact
  - name: review-export-control
    match: { category: export_control }
    action: internal_only
  - name: default-allow
    match: { category: null }
    action: allow
"#;
        serde_yaml::from_str(yaml).expect("builtin policy parses")
    }

    pub fn is_trusted(&self, caller: &str) -> bool {
        self.trusted_callers.contains(caller)
    }

    pub fn caller(&self, caller: &str) -> Option<&CallerRouting> {
        self.caller_routing.get(caller)
    }

    /// The deterministic decision algorithm; first matching route wins.
    pub fn decide(&self, spans: &[Span], ctx: &Context) -> Decision {
        let effective_region = if self.restricted_regions.contains(&ctx.region) {
            RESTRICTED_REGION
        } else {
            ctx.region.as_str()
        };

        let categories: BTreeSet<Category> = spans.iter().map(|span| span.category).collect();
        let caller_conf = self.caller_routing.get(&ctx.caller);
        let region_conf = self.region_routing.get(effective_region);

        let matched = self
            .routes
            .iter()
            .enumerate()
            .find(|(_, route)| route.matches(&categories, effective_region, &ctx.caller));

        let (mut action, route, mut reason) = match matched {
            Some((index, route)) => {
                let reason = match route.matcher.category {
                    Some(category) => format!("{} matched category {}", route.label(index), category.as_str()),
                    None => format!("{} matched non-sensitive payload", route.label(index)),
                };
                (route.action, Some(route), reason)
            }
            None => (
                Action::Allow,
                None,
                format!("no route matched; default allow for region '{effective_region}'"),
            ),
        };

        let forced_redact = caller_conf.is_some_and(|c| c.force_redact) && action == Action::Allow;
        if forced_redact {
            action = Action::Redact;
            reason.push_str("; upgraded to redact (caller force_redact)");
        }

        if action == Action::Block {
            return Decision {
                action,
                target_model: None,
                requires_redaction: false,
                allowed_detokenize_categories: BTreeSet::new(),
                policy_version: self.version,
                reason,
            };
        }

        let requires_redaction = action == Action::Redact;

        let route_models = route.map(|r| r.allow_models.as_slice()).unwrap_or_default();

        let target_model = match action {
            Action::InternalOnly => route_models
                .first()
                .or_else(|| region_conf.and_then(|r| r.internal_fallback.first()))
                .cloned(),
            Action::Redact | Action::Allow => {
                let external_allowed = region_conf.is_none_or(|r| r.allow_external);

                if external_allowed {
                    route_models
                        .first()
                        .or_else(|| region_conf.and_then(|r| r.preferred_models.first()))
                        .cloned()
                } else {
                    action = Action::InternalOnly;
                    reason.push_str("; region forbids external models");
                    region_conf.and_then(|r| r.internal_fallback.first()).cloned()
                }
            }
            Action::Block => unreachable!("block returned above"),
        };

        let route_allow = route.and_then(|r| r.allow_categories.clone());
        let caller_allow = caller_conf.and_then(|c| c.allow_categories.clone());

        let mut allowed = intersect(route_allow, caller_allow);
        allowed.remove(&Category::Secret);

        if caller_conf.is_some_and(|c| !c.max_detokenize) {
            allowed.clear();
        }

        Decision {
            action,
            target_model,
            requires_redaction,
            allowed_detokenize_categories: allowed,
            policy_version: self.version,
            reason,
        }
    }
}

const ALL_CATEGORIES: [Category; 4] = [
    Category::Secret,
    Category::Pii,
    Category::OpsSensitive,
    Category::ExportControl,
];

fn intersect(a: Option<BTreeSet<Category>>, b: Option<BTreeSet<Category>>) -> BTreeSet<Category> {
    let universe = || ALL_CATEGORIES.into_iter().collect::<BTreeSet<_>>();
    let a = a.unwrap_or_else(universe);
    let b = b.unwrap_or_else(universe);
    a.intersection(&b).copied().collect()
}

#[cfg(test)]
mod tests {
    use crate::detect::SpanKind;

    use super::*;

    fn ctx(caller: &str, region: &str) -> Context {
        Context {
            caller: caller.to_owned(),
            region: region.to_owned(),
            env: "prod".to_owned(),
            conversation_id: "c1".to_owned(),
        }
    }

    fn secret_span() -> Span {
        Span::new(0, 20, SpanKind::AwsAccessKey, 0.98)
    }

    fn test_policy() -> PolicyDocument {
        serde_yaml::from_str(
            r#"
version: 7
restricted_regions: [cn]
region_routing:
  us:
    allow_external: true
    preferred_models: [gpt-4o]
    internal_fallback: [llama-70b]
  eu:
    allow_external: false
    preferred_models: [gpt-4o]
    internal_fallback: [mistral-eu]
    data_residency: eu-west
  restricted:
    allow_external: false
    internal_fallback: [internal-7b]
trusted_callers: [incident-mgr]
caller_routing:
  incident-mgr:
    allow_categories: [pii, ops_sensitive]
  auditor:
    allow_categories: [pii]
    max_detokenize: false
  paranoid:
    force_redact: true
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
        .expect("test policy parses")
    }

    #[test]
    fn secret_blocks_first() {
        let policy = test_policy();
        let decision = policy.decide(&[secret_span()], &ctx("user", "us"));

        assert_eq!(decision.action, Action::Block);
        assert!(decision.allowed_detokenize_categories.is_empty());
        assert_eq!(decision.policy_version, 7);
        assert!(decision.reason.contains("block-secrets"));
    }

    #[test]
    fn pii_redacts_and_never_allows_secret_detokenize() {
        let policy = test_policy();
        let spans = [Span::new(0, 5, SpanKind::Email, 0.9)];
        let decision = policy.decide(&spans, &ctx("incident-mgr", "us"));

        assert_eq!(decision.action, Action::Redact);
        assert!(decision.requires_redaction);
        assert_eq!(decision.target_model.as_deref(), Some("gpt-4o"));
        assert!(decision.allowed_detokenize_categories.contains(&Category::Pii));
        assert!(!decision.allowed_detokenize_categories.contains(&Category::Secret));
    }

    #[test]
    fn null_match_requires_empty_category_set() {
        let policy = test_policy();

        let clean = policy.decide(&[], &ctx("user", "us"));
        assert_eq!(clean.action, Action::Allow);
        assert!(clean.reason.contains("default-allow"));

        // ops_sensitive has no dedicated route and must not fall into the
        // null route; the engine falls back to default allow instead.
        let spans = [Span::new(0, 5, SpanKind::InternalIp, 0.8)];
        let ops = policy.decide(&spans, &ctx("user", "us"));
        assert!(ops.reason.contains("no route matched"));
    }

    #[test]
    fn restricted_region_forces_internal_fallback() {
        let policy = test_policy();
        let decision = policy.decide(&[], &ctx("user", "cn"));

        assert_eq!(decision.action, Action::InternalOnly);
        assert_eq!(decision.target_model.as_deref(), Some("internal-7b"));
    }

    #[test]
    fn region_without_external_rewrites_allow() {
        let policy = test_policy();
        let decision = policy.decide(&[], &ctx("user", "eu"));

        assert_eq!(decision.action, Action::InternalOnly);
        assert_eq!(decision.target_model.as_deref(), Some("mistral-eu"));
        assert!(decision.reason.contains("region forbids external"));
    }

    #[test]
    fn force_redact_upgrades_allow() {
        let policy = test_policy();
        let decision = policy.decide(&[], &ctx("paranoid", "us"));

        assert_eq!(decision.action, Action::Redact);
        assert!(decision.requires_redaction);
    }

    #[test]
    fn max_detokenize_false_empties_allowance() {
        let policy = test_policy();
        let spans = [Span::new(0, 5, SpanKind::Email, 0.9)];
        let decision = policy.decide(&spans, &ctx("auditor", "us"));

        assert!(decision.allowed_detokenize_categories.is_empty());
    }

    #[test]
    fn decide_is_pure() {
        let policy = test_policy();
        let spans = [secret_span()];
        let context = ctx("user", "us");

        let first = policy.decide(&spans, &context);
        let second = policy.decide(&spans, &context);

        assert_eq!(first.action, second.action);
        assert_eq!(first.reason, second.reason);
        assert_eq!(
            first.allowed_detokenize_categories,
            second.allowed_detokenize_categories
        );
    }
}
