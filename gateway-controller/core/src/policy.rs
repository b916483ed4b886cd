//! Agent policies and the rules for combining them.

use crate::{agent::BackendReference, NamespacedName};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, time::Duration};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    pub name: String,
    pub target: PolicyTarget,
    pub spec: PolicySpec,
}

/// The point in the data plane a policy applies to.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PolicyTarget {
    Gateway(NamespacedName),
    Listener {
        gateway: NamespacedName,
        listener: String,
    },
    Route(NamespacedName),
    RouteRule {
        route: NamespacedName,
        rule: String,
    },
    Backend(NamespacedName),
    SubBackend {
        backend: NamespacedName,
        section: String,
    },
    Service {
        hostname: String,
        port: Option<u16>,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum PolicySpec {
    BackendTls(BackendTls),
    ExtAuth(ExtAuth),
    Jwt(JwtAuthentication),
    Rbac(Rbac),
    ListenerSettings(ListenerSettings),
    Timeout(Timeout),
    BackendAuth(BackendAuth),
    McpAuthorization(McpAuthorization),
    McpAuthentication(McpAuthentication),
    Ai(AiPolicy),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PolicyKind {
    BackendTls,
    ExtAuth,
    Jwt,
    Rbac,
    ListenerSettings,
    Timeout,
    BackendAuth,
    McpAuthorization,
    McpAuthentication,
    Ai,
}

/// Field-wise combination of two values, keeping `self` where both are set.
pub trait Merge {
    fn merge(&mut self, other: Self);
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendTls {
    /// PEM encoded CA bundle.
    pub root: Option<String>,
    pub hostname: Option<String>,
    pub subject_alt_names: Vec<String>,
    pub insecure: Option<bool>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtAuth {
    pub target: Option<BackendReference>,
    pub context: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JwtAuthentication {
    pub mode: Option<JwtMode>,
    pub providers: Vec<JwtProvider>,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum JwtMode {
    /// Requests without a valid token are rejected.
    #[default]
    Strict,
    /// Requests without a token are allowed; invalid tokens are rejected.
    Optional,
    /// Requests are allowed whether or not a token validates.
    Permissive,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JwtProvider {
    pub name: String,
    pub issuer: Option<String>,
    pub audiences: Vec<String>,
    pub jwks: Jwks,
    pub claims_to_headers: Vec<(String, String)>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Jwks {
    Inline(String),
    Remote { uri: String, cache_duration: Option<Duration> },
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rbac {
    pub action: Option<RbacAction>,
    pub rules: Vec<RbacRule>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RbacAction {
    Allow,
    Deny,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RbacRule {
    pub claims: BTreeMap<String, String>,
    pub paths: Vec<String>,
    pub methods: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListenerSettings {
    pub access_log: Option<AccessLog>,
    pub server_header: Option<String>,
    pub preserve_http1_header_case: Option<bool>,
    pub idle_timeout: Option<Duration>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessLog {
    pub path: String,
    pub format: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timeout {
    pub request: Option<Duration>,
    pub backend_request: Option<Duration>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendAuth {
    pub key: Option<String>,
    pub passthrough: Option<bool>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpAuthorization {
    pub allow: Vec<String>,
    pub deny: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpAuthentication {
    pub issuer: Option<String>,
    pub audiences: Vec<String>,
    pub jwks_uri: Option<String>,
    pub mode: Option<JwtMode>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiPolicy {
    pub defaults: BTreeMap<String, String>,
    pub overrides: BTreeMap<String, String>,
    pub prompt_prepend: Vec<Message>,
    pub prompt_append: Vec<Message>,
    pub prompt_caching: Option<bool>,
    pub model_aliases: BTreeMap<String, String>,
    pub request_guard: Vec<PromptGuard>,
    pub response_guard: Vec<PromptGuard>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub role: String,
    pub content: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptGuard {
    pub patterns: Vec<String>,
    pub rejection_message: Option<String>,
}

// === impl PolicyTarget ===

impl fmt::Display for PolicyTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gateway(gw) => write!(f, "gateway/{gw}"),
            Self::Listener { gateway, listener } => write!(f, "listener/{gateway}/{listener}"),
            Self::Route(r) => write!(f, "route/{r}"),
            Self::RouteRule { route, rule } => write!(f, "route/{route}/{rule}"),
            Self::Backend(b) => write!(f, "backend/{b}"),
            Self::SubBackend { backend, section } => write!(f, "backend/{backend}/{section}"),
            Self::Service {
                hostname,
                port: Some(port),
            } => write!(f, "service/{hostname}:{port}"),
            Self::Service { hostname, .. } => write!(f, "service/{hostname}"),
        }
    }
}

// === impl PolicySpec ===

impl PolicySpec {
    pub fn kind(&self) -> PolicyKind {
        match self {
            Self::BackendTls(_) => PolicyKind::BackendTls,
            Self::ExtAuth(_) => PolicyKind::ExtAuth,
            Self::Jwt(_) => PolicyKind::Jwt,
            Self::Rbac(_) => PolicyKind::Rbac,
            Self::ListenerSettings(_) => PolicyKind::ListenerSettings,
            Self::Timeout(_) => PolicyKind::Timeout,
            Self::BackendAuth(_) => PolicyKind::BackendAuth,
            Self::McpAuthorization(_) => PolicyKind::McpAuthorization,
            Self::McpAuthentication(_) => PolicyKind::McpAuthentication,
            Self::Ai(_) => PolicyKind::Ai,
        }
    }

    /// Merges another spec of the same kind into this one. Specs of different
    /// kinds are left untouched and `false` is returned.
    pub fn try_merge(&mut self, other: Self) -> bool {
        match (self, other) {
            (Self::BackendTls(a), Self::BackendTls(b)) => a.merge(b),
            (Self::ExtAuth(a), Self::ExtAuth(b)) => a.merge(b),
            (Self::Jwt(a), Self::Jwt(b)) => a.merge(b),
            (Self::Rbac(a), Self::Rbac(b)) => a.merge(b),
            (Self::ListenerSettings(a), Self::ListenerSettings(b)) => a.merge(b),
            (Self::Timeout(a), Self::Timeout(b)) => a.merge(b),
            (Self::BackendAuth(a), Self::BackendAuth(b)) => a.merge(b),
            (Self::McpAuthorization(a), Self::McpAuthorization(b)) => a.merge(b),
            (Self::McpAuthentication(a), Self::McpAuthentication(b)) => a.merge(b),
            (Self::Ai(a), Self::Ai(b)) => a.merge(b),
            _ => return false,
        }
        true
    }
}

// === impl PolicyKind ===

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::BackendTls => "backendTLS",
            Self::ExtAuth => "extAuth",
            Self::Jwt => "jwt",
            Self::Rbac => "rbac",
            Self::ListenerSettings => "listener",
            Self::Timeout => "timeout",
            Self::BackendAuth => "backendAuth",
            Self::McpAuthorization => "mcpAuthorization",
            Self::McpAuthentication => "mcpAuthentication",
            Self::Ai => "ai",
        })
    }
}

// === impl Merge ===

fn first<T>(a: &mut Option<T>, b: Option<T>) {
    if a.is_none() {
        *a = b;
    }
}

fn union<K: Ord, V>(a: &mut BTreeMap<K, V>, b: BTreeMap<K, V>) {
    for (k, v) in b {
        a.entry(k).or_insert(v);
    }
}

impl Merge for BackendTls {
    fn merge(&mut self, other: Self) {
        first(&mut self.root, other.root);
        first(&mut self.hostname, other.hostname);
        self.subject_alt_names.extend(other.subject_alt_names);
        first(&mut self.insecure, other.insecure);
    }
}

impl Merge for ExtAuth {
    fn merge(&mut self, other: Self) {
        first(&mut self.target, other.target);
        union(&mut self.context, other.context);
    }
}

impl Merge for JwtAuthentication {
    fn merge(&mut self, other: Self) {
        first(&mut self.mode, other.mode);
        self.providers.extend(other.providers);
    }
}

/// The highest precedence policy decides the action. Rules of later policies
/// are appended under that action, whatever action they were written for.
impl Merge for Rbac {
    fn merge(&mut self, other: Self) {
        first(&mut self.action, other.action);
        self.rules.extend(other.rules);
    }
}

impl Merge for ListenerSettings {
    fn merge(&mut self, other: Self) {
        first(&mut self.access_log, other.access_log);
        first(&mut self.server_header, other.server_header);
        first(
            &mut self.preserve_http1_header_case,
            other.preserve_http1_header_case,
        );
        first(&mut self.idle_timeout, other.idle_timeout);
    }
}

impl Merge for Timeout {
    fn merge(&mut self, other: Self) {
        first(&mut self.request, other.request);
        first(&mut self.backend_request, other.backend_request);
    }
}

impl Merge for BackendAuth {
    fn merge(&mut self, other: Self) {
        first(&mut self.key, other.key);
        first(&mut self.passthrough, other.passthrough);
    }
}

impl Merge for McpAuthorization {
    fn merge(&mut self, other: Self) {
        self.allow.extend(other.allow);
        self.deny.extend(other.deny);
    }
}

impl Merge for McpAuthentication {
    fn merge(&mut self, other: Self) {
        first(&mut self.issuer, other.issuer);
        self.audiences.extend(other.audiences);
        first(&mut self.jwks_uri, other.jwks_uri);
        first(&mut self.mode, other.mode);
    }
}

impl Merge for AiPolicy {
    fn merge(&mut self, other: Self) {
        union(&mut self.defaults, other.defaults);
        union(&mut self.overrides, other.overrides);
        self.prompt_prepend.extend(other.prompt_prepend);
        self.prompt_append.extend(other.prompt_append);
        first(&mut self.prompt_caching, other.prompt_caching);
        union(&mut self.model_aliases, other.model_aliases);
        self.request_guard.extend(other.request_guard);
        self.response_guard.extend(other.response_guard);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    #[test]
    fn merge_keeps_first_scalar() {
        let mut a = PolicySpec::Timeout(Timeout {
            request: Some(Duration::from_secs(5)),
            backend_request: None,
        });
        let b = PolicySpec::Timeout(Timeout {
            request: Some(Duration::from_secs(1)),
            backend_request: Some(Duration::from_secs(2)),
        });
        assert!(a.try_merge(b));
        assert_eq!(
            a,
            PolicySpec::Timeout(Timeout {
                request: Some(Duration::from_secs(5)),
                backend_request: Some(Duration::from_secs(2)),
            })
        );
    }

    #[test]
    fn merge_concatenates_lists_and_unions_maps() {
        let mut a = AiPolicy {
            defaults: [("temperature".to_string(), "0.1".to_string())].into(),
            prompt_prepend: vec![Message {
                role: "system".into(),
                content: "a".into(),
            }],
            ..Default::default()
        };
        a.merge(AiPolicy {
            defaults: [
                ("temperature".to_string(), "0.9".to_string()),
                ("top_p".to_string(), "1".to_string()),
            ]
            .into(),
            prompt_prepend: vec![Message {
                role: "system".into(),
                content: "b".into(),
            }],
            ..Default::default()
        });
        assert_eq!(a.defaults["temperature"], "0.1");
        assert_eq!(a.defaults["top_p"], "1");
        assert_eq!(a.prompt_prepend.len(), 2);
    }

    #[test]
    fn merge_rejects_mismatched_kinds() {
        let mut a = PolicySpec::Rbac(Rbac::default());
        assert!(!a.try_merge(PolicySpec::Timeout(Timeout::default())));
        assert_eq!(a.kind(), PolicyKind::Rbac);
    }

    #[test]
    fn rbac_rules_take_the_first_action() {
        let rule = |path: &str| RbacRule {
            claims: Default::default(),
            paths: vec![path.to_string()],
            methods: vec![],
        };
        let mut deny = Rbac {
            action: Some(RbacAction::Deny),
            rules: vec![rule("/admin")],
        };
        deny.merge(Rbac {
            action: Some(RbacAction::Allow),
            rules: vec![rule("/public")],
        });
        assert_eq!(deny.action, Some(RbacAction::Deny));
        assert_eq!(deny.rules, vec![rule("/admin"), rule("/public")]);

        // An unset action is taken from the next policy.
        let mut unset = Rbac {
            action: None,
            rules: vec![],
        };
        unset.merge(Rbac {
            action: Some(RbacAction::Allow),
            rules: vec![rule("/public")],
        });
        assert_eq!(unset.action, Some(RbacAction::Allow));
    }
}
