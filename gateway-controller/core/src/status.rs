//! Desired object statuses computed by the translation pipeline.
//!
//! Drafts carry condition content and the generation of the object they were
//! computed from. Timestamps are filled in when a draft is merged into an
//! object's live status.

use crate::{GroupKind, NamespacedName, ObjectSource};
use agentgateway_controller_krt::{Key, Keyed};

pub mod conditions {
    pub const ACCEPTED: &str = "Accepted";
    pub const PROGRAMMED: &str = "Programmed";
    pub const RESOLVED_REFS: &str = "ResolvedRefs";
    pub const CONFLICTED: &str = "Conflicted";
    pub const ATTACHED: &str = "Attached";
}

pub mod reasons {
    pub const ACCEPTED: &str = "Accepted";
    pub const PROGRAMMED: &str = "Programmed";
    pub const INVALID: &str = "Invalid";
    pub const PENDING: &str = "Pending";
    pub const RESOLVED_REFS: &str = "ResolvedRefs";
    pub const NO_CONFLICTS: &str = "NoConflicts";
    pub const ATTACHED: &str = "Attached";
    pub const VALID: &str = "Valid";
    pub const PARTIALLY_VALID: &str = "PartiallyValid";
    pub const INVALID_ROUTE_KINDS: &str = "InvalidRouteKinds";
    pub const PROTOCOL_CONFLICT: &str = "ProtocolConflict";
    pub const HOSTNAME_CONFLICT: &str = "HostnameConflict";
    pub const LISTENERS_NOT_VALID: &str = "ListenersNotValid";
    pub const INVALID_PARAMETERS: &str = "InvalidParameters";
    pub const NO_MATCHING_PARENT: &str = "NoMatchingParent";
    pub const NOT_ALLOWED_BY_LISTENERS: &str = "NotAllowedByListeners";
    pub const NO_MATCHING_LISTENER_HOSTNAME: &str = "NoMatchingListenerHostname";
    pub const PARENT_REF_CONFLICT: &str = "ParentRefConflict";
    pub const UNSUPPORTED_VALUE: &str = "UnsupportedValue";
    pub const ANCESTOR_LIMIT_REACHED: &str = "AncestorLimitReached";
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConditionDraft {
    pub type_: String,
    pub status: bool,
    pub reason: String,
    pub message: String,
}

/// A reference from a route or policy to a parent or ancestor object.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParentRef {
    pub kind: GroupKind,
    pub namespace: Option<String>,
    pub name: String,
    pub section_name: Option<String>,
    pub port: Option<u16>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GatewayClassStatusDraft {
    pub name: String,
    pub generation: Option<i64>,
    pub conditions: Vec<ConditionDraft>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GatewayStatusDraft {
    pub gateway: NamespacedName,
    pub generation: Option<i64>,
    pub conditions: Vec<ConditionDraft>,
    pub listeners: Vec<ListenerStatusDraft>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListenerStatusDraft {
    pub name: String,
    pub supported_kinds: Vec<GroupKind>,
    pub attached_routes: i32,
    pub conditions: Vec<ConditionDraft>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouteStatusDraft {
    pub route: ObjectSource,
    pub generation: Option<i64>,
    pub parents: Vec<ParentStatusDraft>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParentStatusDraft {
    pub parent_ref: ParentRef,
    pub conditions: Vec<ConditionDraft>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PolicyStatusDraft {
    pub policy: ObjectSource,
    pub generation: Option<i64>,
    pub ancestors: Vec<AncestorStatusDraft>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AncestorStatusDraft {
    pub ancestor_ref: ParentRef,
    pub conditions: Vec<ConditionDraft>,
}

// === impl ConditionDraft ===

impl ConditionDraft {
    pub fn new(
        type_: impl Into<String>,
        status: bool,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status,
            reason: reason.into(),
            message: message.into(),
        }
    }

    pub fn status_str(&self) -> &'static str {
        if self.status {
            "True"
        } else {
            "False"
        }
    }
}

/// Finds a condition by type.
pub fn find<'c>(conditions: &'c [ConditionDraft], type_: &str) -> Option<&'c ConditionDraft> {
    conditions.iter().find(|c| c.type_ == type_)
}

// === impl ParentRef ===

impl ParentRef {
    pub fn gateway(gateway: &NamespacedName, section_name: Option<String>) -> Self {
        Self {
            kind: GroupKind::GATEWAY,
            namespace: Some(gateway.namespace.clone()),
            name: gateway.name.clone(),
            section_name,
            port: None,
        }
    }
}

// === impl Keyed ===

impl Keyed for GatewayClassStatusDraft {
    fn key(&self) -> Key {
        Key::from(self.name.as_str())
    }
}

impl Keyed for GatewayStatusDraft {
    fn key(&self) -> Key {
        Key::from(self.gateway.to_string())
    }
}

impl Keyed for RouteStatusDraft {
    fn key(&self) -> Key {
        self.route.key()
    }
}

impl Keyed for PolicyStatusDraft {
    fn key(&self) -> Key {
        self.policy.key()
    }
}
