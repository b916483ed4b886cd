use super::{target::Unresolved, MAX_ANCESTORS};
use agentgateway_controller_core::{
    status::{conditions, reasons, AncestorStatusDraft, ConditionDraft, ParentRef},
    ConfigError, GroupKind,
};
use agentgateway_controller_k8s_api::policy::LocalPolicyTargetReference;

/// Builds the status reported for one of a policy's targets.
pub(super) fn ancestor(
    ns: &str,
    tr: &LocalPolicyTargetReference,
    resolved: Result<(), Unresolved>,
    has_specs: bool,
    errors: &[ConfigError],
) -> AncestorStatusDraft {
    let ancestor_ref = ParentRef {
        kind: GroupKind::new(tr.group.as_str(), tr.kind.as_str()),
        namespace: Some(ns.to_string()),
        name: tr.name.clone(),
        section_name: tr.section_name.clone(),
        port: None,
    };

    let conditions = match resolved {
        Err(Unresolved::Unsupported(message)) => vec![
            ConditionDraft::new(conditions::ACCEPTED, false, reasons::INVALID, message),
            ConditionDraft::new(conditions::ATTACHED, false, reasons::PENDING, ""),
        ],
        Err(Unresolved::NotFound(message)) => vec![
            accepted(has_specs, errors),
            ConditionDraft::new(conditions::ATTACHED, false, reasons::PENDING, message),
        ],
        Ok(()) if !has_specs => vec![
            accepted(has_specs, errors),
            ConditionDraft::new(
                conditions::ATTACHED,
                false,
                reasons::PENDING,
                "policy has no valid configuration",
            ),
        ],
        Ok(()) => vec![
            accepted(has_specs, errors),
            ConditionDraft::new(
                conditions::ATTACHED,
                true,
                reasons::ATTACHED,
                "Attached to all targets",
            ),
        ],
    };

    AncestorStatusDraft {
        ancestor_ref,
        conditions,
    }
}

/// Policies are accepted even when partially invalid so that the valid parts
/// still apply; the reason records what was dropped.
fn accepted(has_specs: bool, errors: &[ConfigError]) -> ConditionDraft {
    let message = errors
        .iter()
        .map(|e| e.message.as_str())
        .collect::<Vec<_>>()
        .join("; ");
    let reason = match (has_specs, errors.is_empty()) {
        (_, true) => reasons::VALID,
        (true, false) => reasons::PARTIALLY_VALID,
        (false, false) => reasons::INVALID,
    };
    let message = if message.is_empty() {
        "Policy accepted".to_string()
    } else {
        message
    };
    ConditionDraft::new(conditions::ACCEPTED, true, reason, message)
}

/// Truncates ancestors to the reportable limit, appending a summary of those
/// omitted.
pub(super) fn cap(
    kind: &GroupKind,
    ns: &str,
    mut ancestors: Vec<AncestorStatusDraft>,
) -> Vec<AncestorStatusDraft> {
    if ancestors.len() <= MAX_ANCESTORS {
        return ancestors;
    }
    let omitted = ancestors.len() - MAX_ANCESTORS;
    ancestors.truncate(MAX_ANCESTORS);
    ancestors.push(AncestorStatusDraft {
        ancestor_ref: ParentRef {
            kind: GroupKind::new(&*kind.group, "StatusSummary"),
            namespace: Some(ns.to_string()),
            name: "StatusSummary".to_string(),
            section_name: None,
            port: None,
        },
        conditions: vec![ConditionDraft::new(
            conditions::ACCEPTED,
            true,
            reasons::ANCESTOR_LIMIT_REACHED,
            format!("{omitted} additional ancestors were not reported"),
        )],
    });
    ancestors
}
