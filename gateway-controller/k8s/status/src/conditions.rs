use agentgateway_controller_core::status::ConditionDraft;
use agentgateway_controller_k8s_api::{Condition, Time};
use chrono::{offset::Utc, DateTime};

/// Converts computed conditions into API conditions.
///
/// A condition keeps its previous transition time unless its status or
/// reason changed.
pub(crate) fn merge(
    existing: &[Condition],
    drafts: &[ConditionDraft],
    generation: Option<i64>,
    now: DateTime<Utc>,
) -> Vec<Condition> {
    drafts
        .iter()
        .map(|draft| convert(existing, draft, generation, now))
        .collect()
}

/// Sets a single condition, leaving conditions of other types untouched.
pub(crate) fn upsert(
    conditions: &mut Vec<Condition>,
    draft: &ConditionDraft,
    generation: Option<i64>,
    now: DateTime<Utc>,
) {
    let condition = convert(conditions, draft, generation, now);
    match conditions.iter_mut().find(|c| c.type_ == draft.type_) {
        Some(c) => *c = condition,
        None => conditions.push(condition),
    }
}

fn convert(
    existing: &[Condition],
    draft: &ConditionDraft,
    generation: Option<i64>,
    now: DateTime<Utc>,
) -> Condition {
    let status = draft.status_str();
    let last_transition_time = existing
        .iter()
        .find(|c| c.type_ == draft.type_)
        .filter(|c| c.status == status && c.reason == draft.reason)
        .map(|c| c.last_transition_time.clone())
        .unwrap_or(Time(now));
    Condition {
        last_transition_time,
        message: draft.message.clone(),
        observed_generation: generation,
        reason: draft.reason.clone(),
        status: status.to_string(),
        type_: draft.type_.clone(),
    }
}

/// Returns a copy of a serialized status with every transition time removed,
/// so that statuses can be compared by content.
pub(crate) fn without_timestamps(mut value: serde_json::Value) -> serde_json::Value {
    strip(&mut value);
    value
}

fn strip(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            map.remove("lastTransitionTime");
            for v in map.values_mut() {
                strip(v);
            }
        }
        serde_json::Value::Array(items) => {
            for v in items {
                strip(v);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentgateway_controller_core::status::{conditions, reasons};
    use pretty_assertions::assert_eq;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).expect("valid timestamp")
    }

    #[test]
    fn keeps_transition_time_when_unchanged() {
        let drafts = vec![ConditionDraft::new(
            conditions::ACCEPTED,
            true,
            reasons::ACCEPTED,
            "first",
        )];
        let first = merge(&[], &drafts, Some(1), at(10));
        assert_eq!(first[0].last_transition_time, Time(at(10)));

        // Only the message and generation changed.
        let drafts = vec![ConditionDraft::new(
            conditions::ACCEPTED,
            true,
            reasons::ACCEPTED,
            "second",
        )];
        let second = merge(&first, &drafts, Some(2), at(20));
        assert_eq!(second[0].last_transition_time, Time(at(10)));
        assert_eq!(second[0].message, "second");
        assert_eq!(second[0].observed_generation, Some(2));
    }

    #[test]
    fn updates_transition_time_on_change() {
        let accepted = vec![ConditionDraft::new(
            conditions::ACCEPTED,
            true,
            reasons::ACCEPTED,
            "",
        )];
        let first = merge(&[], &accepted, Some(1), at(10));

        let rejected = vec![ConditionDraft::new(
            conditions::ACCEPTED,
            false,
            reasons::NOT_ALLOWED_BY_LISTENERS,
            "",
        )];
        let second = merge(&first, &rejected, Some(1), at(20));
        assert_eq!(second[0].last_transition_time, Time(at(20)));
        assert_eq!(second[0].status, "False");

        // A reason change alone is a transition.
        let other = vec![ConditionDraft::new(
            conditions::ACCEPTED,
            false,
            reasons::NO_MATCHING_PARENT,
            "",
        )];
        let third = merge(&second, &other, Some(1), at(30));
        assert_eq!(third[0].last_transition_time, Time(at(30)));
    }

    #[test]
    fn upsert_leaves_other_types() {
        let mut current = merge(
            &[],
            &[
                ConditionDraft::new(conditions::ACCEPTED, true, reasons::ACCEPTED, ""),
                ConditionDraft::new(conditions::PROGRAMMED, true, reasons::PROGRAMMED, ""),
            ],
            Some(1),
            at(10),
        );
        upsert(
            &mut current,
            &ConditionDraft::new(conditions::PROGRAMMED, false, reasons::INVALID, "bad"),
            Some(2),
            at(20),
        );
        assert_eq!(current.len(), 2);
        assert_eq!(current[0].observed_generation, Some(1));
        assert_eq!(current[1].reason, reasons::INVALID);
        assert_eq!(current[1].last_transition_time, Time(at(20)));
    }

    #[test]
    fn comparison_ignores_timestamps() {
        let a = serde_json::json!({
            "conditions": [{ "type": "Accepted", "lastTransitionTime": "2024-01-01T00:00:00Z" }],
        });
        let b = serde_json::json!({
            "conditions": [{ "type": "Accepted", "lastTransitionTime": "2025-01-01T00:00:00Z" }],
        });
        assert_ne!(a, b);
        assert_eq!(without_timestamps(a), without_timestamps(b));
    }
}
