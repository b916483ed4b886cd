use crate::conditions;
use agentgateway_controller_core::{
    status::{AncestorStatusDraft, ConditionDraft, ListenerStatusDraft, ParentRef, ParentStatusDraft},
    GroupKind,
};
use agentgateway_controller_k8s_api::{
    gateway::{GatewayClassStatus, GatewayStatus, ListenerStatus, RouteGroupKind},
    route::{ParentReference, PolicyAncestorStatus, PolicyStatus, RouteParentStatus, RouteStatus},
};
use chrono::{offset::Utc, DateTime};

/// Applies computed status content onto an object's live status.
///
/// Entries written by other controllers are left in place; entries written
/// by this controller are replaced wholesale.
#[derive(Debug)]
pub struct StatusManipulator<'a, S> {
    status: S,
    controller_name: &'a str,
    generation: Option<i64>,
    now: DateTime<Utc>,
}

// === impl StatusManipulator ===

impl<'a, S: Default> StatusManipulator<'a, S> {
    pub fn new(
        current: Option<S>,
        controller_name: &'a str,
        generation: Option<i64>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            status: current.unwrap_or_default(),
            controller_name,
            generation,
            now,
        }
    }

    pub fn into_status(self) -> S {
        self.status
    }
}

impl StatusManipulator<'_, GatewayClassStatus> {
    pub fn set_condition(&mut self, draft: &ConditionDraft) -> &mut Self {
        conditions::upsert(&mut self.status.conditions, draft, self.generation, self.now);
        self
    }

    /// Replaces all conditions.
    pub fn set_conditions(&mut self, drafts: &[ConditionDraft]) -> &mut Self {
        self.status.conditions =
            conditions::merge(&self.status.conditions, drafts, self.generation, self.now);
        self
    }
}

impl StatusManipulator<'_, GatewayStatus> {
    pub fn set_condition(&mut self, draft: &ConditionDraft) -> &mut Self {
        conditions::upsert(&mut self.status.conditions, draft, self.generation, self.now);
        self
    }

    /// Replaces all conditions.
    pub fn set_conditions(&mut self, drafts: &[ConditionDraft]) -> &mut Self {
        self.status.conditions =
            conditions::merge(&self.status.conditions, drafts, self.generation, self.now);
        self
    }

    pub fn set_listener_status(
        &mut self,
        name: &str,
        attached_routes: i32,
        supported_kinds: &[GroupKind],
        drafts: &[ConditionDraft],
    ) -> &mut Self {
        let (generation, now) = (self.generation, self.now);
        let listener = match self.status.listeners.iter().position(|l| l.name == name) {
            Some(i) => &mut self.status.listeners[i],
            None => {
                self.status.listeners.push(ListenerStatus {
                    name: name.to_string(),
                    supported_kinds: vec![],
                    attached_routes: 0,
                    conditions: vec![],
                });
                let last = self.status.listeners.len() - 1;
                &mut self.status.listeners[last]
            }
        };
        listener.supported_kinds = supported_kinds.iter().map(route_group_kind).collect();
        listener.attached_routes = attached_routes;
        listener.conditions = conditions::merge(&listener.conditions, drafts, generation, now);
        self
    }

    /// Sets the status of every listener, dropping listeners that no longer
    /// exist.
    pub fn set_listeners(&mut self, drafts: &[ListenerStatusDraft]) -> &mut Self {
        self.status
            .listeners
            .retain(|l| drafts.iter().any(|d| d.name == l.name));
        for draft in drafts {
            self.set_listener_status(
                &draft.name,
                draft.attached_routes,
                &draft.supported_kinds,
                &draft.conditions,
            );
        }
        self
    }
}

impl StatusManipulator<'_, RouteStatus> {
    pub fn set_parent_conditions(
        &mut self,
        parent_ref: &ParentRef,
        drafts: &[ConditionDraft],
    ) -> &mut Self {
        let parent_ref = parent_reference(parent_ref);
        let (generation, now) = (self.generation, self.now);
        let controller_name = self.controller_name;
        let existing = self
            .status
            .parents
            .iter_mut()
            .find(|p| p.controller_name == controller_name && p.parent_ref == parent_ref);
        match existing {
            Some(parent) => {
                parent.conditions = conditions::merge(&parent.conditions, drafts, generation, now);
            }
            None => self.status.parents.push(RouteParentStatus {
                parent_ref,
                controller_name: controller_name.to_string(),
                conditions: conditions::merge(&[], drafts, generation, now),
            }),
        }
        self
    }

    /// Sets this controller's parent statuses, dropping parents it no longer
    /// reports on.
    pub fn set_parents(&mut self, drafts: &[ParentStatusDraft]) -> &mut Self {
        let ours = drafts
            .iter()
            .map(|d| parent_reference(&d.parent_ref))
            .collect::<Vec<_>>();
        let controller_name = self.controller_name;
        self.status
            .parents
            .retain(|p| p.controller_name != controller_name || ours.contains(&p.parent_ref));
        for draft in drafts {
            self.set_parent_conditions(&draft.parent_ref, &draft.conditions);
        }
        self
    }
}

impl StatusManipulator<'_, PolicyStatus> {
    pub fn set_ancestor_conditions(
        &mut self,
        ancestor_ref: &ParentRef,
        drafts: &[ConditionDraft],
    ) -> &mut Self {
        let ancestor_ref = parent_reference(ancestor_ref);
        let (generation, now) = (self.generation, self.now);
        let controller_name = self.controller_name;
        let existing = self
            .status
            .ancestors
            .iter_mut()
            .find(|a| a.controller_name == controller_name && a.ancestor_ref == ancestor_ref);
        match existing {
            Some(ancestor) => {
                ancestor.conditions =
                    conditions::merge(&ancestor.conditions, drafts, generation, now);
            }
            None => self.status.ancestors.push(PolicyAncestorStatus {
                ancestor_ref,
                controller_name: controller_name.to_string(),
                conditions: conditions::merge(&[], drafts, generation, now),
            }),
        }
        self
    }

    /// Sets this controller's ancestor statuses, dropping ancestors it no
    /// longer reports on.
    pub fn set_ancestors(&mut self, drafts: &[AncestorStatusDraft]) -> &mut Self {
        let ours = drafts
            .iter()
            .map(|d| parent_reference(&d.ancestor_ref))
            .collect::<Vec<_>>();
        let controller_name = self.controller_name;
        self.status
            .ancestors
            .retain(|a| a.controller_name != controller_name || ours.contains(&a.ancestor_ref));
        for draft in drafts {
            self.set_ancestor_conditions(&draft.ancestor_ref, &draft.conditions);
        }
        self
    }
}

fn parent_reference(parent: &ParentRef) -> ParentReference {
    ParentReference {
        group: Some(parent.kind.group.to_string()),
        kind: Some(parent.kind.kind.to_string()),
        namespace: parent.namespace.clone(),
        name: parent.name.clone(),
        section_name: parent.section_name.clone(),
        port: parent.port.map(i32::from),
    }
}

fn route_group_kind(kind: &GroupKind) -> RouteGroupKind {
    RouteGroupKind {
        group: Some(kind.group.to_string()),
        kind: kind.kind.to_string(),
    }
}
