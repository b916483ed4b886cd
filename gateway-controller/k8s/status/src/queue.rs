use agentgateway_controller_core::{
    status::{GatewayClassStatusDraft, GatewayStatusDraft, PolicyStatusDraft, RouteStatusDraft},
    GroupKind, ObjectSource,
};
use agentgateway_controller_krt::{Collection, Keyed};
use std::sync::Arc;
use tokio::sync::mpsc::{error::TrySendError, Sender};

/// A desired status for a single object.
#[derive(Clone, Debug, PartialEq)]
pub struct Update {
    pub target: ObjectSource,
    pub generation: Option<i64>,
    pub desired: Desired,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Desired {
    GatewayClass(Arc<GatewayClassStatusDraft>),
    Gateway(Arc<GatewayStatusDraft>),
    Route(Arc<RouteStatusDraft>),
    Policy(Arc<PolicyStatusDraft>),
}

/// Status drafts that can be written back to the object they describe.
pub trait Draft: Keyed + Send + Sync + 'static {
    fn into_update(self: Arc<Self>) -> Update;
}

/// Queues an update whenever a draft is added or changed.
///
/// Removed drafts are not queued: the object they described is either gone
/// or no longer handled by this controller, and its status is left as is.
///
/// Handlers must not block, so updates that arrive while the queue is full
/// are dropped.
pub fn enqueue<T: Draft>(drafts: &Collection<T>, tx: Sender<Update>) {
    drafts.subscribe(move |events| {
        for event in events {
            let Some(draft) = event.latest() else {
                continue;
            };
            match tx.try_send(draft.clone().into_update()) {
                Ok(()) => {}
                Err(TrySendError::Full(update)) => {
                    tracing::warn!(object = %update.target, "Status update queue is full, dropping update");
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::debug!(key = %event.key(), "Status controller has stopped");
                    return;
                }
            }
        }
    });
}

// === impl Update ===

impl Update {
    pub fn kind(&self) -> &GroupKind {
        &self.target.kind
    }
}

// === impl Draft ===

impl Draft for GatewayClassStatusDraft {
    fn into_update(self: Arc<Self>) -> Update {
        Update {
            target: ObjectSource::new(GroupKind::GATEWAY_CLASS, None, self.name.clone()),
            generation: self.generation,
            desired: Desired::GatewayClass(self),
        }
    }
}

impl Draft for GatewayStatusDraft {
    fn into_update(self: Arc<Self>) -> Update {
        Update {
            target: ObjectSource::new(
                GroupKind::GATEWAY,
                Some(self.gateway.namespace.clone()),
                self.gateway.name.clone(),
            ),
            generation: self.generation,
            desired: Desired::Gateway(self),
        }
    }
}

impl Draft for RouteStatusDraft {
    fn into_update(self: Arc<Self>) -> Update {
        Update {
            target: self.route.clone(),
            generation: self.generation,
            desired: Desired::Route(self),
        }
    }
}

impl Draft for PolicyStatusDraft {
    fn into_update(self: Arc<Self>) -> Update {
        Update {
            target: self.policy.clone(),
            generation: self.generation,
            desired: Desired::Policy(self),
        }
    }
}
