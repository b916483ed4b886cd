use crate::{
    conditions,
    manipulator::StatusManipulator,
    metrics::{ControllerMetrics, Outcome},
    queue::{Desired, Update},
};
use agentgateway_controller_core::{GroupKind, ObjectSource};
use agentgateway_controller_k8s_api::{
    self as k8s,
    gateway::{GatewayClassStatus, GatewayStatus},
    policy::{AgentgatewayPolicy, BackendTlsPolicy, HttpListenerPolicy, PolicyStatus, TrafficPolicy},
    route::RouteStatus,
    GrpcRoute, HttpRoute, TcpRoute, TlsRoute,
};
use ahash::AHashMap as HashMap;
use anyhow::Result;
use chrono::offset::Utc;
use k8s_openapi::NamespaceResourceScope;
use serde::{de::DeserializeOwned, Serialize};
use std::{fmt, future::Future, time::Duration};
use tokio::{sync::mpsc::Receiver, time};

const FIELD_MANAGER: &str = "agentgateway-controller";

/// Writes queued statuses back to the API server.
pub struct Controller {
    client: k8s::Client,
    controller_name: String,
    updates: Receiver<Update>,
    patch_timeout: Duration,
    retries: u32,
    metrics: ControllerMetrics,
}

/// Resources whose status this controller writes.
trait WithStatus {
    type Status: Clone + Default + Serialize;

    fn status(&self) -> Option<&Self::Status>;
}

macro_rules! with_status {
    ($($res:ty => $status:ty),+ $(,)?) => {
        $(
            impl WithStatus for $res {
                type Status = $status;

                fn status(&self) -> Option<&$status> {
                    self.status.as_ref()
                }
            }
        )+
    };
}

with_status! {
    k8s::GatewayClass => GatewayClassStatus,
    k8s::Gateway => GatewayStatus,
    HttpRoute => RouteStatus,
    GrpcRoute => RouteStatus,
    TcpRoute => RouteStatus,
    TlsRoute => RouteStatus,
    TrafficPolicy => PolicyStatus,
    HttpListenerPolicy => PolicyStatus,
    BackendTlsPolicy => PolicyStatus,
    AgentgatewayPolicy => PolicyStatus,
}

// === impl Controller ===

impl Controller {
    pub fn new(
        client: k8s::Client,
        controller_name: impl Into<String>,
        updates: Receiver<Update>,
        metrics: ControllerMetrics,
    ) -> Self {
        Self {
            client,
            controller_name: controller_name.into(),
            updates,
            patch_timeout: Duration::from_secs(5),
            retries: 5,
            metrics,
        }
    }

    pub fn with_patch_timeout(mut self, timeout: Duration) -> Self {
        self.patch_timeout = timeout;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries.max(1);
        self
    }

    /// Processes updates until every sender has been dropped.
    pub async fn run(mut self) {
        while let Some(update) = self.updates.recv().await {
            let mut batch = vec![update];
            while let Ok(update) = self.updates.try_recv() {
                batch.push(update);
            }

            for update in coalesce(batch) {
                let outcome = self.write(&update).await;
                tracing::debug!(object = %update.target, ?outcome, "Processed status update");
                self.metrics.record(&update.kind().kind, outcome);
            }
        }
        tracing::debug!("Status updates closed");
    }

    async fn write(&self, update: &Update) -> Outcome {
        let now = Utc::now();
        let name = self.controller_name.as_str();
        match &update.desired {
            Desired::GatewayClass(draft) => {
                let api = k8s::Api::<k8s::GatewayClass>::all(self.client.clone());
                self.patch(api, update, |current: Option<GatewayClassStatus>| {
                    let mut status = StatusManipulator::new(current, name, draft.generation, now);
                    status.set_conditions(&draft.conditions);
                    status.into_status()
                })
                .await
            }

            Desired::Gateway(draft) => {
                let Some(api) = self.namespaced::<k8s::Gateway>(&update.target) else {
                    return Outcome::Failed;
                };
                self.patch(api, update, |current: Option<GatewayStatus>| {
                    let mut status = StatusManipulator::new(current, name, draft.generation, now);
                    status
                        .set_conditions(&draft.conditions)
                        .set_listeners(&draft.listeners);
                    status.into_status()
                })
                .await
            }

            Desired::Route(draft) => {
                let build = |current: Option<RouteStatus>| {
                    let mut status = StatusManipulator::new(current, name, draft.generation, now);
                    status.set_parents(&draft.parents);
                    status.into_status()
                };
                let kind = update.kind();
                if *kind == GroupKind::HTTP_ROUTE {
                    self.patch_namespaced::<HttpRoute, _>(update, build).await
                } else if *kind == GroupKind::GRPC_ROUTE {
                    self.patch_namespaced::<GrpcRoute, _>(update, build).await
                } else if *kind == GroupKind::TCP_ROUTE {
                    self.patch_namespaced::<TcpRoute, _>(update, build).await
                } else if *kind == GroupKind::TLS_ROUTE {
                    self.patch_namespaced::<TlsRoute, _>(update, build).await
                } else {
                    tracing::warn!(object = %update.target, "Unsupported route kind");
                    Outcome::Failed
                }
            }

            Desired::Policy(draft) => {
                let build = |current: Option<PolicyStatus>| {
                    let mut status = StatusManipulator::new(current, name, draft.generation, now);
                    status.set_ancestors(&draft.ancestors);
                    status.into_status()
                };
                let kind = update.kind();
                if *kind == GroupKind::TRAFFIC_POLICY {
                    self.patch_namespaced::<TrafficPolicy, _>(update, build).await
                } else if *kind == GroupKind::HTTP_LISTENER_POLICY {
                    self.patch_namespaced::<HttpListenerPolicy, _>(update, build).await
                } else if *kind == GroupKind::BACKEND_TLS_POLICY {
                    self.patch_namespaced::<BackendTlsPolicy, _>(update, build).await
                } else if *kind == GroupKind::AGENTGATEWAY_POLICY {
                    self.patch_namespaced::<AgentgatewayPolicy, _>(update, build).await
                } else {
                    tracing::warn!(object = %update.target, "Unsupported policy kind");
                    Outcome::Failed
                }
            }
        }
    }

    fn namespaced<K>(&self, target: &ObjectSource) -> Option<k8s::Api<K>>
    where
        K: k8s::Resource<DynamicType = (), Scope = NamespaceResourceScope>,
    {
        match &target.namespace {
            Some(ns) => Some(k8s::Api::namespaced(self.client.clone(), ns)),
            None => {
                tracing::warn!(object = %target, "Namespaced status target has no namespace");
                None
            }
        }
    }

    async fn patch_namespaced<K, F>(&self, update: &Update, build: F) -> Outcome
    where
        K: k8s::Resource<DynamicType = (), Scope = NamespaceResourceScope>,
        K: WithStatus + Clone + DeserializeOwned + fmt::Debug,
        F: Fn(Option<K::Status>) -> K::Status,
    {
        match self.namespaced::<K>(&update.target) {
            Some(api) => self.patch(api, update, build).await,
            None => Outcome::Failed,
        }
    }

    /// Patches an object's status, retrying failed or timed out attempts with
    /// exponential backoff.
    async fn patch<K, F>(&self, api: k8s::Api<K>, update: &Update, build: F) -> Outcome
    where
        K: k8s::Resource<DynamicType = ()> + WithStatus + Clone + DeserializeOwned + fmt::Debug,
        F: Fn(Option<K::Status>) -> K::Status,
    {
        with_retries(&update.target, self.retries, self.patch_timeout, |_| {
            self.try_patch(&api, update, &build)
        })
        .await
    }

    async fn try_patch<K, F>(&self, api: &k8s::Api<K>, update: &Update, build: &F) -> Result<Outcome>
    where
        K: k8s::Resource<DynamicType = ()> + WithStatus + Clone + DeserializeOwned + fmt::Debug,
        F: Fn(Option<K::Status>) -> K::Status,
    {
        let name = &update.target.name;
        let Some(obj) = api.get_opt(name).await? else {
            return Ok(Outcome::Deleted);
        };
        if is_stale(obj.meta().generation, update.generation) {
            return Ok(Outcome::Stale);
        }

        let current = obj.status().cloned();
        let current_value = serde_json::to_value(current.clone().unwrap_or_default())?;
        let desired = build(current);
        let desired_value = serde_json::to_value(&desired)?;
        if conditions::without_timestamps(current_value)
            == conditions::without_timestamps(desired_value.clone())
        {
            return Ok(Outcome::Unchanged);
        }

        let patch = k8s::Patch::Merge(serde_json::json!({ "status": desired_value }));
        api.patch_status(name, &k8s::PatchParams::apply(FIELD_MANAGER), &patch)
            .await?;
        Ok(Outcome::Applied)
    }
}

/// Runs `attempt` until it completes, at most `retries` times. Failed and
/// timed out attempts are retried after a backoff of 100ms, doubling with
/// each further attempt.
async fn with_retries<F, Fut>(
    object: &ObjectSource,
    retries: u32,
    timeout: Duration,
    mut attempt: F,
) -> Outcome
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Outcome>>,
{
    for n in 0..retries {
        if n > 0 {
            time::sleep(backoff(n)).await;
        }
        match time::timeout(timeout, attempt(n)).await {
            Ok(Ok(outcome)) => return outcome,
            Ok(Err(error)) => {
                tracing::info!(%object, attempt = n, %error, "Failed to patch status")
            }
            Err(_) => {
                tracing::info!(%object, attempt = n, ?timeout, "Status patch timed out")
            }
        }
    }
    tracing::error!(%object, attempts = retries, "Giving up on status update");
    Outcome::Failed
}

/// Keeps the most recent update for each target, in the order targets were
/// first queued.
fn coalesce(batch: Vec<Update>) -> Vec<Update> {
    let mut positions = HashMap::<ObjectSource, usize>::new();
    let mut updates = Vec::<Update>::with_capacity(batch.len());
    for update in batch {
        match positions.get(&update.target) {
            Some(&i) => updates[i] = update,
            None => {
                positions.insert(update.target.clone(), updates.len());
                updates.push(update);
            }
        }
    }
    updates
}

/// A status computed from an older generation than the live object's must
/// not overwrite it; a newer computation will follow.
fn is_stale(live: Option<i64>, computed: Option<i64>) -> bool {
    matches!((live, computed), (Some(live), Some(computed)) if live > computed)
}

fn backoff(attempt: u32) -> Duration {
    Duration::from_millis(100) * 2u32.saturating_pow(attempt - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::Draft;
    use agentgateway_controller_core::status::{
        conditions as types, reasons, ConditionDraft, GatewayClassStatusDraft,
    };
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use tokio::time::Instant;

    fn class_update(name: &str, generation: i64) -> Update {
        Arc::new(GatewayClassStatusDraft {
            name: name.to_string(),
            generation: Some(generation),
            conditions: vec![ConditionDraft::new(
                types::ACCEPTED,
                true,
                reasons::ACCEPTED,
                "",
            )],
        })
        .into_update()
    }

    #[test]
    fn coalesces_by_target() {
        let updates = coalesce(vec![
            class_update("a", 1),
            class_update("b", 1),
            class_update("a", 2),
        ]);
        let summary = updates
            .iter()
            .map(|u| (u.target.name.as_str(), u.generation))
            .collect::<Vec<_>>();
        assert_eq!(summary, vec![("a", Some(2)), ("b", Some(1))]);
    }

    #[test]
    fn stale_generations() {
        assert!(is_stale(Some(3), Some(2)));
        assert!(!is_stale(Some(2), Some(2)));
        assert!(!is_stale(Some(2), Some(3)));
        assert!(!is_stale(None, Some(2)));
        assert!(!is_stale(Some(2), None));
    }

    #[test]
    fn backoff_doubles() {
        assert_eq!(backoff(1), Duration::from_millis(100));
        assert_eq!(backoff(2), Duration::from_millis(200));
        assert_eq!(backoff(4), Duration::from_millis(800));
    }

    fn class_target() -> ObjectSource {
        ObjectSource::new(GroupKind::GATEWAY_CLASS, None, "agentgateway")
    }

    /// Runs `with_retries`, recording the time at which each attempt starts.
    /// `results` gives the outcome of each attempt; attempts past its end
    /// fail.
    async fn attempts(
        retries: u32,
        results: Vec<Result<Outcome, &'static str>>,
    ) -> (Outcome, Vec<Duration>) {
        let start = Instant::now();
        let started = Arc::new(Mutex::new(Vec::new()));
        let outcome = with_retries(&class_target(), retries, Duration::from_secs(5), |n| {
            started.lock().push(start.elapsed());
            let result = results
                .get(n as usize)
                .cloned()
                .unwrap_or(Err("unavailable"));
            async move { result.map_err(anyhow::Error::msg) }
        })
        .await;
        let started = started.lock().clone();
        (outcome, started)
    }

    #[tokio::test(start_paused = true)]
    async fn failed_patches_retry_with_backoff() {
        let (outcome, started) = attempts(5, vec![]).await;
        assert_eq!(outcome, Outcome::Failed);
        assert_eq!(
            started,
            [0, 100, 300, 700, 1500]
                .into_iter()
                .map(Duration::from_millis)
                .collect::<Vec<_>>()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn success_stops_retries() {
        let (outcome, started) =
            attempts(5, vec![Err("conflict"), Ok(Outcome::Applied)]).await;
        assert_eq!(outcome, Outcome::Applied);
        assert_eq!(
            started,
            vec![Duration::ZERO, Duration::from_millis(100)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_patches_are_retried() {
        let start = Instant::now();
        let calls = Arc::new(Mutex::new(0u32));
        let outcome = with_retries(&class_target(), 2, Duration::from_secs(1), |n| {
            *calls.lock() += 1;
            async move {
                if n == 0 {
                    std::future::pending::<()>().await;
                }
                Ok(Outcome::Unchanged)
            }
        })
        .await;
        assert_eq!(outcome, Outcome::Unchanged);
        assert_eq!(*calls.lock(), 2);
        assert_eq!(start.elapsed(), Duration::from_millis(1100));
    }
}
