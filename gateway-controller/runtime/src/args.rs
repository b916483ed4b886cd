use crate::{
    core::DEFAULT_CONTROLLER_NAME,
    index::{self, IndexMetrics, Outputs, Watched},
    k8s,
    krt::{self, RuntimeMetrics},
    snapshot::{self, SnapshotCache, SnapshotMetrics},
    status::{self, ControllerMetrics, Update},
    watch,
};
use anyhow::{bail, Result};
use clap::Parser;
use prometheus_client::registry::Registry;
use tokio::{
    sync::mpsc::{self, Sender},
    time::Duration,
};
use tracing::{info, info_span, Instrument};

// The maximum number of status updates to buffer while the status controller
// is busy patching or backing off. Updates beyond this are dropped.
const STATUS_UPDATE_QUEUE_SIZE: usize = 10_000;

#[derive(Debug, Parser)]
#[clap(name = "agentgateway", about = "An agentgateway control plane")]
pub struct Args {
    #[clap(
        long,
        default_value = "agentgateway=info,warn",
        env = "AGENTGATEWAY_CONTROLLER_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// The GatewayClass controller name handled by this instance.
    #[clap(long, default_value = DEFAULT_CONTROLLER_NAME)]
    controller_name: String,

    /// Gateways of this class are programmed as mesh waypoints.
    #[clap(long, default_value = "istio-waypoint")]
    waypoint_class: String,

    #[clap(long, default_value = "cluster.local")]
    cluster_domain: String,

    #[clap(long, default_value = "cluster1")]
    cluster_id: String,

    #[clap(long, default_value = "5000")]
    patch_timeout_ms: u64,

    /// Attempts made to write each status before giving up.
    #[clap(long, default_value = "5")]
    status_retries: u32,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            admin,
            client,
            log_level,
            log_format,
            controller_name,
            waypoint_class,
            cluster_domain,
            cluster_id,
            patch_timeout_ms,
            status_retries,
        } = self;

        let mut prom = <Registry>::default();
        let krt_metrics = RuntimeMetrics::register(prom.sub_registry_with_prefix("krt"));
        let index_metrics = IndexMetrics::register(prom.sub_registry_with_prefix("inputs"));
        let status_metrics = ControllerMetrics::register(&mut prom);
        let snapshot_metrics = SnapshotMetrics::register(&mut prom);

        let mut runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .build()
            .await?;

        // Build the translation graph. Nothing is translated until the
        // collection loop is spawned below.
        let rt = krt::Runtime::new(Some(krt_metrics));
        let (inputs, outputs) = index::build(
            &rt,
            index::Config {
                controller_name: controller_name.clone(),
                waypoint_class,
                cluster_domain,
                cluster_id,
            },
        );

        // Spawn resource watches.

        watch::cluster(
            &mut runtime,
            &index_metrics,
            inputs.gateway_classes.clone(),
            "gatewayclasses",
        );
        watch::cluster(
            &mut runtime,
            &index_metrics,
            inputs.namespaces.clone(),
            "namespaces",
        );
        watch::namespaced(
            &mut runtime,
            &index_metrics,
            inputs.gateways.clone(),
            "gateways",
        );
        watch::namespaced(
            &mut runtime,
            &index_metrics,
            inputs.http_routes.clone(),
            "httproutes",
        );
        watch::namespaced(
            &mut runtime,
            &index_metrics,
            inputs.reference_grants.clone(),
            "referencegrants",
        );
        watch::namespaced(
            &mut runtime,
            &index_metrics,
            inputs.services.clone(),
            "services",
        );
        watch::namespaced(
            &mut runtime,
            &index_metrics,
            inputs.secrets.clone(),
            "secrets",
        );
        watch::namespaced(
            &mut runtime,
            &index_metrics,
            inputs.config_maps.clone(),
            "configmaps",
        );
        watch::namespaced(
            &mut runtime,
            &index_metrics,
            inputs.backends.clone(),
            "backends",
        );
        watch::namespaced(
            &mut runtime,
            &index_metrics,
            inputs.traffic_policies.clone(),
            "trafficpolicies",
        );
        watch::namespaced(
            &mut runtime,
            &index_metrics,
            inputs.listener_policies.clone(),
            "httplistenerpolicies",
        );
        watch::namespaced(
            &mut runtime,
            &index_metrics,
            inputs.backend_tls_policies.clone(),
            "backendtlspolicies",
        );
        watch::namespaced(
            &mut runtime,
            &index_metrics,
            inputs.agentgateway_policies.clone(),
            "agentgatewaypolicies",
        );
        watch::namespaced(
            &mut runtime,
            &index_metrics,
            inputs.gateway_extensions.clone(),
            "gatewayextensions",
        );

        // Experimental and third-party kinds are only watched when their
        // CRDs are installed.
        let client = runtime.client();
        let watched = Watched {
            grpc_routes: watch::api_resource_exists::<k8s::GrpcRoute>(&client).await,
            tcp_routes: watch::api_resource_exists::<k8s::TcpRoute>(&client).await,
            tls_routes: watch::api_resource_exists::<k8s::TlsRoute>(&client).await,
            inference_pools: watch::api_resource_exists::<k8s::InferencePool>(&client).await,
            service_entries: watch::api_resource_exists::<k8s::ServiceEntry>(&client).await,
        };
        if watched.grpc_routes {
            watch::namespaced(
                &mut runtime,
                &index_metrics,
                inputs.grpc_routes.clone(),
                "grpcroutes",
            );
        } else {
            tracing::warn!(
                "grpcroutes.gateway.networking.k8s.io resource kind not found, skipping watches"
            );
        }
        if watched.tcp_routes {
            watch::namespaced(
                &mut runtime,
                &index_metrics,
                inputs.tcp_routes.clone(),
                "tcproutes",
            );
        } else {
            tracing::warn!(
                "tcproutes.gateway.networking.k8s.io resource kind not found, skipping watches"
            );
        }
        if watched.tls_routes {
            watch::namespaced(
                &mut runtime,
                &index_metrics,
                inputs.tls_routes.clone(),
                "tlsroutes",
            );
        } else {
            tracing::warn!(
                "tlsroutes.gateway.networking.k8s.io resource kind not found, skipping watches"
            );
        }
        if watched.inference_pools {
            watch::namespaced(
                &mut runtime,
                &index_metrics,
                inputs.inference_pools.clone(),
                "inferencepools",
            );
        } else {
            tracing::warn!(
                "inferencepools resource kind not found, skipping watches"
            );
        }
        if watched.service_entries {
            watch::namespaced(
                &mut runtime,
                &index_metrics,
                inputs.service_entries.clone(),
                "serviceentries",
            );
        } else {
            tracing::warn!(
                "serviceentries.networking.istio.io resource kind not found, skipping watches"
            );
        }
        inputs.mark_unwatched_synced(&watched);

        // Drive the translation graph until shutdown.
        tokio::spawn(
            rt.clone()
                .run(runtime.shutdown_handle())
                .instrument(info_span!("collections")),
        );

        let (updates_tx, updates_rx) = mpsc::channel(STATUS_UPDATE_QUEUE_SIZE);
        let controller =
            status::Controller::new(client, controller_name, updates_rx, status_metrics)
                .with_patch_timeout(Duration::from_millis(patch_timeout_ms))
                .with_retries(status_retries);
        tokio::spawn(
            publish(
                rt,
                outputs,
                SnapshotCache::new(snapshot_metrics),
                updates_tx,
                controller,
                runtime.shutdown_handle(),
            )
            .instrument(info_span!("publish")),
        );

        // Block the main thread on the shutdown signal. Once it fires, wait
        // for the background tasks to complete before exiting.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}

/// Once every input has synced, publishes snapshots and writes statuses as
/// the graph's outputs change.
async fn publish(
    rt: krt::Runtime,
    outputs: Outputs,
    cache: SnapshotCache,
    updates: Sender<Update>,
    controller: status::Controller,
    shutdown: drain::Watch,
) {
    if !watch::synced(&rt, shutdown).await {
        return;
    }
    info!("Inputs synced");

    watch::log_snapshots(&cache);
    snapshot::publish(&outputs.resources, cache);

    status::enqueue(&outputs.gateway_class_statuses, updates.clone());
    status::enqueue(&outputs.gateway_statuses, updates.clone());
    status::enqueue(&outputs.route_statuses, updates.clone());
    status::enqueue(&outputs.policy_statuses, updates);

    controller
        .run()
        .instrument(info_span!("status_controller"))
        .await;
}
