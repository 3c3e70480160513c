use std::sync::Arc;

use chrono::Utc;
use futures::StreamExt;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{
    api::{Api, ListParams, ResourceExt},
    client::Client,
    runtime::{
        controller::{Action, Config as ControllerConfig, Controller},
        reflector::{self, ObjectRef},
        watcher::{self, Config},
        WatchStreamExt,
    },
    Resource,
};
use opentelemetry::trace::TraceId;
use tokio::{sync::RwLock, time::Duration};
use tracing::*;

use crate::controllers::{Diagnostics, State};
use crate::events::{EventRecorder, KubeEventRecorder};
use crate::providers::{ImageProvider, ReleaseProvider, TagReleaseProvider};
use crate::resources::hostedclusters::HostedCluster;
use crate::resources::machineconfigservers::MachineConfigServer;
use crate::resources::machinedeployments::MachineDeployment;
use crate::resources::machinehealthchecks::MachineHealthCheck;
use crate::resources::nodepools::{
    NodePool, NodePoolStatus, AS_EXPECTED_REASON, AUTOREPAIR_ENABLED_CONDITION,
    AUTOSCALING_ENABLED_CONDITION, NODEPOOL_FINALIZER, VALIDATION_FAILED_REASON,
};
use crate::store::{create_or_update, delete_if_exists, object_key, KubeStore, ObjectStore};
use crate::{telemetry, Error, Metrics, Result};

use super::backoff::RetryTracker;
use super::reconcilers::machines::{
    generate, generate_health_check, rolling_update_strategy, MachineInputs,
    AUTOSCALER_MAX_ANNOTATION, AUTOSCALER_MIN_ANNOTATION, NODEPOOL_ANNOTATION,
};
use super::reconcilers::naming::resource_name;
use super::reconcilers::upgrade::{machines_converged, plan_upgrade};
use super::reconcilers::validation::{validate, ReplicaPolicy};

/// Requeue delay while the available node count differs from a fixed count
const UNCONVERGED_REQUEUE_DELAY: Duration = Duration::from_secs(1);
/// If no events were received, check back every 5 minutes
const RESYNC_INTERVAL: Duration = Duration::from_secs(5 * 60);

// Context for our reconciler
pub(crate) struct Context<S> {
    /// Reads and writes of cluster objects
    pub store: S,
    pub images: Arc<dyn ImageProvider>,
    pub releases: Arc<dyn ReleaseProvider>,
    /// Kubernetes event recorder
    pub recorder: Arc<dyn EventRecorder>,
    /// Diagnostics read by the web server
    pub diagnostics: Arc<RwLock<Diagnostics>>,
    /// Prometheus metrics
    pub metrics: Metrics,
    /// Failure counts driving the retry backoff
    pub retries: RetryTracker,
}

#[instrument(skip(ctx, np), fields(trace_id))]
async fn reconcile<S: ObjectStore>(np: Arc<NodePool>, ctx: Arc<Context<S>>) -> Result<Action> {
    let trace_id = telemetry::get_trace_id();
    if trace_id != TraceId::INVALID {
        Span::current().record("trace_id", field::display(&trace_id));
    }
    let _timer = ctx.metrics.count_and_measure::<NodePool>();
    ctx.diagnostics.write().await.last_event = Utc::now();

    let (namespace, name) = object_key(np.as_ref())?;
    let key = np.object_key();

    info!("Reconciling NodePool \"{key}\"");
    match reconcile_nodepool(&ctx, &namespace, &name).await {
        Ok(action) => {
            ctx.retries.reset(&key);
            Ok(action)
        }
        Err(err) => {
            warn!("reconcile failed: {:?}", err);

            ctx.recorder
                .warn(&np.object_ref(&()), "ReconcileError", &err.to_string())
                .await;
            ctx.metrics.reconcile_failure(np.as_ref(), &err);
            Err(err)
        }
    }
}

fn error_policy<S: ObjectStore>(np: Arc<NodePool>, error: &Error, ctx: Arc<Context<S>>) -> Action {
    let key = np.object_key();
    let delay = ctx.retries.next_delay(&key);
    warn!(nodepool = %key, %error, ?delay, "NodePool reconcile failed, retrying");
    Action::requeue(delay)
}

/// Converge the derived machine resources of one NodePool, read fresh from the store
pub(crate) async fn reconcile_nodepool<S: ObjectStore>(
    ctx: &Context<S>,
    namespace: &str,
    name: &str,
) -> Result<Action> {
    let Some(mut pool) = ctx.store.get::<NodePool>(namespace, name).await? else {
        debug!("NodePool {namespace}/{name} not found");
        return Ok(Action::await_change());
    };

    let cluster_name = pool.spec.cluster_name.clone();
    let cluster = ctx
        .store
        .get::<HostedCluster>(namespace, &cluster_name)
        .await?
        .ok_or_else(|| Error::HostedClusterNotFound(format!("{namespace}/{cluster_name}")))?;

    if pool.meta().deletion_timestamp.is_some() {
        let target_namespace = cluster.control_plane_namespace();
        let resources_name = resource_name(&cluster.spec.infra_id, &cluster_name, name);
        return cleanup(ctx, pool, &target_namespace, &resources_name).await;
    }

    if !has_finalizer(&pool) {
        pool.finalizers_mut().push(NODEPOOL_FINALIZER.into());
        pool = ctx
            .store
            .update(&pool)
            .await
            .map_err(|err| Error::Persist(Box::new(err)))?;
    }

    let persisted = pool.clone();
    ensure_owner_ref(pool.owner_references_mut(), cluster_owner_ref(&cluster));

    let result = reconcile_machines(ctx, &mut pool, &cluster).await;
    let saved = persist(ctx, &persisted, pool).await;

    match (result, saved) {
        (Ok(action), Ok(())) => {
            info!("Successfully reconciled NodePool {namespace}/{name}");
            Ok(action)
        }
        (Ok(_), Err(err)) => Err(Error::Persist(Box::new(err))),
        (Err(err), Ok(())) => Err(err),
        (Err(err), Err(persist_err)) => {
            warn!("failed to persist NodePool {namespace}/{name} after a failed reconcile: {persist_err}");
            Err(err)
        }
    }
}

/// Steps that run against a live, finalized pool. Status changes land on `pool`
/// whether or not this succeeds; the caller persists them either way.
async fn reconcile_machines<S: ObjectStore>(
    ctx: &Context<S>,
    pool: &mut NodePool,
    cluster: &HostedCluster,
) -> Result<Action> {
    let spec = pool.spec.clone();
    let key = pool.object_key();

    let policy = match validate(&spec) {
        Ok(policy) => policy,
        Err(err) => {
            status_mut(pool).set_condition(
                AUTOSCALING_ENABLED_CONDITION,
                false,
                VALIDATION_FAILED_REASON,
                err.to_string(),
            );
            return Err(err.into());
        }
    };

    let ami = ctx.images.image(cluster).await?;
    let target_namespace = cluster.control_plane_namespace();
    let inputs = MachineInputs {
        infra_id: &cluster.spec.infra_id,
        ami: &ami,
        pool: &*pool,
        target_namespace: &target_namespace,
    };
    let resources = generate(&inputs)?;
    let health_check = generate_health_check(&inputs);
    let resources_name = inputs.resource_name();

    let live_deployment = ctx
        .store
        .get::<MachineDeployment>(&target_namespace, &resources_name)
        .await?;
    let wanted = wanted_replicas(&policy, live_deployment.is_some());

    let template_spec = resources.template.spec.clone();
    create_or_update(&ctx.store, resources.template, move |template| {
        template.spec = template_spec;
        Ok(())
    })
    .await?;

    // the default only lives for this reconcile; the pool spec is never written back
    let release_image = match spec.release.image.as_str() {
        "" => cluster
            .latest_release_image()
            .map(str::to_owned)
            .ok_or_else(|| Error::MissingReleaseImage(format!("{}/{}", namespace_of(cluster), cluster.name_any())))?,
        image => image.to_owned(),
    };
    let release = ctx.releases.lookup(&release_image).await?;
    let target_version = release.version().to_owned();

    let config_server_name = resources.config_server.name_any();
    let config_image = release_image.clone();
    create_or_update(&ctx.store, resources.config_server, move |mcs| {
        mcs.spec.release_image = config_image;
        Ok(())
    })
    .await?;

    if spec.management.auto_repair {
        let health_check_spec = health_check.spec.clone();
        create_or_update(&ctx.store, health_check, move |mhc| {
            mhc.spec = health_check_spec;
            Ok(())
        })
        .await?;
        status_mut(pool).set_condition(AUTOREPAIR_ENABLED_CONDITION, true, AS_EXPECTED_REASON, "");
    } else {
        delete_if_exists::<_, MachineHealthCheck>(&ctx.store, &target_namespace, &resources_name)
            .await?;
        status_mut(pool).set_condition(AUTOREPAIR_ENABLED_CONDITION, false, AS_EXPECTED_REASON, "");
    }

    let observed_version = pool
        .status
        .as_ref()
        .map(|s| s.version.clone())
        .unwrap_or_default();
    let mut upgrade = None;
    let (deployment, _) = create_or_update(&ctx.store, resources.deployment, |md| {
        let step = plan_upgrade(
            &observed_version,
            &target_version,
            md.spec.template.spec.version.as_deref(),
            md.metadata.resource_version.is_some(),
            machines_converged(md),
        )?;

        md.spec.strategy = Some(rolling_update_strategy(&spec.management));
        step.apply_to_deployment(md, &config_server_name);

        let (min, max) = match policy {
            ReplicaPolicy::Fixed { .. } => (0, 0),
            ReplicaPolicy::Autoscaled { min, max } => (min, max),
        };
        if let Some(replicas) = wanted {
            md.spec.replicas = Some(replicas);
        }
        let annotations = md.annotations_mut();
        annotations.insert(NODEPOOL_ANNOTATION.into(), key.clone());
        annotations.insert(AUTOSCALER_MIN_ANNOTATION.into(), min.to_string());
        annotations.insert(AUTOSCALER_MAX_ANNOTATION.into(), max.to_string());

        upgrade = Some(step);
        Ok(())
    })
    .await?;

    if let Some(step) = upgrade {
        if let Some(message) = step.describe(&deployment) {
            info!(nodepool = %key, release_image = %release_image, "{message}");
        }
        step.apply_to_status(status_mut(pool));
    }

    let available = deployment
        .status
        .as_ref()
        .map_or(0, |status| status.available_replicas);
    status_mut(pool).node_count = available;

    match policy {
        ReplicaPolicy::Fixed { count } => {
            status_mut(pool).set_condition(
                AUTOSCALING_ENABLED_CONDITION,
                false,
                AS_EXPECTED_REASON,
                "",
            );
            if available != count {
                info!("Requeueing NodePool {key}: expected {count} available nodes, found {available}");
                ctx.metrics.unconverged_requeue(&*pool);
                return Ok(Action::requeue(UNCONVERGED_REQUEUE_DELAY));
            }
        }
        ReplicaPolicy::Autoscaled { min, max } => {
            info!("NodePool {key} autoscaling is enabled, maximum nodes: {max}, minimum nodes: {min}");
            status_mut(pool).set_condition(
                AUTOSCALING_ENABLED_CONDITION,
                true,
                AS_EXPECTED_REASON,
                format!("Maximum nodes: {max}, Minimum nodes: {min}"),
            );
        }
    }

    Ok(Action::requeue(RESYNC_INTERVAL))
}

// Finalizer cleanup (the object was deleted, ensure no machines are orphaned)
async fn cleanup<S: ObjectStore>(
    ctx: &Context<S>,
    mut pool: NodePool,
    target_namespace: &str,
    resources_name: &str,
) -> Result<Action> {
    ctx.recorder
        .normal(
            &pool.object_ref(&()),
            "DeleteRequested",
            &format!("Delete `{}`", pool.name_any()),
        )
        .await;

    delete_if_exists::<_, MachineDeployment>(&ctx.store, target_namespace, resources_name).await?;
    delete_if_exists::<_, MachineConfigServer>(&ctx.store, target_namespace, resources_name)
        .await?;
    delete_if_exists::<_, MachineHealthCheck>(&ctx.store, target_namespace, resources_name)
        .await?;

    if has_finalizer(&pool) {
        pool.finalizers_mut().retain(|f| f != NODEPOOL_FINALIZER);
        ctx.store
            .update(&pool)
            .await
            .map_err(|err| Error::Persist(Box::new(err)))?;
    }

    info!("Deleted NodePool {}", pool.object_key());
    Ok(Action::await_change())
}

/// Write back metadata if owner references or finalizers moved, then status if it changed
async fn persist<S: ObjectStore>(
    ctx: &Context<S>,
    persisted: &NodePool,
    mut pool: NodePool,
) -> Result<()> {
    if pool.metadata.owner_references != persisted.metadata.owner_references
        || pool.metadata.finalizers != persisted.metadata.finalizers
    {
        let status = pool.status.take();
        pool = ctx.store.update(&pool).await?;
        pool.status = status;
    }

    if pool.status != persisted.status {
        ctx.store.update_status(&pool).await?;
    }
    Ok(())
}

fn status_mut(pool: &mut NodePool) -> &mut NodePoolStatus {
    pool.status.get_or_insert_with(Default::default)
}

fn has_finalizer(pool: &NodePool) -> bool {
    pool.finalizers().iter().any(|f| f == NODEPOOL_FINALIZER)
}

fn namespace_of(cluster: &HostedCluster) -> String {
    cluster.namespace().unwrap_or_default()
}

/// Replicas to write on the MachineDeployment, `None` to leave them to the autoscaler
fn wanted_replicas(policy: &ReplicaPolicy, deployment_exists: bool) -> Option<i32> {
    match policy {
        ReplicaPolicy::Fixed { count } => Some(*count),
        // the autoscaler does not support scaling from zero
        ReplicaPolicy::Autoscaled { .. } if !deployment_exists => Some(1),
        ReplicaPolicy::Autoscaled { .. } => None,
    }
}

fn cluster_owner_ref(cluster: &HostedCluster) -> OwnerReference {
    OwnerReference {
        api_version: HostedCluster::api_version(&()).into_owned(),
        kind: HostedCluster::kind(&()).into_owned(),
        name: cluster.name_any(),
        uid: cluster.uid().unwrap_or_default(),
        ..Default::default()
    }
}

fn api_group(api_version: &str) -> &str {
    api_version.rsplit_once('/').map_or("", |(group, _)| group)
}

/// Replace the reference with the same group, kind and name, or append it
fn ensure_owner_ref(refs: &mut Vec<OwnerReference>, owner: OwnerReference) {
    let existing = refs.iter_mut().find(|r| {
        api_group(&r.api_version) == api_group(&owner.api_version)
            && r.kind == owner.kind
            && r.name == owner.name
    });
    match existing {
        Some(existing) => *existing = owner,
        None => refs.push(owner),
    }
}

/// MachineDeployments point back at their NodePool through an annotation
fn nodepool_for_deployment(deployment: MachineDeployment) -> Option<ObjectRef<NodePool>> {
    let (namespace, name) = deployment
        .annotations()
        .get(NODEPOOL_ANNOTATION)?
        .split_once('/')?;
    Some(ObjectRef::new(name).within(namespace))
}

/// Only spec changes (and deletions) of a NodePool trigger a reconcile; its own status writes do not
fn generation_predicate<K: Resource>(obj: &K) -> Option<u64> {
    obj.meta().generation.map(|g| g as u64)
}

// a deleted object keeps its last generation, so bump it to get past the generation predicate
fn ensure_deletion_change<K: Resource, E>(
    mut event: Result<watcher::Event<K>, E>,
) -> Result<watcher::Event<K>, E> {
    if let Ok(watcher::Event::Delete(ref mut object)) = event {
        let meta = object.meta_mut();
        meta.generation = match meta.generation {
            Some(val) => Some(val + 1),
            None => Some(0),
        }
    }
    event
}

// Initialize the controller and shared state (given the crd is installed)
pub async fn run(client: Client, metrics: Metrics, state: State) {
    let pools: Api<NodePool> = match &state.watch_namespace {
        Some(namespace) => Api::namespaced(client.clone(), namespace),
        None => Api::all(client.clone()),
    };
    let deployments = Api::<MachineDeployment>::all(client.clone());

    if let Err(e) = pools.list(&ListParams::default().limit(1)).await {
        error!("NodePool is not queryable; {e:?}. Is the CRD installed?");
        std::process::exit(1);
    }

    let ctx = Arc::new(Context {
        store: KubeStore::new(client.clone()),
        images: Arc::new(state.images.clone()),
        releases: Arc::new(TagReleaseProvider),
        recorder: Arc::new(KubeEventRecorder::new(client)),
        diagnostics: state.diagnostics.clone(),
        metrics,
        retries: RetryTracker::default(),
    });

    // MachineDeployment status drives convergence, so that watch stays unfiltered
    let (pool_store, pool_writer) = reflector::store();
    let pool_reflector = reflector::reflector(pool_writer, watcher::watcher(pools, Config::default()))
        .map(|event| ensure_deletion_change(event))
        .touched_objects()
        .default_backoff()
        .predicate_filter(generation_predicate);

    Controller::for_stream(pool_reflector, pool_store)
        .with_config(ControllerConfig::default().concurrency(state.concurrency))
        .watches(deployments, Config::default(), nodepool_for_deployment)
        .shutdown_on_signal()
        .run(reconcile::<KubeStore>, error_policy::<KubeStore>, ctx)
        .filter_map(|x| async move { Result::ok(x) })
        .for_each(|_| futures::future::ready(()))
        .await;
}
