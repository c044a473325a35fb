//! VPCEndpoint controller for reconciling VPCEndpoint resources

use crate::config::ControllerConfig;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Service;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client, Resource, ResourceExt};
use kube_runtime::{controller::Action, reflector, watcher, Controller, WatchStreamExt};
use serde_json::json;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use vpce_api::v1alpha1::{API_GROUP, API_VERSION};
use vpce_api::{VPCEndpoint, VPCEndpointStatus};
use vpce_core::{
    absorb_partial, Advance, Ec2Network, KubeServices, ProvisionRequest, Provisioner,
    ResourceIdentity, ServiceTemplate, StepError,
};

pub static FINALIZER: &str = "vpce.io/cleanup";

const FIELD_MANAGER: &str = "vpce-controller";

/// Re-check interval for a fully exposed endpoint
const RESYNC_INTERVAL: Duration = Duration::from_secs(300);

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("VPCEndpoint is missing {0}")]
    MissingObjectKey(&'static str),

    #[error(transparent)]
    Step(#[from] StepError),

    #[error("Kubernetes error: {0}")]
    Kubernetes(#[from] kube::Error),
}

/// Shared state handed to every reconcile
pub struct Context {
    client: Client,
    config: ControllerConfig,
    template: ServiceTemplate,
    // One EC2 client per region, built on first use
    provisioners: Mutex<HashMap<String, Arc<Provisioner>>>,
}

impl Context {
    async fn provisioner(&self, region: &str) -> Arc<Provisioner> {
        let mut provisioners = self.provisioners.lock().await;
        if let Some(provisioner) = provisioners.get(region) {
            return provisioner.clone();
        }

        info!(region, "Loading AWS configuration");
        let network = Arc::new(Ec2Network::new(region).await);
        let provisioner = Arc::new(Provisioner::new(
            network,
            Arc::new(KubeServices::new(self.client.clone())),
            self.template.clone(),
            self.config.deletion.clone(),
        ));
        provisioners.insert(region.to_string(), provisioner.clone());
        provisioner
    }
}

pub struct VPCEndpointController {
    client: Client,
    context: Arc<Context>,
}

impl VPCEndpointController {
    pub fn new(client: Client, config: ControllerConfig) -> anyhow::Result<Self> {
        let template = match &config.service_template {
            Some(path) => ServiceTemplate::from_file(path)?,
            None => ServiceTemplate::builtin(),
        };

        let context = Arc::new(Context {
            client: client.clone(),
            config,
            template,
            provisioners: Mutex::new(HashMap::new()),
        });
        Ok(Self { client, context })
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        info!("Starting VPCEndpoint reconciliation");

        let endpoints: Api<VPCEndpoint> = Api::all(self.client.clone());
        let services: Api<Service> = Api::all(self.client.clone());

        // Status writes do not retrigger; requeues pace the state machine
        let (reader, writer) = reflector::store();
        let endpoint_events = watcher(endpoints, watcher::Config::default())
            .default_backoff()
            .reflect(writer)
            .applied_objects()
            .predicate_filter(reconcile_trigger);

        // Watch VPCEndpoints and the Services they own
        let controller = Controller::for_stream(endpoint_events, reader)
            .owns(services, watcher::Config::default());

        let mut stream = controller
            .run(reconcile, error_policy, self.context.clone())
            .boxed();

        // Process the reconciliation stream
        while let Some(item) = stream.next().await {
            match item {
                Ok((obj, _)) => debug!(name = %obj.name, "Reconciled VPCEndpoint successfully"),
                Err(e) => error!("Error in reconciliation stream: {}", e),
            }
        }

        Ok(())
    }
}

/// Fingerprint of the fields whose change warrants a reconcile
///
/// Covers spec changes (generation), deletion, finalizers and an operator
/// clearing `stalled`. Everything else the controller writes itself.
fn reconcile_trigger(endpoint: &VPCEndpoint) -> Option<u64> {
    let mut hasher = DefaultHasher::new();
    endpoint.metadata.generation.hash(&mut hasher);
    endpoint.metadata.deletion_timestamp.is_some().hash(&mut hasher);
    endpoint.finalizers().hash(&mut hasher);
    endpoint
        .status
        .as_ref()
        .is_some_and(|status| status.stalled)
        .hash(&mut hasher);
    Some(hasher.finish())
}

async fn reconcile(endpoint: Arc<VPCEndpoint>, ctx: Arc<Context>) -> Result<Action, ReconcileError> {
    let name = endpoint
        .metadata
        .name
        .clone()
        .ok_or(ReconcileError::MissingObjectKey(".metadata.name"))?;
    let namespace = endpoint
        .metadata
        .namespace
        .clone()
        .ok_or(ReconcileError::MissingObjectKey(".metadata.namespace"))?;
    info!("Reconciling VPCEndpoint: {}/{}", namespace, name);

    let api: Api<VPCEndpoint> = Api::namespaced(ctx.client.clone(), &namespace);
    let deleting = endpoint.metadata.deletion_timestamp.is_some();
    let has_finalizer = endpoint.finalizers().iter().any(|f| f == FINALIZER);

    if deleting && !has_finalizer {
        return Ok(Action::await_change());
    }
    if !deleting && !has_finalizer {
        let mut finalizers = endpoint.finalizers().to_vec();
        finalizers.push(FINALIZER.to_string());
        patch_finalizers(&api, &name, finalizers).await?;
    }

    let status = endpoint.status.clone().unwrap_or_default();
    if !deleting && status.stalled {
        warn!(
            "VPCEndpoint {}/{} is stalled: {}",
            namespace,
            name,
            status.message.as_deref().unwrap_or("unknown fault")
        );
        return Ok(Action::await_change());
    }

    let region = endpoint
        .spec
        .region
        .clone()
        .unwrap_or_else(|| ctx.config.default_region.clone());
    let provisioner = ctx.provisioner(&region).await;
    let request = ProvisionRequest {
        identity: ResourceIdentity::new(&name, &namespace),
        uid: endpoint.metadata.uid.clone(),
        spec: &endpoint.spec,
        owner: endpoint.controller_owner_ref(&()),
    };

    match drive(&provisioner, &request, &api, status, deleting).await? {
        Some(delay) => Ok(Action::requeue(delay)),
        None if deleting => {
            let finalizers = endpoint
                .finalizers()
                .iter()
                .filter(|f| f.as_str() != FINALIZER)
                .cloned()
                .collect();
            patch_finalizers(&api, &name, finalizers).await?;
            info!("VPCEndpoint {}/{} released", namespace, name);
            Ok(Action::await_change())
        }
        None => Ok(Action::requeue(RESYNC_INTERVAL)),
    }
}

/// Advance until the chain finishes or has to wait, persisting status after every step
///
/// Returns the requeue delay while waiting, `None` once finished.
async fn drive(
    provisioner: &Provisioner,
    request: &ProvisionRequest<'_>,
    api: &Api<VPCEndpoint>,
    mut status: VPCEndpointStatus,
    deleting: bool,
) -> Result<Option<Duration>, ReconcileError> {
    let name = &request.identity.name;
    loop {
        let step = if deleting {
            provisioner.advance_delete(request, &status).await
        } else {
            provisioner.advance_create(request, &status).await
        };

        match step {
            Ok(Advance::Next(next)) => {
                status = persist_changed(api, name, &status, next).await?;
            }
            Ok(Advance::Wait(next, delay)) => {
                persist_changed(api, name, &status, next).await?;
                return Ok(Some(delay));
            }
            Ok(Advance::Done(next)) => {
                persist_changed(api, name, &status, next).await?;
                return Ok(None);
            }
            Err(err) => {
                let failed = fold_fault(status.clone(), &err);
                persist_changed(api, name, &status, failed).await?;
                return Err(err.into());
            }
        }
    }
}

/// Status after a failed step: ids the step created are kept, a permanent
/// fault stalls the resource
fn fold_fault(mut status: VPCEndpointStatus, err: &StepError) -> VPCEndpointStatus {
    absorb_partial(&mut status, &err.partial);
    status.stalled = !err.is_transient();
    status.message = Some(err.to_string());
    status
}

/// Status to write, or `None` when `next` matches what is stored
fn status_update(current: &VPCEndpointStatus, next: VPCEndpointStatus) -> Option<VPCEndpointStatus> {
    (next != *current).then_some(next)
}

async fn persist_changed(
    api: &Api<VPCEndpoint>,
    name: &str,
    current: &VPCEndpointStatus,
    next: VPCEndpointStatus,
) -> Result<VPCEndpointStatus, ReconcileError> {
    match status_update(current, next) {
        Some(update) => persist(api, name, update).await,
        None => Ok(current.clone()),
    }
}

async fn persist(
    api: &Api<VPCEndpoint>,
    name: &str,
    mut status: VPCEndpointStatus,
) -> Result<VPCEndpointStatus, ReconcileError> {
    status.touch();
    let patch = json!({
        "apiVersion": format!("{API_GROUP}/{API_VERSION}"),
        "kind": "VPCEndpoint",
        "status": status,
    });
    api.patch_status(name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(&patch))
        .await?;
    debug!(name, phase = ?status.phase, "Status persisted");
    Ok(status)
}

async fn patch_finalizers(
    api: &Api<VPCEndpoint>,
    name: &str,
    finalizers: Vec<String>,
) -> Result<(), ReconcileError> {
    let patch = json!({ "metadata": { "finalizers": finalizers } });
    api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    Ok(())
}

fn error_policy(endpoint: Arc<VPCEndpoint>, error: &ReconcileError, ctx: Arc<Context>) -> Action {
    let name = endpoint.name_any();
    requeue_after_error(&name, error, ctx.config.error_requeue)
}

fn requeue_after_error(name: &str, error: &ReconcileError, backoff: Duration) -> Action {
    match error {
        ReconcileError::Step(e) if !e.is_transient() => {
            error!(name, error = %e, "Permanent fault, waiting for operator intervention");
            Action::await_change()
        }
        ReconcileError::MissingObjectKey(_) => {
            error!(name, error = %error, "Error reconciling VPCEndpoint");
            Action::await_change()
        }
        _ => {
            warn!(name, error = %error, delay = ?backoff, "Transient fault, retrying");
            Action::requeue(backoff)
        }
    }
}
