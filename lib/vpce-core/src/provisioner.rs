//! Composed provisioning state machine
//!
//! ```text
//! Unprovisioned -> SecurityGroupCreated -> SecurityGroupReady -> RulesReady
//!     -> EndpointCreated -> EndpointReady -> Exposed
//! Exposed -> ServiceRemoved -> EndpointDeleting -> EndpointDeleted -> Unprovisioned
//! ```
//!
//! Each call to [`Provisioner::advance_create`] or
//! [`Provisioner::advance_delete`] performs at most one arrow, starting from
//! the persisted status. The caller persists the returned status before
//! calling again, so a crash between steps resumes where it stopped.

use crate::aws::{EndpointRequest, NetworkApi};
use crate::cluster::ServiceApi;
use crate::endpoint::{DeletionPolicy, EndpointManager, EndpointRecord, PollDecision};
use crate::service::{ServiceExposer, ServiceTemplate};
use crate::{PartialState, ResourceIdentity, Result, SecurityGroupManager, StepError};
use chrono::{DateTime, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use vpce_api::v1alpha1::{STATUS_CREATED, STATUS_DELETED};
use vpce_api::{Phase, VPCEndpointSpec, VPCEndpointStatus};

/// Everything a step needs to know about the VPCEndpoint being reconciled
pub struct ProvisionRequest<'a> {
    pub identity: ResourceIdentity,
    /// UID of the VPCEndpoint; used as the endpoint create idempotency token
    pub uid: Option<String>,
    pub spec: &'a VPCEndpointSpec,
    /// Set on the exposed Service so it is garbage collected with its owner
    pub owner: Option<OwnerReference>,
}

/// Outcome of one step
#[derive(Clone, Debug, PartialEq)]
pub enum Advance {
    /// One arrow taken; persist and call again
    Next(VPCEndpointStatus),
    /// Not converged yet; persist and call again after the delay
    Wait(VPCEndpointStatus, Duration),
    /// Nothing left to do in this direction
    Done(VPCEndpointStatus),
}

impl Advance {
    pub fn status(&self) -> &VPCEndpointStatus {
        match self {
            Advance::Next(status) | Advance::Wait(status, _) | Advance::Done(status) => status,
        }
    }
}

pub struct Provisioner {
    security_groups: SecurityGroupManager,
    endpoints: EndpointManager,
    services: ServiceExposer,
    deletion: DeletionPolicy,
}

impl Provisioner {
    pub fn new(
        network: Arc<dyn NetworkApi>,
        cluster: Arc<dyn ServiceApi>,
        template: ServiceTemplate,
        deletion: DeletionPolicy,
    ) -> Self {
        Self {
            security_groups: SecurityGroupManager::new(network.clone()),
            endpoints: EndpointManager::new(network),
            services: ServiceExposer::new(cluster, template),
            deletion,
        }
    }

    /// Take the next step towards `Exposed`
    pub async fn advance_create(
        &self,
        request: &ProvisionRequest<'_>,
        status: &VPCEndpointStatus,
    ) -> Result<Advance> {
        let identity = &request.identity;
        let mut next = status.clone();
        debug!(resource = %identity, phase = ?status.phase, "Advancing create");

        match status.phase {
            Phase::Unprovisioned => {
                let group_id = self
                    .security_groups
                    .create(identity, &request.spec.vpc_id)
                    .await?;
                next.security_group_id = Some(group_id);
                next.phase = Phase::SecurityGroupReady;
            }
            Phase::SecurityGroupCreated => {
                let group_id = required(&status.security_group_id, "security group id")?;
                self.security_groups.tag(group_id, identity).await?;
                next.phase = Phase::SecurityGroupReady;
            }
            Phase::SecurityGroupReady => {
                let group_id = required(&status.security_group_id, "security group id")?;
                for rule in &request.spec.rules {
                    self.security_groups.authorize(group_id, rule).await?;
                }
                next.rules_authorized = true;
                next.phase = Phase::RulesReady;
            }
            Phase::RulesReady => {
                let group_id = required(&status.security_group_id, "security group id")?;
                let endpoint_request = endpoint_request(request.spec, group_id, request.uid.as_deref());
                let record = self.endpoints.create(identity, &endpoint_request).await?;
                record_endpoint(&mut next, record);
            }
            Phase::EndpointCreated => {
                let endpoint_id = required(&status.vpce_aws_resource_id, "endpoint id")?;
                let record = self.endpoints.resume(endpoint_id, identity).await?;
                record_endpoint(&mut next, record);
            }
            Phase::EndpointReady => {
                let dns_name = required(&status.vpce_aws_vpce_dns, "endpoint DNS name")?;
                let mut service = self
                    .services
                    .render(&identity.name, &identity.namespace, dns_name)?;
                if let Some(owner) = &request.owner {
                    service.metadata.owner_references = Some(vec![owner.clone()]);
                }
                next.svc_endpoint_status = Some(self.services.create(&service).await?.to_string());
                next.phase = Phase::Exposed;
                info!(resource = %identity, dns = %dns_name, "VPC endpoint exposed");
            }
            Phase::Exposed => return Ok(Advance::Done(next)),
            Phase::ServiceRemoved | Phase::EndpointDeleting | Phase::EndpointDeleted => {
                return Err(StepError::permanent(format!(
                    "{identity} is being torn down (phase {:?})",
                    status.phase
                )));
            }
        }

        next.stalled = false;
        next.message = None;
        if next.phase == Phase::Exposed {
            Ok(Advance::Done(next))
        } else {
            Ok(Advance::Next(next))
        }
    }

    /// Take the next step towards `Unprovisioned`
    pub async fn advance_delete(
        &self,
        request: &ProvisionRequest<'_>,
        status: &VPCEndpointStatus,
    ) -> Result<Advance> {
        let identity = &request.identity;
        let mut next = status.clone();
        next.stalled = false;
        next.message = None;
        debug!(resource = %identity, phase = ?status.phase, "Advancing delete");

        match status.phase {
            Phase::Exposed => {
                let removed = self
                    .services
                    .delete(&identity.name, &identity.namespace)
                    .await?;
                next.svc_endpoint_status = Some(removed.to_string());
                next.phase = Phase::ServiceRemoved;
            }
            Phase::ServiceRemoved | Phase::EndpointReady | Phase::EndpointCreated => {
                match &status.vpce_aws_resource_id {
                    Some(endpoint_id) => {
                        self.endpoints.delete(endpoint_id).await?;
                        next.deletion_requested_at = Some(Utc::now().to_rfc3339());
                        next.deletion_poll_faults = 0;
                        next.phase = Phase::EndpointDeleting;
                    }
                    None => next.phase = Phase::EndpointDeleted,
                }
            }
            Phase::EndpointDeleting => {
                let endpoint_id = required(&status.vpce_aws_resource_id, "endpoint id")?;
                let elapsed = match elapsed_since(status.deletion_requested_at.as_deref()) {
                    Some(elapsed) => elapsed,
                    None => {
                        // No readable deadline; start one now
                        warn!(vpce_id = %endpoint_id, "Deletion request time missing, restarting deadline");
                        next.deletion_requested_at = Some(Utc::now().to_rfc3339());
                        Duration::ZERO
                    }
                };
                let check = self.endpoints.check_deletion(endpoint_id).await;

                match self.deletion.decide(check, elapsed, status.deletion_poll_faults) {
                    PollDecision::Converged => {
                        info!(vpce_id = %endpoint_id, "VPC endpoint deletion observed");
                        next.vpce_aws_endpoint_status = Some(STATUS_DELETED.to_string());
                        next.deletion_poll_faults = 0;
                        next.phase = Phase::EndpointDeleted;
                    }
                    PollDecision::Requeue { after, faults } => {
                        next.deletion_poll_faults = faults;
                        return Ok(Advance::Wait(next, after));
                    }
                    PollDecision::GiveUp(err) => return Err(err),
                }
            }
            Phase::EndpointDeleted
            | Phase::RulesReady
            | Phase::SecurityGroupReady
            | Phase::SecurityGroupCreated => {
                if let Some(group_id) = &status.security_group_id {
                    self.security_groups.delete(group_id).await?;
                }
                next.security_group_id = None;
                next.rules_authorized = false;
                next.phase = Phase::Unprovisioned;
                info!(resource = %identity, "VPC endpoint resources released");
                return Ok(Advance::Done(next));
            }
            Phase::Unprovisioned => return Ok(Advance::Done(next)),
        }

        Ok(Advance::Next(next))
    }
}

/// Fold the identifiers carried by a failed step into the status
///
/// Moves the phase onto the resume arrow when a resource was created but
/// its step did not finish.
pub fn absorb_partial(status: &mut VPCEndpointStatus, partial: &PartialState) {
    if let Some(group_id) = &partial.group_id {
        if status.security_group_id.is_none() {
            status.security_group_id = Some(group_id.clone());
            if status.phase == Phase::Unprovisioned {
                status.phase = Phase::SecurityGroupCreated;
            }
        }
    }
    if let Some(endpoint_id) = &partial.endpoint_id {
        if status.vpce_aws_resource_id.is_none() {
            status.vpce_aws_resource_id = Some(endpoint_id.clone());
            if status.phase == Phase::RulesReady {
                status.phase = Phase::EndpointCreated;
            }
        }
    }
    if let Some(dns_name) = &partial.dns_name {
        if status.vpce_aws_vpce_dns.is_none() {
            status.vpce_aws_vpce_dns = Some(dns_name.clone());
        }
    }
}

fn required<'a>(value: &'a Option<String>, what: &str) -> Result<&'a String> {
    value
        .as_ref()
        .ok_or_else(|| StepError::permanent(format!("Status is missing the {what}")))
}

fn endpoint_request(spec: &VPCEndpointSpec, group_id: &str, uid: Option<&str>) -> EndpointRequest {
    let mut security_group_ids = vec![group_id.to_string()];
    security_group_ids.extend(
        spec.security_group_ids
            .iter()
            .filter(|id| id.as_str() != group_id)
            .cloned(),
    );

    EndpointRequest {
        vpc_id: spec.vpc_id.clone(),
        service_name: spec.vpc_endpoint_service_id.clone(),
        subnet_ids: spec.subnet_ids.clone(),
        security_group_ids,
        client_token: uid.map(str::to_string),
    }
}

fn record_endpoint(status: &mut VPCEndpointStatus, record: EndpointRecord) {
    status.vpce_aws_resource_id = Some(record.endpoint_id);
    status.vpce_aws_vpce_dns = Some(record.dns_name);
    status.vpce_aws_endpoint_status = Some(STATUS_CREATED.to_string());
    status.phase = Phase::EndpointReady;
}

/// Time since `requested_at`; `None` when it is absent or unreadable
///
/// A timestamp in the future (clock skew) counts as zero elapsed.
fn elapsed_since(requested_at: Option<&str>) -> Option<Duration> {
    let requested_at = DateTime::parse_from_rfc3339(requested_at?).ok()?;
    Some(
        (Utc::now() - requested_at.with_timezone(&Utc))
            .to_std()
            .unwrap_or(Duration::ZERO),
    )
}
