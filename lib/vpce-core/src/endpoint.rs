//! Interface VPC endpoint management and deletion convergence

use crate::aws::{tags, EndpointDescription, EndpointRequest, NetworkApi};
use crate::security_group::create_fault;
use crate::{ResourceIdentity, Result, StepError};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Lifecycle of a VPC endpoint as seen by the controller
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EndpointState {
    Unprovisioned,
    Creating,
    Created,
    Deleting,
    Deleted,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EndpointRecord {
    pub endpoint_id: String,
    pub dns_name: String,
    pub state: EndpointState,
}

/// Result of a single deletion check
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Convergence {
    /// EC2 no longer knows the endpoint, or reports it deleted
    Converged,
    /// Still going away; `state` is what EC2 reported
    Pending { state: Option<String> },
}

/// What the caller should do after a deletion check
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PollDecision {
    Converged,
    /// Check again after `after`; `faults` is the updated consecutive fault count
    Requeue { after: Duration, faults: u32 },
    GiveUp(StepError),
}

/// Bounds on waiting for an endpoint deletion
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeletionPolicy {
    /// Delay between checks
    pub interval: Duration,
    /// Total time allowed since the delete request
    pub timeout: Duration,
    /// Consecutive failed checks tolerated before giving up
    pub max_faults: u32,
}

impl Default for DeletionPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(900),
            max_faults: 10,
        }
    }
}

impl DeletionPolicy {
    /// Decide the next move from one check, the time since deletion was
    /// requested, and the consecutive faults seen before this check
    pub fn decide(&self, check: Result<Convergence>, elapsed: Duration, faults: u32) -> PollDecision {
        match check {
            Ok(Convergence::Converged) => PollDecision::Converged,
            Ok(Convergence::Pending { state }) => {
                if elapsed >= self.timeout {
                    PollDecision::GiveUp(StepError::permanent(format!(
                        "Endpoint deletion did not converge within {:?} (last state: {})",
                        self.timeout,
                        state.as_deref().unwrap_or("unknown")
                    )))
                } else {
                    PollDecision::Requeue {
                        after: self.interval,
                        faults: 0,
                    }
                }
            }
            Err(err) => {
                let faults = faults + 1;
                if !err.is_transient() || faults >= self.max_faults || elapsed >= self.timeout {
                    PollDecision::GiveUp(err.into_permanent())
                } else {
                    PollDecision::Requeue {
                        after: self.interval,
                        faults,
                    }
                }
            }
        }
    }
}

/// Creates, tags, deletes and watches the interface endpoint of a VPCEndpoint
pub struct EndpointManager {
    network: Arc<dyn NetworkApi>,
}

impl EndpointManager {
    pub fn new(network: Arc<dyn NetworkApi>) -> Self {
        Self { network }
    }

    /// Create an interface endpoint (private DNS disabled) and tag it
    ///
    /// The endpoint is never rolled back. If tagging fails, or EC2 has not
    /// published a DNS entry yet, the transient fault carries the endpoint id
    /// so the caller continues with [`resume`](Self::resume).
    pub async fn create(&self, identity: &ResourceIdentity, request: &EndpointRequest) -> Result<EndpointRecord> {
        info!(
            endpoint = %identity,
            vpc_id = %request.vpc_id,
            service = %request.service_name,
            "Creating VPC endpoint"
        );

        let created = self
            .network
            .create_vpc_endpoint(request)
            .await
            .map_err(|e| create_fault("Error creating vpc endpoint", e))?;

        let endpoint_id = created.endpoint_id.clone();
        let dns_name = created.dns_names.first().cloned();
        info!(vpce_id = %endpoint_id, dns = ?dns_name, "VPC endpoint created");

        self.tag(&endpoint_id, dns_name.clone(), identity).await?;
        Self::record(created)
    }

    /// Finish a create that stopped after the endpoint existed
    pub async fn resume(&self, endpoint_id: &str, identity: &ResourceIdentity) -> Result<EndpointRecord> {
        info!(vpce_id = %endpoint_id, "Resuming VPC endpoint setup");
        self.tag(endpoint_id, None, identity).await?;

        let description = self.network.describe_vpc_endpoint(endpoint_id).await.map_err(|e| {
            if e.is_not_found() {
                StepError::permanent(format!("VPC endpoint {endpoint_id} disappeared during setup: {e}"))
            } else {
                StepError::transient(format!("Failed to describe vpc endpoint {endpoint_id}: {e}"))
                    .with_endpoint(endpoint_id, None)
            }
        })?;
        Self::record(description)
    }

    async fn tag(&self, endpoint_id: &str, dns_name: Option<String>, identity: &ResourceIdentity) -> Result<()> {
        debug!(vpce_id = %endpoint_id, "Tagging VPC endpoint");
        self.network
            .create_tags(endpoint_id, &tags::resource_tags(identity))
            .await
            .map_err(|e| {
                StepError::transient(format!("Failed to tag resource {endpoint_id}: {e}"))
                    .with_endpoint(endpoint_id, dns_name)
            })
    }

    fn record(description: EndpointDescription) -> Result<EndpointRecord> {
        let EndpointDescription {
            endpoint_id,
            dns_names,
            ..
        } = description;

        match dns_names.into_iter().next() {
            Some(dns_name) => Ok(EndpointRecord {
                endpoint_id,
                dns_name,
                state: EndpointState::Created,
            }),
            None => Err(StepError::transient(format!(
                "VPC endpoint {endpoint_id} has no DNS entries yet"
            ))
            .with_endpoint(endpoint_id, None)),
        }
    }

    /// Request deletion; completion is observed with [`check_deletion`](Self::check_deletion)
    pub async fn delete(&self, endpoint_id: &str) -> Result<EndpointState> {
        info!(vpce_id = %endpoint_id, "Deleting VPC endpoint");
        match self.network.delete_vpc_endpoint(endpoint_id).await {
            Ok(()) => Ok(EndpointState::Deleting),
            Err(e) if e.is_not_found() => {
                debug!(vpce_id = %endpoint_id, "VPC endpoint already deleted");
                Ok(EndpointState::Deleting)
            }
            Err(e) if e.is_rejected_before_effect() => Err(StepError::transient(format!(
                "Error deleting vpc endpoint {endpoint_id}: {e}"
            ))
            .with_endpoint(endpoint_id, None)),
            Err(e) => Err(StepError::permanent(format!(
                "Error deleting vpc endpoint {endpoint_id}: {e}"
            ))
            .with_endpoint(endpoint_id, None)),
        }
    }

    /// One non-blocking look at whether the endpoint is gone
    pub async fn check_deletion(&self, endpoint_id: &str) -> Result<Convergence> {
        match self.network.describe_vpc_endpoint(endpoint_id).await {
            Ok(description) => {
                let deleted = description
                    .state
                    .as_deref()
                    .is_some_and(|s| s.eq_ignore_ascii_case("deleted"));
                debug!(vpce_id = %endpoint_id, state = ?description.state, "Endpoint deletion check");
                if deleted {
                    Ok(Convergence::Converged)
                } else {
                    Ok(Convergence::Pending {
                        state: description.state,
                    })
                }
            }
            Err(e) if e.is_not_found() => {
                info!(vpce_id = %endpoint_id, "Endpoint is deleted");
                Ok(Convergence::Converged)
            }
            Err(e) => Err(StepError::transient(format!(
                "Failed to describe vpc endpoint {endpoint_id}: {e}"
            ))
            .with_endpoint(endpoint_id, None)),
        }
    }

    /// Poll [`check_deletion`](Self::check_deletion) until the endpoint is gone
    ///
    /// Bounded by `policy` and by `cancel`; both are owned by the caller.
    pub async fn wait_for_deletion(
        &self,
        endpoint_id: &str,
        policy: &DeletionPolicy,
        cancel: Option<&CancellationToken>,
    ) -> Result<EndpointState> {
        info!(vpce_id = %endpoint_id, "Waiting for deletion of endpoint");
        let start = Instant::now();
        let mut faults = 0;

        loop {
            if cancel.is_some_and(|token| token.is_cancelled()) {
                return Err(StepError::transient(format!(
                    "Wait for deletion of {endpoint_id} cancelled"
                ))
                .with_endpoint(endpoint_id, None));
            }

            let check = self.check_deletion(endpoint_id).await;
            let delay = match policy.decide(check, start.elapsed(), faults) {
                PollDecision::Converged => return Ok(EndpointState::Deleted),
                PollDecision::GiveUp(err) => return Err(err),
                PollDecision::Requeue { after, faults: seen } => {
                    if seen > 0 {
                        warn!(vpce_id = %endpoint_id, faults = seen, "Endpoint deletion check failed, retrying");
                    }
                    faults = seen;
                    after
                }
            };

            match cancel {
                Some(token) => {
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = token.cancelled() => {}
                    }
                }
                None => tokio::time::sleep(delay).await,
            }
        }
    }
}
