//! Generated security group management

use crate::aws::{tags, AwsError, IpRule, NetworkApi, SecurityGroupRequest};
use crate::{ResourceIdentity, Result, StepError};
use std::sync::Arc;
use tracing::{debug, info};
use vpce_api::{RuleDirection, RuleSpec};

const GROUP_DESCRIPTION: &str = "Generic security group for private network connectivity";

/// Creates, tags, opens and deletes the security group generated for a VPCEndpoint
pub struct SecurityGroupManager {
    network: Arc<dyn NetworkApi>,
}

impl SecurityGroupManager {
    pub fn new(network: Arc<dyn NetworkApi>) -> Self {
        Self { network }
    }

    /// Create the group in `vpc_id` and tag it
    ///
    /// A tagging failure is transient and carries the new group id, so the
    /// caller retries with [`tag`](Self::tag) instead of creating a second group.
    /// A group of the same name already in the VPC was created by an earlier
    /// attempt whose result was lost; it is adopted and tagged.
    pub async fn create(&self, identity: &ResourceIdentity, vpc_id: &str) -> Result<String> {
        let request = SecurityGroupRequest {
            group_name: identity.group_name(),
            description: GROUP_DESCRIPTION.to_string(),
            vpc_id: vpc_id.to_string(),
        };
        info!(name = %request.group_name, vpc_id = %vpc_id, "Creating security group");

        let group_id = match self.network.create_security_group(&request).await {
            Ok(group_id) => {
                info!(sg_id = %group_id, "Created security group");
                group_id
            }
            Err(e) if e.is_already_exists() => self.adopt(&request).await?,
            Err(e) => return Err(create_fault("Error creating generic security group", e)),
        };

        self.tag(&group_id, identity).await?;
        Ok(group_id)
    }

    async fn adopt(&self, request: &SecurityGroupRequest) -> Result<String> {
        let name = &request.group_name;
        let found = self
            .network
            .find_security_group(name, &request.vpc_id)
            .await
            .map_err(|e| StepError::transient(format!("Failed to look up security group {name}: {e}")))?;

        match found {
            Some(group_id) => {
                info!(sg_id = %group_id, name = %name, "Adopting existing security group");
                Ok(group_id)
            }
            None => Err(StepError::transient(format!(
                "Security group {name} reported as duplicate but not found in {}",
                request.vpc_id
            ))),
        }
    }

    /// Apply the ownership tags to an existing group
    pub async fn tag(&self, group_id: &str, identity: &ResourceIdentity) -> Result<()> {
        debug!(sg_id = %group_id, "Tagging security group");
        self.network
            .create_tags(group_id, &tags::resource_tags(identity))
            .await
            .map_err(|e| {
                StepError::transient(format!("Failed to tag resource {group_id}: {e}")).with_group_id(group_id)
            })
    }

    /// Allow inbound traffic on exactly `from_port`
    pub async fn authorize_ingress(
        &self,
        group_id: &str,
        from_port: i32,
        ip_ranges: &[String],
        ip_protocol: &str,
    ) -> Result<()> {
        let rule = IpRule::single_port(from_port, ip_protocol, ip_ranges);
        info!(sg_id = %group_id, port = from_port, protocol = %ip_protocol, "Authorizing ingress");
        let result = self.network.authorize_ingress(group_id, &rule).await;
        rule_outcome(group_id, "ingress", result)
    }

    /// Allow outbound traffic on exactly `from_port`
    pub async fn authorize_egress(
        &self,
        group_id: &str,
        from_port: i32,
        ip_ranges: &[String],
        ip_protocol: &str,
    ) -> Result<()> {
        let rule = IpRule::single_port(from_port, ip_protocol, ip_ranges);
        info!(sg_id = %group_id, port = from_port, protocol = %ip_protocol, "Authorizing egress");
        let result = self.network.authorize_egress(group_id, &rule).await;
        rule_outcome(group_id, "egress", result)
    }

    pub async fn authorize(&self, group_id: &str, rule: &RuleSpec) -> Result<()> {
        match rule.direction {
            RuleDirection::Ingress => {
                self.authorize_ingress(group_id, rule.from_port, &rule.cidrs, &rule.protocol)
                    .await
            }
            RuleDirection::Egress => {
                self.authorize_egress(group_id, rule.from_port, &rule.cidrs, &rule.protocol)
                    .await
            }
        }
    }

    /// Delete the group; a group that no longer exists counts as deleted
    pub async fn delete(&self, group_id: &str) -> Result<()> {
        info!(sg_id = %group_id, "Deleting generated security group");
        match self.network.delete_security_group(group_id).await {
            Ok(()) => {
                info!(sg_id = %group_id, "Security group deleted");
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                debug!(sg_id = %group_id, "Security group already deleted");
                Ok(())
            }
            // Endpoint ENIs can hold the group for a while after the endpoint is gone
            Err(e) if e.is_retryable() => Err(StepError::transient(format!(
                "Security group {group_id} not deletable yet: {e}"
            ))
            .with_group_id(group_id)),
            Err(e) => Err(StepError::permanent(format!(
                "Error deleting security group {group_id}: {e}"
            ))
            .with_group_id(group_id)),
        }
    }
}

/// Faults of create calls are permanent unless AWS refused before acting
pub(crate) fn create_fault(context: &str, err: AwsError) -> StepError {
    if err.is_rejected_before_effect() {
        StepError::transient(format!("{context}: {err}"))
    } else {
        StepError::permanent(format!("{context}: {err}"))
    }
}

fn rule_outcome(group_id: &str, direction: &str, result: std::result::Result<(), AwsError>) -> Result<()> {
    match result {
        Ok(()) => Ok(()),
        Err(e) if e.is_already_exists() => {
            debug!(sg_id = %group_id, direction, "Rule already authorized");
            Ok(())
        }
        Err(e) if e.is_retryable() => Err(StepError::transient(format!(
            "Failed to authorize {direction} on {group_id}: {e}"
        ))
        .with_group_id(group_id)),
        Err(e) => Err(StepError::permanent(format!(
            "Failed to authorize {direction} on {group_id}: {e}"
        ))
        .with_group_id(group_id)),
    }
}
