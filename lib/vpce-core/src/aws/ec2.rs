//! `aws-sdk-ec2` implementation of [`NetworkApi`]

use super::error::ENDPOINT_NOT_FOUND_CODE;
use super::{
    AwsError, EndpointDescription, EndpointRequest, IpRule, NetworkApi, ResourceTag,
    SecurityGroupRequest,
};
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_ec2::types::{Filter, IpPermission, IpRange, Tag, VpcEndpoint, VpcEndpointType};
use aws_sdk_ec2::Client;
use tracing::debug;

/// EC2 client bound to one region
pub struct Ec2Network {
    client: Client,
    region: String,
}

impl Ec2Network {
    /// Load AWS configuration (environment, profile, IRSA) for `region`
    pub async fn new(region: &str) -> Self {
        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .load()
            .await;

        Self {
            client: Client::new(&config),
            region: region.to_string(),
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }
}

impl std::fmt::Debug for Ec2Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ec2Network")
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}

fn ip_permission(rule: &IpRule) -> IpPermission {
    let (from_port, to_port) = rule.port_range();
    IpPermission::builder()
        .ip_protocol(&rule.protocol)
        .from_port(from_port)
        .to_port(to_port)
        .set_ip_ranges(Some(
            rule.cidrs
                .iter()
                .map(|cidr| IpRange::builder().cidr_ip(cidr).build())
                .collect(),
        ))
        .build()
}

fn describe(endpoint: &VpcEndpoint) -> Result<EndpointDescription, AwsError> {
    let endpoint_id = endpoint
        .vpc_endpoint_id()
        .ok_or_else(|| AwsError::MalformedResponse("VPC endpoint without an id".to_string()))?;

    Ok(EndpointDescription {
        endpoint_id: endpoint_id.to_string(),
        state: endpoint.state().map(|s| s.as_str().to_string()),
        dns_names: endpoint
            .dns_entries()
            .iter()
            .filter_map(|entry| entry.dns_name())
            .map(str::to_string)
            .collect(),
    })
}

#[async_trait]
impl NetworkApi for Ec2Network {
    async fn create_security_group(&self, request: &SecurityGroupRequest) -> Result<String, AwsError> {
        let response = self
            .client
            .create_security_group()
            .group_name(&request.group_name)
            .description(&request.description)
            .vpc_id(&request.vpc_id)
            .send()
            .await
            .map_err(AwsError::from_sdk)?;

        response
            .group_id()
            .map(str::to_string)
            .ok_or_else(|| AwsError::MalformedResponse("No security group ID in response".to_string()))
    }

    async fn find_security_group(&self, group_name: &str, vpc_id: &str) -> Result<Option<String>, AwsError> {
        let response = self
            .client
            .describe_security_groups()
            .filters(Filter::builder().name("group-name").values(group_name).build())
            .filters(Filter::builder().name("vpc-id").values(vpc_id).build())
            .send()
            .await
            .map_err(AwsError::from_sdk)?;

        Ok(response
            .security_groups()
            .first()
            .and_then(|group| group.group_id())
            .map(str::to_string))
    }

    async fn create_tags(&self, resource_id: &str, tags: &[ResourceTag]) -> Result<(), AwsError> {
        self.client
            .create_tags()
            .resources(resource_id)
            .set_tags(Some(
                tags.iter()
                    .map(|t| Tag::builder().key(&t.key).value(&t.value).build())
                    .collect(),
            ))
            .send()
            .await
            .map_err(AwsError::from_sdk)?;
        Ok(())
    }

    async fn authorize_ingress(&self, group_id: &str, rule: &IpRule) -> Result<(), AwsError> {
        self.client
            .authorize_security_group_ingress()
            .group_id(group_id)
            .ip_permissions(ip_permission(rule))
            .send()
            .await
            .map_err(AwsError::from_sdk)?;
        Ok(())
    }

    async fn authorize_egress(&self, group_id: &str, rule: &IpRule) -> Result<(), AwsError> {
        self.client
            .authorize_security_group_egress()
            .group_id(group_id)
            .ip_permissions(ip_permission(rule))
            .send()
            .await
            .map_err(AwsError::from_sdk)?;
        Ok(())
    }

    async fn delete_security_group(&self, group_id: &str) -> Result<(), AwsError> {
        self.client
            .delete_security_group()
            .group_id(group_id)
            .send()
            .await
            .map_err(AwsError::from_sdk)?;
        Ok(())
    }

    async fn create_vpc_endpoint(&self, request: &EndpointRequest) -> Result<EndpointDescription, AwsError> {
        let response = self
            .client
            .create_vpc_endpoint()
            .vpc_endpoint_type(VpcEndpointType::Interface)
            .vpc_id(&request.vpc_id)
            .service_name(&request.service_name)
            .set_subnet_ids(Some(request.subnet_ids.clone()))
            .set_security_group_ids(Some(request.security_group_ids.clone()))
            .private_dns_enabled(false)
            .set_client_token(request.client_token.clone())
            .send()
            .await
            .map_err(AwsError::from_sdk)?;

        debug!(response = ?response, "VPC endpoint create response");

        let endpoint = response
            .vpc_endpoint()
            .ok_or_else(|| AwsError::MalformedResponse("No VPC endpoint in response".to_string()))?;
        describe(endpoint)
    }

    async fn delete_vpc_endpoint(&self, endpoint_id: &str) -> Result<(), AwsError> {
        let response = self
            .client
            .delete_vpc_endpoints()
            .vpc_endpoint_ids(endpoint_id)
            .send()
            .await
            .map_err(AwsError::from_sdk)?;

        // Per-endpoint failures come back in the body, not as a call error
        if let Some(item) = response.unsuccessful().first() {
            let error = item.error();
            return Err(AwsError::classify(
                error.and_then(|e| e.code()),
                error.and_then(|e| e.message()),
            ));
        }
        Ok(())
    }

    async fn describe_vpc_endpoint(&self, endpoint_id: &str) -> Result<EndpointDescription, AwsError> {
        let response = self
            .client
            .describe_vpc_endpoints()
            .vpc_endpoint_ids(endpoint_id)
            .send()
            .await
            .map_err(AwsError::from_sdk)?;

        match response.vpc_endpoints().first() {
            Some(endpoint) => describe(endpoint),
            None => Err(AwsError::NotFound {
                code: ENDPOINT_NOT_FOUND_CODE.to_string(),
                message: format!("VPC endpoint {endpoint_id} not returned by describe"),
            }),
        }
    }
}
