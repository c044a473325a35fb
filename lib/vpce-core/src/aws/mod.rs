//! AWS network API seam
//!
//! Managers talk to EC2 through [`NetworkApi`] so the provisioning sequence
//! can be exercised without AWS. [`Ec2Network`] is the production
//! implementation backed by `aws-sdk-ec2`.

mod ec2;
pub mod error;
pub mod tags;

pub use ec2::Ec2Network;
pub use error::AwsError;
pub use tags::ResourceTag;

use async_trait::async_trait;

/// Parameters of a security group create call
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SecurityGroupRequest {
    pub group_name: String,
    pub description: String,
    pub vpc_id: String,
}

/// A single permission entry on a security group
///
/// The port range is always `[from_port, from_port]`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IpRule {
    pub from_port: i32,
    pub protocol: String,
    pub cidrs: Vec<String>,
}

impl IpRule {
    pub fn single_port(from_port: i32, protocol: impl Into<String>, cidrs: &[String]) -> Self {
        Self {
            from_port,
            protocol: protocol.into(),
            cidrs: cidrs.to_vec(),
        }
    }

    /// (from, to) as sent to EC2
    pub fn port_range(&self) -> (i32, i32) {
        (self.from_port, self.from_port)
    }
}

/// Parameters of an interface endpoint create call
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EndpointRequest {
    pub vpc_id: String,
    pub service_name: String,
    pub subnet_ids: Vec<String>,
    pub security_group_ids: Vec<String>,
    /// Idempotency token; a repeated create with the same token returns the first endpoint
    pub client_token: Option<String>,
}

/// What EC2 reports for an endpoint
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EndpointDescription {
    pub endpoint_id: String,
    pub state: Option<String>,
    /// DNS names in the order EC2 lists the entries
    pub dns_names: Vec<String>,
}

#[async_trait]
pub trait NetworkApi: Send + Sync {
    /// Returns the new group id
    async fn create_security_group(&self, request: &SecurityGroupRequest) -> Result<String, AwsError>;

    /// Id of the group called `group_name` in `vpc_id`, if there is one
    async fn find_security_group(&self, group_name: &str, vpc_id: &str) -> Result<Option<String>, AwsError>;

    async fn create_tags(&self, resource_id: &str, tags: &[ResourceTag]) -> Result<(), AwsError>;

    async fn authorize_ingress(&self, group_id: &str, rule: &IpRule) -> Result<(), AwsError>;

    async fn authorize_egress(&self, group_id: &str, rule: &IpRule) -> Result<(), AwsError>;

    async fn delete_security_group(&self, group_id: &str) -> Result<(), AwsError>;

    async fn create_vpc_endpoint(&self, request: &EndpointRequest) -> Result<EndpointDescription, AwsError>;

    async fn delete_vpc_endpoint(&self, endpoint_id: &str) -> Result<(), AwsError>;

    /// Fails with [`AwsError::NotFound`] once EC2 no longer knows the endpoint
    async fn describe_vpc_endpoint(&self, endpoint_id: &str) -> Result<EndpointDescription, AwsError>;
}
