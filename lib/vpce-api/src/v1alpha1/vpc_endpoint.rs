use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// VPCEndpoint requests a private interface endpoint to an AWS endpoint
/// service, guarded by a generated security group, and exposed inside the
/// cluster as a Service named after the resource
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "vpce.io",
    version = "v1alpha1",
    kind = "VPCEndpoint",
    plural = "vpcendpoints",
    namespaced,
    derive = "Default",
    status = "VPCEndpointStatus",
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Endpoint","type":"string","jsonPath":".status.vpce_aws_resource_id"}"#,
    printcolumn = r#"{"name":"DNS","type":"string","jsonPath":".status.vpce_aws_vpce_dns"}"#,
)]
pub struct VPCEndpointSpec {
    /// VPC the endpoint and its security group live in
    pub vpc_id: String,

    /// Service name of the remote endpoint service (e.g. com.amazonaws.vpce.us-west-2.vpce-svc-...)
    pub vpc_endpoint_service_id: String,

    /// Subnets that receive an endpoint network interface
    #[serde(default)]
    pub subnet_ids: Vec<String>,

    /// Additional security groups attached next to the generated one
    #[serde(default)]
    pub security_group_ids: Vec<String>,

    /// AWS region; the controller default applies when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    /// Rules authorized on the generated security group
    #[serde(default)]
    pub rules: Vec<RuleSpec>,
}

/// A single-port security group rule
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RuleSpec {
    #[serde(default)]
    pub direction: RuleDirection,

    /// Port opened by the rule. The rule always covers exactly this port.
    pub from_port: i32,

    /// IP protocol: tcp, udp, icmp or -1
    #[serde(default = "default_protocol")]
    pub protocol: String,

    /// CIDR blocks the rule applies to
    #[serde(default)]
    pub cidrs: Vec<String>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum RuleDirection {
    #[default]
    Ingress,
    Egress,
}

/// Position of a VPCEndpoint in the provisioning/teardown chain
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum Phase {
    #[default]
    Unprovisioned,
    /// Group exists but its Name tag has not been applied yet
    SecurityGroupCreated,
    SecurityGroupReady,
    RulesReady,
    /// Endpoint exists but tagging or DNS resolution is outstanding
    EndpointCreated,
    EndpointReady,
    Exposed,
    ServiceRemoved,
    EndpointDeleting,
    EndpointDeleted,
}

/// Status of a VPCEndpoint
///
/// Every identifier needed to resume an interrupted create or delete is
/// persisted here; the controller holds no state between reconciles.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct VPCEndpointStatus {
    #[serde(default)]
    pub phase: Phase,

    /// Id of the generated security group
    #[serde(skip_serializing_if = "Option::is_none")]
    pub security_group_id: Option<String>,

    /// Whether every rule in the spec has been authorized on the group
    #[serde(default)]
    pub rules_authorized: bool,

    /// Cloud-assigned VPC endpoint id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vpce_aws_resource_id: Option<String>,

    /// DNS name of the endpoint, taken from its first DNS entry
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vpce_aws_vpce_dns: Option<String>,

    /// "created" or "deleted"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vpce_aws_endpoint_status: Option<String>,

    /// "created" or "deleted"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub svc_endpoint_status: Option<String>,

    /// RFC 3339 time the endpoint deletion was requested
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deletion_requested_at: Option<String>,

    /// Consecutive faults observed while polling for endpoint deletion
    #[serde(default)]
    pub deletion_poll_faults: u32,

    /// Set when a permanent fault stopped progress; needs operator action
    #[serde(default)]
    pub stalled: bool,

    /// Human-readable message for the last fault
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Last update time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_update_time: Option<String>,
}

impl VPCEndpointStatus {
    /// Stamp the status with the current time
    pub fn touch(&mut self) {
        self.last_update_time = Some(chrono::Utc::now().to_rfc3339());
    }
}

fn default_protocol() -> String {
    "tcp".to_string()
}
