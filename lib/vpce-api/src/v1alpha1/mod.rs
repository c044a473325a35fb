/// API version v1alpha1 for VPCE operator CRDs

pub mod vpc_endpoint;

pub use vpc_endpoint::{
    Phase, RuleDirection, RuleSpec, VPCEndpoint, VPCEndpointSpec, VPCEndpointStatus,
};

/// API group for VPCE operator resources
pub const API_GROUP: &str = "vpce.io";
/// API version for VPCE operator resources
pub const API_VERSION: &str = "v1alpha1";

/// Value written to `vpce_aws_endpoint_status` / `svc_endpoint_status` once created
pub const STATUS_CREATED: &str = "created";
/// Value written to `vpce_aws_endpoint_status` / `svc_endpoint_status` once deleted
pub const STATUS_DELETED: &str = "deleted";
