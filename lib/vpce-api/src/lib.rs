//! VPCE operator API types and CRDs for Kubernetes integration
//!
//! This library defines the custom resource reconciled by the vpce controller:
//! - VPCEndpoint: a private AWS interface endpoint, its generated security
//!   group, and the in-cluster Service that republishes its DNS name

pub mod v1alpha1;

pub use v1alpha1::{
    Phase, RuleDirection, RuleSpec, VPCEndpoint, VPCEndpointSpec, VPCEndpointStatus,
};
