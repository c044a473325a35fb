//! Reconciliation core for VPC endpoint provisioning
//!
//! This library provides:
//! - Security group creation, tagging, rule authorization and teardown
//! - Interface VPC endpoint creation, tagging, deletion and convergence checks
//! - Rendering and applying the in-cluster Service that republishes the endpoint
//! - A composed provisioner that advances a VPCEndpoint one step at a time

pub mod aws;
pub mod cluster;
pub mod endpoint;
pub mod error;
pub mod identity;
pub mod provisioner;
pub mod security_group;
pub mod service;

#[cfg(test)]
mod testing;

pub use aws::{AwsError, Ec2Network, NetworkApi};
pub use cluster::{ClusterError, KubeServices, ServiceApi};
pub use endpoint::{Convergence, DeletionPolicy, EndpointManager, EndpointRecord, EndpointState, PollDecision};
pub use error::{FaultKind, PartialState, Result, StepError};
pub use identity::ResourceIdentity;
pub use provisioner::{absorb_partial, Advance, ProvisionRequest, Provisioner};
pub use security_group::SecurityGroupManager;
pub use service::{ServiceExposer, ServiceTemplate};
