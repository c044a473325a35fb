//! Fault model shared by every provisioning step
//!
//! A step either succeeds or fails with a [`StepError`] whose [`FaultKind`]
//! tells the caller whether re-invoking the step can help. Identifiers of
//! cloud resources created before the failure travel in
//! [`StepError::partial`] so a retry resumes instead of duplicating them.

use std::fmt;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, StepError>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FaultKind {
    /// Retrying cannot succeed without operator intervention
    Permanent,
    /// The step may succeed when invoked again after a backoff
    Transient,
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FaultKind::Permanent => write!(f, "permanent"),
            FaultKind::Transient => write!(f, "transient"),
        }
    }
}

/// Identifiers produced before a step failed
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PartialState {
    pub group_id: Option<String>,
    pub endpoint_id: Option<String>,
    pub dns_name: Option<String>,
}

impl PartialState {
    pub fn is_empty(&self) -> bool {
        self.group_id.is_none() && self.endpoint_id.is_none() && self.dns_name.is_none()
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} fault: {message}")]
pub struct StepError {
    pub kind: FaultKind,
    pub message: String,
    pub partial: PartialState,
}

impl StepError {
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: FaultKind::Permanent,
            message: message.into(),
            partial: PartialState::default(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: FaultKind::Transient,
            message: message.into(),
            partial: PartialState::default(),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind == FaultKind::Transient
    }

    pub fn with_group_id(mut self, group_id: impl Into<String>) -> Self {
        self.partial.group_id = Some(group_id.into());
        self
    }

    pub fn with_endpoint(mut self, endpoint_id: impl Into<String>, dns_name: Option<String>) -> Self {
        self.partial.endpoint_id = Some(endpoint_id.into());
        self.partial.dns_name = dns_name;
        self
    }

    /// Same fault, escalated so the caller stops retrying
    pub fn into_permanent(mut self) -> Self {
        self.kind = FaultKind::Permanent;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_state_travels_with_fault() {
        let err = StepError::transient("Failed to tag resource").with_group_id("sg-1");
        assert!(err.is_transient());
        assert_eq!(err.partial.group_id.as_deref(), Some("sg-1"));
        assert_eq!(err.to_string(), "transient fault: Failed to tag resource");
    }

    #[test]
    fn test_escalation_keeps_partial_state() {
        let err = StepError::transient("poll failed")
            .with_endpoint("vpce-1", None)
            .into_permanent();
        assert_eq!(err.kind, FaultKind::Permanent);
        assert_eq!(err.partial.endpoint_id.as_deref(), Some("vpce-1"));
        assert!(!err.partial.is_empty());
    }
}
