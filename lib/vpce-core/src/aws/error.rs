//! AWS error classification
//!
//! EC2 faults are classified by their error code (via `ProvideErrorMetadata`)
//! so callers can tell "already gone" from "try again" from "broken request".

use aws_sdk_ec2::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AwsError {
    /// The referenced resource does not exist (success for deletes)
    #[error("Resource not found ({code}): {message}")]
    NotFound { code: String, message: String },

    /// The resource or permission already exists
    #[error("Resource already exists ({code}): {message}")]
    AlreadyExists { code: String, message: String },

    /// Rate limit exceeded (retryable with backoff)
    #[error("Rate limit exceeded: {message}")]
    Throttled { message: String },

    /// Resource still has dependents, e.g. a group with endpoint ENIs attached
    #[error("Resource has dependent objects: {message}")]
    DependencyViolation { message: String },

    /// The request never got a service response (timeout, connection failure)
    #[error("AWS request failed in transport: {message}")]
    Transport { message: String },

    /// The service answered without a field it always sets
    #[error("Malformed AWS response: {0}")]
    MalformedResponse(String),

    /// Any other service error
    #[error("AWS error: {message}")]
    Service { code: Option<String>, message: String },
}

/// Error codes meaning the resource does not exist
const NOT_FOUND_CODES: &[&str] = &[
    "InvalidGroup.NotFound",
    "InvalidGroupId.NotFound",
    "InvalidPermission.NotFound",
    "InvalidVpcEndpointId.NotFound",
    "InvalidVpcEndpoint.NotFound",
];

/// Error codes meaning the resource or rule already exists
const ALREADY_EXISTS_CODES: &[&str] = &["InvalidPermission.Duplicate", "InvalidGroup.Duplicate"];

/// Error codes for throttling/rate limiting
const THROTTLING_CODES: &[&str] = &["Throttling", "ThrottlingException", "RequestLimitExceeded"];

const DEPENDENCY_CODES: &[&str] = &["DependencyViolation"];

/// Error code reported when a describe call no longer returns the endpoint
pub const ENDPOINT_NOT_FOUND_CODE: &str = "InvalidVpcEndpointId.NotFound";

impl AwsError {
    /// Classify an EC2 error from its code and message
    pub fn classify(code: Option<&str>, message: Option<&str>) -> Self {
        let message = message.unwrap_or("Unknown error").to_string();

        match code {
            Some(c) if NOT_FOUND_CODES.contains(&c) => AwsError::NotFound {
                code: c.to_string(),
                message,
            },
            Some(c) if ALREADY_EXISTS_CODES.contains(&c) => AwsError::AlreadyExists {
                code: c.to_string(),
                message,
            },
            Some(c) if THROTTLING_CODES.contains(&c) => AwsError::Throttled { message },
            Some(c) if DEPENDENCY_CODES.contains(&c) => AwsError::DependencyViolation { message },
            _ => AwsError::Service {
                code: code.map(|s| s.to_string()),
                message,
            },
        }
    }

    /// Classify a failed SDK call
    pub fn from_sdk<E, R>(err: SdkError<E, R>) -> Self
    where
        E: ProvideErrorMetadata + std::error::Error + 'static,
        R: std::fmt::Debug,
    {
        match &err {
            SdkError::DispatchFailure(_) | SdkError::TimeoutError(_) | SdkError::ResponseError(_) => {
                AwsError::Transport {
                    message: DisplayErrorContext(&err).to_string(),
                }
            }
            _ => {
                let message = err
                    .message()
                    .map(str::to_string)
                    .unwrap_or_else(|| DisplayErrorContext(&err).to_string());
                Self::classify(err.code(), Some(&message))
            }
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, AwsError::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, AwsError::AlreadyExists { .. })
    }

    /// Check if retrying the same call can succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AwsError::Throttled { .. } | AwsError::DependencyViolation { .. } | AwsError::Transport { .. }
        )
    }

    /// Check if the service refused the call before acting on it
    ///
    /// Unlike [`is_retryable`](Self::is_retryable) this excludes transport
    /// failures, where a create may have taken effect without a response.
    pub fn is_rejected_before_effect(&self) -> bool {
        matches!(self, AwsError::Throttled { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_codes() {
        for code in NOT_FOUND_CODES {
            let err = AwsError::classify(Some(code), Some("some message"));
            assert!(err.is_not_found(), "Expected NotFound for code: {code}");
            assert!(!err.is_retryable());
        }
    }

    #[test]
    fn already_exists_codes() {
        for code in ALREADY_EXISTS_CODES {
            let err = AwsError::classify(Some(code), Some("msg"));
            assert!(err.is_already_exists(), "Expected AlreadyExists for code: {code}");
        }
    }

    #[test]
    fn throttling_codes() {
        for code in THROTTLING_CODES {
            let err = AwsError::classify(Some(code), Some("msg"));
            assert!(err.is_retryable(), "Expected retryable for code: {code}");
            assert!(err.is_rejected_before_effect());
        }
    }

    #[test]
    fn dependency_violation() {
        let err = AwsError::classify(Some("DependencyViolation"), Some("ENI attached"));
        assert!(err.is_retryable());
        assert!(!err.is_rejected_before_effect());
        assert!(matches!(err, AwsError::DependencyViolation { .. }));
    }

    #[test]
    fn unknown_and_missing_codes() {
        let err = AwsError::classify(Some("InvalidParameterValue"), Some("bad subnet"));
        assert!(matches!(err, AwsError::Service { code: Some(_), .. }));
        assert!(!err.is_retryable());

        let err = AwsError::classify(None, None);
        assert_eq!(err.to_string(), "AWS error: Unknown error");
    }

    #[test]
    fn transport_is_retryable_but_not_safe_for_creates() {
        let err = AwsError::Transport {
            message: "connection reset".to_string(),
        };
        assert!(err.is_retryable());
        assert!(!err.is_rejected_before_effect());
    }
}
