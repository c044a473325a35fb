//! Cluster API seam for the exposed Service

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Service;
use kube::api::{DeleteParams, PostParams};
use kube::{Api, Client};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClusterError {
    #[error("Service already exists: {0}")]
    AlreadyExists(String),

    #[error("Service not found: {0}")]
    NotFound(String),

    /// Throttling, server errors and transport failures
    #[error("Cluster API unavailable: {0}")]
    Unavailable(String),

    #[error("Cluster API rejected request: {0}")]
    Rejected(String),
}

impl ClusterError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClusterError::Unavailable(_))
    }
}

impl From<kube::Error> for ClusterError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(response) => match response.code {
                409 => ClusterError::AlreadyExists(response.message),
                404 => ClusterError::NotFound(response.message),
                429 | 500..=599 => ClusterError::Unavailable(response.message),
                _ => ClusterError::Rejected(response.message),
            },
            kube::Error::SerdeError(e) => ClusterError::Rejected(e.to_string()),
            other => ClusterError::Unavailable(other.to_string()),
        }
    }
}

#[async_trait]
pub trait ServiceApi: Send + Sync {
    async fn create_service(&self, namespace: &str, service: &Service) -> Result<(), ClusterError>;

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<(), ClusterError>;

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>, ClusterError>;
}

/// [`ServiceApi`] backed by the Kubernetes API server
#[derive(Clone)]
pub struct KubeServices {
    client: Client,
}

impl KubeServices {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ServiceApi for KubeServices {
    async fn create_service(&self, namespace: &str, service: &Service) -> Result<(), ClusterError> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        api.create(&PostParams::default(), service).await?;
        Ok(())
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        api.delete(name, &DeleteParams::default()).await?;
        Ok(())
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>, ClusterError> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: format!("code {code}"),
            reason: String::new(),
            code,
        })
    }

    #[test]
    fn test_status_codes_map_to_variants() {
        assert_eq!(
            ClusterError::from(api_error(409)),
            ClusterError::AlreadyExists("code 409".to_string())
        );
        assert_eq!(
            ClusterError::from(api_error(404)),
            ClusterError::NotFound("code 404".to_string())
        );
        assert!(ClusterError::from(api_error(503)).is_retryable());
        assert!(ClusterError::from(api_error(429)).is_retryable());
        assert!(!ClusterError::from(api_error(422)).is_retryable());
    }
}
