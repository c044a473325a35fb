//! In-cluster Service that republishes the endpoint DNS name

use crate::cluster::{ClusterError, ServiceApi};
use crate::{Result, StepError};
use k8s_openapi::api::core::v1::Service;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};
use vpce_api::v1alpha1::{STATUS_CREATED, STATUS_DELETED};

const BUILTIN_TEMPLATE: &str = include_str!("../templates/svc.yaml");

/// Label the built-in template puts on every Service it renders
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

pub const MANAGED_BY_VALUE: &str = "vpce-controller";

/// Service descriptor template with `{name}`, `{namespace}` and `{vpce_dns}` placeholders
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceTemplate {
    source: String,
}

impl ServiceTemplate {
    /// ExternalName Service pointing at the endpoint DNS name
    pub fn builtin() -> Self {
        Self::from_source(BUILTIN_TEMPLATE)
    }

    pub fn from_source(source: impl Into<String>) -> Self {
        Self { source: source.into() }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        std::fs::read_to_string(path)
            .map(Self::from_source)
            .map_err(|e| {
                StepError::permanent(format!(
                    "Failed to read service template {}: {e}",
                    path.display()
                ))
            })
    }

    /// Substitute the placeholders and parse the result as a Service
    pub fn render(&self, name: &str, namespace: &str, dns_name: &str) -> Result<Service> {
        if dns_name.is_empty() {
            return Err(StepError::permanent(format!(
                "Refusing to render service {namespace}/{name} without an endpoint DNS name"
            )));
        }

        let text = self
            .source
            .replace("{name}", name)
            .replace("{namespace}", namespace)
            .replace("{vpce_dns}", dns_name);

        serde_yaml::from_str(&text).map_err(|e| {
            StepError::permanent(format!("Service template for {namespace}/{name} did not parse: {e}"))
        })
    }
}

impl Default for ServiceTemplate {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Applies and removes the Service named after a VPCEndpoint
pub struct ServiceExposer {
    cluster: Arc<dyn ServiceApi>,
    template: ServiceTemplate,
}

impl ServiceExposer {
    pub fn new(cluster: Arc<dyn ServiceApi>, template: ServiceTemplate) -> Self {
        Self { cluster, template }
    }

    pub fn render(&self, name: &str, namespace: &str, dns_name: &str) -> Result<Service> {
        self.template.render(name, namespace, dns_name)
    }

    /// Create the Service
    ///
    /// An existing Service of the same name counts as created only when this
    /// controller manages it: it carries the managed-by label, or shares an
    /// owner reference with `service`. Anything else is a permanent fault.
    pub async fn create(&self, service: &Service) -> Result<&'static str> {
        let name = service.metadata.name.as_deref().unwrap_or_default();
        let namespace = service.metadata.namespace.as_deref().ok_or_else(|| {
            StepError::permanent(format!("Rendered service {name} has no namespace"))
        })?;
        debug!(service = ?service, "Service body to be sent to the cluster");

        match self.cluster.create_service(namespace, service).await {
            Ok(()) => {
                info!(namespace, name, "Service created");
                Ok(STATUS_CREATED)
            }
            Err(ClusterError::AlreadyExists(_)) => self.adopt(namespace, name, service).await,
            Err(e) => Err(classify(e, "Error creating svc endpoint")),
        }
    }

    async fn adopt(&self, namespace: &str, name: &str, desired: &Service) -> Result<&'static str> {
        let existing = self
            .cluster
            .get_service(namespace, name)
            .await
            .map_err(|e| classify(e, "Error reading existing svc endpoint"))?;

        match existing {
            Some(existing) if is_managed(&existing, desired) => {
                debug!(namespace, name, "Service already exists");
                Ok(STATUS_CREATED)
            }
            Some(_) => Err(StepError::permanent(format!(
                "Service {namespace}/{name} already exists and is not managed by {MANAGED_BY_VALUE}"
            ))),
            None => Err(StepError::transient(format!(
                "Service {namespace}/{name} conflicted on create but is gone"
            ))),
        }
    }

    /// Delete the Service; a missing Service counts as deleted
    pub async fn delete(&self, name: &str, namespace: &str) -> Result<&'static str> {
        info!(namespace, name, "Deleting service");
        match self.cluster.delete_service(namespace, name).await {
            Ok(()) => Ok(STATUS_DELETED),
            Err(ClusterError::NotFound(_)) => {
                debug!(namespace, name, "Service already deleted");
                Ok(STATUS_DELETED)
            }
            Err(e) => Err(classify(e, "Error deleting svc endpoint")),
        }
    }
}

fn is_managed(existing: &Service, desired: &Service) -> bool {
    let labelled = existing
        .metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(MANAGED_BY_LABEL))
        .is_some_and(|value| value == MANAGED_BY_VALUE);

    let owned = match (&existing.metadata.owner_references, &desired.metadata.owner_references) {
        (Some(have), Some(want)) => have.iter().any(|h| want.iter().any(|w| w.uid == h.uid)),
        _ => false,
    };

    labelled || owned
}

fn classify(err: ClusterError, context: &str) -> StepError {
    if err.is_retryable() {
        StepError::transient(format!("{context}: {err}"))
    } else {
        StepError::permanent(format!("{context}: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{call_log, FakeCluster};
    use crate::FaultKind;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;

    fn exposer() -> (Arc<FakeCluster>, ServiceExposer) {
        let cluster = Arc::new(FakeCluster::new(call_log()));
        (cluster.clone(), ServiceExposer::new(cluster, ServiceTemplate::builtin()))
    }

    #[test]
    fn test_render_builtin_template() {
        let service = ServiceTemplate::builtin()
            .render("x", "ns", "vpce-1.region.vpce.amazonaws.com")
            .unwrap();

        assert_eq!(service.metadata.name.as_deref(), Some("x"));
        assert_eq!(service.metadata.namespace.as_deref(), Some("ns"));
        let spec = service.spec.unwrap();
        assert_eq!(spec.type_.as_deref(), Some("ExternalName"));
        assert_eq!(
            spec.external_name.as_deref(),
            Some("vpce-1.region.vpce.amazonaws.com")
        );
    }

    #[test]
    fn test_render_without_dns_is_permanent() {
        let err = ServiceTemplate::builtin().render("x", "ns", "").unwrap_err();
        assert_eq!(err.kind, FaultKind::Permanent);
    }

    #[test]
    fn test_unparseable_template_is_permanent() {
        let template = ServiceTemplate::from_source("metadata: [name: {name}");
        let err = template.render("x", "ns", "dns").unwrap_err();
        assert_eq!(err.kind, FaultKind::Permanent);
    }

    #[test]
    fn test_missing_template_file_is_permanent() {
        let err = ServiceTemplate::from_file(Path::new("/nonexistent/svc.yaml")).unwrap_err();
        assert_eq!(err.kind, FaultKind::Permanent);
    }

    fn foreign_service() -> Service {
        let mut service = Service::default();
        service.metadata.name = Some("x".to_string());
        service.metadata.namespace = Some("ns".to_string());
        service
    }

    fn owner(uid: &str) -> OwnerReference {
        OwnerReference {
            api_version: "vpce.io/v1alpha1".to_string(),
            kind: "VPCEndpoint".to_string(),
            name: "x".to_string(),
            uid: uid.to_string(),
            controller: Some(true),
            block_owner_deletion: None,
        }
    }

    #[tokio::test]
    async fn test_create_existing_managed_service_is_success() {
        let (cluster, exposer) = exposer();
        let service = exposer.render("x", "ns", "dns.example").unwrap();
        cluster.insert(service.clone());

        assert_eq!(exposer.create(&service).await.unwrap(), "created");
        assert_eq!(cluster.services().len(), 1);
    }

    #[tokio::test]
    async fn test_create_existing_owned_service_is_success() {
        let (cluster, exposer) = exposer();
        let mut existing = foreign_service();
        existing.metadata.owner_references = Some(vec![owner("uid-1")]);
        cluster.insert(existing);

        let mut service = exposer.render("x", "ns", "dns.example").unwrap();
        service.metadata.owner_references = Some(vec![owner("uid-1")]);
        assert_eq!(exposer.create(&service).await.unwrap(), "created");
    }

    #[tokio::test]
    async fn test_create_over_foreign_service_is_permanent() {
        let (cluster, exposer) = exposer();
        let mut existing = foreign_service();
        existing.metadata.owner_references = Some(vec![owner("uid-other")]);
        cluster.insert(existing);

        let mut service = exposer.render("x", "ns", "dns.example").unwrap();
        service.metadata.owner_references = Some(vec![owner("uid-1")]);
        let err = exposer.create(&service).await.unwrap_err();
        assert_eq!(err.kind, FaultKind::Permanent);
    }

    #[tokio::test]
    async fn test_conflict_with_vanished_service_is_transient() {
        let (cluster, exposer) = exposer();
        cluster.fail_next("create_service", ClusterError::AlreadyExists("x".to_string()));

        let service = exposer.render("x", "ns", "dns.example").unwrap();
        assert!(exposer.create(&service).await.unwrap_err().is_transient());
    }

    #[tokio::test]
    async fn test_create_rejected_is_permanent() {
        let (cluster, exposer) = exposer();
        cluster.fail_next("create_service", ClusterError::Rejected("invalid".to_string()));

        let service = exposer.render("x", "ns", "dns.example").unwrap();
        let err = exposer.create(&service).await.unwrap_err();
        assert_eq!(err.kind, FaultKind::Permanent);
    }

    #[tokio::test]
    async fn test_create_unavailable_is_transient() {
        let (cluster, exposer) = exposer();
        cluster.fail_next("create_service", ClusterError::Unavailable("503".to_string()));

        let service = exposer.render("x", "ns", "dns.example").unwrap();
        assert!(exposer.create(&service).await.unwrap_err().is_transient());
    }

    #[tokio::test]
    async fn test_delete_missing_service_is_success() {
        let (cluster, exposer) = exposer();
        cluster.fail_next("delete_service", ClusterError::NotFound("x".to_string()));

        assert_eq!(exposer.delete("x", "ns").await.unwrap(), "deleted");
    }
}
