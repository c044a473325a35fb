//! In-memory fakes for the EC2 and cluster seams
//!
//! Both fakes append every call to a shared [`CallLog`] so tests can assert
//! on the order in which steps touch AWS and the cluster.

use crate::aws::{
    AwsError, EndpointDescription, EndpointRequest, IpRule, NetworkApi, ResourceTag,
    SecurityGroupRequest,
};
use crate::cluster::{ClusterError, ServiceApi};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Service;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

pub type CallLog = Arc<Mutex<Vec<String>>>;

pub fn call_log() -> CallLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn calls(log: &CallLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

/// Position of the first call starting with `prefix`
pub fn position(log: &CallLog, prefix: &str) -> Option<usize> {
    calls(log).iter().position(|c| c.starts_with(prefix))
}

pub fn aws_error(code: &str) -> AwsError {
    AwsError::classify(Some(code), Some("injected"))
}

#[derive(Default)]
struct NetworkState {
    faults: HashMap<&'static str, VecDeque<AwsError>>,
    describes: VecDeque<Result<EndpointDescription, AwsError>>,
    groups: u32,
    endpoints: u32,
    // (group name, vpc id) -> group id
    group_ids: HashMap<(String, String), String>,
    // client token -> endpoint created with it
    endpoint_tokens: HashMap<String, EndpointDescription>,
    rules: Vec<(&'static str, String, IpRule)>,
    tags: Vec<(String, Vec<ResourceTag>)>,
    endpoint_requests: Vec<EndpointRequest>,
}

pub struct FakeNetwork {
    log: CallLog,
    state: Mutex<NetworkState>,
}

impl FakeNetwork {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            state: Mutex::new(NetworkState::default()),
        }
    }

    /// Fail the next call to `op` with `err`
    pub fn fail_next(&self, op: &'static str, err: AwsError) {
        self.state
            .lock()
            .unwrap()
            .faults
            .entry(op)
            .or_default()
            .push_back(err);
    }

    /// Queue a describe result; an empty queue answers not-found
    pub fn script_describe(&self, result: Result<EndpointDescription, AwsError>) {
        self.state.lock().unwrap().describes.push_back(result);
    }

    pub fn rules(&self) -> Vec<(&'static str, String, IpRule)> {
        self.state.lock().unwrap().rules.clone()
    }

    pub fn tags(&self) -> Vec<(String, Vec<ResourceTag>)> {
        self.state.lock().unwrap().tags.clone()
    }

    pub fn endpoint_requests(&self) -> Vec<EndpointRequest> {
        self.state.lock().unwrap().endpoint_requests.clone()
    }

    fn record(&self, op: &'static str, arg: &str) -> Result<(), AwsError> {
        self.log.lock().unwrap().push(format!("{op}:{arg}"));
        match self.state.lock().unwrap().faults.get_mut(op).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl NetworkApi for FakeNetwork {
    async fn create_security_group(&self, request: &SecurityGroupRequest) -> Result<String, AwsError> {
        self.record("create_security_group", &request.group_name)?;
        let mut state = self.state.lock().unwrap();
        let key = (request.group_name.clone(), request.vpc_id.clone());
        if state.group_ids.contains_key(&key) {
            return Err(aws_error("InvalidGroup.Duplicate"));
        }
        state.groups += 1;
        let group_id = format!("sg-{}", state.groups);
        state.group_ids.insert(key, group_id.clone());
        Ok(group_id)
    }

    async fn find_security_group(&self, group_name: &str, vpc_id: &str) -> Result<Option<String>, AwsError> {
        self.record("find_security_group", group_name)?;
        let state = self.state.lock().unwrap();
        Ok(state
            .group_ids
            .get(&(group_name.to_string(), vpc_id.to_string()))
            .cloned())
    }

    async fn create_tags(&self, resource_id: &str, tags: &[ResourceTag]) -> Result<(), AwsError> {
        self.record("create_tags", resource_id)?;
        self.state
            .lock()
            .unwrap()
            .tags
            .push((resource_id.to_string(), tags.to_vec()));
        Ok(())
    }

    async fn authorize_ingress(&self, group_id: &str, rule: &IpRule) -> Result<(), AwsError> {
        self.record("authorize_ingress", group_id)?;
        self.state
            .lock()
            .unwrap()
            .rules
            .push(("ingress", group_id.to_string(), rule.clone()));
        Ok(())
    }

    async fn authorize_egress(&self, group_id: &str, rule: &IpRule) -> Result<(), AwsError> {
        self.record("authorize_egress", group_id)?;
        self.state
            .lock()
            .unwrap()
            .rules
            .push(("egress", group_id.to_string(), rule.clone()));
        Ok(())
    }

    async fn delete_security_group(&self, group_id: &str) -> Result<(), AwsError> {
        self.record("delete_security_group", group_id)
    }

    async fn create_vpc_endpoint(&self, request: &EndpointRequest) -> Result<EndpointDescription, AwsError> {
        self.record("create_vpc_endpoint", &request.service_name)?;
        let mut state = self.state.lock().unwrap();
        state.endpoint_requests.push(request.clone());
        if let Some(existing) = request
            .client_token
            .as_ref()
            .and_then(|token| state.endpoint_tokens.get(token))
        {
            return Ok(existing.clone());
        }

        state.endpoints += 1;
        let endpoint_id = format!("vpce-{}", state.endpoints);
        let description = EndpointDescription {
            dns_names: vec![
                format!("{endpoint_id}.region.vpce.amazonaws.com"),
                format!("{endpoint_id}-az1.region.vpce.amazonaws.com"),
            ],
            state: Some("pending".to_string()),
            endpoint_id,
        };
        if let Some(token) = &request.client_token {
            state.endpoint_tokens.insert(token.clone(), description.clone());
        }
        Ok(description)
    }

    async fn delete_vpc_endpoint(&self, endpoint_id: &str) -> Result<(), AwsError> {
        self.record("delete_vpc_endpoint", endpoint_id)
    }

    async fn describe_vpc_endpoint(&self, endpoint_id: &str) -> Result<EndpointDescription, AwsError> {
        self.record("describe_vpc_endpoint", endpoint_id)?;
        self.state
            .lock()
            .unwrap()
            .describes
            .pop_front()
            .unwrap_or_else(|| Err(aws_error("InvalidVpcEndpointId.NotFound")))
    }
}

#[derive(Default)]
struct ClusterState {
    faults: HashMap<&'static str, VecDeque<ClusterError>>,
    services: Vec<Service>,
}

pub struct FakeCluster {
    log: CallLog,
    state: Mutex<ClusterState>,
}

impl FakeCluster {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            state: Mutex::new(ClusterState::default()),
        }
    }

    pub fn fail_next(&self, op: &'static str, err: ClusterError) {
        self.state
            .lock()
            .unwrap()
            .faults
            .entry(op)
            .or_default()
            .push_back(err);
    }

    pub fn services(&self) -> Vec<Service> {
        self.state.lock().unwrap().services.clone()
    }

    /// Seed a Service that exists before the controller acts
    pub fn insert(&self, service: Service) {
        self.state.lock().unwrap().services.push(service);
    }

    fn find(&self, namespace: &str, name: &str) -> Option<Service> {
        self.state
            .lock()
            .unwrap()
            .services
            .iter()
            .find(|s| {
                s.metadata.namespace.as_deref() == Some(namespace) && s.metadata.name.as_deref() == Some(name)
            })
            .cloned()
    }

    fn record(&self, op: &'static str, arg: &str) -> Result<(), ClusterError> {
        self.log.lock().unwrap().push(format!("{op}:{arg}"));
        match self.state.lock().unwrap().faults.get_mut(op).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ServiceApi for FakeCluster {
    async fn create_service(&self, namespace: &str, service: &Service) -> Result<(), ClusterError> {
        let name = service.metadata.name.clone().unwrap_or_default();
        self.record("create_service", &format!("{namespace}/{name}"))?;
        if self.find(namespace, &name).is_some() {
            return Err(ClusterError::AlreadyExists(name));
        }
        self.state.lock().unwrap().services.push(service.clone());
        Ok(())
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        self.record("delete_service", &format!("{namespace}/{name}"))?;
        self.state
            .lock()
            .unwrap()
            .services
            .retain(|s| s.metadata.name.as_deref() != Some(name));
        Ok(())
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>, ClusterError> {
        self.record("get_service", &format!("{namespace}/{name}"))?;
        Ok(self.find(namespace, name))
    }
}
