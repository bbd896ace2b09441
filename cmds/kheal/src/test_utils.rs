//! Common test utilities.

use std::{
	collections::{BTreeMap, HashSet},
	sync::Mutex,
};

use async_trait::async_trait;
use k8s_openapi::{
	api::{
		apps::v1::Deployment,
		core::v1::{Namespace, Service},
	},
	apimachinery::pkg::apis::meta::v1::ObjectMeta,
};

use crate::{
	k8s::api::{ApiError, ClusterApi},
	manifest::ResourceKind,
};

/// A trimmed copy of the microservices-demo release manifest.
pub const SHOP_MANIFEST: &str = include_str!("../tests/fixtures/shop.yaml");

/// An in-memory cluster for testing.
///
/// Stores objects keyed by (namespace, name), records every create call and
/// can be told to fail creates or listings, avoiding the need for an API
/// server in unit tests.
#[derive(Default)]
pub struct FakeCluster {
	state: Mutex<FakeState>,
}

#[derive(Default)]
struct FakeState {
	namespaces: Vec<String>,
	deployments: BTreeMap<(String, String), Deployment>,
	services: BTreeMap<(String, String), Service>,
	failing_creates: HashSet<String>,
	failing_lists: HashSet<ResourceKind>,
	creates: Vec<(ResourceKind, String, String)>,
	list_calls: usize,
}

fn meta(namespace: &str, name: &str) -> ObjectMeta {
	ObjectMeta {
		name: Some(name.to_string()),
		namespace: Some(namespace.to_string()),
		..ObjectMeta::default()
	}
}

fn key(namespace: &str, name: &str) -> (String, String) {
	(namespace.to_string(), name.to_string())
}

fn internal_error(message: &str) -> ApiError {
	ApiError::Rejected {
		code: 500,
		reason: "InternalError".to_string(),
		message: message.to_string(),
	}
}

fn already_exists(name: &str) -> ApiError {
	ApiError::Rejected {
		code: 409,
		reason: "AlreadyExists".to_string(),
		message: format!("\"{name}\" already exists"),
	}
}

impl FakeCluster {
	pub fn new() -> Self {
		Self::default()
	}

	fn with_state(self, f: impl FnOnce(&mut FakeState)) -> Self {
		f(&mut self.state.lock().unwrap());
		self
	}

	pub fn with_namespace(self, namespace: &str) -> Self {
		self.with_state(|s| s.namespaces.push(namespace.to_string()))
	}

	pub fn with_deployment(self, namespace: &str, name: &str) -> Self {
		let deployment = Deployment {
			metadata: meta(namespace, name),
			..Deployment::default()
		};
		self.with_state(|s| {
			s.deployments.insert(key(namespace, name), deployment);
		})
	}

	pub fn with_service(self, namespace: &str, name: &str) -> Self {
		let service = Service {
			metadata: meta(namespace, name),
			..Service::default()
		};
		self.with_state(|s| {
			s.services.insert(key(namespace, name), service);
		})
	}

	/// Creates of resources called `name` answer with a 500.
	pub fn fail_creates_for(self, name: &str) -> Self {
		self.with_state(|s| {
			s.failing_creates.insert(name.to_string());
		})
	}

	pub fn fail_lists_for(self, kind: ResourceKind) -> Self {
		self.with_state(|s| {
			s.failing_lists.insert(kind);
		})
	}

	pub fn heal_creates_for(&self, name: &str) {
		self.state.lock().unwrap().failing_creates.remove(name);
	}

	pub fn delete_deployment(&self, namespace: &str, name: &str) {
		self.state
			.lock()
			.unwrap()
			.deployments
			.remove(&key(namespace, name));
	}

	/// Every create call made so far, as (kind, namespace, name).
	pub fn creates(&self) -> Vec<(ResourceKind, String, String)> {
		self.state.lock().unwrap().creates.clone()
	}

	pub fn list_calls(&self) -> usize {
		self.state.lock().unwrap().list_calls
	}
}

#[async_trait]
impl ClusterApi for FakeCluster {
	async fn list_namespaces(&self) -> Result<Vec<Namespace>, ApiError> {
		let state = self.state.lock().unwrap();
		Ok(state
			.namespaces
			.iter()
			.map(|name| Namespace {
				metadata: ObjectMeta {
					name: Some(name.clone()),
					..ObjectMeta::default()
				},
				..Namespace::default()
			})
			.collect())
	}

	async fn list_deployments(&self, namespace: &str) -> Result<Vec<Deployment>, ApiError> {
		let mut state = self.state.lock().unwrap();
		state.list_calls += 1;
		if state.failing_lists.contains(&ResourceKind::Deployment) {
			return Err(internal_error("listing deployments"));
		}
		Ok(state
			.deployments
			.iter()
			.filter(|((ns, _), _)| ns == namespace)
			.map(|(_, d)| d.clone())
			.collect())
	}

	async fn list_services(&self, namespace: &str) -> Result<Vec<Service>, ApiError> {
		let mut state = self.state.lock().unwrap();
		state.list_calls += 1;
		if state.failing_lists.contains(&ResourceKind::Service) {
			return Err(internal_error("listing services"));
		}
		Ok(state
			.services
			.iter()
			.filter(|((ns, _), _)| ns == namespace)
			.map(|(_, s)| s.clone())
			.collect())
	}

	async fn get_deployment(
		&self,
		namespace: &str,
		name: &str,
	) -> Result<Option<Deployment>, ApiError> {
		let state = self.state.lock().unwrap();
		Ok(state.deployments.get(&key(namespace, name)).cloned())
	}

	async fn create_deployment(
		&self,
		namespace: &str,
		deployment: &Deployment,
	) -> Result<Deployment, ApiError> {
		let mut state = self.state.lock().unwrap();
		let name = deployment.metadata.name.clone().unwrap_or_default();
		state
			.creates
			.push((ResourceKind::Deployment, namespace.to_string(), name.clone()));

		if state.failing_creates.contains(&name) {
			return Err(internal_error("creating deployment"));
		}
		let key = key(namespace, &name);
		if state.deployments.contains_key(&key) {
			return Err(already_exists(&name));
		}
		state.deployments.insert(key, deployment.clone());
		Ok(deployment.clone())
	}

	async fn create_service(
		&self,
		namespace: &str,
		service: &Service,
	) -> Result<Service, ApiError> {
		let mut state = self.state.lock().unwrap();
		let name = service.metadata.name.clone().unwrap_or_default();
		state
			.creates
			.push((ResourceKind::Service, namespace.to_string(), name.clone()));

		if state.failing_creates.contains(&name) {
			return Err(internal_error("creating service"));
		}
		let key = key(namespace, &name);
		if state.services.contains_key(&key) {
			return Err(already_exists(&name));
		}
		state.services.insert(key, service.clone());
		Ok(service.clone())
	}
}
