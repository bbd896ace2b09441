//! Cluster operations the reconciler needs.

use async_trait::async_trait;
use k8s_openapi::api::{
	apps::v1::Deployment,
	core::v1::{Namespace, Service},
};
use kube::api::{Api, ListParams, PostParams};
use thiserror::Error;

use super::client::ClusterConnection;

/// A failed API call.
#[derive(Debug, Error)]
pub enum ApiError {
	/// The API server answered with an error status.
	#[error("api server rejected the request ({code} {reason}): {message}")]
	Rejected {
		code: u16,
		reason: String,
		message: String,
	},

	#[error(transparent)]
	Transport(kube::Error),
}

impl ApiError {
	/// Create raced with another writer, or the resource came back on its own.
	pub fn is_already_exists(&self) -> bool {
		matches!(self, Self::Rejected { code: 409, .. })
	}
}

impl From<kube::Error> for ApiError {
	fn from(err: kube::Error) -> Self {
		match err {
			kube::Error::Api(status) => Self::Rejected {
				code: status.code,
				reason: status.reason.clone(),
				message: status.message.clone(),
			},
			other => Self::Transport(other),
		}
	}
}

/// Cluster client used for querying live state and repairing drift.
#[async_trait]
pub trait ClusterApi: Send + Sync {
	async fn list_namespaces(&self) -> Result<Vec<Namespace>, ApiError>;

	async fn list_deployments(&self, namespace: &str) -> Result<Vec<Deployment>, ApiError>;

	async fn list_services(&self, namespace: &str) -> Result<Vec<Service>, ApiError>;

	/// `None` when the deployment does not exist.
	async fn get_deployment(
		&self,
		namespace: &str,
		name: &str,
	) -> Result<Option<Deployment>, ApiError>;

	async fn create_deployment(
		&self,
		namespace: &str,
		deployment: &Deployment,
	) -> Result<Deployment, ApiError>;

	async fn create_service(&self, namespace: &str, service: &Service)
		-> Result<Service, ApiError>;
}

#[async_trait]
impl ClusterApi for ClusterConnection {
	async fn list_namespaces(&self) -> Result<Vec<Namespace>, ApiError> {
		let api: Api<Namespace> = Api::all(self.client().clone());
		Ok(api.list(&ListParams::default()).await?.items)
	}

	async fn list_deployments(&self, namespace: &str) -> Result<Vec<Deployment>, ApiError> {
		let api: Api<Deployment> = Api::namespaced(self.client().clone(), namespace);
		Ok(api.list(&ListParams::default()).await?.items)
	}

	async fn list_services(&self, namespace: &str) -> Result<Vec<Service>, ApiError> {
		let api: Api<Service> = Api::namespaced(self.client().clone(), namespace);
		Ok(api.list(&ListParams::default()).await?.items)
	}

	async fn get_deployment(
		&self,
		namespace: &str,
		name: &str,
	) -> Result<Option<Deployment>, ApiError> {
		let api: Api<Deployment> = Api::namespaced(self.client().clone(), namespace);
		Ok(api.get_opt(name).await?)
	}

	async fn create_deployment(
		&self,
		namespace: &str,
		deployment: &Deployment,
	) -> Result<Deployment, ApiError> {
		let api: Api<Deployment> = Api::namespaced(self.client().clone(), namespace);
		Ok(api.create(&PostParams::default(), deployment).await?)
	}

	async fn create_service(
		&self,
		namespace: &str,
		service: &Service,
	) -> Result<Service, ApiError> {
		let api: Api<Service> = Api::namespaced(self.client().clone(), namespace);
		Ok(api.create(&PostParams::default(), service).await?)
	}
}

#[derive(Debug, Error)]
pub enum NamespaceError {
	#[error("namespace `{0}` not found")]
	NotFound(String),

	#[error("listing namespaces")]
	List(#[source] ApiError),
}

/// Check that `namespace` exists in the cluster.
pub async fn ensure_namespace<C>(client: &C, namespace: &str) -> Result<(), NamespaceError>
where
	C: ClusterApi + ?Sized,
{
	let namespaces = client
		.list_namespaces()
		.await
		.map_err(NamespaceError::List)?;

	if namespaces
		.iter()
		.any(|ns| ns.metadata.name.as_deref() == Some(namespace))
	{
		Ok(())
	} else {
		Err(NamespaceError::NotFound(namespace.to_string()))
	}
}

#[cfg(test)]
mod tests {
	use assert_matches::assert_matches;

	use super::*;
	use crate::test_utils::FakeCluster;

	#[tokio::test]
	async fn test_ensure_namespace_found() {
		let cluster = FakeCluster::new().with_namespace("default").with_namespace("shop");

		assert_matches!(ensure_namespace(&cluster, "shop").await, Ok(()));
	}

	#[tokio::test]
	async fn test_ensure_namespace_not_found() {
		let cluster = FakeCluster::new().with_namespace("default");

		assert_matches!(
			ensure_namespace(&cluster, "shop").await,
			Err(NamespaceError::NotFound(ns)) if ns == "shop"
		);
	}

	#[tokio::test]
	async fn test_ensure_namespace_without_any_namespace() {
		let cluster = FakeCluster::new();

		assert_matches!(
			ensure_namespace(&cluster, "default").await,
			Err(NamespaceError::NotFound(_))
		);
	}

	#[test]
	fn test_already_exists() {
		let conflict = ApiError::Rejected {
			code: 409,
			reason: "AlreadyExists".to_string(),
			message: "services \"frontend\" already exists".to_string(),
		};
		let internal = ApiError::Rejected {
			code: 500,
			reason: "InternalError".to_string(),
			message: "etcd unavailable".to_string(),
		};

		assert!(conflict.is_already_exists());
		assert!(!internal.is_already_exists());
	}
}
