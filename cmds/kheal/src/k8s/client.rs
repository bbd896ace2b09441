//! Kubernetes cluster connection management.

use std::{path::Path, time::Duration};

use k8s_openapi::apimachinery::pkg::version::Info;
use kube::{
	config::{KubeConfigOptions, Kubeconfig, KubeconfigError},
	Client, Config,
};
use thiserror::Error;
use tracing::instrument;

/// Default timeout for Kubernetes API requests.
const DEFAULT_API_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors that can occur when connecting to a Kubernetes cluster.
#[derive(Debug, Error)]
pub enum ConnectionError {
	#[error(transparent)]
	Kubeconfig(#[from] KubeconfigError),

	#[error(transparent)]
	Kube(#[from] kube::Error),
}

/// Represents a connection to a Kubernetes cluster.
///
/// Creating one talks to the API server once, so an unreachable cluster is
/// reported at startup instead of on the first reconciliation cycle.
#[derive(Clone)]
pub struct ClusterConnection {
	client: Client,
	server_version: Info,
	/// Kubeconfig context the connection was built from.
	context: Option<String>,
}

impl std::fmt::Debug for ClusterConnection {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ClusterConnection")
			.field("context", &self.context)
			.field("server_version", &self.server_version)
			.finish_non_exhaustive()
	}
}

impl ClusterConnection {
	/// Connect using the current context of the kubeconfig file at `path`.
	#[instrument(skip_all, fields(path = %path.display()))]
	pub async fn from_path(path: &Path) -> Result<Self, ConnectionError> {
		let kubeconfig = Kubeconfig::read_from(path)?;
		Self::from_kubeconfig(kubeconfig).await
	}

	/// Connect using the current context of a provided kubeconfig.
	#[instrument(skip_all)]
	pub async fn from_kubeconfig(kubeconfig: Kubeconfig) -> Result<Self, ConnectionError> {
		let context = kubeconfig.current_context.clone();

		let mut config =
			Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default()).await?;
		config.read_timeout = Some(DEFAULT_API_TIMEOUT);
		let client = Client::try_from(config)?;

		let server_version = client.apiserver_version().await?;
		tracing::debug!(
			context = ?context,
			version = %server_version.git_version,
			"connected to cluster"
		);

		Ok(Self {
			client,
			server_version,
			context,
		})
	}

	/// Get a reference to the underlying kube client.
	pub fn client(&self) -> &Client {
		&self.client
	}

	/// Get the server version.
	pub fn server_version(&self) -> &Info {
		&self.server_version
	}

	pub fn context(&self) -> Option<&str> {
		self.context.as_deref()
	}
}
