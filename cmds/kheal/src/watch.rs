//! Startup and the long-running watch.
//!
//! Everything before the first cycle is fatal on failure: resolving
//! credentials, connecting, checking the namespace and loading the manifest.
//! Once watching, errors are only logged.

use std::future::Future;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::{
	config::{resolve_kubeconfig_from_env, WatchSettings},
	k8s::{
		api::{ensure_namespace, ClusterApi},
		client::ClusterConnection,
	},
	manifest::{Manifest, ResourceKind},
	reconcile::Reconciler,
	source,
};

/// Check the namespace and load the manifest into a ready reconciler.
pub async fn prepare<C: ClusterApi>(client: C, settings: &WatchSettings) -> Result<Reconciler<C>> {
	ensure_namespace(&client, &settings.namespace)
		.await
		.with_context(|| format!("checking namespace {}", settings.namespace))?;

	let text = source::fetch(&settings.manifest)
		.await
		.with_context(|| format!("loading manifest from {}", settings.manifest))?;
	let manifest = Manifest::new(&text);
	let parsed = manifest.parse();

	if !parsed.errors.is_empty() {
		warn!(
			skipped = parsed.errors.len(),
			"some manifest documents were skipped"
		);
	}
	info!(
		deployments = parsed.desired.documents(ResourceKind::Deployment).len(),
		services = parsed.desired.documents(ResourceKind::Service).len(),
		"loaded desired state"
	);

	Ok(Reconciler::new(client, settings.namespace.clone(), manifest, parsed.desired)
		.with_interval(settings.interval))
}

/// Connect to the cluster and heal the namespace until `shutdown` completes.
pub async fn run(settings: WatchSettings, shutdown: impl Future<Output = ()>) -> Result<()> {
	let kubeconfig = resolve_kubeconfig_from_env(settings.kubeconfig.as_deref())?;
	info!(
		path = %kubeconfig.path.display(),
		source = %kubeconfig.source,
		"using kubeconfig"
	);

	let connection = ClusterConnection::from_path(&kubeconfig.path)
		.await
		.with_context(|| format!("connecting with {}", kubeconfig.path.display()))?;
	info!(
		context = connection.context().unwrap_or("<none>"),
		version = %connection.server_version().git_version,
		"connected to cluster"
	);

	let reconciler = prepare(connection, &settings).await?;
	reconciler.run(shutdown).await;
	Ok(())
}
