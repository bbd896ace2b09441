//! Recreating drifted resources from their manifest documents.

use tracing::{info, instrument, warn};

use crate::{
	k8s::api::{ApiError, ClusterApi},
	manifest::{DocumentHeader, Manifest, ResourceKind, TypedResource},
};

/// What happened to a single repair attempt.
#[derive(Debug)]
pub enum RepairOutcome {
	Created,
	/// The API server already has the resource. Usually a create racing with a
	/// slow listing; the next cycle will see it.
	AlreadyExists,
	Failed(ApiError),
	/// The document matched but no longer decodes. Retried next cycle.
	Undecodable(serde_yaml::Error),
	NotInManifest,
	/// Only Deployments and Services are recreated.
	UnsupportedKind,
}

impl RepairOutcome {
	pub fn is_created(&self) -> bool {
		matches!(self, Self::Created)
	}

	/// Whether the resource is still expected to be missing after this attempt.
	pub fn is_failure(&self) -> bool {
		!matches!(self, Self::Created | Self::AlreadyExists)
	}
}

/// Find the first document declaring `kind`/`name` that decodes.
///
/// Works on the manifest text itself rather than on the desired state, so the
/// created object is exactly what the manifest says. Matching documents that
/// fail to decode are skipped, the same way parsing skips them; the first such
/// error is returned only when no match decodes.
pub fn locate(
	manifest: &Manifest,
	kind: ResourceKind,
	name: &str,
) -> Option<Result<TypedResource, serde_yaml::Error>> {
	let mut first_error = None;

	for document in manifest.documents() {
		let Ok(header) = DocumentHeader::read(document) else {
			continue;
		};
		if header.kind != kind.as_str() || header.name() != Some(name) {
			continue;
		}
		match TypedResource::decode(kind, document) {
			Ok(resource) => return Some(Ok(resource)),
			Err(err) => {
				first_error.get_or_insert(err);
			}
		}
	}

	first_error.map(Err)
}

/// Recreate one drifted resource in `namespace`.
///
/// Makes exactly one create call and never updates an existing object. Every
/// failure is logged and reported in the outcome; none of them is fatal.
#[instrument(skip(client, kind, manifest), fields(%kind))]
pub async fn repair<C>(
	client: &C,
	kind: ResourceKind,
	name: &str,
	manifest: &Manifest,
	namespace: &str,
) -> RepairOutcome
where
	C: ClusterApi + ?Sized,
{
	let resource = match locate(manifest, kind, name) {
		Some(Ok(resource)) => resource,
		Some(Err(err)) => {
			warn!(error = %err, "manifest document no longer decodes, retrying next cycle");
			return RepairOutcome::Undecodable(err);
		}
		None => {
			warn!("no manifest document declares this resource");
			return RepairOutcome::NotInManifest;
		}
	};

	info!("repairing missing resource");
	let result = match resource {
		TypedResource::Deployment(mut deployment) => {
			deployment.metadata.namespace = Some(namespace.to_string());
			client
				.create_deployment(namespace, &deployment)
				.await
				.map(drop)
		}
		TypedResource::Service(mut service) => {
			service.metadata.namespace = Some(namespace.to_string());
			client.create_service(namespace, &service).await.map(drop)
		}
		_ => {
			warn!("kind is not recreated");
			return RepairOutcome::UnsupportedKind;
		}
	};

	match result {
		Ok(()) => {
			info!("created");
			RepairOutcome::Created
		}
		Err(err) if err.is_already_exists() => {
			info!("already exists, waiting for it to show up in the listing");
			RepairOutcome::AlreadyExists
		}
		Err(err) => {
			warn!(error = %err, "create failed, retrying next cycle");
			RepairOutcome::Failed(err)
		}
	}
}
