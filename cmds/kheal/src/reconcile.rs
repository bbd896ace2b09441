//! The watch loop: query live state, detect drift, repair, wait.

use std::{future::Future, time::Duration};

use tracing::{debug, info, instrument, warn};

use crate::{
	drift::{DriftSet, LiveState},
	k8s::api::{ApiError, ClusterApi},
	manifest::{DesiredState, Manifest, ResourceKind},
	repair::{repair, RepairOutcome},
};

/// Wait between two reconciliation cycles.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);

/// One repair attempt made during a cycle.
#[derive(Debug)]
pub struct Repair {
	pub kind: ResourceKind,
	pub name: String,
	pub outcome: RepairOutcome,
}

/// Summary of a single cycle.
#[derive(Debug, Default)]
pub struct CycleReport {
	/// Identities found missing, in repair order.
	pub drifted: Vec<(ResourceKind, String)>,
	pub repairs: Vec<Repair>,
	/// Kinds whose listing failed; their drift is unknown for this cycle.
	pub unlisted: Vec<ResourceKind>,
}

impl CycleReport {
	pub fn created(&self) -> usize {
		self.repairs.iter().filter(|r| r.outcome.is_created()).count()
	}

	pub fn failed(&self) -> usize {
		self.repairs.iter().filter(|r| r.outcome.is_failure()).count()
	}

	/// Nothing was missing and every kind could be listed.
	pub fn is_converged(&self) -> bool {
		self.drifted.is_empty() && self.unlisted.is_empty()
	}
}

/// Heals a single namespace towards the manifest it was built from.
///
/// The desired state and manifest text are fixed at construction and only
/// read afterwards, so a resource that fails to come back is retried on every
/// cycle until it shows up in the listing.
pub struct Reconciler<C> {
	client: C,
	namespace: String,
	manifest: Manifest,
	desired: DesiredState,
	interval: Duration,
}

impl<C: ClusterApi> Reconciler<C> {
	pub fn new(
		client: C,
		namespace: impl Into<String>,
		manifest: Manifest,
		desired: DesiredState,
	) -> Self {
		Self {
			client,
			namespace: namespace.into(),
			manifest,
			desired,
			interval: DEFAULT_INTERVAL,
		}
	}

	#[must_use]
	pub fn with_interval(mut self, interval: Duration) -> Self {
		self.interval = interval;
		self
	}

	pub fn client(&self) -> &C {
		&self.client
	}

	pub fn namespace(&self) -> &str {
		&self.namespace
	}

	pub fn desired(&self) -> &DesiredState {
		&self.desired
	}

	pub fn interval(&self) -> Duration {
		self.interval
	}

	/// List every watched kind. A failed listing leaves its kind out.
	pub async fn query_live(&self) -> (LiveState, Vec<(ResourceKind, ApiError)>) {
		let mut live = LiveState::new();
		let mut errors = Vec::new();

		for kind in ResourceKind::WATCHED {
			let names: Result<Vec<String>, ApiError> = match kind {
				ResourceKind::Deployment => self
					.client
					.list_deployments(&self.namespace)
					.await
					.map(|items| items.into_iter().filter_map(|d| d.metadata.name).collect()),
				ResourceKind::Service => self
					.client
					.list_services(&self.namespace)
					.await
					.map(|items| items.into_iter().filter_map(|s| s.metadata.name).collect()),
				_ => continue,
			};

			match names {
				Ok(names) => live.record(kind, names),
				Err(err) => errors.push((kind, err)),
			}
		}

		(live, errors)
	}

	/// Run one query → detect → repair pass.
	#[instrument(skip(self), fields(namespace = %self.namespace))]
	pub async fn run_cycle(&self) -> CycleReport {
		let mut report = CycleReport::default();

		let (live, errors) = self.query_live().await;
		for (kind, err) in errors {
			warn!(%kind, error = %err, "listing failed, skipping this kind until the next cycle");
			report.unlisted.push(kind);
		}

		let drift = DriftSet::compute(&self.desired, &live);
		if drift.is_empty() {
			debug!("no drift");
		} else {
			info!(missing = drift.len(), "drift detected");
		}

		for (kind, name) in drift.iter() {
			report.drifted.push((kind, name.to_string()));
			let outcome = repair(&self.client, kind, name, &self.manifest, &self.namespace).await;
			report.repairs.push(Repair {
				kind,
				name: name.to_string(),
				outcome,
			});
		}

		report
	}

	/// Run cycles until `shutdown` completes.
	///
	/// The wait between cycles is where shutdown is observed; a cycle that has
	/// started always runs to completion.
	pub async fn run(&self, shutdown: impl Future<Output = ()>) {
		tokio::pin!(shutdown);
		info!(
			namespace = %self.namespace,
			desired = self.desired.len(),
			interval = ?self.interval,
			"starting watch loop"
		);

		loop {
			let report = self.run_cycle().await;
			if !report.drifted.is_empty() {
				info!(
					drifted = report.drifted.len(),
					created = report.created(),
					failed = report.failed(),
					"cycle finished"
				);
			}

			tokio::select! {
				() = &mut shutdown => {
					info!("stopping watch loop");
					break;
				}
				() = tokio::time::sleep(self.interval) => {}
			}
		}
	}
}
