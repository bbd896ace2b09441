//! Desired-vs-live comparison.

use std::{
	borrow::Borrow,
	collections::{BTreeMap, HashMap, HashSet},
	hash::Hash,
};

use crate::manifest::{DesiredState, ResourceKind};

/// Names found in the namespace during one cycle.
///
/// A kind is absent when its listing failed; drift for that kind is unknown
/// rather than total.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LiveState {
	names: HashMap<ResourceKind, HashSet<String>>,
}

impl LiveState {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn record(&mut self, kind: ResourceKind, names: impl IntoIterator<Item = String>) {
		self.names.entry(kind).or_default().extend(names);
	}

	pub fn names(&self, kind: ResourceKind) -> Option<&HashSet<String>> {
		self.names.get(&kind)
	}
}

/// Every element of `desired` that is not in `live`, in `desired` order.
///
/// Duplicates in `desired` are kept.
pub fn detect_drift<'a, D, L>(
	desired: impl IntoIterator<Item = &'a D>,
	live: &HashSet<L>,
) -> Vec<&'a D>
where
	D: Hash + Eq + ?Sized + 'a,
	L: Borrow<D> + Hash + Eq,
{
	desired
		.into_iter()
		.filter(|item| !live.contains(*item))
		.collect()
}

/// Missing names per kind for one cycle.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct DriftSet<'a> {
	missing: BTreeMap<ResourceKind, Vec<&'a str>>,
}

impl<'a> DriftSet<'a> {
	/// Compare each watched kind independently. Kinds without a live listing
	/// are left out.
	pub fn compute(desired: &'a DesiredState, live: &LiveState) -> Self {
		let missing = ResourceKind::WATCHED
			.into_iter()
			.filter_map(|kind| {
				let live = live.names(kind)?;
				Some((kind, detect_drift(desired.names(kind), live)))
			})
			.filter(|(_, names)| !names.is_empty())
			.collect();
		Self { missing }
	}

	pub fn missing(&self, kind: ResourceKind) -> &[&'a str] {
		self.missing.get(&kind).map_or(&[], Vec::as_slice)
	}

	/// All drifted identities, Deployments first.
	pub fn iter(&self) -> impl Iterator<Item = (ResourceKind, &'a str)> + '_ {
		ResourceKind::WATCHED
			.into_iter()
			.flat_map(|kind| self.missing(kind).iter().map(move |name| (kind, *name)))
	}

	pub fn len(&self) -> usize {
		self.missing.values().map(Vec::len).sum()
	}

	pub fn is_empty(&self) -> bool {
		self.missing.is_empty()
	}
}
