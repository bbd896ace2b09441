//! Manifest parsing.
//!
//! A manifest is a multi-document yaml stream, as published by the projects
//! this tool heals. Every document is decoded into its k8s-openapi type, which
//! validates the `apiVersion`/`kind` pair. Only a fixed set of kinds is
//! accepted, and only Deployments and Services make up the desired state.

use std::{
	collections::BTreeMap,
	fmt,
	str::FromStr,
	sync::LazyLock,
};

use k8s_openapi::api::{
	apps::v1::Deployment,
	core::v1::{Service, ServiceAccount},
	rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding},
};
use regex::Regex;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, instrument, warn};

/// Matches a line consisting only of the yaml document separator.
static DOCUMENT_SEPARATOR: LazyLock<Regex> = LazyLock::new(|| {
	Regex::new(r"(?m)^---[ \t]*\r?$").expect("document separator pattern is valid")
});

/// Resource kinds accepted in a manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
	Role,
	ClusterRole,
	RoleBinding,
	ClusterRoleBinding,
	ServiceAccount,
	Deployment,
	Service,
}

impl ResourceKind {
	/// Kinds that are tracked in the desired state and healed, in repair order.
	pub const WATCHED: [Self; 2] = [Self::Deployment, Self::Service];

	pub fn as_str(self) -> &'static str {
		match self {
			Self::Role => "Role",
			Self::ClusterRole => "ClusterRole",
			Self::RoleBinding => "RoleBinding",
			Self::ClusterRoleBinding => "ClusterRoleBinding",
			Self::ServiceAccount => "ServiceAccount",
			Self::Deployment => "Deployment",
			Self::Service => "Service",
		}
	}

	pub fn is_watched(self) -> bool {
		Self::WATCHED.contains(&self)
	}
}

impl fmt::Display for ResourceKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unsupported resource kind `{0}`")]
pub struct UnsupportedKind(pub String);

impl FromStr for ResourceKind {
	type Err = UnsupportedKind;

	/// Kinds match exactly. `ServiceMonitor` is not a `Service`.
	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Ok(match s {
			"Role" => Self::Role,
			"ClusterRole" => Self::ClusterRole,
			"RoleBinding" => Self::RoleBinding,
			"ClusterRoleBinding" => Self::ClusterRoleBinding,
			"ServiceAccount" => Self::ServiceAccount,
			"Deployment" => Self::Deployment,
			"Service" => Self::Service,
			other => return Err(UnsupportedKind(other.to_string())),
		})
	}
}

/// A manifest document decoded into its concrete type.
#[derive(Debug, Clone)]
pub enum TypedResource {
	Role(Role),
	ClusterRole(ClusterRole),
	RoleBinding(RoleBinding),
	ClusterRoleBinding(ClusterRoleBinding),
	ServiceAccount(ServiceAccount),
	Deployment(Box<Deployment>),
	Service(Box<Service>),
}

impl TypedResource {
	/// Decode a document as the given kind.
	///
	/// k8s-openapi rejects documents whose `apiVersion` or `kind` do not
	/// belong to the target type, e.g. an `extensions/v1beta1` Deployment.
	pub fn decode(kind: ResourceKind, document: &str) -> Result<Self, serde_yaml::Error> {
		Ok(match kind {
			ResourceKind::Role => Self::Role(serde_yaml::from_str(document)?),
			ResourceKind::ClusterRole => Self::ClusterRole(serde_yaml::from_str(document)?),
			ResourceKind::RoleBinding => Self::RoleBinding(serde_yaml::from_str(document)?),
			ResourceKind::ClusterRoleBinding => {
				Self::ClusterRoleBinding(serde_yaml::from_str(document)?)
			}
			ResourceKind::ServiceAccount => Self::ServiceAccount(serde_yaml::from_str(document)?),
			ResourceKind::Deployment => Self::Deployment(Box::new(serde_yaml::from_str(document)?)),
			ResourceKind::Service => Self::Service(Box::new(serde_yaml::from_str(document)?)),
		})
	}

	pub fn kind(&self) -> ResourceKind {
		match self {
			Self::Role(_) => ResourceKind::Role,
			Self::ClusterRole(_) => ResourceKind::ClusterRole,
			Self::RoleBinding(_) => ResourceKind::RoleBinding,
			Self::ClusterRoleBinding(_) => ResourceKind::ClusterRoleBinding,
			Self::ServiceAccount(_) => ResourceKind::ServiceAccount,
			Self::Deployment(_) => ResourceKind::Deployment,
			Self::Service(_) => ResourceKind::Service,
		}
	}

	/// `metadata.name` of the resource.
	pub fn name(&self) -> Option<&str> {
		let metadata = match self {
			Self::Role(r) => &r.metadata,
			Self::ClusterRole(r) => &r.metadata,
			Self::RoleBinding(r) => &r.metadata,
			Self::ClusterRoleBinding(r) => &r.metadata,
			Self::ServiceAccount(r) => &r.metadata,
			Self::Deployment(r) => &r.metadata,
			Self::Service(r) => &r.metadata,
		};
		metadata.name.as_deref()
	}
}

/// Type discriminator and name of a document, read without decoding the body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentHeader {
	pub api_version: String,
	pub kind: String,
	#[serde(default)]
	metadata: HeaderMetadata,
}

#[derive(Debug, Default, Deserialize)]
struct HeaderMetadata {
	name: Option<String>,
}

impl DocumentHeader {
	pub fn read(document: &str) -> Result<Self, serde_yaml::Error> {
		serde_yaml::from_str(document)
	}

	pub fn name(&self) -> Option<&str> {
		self.metadata.name.as_deref()
	}
}

/// Outcome of decoding a single document.
#[derive(Debug)]
pub enum Decoded {
	Accepted(TypedResource),
	/// Well-formed document of a kind outside the accepted set.
	Unsupported(DocumentHeader),
}

/// Decode a document: header first, then the concrete type for accepted kinds.
pub fn decode_document(document: &str) -> Result<Decoded, serde_yaml::Error> {
	let header = DocumentHeader::read(document)?;
	match header.kind.parse::<ResourceKind>() {
		Ok(kind) => Ok(Decoded::Accepted(TypedResource::decode(kind, document)?)),
		Err(_) => Ok(Decoded::Unsupported(header)),
	}
}

/// Errors for individual documents. None of them stop parsing.
#[derive(Debug, Error)]
pub enum DocumentError {
	#[error("document #{index}: decoding failed")]
	Decode {
		index: usize,
		#[source]
		source: serde_yaml::Error,
	},

	#[error("document #{index}: {kind} has no metadata.name")]
	MissingName { index: usize, kind: ResourceKind },

	#[error("document #{index}: duplicate {kind} `{name}`, the first definition is kept")]
	Duplicate {
		index: usize,
		kind: ResourceKind,
		name: String,
	},
}

/// A resource the manifest declares, with the document it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceDocument {
	kind: ResourceKind,
	name: String,
	raw: String,
}

impl ResourceDocument {
	pub fn kind(&self) -> ResourceKind {
		self.kind
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	/// Document text as it appeared in the comment-stripped manifest.
	pub fn raw(&self) -> &str {
		&self.raw
	}
}

/// Resources that should exist, per kind, in manifest order.
///
/// Only built by [`Manifest::parse`] and never changed afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DesiredState {
	documents: BTreeMap<ResourceKind, Vec<ResourceDocument>>,
}

impl DesiredState {
	pub fn documents(&self, kind: ResourceKind) -> &[ResourceDocument] {
		self.documents.get(&kind).map_or(&[], Vec::as_slice)
	}

	pub fn names(&self, kind: ResourceKind) -> impl Iterator<Item = &str> {
		self.documents(kind).iter().map(ResourceDocument::name)
	}

	pub fn get(&self, kind: ResourceKind, name: &str) -> Option<&ResourceDocument> {
		self.documents(kind).iter().find(|doc| doc.name == name)
	}

	pub fn len(&self) -> usize {
		self.documents.values().map(Vec::len).sum()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	fn insert(&mut self, document: ResourceDocument) {
		self.documents
			.entry(document.kind)
			.or_default()
			.push(document);
	}
}

/// Result of parsing a manifest.
#[derive(Debug, Default)]
pub struct ParsedManifest {
	pub desired: DesiredState,
	pub errors: Vec<DocumentError>,
}

/// Manifest text with comments stripped, frozen for the lifetime of the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
	text: String,
}

impl Manifest {
	pub fn new(raw: &str) -> Self {
		Self {
			text: strip_comments(raw),
		}
	}

	pub fn text(&self) -> &str {
		&self.text
	}

	/// Non-blank documents, in order.
	pub fn documents(&self) -> impl Iterator<Item = &str> {
		split_documents(&self.text)
	}

	/// Build the desired state.
	///
	/// Broken documents and unsupported kinds are logged and skipped, the rest of
	/// the manifest is still used. When an identity is declared twice the first
	/// definition wins.
	#[instrument(skip_all)]
	pub fn parse(&self) -> ParsedManifest {
		let mut parsed = ParsedManifest::default();

		for (index, document) in self.documents().enumerate() {
			let resource = match decode_document(document) {
				Ok(Decoded::Accepted(resource)) => resource,
				Ok(Decoded::Unsupported(header)) => {
					warn!(
						index,
						kind = %header.kind,
						api_version = %header.api_version,
						"skipping document of unsupported kind"
					);
					continue;
				}
				Err(source) => {
					warn!(index, error = %source, "skipping undecodable document");
					parsed.errors.push(DocumentError::Decode { index, source });
					continue;
				}
			};

			let kind = resource.kind();
			if !kind.is_watched() {
				debug!(index, %kind, name = ?resource.name(), "accepted kind is not healed");
				continue;
			}

			let Some(name) = resource.name() else {
				warn!(index, %kind, "skipping document without a name");
				parsed
					.errors
					.push(DocumentError::MissingName { index, kind });
				continue;
			};

			if parsed.desired.get(kind, name).is_some() {
				warn!(index, %kind, name, "duplicate resource, keeping the first definition");
				parsed.errors.push(DocumentError::Duplicate {
					index,
					kind,
					name: name.to_string(),
				});
				continue;
			}

			debug!(index, %kind, name, "desired resource");
			parsed.desired.insert(ResourceDocument {
				kind,
				name: name.to_string(),
				raw: document.to_string(),
			});
		}

		parsed
	}
}

/// Split a manifest on `---` lines, dropping blank documents.
pub fn split_documents(text: &str) -> impl Iterator<Item = &str> {
	DOCUMENT_SEPARATOR
		.split(text)
		.filter(|document| !document.trim().is_empty())
}

/// Remove every line carrying a yaml comment.
///
/// A comment starts at a `#` at the beginning of a line or after whitespace; a
/// `#` inside a token such as `app#v1` is kept. A separator line with a
/// trailing comment is reduced to the bare separator.
pub fn strip_comments(text: &str) -> String {
	let mut out = String::with_capacity(text.len());
	for line in text.split_inclusive('\n') {
		if !has_comment(line) {
			out.push_str(line);
		} else if line.starts_with("---") && line[3..].trim_start().starts_with('#') {
			out.push_str("---\n");
		}
	}
	out
}

fn has_comment(line: &str) -> bool {
	let mut previous = None;
	for c in line.chars() {
		if c == '#' && previous.is_none_or(char::is_whitespace) {
			return true;
		}
		previous = Some(c);
	}
	false
}
