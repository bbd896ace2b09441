//! Resource types known to the mock server.

/// A served resource type.
#[derive(Debug, Clone)]
pub struct ApiResource {
	/// `v1` for the core group, `group/version` otherwise.
	pub api_version: &'static str,
	pub kind: &'static str,
	pub plural: &'static str,
	pub namespaced: bool,
}

impl ApiResource {
	/// Collection path, for namespaced types within `namespace`.
	pub fn collection_path(&self, namespace: &str) -> String {
		let root = if self.api_version.contains('/') {
			format!("/apis/{}", self.api_version)
		} else {
			format!("/api/{}", self.api_version)
		};
		if self.namespaced {
			format!("{root}/namespaces/{namespace}/{}", self.plural)
		} else {
			format!("{root}/{}", self.plural)
		}
	}
}

/// The resource types the server knows how to place.
pub struct MockCatalog {
	resources: Vec<ApiResource>,
}

const fn namespaced(
	api_version: &'static str,
	kind: &'static str,
	plural: &'static str,
) -> ApiResource {
	ApiResource {
		api_version,
		kind,
		plural,
		namespaced: true,
	}
}

impl Default for MockCatalog {
	fn default() -> Self {
		Self {
			resources: vec![
				namespaced("v1", "ConfigMap", "configmaps"),
				namespaced("v1", "Service", "services"),
				namespaced("v1", "ServiceAccount", "serviceaccounts"),
				namespaced("v1", "Pod", "pods"),
				ApiResource {
					api_version: "v1",
					kind: "Namespace",
					plural: "namespaces",
					namespaced: false,
				},
				namespaced("apps/v1", "Deployment", "deployments"),
				namespaced("apps/v1", "StatefulSet", "statefulsets"),
			],
		}
	}
}

impl MockCatalog {
	pub fn find(&self, api_version: &str, kind: &str) -> Option<&ApiResource> {
		self.resources
			.iter()
			.find(|r| r.api_version == api_version && r.kind == kind)
	}

	/// Place a raw object: its collection path and name.
	pub fn locate(&self, object: &serde_json::Value) -> Option<(String, String)> {
		let api_version = object.get("apiVersion")?.as_str()?;
		let kind = object.get("kind")?.as_str()?;
		let metadata = object.get("metadata")?;
		let name = metadata.get("name")?.as_str()?.to_string();
		let namespace = metadata
			.get("namespace")
			.and_then(|n| n.as_str())
			.unwrap_or("default");

		let resource = self.find(api_version, kind)?;
		Some((resource.collection_path(namespace), name))
	}
}
