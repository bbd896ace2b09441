//! HTTP-based mock Kubernetes server using wiremock.
//!
//! This provides a real HTTP server that can be used with actual
//! kubeconfig-based connections. It serves `get`, `list` and `create` for the
//! types in [`MockCatalog`], answering errors with `Status` bodies the way the
//! API server does.

use std::{
	collections::BTreeMap,
	sync::{Arc, PoisonError, RwLock},
};

use bon::Builder;
use kube::config::{
	AuthInfo, Cluster, Context, Kubeconfig, NamedAuthInfo, NamedCluster, NamedContext,
};
use serde_json::{json, Value};
use tracing::{debug, trace};
use wiremock::{
	matchers::{method, path, path_regex},
	Mock, MockServer, Request, ResponseTemplate,
};

use super::catalog::MockCatalog;

/// Objects keyed by (collection path, name).
pub type SharedResources = Arc<RwLock<BTreeMap<(String, String), Value>>>;

const NAMESPACES: &str = "/api/v1/namespaces";

/// A mock Kubernetes server exposed over HTTP.
#[derive(Builder)]
pub struct HttpMockK8sServer {
	/// Objects present at startup as raw manifests. Their paths are derived
	/// from apiVersion/kind using the catalog.
	#[builder(default)]
	resources: Vec<Value>,
	/// Namespaces to create in addition to `default`.
	#[builder(default)]
	namespaces: Vec<String>,
	/// Names whose create is answered with a 500.
	#[builder(default)]
	failing_creates: Vec<String>,
	/// Plural resource names (e.g. `services`) whose list is answered with a 500.
	#[builder(default)]
	failing_lists: Vec<String>,
}

/// A running HTTP mock server instance.
pub struct RunningHttpMockK8sServer {
	server: MockServer,
	resources: SharedResources,
}

impl HttpMockK8sServer {
	/// Start the mock server with all configured resources.
	pub async fn start(self) -> RunningHttpMockK8sServer {
		let server = MockServer::start().await;
		let catalog = MockCatalog::default();

		debug!(uri = %server.uri(), "Started mock K8s server");

		let mut resources = BTreeMap::new();
		for namespace in std::iter::once("default").chain(self.namespaces.iter().map(String::as_str))
		{
			resources.insert(
				(NAMESPACES.to_string(), namespace.to_string()),
				json!({
					"apiVersion": "v1",
					"kind": "Namespace",
					"metadata": {"name": namespace}
				}),
			);
		}
		for manifest in self.resources {
			if let Some(key) = catalog.locate(&manifest) {
				trace!(collection = %key.0, name = %key.1, "Registered resource");
				resources.insert(key, manifest);
			}
		}

		let shared = Arc::new(RwLock::new(resources));

		mount_version(&server).await;
		mount_create(&server, &shared, self.failing_creates).await;
		mount_get(&server, &shared, self.failing_lists).await;

		RunningHttpMockK8sServer {
			server,
			resources: shared,
		}
	}
}

impl RunningHttpMockK8sServer {
	/// Get the server's URI (e.g., "http://127.0.0.1:12345").
	pub fn uri(&self) -> String {
		self.server.uri()
	}

	/// Create a Kubeconfig pointing to this mock server.
	pub fn kubeconfig(&self) -> Kubeconfig {
		self.kubeconfig_with_context("mock-context")
	}

	/// Create a Kubeconfig pointing to this mock server with a custom context name.
	pub fn kubeconfig_with_context(&self, context_name: &str) -> Kubeconfig {
		let cluster_name = "mock-cluster";
		let user_name = "mock-user";

		Kubeconfig {
			clusters: vec![NamedCluster {
				name: cluster_name.to_string(),
				cluster: Some(Cluster {
					server: Some(self.uri()),
					insecure_skip_tls_verify: Some(true),
					..Default::default()
				}),
			}],
			contexts: vec![NamedContext {
				name: context_name.to_string(),
				context: Some(Context {
					cluster: cluster_name.to_string(),
					user: Some(user_name.to_string()),
					namespace: Some("default".to_string()),
					..Default::default()
				}),
			}],
			auth_infos: vec![NamedAuthInfo {
				name: user_name.to_string(),
				auth_info: Some(AuthInfo::default()),
			}],
			current_context: Some(context_name.to_string()),
			..Default::default()
		}
	}

	/// Whether the object exists, e.g. `contains("/api/v1/namespaces/shop/services", "web")`.
	pub fn contains(&self, collection: &str, name: &str) -> bool {
		self.resources
			.read()
			.unwrap_or_else(PoisonError::into_inner)
			.contains_key(&(collection.to_string(), name.to_string()))
	}

	/// Delete an object behind the client's back.
	pub fn remove(&self, collection: &str, name: &str) -> Option<Value> {
		self.resources
			.write()
			.unwrap_or_else(PoisonError::into_inner)
			.remove(&(collection.to_string(), name.to_string()))
	}

	/// Every create request received so far, as (collection path, object name).
	pub async fn create_requests(&self) -> Vec<(String, String)> {
		self.server
			.received_requests()
			.await
			.unwrap_or_default()
			.into_iter()
			.filter(|req| req.method.as_str() == "POST")
			.map(|req| {
				let name = serde_json::from_slice::<Value>(&req.body)
					.ok()
					.and_then(|body| body.pointer("/metadata/name")?.as_str().map(str::to_string))
					.unwrap_or_default();
				(req.url.path().to_string(), name)
			})
			.collect()
	}
}

async fn mount_version(server: &MockServer) {
	Mock::given(method("GET"))
		.and(path("/version"))
		.respond_with(ResponseTemplate::new(200).set_body_json(json!({
			"major": "1",
			"minor": "31",
			"gitVersion": "v1.31.0",
			"gitCommit": "fake",
			"gitTreeState": "clean",
			"buildDate": "2024-08-13T00:00:00Z",
			"goVersion": "go1.22.5",
			"compiler": "gc",
			"platform": "linux/amd64"
		})))
		.mount(server)
		.await;
}

async fn mount_create(server: &MockServer, resources: &SharedResources, failing: Vec<String>) {
	let resources = Arc::clone(resources);

	Mock::given(method("POST"))
		.and(path_regex(r"^/api(s)?/.*"))
		.respond_with(move |req: &Request| {
			let Some(Target::Collection(collection)) = Target::parse(req.url.path()) else {
				return status(405, "MethodNotAllowed", "create is only allowed on collections");
			};
			let Ok(mut body) = serde_json::from_slice::<Value>(&req.body) else {
				return status(400, "BadRequest", "request body is not valid json");
			};
			let Some(name) = body
				.pointer("/metadata/name")
				.and_then(Value::as_str)
				.map(str::to_string)
			else {
				return status(422, "Invalid", "metadata.name: Required value");
			};

			if failing.contains(&name) {
				return status(500, "InternalError", &format!("injected failure creating {name}"));
			}

			let mut resources = resources.write().unwrap_or_else(PoisonError::into_inner);
			if let Some(namespace) = namespace_of(&collection) {
				if !resources.contains_key(&(NAMESPACES.to_string(), namespace.to_string())) {
					return status(404, "NotFound", &format!("namespaces \"{namespace}\" not found"));
				}
				if let Some(metadata) = body.get_mut("metadata").and_then(Value::as_object_mut) {
					metadata.insert("namespace".to_string(), json!(namespace));
				}
			}

			let key = (collection, name);
			if resources.contains_key(&key) {
				return status(409, "AlreadyExists", &format!("\"{}\" already exists", key.1));
			}
			trace!(collection = %key.0, name = %key.1, "Created resource");
			resources.insert(key, body.clone());

			ResponseTemplate::new(201).set_body_json(body)
		})
		.mount(server)
		.await;
}

async fn mount_get(server: &MockServer, resources: &SharedResources, failing: Vec<String>) {
	let resources = Arc::clone(resources);

	Mock::given(method("GET"))
		.and(path_regex(r"^/api(s)?/.*"))
		.respond_with(move |req: &Request| {
			let resources = resources.read().unwrap_or_else(PoisonError::into_inner);

			match Target::parse(req.url.path()) {
				Some(Target::Collection(collection)) => {
					let plural = collection.rsplit('/').next().unwrap_or_default();
					if failing.iter().any(|f| f == plural) {
						return status(500, "InternalError", &format!("injected failure listing {plural}"));
					}

					let items: Vec<_> = resources
						.iter()
						.filter(|((stored, _), _)| {
							*stored == collection
								|| cluster_wide_path(stored).is_some_and(|p| p == collection)
						})
						.map(|(_, v)| v.clone())
						.collect();

					ResponseTemplate::new(200).set_body_json(json!({
						"kind": "List",
						"apiVersion": "v1",
						"metadata": {"resourceVersion": "1"},
						"items": items
					}))
				}
				Some(Target::Object { collection, name }) => match resources.get(&(collection, name.clone())) {
					Some(object) => ResponseTemplate::new(200).set_body_json(object.clone()),
					None => status(404, "NotFound", &format!("\"{name}\" not found")),
				},
				None => status(404, "NotFound", "the server could not find the requested resource"),
			}
		})
		.mount(server)
		.await;
}

fn status(code: u16, reason: &str, message: &str) -> ResponseTemplate {
	ResponseTemplate::new(code).set_body_json(json!({
		"kind": "Status",
		"apiVersion": "v1",
		"metadata": {},
		"status": "Failure",
		"message": message,
		"reason": reason,
		"code": code
	}))
}

/// What a resource URL points at.
#[derive(Debug, PartialEq, Eq)]
enum Target {
	Collection(String),
	Object { collection: String, name: String },
}

impl Target {
	/// Classify an API path.
	///
	/// Examples:
	/// - `/api/v1/namespaces` -> collection
	/// - `/api/v1/namespaces/shop` -> object `shop` in `/api/v1/namespaces`
	/// - `/apis/apps/v1/namespaces/shop/deployments` -> collection
	/// - `/apis/apps/v1/namespaces/shop/deployments/web` -> object `web`
	/// - `/apis/apps/v1/deployments` -> collection (all namespaces)
	fn parse(path: &str) -> Option<Self> {
		let path = path.trim_end_matches('/');
		let segments: Vec<&str> = path.trim_start_matches('/').split('/').collect();
		let prefix = match segments.first()? {
			&"api" => 2,
			&"apis" => 3,
			_ => return None,
		};

		match segments.len().checked_sub(prefix)? {
			1 | 3 => Some(Self::Collection(path.to_string())),
			2 | 4 => {
				let (collection, name) = path.rsplit_once('/')?;
				Some(Self::Object {
					collection: collection.to_string(),
					name: name.to_string(),
				})
			}
			_ => None,
		}
	}
}

/// Namespace of a namespaced collection path.
fn namespace_of(collection: &str) -> Option<&str> {
	let (_, rest) = collection.split_once("/namespaces/")?;
	rest.split_once('/').map(|(namespace, _)| namespace)
}

/// Extract a cluster-wide path from a namespaced API path.
///
/// Examples:
/// - `/api/v1/namespaces/default/configmaps` -> Some(`/api/v1/configmaps`)
/// - `/apis/apps/v1/namespaces/default/deployments` -> Some(`/apis/apps/v1/deployments`)
/// - `/api/v1/namespaces` -> None (already cluster-wide for namespaces)
fn cluster_wide_path(path: &str) -> Option<String> {
	let (before, after) = path.split_once("/namespaces/")?;
	let slash = after.find('/')?;
	Some(format!("{before}{}", &after[slash..]))
}
