//! End-to-end healing against the HTTP mock server.
//!
//! Each test seeds a namespace, builds a reconciler from the shop manifest and
//! checks which create calls reach the API server.

use std::time::Duration;

use indoc::indoc;
use k8s_mock::{HttpMockK8sServer, RunningHttpMockK8sServer};
use kheal::{
	config::WatchSettings,
	k8s::client::ClusterConnection,
	manifest::{Manifest, ResourceKind},
	reconcile::Reconciler,
	source::ManifestLocation,
	watch,
};

const SHOP_MANIFEST: &str = include_str!("fixtures/shop.yaml");
const DEPLOYMENTS: &str = "/apis/apps/v1/namespaces/shop/deployments";
const SERVICES: &str = "/api/v1/namespaces/shop/services";

fn deployment(name: &str) -> serde_json::Value {
	serde_json::json!({
		"apiVersion": "apps/v1",
		"kind": "Deployment",
		"metadata": {"name": name, "namespace": "shop"}
	})
}

fn service(name: &str) -> serde_json::Value {
	serde_json::json!({
		"apiVersion": "v1",
		"kind": "Service",
		"metadata": {"name": name, "namespace": "shop"}
	})
}

fn all_services() -> Vec<serde_json::Value> {
	vec![service("frontend"), service("cartservice"), service("redis-cart")]
}

async fn shop_server(
	resources: Vec<serde_json::Value>,
	failing_creates: Vec<String>,
) -> RunningHttpMockK8sServer {
	HttpMockK8sServer::builder()
		.namespaces(vec!["shop".to_string()])
		.resources(resources)
		.failing_creates(failing_creates)
		.build()
		.start()
		.await
}

async fn shop_reconciler(server: &RunningHttpMockK8sServer) -> Reconciler<ClusterConnection> {
	let conn = ClusterConnection::from_kubeconfig(server.kubeconfig())
		.await
		.expect("connection should succeed");
	let manifest = Manifest::new(SHOP_MANIFEST);
	let desired = manifest.parse().desired;
	Reconciler::new(conn, "shop", manifest, desired)
}

fn create(collection: &str, name: &str) -> (String, String) {
	(collection.to_string(), name.to_string())
}

#[tokio::test]
async fn test_missing_deployment_is_created_once() {
	let mut seeded = all_services();
	seeded.push(deployment("frontend"));
	let server = shop_server(seeded, vec![]).await;
	let reconciler = shop_reconciler(&server).await;

	let report = reconciler.run_cycle().await;

	assert_eq!(
		report.drifted,
		vec![(ResourceKind::Deployment, "cartservice".to_string())]
	);
	assert_eq!(report.created(), 1);
	assert_eq!(
		server.create_requests().await,
		vec![create(DEPLOYMENTS, "cartservice")]
	);
	assert!(server.contains(DEPLOYMENTS, "cartservice"));
}

#[tokio::test]
async fn test_converged_namespace_is_left_alone() {
	let mut seeded = all_services();
	seeded.extend([deployment("frontend"), deployment("cartservice")]);
	let server = shop_server(seeded, vec![]).await;
	let reconciler = shop_reconciler(&server).await;

	let report = reconciler.run_cycle().await;

	assert!(report.is_converged());
	assert!(server.create_requests().await.is_empty());
}

#[tokio::test]
async fn test_failed_service_create_is_retried() {
	let seeded = vec![
		deployment("frontend"),
		deployment("cartservice"),
		service("frontend"),
		service("cartservice"),
	];
	let server = shop_server(seeded, vec!["redis-cart".to_string()]).await;
	let reconciler = shop_reconciler(&server).await;

	let first = reconciler.run_cycle().await;
	let second = reconciler.run_cycle().await;

	assert_eq!(first.failed(), 1);
	assert_eq!(second.failed(), 1);
	assert_eq!(
		server.create_requests().await,
		vec![create(SERVICES, "redis-cart"), create(SERVICES, "redis-cart")]
	);
}

#[tokio::test]
async fn test_deleted_deployment_comes_back() {
	let server = shop_server(vec![], vec![]).await;
	let reconciler = shop_reconciler(&server).await;

	let first = reconciler.run_cycle().await;
	assert_eq!(first.created(), 5);
	assert!(reconciler.run_cycle().await.is_converged());

	assert!(server.remove(DEPLOYMENTS, "frontend").is_some());
	let report = reconciler.run_cycle().await;

	assert_eq!(
		report.drifted,
		vec![(ResourceKind::Deployment, "frontend".to_string())]
	);
	assert!(server.contains(DEPLOYMENTS, "frontend"));
}

#[tokio::test]
async fn test_prepare_ignores_unrecognized_kinds() {
	let server = shop_server(vec![], vec![]).await;
	let conn = ClusterConnection::from_kubeconfig(server.kubeconfig())
		.await
		.unwrap();
	let dir = tempfile::tempdir().unwrap();
	let file = dir.path().join("manifest.yaml");
	std::fs::write(
		&file,
		indoc! {"
			apiVersion: v1
			kind: ConfigMap
			metadata:
			  name: settings
			data:
			  mode: demo
			---
			apiVersion: v1
			kind: Service
			metadata:
			  name: web
			spec:
			  ports:
			  - port: 80
		"},
	)
	.unwrap();
	let settings = WatchSettings {
		namespace: "shop".to_string(),
		manifest: ManifestLocation::Local(file),
		interval: Duration::from_secs(10),
		kubeconfig: None,
	};

	let reconciler = watch::prepare(conn, &settings).await.unwrap();

	assert_eq!(reconciler.desired().len(), 1);
	assert_eq!(
		reconciler.desired().names(ResourceKind::Service).collect::<Vec<_>>(),
		vec!["web"]
	);

	reconciler.run(std::future::ready(())).await;
	assert_eq!(server.create_requests().await, vec![create(SERVICES, "web")]);
}

#[tokio::test]
async fn test_prepare_rejects_unknown_namespace() {
	let server = HttpMockK8sServer::builder().build().start().await;
	let conn = ClusterConnection::from_kubeconfig(server.kubeconfig())
		.await
		.unwrap();
	let settings = WatchSettings {
		namespace: "shop".to_string(),
		manifest: ManifestLocation::Local("unused.yaml".into()),
		interval: Duration::from_secs(10),
		kubeconfig: None,
	};

	assert!(watch::prepare(conn, &settings).await.is_err());
}
