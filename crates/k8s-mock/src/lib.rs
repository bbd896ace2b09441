//! Mock Kubernetes API server for testing.
//!
//! Provides an HTTP server that can be used with kubeconfig-based connections.
//! It keeps the objects it is given plus everything created through it, so a
//! client can list, fetch and create resources as it would against a cluster.

pub mod catalog;
pub mod http;

pub use catalog::{ApiResource, MockCatalog};
pub use http::{HttpMockK8sServer, RunningHttpMockK8sServer};
