//! Kubernetes access for listing and recreating resources.
//!
//! This module provides native Kubernetes API access using kube-rs,
//! avoiding the need to shell out to kubectl.

pub mod api;
pub mod client;
