pub mod config;
pub mod drift;
pub mod k8s;
pub mod manifest;
pub mod reconcile;
pub mod repair;
pub mod source;
pub mod telemetry;
#[cfg(test)]
pub mod test_utils;
pub mod watch;
