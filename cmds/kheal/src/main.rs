use std::{future::Future, io, path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use kheal::{
	config::WatchSettings,
	source::{ManifestLocation, DEFAULT_MANIFEST_URL},
	telemetry, watch,
};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "kheal")]
#[command(about = "Recreate Deployments and Services that went missing from a namespace")]
#[command(version)]
struct Cli {
	/// Namespace to watch
	namespace: String,

	/// Path to the kubeconfig file (defaults to $KUBECONFIG, then ~/.kube/config)
	#[arg(long)]
	kubeconfig: Option<PathBuf>,

	/// Manifest describing the desired state, as an http(s) URL or a local path
	#[arg(long, default_value = DEFAULT_MANIFEST_URL)]
	manifest: ManifestLocation,

	/// Seconds to wait between reconciliation cycles
	#[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u64).range(1..))]
	interval_secs: u64,

	/// Log level (overrides RUST_LOG)
	#[arg(long)]
	log_level: Option<tracing::Level>,
}

impl From<Cli> for WatchSettings {
	fn from(cli: Cli) -> Self {
		Self {
			namespace: cli.namespace,
			manifest: cli.manifest,
			interval: Duration::from_secs(cli.interval_secs),
			kubeconfig: cli.kubeconfig,
		}
	}
}

fn main() -> Result<()> {
	let cli = Cli::parse();
	telemetry::init(cli.log_level)?;

	tokio::runtime::Builder::new_multi_thread()
		.enable_all()
		.build()
		.context("failed to build tokio runtime")?
		.block_on(watch::run(cli.into(), shutdown_signal()))
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
	let sigterm = async {
		let mut signal =
			tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
		signal.recv().await;
		Ok::<_, io::Error>(())
	};

	first_signal(tokio::signal::ctrl_c(), sigterm).await;
}

/// Resolves when either listener reports its signal.
///
/// A listener that fails is logged and never fires, so if both fail this
/// never resolves and the watch runs until the process is killed.
async fn first_signal(
	sigint: impl Future<Output = io::Result<()>>,
	sigterm: impl Future<Output = io::Result<()>>,
) {
	tokio::select! {
		() = listen("SIGINT", sigint) => {}
		() = listen("SIGTERM", sigterm) => {}
	}
}

async fn listen(name: &str, signal: impl Future<Output = io::Result<()>>) {
	match signal.await {
		Ok(()) => info!(signal = name, "received shutdown signal"),
		Err(err) => {
			warn!(signal = name, error = %err, "failed to listen for signal");
			std::future::pending::<()>().await;
		}
	}
}
