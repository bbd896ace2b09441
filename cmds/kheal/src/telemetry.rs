//! Tracing setup.

use std::io::IsTerminal;

use anyhow::{anyhow, Result};
use tracing::Level;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Build the filter for the given level.
///
/// Priority for log level:
/// 1. `log_level` argument (from --log-level CLI flag)
/// 2. `RUST_LOG` environment variable
/// 3. Default: info
pub fn filter(log_level: Option<Level>) -> EnvFilter {
	match log_level {
		Some(level) => EnvFilter::new(level.as_str()),
		None => EnvFilter::builder()
			.with_default_directive(Level::INFO.into())
			.from_env_lossy(),
	}
}

/// Install the global subscriber, writing to stderr.
///
/// Output is pretty when stderr is a terminal and JSON otherwise, so the
/// controller's events can be shipped as-is when it runs inside a pod.
pub fn init(log_level: Option<Level>) -> Result<()> {
	let fmt_layer = if std::io::stderr().is_terminal() {
		tracing_subscriber::fmt::layer()
			.with_writer(std::io::stderr)
			.pretty()
			.boxed()
	} else {
		tracing_subscriber::fmt::layer()
			.with_writer(std::io::stderr)
			.json()
			.boxed()
	};

	tracing_subscriber::registry()
		.with(filter(log_level))
		.with(fmt_layer)
		.try_init()
		.map_err(|err| anyhow!("installing tracing subscriber: {err}"))
}
