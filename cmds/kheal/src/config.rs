//! Runtime configuration.
//!
//! Settings come from the command line. The kubeconfig path falls back to the
//! environment and then to the conventional location in the home directory.

use std::{
	env,
	ffi::OsString,
	fmt,
	path::{Path, PathBuf},
	time::Duration,
};

use thiserror::Error;

use crate::source::ManifestLocation;

/// Environment variable consulted when `--kubeconfig` is not given.
pub const KUBECONFIG_ENV: &str = "KUBECONFIG";

/// Where the kubeconfig path came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KubeconfigSource {
	Flag,
	Env,
	Home,
}

impl fmt::Display for KubeconfigSource {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			KubeconfigSource::Flag => write!(f, "--kubeconfig"),
			KubeconfigSource::Env => write!(f, "${KUBECONFIG_ENV}"),
			KubeconfigSource::Home => write!(f, "home directory"),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedKubeconfig {
	pub path: PathBuf,
	pub source: KubeconfigSource,
}

#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("kubeconfig not found at {} (from {origin}), use --kubeconfig", path.display())]
	NotFound {
		path: PathBuf,
		origin: KubeconfigSource,
	},

	#[error("no kubeconfig given and $HOME is not set, use --kubeconfig")]
	NoHome,
}

/// Pick the kubeconfig file: flag, then environment, then `~/.kube/config`.
///
/// `$KUBECONFIG` may hold a path list; its first entry is used. The chosen
/// file must exist.
pub fn resolve_kubeconfig(
	flag: Option<&Path>,
	env_value: Option<OsString>,
	home: Option<OsString>,
) -> Result<ResolvedKubeconfig, ConfigError> {
	let env_path = env_value
		.as_deref()
		.and_then(|value| env::split_paths(value).find(|p| !p.as_os_str().is_empty()));

	let resolved = if let Some(path) = flag {
		ResolvedKubeconfig {
			path: path.to_path_buf(),
			source: KubeconfigSource::Flag,
		}
	} else if let Some(path) = env_path {
		ResolvedKubeconfig {
			path,
			source: KubeconfigSource::Env,
		}
	} else {
		let home = home.filter(|h| !h.is_empty()).ok_or(ConfigError::NoHome)?;
		ResolvedKubeconfig {
			path: PathBuf::from(home).join(".kube").join("config"),
			source: KubeconfigSource::Home,
		}
	};

	if !resolved.path.is_file() {
		return Err(ConfigError::NotFound {
			path: resolved.path,
			origin: resolved.source,
		});
	}
	Ok(resolved)
}

/// [`resolve_kubeconfig`] against the process environment.
pub fn resolve_kubeconfig_from_env(flag: Option<&Path>) -> Result<ResolvedKubeconfig, ConfigError> {
	resolve_kubeconfig(flag, env::var_os(KUBECONFIG_ENV), env::var_os("HOME"))
}

/// Everything the watch command needs to start.
#[derive(Debug, Clone)]
pub struct WatchSettings {
	pub namespace: String,
	pub manifest: ManifestLocation,
	pub interval: Duration,
	pub kubeconfig: Option<PathBuf>,
}
