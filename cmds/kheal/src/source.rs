//! Manifest acquisition.
//!
//! Remote manifests are downloaded to a transient file and read back, local
//! ones are read directly. Either way the result is fetched once at startup.

use std::{
	fmt,
	path::{Path, PathBuf},
	str::FromStr,
};

use thiserror::Error;
use tracing::{debug, instrument};

/// Release manifest of the microservices demo application.
pub const DEFAULT_MANIFEST_URL: &str = "https://raw.githubusercontent.com/GoogleCloudPlatform/microservices-demo/master/release/kubernetes-manifests.yaml";

#[derive(Debug, Error)]
pub enum SourceError {
	#[error("fetching {url}")]
	Fetch {
		url: String,
		#[source]
		source: reqwest::Error,
	},

	#[error("accessing {}", path.display())]
	Io {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("manifest {0} is not valid utf-8")]
	Encoding(String),
}

/// Where the manifest is read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestLocation {
	Remote(String),
	Local(PathBuf),
}

impl FromStr for ManifestLocation {
	type Err = std::convert::Infallible;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Ok(if s.starts_with("http://") || s.starts_with("https://") {
			Self::Remote(s.to_string())
		} else {
			Self::Local(PathBuf::from(s))
		})
	}
}

impl fmt::Display for ManifestLocation {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ManifestLocation::Remote(url) => f.write_str(url),
			ManifestLocation::Local(path) => write!(f, "{}", path.display()),
		}
	}
}

/// Read the manifest text.
#[instrument(skip_all, fields(location = %location))]
pub async fn fetch(location: &ManifestLocation) -> Result<String, SourceError> {
	match location {
		ManifestLocation::Remote(url) => {
			let path = transient_path();
			download(url, &path).await?;
			let text = read(&path).await;
			if let Err(err) = tokio::fs::remove_file(&path).await {
				debug!(path = %path.display(), error = %err, "failed to remove downloaded manifest");
			}
			text
		}
		ManifestLocation::Local(path) => read(path).await,
	}
}

fn transient_path() -> PathBuf {
	std::env::temp_dir().join(format!("kheal-manifest-{}.yaml", std::process::id()))
}

async fn download(url: &str, dest: &Path) -> Result<(), SourceError> {
	let fetch_error = |source| SourceError::Fetch {
		url: url.to_string(),
		source,
	};

	let response = reqwest::get(url)
		.await
		.and_then(reqwest::Response::error_for_status)
		.map_err(fetch_error)?;
	let body = response.bytes().await.map_err(fetch_error)?;
	debug!(bytes = body.len(), path = %dest.display(), "downloaded manifest");

	tokio::fs::write(dest, &body)
		.await
		.map_err(|source| SourceError::Io {
			path: dest.to_path_buf(),
			source,
		})
}

async fn read(path: &Path) -> Result<String, SourceError> {
	let bytes = tokio::fs::read(path)
		.await
		.map_err(|source| SourceError::Io {
			path: path.to_path_buf(),
			source,
		})?;
	String::from_utf8(bytes).map_err(|_| SourceError::Encoding(path.display().to_string()))
}
