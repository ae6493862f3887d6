//! Model asset resolution
//!
//! A model is named either by a local path or by an http(s) URL. Remote
//! models are downloaded once into the cache directory and reused on later
//! runs.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Where a model file lives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ModelAsset {
    Local(PathBuf),
    Remote(String),
}

impl From<String> for ModelAsset {
    fn from(value: String) -> Self {
        if value.starts_with("https://") || value.starts_with("http://") {
            ModelAsset::Remote(value)
        } else {
            ModelAsset::Local(PathBuf::from(value))
        }
    }
}

impl From<ModelAsset> for String {
    fn from(asset: ModelAsset) -> Self {
        match asset {
            ModelAsset::Local(path) => path.to_string_lossy().into_owned(),
            ModelAsset::Remote(url) => url,
        }
    }
}

impl fmt::Display for ModelAsset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelAsset::Local(path) => write!(f, "{}", path.display()),
            ModelAsset::Remote(url) => write!(f, "{}", url),
        }
    }
}

impl ModelAsset {
    /// Resolve a relative local path against `base`
    pub fn relative_to(self, base: &Path) -> Self {
        match self {
            ModelAsset::Local(path) if path.is_relative() => ModelAsset::Local(base.join(path)),
            other => other,
        }
    }
}

/// Errors resolving a model asset
#[derive(Debug, thiserror::Error)]
pub enum AssetError {
    #[error("model file not found: {0}")]
    NotFound(PathBuf),

    #[error("model URL has no file name: {0}")]
    InvalidUrl(String),

    #[error("failed to download {url}: {source}")]
    Download {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("model cache I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Download cache for remote model assets
#[derive(Debug, Clone)]
pub struct AssetCache {
    dir: PathBuf,
}

impl AssetCache {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Local path a URL is cached at
    pub fn cached_path(&self, url: &str) -> Result<PathBuf, AssetError> {
        let without_query = url.split(['?', '#']).next().unwrap_or(url);
        let name = without_query
            .rsplit('/')
            .next()
            .filter(|name| !name.is_empty() && !name.contains(':'))
            .ok_or_else(|| AssetError::InvalidUrl(url.to_string()))?;
        Ok(self.dir.join(name))
    }

    /// Return a local path for the asset, downloading it if needed
    pub async fn resolve(&self, asset: &ModelAsset) -> Result<PathBuf, AssetError> {
        match asset {
            ModelAsset::Local(path) => {
                if tokio::fs::try_exists(path).await? {
                    Ok(path.clone())
                } else {
                    Err(AssetError::NotFound(path.clone()))
                }
            }
            ModelAsset::Remote(url) => {
                let path = self.cached_path(url)?;
                if tokio::fs::try_exists(&path).await? {
                    debug!(path = %path.display(), "model already cached");
                    return Ok(path);
                }
                self.download(url, &path).await?;
                Ok(path)
            }
        }
    }

    async fn download(&self, url: &str, path: &Path) -> Result<(), AssetError> {
        info!(%url, "downloading model");
        let download_error = |source| AssetError::Download {
            url: url.to_string(),
            source,
        };

        let bytes = reqwest::get(url)
            .await
            .and_then(|response| response.error_for_status())
            .map_err(download_error)?
            .bytes()
            .await
            .map_err(download_error)?;

        tokio::fs::create_dir_all(&self.dir).await?;
        // Write beside the target, then rename so a partial download is
        // never mistaken for a cached model.
        let partial = path.with_extension("part");
        tokio::fs::write(&partial, &bytes).await?;
        tokio::fs::rename(&partial, path).await?;

        info!(path = %path.display(), bytes = bytes.len(), "model cached");
        Ok(())
    }
}
