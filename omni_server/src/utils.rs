//! Utility functions
//!
use std::{
    fs::File,
    io::Cursor,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use reqwest::Client;

/// Download a file from a URL to a given filepath.
pub async fn download_file(
    client: &Client,
    url: &str,
    filepath: impl AsRef<std::path::Path>,
) -> Result<()> {
    let resp = client.get(url).send().await?.error_for_status()?;

    let mut file = File::create(filepath)?;
    let mut content = Cursor::new(resp.bytes().await?);
    std::io::copy(&mut content, &mut file)?;

    Ok(())
}

/// Directory for downloaded models.
pub fn model_cache_dir() -> Option<PathBuf> {
    dirs::cache_dir().map(|dir| dir.join("omni_recognition"))
}

/// Find the model file, downloading it into the cache directory if needed.
///
/// An existing `path` always wins. Otherwise the file is looked up by name in the
/// cache directory and fetched from `url` when missing there too.
pub async fn resolve_model_file(path: &Path, url: Option<&str>) -> Result<PathBuf> {
    if path.exists() {
        return Ok(path.to_owned());
    }

    let Some(url) = url else {
        bail!("model file {} not found", path.display());
    };

    let file_name = path
        .file_name()
        .with_context(|| format!("model path {} has no file name", path.display()))?;
    let cache_dir = model_cache_dir().context("no cache directory available")?;
    let cached = cache_dir.join(file_name);
    if cached.exists() {
        log::info!("Using cached model {}", cached.display());
        return Ok(cached);
    }

    std::fs::create_dir_all(&cache_dir)?;
    log::info!("Downloading model from {url} to {}", cached.display());

    // Download next to the target and move it in place once complete
    let partial = cached.with_extension("part");
    download_file(&Client::new(), url, &partial).await?;
    std::fs::rename(&partial, &cached)?;

    Ok(cached)
}
