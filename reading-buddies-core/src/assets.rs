//! Asset fetching.
//!
//! Config JSON, catalogs and audio files are all read through an
//! [`AssetSource`], addressed by absolute web-style paths such as
//! `/public/assets/audio/index.json`.

use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

/// Something that can fetch asset bytes by path.
#[async_trait]
pub trait AssetSource: Send + Sync {
    /// Fetch the raw bytes at `path`.
    async fn fetch(&self, path: &str) -> Result<Vec<u8>>;
}

/// Fetch `path` and decode it as JSON.
///
/// # Errors
///
/// Returns `Error::AssetFetch` if the asset is unavailable and
/// `Error::AssetParse` if it does not match `T`.
pub async fn fetch_json<T: DeserializeOwned>(source: &dyn AssetSource, path: &str) -> Result<T> {
    let bytes = source.fetch(path).await?;
    serde_json::from_slice(&bytes).map_err(|source| Error::AssetParse {
        path: path.to_string(),
        source,
    })
}

/// Assets served from a directory on disk.
///
/// `/public/assets/x.json` resolves to `<root>/public/assets/x.json`.
#[derive(Debug, Clone)]
pub struct FsAssetSource {
    root: PathBuf,
}

impl FsAssetSource {
    /// Serve assets from `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve an asset path under the root, refusing to climb out of it.
    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = path.trim_start_matches('/');
        if relative.split('/').any(|part| part == "..") {
            return Err(Error::asset_fetch(path, "path escapes the asset root"));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl AssetSource for FsAssetSource {
    async fn fetch(&self, path: &str) -> Result<Vec<u8>> {
        let full = self.resolve(path)?;
        tokio::fs::read(&full)
            .await
            .map_err(|e| Error::asset_fetch(path, e.to_string()))
    }
}

/// Assets held in memory.
#[derive(Debug, Default)]
pub struct MemoryAssets {
    files: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryAssets {
    /// Create an empty asset set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an asset.
    pub fn insert(&self, path: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.into(), bytes.into());
    }

    /// Add an asset holding the JSON encoding of `value`.
    pub fn insert_json(&self, path: impl Into<String>, value: &serde_json::Value) {
        self.insert(path, value.to_string());
    }

    /// Remove an asset.
    pub fn remove(&self, path: &str) {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(path);
    }
}

#[async_trait]
impl AssetSource for MemoryAssets {
    async fn fetch(&self, path: &str) -> Result<Vec<u8>> {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned()
            .ok_or_else(|| Error::asset_fetch(path, "not found"))
    }
}
