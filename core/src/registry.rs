//! Asset metadata: a throttled in-memory cache and an HTTP provider.

use crate::backend::{AssetsProvider, BackendFuture};
use crate::error::{Error, Result};
use crate::types::{BTC_ASSET, LBTC_ASSET, LTEST_ASSET};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::time::Instant;

/// Metadata of one asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetInfo {
    pub asset_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub ticker: Option<String>,
    #[serde(default)]
    pub precision: u8,
    /// Issuer domain, when the issuance was verified.
    #[serde(default)]
    pub domain: Option<String>,
}

impl AssetInfo {
    fn builtin(asset_id: &str, name: &str, ticker: &str) -> Self {
        Self {
            asset_id: asset_id.to_string(),
            name: Some(name.to_string()),
            ticker: Some(ticker.to_string()),
            precision: 8,
            domain: None,
        }
    }
}

/// Policy assets known without asking a provider. Lightning balances use `btc`.
fn builtin_assets() -> BTreeMap<String, AssetInfo> {
    [
        AssetInfo::builtin(BTC_ASSET, "Bitcoin", "BTC"),
        AssetInfo::builtin(LBTC_ASSET, "Liquid Bitcoin", "L-BTC"),
        AssetInfo::builtin(LTEST_ASSET, "Testnet Liquid Bitcoin", "LBTC"),
    ]
    .into_iter()
    .map(|info| (info.asset_id.clone(), info))
    .collect()
}

/// Cache of asset metadata in front of an [`AssetsProvider`].
pub struct AssetRegistry {
    provider: Arc<dyn AssetsProvider>,
    assets: RwLock<BTreeMap<String, AssetInfo>>,
    last_refresh: Mutex<Option<Instant>>,
    refresh_interval: Duration,
}

impl AssetRegistry {
    pub fn new(provider: Arc<dyn AssetsProvider>, refresh_interval: Duration) -> Self {
        Self {
            provider,
            assets: RwLock::new(builtin_assets()),
            last_refresh: Mutex::new(None),
            refresh_interval,
        }
    }

    /// Cached info for `asset_id`.
    pub fn info(&self, asset_id: &str) -> Option<AssetInfo> {
        self.assets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(asset_id)
            .cloned()
    }

    /// Info for `ids`, fetching the ones not cached yet.
    ///
    /// Ids the provider does not know are left out.
    pub async fn assets(&self, ids: &[String]) -> BTreeMap<String, AssetInfo> {
        let missing: Vec<String> = {
            let assets = self.assets.read().unwrap_or_else(PoisonError::into_inner);
            ids.iter()
                .filter(|id| !assets.contains_key(*id))
                .cloned()
                .collect()
        };
        if !missing.is_empty() {
            match self.provider.get_assets(missing).await {
                Ok(fetched) => self
                    .assets
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .extend(fetched),
                Err(err) => log::warn!("Asset lookup failed: {}", err),
            }
        }
        let assets = self.assets.read().unwrap_or_else(PoisonError::into_inner);
        ids.iter()
            .filter_map(|id| assets.get(id).map(|info| (id.clone(), info.clone())))
            .collect()
    }

    /// Refresh the provider and every cached asset.
    ///
    /// Skipped when the last successful refresh is more recent than the refresh
    /// interval, unless `force` is set. Returns whether a refresh ran.
    pub async fn refresh(&self, force: bool) -> Result<bool> {
        let recent = self
            .last_refresh
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some_and(|at| at.elapsed() < self.refresh_interval);
        if !force && recent {
            return Ok(false);
        }
        log::info!("Refreshing asset registry");
        self.provider.refresh_assets(force).await?;

        let ids: Vec<String> = self
            .assets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        let fetched = self.provider.get_assets(ids).await?;
        self.assets
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(fetched);
        *self.last_refresh.lock().unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
        Ok(true)
    }
}

/// HTTP asset registry serving an `index.json` map of asset id to metadata.
#[derive(Debug)]
pub struct RegistryClient {
    base_url: String,
    client: reqwest::Client,
    index: RwLock<Option<BTreeMap<String, AssetInfo>>>,
}

impl RegistryClient {
    /// Create a new registry client.
    ///
    /// # Arguments
    /// * `base_url` - Base URL of the registry (e.g., "https://assets.blockstream.info")
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
            index: RwLock::new(None),
        }
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fetch the full asset index.
    pub async fn get_index(&self) -> Result<BTreeMap<String, AssetInfo>> {
        let url = format!("{}/index.json", self.base_url);
        let index: BTreeMap<String, AssetInfo> = self.get_json(&url).await?;
        *self.index.write().unwrap_or_else(PoisonError::into_inner) = Some(index.clone());
        Ok(index)
    }

    /// Fetch one asset.
    pub async fn get_asset(&self, asset_id: &str) -> Result<AssetInfo> {
        let url = format!("{}/{}", self.base_url, asset_id);
        self.get_json(&url).await
    }

    fn cached_index(&self) -> Option<BTreeMap<String, AssetInfo>> {
        self.index
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    // Helper methods

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to send request to {}: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(Error::Network(format!(
                "Registry error: {}",
                response.status()
            )));
        }

        let text = response
            .text()
            .await
            .map_err(|e| Error::Network(format!("Failed to read response: {}", e)))?;

        log::debug!("GET {} response: {} bytes", url, text.len());

        serde_json::from_str(&text)
            .map_err(|e| Error::Parse(format!("Failed to parse response: {}", e)))
    }
}

impl AssetsProvider for RegistryClient {
    fn get_assets(&self, ids: Vec<String>) -> BackendFuture<'_, BTreeMap<String, AssetInfo>> {
        Box::pin(async move {
            let index = match self.cached_index() {
                Some(index) => index,
                None => self.get_index().await?,
            };
            Ok(ids
                .into_iter()
                .filter_map(|id| index.get(&id).map(|info| (id, info.clone())))
                .collect())
        })
    }

    fn refresh_assets(&self, refresh: bool) -> BackendFuture<'_, ()> {
        Box::pin(async move {
            if refresh || self.cached_index().is_none() {
                self.get_index().await?;
            }
            Ok(())
        })
    }
}
