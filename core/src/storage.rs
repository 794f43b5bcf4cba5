//! Async storage abstraction for per-wallet local state.
//!
//! Sessions keep local state (caches, node credentials) keyed by the wallet hash
//! of the network they run on. The coordinator only needs to know whether such
//! state exists, to remove it after a failed restore, and to persist the
//! Lightning node service credentials.

use crate::config::NetworkSettings;
use crate::error::{Error, Result};
use crate::types::NetworkIdentity;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

/// Type alias for storage futures.
pub type StorageFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Typed storage trait for local wallet state.
pub trait StateStorage: Send + Sync {
    /// Whether local state exists for the wallet on `network`.
    fn has_wallet_state(
        &self,
        network: NetworkIdentity,
        wallet_hash_id: &str,
    ) -> StorageFuture<'_, bool>;

    /// Delete local state for the wallet on `network`.
    ///
    /// Does nothing if no state exists.
    fn remove_wallet_state(
        &self,
        network: NetworkIdentity,
        wallet_hash_id: &str,
    ) -> StorageFuture<'_, ()>;

    /// Get the stored Lightning node credentials.
    ///
    /// Returns `Ok(None)` if none have been stored.
    fn get_node_credentials(&self, wallet_hash_id: &str) -> StorageFuture<'_, Option<String>>;

    /// Store Lightning node credentials, overwriting existing ones.
    fn store_node_credentials(
        &self,
        wallet_hash_id: &str,
        credentials: &str,
    ) -> StorageFuture<'_, ()>;

    fn remove_node_credentials(&self, wallet_hash_id: &str) -> StorageFuture<'_, ()>;
}

/// Extension trait for state storage operations.
///
/// It's automatically implemented for any type that implements `StateStorage`.
pub trait StateStorageExt: StateStorage {
    /// Whether a session on `network` can log in without a full restore.
    ///
    /// Multisig wallets live on the server, so they always have state.
    fn exist_datadir(&self, network: NetworkIdentity, wallet_hash_id: &str) -> StorageFuture<'_, bool> {
        let wallet_hash_id = wallet_hash_id.to_string();
        Box::pin(async move {
            if network.is_multisig() {
                return Ok(true);
            }
            if network.is_lightning() {
                return Ok(self.get_node_credentials(&wallet_hash_id).await?.is_some());
            }
            self.has_wallet_state(network, &wallet_hash_id).await
        })
    }
}

// Blanket implementation for all StateStorage types
impl<T: StateStorage + ?Sized> StateStorageExt for T {}

/// Filesystem storage rooted at a data directory.
///
/// Layout:
/// - `{root}/state/{wallet_hash_id}/` per-network wallet state
/// - `{root}/lightning/{wallet_hash_id}/credentials` node service credentials
pub struct DatadirStorage {
    root: PathBuf,
}

impl DatadirStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Storage rooted at the configured datadir, if any.
    pub fn from_settings(settings: &NetworkSettings) -> Option<Self> {
        settings.datadir.as_ref().map(Self::new)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn state_dir(&self, wallet_hash_id: &str) -> Result<PathBuf> {
        check_hash(wallet_hash_id)?;
        Ok(self.root.join("state").join(wallet_hash_id))
    }

    fn lightning_dir(&self, wallet_hash_id: &str) -> Result<PathBuf> {
        check_hash(wallet_hash_id)?;
        Ok(self.root.join("lightning").join(wallet_hash_id))
    }
}

/// Wallet hashes are hex; anything else must not reach a filesystem path.
fn check_hash(wallet_hash_id: &str) -> Result<()> {
    if wallet_hash_id.is_empty() || !wallet_hash_id.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(Error::Storage(format!(
            "Invalid wallet hash: {}",
            wallet_hash_id
        )));
    }
    Ok(())
}

fn io_error(context: &str, err: std::io::Error) -> Error {
    Error::Storage(format!("{}: {}", context, err))
}

impl StateStorage for DatadirStorage {
    fn has_wallet_state(
        &self,
        _network: NetworkIdentity,
        wallet_hash_id: &str,
    ) -> StorageFuture<'_, bool> {
        let dir = self.state_dir(wallet_hash_id);
        Box::pin(async move {
            let dir = dir?;
            match tokio::fs::metadata(&dir).await {
                Ok(meta) => Ok(meta.is_dir()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
                Err(e) => Err(io_error("Failed to read state dir", e)),
            }
        })
    }

    fn remove_wallet_state(
        &self,
        network: NetworkIdentity,
        wallet_hash_id: &str,
    ) -> StorageFuture<'_, ()> {
        let dir = self.state_dir(wallet_hash_id);
        Box::pin(async move {
            let dir = dir?;
            match tokio::fs::remove_dir_all(&dir).await {
                Ok(()) => {
                    log::info!("Removed local state of {} at {}", network, dir.display());
                    Ok(())
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(io_error("Failed to remove state dir", e)),
            }
        })
    }

    fn get_node_credentials(&self, wallet_hash_id: &str) -> StorageFuture<'_, Option<String>> {
        let dir = self.lightning_dir(wallet_hash_id);
        Box::pin(async move {
            let path = dir?.join("credentials");
            match tokio::fs::read_to_string(&path).await {
                Ok(credentials) => Ok(Some(credentials)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(io_error("Failed to read node credentials", e)),
            }
        })
    }

    fn store_node_credentials(
        &self,
        wallet_hash_id: &str,
        credentials: &str,
    ) -> StorageFuture<'_, ()> {
        let dir = self.lightning_dir(wallet_hash_id);
        let credentials = credentials.to_string();
        Box::pin(async move {
            let dir = dir?;
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|e| io_error("Failed to create lightning dir", e))?;
            tokio::fs::write(dir.join("credentials"), credentials)
                .await
                .map_err(|e| io_error("Failed to write node credentials", e))
        })
    }

    fn remove_node_credentials(&self, wallet_hash_id: &str) -> StorageFuture<'_, ()> {
        let dir = self.lightning_dir(wallet_hash_id);
        Box::pin(async move {
            match tokio::fs::remove_dir_all(dir?).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(io_error("Failed to remove lightning dir", e)),
            }
        })
    }
}
