//! Configuration for sessions and the coordinator.

use crate::types::NetworkIdentity;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// User-level transport settings shared by every session of a wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSettings {
    /// Route traffic through Tor.
    #[serde(default)]
    pub tor: bool,
    /// SOCKS5 proxy, e.g. `socks5://127.0.0.1:9050`.
    #[serde(default)]
    pub proxy: Option<String>,
    #[serde(default)]
    pub spv_enabled: bool,
    /// Personal Electrum server per chain (`mainnet`, `liquid`, `testnet`, `testnet-liquid`).
    #[serde(default)]
    pub personal_electrum: BTreeMap<String, String>,
    #[serde(default = "default_true")]
    pub electrum_tls: bool,
    /// Root directory for per-wallet local state.
    #[serde(default)]
    pub datadir: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            tor: false,
            proxy: None,
            spv_enabled: false,
            personal_electrum: BTreeMap::new(),
            electrum_tls: true,
            datadir: None,
        }
    }
}

impl NetworkSettings {
    /// Personal Electrum endpoint for the network's chain, if one is configured.
    ///
    /// Only singlesig networks talk to Electrum servers.
    pub fn personal_electrum_url(&self, network: NetworkIdentity) -> Option<&str> {
        if !network.is_singlesig() {
            return None;
        }
        self.personal_electrum
            .get(network.chain())
            .map(String::as_str)
            .filter(|url| !url.is_empty())
    }

    /// Connection parameters handed to the RPC backend.
    pub fn to_network_params(&self, network: NetworkIdentity) -> serde_json::Value {
        let mut params = json!({
            "name": network.as_str(),
            "use_tor": self.tor,
            "proxy": self.proxy.clone().unwrap_or_default(),
            "spv_enabled": self.spv_enabled,
        });
        if let Some(url) = self.personal_electrum_url(network) {
            params["electrum_url"] = json!(url);
            params["electrum_tls"] = json!(self.electrum_tls);
        }
        if let Some(datadir) = &self.datadir {
            params["state_dir"] = json!(datadir.join("state").to_string_lossy());
        }
        params
    }
}

/// Two-factor resolve loop tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolverConfig {
    /// Predicate checks before giving up on a degraded connection.
    pub connection_attempts: u32,
    /// Pause between predicate checks.
    pub retry_delay: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            connection_attempts: 5,
            retry_delay: Duration::from_secs(3),
        }
    }
}

/// Construction-time configuration of a [`crate::WalletCoordinator`].
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Network whose login result and settings are canonical.
    pub prominent_network: NetworkIdentity,
    /// Explicit session set; derived from the prominent network's chain when `None`.
    pub networks: Option<Vec<NetworkIdentity>>,
    pub settings: NetworkSettings,
    pub resolver: ResolverConfig,
    /// Minimum time between two asset registry refreshes.
    pub registry_refresh_interval: Duration,
    pub is_watchonly: bool,
    pub is_ephemeral: bool,
}

impl CoordinatorConfig {
    pub fn new(prominent_network: NetworkIdentity) -> Self {
        Self {
            prominent_network,
            networks: None,
            settings: NetworkSettings::default(),
            resolver: ResolverConfig::default(),
            registry_refresh_interval: Duration::from_secs(120),
            is_watchonly: false,
            is_ephemeral: false,
        }
    }

    /// Restrict the coordinator to the given networks.
    pub fn with_networks(mut self, networks: Vec<NetworkIdentity>) -> Self {
        self.networks = Some(networks);
        self
    }

    pub fn with_settings(mut self, settings: NetworkSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_resolver(mut self, resolver: ResolverConfig) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn mainnet(&self) -> bool {
        self.prominent_network.is_mainnet()
    }

    /// Networks to open sessions for.
    ///
    /// Lightning and descriptor-wallet sessions are only included when their
    /// backends are available.
    pub fn session_networks(&self, has_lightning: bool, has_descriptor: bool) -> Vec<NetworkIdentity> {
        if let Some(networks) = &self.networks {
            return networks.clone();
        }
        let mut networks = if self.mainnet() {
            vec![
                NetworkIdentity::BitcoinSinglesig,
                NetworkIdentity::LiquidSinglesig,
                NetworkIdentity::BitcoinMultisig,
                NetworkIdentity::LiquidMultisig,
            ]
        } else {
            vec![
                NetworkIdentity::TestnetSinglesig,
                NetworkIdentity::TestnetLiquidSinglesig,
                NetworkIdentity::TestnetMultisig,
                NetworkIdentity::TestnetLiquidMultisig,
            ]
        };
        // Lightning and the swap engine only run on mainnet
        if self.mainnet() && has_lightning {
            networks.push(NetworkIdentity::Lightning);
        }
        if self.mainnet() && has_descriptor {
            networks.push(NetworkIdentity::LwkMainnet);
        }
        networks
    }
}
