//! Shared types for the multi-network wallet core.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Per-asset amounts in the asset's base unit, keyed by asset id.
pub type Balances = BTreeMap<String, i64>;

/// Asset key used for bitcoin amounts (mainchain and Lightning).
pub const BTC_ASSET: &str = "btc";

/// L-BTC policy asset on Liquid mainnet.
pub const LBTC_ASSET: &str = "6f0279e9ed041c3d710a9f57d0c02928416460c4b722ae3457a11eec381c526d";

/// L-BTC policy asset on Liquid testnet.
pub const LTEST_ASSET: &str = "144c654344aa716d6f3abcc1ca90e5641e4e2a7f633bc09fe3baf64585819a49";

/// Network identity of one session.
///
/// Each identity pairs a chain with a security policy and a backend kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NetworkIdentity {
    #[serde(rename = "electrum-mainnet")]
    BitcoinSinglesig,
    #[serde(rename = "mainnet")]
    BitcoinMultisig,
    #[serde(rename = "electrum-liquid")]
    LiquidSinglesig,
    #[serde(rename = "liquid")]
    LiquidMultisig,
    #[serde(rename = "lightning-mainnet")]
    Lightning,
    #[serde(rename = "electrum-testnet")]
    TestnetSinglesig,
    #[serde(rename = "testnet")]
    TestnetMultisig,
    #[serde(rename = "electrum-testnet-liquid")]
    TestnetLiquidSinglesig,
    #[serde(rename = "testnet-liquid")]
    TestnetLiquidMultisig,
    #[serde(rename = "lightning-testnet")]
    TestnetLightning,
    #[serde(rename = "lwk-mainnet")]
    LwkMainnet,
}

impl NetworkIdentity {
    /// All identities, in display rank order.
    pub const ALL: [NetworkIdentity; 11] = [
        NetworkIdentity::BitcoinSinglesig,
        NetworkIdentity::TestnetSinglesig,
        NetworkIdentity::BitcoinMultisig,
        NetworkIdentity::TestnetMultisig,
        NetworkIdentity::Lightning,
        NetworkIdentity::TestnetLightning,
        NetworkIdentity::LiquidSinglesig,
        NetworkIdentity::TestnetLiquidSinglesig,
        NetworkIdentity::LiquidMultisig,
        NetworkIdentity::TestnetLiquidMultisig,
        NetworkIdentity::LwkMainnet,
    ];

    /// Backend network name.
    pub fn as_str(self) -> &'static str {
        match self {
            NetworkIdentity::BitcoinSinglesig => "electrum-mainnet",
            NetworkIdentity::BitcoinMultisig => "mainnet",
            NetworkIdentity::LiquidSinglesig => "electrum-liquid",
            NetworkIdentity::LiquidMultisig => "liquid",
            NetworkIdentity::Lightning => "lightning-mainnet",
            NetworkIdentity::TestnetSinglesig => "electrum-testnet",
            NetworkIdentity::TestnetMultisig => "testnet",
            NetworkIdentity::TestnetLiquidSinglesig => "electrum-testnet-liquid",
            NetworkIdentity::TestnetLiquidMultisig => "testnet-liquid",
            NetworkIdentity::TestnetLightning => "lightning-testnet",
            NetworkIdentity::LwkMainnet => "lwk-mainnet",
        }
    }

    /// Chain name shared by the singlesig, multisig and Lightning variants.
    pub fn chain(self) -> &'static str {
        match self {
            NetworkIdentity::BitcoinSinglesig
            | NetworkIdentity::BitcoinMultisig
            | NetworkIdentity::Lightning => "mainnet",
            NetworkIdentity::LiquidSinglesig
            | NetworkIdentity::LiquidMultisig
            | NetworkIdentity::LwkMainnet => "liquid",
            NetworkIdentity::TestnetSinglesig
            | NetworkIdentity::TestnetMultisig
            | NetworkIdentity::TestnetLightning => "testnet",
            NetworkIdentity::TestnetLiquidSinglesig | NetworkIdentity::TestnetLiquidMultisig => {
                "testnet-liquid"
            }
        }
    }

    pub fn is_mainnet(self) -> bool {
        !matches!(
            self,
            NetworkIdentity::TestnetSinglesig
                | NetworkIdentity::TestnetMultisig
                | NetworkIdentity::TestnetLiquidSinglesig
                | NetworkIdentity::TestnetLiquidMultisig
                | NetworkIdentity::TestnetLightning
        )
    }

    pub fn is_liquid(self) -> bool {
        matches!(self.chain(), "liquid" | "testnet-liquid")
    }

    pub fn is_lightning(self) -> bool {
        matches!(
            self,
            NetworkIdentity::Lightning | NetworkIdentity::TestnetLightning
        )
    }

    pub fn is_lwk(self) -> bool {
        self == NetworkIdentity::LwkMainnet
    }

    /// Electrum-backed singlesig networks.
    pub fn is_singlesig(self) -> bool {
        self.as_str().starts_with("electrum-")
    }

    /// Server-backed multisig networks.
    pub fn is_multisig(self) -> bool {
        !self.is_singlesig() && !self.is_lightning() && !self.is_lwk()
    }

    /// Asset id of the network's fee asset.
    pub fn policy_asset(self) -> &'static str {
        match self.chain() {
            "liquid" => LBTC_ASSET,
            "testnet-liquid" => LTEST_ASSET,
            _ => BTC_ASSET,
        }
    }

    /// Bitcoin network used for key derivation.
    pub fn to_bitcoin_network(self) -> bitcoin::Network {
        if self.is_mainnet() {
            bitcoin::Network::Bitcoin
        } else {
            bitcoin::Network::Testnet
        }
    }

    /// The singlesig bitcoin network of the same chain family.
    pub fn bitcoin_singlesig(mainnet: bool) -> Self {
        if mainnet {
            NetworkIdentity::BitcoinSinglesig
        } else {
            NetworkIdentity::TestnetSinglesig
        }
    }

    pub fn bitcoin_multisig(mainnet: bool) -> Self {
        if mainnet {
            NetworkIdentity::BitcoinMultisig
        } else {
            NetworkIdentity::TestnetMultisig
        }
    }

    pub fn liquid_multisig(mainnet: bool) -> Self {
        if mainnet {
            NetworkIdentity::LiquidMultisig
        } else {
            NetworkIdentity::TestnetLiquidMultisig
        }
    }

    fn rank(self) -> usize {
        Self::ALL
            .iter()
            .position(|n| *n == self)
            .unwrap_or(Self::ALL.len())
    }
}

impl PartialOrd for NetworkIdentity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for NetworkIdentity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl std::str::FromStr for NetworkIdentity {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NetworkIdentity::ALL
            .into_iter()
            .find(|n| n.as_str() == s)
            .ok_or_else(|| crate::error::Error::Parse(format!("Unknown network: {}", s)))
    }
}

impl std::fmt::Display for NetworkIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Subaccount script/policy type.
///
/// Declaration order is the display order within one network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SubaccountType {
    #[serde(rename = "p2wpkh")]
    Segwit,
    #[serde(rename = "p2sh-p2wpkh")]
    SegwitWrapped,
    #[serde(rename = "2of2")]
    Standard,
    #[serde(rename = "2of2_no_recovery")]
    Amp,
    #[serde(rename = "lightning")]
    Lightning,
}

/// A sub-wallet within a network session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subaccount {
    pub name: String,
    pub pointer: u32,
    pub network: NetworkIdentity,
    #[serde(rename = "type")]
    pub kind: SubaccountType,
    pub hidden: bool,
    #[serde(default)]
    pub bip44_discovered: Option<bool>,
    #[serde(default)]
    pub receiving_id: String,
    /// Cached per-asset balance, filled by balance aggregation.
    #[serde(default)]
    pub satoshi: Option<Balances>,
    /// Whether the subaccount was ever seen with transactions.
    #[serde(default)]
    pub has_txs: bool,
}

impl Subaccount {
    /// The synthetic subaccount exposed by a Lightning session.
    pub fn lightning(network: NetworkIdentity) -> Self {
        Self {
            name: String::new(),
            pointer: 0,
            network,
            kind: SubaccountType::Lightning,
            hidden: false,
            bip44_discovered: None,
            receiving_id: String::new(),
            satoshi: None,
            has_txs: false,
        }
    }

    /// Identifier unique across networks: `{network}:{pointer}`.
    pub fn id(&self) -> String {
        format!("{}:{}", self.network, self.pointer)
    }

    /// Whether this entry is the same subaccount as `other`.
    pub fn same_slot(&self, other: &Subaccount) -> bool {
        self.network == other.network && self.pointer == other.pointer
    }

    /// Cached balance of the network's fee asset.
    pub fn btc(&self) -> Option<i64> {
        self.satoshi
            .as_ref()
            .and_then(|s| s.get(self.network.policy_asset()).copied())
    }

    /// Ordering used for the aggregated subaccount list.
    pub fn display_order(&self, other: &Subaccount) -> Ordering {
        self.network
            .cmp(&other.network)
            .then(self.kind.cmp(&other.kind))
            .then(self.pointer.cmp(&other.pointer))
    }
}

/// Result of a successful login.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LoginResult {
    pub xpub_hash_id: String,
    pub wallet_hash_id: String,
}

/// Identifiers of a wallet on one network, used to locate local state.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WalletIdentifier {
    pub xpub_hash_id: String,
    pub wallet_hash_id: String,
}

impl From<WalletIdentifier> for LoginResult {
    fn from(id: WalletIdentifier) -> Self {
        Self {
            xpub_hash_id: id.xpub_hash_id,
            wallet_hash_id: id.wallet_hash_id,
        }
    }
}

/// Software login credentials.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mnemonic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bip39_passphrase: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub core_descriptors: Option<Vec<String>>,
}

impl Credentials {
    pub fn from_mnemonic(mnemonic: impl Into<String>, bip39_passphrase: Option<String>) -> Self {
        Self {
            mnemonic: Some(mnemonic.into()),
            bip39_passphrase,
            ..Default::default()
        }
    }

    /// True when no login material is present.
    pub fn is_empty(&self) -> bool {
        self.mnemonic.as_deref().is_none_or(str::is_empty)
            && self.username.as_deref().is_none_or(str::is_empty)
            && self.core_descriptors.as_ref().is_none_or(Vec::is_empty)
    }

    pub fn is_watchonly(&self) -> bool {
        self.mnemonic.is_none() && (self.username.is_some() || self.core_descriptors.is_some())
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("mnemonic", &self.mnemonic.as_ref().map(|_| "***"))
            .field("bip39_passphrase", &self.bip39_passphrase.as_ref().map(|_| "***"))
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("core_descriptors", &self.core_descriptors)
            .finish()
    }
}

/// Capabilities of a connected hardware wallet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HwDevice {
    pub name: String,
    #[serde(default)]
    pub supports_liquid: u32,
    #[serde(default)]
    pub supports_low_r: bool,
    #[serde(default)]
    pub supports_arbitrary_scripts: bool,
    #[serde(default)]
    pub supports_host_unblinding: bool,
    #[serde(default)]
    pub supports_ae_protocol: u32,
}

/// Wallet settings as reported by the backend.
///
/// Unknown keys are preserved so settings can be copied between sessions verbatim.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_num_blocks: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altimeout: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub csvtime: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pricing: Option<serde_json::Value>,
    #[serde(flatten)]
    pub other: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TwoFactorReset {
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub is_disputed: bool,
    #[serde(default)]
    pub days_remaining: i32,
}

/// Two-factor configuration of a multisig session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TwoFactorConfig {
    #[serde(default)]
    pub all_methods: Vec<String>,
    #[serde(default)]
    pub enabled_methods: Vec<String>,
    #[serde(default)]
    pub any_enabled: bool,
    #[serde(default)]
    pub twofactor_reset: TwoFactorReset,
}

/// Direction of a transaction relative to the wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Incoming,
    Outgoing,
    Redeposit,
    Mixed,
    NotUnblindable,
}

/// A wallet transaction, normalized across backends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    #[serde(default)]
    pub txhash: Option<String>,
    /// Creation time in microseconds since the epoch.
    #[serde(default)]
    pub created_at_ts: i64,
    #[serde(default)]
    pub block_height: u32,
    #[serde(rename = "type")]
    pub kind: TransactionType,
    #[serde(default)]
    pub satoshi: Balances,
    #[serde(default)]
    pub fee: u64,
    #[serde(default)]
    pub memo: String,
    /// Id of the owning subaccount (`{network}:{pointer}`), set by aggregation.
    #[serde(default)]
    pub subaccount: Option<String>,
    #[serde(default)]
    pub is_lightning_swap: bool,
    #[serde(default)]
    pub is_in_progress_swap: bool,
    #[serde(default)]
    pub is_refundable_swap: bool,
}

impl Transaction {
    /// Chronological ordering: creation time, then height, then outgoing before incoming.
    pub fn chronological(&self, other: &Transaction) -> Ordering {
        self.created_at_ts
            .cmp(&other.created_at_ts)
            .then(self.block_height.cmp(&other.block_height))
            .then_with(|| match (self.kind, other.kind) {
                (TransactionType::Outgoing, TransactionType::Incoming) => Ordering::Less,
                (TransactionType::Incoming, TransactionType::Outgoing) => Ordering::Greater,
                _ => Ordering::Equal,
            })
    }
}

/// Sort a list newest first.
pub fn sort_by_recency(txs: &mut [Transaction]) {
    txs.sort_by(|a, b| b.chronological(a));
}

/// Push payload announcing a new or updated transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionEvent {
    #[serde(default)]
    pub txhash: String,
    #[serde(rename = "subaccounts", default)]
    pub subaccounts: Vec<u32>,
    #[serde(rename = "type", default)]
    pub direction: Option<String>,
    #[serde(default)]
    pub satoshi: Option<i64>,
}

impl TransactionEvent {
    pub fn is_incoming(&self) -> bool {
        self.direction.as_deref() == Some("incoming")
    }
}

/// Push payload describing a transport state transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionEvent {
    pub current_state: String,
    #[serde(default)]
    pub next_state: Option<String>,
    #[serde(default)]
    pub wait_ms: Option<u64>,
}

impl ConnectionEvent {
    pub fn is_disconnected(&self) -> bool {
        self.current_state == "disconnected"
    }
}

/// Identifiers recorded for the wallet after login.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletAccount {
    pub xpub_hash_id: Option<String>,
    pub wallet_hash_id: Option<String>,
    pub lightning_wallet_hash_id: Option<String>,
}

/// A backend system message for one network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemMessage {
    pub network: NetworkIdentity,
    pub text: String,
}
