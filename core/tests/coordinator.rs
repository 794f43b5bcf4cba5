//! Coordinator tests against in-memory backends.
//!
//! Run with: cargo test --test coordinator

use multiwallet_core::backend::{LightningEventHandler, NotificationHandler};
use multiwallet_core::lightning::{
    LightningInput, LightningTransaction, LnInvoice, LnUrlPayOutcome, LnUrlPayRequest, Payment,
    PaymentStatus, PaymentType, ReverseSwapInfo, SendLimits, SwapInfo,
};
use multiwallet_core::registry::AssetInfo;
use multiwallet_core::types::{LBTC_ASSET, SubaccountType, WalletIdentifier};
use multiwallet_core::{
    AssetsProvider, BackendError, BackendFuture, Backends, CoordinatorConfig, Credentials, Error,
    EventKind, HwDevice, LightningNode, LightningNodeFactory, LoginOutcome, LoginParams,
    NetworkIdentity, PAGE_SIZE, ResolverConfig, RpcSession, RpcSessionFactory, SkipReason,
    StateStorage, StorageFuture, Subaccount, TwoFactorCall, WalletAccount, WalletCoordinator,
};
use serde_json::{Value, json};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const MNEMONIC: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

// Backend doubles

/// A call that is already resolved.
struct ResolvedCall(std::result::Result<Value, String>);

impl TwoFactorCall for ResolvedCall {
    fn get_status(&self) -> BackendFuture<'_, Value> {
        let status = match &self.0 {
            Ok(result) => json!({"status": "done", "result": result}),
            Err(error) => json!({"status": "error", "error": error}),
        };
        Box::pin(async move { Ok(status) })
    }

    fn call(&self) -> BackendFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }

    fn request_code(&self, _method: String) -> BackendFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }

    fn resolve_code(&self, _code: String) -> BackendFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }
}

fn resolved(result: std::result::Result<Value, String>) -> BackendFuture<'static, Box<dyn TwoFactorCall>> {
    Box::pin(async move { Ok(Box::new(ResolvedCall(result)) as Box<dyn TwoFactorCall>) })
}

/// Behaviour of one network's backend.
#[derive(Debug, Clone, Default)]
struct Script {
    connect_error: Option<String>,
    login_error: Option<String>,
    subaccounts_error: bool,
    pointers: Vec<u32>,
    discovered: bool,
    balances: BTreeMap<u32, Value>,
    tx_total: u32,
}

impl Script {
    fn funded() -> Self {
        Self {
            pointers: vec![0],
            discovered: true,
            ..Default::default()
        }
    }
}

#[derive(Default)]
struct World {
    scripts: Mutex<BTreeMap<NetworkIdentity, Script>>,
    tx_requests: Mutex<Vec<(NetworkIdentity, u32)>>,
    hints: Mutex<Vec<(NetworkIdentity, String)>>,
    settings_pushed: Mutex<Vec<NetworkIdentity>>,
    handlers: Mutex<BTreeMap<NetworkIdentity, NotificationHandler>>,
}

impl World {
    fn with(scripts: Vec<(NetworkIdentity, Script)>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into_iter().collect()),
            ..Default::default()
        })
    }

    fn script(&self, network: NetworkIdentity) -> Script {
        self.scripts
            .lock()
            .unwrap()
            .get(&network)
            .cloned()
            .unwrap_or_default()
    }

    fn update(&self, network: NetworkIdentity, f: impl FnOnce(&mut Script)) {
        f(self.scripts.lock().unwrap().entry(network).or_default());
    }

    fn requests(&self, network: NetworkIdentity) -> usize {
        self.tx_requests
            .lock()
            .unwrap()
            .iter()
            .filter(|(n, _)| *n == network)
            .count()
    }

    fn hints(&self, network: NetworkIdentity) -> Vec<String> {
        self.hints
            .lock()
            .unwrap()
            .iter()
            .filter(|(n, _)| *n == network)
            .map(|(_, h)| h.clone())
            .collect()
    }
}

struct MockRpc {
    network: NetworkIdentity,
    world: Arc<World>,
}

impl MockRpc {
    fn script(&self) -> Script {
        self.world.script(self.network)
    }

    fn subaccount_json(&self, pointer: u32) -> Value {
        let kind = if self.network.is_multisig() {
            "2of2"
        } else {
            "p2wpkh"
        };
        json!({
            "name": "",
            "pointer": pointer,
            "type": kind,
            "hidden": false,
            "bip44_discovered": self.script().discovered,
        })
    }
}

impl RpcSession for MockRpc {
    fn connect(&self, _net_params: Value) -> BackendFuture<'_, ()> {
        Box::pin(async move {
            match self.script().connect_error {
                Some(message) => Err(Error::from(BackendError::Timeout(Some(message)))),
                None => Ok(()),
            }
        })
    }

    fn set_notification_handler(&self, handler: NotificationHandler) {
        self.world
            .handlers
            .lock()
            .unwrap()
            .insert(self.network, handler);
    }

    fn reconnect_hint(&self, hint: Value) -> BackendFuture<'_, ()> {
        Box::pin(async move {
            let hint = hint["hint"].as_str().unwrap_or_default().to_string();
            self.world.hints.lock().unwrap().push((self.network, hint));
            Ok(())
        })
    }

    fn wallet_identifier(
        &self,
        _net_params: Value,
        _details: Value,
    ) -> BackendFuture<'_, WalletIdentifier> {
        let network = self.network;
        Box::pin(async move {
            Ok(WalletIdentifier {
                xpub_hash_id: format!("xpub-{}", network),
                wallet_hash_id: format!("wallet-{}", network),
            })
        })
    }

    fn login_user_sw(&self, _credentials: Credentials) -> BackendFuture<'_, Box<dyn TwoFactorCall>> {
        match self.script().login_error {
            Some(error) => resolved(Err(error)),
            None => resolved(Ok(json!({}))),
        }
    }

    fn login_user_hw(&self, _device: HwDevice) -> BackendFuture<'_, Box<dyn TwoFactorCall>> {
        resolved(Ok(json!({})))
    }

    fn get_subaccounts(&self, _refresh: bool) -> BackendFuture<'_, Box<dyn TwoFactorCall>> {
        let script = self.script();
        if script.subaccounts_error {
            return Box::pin(async { Err(Error::from(BackendError::SessionLost(None))) });
        }
        let items: Vec<Value> = script
            .pointers
            .iter()
            .map(|p| self.subaccount_json(*p))
            .collect();
        resolved(Ok(json!({ "subaccounts": items })))
    }

    fn get_subaccount(&self, pointer: u32) -> BackendFuture<'_, Box<dyn TwoFactorCall>> {
        resolved(Ok(self.subaccount_json(pointer)))
    }

    fn update_subaccount(&self, _details: Value) -> BackendFuture<'_, Box<dyn TwoFactorCall>> {
        resolved(Ok(Value::Null))
    }

    fn get_balance(&self, pointer: u32, _num_confs: u32) -> BackendFuture<'_, Box<dyn TwoFactorCall>> {
        let balance = self
            .script()
            .balances
            .get(&pointer)
            .cloned()
            .unwrap_or_else(|| json!({ self.network.policy_asset(): 0 }));
        resolved(Ok(balance))
    }

    fn get_transactions(
        &self,
        pointer: u32,
        first: u32,
        count: u32,
    ) -> BackendFuture<'_, Box<dyn TwoFactorCall>> {
        self.world
            .tx_requests
            .lock()
            .unwrap()
            .push((self.network, first));
        let total = self.script().tx_total;
        let txs: Vec<Value> = (first..total.min(first + count))
            .map(|n| {
                // Newest first, like the backend
                let ts = i64::from(total - n);
                json!({
                    "txhash": format!("{}-{}-{}", self.network, pointer, n),
                    "created_at_ts": ts,
                    "type": "incoming",
                    "satoshi": {"btc": 1},
                })
            })
            .collect();
        resolved(Ok(json!({ "transactions": txs })))
    }

    fn get_two_factor_config(&self) -> BackendFuture<'_, Value> {
        Box::pin(async { Ok(json!({"enabled_methods": [], "any_enabled": false})) })
    }

    fn get_settings(&self) -> BackendFuture<'_, Value> {
        let unit = if self.network.is_multisig() { "mBTC" } else { "BTC" };
        Box::pin(async move { Ok(json!({ "unit": unit })) })
    }

    fn change_settings(&self, _settings: Value) -> BackendFuture<'_, Box<dyn TwoFactorCall>> {
        self.world.settings_pushed.lock().unwrap().push(self.network);
        resolved(Ok(Value::Null))
    }

    fn get_system_message(&self) -> BackendFuture<'_, Option<String>> {
        let message = self
            .network
            .is_multisig()
            .then(|| "Scheduled maintenance".to_string());
        Box::pin(async move { Ok(message) })
    }
}

struct WorldFactory(Arc<World>);

impl RpcSessionFactory for WorldFactory {
    fn create(&self, network: NetworkIdentity) -> Arc<dyn RpcSession> {
        Arc::new(MockRpc {
            network,
            world: self.0.clone(),
        })
    }
}

/// In-memory storage for integration tests.
#[derive(Default)]
struct InMemoryStateStorage {
    states: Mutex<BTreeSet<(NetworkIdentity, String)>>,
    removed: Mutex<Vec<(NetworkIdentity, String)>>,
    node_credentials: Mutex<BTreeMap<String, String>>,
}

impl StateStorage for InMemoryStateStorage {
    fn has_wallet_state(
        &self,
        network: NetworkIdentity,
        wallet_hash_id: &str,
    ) -> StorageFuture<'_, bool> {
        let key = (network, wallet_hash_id.to_string());
        Box::pin(async move { Ok(self.states.lock().unwrap().contains(&key)) })
    }

    fn remove_wallet_state(
        &self,
        network: NetworkIdentity,
        wallet_hash_id: &str,
    ) -> StorageFuture<'_, ()> {
        let key = (network, wallet_hash_id.to_string());
        Box::pin(async move {
            self.states.lock().unwrap().remove(&key);
            self.removed.lock().unwrap().push(key);
            Ok(())
        })
    }

    fn get_node_credentials(&self, wallet_hash_id: &str) -> StorageFuture<'_, Option<String>> {
        let wallet_hash_id = wallet_hash_id.to_string();
        Box::pin(async move {
            Ok(self
                .node_credentials
                .lock()
                .unwrap()
                .get(&wallet_hash_id)
                .cloned())
        })
    }

    fn store_node_credentials(
        &self,
        wallet_hash_id: &str,
        credentials: &str,
    ) -> StorageFuture<'_, ()> {
        let wallet_hash_id = wallet_hash_id.to_string();
        let credentials = credentials.to_string();
        Box::pin(async move {
            self.node_credentials
                .lock()
                .unwrap()
                .insert(wallet_hash_id, credentials);
            Ok(())
        })
    }

    fn remove_node_credentials(&self, wallet_hash_id: &str) -> StorageFuture<'_, ()> {
        let wallet_hash_id = wallet_hash_id.to_string();
        Box::pin(async move {
            self.node_credentials.lock().unwrap().remove(&wallet_hash_id);
            Ok(())
        })
    }
}

struct NoAssets;

impl AssetsProvider for NoAssets {
    fn get_assets(&self, _ids: Vec<String>) -> BackendFuture<'_, BTreeMap<String, AssetInfo>> {
        Box::pin(async { Ok(BTreeMap::new()) })
    }

    fn refresh_assets(&self, _refresh: bool) -> BackendFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }
}

/// A node that knows one 50 sat invoice and enforces a 100 sat minimum.
#[derive(Default)]
struct MockNode {
    /// The node service does not know this seed yet.
    unknown_seed: bool,
    sends: AtomicUsize,
    listener: Mutex<Option<LightningEventHandler>>,
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

impl LightningNode for MockNode {
    fn connect(&self, _mnemonic: String, check_credentials: bool) -> BackendFuture<'_, ()> {
        Box::pin(async move {
            if check_credentials && self.unknown_seed {
                return Err(Error::Other("node not found".to_string()));
            }
            Ok(())
        })
    }

    fn stop(&self) -> BackendFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }

    fn node_credentials(&self) -> Option<String> {
        Some("node-creds".to_string())
    }

    fn balance_sat(&self) -> BackendFuture<'_, u64> {
        Box::pin(async { Ok(20_000) })
    }

    fn send_limits(&self) -> BackendFuture<'_, SendLimits> {
        Box::pin(async {
            Ok(SendLimits {
                min_sat: Some(100),
                max_sat: Some(10_000),
            })
        })
    }

    fn parse_input(&self, input: String) -> BackendFuture<'_, LightningInput> {
        Box::pin(async move {
            if input != "lnbc500n1" {
                return Ok(LightningInput::Unsupported { input });
            }
            Ok(LightningInput::Bolt11(LnInvoice {
                bolt11: input,
                payment_hash: "cd".repeat(32),
                description: Some("coffee".to_string()),
                amount_msat: Some(50_000),
                timestamp: now_secs(),
                expiry: 3600,
            }))
        })
    }

    fn send_payment(&self, bolt11: String, _amount_sat: Option<u64>) -> BackendFuture<'_, Payment> {
        Box::pin(async move {
            self.sends.fetch_add(1, Ordering::SeqCst);
            Ok(Payment {
                id: bolt11,
                payment_type: PaymentType::Sent,
                payment_time: 1,
                amount_msat: 50_000,
                fee_msat: 0,
                status: PaymentStatus::Complete,
                description: None,
            })
        })
    }

    fn pay_lnurl(
        &self,
        _request: LnUrlPayRequest,
        _amount_sat: u64,
        _comment: String,
    ) -> BackendFuture<'_, LnUrlPayOutcome> {
        Box::pin(async { Err(Error::Unsupported("lnurl".to_string())) })
    }

    fn create_invoice(&self, _amount_sat: u64, _description: String) -> BackendFuture<'_, LnInvoice> {
        Box::pin(async { Err(Error::Unsupported("invoice".to_string())) })
    }

    fn receive_onchain(&self) -> BackendFuture<'_, SwapInfo> {
        Box::pin(async { Err(Error::Unsupported("swap".to_string())) })
    }

    fn list_payments(&self) -> BackendFuture<'_, Vec<Payment>> {
        Box::pin(async { Ok(vec![]) })
    }

    fn list_refundables(&self) -> BackendFuture<'_, Vec<SwapInfo>> {
        Box::pin(async { Ok(vec![]) })
    }

    fn list_reverse_swaps_in_progress(&self) -> BackendFuture<'_, Vec<ReverseSwapInfo>> {
        Box::pin(async { Ok(vec![]) })
    }

    fn swap_in_progress(&self) -> BackendFuture<'_, Option<SwapInfo>> {
        Box::pin(async { Ok(None) })
    }

    fn close_channels(&self) -> BackendFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }
}

struct NodeFactory(Arc<MockNode>);

impl LightningNodeFactory for NodeFactory {
    fn create(
        &self,
        _wallet_hash_id: &str,
        _testnet: bool,
        listener: LightningEventHandler,
    ) -> Arc<dyn LightningNode> {
        *self.0.listener.lock().unwrap() = Some(listener);
        self.0.clone()
    }
}

// Fixtures

struct Fixture {
    coordinator: WalletCoordinator,
    world: Arc<World>,
    storage: Arc<InMemoryStateStorage>,
    node: Arc<MockNode>,
}

fn fixture(scripts: Vec<(NetworkIdentity, Script)>) -> Fixture {
    fixture_with(scripts, MockNode::default(), None)
}

fn fixture_with(
    scripts: Vec<(NetworkIdentity, Script)>,
    node: MockNode,
    account: Option<WalletAccount>,
) -> Fixture {
    let mut networks: Vec<NetworkIdentity> = scripts.iter().map(|(n, _)| *n).collect();
    let has_lightning = networks.contains(&NetworkIdentity::Lightning);
    let world = World::with(scripts);
    let storage = Arc::new(InMemoryStateStorage::default());
    let node = Arc::new(node);
    networks.retain(|n| *n != NetworkIdentity::Lightning);
    let prominent = networks[0];
    if has_lightning {
        networks.push(NetworkIdentity::Lightning);
    }

    let config = CoordinatorConfig::new(prominent)
        .with_networks(networks)
        .with_resolver(ResolverConfig {
            connection_attempts: 2,
            retry_delay: Duration::from_millis(5),
        });
    let backends = Backends {
        rpc: Arc::new(WorldFactory(world.clone())),
        lightning: has_lightning
            .then(|| Arc::new(NodeFactory(node.clone())) as Arc<dyn LightningNodeFactory>),
        descriptor: None,
        assets: Arc::new(NoAssets),
        storage: storage.clone(),
    };
    let mut coordinator = WalletCoordinator::new(config, backends);
    if let Some(account) = account {
        coordinator = coordinator.with_account(account);
    }
    Fixture {
        coordinator,
        world,
        storage,
        node,
    }
}

fn credentials() -> Credentials {
    Credentials::from_mnemonic(MNEMONIC, None)
}

fn wallet_hash(network: NetworkIdentity) -> String {
    format!("wallet-{}", network)
}

// Login

#[tokio::test]
async fn test_login_two_singlesig_networks() {
    let f = fixture(vec![
        (NetworkIdentity::BitcoinSinglesig, Script::funded()),
        (NetworkIdentity::LiquidSinglesig, Script::funded()),
    ]);

    let result = f
        .coordinator
        .login(LoginParams::software(credentials()))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(
        result.wallet_hash_id,
        wallet_hash(NetworkIdentity::BitcoinSinglesig)
    );
    assert_eq!(f.coordinator.active_sessions().len(), 2);
    assert_eq!(
        f.coordinator.prominent_session().unwrap().network(),
        NetworkIdentity::BitcoinSinglesig
    );
    assert!(f.coordinator.failures().is_empty());
    assert_eq!(
        f.coordinator.account().xpub_hash_id,
        Some(format!("xpub-{}", NetworkIdentity::BitcoinSinglesig))
    );

    let networks: Vec<NetworkIdentity> = f
        .coordinator
        .cached_subaccounts()
        .iter()
        .map(|s| s.network)
        .collect();
    assert_eq!(
        networks,
        vec![
            NetworkIdentity::BitcoinSinglesig,
            NetworkIdentity::LiquidSinglesig
        ]
    );
}

#[tokio::test]
async fn test_partial_failure_is_recorded() {
    let f = fixture(vec![
        (NetworkIdentity::BitcoinSinglesig, Script::funded()),
        (
            NetworkIdentity::BitcoinMultisig,
            Script {
                connect_error: Some("server unreachable".to_string()),
                ..Script::funded()
            },
        ),
        (NetworkIdentity::LiquidSinglesig, Script::funded()),
    ]);

    let result = f.coordinator.login(LoginParams::software(credentials())).await;
    assert!(result.is_ok());

    let failures = f.coordinator.failures();
    assert_eq!(failures.networks(), vec![NetworkIdentity::BitcoinMultisig]);
    assert!(matches!(
        failures.get(NetworkIdentity::BitcoinMultisig),
        Some(Error::ConnectionFailed(Some(message))) if message == "server unreachable"
    ));

    let multisig = f.coordinator.session(NetworkIdentity::BitcoinMultisig).unwrap();
    assert!(!multisig.is_connected());
    assert!(!multisig.is_logged());
    assert_eq!(f.coordinator.active_sessions().len(), 2);
    assert!(!f.coordinator.has_multisig());
}

#[tokio::test]
async fn test_total_failure() {
    let down = || Script {
        connect_error: Some("offline".to_string()),
        ..Script::funded()
    };
    let f = fixture(vec![
        (NetworkIdentity::BitcoinSinglesig, down()),
        (NetworkIdentity::BitcoinMultisig, down()),
        (NetworkIdentity::LiquidSinglesig, down()),
    ]);

    let result = f.coordinator.login(LoginParams::software(credentials())).await;
    assert!(matches!(result, Err(Error::LoginFailed)));
    assert_eq!(f.coordinator.failures().len(), 3);
    assert!(!f.coordinator.logged());
}

#[tokio::test]
async fn test_host_unblinding_failure_is_classified() {
    let f = fixture(vec![
        (NetworkIdentity::BitcoinSinglesig, Script::funded()),
        (
            NetworkIdentity::LiquidSinglesig,
            Script {
                login_error: Some(
                    "HWW must enable host unblinding for singlesig wallets".to_string(),
                ),
                ..Script::funded()
            },
        ),
    ]);

    f.coordinator
        .login(LoginParams::software(credentials()))
        .await
        .unwrap();
    assert!(matches!(
        f.coordinator.failures().get(NetworkIdentity::LiquidSinglesig),
        Some(Error::HostUnblindingDisabled(_))
    ));
}

#[tokio::test]
async fn test_unfunded_secondary_network_is_purged() {
    let f = fixture(vec![
        (
            NetworkIdentity::BitcoinSinglesig,
            Script {
                discovered: false,
                ..Script::funded()
            },
        ),
        (
            NetworkIdentity::LiquidSinglesig,
            Script {
                discovered: false,
                ..Script::funded()
            },
        ),
    ]);

    f.coordinator
        .login(LoginParams::software(credentials()).with_full_restore(true))
        .await
        .unwrap();

    let outcomes = f.coordinator.login_outcomes();
    assert!(matches!(
        outcomes.get(&NetworkIdentity::BitcoinSinglesig),
        Some(LoginOutcome::LoggedIn(_))
    ));
    assert_eq!(
        outcomes.get(&NetworkIdentity::LiquidSinglesig),
        Some(&LoginOutcome::Skipped(SkipReason::Unfunded))
    );
    assert_eq!(
        *f.storage.removed.lock().unwrap(),
        vec![(
            NetworkIdentity::LiquidSinglesig,
            wallet_hash(NetworkIdentity::LiquidSinglesig)
        )]
    );
    assert_eq!(f.coordinator.active_sessions().len(), 1);
}

#[tokio::test]
async fn test_partial_login_skips_networks_without_state() {
    let account = WalletAccount {
        xpub_hash_id: Some(format!("xpub-{}", NetworkIdentity::BitcoinSinglesig)),
        ..Default::default()
    };
    let f = fixture_with(
        vec![
            (NetworkIdentity::BitcoinSinglesig, Script::funded()),
            (NetworkIdentity::LiquidSinglesig, Script::funded()),
            (NetworkIdentity::BitcoinMultisig, Script::funded()),
        ],
        MockNode::default(),
        Some(account),
    );
    f.storage.states.lock().unwrap().insert((
        NetworkIdentity::BitcoinSinglesig,
        wallet_hash(NetworkIdentity::BitcoinSinglesig),
    ));

    f.coordinator
        .login(LoginParams::software(credentials()))
        .await
        .unwrap();

    let outcomes = f.coordinator.login_outcomes();
    assert_eq!(
        outcomes.get(&NetworkIdentity::LiquidSinglesig),
        Some(&LoginOutcome::Skipped(SkipReason::NoLocalState))
    );
    assert!(f.coordinator.session(NetworkIdentity::BitcoinMultisig).unwrap().is_logged());
    assert_eq!(f.coordinator.active_sessions().len(), 2);
    assert!(f.coordinator.failures().is_empty());
}

#[tokio::test]
async fn test_rejected_secondary_login_is_skipped() {
    let f = fixture(vec![
        (NetworkIdentity::BitcoinSinglesig, Script::funded()),
        (
            NetworkIdentity::BitcoinMultisig,
            Script {
                login_error: Some("id_login_failed".to_string()),
                ..Script::funded()
            },
        ),
    ]);

    f.coordinator
        .login(LoginParams::software(credentials()))
        .await
        .unwrap();

    assert!(f.coordinator.failures().is_empty());
    assert_eq!(
        f.coordinator
            .login_outcomes()
            .get(&NetworkIdentity::BitcoinMultisig),
        Some(&LoginOutcome::Skipped(SkipReason::LoginRejected))
    );
    assert!(!f.coordinator.has_multisig());
}

#[tokio::test]
async fn test_hardware_login_skips_liquid_without_support() {
    let f = fixture(vec![
        (NetworkIdentity::BitcoinSinglesig, Script::funded()),
        (NetworkIdentity::LiquidSinglesig, Script::funded()),
    ]);
    let device = HwDevice {
        name: "Jade".to_string(),
        supports_liquid: 0,
        ..Default::default()
    };

    f.coordinator
        .login(LoginParams::hardware(device, "tpubD6NzVbkrYhZ4X"))
        .await
        .unwrap();

    assert_eq!(
        f.coordinator
            .login_outcomes()
            .get(&NetworkIdentity::LiquidSinglesig),
        Some(&LoginOutcome::Skipped(SkipReason::LiquidUnsupported))
    );
    assert_eq!(f.coordinator.hw_device().unwrap().name, "Jade");
}

#[tokio::test]
async fn test_settings_are_synced_from_multisig() {
    let f = fixture(vec![
        (NetworkIdentity::BitcoinSinglesig, Script::funded()),
        (NetworkIdentity::BitcoinMultisig, Script::funded()),
        (NetworkIdentity::LiquidSinglesig, Script::funded()),
    ]);

    f.coordinator
        .login(LoginParams::software(credentials()).with_full_restore(true))
        .await
        .unwrap();

    let mut pushed = f.world.settings_pushed.lock().unwrap().clone();
    pushed.sort();
    assert_eq!(
        pushed,
        vec![
            NetworkIdentity::BitcoinSinglesig,
            NetworkIdentity::LiquidSinglesig
        ]
    );

    let synced = f.coordinator.sync_settings().await.unwrap().unwrap();
    assert_eq!(synced.unit.as_deref(), Some("mBTC"));
}

// Aggregation

#[tokio::test]
async fn test_balances_sum_per_asset() {
    let f = fixture(vec![
        (
            NetworkIdentity::BitcoinSinglesig,
            Script {
                pointers: vec![0, 1],
                balances: BTreeMap::from([(0, json!({"btc": 100})), (1, json!({"btc": 50}))]),
                ..Script::funded()
            },
        ),
        (
            NetworkIdentity::LiquidSinglesig,
            Script {
                balances: BTreeMap::from([(0, json!({ LBTC_ASSET: 10 }))]),
                ..Script::funded()
            },
        ),
    ]);
    f.coordinator
        .login(LoginParams::software(credentials()))
        .await
        .unwrap();

    let subaccounts = f.coordinator.subaccounts(false).await.unwrap();
    assert_eq!(subaccounts.len(), 3);
    let total = f.coordinator.balances(&subaccounts).await.unwrap();
    assert_eq!(
        total,
        BTreeMap::from([("btc".to_string(), 150), (LBTC_ASSET.to_string(), 10)])
    );

    let cached = f.coordinator.cached_subaccounts();
    let liquid = cached
        .iter()
        .find(|s| s.network == NetworkIdentity::LiquidSinglesig)
        .unwrap();
    assert_eq!(liquid.btc(), Some(10));
    assert!(liquid.has_txs);
}

#[tokio::test]
async fn test_subaccounts_keep_cache_on_failure() {
    let f = fixture(vec![
        (
            NetworkIdentity::BitcoinSinglesig,
            Script {
                balances: BTreeMap::from([(0, json!({"btc": 7}))]),
                ..Script::funded()
            },
        ),
        (
            NetworkIdentity::LiquidSinglesig,
            Script {
                balances: BTreeMap::from([(0, json!({ LBTC_ASSET: 3 }))]),
                ..Script::funded()
            },
        ),
    ]);
    f.coordinator
        .login(LoginParams::software(credentials()))
        .await
        .unwrap();
    let subaccounts = f.coordinator.subaccounts(false).await.unwrap();
    f.coordinator.balances(&subaccounts).await.unwrap();

    f.world
        .update(NetworkIdentity::LiquidSinglesig, |s| s.subaccounts_error = true);
    let refreshed = f.coordinator.subaccounts(true).await.unwrap();

    assert_eq!(refreshed.len(), 2);
    let liquid: Vec<&Subaccount> = refreshed
        .iter()
        .filter(|s| s.network == NetworkIdentity::LiquidSinglesig)
        .collect();
    assert_eq!(liquid.len(), 1);
    assert_eq!(liquid[0].btc(), Some(3));
    assert_eq!(refreshed[0].btc(), Some(7));
}

#[tokio::test]
async fn test_refresh_then_failure_keeps_balance_and_activity() {
    let f = fixture(vec![(
        NetworkIdentity::BitcoinSinglesig,
        Script {
            balances: BTreeMap::from([(0, json!({"btc": 7}))]),
            ..Script::funded()
        },
    )]);
    f.coordinator
        .login(LoginParams::software(credentials()))
        .await
        .unwrap();
    let subaccounts = f.coordinator.subaccounts(false).await.unwrap();
    f.coordinator.balances(&subaccounts).await.unwrap();

    let refreshed = f.coordinator.subaccounts(true).await.unwrap();
    assert_eq!(refreshed[0].satoshi, Some(BTreeMap::from([("btc".to_string(), 7)])));
    assert!(refreshed[0].has_txs);

    f.world
        .update(NetworkIdentity::BitcoinSinglesig, |s| s.subaccounts_error = true);
    let kept = f.coordinator.subaccounts(false).await.unwrap();
    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].satoshi, Some(BTreeMap::from([("btc".to_string(), 7)])));
    assert!(kept[0].has_txs);
}

#[tokio::test]
async fn test_single_subaccount_refresh_adds_new_entries() {
    let f = fixture(vec![(
        NetworkIdentity::BitcoinSinglesig,
        Script {
            balances: BTreeMap::from([(0, json!({"btc": 5}))]),
            ..Script::funded()
        },
    )]);
    f.coordinator
        .login(LoginParams::software(credentials()))
        .await
        .unwrap();
    let subaccounts = f.coordinator.subaccounts(false).await.unwrap();
    f.coordinator.balances(&subaccounts).await.unwrap();

    let existing = f
        .coordinator
        .subaccount(NetworkIdentity::BitcoinSinglesig, 0)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(existing.btc(), Some(5));

    let created = f
        .coordinator
        .subaccount(NetworkIdentity::BitcoinSinglesig, 1)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(created.pointer, 1);

    let pointers: Vec<u32> = f
        .coordinator
        .cached_subaccounts()
        .iter()
        .filter(|s| s.network == NetworkIdentity::BitcoinSinglesig)
        .map(|s| s.pointer)
        .collect();
    assert_eq!(pointers, vec![0, 1]);
}

#[tokio::test]
async fn test_history_pages_until_short_page() {
    let f = fixture(vec![
        (
            NetworkIdentity::BitcoinSinglesig,
            Script {
                tx_total: 65,
                ..Script::funded()
            },
        ),
        (
            NetworkIdentity::LiquidSinglesig,
            Script {
                tx_total: PAGE_SIZE,
                ..Script::funded()
            },
        ),
    ]);
    f.coordinator
        .login(LoginParams::software(credentials()))
        .await
        .unwrap();
    let subaccounts = f.coordinator.cached_subaccounts();

    let bitcoin = f.coordinator.all_by_subaccount(&subaccounts[0]).await.unwrap();
    assert_eq!(bitcoin.len(), 65);
    assert_eq!(f.world.requests(NetworkIdentity::BitcoinSinglesig), 3);
    let hashes: Vec<String> = bitcoin.iter().filter_map(|tx| tx.txhash.clone()).collect();
    let expected: Vec<String> = (0..65)
        .map(|n| format!("{}-0-{}", NetworkIdentity::BitcoinSinglesig, n))
        .collect();
    assert_eq!(hashes, expected);

    let liquid = f.coordinator.all_by_subaccount(&subaccounts[1]).await.unwrap();
    assert_eq!(liquid.len(), 30);
    assert_eq!(f.world.requests(NetworkIdentity::LiquidSinglesig), 2);
    assert!(
        liquid
            .iter()
            .all(|tx| tx.subaccount.as_deref() == Some("electrum-liquid:0"))
    );
}

#[tokio::test]
async fn test_transactions_merge_newest_first() {
    let f = fixture(vec![
        (
            NetworkIdentity::BitcoinSinglesig,
            Script {
                tx_total: 3,
                ..Script::funded()
            },
        ),
        (
            NetworkIdentity::LiquidSinglesig,
            Script {
                tx_total: 2,
                ..Script::funded()
            },
        ),
    ]);
    f.coordinator
        .login(LoginParams::software(credentials()))
        .await
        .unwrap();
    let subaccounts = f.coordinator.cached_subaccounts();

    let page = f.coordinator.paged_transactions(&subaccounts, 0).await.unwrap();
    let times: Vec<i64> = page.iter().map(|tx| tx.created_at_ts).collect();
    assert_eq!(times, vec![3, 2, 2, 1, 1]);

    let empty = f.coordinator.paged_transactions(&subaccounts, 1).await.unwrap();
    assert!(empty.is_empty());
}

// Lifecycle

#[tokio::test]
async fn test_pause_and_resume_hint_logged_sessions() {
    let f = fixture(vec![
        (NetworkIdentity::BitcoinSinglesig, Script::funded()),
        (
            NetworkIdentity::BitcoinMultisig,
            Script {
                connect_error: Some("offline".to_string()),
                ..Script::funded()
            },
        ),
    ]);
    f.coordinator
        .login(LoginParams::software(credentials()))
        .await
        .unwrap();

    f.coordinator.pause().await;
    let bitcoin = f.coordinator.session(NetworkIdentity::BitcoinSinglesig).unwrap();
    assert!(bitcoin.is_paused());
    f.coordinator.resume().await;

    assert_eq!(
        f.world.hints(NetworkIdentity::BitcoinSinglesig),
        vec!["disconnect", "connect"]
    );
    assert!(f.world.hints(NetworkIdentity::BitcoinMultisig).is_empty());
}

#[tokio::test]
async fn test_session_events_reach_subscribers() {
    let f = fixture(vec![
        (NetworkIdentity::BitcoinSinglesig, Script::funded()),
        (NetworkIdentity::LiquidSinglesig, Script::funded()),
    ]);
    let mut events = f.coordinator.subscribe();
    f.coordinator
        .login(LoginParams::software(credentials()))
        .await
        .unwrap();

    let handler = f
        .world
        .handlers
        .lock()
        .unwrap()
        .get(&NetworkIdentity::LiquidSinglesig)
        .cloned()
        .unwrap();
    handler(json!({"event": "block", "block": {"block_height": 42}}));

    let event = tokio::time::timeout(Duration::from_secs(1), async {
        loop {
            let event = events.recv().await.unwrap();
            if matches!(event.kind, EventKind::Block { .. }) {
                return event;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(event.network, NetworkIdentity::LiquidSinglesig);
    assert_eq!(event.kind, EventKind::Block { block_height: 42 });
    assert_eq!(
        event.session_id,
        f.coordinator
            .session(NetworkIdentity::LiquidSinglesig)
            .unwrap()
            .id()
    );
}

#[tokio::test]
async fn test_system_messages_and_disconnect() {
    let f = fixture(vec![
        (NetworkIdentity::BitcoinSinglesig, Script::funded()),
        (NetworkIdentity::BitcoinMultisig, Script::funded()),
    ]);
    f.coordinator
        .login(LoginParams::software(credentials()))
        .await
        .unwrap();

    let messages = f.coordinator.load_system_messages().await;
    let multisig = messages
        .iter()
        .find(|m| m.network == NetworkIdentity::BitcoinMultisig)
        .unwrap();
    assert_eq!(multisig.text, "Scheduled maintenance");

    f.coordinator.disconnect().await;
    assert!(!f.coordinator.logged());
    assert!(f.coordinator.cached_subaccounts().is_empty());
}

// Lightning

fn lightning_params() -> LoginParams {
    let credentials = credentials();
    let lightning = WalletCoordinator::derive_lightning_credentials(&credentials).unwrap();
    LoginParams::software(credentials).with_lightning(lightning)
}

#[tokio::test]
async fn test_lightning_below_minimum_is_not_paid() {
    let f = fixture(vec![
        (NetworkIdentity::BitcoinSinglesig, Script::funded()),
        (NetworkIdentity::Lightning, Script::default()),
    ]);
    f.coordinator.login(lightning_params()).await.unwrap();

    let lightning = f.coordinator.lightning_session().unwrap();
    assert!(lightning.is_logged());
    assert!(
        f.coordinator
            .cached_subaccounts()
            .iter()
            .any(|s| s.kind == SubaccountType::Lightning)
    );

    let tx = lightning
        .create_transaction(LightningTransaction {
            input: "lnbc500n1".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(tx.satoshi, Some(50));
    assert_eq!(tx.error, "AmountBelowMinimum");
    assert_eq!(tx.memo, "coffee");

    let sent = lightning.send_transaction(&tx).await;
    assert!(matches!(sent, Err(Error::AmountBelowMinimum { .. })));
    assert_eq!(f.node.sends.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_new_lightning_node_is_dropped() {
    let f = fixture_with(
        vec![
            (NetworkIdentity::BitcoinSinglesig, Script::funded()),
            (NetworkIdentity::Lightning, Script::default()),
        ],
        MockNode {
            unknown_seed: true,
            ..Default::default()
        },
        None,
    );
    f.coordinator.login(lightning_params()).await.unwrap();

    assert_eq!(
        f.coordinator.login_outcomes().get(&NetworkIdentity::Lightning),
        Some(&LoginOutcome::Skipped(SkipReason::Unfunded))
    );
    assert!(!f.coordinator.lightning_session().unwrap().is_logged());
    assert!(f.storage.node_credentials.lock().unwrap().is_empty());
    assert!(f.coordinator.account().lightning_wallet_hash_id.is_some());
}

#[tokio::test]
async fn test_remove_lightning() {
    let f = fixture(vec![
        (NetworkIdentity::BitcoinSinglesig, Script::funded()),
        (NetworkIdentity::Lightning, Script::default()),
    ]);
    f.coordinator.login(lightning_params()).await.unwrap();
    assert_eq!(f.storage.node_credentials.lock().unwrap().len(), 1);
    assert_eq!(f.coordinator.active_sessions().len(), 2);

    f.coordinator.remove_lightning().await.unwrap();

    assert!(!f.coordinator.lightning_session().unwrap().is_logged());
    assert!(f.storage.node_credentials.lock().unwrap().is_empty());
    assert!(
        f.coordinator
            .cached_subaccounts()
            .iter()
            .all(|s| s.network != NetworkIdentity::Lightning)
    );
}

#[tokio::test]
async fn test_wallet_mismatch() {
    let account = WalletAccount {
        xpub_hash_id: Some("xpub-of-another-wallet".to_string()),
        ..Default::default()
    };
    let f = fixture_with(
        vec![(NetworkIdentity::BitcoinSinglesig, Script::funded())],
        MockNode::default(),
        Some(account),
    );

    let result = f.coordinator.check_wallet_mismatch(&credentials()).await;
    assert!(matches!(result, Err(Error::WalletMismatch)));

    let f = fixture(vec![(NetworkIdentity::BitcoinSinglesig, Script::funded())]);
    assert!(f.coordinator.check_wallet_mismatch(&credentials()).await.is_ok());
}
