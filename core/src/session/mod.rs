//! Network sessions.
//!
//! A [`NetworkSession`] is one of the three session kinds the coordinator
//! drives: an RPC backed [`SessionHandle`], a [`LightningSession`] or a
//! [`DescriptorSession`]. Every operation dispatches with an exhaustive match,
//! so a new backend kind has to say how it handles each one.

mod notifications;
mod rpc;

pub use rpc::{SessionHandle, SessionState};

use crate::error::{Error, Result};
use crate::lightning::LightningSession;
use crate::lwk::DescriptorSession;
use crate::storage::StateStorage;
use crate::types::{
    Balances, Credentials, HwDevice, LoginResult, NetworkIdentity, Settings, Subaccount,
    Transaction, WalletIdentifier,
};
use std::sync::Arc;
use uuid::Uuid;

/// Default confirmations required when reading balances.
pub const DEFAULT_NUM_CONFS: u32 = 0;

#[derive(Debug, Clone)]
pub enum NetworkSession {
    Rpc(SessionHandle),
    Lightning(LightningSession),
    Descriptor(DescriptorSession),
}

impl NetworkSession {
    pub fn network(&self) -> NetworkIdentity {
        match self {
            NetworkSession::Rpc(s) => s.network(),
            NetworkSession::Lightning(s) => s.network(),
            NetworkSession::Descriptor(s) => s.network(),
        }
    }

    /// Correlation id carried by this session's events.
    pub fn id(&self) -> Uuid {
        match self {
            NetworkSession::Rpc(s) => s.id(),
            NetworkSession::Lightning(s) => s.id(),
            NetworkSession::Descriptor(s) => s.id(),
        }
    }

    pub fn is_connected(&self) -> bool {
        match self {
            NetworkSession::Rpc(s) => s.is_connected(),
            NetworkSession::Lightning(s) => s.is_connected(),
            NetworkSession::Descriptor(s) => s.is_connected(),
        }
    }

    pub fn is_logged(&self) -> bool {
        match self {
            NetworkSession::Rpc(s) => s.is_logged(),
            NetworkSession::Lightning(s) => s.is_logged(),
            NetworkSession::Descriptor(s) => s.is_logged(),
        }
    }

    pub fn is_paused(&self) -> bool {
        match self {
            NetworkSession::Rpc(s) => s.is_paused(),
            NetworkSession::Lightning(s) => s.is_paused(),
            NetworkSession::Descriptor(_) => false,
        }
    }

    pub fn as_rpc(&self) -> Option<&SessionHandle> {
        match self {
            NetworkSession::Rpc(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_lightning(&self) -> Option<&LightningSession> {
        match self {
            NetworkSession::Lightning(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_descriptor(&self) -> Option<&DescriptorSession> {
        match self {
            NetworkSession::Descriptor(s) => Some(s),
            _ => None,
        }
    }

    pub async fn connect(&self) -> Result<()> {
        match self {
            NetworkSession::Rpc(s) => s.connect().await,
            NetworkSession::Lightning(s) => s.connect().await,
            NetworkSession::Descriptor(s) => s.connect().await,
        }
    }

    pub async fn disconnect(&self) -> Result<()> {
        match self {
            NetworkSession::Rpc(s) => s.disconnect().await,
            NetworkSession::Lightning(s) => s.disconnect().await,
            NetworkSession::Descriptor(s) => s.disconnect().await,
        }
    }

    /// Wallet identifiers for software credentials.
    pub async fn wallet_identifier(&self, credentials: &Credentials) -> Result<WalletIdentifier> {
        match self {
            NetworkSession::Rpc(s) => s.wallet_identifier(credentials).await,
            NetworkSession::Lightning(s) => s.wallet_identifier(credentials),
            NetworkSession::Descriptor(s) => s.wallet_identifier(credentials),
        }
    }

    /// Log in with exactly one of software credentials or a hardware device.
    pub async fn login_user(
        &self,
        credentials: Option<&Credentials>,
        device: Option<&HwDevice>,
    ) -> Result<LoginResult> {
        match self {
            NetworkSession::Rpc(s) => s.login_user(credentials, device).await,
            NetworkSession::Lightning(s) => match (credentials, device) {
                (Some(credentials), None) => s.login_user(credentials).await,
                (_, Some(_)) => Err(Error::Unsupported(
                    "Hardware wallet login for Lightning".to_string(),
                )),
                (None, None) => Err(Error::InvalidArgument(
                    "No login method specified".to_string(),
                )),
            },
            NetworkSession::Descriptor(s) => s.login_user(credentials, device).await,
        }
    }

    /// Remove the local state kept for `wallet_hash_id`.
    pub async fn remove_datadir(
        &self,
        storage: Arc<dyn StateStorage>,
        wallet_hash_id: &str,
    ) -> Result<()> {
        match self {
            NetworkSession::Rpc(s) => s.remove_datadir(storage, wallet_hash_id).await,
            NetworkSession::Lightning(s) => s.remove_datadir(wallet_hash_id).await,
            NetworkSession::Descriptor(_) => Ok(()),
        }
    }

    pub async fn subaccounts(&self, refresh: bool) -> Result<Vec<Subaccount>> {
        match self {
            NetworkSession::Rpc(s) => s.subaccounts(refresh).await,
            NetworkSession::Lightning(s) => Ok(s.subaccounts()),
            NetworkSession::Descriptor(_) => Ok(Vec::new()),
        }
    }

    pub async fn subaccount(&self, pointer: u32) -> Result<Option<Subaccount>> {
        match self {
            NetworkSession::Rpc(s) => s.subaccount(pointer).await.map(Some),
            NetworkSession::Lightning(s) => Ok((pointer == 0).then(|| s.subaccount())),
            NetworkSession::Descriptor(_) => Ok(None),
        }
    }

    pub async fn update_subaccount(&self, pointer: u32, hidden: bool) -> Result<()> {
        match self {
            NetworkSession::Rpc(s) => s.update_subaccount(pointer, hidden).await,
            _ => Err(Error::Unsupported("update_subaccount".to_string())),
        }
    }

    pub async fn balance(&self, pointer: u32) -> Result<Balances> {
        match self {
            NetworkSession::Rpc(s) => s.get_balance(pointer, DEFAULT_NUM_CONFS).await,
            NetworkSession::Lightning(s) => s.balance().await,
            NetworkSession::Descriptor(_) => Ok(Balances::new()),
        }
    }

    pub async fn transactions(&self, pointer: u32, first: u32, count: u32) -> Result<Vec<Transaction>> {
        match self {
            NetworkSession::Rpc(s) => s.transactions(pointer, first, count).await,
            NetworkSession::Lightning(s) => s.transactions(first, count).await,
            NetworkSession::Descriptor(_) => Ok(Vec::new()),
        }
    }

    /// Lightweight transport hint; not a teardown.
    pub async fn network_connect(&self) {
        match self {
            NetworkSession::Rpc(s) => s.network_connect().await,
            NetworkSession::Lightning(s) => s.network_connect().await,
            NetworkSession::Descriptor(_) => {}
        }
    }

    pub async fn network_disconnect(&self) {
        match self {
            NetworkSession::Rpc(s) => s.network_disconnect().await,
            NetworkSession::Lightning(s) => s.network_disconnect().await,
            NetworkSession::Descriptor(_) => {}
        }
    }

    pub async fn load_settings(&self) -> Result<Option<Settings>> {
        match self {
            NetworkSession::Rpc(s) => s.load_settings().await,
            _ => Ok(None),
        }
    }

    pub async fn change_settings(&self, settings: &Settings) -> Result<Option<Settings>> {
        match self {
            NetworkSession::Rpc(s) => s.change_settings(settings).await,
            _ => Ok(None),
        }
    }

    pub async fn system_message(&self) -> Result<Option<String>> {
        match self {
            NetworkSession::Rpc(s) => s.system_message().await,
            _ => Ok(None),
        }
    }

    /// Whether a freshly restored wallet holds funds on this network.
    pub async fn discovery(&self) -> Result<bool> {
        match self {
            NetworkSession::Rpc(s) => s.discovery().await,
            NetworkSession::Lightning(_) | NetworkSession::Descriptor(_) => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendFuture, NotificationHandler, RpcSession, RpcSessionFactory, TwoFactorCall};
    use crate::config::{NetworkSettings, ResolverConfig};
    use crate::events::{EventKind, EventRouter, EventStream, SubaccountEvent};
    use crate::resolver::scripted::ScriptedCall;
    use serde_json::{Value, json};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct MockRpc {
        connects: Mutex<u32>,
        logins: Mutex<u32>,
        config_loads: Mutex<u32>,
        reset_active: Mutex<bool>,
        hints: Mutex<Vec<String>>,
        handler: Mutex<Option<NotificationHandler>>,
    }

    fn done(result: Value) -> BackendFuture<'static, Box<dyn TwoFactorCall>> {
        Box::pin(async move { Ok(Box::new(ScriptedCall::done(result)) as Box<dyn TwoFactorCall>) })
    }

    impl RpcSession for MockRpc {
        fn connect(&self, _net_params: Value) -> BackendFuture<'_, ()> {
            Box::pin(async move {
                *self.connects.lock().unwrap() += 1;
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(())
            })
        }

        fn set_notification_handler(&self, handler: NotificationHandler) {
            *self.handler.lock().unwrap() = Some(handler);
        }

        fn reconnect_hint(&self, hint: Value) -> BackendFuture<'_, ()> {
            Box::pin(async move {
                self.hints
                    .lock()
                    .unwrap()
                    .push(hint["hint"].as_str().unwrap_or_default().to_string());
                Ok(())
            })
        }

        fn wallet_identifier(
            &self,
            _net_params: Value,
            _details: Value,
        ) -> BackendFuture<'_, WalletIdentifier> {
            Box::pin(async {
                Ok(WalletIdentifier {
                    xpub_hash_id: "xpubhash".to_string(),
                    wallet_hash_id: "wallethash".to_string(),
                })
            })
        }

        fn login_user_sw(&self, _credentials: Credentials) -> BackendFuture<'_, Box<dyn TwoFactorCall>> {
            *self.logins.lock().unwrap() += 1;
            done(json!({}))
        }

        fn login_user_hw(&self, _device: HwDevice) -> BackendFuture<'_, Box<dyn TwoFactorCall>> {
            done(json!({"xpub_hash_id": "hwxpub", "wallet_hash_id": "hwwallet"}))
        }

        fn get_subaccounts(&self, _refresh: bool) -> BackendFuture<'_, Box<dyn TwoFactorCall>> {
            done(json!({"subaccounts": [
                {"name": "", "pointer": 1, "type": "p2sh-p2wpkh", "hidden": false},
                {"name": "", "pointer": 0, "type": "p2wpkh", "hidden": false, "bip44_discovered": false},
            ]}))
        }

        fn get_subaccount(&self, pointer: u32) -> BackendFuture<'_, Box<dyn TwoFactorCall>> {
            done(json!({"name": "", "pointer": pointer, "type": "p2wpkh", "hidden": false}))
        }

        fn update_subaccount(&self, _details: Value) -> BackendFuture<'_, Box<dyn TwoFactorCall>> {
            done(Value::Null)
        }

        fn get_balance(&self, _pointer: u32, _num_confs: u32) -> BackendFuture<'_, Box<dyn TwoFactorCall>> {
            done(json!({"btc": 1000}))
        }

        fn get_transactions(
            &self,
            _pointer: u32,
            _first: u32,
            _count: u32,
        ) -> BackendFuture<'_, Box<dyn TwoFactorCall>> {
            done(json!({"transactions": []}))
        }

        fn get_two_factor_config(&self) -> BackendFuture<'_, Value> {
            Box::pin(async move {
                *self.config_loads.lock().unwrap() += 1;
                let reset = *self.reset_active.lock().unwrap();
                Ok(json!({
                    "enabled_methods": ["sms"],
                    "any_enabled": true,
                    "twofactor_reset": {"is_active": reset, "days_remaining": if reset { 30 } else { -1 }},
                }))
            })
        }

        fn get_settings(&self) -> BackendFuture<'_, Value> {
            Box::pin(async { Ok(json!({"unit": "BTC"})) })
        }

        fn change_settings(&self, _settings: Value) -> BackendFuture<'_, Box<dyn TwoFactorCall>> {
            done(Value::Null)
        }

        fn get_system_message(&self) -> BackendFuture<'_, Option<String>> {
            Box::pin(async { Ok(Some(String::new())) })
        }
    }

    struct SharedFactory(Arc<MockRpc>);

    impl RpcSessionFactory for SharedFactory {
        fn create(&self, _network: NetworkIdentity) -> Arc<dyn RpcSession> {
            self.0.clone()
        }
    }

    fn handle(network: NetworkIdentity, settings: NetworkSettings) -> (SessionHandle, Arc<MockRpc>, EventStream) {
        let router = EventRouter::new();
        let stream = router.subscribe();
        let rpc = Arc::new(MockRpc::default());
        let session = SessionHandle::new(
            network,
            settings,
            ResolverConfig {
                connection_attempts: 2,
                retry_delay: Duration::from_millis(5),
            },
            Arc::new(SharedFactory(rpc.clone())),
            &router,
        );
        (session, rpc, stream)
    }

    async fn next(stream: &mut EventStream) -> EventKind {
        tokio::time::timeout(Duration::from_secs(1), stream.recv())
            .await
            .unwrap()
            .unwrap()
            .kind
    }

    async fn logged_in(network: NetworkIdentity) -> (SessionHandle, Arc<MockRpc>, EventStream) {
        let (session, rpc, stream) = handle(network, NetworkSettings::default());
        let credentials = Credentials::from_mnemonic("abandon about", None);
        session.login_user(Some(&credentials), None).await.unwrap();
        (session, rpc, stream)
    }

    #[tokio::test]
    async fn test_login_requires_exactly_one_method() {
        let (session, _, _) = handle(NetworkIdentity::BitcoinSinglesig, NetworkSettings::default());
        let credentials = Credentials::from_mnemonic("abandon about", None);
        let device = HwDevice::default();

        let both = session.login_user(Some(&credentials), Some(&device)).await;
        assert!(matches!(both, Err(Error::InvalidArgument(_))));
        let neither = session.login_user(Some(&Credentials::default()), None).await;
        assert!(matches!(neither, Err(Error::InvalidArgument(_))));
        assert!(!session.is_logged());
    }

    #[tokio::test]
    async fn test_login_falls_back_to_identifier_lookup() {
        let (session, _, _) = logged_in(NetworkIdentity::BitcoinMultisig).await;
        assert!(session.is_connected());
        assert!(session.is_logged());
        assert_eq!(session.two_factor_config().unwrap().enabled_methods, vec!["sms"]);

        let (hw, _, _) = handle(NetworkIdentity::LiquidSinglesig, NetworkSettings::default());
        let login = hw.login_user(None, Some(&HwDevice::default())).await.unwrap();
        assert_eq!(login.wallet_hash_id, "hwwallet");
        assert!(hw.snapshot().hw_device.is_some());
    }

    #[tokio::test]
    async fn test_subaccounts_are_tagged_and_sorted() {
        let (session, _, _) = logged_in(NetworkIdentity::BitcoinSinglesig).await;
        let network = NetworkSession::Rpc(session);
        let subaccounts = network.subaccounts(false).await.unwrap();
        let pointers: Vec<u32> = subaccounts.iter().map(|s| s.pointer).collect();
        assert_eq!(pointers, vec![0, 1]);
        assert!(subaccounts.iter().all(|s| s.network == NetworkIdentity::BitcoinSinglesig));

        // Pointer 0 was not discovered, so it gets hidden
        assert!(!network.discovery().await.unwrap());
        assert_eq!(network.balance(0).await.unwrap()["btc"], 1000);
        assert_eq!(network.system_message().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_block_suppressed_while_paused() {
        let (session, _, mut stream) = logged_in(NetworkIdentity::BitcoinSinglesig).await;
        session.handle_notification(json!({"event": "block", "block": {"block_height": 10}}));
        assert_eq!(next(&mut stream).await, EventKind::Block { block_height: 10 });

        session.network_disconnect().await;
        session.handle_notification(json!({"event": "block", "block": {"block_height": 11}}));
        session.handle_notification(json!({"event": "tor", "tor": {"progress": 50}}));
        assert_eq!(next(&mut stream).await, EventKind::Tor(json!({"progress": 50})));
        assert_eq!(session.block_height(), 11);
    }

    #[tokio::test]
    async fn test_incoming_transaction_changes_addresses() {
        let (session, _, mut stream) = logged_in(NetworkIdentity::BitcoinSinglesig).await;
        session.handle_notification(json!({
            "event": "transaction",
            "transaction": {"txhash": "ff", "subaccounts": [0, 2], "type": "incoming", "satoshi": 5}
        }));
        assert!(matches!(next(&mut stream).await, EventKind::Transaction(tx) if tx.txhash == "ff"));
        for pointer in [0, 2] {
            assert_eq!(
                next(&mut stream).await,
                EventKind::Subaccount {
                    pointer,
                    event: SubaccountEvent::AddressChanged
                }
            );
        }
    }

    #[tokio::test]
    async fn test_disconnect_pauses_and_reconnect_resumes() {
        let (session, rpc, mut stream) = logged_in(NetworkIdentity::BitcoinSinglesig).await;
        let notify = rpc.handler.lock().unwrap().clone().unwrap();

        notify(json!({"event": "network", "network": {"current_state": "disconnected"}}));
        assert!(matches!(next(&mut stream).await, EventKind::Network(c) if c.is_disconnected()));
        assert!(session.is_paused());

        notify(json!({"event": "network", "network": {"current_state": "connected"}}));
        assert!(matches!(next(&mut stream).await, EventKind::Network(c) if !c.is_disconnected()));
        assert!(!session.is_paused());
        // Initial login plus the hidden reconnect
        assert_eq!(*rpc.logins.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_personal_node_unreachable_before_login() {
        let mut settings = NetworkSettings::default();
        settings
            .personal_electrum
            .insert("mainnet".to_string(), "ssl://node.local:50002".to_string());
        let (session, _, mut stream) = handle(NetworkIdentity::BitcoinSinglesig, settings);
        session.connect().await.unwrap();

        session.handle_notification(json!({"event": "network", "network": {"current_state": "disconnected"}}));
        assert_eq!(session.failures().len(), 1);
        assert!(session.failures()[0].contains("personal Electrum server"));
        assert!(stream.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_settings_notification_updates_snapshot() {
        let (session, _, mut stream) = logged_in(NetworkIdentity::BitcoinMultisig).await;
        session.handle_notification(json!({"event": "settings", "settings": {"unit": "sats", "altimeout": 5}}));
        let EventKind::Settings(settings) = next(&mut stream).await else {
            panic!("expected settings event");
        };
        assert_eq!(settings.unit.as_deref(), Some("sats"));
        assert_eq!(session.settings().unwrap().altimeout, Some(5));
    }

    #[tokio::test]
    async fn test_disconnect_resets_and_hints_are_queued() {
        let (session, rpc, _) = logged_in(NetworkIdentity::LiquidSinglesig).await;
        session.network_disconnect().await;
        session.network_connect().await;
        assert_eq!(*rpc.hints.lock().unwrap(), vec!["disconnect", "connect"]);

        session.disconnect().await.unwrap();
        let state = session.snapshot();
        assert!(!state.connected && !state.logged && !state.paused);
    }

    #[tokio::test]
    async fn test_concurrent_connects_open_transport_once() {
        let (session, rpc, _) = handle(NetworkIdentity::BitcoinSinglesig, NetworkSettings::default());
        let (first, second) = tokio::join!(session.connect(), session.connect());
        first.unwrap();
        second.unwrap();
        assert!(session.is_connected());
        assert_eq!(*rpc.connects.lock().unwrap(), 1);

        session.connect().await.unwrap();
        assert_eq!(*rpc.connects.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_twofactor_reset_refreshes_config() {
        let (session, rpc, mut stream) = logged_in(NetworkIdentity::BitcoinMultisig).await;
        assert_eq!(session.is_reset_active(), Some(false));
        let loads_after_login = *rpc.config_loads.lock().unwrap();

        *rpc.reset_active.lock().unwrap() = true;
        session.handle_notification(json!({
            "event": "twofactor_reset",
            "twofactor_reset": {"is_active": true, "is_disputed": false, "days_remaining": 30}
        }));
        let EventKind::TwoFactorReset(reset) = next(&mut stream).await else {
            panic!("expected two factor reset event");
        };
        assert!(reset.is_active);
        assert_eq!(reset.days_remaining, 30);

        tokio::time::timeout(Duration::from_secs(1), async {
            while session.is_reset_active() != Some(true) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(*rpc.config_loads.lock().unwrap(), loads_after_login + 1);
    }

    #[tokio::test]
    async fn test_ticker_is_passed_through() {
        let (session, _, mut stream) = logged_in(NetworkIdentity::LiquidMultisig).await;
        let ticker = json!({"currency": "USD", "exchange": "BITFINEX", "rate": "64000.12"});
        session.handle_notification(json!({"event": "ticker", "ticker": ticker.clone()}));
        assert_eq!(next(&mut stream).await, EventKind::Ticker(ticker));
    }
}
