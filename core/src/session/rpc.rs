//! Session over the wallet RPC backend.

use crate::backend::{
    BackendError, ChallengeResolver, HwSigner, NotificationHandler, RpcSession, RpcSessionFactory,
    TwoFactorCall,
};
use crate::config::{NetworkSettings, ResolverConfig};
use crate::error::{Error, Result};
use crate::events::{EventRouter, EventSink};
use crate::queue::SerialQueue;
use crate::resolver::TwoFactorResolver;
use crate::storage::StateStorage;
use crate::types::{
    Balances, Credentials, HwDevice, LoginResult, NetworkIdentity, Settings, Subaccount,
    Transaction, TwoFactorConfig, WalletIdentifier,
};
use serde_json::{Value, json};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use tokio::runtime::Handle;
use uuid::Uuid;

/// Parameters whose presence hides a call's payload from the log.
const SENSITIVE_KEYS: [&str; 3] = ["mnemonic", "password", "pin"];

/// Mutable state of one session.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    pub connected: bool,
    pub logged: bool,
    /// Transport degraded; a reconnect is pending.
    pub paused: bool,
    pub block_height: u32,
    /// Human-readable failures collected while connecting.
    pub failures: Vec<String>,
    pub settings: Option<Settings>,
    pub two_factor_config: Option<TwoFactorConfig>,
    pub hw_device: Option<HwDevice>,
}

pub(crate) struct SessionInner {
    pub(crate) id: Uuid,
    pub(crate) network: NetworkIdentity,
    pub(crate) settings: NetworkSettings,
    resolver_config: ResolverConfig,
    factory: Arc<dyn RpcSessionFactory>,
    transport: RwLock<Arc<dyn RpcSession>>,
    pub(crate) state: Mutex<SessionState>,
    pub(crate) queue: SerialQueue,
    pub(crate) events: EventSink,
    challenge: RwLock<Option<Arc<dyn ChallengeResolver>>>,
    hw_signer: RwLock<Option<Arc<dyn HwSigner>>>,
    /// Runtime captured on connect, used to run async work for notifications
    /// that arrive on foreign threads.
    pub(crate) runtime: Mutex<Option<Handle>>,
}

/// Handle to one network session.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct SessionHandle {
    pub(crate) inner: Arc<SessionInner>,
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.inner.id)
            .field("network", &self.inner.network)
            .field("state", &*self.state())
            .finish()
    }
}

impl SessionHandle {
    /// Create an unconnected session.
    ///
    /// # Arguments
    /// * `network` - The network this session serves
    /// * `settings` - Transport settings (tor, proxy, personal Electrum server)
    /// * `resolver_config` - Two-factor connection grace
    /// * `factory` - Creates the underlying RPC transport, again after every disconnect
    /// * `router` - Event router receiving this session's events
    pub fn new(
        network: NetworkIdentity,
        settings: NetworkSettings,
        resolver_config: ResolverConfig,
        factory: Arc<dyn RpcSessionFactory>,
        router: &EventRouter,
    ) -> Self {
        let id = Uuid::new_v4();
        let transport = factory.create(network);
        Self {
            inner: Arc::new(SessionInner {
                id,
                network,
                settings,
                resolver_config,
                factory,
                transport: RwLock::new(transport),
                state: Mutex::new(SessionState::default()),
                queue: SerialQueue::new(network.as_str()),
                events: router.sink(id, network),
                challenge: RwLock::new(None),
                hw_signer: RwLock::new(None),
                runtime: Mutex::new(None),
            }),
        }
    }

    /// Correlation id attached to this session's events.
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn network(&self) -> NetworkIdentity {
        self.inner.network
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, SessionState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of the session state.
    pub fn snapshot(&self) -> SessionState {
        self.state().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.state().connected
    }

    pub fn is_logged(&self) -> bool {
        self.state().logged
    }

    pub fn is_paused(&self) -> bool {
        self.state().paused
    }

    pub fn block_height(&self) -> u32 {
        self.state().block_height
    }

    pub fn failures(&self) -> Vec<String> {
        self.state().failures.clone()
    }

    pub fn settings(&self) -> Option<Settings> {
        self.state().settings.clone()
    }

    pub fn two_factor_config(&self) -> Option<TwoFactorConfig> {
        self.state().two_factor_config.clone()
    }

    /// Whether a two-factor reset is in progress.
    pub fn is_reset_active(&self) -> Option<bool> {
        self.state()
            .two_factor_config
            .as_ref()
            .map(|c| c.twofactor_reset.is_active)
    }

    /// Personal Electrum endpoint configured for this session.
    pub fn personal_electrum_url(&self) -> Option<&str> {
        self.inner.settings.personal_electrum_url(self.inner.network)
    }

    pub fn set_challenge_resolver(&self, resolver: Option<Arc<dyn ChallengeResolver>>) {
        *self.inner.challenge.write().unwrap_or_else(PoisonError::into_inner) = resolver;
    }

    pub fn set_hw_signer(&self, signer: Option<Arc<dyn HwSigner>>) {
        *self.inner.hw_signer.write().unwrap_or_else(PoisonError::into_inner) = signer;
    }

    fn transport(&self) -> Arc<dyn RpcSession> {
        self.inner
            .transport
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn sink(&self) -> &EventSink {
        &self.inner.events
    }

    pub(crate) fn log_call(&self, name: &str, params: &Value) {
        let contains_sensitive = |value: &Value| {
            value
                .as_object()
                .is_some_and(|obj| SENSITIVE_KEYS.iter().any(|k| obj.contains_key(*k)))
        };
        let sensitive =
            contains_sensitive(params) || params.get("result").is_some_and(contains_sensitive);
        if sensitive {
            log::info!("RPC {} {}", self.inner.network, name);
        } else {
            log::info!("RPC {} {} {}", self.inner.network, name, params);
        }
    }

    /// Connect the transport. Does nothing when already connected.
    ///
    /// The connected check is repeated inside the queued job, so concurrent
    /// callers open the transport once.
    pub async fn connect(&self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }
        if let Ok(runtime) = Handle::try_current() {
            *self.inner.runtime.lock().unwrap_or_else(PoisonError::into_inner) = Some(runtime);
        }
        if self.inner.settings.tor {
            self.network_connect().await;
        }
        let session = self.clone();
        self.inner
            .queue
            .add(async move { session.connect_transport().await })
            .await
    }

    async fn connect_transport(&self) -> Result<()> {
        {
            let mut state = self.state();
            if state.connected {
                return Ok(());
            }
            state.failures.clear();
            state.paused = false;
        }
        let transport = self.transport();
        transport.set_notification_handler(self.notification_handler());

        let params = self.inner.settings.to_network_params(self.inner.network);
        self.log_call("connect", &params);
        match transport.connect(params).await {
            Ok(()) => {
                self.state().connected = true;
                log::info!("{} connected", self.inner.network);
                Ok(())
            }
            Err(err) => {
                log::warn!("{} connect failed: {}", self.inner.network, err);
                Err(map_connect_error(err))
            }
        }
    }

    fn notification_handler(&self) -> NotificationHandler {
        let weak: Weak<SessionInner> = Arc::downgrade(&self.inner);
        Arc::new(move |notification: Value| {
            if let Some(inner) = weak.upgrade() {
                SessionHandle { inner }.handle_notification(notification);
            }
        })
    }

    /// Tear down: reset state and, in queue order, replace the transport with a
    /// fresh unconnected one.
    pub async fn disconnect(&self) -> Result<()> {
        {
            let mut state = self.state();
            state.logged = false;
            state.connected = false;
            state.paused = false;
            state.failures.clear();
        }
        let inner = self.inner.clone();
        let replaced = self
            .inner
            .queue
            .add(async move {
                let fresh = inner.factory.create(inner.network);
                *inner.transport.write().unwrap_or_else(PoisonError::into_inner) = fresh;
                Ok(())
            })
            .await;
        if let Err(err) = &replaced {
            log::warn!("{} disconnect: {}", self.inner.network, err);
        }
        log::info!("{} disconnected", self.inner.network);
        replaced
    }

    /// Wallet identifiers for software credentials.
    pub async fn wallet_identifier(&self, credentials: &Credentials) -> Result<WalletIdentifier> {
        let details = serde_json::to_value(credentials)?;
        self.lookup_wallet_identifier(details).await
    }

    /// Wallet identifiers for a hardware wallet's master xpub.
    pub async fn wallet_identifier_for_xpub(&self, master_xpub: &str) -> Result<WalletIdentifier> {
        self.lookup_wallet_identifier(json!({ "master_xpub": master_xpub }))
            .await
    }

    async fn lookup_wallet_identifier(&self, details: Value) -> Result<WalletIdentifier> {
        let params = self.inner.settings.to_network_params(self.inner.network);
        Ok(self.transport().wallet_identifier(params, details).await?)
    }

    /// Remove the local state of `wallet_hash_id`, in queue order.
    pub async fn remove_datadir(
        &self,
        storage: Arc<dyn StateStorage>,
        wallet_hash_id: &str,
    ) -> Result<()> {
        let network = self.inner.network;
        let wallet_hash_id = wallet_hash_id.to_string();
        self.inner
            .queue
            .add(async move { storage.remove_wallet_state(network, &wallet_hash_id).await })
            .await
    }

    /// Log in with exactly one of software credentials or a hardware device.
    pub async fn login_user(
        &self,
        credentials: Option<&Credentials>,
        device: Option<&HwDevice>,
    ) -> Result<LoginResult> {
        let credentials = credentials.filter(|c| !c.is_empty());
        match (credentials, device) {
            (Some(credentials), None) => self.login_user_sw(credentials).await,
            (None, Some(device)) => self.login_user_hw(device).await,
            (Some(_), Some(_)) => Err(Error::InvalidArgument(
                "Pass either credentials or a device, not both".to_string(),
            )),
            (None, None) => Err(Error::InvalidArgument(
                "No login method specified".to_string(),
            )),
        }
    }

    async fn login_user_sw(&self, credentials: &Credentials) -> Result<LoginResult> {
        self.connect().await?;
        // Identifier lookup fails for some watch-only credentials
        let identifier = match self.wallet_identifier(credentials).await {
            Ok(identifier) => Some(identifier),
            Err(err) => {
                log::debug!("{} wallet identifier unavailable: {}", self.inner.network, err);
                None
            }
        };
        self.log_call("login_user_sw", &serde_json::to_value(credentials)?);
        let call = self.transport().login_user_sw(credentials.clone()).await?;
        let result = self.resolve(call).await?;
        self.on_login(result, identifier, None).await
    }

    async fn login_user_hw(&self, device: &HwDevice) -> Result<LoginResult> {
        self.connect().await?;
        self.log_call("login_user_hw", &serde_json::to_value(device)?);
        let call = self.transport().login_user_hw(device.clone()).await?;
        let result = self.resolve(call).await?;
        self.on_login(result, None, Some(device.clone())).await
    }

    async fn on_login(
        &self,
        result: Value,
        identifier: Option<WalletIdentifier>,
        device: Option<HwDevice>,
    ) -> Result<LoginResult> {
        let mut login: LoginResult = serde_json::from_value(result).unwrap_or_default();
        if let Some(identifier) = identifier {
            if login.wallet_hash_id.is_empty() {
                login.wallet_hash_id = identifier.wallet_hash_id;
            }
            if login.xpub_hash_id.is_empty() {
                login.xpub_hash_id = identifier.xpub_hash_id;
            }
        }
        {
            let mut state = self.state();
            state.logged = true;
            state.hw_device = device;
        }
        if self.inner.network.is_multisig() {
            if let Err(err) = self.load_two_factor_config().await {
                log::warn!("{} two factor config: {}", self.inner.network, err);
            }
        }
        log::info!("{} logged in", self.inner.network);
        Ok(login)
    }

    fn resolver(&self) -> TwoFactorResolver {
        TwoFactorResolver::new(self.inner.network, self.inner.resolver_config)
            .with_challenge(
                self.inner
                    .challenge
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone(),
            )
            .with_hw_signer(
                self.inner
                    .hw_signer
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone(),
            )
            .with_two_factor_config(self.two_factor_config())
    }

    /// Drive a two-factor call while the session stays connected and not paused.
    pub async fn resolve(&self, call: Box<dyn TwoFactorCall>) -> Result<Value> {
        let inner = self.inner.clone();
        self.resolver()
            .resolve(call, move || {
                let state = inner.state.lock().unwrap_or_else(PoisonError::into_inner);
                state.connected && !state.paused
            })
            .await
    }

    /// Hidden re-login with empty credentials, restoring a dropped backend session.
    pub(crate) async fn reconnect(&self) -> Result<()> {
        self.log_call("reconnect", &json!({}));
        let call = self.transport().login_user_sw(Credentials::default()).await?;
        let inner = self.inner.clone();
        // The session is paused while reconnecting
        self.resolver()
            .resolve(call, move || {
                inner
                    .state
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .connected
            })
            .await?;
        Ok(())
    }

    /// Subaccounts of this session, sorted.
    pub async fn subaccounts(&self, refresh: bool) -> Result<Vec<Subaccount>> {
        self.log_call("get_subaccounts", &json!({ "refresh": refresh }));
        let call = self.transport().get_subaccounts(refresh).await?;
        let result = self.resolve(call).await?;
        let items = result
            .get("subaccounts")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let mut subaccounts = items
            .into_iter()
            .map(|item| self.parse_subaccount(item))
            .collect::<Result<Vec<_>>>()?;
        subaccounts.sort_by(|a, b| a.display_order(b));
        Ok(subaccounts)
    }

    pub async fn subaccount(&self, pointer: u32) -> Result<Subaccount> {
        self.log_call("get_subaccount", &json!({ "subaccount": pointer }));
        let call = self.transport().get_subaccount(pointer).await?;
        let result = self.resolve(call).await?;
        self.parse_subaccount(result)
    }

    fn parse_subaccount(&self, mut item: Value) -> Result<Subaccount> {
        if let Some(obj) = item.as_object_mut() {
            obj.insert("network".to_string(), json!(self.inner.network.as_str()));
        }
        Ok(serde_json::from_value(item)?)
    }

    pub async fn update_subaccount(&self, pointer: u32, hidden: bool) -> Result<()> {
        let details = json!({ "subaccount": pointer, "hidden": hidden });
        self.log_call("update_subaccount", &details);
        let call = self.transport().update_subaccount(details).await?;
        self.resolve(call).await?;
        Ok(())
    }

    pub async fn get_balance(&self, pointer: u32, num_confs: u32) -> Result<Balances> {
        self.log_call(
            "get_balance",
            &json!({ "subaccount": pointer, "num_confs": num_confs }),
        );
        let call = self.transport().get_balance(pointer, num_confs).await?;
        let result = self.resolve(call).await?;
        Ok(serde_json::from_value(result)?)
    }

    /// One page of transactions for a subaccount.
    pub async fn transactions(&self, pointer: u32, first: u32, count: u32) -> Result<Vec<Transaction>> {
        self.log_call(
            "get_transactions",
            &json!({ "subaccount": pointer, "first": first, "count": count }),
        );
        let call = self.transport().get_transactions(pointer, first, count).await?;
        let result = self.resolve(call).await?;
        let items = result
            .get("transactions")
            .cloned()
            .unwrap_or_else(|| json!([]));
        Ok(serde_json::from_value(items)?)
    }

    pub async fn load_two_factor_config(&self) -> Result<Option<TwoFactorConfig>> {
        let data = self.transport().get_two_factor_config().await?;
        let config: TwoFactorConfig = serde_json::from_value(data)?;
        self.state().two_factor_config = Some(config.clone());
        Ok(Some(config))
    }

    pub async fn load_settings(&self) -> Result<Option<Settings>> {
        let data = self.transport().get_settings().await?;
        let settings: Settings = serde_json::from_value(data)?;
        self.state().settings = Some(settings.clone());
        Ok(Some(settings))
    }

    pub async fn change_settings(&self, settings: &Settings) -> Result<Option<Settings>> {
        let params = serde_json::to_value(settings)?;
        self.log_call("change_settings", &params);
        let call = self.transport().change_settings(params).await?;
        let result = self.resolve(call).await?;
        if result.is_null() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_value(result)?))
    }

    pub async fn system_message(&self) -> Result<Option<String>> {
        Ok(self
            .transport()
            .get_system_message()
            .await?
            .filter(|m| !m.is_empty()))
    }

    /// Detect funds on a freshly restored singlesig wallet.
    ///
    /// Hides an undiscovered default subaccount. Returns whether any subaccount
    /// was discovered.
    pub async fn discovery(&self) -> Result<bool> {
        let subaccounts = self
            .subaccounts(true)
            .await
            .map_err(|_| Error::ConnectionFailed(None))?;
        if let Some(first) = subaccounts.iter().find(|s| s.pointer == 0) {
            if first.network.is_singlesig() && !first.bip44_discovered.unwrap_or(false) {
                self.update_subaccount(0, true).await?;
            }
        }
        Ok(subaccounts
            .iter()
            .any(|s| s.bip44_discovered.unwrap_or(false)))
    }

    /// Hint the transport to (re)connect.
    pub async fn network_connect(&self) {
        self.send_hint("connect").await;
    }

    /// Hint the transport to drop its connection; the session is paused.
    pub async fn network_disconnect(&self) {
        self.state().paused = true;
        self.send_hint("disconnect").await;
    }

    async fn send_hint(&self, hint: &'static str) {
        let session = self.clone();
        let sent = self
            .inner
            .queue
            .add(async move {
                let hint = json!({ "tor_hint": hint, "hint": hint });
                session.log_call("reconnect_hint", &hint);
                session.transport().reconnect_hint(hint).await?;
                Ok(())
            })
            .await;
        if let Err(err) = sent {
            log::debug!("{} reconnect hint failed: {}", self.inner.network, err);
        }
    }
}

/// Transport failures surface as connection failures, with the backend's
/// message when it has one.
fn map_connect_error(err: Error) -> Error {
    match err {
        Error::Backend(
            BackendError::Generic(message)
            | BackendError::SessionLost(message)
            | BackendError::Timeout(message),
        ) => Error::ConnectionFailed(message),
        _ => Error::ConnectionFailed(None),
    }
}
