//! Multi-network wallet coordinator.
//!
//! A [`WalletCoordinator`] owns one session per network of a wallet and fans
//! operations out to them concurrently. A failing network never fails its
//! siblings: login errors land in the [`Failures`] map, aggregation errors are
//! logged and the network contributes nothing.

use crate::backend::{
    AssetsProvider, ChallengeResolver, DescriptorWalletFactory, HwSigner, LightningNodeFactory,
    RpcSessionFactory,
};
use crate::config::CoordinatorConfig;
use crate::error::{Error, HOST_UNBLINDING_MESSAGE, Result};
use crate::events::{EventRouter, EventStream};
use crate::identity::WalletKeys;
use crate::lightning::LightningSession;
use crate::lwk::DescriptorSession;
use crate::registry::AssetRegistry;
use crate::session::{NetworkSession, SessionHandle};
use crate::storage::{StateStorage, StateStorageExt};
use crate::types::{
    Balances, Credentials, HwDevice, LoginResult, NetworkIdentity, Settings, Subaccount,
    SystemMessage, Transaction, WalletAccount, WalletIdentifier, sort_by_recency,
};
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Transactions fetched per page.
pub const PAGE_SIZE: u32 = 30;

/// Per-network login failures.
#[derive(Debug, Clone, Default)]
pub struct Failures {
    errors: BTreeMap<NetworkIdentity, Arc<Error>>,
}

impl Failures {
    /// Record the failure of `network`, replacing any earlier one.
    ///
    /// A hardware wallet refusing host unblinding is stored as
    /// [`Error::HostUnblindingDisabled`].
    pub fn add(&mut self, network: NetworkIdentity, error: Error) {
        let error = match error {
            Error::TwoFactorChallengeFailure(msg) if msg.contains(HOST_UNBLINDING_MESSAGE) => {
                Error::HostUnblindingDisabled(msg)
            }
            other => other,
        };
        self.errors.insert(network, Arc::new(error));
    }

    pub fn get(&self, network: NetworkIdentity) -> Option<&Error> {
        self.errors.get(&network).map(Arc::as_ref)
    }

    pub fn contains(&self, network: NetworkIdentity) -> bool {
        self.errors.contains_key(&network)
    }

    pub fn networks(&self) -> Vec<NetworkIdentity> {
        self.errors.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NetworkIdentity, &Error)> {
        self.errors.iter().map(|(n, e)| (*n, e.as_ref()))
    }

    pub fn reset(&mut self) {
        self.errors.clear();
    }
}

/// Why a network was not logged in, without that being an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// No credentials were supplied for this kind of session.
    NoCredentials,
    /// Partial login and no local state exists for this network.
    NoLocalState,
    /// The hardware wallet cannot sign Liquid transactions.
    LiquidUnsupported,
    /// The backend did not recognise the credentials on a secondary network.
    LoginRejected,
    /// Freshly restored, holds no funds; its local state was purged.
    Unfunded,
}

/// Result of one network's login attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    LoggedIn(LoginResult),
    Skipped(SkipReason),
}

/// Login material for [`WalletCoordinator::login`].
#[derive(Debug, Clone, Default)]
pub struct LoginParams {
    pub credentials: Option<Credentials>,
    /// Credentials of the Lightning node, usually derived from `credentials`.
    pub lightning_credentials: Option<Credentials>,
    /// Credentials of the swap engine session.
    pub swap_credentials: Option<Credentials>,
    pub device: Option<HwDevice>,
    /// Master xpub of `device`, used to locate local state.
    pub master_xpub: Option<String>,
    /// Log in every network, even those without local state.
    pub full_restore: bool,
    /// Identifier of the main wallet; older Lightning state was keyed by it.
    pub parent_wallet_id: Option<WalletIdentifier>,
}

impl LoginParams {
    pub fn software(credentials: Credentials) -> Self {
        Self {
            credentials: Some(credentials),
            ..Default::default()
        }
    }

    pub fn hardware(device: HwDevice, master_xpub: impl Into<String>) -> Self {
        Self {
            device: Some(device),
            master_xpub: Some(master_xpub.into()),
            ..Default::default()
        }
    }

    pub fn with_lightning(mut self, credentials: Credentials) -> Self {
        self.lightning_credentials = Some(credentials);
        self
    }

    pub fn with_swap(mut self, credentials: Credentials) -> Self {
        self.swap_credentials = Some(credentials);
        self
    }

    pub fn with_full_restore(mut self, full_restore: bool) -> Self {
        self.full_restore = full_restore;
        self
    }

    pub fn with_parent_wallet(mut self, parent_wallet_id: WalletIdentifier) -> Self {
        self.parent_wallet_id = Some(parent_wallet_id);
        self
    }
}

/// Backends the coordinator builds its sessions on.
#[derive(Clone)]
pub struct Backends {
    pub rpc: Arc<dyn RpcSessionFactory>,
    pub lightning: Option<Arc<dyn LightningNodeFactory>>,
    pub descriptor: Option<Arc<dyn DescriptorWalletFactory>>,
    pub assets: Arc<dyn AssetsProvider>,
    pub storage: Arc<dyn StateStorage>,
}

#[derive(Debug, Default)]
struct CoordinatorState {
    subaccounts: Vec<Subaccount>,
    account: WalletAccount,
    hw_device: Option<HwDevice>,
    outcomes: BTreeMap<NetworkIdentity, LoginOutcome>,
}

/// Owns the sessions of one wallet and orchestrates them.
pub struct WalletCoordinator {
    config: CoordinatorConfig,
    sessions: BTreeMap<NetworkIdentity, NetworkSession>,
    storage: Arc<dyn StateStorage>,
    registry: AssetRegistry,
    router: EventRouter,
    state: Mutex<CoordinatorState>,
    failures: Mutex<Failures>,
}

impl WalletCoordinator {
    /// Create a coordinator with one unconnected session per configured network.
    ///
    /// # Arguments
    /// * `config` - Prominent network, network set and transport settings
    /// * `backends` - Session backends, asset provider and local state storage
    ///
    /// # Example
    /// ```rust,ignore
    /// let coordinator = WalletCoordinator::new(
    ///     CoordinatorConfig::new(NetworkIdentity::BitcoinSinglesig),
    ///     backends,
    /// );
    /// let result = coordinator
    ///     .login(LoginParams::software(credentials).with_full_restore(true))
    ///     .await?;
    /// ```
    pub fn new(config: CoordinatorConfig, backends: Backends) -> Self {
        let router = EventRouter::new();
        let networks =
            config.session_networks(backends.lightning.is_some(), backends.descriptor.is_some());

        let mut sessions = BTreeMap::new();
        for network in networks {
            let session = if network.is_lightning() {
                let Some(factory) = backends.lightning.clone() else {
                    log::warn!("No Lightning backend, skipping {}", network);
                    continue;
                };
                NetworkSession::Lightning(LightningSession::new(
                    network,
                    factory,
                    backends.storage.clone(),
                    &router,
                ))
            } else if network.is_lwk() {
                let Some(factory) = backends.descriptor.clone() else {
                    log::warn!("No descriptor wallet backend, skipping {}", network);
                    continue;
                };
                NetworkSession::Descriptor(DescriptorSession::new(network, factory, &router))
            } else {
                NetworkSession::Rpc(SessionHandle::new(
                    network,
                    config.settings.clone(),
                    config.resolver,
                    backends.rpc.clone(),
                    &router,
                ))
            };
            sessions.insert(network, session);
        }

        Self {
            registry: AssetRegistry::new(backends.assets, config.registry_refresh_interval),
            config,
            sessions,
            storage: backends.storage,
            router,
            state: Mutex::new(CoordinatorState::default()),
            failures: Mutex::new(Failures::default()),
        }
    }

    /// Seed the identifiers persisted from an earlier login.
    pub fn with_account(self, account: WalletAccount) -> Self {
        self.state().account = account;
        self
    }

    fn state(&self) -> MutexGuard<'_, CoordinatorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn failures_mut(&self) -> MutexGuard<'_, Failures> {
        self.failures.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn prominent_network(&self) -> NetworkIdentity {
        self.config.prominent_network
    }

    pub fn session(&self, network: NetworkIdentity) -> Option<&NetworkSession> {
        self.sessions.get(&network)
    }

    pub fn sessions(&self) -> impl Iterator<Item = &NetworkSession> {
        self.sessions.values()
    }

    pub fn prominent_session(&self) -> Option<&NetworkSession> {
        self.session(self.config.prominent_network)
    }

    pub fn lightning_session(&self) -> Option<&LightningSession> {
        self.sessions.values().find_map(NetworkSession::as_lightning)
    }

    pub fn descriptor_session(&self) -> Option<&DescriptorSession> {
        self.sessions.values().find_map(NetworkSession::as_descriptor)
    }

    /// Sessions currently logged in.
    pub fn active_sessions(&self) -> Vec<&NetworkSession> {
        self.sessions.values().filter(|s| s.is_logged()).collect()
    }

    pub fn logged(&self) -> bool {
        self.sessions.values().any(NetworkSession::is_logged)
    }

    pub fn has_multisig(&self) -> bool {
        self.active_sessions()
            .iter()
            .any(|s| s.network().is_multisig())
    }

    /// Failures recorded by the last login.
    pub fn failures(&self) -> Failures {
        self.failures_mut().clone()
    }

    /// Per-network results of the last login.
    pub fn login_outcomes(&self) -> BTreeMap<NetworkIdentity, LoginOutcome> {
        self.state().outcomes.clone()
    }

    pub fn account(&self) -> WalletAccount {
        self.state().account.clone()
    }

    pub fn hw_device(&self) -> Option<HwDevice> {
        self.state().hw_device.clone()
    }

    pub fn is_watchonly(&self) -> bool {
        self.config.is_watchonly
    }

    pub fn is_ephemeral(&self) -> bool {
        self.config.is_ephemeral
    }

    pub fn registry(&self) -> &AssetRegistry {
        &self.registry
    }

    /// Subscribe to the events of every session.
    pub fn subscribe(&self) -> EventStream {
        self.router.subscribe()
    }

    /// Cached subaccount list, as of the last refresh.
    pub fn cached_subaccounts(&self) -> Vec<Subaccount> {
        self.state().subaccounts.clone()
    }

    pub fn set_challenge_resolver(&self, resolver: Option<Arc<dyn ChallengeResolver>>) {
        for session in self.sessions.values().filter_map(NetworkSession::as_rpc) {
            session.set_challenge_resolver(resolver.clone());
        }
    }

    pub fn set_hw_signer(&self, signer: Option<Arc<dyn HwSigner>>) {
        for session in self.sessions.values().filter_map(NetworkSession::as_rpc) {
            session.set_hw_signer(signer.clone());
        }
    }

    /// Credentials of the Lightning node derived from the wallet mnemonic.
    pub fn derive_lightning_credentials(credentials: &Credentials) -> Result<Credentials> {
        WalletKeys::from_credentials(credentials)?.lightning_credentials()
    }

    /// Credentials of the swap engine derived from the wallet mnemonic.
    pub fn derive_swap_credentials(credentials: &Credentials) -> Result<Credentials> {
        WalletKeys::from_credentials(credentials)?.swap_credentials()
    }

    /// Log in every session that is not logged in yet, concurrently.
    ///
    /// Returns the prominent network's login result, when it logged in.
    /// Fails with [`Error::LoginFailed`] only when no session is logged in
    /// afterwards; per-network errors are available from [`Self::failures`].
    pub async fn login(&self, params: LoginParams) -> Result<Option<LoginResult>> {
        let prominent = self
            .prominent_session()
            .ok_or_else(|| Error::InvalidArgument("No prominent session".to_string()))?;

        self.state().hw_device = params.device.clone();
        let full_restore =
            params.full_restore || !self.prominent_has_state(prominent, &params).await;

        self.failures_mut().reset();
        let params = &params;
        let pending: Vec<&NetworkSession> =
            self.sessions.values().filter(|s| !s.is_logged()).collect();
        log::info!(
            "Login start: {} sessions, full restore: {}",
            pending.len(),
            full_restore
        );

        let results = join_all(pending.into_iter().map(|session| async move {
            let network = session.network();
            log::info!("Login {} begin", network);
            let outcome = self.login_session(session, params, full_restore).await;
            match &outcome {
                Ok(outcome) => log::info!("Login {} end: {:?}", network, outcome),
                Err(err) => {
                    log::warn!("Login {} failure: {}", network, err);
                    if let Err(err) = session.disconnect().await {
                        log::warn!("Disconnect {} after failed login: {}", network, err);
                    }
                }
            }
            (network, outcome)
        }))
        .await;

        let mut prominent_result = None;
        for (network, outcome) in results {
            match outcome {
                Ok(outcome) => {
                    if let LoginOutcome::LoggedIn(result) = &outcome {
                        if network == self.config.prominent_network {
                            prominent_result = Some(result.clone());
                        }
                    }
                    self.state().outcomes.insert(network, outcome);
                }
                Err(err) => self.failures_mut().add(network, err),
            }
        }

        let active = self.active_sessions().len();
        log::info!("Login end: {} active sessions", active);
        if active == 0 {
            return Err(Error::LoginFailed);
        }

        self.subaccounts(false).await?;
        if full_restore {
            if let Err(err) = self.sync_settings().await {
                log::warn!("Settings sync failed: {}", err);
            }
        }
        if let Some(session) = self.prominent_session().filter(|s| s.is_logged()) {
            if let Err(err) = session.load_settings().await {
                log::warn!("Loading {} settings failed: {}", session.network(), err);
            }
        }
        if let Err(err) = self.registry.refresh(false).await {
            log::warn!("Asset registry refresh failed: {}", err);
        }
        Ok(prominent_result)
    }

    /// Log in a watch-only wallet on the prominent network only.
    pub async fn login_watchonly(&self, credentials: &Credentials) -> Result<LoginResult> {
        let prominent = self
            .prominent_session()
            .ok_or_else(|| Error::InvalidArgument("No prominent session".to_string()))?;
        let result = prominent.login_user(Some(credentials), None).await?;
        self.state().account.xpub_hash_id = Some(result.xpub_hash_id.clone());
        self.subaccounts(false).await?;
        Ok(result)
    }

    /// Fail with [`Error::WalletMismatch`] when `credentials` open a different
    /// wallet than the one recorded in the account.
    pub async fn check_wallet_mismatch(&self, credentials: &Credentials) -> Result<()> {
        let Some(expected) = self.state().account.xpub_hash_id.clone() else {
            return Ok(());
        };
        let prominent = self
            .prominent_session()
            .ok_or_else(|| Error::InvalidArgument("No prominent session".to_string()))?;
        let identifier = prominent.wallet_identifier(credentials).await?;
        if identifier.xpub_hash_id != expected {
            return Err(Error::WalletMismatch);
        }
        Ok(())
    }

    async fn identifier(
        &self,
        session: &NetworkSession,
        params: &LoginParams,
    ) -> Result<Option<WalletIdentifier>> {
        if let Some(credentials) = &params.credentials {
            return session.wallet_identifier(credentials).await.map(Some);
        }
        match (session, &params.device, &params.master_xpub) {
            (NetworkSession::Rpc(s), Some(_), Some(xpub)) => {
                s.wallet_identifier_for_xpub(xpub).await.map(Some)
            }
            _ => Ok(None),
        }
    }

    /// Whether the prominent network already has local state for this wallet
    /// and a previous login was recorded.
    async fn prominent_has_state(&self, prominent: &NetworkSession, params: &LoginParams) -> bool {
        if self.state().account.xpub_hash_id.is_none() {
            return false;
        }
        let identifier = match self.identifier(prominent, params).await {
            Ok(Some(identifier)) => identifier,
            Ok(None) => return false,
            Err(err) => {
                log::warn!("Wallet identifier of {}: {}", prominent.network(), err);
                return false;
            }
        };
        self.storage
            .exist_datadir(prominent.network(), &identifier.wallet_hash_id)
            .await
            .unwrap_or_else(|err| {
                log::warn!("Local state lookup failed: {}", err);
                false
            })
    }

    async fn login_session(
        &self,
        session: &NetworkSession,
        params: &LoginParams,
        full_restore: bool,
    ) -> Result<LoginOutcome> {
        match session {
            NetworkSession::Rpc(_) => self.login_rpc(session, params, full_restore).await,
            NetworkSession::Lightning(s) => self.login_lightning(s, params, full_restore).await,
            NetworkSession::Descriptor(s) => {
                let Some(credentials) = &params.swap_credentials else {
                    return Ok(LoginOutcome::Skipped(SkipReason::NoCredentials));
                };
                let result = s.login_user(Some(credentials), None).await?;
                Ok(LoginOutcome::LoggedIn(result))
            }
        }
    }

    async fn login_rpc(
        &self,
        session: &NetworkSession,
        params: &LoginParams,
        full_restore: bool,
    ) -> Result<LoginOutcome> {
        let network = session.network();
        let is_prominent = network == self.config.prominent_network;

        if network.is_liquid() && params.device.as_ref().is_some_and(|d| d.supports_liquid == 0) {
            return Ok(LoginOutcome::Skipped(SkipReason::LiquidUnsupported));
        }
        let Some(identifier) = self.identifier(session, params).await? else {
            return Ok(LoginOutcome::Skipped(SkipReason::NoCredentials));
        };
        let wallet_hash_id = identifier.wallet_hash_id;
        let exist_datadir = self.storage.exist_datadir(network, &wallet_hash_id).await?;
        if !full_restore && !exist_datadir && !is_prominent {
            return Ok(LoginOutcome::Skipped(SkipReason::NoLocalState));
        }
        let remove_datadir = !exist_datadir && !is_prominent;

        let result = match session
            .login_user(params.credentials.as_ref(), params.device.as_ref())
            .await
        {
            Ok(result) => result,
            // Heuristic: also raised for stale local state, not only for wrong credentials
            Err(err) if err.is_login_failed() && !is_prominent => {
                log::info!("Login {} rejected, skipping", network);
                if let Err(err) = session.disconnect().await {
                    log::warn!("Disconnect {}: {}", network, err);
                }
                if full_restore {
                    if let Err(err) = session
                        .remove_datadir(self.storage.clone(), &wallet_hash_id)
                        .await
                    {
                        log::warn!("Remove {} local state: {}", network, err);
                    }
                }
                return Ok(LoginOutcome::Skipped(SkipReason::LoginRejected));
            }
            Err(err) => return Err(err),
        };

        if is_prominent {
            let mut state = self.state();
            state.account.xpub_hash_id = Some(result.xpub_hash_id.clone());
            state.account.wallet_hash_id = Some(result.wallet_hash_id.clone());
        }

        if session.is_logged() && (full_restore || !exist_datadir) {
            let funded = session.discovery().await.unwrap_or_else(|err| {
                log::warn!("Discovery on {} failed: {}", network, err);
                false
            });
            if !funded && remove_datadir {
                log::info!("{} has no funds, dropping it", network);
                if let Err(err) = session.disconnect().await {
                    log::warn!("Disconnect {}: {}", network, err);
                }
                session
                    .remove_datadir(self.storage.clone(), &wallet_hash_id)
                    .await?;
                return Ok(LoginOutcome::Skipped(SkipReason::Unfunded));
            }
        }
        Ok(LoginOutcome::LoggedIn(result))
    }

    async fn login_lightning(
        &self,
        session: &LightningSession,
        params: &LoginParams,
        full_restore: bool,
    ) -> Result<LoginOutcome> {
        let Some(credentials) = &params.lightning_credentials else {
            return Ok(LoginOutcome::Skipped(SkipReason::NoCredentials));
        };
        let identifier = session.wallet_identifier(credentials)?;
        let mut exist_datadir = session.exist_datadir(&identifier.wallet_hash_id).await?;
        if !exist_datadir {
            // Older node state was keyed by the main wallet
            if let Some(parent) = &params.parent_wallet_id {
                exist_datadir = session.exist_datadir(&parent.wallet_hash_id).await?;
            }
        }
        if !full_restore && !exist_datadir {
            return Ok(LoginOutcome::Skipped(SkipReason::NoLocalState));
        }

        let result = session.login_user(credentials).await?;
        self.state().account.lightning_wallet_hash_id = Some(result.wallet_hash_id.clone());

        // Discovery finds nothing on Lightning: keep only nodes the node service knew
        if session.is_logged()
            && !exist_datadir
            && session.snapshot().is_restored_node != Some(true)
        {
            log::info!("{} node is new, dropping it", session.network());
            session.disconnect().await?;
            session.remove_datadir(&identifier.wallet_hash_id).await?;
            return Ok(LoginOutcome::Skipped(SkipReason::Unfunded));
        }
        Ok(LoginOutcome::LoggedIn(result))
    }

    /// Disconnect every session and drop the cached subaccounts.
    pub async fn disconnect(&self) {
        let results = join_all(
            self.sessions
                .values()
                .map(|s| async move { (s.network(), s.disconnect().await) }),
        )
        .await;
        for (network, result) in results {
            if let Err(err) = result {
                log::warn!("Disconnect {}: {}", network, err);
            }
        }
        let mut state = self.state();
        state.subaccounts.clear();
        state.outcomes.clear();
    }

    /// Copy the canonical settings to every other logged session.
    ///
    /// The source is the first logged of bitcoin multisig, liquid multisig and
    /// the prominent network. Returns the settings that were pushed.
    pub async fn sync_settings(&self) -> Result<Option<Settings>> {
        let mainnet = self.config.mainnet();
        let source = [
            NetworkIdentity::bitcoin_multisig(mainnet),
            NetworkIdentity::liquid_multisig(mainnet),
            self.config.prominent_network,
        ]
        .into_iter()
        .filter_map(|network| self.session(network))
        .find(|s| s.is_logged());
        let Some(source) = source else {
            return Ok(None);
        };
        let Some(settings) = source.load_settings().await? else {
            return Ok(None);
        };
        log::info!("Syncing settings from {}", source.network());

        let targets = self
            .active_sessions()
            .into_iter()
            .filter(|s| s.network() != source.network() && s.as_rpc().is_some());
        join_all(targets.map(|session| {
            let settings = &settings;
            async move {
                if let Err(err) = session.change_settings(settings).await {
                    log::warn!("Settings sync to {} failed: {}", session.network(), err);
                }
                if let Err(err) = session.load_settings().await {
                    log::warn!("Loading {} settings failed: {}", session.network(), err);
                }
            }
        }))
        .await;
        Ok(Some(settings))
    }

    /// Refresh the aggregated subaccount list from every logged session.
    ///
    /// Cached balances and `has_txs` flags carry over to the fresh entries. A
    /// session that fails to answer keeps its previous entries.
    pub async fn subaccounts(&self, refresh: bool) -> Result<Vec<Subaccount>> {
        let active = self.active_sessions();
        let results = join_all(
            active
                .iter()
                .map(|s| async move { (s.network(), s.subaccounts(refresh).await) }),
        )
        .await;

        let mut state = self.state();
        let mut merged = Vec::new();
        for (network, result) in results {
            match result {
                Ok(subaccounts) => merged.extend(subaccounts),
                Err(err) => {
                    log::warn!("Subaccounts of {} unavailable: {}", network, err);
                    merged.extend(
                        state
                            .subaccounts
                            .iter()
                            .filter(|s| s.network == network)
                            .cloned(),
                    );
                }
            }
        }
        merged.sort_by(|a, b| a.display_order(b));
        for subaccount in merged.iter_mut() {
            if let Some(prev) = state.subaccounts.iter().find(|p| p.same_slot(subaccount)) {
                subaccount.satoshi = prev.satoshi.clone();
                subaccount.has_txs = prev.has_txs;
            }
        }
        state.subaccounts = merged.clone();
        Ok(merged)
    }

    /// Refresh one subaccount in the cache, adding it when it is new.
    pub async fn subaccount(
        &self,
        network: NetworkIdentity,
        pointer: u32,
    ) -> Result<Option<Subaccount>> {
        let session = self
            .session(network)
            .ok_or_else(|| Error::InvalidArgument(format!("No session for {}", network)))?;
        let Some(mut fresh) = session.subaccount(pointer).await? else {
            return Ok(None);
        };
        let mut state = self.state();
        match state.subaccounts.iter_mut().find(|s| s.same_slot(&fresh)) {
            Some(cached) => {
                fresh.satoshi = cached.satoshi.clone();
                fresh.has_txs = cached.has_txs;
                *cached = fresh.clone();
            }
            None => {
                state.subaccounts.push(fresh.clone());
                state.subaccounts.sort_by(|a, b| a.display_order(b));
            }
        }
        Ok(Some(fresh))
    }

    /// Sum of balances per asset over `subaccounts`.
    ///
    /// Each subaccount's cached balance is updated on the way.
    pub async fn balances(&self, subaccounts: &[Subaccount]) -> Result<Balances> {
        let results = join_all(subaccounts.iter().map(|subaccount| async move {
            let Some(session) = self.session(subaccount.network) else {
                let err = Error::InvalidArgument(format!("No session for {}", subaccount.network));
                return (subaccount, Err(err));
            };
            (subaccount, session.balance(subaccount.pointer).await)
        }))
        .await;

        let mut total = Balances::new();
        let mut state = self.state();
        for (subaccount, result) in results {
            let satoshi = match result {
                Ok(satoshi) => satoshi,
                Err(err) => {
                    log::warn!("Balance of {} unavailable: {}", subaccount.id(), err);
                    continue;
                }
            };
            if let Some(cached) = state.subaccounts.iter_mut().find(|s| s.same_slot(subaccount)) {
                cached.has_txs = cached.has_txs
                    || satoshi.len() > 1
                    || satoshi.values().any(|amount| *amount > 0);
                cached.satoshi = Some(satoshi.clone());
            }
            for (asset, amount) in satoshi {
                *total.entry(asset).or_default() += amount;
            }
        }
        Ok(total)
    }

    /// One page of transactions from each subaccount, merged newest first.
    ///
    /// # Arguments
    /// * `subaccounts` - Subaccounts to read
    /// * `first` - Offset of the page within each subaccount's history
    pub async fn transactions(
        &self,
        subaccounts: &[Subaccount],
        first: u32,
    ) -> Result<Vec<Transaction>> {
        let pages = join_all(
            subaccounts
                .iter()
                .map(|subaccount| async move { (subaccount, self.page(subaccount, first).await) }),
        )
        .await;

        let mut txs = Vec::new();
        for (subaccount, page) in pages {
            match page {
                Ok(page) => txs.extend(page),
                Err(err) => log::warn!("Transactions of {} unavailable: {}", subaccount.id(), err),
            }
        }
        sort_by_recency(&mut txs);
        Ok(txs)
    }

    /// Page `page` (zero based) of every subaccount's history, merged.
    pub async fn paged_transactions(
        &self,
        subaccounts: &[Subaccount],
        page: u32,
    ) -> Result<Vec<Transaction>> {
        self.transactions(subaccounts, page.saturating_mul(PAGE_SIZE))
            .await
    }

    /// Full history of one subaccount.
    ///
    /// Pages are requested until one comes back shorter than [`PAGE_SIZE`].
    pub async fn all_by_subaccount(&self, subaccount: &Subaccount) -> Result<Vec<Transaction>> {
        let mut txs = Vec::new();
        let mut first = 0;
        loop {
            let page = self.page(subaccount, first).await?;
            let len = page.len();
            txs.extend(page);
            if len < PAGE_SIZE as usize {
                break;
            }
            first += PAGE_SIZE;
        }
        Ok(txs)
    }

    /// Full history of every subaccount, merged newest first.
    pub async fn all_transactions(&self, subaccounts: &[Subaccount]) -> Result<Vec<Transaction>> {
        let results = join_all(
            subaccounts
                .iter()
                .map(|subaccount| async move { (subaccount, self.all_by_subaccount(subaccount).await) }),
        )
        .await;

        let mut txs = Vec::new();
        for (subaccount, result) in results {
            match result {
                Ok(list) => txs.extend(list),
                Err(err) => log::warn!("History of {} unavailable: {}", subaccount.id(), err),
            }
        }
        sort_by_recency(&mut txs);
        Ok(txs)
    }

    async fn page(&self, subaccount: &Subaccount, first: u32) -> Result<Vec<Transaction>> {
        let session = self
            .session(subaccount.network)
            .ok_or_else(|| Error::InvalidArgument(format!("No session for {}", subaccount.network)))?;
        let id = subaccount.id();
        let mut page = session
            .transactions(subaccount.pointer, first, PAGE_SIZE)
            .await?;
        for tx in page.iter_mut() {
            tx.subaccount = Some(id.clone());
        }
        Ok(page)
    }

    /// Hint every connected session to drop its network connection.
    pub async fn pause(&self) {
        log::info!("Pause: network disconnect");
        let connected = self
            .active_sessions()
            .into_iter()
            .filter(|s| s.is_connected());
        join_all(connected.map(|s| s.network_disconnect())).await;
    }

    /// Hint every connected session to reconnect.
    pub async fn resume(&self) {
        log::info!("Resume: network connect");
        let connected = self
            .active_sessions()
            .into_iter()
            .filter(|s| s.is_connected());
        join_all(connected.map(|s| s.network_connect())).await;
    }

    /// System messages of every logged session; failed lookups yield an empty text.
    pub async fn load_system_messages(&self) -> Vec<SystemMessage> {
        join_all(self.active_sessions().into_iter().map(|session| async move {
            let text = session.system_message().await.unwrap_or_else(|err| {
                log::warn!("System message of {}: {}", session.network(), err);
                None
            });
            SystemMessage {
                network: session.network(),
                text: text.unwrap_or_default(),
            }
        }))
        .await
    }

    /// Stop the Lightning node and delete its local state.
    pub async fn remove_lightning(&self) -> Result<()> {
        let Some(session) = self.lightning_session() else {
            return Ok(());
        };
        session.disconnect().await?;
        let wallet_hash_id = self.state().account.lightning_wallet_hash_id.clone();
        if let Some(wallet_hash_id) = wallet_hash_id {
            session.remove_datadir(&wallet_hash_id).await?;
        }
        if self.logged() {
            self.subaccounts(false).await?;
        }
        Ok(())
    }
}
