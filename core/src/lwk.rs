//! Descriptor-wallet session used for Liquid swaps.
//!
//! The session has no subaccounts or history of its own; it only holds the
//! swap engine opened from the wallet's swap mnemonic.

use crate::backend::{DescriptorWallet, DescriptorWalletFactory};
use crate::error::{Error, Result};
use crate::events::{EventRouter, EventSink};
use crate::identity::WalletKeys;
use crate::types::{Credentials, HwDevice, LoginResult, NetworkIdentity, WalletIdentifier};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
pub struct DescriptorState {
    pub connected: bool,
    pub logged: bool,
    pub xpub_hash_id: Option<String>,
}

struct DescriptorInner {
    id: Uuid,
    network: NetworkIdentity,
    factory: Arc<dyn DescriptorWalletFactory>,
    wallet: RwLock<Option<Arc<dyn DescriptorWallet>>>,
    state: Mutex<DescriptorState>,
    events: EventSink,
}

/// Session over the descriptor-wallet swap engine.
#[derive(Clone)]
pub struct DescriptorSession {
    inner: Arc<DescriptorInner>,
}

impl std::fmt::Debug for DescriptorSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DescriptorSession")
            .field("id", &self.inner.id)
            .field("network", &self.inner.network)
            .field("state", &*self.state())
            .finish()
    }
}

impl DescriptorSession {
    pub fn new(
        network: NetworkIdentity,
        factory: Arc<dyn DescriptorWalletFactory>,
        router: &EventRouter,
    ) -> Self {
        let id = Uuid::new_v4();
        Self {
            inner: Arc::new(DescriptorInner {
                id,
                network,
                factory,
                wallet: RwLock::new(None),
                state: Mutex::new(DescriptorState::default()),
                events: router.sink(id, network),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.events.session_id()
    }

    pub fn network(&self) -> NetworkIdentity {
        self.inner.network
    }

    fn state(&self) -> MutexGuard<'_, DescriptorState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_connected(&self) -> bool {
        self.state().connected
    }

    pub fn is_logged(&self) -> bool {
        self.state().logged
    }

    pub async fn connect(&self) -> Result<()> {
        self.state().connected = true;
        Ok(())
    }

    pub async fn disconnect(&self) -> Result<()> {
        *self.state() = DescriptorState::default();
        self.inner
            .wallet
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        Ok(())
    }

    pub fn wallet_identifier(&self, credentials: &Credentials) -> Result<WalletIdentifier> {
        WalletKeys::from_credentials(credentials)?.wallet_identifier(self.inner.network)
    }

    /// Open the swap engine. Only software mnemonics are supported.
    pub async fn login_user(
        &self,
        credentials: Option<&Credentials>,
        device: Option<&HwDevice>,
    ) -> Result<LoginResult> {
        if device.is_some() {
            return Err(Error::Unsupported(
                "Hardware wallet login for swaps".to_string(),
            ));
        }
        let credentials = credentials
            .ok_or_else(|| Error::InvalidArgument("No login method specified".to_string()))?;
        let identifier = self.wallet_identifier(credentials)?;
        let mnemonic = credentials
            .mnemonic
            .clone()
            .ok_or_else(|| Error::InvalidMnemonic("missing mnemonic".to_string()))?;

        let wallet = self.inner.factory.create(mnemonic).await?;
        *self.inner.wallet.write().unwrap_or_else(PoisonError::into_inner) = Some(wallet);
        {
            let mut state = self.state();
            state.connected = true;
            state.logged = true;
            state.xpub_hash_id = Some(identifier.xpub_hash_id.clone());
        }
        log::info!("{} logged in", self.inner.network);
        Ok(identifier.into())
    }

    fn wallet(&self) -> Result<Arc<dyn DescriptorWallet>> {
        if self.state().xpub_hash_id.is_none() {
            return Err(Error::Other("No xpub defined".to_string()));
        }
        self.inner
            .wallet
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| Error::Other("No swap session".to_string()))
    }

    /// Reverse swap: a Lightning invoice whose payment is claimed to `claim_address`.
    pub async fn invoice(
        &self,
        amount_sat: u64,
        description: Option<&str>,
        claim_address: &str,
    ) -> Result<String> {
        self.wallet()?
            .invoice(
                amount_sat,
                description.map(str::to_string),
                claim_address.to_string(),
            )
            .await
    }

    /// Submarine swap paying `bolt11`; returns the lockup address.
    pub async fn prepare_pay(&self, bolt11: &str, refund_address: &str) -> Result<String> {
        self.wallet()?
            .prepare_pay(bolt11.to_string(), refund_address.to_string())
            .await
    }
}
