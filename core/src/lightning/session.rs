//! Session adapter over a payment-channel node client.

use super::history::{HistorySources, SwapInfo, merge_history};
use super::input::{LightningInput, LnInvoice, LnUrlPayOutcome, check_amount};
use crate::backend::{LightningEventHandler, LightningNode, LightningNodeEvent, LightningNodeFactory};
use crate::error::{Error, Result};
use crate::events::{EventKind, EventRouter, EventSink};
use crate::identity::WalletKeys;
use crate::storage::StateStorage;
use crate::types::{
    BTC_ASSET, Balances, Credentials, LoginResult, NetworkIdentity, Subaccount, Transaction,
    WalletIdentifier,
};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
pub struct LightningState {
    pub connected: bool,
    pub logged: bool,
    pub paused: bool,
    pub block_height: u32,
    pub wallet_hash_id: Option<String>,
    /// Whether the last login had to verify the node against the node service.
    pub is_restored_node: Option<bool>,
}

struct LightningInner {
    id: Uuid,
    network: NetworkIdentity,
    factory: Arc<dyn LightningNodeFactory>,
    storage: Arc<dyn StateStorage>,
    node: RwLock<Option<Arc<dyn LightningNode>>>,
    state: Mutex<LightningState>,
    events: EventSink,
}

/// A send being prepared or executed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LightningTransaction {
    /// Invoice, LNURL or address as entered by the user.
    pub input: String,
    /// Amount entered by the user; replaced by the amount that will be sent.
    #[serde(default)]
    pub satoshi: Option<u64>,
    #[serde(default)]
    pub memo: String,
    /// Stable error code; empty when the send can proceed.
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub payee: Option<LightningInput>,
}

/// Outcome of validating a payment input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputValidation {
    pub input: LightningInput,
    /// Stable error code, if the input cannot be paid as is.
    pub error: Option<String>,
}

impl InputValidation {
    pub fn is_valid(&self) -> bool {
        self.error.is_none()
    }
}

/// Result of a successful send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendOutcome {
    pub payment_hash: Option<String>,
    pub message: Option<String>,
}

/// Lightning network session.
#[derive(Clone)]
pub struct LightningSession {
    inner: Arc<LightningInner>,
}

impl std::fmt::Debug for LightningSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LightningSession")
            .field("id", &self.inner.id)
            .field("network", &self.inner.network)
            .field("state", &*self.state())
            .finish()
    }
}

impl LightningSession {
    pub fn new(
        network: NetworkIdentity,
        factory: Arc<dyn LightningNodeFactory>,
        storage: Arc<dyn StateStorage>,
        router: &EventRouter,
    ) -> Self {
        let id = Uuid::new_v4();
        Self {
            inner: Arc::new(LightningInner {
                id,
                network,
                factory,
                storage,
                node: RwLock::new(None),
                state: Mutex::new(LightningState::default()),
                events: router.sink(id, network),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn network(&self) -> NetworkIdentity {
        self.inner.network
    }

    fn state(&self) -> MutexGuard<'_, LightningState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> LightningState {
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

    fn node(&self) -> Result<Arc<dyn LightningNode>> {
        self.inner
            .node
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(Error::ConnectionFailed(None))
    }

    /// No handshake: the node starts at login.
    pub async fn connect(&self) -> Result<()> {
        self.state().paused = false;
        Ok(())
    }

    /// Stop the node and drop it.
    pub async fn disconnect(&self) -> Result<()> {
        {
            let mut state = self.state();
            state.logged = false;
            state.connected = false;
            state.paused = false;
        }
        let node = self
            .inner
            .node
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(node) = node {
            node.stop().await.inspect_err(|err| {
                log::error!("Lightning disconnect error: {}", err);
            })?;
        }
        Ok(())
    }

    pub async fn network_connect(&self) {
        self.state().paused = false;
    }

    pub async fn network_disconnect(&self) {
        self.state().paused = true;
    }

    /// Identifiers of the Lightning wallet, derived locally from its mnemonic.
    pub fn wallet_identifier(&self, credentials: &Credentials) -> Result<WalletIdentifier> {
        WalletKeys::from_credentials(credentials)?.wallet_identifier(self.inner.network)
    }

    /// Whether node credentials were stored for this wallet.
    pub async fn exist_datadir(&self, wallet_hash_id: &str) -> Result<bool> {
        Ok(self
            .inner
            .storage
            .get_node_credentials(wallet_hash_id)
            .await?
            .is_some())
    }

    pub async fn remove_datadir(&self, wallet_hash_id: &str) -> Result<()> {
        self.inner.storage.remove_node_credentials(wallet_hash_id).await
    }

    /// Start the node for the wallet derived from `credentials`.
    ///
    /// The first login for a wallet asks the node service to check the
    /// credentials; later logins trust the stored node state. A failed attempt
    /// is retried once without the check.
    pub async fn login_user(&self, credentials: &Credentials) -> Result<LoginResult> {
        let identifier = self.wallet_identifier(credentials)?;
        let mnemonic = credentials
            .mnemonic
            .clone()
            .ok_or_else(|| Error::InvalidMnemonic("missing mnemonic".to_string()))?;
        let wallet_hash_id = identifier.wallet_hash_id.clone();

        let restore = !self.exist_datadir(&wallet_hash_id).await?;
        let node = self.inner.factory.create(
            &wallet_hash_id,
            !self.inner.network.is_mainnet(),
            self.event_handler(),
        );
        *self.inner.node.write().unwrap_or_else(PoisonError::into_inner) = Some(node.clone());

        log::info!("Lightning login, restore: {}", restore);
        match node.connect(mnemonic.clone(), restore).await {
            Ok(()) => self.state().is_restored_node = Some(restore),
            Err(err) => {
                log::info!("Lightning login retry after: {}", err);
                node.connect(mnemonic, false).await.inspect_err(|err| {
                    log::warn!("Lightning login failed: {}", err);
                })?;
            }
        }

        if let Some(node_credentials) = node.node_credentials() {
            self.inner
                .storage
                .store_node_credentials(&wallet_hash_id, &node_credentials)
                .await?;
        }

        {
            let mut state = self.state();
            state.connected = true;
            state.logged = true;
            state.wallet_hash_id = Some(wallet_hash_id);
        }
        Ok(identifier.into())
    }

    fn event_handler(&self) -> LightningEventHandler {
        let weak: Weak<LightningInner> = Arc::downgrade(&self.inner);
        Arc::new(move |event: LightningNodeEvent| {
            if let Some(inner) = weak.upgrade() {
                LightningSession { inner }.handle_node_event(event);
            }
        })
    }

    /// Map a node event to a domain event.
    pub fn handle_node_event(&self, event: LightningNodeEvent) {
        log::info!("Lightning event {:?}", event);
        let kind = match event {
            LightningNodeEvent::Synced => EventKind::InvoicePaid { payment_hash: None },
            LightningNodeEvent::NewBlock(height) => {
                self.state().block_height = height;
                EventKind::Block {
                    block_height: height,
                }
            }
            LightningNodeEvent::InvoicePaid { payment_hash } => EventKind::InvoicePaid {
                payment_hash: Some(payment_hash),
            },
            LightningNodeEvent::PaymentSucceeded { payment_hash } => {
                EventKind::PaymentSucceeded { payment_hash }
            }
            LightningNodeEvent::PaymentFailed { error } => EventKind::PaymentFailed { error },
        };
        self.inner.events.emit(kind);
    }

    /// The single synthetic subaccount.
    pub fn subaccount(&self) -> Subaccount {
        Subaccount::lightning(self.inner.network)
    }

    pub fn subaccounts(&self) -> Vec<Subaccount> {
        vec![self.subaccount()]
    }

    /// Spendable balance; zero while no node is running.
    pub async fn balance(&self) -> Result<Balances> {
        let sats = match self.node() {
            Ok(node) => node.balance_sat().await?,
            Err(_) => 0,
        };
        Ok(Balances::from([(
            BTC_ASSET.to_string(),
            i64::try_from(sats).unwrap_or(i64::MAX),
        )]))
    }

    pub async fn parse_input(&self, input: &str) -> Result<LightningInput> {
        self.node()?.parse_input(input.to_string()).await
    }

    /// Validate a payment input before the amount is known.
    pub async fn parse_tx_input(&self, input: &str) -> Result<InputValidation> {
        let node = self.node()?;
        let parsed = node.parse_input(input.to_string()).await?;
        let error = match &parsed {
            LightningInput::OnchainAddress { .. } => Some("id_invalid_address".to_string()),
            LightningInput::Bolt11(invoice) if invoice.is_expired() => {
                Some(Error::InvoiceExpired.code().to_string())
            }
            LightningInput::Bolt11(invoice) => match invoice.amount_sat() {
                Some(amount) => {
                    let limits = node.send_limits().await?;
                    let balance = node.balance_sat().await?;
                    check_amount(Some(amount), balance, limits.min_sat, limits.max_sat)
                        .err()
                        .map(|err| err.code().to_string())
                }
                None => None,
            },
            LightningInput::LnUrlPay(_)
            | LightningInput::LnUrlWithdraw(_)
            | LightningInput::LnUrlAuth(_) => None,
            LightningInput::NodeId { .. } | LightningInput::Unsupported { .. } => {
                Some(Error::Unsupported(String::new()).code().to_string())
            }
        };
        Ok(InputValidation {
            input: parsed,
            error,
        })
    }

    /// Classify the input and fill in amount, memo and error.
    ///
    /// Never pays: bound violations are reported through `error`.
    pub async fn create_transaction(&self, tx: LightningTransaction) -> Result<LightningTransaction> {
        let node = self.node()?;
        let parsed = node.parse_input(tx.input.clone()).await?;
        let mut tx = LightningTransaction {
            error: String::new(),
            ..tx
        };

        let (satoshi, limits) = match &parsed {
            LightningInput::Bolt11(invoice) => {
                if let Some(description) = &invoice.description {
                    tx.memo = description.clone();
                }
                if invoice.is_expired() {
                    tx.satoshi = invoice.sendable_sat(tx.satoshi);
                    tx.error = Error::InvoiceExpired.code().to_string();
                    tx.payee = Some(parsed);
                    return Ok(tx);
                }
                (
                    invoice.sendable_sat(tx.satoshi),
                    node.send_limits().await?,
                )
            }
            LightningInput::LnUrlPay(request) => (
                request.sendable_sat(tx.satoshi),
                node.send_limits().await?.narrowed(
                    Some(request.min_sendable_sat()),
                    Some(request.max_sendable_sat()),
                ),
            ),
            _ => {
                tx.payee = Some(parsed);
                return Ok(tx);
            }
        };

        let balance = node.balance_sat().await?;
        if let Err(err) = check_amount(satoshi, balance, limits.min_sat, limits.max_sat) {
            tx.error = err.code().to_string();
        }
        tx.satoshi = satoshi;
        tx.payee = Some(parsed);
        Ok(tx)
    }

    /// Pay a prepared transaction.
    pub async fn send_transaction(&self, tx: &LightningTransaction) -> Result<SendOutcome> {
        let node = self.node()?;
        let parsed = node.parse_input(tx.input.clone()).await?;
        let balance = node.balance_sat().await?;

        match parsed {
            LightningInput::Bolt11(invoice) => {
                if invoice.is_expired() {
                    return Err(Error::InvoiceExpired);
                }
                let limits = node.send_limits().await?;
                let satoshi = check_amount(
                    invoice.sendable_sat(tx.satoshi),
                    balance,
                    limits.min_sat,
                    limits.max_sat,
                )?;
                // Amount is only passed for any-amount invoices
                let amount = invoice.amount_msat.is_none().then_some(satoshi);
                let payment = node.send_payment(invoice.bolt11.clone(), amount).await?;
                Ok(SendOutcome {
                    payment_hash: Some(payment.id),
                    message: None,
                })
            }
            LightningInput::LnUrlPay(request) => {
                let limits = node.send_limits().await?.narrowed(
                    Some(request.min_sendable_sat()),
                    Some(request.max_sendable_sat()),
                );
                let satoshi = check_amount(
                    request.sendable_sat(tx.satoshi),
                    balance,
                    limits.min_sat,
                    limits.max_sat,
                )?;
                match node.pay_lnurl(request, satoshi, tx.memo.clone()).await? {
                    LnUrlPayOutcome::EndpointSuccess {
                        payment_hash,
                        success_message,
                    } => Ok(SendOutcome {
                        payment_hash: Some(payment_hash),
                        message: success_message,
                    }),
                    LnUrlPayOutcome::EndpointError { reason } => {
                        Err(Error::InvalidInput(reason))
                    }
                    LnUrlPayOutcome::PayError {
                        payment_hash,
                        reason,
                    } => Err(Error::Other(format!(
                        "Payment {} failed: {}",
                        payment_hash, reason
                    ))),
                }
            }
            _ => Err(Error::InvalidInput("id_error".to_string())),
        }
    }

    /// Payment history, newest first, paged.
    pub async fn transactions(&self, first: u32, count: u32) -> Result<Vec<Transaction>> {
        let Ok(node) = self.node() else {
            return Ok(Vec::new());
        };
        let sources = HistorySources {
            payments: node.list_payments().await,
            refundables: node.list_refundables().await,
            reverse_swaps: node.list_reverse_swaps_in_progress().await,
            swap_in_progress: node.swap_in_progress().await,
        };
        let txs = merge_history(sources, &self.subaccount().id());
        Ok(txs
            .into_iter()
            .skip(first as usize)
            .take(count as usize)
            .collect())
    }

    pub async fn create_invoice(&self, amount_sat: u64, description: &str) -> Result<LnInvoice> {
        self.node()?
            .create_invoice(amount_sat, description.to_string())
            .await
    }

    /// On-chain address of a swap into the node.
    pub async fn receive_onchain(&self) -> Result<SwapInfo> {
        self.node()?.receive_onchain().await
    }

    pub async fn close_channels(&self) -> Result<()> {
        self.node()?.close_channels().await
    }
}
