//! Collaborator interfaces consumed by the session layer.
//!
//! Every transport this crate drives (the wallet RPC backend, the payment-channel
//! node client, the descriptor-wallet swap engine, hardware wallets and the asset
//! registry) is reached through one of these traits. Implementations live outside
//! this crate; tests provide in-memory ones.
//!
//! Methods return boxed futures so the traits stay object safe and can be shared
//! as `Arc<dyn Trait>` between the coordinator's concurrent branches.

use crate::error::Result;
use crate::lightning::{
    LightningInput, LnInvoice, LnUrlPayOutcome, LnUrlPayRequest, Payment, ReverseSwapInfo,
    SendLimits, SwapInfo,
};
use crate::registry::AssetInfo;
use crate::types::{Credentials, HwDevice, NetworkIdentity, WalletIdentifier};
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

/// Type alias for backend futures.
pub type BackendFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Callback the RPC backend invokes for every push notification.
///
/// It may be called from any thread.
pub type NotificationHandler = Arc<dyn Fn(Value) + Send + Sync>;

/// Callback the Lightning node client invokes for every node event.
pub type LightningEventHandler = Arc<dyn Fn(LightningNodeEvent) + Send + Sync>;

/// Error classes reported by the wallet RPC backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("{}", .0.as_deref().unwrap_or("generic error"))]
    Generic(Option<String>),

    #[error("session lost{}", .0.as_deref().map(|m| format!(": {m}")).unwrap_or_default())]
    SessionLost(Option<String>),

    #[error("timeout{}", .0.as_deref().map(|m| format!(": {m}")).unwrap_or_default())]
    Timeout(Option<String>),

    #[error("not authorized")]
    NotAuthorized,

    #[error("reconnect error")]
    Reconnect,
}

/// A multi-step backend call that may require two-factor resolution.
///
/// `get_status` returns a JSON object whose `status` is one of `call`,
/// `request_code`, `resolve_code`, `done` or `error`. The final `done` status
/// carries the call's payload under `result`.
pub trait TwoFactorCall: Send + Sync {
    fn get_status(&self) -> BackendFuture<'_, Value>;

    fn call(&self) -> BackendFuture<'_, ()>;

    fn request_code(&self, method: String) -> BackendFuture<'_, ()>;

    fn resolve_code(&self, code: String) -> BackendFuture<'_, ()>;
}

/// A wallet RPC backend session for one network.
pub trait RpcSession: Send + Sync {
    /// Open the transport with the given network parameters.
    fn connect(&self, net_params: Value) -> BackendFuture<'_, ()>;

    /// Install the push notification callback. Replaces any previous handler.
    fn set_notification_handler(&self, handler: NotificationHandler);

    /// Lightweight transport hint (`{"hint": "connect"|"disconnect", ...}`).
    fn reconnect_hint(&self, hint: Value) -> BackendFuture<'_, ()>;

    /// Compute wallet identifiers for credentials or a master xpub.
    fn wallet_identifier(&self, net_params: Value, details: Value)
    -> BackendFuture<'_, WalletIdentifier>;

    fn login_user_sw(&self, credentials: Credentials) -> BackendFuture<'_, Box<dyn TwoFactorCall>>;

    fn login_user_hw(&self, device: HwDevice) -> BackendFuture<'_, Box<dyn TwoFactorCall>>;

    fn get_subaccounts(&self, refresh: bool) -> BackendFuture<'_, Box<dyn TwoFactorCall>>;

    fn get_subaccount(&self, pointer: u32) -> BackendFuture<'_, Box<dyn TwoFactorCall>>;

    fn update_subaccount(&self, details: Value) -> BackendFuture<'_, Box<dyn TwoFactorCall>>;

    fn get_balance(&self, pointer: u32, num_confs: u32)
    -> BackendFuture<'_, Box<dyn TwoFactorCall>>;

    fn get_transactions(
        &self,
        pointer: u32,
        first: u32,
        count: u32,
    ) -> BackendFuture<'_, Box<dyn TwoFactorCall>>;

    fn get_two_factor_config(&self) -> BackendFuture<'_, Value>;

    fn get_settings(&self) -> BackendFuture<'_, Value>;

    fn change_settings(&self, settings: Value) -> BackendFuture<'_, Box<dyn TwoFactorCall>>;

    fn get_system_message(&self) -> BackendFuture<'_, Option<String>>;
}

/// Creates fresh, unconnected RPC sessions.
pub trait RpcSessionFactory: Send + Sync {
    fn create(&self, network: NetworkIdentity) -> Arc<dyn RpcSession>;
}

/// A code request surfaced to the user during two-factor resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeRequest {
    pub network: NetworkIdentity,
    pub method: String,
    pub attempts_remaining: Option<u32>,
    /// The only enabled method is SMS, so a phone call may be offered instead.
    pub enable_2fa_call_method: bool,
    /// The previous code for the same method was rejected.
    pub previous_failed: bool,
}

/// Out-of-band resolution of two-factor steps (method choice and code entry).
pub trait ChallengeResolver: Send + Sync {
    fn select_method(
        &self,
        network: NetworkIdentity,
        methods: Vec<String>,
    ) -> BackendFuture<'_, String>;

    fn code(&self, request: CodeRequest) -> BackendFuture<'_, String>;
}

/// Hardware wallet signing delegate.
pub trait HwSigner: Send + Sync {
    /// Answer a `resolve_code` step that requires the device.
    ///
    /// Returns the JSON reply passed back to the backend as the code.
    fn resolve_code(
        &self,
        network: NetworkIdentity,
        action: String,
        required_data: Value,
    ) -> BackendFuture<'_, Value>;
}

/// Events pushed by the Lightning node client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LightningNodeEvent {
    Synced,
    NewBlock(u32),
    InvoicePaid { payment_hash: String },
    PaymentSucceeded { payment_hash: String },
    PaymentFailed { error: String },
}

/// A payment-channel node client bound to one wallet.
pub trait LightningNode: Send + Sync {
    /// Start the node from a mnemonic. `check_credentials` asks the node
    /// service to verify the node exists for this seed before trusting it.
    fn connect(&self, mnemonic: String, check_credentials: bool) -> BackendFuture<'_, ()>;

    fn stop(&self) -> BackendFuture<'_, ()>;

    /// Opaque node-service credentials to persist after a successful connect.
    fn node_credentials(&self) -> Option<String>;

    fn balance_sat(&self) -> BackendFuture<'_, u64>;

    /// Current minimum and maximum payment size.
    fn send_limits(&self) -> BackendFuture<'_, SendLimits>;

    /// Decode a user-supplied payment string.
    fn parse_input(&self, input: String) -> BackendFuture<'_, LightningInput>;

    fn send_payment(&self, bolt11: String, amount_sat: Option<u64>) -> BackendFuture<'_, Payment>;

    fn pay_lnurl(
        &self,
        request: LnUrlPayRequest,
        amount_sat: u64,
        comment: String,
    ) -> BackendFuture<'_, LnUrlPayOutcome>;

    fn create_invoice(&self, amount_sat: u64, description: String) -> BackendFuture<'_, LnInvoice>;

    fn receive_onchain(&self) -> BackendFuture<'_, SwapInfo>;

    fn list_payments(&self) -> BackendFuture<'_, Vec<Payment>>;

    fn list_refundables(&self) -> BackendFuture<'_, Vec<SwapInfo>>;

    fn list_reverse_swaps_in_progress(&self) -> BackendFuture<'_, Vec<ReverseSwapInfo>>;

    fn swap_in_progress(&self) -> BackendFuture<'_, Option<SwapInfo>>;

    fn close_channels(&self) -> BackendFuture<'_, ()>;
}

/// Creates node clients; one per login.
pub trait LightningNodeFactory: Send + Sync {
    fn create(
        &self,
        wallet_hash_id: &str,
        testnet: bool,
        listener: LightningEventHandler,
    ) -> Arc<dyn LightningNode>;
}

/// A descriptor-wallet swap engine session.
pub trait DescriptorWallet: Send + Sync {
    /// Create a reverse-swap invoice paying into `claim_address`.
    fn invoice(
        &self,
        amount_sat: u64,
        description: Option<String>,
        claim_address: String,
    ) -> BackendFuture<'_, String>;

    /// Prepare a submarine swap paying `bolt11`; returns the lockup address.
    fn prepare_pay(&self, bolt11: String, refund_address: String) -> BackendFuture<'_, String>;
}

/// Builds descriptor-wallet sessions from a mnemonic.
pub trait DescriptorWalletFactory: Send + Sync {
    fn create(&self, mnemonic: String) -> BackendFuture<'_, Arc<dyn DescriptorWallet>>;
}

/// Source of asset metadata.
pub trait AssetsProvider: Send + Sync {
    fn get_assets(&self, ids: Vec<String>) -> BackendFuture<'_, BTreeMap<String, AssetInfo>>;

    /// Refresh the provider's own cache; `refresh` forces a network fetch.
    fn refresh_assets(&self, refresh: bool) -> BackendFuture<'_, ()>;
}
