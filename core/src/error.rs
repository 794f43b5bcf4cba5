//! Error types for the multi-network wallet core.

use crate::backend::BackendError;
use thiserror::Error;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Message the RPC backend reports when credentials do not open a wallet on a network.
pub const LOGIN_FAILED_MESSAGE: &str = "id_login_failed";

/// Marker the RPC backend uses when a hardware wallet refuses host unblinding.
pub const HOST_UNBLINDING_MESSAGE: &str = "HWW must enable host unblinding for singlesig wallets";

/// Errors that can occur while driving wallet sessions.
#[derive(Error, Debug)]
pub enum Error {
    /// The transport could not be connected, or dropped mid-flow.
    #[error("Connection failed: {}", .0.as_deref().unwrap_or("id_connection_failed"))]
    ConnectionFailed(Option<String>),

    /// No network session could be logged in.
    #[error("Login failed")]
    LoginFailed,

    /// The device or credentials belong to a different wallet.
    #[error("Wallet mismatch")]
    WalletMismatch,

    /// Hardware wallet must enable host unblinding to use Liquid singlesig.
    #[error("Host unblinding disabled: {0}")]
    HostUnblindingDisabled(String),

    /// Invalid mnemonic phrase.
    #[error("Invalid mnemonic phrase: {0}")]
    InvalidMnemonic(String),

    /// The backend reported an error status during a two-factor call.
    #[error("Two factor challenge failed: {0}")]
    TwoFactorChallengeFailure(String),

    /// The user (or a missing resolver) cancelled a two-factor challenge.
    #[error("Two factor challenge cancelled: {0}")]
    TwoFactorChallengeCancelled(String),

    /// Amount is missing or zero.
    #[error("Invalid amount")]
    InvalidAmount,

    /// Amount exceeds the spendable balance.
    #[error("Insufficient funds")]
    InsufficientFunds,

    /// Amount is below the payee's minimum.
    #[error("Amount must be at least {min}")]
    AmountBelowMinimum { min: u64 },

    /// Amount is above the payee's maximum.
    #[error("Amount must be at most {max}")]
    AmountAboveMaximum { max: u64 },

    /// The payment input could not be used.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Caller supplied an invalid combination of arguments.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// No local state exists for the requested wallet.
    #[error("Datadir not found")]
    DatadirNotFound,

    /// The invoice expired before it could be paid.
    #[error("Invoice expired")]
    InvoiceExpired,

    /// The operation is not supported by this session kind.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Opaque failure from a backend transport.
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Key derivation error.
    #[error("Key derivation error: {0}")]
    KeyDerivation(String),

    /// Storage operation failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Network/HTTP error.
    #[error("Network error: {0}")]
    Network(String),

    /// Parse error.
    #[error("Parse error: {0}")]
    Parse(String),

    /// A session's serial queue worker is gone.
    #[error("Serial queue closed")]
    QueueClosed,

    /// An operation panicked on a serial queue that is still running.
    #[error("Queued operation panicked")]
    TaskPanicked,

    /// Generic error with context.
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Stable identifier for errors that get stored as values (e.g. on transactions).
    ///
    /// Localisation keys (`id_*`), except the Lightning amount bounds.
    pub fn code(&self) -> &'static str {
        match self {
            Error::ConnectionFailed(_) => "id_connection_failed",
            Error::LoginFailed => LOGIN_FAILED_MESSAGE,
            Error::WalletMismatch => "id_wallet_mismatch",
            Error::HostUnblindingDisabled(_) => "id_host_unblinding_disabled",
            Error::InvalidMnemonic(_) => "id_invalid_mnemonic",
            Error::TwoFactorChallengeFailure(_) => "id_twofactor_failure",
            Error::TwoFactorChallengeCancelled(_) => "id_action_canceled",
            Error::InvalidAmount => "id_invalid_amount",
            Error::InsufficientFunds => "id_insufficient_funds",
            // Stored on Lightning transactions and matched by callers as-is
            Error::AmountBelowMinimum { .. } => "AmountBelowMinimum",
            Error::AmountAboveMaximum { .. } => "AmountAboveMaximum",
            Error::InvalidInput(_) => "id_invalid_address",
            Error::InvalidArgument(_) => "id_invalid_argument",
            Error::DatadirNotFound => "id_datadir_not_found",
            Error::InvoiceExpired => "id_invoice_expired",
            Error::Unsupported(_) => "id_unsupported_operation",
            _ => "id_operation_failure",
        }
    }

    /// Whether this is the backend's "credentials do not open a wallet here" failure.
    ///
    /// This is a heuristic on the backend message: it cannot tell wrong credentials
    /// apart from stale local state.
    pub fn is_login_failed(&self) -> bool {
        matches!(self, Error::TwoFactorChallengeFailure(msg) if msg == LOGIN_FAILED_MESSAGE)
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Other(format!("{:#}", err))
    }
}
