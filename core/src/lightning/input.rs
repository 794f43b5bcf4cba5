//! Payment inputs understood by the Lightning session.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// A decoded BOLT11 invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LnInvoice {
    pub bolt11: String,
    pub payment_hash: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Requested amount; `None` for any-amount invoices.
    #[serde(default)]
    pub amount_msat: Option<u64>,
    /// Creation time, seconds since the epoch.
    pub timestamp: u64,
    /// Validity in seconds after `timestamp`.
    pub expiry: u64,
}

impl LnInvoice {
    pub fn amount_sat(&self) -> Option<u64> {
        self.amount_msat.map(|msat| msat / 1000)
    }

    pub fn expires_at(&self) -> u64 {
        self.timestamp.saturating_add(self.expiry)
    }

    pub fn is_expired_at(&self, now_secs: u64) -> bool {
        now_secs >= self.expires_at()
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(now_secs())
    }

    /// Amount to send: the invoice amount, or the user's amount for any-amount invoices.
    pub fn sendable_sat(&self, user_sat: Option<u64>) -> Option<u64> {
        self.amount_sat().or(user_sat).filter(|sat| *sat > 0)
    }
}

/// LNURL-pay request parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LnUrlPayRequest {
    pub callback: String,
    pub min_sendable_msat: u64,
    pub max_sendable_msat: u64,
    #[serde(default)]
    pub metadata_str: String,
    #[serde(default)]
    pub comment_allowed: u16,
    pub domain: String,
    /// Lightning address the request was resolved from, if any.
    #[serde(default)]
    pub ln_address: Option<String>,
}

impl LnUrlPayRequest {
    pub fn min_sendable_sat(&self) -> u64 {
        self.min_sendable_msat.div_ceil(1000)
    }

    pub fn max_sendable_sat(&self) -> u64 {
        self.max_sendable_msat / 1000
    }

    /// Fixed-amount requests carry equal bounds.
    pub fn sendable_sat(&self, user_sat: Option<u64>) -> Option<u64> {
        if self.min_sendable_msat == self.max_sendable_msat {
            return Some(self.min_sendable_sat()).filter(|sat| *sat > 0);
        }
        user_sat.filter(|sat| *sat > 0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LnUrlWithdrawRequest {
    pub callback: String,
    pub k1: String,
    #[serde(default)]
    pub default_description: String,
    pub min_withdrawable_msat: u64,
    pub max_withdrawable_msat: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LnUrlAuthRequest {
    pub k1: String,
    pub domain: String,
    pub url: String,
}

/// Classified payment input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LightningInput {
    OnchainAddress {
        address: String,
        #[serde(default)]
        amount_sat: Option<u64>,
    },
    Bolt11(LnInvoice),
    LnUrlPay(LnUrlPayRequest),
    LnUrlWithdraw(LnUrlWithdrawRequest),
    LnUrlAuth(LnUrlAuthRequest),
    NodeId { node_id: String },
    Unsupported { input: String },
}

/// Result of paying an LNURL-pay request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LnUrlPayOutcome {
    EndpointSuccess {
        payment_hash: String,
        #[serde(default)]
        success_message: Option<String>,
    },
    EndpointError {
        reason: String,
    },
    PayError {
        payment_hash: String,
        reason: String,
    },
}

/// Payment size limits imposed by the node's channel and liquidity provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendLimits {
    #[serde(default)]
    pub min_sat: Option<u64>,
    #[serde(default)]
    pub max_sat: Option<u64>,
}

impl SendLimits {
    /// Tightest bounds of `self` and the payee's own bounds.
    pub fn narrowed(self, min_sat: Option<u64>, max_sat: Option<u64>) -> Self {
        Self {
            min_sat: self.min_sat.max(min_sat),
            max_sat: match (self.max_sat, max_sat) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            },
        }
    }
}

/// Check a send amount against the payee's bounds and the available balance.
///
/// Bounds are checked in order: missing amount, minimum, balance, maximum.
pub fn check_amount(
    satoshi: Option<u64>,
    balance: u64,
    min: Option<u64>,
    max: Option<u64>,
) -> Result<u64> {
    let satoshi = satoshi.filter(|sat| *sat > 0).ok_or(Error::InvalidAmount)?;
    if let Some(min) = min {
        if satoshi < min {
            return Err(Error::AmountBelowMinimum { min });
        }
    }
    if satoshi > balance {
        return Err(Error::InsufficientFunds);
    }
    if let Some(max) = max {
        if satoshi > max {
            return Err(Error::AmountAboveMaximum { max });
        }
    }
    Ok(satoshi)
}

pub(crate) fn now_secs() -> u64 {
    u64::try_from(OffsetDateTime::now_utc().unix_timestamp()).unwrap_or_default()
}
