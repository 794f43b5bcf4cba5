//! Node history records and their normalization into wallet transactions.

use crate::error::Result;
use crate::types::{BTC_ASSET, Balances, Transaction, TransactionType, sort_by_recency};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentType {
    Sent,
    Received,
    ClosedChannel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Complete,
    Failed,
}

/// A payment recorded by the node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    /// Payment hash, or closing txid for channel closes.
    pub id: String,
    pub payment_type: PaymentType,
    /// Seconds since the epoch.
    pub payment_time: i64,
    pub amount_msat: u64,
    pub fee_msat: u64,
    pub status: PaymentStatus,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapStatus {
    Initial,
    WaitingConfirmation,
    Redeemable,
    Redeemed,
    Refundable,
    Completed,
    Expired,
}

/// An on-chain to Lightning swap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapInfo {
    pub bitcoin_address: String,
    /// Seconds since the epoch.
    pub created_at: i64,
    pub confirmed_sats: u64,
    pub unconfirmed_sats: u64,
    pub status: SwapStatus,
    #[serde(default)]
    pub refund_tx_ids: Vec<String>,
    #[serde(default)]
    pub bolt11: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReverseSwapStatus {
    Initial,
    InProgress,
    Cancelled,
    CompletedSeen,
    CompletedConfirmed,
}

/// A Lightning to on-chain swap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReverseSwapInfo {
    pub id: String,
    pub claim_pubkey: String,
    #[serde(default)]
    pub lockup_txid: Option<String>,
    pub onchain_amount_sat: u64,
    pub status: ReverseSwapStatus,
}

fn sats(amount: i64) -> Balances {
    Balances::from([(BTC_ASSET.to_string(), amount)])
}

fn empty(subaccount_id: &str) -> Transaction {
    Transaction {
        txhash: None,
        created_at_ts: 0,
        block_height: 0,
        kind: TransactionType::Mixed,
        satoshi: Balances::new(),
        fee: 0,
        memo: String::new(),
        subaccount: Some(subaccount_id.to_string()),
        is_lightning_swap: false,
        is_in_progress_swap: false,
        is_refundable_swap: false,
    }
}

impl Payment {
    pub fn to_transaction(&self, subaccount_id: &str) -> Transaction {
        let amount = i64::try_from(self.amount_msat / 1000).unwrap_or(i64::MAX);
        let (kind, amount) = match self.payment_type {
            PaymentType::Received => (TransactionType::Incoming, amount),
            PaymentType::Sent | PaymentType::ClosedChannel => (TransactionType::Outgoing, -amount),
        };
        Transaction {
            txhash: Some(self.id.clone()),
            created_at_ts: self.payment_time.saturating_mul(1_000_000),
            block_height: u32::try_from(self.payment_time).unwrap_or(u32::MAX),
            kind,
            satoshi: sats(amount),
            fee: self.fee_msat / 1000,
            memo: self.description.clone().unwrap_or_default(),
            ..empty(subaccount_id)
        }
    }
}

impl SwapInfo {
    pub fn to_transaction(&self, subaccount_id: &str, refundable: bool) -> Transaction {
        let amount = self.confirmed_sats.saturating_add(self.unconfirmed_sats);
        Transaction {
            txhash: self.refund_tx_ids.first().cloned(),
            created_at_ts: self.created_at.saturating_mul(1_000_000),
            // Refundable swaps stay on top until refunded
            block_height: if refundable { u32::MAX } else { 0 },
            satoshi: sats(i64::try_from(amount).unwrap_or(i64::MAX)),
            is_lightning_swap: true,
            is_in_progress_swap: self.status != SwapStatus::Expired && !refundable,
            is_refundable_swap: refundable,
            ..empty(subaccount_id)
        }
    }
}

impl ReverseSwapInfo {
    pub fn to_transaction(&self, subaccount_id: &str) -> Transaction {
        Transaction {
            txhash: self.lockup_txid.clone(),
            satoshi: sats(i64::try_from(self.onchain_amount_sat).unwrap_or(i64::MAX)),
            is_lightning_swap: true,
            is_in_progress_swap: self.status == ReverseSwapStatus::InProgress,
            ..empty(subaccount_id)
        }
    }
}

/// Node history sources, each fetched independently.
pub struct HistorySources {
    pub payments: Result<Vec<Payment>>,
    pub refundables: Result<Vec<SwapInfo>>,
    pub reverse_swaps: Result<Vec<ReverseSwapInfo>>,
    pub swap_in_progress: Result<Option<SwapInfo>>,
}

/// Merge all sources into one list, newest first.
///
/// A failed source is logged and contributes nothing.
pub fn merge_history(sources: HistorySources, subaccount_id: &str) -> Vec<Transaction> {
    fn ok_or_log<T: Default>(what: &str, result: Result<T>) -> T {
        result.unwrap_or_else(|err| {
            log::warn!("Lightning {} unavailable: {}", what, err);
            T::default()
        })
    }

    let mut txs: Vec<Transaction> = ok_or_log("payments", sources.payments)
        .iter()
        .map(|p| p.to_transaction(subaccount_id))
        .collect();
    txs.extend(
        ok_or_log("refundable swaps", sources.refundables)
            .iter()
            .map(|s| s.to_transaction(subaccount_id, true)),
    );
    txs.extend(
        ok_or_log("reverse swaps", sources.reverse_swaps)
            .iter()
            .map(|s| s.to_transaction(subaccount_id)),
    );
    txs.extend(
        ok_or_log("swap in progress", sources.swap_in_progress)
            .iter()
            .map(|s| s.to_transaction(subaccount_id, false)),
    );
    sort_by_recency(&mut txs);
    txs
}
