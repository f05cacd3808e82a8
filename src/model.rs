//! Core domain types for the wallet ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Cents;
use crate::fees::FeeSplit;

/// Wallet identifier (opaque, server-generated).
pub type WalletId = u64;

/// Ledger entry identifier; assigned in append order.
pub type TxId = u64;

/// Refund request identifier.
pub type RefundId = u64;

/// Ghost pass identifier.
pub type PassId = u64;

/// A wallet: one per binding key, holding the authoritative balance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wallet {
    pub id: WalletId,
    /// Device fingerprint or account id the wallet is keyed by; unique.
    pub binding_key: String,
    /// Never negative; every change pairs with exactly one ledger entry.
    pub balance: Cents,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    pub fn new(id: WalletId, binding_key: impl Into<String>) -> Self {
        Self {
            id,
            binding_key: binding_key.into(),
            balance: Cents::ZERO,
            updated_at: Utc::now(),
        }
    }
}

/// The closed set of balance-changing event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryKind {
    Fund,
    Spend,
    Fee,
    Refund,
}

/// Kind-specific payload of a ledger entry; each variant carries only the
/// fields that kind needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EntryDetail {
    /// Prepaid funds arriving from an already-settled external source.
    Fund { source: String },
    /// Item price portion of a charge.
    Spend { context: String },
    /// Platform fee portion of a charge; references the SPEND it accompanies
    /// and records the distribution shares for downstream payout scheduling.
    Fee {
        context: String,
        spend: TxId,
        split: FeeSplit,
    },
    /// Reversal against a prior FUND entry.
    Refund { funding: TxId },
}

impl EntryDetail {
    pub fn kind(&self) -> EntryKind {
        match self {
            EntryDetail::Fund { .. } => EntryKind::Fund,
            EntryDetail::Spend { .. } => EntryKind::Spend,
            EntryDetail::Fee { .. } => EntryKind::Fee,
            EntryDetail::Refund { .. } => EntryKind::Refund,
        }
    }

    /// The fee context (or funding source tag) this entry was recorded under.
    pub fn context(&self) -> Option<&str> {
        match self {
            EntryDetail::Fund { source } => Some(source),
            EntryDetail::Spend { context } | EntryDetail::Fee { context, .. } => Some(context),
            EntryDetail::Refund { .. } => None,
        }
    }

    /// The prior entry this one references, if any.
    pub fn reference(&self) -> Option<TxId> {
        match self {
            EntryDetail::Fee { spend, .. } => Some(*spend),
            EntryDetail::Refund { funding } => Some(*funding),
            _ => None,
        }
    }
}

/// One immutable, signed, balance-reconciling record of a single money movement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: TxId,
    pub wallet: WalletId,
    /// Signed delta: positive inflow, negative outflow.
    pub amount: Cents,
    pub balance_before: Cents,
    pub balance_after: Cents,
    pub at: DateTime<Utc>,
    pub detail: EntryDetail,
}

impl LedgerEntry {
    pub fn kind(&self) -> EntryKind {
        self.detail.kind()
    }
}

/// Outcome of a refund request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RefundStatus {
    Pending,
    Success,
    Failed,
}

/// A recorded refund attempt against one funding entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundRequest {
    pub id: RefundId,
    pub wallet: WalletId,
    /// The original FUND entry being reversed.
    pub funding: TxId,
    pub amount: Cents,
    pub status: RefundStatus,
    /// Set when status is Failed.
    pub reason: Option<String>,
    pub at: DateTime<Utc>,
}

/// Pass lifecycle state, derived from the expiry timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PassStatus {
    Active,
    Expired,
}

/// An ephemeral access pass, derived from one SPEND entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GhostPass {
    pub id: PassId,
    pub wallet: WalletId,
    pub duration_days: u16,
    pub price: Cents,
    /// The SPEND entry that paid for this pass.
    pub spend: TxId,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl GhostPass {
    pub fn status(&self, now: DateTime<Utc>) -> PassStatus {
        if now < self.expires_at {
            PassStatus::Active
        } else {
            PassStatus::Expired
        }
    }
}

/// A caller intent, as fed to the engine by the replay surface.
#[derive(Debug, Clone)]
pub enum Operation {
    /// Credit already-settled funds to the wallet bound to `binding`.
    Fund {
        binding: String,
        amount: Cents,
        source: String,
    },
    /// Debit an item price plus the context fee from the wallet.
    Charge {
        binding: String,
        amount: Cents,
        context: String,
    },
    /// Buy a ghost pass of the given duration.
    PurchasePass { binding: String, duration_days: u16 },
    /// Reverse part of a prior funding entry.
    Refund {
        binding: String,
        funding: TxId,
        amount: Cents,
    },
}
