//! Error taxonomy for the transaction and refund processors.
//!
//! Every variant carries the requested and available amounts where they
//! apply, so callers can render a precise message; nothing is downgraded to
//! a generic failure.

use thiserror::Error;

use crate::Cents;
use crate::fees::ConfigError;
use crate::ledger::LedgerConsistencyError;
use crate::model::{TxId, WalletId};
use crate::store::InsufficientBalance;

/// Top-level error returned by [`Engine`](super::Engine) operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Recoverable: the caller can fund more and retry.
    #[error("charge failed: {0}")]
    InsufficientBalance(#[from] InsufficientBalance),

    /// No pass is priced for the requested duration.
    #[error("no pass is offered for a duration of {duration_days} days")]
    InvalidDuration { duration_days: u16 },

    #[error("refund failed: {0}")]
    Refund(#[from] RefundError),

    /// Admin misconfiguration, rejected before being stored.
    #[error("fee configuration rejected: {0}")]
    Config(#[from] ConfigError),

    /// Internal invariant violation. Never occurs under correct operation;
    /// the only class that must fail loudly instead of being retried.
    #[error(transparent)]
    Ledger(#[from] LedgerConsistencyError),

    #[error("wallet {0} not found")]
    WalletNotFound(WalletId),
}

/// Refund validation failure; recoverable and user-correctable.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RefundError {
    #[error("funding entry {0} not found for this wallet")]
    FundingNotFound(TxId),

    #[error("refund amount must be positive, got {0}")]
    InvalidAmount(Cents),

    #[error("requested {requested} exceeds remaining refundable amount {remaining}")]
    AmountExceedsOriginal { requested: Cents, remaining: Cents },

    #[error("requested {requested} exceeds current balance {available}")]
    AmountExceedsBalance { requested: Cents, available: Cents },
}
