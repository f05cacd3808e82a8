//! Atomic transaction processor.
//!
//! Composes the wallet store, the ledger and the fee engine into
//! all-or-nothing operations: funding, charging and pass purchases. Each
//! operation is observed only as a success (with the new balance) or a
//! structured failure; no intermediate state is ever visible. Also drains an
//! async stream of caller intents.

use chrono::{Duration, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio_stream::{Stream, StreamExt};
use tracing::info;

use crate::Cents;
use crate::fees::{FeeConfig, FeeDistribution, FeeSplit};
use crate::ledger::Ledger;
use crate::model::{
    EntryDetail, EntryKind, GhostPass, LedgerEntry, Operation, PassId, RefundRequest, TxId, Wallet,
    WalletId,
};
use crate::store::WalletStore;

mod error;
pub use error::{EngineError, RefundError};

mod refund;
pub use refund::RefundableFunding;

/// Fee context under which ghost pass purchases are charged.
pub const PASS_CONTEXT: &str = "ghostpass";

/// Outcome of a successful charge.
#[derive(Debug, Clone, Copy)]
pub struct ChargeReceipt {
    pub wallet: WalletId,
    /// The SPEND entry; the FEE entry, when present, references it.
    pub spend: TxId,
    pub new_balance: Cents,
    pub fee: Cents,
    pub split: FeeSplit,
}

/// Outcome of a successful pass purchase.
#[derive(Debug, Clone)]
pub struct PassReceipt {
    pub pass: GhostPass,
    pub new_balance: Cents,
    /// Item price plus fee.
    pub charged: Cents,
    pub fee: Cents,
}

/// Per-wallet summary line for the balance report.
#[derive(Debug, Clone)]
pub struct WalletReport {
    pub binding_key: String,
    pub balance: Cents,
    pub funded: Cents,
    pub spent: Cents,
    pub refunded: Cents,
}

/// The wallet ledger engine.
///
/// All methods take `&self`; interior synchronization makes the engine safe
/// to share across request-handling workers via `Arc`. Operations on
/// different wallets never block each other.
pub struct Engine {
    store: WalletStore,
    ledger: Ledger,
    fees: RwLock<FeeConfig>,
    /// Pass price per offered duration, in days.
    pricing: RwLock<HashMap<u16, Cents>>,
    passes: DashMap<PassId, GhostPass>,
    refunds: RwLock<Vec<RefundRequest>>,
    next_pass_id: AtomicU64,
    next_refund_id: AtomicU64,
}

/// Public API
impl Engine {
    pub fn new() -> Self {
        Self {
            store: WalletStore::new(),
            ledger: Ledger::new(),
            fees: RwLock::new(FeeConfig::default()),
            pricing: RwLock::new(default_pass_pricing()),
            passes: DashMap::new(),
            refunds: RwLock::new(Vec::new()),
            next_pass_id: AtomicU64::new(1),
            next_refund_id: AtomicU64::new(1),
        }
    }

    /// Run the engine over a stream of caller intents.
    pub async fn run(&self, mut stream: impl Stream<Item = Operation> + Unpin) {
        while let Some(op) = stream.next().await {
            // a failed operation must not stop the drain
            let _ = self.apply(op);
        }
    }

    /// Apply a single operation, logging the outcome.
    pub fn apply(&self, op: Operation) -> Result<(), EngineError> {
        match op {
            Operation::Fund {
                binding,
                amount,
                source,
            } => {
                let result = self.fund(&binding, amount, &source).map(|_| ());
                Self::log_result("fund", &binding, Some(amount), &result);
                result
            }
            Operation::Charge {
                binding,
                amount,
                context,
            } => {
                let result = self.charge(&binding, amount, &context).map(|_| ());
                Self::log_result("charge", &binding, Some(amount), &result);
                result
            }
            Operation::PurchasePass {
                binding,
                duration_days,
            } => {
                let result = self.purchase_pass(&binding, duration_days).map(|_| ());
                Self::log_result("purchase", &binding, None, &result);
                result
            }
            Operation::Refund {
                binding,
                funding,
                amount,
            } => {
                let result = self
                    .request_refund(&binding, funding, amount)
                    .map(|_| ());
                Self::log_result("refund", &binding, Some(amount), &result);
                result
            }
        }
    }

    /// Credit already-settled funds to the wallet bound to `binding_key`,
    /// creating the wallet on first touch. Writes one FUND entry; charges no
    /// fee and cannot be rejected for balance reasons.
    pub fn fund(
        &self,
        binding_key: &str,
        amount: Cents,
        source: &str,
    ) -> Result<Cents, EngineError> {
        let wallet_id = self.store.get_or_create(binding_key);
        self.store
            .with_wallet(wallet_id, |wallet| {
                let before = wallet.balance;
                let new_balance = WalletStore::apply_delta(wallet, amount, Cents::ZERO)?;
                let entry = LedgerEntry {
                    id: self.ledger.reserve_id(),
                    wallet: wallet_id,
                    amount,
                    balance_before: before,
                    balance_after: new_balance,
                    at: Utc::now(),
                    detail: EntryDetail::Fund {
                        source: source.to_string(),
                    },
                };
                if let Err(e) = self.ledger.append(entry) {
                    wallet.balance = before;
                    return Err(e.into());
                }
                Ok(new_balance)
            })
            .ok_or(EngineError::WalletNotFound(wallet_id))?
    }

    /// Debit an item price plus the context fee as one indivisible unit:
    /// balance check, balance mutation and the SPEND/FEE entry pair either
    /// all commit or none do.
    pub fn charge(
        &self,
        binding_key: &str,
        item_amount: Cents,
        context: &str,
    ) -> Result<ChargeReceipt, EngineError> {
        let wallet_id = self.store.get_or_create(binding_key);
        let config = self.fees.read().clone();
        self.store
            .with_wallet(wallet_id, |wallet| {
                self.apply_charge(wallet, item_amount, context, &config)
            })
            .ok_or(EngineError::WalletNotFound(wallet_id))?
    }

    /// Buy a ghost pass: a SPEND through the charge path under the
    /// `"ghostpass"` context, with the pass row created inside the same
    /// wallet-lock scope as the ledger commit. The pass cannot exist without
    /// its payment, and a paid purchase cannot fail to produce a pass.
    pub fn purchase_pass(
        &self,
        binding_key: &str,
        duration_days: u16,
    ) -> Result<PassReceipt, EngineError> {
        let price = self
            .pricing
            .read()
            .get(&duration_days)
            .copied()
            .ok_or(EngineError::InvalidDuration { duration_days })?;
        let wallet_id = self.store.get_or_create(binding_key);
        let config = self.fees.read().clone();
        self.store
            .with_wallet(wallet_id, |wallet| {
                let receipt = self.apply_charge(wallet, price, PASS_CONTEXT, &config)?;
                let now = Utc::now();
                let pass = GhostPass {
                    id: self.next_pass_id.fetch_add(1, Ordering::Relaxed),
                    wallet: wallet_id,
                    duration_days,
                    price,
                    spend: receipt.spend,
                    issued_at: now,
                    expires_at: now + Duration::days(duration_days as i64),
                };
                self.passes.insert(pass.id, pass.clone());
                Ok(PassReceipt {
                    pass,
                    new_balance: receipt.new_balance,
                    charged: price + receipt.fee,
                    fee: receipt.fee,
                })
            })
            .ok_or(EngineError::WalletNotFound(wallet_id))?
    }

    /// Ledger entries for a binding, most-recent-first, optionally filtered
    /// by kind and resumable from an entry-id cursor. Unknown bindings have
    /// no history.
    pub fn list_transactions(
        &self,
        binding_key: &str,
        kind: Option<EntryKind>,
        cursor: Option<TxId>,
        limit: usize,
    ) -> Vec<LedgerEntry> {
        match self.store.lookup(binding_key) {
            Some(wallet_id) => self.ledger.entries_for(wallet_id, kind, cursor, limit),
            None => Vec::new(),
        }
    }

    pub fn balance(&self, binding_key: &str) -> Option<Cents> {
        self.store.balance(self.store.lookup(binding_key)?)
    }

    pub fn wallet(&self, binding_key: &str) -> Option<Wallet> {
        self.store.wallet(self.store.lookup(binding_key)?)
    }

    pub fn pass(&self, id: PassId) -> Option<GhostPass> {
        self.passes.get(&id).map(|p| p.clone())
    }

    pub fn passes_for(&self, binding_key: &str) -> Vec<GhostPass> {
        let Some(wallet_id) = self.store.lookup(binding_key) else {
            return Vec::new();
        };
        self.passes
            .iter()
            .filter(|p| p.wallet == wallet_id)
            .map(|p| p.clone())
            .collect()
    }

    /// Per-wallet summary of the committed state, sorted by binding key.
    pub fn report(&self) -> Vec<WalletReport> {
        let mut rows: Vec<WalletReport> = self
            .store
            .snapshot()
            .into_iter()
            .map(|wallet| WalletReport {
                balance: wallet.balance,
                funded: self.ledger.sum_by_kind(wallet.id, EntryKind::Fund),
                spent: -(self.ledger.sum_by_kind(wallet.id, EntryKind::Spend)
                    + self.ledger.sum_by_kind(wallet.id, EntryKind::Fee)),
                refunded: -self.ledger.sum_by_kind(wallet.id, EntryKind::Refund),
                binding_key: wallet.binding_key,
            })
            .collect();
        rows.sort_by(|a, b| a.binding_key.cmp(&b.binding_key));
        rows
    }

    pub fn store(&self) -> &WalletStore {
        &self.store
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }
}

/// Admin API
impl Engine {
    /// Replace the fee distribution. Percentages that do not sum to exactly
    /// 100 are rejected before being stored. Returns the new config version.
    pub fn set_fee_distribution(
        &self,
        platform: u8,
        vendor: u8,
        pool: u8,
        promoter: u8,
    ) -> Result<u64, EngineError> {
        let distribution = FeeDistribution::new(platform, vendor, pool, promoter)?;
        let mut config = self.fees.write();
        config.distribution = distribution;
        config.version += 1;
        Ok(config.version)
    }

    /// Set the fee charged for one context. Returns the new config version.
    pub fn set_context_fee(&self, context: &str, fee: Cents) -> u64 {
        let mut config = self.fees.write();
        config.schedule.set_context_fee(context, fee);
        config.version += 1;
        config.version
    }

    /// Set the fallback fee for contexts without an explicit amount.
    pub fn set_default_fee(&self, fee: Cents) -> u64 {
        let mut config = self.fees.write();
        config.schedule.set_default_fee(fee);
        config.version += 1;
        config.version
    }

    /// Globally enable or disable fee collection.
    pub fn set_fees_enabled(&self, enabled: bool) -> u64 {
        let mut config = self.fees.write();
        config.schedule.set_enabled(enabled);
        config.version += 1;
        config.version
    }

    /// Offer (or reprice) a pass duration.
    pub fn set_pass_price(&self, duration_days: u16, price: Cents) {
        self.pricing.write().insert(duration_days, price);
    }

    pub fn fee_for(&self, context: &str) -> Cents {
        self.fees.read().schedule.fee_for(context)
    }

    pub fn fee_config_version(&self) -> u64 {
        self.fees.read().version
    }
}

/// Private API
impl Engine {
    /// The charge unit of work. Must run under the wallet's lock.
    ///
    /// Debits `item_amount + fee`, then appends the SPEND entry and, when the
    /// fee is non-zero, the FEE entry referencing it, all-or-nothing. A
    /// rejected append rolls the balance back before returning.
    fn apply_charge(
        &self,
        wallet: &mut Wallet,
        item_amount: Cents,
        context: &str,
        config: &FeeConfig,
    ) -> Result<ChargeReceipt, EngineError> {
        let fee = config.schedule.fee_for(context);
        let total = item_amount + fee;
        let before = wallet.balance;
        let new_balance = WalletStore::apply_delta(wallet, -total, Cents::ZERO)?;

        let now = Utc::now();
        let split = config.distribution.split(fee);
        let spend_id = self.ledger.reserve_id();
        let mut batch = vec![LedgerEntry {
            id: spend_id,
            wallet: wallet.id,
            amount: -item_amount,
            balance_before: before,
            balance_after: before - item_amount,
            at: now,
            detail: EntryDetail::Spend {
                context: context.to_string(),
            },
        }];
        if fee > Cents::ZERO {
            batch.push(LedgerEntry {
                id: self.ledger.reserve_id(),
                wallet: wallet.id,
                amount: -fee,
                balance_before: before - item_amount,
                balance_after: new_balance,
                at: now,
                detail: EntryDetail::Fee {
                    context: context.to_string(),
                    spend: spend_id,
                    split,
                },
            });
        }
        if let Err(e) = self.ledger.append_all(batch) {
            wallet.balance = before;
            return Err(e.into());
        }

        Ok(ChargeReceipt {
            wallet: wallet.id,
            spend: spend_id,
            new_balance,
            fee,
            split,
        })
    }

    /// Small helper to log `apply` results
    fn log_result(
        op: &str,
        binding: &str,
        amount: Option<Cents>,
        result: &Result<(), EngineError>,
    ) {
        match (result, amount) {
            (Ok(()), Some(amt)) => {
                info!(binding, amount = %amt, "{op} applied");
            }
            (Ok(()), None) => {
                info!(binding, "{op} applied");
            }
            (Err(e), Some(amt)) => {
                info!(binding, amount = %amt, reason = %e, "{op} skipped");
            }
            (Err(e), None) => {
                info!(binding, reason = %e, "{op} skipped");
            }
        }
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

fn default_pass_pricing() -> HashMap<u16, Cents> {
    HashMap::from([
        (1, Cents::new(1_500)),
        (3, Cents::new(3_500)),
        (7, Cents::new(6_500)),
        (30, Cents::new(19_900)),
    ])
}
