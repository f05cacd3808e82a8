//! Wallet store: binding-key upsert and per-wallet serialization.
//!
//! Each wallet's state sits behind its own mutex; holding it serializes that
//! wallet's balance mutation together with the matching ledger append, while
//! operations on different wallets never contend.

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

use crate::Cents;
use crate::model::{Wallet, WalletId};

/// A debit would drive the balance below its floor.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("insufficient balance: required {required}, available {available}")]
pub struct InsufficientBalance {
    pub required: Cents,
    pub available: Cents,
}

pub struct WalletStore {
    /// binding_key -> wallet id; the unique index backing idempotent creation.
    bindings: DashMap<String, WalletId>,
    wallets: DashMap<WalletId, Arc<Mutex<Wallet>>>,
    next_id: AtomicU64,
}

impl WalletStore {
    pub fn new() -> Self {
        Self {
            bindings: DashMap::new(),
            wallets: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Idempotent wallet creation keyed by binding. Concurrent first-touch
    /// calls for one key go through the binding index's entry lock, so
    /// exactly one wallet is ever created per key (insert-if-absent, not
    /// check-then-insert).
    pub fn get_or_create(&self, binding_key: &str) -> WalletId {
        if let Some(id) = self.bindings.get(binding_key) {
            return *id;
        }
        *self
            .bindings
            .entry(binding_key.to_string())
            .or_insert_with(|| {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                self.wallets
                    .insert(id, Arc::new(Mutex::new(Wallet::new(id, binding_key))));
                id
            })
    }

    pub fn lookup(&self, binding_key: &str) -> Option<WalletId> {
        self.bindings.get(binding_key).map(|id| *id)
    }

    /// Snapshot of a wallet's committed state.
    pub fn wallet(&self, id: WalletId) -> Option<Wallet> {
        self.with_wallet(id, |w| w.clone())
    }

    /// Balance as of the last committed ledger entry.
    pub fn balance(&self, id: WalletId) -> Option<Cents> {
        self.with_wallet(id, |w| w.balance)
    }

    /// Run `f` while holding the wallet's lock. Balance mutation and the
    /// matching ledger append both happen inside one such closure, which is
    /// what makes the pair indivisible.
    pub fn with_wallet<T>(&self, id: WalletId, f: impl FnOnce(&mut Wallet) -> T) -> Option<T> {
        // Clone the Arc first so the map shard is not held across `f`.
        let cell = self.wallets.get(&id)?.clone();
        let mut wallet = cell.lock();
        Some(f(&mut wallet))
    }

    /// The only path by which a balance changes. Callers must hold the
    /// wallet's lock (i.e. call from inside [`with_wallet`](Self::with_wallet))
    /// and append the matching ledger entry before releasing it.
    pub fn apply_delta(
        wallet: &mut Wallet,
        delta: Cents,
        floor: Cents,
    ) -> Result<Cents, InsufficientBalance> {
        let new_balance = wallet.balance + delta;
        if new_balance < floor {
            return Err(InsufficientBalance {
                required: -delta,
                available: wallet.balance - floor,
            });
        }
        wallet.balance = new_balance;
        wallet.updated_at = Utc::now();
        Ok(new_balance)
    }

    pub fn wallet_count(&self) -> usize {
        self.wallets.len()
    }

    /// Committed state of every wallet, in no particular order. Each wallet
    /// is locked briefly and independently; this is a point-in-time view per
    /// wallet, not a cross-wallet snapshot.
    pub fn snapshot(&self) -> Vec<Wallet> {
        self.wallets
            .iter()
            .map(|cell| cell.lock().clone())
            .collect()
    }
}

impl Default for WalletStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn get_or_create_is_idempotent() {
        let store = WalletStore::new();
        let a = store.get_or_create("device-a");
        let b = store.get_or_create("device-a");
        assert_eq!(a, b);
        assert_eq!(store.wallet_count(), 1);
        assert_eq!(store.balance(a), Some(Cents::ZERO));
    }

    #[test]
    fn distinct_bindings_get_distinct_wallets() {
        let store = WalletStore::new();
        let a = store.get_or_create("device-a");
        let b = store.get_or_create("device-b");
        assert_ne!(a, b);
        assert_eq!(store.wallet_count(), 2);
    }

    #[test]
    fn lookup_does_not_create() {
        let store = WalletStore::new();
        assert_eq!(store.lookup("device-a"), None);
        let id = store.get_or_create("device-a");
        assert_eq!(store.lookup("device-a"), Some(id));
    }

    #[test]
    fn concurrent_get_or_create_yields_one_wallet() {
        let store = Arc::new(WalletStore::new());

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || store.get_or_create("device-a"))
            })
            .collect();
        let ids: Vec<WalletId> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert!(ids.iter().all(|&id| id == ids[0]));
        assert_eq!(store.wallet_count(), 1);
        assert_eq!(store.balance(ids[0]), Some(Cents::ZERO));
    }

    #[test]
    fn apply_delta_credits_and_debits() {
        let store = WalletStore::new();
        let id = store.get_or_create("device-a");

        let balance = store
            .with_wallet(id, |w| {
                WalletStore::apply_delta(w, Cents::new(5000), Cents::ZERO)
            })
            .unwrap()
            .unwrap();
        assert_eq!(balance, Cents::new(5000));

        let balance = store
            .with_wallet(id, |w| {
                WalletStore::apply_delta(w, Cents::new(-2000), Cents::ZERO)
            })
            .unwrap()
            .unwrap();
        assert_eq!(balance, Cents::new(3000));
    }

    #[test]
    fn apply_delta_rejects_debit_below_floor() {
        let store = WalletStore::new();
        let id = store.get_or_create("device-a");
        store
            .with_wallet(id, |w| {
                WalletStore::apply_delta(w, Cents::new(500), Cents::ZERO)
            })
            .unwrap()
            .unwrap();

        let err = store
            .with_wallet(id, |w| {
                WalletStore::apply_delta(w, Cents::new(-1000), Cents::ZERO)
            })
            .unwrap()
            .unwrap_err();

        assert_eq!(err.required, Cents::new(1000));
        assert_eq!(err.available, Cents::new(500));
        // Balance unchanged after the rejected debit.
        assert_eq!(store.balance(id), Some(Cents::new(500)));
    }

    #[test]
    fn with_wallet_on_unknown_id_is_none() {
        let store = WalletStore::new();
        assert_eq!(store.balance(42), None);
    }
}
