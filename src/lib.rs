pub mod amount;
pub mod csv;
pub mod engine;
pub mod fees;
pub mod ledger;
pub mod model;
pub mod store;

pub use amount::Cents;
pub use engine::{
    ChargeReceipt, Engine, EngineError, PassReceipt, RefundError, RefundableFunding, WalletReport,
};
pub use model::{EntryKind, LedgerEntry, Operation, Wallet};
