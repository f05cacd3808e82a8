use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;
use thiserror::Error;

use crate::Cents;
use crate::engine::WalletReport;
use crate::model::{Operation, TxId};

/// Errors that can occur when parsing operation rows
#[derive(Debug, Error)]
pub enum CsvError {
    #[error("line {line}: failed to parse row: {source}")]
    Parse { line: usize, source: csv::Error },

    #[error("line {line}: unrecognized operation '{op}'")]
    UnrecognizedOp { line: usize, op: String },

    #[error("line {line}: {op} missing amount")]
    MissingAmount { line: usize, op: String },

    #[error("line {line}: {op} amount must be positive, got {amount}")]
    NonPositiveAmount { line: usize, op: String, amount: f64 },

    #[error("line {line}: purchase duration must be a whole number of days up to {max}, got {value}", max = u16::MAX)]
    InvalidDuration { line: usize, value: f64 },

    #[error("line {line}: refund missing funding entry reference")]
    MissingReference { line: usize },
}

#[derive(Debug, Deserialize)]
struct InputRow {
    op: String,
    binding: String,
    /// Dollars for fund/charge/refund; whole days for purchase.
    amount: Option<f64>,
    context: Option<String>,
    /// Funding entry id, for refund rows.
    reference: Option<TxId>,
}

#[derive(Debug, Serialize)]
struct OutputRow {
    binding: String,
    balance: String,
    funded: String,
    spent: String,
    refunded: String,
}

/// Read an operations log from a csv file
pub fn read_operations(
    path: impl AsRef<Path>,
) -> impl Iterator<Item = Result<Operation, CsvError>> {
    let reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .expect("failed to open csv file");

    reader
        .into_deserialize::<InputRow>()
        .enumerate()
        .map(|(idx, result)| {
            let line = idx + 2; // 1-indexed, skip header
            let row = result.map_err(|source| CsvError::Parse { line, source })?;
            let amount = |op: &str| {
                let value = row.amount.ok_or_else(|| CsvError::MissingAmount {
                    line,
                    op: op.to_string(),
                })?;
                if value <= 0.0 {
                    return Err(CsvError::NonPositiveAmount {
                        line,
                        op: op.to_string(),
                        amount: value,
                    });
                }
                Ok(value)
            };
            match row.op.as_str() {
                "fund" => Ok(Operation::Fund {
                    amount: Cents::from_dollars(amount("fund")?),
                    binding: row.binding,
                    source: row.context.unwrap_or_else(|| "general".to_string()),
                }),
                "charge" => Ok(Operation::Charge {
                    amount: Cents::from_dollars(amount("charge")?),
                    binding: row.binding,
                    context: row.context.unwrap_or_else(|| "general".to_string()),
                }),
                "purchase" => {
                    let days = amount("purchase")?;
                    if days.fract() != 0.0 || days > f64::from(u16::MAX) {
                        return Err(CsvError::InvalidDuration { line, value: days });
                    }
                    Ok(Operation::PurchasePass {
                        duration_days: days as u16,
                        binding: row.binding,
                    })
                }
                "refund" => Ok(Operation::Refund {
                    amount: Cents::from_dollars(amount("refund")?),
                    funding: row
                        .reference
                        .ok_or(CsvError::MissingReference { line })?,
                    binding: row.binding,
                }),
                other => Err(CsvError::UnrecognizedOp {
                    line,
                    op: other.to_string(),
                }),
            }
        })
}

/// write the per-wallet balance report to stdout in csv format
pub fn write_report(rows: impl IntoIterator<Item = WalletReport>) {
    let stdout = io::stdout();
    let mut writer = csv::Writer::from_writer(stdout.lock());

    for report in rows {
        let row = OutputRow {
            binding: report.binding_key,
            balance: report.balance.to_string(),
            funded: report.funded.to_string(),
            spent: report.spent.to_string(),
            refunded: report.refunded.to_string(),
        };
        writer.serialize(&row).expect("failed to write csv row");
    }

    writer.flush().expect("failed to flush csv writer");
}
