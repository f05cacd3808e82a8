//! Fee engine: context fee lookup and fee distribution.
//!
//! Pure functions over configuration values; no I/O and no shared state. The
//! engine snapshots a [`FeeConfig`] per charge, so concurrent tests can run
//! with independent configs.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use crate::Cents;

/// Rejected fee configuration update.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("distribution percentages must sum to 100, got {sum}")]
    InvalidDistribution { sum: u32 },
}

/// Platform fee amounts per context, with a default fallback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeSchedule {
    per_context: HashMap<String, Cents>,
    default_fee: Cents,
    enabled: bool,
}

impl FeeSchedule {
    pub fn new(default_fee: Cents) -> Self {
        Self {
            per_context: HashMap::new(),
            default_fee,
            enabled: true,
        }
    }

    /// The fee charged on top of an item in the given context.
    /// Returns zero when fee collection is globally disabled.
    pub fn fee_for(&self, context: &str) -> Cents {
        if !self.enabled {
            return Cents::ZERO;
        }
        self.per_context
            .get(context)
            .copied()
            .unwrap_or(self.default_fee)
    }

    pub fn set_context_fee(&mut self, context: impl Into<String>, fee: Cents) {
        self.per_context.insert(context.into(), fee);
    }

    pub fn set_default_fee(&mut self, fee: Cents) {
        self.default_fee = fee;
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self::new(Cents::ZERO)
    }
}

/// How a collected fee is split, in integer percentages summing to 100.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeDistribution {
    platform: u8,
    vendor: u8,
    pool: u8,
    promoter: u8,
}

impl FeeDistribution {
    /// Validates that the four percentages sum to exactly 100; invalid
    /// distributions are rejected here, never clamped or stored.
    pub fn new(platform: u8, vendor: u8, pool: u8, promoter: u8) -> Result<Self, ConfigError> {
        let sum = platform as u32 + vendor as u32 + pool as u32 + promoter as u32;
        if sum != 100 {
            return Err(ConfigError::InvalidDistribution { sum });
        }
        Ok(Self {
            platform,
            vendor,
            pool,
            promoter,
        })
    }

    /// Split a fee into the four shares.
    ///
    /// Each share is `floor(total * pct / 100)`; the flooring remainder
    /// (0 to 3 cents) goes entirely to the platform share, so the four
    /// outputs always sum exactly to `total`.
    pub fn split(&self, total: Cents) -> FeeSplit {
        let floor_share = |pct: u8| Cents::new(total.raw() * pct as i64 / 100);
        let vendor = floor_share(self.vendor);
        let pool = floor_share(self.pool);
        let promoter = floor_share(self.promoter);
        let platform = total - vendor - pool - promoter;
        FeeSplit {
            platform,
            vendor,
            pool,
            promoter,
        }
    }
}

impl Default for FeeDistribution {
    /// 40/35/15/10 platform/vendor/pool/promoter.
    fn default() -> Self {
        Self {
            platform: 40,
            vendor: 35,
            pool: 15,
            promoter: 10,
        }
    }
}

/// A fee, split into cent amounts per payout destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FeeSplit {
    pub platform: Cents,
    pub vendor: Cents,
    pub pool: Cents,
    pub promoter: Cents,
}

impl FeeSplit {
    pub fn total(&self) -> Cents {
        self.platform + self.vendor + self.pool + self.promoter
    }
}

/// Versioned fee configuration. Each accepted admin update bumps `version`;
/// the transaction processor snapshots the whole record per charge.
#[derive(Debug, Clone, Default)]
pub struct FeeConfig {
    pub schedule: FeeSchedule,
    pub distribution: FeeDistribution,
    pub version: u64,
}
