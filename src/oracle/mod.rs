//! Price oracle collaborators.
//!
//! The ledger never discovers prices itself: every operation that needs an
//! individual or system collateral ratio takes a price from a [`PriceOracle`].

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::utils::math::FixedPoint;

/// Source of the collateral price in units of the stable asset
pub trait PriceOracle {
    /// Current price; must be nonzero
    fn price(&self) -> Result<FixedPoint>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// FIXED PRICE ORACLE
// ═══════════════════════════════════════════════════════════════════════════════

/// Oracle returning a price set by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedPriceOracle {
    /// Current price
    current: FixedPoint,
    /// Previous price (for change detection)
    previous: FixedPoint,
    /// Number of updates applied
    updates: u64,
}

impl FixedPriceOracle {
    /// Create an oracle quoting `price`
    pub fn new(price: FixedPoint) -> Self {
        Self {
            current: price,
            previous: price,
            updates: 0,
        }
    }

    /// Replace the quoted price
    pub fn set_price(&mut self, price: FixedPoint) -> Result<()> {
        if price.is_zero() {
            return Err(Error::InvalidPrice("price cannot be zero".into()));
        }
        self.previous = self.current;
        self.current = price;
        self.updates += 1;
        tracing::debug!(price = %price, previous = %self.previous, "Price updated");
        Ok(())
    }

    /// Price before the last update
    pub fn previous(&self) -> FixedPoint {
        self.previous
    }

    /// Number of updates applied since creation
    pub fn updates(&self) -> u64 {
        self.updates
    }
}

impl PriceOracle for FixedPriceOracle {
    fn price(&self) -> Result<FixedPoint> {
        if self.current.is_zero() {
            return Err(Error::InvalidPrice("no price available".into()));
        }
        Ok(self.current)
    }
}
