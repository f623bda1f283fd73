//! Stake accounting.
//!
//! A position's stake is its proportional claim on ledger collateral. When a
//! position is opened (or its collateral changes) the stake is derived from
//! the live totals:
//!
//! - `stake = collateral` when the ledger holds no collateral or no stake
//! - `stake = floor(collateral * total_stake / total_collateral)` otherwise
//!
//! `total_collateral` here includes collateral sitting in the redistribution
//! accumulator, so stake issued after a liquidation is discounted by the
//! collateral already owed to existing stakers.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::utils::math::FixedPoint;

// ═══════════════════════════════════════════════════════════════════════════════
// LEDGER TOTALS
// ═══════════════════════════════════════════════════════════════════════════════

/// Ledger-wide totals
///
/// Collateral and debt include the unattributed redistribution accumulator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerTotals {
    /// Active collateral plus accumulator collateral
    pub total_collateral: FixedPoint,
    /// Active debt plus accumulator debt
    pub total_debt: FixedPoint,
    /// Sum of active stakes
    pub total_stake: FixedPoint,
}

// ═══════════════════════════════════════════════════════════════════════════════
// STAKE ACCOUNTANT
// ═══════════════════════════════════════════════════════════════════════════════

/// Maintains ledger totals and derives stakes from them
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakeAccountant {
    totals: LedgerTotals,
}

impl StakeAccountant {
    /// Create an accountant with zero totals
    pub fn new() -> Self {
        Self::default()
    }

    /// Current totals
    pub fn totals(&self) -> LedgerTotals {
        self.totals
    }

    /// Stake that `collateral` would receive against the current totals
    pub fn compute_stake(&self, collateral: FixedPoint) -> Result<FixedPoint> {
        let LedgerTotals {
            total_collateral,
            total_stake,
            ..
        } = self.totals;

        if total_collateral.is_zero() || total_stake.is_zero() {
            return Ok(collateral);
        }
        collateral.mul_div(total_stake, total_collateral)
    }

    /// Register a new position's collateral and debt; returns its stake
    pub fn open_position(&mut self, collateral: FixedPoint, debt: FixedPoint) -> Result<FixedPoint> {
        let stake = self.compute_stake(collateral)?;
        let totals = LedgerTotals {
            total_collateral: self.totals.total_collateral.checked_add(collateral)?,
            total_debt: self.totals.total_debt.checked_add(debt)?,
            total_stake: self.totals.total_stake.checked_add(stake)?,
        };
        self.totals = totals;
        Ok(stake)
    }

    /// Remove a position's stake, collateral and debt from the totals
    ///
    /// The caller must have applied pending rewards first so that the
    /// subtracted amounts are the position's true current values.
    pub fn close_position(
        &mut self,
        stake: FixedPoint,
        collateral: FixedPoint,
        debt: FixedPoint,
    ) -> Result<()> {
        let totals = LedgerTotals {
            total_collateral: self.totals.total_collateral.checked_sub(collateral)?,
            total_debt: self.totals.total_debt.checked_sub(debt)?,
            total_stake: self.totals.total_stake.checked_sub(stake)?,
        };
        self.totals = totals;
        Ok(())
    }

    /// Replace a position's contribution with new collateral and debt;
    /// returns the recomputed stake
    pub fn restake(
        &mut self,
        old_stake: FixedPoint,
        old_collateral: FixedPoint,
        old_debt: FixedPoint,
        new_collateral: FixedPoint,
        new_debt: FixedPoint,
    ) -> Result<FixedPoint> {
        let saved = self.totals;
        let result = self
            .close_position(old_stake, old_collateral, old_debt)
            .and_then(|_| self.open_position(new_collateral, new_debt));
        if result.is_err() {
            self.totals = saved;
        }
        result
    }

    /// Account for a liquidation deficit moved into the redistribution
    /// accumulator
    pub fn add_redistributed(&mut self, collateral: FixedPoint, debt: FixedPoint) -> Result<()> {
        let total_collateral = self.totals.total_collateral.checked_add(collateral)?;
        let total_debt = self.totals.total_debt.checked_add(debt)?;
        self.totals.total_collateral = total_collateral;
        self.totals.total_debt = total_debt;
        Ok(())
    }
}
