//! Redistribution of liquidation deficits.
//!
//! When a liquidated position's debt cannot be absorbed by the backstop, the
//! remainder (and the matching collateral) is spread over every remaining
//! stake. Spreading is O(1): two reward-per-unit-stake accumulators grow, and
//! each position collects `stake * (L_now - L_snapshot)` the next time it is
//! touched.
//!
//! Division of a deficit by the total stake truncates. The remainder is carried
//! into the next deficit so that dust is delayed, never lost.

use serde::{Deserialize, Serialize};

use crate::core::position::{PendingReward, Position, RewardSnapshot};
use crate::error::{Error, Result};
use crate::utils::math::FixedPoint;

// ═══════════════════════════════════════════════════════════════════════════════
// ACCUMULATOR
// ═══════════════════════════════════════════════════════════════════════════════

/// Collateral and debt recorded but not yet attributed to any position
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedistributionAccumulator {
    /// Unattributed collateral
    pub collateral: FixedPoint,
    /// Unattributed debt
    pub debt: FixedPoint,
}

// ═══════════════════════════════════════════════════════════════════════════════
// REDISTRIBUTION POOL
// ═══════════════════════════════════════════════════════════════════════════════

/// Accumulates liquidation deficits and attributes them lazily
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedistributionPool {
    accumulator: RedistributionAccumulator,
    l_collateral: FixedPoint,
    l_debt: FixedPoint,
    collateral_error: FixedPoint,
    debt_error: FixedPoint,
    redistributions: u64,
}

impl RedistributionPool {
    /// Create an empty pool
    pub fn new() -> Self {
        Self::default()
    }

    /// Unattributed collateral and debt
    pub fn accumulator(&self) -> RedistributionAccumulator {
        self.accumulator
    }

    /// Current per-unit-stake accumulators
    pub fn current_snapshot(&self) -> RewardSnapshot {
        RewardSnapshot {
            l_collateral: self.l_collateral,
            l_debt: self.l_debt,
        }
    }

    /// Number of deficits recorded
    pub fn redistributions(&self) -> u64 {
        self.redistributions
    }

    /// Spread a liquidation deficit over `total_stake`
    ///
    /// The liquidated position's stake must already have been removed from
    /// `total_stake`.
    pub fn record_liquidation_deficit(
        &mut self,
        collateral: FixedPoint,
        debt: FixedPoint,
        total_stake: FixedPoint,
    ) -> Result<()> {
        if collateral.is_zero() && debt.is_zero() {
            return Ok(());
        }
        if total_stake.is_zero() {
            return Err(Error::arithmetic("redistribution over zero stake"));
        }

        let (coll_per_stake, collateral_error) =
            collateral.div_with_carry(total_stake, self.collateral_error)?;
        let (debt_per_stake, debt_error) = debt.div_with_carry(total_stake, self.debt_error)?;

        let l_collateral = self.l_collateral.checked_add(coll_per_stake)?;
        let l_debt = self.l_debt.checked_add(debt_per_stake)?;
        let accumulator = RedistributionAccumulator {
            collateral: self.accumulator.collateral.checked_add(collateral)?,
            debt: self.accumulator.debt.checked_add(debt)?,
        };

        self.l_collateral = l_collateral;
        self.l_debt = l_debt;
        self.collateral_error = collateral_error;
        self.debt_error = debt_error;
        self.accumulator = accumulator;
        self.redistributions += 1;

        tracing::debug!(
            collateral = %collateral,
            debt = %debt,
            total_stake = %total_stake,
            "Recorded liquidation deficit"
        );

        Ok(())
    }

    /// Rewards owed to `position` since its snapshot
    pub fn pending_reward(&self, position: &Position) -> Result<PendingReward> {
        if !position.is_active() || position.stake.is_zero() {
            return Ok(PendingReward::default());
        }

        let coll_delta = self.l_collateral.checked_sub(position.snapshot.l_collateral)?;
        let debt_delta = self.l_debt.checked_sub(position.snapshot.l_debt)?;

        Ok(PendingReward {
            collateral: position.stake.checked_mul(coll_delta)?,
            debt: position.stake.checked_mul(debt_delta)?,
        })
    }

    /// Move the position's pending reward out of the accumulator and into its
    /// recorded balances, then refresh its snapshot
    ///
    /// Calling this twice without an intervening deficit is a no-op.
    pub fn apply_pending(&mut self, position: &mut Position) -> Result<PendingReward> {
        let reward = self.pending_reward(position)?;

        if !reward.is_zero() {
            let accumulator = RedistributionAccumulator {
                collateral: self.accumulator.collateral.checked_sub(reward.collateral)?,
                debt: self.accumulator.debt.checked_sub(reward.debt)?,
            };
            let collateral = position.collateral.checked_add(reward.collateral)?;
            let debt = position.debt.checked_add(reward.debt)?;

            self.accumulator = accumulator;
            position.collateral = collateral;
            position.debt = debt;
        }

        position.snapshot = self.current_snapshot();
        Ok(reward)
    }
}
