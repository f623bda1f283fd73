//! Positions tracked by the ledger.
//!
//! A position records its own collateral and debt as of the last time it was
//! touched. Rewards from redistributed liquidations are not pushed into every
//! position; each position instead keeps a [`RewardSnapshot`] of the
//! per-unit-stake accumulators and collects what it is owed on its next touch.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::utils::crypto::{OwnerId, PositionId};
use crate::utils::math::{collateral_ratio, nominal_ratio, FixedPoint};

// ═══════════════════════════════════════════════════════════════════════════════
// POSITION STATUS
// ═══════════════════════════════════════════════════════════════════════════════

/// Lifecycle status of a position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PositionStatus {
    /// Position is open and carries stake
    Active,
    /// Position was closed by its owner
    Closed,
    /// Position was liquidated
    Liquidated,
    /// Position was closed by redemption
    Redeemed,
}

impl PositionStatus {
    /// Check if position is open
    pub fn is_active(&self) -> bool {
        matches!(self, PositionStatus::Active)
    }

    /// Check if position has been closed in any way
    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// REWARD SNAPSHOT
// ═══════════════════════════════════════════════════════════════════════════════

/// Reward-per-unit-stake accumulators recorded at the last touch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardSnapshot {
    /// Collateral reward per unit stake
    pub l_collateral: FixedPoint,
    /// Debt reward per unit stake
    pub l_debt: FixedPoint,
}

/// Collateral and debt owed to a position from redistributions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingReward {
    /// Pending collateral
    pub collateral: FixedPoint,
    /// Pending debt
    pub debt: FixedPoint,
}

impl PendingReward {
    /// Check if nothing is owed
    pub fn is_zero(&self) -> bool {
        self.collateral.is_zero() && self.debt.is_zero()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// POSITION
// ═══════════════════════════════════════════════════════════════════════════════

/// An over-collateralized debt position
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    /// Unique identifier
    pub id: PositionId,
    /// Owner identity
    pub owner: OwnerId,
    /// Per-ledger nonce the ID was derived from
    pub nonce: u64,
    /// Recorded collateral (excludes pending rewards)
    pub collateral: FixedPoint,
    /// Recorded debt (excludes pending rewards)
    pub debt: FixedPoint,
    /// Proportional claim on ledger collateral
    pub stake: FixedPoint,
    /// Current status
    pub status: PositionStatus,
    /// Accumulators at last touch
    pub snapshot: RewardSnapshot,
}

impl Position {
    /// Create a new active position with no stake yet
    pub fn new(
        id: PositionId,
        owner: OwnerId,
        nonce: u64,
        collateral: FixedPoint,
        debt: FixedPoint,
    ) -> Self {
        Self {
            id,
            owner,
            nonce,
            collateral,
            debt,
            stake: FixedPoint::ZERO,
            status: PositionStatus::Active,
            snapshot: RewardSnapshot::default(),
        }
    }

    /// Check if position is open
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Nominal collateral ratio of the recorded values
    pub fn nominal_ratio(&self) -> Result<FixedPoint> {
        nominal_ratio(self.collateral, self.debt)
    }

    /// Individual collateral ratio of the recorded values at `price`
    pub fn collateral_ratio(&self, price: FixedPoint) -> Result<FixedPoint> {
        collateral_ratio(self.collateral, self.debt, price)
    }

    /// Zero out balances and stake and mark the position closed with `status`
    pub(crate) fn terminate(&mut self, status: PositionStatus) {
        self.collateral = FixedPoint::ZERO;
        self.debt = FixedPoint::ZERO;
        self.stake = FixedPoint::ZERO;
        self.status = status;
    }
}
