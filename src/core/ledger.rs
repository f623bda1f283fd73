//! The position ledger.
//!
//! A [`Ledger`] owns every piece of state that must change together: the
//! positions, the stake totals, the redistribution accumulator and the
//! risk-ordered index. All mutations go through `&mut Ledger`, and each one
//! stages its arithmetic on copies of the accounting state before committing,
//! so a failed operation leaves the ledger untouched.
//!
//! For use across threads, [`SharedLedger`] wraps a ledger in a single mutex.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::core::config::{LedgerConfig, LedgerParams};
use crate::core::position::{PendingReward, Position, PositionStatus};
use crate::core::redistribution::{RedistributionAccumulator, RedistributionPool};
use crate::core::stake::{LedgerTotals, StakeAccountant};
use crate::error::{Error, Result};
use crate::index::{Hints, RiskOrderedIndex};
use crate::liquidation::recovery::{RecoveryMode, RecoveryModeStatus};
use crate::utils::crypto::{OwnerId, PositionId};
use crate::utils::math::{collateral_ratio, nominal_ratio, FixedPoint};

// ═══════════════════════════════════════════════════════════════════════════════
// BALANCE CHANGES
// ═══════════════════════════════════════════════════════════════════════════════

/// Requested change to a position balance
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BalanceChange {
    /// Leave the balance as is
    #[default]
    Unchanged,
    /// Add to the balance
    Increase(FixedPoint),
    /// Subtract from the balance
    Decrease(FixedPoint),
}

impl BalanceChange {
    /// Check if this changes nothing
    pub fn is_noop(&self) -> bool {
        match self {
            BalanceChange::Unchanged => true,
            BalanceChange::Increase(amount) | BalanceChange::Decrease(amount) => amount.is_zero(),
        }
    }

    fn apply(self, value: FixedPoint, what: &str) -> Result<FixedPoint> {
        match self {
            BalanceChange::Unchanged => Ok(value),
            BalanceChange::Increase(amount) => value.checked_add(amount),
            BalanceChange::Decrease(amount) if amount > value => Err(Error::InvalidParameter {
                name: what.into(),
                reason: format!("decrease {} exceeds balance {}", amount, value),
            }),
            BalanceChange::Decrease(amount) => value.checked_sub(amount),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// OPERATION RESULTS
// ═══════════════════════════════════════════════════════════════════════════════

/// A position's balances including rewards it has not collected yet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntireDebtAndColl {
    /// Recorded collateral plus pending collateral
    pub collateral: FixedPoint,
    /// Recorded debt plus pending debt
    pub debt: FixedPoint,
    /// Pending part
    pub pending: PendingReward,
}

/// Balances released by a closed position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClosedPosition {
    /// Position that was closed
    pub id: PositionId,
    /// Owner of the position
    pub owner: OwnerId,
    /// Collateral returned to the owner
    pub collateral: FixedPoint,
    /// Debt the position carried
    pub debt: FixedPoint,
    /// Stable asset the owner repays (debt less the reserve)
    pub repayment: FixedPoint,
}

/// Ledger-side effect of a liquidation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidatedPosition {
    /// Position that was liquidated
    pub id: PositionId,
    /// Owner of the position
    pub owner: OwnerId,
    /// Collateral the position held
    pub collateral: FixedPoint,
    /// Debt the position carried
    pub debt: FixedPoint,
    /// Debt cancelled by the backstop
    pub debt_offset: FixedPoint,
    /// Collateral awarded to the backstop
    pub collateral_offset: FixedPoint,
    /// Debt spread over remaining stakes
    pub debt_redistributed: FixedPoint,
    /// Collateral spread over remaining stakes
    pub collateral_redistributed: FixedPoint,
}

/// Ledger-side effect of a redemption against one position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RedemptionEffect {
    /// Position stays open with new balances
    Partial {
        /// Collateral left in the position
        collateral: FixedPoint,
        /// Debt left in the position
        debt: FixedPoint,
    },
    /// Position reached the reserve and was closed
    Closed {
        /// Collateral credited to the owner's surplus
        surplus: FixedPoint,
    },
}

// ═══════════════════════════════════════════════════════════════════════════════
// LEDGER
// ═══════════════════════════════════════════════════════════════════════════════

/// A single ledger instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ledger {
    name: String,
    params: LedgerParams,
    positions: HashMap<PositionId, Position>,
    stake: StakeAccountant,
    redistribution: RedistributionPool,
    index: RiskOrderedIndex,
    surplus: HashMap<OwnerId, FixedPoint>,
    next_nonce: u64,
}

impl Ledger {
    /// Create an empty ledger
    pub fn new(name: impl Into<String>, params: LedgerParams) -> Result<Self> {
        params.validate()?;
        Ok(Self {
            name: name.into(),
            params,
            positions: HashMap::new(),
            stake: StakeAccountant::new(),
            redistribution: RedistributionPool::new(),
            index: RiskOrderedIndex::new(),
            surplus: HashMap::new(),
            next_nonce: 0,
        })
    }

    /// Create an empty ledger from configuration
    pub fn from_config(config: &LedgerConfig) -> Result<Self> {
        Self::new(config.name.clone(), config.params.clone())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // QUERIES
    // ═══════════════════════════════════════════════════════════════════════════

    /// Ledger name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Risk parameters
    pub fn params(&self) -> &LedgerParams {
        &self.params
    }

    /// Ledger-wide totals
    pub fn totals(&self) -> LedgerTotals {
        self.stake.totals()
    }

    /// Unattributed redistribution balances
    pub fn accumulator(&self) -> RedistributionAccumulator {
        self.redistribution.accumulator()
    }

    /// The risk-ordered index
    pub fn index(&self) -> &RiskOrderedIndex {
        &self.index
    }

    /// Look up a position in any status
    pub fn position(&self, id: &PositionId) -> Option<&Position> {
        self.positions.get(id)
    }

    /// Active positions, strongest first
    pub fn active_positions(&self) -> impl Iterator<Item = &Position> + '_ {
        self.index
            .iter()
            .filter_map(move |(id, _)| self.positions.get(&id))
    }

    /// Number of active positions
    pub fn active_count(&self) -> usize {
        self.index.len()
    }

    /// Positions in any status
    pub fn all_positions(&self) -> impl Iterator<Item = &Position> + '_ {
        self.positions.values()
    }

    /// Collateral waiting to be claimed by `owner`
    pub fn surplus_of(&self, owner: &OwnerId) -> FixedPoint {
        self.surplus.get(owner).copied().unwrap_or(FixedPoint::ZERO)
    }

    /// Total Collateralization Ratio at `price`
    pub fn tcr(&self, price: FixedPoint) -> Result<FixedPoint> {
        RecoveryMode::calculate_tcr(&self.totals(), price)
    }

    /// Check if the ledger is in recovery mode at `price`
    pub fn is_recovery_mode(&self, price: FixedPoint) -> Result<bool> {
        Ok(RecoveryMode::is_recovery_mode(self.tcr(price)?, &self.params))
    }

    /// Recovery mode status at `price`
    pub fn recovery_status(&self, price: FixedPoint) -> Result<RecoveryModeStatus> {
        RecoveryMode::status(&self.totals(), &self.params, price)
    }

    /// Balances of an active position including uncollected rewards
    pub fn entire_debt_and_coll(&self, id: &PositionId) -> Result<EntireDebtAndColl> {
        let position = self.active(id)?;
        let pending = self.redistribution.pending_reward(position)?;
        Ok(EntireDebtAndColl {
            collateral: position.collateral.checked_add(pending.collateral)?,
            debt: position.debt.checked_add(pending.debt)?,
            pending,
        })
    }

    /// Individual collateral ratio including uncollected rewards
    pub fn current_icr(&self, id: &PositionId, price: FixedPoint) -> Result<FixedPoint> {
        let entire = self.entire_debt_and_coll(id)?;
        collateral_ratio(entire.collateral, entire.debt, price)
    }

    /// Total Collateralization Ratio if `id` were removed
    pub fn tcr_excluding(&self, id: &PositionId, price: FixedPoint) -> Result<FixedPoint> {
        let entire = self.entire_debt_and_coll(id)?;
        RecoveryMode::tcr_after_operation(
            &self.totals(),
            entire.collateral,
            entire.debt,
            FixedPoint::ZERO,
            FixedPoint::ZERO,
            price,
        )
    }

    fn active(&self, id: &PositionId) -> Result<&Position> {
        let position = self
            .positions
            .get(id)
            .ok_or_else(|| Error::PositionNotFound(id.to_hex()))?;
        if !position.is_active() {
            return Err(Error::PositionNotActive(id.to_hex()));
        }
        Ok(position)
    }

    fn check_price(price: FixedPoint) -> Result<()> {
        if price.is_zero() {
            return Err(Error::InvalidPrice("price cannot be zero".into()));
        }
        Ok(())
    }

    fn check_min_debt(&self, debt: FixedPoint) -> Result<()> {
        let minimum = self.params.min_total_debt()?;
        if debt < minimum {
            return Err(Error::DebtBelowMinimum {
                amount: debt.to_string(),
                minimum: minimum.to_string(),
            });
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // POSITION OPERATIONS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Open a new position for `owner`
    pub fn open_position(
        &mut self,
        owner: OwnerId,
        collateral: FixedPoint,
        debt: FixedPoint,
        price: FixedPoint,
        hints: Hints,
    ) -> Result<PositionId> {
        if collateral.is_zero() || debt.is_zero() {
            return Err(Error::ZeroAmount);
        }
        Self::check_price(price)?;
        self.check_min_debt(debt)?;
        RecoveryMode::validate_open(&self.params, &self.totals(), collateral, debt, price)?
            .to_result()?;

        let nonce = self.next_nonce;
        let id = PositionId::generate(&self.name, &owner, nonce);
        if self.positions.contains_key(&id) {
            return Err(Error::PositionAlreadyExists(id.to_hex()));
        }
        let nicr = nominal_ratio(collateral, debt)?;

        let mut stake = self.stake.clone();
        let mut position = Position::new(id, owner, nonce, collateral, debt);
        position.stake = stake.open_position(collateral, debt)?;
        position.snapshot = self.redistribution.current_snapshot();

        self.index.insert(id, nicr, &hints)?;
        self.stake = stake;
        self.positions.insert(id, position);
        self.next_nonce += 1;

        tracing::info!(
            ledger = %self.name,
            position = %id.short(),
            owner = %owner.short(),
            collateral = %collateral,
            debt = %debt,
            "Opened position"
        );

        Ok(id)
    }

    /// Change a position's collateral and/or debt
    pub fn adjust_position(
        &mut self,
        id: &PositionId,
        collateral_change: BalanceChange,
        debt_change: BalanceChange,
        price: FixedPoint,
        hints: Hints,
    ) -> Result<()> {
        if collateral_change.is_noop() && debt_change.is_noop() {
            return Err(Error::ZeroAmount);
        }
        Self::check_price(price)?;
        self.apply_pending(id)?;

        let position = self.active(id)?.clone();
        let new_collateral = collateral_change.apply(position.collateral, "collateral_change")?;
        let new_debt = debt_change.apply(position.debt, "debt_change")?;

        if new_collateral.is_zero() {
            return Err(Error::InsufficientCollateral {
                required: position.collateral.to_string(),
                available: FixedPoint::ZERO.to_string(),
            });
        }
        self.check_min_debt(new_debt)?;
        RecoveryMode::validate_adjust(
            &self.params,
            &self.totals(),
            (position.collateral, position.debt),
            (new_collateral, new_debt),
            price,
        )?
        .to_result()?;

        let nicr = nominal_ratio(new_collateral, new_debt)?;
        let mut stake = self.stake.clone();
        let new_stake = stake.restake(
            position.stake,
            position.collateral,
            position.debt,
            new_collateral,
            new_debt,
        )?;

        self.index.reinsert(*id, nicr, &hints)?;
        self.stake = stake;
        if let Some(stored) = self.positions.get_mut(id) {
            stored.collateral = new_collateral;
            stored.debt = new_debt;
            stored.stake = new_stake;
        }

        tracing::info!(
            ledger = %self.name,
            position = %id.short(),
            collateral = %new_collateral,
            debt = %new_debt,
            "Adjusted position"
        );

        Ok(())
    }

    /// Close a position, releasing its collateral
    pub fn close_position(&mut self, id: &PositionId, price: FixedPoint) -> Result<ClosedPosition> {
        Self::check_price(price)?;
        self.apply_pending(id)?;

        let position = self.active(id)?.clone();
        RecoveryMode::validate_close(
            &self.params,
            &self.totals(),
            position.collateral,
            position.debt,
            price,
        )?
        .to_result()?;

        let repayment = position.debt.checked_sub(self.params.min_debt_reserve)?;
        let mut stake = self.stake.clone();
        stake.close_position(position.stake, position.collateral, position.debt)?;

        self.index.remove(id)?;
        self.stake = stake;
        if let Some(stored) = self.positions.get_mut(id) {
            stored.terminate(PositionStatus::Closed);
        }

        tracing::info!(
            ledger = %self.name,
            position = %id.short(),
            collateral = %position.collateral,
            debt = %position.debt,
            "Closed position"
        );

        Ok(ClosedPosition {
            id: *id,
            owner: position.owner,
            collateral: position.collateral,
            debt: position.debt,
            repayment,
        })
    }

    /// Collect a position's pending rewards into its recorded balances
    ///
    /// The position is moved to the index slot matching its new balances.
    pub fn apply_pending(&mut self, id: &PositionId) -> Result<PendingReward> {
        let mut position = self.active(id)?.clone();
        let mut pool = self.redistribution.clone();
        let reward = pool.apply_pending(&mut position)?;

        if !reward.is_zero() {
            let nicr = position.nominal_ratio()?;
            self.index.reinsert(*id, nicr, &Hints::none())?;
            tracing::debug!(
                position = %id.short(),
                collateral = %reward.collateral,
                debt = %reward.debt,
                "Applied pending reward"
            );
        }

        self.redistribution = pool;
        self.positions.insert(*id, position);
        Ok(reward)
    }

    /// Withdraw collateral credited to `owner` by redemptions
    pub fn claim_surplus(&mut self, owner: &OwnerId) -> Result<FixedPoint> {
        let amount = self.surplus.remove(owner).ok_or(Error::ZeroAmount)?;
        tracing::info!(owner = %owner.short(), amount = %amount, "Claimed surplus collateral");
        Ok(amount)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // ENGINE HOOKS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Close a position by liquidation
    ///
    /// `debt_offset` and `collateral_offset` have already been absorbed by the
    /// backstop; the rest of the position is redistributed over the remaining
    /// stakes. Pending rewards must have been applied.
    pub(crate) fn liquidate(
        &mut self,
        id: &PositionId,
        debt_offset: FixedPoint,
        collateral_offset: FixedPoint,
    ) -> Result<LiquidatedPosition> {
        let position = self.active(id)?.clone();
        if self.active_count() <= 1 {
            return Err(Error::LastPositionProtected);
        }

        let debt_redistributed = position.debt.checked_sub(debt_offset)?;
        let collateral_redistributed = position.collateral.checked_sub(collateral_offset)?;

        let mut stake = self.stake.clone();
        let mut pool = self.redistribution.clone();
        stake.close_position(position.stake, position.collateral, position.debt)?;
        pool.record_liquidation_deficit(
            collateral_redistributed,
            debt_redistributed,
            stake.totals().total_stake,
        )?;
        stake.add_redistributed(collateral_redistributed, debt_redistributed)?;

        self.index.remove(id)?;
        self.stake = stake;
        self.redistribution = pool;
        if let Some(stored) = self.positions.get_mut(id) {
            stored.terminate(PositionStatus::Liquidated);
        }

        Ok(LiquidatedPosition {
            id: *id,
            owner: position.owner,
            collateral: position.collateral,
            debt: position.debt,
            debt_offset,
            collateral_offset,
            debt_redistributed,
            collateral_redistributed,
        })
    }

    /// Cancel `debt` against `collateral` drawn from a position
    ///
    /// When the remaining debt equals the reserve the position is closed and
    /// the remaining collateral is credited to the owner's surplus. Pending
    /// rewards must have been applied.
    pub(crate) fn redeem(
        &mut self,
        id: &PositionId,
        debt: FixedPoint,
        collateral: FixedPoint,
    ) -> Result<RedemptionEffect> {
        let position = self.active(id)?.clone();
        let new_debt = position.debt.checked_sub(debt)?;
        let new_collateral = position.collateral.checked_sub(collateral)?;
        let mut stake = self.stake.clone();

        if new_debt <= self.params.min_debt_reserve {
            stake.close_position(position.stake, position.collateral, position.debt)?;
            let surplus = self.surplus_of(&position.owner).checked_add(new_collateral)?;

            self.index.remove(id)?;
            self.stake = stake;
            if !new_collateral.is_zero() {
                self.surplus.insert(position.owner, surplus);
            }
            if let Some(stored) = self.positions.get_mut(id) {
                stored.terminate(PositionStatus::Redeemed);
            }
            return Ok(RedemptionEffect::Closed {
                surplus: new_collateral,
            });
        }

        let nicr = nominal_ratio(new_collateral, new_debt)?;
        let new_stake = stake.restake(
            position.stake,
            position.collateral,
            position.debt,
            new_collateral,
            new_debt,
        )?;

        self.index.reinsert(*id, nicr, &Hints::none())?;
        self.stake = stake;
        if let Some(stored) = self.positions.get_mut(id) {
            stored.collateral = new_collateral;
            stored.debt = new_debt;
            stored.stake = new_stake;
        }

        Ok(RedemptionEffect::Partial {
            collateral: new_collateral,
            debt: new_debt,
        })
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // INVARIANTS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Verify the accounting invariants
    ///
    /// - total stake equals the sum of active stakes
    /// - active collateral plus accumulator collateral equals total collateral
    ///   (and likewise for debt)
    /// - the index holds exactly the active positions in non-increasing NICR
    pub fn check_invariants(&self) -> Result<()> {
        let mut stake_sum = FixedPoint::ZERO;
        let mut collateral_sum = self.accumulator().collateral;
        let mut debt_sum = self.accumulator().debt;
        let mut active = 0usize;

        for position in self.positions.values().filter(|p| p.is_active()) {
            stake_sum = stake_sum.checked_add(position.stake)?;
            collateral_sum = collateral_sum.checked_add(position.collateral)?;
            debt_sum = debt_sum.checked_add(position.debt)?;
            active += 1;

            if !self.index.contains(&position.id) {
                return Err(Error::InvariantViolation(format!(
                    "active position {} missing from index",
                    position.id.short()
                )));
            }
        }

        let totals = self.totals();
        if stake_sum != totals.total_stake {
            return Err(Error::InvariantViolation(format!(
                "total stake {} != sum of stakes {}",
                totals.total_stake, stake_sum
            )));
        }
        if collateral_sum != totals.total_collateral {
            return Err(Error::InvariantViolation(format!(
                "total collateral {} != active + accumulator {}",
                totals.total_collateral, collateral_sum
            )));
        }
        if debt_sum != totals.total_debt {
            return Err(Error::InvariantViolation(format!(
                "total debt {} != active + accumulator {}",
                totals.total_debt, debt_sum
            )));
        }
        if active != self.index.len() || !self.index.is_ordered() {
            return Err(Error::InvariantViolation("index out of order".into()));
        }

        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // SERIALIZATION
    // ═══════════════════════════════════════════════════════════════════════════

    /// Serialize to bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).map_err(|e| Error::Deserialization(e.to_string()))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SHARED LEDGER
// ═══════════════════════════════════════════════════════════════════════════════

/// Thread-safe handle to a ledger
///
/// Stake totals, the accumulator and the index sit behind one lock, so no
/// reader ever observes a half-applied operation.
#[derive(Debug, Clone)]
pub struct SharedLedger {
    inner: Arc<Mutex<Ledger>>,
}

impl SharedLedger {
    /// Wrap a ledger
    pub fn new(ledger: Ledger) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ledger)),
        }
    }

    /// Run a read-only closure against the ledger
    pub fn with<R>(&self, f: impl FnOnce(&Ledger) -> R) -> Result<R> {
        let guard = self.inner.lock().map_err(|_| Error::Lock)?;
        Ok(f(&guard))
    }

    /// Run a mutating closure against the ledger
    pub fn with_mut<R>(&self, f: impl FnOnce(&mut Ledger) -> R) -> Result<R> {
        let mut guard = self.inner.lock().map_err(|_| Error::Lock)?;
        Ok(f(&mut guard))
    }
}
