//! Backstop pool (Liquity-style stability pool).
//!
//! Depositors lock the stable asset in the pool. When a position is
//! liquidated the pool cancels as much of its debt as it can and receives the
//! matching collateral, which is shared among depositors pro rata.
//!
//! Per-depositor accounting is O(1) per liquidation through two running
//! factors:
//! - `P`, the product of `(1 - loss / deposits)` over all offsets, so a
//!   deposit is worth `initial * P / P_snapshot`
//! - `S`, the sum of collateral gained per unit deposited (scaled by `P`), so
//!   a deposit's gain is `initial * (S - S_snapshot) / P_snapshot`
//!
//! When `P` gets small it is rescaled by [`SCALE_FACTOR`] and the scale
//! counter advances; an offset that empties the pool starts a new epoch.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::utils::crypto::OwnerId;
use crate::utils::math::FixedPoint;

/// Rescaling step for `P` (1e9)
pub const SCALE_FACTOR: u128 = 1_000_000_000;

fn descale(value: FixedPoint) -> Result<FixedPoint> {
    value.mul_div(FixedPoint::from_raw(1), FixedPoint::from_raw(SCALE_FACTOR))
}

// ═══════════════════════════════════════════════════════════════════════════════
// BACKSTOP INTERFACE
// ═══════════════════════════════════════════════════════════════════════════════

/// Pool that absorbs liquidated debt before it is redistributed
pub trait BackstopPool {
    /// Debt the pool can cancel right now
    fn available(&self) -> FixedPoint;

    /// Cancel `debt` and receive `collateral`; returns the debt actually
    /// cancelled
    fn offset(&mut self, debt: FixedPoint, collateral: FixedPoint) -> Result<FixedPoint>;
}

/// A backstop that never absorbs anything, sending every liquidation to
/// redistribution
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBackstop;

impl BackstopPool for NoBackstop {
    fn available(&self) -> FixedPoint {
        FixedPoint::ZERO
    }

    fn offset(&mut self, debt: FixedPoint, _collateral: FixedPoint) -> Result<FixedPoint> {
        if debt.is_zero() {
            return Ok(FixedPoint::ZERO);
        }
        Err(Error::InsufficientBackstop {
            required: debt.to_string(),
            available: FixedPoint::ZERO.to_string(),
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// DEPOSITOR SNAPSHOT
// ═══════════════════════════════════════════════════════════════════════════════

/// Snapshot of pool state when a depositor made their deposit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositorSnapshot {
    /// Product factor at time of deposit (tracks deposit losses)
    pub p: FixedPoint,
    /// Sum factor at time of deposit (tracks collateral gains)
    pub s: FixedPoint,
    /// Epoch at time of deposit
    pub epoch: u64,
    /// Scale at time of deposit
    pub scale: u64,
}

/// A single deposit in the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deposit {
    /// Amount at the last snapshot
    pub initial_amount: FixedPoint,
    /// Snapshot at time of deposit
    pub snapshot: DepositorSnapshot,
}

// ═══════════════════════════════════════════════════════════════════════════════
// STABILITY POOL
// ═══════════════════════════════════════════════════════════════════════════════

/// In-memory stability pool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StabilityPool {
    /// Total stable asset in the pool
    total_deposits: FixedPoint,
    /// Collateral held for depositors
    total_collateral: FixedPoint,
    /// Product factor
    p: FixedPoint,
    /// Current epoch (advances when the pool is emptied)
    epoch: u64,
    /// Current scale (advances when `P` is rescaled)
    scale: u64,
    /// Sum factor per epoch and scale
    sums: Vec<Vec<FixedPoint>>,
    /// Individual deposits
    deposits: HashMap<OwnerId, Deposit>,
    /// Total offsets absorbed
    total_offsets: u64,
    /// Total debt absorbed
    total_debt_absorbed: FixedPoint,
}

impl Default for StabilityPool {
    fn default() -> Self {
        Self::new()
    }
}

impl StabilityPool {
    /// Create a new stability pool
    pub fn new() -> Self {
        Self {
            total_deposits: FixedPoint::ZERO,
            total_collateral: FixedPoint::ZERO,
            p: FixedPoint::ONE,
            epoch: 0,
            scale: 0,
            sums: vec![vec![FixedPoint::ZERO]],
            deposits: HashMap::new(),
            total_offsets: 0,
            total_debt_absorbed: FixedPoint::ZERO,
        }
    }

    fn sum_at(&self, epoch: u64, scale: u64) -> FixedPoint {
        self.sums
            .get(epoch as usize)
            .and_then(|scales| scales.get(scale as usize))
            .copied()
            .unwrap_or(FixedPoint::ZERO)
    }

    fn current_sum(&self) -> FixedPoint {
        self.sum_at(self.epoch, self.scale)
    }

    fn current_snapshot(&self) -> DepositorSnapshot {
        DepositorSnapshot {
            p: self.p,
            s: self.current_sum(),
            epoch: self.epoch,
            scale: self.scale,
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // DEPOSITS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Compounded value of `deposit` after the losses absorbed since its
    /// snapshot
    fn compounded(&self, deposit: &Deposit) -> Result<FixedPoint> {
        let snapshot = deposit.snapshot;
        if snapshot.epoch != self.epoch {
            return Ok(FixedPoint::ZERO);
        }

        let value = match self.scale - snapshot.scale {
            0 => deposit.initial_amount.mul_div(self.p, snapshot.p)?,
            1 => descale(deposit.initial_amount.mul_div(self.p, snapshot.p)?)?,
            _ => FixedPoint::ZERO,
        };

        // Dust below a billionth of the original deposit is treated as empty
        if value < descale(deposit.initial_amount)? {
            return Ok(FixedPoint::ZERO);
        }
        Ok(value)
    }

    /// Collateral gained by `deposit` since its snapshot
    fn gain(&self, deposit: &Deposit) -> Result<FixedPoint> {
        let snapshot = deposit.snapshot;
        let first = self
            .sum_at(snapshot.epoch, snapshot.scale)
            .checked_sub(snapshot.s)?;
        let second = descale(self.sum_at(snapshot.epoch, snapshot.scale + 1))?;
        deposit
            .initial_amount
            .mul_div(first.checked_add(second)?, snapshot.p)
    }

    /// Deposit the stable asset; pending collateral gains are paid out and
    /// returned
    pub fn deposit(&mut self, owner: OwnerId, amount: FixedPoint) -> Result<FixedPoint> {
        if amount.is_zero() {
            return Err(Error::ZeroAmount);
        }

        let (current, gain) = match self.deposits.get(&owner) {
            Some(existing) => (self.compounded(existing)?, self.gain(existing)?),
            None => (FixedPoint::ZERO, FixedPoint::ZERO),
        };

        let deposit = Deposit {
            initial_amount: current.checked_add(amount)?,
            snapshot: self.current_snapshot(),
        };
        let total_deposits = self.total_deposits.checked_add(amount)?;
        let total_collateral = self.total_collateral.checked_sub(gain)?;

        self.deposits.insert(owner, deposit);
        self.total_deposits = total_deposits;
        self.total_collateral = total_collateral;
        Ok(gain)
    }

    /// Withdraw up to `amount`; returns the amount withdrawn and the
    /// collateral gain paid out
    pub fn withdraw(&mut self, owner: &OwnerId, amount: FixedPoint) -> Result<(FixedPoint, FixedPoint)> {
        let deposit = *self.deposits.get(owner).ok_or_else(|| Error::InvalidParameter {
            name: "owner".into(),
            reason: "no deposit found".into(),
        })?;

        let current = self.compounded(&deposit)?;
        let gain = self.gain(&deposit)?;
        let withdrawn = amount.min(current);
        let remaining = current.checked_sub(withdrawn)?;

        // Compounding rounds down, so the total can trail the sum of deposits
        // by dust; never let it underflow on the last withdrawal
        let total_deposits = self.total_deposits.saturating_sub(withdrawn);
        let total_collateral = self.total_collateral.checked_sub(gain)?;

        if remaining.is_zero() {
            self.deposits.remove(owner);
        } else {
            self.deposits.insert(
                *owner,
                Deposit {
                    initial_amount: remaining,
                    snapshot: self.current_snapshot(),
                },
            );
        }
        self.total_deposits = total_deposits;
        self.total_collateral = total_collateral;

        Ok((withdrawn, gain))
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // LIQUIDATION ABSORPTION
    // ═══════════════════════════════════════════════════════════════════════════

    /// Absorb `debt` and take `collateral` into the pool
    pub fn absorb(&mut self, debt: FixedPoint, collateral: FixedPoint) -> Result<()> {
        if debt.is_zero() {
            return Ok(());
        }
        if debt > self.total_deposits {
            return Err(Error::InsufficientBackstop {
                required: debt.to_string(),
                available: self.total_deposits.to_string(),
            });
        }

        // S += collateral / deposits * P
        let marginal_gain = collateral.mul_div(self.p, self.total_deposits)?;
        let new_sum = self.current_sum().checked_add(marginal_gain)?;

        // P *= 1 - debt / deposits, rounding the loss up. A loss that rounds
        // to the whole pool empties it just like an exact match.
        let loss_per_unit = debt.mul_div_up(FixedPoint::ONE, self.total_deposits)?;
        let (p, epoch, scale) = if loss_per_unit >= FixedPoint::ONE {
            (FixedPoint::ONE, self.epoch + 1, 0)
        } else {
            let factor = FixedPoint::ONE.checked_sub(loss_per_unit)?;
            let p = self.p.checked_mul(factor)?;
            if p.raw() < SCALE_FACTOR {
                // P * factor * SCALE_FACTOR in one step keeps P above zero
                let step = FixedPoint::from_raw(FixedPoint::SCALE / SCALE_FACTOR);
                (self.p.mul_div(factor, step)?, self.epoch, self.scale + 1)
            } else {
                (p, self.epoch, self.scale)
            }
        };
        if p.is_zero() {
            return Err(Error::arithmetic("stability pool product factor reached zero"));
        }

        let total_deposits = self.total_deposits.checked_sub(debt)?;
        let total_collateral = self.total_collateral.checked_add(collateral)?;
        let total_debt_absorbed = self.total_debt_absorbed.checked_add(debt)?;

        self.set_sum(self.epoch, self.scale, new_sum);
        self.p = p;
        self.epoch = epoch;
        self.scale = scale;
        self.set_sum(epoch, scale, self.sum_at(epoch, scale));
        self.total_deposits = total_deposits;
        self.total_collateral = total_collateral;
        self.total_debt_absorbed = total_debt_absorbed;
        self.total_offsets += 1;

        tracing::debug!(debt = %debt, collateral = %collateral, "Stability pool absorbed offset");
        Ok(())
    }

    fn set_sum(&mut self, epoch: u64, scale: u64, value: FixedPoint) {
        let epoch = epoch as usize;
        let scale = scale as usize;
        if self.sums.len() <= epoch {
            self.sums.resize(epoch + 1, Vec::new());
        }
        let scales = &mut self.sums[epoch];
        if scales.len() <= scale {
            scales.resize(scale + 1, FixedPoint::ZERO);
        }
        scales[scale] = value;
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // QUERIES
    // ═══════════════════════════════════════════════════════════════════════════

    /// Get total deposits
    pub fn total_deposits(&self) -> FixedPoint {
        self.total_deposits
    }

    /// Get collateral held for depositors
    pub fn total_collateral(&self) -> FixedPoint {
        self.total_collateral
    }

    /// Current value of an owner's deposit
    pub fn compounded_deposit(&self, owner: &OwnerId) -> Result<FixedPoint> {
        match self.deposits.get(owner) {
            Some(deposit) => self.compounded(deposit),
            None => Ok(FixedPoint::ZERO),
        }
    }

    /// Collateral gain an owner can withdraw
    pub fn collateral_gain(&self, owner: &OwnerId) -> Result<FixedPoint> {
        match self.deposits.get(owner) {
            Some(deposit) => self.gain(deposit),
            None => Ok(FixedPoint::ZERO),
        }
    }

    /// Get number of depositors
    pub fn depositor_count(&self) -> usize {
        self.deposits.len()
    }

    /// Get total offsets absorbed
    pub fn total_offsets(&self) -> u64 {
        self.total_offsets
    }

    /// Get total debt absorbed
    pub fn total_debt_absorbed(&self) -> FixedPoint {
        self.total_debt_absorbed
    }

    /// Current epoch
    pub fn epoch(&self) -> u64 {
        self.epoch
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

impl BackstopPool for StabilityPool {
    fn available(&self) -> FixedPoint {
        self.total_deposits
    }

    fn offset(&mut self, debt: FixedPoint, collateral: FixedPoint) -> Result<FixedPoint> {
        self.absorb(debt, collateral)?;
        Ok(debt)
    }
}
