//! Stable-asset balances used to settle migrations.
//!
//! The ledger itself never moves tokens. Closing a position requires its owner
//! to repay the debt above the reserve, and opening one issues that amount
//! back; a [`FundingService`] carries those transfers.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::utils::crypto::OwnerId;
use crate::utils::math::FixedPoint;

/// Balance book for the stable asset
pub trait FundingService {
    /// Move `amount` from one account to another
    fn transfer(&mut self, from: &OwnerId, to: &OwnerId, amount: FixedPoint) -> Result<()>;

    /// Current balance of `account`
    fn balance_of(&self, account: &OwnerId) -> FixedPoint;
}

// ═══════════════════════════════════════════════════════════════════════════════
// IN-MEMORY FUNDING
// ═══════════════════════════════════════════════════════════════════════════════

/// In-memory balance book
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InMemoryFunding {
    /// Total supply across all accounts
    total_supply: FixedPoint,
    /// Balances by account
    balances: HashMap<OwnerId, FixedPoint>,
}

impl Default for InMemoryFunding {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryFunding {
    /// Create an empty balance book
    pub fn new() -> Self {
        Self {
            total_supply: FixedPoint::ZERO,
            balances: HashMap::new(),
        }
    }

    /// Get total supply
    pub fn total_supply(&self) -> FixedPoint {
        self.total_supply
    }

    /// Credit new balance to `to`
    pub fn mint(&mut self, to: OwnerId, amount: FixedPoint) -> Result<()> {
        if amount.is_zero() {
            return Err(Error::ZeroAmount);
        }

        let new_supply = self.total_supply.checked_add(amount)?;
        let new_balance = self.balance_of(&to).checked_add(amount)?;

        self.balances.insert(to, new_balance);
        self.total_supply = new_supply;
        Ok(())
    }

    /// Verify supply invariant (total_supply == sum of all balances)
    pub fn verify_supply_invariant(&self) -> bool {
        let sum = self
            .balances
            .values()
            .try_fold(FixedPoint::ZERO, |acc, b| acc.checked_add(*b));
        matches!(sum, Ok(sum) if sum == self.total_supply)
    }

    fn debit(&self, account: &OwnerId, amount: FixedPoint) -> Result<FixedPoint> {
        let balance = self.balance_of(account);
        if balance < amount {
            return Err(Error::InsufficientBalance {
                account: account.short(),
                required: amount.to_string(),
                available: balance.to_string(),
            });
        }
        balance.checked_sub(amount)
    }

    fn set_balance(&mut self, account: OwnerId, balance: FixedPoint) {
        if balance.is_zero() {
            self.balances.remove(&account);
        } else {
            self.balances.insert(account, balance);
        }
    }
}

impl FundingService for InMemoryFunding {
    fn transfer(&mut self, from: &OwnerId, to: &OwnerId, amount: FixedPoint) -> Result<()> {
        if amount.is_zero() {
            return Err(Error::ZeroAmount);
        }
        if from == to {
            return Ok(());
        }

        let new_from = self.debit(from, amount)?;
        let new_to = self.balance_of(to).checked_add(amount)?;
        self.set_balance(*from, new_from);
        self.set_balance(*to, new_to);
        Ok(())
    }

    fn balance_of(&self, account: &OwnerId) -> FixedPoint {
        self.balances.get(account).copied().unwrap_or(FixedPoint::ZERO)
    }
}
