//! Recovery mode rules.
//!
//! Recovery mode is active while the Total Collateralization Ratio (TCR) is
//! below the Critical Collateralization Ratio (CCR). In this mode:
//!
//! 1. **Liquidation threshold raised**: positions below CCR (instead of MCR)
//!    can be liquidated
//! 2. **New positions** must open at or above CCR
//! 3. **Adjustments** must not lower TCR, and collateral cannot be withdrawn
//! 4. **Closing** is blocked
//!
//! Outside recovery mode, operations must not push TCR below CCR.
//!
//! Every check is recomputed from the totals passed in, so callers always see
//! the mode as of the current price.

use serde::{Deserialize, Serialize};

use crate::core::config::LedgerParams;
use crate::core::stake::LedgerTotals;
use crate::error::{Error, Result};
use crate::utils::math::{collateral_ratio, system_ratio, FixedPoint};

// ═══════════════════════════════════════════════════════════════════════════════
// RECOVERY MODE STATUS
// ═══════════════════════════════════════════════════════════════════════════════

/// Recovery mode status at a given price
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryModeStatus {
    /// Whether recovery mode is active
    pub is_active: bool,
    /// Current Total Collateralization Ratio
    pub tcr: FixedPoint,
    /// TCR needed to exit recovery mode
    pub exit_threshold: FixedPoint,
    /// Liquidation threshold in effect
    pub liquidation_threshold: FixedPoint,
    /// Price used for calculation
    pub price: FixedPoint,
}

// ═══════════════════════════════════════════════════════════════════════════════
// OPERATION VALIDATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Result of validating an operation against the mode rules
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryModeValidation {
    /// Operation is allowed
    Allowed,
    /// Operation would leave the position below the required ratio
    RatioTooLow {
        /// Ratio the position would have
        current: FixedPoint,
        /// Ratio required in the current mode
        minimum: FixedPoint,
    },
    /// Operation is blocked with reason
    Blocked(String),
}

impl RecoveryModeValidation {
    /// Check if operation is allowed
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }

    /// Convert to a result
    pub fn to_result(&self) -> Result<()> {
        match self {
            Self::Allowed => Ok(()),
            Self::RatioTooLow { current, minimum } => Err(Error::CollateralizationRatioTooLow {
                current: current.to_string(),
                minimum: minimum.to_string(),
            }),
            Self::Blocked(reason) => Err(Error::RecoveryMode(reason.clone())),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RECOVERY MODE
// ═══════════════════════════════════════════════════════════════════════════════

/// Stateless recovery mode calculations
#[derive(Debug, Clone, Copy, Default)]
pub struct RecoveryMode;

impl RecoveryMode {
    // ═══════════════════════════════════════════════════════════════════════════
    // TCR CALCULATIONS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Calculate Total Collateralization Ratio
    pub fn calculate_tcr(totals: &LedgerTotals, price: FixedPoint) -> Result<FixedPoint> {
        system_ratio(totals.total_collateral, totals.total_debt, price)
    }

    /// Check if TCR indicates recovery mode
    pub fn is_recovery_mode(tcr: FixedPoint, params: &LedgerParams) -> bool {
        tcr < params.critical_collateral_ratio
    }

    /// Calculate TCR after replacing `(old_collateral, old_debt)` with
    /// `(new_collateral, new_debt)`
    pub fn tcr_after_operation(
        totals: &LedgerTotals,
        old_collateral: FixedPoint,
        old_debt: FixedPoint,
        new_collateral: FixedPoint,
        new_debt: FixedPoint,
        price: FixedPoint,
    ) -> Result<FixedPoint> {
        let collateral = totals
            .total_collateral
            .checked_sub(old_collateral)?
            .checked_add(new_collateral)?;
        let debt = totals.total_debt.checked_sub(old_debt)?.checked_add(new_debt)?;
        system_ratio(collateral, debt, price)
    }

    /// Full status at `price`
    pub fn status(
        totals: &LedgerTotals,
        params: &LedgerParams,
        price: FixedPoint,
    ) -> Result<RecoveryModeStatus> {
        let tcr = Self::calculate_tcr(totals, price)?;
        let is_active = Self::is_recovery_mode(tcr, params);
        Ok(RecoveryModeStatus {
            is_active,
            tcr,
            exit_threshold: params.critical_collateral_ratio,
            liquidation_threshold: params.liquidation_threshold(is_active),
            price,
        })
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // OPERATION VALIDATION
    // ═══════════════════════════════════════════════════════════════════════════

    /// Validate opening a new position
    pub fn validate_open(
        params: &LedgerParams,
        totals: &LedgerTotals,
        collateral: FixedPoint,
        debt: FixedPoint,
        price: FixedPoint,
    ) -> Result<RecoveryModeValidation> {
        let recovery = Self::is_recovery_mode(Self::calculate_tcr(totals, price)?, params);
        let icr = collateral_ratio(collateral, debt, price)?;
        let minimum = if recovery {
            params.critical_collateral_ratio
        } else {
            params.min_collateral_ratio
        };

        if icr < minimum {
            return Ok(RecoveryModeValidation::RatioTooLow {
                current: icr,
                minimum,
            });
        }

        if !recovery {
            let new_tcr = Self::tcr_after_operation(
                totals,
                FixedPoint::ZERO,
                FixedPoint::ZERO,
                collateral,
                debt,
                price,
            )?;
            if Self::is_recovery_mode(new_tcr, params) {
                return Ok(RecoveryModeValidation::Blocked(format!(
                    "opening would lower TCR to {}",
                    new_tcr
                )));
            }
        }

        Ok(RecoveryModeValidation::Allowed)
    }

    /// Validate changing a position from `old` to `new` balances
    pub fn validate_adjust(
        params: &LedgerParams,
        totals: &LedgerTotals,
        old: (FixedPoint, FixedPoint),
        new: (FixedPoint, FixedPoint),
        price: FixedPoint,
    ) -> Result<RecoveryModeValidation> {
        let (old_collateral, old_debt) = old;
        let (new_collateral, new_debt) = new;

        let tcr = Self::calculate_tcr(totals, price)?;
        let recovery = Self::is_recovery_mode(tcr, params);
        let new_icr = collateral_ratio(new_collateral, new_debt, price)?;
        let new_tcr =
            Self::tcr_after_operation(totals, old_collateral, old_debt, new_collateral, new_debt, price)?;

        if recovery {
            if new_collateral < old_collateral {
                return Ok(RecoveryModeValidation::Blocked(
                    "collateral withdrawal in recovery mode".into(),
                ));
            }
            if new_debt > old_debt && new_icr < params.critical_collateral_ratio {
                return Ok(RecoveryModeValidation::RatioTooLow {
                    current: new_icr,
                    minimum: params.critical_collateral_ratio,
                });
            }
            if new_tcr < tcr {
                return Ok(RecoveryModeValidation::Blocked(format!(
                    "adjustment would lower TCR from {} to {}",
                    tcr, new_tcr
                )));
            }
            return Ok(RecoveryModeValidation::Allowed);
        }

        if new_icr < params.min_collateral_ratio {
            return Ok(RecoveryModeValidation::RatioTooLow {
                current: new_icr,
                minimum: params.min_collateral_ratio,
            });
        }
        if Self::is_recovery_mode(new_tcr, params) {
            return Ok(RecoveryModeValidation::Blocked(format!(
                "adjustment would lower TCR to {}",
                new_tcr
            )));
        }

        Ok(RecoveryModeValidation::Allowed)
    }

    /// Validate closing a position holding `collateral` and `debt`
    pub fn validate_close(
        params: &LedgerParams,
        totals: &LedgerTotals,
        collateral: FixedPoint,
        debt: FixedPoint,
        price: FixedPoint,
    ) -> Result<RecoveryModeValidation> {
        let tcr = Self::calculate_tcr(totals, price)?;
        if Self::is_recovery_mode(tcr, params) {
            return Ok(RecoveryModeValidation::Blocked(
                "closing positions is disabled in recovery mode".into(),
            ));
        }

        let new_tcr = Self::tcr_after_operation(
            totals,
            collateral,
            debt,
            FixedPoint::ZERO,
            FixedPoint::ZERO,
            price,
        )?;
        if Self::is_recovery_mode(new_tcr, params) {
            return Ok(RecoveryModeValidation::Blocked(format!(
                "closing would lower TCR to {}",
                new_tcr
            )));
        }

        Ok(RecoveryModeValidation::Allowed)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
