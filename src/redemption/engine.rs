//! Redemption engine.
//!
//! Redemptions exchange the stable asset for collateral at par, cancelling
//! debt from the riskiest positions that are still above the minimum ratio.

use serde::{Deserialize, Serialize};

use crate::core::ledger::{Ledger, RedemptionEffect};
use crate::error::{Error, Result};
use crate::utils::crypto::{OwnerId, PositionId};
use crate::utils::math::{collateral_for_debt, FixedPoint};

// ═══════════════════════════════════════════════════════════════════════════════
// REDEMPTION RESULTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Effect of a redemption on a single position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedemptionPartial {
    /// Position that was redeemed against
    pub position_id: PositionId,
    /// Owner of the position
    pub owner: OwnerId,
    /// Debt cancelled
    pub debt_redeemed: FixedPoint,
    /// Collateral paid to the redeemer
    pub collateral_paid: FixedPoint,
    /// What happened to the position
    pub effect: RedemptionEffect,
}

impl RedemptionPartial {
    /// Check if the position was closed by this redemption
    pub fn closed(&self) -> bool {
        matches!(self.effect, RedemptionEffect::Closed { .. })
    }
}

/// Why a redemption scan stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RedemptionHalt {
    /// The whole amount was redeemed
    Fulfilled,
    /// No further position can be redeemed against
    Exhausted,
    /// Touched the maximum number of positions for one call
    BudgetReached,
    /// The next redemption would leave a position below the minimum net debt
    MinNetDebt,
}

/// Result of a redemption
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedemptionReport {
    /// Per-position effects in scan order
    pub partials: Vec<RedemptionPartial>,
    /// Debt cancelled in total
    pub total_debt_redeemed: FixedPoint,
    /// Collateral paid in total
    pub total_collateral_paid: FixedPoint,
    /// Part of the requested amount left unredeemed
    pub remaining: FixedPoint,
    /// Why the scan stopped
    pub halt: RedemptionHalt,
}

impl RedemptionReport {
    /// Number of positions closed by the redemption
    pub fn closed_count(&self) -> usize {
        self.partials.iter().filter(|p| p.closed()).count()
    }
}

/// Cumulative redemption statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedemptionStats {
    /// Redemption calls that cancelled any debt
    pub total_redemptions: u64,
    /// Positions closed by redemption
    pub positions_closed: u64,
    /// Total debt cancelled
    pub total_debt_redeemed: FixedPoint,
    /// Total collateral paid out
    pub total_collateral_paid: FixedPoint,
}

// ═══════════════════════════════════════════════════════════════════════════════
// REDEMPTION ENGINE
// ═══════════════════════════════════════════════════════════════════════════════

/// Engine for redeeming the stable asset against ledger positions
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RedemptionEngine {
    stats: RedemptionStats,
}

impl RedemptionEngine {
    /// Create a new redemption engine
    pub fn new() -> Self {
        Self::default()
    }

    /// Redeem `amount` of the stable asset at `price`
    ///
    /// Positions are visited from the weakest end of the index. Positions
    /// below the minimum collateral ratio are skipped; they are liquidation
    /// candidates. Each position gives up at most its debt above the reserve.
    /// At most `max_positions` positions are examined.
    pub fn redeem(
        &mut self,
        ledger: &mut Ledger,
        amount: FixedPoint,
        price: FixedPoint,
        max_positions: usize,
    ) -> Result<RedemptionReport> {
        if amount.is_zero() {
            return Err(Error::ZeroAmount);
        }
        if price.is_zero() {
            return Err(Error::InvalidPrice("price cannot be zero".into()));
        }

        let params = ledger.params().clone();
        let mut report = RedemptionReport {
            partials: Vec::new(),
            total_debt_redeemed: FixedPoint::ZERO,
            total_collateral_paid: FixedPoint::ZERO,
            remaining: amount,
            halt: RedemptionHalt::Exhausted,
        };
        let mut touched = 0usize;
        let mut cursor = ledger.index().last();

        while let Some(id) = cursor {
            if report.remaining.is_zero() {
                report.halt = RedemptionHalt::Fulfilled;
                break;
            }
            if touched >= max_positions {
                report.halt = RedemptionHalt::BudgetReached;
                break;
            }
            touched += 1;
            // Step from the slot the position is visited in; applying its
            // pending reward may move it
            cursor = ledger.index().prev(&id);

            if ledger.current_icr(&id, price)? < params.min_collateral_ratio {
                continue;
            }

            ledger.apply_pending(&id)?;

            let position = ledger
                .position(&id)
                .ok_or_else(|| Error::PositionNotFound(id.to_hex()))?;
            let (owner, debt) = (position.owner, position.debt);
            let redeemable = debt.saturating_sub(params.min_debt_reserve);
            if redeemable.is_zero() {
                continue;
            }

            let cancel = redeemable.min(report.remaining);
            if cancel < redeemable {
                let net_left = redeemable.checked_sub(cancel)?;
                if net_left < params.min_net_debt {
                    tracing::debug!(
                        position = %id.short(),
                        net_left = %net_left,
                        "Partial redemption would leave debt below minimum"
                    );
                    report.halt = RedemptionHalt::MinNetDebt;
                    break;
                }
            }

            let collateral = collateral_for_debt(cancel, price)?;
            let effect = ledger.redeem(&id, cancel, collateral)?;

            tracing::debug!(
                position = %id.short(),
                debt = %cancel,
                collateral = %collateral,
                "Redeemed against position"
            );

            report.remaining = report.remaining.checked_sub(cancel)?;
            report.total_debt_redeemed = report.total_debt_redeemed.checked_add(cancel)?;
            report.total_collateral_paid = report.total_collateral_paid.checked_add(collateral)?;
            report.partials.push(RedemptionPartial {
                position_id: id,
                owner,
                debt_redeemed: cancel,
                collateral_paid: collateral,
                effect,
            });
        }

        if cursor.is_none() && report.remaining.is_zero() {
            report.halt = RedemptionHalt::Fulfilled;
        }

        if report.partials.is_empty() && report.halt != RedemptionHalt::BudgetReached {
            return Err(Error::InsufficientRedeemableDebt);
        }

        self.update_stats(&report);
        tracing::info!(
            ledger = ledger.name(),
            redeemed = %report.total_debt_redeemed,
            collateral = %report.total_collateral_paid,
            positions = report.partials.len(),
            closed = report.closed_count(),
            halt = ?report.halt,
            "Redemption finished"
        );

        Ok(report)
    }

    fn update_stats(&mut self, report: &RedemptionReport) {
        if report.partials.is_empty() {
            return;
        }
        self.stats.total_redemptions += 1;
        self.stats.positions_closed += report.closed_count() as u64;
        self.stats.total_debt_redeemed = self
            .stats
            .total_debt_redeemed
            .saturating_add(report.total_debt_redeemed);
        self.stats.total_collateral_paid = self
            .stats
            .total_collateral_paid
            .saturating_add(report.total_collateral_paid);
    }

    /// Get cumulative statistics
    pub fn stats(&self) -> RedemptionStats {
        self.stats
    }
}
