//! Liquidation engine.
//!
//! This module removes undercollateralized positions from a ledger:
//! - Scans from the weakest end of the risk index
//! - Offers each position's debt to the backstop first
//! - Redistributes whatever the backstop cannot absorb over remaining stakes
//!
//! A scan stops at the first healthy position: the index guarantees that no
//! weaker candidate remains behind it.

use serde::{Deserialize, Serialize};

use crate::core::ledger::{LiquidatedPosition, Ledger};
use crate::error::{Error, Result};
use crate::liquidation::stability_pool::BackstopPool;
use crate::oracle::PriceOracle;
use crate::utils::constants::MAX_EVENT_HISTORY;
use crate::utils::crypto::{OwnerId, PositionId};
use crate::utils::math::{proportional_share, FixedPoint};

// ═══════════════════════════════════════════════════════════════════════════════
// LIQUIDATION EVENT
// ═══════════════════════════════════════════════════════════════════════════════

/// Record of a liquidation event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidationEvent {
    /// Sequence number within the engine's lifetime
    pub sequence: u64,
    /// Position that was liquidated
    pub position_id: PositionId,
    /// Owner of the liquidated position
    pub owner: OwnerId,
    /// Collateral the position held after applying pending rewards
    pub collateral: FixedPoint,
    /// Debt the position carried after applying pending rewards
    pub debt: FixedPoint,
    /// Debt cancelled by the backstop
    pub debt_offset: FixedPoint,
    /// Collateral awarded to the backstop
    pub collateral_offset: FixedPoint,
    /// Debt spread over remaining stakes
    pub debt_redistributed: FixedPoint,
    /// Collateral spread over remaining stakes
    pub collateral_redistributed: FixedPoint,
    /// Price at liquidation
    pub price: FixedPoint,
    /// Individual collateral ratio at liquidation
    pub icr: FixedPoint,
    /// Whether the ledger was in recovery mode
    pub recovery_mode: bool,
}

impl LiquidationEvent {
    fn from_liquidated(
        sequence: u64,
        liquidated: LiquidatedPosition,
        price: FixedPoint,
        icr: FixedPoint,
        recovery_mode: bool,
    ) -> Self {
        Self {
            sequence,
            position_id: liquidated.id,
            owner: liquidated.owner,
            collateral: liquidated.collateral,
            debt: liquidated.debt,
            debt_offset: liquidated.debt_offset,
            collateral_offset: liquidated.collateral_offset,
            debt_redistributed: liquidated.debt_redistributed,
            collateral_redistributed: liquidated.collateral_redistributed,
            price,
            icr,
            recovery_mode,
        }
    }

    /// Check if the backstop absorbed the whole position
    pub fn fully_offset(&self) -> bool {
        self.debt_redistributed.is_zero() && self.collateral_redistributed.is_zero()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// BATCH REPORT
// ═══════════════════════════════════════════════════════════════════════════════

/// Per-position result of a liquidation scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LiquidationOutcome {
    /// Position was eligible and has been closed
    Liquidated(LiquidationEvent),
    /// Position was eligible but is the last one in the ledger
    Skipped {
        /// Position that was skipped
        position_id: PositionId,
        /// Its collateral ratio at the time
        icr: FixedPoint,
    },
}

/// Why a liquidation scan stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HaltReason {
    /// Reached a healthy position
    NoneEligible,
    /// The index is empty
    Exhausted,
    /// Touched the maximum number of positions for one call
    BudgetReached,
    /// The only remaining position is eligible but protected
    LastPositionProtected,
}

/// Aggregates over one liquidation scan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidationTotals {
    /// Positions liquidated
    pub liquidated: usize,
    /// Positions examined, healthy ones included
    pub touched: usize,
    /// Collateral removed from liquidated positions
    pub collateral: FixedPoint,
    /// Debt removed from liquidated positions
    pub debt: FixedPoint,
    /// Debt cancelled by the backstop
    pub debt_offset: FixedPoint,
    /// Collateral awarded to the backstop
    pub collateral_offset: FixedPoint,
    /// Debt redistributed over remaining stakes
    pub debt_redistributed: FixedPoint,
    /// Collateral redistributed over remaining stakes
    pub collateral_redistributed: FixedPoint,
}

impl LiquidationTotals {
    fn record(&mut self, event: &LiquidationEvent) -> Result<()> {
        self.liquidated += 1;
        self.collateral = self.collateral.checked_add(event.collateral)?;
        self.debt = self.debt.checked_add(event.debt)?;
        self.debt_offset = self.debt_offset.checked_add(event.debt_offset)?;
        self.collateral_offset = self.collateral_offset.checked_add(event.collateral_offset)?;
        self.debt_redistributed = self.debt_redistributed.checked_add(event.debt_redistributed)?;
        self.collateral_redistributed = self
            .collateral_redistributed
            .checked_add(event.collateral_redistributed)?;
        Ok(())
    }
}

/// Result of a liquidation scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidationReport {
    /// Per-position outcomes in scan order
    pub outcomes: Vec<LiquidationOutcome>,
    /// Why the scan stopped
    pub halt: HaltReason,
    /// Aggregates over the scan
    pub totals: LiquidationTotals,
}

impl LiquidationReport {
    fn new() -> Self {
        Self {
            outcomes: Vec::new(),
            halt: HaltReason::NoneEligible,
            totals: LiquidationTotals::default(),
        }
    }

    /// Liquidation events in scan order
    pub fn events(&self) -> impl Iterator<Item = &LiquidationEvent> + '_ {
        self.outcomes.iter().filter_map(|o| match o {
            LiquidationOutcome::Liquidated(event) => Some(event),
            LiquidationOutcome::Skipped { .. } => None,
        })
    }

    /// Number of positions liquidated
    pub fn liquidated_count(&self) -> usize {
        self.totals.liquidated
    }

    /// Check if another call could liquidate more
    pub fn is_partial(&self) -> bool {
        self.halt == HaltReason::BudgetReached
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// STATISTICS
// ═══════════════════════════════════════════════════════════════════════════════

/// Cumulative liquidation statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidationStats {
    /// Total positions liquidated
    pub total_liquidations: u64,
    /// Liquidations fully absorbed by the backstop
    pub fully_offset: u64,
    /// Total debt cancelled by the backstop
    pub total_debt_offset: FixedPoint,
    /// Total debt redistributed
    pub total_debt_redistributed: FixedPoint,
    /// Total collateral removed from liquidated positions
    pub total_collateral_liquidated: FixedPoint,
}

// ═══════════════════════════════════════════════════════════════════════════════
// LIQUIDATION ENGINE
// ═══════════════════════════════════════════════════════════════════════════════

/// Engine for liquidating undercollateralized positions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquidationEngine {
    /// Events history
    events: Vec<LiquidationEvent>,
    /// Maximum events to keep
    max_events: usize,
    /// Next event sequence number
    next_sequence: u64,
    /// Cumulative statistics
    stats: LiquidationStats,
}

impl Default for LiquidationEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl LiquidationEngine {
    /// Create a new liquidation engine
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
            max_events: MAX_EVENT_HISTORY,
            next_sequence: 0,
            stats: LiquidationStats::default(),
        }
    }

    /// Limit the retained event history
    pub fn with_max_events(mut self, max_events: usize) -> Self {
        self.max_events = max_events;
        self
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // LIQUIDATION EXECUTION
    // ═══════════════════════════════════════════════════════════════════════════

    /// Liquidate eligible positions starting from the weakest
    ///
    /// At most `max_positions` positions are examined. Reaching that bound
    /// ends the call with [`HaltReason::BudgetReached`]; call again to
    /// continue. Recovery mode is re-evaluated before every position.
    ///
    /// Returns `Err(LastPositionProtected)` only when the sole remaining
    /// position is eligible and nothing else was liquidated.
    pub fn liquidate_batch(
        &mut self,
        ledger: &mut Ledger,
        oracle: &dyn PriceOracle,
        backstop: &mut dyn BackstopPool,
        max_positions: usize,
    ) -> Result<LiquidationReport> {
        let price = oracle.price()?;
        let mut report = LiquidationReport::new();

        loop {
            if report.totals.touched >= max_positions {
                report.halt = HaltReason::BudgetReached;
                break;
            }
            let Some(id) = ledger.index().last() else {
                report.halt = HaltReason::Exhausted;
                break;
            };
            report.totals.touched += 1;

            let (icr, recovery_mode) = match Self::check_eligible(ledger, &id, price)? {
                Some(eligible) => eligible,
                None => {
                    report.halt = HaltReason::NoneEligible;
                    break;
                }
            };

            if ledger.active_count() <= 1 {
                report.outcomes.push(LiquidationOutcome::Skipped {
                    position_id: id,
                    icr,
                });
                report.halt = HaltReason::LastPositionProtected;
                break;
            }

            let event = self.execute(ledger, &id, price, icr, recovery_mode, backstop)?;
            report.totals.record(&event)?;
            report.outcomes.push(LiquidationOutcome::Liquidated(event));
        }

        if report.halt == HaltReason::LastPositionProtected && report.totals.liquidated == 0 {
            return Err(Error::LastPositionProtected);
        }

        tracing::info!(
            ledger = ledger.name(),
            liquidated = report.totals.liquidated,
            touched = report.totals.touched,
            debt_offset = %report.totals.debt_offset,
            debt_redistributed = %report.totals.debt_redistributed,
            halt = ?report.halt,
            "Liquidation batch finished"
        );

        Ok(report)
    }

    /// Liquidate one specific position
    pub fn liquidate_position(
        &mut self,
        ledger: &mut Ledger,
        id: &PositionId,
        oracle: &dyn PriceOracle,
        backstop: &mut dyn BackstopPool,
    ) -> Result<LiquidationEvent> {
        let price = oracle.price()?;
        let (icr, recovery_mode) = Self::check_eligible(ledger, id, price)?
            .ok_or_else(|| Error::PositionHealthy(id.to_hex()))?;

        if ledger.active_count() <= 1 {
            return Err(Error::LastPositionProtected);
        }

        self.execute(ledger, id, price, icr, recovery_mode, backstop)
    }

    /// Apply pending rewards and test the position against the threshold
    ///
    /// Returns `None` for a healthy position.
    fn check_eligible(
        ledger: &mut Ledger,
        id: &PositionId,
        price: FixedPoint,
    ) -> Result<Option<(FixedPoint, bool)>> {
        ledger.apply_pending(id)?;

        let recovery_mode = ledger.is_recovery_mode(price)?;
        let threshold = ledger.params().liquidation_threshold(recovery_mode);
        let icr = ledger.current_icr(id, price)?;

        tracing::debug!(
            position = %id.short(),
            icr = %icr,
            threshold = %threshold,
            recovery_mode,
            "Checked liquidation eligibility"
        );

        if icr >= threshold {
            return Ok(None);
        }
        Ok(Some((icr, recovery_mode)))
    }

    /// Close an eligible position: backstop first, then redistribution
    fn execute(
        &mut self,
        ledger: &mut Ledger,
        id: &PositionId,
        price: FixedPoint,
        icr: FixedPoint,
        recovery_mode: bool,
        backstop: &mut dyn BackstopPool,
    ) -> Result<LiquidationEvent> {
        let position = ledger
            .position(id)
            .ok_or_else(|| Error::PositionNotFound(id.to_hex()))?;
        let (collateral, debt) = (position.collateral, position.debt);

        let mut debt_offset = debt.min(backstop.available());
        let mut collateral_offset = proportional_share(collateral, debt_offset, debt)?;

        if !debt_offset.is_zero() {
            match backstop.offset(debt_offset, collateral_offset) {
                Ok(absorbed) if absorbed == debt_offset => {}
                Ok(absorbed) => {
                    return Err(Error::InvariantViolation(format!(
                        "backstop absorbed {} of {} requested",
                        absorbed, debt_offset
                    )));
                }
                Err(e) if e.is_critical() => return Err(e),
                Err(e) => {
                    tracing::warn!(
                        position = %id.short(),
                        error = %e,
                        "Backstop offset failed, redistributing whole position"
                    );
                    debt_offset = FixedPoint::ZERO;
                    collateral_offset = FixedPoint::ZERO;
                }
            }
        }

        let liquidated = ledger.liquidate(id, debt_offset, collateral_offset)?;
        let event =
            LiquidationEvent::from_liquidated(self.next_sequence, liquidated, price, icr, recovery_mode);
        self.next_sequence += 1;

        tracing::debug!(
            position = %id.short(),
            debt = %event.debt,
            debt_offset = %event.debt_offset,
            debt_redistributed = %event.debt_redistributed,
            "Liquidated position"
        );

        self.update_stats(&event);
        self.add_event(event.clone());
        Ok(event)
    }

    fn update_stats(&mut self, event: &LiquidationEvent) {
        self.stats.total_liquidations += 1;
        if event.fully_offset() {
            self.stats.fully_offset += 1;
        }
        self.stats.total_debt_offset = self.stats.total_debt_offset.saturating_add(event.debt_offset);
        self.stats.total_debt_redistributed = self
            .stats
            .total_debt_redistributed
            .saturating_add(event.debt_redistributed);
        self.stats.total_collateral_liquidated = self
            .stats
            .total_collateral_liquidated
            .saturating_add(event.collateral);
    }

    /// Add event to history (with pruning)
    fn add_event(&mut self, event: LiquidationEvent) {
        self.events.push(event);
        if self.events.len() > self.max_events {
            let excess = self.events.len() - self.max_events;
            self.events.drain(0..excess);
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // QUERIES
    // ═══════════════════════════════════════════════════════════════════════════

    /// Get recent liquidation events
    pub fn recent_events(&self, count: usize) -> &[LiquidationEvent] {
        let start = self.events.len().saturating_sub(count);
        &self.events[start..]
    }

    /// Get cumulative statistics
    pub fn stats(&self) -> LiquidationStats {
        self.stats
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
