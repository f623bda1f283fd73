//! Per-step reporting records.
//!
//! Records are read-only snapshots of a ledger for external consumers such as
//! simulators; nothing here feeds back into the ledger.

use serde::{Deserialize, Serialize};

use crate::core::ledger::Ledger;
use crate::error::{Error, Result};
use crate::liquidation::engine::LiquidationReport;
use crate::redemption::engine::RedemptionReport;
use crate::utils::math::FixedPoint;

// ═══════════════════════════════════════════════════════════════════════════════
// CUMULATIVE COUNTERS
// ═══════════════════════════════════════════════════════════════════════════════

/// Running totals across a simulation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cumulative {
    /// Collateral added by opens and top-ups
    pub added: FixedPoint,
    /// Collateral removed by liquidations
    pub liquidated: FixedPoint,
    /// Stable asset redeemed
    pub redeemed: FixedPoint,
}

impl Cumulative {
    /// Count collateral added to the ledger
    pub fn record_added(&mut self, collateral: FixedPoint) -> Result<()> {
        self.added = self.added.checked_add(collateral)?;
        Ok(())
    }

    /// Count the collateral of a liquidation scan
    pub fn record_liquidation(&mut self, report: &LiquidationReport) -> Result<()> {
        self.liquidated = self.liquidated.checked_add(report.totals.collateral)?;
        Ok(())
    }

    /// Count the debt cancelled by a redemption
    pub fn record_redemption(&mut self, report: &RedemptionReport) -> Result<()> {
        self.redeemed = self.redeemed.checked_add(report.total_debt_redeemed)?;
        Ok(())
    }

    /// Share of added collateral lost to liquidation
    pub fn liquidated_share(&self) -> Result<FixedPoint> {
        if self.added.is_zero() {
            return Ok(FixedPoint::ZERO);
        }
        self.liquidated.checked_div(self.added)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// REPORT RECORD
// ═══════════════════════════════════════════════════════════════════════════════

/// One row per simulated step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportRecord {
    /// Step number
    pub iteration: u64,
    /// Collateral price
    pub price: FixedPoint,
    /// Market price of the stable asset
    pub stable_price: FixedPoint,
    /// Active positions
    pub num_positions: usize,
    /// Ledger collateral, accumulator included
    pub total_collateral: FixedPoint,
    /// Ledger debt, accumulator included
    pub total_debt: FixedPoint,
    /// Total collateralization ratio
    pub tcr: FixedPoint,
    /// Whether the ledger is in recovery mode
    pub recovery_mode: bool,
    /// Collateral ratio of the weakest position, if any
    pub weakest_icr: Option<FixedPoint>,
    /// Stable asset held by the backstop pool
    pub pool_balance: FixedPoint,
    /// Collateral added so far
    pub cumulative_added: FixedPoint,
    /// Collateral liquidated so far
    pub cumulative_liquidated: FixedPoint,
    /// Stable asset redeemed so far
    pub cumulative_redeemed: FixedPoint,
}

impl ReportRecord {
    /// CSV column names
    pub const HEADER: &'static str = "iteration,price,stable_price,num_positions,total_collateral,\
total_debt,tcr,recovery_mode,weakest_icr,pool_balance,cumulative_added,cumulative_liquidated,\
cumulative_redeemed";

    /// Snapshot `ledger` at `price`
    pub fn capture(
        iteration: u64,
        ledger: &Ledger,
        price: FixedPoint,
        stable_price: FixedPoint,
        pool_balance: FixedPoint,
        cumulative: &Cumulative,
    ) -> Result<Self> {
        let totals = ledger.totals();
        let status = ledger.recovery_status(price)?;
        let weakest_icr = match ledger.index().last() {
            Some(id) => Some(ledger.current_icr(&id, price)?),
            None => None,
        };

        Ok(Self {
            iteration,
            price,
            stable_price,
            num_positions: ledger.active_count(),
            total_collateral: totals.total_collateral,
            total_debt: totals.total_debt,
            tcr: status.tcr,
            recovery_mode: status.is_active,
            weakest_icr,
            pool_balance,
            cumulative_added: cumulative.added,
            cumulative_liquidated: cumulative.liquidated,
            cumulative_redeemed: cumulative.redeemed,
        })
    }

    /// Render as a CSV row matching [`ReportRecord::HEADER`]
    pub fn to_csv_row(&self) -> String {
        let weakest = self
            .weakest_icr
            .map(|icr| icr.to_string())
            .unwrap_or_default();
        format!(
            "{},{},{},{},{},{},{},{},{},{},{},{},{}",
            self.iteration,
            self.price,
            self.stable_price,
            self.num_positions,
            self.total_collateral,
            self.total_debt,
            self.tcr,
            self.recovery_mode,
            weakest,
            self.pool_balance,
            self.cumulative_added,
            self.cumulative_liquidated,
            self.cumulative_redeemed,
        )
    }

    /// Render as one line of JSON
    pub fn to_json_line(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Parse a line produced by [`ReportRecord::to_json_line`]
    pub fn from_json_line(line: &str) -> Result<Self> {
        serde_json::from_str(line).map_err(|e| Error::Deserialization(e.to_string()))
    }
}
