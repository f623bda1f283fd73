//! Migration coordinator.
//!
//! Moves live positions from a source ledger into a destination ledger, one
//! position at a time. Each position is closed in the source and reopened in
//! the destination before the next one is touched. A failure affects only the
//! position being moved; earlier migrations stand and a later run can resume.
//!
//! The owner's repayment is held in escrow between the close and the open,
//! and exactly that amount is issued back once the destination position
//! exists. Ledgers with different reserves therefore settle without drawing
//! on the treasury.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::core::config::MigrationParams;
use crate::core::ledger::Ledger;
use crate::error::{Error, Result};
use crate::index::Hints;
use crate::migration::funding::FundingService;
use crate::migration::MigrationOrder;
use crate::oracle::PriceOracle;
use crate::utils::crypto::{OwnerId, PositionId};
use crate::utils::math::{nominal_ratio, FixedPoint};

// ═══════════════════════════════════════════════════════════════════════════════
// MIGRATION RECORDS
// ═══════════════════════════════════════════════════════════════════════════════

/// Outcome of migrating a single position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MigrationStatus {
    /// Closed in the source and reopened in the destination
    Migrated,
    /// Position was no longer active in the source
    AlreadyClosed,
    /// Source system ratio without the position is below the safety ratio
    Redeemed,
    /// Closing in the source failed; nothing changed for this position
    CloseFailed,
    /// Closed in the source but opening in the destination failed
    OpenFailed,
}

impl MigrationStatus {
    /// Check if this status is a failure that halts a stopping run
    pub fn is_failure(&self) -> bool {
        matches!(self, MigrationStatus::CloseFailed | MigrationStatus::OpenFailed)
    }
}

/// Record of one migration attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationRecord {
    /// Position in the source ledger
    pub source_id: PositionId,
    /// Owner of the position
    pub owner: OwnerId,
    /// Outcome
    pub status: MigrationStatus,
    /// Collateral moved (or released, for `OpenFailed`)
    pub collateral: FixedPoint,
    /// Debt moved
    pub debt: FixedPoint,
    /// Position in the destination ledger
    pub destination_id: Option<PositionId>,
    /// Stable asset the treasury lent the owner to close
    pub shortfall_covered: FixedPoint,
    /// Repayment still held in escrow for this position
    pub escrowed: FixedPoint,
    /// Error that caused a failure status, or that left the repayment in escrow
    pub error: Option<String>,
}

impl MigrationRecord {
    fn new(source_id: PositionId, owner: OwnerId, status: MigrationStatus) -> Self {
        Self {
            source_id,
            owner,
            status,
            collateral: FixedPoint::ZERO,
            debt: FixedPoint::ZERO,
            destination_id: None,
            shortfall_covered: FixedPoint::ZERO,
            escrowed: FixedPoint::ZERO,
            error: None,
        }
    }

    fn failed(mut self, status: MigrationStatus, error: &Error) -> Self {
        self.status = status;
        self.error = Some(error.to_string());
        self
    }

    /// Check if this record still needs a destination open or a payout
    ///
    /// True for a failed open, and for a migrated position whose issuance
    /// could not be paid out of escrow.
    pub fn awaits_settlement(&self) -> bool {
        match self.status {
            MigrationStatus::OpenFailed => true,
            MigrationStatus::Migrated => !self.escrowed.is_zero(),
            _ => false,
        }
    }
}

/// Result of a migration run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationReport {
    /// Per-position records in visit order
    pub records: Vec<MigrationRecord>,
    /// Position to resume from when the run stopped on a failure
    pub resume_from: Option<PositionId>,
}

impl MigrationReport {
    /// Number of records with `status`
    pub fn count(&self, status: MigrationStatus) -> usize {
        self.records.iter().filter(|r| r.status == status).count()
    }

    /// Records of positions that reached the destination
    pub fn migrated(&self) -> impl Iterator<Item = &MigrationRecord> + '_ {
        self.records
            .iter()
            .filter(|r| r.status == MigrationStatus::Migrated)
    }

    /// Total repayment still held in escrow
    pub fn escrowed(&self) -> FixedPoint {
        self.records
            .iter()
            .fold(FixedPoint::ZERO, |acc, r| acc.saturating_add(r.escrowed))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// MIGRATION COORDINATOR
// ═══════════════════════════════════════════════════════════════════════════════

/// Moves positions between two ledgers
#[derive(Debug, Clone)]
pub struct MigrationCoordinator {
    params: MigrationParams,
    /// Account that covers owners' repayment shortfalls
    treasury: OwnerId,
    /// Account holding repayments until the destination issues them back
    escrow: OwnerId,
}

impl MigrationCoordinator {
    /// Create a coordinator using the given treasury and escrow accounts
    pub fn new(params: MigrationParams, treasury: OwnerId, escrow: OwnerId) -> Self {
        Self {
            params,
            treasury,
            escrow,
        }
    }

    /// Migration parameters
    pub fn params(&self) -> &MigrationParams {
        &self.params
    }

    /// Treasury account
    pub fn treasury(&self) -> OwnerId {
        self.treasury
    }

    /// Escrow account
    pub fn escrow(&self) -> OwnerId {
        self.escrow
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // RUN
    // ═══════════════════════════════════════════════════════════════════════════

    /// Source positions in the configured traversal order
    pub fn plan(&self, source: &Ledger, price: FixedPoint) -> Result<Vec<PositionId>> {
        let mut ranked = source
            .index()
            .iter()
            .map(|(id, _)| source.current_icr(&id, price).map(|icr| (id, icr)))
            .collect::<Result<Vec<_>>>()?;

        match self.params.order {
            MigrationOrder::DescendingIcr => ranked.sort_by(|a, b| b.1.cmp(&a.1)),
            MigrationOrder::AscendingIcr => {
                ranked.reverse();
                ranked.sort_by(|a, b| a.1.cmp(&b.1));
            }
            MigrationOrder::Random => {
                let mut rng = match self.params.seed {
                    Some(seed) => StdRng::seed_from_u64(seed),
                    None => StdRng::from_entropy(),
                };
                ranked.shuffle(&mut rng);
            }
        }

        Ok(ranked.into_iter().map(|(id, _)| id).collect())
    }

    /// Migrate every active source position
    ///
    /// With `stop_on_failure`, the run ends at the first close or open
    /// failure and the report names the position to resume from.
    pub fn run(
        &self,
        source: &mut Ledger,
        destination: &mut Ledger,
        funding: &mut dyn FundingService,
        oracle: &dyn PriceOracle,
    ) -> Result<MigrationReport> {
        let price = oracle.price()?;
        let plan = self.plan(source, price)?;
        let mut report = MigrationReport::default();
        self.run_plan(source, destination, funding, price, plan, &mut report)?;
        self.log_finished(source, destination, &report);
        Ok(report)
    }

    /// Continue after an earlier run
    ///
    /// Repayments the `previous` report left in escrow are settled first: a
    /// failed open is retried with the recorded balances, and a pending
    /// issuance is paid out. The remaining active source positions are then
    /// migrated, skipping those `previous` already migrated or redeemed. A
    /// position whose close failed is simply visited again.
    pub fn resume(
        &self,
        source: &mut Ledger,
        destination: &mut Ledger,
        funding: &mut dyn FundingService,
        oracle: &dyn PriceOracle,
        previous: &MigrationReport,
    ) -> Result<MigrationReport> {
        let price = oracle.price()?;
        let mut report = MigrationReport::default();

        for pending in previous.records.iter().filter(|r| r.awaits_settlement()) {
            let hints = self.hints_for(destination);
            let record = self.settle(destination, funding, pending, price, hints)?;
            let failed = record.status.is_failure();
            report.records.push(record);
            if failed && self.params.stop_on_failure {
                report.resume_from = Some(pending.source_id);
                self.log_finished(source, destination, &report);
                return Ok(report);
            }
        }

        let visited: HashSet<PositionId> = previous
            .records
            .iter()
            .filter(|r| !r.status.is_failure())
            .map(|r| r.source_id)
            .collect();
        let plan = self
            .plan(source, price)?
            .into_iter()
            .filter(|id| !visited.contains(id))
            .collect();
        self.run_plan(source, destination, funding, price, plan, &mut report)?;
        self.log_finished(source, destination, &report);
        Ok(report)
    }

    fn run_plan(
        &self,
        source: &mut Ledger,
        destination: &mut Ledger,
        funding: &mut dyn FundingService,
        price: FixedPoint,
        plan: Vec<PositionId>,
        report: &mut MigrationReport,
    ) -> Result<()> {
        for id in plan {
            let hints = self.hints_for(destination);
            let record = self.migrate_position(source, destination, funding, &id, price, hints)?;
            let failed = record.status.is_failure();
            report.records.push(record);

            if failed && self.params.stop_on_failure {
                report.resume_from = Some(id);
                break;
            }
        }
        Ok(())
    }

    fn log_finished(&self, source: &Ledger, destination: &Ledger, report: &MigrationReport) {
        tracing::info!(
            source = source.name(),
            destination = destination.name(),
            order = %self.params.order,
            migrated = report.count(MigrationStatus::Migrated),
            redeemed = report.count(MigrationStatus::Redeemed),
            failed = report.count(MigrationStatus::CloseFailed) + report.count(MigrationStatus::OpenFailed),
            escrowed = %report.escrowed(),
            "Migration run finished"
        );
    }

    /// Insertion hints for the next destination position
    ///
    /// In descending order each new position is the weakest so far, and in
    /// ascending order the strongest. Random order leaves the destination
    /// to search.
    pub fn hints_for(&self, destination: &Ledger) -> Hints {
        match self.params.order {
            MigrationOrder::DescendingIcr => match destination.index().last() {
                Some(last) => Hints::upper(last),
                None => Hints::none(),
            },
            MigrationOrder::AscendingIcr => match destination.index().first() {
                Some(first) => Hints::lower(first),
                None => Hints::none(),
            },
            MigrationOrder::Random => Hints::none(),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // SINGLE POSITION
    // ═══════════════════════════════════════════════════════════════════════════

    /// Move one position from `source` to `destination`
    ///
    /// Business failures are reported in the record; only critical errors
    /// are returned as `Err`.
    pub fn migrate_position(
        &self,
        source: &mut Ledger,
        destination: &mut Ledger,
        funding: &mut dyn FundingService,
        id: &PositionId,
        price: FixedPoint,
        hints: Hints,
    ) -> Result<MigrationRecord> {
        let position = source
            .position(id)
            .ok_or_else(|| Error::PositionNotFound(id.to_hex()))?;
        let owner = position.owner;
        if !position.is_active() {
            tracing::debug!(position = %id.short(), "Position already closed");
            return Ok(MigrationRecord::new(*id, owner, MigrationStatus::AlreadyClosed));
        }

        source.apply_pending(id)?;
        let mut record = MigrationRecord::new(*id, owner, MigrationStatus::Migrated);
        if let Some(position) = source.position(id) {
            record.collateral = position.collateral;
            record.debt = position.debt;
        }

        let tcr_without = source.tcr_excluding(id, price)?;
        if tcr_without < self.params.safety_ratio {
            tracing::debug!(
                position = %id.short(),
                tcr_without = %tcr_without,
                "Source ratio below safety bound, treating position as redeemed"
            );
            record.status = MigrationStatus::Redeemed;
            return Ok(record);
        }

        // Close in the source
        let repayment = record.debt.saturating_sub(source.params().min_debt_reserve);
        let on_hand = funding.balance_of(&owner);
        if on_hand < repayment {
            let shortfall = repayment.checked_sub(on_hand)?;
            if let Err(e) = funding.transfer(&self.treasury, &owner, shortfall) {
                return self.fail(record, MigrationStatus::CloseFailed, e);
            }
            record.shortfall_covered = shortfall;
        }

        let closed = match source.close_position(id, price) {
            Ok(closed) => closed,
            Err(e) => {
                self.refund_shortfall(funding, &mut record);
                return self.fail(record, MigrationStatus::CloseFailed, e);
            }
        };
        self.escrow_repayment(funding, &mut record, closed.repayment)?;

        // Open in the destination
        self.open_and_issue(destination, funding, record, price, hints)
    }

    /// Settle a record that left its repayment in escrow
    fn settle(
        &self,
        destination: &mut Ledger,
        funding: &mut dyn FundingService,
        pending: &MigrationRecord,
        price: FixedPoint,
        hints: Hints,
    ) -> Result<MigrationRecord> {
        let mut record = pending.clone();
        record.error = None;

        if record.status == MigrationStatus::Migrated {
            self.issue(funding, &mut record)?;
            return Ok(record);
        }

        let held = funding.balance_of(&self.escrow);
        if held < record.escrowed {
            let e = Error::InsufficientBalance {
                account: self.escrow.short(),
                required: record.escrowed.to_string(),
                available: held.to_string(),
            };
            return self.fail(record, MigrationStatus::OpenFailed, e);
        }

        tracing::debug!(position = %record.source_id.short(), "Retrying destination open");
        record.status = MigrationStatus::Migrated;
        self.open_and_issue(destination, funding, record, price, hints)
    }

    fn open_and_issue(
        &self,
        destination: &mut Ledger,
        funding: &mut dyn FundingService,
        mut record: MigrationRecord,
        price: FixedPoint,
        hints: Hints,
    ) -> Result<MigrationRecord> {
        // Resolve the traversal hint to the exact destination slot
        let nicr = nominal_ratio(record.collateral, record.debt)?;
        let slot = destination.index().find_insert_position(nicr, &hints);
        tracing::trace!(
            position = %record.source_id.short(),
            hint_steps = ?slot.hint_steps,
            "Resolved destination slot"
        );
        let hints = Hints::new(slot.upper, slot.lower);

        let opened =
            destination.open_position(record.owner, record.collateral, record.debt, price, hints);
        let new_id = match opened {
            Ok(new_id) => new_id,
            Err(e) => return self.fail(record, MigrationStatus::OpenFailed, e),
        };
        record.destination_id = Some(new_id);
        self.issue(funding, &mut record)?;

        tracing::debug!(
            source = %record.source_id.short(),
            destination = %new_id.short(),
            collateral = %record.collateral,
            debt = %record.debt,
            "Migrated position"
        );
        Ok(record)
    }

    /// Move the owner's repayment into escrow after a committed close
    ///
    /// A recoverable failure leaves the repayment with the owner, so nothing
    /// is issued back on open.
    fn escrow_repayment(
        &self,
        funding: &mut dyn FundingService,
        record: &mut MigrationRecord,
        repayment: FixedPoint,
    ) -> Result<()> {
        if repayment.is_zero() {
            return Ok(());
        }
        match funding.transfer(&record.owner, &self.escrow, repayment) {
            Ok(()) => {
                record.escrowed = repayment;
                Ok(())
            }
            Err(e) if e.is_critical() => Err(e),
            Err(e) => {
                tracing::warn!(
                    position = %record.source_id.short(),
                    error = %e,
                    "Could not escrow repayment"
                );
                self.refund_shortfall(funding, record);
                Ok(())
            }
        }
    }

    /// Pay the escrowed repayment back to the owner
    ///
    /// A recoverable failure keeps the amount in escrow and on the record.
    fn issue(&self, funding: &mut dyn FundingService, record: &mut MigrationRecord) -> Result<()> {
        if record.escrowed.is_zero() {
            return Ok(());
        }
        match funding.transfer(&self.escrow, &record.owner, record.escrowed) {
            Ok(()) => {
                record.escrowed = FixedPoint::ZERO;
                Ok(())
            }
            Err(e) if e.is_critical() => Err(e),
            Err(e) => {
                tracing::warn!(
                    position = %record.source_id.short(),
                    escrowed = %record.escrowed,
                    error = %e,
                    "Issuance left in escrow"
                );
                record.error = Some(e.to_string());
                Ok(())
            }
        }
    }

    fn fail(
        &self,
        record: MigrationRecord,
        status: MigrationStatus,
        error: Error,
    ) -> Result<MigrationRecord> {
        if error.is_critical() {
            return Err(error);
        }
        tracing::warn!(
            position = %record.source_id.short(),
            status = ?status,
            error = %error,
            "Position migration failed"
        );
        Ok(record.failed(status, &error))
    }

    /// Return a shortfall advance after the close it funded failed
    fn refund_shortfall(&self, funding: &mut dyn FundingService, record: &mut MigrationRecord) {
        if record.shortfall_covered.is_zero() {
            return;
        }
        match funding.transfer(&record.owner, &self.treasury, record.shortfall_covered) {
            Ok(()) => record.shortfall_covered = FixedPoint::ZERO,
            Err(e) => tracing::warn!(
                owner = %record.owner.short(),
                error = %e,
                "Could not return shortfall advance to treasury"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::LedgerParams;
    use crate::core::position::PositionStatus;
    use crate::migration::funding::InMemoryFunding;
    use crate::oracle::FixedPriceOracle;

    fn fp(s: &str) -> FixedPoint {
        s.parse().unwrap()
    }

    fn params() -> LedgerParams {
        LedgerParams::default().with_debt_limits(fp("10"), fp("10"))
    }

    fn treasury() -> OwnerId {
        OwnerId::from_label("treasury")
    }

    fn escrow() -> OwnerId {
        OwnerId::from_label("escrow")
    }

    /// Source ledger with 1-collateral positions at price 1000; each owner
    /// holds the issued amount (debt less reserve)
    fn setup(debts: &[&str]) -> (Ledger, Ledger, InMemoryFunding, Vec<PositionId>) {
        let mut source = Ledger::new("source", params()).unwrap();
        let destination = Ledger::new("destination", params()).unwrap();
        let mut funding = InMemoryFunding::new();
        funding.mint(treasury(), fp("1000000")).unwrap();

        let mut ids = Vec::new();
        for (i, debt) in debts.iter().enumerate() {
            let owner = OwnerId::from_index(i as u64);
            let debt = fp(debt);
            ids.push(
                source
                    .open_position(owner, fp("1"), debt, fp("1000"), Hints::none())
                    .unwrap(),
            );
            funding.mint(owner, debt.checked_sub(fp("10")).unwrap()).unwrap();
        }
        (source, destination, funding, ids)
    }

    fn coordinator(order: MigrationOrder) -> MigrationCoordinator {
        let params = MigrationParams {
            order,
            seed: Some(7),
            ..MigrationParams::default()
        };
        MigrationCoordinator::new(params, treasury(), escrow())
    }

    #[test]
    fn test_migrate_single_position() {
        let (mut source, mut destination, mut funding, ids) = setup(&["100", "200"]);
        let coordinator = coordinator(MigrationOrder::DescendingIcr);

        let record = coordinator
            .migrate_position(&mut source, &mut destination, &mut funding, &ids[0], fp("1000"), Hints::none())
            .unwrap();

        assert_eq!(record.status, MigrationStatus::Migrated);
        assert_eq!(record.collateral, fp("1"));
        assert_eq!(record.debt, fp("100"));
        assert!(record.shortfall_covered.is_zero());
        assert_eq!(source.position(&ids[0]).unwrap().status, PositionStatus::Closed);

        let moved = destination.position(&record.destination_id.unwrap()).unwrap();
        assert_eq!(moved.debt, fp("100"));
        assert_eq!(funding.balance_of(&OwnerId::from_index(0)), fp("90"));
        assert!(funding.balance_of(&escrow()).is_zero());
    }

    #[test]
    fn test_shortfall_covered_by_treasury() {
        let (mut source, mut destination, mut funding, ids) = setup(&["100", "200"]);
        let owner = OwnerId::from_index(0);
        funding.transfer(&owner, &treasury(), fp("40")).unwrap();
        let coordinator = coordinator(MigrationOrder::DescendingIcr);

        let record = coordinator
            .migrate_position(&mut source, &mut destination, &mut funding, &ids[0], fp("1000"), Hints::none())
            .unwrap();

        assert_eq!(record.status, MigrationStatus::Migrated);
        assert_eq!(record.shortfall_covered, fp("40"));
        assert_eq!(funding.balance_of(&owner), fp("90"));
    }

    #[test]
    fn test_already_closed() {
        let (mut source, mut destination, mut funding, ids) = setup(&["100", "200"]);
        source.close_position(&ids[0], fp("1000")).unwrap();
        let coordinator = coordinator(MigrationOrder::DescendingIcr);

        let record = coordinator
            .migrate_position(&mut source, &mut destination, &mut funding, &ids[0], fp("1000"), Hints::none())
            .unwrap();
        assert_eq!(record.status, MigrationStatus::AlreadyClosed);
        assert!(destination.index().is_empty());
    }

    #[test]
    fn test_redeemed_when_source_ratio_low() {
        let (mut source, mut destination, mut funding, ids) = setup(&["100", "700"]);
        let coordinator = coordinator(MigrationOrder::DescendingIcr);

        // Without the strong position the source sits at 1000 / 700 < 1.5
        let record = coordinator
            .migrate_position(&mut source, &mut destination, &mut funding, &ids[0], fp("1000"), Hints::none())
            .unwrap();
        assert_eq!(record.status, MigrationStatus::Redeemed);
        assert!(source.position(&ids[0]).unwrap().is_active());
    }

    #[test]
    fn test_open_failure_keeps_earlier_migrations() {
        let (mut source, _, mut funding, ids) = setup(&["100", "200"]);
        // Destination demands more debt than either position carries
        let strict = LedgerParams::default().with_debt_limits(fp("10"), fp("500"));
        let mut destination = Ledger::new("destination", strict).unwrap();
        let coordinator = coordinator(MigrationOrder::DescendingIcr);
        let oracle = FixedPriceOracle::new(fp("1000"));

        let report = coordinator
            .run(&mut source, &mut destination, &mut funding, &oracle)
            .unwrap();

        assert_eq!(report.records.len(), 1);
        assert_eq!(report.records[0].status, MigrationStatus::OpenFailed);
        assert!(report.records[0].error.is_some());
        assert_eq!(report.resume_from, Some(ids[0]));
        // The repayment waits in escrow
        assert_eq!(report.records[0].escrowed, fp("90"));
        assert!(report.records[0].awaits_settlement());
        assert_eq!(funding.balance_of(&escrow()), fp("90"));
    }

    #[test]
    fn test_resume_retries_failed_open() {
        let mut source = Ledger::new("source", params()).unwrap();
        let mut destination = Ledger::new("destination", params()).unwrap();
        let mut funding = InMemoryFunding::new();
        let weak = source
            .open_position(OwnerId::from_index(0), fp("1"), fp("600"), fp("1000"), Hints::none())
            .unwrap();
        let strong = source
            .open_position(OwnerId::from_index(1), fp("10"), fp("100"), fp("1000"), Hints::none())
            .unwrap();
        funding.mint(OwnerId::from_index(0), fp("590")).unwrap();
        funding.mint(OwnerId::from_index(1), fp("90")).unwrap();
        let coordinator = coordinator(MigrationOrder::AscendingIcr);

        // At 800 the weak position (ICR 1.33) would drag the empty
        // destination below the critical ratio
        let mut oracle = FixedPriceOracle::new(fp("800"));
        let stopped = coordinator
            .run(&mut source, &mut destination, &mut funding, &oracle)
            .unwrap();
        assert_eq!(stopped.records.len(), 1);
        assert_eq!(stopped.records[0].status, MigrationStatus::OpenFailed);
        assert_eq!(stopped.resume_from, Some(weak));
        assert_eq!(source.position(&weak).unwrap().status, PositionStatus::Closed);
        assert_eq!(funding.balance_of(&escrow()), fp("590"));

        oracle.set_price(fp("1000")).unwrap();
        let resumed = coordinator
            .resume(&mut source, &mut destination, &mut funding, &oracle, &stopped)
            .unwrap();

        assert_eq!(resumed.count(MigrationStatus::Migrated), 2);
        assert_eq!(resumed.records[0].source_id, weak);
        assert_eq!(resumed.records[1].source_id, strong);
        assert!(resumed.records.iter().all(|r| r.escrowed.is_zero()));
        assert!(resumed.resume_from.is_none());

        let moved = destination.position(&resumed.records[0].destination_id.unwrap()).unwrap();
        assert_eq!(moved.collateral, fp("1"));
        assert_eq!(moved.debt, fp("600"));
        assert_eq!(funding.balance_of(&OwnerId::from_index(0)), fp("590"));
        assert!(funding.balance_of(&escrow()).is_zero());
        assert_eq!(source.active_count(), 0);
        destination.check_invariants().unwrap();
    }

    #[test]
    fn test_resume_skips_settled_positions() {
        let (mut source, mut destination, mut funding, ids) = setup(&["100", "700"]);
        // An anchor keeps the destination clear of the empty-ledger ratio check
        destination
            .open_position(OwnerId::from_label("anchor"), fp("10"), fp("100"), fp("1000"), Hints::none())
            .unwrap();
        let coordinator = coordinator(MigrationOrder::DescendingIcr);
        let oracle = FixedPriceOracle::new(fp("1000"));

        let first = coordinator
            .run(&mut source, &mut destination, &mut funding, &oracle)
            .unwrap();
        assert_eq!(first.records[0].status, MigrationStatus::Redeemed);
        assert_eq!(first.records[1].status, MigrationStatus::Migrated);

        // Only the redeemed position is still active, and it was settled
        let second = coordinator
            .resume(&mut source, &mut destination, &mut funding, &oracle, &first)
            .unwrap();
        assert!(second.records.is_empty());
        assert!(source.position(&ids[0]).unwrap().is_active());
    }

    /// Balance book that refuses transfers out of one account
    struct FrozenAccount {
        inner: InMemoryFunding,
        frozen: Option<OwnerId>,
    }

    impl FundingService for FrozenAccount {
        fn transfer(&mut self, from: &OwnerId, to: &OwnerId, amount: FixedPoint) -> Result<()> {
            if self.frozen == Some(*from) {
                return Err(Error::InsufficientBalance {
                    account: from.short(),
                    required: amount.to_string(),
                    available: "frozen".into(),
                });
            }
            self.inner.transfer(from, to, amount)
        }

        fn balance_of(&self, account: &OwnerId) -> FixedPoint {
            self.inner.balance_of(account)
        }
    }

    #[test]
    fn test_failed_issuance_stays_in_escrow() {
        let (mut source, mut destination, funding, ids) = setup(&["100", "200"]);
        let mut funding = FrozenAccount {
            inner: funding,
            frozen: Some(escrow()),
        };
        let coordinator = coordinator(MigrationOrder::DescendingIcr);
        let oracle = FixedPriceOracle::new(fp("1000"));

        let report = coordinator
            .run(&mut source, &mut destination, &mut funding, &oracle)
            .unwrap();
        assert_eq!(report.count(MigrationStatus::Migrated), 2);
        assert_eq!(report.records[0].source_id, ids[0]);
        assert_eq!(report.records[0].escrowed, fp("90"));
        assert!(report.records[0].error.is_some());
        assert_eq!(report.escrowed(), fp("280"));
        assert_eq!(funding.balance_of(&escrow()), fp("280"));

        funding.frozen = None;
        let settled = coordinator
            .resume(&mut source, &mut destination, &mut funding, &oracle, &report)
            .unwrap();
        assert_eq!(settled.count(MigrationStatus::Migrated), 2);
        assert!(settled.escrowed().is_zero());
        assert!(funding.balance_of(&escrow()).is_zero());
        assert_eq!(funding.balance_of(&OwnerId::from_index(1)), fp("190"));
        assert_eq!(destination.active_count(), 2);
    }

    #[test]
    fn test_run_descending_preserves_order() {
        let (mut source, mut destination, mut funding, _) = setup(&["100", "300", "200", "250"]);
        let source_order: Vec<OwnerId> = source.active_positions().map(|p| p.owner).collect();
        let coordinator = coordinator(MigrationOrder::DescendingIcr);
        let oracle = FixedPriceOracle::new(fp("1000"));

        let report = coordinator
            .run(&mut source, &mut destination, &mut funding, &oracle)
            .unwrap();

        assert_eq!(report.count(MigrationStatus::Migrated), 4);
        assert!(report.resume_from.is_none());
        let destination_order: Vec<OwnerId> =
            destination.active_positions().map(|p| p.owner).collect();
        assert_eq!(destination_order, source_order);
        assert_eq!(source.active_count(), 0);
        destination.check_invariants().unwrap();
    }

    #[test]
    fn test_plan_orders() {
        let (source, _, _, ids) = setup(&["100", "300", "200"]);
        let price = fp("1000");

        let desc = coordinator(MigrationOrder::DescendingIcr).plan(&source, price).unwrap();
        assert_eq!(desc, vec![ids[0], ids[2], ids[1]]);

        let asc = coordinator(MigrationOrder::AscendingIcr).plan(&source, price).unwrap();
        assert_eq!(asc, vec![ids[1], ids[2], ids[0]]);

        let first = coordinator(MigrationOrder::Random).plan(&source, price).unwrap();
        let second = coordinator(MigrationOrder::Random).plan(&source, price).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 3);
    }
}
