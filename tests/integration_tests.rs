//! Integration tests for the position ledger.
//!
//! These tests drive the engines end to end through the public API.

use cdp_ledger::core::ledger::RedemptionEffect;
use cdp_ledger::prelude::*;
use cdp_ledger::redemption::engine::RedemptionHalt;

use std::thread;

// ═══════════════════════════════════════════════════════════════════════════════
// TEST HELPERS
// ═══════════════════════════════════════════════════════════════════════════════

fn fp(s: &str) -> FixedPoint {
    s.parse().unwrap()
}

fn owner(n: u64) -> OwnerId {
    OwnerId::from_index(n)
}

fn treasury() -> OwnerId {
    OwnerId::from_label("treasury")
}

fn escrow() -> OwnerId {
    OwnerId::from_label("escrow")
}

/// Params without a reserve so redemptions can empty a position
fn no_reserve_params() -> LedgerParams {
    LedgerParams::default().with_debt_limits(FixedPoint::ZERO, fp("50"))
}

fn migration_params() -> LedgerParams {
    LedgerParams::default().with_debt_limits(fp("10"), fp("10"))
}

/// Open `(collateral, debt)` positions in order at `price`
fn open_all(ledger: &mut Ledger, specs: &[(&str, &str)], price: FixedPoint) -> Vec<PositionId> {
    specs
        .iter()
        .enumerate()
        .map(|(i, (collateral, debt))| {
            ledger
                .open_position(owner(i as u64), fp(collateral), fp(debt), price, Hints::none())
                .unwrap()
        })
        .collect()
}

/// Give every source owner the amount issued against their position
fn fund_owners(ledger: &Ledger, funding: &mut InMemoryFunding) {
    let reserve = ledger.params().min_debt_reserve;
    for position in ledger.active_positions() {
        let issued = position.debt.checked_sub(reserve).unwrap();
        if !issued.is_zero() {
            funding.mint(position.owner, issued).unwrap();
        }
    }
}

fn coordinator(order: MigrationOrder, stop_on_failure: bool) -> MigrationCoordinator {
    let params = MigrationParams {
        order,
        stop_on_failure,
        seed: Some(42),
        ..MigrationParams::default()
    };
    MigrationCoordinator::new(params, treasury(), escrow())
}

// ═══════════════════════════════════════════════════════════════════════════════
// POSITION LIFECYCLE TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_open_adjust_close_lifecycle() {
    let mut ledger = Ledger::new("lifecycle", LedgerParams::default()).unwrap();
    let price = fp("1000");

    let anchor = ledger
        .open_position(owner(0), fp("20"), fp("2000"), price, Hints::none())
        .unwrap();
    let id = ledger
        .open_position(owner(1), fp("5"), fp("2000"), price, Hints::none())
        .unwrap();
    assert_eq!(ledger.current_icr(&id, price).unwrap(), fp("2.5"));
    assert_eq!(ledger.index().last(), Some(id));

    ledger
        .adjust_position(
            &id,
            BalanceChange::Increase(fp("1")),
            BalanceChange::Increase(fp("400")),
            price,
            Hints::none(),
        )
        .unwrap();
    let position = ledger.position(&id).unwrap();
    assert_eq!(position.collateral, fp("6"));
    assert_eq!(position.debt, fp("2400"));

    let closed = ledger.close_position(&id, price).unwrap();
    assert_eq!(closed.collateral, fp("6"));
    assert_eq!(closed.repayment, fp("2200"));
    assert_eq!(ledger.position(&id).unwrap().status, PositionStatus::Closed);
    assert_eq!(ledger.index().first(), Some(anchor));
    assert_eq!(ledger.totals().total_collateral, fp("20"));
    ledger.check_invariants().unwrap();
}

#[test]
fn test_failed_operation_leaves_ledger_untouched() {
    let mut ledger = Ledger::new("atomic", LedgerParams::default()).unwrap();
    let price = fp("1000");
    let id = ledger
        .open_position(owner(0), fp("5"), fp("2000"), price, Hints::none())
        .unwrap();
    let before = ledger.to_bytes().unwrap();

    // 2.3 collateral against 2000 debt would drag the ledger into recovery mode
    let result = ledger.adjust_position(
        &id,
        BalanceChange::Decrease(fp("2.7")),
        BalanceChange::Unchanged,
        price,
        Hints::none(),
    );
    assert!(matches!(result, Err(Error::RecoveryMode(_))));
    assert_eq!(ledger.to_bytes().unwrap(), before);
}

// ═══════════════════════════════════════════════════════════════════════════════
// LIQUIDATION TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_redistribution_spreads_deficit_over_stakes() {
    let mut ledger = Ledger::new("redistribution", LedgerParams::default()).unwrap();
    let mut oracle = FixedPriceOracle::new(fp("10000"));
    let price = oracle.price().unwrap();

    // An empty ledger rejects an open below the critical ratio
    let rejected = ledger.open_position(owner(99), fp("1"), fp("8000"), price, Hints::none());
    assert!(matches!(rejected, Err(Error::RecoveryMode(_))));

    let healthy: Vec<PositionId> = (0..9)
        .map(|i| {
            ledger
                .open_position(owner(i), fp("1"), fp("2000"), price, Hints::none())
                .unwrap()
        })
        .collect();
    let weak = ledger
        .open_position(owner(99), fp("1"), fp("8000"), price, Hints::none())
        .unwrap();
    for id in healthy.iter().chain(std::iter::once(&weak)) {
        assert_eq!(ledger.position(id).unwrap().stake, fp("1"));
    }

    oracle.set_price(fp("8500")).unwrap();
    let mut engine = LiquidationEngine::new();
    let event = engine
        .liquidate_position(&mut ledger, &weak, &oracle, &mut NoBackstop)
        .unwrap();

    assert!(event.debt_offset.is_zero());
    assert_eq!(event.debt_redistributed, fp("8000"));
    assert_eq!(event.collateral_redistributed, fp("1"));
    assert_eq!(ledger.totals().total_stake, fp("9"));
    assert_eq!(ledger.accumulator().collateral, fp("1"));
    assert_eq!(ledger.accumulator().debt, fp("8000"));
    assert_eq!(ledger.totals().total_collateral, fp("10"));
    assert_eq!(ledger.totals().total_debt, fp("26000"));
    assert_eq!(ledger.position(&weak).unwrap().status, PositionStatus::Liquidated);

    // Surviving positions each carry a ninth, before anyone touches them
    let share_coll = fp("1").checked_div(fp("9")).unwrap();
    let share_debt = fp("8000").checked_div(fp("9")).unwrap();
    let entire = ledger.entire_debt_and_coll(&healthy[0]).unwrap();
    let expected_coll = fp("1").checked_add(share_coll).unwrap();
    let expected_debt = fp("2000").checked_add(share_debt).unwrap();
    assert!(entire.collateral.abs_diff(expected_coll) <= FixedPoint::from_raw(10));
    assert!(entire.debt.abs_diff(expected_debt) <= FixedPoint::from_raw(10_000));
    ledger.check_invariants().unwrap();

    for id in &healthy {
        ledger.apply_pending(id).unwrap();
    }
    assert!(ledger.accumulator().collateral <= FixedPoint::from_raw(100));
    assert!(ledger.accumulator().debt <= FixedPoint::from_raw(100_000));
    ledger.check_invariants().unwrap();
}

#[test]
fn test_liquidated_deficit_lands_on_survivor() {
    let mut ledger = Ledger::new("survivor", no_reserve_params()).unwrap();
    let mut oracle = FixedPriceOracle::new(fp("1000"));
    let ids = open_all(&mut ledger, &[("0.2", "100"), ("10", "100")], fp("1000"));
    assert_eq!(ledger.current_icr(&ids[0], fp("1000")).unwrap(), fp("2"));

    oracle.set_price(fp("400")).unwrap();
    assert_eq!(ledger.current_icr(&ids[0], fp("400")).unwrap(), fp("0.8"));

    let mut engine = LiquidationEngine::new();
    let report = engine
        .liquidate_batch(&mut ledger, &oracle, &mut NoBackstop, 10)
        .unwrap();

    assert_eq!(report.liquidated_count(), 1);
    assert_eq!(report.halt, HaltReason::NoneEligible);
    assert!(!report.is_partial());

    // The scan already touched the survivor
    let survivor = ledger.position(&ids[1]).unwrap();
    assert_eq!(survivor.collateral, fp("10.2"));
    assert_eq!(survivor.debt, fp("200"));
    assert!(ledger.accumulator().collateral.is_zero());
    assert!(ledger.accumulator().debt.is_zero());
    ledger.check_invariants().unwrap();
}

#[test]
fn test_liquidation_stops_at_last_position() {
    let params = LedgerParams::default().with_debt_limits(FixedPoint::ZERO, fp("1"));
    let mut ledger = Ledger::new("last", params).unwrap();
    let mut oracle = FixedPriceOracle::new(fp("400"));
    let ids = open_all(&mut ledger, &[("1", "100"), ("1", "150"), ("1", "200")], fp("400"));

    oracle.set_price(fp("50")).unwrap();
    assert!(ledger.is_recovery_mode(fp("50")).unwrap());

    let mut engine = LiquidationEngine::new();
    let report = engine
        .liquidate_batch(&mut ledger, &oracle, &mut NoBackstop, 10)
        .unwrap();

    assert_eq!(report.liquidated_count(), 2);
    assert_eq!(report.halt, HaltReason::LastPositionProtected);
    let liquidated: Vec<PositionId> = report.events().map(|e| e.position_id).collect();
    assert_eq!(liquidated, vec![ids[2], ids[1]]);
    assert!(report.events().all(|e| e.recovery_mode));

    let last = ledger.position(&ids[0]).unwrap();
    assert_eq!(last.collateral, fp("3"));
    assert_eq!(last.debt, fp("450"));
    assert_eq!(ledger.active_count(), 1);

    assert_eq!(
        engine.liquidate_batch(&mut ledger, &oracle, &mut NoBackstop, 10).unwrap_err(),
        Error::LastPositionProtected
    );
    assert_eq!(
        engine
            .liquidate_position(&mut ledger, &ids[0], &oracle, &mut NoBackstop)
            .unwrap_err(),
        Error::LastPositionProtected
    );
    assert_eq!(engine.stats().total_liquidations, 2);
    ledger.check_invariants().unwrap();
}

#[test]
fn test_stability_pool_offsets_before_redistribution() {
    let params = LedgerParams::default().with_debt_limits(FixedPoint::ZERO, fp("1"));
    let mut ledger = Ledger::new("mixed", params).unwrap();
    let mut oracle = FixedPriceOracle::new(fp("400"));
    let ids = open_all(&mut ledger, &[("1", "100"), ("1", "300")], fp("400"));

    let mut pool = StabilityPool::new();
    pool.deposit(OwnerId::from_label("depositor"), fp("100")).unwrap();

    oracle.set_price(fp("300")).unwrap();
    assert!(!ledger.is_recovery_mode(fp("300")).unwrap());

    let mut engine = LiquidationEngine::new();
    let event = engine
        .liquidate_position(&mut ledger, &ids[1], &oracle, &mut pool)
        .unwrap();

    assert_eq!(event.debt_offset, fp("100"));
    assert_eq!(event.debt_redistributed, fp("200"));
    assert!(!event.fully_offset());
    assert_eq!(
        event.collateral_offset.checked_add(event.collateral_redistributed).unwrap(),
        fp("1")
    );
    assert_eq!(event.collateral_offset, fp("1").mul_div(fp("100"), fp("300")).unwrap());
    assert!(pool.total_deposits().is_zero());
    assert_eq!(pool.total_collateral(), event.collateral_offset);

    let survivor = ledger.entire_debt_and_coll(&ids[0]).unwrap();
    assert_eq!(survivor.debt, fp("300"));
    assert_eq!(
        survivor.collateral,
        fp("1").checked_add(event.collateral_redistributed).unwrap()
    );
    ledger.check_invariants().unwrap();
}

#[test]
fn test_liquidation_budget_is_resumable() {
    let params = LedgerParams::default().with_debt_limits(FixedPoint::ZERO, fp("1"));
    let mut ledger = Ledger::new("budget", params).unwrap();
    let mut oracle = FixedPriceOracle::new(fp("400"));
    open_all(
        &mut ledger,
        &[("20", "100"), ("1", "300"), ("1", "310"), ("1", "320")],
        fp("400"),
    );

    oracle.set_price(fp("300")).unwrap();
    let mut engine = LiquidationEngine::new();

    let first = engine
        .liquidate_batch(&mut ledger, &oracle, &mut NoBackstop, 2)
        .unwrap();
    assert_eq!(first.liquidated_count(), 2);
    assert!(first.is_partial());

    let second = engine
        .liquidate_batch(&mut ledger, &oracle, &mut NoBackstop, 10)
        .unwrap();
    assert_eq!(second.liquidated_count(), 1);
    assert_eq!(second.halt, HaltReason::NoneEligible);
    assert_eq!(ledger.active_count(), 1);
    ledger.check_invariants().unwrap();
}

// ═══════════════════════════════════════════════════════════════════════════════
// REDEMPTION TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_redeem_exact_debt_closes_position() {
    let mut ledger = Ledger::new("redeem", no_reserve_params()).unwrap();
    let price = fp("1000");
    let ids = open_all(&mut ledger, &[("1", "500"), ("3", "500")], price);

    let mut engine = RedemptionEngine::new();
    let report = engine.redeem(&mut ledger, fp("500"), price, 10).unwrap();

    assert_eq!(report.halt, RedemptionHalt::Fulfilled);
    assert_eq!(report.closed_count(), 1);
    assert_eq!(report.partials[0].position_id, ids[0]);
    assert_eq!(report.total_collateral_paid, fp("0.5"));
    assert!(report.remaining.is_zero());
    assert_eq!(
        report.partials[0].effect,
        RedemptionEffect::Closed { surplus: fp("0.5") }
    );

    assert_eq!(ledger.index().len(), 1);
    assert_eq!(ledger.position(&ids[0]).unwrap().status, PositionStatus::Redeemed);
    assert_eq!(ledger.surplus_of(&owner(0)), fp("0.5"));
    assert_eq!(ledger.claim_surplus(&owner(0)).unwrap(), fp("0.5"));
    assert!(ledger.surplus_of(&owner(0)).is_zero());
    ledger.check_invariants().unwrap();
}

#[test]
fn test_redeem_down_to_reserve() {
    let params = LedgerParams::default().with_debt_limits(fp("200"), fp("50"));
    let mut ledger = Ledger::new("reserve", params).unwrap();
    let price = fp("1000");
    // The weak position cannot open into an empty ledger
    let strong = ledger
        .open_position(owner(1), fp("3"), fp("700"), price, Hints::none())
        .unwrap();
    let weak = ledger
        .open_position(owner(0), fp("1"), fp("700"), price, Hints::none())
        .unwrap();

    let mut engine = RedemptionEngine::new();
    let report = engine.redeem(&mut ledger, fp("500"), price, 10).unwrap();

    assert_eq!(report.closed_count(), 1);
    assert_eq!(report.partials[0].position_id, weak);
    assert_eq!(ledger.surplus_of(&owner(0)), fp("0.5"));
    assert_eq!(ledger.totals().total_debt, fp("700"));
    assert_eq!(ledger.index().first(), Some(strong));
    ledger.check_invariants().unwrap();
}

#[test]
fn test_partial_redemption_reorders_index() {
    let params = LedgerParams::default().with_debt_limits(fp("200"), fp("50"));
    let mut ledger = Ledger::new("partial", params).unwrap();
    let price = fp("1000");
    let strong = ledger
        .open_position(owner(1), fp("3"), fp("700"), price, Hints::none())
        .unwrap();
    let weak = ledger
        .open_position(owner(0), fp("1"), fp("700"), price, Hints::none())
        .unwrap();

    let mut engine = RedemptionEngine::new();
    let report = engine.redeem(&mut ledger, fp("300"), price, 10).unwrap();

    assert_eq!(report.halt, RedemptionHalt::Fulfilled);
    assert_eq!(report.closed_count(), 0);
    assert_eq!(
        report.partials[0].effect,
        RedemptionEffect::Partial {
            collateral: fp("0.7"),
            debt: fp("400"),
        }
    );
    assert_eq!(ledger.index().last(), Some(weak));
    assert_eq!(ledger.index().first(), Some(strong));
    assert_eq!(engine.stats().total_debt_redeemed, fp("300"));
    ledger.check_invariants().unwrap();
}

#[test]
fn test_redemption_visits_neighbour_after_reward_moves_position() {
    let mut ledger = Ledger::new("cursor", no_reserve_params()).unwrap();
    let ids = open_all(
        &mut ledger,
        &[("100", "1000"), ("1", "800"), ("1", "900"), ("1", "899.5")],
        fp("1000"),
    );
    let (liquidated, weakest, neighbour) = (ids[1], ids[2], ids[3]);
    assert_eq!(ledger.index().last(), Some(weakest));
    assert_eq!(ledger.index().prev(&weakest), Some(neighbour));

    // Redistributing a stronger position lifts the weakest position's
    // ratio past its neighbour once the reward is applied
    let oracle = FixedPriceOracle::new(fp("850"));
    LiquidationEngine::new()
        .liquidate_position(&mut ledger, &liquidated, &oracle, &mut NoBackstop)
        .unwrap();

    let mut engine = RedemptionEngine::new();
    let report = engine.redeem(&mut ledger, fp("1000"), fp("2000"), 10).unwrap();

    assert_eq!(report.halt, RedemptionHalt::Fulfilled);
    assert_eq!(report.partials.len(), 2);
    assert_eq!(report.partials[0].position_id, weakest);
    assert!(matches!(report.partials[0].effect, RedemptionEffect::Closed { .. }));
    assert_eq!(report.partials[1].position_id, neighbour);
    assert!(matches!(report.partials[1].effect, RedemptionEffect::Partial { .. }));
    assert_eq!(ledger.position(&ids[0]).unwrap().debt, fp("1000"));
    ledger.check_invariants().unwrap();
}

// ═══════════════════════════════════════════════════════════════════════════════
// MIGRATION TESTS
// ═══════════════════════════════════════════════════════════════════════════════

fn migration_source(count: u64) -> (Ledger, InMemoryFunding) {
    let mut source = Ledger::new("source", migration_params()).unwrap();
    let price = fp("1000");
    for i in 0..count {
        let debt = FixedPoint::from_integer(100 + 13 * i);
        source
            .open_position(owner(i), fp("1"), debt, price, Hints::none())
            .unwrap();
    }
    let mut funding = InMemoryFunding::new();
    funding.mint(treasury(), fp("1000000")).unwrap();
    fund_owners(&source, &mut funding);
    (source, funding)
}

#[test]
fn test_descending_migration_preserves_order() {
    let (mut source, mut funding) = migration_source(20);
    let mut destination = Ledger::new("destination", migration_params()).unwrap();
    let source_order: Vec<OwnerId> = source.active_positions().map(|p| p.owner).collect();
    let oracle = FixedPriceOracle::new(fp("1000"));

    let report = coordinator(MigrationOrder::DescendingIcr, true)
        .run(&mut source, &mut destination, &mut funding, &oracle)
        .unwrap();

    assert_eq!(report.count(MigrationStatus::Migrated), 20);
    assert!(report.resume_from.is_none());
    assert_eq!(source.active_count(), 0);

    let destination_order: Vec<OwnerId> =
        destination.active_positions().map(|p| p.owner).collect();
    assert_eq!(destination_order, source_order);
    assert!(funding.balance_of(&escrow()).is_zero());
    assert!(funding.verify_supply_invariant());
    destination.check_invariants().unwrap();
}

#[test]
fn test_migration_between_ledgers_with_different_reserves() {
    let (mut source, mut funding) = migration_source(3);
    let smaller_reserve = LedgerParams::default().with_debt_limits(fp("5"), fp("10"));
    let mut destination = Ledger::new("destination", smaller_reserve).unwrap();
    let oracle = FixedPriceOracle::new(fp("1000"));

    let report = coordinator(MigrationOrder::DescendingIcr, true)
        .run(&mut source, &mut destination, &mut funding, &oracle)
        .unwrap();

    assert_eq!(report.count(MigrationStatus::Migrated), 3);
    assert!(report.resume_from.is_none());
    assert!(report.escrowed().is_zero());
    assert_eq!(source.active_count(), 0);
    assert_eq!(destination.active_count(), 3);

    // Each owner gets back exactly what they repaid and the treasury is untouched
    for i in 0..3 {
        let issued = FixedPoint::from_integer(90 + 13 * i);
        assert_eq!(funding.balance_of(&owner(i)), issued);
    }
    assert_eq!(funding.balance_of(&treasury()), fp("1000000"));
    assert!(funding.balance_of(&escrow()).is_zero());
    destination.check_invariants().unwrap();
}

#[test]
fn test_random_migration_reaches_same_order() {
    let (mut source, mut funding) = migration_source(12);
    let mut destination = Ledger::new("destination", migration_params()).unwrap();
    let source_order: Vec<OwnerId> = source.active_positions().map(|p| p.owner).collect();
    let oracle = FixedPriceOracle::new(fp("1000"));

    let report = coordinator(MigrationOrder::Random, true)
        .run(&mut source, &mut destination, &mut funding, &oracle)
        .unwrap();

    assert_eq!(report.count(MigrationStatus::Migrated), 12);
    let destination_order: Vec<OwnerId> =
        destination.active_positions().map(|p| p.owner).collect();
    assert_eq!(destination_order, source_order);
    destination.check_invariants().unwrap();
}

#[test]
fn test_migration_resumes_after_close_failure() {
    let mut source = Ledger::new("source", migration_params()).unwrap();
    let mut destination = Ledger::new("destination", migration_params()).unwrap();
    let ids = open_all(&mut source, &[("1", "600"), ("1", "100")], fp("1000"));
    let mut funding = InMemoryFunding::new();
    funding.mint(treasury(), fp("1000000")).unwrap();
    fund_owners(&source, &mut funding);

    let mut oracle = FixedPriceOracle::new(fp("500"));
    assert!(source.is_recovery_mode(fp("500")).unwrap());
    let coordinator = coordinator(MigrationOrder::AscendingIcr, true);

    let stopped = coordinator
        .run(&mut source, &mut destination, &mut funding, &oracle)
        .unwrap();
    assert_eq!(stopped.records.len(), 1);
    assert_eq!(stopped.records[0].status, MigrationStatus::CloseFailed);
    assert_eq!(stopped.resume_from, Some(ids[0]));
    assert_eq!(source.active_count(), 2);
    assert!(destination.index().is_empty());

    oracle.set_price(fp("1000")).unwrap();
    let resumed = coordinator
        .resume(&mut source, &mut destination, &mut funding, &oracle, &stopped)
        .unwrap();
    assert_eq!(resumed.count(MigrationStatus::Migrated), 2);
    assert_eq!(resumed.records[0].source_id, ids[0]);
    assert_eq!(source.active_count(), 0);
    assert_eq!(destination.active_count(), 2);
    destination.check_invariants().unwrap();
}

#[test]
fn test_migration_continues_past_failures() {
    let mut source = Ledger::new("source", migration_params()).unwrap();
    let mut destination = Ledger::new("destination", migration_params()).unwrap();
    let price = fp("1000");
    // The weak position cannot open into an empty ledger
    let strong = source
        .open_position(owner(1), fp("1"), fp("100"), price, Hints::none())
        .unwrap();
    let weak = source
        .open_position(owner(0), fp("1"), fp("700"), price, Hints::none())
        .unwrap();

    let mut funding = InMemoryFunding::new();
    funding.mint(treasury(), fp("1000000")).unwrap();
    fund_owners(&source, &mut funding);
    // The weak owner spent their issuance; the treasury advances it
    funding
        .transfer(&owner(0), &OwnerId::from_label("merchant"), fp("690"))
        .unwrap();

    let oracle = FixedPriceOracle::new(fp("550"));
    let report = coordinator(MigrationOrder::AscendingIcr, false)
        .run(&mut source, &mut destination, &mut funding, &oracle)
        .unwrap();

    assert_eq!(report.records.len(), 2);
    assert_eq!(report.records[0].source_id, weak);
    assert_eq!(report.records[0].status, MigrationStatus::CloseFailed);
    assert!(report.records[0].error.is_some());
    assert_eq!(report.records[1].source_id, strong);
    assert_eq!(report.records[1].status, MigrationStatus::Redeemed);
    assert!(report.resume_from.is_none());

    // The advance for the failed close went back to the treasury
    assert_eq!(funding.balance_of(&treasury()), fp("1000000"));
    assert!(funding.balance_of(&owner(0)).is_zero());
    assert_eq!(source.active_count(), 2);
}

// ═══════════════════════════════════════════════════════════════════════════════
// REPORTING TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_report_tracks_cumulative_counters() {
    let mut ledger = Ledger::new("report", no_reserve_params()).unwrap();
    let mut oracle = FixedPriceOracle::new(fp("1000"));
    let mut cumulative = Cumulative::default();
    for (i, (collateral, debt)) in [("0.2", "100"), ("10", "100")].into_iter().enumerate() {
        let price = oracle.price().unwrap();
        ledger
            .open_position(owner(i as u64), fp(collateral), fp(debt), price, Hints::none())
            .unwrap();
        cumulative.record_added(fp(collateral)).unwrap();
    }

    oracle.set_price(fp("400")).unwrap();
    let report = LiquidationEngine::new()
        .liquidate_batch(&mut ledger, &oracle, &mut NoBackstop, 10)
        .unwrap();
    cumulative.record_liquidation(&report).unwrap();

    let record = ReportRecord::capture(
        1,
        &ledger,
        oracle.price().unwrap(),
        FixedPoint::ONE,
        FixedPoint::ZERO,
        &cumulative,
    )
    .unwrap();
    assert_eq!(record.num_positions, 1);
    assert_eq!(record.cumulative_added, fp("10.2"));
    assert_eq!(record.cumulative_liquidated, fp("0.2"));
    assert_eq!(record.total_collateral, fp("10.2"));
    assert_eq!(record.weakest_icr, Some(fp("20.4")));
}

// ═══════════════════════════════════════════════════════════════════════════════
// SHARED ACCESS AND PERSISTENCE TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_shared_ledger_across_threads() {
    let shared = SharedLedger::new(Ledger::new("shared", LedgerParams::default()).unwrap());
    let price = fp("10000");

    let handles: Vec<_> = (0..4u64)
        .map(|t| {
            let shared = shared.clone();
            thread::spawn(move || {
                for i in 0..5u64 {
                    shared
                        .with_mut(|ledger| {
                            ledger.open_position(
                                owner(t * 100 + i),
                                FixedPoint::from_integer(1),
                                FixedPoint::from_integer(2000),
                                price,
                                Hints::none(),
                            )
                        })
                        .unwrap()
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let (count, invariants) = shared
        .with(|ledger| (ledger.active_count(), ledger.check_invariants()))
        .unwrap();
    assert_eq!(count, 20);
    invariants.unwrap();
}

#[test]
fn test_ledger_snapshot_on_disk() {
    let mut ledger = Ledger::new("disk", no_reserve_params()).unwrap();
    let mut oracle = FixedPriceOracle::new(fp("1000"));
    open_all(&mut ledger, &[("0.2", "100"), ("10", "100"), ("5", "100")], fp("1000"));
    oracle.set_price(fp("400")).unwrap();
    LiquidationEngine::new()
        .liquidate_batch(&mut ledger, &oracle, &mut NoBackstop, 1)
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.bin");
    std::fs::write(&path, ledger.to_bytes().unwrap()).unwrap();

    let restored = Ledger::from_bytes(&std::fs::read(&path).unwrap()).unwrap();
    assert_eq!(restored.totals(), ledger.totals());
    assert_eq!(restored.accumulator(), ledger.accumulator());
    let order: Vec<PositionId> = restored.index().iter().map(|(id, _)| id).collect();
    let expected: Vec<PositionId> = ledger.index().iter().map(|(id, _)| id).collect();
    assert_eq!(order, expected);
    restored.check_invariants().unwrap();
}
