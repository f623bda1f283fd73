//! cdp-ledger CLI
//!
//! Replays scenarios against a ledger and runs migrations between two ledgers.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use console::{style, Term};
use indicatif::{ProgressBar, ProgressStyle};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;

use cdp_ledger::core::ledger::BalanceChange;
use cdp_ledger::migration::{MigrationRecord, MigrationReport};
use cdp_ledger::prelude::*;

/// Stake-weighted collateral/debt ledger
#[derive(Parser)]
#[command(name = "cdp-ledger")]
#[command(version = cdp_ledger::VERSION)]
#[command(about = "Replay scenarios and migrations against a position ledger", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to a JSON configuration file
    #[arg(short, long, env = "CDP_LEDGER_CONFIG")]
    config: Option<PathBuf>,

    /// Emit JSON lines instead of CSV rows
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a JSON scenario, printing one report row per step
    Scenario {
        /// Scenario file
        file: PathBuf,
    },

    /// Populate a source ledger and migrate it into an empty destination
    Migrate {
        /// Number of source positions
        #[arg(short, long, default_value_t = 100)]
        positions: usize,

        /// Traversal order: desc, asc or random
        #[arg(short, long)]
        order: Option<MigrationOrder>,

        /// Seed for position generation and random order
        #[arg(short, long)]
        seed: Option<u64>,

        /// Collateral price
        #[arg(long, default_value = "1000")]
        price: FixedPoint,
    },

    /// Print the effective configuration
    Config,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let term = Term::stdout();

    if let Err(e) = run_command(&cli, &term) {
        eprintln!("{} {:#}", style("Error:").red().bold(), e);
        std::process::exit(1);
    }
}

fn run_command(cli: &Cli, term: &Term) -> anyhow::Result<()> {
    let config = load_config(cli.config.as_deref())?;

    match &cli.command {
        Commands::Scenario { file } => cmd_scenario(cli, &config, file, term),
        Commands::Migrate {
            positions,
            order,
            seed,
            price,
        } => cmd_migrate(&config, *positions, *order, *seed, *price, term),
        Commands::Config => {
            term.write_line(&serde_json::to_string_pretty(&config)?)?;
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<LedgerConfig> {
    let config = match path {
        Some(path) => LedgerConfig::load(path)?.with_env_overrides()?,
        None => LedgerConfig::from_env()?,
    };
    Ok(config)
}

// ═══════════════════════════════════════════════════════════════════════════════
// SCENARIO
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Deserialize)]
struct Scenario {
    /// Starting collateral price
    price: FixedPoint,
    /// Market price of the stable asset, reported as is
    #[serde(default = "one")]
    stable_price: FixedPoint,
    /// Override of the configured risk parameters
    #[serde(default)]
    params: Option<LedgerParams>,
    steps: Vec<Step>,
}

fn one() -> FixedPoint {
    FixedPoint::ONE
}

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Step {
    Price {
        price: FixedPoint,
    },
    Open {
        owner: String,
        collateral: FixedPoint,
        debt: FixedPoint,
    },
    Adjust {
        owner: String,
        #[serde(default)]
        add_collateral: Option<FixedPoint>,
        #[serde(default)]
        withdraw_collateral: Option<FixedPoint>,
        #[serde(default)]
        borrow: Option<FixedPoint>,
        #[serde(default)]
        repay: Option<FixedPoint>,
    },
    Close {
        owner: String,
    },
    Deposit {
        owner: String,
        amount: FixedPoint,
    },
    Liquidate {
        #[serde(default)]
        max: Option<usize>,
    },
    Redeem {
        amount: FixedPoint,
        #[serde(default)]
        max: Option<usize>,
    },
}

fn balance_change(increase: Option<FixedPoint>, decrease: Option<FixedPoint>) -> BalanceChange {
    match (increase, decrease) {
        (Some(amount), _) => BalanceChange::Increase(amount),
        (None, Some(amount)) => BalanceChange::Decrease(amount),
        (None, None) => BalanceChange::Unchanged,
    }
}

struct ScenarioState {
    ledger: Ledger,
    oracle: FixedPriceOracle,
    pool: StabilityPool,
    liquidations: LiquidationEngine,
    redemptions: RedemptionEngine,
    cumulative: Cumulative,
    positions: HashMap<String, PositionId>,
}

impl ScenarioState {
    fn position_of(&self, owner: &str) -> cdp_ledger::error::Result<PositionId> {
        self.positions
            .get(owner)
            .copied()
            .ok_or_else(|| Error::PositionNotFound(owner.to_string()))
    }

    fn apply(&mut self, step: &Step) -> cdp_ledger::error::Result<()> {
        let price = self.oracle.price()?;
        let budget = self.ledger.params().max_positions_per_call;

        match step {
            Step::Price { price } => self.oracle.set_price(*price)?,
            Step::Open {
                owner,
                collateral,
                debt,
            } => {
                let id = self.ledger.open_position(
                    OwnerId::from_label(owner),
                    *collateral,
                    *debt,
                    price,
                    Hints::none(),
                )?;
                self.cumulative.record_added(*collateral)?;
                self.positions.insert(owner.clone(), id);
            }
            Step::Adjust {
                owner,
                add_collateral,
                withdraw_collateral,
                borrow,
                repay,
            } => {
                let id = self.position_of(owner)?;
                self.ledger.adjust_position(
                    &id,
                    balance_change(*add_collateral, *withdraw_collateral),
                    balance_change(*borrow, *repay),
                    price,
                    Hints::none(),
                )?;
                if let Some(added) = add_collateral {
                    self.cumulative.record_added(*added)?;
                }
            }
            Step::Close { owner } => {
                let id = self.position_of(owner)?;
                self.ledger.close_position(&id, price)?;
            }
            Step::Deposit { owner, amount } => {
                self.pool.deposit(OwnerId::from_label(owner), *amount)?;
            }
            Step::Liquidate { max } => {
                let report = self.liquidations.liquidate_batch(
                    &mut self.ledger,
                    &self.oracle,
                    &mut self.pool,
                    max.unwrap_or(budget),
                )?;
                self.cumulative.record_liquidation(&report)?;
            }
            Step::Redeem { amount, max } => {
                let report =
                    self.redemptions
                        .redeem(&mut self.ledger, *amount, price, max.unwrap_or(budget))?;
                self.cumulative.record_redemption(&report)?;
            }
        }
        Ok(())
    }
}

fn cmd_scenario(cli: &Cli, config: &LedgerConfig, file: &Path, term: &Term) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(file)?;
    let scenario: Scenario = serde_json::from_str(&content)?;
    let params = scenario.params.clone().unwrap_or_else(|| config.params.clone());
    params.validate()?;

    let mut state = ScenarioState {
        ledger: Ledger::new(config.name.clone(), params)?,
        oracle: FixedPriceOracle::new(scenario.price),
        pool: StabilityPool::new(),
        liquidations: LiquidationEngine::new(),
        redemptions: RedemptionEngine::new(),
        cumulative: Cumulative::default(),
        positions: HashMap::new(),
    };

    if !cli.json {
        term.write_line(ReportRecord::HEADER)?;
    }

    for (iteration, step) in scenario.steps.iter().enumerate() {
        if let Err(e) = state.apply(step) {
            if e.is_critical() {
                return Err(e.into());
            }
            eprintln!(
                "{} step {}: {}",
                style("⚠").yellow(),
                iteration,
                e
            );
        }

        let record = ReportRecord::capture(
            iteration as u64,
            &state.ledger,
            state.oracle.price()?,
            scenario.stable_price,
            state.pool.total_deposits(),
            &state.cumulative,
        )?;
        if cli.json {
            term.write_line(&record.to_json_line()?)?;
        } else {
            term.write_line(&record.to_csv_row())?;
        }
    }

    state.ledger.check_invariants()?;
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════════
// MIGRATION
// ═══════════════════════════════════════════════════════════════════════════════

fn cmd_migrate(
    config: &LedgerConfig,
    positions: usize,
    order: Option<MigrationOrder>,
    seed: Option<u64>,
    price: FixedPoint,
    term: &Term,
) -> anyhow::Result<()> {
    let mut migration = config.migration.clone();
    if let Some(order) = order {
        migration.order = order;
    }
    if seed.is_some() {
        migration.seed = seed;
    }

    let treasury = OwnerId::from_label("treasury");
    let escrow = OwnerId::from_label("migration-escrow");
    let mut funding = InMemoryFunding::new();
    let oracle = FixedPriceOracle::new(price);

    term.write_line(&format!(
        "{} Populating source ledger with {} positions...",
        style("→").cyan(),
        positions
    ))?;
    let mut source = Ledger::new(format!("{}-source", config.name), config.params.clone())?;
    let bar = create_progress_bar(positions as u64);
    let mut rng = match migration.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let min_debt = config.params.min_total_debt()?;
    for i in 0..positions {
        let owner = OwnerId::from_index(i as u64);
        let debt = min_debt.checked_add(FixedPoint::from_integer(rng.gen_range(0..20_000)))?;
        // ICR between 1.6 and 4.0
        let icr = FixedPoint::from_ratio(rng.gen_range(160..400), 100)?;
        let collateral = debt.checked_mul(icr)?.checked_div(price)?;
        source.open_position(owner, collateral, debt, price, Hints::none())?;
        let issued = debt.saturating_sub(config.params.min_debt_reserve);
        if !issued.is_zero() {
            funding.mint(owner, issued)?;
        }
        bar.inc(1);
    }
    bar.finish_and_clear();
    funding.mint(treasury, FixedPoint::from_integer(1_000_000))?;

    let source_order: Vec<OwnerId> = source.active_positions().map(|p| p.owner).collect();
    let mut destination = Ledger::new(format!("{}-destination", config.name), config.params.clone())?;
    let coordinator = MigrationCoordinator::new(migration.clone(), treasury, escrow);

    term.write_line(&format!(
        "{} Migrating in {} order...",
        style("→").cyan(),
        style(migration.order).yellow()
    ))?;
    let plan = coordinator.plan(&source, oracle.price()?)?;
    let bar = create_progress_bar(plan.len() as u64);
    let mut report = MigrationReport::default();
    for id in plan {
        let hints = coordinator.hints_for(&destination);
        let record =
            coordinator.migrate_position(&mut source, &mut destination, &mut funding, &id, price, hints)?;
        let failed = record.status.is_failure();
        report.records.push(record);
        bar.inc(1);
        if failed && migration.stop_on_failure {
            report.resume_from = Some(id);
            break;
        }
    }
    bar.finish_and_clear();

    print_migration_summary(&report, &source_order, &destination, term)?;
    destination.check_invariants()?;
    if !funding.verify_supply_invariant() {
        anyhow::bail!("funding balances no longer add up to the total supply");
    }
    Ok(())
}

fn print_migration_summary(
    report: &MigrationReport,
    source_order: &[OwnerId],
    destination: &Ledger,
    term: &Term,
) -> anyhow::Result<()> {
    for status in [
        MigrationStatus::Migrated,
        MigrationStatus::AlreadyClosed,
        MigrationStatus::Redeemed,
        MigrationStatus::CloseFailed,
        MigrationStatus::OpenFailed,
    ] {
        term.write_line(&format!(
            "  {:<14} {}",
            format!("{:?}", status),
            style(report.count(status)).cyan()
        ))?;
    }

    let migrated: Vec<OwnerId> = report.migrated().map(|r: &MigrationRecord| r.owner).collect();
    let expected: Vec<OwnerId> = source_order
        .iter()
        .filter(|owner| migrated.contains(owner))
        .copied()
        .collect();
    let actual: Vec<OwnerId> = destination.active_positions().map(|p| p.owner).collect();

    if actual == expected {
        term.write_line(&format!(
            "{} Destination reproduces source ordering ({} positions)",
            style("✓").green(),
            actual.len()
        ))?;
    } else {
        term.write_line(&format!(
            "{} Destination ordering differs from source",
            style("ℹ").blue()
        ))?;
    }

    let escrowed = report.escrowed();
    if !escrowed.is_zero() {
        term.write_line(&format!(
            "{} {} still held in escrow",
            style("⚠").yellow(),
            style(escrowed).yellow()
        ))?;
    }

    if let Some(id) = report.resume_from {
        term.write_line(&format!(
            "{} Stopped on failure, resume from {}",
            style("⚠").yellow(),
            style(id.short()).yellow()
        ))?;
    }
    Ok(())
}

fn create_progress_bar(len: u64) -> ProgressBar {
    let bar = ProgressBar::new(len);
    if let Ok(bar_style) =
        ProgressStyle::default_bar().template("{bar:40.cyan/blue} {pos}/{len} {msg}")
    {
        bar.set_style(bar_style);
    }
    bar
}
