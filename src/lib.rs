//! # cdp-ledger
//!
//! A stake-weighted collateral/debt accounting engine for a pool of
//! over-collateralized loan positions.
//!
//! ## Architecture
//!
//! - **Core**: positions, stake accounting, lazy redistribution and the ledger
//! - **Index**: positions ordered by nominal collateral ratio
//! - **Liquidation**: liquidation engine, stability pool and recovery mode
//! - **Redemption**: cancelling debt against collateral at par
//! - **Migration**: moving live positions between two ledgers
//! - **Reporting**: per-step snapshots for external consumers
//!
//! Liquidations never touch the surviving positions. Their loss is added to
//! an accumulator and each position collects its share the next time it is
//! touched, so the cost of a liquidation does not grow with the ledger.
//!
//! ## Example
//!
//! ```rust
//! use cdp_ledger::prelude::*;
//!
//! let mut ledger = Ledger::new("main", LedgerParams::default())?;
//! let price: FixedPoint = "1000".parse()?;
//!
//! let id = ledger.open_position(
//!     OwnerId::from_label("alice"),
//!     "5".parse()?,
//!     "2000".parse()?,
//!     price,
//!     Hints::none(),
//! )?;
//! assert_eq!(ledger.current_icr(&id, price)?, "2.5".parse::<FixedPoint>()?);
//! # Ok::<(), cdp_ledger::error::Error>(())
//! ```

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    trivial_casts,
    unused_lifetimes,
    unused_qualifications
)]

pub mod core;
pub mod error;
pub mod index;
pub mod liquidation;
pub mod migration;
pub mod oracle;
pub mod redemption;
pub mod reporting;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::core::{
        config::{LedgerConfig, LedgerParams, MigrationParams},
        ledger::{BalanceChange, Ledger, SharedLedger},
        position::{PendingReward, Position, PositionStatus},
        stake::LedgerTotals,
    };
    pub use crate::error::{Error, Result};
    pub use crate::index::{Hints, RiskOrderedIndex};
    pub use crate::liquidation::{
        engine::{HaltReason, LiquidationEngine, LiquidationReport},
        recovery::RecoveryMode,
        stability_pool::{BackstopPool, NoBackstop, StabilityPool},
    };
    pub use crate::migration::{
        FundingService, InMemoryFunding, MigrationCoordinator, MigrationOrder, MigrationStatus,
    };
    pub use crate::oracle::{FixedPriceOracle, PriceOracle};
    pub use crate::redemption::engine::{RedemptionEngine, RedemptionReport};
    pub use crate::reporting::{Cumulative, ReportRecord};
    pub use crate::utils::{
        crypto::{OwnerId, PositionId},
        math::FixedPoint,
    };
}

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
