//! Ledger configuration and parameters.
//!
//! Liquidation thresholds, reserves and scan budgets are configuration, not
//! constants baked into the engines. Parameters can be loaded from a JSON file
//! and overridden through `CDP_LEDGER_*` environment variables.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};
use crate::migration::MigrationOrder;
use crate::utils::constants::*;
use crate::utils::math::FixedPoint;

// ═══════════════════════════════════════════════════════════════════════════════
// LEDGER PARAMETERS
// ═══════════════════════════════════════════════════════════════════════════════

/// Risk parameters of a single ledger instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerParams {
    /// Minimum collateralization ratio (MCR)
    /// Below this, positions can be liquidated
    pub min_collateral_ratio: FixedPoint,

    /// Critical collateralization ratio (CCR)
    /// When the system ratio falls below this, recovery mode activates
    pub critical_collateral_ratio: FixedPoint,

    /// Debt every position carries until closed; redemption never cancels it
    pub min_debt_reserve: FixedPoint,

    /// Minimum debt on top of the reserve
    pub min_net_debt: FixedPoint,

    /// Default cap on positions touched by one liquidation/redemption call
    pub max_positions_per_call: usize,
}

impl Default for LedgerParams {
    fn default() -> Self {
        Self {
            min_collateral_ratio: FixedPoint::from_raw(DEFAULT_MIN_COLLATERAL_RATIO),
            critical_collateral_ratio: FixedPoint::from_raw(DEFAULT_CRITICAL_COLLATERAL_RATIO),
            min_debt_reserve: FixedPoint::from_raw(DEFAULT_MIN_DEBT_RESERVE),
            min_net_debt: FixedPoint::from_raw(DEFAULT_MIN_NET_DEBT),
            max_positions_per_call: DEFAULT_MAX_POSITIONS_PER_CALL,
        }
    }
}

impl LedgerParams {
    /// Override the liquidation thresholds
    pub fn with_ratios(mut self, mcr: FixedPoint, ccr: FixedPoint) -> Self {
        self.min_collateral_ratio = mcr;
        self.critical_collateral_ratio = ccr;
        self
    }

    /// Override the debt limits
    pub fn with_debt_limits(mut self, reserve: FixedPoint, min_net_debt: FixedPoint) -> Self {
        self.min_debt_reserve = reserve;
        self.min_net_debt = min_net_debt;
        self
    }

    /// Override the per-call scan budget
    pub fn with_budget(mut self, max_positions_per_call: usize) -> Self {
        self.max_positions_per_call = max_positions_per_call;
        self
    }

    /// Smallest total debt an open position may carry
    pub fn min_total_debt(&self) -> Result<FixedPoint> {
        self.min_debt_reserve.checked_add(self.min_net_debt)
    }

    /// Liquidation threshold for the given mode
    pub fn liquidation_threshold(&self, recovery_mode: bool) -> FixedPoint {
        if recovery_mode {
            self.critical_collateral_ratio
        } else {
            self.min_collateral_ratio
        }
    }

    /// Validate parameters are consistent
    pub fn validate(&self) -> Result<()> {
        if self.min_collateral_ratio < FixedPoint::ONE {
            return Err(Error::Config(format!(
                "min_collateral_ratio {} must be at least 1",
                self.min_collateral_ratio
            )));
        }
        if self.min_collateral_ratio >= self.critical_collateral_ratio {
            return Err(Error::Config(format!(
                "min_collateral_ratio {} must be below critical_collateral_ratio {}",
                self.min_collateral_ratio, self.critical_collateral_ratio
            )));
        }
        if self.max_positions_per_call == 0 {
            return Err(Error::Config("max_positions_per_call must be positive".into()));
        }
        self.min_total_debt()?;
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// MIGRATION PARAMETERS
// ═══════════════════════════════════════════════════════════════════════════════

/// Parameters of a migration run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationParams {
    /// Source system ratio (excluding the migrating position) below which
    /// the position is treated as resolved by redemption pressure
    pub safety_ratio: FixedPoint,

    /// Stop the run at the first close/open failure
    pub stop_on_failure: bool,

    /// Traversal order over source positions
    pub order: MigrationOrder,

    /// Seed for the random traversal order
    pub seed: Option<u64>,
}

impl Default for MigrationParams {
    fn default() -> Self {
        Self {
            safety_ratio: FixedPoint::from_raw(DEFAULT_CRITICAL_COLLATERAL_RATIO),
            stop_on_failure: true,
            order: MigrationOrder::DescendingIcr,
            seed: None,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// LEDGER CONFIGURATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Complete configuration, as read from disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Ledger name (mixed into position IDs)
    pub name: String,
    /// Risk parameters
    pub params: LedgerParams,
    /// Migration parameters
    pub migration: MigrationParams,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            name: "main".into(),
            params: LedgerParams::default(),
            migration: MigrationParams::default(),
        }
    }
}

impl LedgerConfig {
    /// Load from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;

        let config: Self = serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        config.params.validate()?;
        Ok(config)
    }

    /// Save to a JSON file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            serde_json::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::Config(e.to_string()))?;
        }

        std::fs::write(path, content).map_err(|e| Error::Config(e.to_string()))
    }

    /// Default configuration with environment overrides applied
    pub fn from_env() -> Result<Self> {
        Self::default().with_env_overrides()
    }

    /// Apply `CDP_LEDGER_*` environment overrides
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Some(name) = env_var("NAME") {
            self.name = name;
        }
        if let Some(mcr) = env_var("MCR") {
            self.params.min_collateral_ratio = mcr.parse()?;
        }
        if let Some(ccr) = env_var("CCR") {
            self.params.critical_collateral_ratio = ccr.parse()?;
        }
        if let Some(reserve) = env_var("MIN_DEBT_RESERVE") {
            self.params.min_debt_reserve = reserve.parse()?;
        }
        if let Some(min_net_debt) = env_var("MIN_NET_DEBT") {
            self.params.min_net_debt = min_net_debt.parse()?;
        }
        if let Some(budget) = env_var("MAX_POSITIONS_PER_CALL") {
            self.params.max_positions_per_call = budget.parse().map_err(|_| {
                Error::Config(format!("invalid MAX_POSITIONS_PER_CALL: {}", budget))
            })?;
        }
        self.params.validate()?;
        Ok(self)
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(format!("{}{}", ENV_PREFIX, key)).ok()
}
