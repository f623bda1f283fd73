//! Ledger constants and default parameters.
//!
//! All ledger-wide constants are defined here for easy auditing. Values that
//! callers may reasonably want to tune are only defaults: the live values are
//! carried by [`crate::core::config::LedgerParams`].

// ═══════════════════════════════════════════════════════════════════════════════
// FIXED POINT
// ═══════════════════════════════════════════════════════════════════════════════

/// Number of decimals carried by every fixed-point amount
pub const DECIMALS: u32 = 18;

/// 1.0 in fixed-point representation
pub const DECIMAL_PRECISION: u128 = 1_000_000_000_000_000_000;

// ═══════════════════════════════════════════════════════════════════════════════
// COLLATERALIZATION DEFAULTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Minimum Collateralization Ratio (MCR) - 110%
/// Below this ratio a position can be liquidated in normal mode
pub const DEFAULT_MIN_COLLATERAL_RATIO: u128 = 1_100_000_000_000_000_000;

/// Critical Collateralization Ratio (CCR) - 150%
/// When the system ratio falls below this, recovery mode activates
pub const DEFAULT_CRITICAL_COLLATERAL_RATIO: u128 = 1_500_000_000_000_000_000;

// ═══════════════════════════════════════════════════════════════════════════════
// DEBT LIMITS
// ═══════════════════════════════════════════════════════════════════════════════

/// Debt reserve that stays with every position until it is closed (200 units)
pub const DEFAULT_MIN_DEBT_RESERVE: u128 = 200 * DECIMAL_PRECISION;

/// Minimum debt on top of the reserve (1800 units)
pub const DEFAULT_MIN_NET_DEBT: u128 = 1_800 * DECIMAL_PRECISION;

// ═══════════════════════════════════════════════════════════════════════════════
// SCAN BUDGETS
// ═══════════════════════════════════════════════════════════════════════════════

/// Default maximum positions touched by one liquidation or redemption call
pub const DEFAULT_MAX_POSITIONS_PER_CALL: usize = 100;

/// Number of index steps a hint walk may take before falling back to a search
pub const MAX_HINT_WALK: usize = 64;

/// Maximum liquidation events retained in history
pub const MAX_EVENT_HISTORY: usize = 1_000;

// ═══════════════════════════════════════════════════════════════════════════════
// IDENTIFIERS
// ═══════════════════════════════════════════════════════════════════════════════

/// Owner identity length in bytes
pub const OWNER_ID_LENGTH: usize = 32;

/// Position ID length in bytes
pub const POSITION_ID_LENGTH: usize = 32;

/// Hash length in bytes (SHA256)
pub const HASH_LENGTH: usize = 32;

// ═══════════════════════════════════════════════════════════════════════════════
// ENVIRONMENT
// ═══════════════════════════════════════════════════════════════════════════════

/// Prefix for configuration environment overrides
pub const ENV_PREFIX: &str = "CDP_LEDGER_";
