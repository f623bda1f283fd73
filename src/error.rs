//! Error types for the ledger.
//!
//! Accounting components (stake accountant, redistribution pool, index) only
//! ever surface fatal invariant violations. Business conditions such as
//! "nothing to liquidate" are recoverable variants returned by the engines.

use thiserror::Error;

/// Result type alias for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the ledger
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    // ═══════════════════════════════════════════════════════════════════
    // Position Errors
    // ═══════════════════════════════════════════════════════════════════

    /// Position not found in the ledger
    #[error("Position not found: {0}")]
    PositionNotFound(String),

    /// Position already exists
    #[error("Position already exists: {0}")]
    PositionAlreadyExists(String),

    /// Position is not active
    #[error("Position is not active: {0}")]
    PositionNotActive(String),

    /// Insufficient collateral for the requested operation
    #[error("Insufficient collateral: required {required}, available {available}")]
    InsufficientCollateral {
        /// Required collateral amount
        required: String,
        /// Available collateral amount
        available: String,
    },

    /// Collateralization ratio below minimum
    #[error("Collateral ratio {current} below minimum {minimum}")]
    CollateralizationRatioTooLow {
        /// Current ratio
        current: String,
        /// Minimum required ratio
        minimum: String,
    },

    /// Debt amount below protocol minimum
    #[error("Debt {amount} below minimum {minimum}")]
    DebtBelowMinimum {
        /// Requested debt amount
        amount: String,
        /// Protocol minimum debt
        minimum: String,
    },

    // ═══════════════════════════════════════════════════════════════════
    // Liquidation / Redemption Errors
    // ═══════════════════════════════════════════════════════════════════

    /// The only remaining position cannot be liquidated
    #[error("Cannot liquidate the last remaining position")]
    LastPositionProtected,

    /// Position is healthy and cannot be liquidated
    #[error("Position {0} is healthy and cannot be liquidated")]
    PositionHealthy(String),

    /// No position can absorb a redemption
    #[error("No redeemable debt available")]
    InsufficientRedeemableDebt,

    /// Insufficient funds in the backstop pool
    #[error("Insufficient backstop balance: required {required}, available {available}")]
    InsufficientBackstop {
        /// Required amount
        required: String,
        /// Available amount
        available: String,
    },

    // ═══════════════════════════════════════════════════════════════════
    // Funding Errors
    // ═══════════════════════════════════════════════════════════════════

    /// Account balance too small for a transfer
    #[error("Insufficient balance for {account}: required {required}, available {available}")]
    InsufficientBalance {
        /// Account that was debited
        account: String,
        /// Required amount
        required: String,
        /// Available amount
        available: String,
    },

    // ═══════════════════════════════════════════════════════════════════
    // Validation Errors
    // ═══════════════════════════════════════════════════════════════════

    /// Invalid input parameter
    #[error("Invalid parameter {name}: {reason}")]
    InvalidParameter {
        /// Parameter name
        name: String,
        /// Reason for invalidity
        reason: String,
    },

    /// Amount is zero
    #[error("Amount cannot be zero")]
    ZeroAmount,

    /// Price is zero or otherwise unusable
    #[error("Invalid price: {0}")]
    InvalidPrice(String),

    // ═══════════════════════════════════════════════════════════════════
    // Protocol Errors
    // ═══════════════════════════════════════════════════════════════════

    /// Operation is blocked by recovery mode
    #[error("Operation blocked in recovery mode: {0}")]
    RecoveryMode(String),

    /// Fixed-point arithmetic overflowed, underflowed or divided by zero
    #[error("Arithmetic invariant violation in {operation}")]
    ArithmeticInvariantViolation {
        /// Operation that failed
        operation: String,
    },

    /// Ledger invariant violation detected
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    // ═══════════════════════════════════════════════════════════════════
    // Configuration / Serialization Errors
    // ═══════════════════════════════════════════════════════════════════

    /// Configuration could not be loaded or is invalid
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization failed
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    // ═══════════════════════════════════════════════════════════════════
    // Internal Errors
    // ═══════════════════════════════════════════════════════════════════

    /// Lock acquisition failed
    #[error("Failed to acquire ledger lock")]
    Lock,
}

impl Error {
    /// Shorthand for an arithmetic failure in `operation`
    pub fn arithmetic(operation: impl Into<String>) -> Self {
        Error::ArithmeticInvariantViolation {
            operation: operation.into(),
        }
    }

    /// Returns true if this error is recoverable
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::LastPositionProtected
                | Error::InsufficientRedeemableDebt
                | Error::PositionHealthy(_)
                | Error::InsufficientCollateral { .. }
                | Error::CollateralizationRatioTooLow { .. }
                | Error::DebtBelowMinimum { .. }
                | Error::InsufficientBackstop { .. }
                | Error::InsufficientBalance { .. }
                | Error::RecoveryMode(_)
        )
    }

    /// Returns true if this is a critical error that must abort the operation
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            Error::ArithmeticInvariantViolation { .. } | Error::InvariantViolation(_) | Error::Lock
        )
    }

    /// Returns the error code for external systems
    pub fn code(&self) -> u32 {
        match self {
            // Position errors: 1xxx
            Error::PositionNotFound(_) => 1001,
            Error::PositionAlreadyExists(_) => 1002,
            Error::PositionNotActive(_) => 1003,
            Error::InsufficientCollateral { .. } => 1004,
            Error::CollateralizationRatioTooLow { .. } => 1005,
            Error::DebtBelowMinimum { .. } => 1006,

            // Liquidation / redemption errors: 2xxx
            Error::LastPositionProtected => 2001,
            Error::PositionHealthy(_) => 2002,
            Error::InsufficientRedeemableDebt => 2003,
            Error::InsufficientBackstop { .. } => 2004,

            // Funding errors: 3xxx
            Error::InsufficientBalance { .. } => 3001,

            // Validation errors: 5xxx
            Error::InvalidParameter { .. } => 5001,
            Error::ZeroAmount => 5002,
            Error::InvalidPrice(_) => 5003,

            // Protocol errors: 6xxx
            Error::RecoveryMode(_) => 6001,
            Error::ArithmeticInvariantViolation { .. } => 6002,
            Error::InvariantViolation(_) => 6003,

            // Configuration / serialization errors: 7xxx
            Error::Config(_) => 7001,
            Error::Serialization(_) => 7002,
            Error::Deserialization(_) => 7003,

            // Internal errors: 9xxx
            Error::Lock => 9001,
        }
    }
}
