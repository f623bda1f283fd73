//! Utility modules shared across the ledger.
//!
//! - Identifiers and hashing
//! - Fixed-point arithmetic
//! - Constants

pub mod constants;
pub mod crypto;
pub mod math;

pub use constants::*;
pub use crypto::*;
pub use math::*;
