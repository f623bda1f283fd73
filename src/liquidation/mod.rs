//! Liquidation of undercollateralized positions.
//!
//! This module handles liquidations and the backstop:
//! - Liquidation engine scanning from the weakest position
//! - Stability pool absorbing liquidated debt
//! - Recovery mode rules for the system-wide ratio

pub mod engine;
pub mod recovery;
pub mod stability_pool;

pub use engine::*;
pub use recovery::*;
pub use stability_pool::*;
