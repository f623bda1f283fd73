//! Core ledger modules.
//!
//! This module contains the fundamental building blocks:
//! - Configuration and ledger parameters
//! - Positions and their lifecycle
//! - Stake accounting and lazy redistribution
//! - The ledger tying them together

pub mod config;
pub mod ledger;
pub mod position;
pub mod redistribution;
pub mod stake;

pub use config::*;
pub use ledger::*;
pub use position::*;
pub use redistribution::*;
pub use stake::*;
