//! Redemption of the stable asset against ledger positions.

pub mod engine;

pub use engine::*;
