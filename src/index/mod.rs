//! Risk-ordered position index.
//!
//! Keeps active positions sorted by nominal collateral ratio so liquidation
//! and redemption can start at the weakest position without scanning the
//! whole ledger.

pub mod risk_index;

pub use risk_index::*;
