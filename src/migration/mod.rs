//! Migration of live positions between two ledger instances.
//!
//! - Traversal orders over the source ledger
//! - Funding collaborator used to settle repayments
//! - Coordinator that moves one position at a time

pub mod coordinator;
pub mod funding;

pub use coordinator::*;
pub use funding::*;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Order in which source positions are visited
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationOrder {
    /// Strongest position first
    DescendingIcr,
    /// Weakest position first
    AscendingIcr,
    /// Shuffled, optionally seeded
    Random,
}

impl fmt::Display for MigrationOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MigrationOrder::DescendingIcr => "desc",
            MigrationOrder::AscendingIcr => "asc",
            MigrationOrder::Random => "random",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for MigrationOrder {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "desc" | "descending" | "descending_icr" => Ok(MigrationOrder::DescendingIcr),
            "asc" | "ascending" | "ascending_icr" => Ok(MigrationOrder::AscendingIcr),
            "random" | "rand" => Ok(MigrationOrder::Random),
            other => Err(Error::InvalidParameter {
                name: "order".into(),
                reason: format!("unknown migration order '{}'", other),
            }),
        }
    }
}
