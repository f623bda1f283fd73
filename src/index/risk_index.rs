//! Positions ordered by nominal collateral ratio.
//!
//! The index is keyed by NICR (collateral / debt), which does not depend on
//! price, so a price move never requires a rebuild. Iteration runs from the
//! strongest position (highest NICR, [`RiskOrderedIndex::first`]) to the
//! weakest ([`RiskOrderedIndex::last`]). Positions with equal NICR keep their
//! insertion order.
//!
//! Entries live in a `BTreeMap`, so every insert, reinsert and removal costs
//! O(log n) whatever the caller knows about neighbours. Hints only matter to
//! [`RiskOrderedIndex::find_insert_position`], the pure slot query: a hint
//! within [`MAX_HINT_WALK`] steps of the slot resolves it by walking from that
//! node, and a missing or stale hint falls back to the map search. Mutations
//! accept hints so callers can pass what they track, but placement is decided
//! by key alone.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;

use crate::error::{Error, Result};
use crate::utils::constants::MAX_HINT_WALK;
use crate::utils::crypto::PositionId;
use crate::utils::math::FixedPoint;

// ═══════════════════════════════════════════════════════════════════════════════
// HINTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Suggested neighbours for an insertion
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hints {
    /// Expected stronger neighbour (closer to the front)
    pub upper: Option<PositionId>,
    /// Expected weaker neighbour (closer to the back)
    pub lower: Option<PositionId>,
}

impl Hints {
    /// No hints; the index searches
    pub fn none() -> Self {
        Self::default()
    }

    /// Hint both neighbours
    pub fn new(upper: Option<PositionId>, lower: Option<PositionId>) -> Self {
        Self { upper, lower }
    }

    /// Hint only the stronger neighbour
    pub fn upper(id: PositionId) -> Self {
        Self {
            upper: Some(id),
            lower: None,
        }
    }

    /// Hint only the weaker neighbour
    pub fn lower(id: PositionId) -> Self {
        Self {
            upper: None,
            lower: Some(id),
        }
    }
}

/// Neighbours bounding an insertion slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsertPosition {
    /// Node that would sit directly in front of the new entry
    pub upper: Option<PositionId>,
    /// Node that would sit directly behind the new entry
    pub lower: Option<PositionId>,
    /// Index steps taken from a hint, or `None` if the search fallback ran
    pub hint_steps: Option<usize>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// INDEX KEY
// ═══════════════════════════════════════════════════════════════════════════════

/// Ordering key: descending NICR, then ascending insertion sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct IndexKey {
    nicr: FixedPoint,
    seq: u64,
}

impl Ord for IndexKey {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .nicr
            .cmp(&self.nicr)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for IndexKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RISK ORDERED INDEX
// ═══════════════════════════════════════════════════════════════════════════════

/// Ordered set of active positions, strongest first
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RiskOrderedIndex {
    nodes: BTreeMap<IndexKey, PositionId>,
    keys: HashMap<PositionId, IndexKey>,
    next_seq: u64,
}

impl RiskOrderedIndex {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of indexed positions
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check if the index is empty
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Check if a position is indexed
    pub fn contains(&self, id: &PositionId) -> bool {
        self.keys.contains_key(id)
    }

    /// NICR a position was indexed with
    pub fn nicr_of(&self, id: &PositionId) -> Option<FixedPoint> {
        self.keys.get(id).map(|key| key.nicr)
    }

    /// Strongest position
    pub fn first(&self) -> Option<PositionId> {
        self.nodes.values().next().copied()
    }

    /// Weakest position
    pub fn last(&self) -> Option<PositionId> {
        self.nodes.values().next_back().copied()
    }

    /// Neighbour behind `id` (weaker)
    pub fn next(&self, id: &PositionId) -> Option<PositionId> {
        let key = self.keys.get(id)?;
        self.nodes
            .range((Bound::Excluded(*key), Bound::Unbounded))
            .next()
            .map(|(_, id)| *id)
    }

    /// Neighbour in front of `id` (stronger)
    pub fn prev(&self, id: &PositionId) -> Option<PositionId> {
        let key = self.keys.get(id)?;
        self.nodes.range(..*key).next_back().map(|(_, id)| *id)
    }

    /// Iterate strongest to weakest
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (PositionId, FixedPoint)> + '_ {
        self.nodes.iter().map(|(key, id)| (*id, key.nicr))
    }

    /// Iterate weakest to strongest
    pub fn iter_weakest(&self) -> impl Iterator<Item = (PositionId, FixedPoint)> + '_ {
        self.iter().rev()
    }

    /// Check that iteration yields non-increasing NICR and the two maps agree
    pub fn is_ordered(&self) -> bool {
        let sorted = self
            .nodes
            .keys()
            .zip(self.nodes.keys().skip(1))
            .all(|(a, b)| a.nicr >= b.nicr);
        let consistent = self.keys.len() == self.nodes.len()
            && self
                .keys
                .iter()
                .all(|(id, key)| self.nodes.get(key) == Some(id));
        sorted && consistent
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // QUERIES
    // ═══════════════════════════════════════════════════════════════════════════

    /// Neighbours that would bound a new entry with `nicr`
    ///
    /// Pure query. Hints are tried first; the search fallback runs when both
    /// are absent, stale, or further than [`MAX_HINT_WALK`] steps away.
    pub fn find_insert_position(&self, nicr: FixedPoint, hints: &Hints) -> InsertPosition {
        let target = IndexKey {
            nicr,
            seq: self.next_seq,
        };

        let from_upper = hints.upper.and_then(|id| self.walk_back_from(&id, target));
        let from_lower = || hints.lower.and_then(|id| self.walk_front_from(&id, target));

        if let Some(found) = from_upper.or_else(from_lower) {
            return found;
        }

        tracing::trace!(nicr = %nicr, "Index hints unusable, searching");
        InsertPosition {
            upper: self.nodes.range(..target).next_back().map(|(_, id)| *id),
            lower: self.nodes.range(target..).next().map(|(_, id)| *id),
            hint_steps: None,
        }
    }

    /// Walk toward the back from a node expected to sit in front of `target`
    fn walk_back_from(&self, hint: &PositionId, target: IndexKey) -> Option<InsertPosition> {
        let start = *self.keys.get(hint)?;
        if start > target {
            return None;
        }

        let mut upper = (start, *hint);
        let mut walk = self.nodes.range((Bound::Excluded(start), Bound::Unbounded));
        for steps in 0..=MAX_HINT_WALK {
            match walk.next() {
                Some((key, id)) if *key < target => upper = (*key, *id),
                Some((_, id)) => {
                    return Some(InsertPosition {
                        upper: Some(upper.1),
                        lower: Some(*id),
                        hint_steps: Some(steps),
                    })
                }
                None => {
                    return Some(InsertPosition {
                        upper: Some(upper.1),
                        lower: None,
                        hint_steps: Some(steps),
                    })
                }
            }
        }
        None
    }

    /// Walk toward the front from a node expected to sit behind `target`
    fn walk_front_from(&self, hint: &PositionId, target: IndexKey) -> Option<InsertPosition> {
        let start = *self.keys.get(hint)?;
        if start < target {
            return None;
        }

        let mut lower = (start, *hint);
        let mut walk = self.nodes.range(..start).rev();
        for steps in 0..=MAX_HINT_WALK {
            match walk.next() {
                Some((key, id)) if *key > target => lower = (*key, *id),
                Some((_, id)) => {
                    return Some(InsertPosition {
                        upper: Some(*id),
                        lower: Some(lower.1),
                        hint_steps: Some(steps),
                    })
                }
                None => {
                    return Some(InsertPosition {
                        upper: None,
                        lower: Some(lower.1),
                        hint_steps: Some(steps),
                    })
                }
            }
        }
        None
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // MUTATIONS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Insert a position at its NICR slot
    ///
    /// Placement is by key; `_hints` never changes the slot or the cost.
    pub fn insert(&mut self, id: PositionId, nicr: FixedPoint, _hints: &Hints) -> Result<()> {
        if self.keys.contains_key(&id) {
            return Err(Error::PositionAlreadyExists(id.to_hex()));
        }

        let key = IndexKey {
            nicr,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.nodes.insert(key, id);
        self.keys.insert(id, key);
        Ok(())
    }

    /// Remove a position
    pub fn remove(&mut self, id: &PositionId) -> Result<()> {
        let key = self
            .keys
            .remove(id)
            .ok_or_else(|| Error::PositionNotFound(id.to_hex()))?;
        self.nodes.remove(&key);
        Ok(())
    }

    /// Move a position to the slot for a new NICR
    pub fn reinsert(&mut self, id: PositionId, nicr: FixedPoint, hints: &Hints) -> Result<()> {
        self.remove(&id)?;
        self.insert(id, nicr, hints)
    }
}
