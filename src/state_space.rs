//! Hidden involvement states over the LNLs of a graph.
//!
//! A state is a bitmask with bit `k` set when LNL `k` is involved. States are
//! never materialized as a collection: the space is an index range
//! `0..2^N` in binary counting order, where LNL 0 is the most significant
//! digit, and states are computed from indices on demand.

use crate::error::{LymphError, Result};
use crate::graph::Graph;

/// Upper bound on the number of LNLs of a state space.
///
/// This bounds the index space only. How many LNLs a transition matrix can
/// hold depends on the graph's fan-out and is capped separately by
/// [`crate::transition::MAX_TRANSITION_ENTRIES`].
pub const MAX_LNLS: usize = 24;

/// Binary involvement vector, one bit per LNL.
///
/// Key properties:
/// - Copy and hashable
/// - Ordered by mask, not by canonical index
/// - Monotone transitions only ever set bits
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct State {
    mask: u32,
}

impl State {
    /// The all-healthy state.
    pub fn healthy() -> Self {
        Self { mask: 0 }
    }

    pub fn from_mask(mask: u32) -> Self {
        Self { mask }
    }

    pub fn from_involvement(involved: &[bool]) -> Self {
        let mask = involved
            .iter()
            .enumerate()
            .filter(|(_, inv)| **inv)
            .fold(0u32, |acc, (k, _)| acc | (1 << k));
        Self { mask }
    }

    #[inline]
    pub fn mask(&self) -> u32 {
        self.mask
    }

    #[inline]
    pub fn is_involved(&self, lnl: usize) -> bool {
        self.mask & (1 << lnl) != 0
    }

    #[inline]
    pub fn with_involved(&self, lnl: usize) -> Self {
        Self {
            mask: self.mask | (1 << lnl),
        }
    }

    /// Number of involved LNLs.
    #[inline]
    pub fn num_involved(&self) -> u32 {
        self.mask.count_ones()
    }

    /// True if every LNL involved in `other` is also involved here.
    #[inline]
    pub fn is_superset_of(&self, other: &State) -> bool {
        self.mask & other.mask == other.mask
    }

    pub fn to_involvement(&self, num_lnls: usize) -> Vec<bool> {
        (0..num_lnls).map(|k| self.is_involved(k)).collect()
    }

    /// Check the state against a pattern where `None` matches anything.
    pub fn matches(&self, pattern: &[Option<bool>]) -> bool {
        pattern
            .iter()
            .enumerate()
            .all(|(k, want)| want.map_or(true, |w| self.is_involved(k) == w))
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:b}", self.mask)
    }
}

/// Index space of all 2^N states of a model.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StateSpace {
    num_lnls: usize,
}

impl StateSpace {
    pub fn new(num_lnls: usize) -> Result<Self> {
        if num_lnls == 0 || num_lnls > MAX_LNLS {
            return Err(LymphError::Graph(format!(
                "state space needs between 1 and {} LNLs, got {}",
                MAX_LNLS, num_lnls
            )));
        }
        Ok(Self { num_lnls })
    }

    pub fn for_graph(graph: &Graph) -> Result<Self> {
        Self::new(graph.num_lnls())
    }

    #[inline]
    pub fn num_lnls(&self) -> usize {
        self.num_lnls
    }

    #[inline]
    pub fn num_states(&self) -> usize {
        1 << self.num_lnls
    }

    /// State at a canonical index.
    #[inline]
    pub fn state(&self, index: usize) -> State {
        let n = self.num_lnls;
        let mut mask = 0u32;
        for k in 0..n {
            if (index >> (n - 1 - k)) & 1 == 1 {
                mask |= 1 << k;
            }
        }
        State { mask }
    }

    /// Canonical index of a state.
    #[inline]
    pub fn index_of(&self, state: State) -> usize {
        let n = self.num_lnls;
        let mut index = 0usize;
        for k in 0..n {
            if state.is_involved(k) {
                index |= 1 << (n - 1 - k);
            }
        }
        index
    }

    /// Restartable iterator over all states in canonical order.
    pub fn iter(&self) -> StateIter {
        StateIter {
            space: *self,
            next: 0,
        }
    }

    /// Structural one-step reachability.
    ///
    /// `to` is reachable from `from` if it only adds involvement, and every
    /// newly involved LNL has an incoming edge from the tumor or from an LNL
    /// already involved in `from`. Probabilities are not consulted.
    pub fn is_reachable(&self, graph: &Graph, from: State, to: State) -> bool {
        if !to.is_superset_of(&from) {
            return false;
        }
        let added = to.mask() & !from.mask();
        (0..self.num_lnls)
            .filter(|&k| added & (1 << k) != 0)
            .all(|k| {
                graph.incoming(k).iter().any(|&e| {
                    graph.edges()[e]
                        .parent_lnl
                        .map_or(true, |parent| from.is_involved(parent))
                })
            })
    }
}

pub struct StateIter {
    space: StateSpace,
    next: usize,
}

impl Iterator for StateIter {
    type Item = State;

    fn next(&mut self) -> Option<State> {
        if self.next >= self.space.num_states() {
            return None;
        }
        let state = self.space.state(self.next);
        self.next += 1;
        Some(state)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.space.num_states() - self.next;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for StateIter {}
