//! One-step transition model of the hidden involvement states.
//!
//! Computes the matrix A with `A[i, j]` = P(state j at t+1 | state i at t)
//! from the graph topology and per-edge spread probabilities, and evolves
//! state distributions through time.
//!
//! A is stored sparsely: a row only holds the supersets of its source state
//! that the graph can reach in one step.

use ndarray::{Array1, Array2, ArrayView1};
use rand::Rng;

use crate::error::{LymphError, Result};
use crate::graph::Graph;
use crate::params::check_probability;
use crate::sampling::draw_index;
use crate::state_space::{State, StateSpace};

/// Upper bound on the stored entries of A.
///
/// A row holds one entry per subset of its uncertain LNLs, so a graph where
/// every LNL drains from the tumor stores 3^N entries in total.
pub const MAX_TRANSITION_ENTRIES: usize = 1 << 27;

/// Probability that a healthy LNL becomes involved in one step.
///
/// escape = 1 - ∏ (1 - p_e) over incoming edges e whose parent is involved
/// (the tumor always is). With p_e = 1 a factor is exactly zero, so the
/// escape probability is exactly one.
pub fn escape_probability(graph: &Graph, spread_probs: &[f64], state: State, lnl: usize) -> f64 {
    let mut stay_healthy = 1.0;
    for &e in graph.incoming(lnl) {
        let parent_involved = graph.edges()[e]
            .parent_lnl
            .map_or(true, |parent| state.is_involved(parent));
        if parent_involved {
            stay_healthy *= 1.0 - spread_probs[e];
        }
    }
    1.0 - stay_healthy
}

/// Sparse row-stochastic transition matrix in canonical state order (CSR).
#[derive(Clone, Debug, PartialEq)]
pub struct TransitionMatrix {
    num_states: usize,
    row_ptr: Vec<usize>,
    cols: Vec<u32>,
    vals: Vec<f64>,
}

impl TransitionMatrix {
    /// Build A for the given spread probabilities (one per graph edge).
    ///
    /// # Algorithm
    /// For each source state i and each healthy LNL k, compute the escape
    /// probability q_k. LNLs with q_k = 0 stay healthy, LNLs with q_k = 1
    /// become involved, and every subset S of the remaining LNLs gives one
    /// target with probability ∏_{k∈S} q_k · ∏_{k∉S} (1 - q_k).
    ///
    /// # Errors
    /// [`LymphError::Parameter`] if the length does not match the number of
    /// edges or any value is outside [0, 1]. [`LymphError::Graph`] if A would
    /// store more than [`MAX_TRANSITION_ENTRIES`] entries.
    pub fn build(graph: &Graph, space: &StateSpace, spread_probs: &[f64]) -> Result<Self> {
        Self::build_with_limit(graph, space, spread_probs, MAX_TRANSITION_ENTRIES)
    }

    pub(crate) fn build_with_limit(
        graph: &Graph,
        space: &StateSpace,
        spread_probs: &[f64],
        max_entries: usize,
    ) -> Result<Self> {
        if spread_probs.len() != graph.num_edges() {
            return Err(LymphError::Parameter(format!(
                "expected {} spread probabilities, got {}",
                graph.num_edges(),
                spread_probs.len()
            )));
        }
        for (e, &p) in spread_probs.iter().enumerate() {
            check_probability(&graph.edge_name(e), p)?;
        }

        let n = space.num_lnls();
        let num_states = space.num_states();
        let mut row_ptr = Vec::with_capacity(num_states + 1);
        let mut cols = Vec::new();
        let mut vals = Vec::new();
        row_ptr.push(0);

        let mut uncertain: Vec<(usize, f64)> = Vec::with_capacity(n);
        let mut row: Vec<(u32, f64)> = Vec::new();

        for i in 0..num_states {
            let source = space.state(i);
            uncertain.clear();
            row.clear();

            let mut forced = source;
            for k in 0..n {
                if source.is_involved(k) {
                    continue;
                }
                let q = escape_probability(graph, spread_probs, source, k);
                if q >= 1.0 {
                    forced = forced.with_involved(k);
                } else if q > 0.0 {
                    uncertain.push((k, q));
                }
            }

            for subset in 0..(1usize << uncertain.len()) {
                let mut target = forced;
                let mut prob = 1.0;
                for (bit, &(k, q)) in uncertain.iter().enumerate() {
                    if subset & (1 << bit) != 0 {
                        target = target.with_involved(k);
                        prob *= q;
                    } else {
                        prob *= 1.0 - q;
                    }
                }
                row.push((space.index_of(target) as u32, prob));
            }

            if cols.len() + row.len() > max_entries {
                return Err(LymphError::Graph(format!(
                    "transition matrix exceeds {} stored entries at state {} of {}",
                    max_entries, i, num_states
                )));
            }
            row.sort_unstable_by_key(|&(col, _)| col);
            for &(col, prob) in &row {
                cols.push(col);
                vals.push(prob);
            }
            row_ptr.push(cols.len());
        }

        log::debug!(
            "built transition matrix: {} states, {} non-zero entries",
            num_states,
            vals.len()
        );

        Ok(Self {
            num_states,
            row_ptr,
            cols,
            vals,
        })
    }

    #[inline]
    pub fn num_states(&self) -> usize {
        self.num_states
    }

    /// Number of stored (structurally non-zero) entries.
    #[inline]
    pub fn nnz(&self) -> usize {
        self.vals.len()
    }

    /// Non-zero entries `(target index, probability)` of a row.
    pub fn row(&self, i: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
        let range = self.row_ptr[i]..self.row_ptr[i + 1];
        self.cols[range.clone()]
            .iter()
            .zip(&self.vals[range])
            .map(|(&c, &v)| (c as usize, v))
    }

    /// Single entry; zero when not stored.
    pub fn get(&self, i: usize, j: usize) -> f64 {
        let range = self.row_ptr[i]..self.row_ptr[i + 1];
        match self.cols[range.clone()].binary_search(&(j as u32)) {
            Ok(pos) => self.vals[range.start + pos],
            Err(_) => 0.0,
        }
    }

    /// Dense copy of A. Only sensible for small graphs.
    pub fn to_dense(&self) -> Array2<f64> {
        let mut dense = Array2::<f64>::zeros((self.num_states, self.num_states));
        for i in 0..self.num_states {
            for (j, p) in self.row(i) {
                dense[[i, j]] = p;
            }
        }
        dense
    }

    fn check_length(&self, dist: ArrayView1<f64>) -> Result<()> {
        if dist.len() != self.num_states {
            return Err(LymphError::Parameter(format!(
                "distribution has {} entries, model has {} states",
                dist.len(),
                self.num_states
            )));
        }
        Ok(())
    }

    fn step_unchecked(&self, dist: ArrayView1<f64>) -> Array1<f64> {
        let mut next = Array1::<f64>::zeros(self.num_states);
        for (i, &mass) in dist.iter().enumerate() {
            if mass == 0.0 {
                continue;
            }
            for (j, p) in self.row(i) {
                next[j] += mass * p;
            }
        }
        next
    }

    /// One step: `dist · A`.
    ///
    /// # Errors
    /// [`LymphError::Parameter`] if `dist` does not have one entry per state.
    pub fn step(&self, dist: ArrayView1<f64>) -> Result<Array1<f64>> {
        self.check_length(dist)?;
        Ok(self.step_unchecked(dist))
    }

    /// `initial · A^t`.
    pub fn occupancy(&self, initial: ArrayView1<f64>, t: usize) -> Result<Array1<f64>> {
        self.check_length(initial)?;
        let mut dist = initial.to_owned();
        for _ in 0..t {
            dist = self.step_unchecked(dist.view());
        }
        Ok(dist)
    }

    /// Occupancy for every t in 0..=t_max in one pass.
    ///
    /// # Returns
    /// (t_max + 1) × num_states matrix; row t is `initial · A^t`.
    pub fn evolve(&self, initial: ArrayView1<f64>, t_max: usize) -> Result<Array2<f64>> {
        self.check_length(initial)?;
        let mut occupancy = Array2::<f64>::zeros((t_max + 1, self.num_states));
        let mut dist = initial.to_owned();
        occupancy.row_mut(0).assign(&dist);
        for t in 1..=t_max {
            dist = self.step_unchecked(dist.view());
            occupancy.row_mut(t).assign(&dist);
        }
        Ok(occupancy)
    }

    /// Sample the next state index from row `i`.
    pub fn sample_next<R: Rng + ?Sized>(&self, rng: &mut R, i: usize) -> usize {
        let range = self.row_ptr[i]..self.row_ptr[i + 1];
        draw_index(rng, self.vals[range.clone()].iter().copied())
            .map_or(i, |k| self.cols[range.start + k] as usize)
    }
}

/// Point mass on the all-healthy state.
pub fn healthy_distribution(space: &StateSpace) -> Array1<f64> {
    let mut dist = Array1::<f64>::zeros(space.num_states());
    dist[space.index_of(State::healthy())] = 1.0;
    dist
}
