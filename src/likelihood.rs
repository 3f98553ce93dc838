//! Marginal likelihood building blocks shared by the unilateral and bilateral
//! models.
//!
//! The pipeline per stage is: occupancy over t = 0..=t_max, weighted by the
//! stage's time prior into one state distribution, dotted with one column of
//! B per distinct observed pattern, then `Σ count · ln(likelihood)`.

use std::collections::BTreeMap;

use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

use crate::error::{LymphError, Result};
use crate::observation::{Diagnosis, ObservationModel};
use crate::state_space::StateSpace;
use crate::time_prior::TimeDistribution;

/// Time-marginalized state distribution `Σ_t prior(t) · occupancy(t)`.
///
/// # Arguments
/// * `occupancy` - (t_max + 1) × num_states, row t is the occupancy at t
/// * `prior` - distribution over the same 0..=t_max
pub fn marginalize_over_time(
    occupancy: ArrayView2<f64>,
    prior: &TimeDistribution,
) -> Result<Array1<f64>> {
    check_horizon(occupancy, prior)?;
    Ok(ArrayView1::from(prior.pmf()).dot(&occupancy))
}

pub(crate) fn check_horizon(occupancy: ArrayView2<f64>, prior: &TimeDistribution) -> Result<()> {
    if occupancy.nrows() != prior.pmf().len() {
        return Err(LymphError::TimePrior(format!(
            "time prior covers t = 0..={}, occupancy covers t = 0..={}",
            prior.t_max(),
            occupancy.nrows().saturating_sub(1)
        )));
    }
    Ok(())
}

/// `Σ count · ln(likelihood)`; negative infinity once any observed pattern
/// has zero likelihood.
pub fn summed_log_likelihood(likelihoods: ArrayView1<f64>, counts: &[usize]) -> f64 {
    let mut total = 0.0;
    for (&l, &count) in likelihoods.iter().zip(counts) {
        if count == 0 {
            continue;
        }
        if l <= 0.0 {
            return f64::NEG_INFINITY;
        }
        total += count as f64 * l.ln();
    }
    total
}

/// Distinct patterns of one stage with their B columns precomputed.
#[derive(Clone, Debug, PartialEq)]
pub struct StageObservations {
    patterns: Vec<Diagnosis>,
    counts: Vec<usize>,
    /// num_states × num_patterns
    columns: Array2<f64>,
}

impl StageObservations {
    pub fn new(
        groups: &BTreeMap<Diagnosis, usize>,
        observation: &ObservationModel,
        space: &StateSpace,
    ) -> Result<Self> {
        let patterns: Vec<Diagnosis> = groups.keys().cloned().collect();
        let counts: Vec<usize> = groups.values().copied().collect();
        let columns = observation_columns(&patterns, observation, space)?;
        Ok(Self {
            patterns,
            counts,
            columns,
        })
    }

    pub fn patterns(&self) -> &[Diagnosis] {
        &self.patterns
    }

    pub fn counts(&self) -> &[usize] {
        &self.counts
    }

    pub fn columns(&self) -> ArrayView2<f64> {
        self.columns.view()
    }

    /// Number of patients in the stage.
    pub fn num_patients(&self) -> usize {
        self.counts.iter().sum()
    }

    /// Likelihood of every distinct pattern under a state distribution.
    pub fn pattern_likelihoods(&self, dist: ArrayView1<f64>) -> Array1<f64> {
        dist.dot(&self.columns)
    }

    pub fn log_likelihood(&self, dist: ArrayView1<f64>) -> f64 {
        summed_log_likelihood(self.pattern_likelihoods(dist).view(), &self.counts)
    }

    /// Recompute B columns after a modality change with the same slot layout.
    pub fn refresh(&mut self, observation: &ObservationModel, space: &StateSpace) -> Result<()> {
        self.columns = observation_columns(&self.patterns, observation, space)?;
        Ok(())
    }
}

/// B restricted to the given patterns: num_states × patterns.len().
pub fn observation_columns(
    patterns: &[Diagnosis],
    observation: &ObservationModel,
    space: &StateSpace,
) -> Result<Array2<f64>> {
    let mut columns = Array2::<f64>::zeros((space.num_states(), patterns.len()));
    for (c, pattern) in patterns.iter().enumerate() {
        columns
            .column_mut(c)
            .assign(&observation.column(space, pattern)?);
    }
    Ok(columns)
}

/// Per time step evidence `Σ_s occupancy[t, s] · b[s]`, optionally restricted
/// to states selected by `mask`.
pub fn evidence_by_time(
    occupancy: ArrayView2<f64>,
    column: ArrayView1<f64>,
    mask: Option<&[bool]>,
) -> Array1<f64> {
    match mask {
        None => occupancy.dot(&column),
        Some(mask) => {
            let masked: Array1<f64> = column
                .iter()
                .zip(mask)
                .map(|(&b, &keep)| if keep { b } else { 0.0 })
                .collect();
            occupancy.dot(&masked)
        }
    }
}
