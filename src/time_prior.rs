//! Per-stage distributions over the unobserved diagnosis time.

use std::collections::BTreeMap;

use rand::Rng;

use crate::error::{LymphError, Result};
use crate::sampling::draw_index;

/// Tolerance on the total mass of a time distribution.
const MASS_TOLERANCE: f64 = 1e-6;

/// Probability distribution over time steps 0..=t_max.
#[derive(Clone, Debug, PartialEq)]
pub struct TimeDistribution {
    pmf: Vec<f64>,
}

impl TimeDistribution {
    /// # Errors
    /// [`LymphError::TimePrior`] if empty, if any entry is negative or not
    /// finite, or if the entries do not sum to one.
    pub fn new(pmf: Vec<f64>) -> Result<Self> {
        if pmf.is_empty() {
            return Err(LymphError::TimePrior(
                "time distribution must cover at least t = 0".to_string(),
            ));
        }
        if let Some((t, p)) = pmf
            .iter()
            .enumerate()
            .find(|(_, p)| !p.is_finite() || **p < 0.0)
        {
            return Err(LymphError::TimePrior(format!(
                "invalid probability {} at t = {}",
                p, t
            )));
        }
        let total: f64 = pmf.iter().sum();
        if (total - 1.0).abs() > MASS_TOLERANCE {
            return Err(LymphError::TimePrior(format!(
                "time distribution sums to {}, not 1",
                total
            )));
        }
        Ok(Self { pmf })
    }

    /// All mass on a single time step.
    pub fn point_mass(t: usize, t_max: usize) -> Result<Self> {
        if t > t_max {
            return Err(LymphError::TimePrior(format!(
                "point mass at t = {} lies beyond t_max = {}",
                t, t_max
            )));
        }
        let mut pmf = vec![0.0; t_max + 1];
        pmf[t] = 1.0;
        Ok(Self { pmf })
    }

    pub fn uniform(t_max: usize) -> Self {
        let n = t_max + 1;
        Self {
            pmf: vec![1.0 / n as f64; n],
        }
    }

    /// Binomial(t_max, p) over 0..=t_max.
    pub fn binomial(t_max: usize, p: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&p) {
            return Err(LymphError::Parameter(format!(
                "binomial time prior parameter must be in [0, 1], got {}",
                p
            )));
        }
        Ok(Self {
            pmf: (0..=t_max).map(|k| binomial_pmf(k, t_max, p)).collect(),
        })
    }

    #[inline]
    pub fn t_max(&self) -> usize {
        self.pmf.len() - 1
    }

    #[inline]
    pub fn pmf(&self) -> &[f64] {
        &self.pmf
    }

    /// Draw a time step.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> usize {
        draw_index(rng, self.pmf.iter().copied()).unwrap_or(0)
    }
}

/// Time distributions keyed by stage label, all over the same 0..=t_max.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TimePriors {
    stages: BTreeMap<String, TimeDistribution>,
}

impl TimePriors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the distribution of a stage.
    ///
    /// # Errors
    /// [`LymphError::TimePrior`] if its t_max differs from the stages
    /// already present.
    pub fn insert(&mut self, stage: &str, dist: TimeDistribution) -> Result<()> {
        if let Some(t_max) = self.t_max() {
            let replaces_only = self.stages.len() == 1 && self.stages.contains_key(stage);
            if dist.t_max() != t_max && !replaces_only {
                return Err(LymphError::TimePrior(format!(
                    "stage '{}' has t_max = {}, other stages use {}",
                    stage,
                    dist.t_max(),
                    t_max
                )));
            }
        }
        self.stages.insert(stage.to_string(), dist);
        Ok(())
    }

    /// Build from raw `{stage: [p_0, …, p_Tmax]}`.
    pub fn from_map(raw: &BTreeMap<String, Vec<f64>>) -> Result<Self> {
        let mut priors = Self::new();
        for (stage, pmf) in raw {
            priors.insert(stage, TimeDistribution::new(pmf.clone())?)?;
        }
        Ok(priors)
    }

    pub fn get(&self, stage: &str) -> Option<&TimeDistribution> {
        self.stages.get(stage)
    }

    /// Common t_max, or `None` when empty.
    pub fn t_max(&self) -> Option<usize> {
        self.stages.values().next().map(TimeDistribution::t_max)
    }

    pub fn stages(&self) -> impl Iterator<Item = &str> {
        self.stages.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &TimeDistribution)> {
        self.stages.iter().map(|(s, d)| (s.as_str(), d))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

/// Binomial pmf C(n, k) p^k (1-p)^(n-k).
///
/// The coefficient is accumulated as a running product so no factorial is
/// ever formed. `p` at 0 or 1 is exact.
pub fn binomial_pmf(k: usize, n: usize, p: f64) -> f64 {
    if k > n {
        return 0.0;
    }
    let mut coeff = 1.0;
    for i in 0..k.min(n - k) {
        coeff *= (n - i) as f64 / (i + 1) as f64;
    }
    coeff * p.powi(k as i32) * (1.0 - p).powi((n - k) as i32)
}
