//! Unilateral and bilateral progression models.
//!
//! Implements:
//! - Unilateral hidden Markov model over one side's LNLs
//! - Bilateral coupling of two unilateral models
//! - Synthetic patient generation
//! - Parallel log-likelihood evaluation over parameter samples

pub mod bilateral;
pub mod generator;
pub mod unilateral;

pub use bilateral::{Bilateral, SideCoupling};
pub use generator::{draw_diagnose_times, sample_state, StageDistribution};
pub use unilateral::Unilateral;

use rayon::prelude::*;

use crate::error::Result;
use crate::time_prior::TimePriors;

/// A model that maps a flat parameter vector to a log-likelihood.
///
/// Implementors are plain values, so each worker can own a snapshot.
pub trait LikelihoodModel: Clone + Send + Sync {
    fn num_params(&self) -> usize;

    fn marginal_log_likelihood(&mut self, params: &[f64], priors: &TimePriors) -> Result<f64>;
}

impl LikelihoodModel for Unilateral {
    fn num_params(&self) -> usize {
        Unilateral::num_params(self)
    }

    fn marginal_log_likelihood(&mut self, params: &[f64], priors: &TimePriors) -> Result<f64> {
        Unilateral::marginal_log_likelihood(self, params, priors)
    }
}

impl LikelihoodModel for Bilateral {
    fn num_params(&self) -> usize {
        Bilateral::num_params(self)
    }

    fn marginal_log_likelihood(&mut self, params: &[f64], priors: &TimePriors) -> Result<f64> {
        Bilateral::marginal_log_likelihood(self, params, priors)
    }
}

/// Evaluate the log-likelihood of many parameter samples in parallel.
///
/// Each Rayon worker clones `model` once and reuses its snapshot for every
/// sample it handles; `model` itself is never modified.
///
/// # Returns
/// One log-likelihood per sample, in input order. The first failing sample
/// aborts the batch with its error.
pub fn log_likelihoods_parallel<M: LikelihoodModel>(
    model: &M,
    samples: &[Vec<f64>],
    priors: &TimePriors,
) -> Result<Vec<f64>> {
    samples
        .par_iter()
        .map_init(
            || model.clone(),
            |snapshot, params| snapshot.marginal_log_likelihood(params, priors),
        )
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::group_by_stage;
    use crate::graph::GraphSpec;
    use crate::observation::{Diagnosis, ModalitySet};
    use crate::time_prior::TimeDistribution;

    #[test]
    fn test_parallel_matches_sequential() {
        let spec = GraphSpec::new().tumor("T", &["A"]).lnl("A", &[]);
        let mut model = Unilateral::from_spec(spec).unwrap();
        model
            .set_modalities(ModalitySet::from_pairs([("path", [1.0, 1.0])]).unwrap())
            .unwrap();
        let rows = vec![
            ("early".to_string(), Diagnosis(vec![Some(true)])),
            ("early".to_string(), Diagnosis(vec![Some(false)])),
        ];
        model.load_groups(group_by_stage(rows)).unwrap();
        let mut priors = TimePriors::new();
        priors.insert("early", TimeDistribution::uniform(3)).unwrap();

        let samples: Vec<Vec<f64>> = (1..10).map(|i| vec![i as f64 / 10.0]).collect();
        let parallel = log_likelihoods_parallel(&model, &samples, &priors).unwrap();

        let mut sequential = model.clone();
        for (params, llh) in samples.iter().zip(&parallel) {
            let expected = sequential.marginal_log_likelihood(params, &priors).unwrap();
            assert!((expected - llh).abs() < 1e-12);
        }
        // the caller's model keeps its own parameters
        assert_eq!(model.spread_probs(), &[0.0]);

        let bad = vec![vec![0.5], vec![1.5]];
        assert!(log_likelihoods_parallel(&model, &bad, &priors).is_err());
    }
}
