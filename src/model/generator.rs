//! Synthetic patient generator with parallel, reproducible sampling.
//!
//! Each patient:
//! - draws a stage from the stage distribution
//! - draws a diagnosis time from that stage's time prior
//! - walks the hidden chain from the healthy state for that many steps
//! - draws one observation per (modality, LNL) slot
//!
//! Patients are simulated in parallel with Rayon. Patient `i` uses its own
//! `StdRng` seeded with `seed + i`, so a cohort is fully determined by its seed.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use crate::data::PatientTable;
use crate::error::{LymphError, Result};
use crate::model::bilateral::{Bilateral, SideCoupling};
use crate::model::unilateral::Unilateral;
use crate::observation::{Diagnosis, ObservationModel};
use crate::params::Side;
use crate::sampling::draw_index;
use crate::state_space::State;
use crate::time_prior::TimePriors;
use crate::transition::TransitionMatrix;

const MASS_TOLERANCE: f64 = 1e-6;

/// Categorical distribution over stage labels.
#[derive(Clone, Debug, PartialEq)]
pub struct StageDistribution {
    stages: Vec<(String, f64)>,
}

impl StageDistribution {
    /// # Errors
    /// [`LymphError::DataFormat`] if empty, if any weight is negative, or if
    /// the weights do not sum to one.
    pub fn new(stages: Vec<(String, f64)>) -> Result<Self> {
        if stages.is_empty() {
            return Err(LymphError::DataFormat(
                "stage distribution is empty".to_string(),
            ));
        }
        if let Some((stage, p)) = stages.iter().find(|(_, p)| !p.is_finite() || *p < 0.0) {
            return Err(LymphError::DataFormat(format!(
                "invalid probability {} for stage '{}'",
                p, stage
            )));
        }
        let total: f64 = stages.iter().map(|(_, p)| p).sum();
        if (total - 1.0).abs() > MASS_TOLERANCE {
            return Err(LymphError::DataFormat(format!(
                "distribution over stages sums to {}, not 1",
                total
            )));
        }
        Ok(Self { stages })
    }

    pub fn from_pairs<'a, I>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, f64)>,
    {
        Self::new(
            pairs
                .into_iter()
                .map(|(s, p)| (s.to_string(), p))
                .collect(),
        )
    }

    pub fn stages(&self) -> impl Iterator<Item = &str> {
        self.stages.iter().map(|(s, _)| s.as_str())
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> &str {
        let i = draw_index(rng, self.stages.iter().map(|(_, p)| *p)).unwrap_or(0);
        &self.stages[i].0
    }
}

/// Every stage that can be drawn must have a time prior.
fn check_stages(stage_dist: &StageDistribution, priors: &TimePriors) -> Result<()> {
    for stage in stage_dist.stages() {
        if priors.get(stage).is_none() {
            log::warn!("stage '{}' can be drawn but has no time prior", stage);
            return Err(LymphError::DataFormat(format!(
                "no time prior for stage '{}'",
                stage
            )));
        }
    }
    Ok(())
}

fn check_count(num_patients: usize) -> Result<()> {
    if num_patients == 0 {
        return Err(LymphError::DataFormat(
            "number of patients to draw must be at least 1".to_string(),
        ));
    }
    Ok(())
}

/// Draw a stage and a diagnosis time for each of `num_patients` patients.
pub fn draw_diagnose_times<R: Rng + ?Sized>(
    num_patients: usize,
    stage_dist: &StageDistribution,
    priors: &TimePriors,
    rng: &mut R,
) -> Result<Vec<(String, usize)>> {
    check_count(num_patients)?;
    check_stages(stage_dist, priors)?;
    Ok((0..num_patients)
        .map(|_| draw_stage_and_time(stage_dist, priors, rng))
        .collect())
}

fn draw_stage_and_time<R: Rng + ?Sized>(
    stage_dist: &StageDistribution,
    priors: &TimePriors,
    rng: &mut R,
) -> (String, usize) {
    let stage = stage_dist.sample(rng);
    // presence of the prior was checked up front
    let t = priors.get(stage).map_or(0, |prior| prior.sample(rng));
    (stage.to_string(), t)
}

/// Walk the hidden chain `t` steps from the healthy state.
pub fn sample_state<R: Rng + ?Sized>(
    model: &Unilateral,
    t: usize,
    rng: &mut R,
) -> State {
    let space = model.state_space();
    let transition: &TransitionMatrix = model.transition_matrix();
    let mut index = space.index_of(State::healthy());
    for _ in 0..t {
        index = transition.sample_next(rng, index);
    }
    space.state(index)
}

fn observation_of(model: &Unilateral) -> Result<&ObservationModel> {
    model
        .observation_model()
        .ok_or_else(|| LymphError::Modality("no modalities have been set".to_string()))
}

impl Unilateral {
    /// Generate a synthetic cohort under the current parameters.
    ///
    /// # Returns
    /// A table with one `(modality, LNL)` column per observation slot and no
    /// side level.
    pub fn generate_dataset(
        &self,
        num_patients: usize,
        stage_dist: &StageDistribution,
        priors: &TimePriors,
        seed: u64,
    ) -> Result<PatientTable> {
        check_count(num_patients)?;
        check_stages(stage_dist, priors)?;
        let observation = observation_of(self)?;

        let patients: Vec<(String, Diagnosis)> = (0..num_patients)
            .into_par_iter()
            .map(|i| {
                let mut rng = StdRng::seed_from_u64(seed.wrapping_add(i as u64));
                let (stage, t) = draw_stage_and_time(stage_dist, priors, &mut rng);
                let state = sample_state(self, t, &mut rng);
                (stage, observation.sample_diagnosis(state, &mut rng))
            })
            .collect();

        let mut table = PatientTable::with_layout(
            &observation.modalities().names(),
            &[None],
            &self.graph().lnl_names(),
        );
        for (stage, diagnosis) in patients {
            table.push_row(&stage, diagnosis.0)?;
        }
        log::debug!("generated {} synthetic patients", table.len());
        Ok(table)
    }
}

impl Bilateral {
    /// Generate a synthetic bilateral cohort under the current parameters.
    ///
    /// With [`SideCoupling::SharedDiagnosisTime`] both sides share one drawn
    /// time, otherwise each side draws its own.
    pub fn generate_dataset(
        &self,
        num_patients: usize,
        stage_dist: &StageDistribution,
        priors: &TimePriors,
        seed: u64,
    ) -> Result<PatientTable> {
        check_count(num_patients)?;
        check_stages(stage_dist, priors)?;
        let observation = observation_of(self.ipsi())?;
        let coupling = self.coupling();

        let patients: Vec<(String, Diagnosis, Diagnosis)> = (0..num_patients)
            .into_par_iter()
            .map(|i| {
                let mut rng = StdRng::seed_from_u64(seed.wrapping_add(i as u64));
                let (stage, t_ipsi) = draw_stage_and_time(stage_dist, priors, &mut rng);
                let t_contra = match coupling {
                    SideCoupling::SharedDiagnosisTime => t_ipsi,
                    SideCoupling::Factorized => priors
                        .get(&stage)
                        .map_or(t_ipsi, |prior| prior.sample(&mut rng)),
                };
                let ipsi_state = sample_state(self.ipsi(), t_ipsi, &mut rng);
                let contra_state = sample_state(self.contra(), t_contra, &mut rng);
                (
                    stage,
                    observation.sample_diagnosis(ipsi_state, &mut rng),
                    observation.sample_diagnosis(contra_state, &mut rng),
                )
            })
            .collect();

        let n = self.ipsi().graph().num_lnls();
        let modalities = observation.modalities().names();
        let mut table = PatientTable::with_layout(
            &modalities,
            &[Some(Side::Ipsi), Some(Side::Contra)],
            &self.ipsi().graph().lnl_names(),
        );
        for (stage, ipsi, contra) in patients {
            let mut values = Vec::with_capacity(2 * ipsi.len());
            for m in 0..modalities.len() {
                values.extend_from_slice(&ipsi.0[m * n..(m + 1) * n]);
                values.extend_from_slice(&contra.0[m * n..(m + 1) * n]);
            }
            table.push_row(&stage, values)?;
        }
        log::debug!("generated {} synthetic bilateral patients", table.len());
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphSpec;
    use crate::observation::ModalitySet;
    use crate::params::Symmetry;
    use crate::time_prior::TimeDistribution;

    fn priors() -> TimePriors {
        let mut priors = TimePriors::new();
        priors
            .insert("early", TimeDistribution::binomial(6, 0.3).unwrap())
            .unwrap();
        priors
            .insert("late", TimeDistribution::binomial(6, 0.7).unwrap())
            .unwrap();
        priors
    }

    fn unilateral() -> Unilateral {
        let spec = GraphSpec::new()
            .tumor("T", &["A", "B"])
            .lnl("A", &["B"])
            .lnl("B", &[]);
        let mut model = Unilateral::from_spec(spec).unwrap();
        model
            .set_modalities(ModalitySet::from_pairs([("path", [1.0, 1.0])]).unwrap())
            .unwrap();
        model.set_spread_probs(&[0.3, 0.1, 0.4]).unwrap();
        model
    }

    #[test]
    fn test_stage_distribution_validation() {
        assert!(StageDistribution::from_pairs([("early", 0.5), ("late", 0.4)]).is_err());
        assert!(StageDistribution::from_pairs([("early", -0.5), ("late", 1.5)]).is_err());
        assert!(StageDistribution::from_pairs(Vec::<(&str, f64)>::new()).is_err());
        assert!(StageDistribution::from_pairs([("early", 0.6), ("late", 0.4)]).is_ok());
    }

    #[test]
    fn test_draw_diagnose_times() {
        let stages = StageDistribution::from_pairs([("early", 1.0), ("late", 0.0)]).unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        let drawn = draw_diagnose_times(50, &stages, &priors(), &mut rng).unwrap();
        assert_eq!(drawn.len(), 50);
        assert!(drawn.iter().all(|(s, t)| s == "early" && *t <= 6));

        let missing = StageDistribution::from_pairs([("early", 0.5), ("T4", 0.5)]).unwrap();
        assert!(draw_diagnose_times(5, &missing, &priors(), &mut rng).is_err());
        assert!(draw_diagnose_times(0, &stages, &priors(), &mut rng).is_err());
    }

    #[test]
    fn test_generation_is_reproducible() {
        let model = unilateral();
        let stages = StageDistribution::from_pairs([("early", 0.6), ("late", 0.4)]).unwrap();
        let a = model.generate_dataset(40, &stages, &priors(), 11).unwrap();
        let b = model.generate_dataset(40, &stages, &priors(), 11).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 40);
        assert_eq!(a.columns().len(), 2);
    }

    #[test]
    fn test_generated_states_are_reachable() {
        // B can only be involved via the tumor or A; with no tumor->B spread
        // and perfect tests, B positive implies A positive
        let mut model = unilateral();
        model.set_spread_probs(&[0.5, 0.0, 0.5]).unwrap();
        let stages = StageDistribution::from_pairs([("late", 1.0)]).unwrap();
        let table = model.generate_dataset(200, &stages, &priors(), 5).unwrap();
        for row in table.rows() {
            if row.values[1] == Some(true) {
                assert_eq!(row.values[0], Some(true));
            }
        }
    }

    #[test]
    fn test_bilateral_layout() {
        let spec = GraphSpec::new().tumor("T", &["A"]).lnl("A", &[]);
        let mut model =
            Bilateral::from_spec(spec, Symmetry::default(), SideCoupling::Factorized).unwrap();
        model
            .set_modalities(ModalitySet::from_pairs([("path", [1.0, 1.0])]).unwrap())
            .unwrap();
        // ipsi base, contra base, no transition edges
        model.set_params(&[1.0, 0.0]).unwrap();

        let stages = StageDistribution::from_pairs([("late", 1.0)]).unwrap();
        let mut priors = TimePriors::new();
        priors
            .insert("late", TimeDistribution::point_mass(2, 4).unwrap())
            .unwrap();
        let table = model.generate_dataset(10, &stages, &priors, 0).unwrap();
        assert_eq!(table.columns()[0].side, Some(Side::Ipsi));
        for row in table.rows() {
            assert_eq!(row.values, vec![Some(true), Some(false)]);
        }
    }
}
