//! Hidden Markov model of spread on one side of the neck.

use std::collections::BTreeMap;

use ndarray::{Array1, Array2, ArrayView1};

use crate::data::{group_by_stage, PatientGroups, PatientTable};
use crate::error::{LymphError, Result};
use crate::graph::{Graph, GraphSpec};
use crate::likelihood::{evidence_by_time, marginalize_over_time, StageObservations};
use crate::observation::{Diagnosis, ModalitySet, ObservationModel};
use crate::params::{check_probability, ParameterSchema, Side};
use crate::state_space::StateSpace;
use crate::time_prior::{TimeDistribution, TimePriors};
use crate::transition::{healthy_distribution, TransitionMatrix};

/// Unilateral lymphatic progression model.
///
/// Owns the graph, the current spread probabilities and the matrices derived
/// from them. A and the B columns are replaced only after a successful
/// rebuild, so a rejected parameter vector leaves the model untouched.
#[derive(Clone, Debug)]
pub struct Unilateral {
    graph: Graph,
    space: StateSpace,
    schema: ParameterSchema,
    spread_probs: Vec<f64>,
    transition: TransitionMatrix,
    observation: Option<ObservationModel>,
    data: BTreeMap<String, StageObservations>,
}

impl Unilateral {
    /// New model with every spread probability at zero.
    pub fn new(graph: Graph) -> Result<Self> {
        let space = StateSpace::for_graph(&graph)?;
        let spread_probs = vec![0.0; graph.num_edges()];
        let transition = TransitionMatrix::build(&graph, &space, &spread_probs)?;
        let schema = ParameterSchema::unilateral(&graph);
        Ok(Self {
            graph,
            space,
            schema,
            spread_probs,
            transition,
            observation: None,
            data: BTreeMap::new(),
        })
    }

    pub fn from_spec(spec: GraphSpec) -> Result<Self> {
        Self::new(Graph::new(spec)?)
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn state_space(&self) -> &StateSpace {
        &self.space
    }

    pub fn schema(&self) -> &ParameterSchema {
        &self.schema
    }

    pub fn spread_probs(&self) -> &[f64] {
        &self.spread_probs
    }

    pub fn transition_matrix(&self) -> &TransitionMatrix {
        &self.transition
    }

    pub fn observation_model(&self) -> Option<&ObservationModel> {
        self.observation.as_ref()
    }

    /// Number of entries in the parameter vector.
    pub fn num_params(&self) -> usize {
        self.schema.len()
    }

    /// Stages with loaded patients.
    pub fn stages(&self) -> Vec<&str> {
        self.data.keys().map(String::as_str).collect()
    }

    pub fn num_patients(&self) -> usize {
        self.data.values().map(StageObservations::num_patients).sum()
    }

    /// Build A for new spread probabilities without touching the model.
    pub(crate) fn prepare_spread_probs(&self, spread_probs: &[f64]) -> Result<TransitionMatrix> {
        TransitionMatrix::build(&self.graph, &self.space, spread_probs)
    }

    pub(crate) fn commit_spread_probs(&mut self, spread_probs: &[f64], transition: TransitionMatrix) {
        self.spread_probs = spread_probs.to_vec();
        self.transition = transition;
    }

    /// Set the spread probabilities, base edges first.
    ///
    /// # Errors
    /// [`LymphError::Parameter`] on a wrong length or a value outside [0, 1];
    /// the previous parameters stay in place.
    pub fn set_spread_probs(&mut self, spread_probs: &[f64]) -> Result<()> {
        let transition = self.prepare_spread_probs(spread_probs)?;
        self.commit_spread_probs(spread_probs, transition);
        Ok(())
    }

    /// Replace the diagnostic modalities.
    ///
    /// Loaded patients are kept, with their B columns recomputed, when the
    /// modality names are unchanged. Otherwise they are dropped, since their
    /// slot layout no longer matches.
    pub fn set_modalities(&mut self, modalities: ModalitySet) -> Result<()> {
        let observation = ObservationModel::new(modalities, self.graph.num_lnls())?;
        let same_layout = self
            .observation
            .as_ref()
            .map_or(false, |old| old.modalities().names() == observation.modalities().names());

        if same_layout {
            let mut data = self.data.clone();
            for stage in data.values_mut() {
                stage.refresh(&observation, &self.space)?;
            }
            self.data = data;
        } else if !self.data.is_empty() {
            log::debug!("modality layout changed, dropping loaded patients");
            self.data.clear();
        }
        self.observation = Some(observation);
        Ok(())
    }

    fn observation(&self) -> Result<&ObservationModel> {
        self.observation
            .as_ref()
            .ok_or_else(|| LymphError::Modality("no modalities have been set".to_string()))
    }

    /// Load patients from a table, replacing previously loaded ones.
    ///
    /// # Arguments
    /// * `table` - patient table with `(modality, side, LNL)` columns
    /// * `side` - which side's columns to read, `None` for a table without sides
    pub fn load_patients(&mut self, table: &PatientTable, side: Option<Side>) -> Result<()> {
        let observation = self.observation()?;
        let rows = table.extract(side, observation.modalities(), &self.graph.lnl_names())?;
        self.load_groups(group_by_stage(rows))
    }

    /// Load already grouped patients, replacing previously loaded ones.
    pub fn load_groups(&mut self, groups: PatientGroups) -> Result<()> {
        let observation = self.observation()?;
        let mut data = BTreeMap::new();
        for (stage, patterns) in &groups {
            data.insert(
                stage.clone(),
                StageObservations::new(patterns, observation, &self.space)?,
            );
        }
        log::debug!(
            "loaded {} patients in {} stages",
            data.values().map(StageObservations::num_patients).sum::<usize>(),
            data.len()
        );
        self.data = data;
        Ok(())
    }

    /// Occupancy from the healthy state for every t in 0..=t_max.
    pub fn occupancy(&self, t_max: usize) -> Result<Array2<f64>> {
        self.transition
            .evolve(healthy_distribution(&self.space).view(), t_max)
    }

    /// State distribution at the diagnosis time, marginalized over `prior`.
    pub fn state_distribution(&self, prior: &TimeDistribution) -> Result<Array1<f64>> {
        marginalize_over_time(self.occupancy(prior.t_max())?.view(), prior)
    }

    /// Set new parameters, then return the log-likelihood of the loaded
    /// patients.
    ///
    /// Zero likelihood yields negative infinity, never an error.
    pub fn marginal_log_likelihood(&mut self, params: &[f64], priors: &TimePriors) -> Result<f64> {
        self.set_spread_probs(params)?;
        self.log_likelihood(priors)
    }

    /// Log-likelihood of the loaded patients under the current parameters.
    ///
    /// # Errors
    /// [`LymphError::DataFormat`] if no patients are loaded or a loaded
    /// stage has no time prior.
    pub fn log_likelihood(&self, priors: &TimePriors) -> Result<f64> {
        self.log_likelihood_where(priors, |_| true)
    }

    fn log_likelihood_where<F>(&self, priors: &TimePriors, selected: F) -> Result<f64>
    where
        F: Fn(&str) -> bool,
    {
        if self.data.is_empty() {
            return Err(LymphError::DataFormat("no patients loaded".to_string()));
        }
        let t_max = priors
            .t_max()
            .ok_or_else(|| LymphError::DataFormat("no time priors given".to_string()))?;
        let occupancy = self.occupancy(t_max)?;

        let mut total = 0.0;
        for (stage, observations) in self.data.iter().filter(|(stage, _)| selected(stage)) {
            let prior = stage_prior(priors, stage)?;
            let dist = marginalize_over_time(occupancy.view(), prior)?;
            total += observations.log_likelihood(dist.view());
        }
        Ok(total)
    }

    /// Likelihood of a single pattern under a time prior.
    pub fn pattern_likelihood(&self, diagnosis: &Diagnosis, prior: &TimeDistribution) -> Result<f64> {
        let column = self.observation()?.column(&self.space, diagnosis)?;
        Ok(self.state_distribution(prior)?.dot(&column))
    }

    /// Log-likelihood with binomial time priors whose parameters are learned.
    ///
    /// # Arguments
    /// * `theta` - spread probabilities, then one binomial `p` for every stage
    ///   after the first
    /// * `stages` - stage labels to sum over; the first uses `first_p`
    /// * `first_p` - fixed binomial parameter of the first stage
    /// * `t_max` - last time step of every prior
    ///
    /// Loaded stages not listed in `stages` are left out of the sum.
    pub fn combined_log_likelihood(
        &mut self,
        theta: &[f64],
        stages: &[&str],
        first_p: f64,
        t_max: usize,
    ) -> Result<f64> {
        let num_edges = self.graph.num_edges();
        let (spread_probs, priors) = split_binomial_theta(theta, num_edges, stages, first_p, t_max)?;
        self.set_spread_probs(spread_probs)?;
        self.log_likelihood_where(&priors, |stage| stages.iter().any(|s| *s == stage))
    }

    /// Log-likelihood with a fixed diagnosis time per stage.
    ///
    /// `theta` holds the spread probabilities followed by one time per stage.
    /// Times are rounded to the nearest step.
    pub fn diagnose_time_log_likelihood(
        &mut self,
        theta: &[f64],
        stages: &[&str],
        max_t: usize,
    ) -> Result<f64> {
        let num_edges = self.graph.num_edges();
        if theta.len() != num_edges + stages.len() {
            return Err(LymphError::Parameter(format!(
                "expected {} spread probabilities and {} diagnosis times, got {} values",
                num_edges,
                stages.len(),
                theta.len()
            )));
        }
        let (spread_probs, times) = theta.split_at(num_edges);

        let mut priors = TimePriors::new();
        for (stage, &time) in stages.iter().zip(times) {
            let rounded = time.round();
            if !(0.0..=max_t as f64).contains(&rounded) {
                return Err(LymphError::Parameter(format!(
                    "diagnosis time {} for stage '{}' outside 0..={}",
                    time, stage, max_t
                )));
            }
            priors.insert(stage, TimeDistribution::point_mass(rounded as usize, max_t)?)?;
        }
        self.marginal_log_likelihood(spread_probs, &priors)
    }

    /// Posterior over hidden states given a (possibly incomplete) diagnosis.
    pub fn posterior_state_distribution(
        &self,
        diagnosis: &Diagnosis,
        prior: &TimeDistribution,
    ) -> Result<Array1<f64>> {
        let column = self.observation()?.column(&self.space, diagnosis)?;
        let joint = self.state_distribution(prior)? * &column;
        let evidence = joint.sum();
        if evidence <= 0.0 {
            return Err(LymphError::DataFormat(
                "diagnosis has zero probability under the current parameters".to_string(),
            ));
        }
        Ok(joint / evidence)
    }

    /// Probability of an involvement pattern given a diagnosis.
    ///
    /// # Arguments
    /// * `involvement` - per LNL `Some(true)`, `Some(false)` or `None` for
    ///   "either"
    /// * `diagnosis` - the observed pattern, see [`ObservationModel::diagnosis_from_map`]
    /// * `prior` - time prior of the patient's stage
    pub fn risk(
        &self,
        involvement: &[Option<bool>],
        diagnosis: &Diagnosis,
        prior: &TimeDistribution,
    ) -> Result<f64> {
        let evidence = self.side_evidence(involvement, diagnosis, prior.t_max())?;
        let pmf = ArrayView1::from(prior.pmf());
        let numerator = evidence.matching.dot(&pmf);
        let denominator = evidence.total.dot(&pmf);
        if denominator <= 0.0 {
            return Err(LymphError::DataFormat(
                "diagnosis has zero probability under the current parameters".to_string(),
            ));
        }
        Ok(numerator / denominator)
    }

    /// Per time step evidence of a diagnosis, with and without restricting
    /// the hidden state to `involvement`.
    pub(crate) fn side_evidence(
        &self,
        involvement: &[Option<bool>],
        diagnosis: &Diagnosis,
        t_max: usize,
    ) -> Result<SideEvidence> {
        let n = self.graph.num_lnls();
        if involvement.len() != n {
            return Err(LymphError::DataFormat(format!(
                "involvement has {} entries, model has {} LNLs",
                involvement.len(),
                n
            )));
        }
        let column = self.observation()?.column(&self.space, diagnosis)?;
        let mask: Vec<bool> = self.space.iter().map(|s| s.matches(involvement)).collect();
        let occupancy = self.occupancy(t_max)?;
        Ok(SideEvidence {
            matching: evidence_by_time(occupancy.view(), column.view(), Some(&mask)),
            total: evidence_by_time(occupancy.view(), column.view(), None),
        })
    }

    pub(crate) fn stage_data(&self) -> &BTreeMap<String, StageObservations> {
        &self.data
    }
}

/// Evidence of one side's diagnosis per time step.
pub(crate) struct SideEvidence {
    pub matching: Array1<f64>,
    pub total: Array1<f64>,
}

pub(crate) fn stage_prior<'a>(priors: &'a TimePriors, stage: &str) -> Result<&'a TimeDistribution> {
    priors.get(stage).ok_or_else(|| {
        LymphError::DataFormat(format!("no time prior for stage '{}'", stage))
    })
}

/// Split `theta` into spread probabilities and binomial time priors.
pub(crate) fn split_binomial_theta<'a>(
    theta: &'a [f64],
    num_spread: usize,
    stages: &[&str],
    first_p: f64,
    t_max: usize,
) -> Result<(&'a [f64], TimePriors)> {
    check_probability("first_p", first_p)?;
    let Some((first, later)) = stages.split_first() else {
        return Err(LymphError::Parameter("at least one stage is required".to_string()));
    };
    if theta.len() != num_spread + later.len() {
        return Err(LymphError::Parameter(format!(
            "expected {} spread probabilities and {} time parameters, got {} values",
            num_spread,
            later.len(),
            theta.len()
        )));
    }
    let (spread_probs, time_params) = theta.split_at(num_spread);

    let mut priors = TimePriors::new();
    priors.insert(first, TimeDistribution::binomial(t_max, first_p)?)?;
    for (stage, &p) in later.iter().zip(time_params) {
        priors.insert(stage, TimeDistribution::binomial(t_max, p)?)?;
    }
    Ok((spread_probs, priors))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_space::State;

    fn model() -> Unilateral {
        let spec = GraphSpec::new()
            .tumor("T", &["A", "B"])
            .lnl("A", &["B"])
            .lnl("B", &[]);
        let mut model = Unilateral::from_spec(spec).unwrap();
        model
            .set_modalities(ModalitySet::from_pairs([("path", [1.0, 1.0])]).unwrap())
            .unwrap();
        model
    }

    #[test]
    fn test_failed_update_keeps_parameters() {
        let mut model = model();
        model.set_spread_probs(&[0.2, 0.3, 0.1]).unwrap();
        let before = model.transition_matrix().clone();
        assert!(model.set_spread_probs(&[0.2, 1.3, 0.1]).is_err());
        assert_eq!(model.spread_probs(), &[0.2, 0.3, 0.1]);
        assert_eq!(model.transition_matrix(), &before);
    }

    #[test]
    fn test_scenario_pattern_likelihoods() {
        let mut model = model();
        model.set_spread_probs(&[0.2, 0.3, 0.1]).unwrap();
        let prior = TimeDistribution::point_mass(1, 1).unwrap();

        let a_only = Diagnosis(vec![Some(true), Some(false)]);
        let healthy = Diagnosis(vec![Some(false), Some(false)]);
        let p_a = model.pattern_likelihood(&a_only, &prior).unwrap();
        let p_h = model.pattern_likelihood(&healthy, &prior).unwrap();
        assert!((p_a - 0.2 * 0.7).abs() < 1e-12);
        assert!((p_h - 0.8 * 0.7).abs() < 1e-12);

        let total: f64 = (0..4)
            .map(|c| model.pattern_likelihood(&Diagnosis::complete(c, 2), &prior).unwrap())
            .sum();
        assert!((total - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_log_likelihood_requires_data_and_priors() {
        let mut model = model();
        let mut priors = TimePriors::new();
        priors.insert("early", TimeDistribution::uniform(3)).unwrap();
        assert!(model.log_likelihood(&priors).is_err());

        let rows = vec![("late".to_string(), Diagnosis(vec![Some(true), None]))];
        model.load_groups(group_by_stage(rows)).unwrap();
        assert!(matches!(
            model.log_likelihood(&priors),
            Err(LymphError::DataFormat(_))
        ));
    }

    #[test]
    fn test_zero_likelihood_is_negative_infinity() {
        let mut model = model();
        let rows = vec![("early".to_string(), Diagnosis(vec![Some(true), Some(true)]))];
        model.load_groups(group_by_stage(rows)).unwrap();
        let mut priors = TimePriors::new();
        priors.insert("early", TimeDistribution::uniform(4)).unwrap();

        let llh = model.marginal_log_likelihood(&[0.0, 0.0, 0.0], &priors).unwrap();
        assert_eq!(llh, f64::NEG_INFINITY);
    }

    #[test]
    fn test_posterior_and_risk() {
        let mut model = model();
        model.set_spread_probs(&[0.2, 0.3, 0.1]).unwrap();
        let prior = TimeDistribution::uniform(5);

        let diagnosis = Diagnosis(vec![Some(true), None]);
        let posterior = model.posterior_state_distribution(&diagnosis, &prior).unwrap();
        assert!((posterior.sum() - 1.0).abs() < 1e-12);
        let healthy = model.state_space().index_of(State::healthy());
        assert_eq!(posterior[healthy], 0.0);

        let risk_a = model.risk(&[Some(true), None], &diagnosis, &prior).unwrap();
        assert!((risk_a - 1.0).abs() < 1e-12);
        let risk_b = model.risk(&[None, Some(true)], &diagnosis, &prior).unwrap();
        assert!(risk_b > 0.0 && risk_b < 1.0);
        assert!(model.risk(&[Some(true)], &diagnosis, &prior).is_err());
    }

    #[test]
    fn test_diagnose_time_rounding() {
        let mut model = model();
        let rows = vec![("early".to_string(), Diagnosis(vec![Some(true), Some(false)]))];
        model.load_groups(group_by_stage(rows)).unwrap();

        let llh = model
            .diagnose_time_log_likelihood(&[0.2, 0.3, 0.1, 0.6], &["early"], 4)
            .unwrap();
        assert!((llh - (0.2f64 * 0.7).ln()).abs() < 1e-12);
        assert!(model
            .diagnose_time_log_likelihood(&[0.2, 0.3, 0.1, 4.6], &["early"], 4)
            .is_err());
    }

    #[test]
    fn test_combined_log_likelihood_checks_first_p() {
        let mut model = model();
        let rows = vec![("early".to_string(), Diagnosis(vec![Some(false), Some(false)]))];
        model.load_groups(group_by_stage(rows)).unwrap();
        assert!(model
            .combined_log_likelihood(&[0.2, 0.3, 0.1], &["early"], 1.5, 5)
            .is_err());
        let llh = model
            .combined_log_likelihood(&[0.2, 0.3, 0.1], &["early"], 0.3, 5)
            .unwrap();
        assert!(llh < 0.0 && llh.is_finite());
    }

    fn noisy_model(specificity: f64, sensitivity: f64) -> Unilateral {
        let mut model = model();
        model
            .set_modalities(ModalitySet::from_pairs([("CT", [specificity, sensitivity])]).unwrap())
            .unwrap();
        model.set_spread_probs(&[0.25, 0.1, 0.3]).unwrap();
        model
    }

    fn two_stage_rows() -> Vec<(String, Diagnosis)> {
        vec![
            ("early".to_string(), Diagnosis(vec![Some(true), Some(false)])),
            ("early".to_string(), Diagnosis(vec![Some(false), Some(false)])),
            ("early".to_string(), Diagnosis(vec![Some(false), None])),
            ("late".to_string(), Diagnosis(vec![Some(true), Some(true)])),
            ("late".to_string(), Diagnosis(vec![Some(true), Some(false)])),
        ]
    }

    #[test]
    fn test_modality_refresh_keeps_patients() {
        let mut priors = TimePriors::new();
        priors.insert("early", TimeDistribution::binomial(6, 0.3).unwrap()).unwrap();
        priors.insert("late", TimeDistribution::binomial(6, 0.6).unwrap()).unwrap();

        let mut model = noisy_model(0.76, 0.81);
        model.load_groups(group_by_stage(two_stage_rows())).unwrap();
        let before = model.log_likelihood(&priors).unwrap();

        model
            .set_modalities(ModalitySet::from_pairs([("CT", [0.9, 0.6])]).unwrap())
            .unwrap();
        assert_eq!(model.num_patients(), 5);
        let after = model.log_likelihood(&priors).unwrap();

        let mut fresh = noisy_model(0.9, 0.6);
        fresh.load_groups(group_by_stage(two_stage_rows())).unwrap();
        let expected = fresh.log_likelihood(&priors).unwrap();
        assert!((after - expected).abs() < 1e-12);
        assert!((after - before).abs() > 1e-6);

        // a renamed modality changes the slot layout
        model
            .set_modalities(ModalitySet::from_pairs([("MRI", [0.9, 0.6])]).unwrap())
            .unwrap();
        assert_eq!(model.num_patients(), 0);
    }

    #[test]
    fn test_combined_log_likelihood_two_stages() {
        let mut model = noisy_model(0.76, 0.81);
        model.load_groups(group_by_stage(two_stage_rows())).unwrap();
        let spread = [0.25, 0.1, 0.3];

        let combined = model
            .combined_log_likelihood(&[0.25, 0.1, 0.3, 0.7], &["early", "late"], 0.3, 8)
            .unwrap();
        let mut priors = TimePriors::new();
        priors.insert("early", TimeDistribution::binomial(8, 0.3).unwrap()).unwrap();
        priors.insert("late", TimeDistribution::binomial(8, 0.7).unwrap()).unwrap();
        let explicit = model.marginal_log_likelihood(&spread, &priors).unwrap();
        assert!((combined - explicit).abs() < 1e-12);

        // listing order decides which stage gets the fixed parameter
        let reversed = model
            .combined_log_likelihood(&[0.25, 0.1, 0.3, 0.7], &["late", "early"], 0.3, 8)
            .unwrap();
        let mut swapped = TimePriors::new();
        swapped.insert("late", TimeDistribution::binomial(8, 0.3).unwrap()).unwrap();
        swapped.insert("early", TimeDistribution::binomial(8, 0.7).unwrap()).unwrap();
        let expected = model.marginal_log_likelihood(&spread, &swapped).unwrap();
        assert!((reversed - expected).abs() < 1e-12);
        assert!((reversed - combined).abs() > 1e-6);
    }

    #[test]
    fn test_combined_log_likelihood_sums_listed_stages() {
        let mut model = noisy_model(0.76, 0.81);
        model.load_groups(group_by_stage(two_stage_rows())).unwrap();
        let early_only = model
            .combined_log_likelihood(&[0.25, 0.1, 0.3], &["early"], 0.3, 8)
            .unwrap();

        let mut reference = noisy_model(0.76, 0.81);
        let rows = two_stage_rows().into_iter().filter(|(stage, _)| stage == "early");
        reference.load_groups(group_by_stage(rows)).unwrap();
        let mut priors = TimePriors::new();
        priors.insert("early", TimeDistribution::binomial(8, 0.3).unwrap()).unwrap();
        let expected = reference.log_likelihood(&priors).unwrap();
        assert!((early_only - expected).abs() < 1e-12);
    }
}
