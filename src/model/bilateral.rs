//! Two coupled unilateral models, one per side of the neck.
//!
//! The sides are conditionally independent given the stage, so joint
//! likelihoods are products of per-side quantities and the product state
//! space is never built.

use std::collections::BTreeMap;

use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};

use crate::data::PatientTable;
use crate::error::{LymphError, Result};
use crate::graph::{Graph, GraphSpec};
use crate::likelihood::{marginalize_over_time, summed_log_likelihood, StageObservations};
use crate::model::unilateral::{split_binomial_theta, stage_prior, SideEvidence, Unilateral};
use crate::observation::{Diagnosis, ModalitySet, ObservationModel};
use crate::params::{ParameterSchema, Side, Symmetry};
use crate::state_space::StateSpace;
use crate::time_prior::{TimeDistribution, TimePriors};

/// How the unknown diagnosis time enters the joint likelihood.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SideCoupling {
    /// Product of the per-side time-marginalized likelihoods.
    #[default]
    Factorized,
    /// Both sides are diagnosed at one common unknown time:
    /// `Σ_t p(t) · L_ipsi(t) · L_contra(t)`.
    SharedDiagnosisTime,
}

/// Patients of one stage: distinct patterns per side plus which pairs occur.
#[derive(Clone, Debug)]
struct JointStage {
    ipsi: StageObservations,
    contra: StageObservations,
    /// (ipsi pattern index, contra pattern index)
    pairs: Vec<(usize, usize)>,
    counts: Vec<usize>,
}

impl JointStage {
    fn new(
        pairs: &BTreeMap<(Diagnosis, Diagnosis), usize>,
        observation: &ObservationModel,
        space: &StateSpace,
    ) -> Result<Self> {
        let mut ipsi_groups = BTreeMap::new();
        let mut contra_groups = BTreeMap::new();
        for ((ipsi, contra), &count) in pairs {
            *ipsi_groups.entry(ipsi.clone()).or_insert(0) += count;
            *contra_groups.entry(contra.clone()).or_insert(0) += count;
        }
        let ipsi = StageObservations::new(&ipsi_groups, observation, space)?;
        let contra = StageObservations::new(&contra_groups, observation, space)?;

        let ipsi_index: BTreeMap<&Diagnosis, usize> =
            ipsi.patterns().iter().enumerate().map(|(i, d)| (d, i)).collect();
        let contra_index: BTreeMap<&Diagnosis, usize> =
            contra.patterns().iter().enumerate().map(|(i, d)| (d, i)).collect();
        let index_pairs = pairs
            .keys()
            .map(|(i, c)| (ipsi_index[i], contra_index[c]))
            .collect();
        let counts = pairs.values().copied().collect();

        Ok(Self {
            ipsi,
            contra,
            pairs: index_pairs,
            counts,
        })
    }

    fn num_patients(&self) -> usize {
        self.counts.iter().sum()
    }
}

/// Bilateral lymphatic progression model.
#[derive(Clone, Debug)]
pub struct Bilateral {
    ipsi: Unilateral,
    contra: Unilateral,
    symmetry: Symmetry,
    coupling: SideCoupling,
    schema: ParameterSchema,
    data: BTreeMap<String, JointStage>,
}

impl Bilateral {
    pub fn new(graph: Graph, symmetry: Symmetry, coupling: SideCoupling) -> Result<Self> {
        let schema = ParameterSchema::bilateral(&graph, symmetry);
        let ipsi = Unilateral::new(graph.clone())?;
        let contra = Unilateral::new(graph)?;
        Ok(Self {
            ipsi,
            contra,
            symmetry,
            coupling,
            schema,
            data: BTreeMap::new(),
        })
    }

    pub fn from_spec(spec: GraphSpec, symmetry: Symmetry, coupling: SideCoupling) -> Result<Self> {
        Self::new(Graph::new(spec)?, symmetry, coupling)
    }

    pub fn ipsi(&self) -> &Unilateral {
        &self.ipsi
    }

    pub fn contra(&self) -> &Unilateral {
        &self.contra
    }

    pub fn side(&self, side: Side) -> &Unilateral {
        match side {
            Side::Ipsi => &self.ipsi,
            Side::Contra => &self.contra,
        }
    }

    pub fn symmetry(&self) -> Symmetry {
        self.symmetry
    }

    pub fn coupling(&self) -> SideCoupling {
        self.coupling
    }

    pub fn set_coupling(&mut self, coupling: SideCoupling) {
        self.coupling = coupling;
    }

    pub fn schema(&self) -> &ParameterSchema {
        &self.schema
    }

    pub fn num_params(&self) -> usize {
        self.schema.len()
    }

    pub fn num_patients(&self) -> usize {
        self.data.values().map(JointStage::num_patients).sum()
    }

    /// Current parameters in schema order.
    pub fn params(&self) -> Vec<f64> {
        self.schema
            .encode(self.ipsi.spread_probs(), self.contra.spread_probs())
    }

    /// Decode a flat parameter vector onto both sides.
    ///
    /// Both transition matrices are rebuilt before either side is updated.
    pub fn set_params(&mut self, values: &[f64]) -> Result<()> {
        let ipsi_probs = self.schema.decode(values, Side::Ipsi)?;
        let contra_probs = self.schema.decode(values, Side::Contra)?;
        let ipsi_matrix = self.ipsi.prepare_spread_probs(&ipsi_probs)?;
        let contra_matrix = self.contra.prepare_spread_probs(&contra_probs)?;
        self.ipsi.commit_spread_probs(&ipsi_probs, ipsi_matrix);
        self.contra.commit_spread_probs(&contra_probs, contra_matrix);
        Ok(())
    }

    /// Set the same modalities on both sides.
    pub fn set_modalities(&mut self, modalities: ModalitySet) -> Result<()> {
        let observation = ObservationModel::new(modalities.clone(), self.ipsi.graph().num_lnls())?;
        let same_layout = self
            .ipsi
            .observation_model()
            .map_or(false, |old| old.modalities().names() == modalities.names());

        let mut ipsi = self.ipsi.clone();
        let mut contra = self.contra.clone();
        ipsi.set_modalities(modalities.clone())?;
        contra.set_modalities(modalities)?;

        let mut data = BTreeMap::new();
        if same_layout {
            for (stage, joint) in &self.data {
                let mut joint = joint.clone();
                joint.ipsi.refresh(&observation, ipsi.state_space())?;
                joint.contra.refresh(&observation, contra.state_space())?;
                data.insert(stage.clone(), joint);
            }
        } else if !self.data.is_empty() {
            log::debug!("modality layout changed, dropping loaded patients");
        }

        self.ipsi = ipsi;
        self.contra = contra;
        self.data = data;
        Ok(())
    }

    fn observation(&self) -> Result<&ObservationModel> {
        self.ipsi
            .observation_model()
            .ok_or_else(|| LymphError::Modality("no modalities have been set".to_string()))
    }

    /// Load patients from a table with `(modality, side, LNL)` columns for
    /// both sides, replacing previously loaded ones.
    pub fn load_patients(&mut self, table: &PatientTable) -> Result<()> {
        let observation = self.observation()?;
        let lnl_names = self.ipsi.graph().lnl_names();
        let ipsi_rows = table.extract(Some(Side::Ipsi), observation.modalities(), &lnl_names)?;
        let contra_rows = table.extract(Some(Side::Contra), observation.modalities(), &lnl_names)?;

        let mut grouped: BTreeMap<String, BTreeMap<(Diagnosis, Diagnosis), usize>> = BTreeMap::new();
        for ((stage, ipsi), (_, contra)) in ipsi_rows.into_iter().zip(contra_rows) {
            *grouped
                .entry(stage)
                .or_default()
                .entry((ipsi, contra))
                .or_insert(0) += 1;
        }

        let mut data = BTreeMap::new();
        for (stage, pairs) in &grouped {
            data.insert(stage.clone(), JointStage::new(pairs, observation, self.ipsi.state_space())?);
        }
        log::debug!(
            "loaded {} bilateral patients in {} stages",
            table.len(),
            data.len()
        );
        self.data = data;
        Ok(())
    }

    /// Set new parameters, then return the joint log-likelihood of the
    /// loaded patients.
    pub fn marginal_log_likelihood(&mut self, params: &[f64], priors: &TimePriors) -> Result<f64> {
        self.set_params(params)?;
        self.log_likelihood(priors)
    }

    /// Joint log-likelihood under the current parameters.
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
        let ipsi_occupancy = self.ipsi.occupancy(t_max)?;
        let contra_occupancy = self.contra.occupancy(t_max)?;

        let mut total = 0.0;
        for (stage, joint) in self.data.iter().filter(|(stage, _)| selected(stage)) {
            let prior = stage_prior(priors, stage)?;
            let likelihoods: Array1<f64> = match self.coupling {
                SideCoupling::Factorized => {
                    let ipsi_dist = marginalize_over_time(ipsi_occupancy.view(), prior)?;
                    let contra_dist = marginalize_over_time(contra_occupancy.view(), prior)?;
                    let l_ipsi = joint.ipsi.pattern_likelihoods(ipsi_dist.view());
                    let l_contra = joint.contra.pattern_likelihoods(contra_dist.view());
                    joint
                        .pairs
                        .iter()
                        .map(|&(a, b)| l_ipsi[a] * l_contra[b])
                        .collect()
                }
                SideCoupling::SharedDiagnosisTime => {
                    // (t_max + 1) × patterns, likelihood per time step
                    let l_ipsi = ipsi_occupancy.dot(&joint.ipsi.columns());
                    let l_contra = contra_occupancy.dot(&joint.contra.columns());
                    let pmf = prior.pmf();
                    joint
                        .pairs
                        .iter()
                        .map(|&(a, b)| {
                            (0..pmf.len())
                                .map(|t| pmf[t] * l_ipsi[[t, a]] * l_contra[[t, b]])
                                .sum::<f64>()
                        })
                        .collect()
                }
            };
            total += summed_log_likelihood(likelihoods.view(), &joint.counts);
        }
        Ok(total)
    }

    /// Joint likelihood of one patient's two diagnoses.
    pub fn pattern_likelihood(
        &self,
        ipsi: &Diagnosis,
        contra: &Diagnosis,
        prior: &TimeDistribution,
    ) -> Result<f64> {
        let (ipsi_ev, contra_ev) = self.evidence(None, None, ipsi, contra, prior.t_max())?;
        Ok(self.combine(
            ipsi_ev.total.view(),
            contra_ev.total.view(),
            ArrayView1::from(prior.pmf()),
        ))
    }

    /// Log-likelihood with learnable binomial time priors.
    ///
    /// `theta` is the bilateral parameter vector followed by one binomial `p`
    /// per stage after the first. Only loaded stages listed in `stages` are
    /// summed.
    pub fn combined_log_likelihood(
        &mut self,
        theta: &[f64],
        stages: &[&str],
        first_p: f64,
        t_max: usize,
    ) -> Result<f64> {
        let (params, priors) = split_binomial_theta(theta, self.schema.len(), stages, first_p, t_max)?;
        self.set_params(params)?;
        self.log_likelihood_where(&priors, |stage| stages.iter().any(|s| *s == stage))
    }

    /// Probability of an involvement pattern on both sides given both sides'
    /// diagnoses.
    ///
    /// An all-`None` involvement on a side marginalizes that side.
    pub fn risk(
        &self,
        ipsi_involvement: &[Option<bool>],
        contra_involvement: &[Option<bool>],
        ipsi_diagnosis: &Diagnosis,
        contra_diagnosis: &Diagnosis,
        prior: &TimeDistribution,
    ) -> Result<f64> {
        let (ipsi_ev, contra_ev) = self.evidence(
            Some(ipsi_involvement),
            Some(contra_involvement),
            ipsi_diagnosis,
            contra_diagnosis,
            prior.t_max(),
        )?;
        let pmf = ArrayView1::from(prior.pmf());
        let numerator = self.combine(ipsi_ev.matching.view(), contra_ev.matching.view(), pmf);
        let denominator = self.combine(ipsi_ev.total.view(), contra_ev.total.view(), pmf);
        if denominator <= 0.0 {
            return Err(LymphError::DataFormat(
                "diagnosis has zero probability under the current parameters".to_string(),
            ));
        }
        Ok(numerator / denominator)
    }

    fn evidence(
        &self,
        ipsi_involvement: Option<&[Option<bool>]>,
        contra_involvement: Option<&[Option<bool>]>,
        ipsi_diagnosis: &Diagnosis,
        contra_diagnosis: &Diagnosis,
        t_max: usize,
    ) -> Result<(SideEvidence, SideEvidence)> {
        let any = vec![None; self.ipsi.graph().num_lnls()];
        let ipsi = self.ipsi.side_evidence(
            ipsi_involvement.unwrap_or(&any),
            ipsi_diagnosis,
            t_max,
        )?;
        let contra = self.contra.side_evidence(
            contra_involvement.unwrap_or(&any),
            contra_diagnosis,
            t_max,
        )?;
        Ok((ipsi, contra))
    }

    /// Combine per-time-step evidence of both sides under the coupling mode.
    fn combine(&self, ipsi: ArrayView1<f64>, contra: ArrayView1<f64>, pmf: ArrayView1<f64>) -> f64 {
        match self.coupling {
            SideCoupling::Factorized => ipsi.dot(&pmf) * contra.dot(&pmf),
            SideCoupling::SharedDiagnosisTime => (&ipsi * &contra).dot(&pmf),
        }
    }
}
