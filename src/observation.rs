//! Observation model: probability of a diagnostic pattern given a hidden state.
//!
//! A pattern holds one ternary slot per (modality, LNL) pair, laid out
//! modality-major: slot `m * N + k` is modality `m` looking at LNL `k`.
//! `None` marks a missing observation and contributes a factor of one.

use std::collections::BTreeMap;

use ndarray::{Array1, Array2};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{LymphError, Result};
use crate::state_space::{State, StateSpace};

/// Largest slot count for which [`ObservationModel::dense`] is allowed.
pub const MAX_DENSE_SLOTS: usize = 16;

/// A diagnostic method characterized by specificity and sensitivity.
///
/// Serialized as `[specificity, sensitivity]`; deserializing validates the
/// same way [`Modality::new`] does.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "[f64; 2]", into = "[f64; 2]")]
pub struct Modality {
    specificity: f64,
    sensitivity: f64,
}

impl Modality {
    pub fn new(specificity: f64, sensitivity: f64) -> Result<Self> {
        for (what, value) in [("specificity", specificity), ("sensitivity", sensitivity)] {
            if !(0.0..=1.0).contains(&value) {
                return Err(LymphError::Modality(format!(
                    "{} must be in [0, 1], got {}",
                    what, value
                )));
            }
        }
        Ok(Self {
            specificity,
            sensitivity,
        })
    }

    #[inline]
    pub fn specificity(&self) -> f64 {
        self.specificity
    }

    #[inline]
    pub fn sensitivity(&self) -> f64 {
        self.sensitivity
    }

    /// P(observed | involved) for one slot.
    #[inline]
    pub fn prob(&self, involved: bool, observed: bool) -> f64 {
        match (involved, observed) {
            (true, true) => self.sensitivity,
            (true, false) => 1.0 - self.sensitivity,
            (false, true) => 1.0 - self.specificity,
            (false, false) => self.specificity,
        }
    }
}

impl TryFrom<[f64; 2]> for Modality {
    type Error = LymphError;

    fn try_from([specificity, sensitivity]: [f64; 2]) -> Result<Self> {
        Self::new(specificity, sensitivity)
    }
}

impl From<Modality> for [f64; 2] {
    fn from(modality: Modality) -> Self {
        [modality.specificity, modality.sensitivity]
    }
}

/// Named modalities in a fixed order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ModalitySet {
    entries: Vec<(String, Modality)>,
}

impl ModalitySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a modality; names must be unique.
    pub fn insert(&mut self, name: &str, modality: Modality) -> Result<()> {
        if self.index_of(name).is_some() {
            return Err(LymphError::Modality(format!(
                "duplicate modality '{}'",
                name
            )));
        }
        self.entries.push((name.to_string(), modality));
        Ok(())
    }

    /// Build from `(name, [specificity, sensitivity])` pairs.
    pub fn from_pairs<'a, I>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, [f64; 2])>,
    {
        let mut set = Self::new();
        for (name, [spec, sens]) in pairs {
            set.insert(name, Modality::new(spec, sens)?)?;
        }
        Ok(set)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Modality> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, m)| m)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|(n, _)| n == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Modality)> {
        self.entries.iter().map(|(n, m)| (n.as_str(), m))
    }
}

/// One patient's observations over all slots.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Diagnosis(pub Vec<Option<bool>>);

impl Diagnosis {
    /// Pattern with every slot missing.
    pub fn missing(num_slots: usize) -> Self {
        Self(vec![None; num_slots])
    }

    /// Complete pattern number `index` in binary counting order, slot 0 first.
    pub fn complete(index: usize, num_slots: usize) -> Self {
        Self(
            (0..num_slots)
                .map(|s| Some((index >> (num_slots - 1 - s)) & 1 == 1))
                .collect(),
        )
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn slots(&self) -> &[Option<bool>] {
        &self.0
    }

    pub fn is_complete(&self) -> bool {
        self.0.iter().all(Option::is_some)
    }
}

/// Maps hidden states to pattern probabilities for a fixed modality set.
#[derive(Clone, Debug, PartialEq)]
pub struct ObservationModel {
    modalities: ModalitySet,
    num_lnls: usize,
}

impl ObservationModel {
    pub fn new(modalities: ModalitySet, num_lnls: usize) -> Result<Self> {
        if modalities.is_empty() {
            return Err(LymphError::Modality(
                "at least one modality is required".to_string(),
            ));
        }
        Ok(Self {
            modalities,
            num_lnls,
        })
    }

    pub fn modalities(&self) -> &ModalitySet {
        &self.modalities
    }

    #[inline]
    pub fn num_lnls(&self) -> usize {
        self.num_lnls
    }

    /// Number of pattern slots (modalities × LNLs).
    #[inline]
    pub fn num_slots(&self) -> usize {
        self.modalities.len() * self.num_lnls
    }

    fn check_length(&self, pattern: &Diagnosis) -> Result<()> {
        if pattern.len() != self.num_slots() {
            return Err(LymphError::DataFormat(format!(
                "diagnosis has {} slots, model expects {}",
                pattern.len(),
                self.num_slots()
            )));
        }
        Ok(())
    }

    /// P(pattern | state). Missing slots are marginalized out.
    pub fn likelihood_of_pattern(&self, state: State, pattern: &Diagnosis) -> Result<f64> {
        self.check_length(pattern)?;
        Ok(self.likelihood_unchecked(state, pattern))
    }

    fn likelihood_unchecked(&self, state: State, pattern: &Diagnosis) -> f64 {
        let n = self.num_lnls;
        let mut prob = 1.0;
        for (m, (_, modality)) in self.modalities.iter().enumerate() {
            for k in 0..n {
                if let Some(observed) = pattern.0[m * n + k] {
                    prob *= modality.prob(state.is_involved(k), observed);
                }
            }
        }
        prob
    }

    /// Column of B for one pattern, over all states in canonical order.
    pub fn column(&self, space: &StateSpace, pattern: &Diagnosis) -> Result<Array1<f64>> {
        self.check_length(pattern)?;
        Ok(space
            .iter()
            .map(|state| self.likelihood_unchecked(state, pattern))
            .collect())
    }

    /// Full B over all complete patterns. Only for small slot counts.
    ///
    /// # Returns
    /// 2^N × 2^M matrix; column `c` is [`Diagnosis::complete`]`(c, M)`.
    pub fn dense(&self, space: &StateSpace) -> Result<Array2<f64>> {
        let m = self.num_slots();
        if m > MAX_DENSE_SLOTS {
            return Err(LymphError::Modality(format!(
                "dense observation matrix limited to {} slots, model has {}",
                MAX_DENSE_SLOTS, m
            )));
        }
        let num_patterns = 1usize << m;
        let mut b = Array2::<f64>::zeros((space.num_states(), num_patterns));
        for c in 0..num_patterns {
            let pattern = Diagnosis::complete(c, m);
            for (i, state) in space.iter().enumerate() {
                b[[i, c]] = self.likelihood_unchecked(state, &pattern);
            }
        }
        Ok(b)
    }

    /// Assemble a pattern from per-modality LNL observations.
    ///
    /// Modalities absent from `by_modality` are fully missing.
    pub fn diagnosis_from_map(
        &self,
        by_modality: &BTreeMap<String, Vec<Option<bool>>>,
    ) -> Result<Diagnosis> {
        let n = self.num_lnls;
        let mut slots = vec![None; self.num_slots()];
        for (name, values) in by_modality {
            let m = self.modalities.index_of(name).ok_or_else(|| {
                LymphError::DataFormat(format!("unknown modality '{}'", name))
            })?;
            if values.len() != n {
                return Err(LymphError::DataFormat(format!(
                    "modality '{}' has {} LNL entries, expected {}",
                    name,
                    values.len(),
                    n
                )));
            }
            slots[m * n..(m + 1) * n].copy_from_slice(values);
        }
        Ok(Diagnosis(slots))
    }

    /// Draw a complete pattern for a patient in `state`.
    pub fn sample_diagnosis<R: Rng + ?Sized>(&self, state: State, rng: &mut R) -> Diagnosis {
        let n = self.num_lnls;
        let mut slots = Vec::with_capacity(self.num_slots());
        for (_, modality) in self.modalities.iter() {
            for k in 0..n {
                let p_positive = modality.prob(state.is_involved(k), true);
                slots.push(Some(rng.gen::<f64>() < p_positive));
            }
        }
        Diagnosis(slots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn model() -> ObservationModel {
        let modalities =
            ModalitySet::from_pairs([("CT", [0.76, 0.81]), ("path", [1.0, 1.0])]).unwrap();
        ObservationModel::new(modalities, 2).unwrap()
    }

    #[test]
    fn test_rejects_bad_modality() {
        assert!(Modality::new(1.2, 0.5).is_err());
        assert!(Modality::new(0.5, -0.1).is_err());
        assert!(ModalitySet::from_pairs([("CT", [0.7, 0.8]), ("CT", [0.7, 0.8])]).is_err());
        assert!(ObservationModel::new(ModalitySet::new(), 2).is_err());
    }

    #[test]
    fn test_deserialize_validates() {
        let parsed: Modality = serde_json::from_str("[0.76, 0.81]").unwrap();
        assert_eq!(parsed, Modality::new(0.76, 0.81).unwrap());
        assert_eq!(serde_json::to_string(&parsed).unwrap(), "[0.76,0.81]");

        assert!(serde_json::from_str::<Modality>("[2.5, -0.7]").is_err());
        assert!(serde_json::from_str::<Modality>("[0.9, 1.01]").is_err());
        assert!(
            serde_json::from_str::<Modality>(r#"{"specificity": 2.5, "sensitivity": -0.7}"#)
                .is_err()
        );
    }

    #[test]
    fn test_single_slot_products() {
        let obs = model();
        let state = State::from_involvement(&[true, false]);
        let pattern = Diagnosis(vec![Some(true), Some(true), None, None]);
        let p = obs.likelihood_of_pattern(state, &pattern).unwrap();
        assert!((p - 0.81 * 0.24).abs() < 1e-12);
    }

    #[test]
    fn test_missing_slots_are_neutral() {
        let obs = model();
        let state = State::from_involvement(&[true, true]);
        let p = obs
            .likelihood_of_pattern(state, &Diagnosis::missing(4))
            .unwrap();
        assert_eq!(p, 1.0);
    }

    #[test]
    fn test_dense_rows_sum_to_one() {
        let obs = model();
        let space = StateSpace::new(2).unwrap();
        let b = obs.dense(&space).unwrap();
        for row in b.rows() {
            assert!((row.sum() - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_diagnosis_from_map() {
        let obs = model();
        let mut map = BTreeMap::new();
        map.insert("path".to_string(), vec![Some(false), None]);
        let diagnosis = obs.diagnosis_from_map(&map).unwrap();
        assert_eq!(diagnosis.0, vec![None, None, Some(false), None]);

        map.insert("MRI".to_string(), vec![None, None]);
        assert!(obs.diagnosis_from_map(&map).is_err());
    }

    #[test]
    fn test_perfect_sampling_reveals_state() {
        let obs = model();
        let mut rng = StdRng::seed_from_u64(7);
        let state = State::from_involvement(&[false, true]);
        let diagnosis = obs.sample_diagnosis(state, &mut rng);
        assert!(diagnosis.is_complete());
        assert_eq!(&diagnosis.0[2..], &[Some(false), Some(true)]);
    }
}
