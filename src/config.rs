//! JSON model configuration.
//!
//! The graph is stored as an object whose keys are `"kind,name"` strings and
//! whose values are lists of target LNL names, e.g.
//! `{"tumor,primary": ["II", "III"], "lnl,II": ["III"], "lnl,III": []}`.
//! Object order is significant: it fixes LNL indices and the parameter
//! layout, so maps are read with insertion order preserved.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{LymphError, Result};
use crate::graph::{GraphSpec, NodeKind};
use crate::model::{Bilateral, SideCoupling, Unilateral};
use crate::observation::ModalitySet;
use crate::params::{Sharing, Symmetry};

fn default_true() -> bool {
    true
}

/// Everything needed to build a ready model except data and parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// `{"kind,name": [target, …]}`
    pub graph: Map<String, Value>,
    /// `{modality: [specificity, sensitivity]}`
    #[serde(default)]
    pub modalities: Map<String, Value>,
    /// Share base probabilities between sides (bilateral only).
    #[serde(default)]
    pub base_symmetric: bool,
    /// Share transition probabilities between sides (bilateral only).
    #[serde(default = "default_true")]
    pub trans_symmetric: bool,
    #[serde(default)]
    pub coupling: SideCoupling,
}

impl ModelConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Config for an existing graph and modality set.
    pub fn from_parts(
        spec: &GraphSpec,
        modalities: &ModalitySet,
        symmetry: Symmetry,
        coupling: SideCoupling,
    ) -> Self {
        let graph = spec
            .entries()
            .iter()
            .map(|(kind, name, targets)| {
                (
                    format!("{},{}", kind.as_str(), name),
                    Value::from(targets.clone()),
                )
            })
            .collect();
        let modalities = modalities
            .iter()
            .map(|(name, m)| {
                (
                    name.to_string(),
                    Value::from(vec![m.specificity(), m.sensitivity()]),
                )
            })
            .collect();
        Self {
            graph,
            modalities,
            base_symmetric: symmetry.base == Sharing::Shared,
            trans_symmetric: symmetry.transition == Sharing::Shared,
            coupling,
        }
    }

    /// Decode the `"kind,name"` graph object.
    ///
    /// # Errors
    /// [`LymphError::Graph`] for a key that is not exactly `kind,name` or
    /// names an unknown kind; [`LymphError::Config`] for a value that is not
    /// a list of strings.
    pub fn graph_spec(&self) -> Result<GraphSpec> {
        let mut spec = GraphSpec::new();
        for (key, value) in &self.graph {
            let (kind, name) = key
                .split_once(',')
                .filter(|(_, name)| !name.contains(','))
                .ok_or_else(|| {
                    LymphError::Graph(format!("graph key '{}' is not of the form 'kind,name'", key))
                })?;
            let kind = NodeKind::parse(kind.trim())?;
            let targets: Vec<String> = serde_json::from_value(value.clone())?;
            let targets: Vec<&str> = targets.iter().map(String::as_str).collect();
            spec.push(kind, name.trim(), &targets);
        }
        Ok(spec)
    }

    pub fn modality_set(&self) -> Result<ModalitySet> {
        let mut pairs = Vec::with_capacity(self.modalities.len());
        for (name, value) in &self.modalities {
            let spsn: [f64; 2] = serde_json::from_value(value.clone()).map_err(|e| {
                LymphError::Config(format!(
                    "modality '{}' must be [specificity, sensitivity]: {}",
                    name, e
                ))
            })?;
            pairs.push((name.as_str(), spsn));
        }
        ModalitySet::from_pairs(pairs)
    }

    pub fn symmetry(&self) -> Symmetry {
        Symmetry {
            base: Sharing::from_symmetric(self.base_symmetric),
            transition: Sharing::from_symmetric(self.trans_symmetric),
        }
    }

    pub fn build_unilateral(&self) -> Result<Unilateral> {
        let mut model = Unilateral::from_spec(self.graph_spec()?)?;
        if !self.modalities.is_empty() {
            model.set_modalities(self.modality_set()?)?;
        }
        Ok(model)
    }

    pub fn build_bilateral(&self) -> Result<Bilateral> {
        let mut model = Bilateral::from_spec(self.graph_spec()?, self.symmetry(), self.coupling)?;
        if !self.modalities.is_empty() {
            model.set_modalities(self.modality_set()?)?;
        }
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"{
        "graph": {
            "tumor,primary": ["II", "III"],
            "lnl,II": ["III"],
            "lnl,III": []
        },
        "modalities": {"CT": [0.76, 0.81], "path": [1.0, 1.0]}
    }"#;

    #[test]
    fn test_parse_keeps_declaration_order() {
        let config = ModelConfig::from_json(CONFIG).unwrap();
        let model = config.build_unilateral().unwrap();
        assert_eq!(model.graph().lnl_names(), vec!["II", "III"]);
        assert_eq!(model.num_params(), 3);
        assert_eq!(
            model.observation_model().unwrap().modalities().names(),
            vec!["CT", "path"]
        );
    }

    #[test]
    fn test_defaults() {
        let config = ModelConfig::from_json(CONFIG).unwrap();
        assert!(!config.base_symmetric);
        assert!(config.trans_symmetric);
        assert_eq!(config.coupling, SideCoupling::Factorized);
        assert_eq!(config.build_bilateral().unwrap().num_params(), 5);
    }

    #[test]
    fn test_bad_keys_and_values() {
        let bad_key = r#"{"graph": {"primary": ["II"], "lnl,II": []}}"#;
        let err = ModelConfig::from_json(bad_key).unwrap().graph_spec().unwrap_err();
        assert!(matches!(err, LymphError::Graph(_)));

        let extra_comma = r#"{"graph": {"tumor,prim,ary": ["II"], "lnl,II": []}}"#;
        assert!(ModelConfig::from_json(extra_comma).unwrap().graph_spec().is_err());

        let bad_modality = r#"{"graph": {"tumor,T": ["II"], "lnl,II": []},
                               "modalities": {"CT": [0.7]}}"#;
        assert!(matches!(
            ModelConfig::from_json(bad_modality).unwrap().build_unilateral(),
            Err(LymphError::Config(_))
        ));

        assert!(matches!(
            ModelConfig::from_json("{not json"),
            Err(LymphError::Config(_))
        ));
    }

    #[test]
    fn test_round_trip_through_parts() {
        let config = ModelConfig::from_json(CONFIG).unwrap();
        let rebuilt = ModelConfig::from_parts(
            &config.graph_spec().unwrap(),
            &config.modality_set().unwrap(),
            config.symmetry(),
            config.coupling,
        );
        let reparsed = ModelConfig::from_json(&rebuilt.to_json().unwrap()).unwrap();
        assert_eq!(reparsed.graph_spec().unwrap(), config.graph_spec().unwrap());
    }
}
