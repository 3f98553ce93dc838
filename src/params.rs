//! Parameter schema: which flat parameter slot feeds which edge on which side.
//!
//! A flat parameter vector (as proposed by an optimizer or sampler) is never
//! written into edges positionally. It is decoded through a schema that names
//! every slot and records its edge role, edge index and the side(s) it
//! applies to.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{LymphError, Result};
use crate::graph::{EdgeRole, Graph};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Ipsi,
    Contra,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Ipsi => "ipsi",
            Side::Contra => "contra",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Side {
    type Err = LymphError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ipsi" => Ok(Side::Ipsi),
            "contra" => Ok(Side::Contra),
            other => Err(LymphError::DataFormat(format!(
                "unknown side '{}' (expected 'ipsi' or 'contra')",
                other
            ))),
        }
    }
}

/// Sharing policy for one class of edges in a bilateral model.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sharing {
    /// Separate parameters for ipsi and contra.
    #[default]
    Independent,
    /// One parameter per edge, used on both sides.
    Shared,
}

impl Sharing {
    pub fn from_symmetric(symmetric: bool) -> Self {
        if symmetric {
            Sharing::Shared
        } else {
            Sharing::Independent
        }
    }
}

/// Sharing policies for base and transition edges.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Symmetry {
    pub base: Sharing,
    pub transition: Sharing,
}

impl Default for Symmetry {
    fn default() -> Self {
        Self {
            base: Sharing::Independent,
            transition: Sharing::Shared,
        }
    }
}

/// Which model side(s) a slot is written to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotScope {
    Unilateral,
    Side(Side),
    BothSides,
}

impl SlotScope {
    fn applies_to(&self, side: Side) -> bool {
        match self {
            SlotScope::Unilateral | SlotScope::BothSides => true,
            SlotScope::Side(s) => *s == side,
        }
    }
}

/// One entry of the flat parameter vector.
#[derive(Clone, Debug, PartialEq)]
pub struct ParameterSlot {
    pub name: String,
    pub role: EdgeRole,
    /// Index into [`Graph::edges`].
    pub edge: usize,
    pub scope: SlotScope,
}

/// Ordered description of a flat parameter vector.
#[derive(Clone, Debug, PartialEq)]
pub struct ParameterSchema {
    slots: Vec<ParameterSlot>,
    num_edges: usize,
}

impl ParameterSchema {
    /// One slot per edge: base edges, then transition edges.
    pub fn unilateral(graph: &Graph) -> Self {
        let slots = (0..graph.num_edges())
            .map(|e| ParameterSlot {
                name: graph.edge_name(e),
                role: graph.edges()[e].role,
                edge: e,
                scope: SlotScope::Unilateral,
            })
            .collect();
        Self {
            slots,
            num_edges: graph.num_edges(),
        }
    }

    /// Layout: `[ipsi base…, contra base… (independent only), ipsi-or-shared
    /// transition…, contra transition… (independent only)]`.
    pub fn bilateral(graph: &Graph, symmetry: Symmetry) -> Self {
        let mut slots = Vec::new();
        let groups = [
            (EdgeRole::Base, symmetry.base, 0..graph.num_base_edges()),
            (
                EdgeRole::Transition,
                symmetry.transition,
                graph.num_base_edges()..graph.num_edges(),
            ),
        ];

        for (role, sharing, range) in groups {
            match sharing {
                Sharing::Shared => {
                    for e in range {
                        slots.push(ParameterSlot {
                            name: graph.edge_name(e),
                            role,
                            edge: e,
                            scope: SlotScope::BothSides,
                        });
                    }
                }
                Sharing::Independent => {
                    for side in [Side::Ipsi, Side::Contra] {
                        for e in range.clone() {
                            slots.push(ParameterSlot {
                                name: format!("{}_{}", side, graph.edge_name(e)),
                                role,
                                edge: e,
                                scope: SlotScope::Side(side),
                            });
                        }
                    }
                }
            }
        }

        Self {
            slots,
            num_edges: graph.num_edges(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slots(&self) -> &[ParameterSlot] {
        &self.slots
    }

    pub fn names(&self) -> Vec<&str> {
        self.slots.iter().map(|s| s.name.as_str()).collect()
    }

    /// Check length and range of a flat vector against this schema.
    pub fn validate(&self, values: &[f64]) -> Result<()> {
        if values.len() != self.slots.len() {
            return Err(LymphError::Parameter(format!(
                "expected {} parameters, got {}",
                self.slots.len(),
                values.len()
            )));
        }
        for (slot, &value) in self.slots.iter().zip(values) {
            check_probability(&slot.name, value)?;
        }
        Ok(())
    }

    /// Decode into per-edge spread probabilities for one side.
    ///
    /// For a unilateral schema `side` is ignored.
    pub fn decode(&self, values: &[f64], side: Side) -> Result<Vec<f64>> {
        self.validate(values)?;
        let mut probs = vec![0.0; self.num_edges];
        for (slot, &value) in self.slots.iter().zip(values) {
            if slot.scope.applies_to(side) {
                probs[slot.edge] = value;
            }
        }
        Ok(probs)
    }

    /// Inverse of [`ParameterSchema::decode`]; shared slots read the ipsi side.
    pub fn encode(&self, ipsi: &[f64], contra: &[f64]) -> Vec<f64> {
        self.slots
            .iter()
            .map(|slot| match slot.scope {
                SlotScope::Side(Side::Contra) => contra[slot.edge],
                _ => ipsi[slot.edge],
            })
            .collect()
    }
}

/// Reject anything that is not a probability, including NaN.
pub fn check_probability(name: &str, value: f64) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(LymphError::Parameter(format!(
            "{} must be in [0, 1], got {}",
            name, value
        )))
    }
}
