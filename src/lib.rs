//! Hidden Markov models of lymphatic metastatic spread.
//!
//! A primary tumor drains into a directed acyclic network of lymph node
//! levels (LNLs). Involvement spreads along the edges one time step at a
//! time, is observed through imperfect diagnostic modalities, and the time
//! of diagnosis is unknown and integrated out per tumor stage.

pub mod config;
pub mod data;
pub mod error;
pub mod graph;
pub mod likelihood;
pub mod model;
pub mod observation;
pub mod params;
mod sampling;
pub mod state_space;
pub mod time_prior;
pub mod transition;

#[cfg(feature = "python")]
mod python;

pub use config::ModelConfig;
pub use data::{group_by_stage, state_histogram, ColumnKey, PatientGroups, PatientRow, PatientTable};
pub use error::{LymphError, Result};
pub use graph::{Edge, EdgeRole, Graph, GraphSpec, Node, NodeKind};
pub use model::{
    draw_diagnose_times, log_likelihoods_parallel, Bilateral, LikelihoodModel, SideCoupling,
    StageDistribution, Unilateral,
};
pub use observation::{Diagnosis, Modality, ModalitySet, ObservationModel};
pub use params::{ParameterSchema, ParameterSlot, Sharing, Side, SlotScope, Symmetry};
pub use state_space::{State, StateSpace, MAX_LNLS};
pub use time_prior::{binomial_pmf, TimeDistribution, TimePriors};
pub use transition::{healthy_distribution, TransitionMatrix, MAX_TRANSITION_ENTRIES};
