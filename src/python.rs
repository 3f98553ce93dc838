//! Python bindings.
//!
//! Patient tables cross the boundary as a stage list, a list of
//! `(modality, side or None, LNL)` column keys and a 2-D `int8` array with
//! `1` = positive, `0` = negative and `-1` = missing.

use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;

use ndarray::Array2;
use numpy::{PyArray1, PyArray2, PyReadonlyArray1, PyReadonlyArray2};
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use pyo3::types::PyDict;
use pyo3::wrap_pyfunction;

use crate::config::ModelConfig;
use crate::data::{ColumnKey, PatientTable};
use crate::error::{LymphError, Result};
use crate::model::{log_likelihoods_parallel, StageDistribution};
use crate::params::Side;
use crate::time_prior::TimePriors;

fn to_py_err(err: LymphError) -> PyErr {
    PyErr::new::<PyValueError, _>(err.to_string())
}

fn decode_value(value: i8) -> Result<Option<bool>> {
    match value {
        -1 => Ok(None),
        0 => Ok(Some(false)),
        1 => Ok(Some(true)),
        other => Err(LymphError::DataFormat(format!(
            "observation must be -1, 0 or 1, got {}",
            other
        ))),
    }
}

fn encode_value(value: Option<bool>) -> i8 {
    match value {
        None => -1,
        Some(false) => 0,
        Some(true) => 1,
    }
}

fn build_table(
    stages: Vec<String>,
    columns: Vec<(String, Option<String>, String)>,
    values: PyReadonlyArray2<i8>,
) -> Result<PatientTable> {
    let values = values.as_array();
    if values.nrows() != stages.len() || values.ncols() != columns.len() {
        return Err(LymphError::DataFormat(format!(
            "value array is {}x{}, expected {}x{}",
            values.nrows(),
            values.ncols(),
            stages.len(),
            columns.len()
        )));
    }

    let mut keys = Vec::with_capacity(columns.len());
    for (modality, side, lnl) in &columns {
        let side = side.as_deref().map(Side::from_str).transpose()?;
        keys.push(ColumnKey::new(modality, side, lnl));
    }

    let mut table = PatientTable::new(keys)?;
    for (stage, row) in stages.iter().zip(values.rows()) {
        let decoded = row
            .iter()
            .map(|&v| decode_value(v))
            .collect::<Result<Vec<_>>>()?;
        table.push_row(stage, decoded)?;
    }
    Ok(table)
}

fn samples_to_vecs(samples: PyReadonlyArray2<f64>) -> Vec<Vec<f64>> {
    samples
        .as_array()
        .rows()
        .into_iter()
        .map(|row| row.to_vec())
        .collect()
}

fn priors_from_map(time_priors: HashMap<String, Vec<f64>>) -> Result<TimePriors> {
    let ordered: BTreeMap<String, Vec<f64>> = time_priors.into_iter().collect();
    TimePriors::from_map(&ordered)
}

/// Log-likelihood of a unilateral model for every parameter sample.
///
/// # Arguments
/// * `config_json` - model configuration, see `ModelConfig`
/// * `stages` - stage label per patient
/// * `columns` - `(modality, side, LNL)` per column; side must be `None`
/// * `values` - (n_patients, n_columns) ternary observations
/// * `time_priors` - `{stage: [p_0, …, p_Tmax]}`
/// * `samples` - (n_samples, n_params) parameter samples
///
/// # Returns
/// * Log-likelihood per sample, computed in parallel
#[pyfunction]
fn unilateral_log_likelihoods<'py>(
    py: Python<'py>,
    config_json: &str,
    stages: Vec<String>,
    columns: Vec<(String, Option<String>, String)>,
    values: PyReadonlyArray2<i8>,
    time_priors: HashMap<String, Vec<f64>>,
    samples: PyReadonlyArray2<f64>,
) -> PyResult<&'py PyArray1<f64>> {
    let config = ModelConfig::from_json(config_json).map_err(to_py_err)?;
    let mut model = config.build_unilateral().map_err(to_py_err)?;
    let table = build_table(stages, columns, values).map_err(to_py_err)?;
    model.load_patients(&table, None).map_err(to_py_err)?;
    let priors = priors_from_map(time_priors).map_err(to_py_err)?;

    let llhs = log_likelihoods_parallel(&model, &samples_to_vecs(samples), &priors)
        .map_err(to_py_err)?;
    Ok(PyArray1::from_vec(py, llhs))
}

/// Log-likelihood of a bilateral model for every parameter sample.
///
/// Same arguments as `unilateral_log_likelihoods`, but every column needs a
/// side (`"ipsi"` or `"contra"`).
#[pyfunction]
fn bilateral_log_likelihoods<'py>(
    py: Python<'py>,
    config_json: &str,
    stages: Vec<String>,
    columns: Vec<(String, Option<String>, String)>,
    values: PyReadonlyArray2<i8>,
    time_priors: HashMap<String, Vec<f64>>,
    samples: PyReadonlyArray2<f64>,
) -> PyResult<&'py PyArray1<f64>> {
    let config = ModelConfig::from_json(config_json).map_err(to_py_err)?;
    let mut model = config.build_bilateral().map_err(to_py_err)?;
    let table = build_table(stages, columns, values).map_err(to_py_err)?;
    model.load_patients(&table).map_err(to_py_err)?;
    let priors = priors_from_map(time_priors).map_err(to_py_err)?;

    let llhs = log_likelihoods_parallel(&model, &samples_to_vecs(samples), &priors)
        .map_err(to_py_err)?;
    Ok(PyArray1::from_vec(py, llhs))
}

/// Dense transition matrix of a unilateral model.
///
/// # Returns
/// * (2^N, 2^N) row-stochastic matrix in canonical state order
#[pyfunction]
fn transition_matrix<'py>(
    py: Python<'py>,
    config_json: &str,
    spread_probs: PyReadonlyArray1<f64>,
) -> PyResult<&'py PyArray2<f64>> {
    let config = ModelConfig::from_json(config_json).map_err(to_py_err)?;
    let mut model = config.build_unilateral().map_err(to_py_err)?;
    model
        .set_spread_probs(&spread_probs.as_array().to_vec())
        .map_err(to_py_err)?;
    Ok(PyArray2::from_owned_array(py, model.transition_matrix().to_dense()))
}

/// Draw a synthetic unilateral cohort.
///
/// # Returns
/// * dict with `"t_stage"` (list of str), `"columns"` (list of
///   `(modality, LNL)`) and `"values"` ((n, n_columns) int8 array)
#[pyfunction]
fn generate_unilateral(
    py: Python<'_>,
    config_json: &str,
    spread_probs: PyReadonlyArray1<f64>,
    num_patients: usize,
    stage_dist: Vec<(String, f64)>,
    time_priors: HashMap<String, Vec<f64>>,
    seed: u64,
) -> PyResult<PyObject> {
    let config = ModelConfig::from_json(config_json).map_err(to_py_err)?;
    let mut model = config.build_unilateral().map_err(to_py_err)?;
    model
        .set_spread_probs(&spread_probs.as_array().to_vec())
        .map_err(to_py_err)?;
    let stage_dist = StageDistribution::new(stage_dist).map_err(to_py_err)?;
    let priors = priors_from_map(time_priors).map_err(to_py_err)?;

    let table = model
        .generate_dataset(num_patients, &stage_dist, &priors, seed)
        .map_err(to_py_err)?;

    let mut values = Array2::<i8>::zeros((table.len(), table.columns().len()));
    for (i, row) in table.rows().iter().enumerate() {
        for (j, &v) in row.values.iter().enumerate() {
            values[[i, j]] = encode_value(v);
        }
    }
    let t_stage: Vec<&str> = table.rows().iter().map(|r| r.stage.as_str()).collect();
    let columns: Vec<(&str, &str)> = table
        .columns()
        .iter()
        .map(|c| (c.modality.as_str(), c.lnl.as_str()))
        .collect();

    let result = PyDict::new(py);
    result.set_item("t_stage", t_stage)?;
    result.set_item("columns", columns)?;
    result.set_item("values", PyArray2::from_owned_array(py, values))?;
    Ok(result.to_object(py))
}

#[pymodule]
fn lymph_rust(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(unilateral_log_likelihoods, m)?)?;
    m.add_function(wrap_pyfunction!(bilateral_log_likelihoods, m)?)?;
    m.add_function(wrap_pyfunction!(transition_matrix, m)?)?;
    m.add_function(wrap_pyfunction!(generate_unilateral, m)?)?;
    Ok(())
}
