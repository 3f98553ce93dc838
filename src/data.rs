//! Patient observation tables and their grouping by stage.
//!
//! A table has one row per patient: a stage label plus one ternary value per
//! column, where a column is keyed by `(modality, [side,] LNL)`.

use std::collections::BTreeMap;

use crate::error::{LymphError, Result};
use crate::observation::{Diagnosis, ModalitySet};
use crate::params::Side;
use crate::state_space::MAX_LNLS;

/// Column key of a patient table.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ColumnKey {
    pub modality: String,
    pub side: Option<Side>,
    pub lnl: String,
}

impl ColumnKey {
    pub fn new(modality: &str, side: Option<Side>, lnl: &str) -> Self {
        Self {
            modality: modality.to_string(),
            side,
            lnl: lnl.to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PatientRow {
    pub stage: String,
    pub values: Vec<Option<bool>>,
}

/// Patients × observation columns.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PatientTable {
    columns: Vec<ColumnKey>,
    rows: Vec<PatientRow>,
}

/// Stage → distinct pattern → number of patients.
pub type PatientGroups = BTreeMap<String, BTreeMap<Diagnosis, usize>>;

impl PatientTable {
    pub fn new(columns: Vec<ColumnKey>) -> Result<Self> {
        for (i, col) in columns.iter().enumerate() {
            if columns[..i].contains(col) {
                return Err(LymphError::DataFormat(format!(
                    "duplicate column ({}, {}, {})",
                    col.modality,
                    col.side.map_or("-", |s| s.as_str()),
                    col.lnl
                )));
            }
        }
        Ok(Self {
            columns,
            rows: Vec::new(),
        })
    }

    /// Empty table with one column per `(modality, side, LNL)`, modality-major.
    pub fn with_layout(modalities: &[&str], sides: &[Option<Side>], lnl_names: &[String]) -> Self {
        let mut columns = Vec::with_capacity(modalities.len() * sides.len() * lnl_names.len());
        for modality in modalities {
            for side in sides {
                for lnl in lnl_names {
                    columns.push(ColumnKey::new(modality, *side, lnl));
                }
            }
        }
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn push_row(&mut self, stage: &str, values: Vec<Option<bool>>) -> Result<()> {
        if values.len() != self.columns.len() {
            return Err(LymphError::DataFormat(format!(
                "row has {} values, table has {} columns",
                values.len(),
                self.columns.len()
            )));
        }
        self.rows.push(PatientRow {
            stage: stage.to_string(),
            values,
        });
        Ok(())
    }

    pub fn columns(&self) -> &[ColumnKey] {
        &self.columns
    }

    pub fn rows(&self) -> &[PatientRow] {
        &self.rows
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn column_index(&self, key: &ColumnKey) -> Option<usize> {
        self.columns.iter().position(|c| c == key)
    }

    /// Pull one side's diagnoses out of the table in model slot order.
    ///
    /// # Errors
    /// [`LymphError::DataFormat`] if any `(modality, side, LNL)` column the
    /// model needs is missing.
    pub fn extract(
        &self,
        side: Option<Side>,
        modalities: &ModalitySet,
        lnl_names: &[String],
    ) -> Result<Vec<(String, Diagnosis)>> {
        let mut indices = Vec::with_capacity(modalities.len() * lnl_names.len());
        for modality in modalities.names() {
            for lnl in lnl_names {
                let key = ColumnKey::new(modality, side, lnl);
                let idx = self.column_index(&key).ok_or_else(|| {
                    LymphError::DataFormat(format!(
                        "missing column ({}, {}, {})",
                        modality,
                        side.map_or("-", |s| s.as_str()),
                        lnl
                    ))
                })?;
                indices.push(idx);
            }
        }

        Ok(self
            .rows
            .iter()
            .map(|row| {
                let slots = indices.iter().map(|&i| row.values[i]).collect();
                (row.stage.clone(), Diagnosis(slots))
            })
            .collect())
    }
}

/// Count identical patterns per stage.
pub fn group_by_stage<I>(rows: I) -> PatientGroups
where
    I: IntoIterator<Item = (String, Diagnosis)>,
{
    let mut groups = PatientGroups::new();
    for (stage, diagnosis) in rows {
        *groups.entry(stage).or_default().entry(diagnosis).or_insert(0) += 1;
    }
    groups
}

/// Histogram of complete involvement patterns.
///
/// Rows with any missing entry are skipped. Bin `i` counts the pattern whose
/// binary digits, first column most significant, spell `i`.
pub fn state_histogram(rows: &[Vec<Option<bool>>]) -> Result<Vec<usize>> {
    let Some(first) = rows.first() else {
        return Ok(Vec::new());
    };
    let num_cols = first.len();
    if num_cols > MAX_LNLS {
        return Err(LymphError::DataFormat(format!(
            "histogram over {} columns exceeds the limit of {}",
            num_cols, MAX_LNLS
        )));
    }

    let mut counts = vec![0usize; 1 << num_cols];
    for row in rows {
        if row.len() != num_cols {
            return Err(LymphError::DataFormat(format!(
                "rows have differing lengths ({} and {})",
                num_cols,
                row.len()
            )));
        }
        let complete: Option<Vec<bool>> = row.iter().copied().collect();
        if let Some(values) = complete {
            let bin = values
                .iter()
                .fold(0usize, |acc, &v| (acc << 1) | usize::from(v));
            counts[bin] += 1;
        }
    }
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lnls() -> Vec<String> {
        vec!["II".to_string(), "III".to_string()]
    }

    #[test]
    fn test_extract_orders_by_model_slots() {
        let mut table = PatientTable::new(vec![
            ColumnKey::new("path", None, "III"),
            ColumnKey::new("CT", None, "II"),
            ColumnKey::new("CT", None, "III"),
            ColumnKey::new("path", None, "II"),
        ])
        .unwrap();
        table
            .push_row("early", vec![Some(true), Some(false), None, Some(false)])
            .unwrap();

        let modalities =
            ModalitySet::from_pairs([("CT", [0.76, 0.81]), ("path", [1.0, 1.0])]).unwrap();
        let rows = table.extract(None, &modalities, &lnls()).unwrap();
        assert_eq!(rows[0].0, "early");
        assert_eq!(
            rows[0].1 .0,
            vec![Some(false), None, Some(false), Some(true)]
        );
    }

    #[test]
    fn test_extract_missing_column() {
        let table = PatientTable::with_layout(&["CT"], &[Some(Side::Ipsi)], &lnls());
        let modalities = ModalitySet::from_pairs([("CT", [0.76, 0.81])]).unwrap();
        assert!(table.extract(Some(Side::Ipsi), &modalities, &lnls()).is_ok());
        assert!(table.extract(Some(Side::Contra), &modalities, &lnls()).is_err());
    }

    #[test]
    fn test_push_row_length() {
        let mut table = PatientTable::with_layout(&["CT"], &[None], &lnls());
        assert!(table.push_row("early", vec![Some(true)]).is_err());
        assert!(PatientTable::new(vec![
            ColumnKey::new("CT", None, "II"),
            ColumnKey::new("CT", None, "II"),
        ])
        .is_err());
    }

    #[test]
    fn test_group_by_stage_counts_duplicates() {
        let rows = vec![
            ("early".to_string(), Diagnosis(vec![Some(true), None])),
            ("early".to_string(), Diagnosis(vec![Some(true), None])),
            ("late".to_string(), Diagnosis(vec![Some(false), None])),
        ];
        let groups = group_by_stage(rows);
        assert_eq!(groups["early"][&Diagnosis(vec![Some(true), None])], 2);
        assert_eq!(groups["late"].len(), 1);
    }

    #[test]
    fn test_state_histogram() {
        let rows = vec![
            vec![Some(true), Some(false)],
            vec![Some(true), Some(false)],
            vec![Some(false), Some(true)],
            vec![None, Some(true)],
        ];
        assert_eq!(state_histogram(&rows).unwrap(), vec![0, 1, 2, 0]);
        assert!(state_histogram(&[vec![Some(true)], vec![]]).is_err());
    }
}
