// This file contains the feature table: a sparse observation-by-sample count matrix, read from
// and written to BIOM 1.0 (JSON) files.

// Copyright 2024 The denoiseplace developers

// This file is part of denoiseplace. denoiseplace is free software: you can redistribute it
// and/or modify it under the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option) any later version.
// denoiseplace is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See
// the GNU General Public License for more details. You should have received a copy of the GNU
// General Public License along with denoiseplace. If not, see <http://www.gnu.org/licenses/>.

use chrono::Local;
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use crate::error::{PipelineError, Result};
use crate::misc::{read_text, write_self_labelled_fasta, write_text};


const BIOM_FORMAT: &str = "Biological Observation Matrix 1.0.0";
const BIOM_FORMAT_URL: &str = "http://biom-format.org";


/// A row or column of the table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxisEntry {
    pub id: String,
    #[serde(default)]
    pub metadata: Value,
}

impl AxisEntry {
    pub fn new(id: &str) -> Self {
        AxisEntry { id: id.to_string(), metadata: Value::Null }
    }
}


// The on-disk layout. Data are [row, column, value] triples for sparse tables and one list of
// values per row for dense tables.
#[derive(Serialize, Deserialize)]
struct BiomDocument {
    #[serde(default)]
    id: Value,
    #[serde(default)]
    format: String,
    #[serde(default)]
    format_url: String,
    #[serde(rename = "type", default)]
    table_type: String,
    #[serde(default)]
    generated_by: String,
    #[serde(default)]
    date: String,
    matrix_type: String,
    #[serde(default)]
    matrix_element_type: String,
    shape: [usize; 2],
    rows: Vec<AxisEntry>,
    columns: Vec<AxisEntry>,
    data: Vec<Vec<Number>>,
}


#[derive(Debug, Clone, PartialEq)]
pub struct FeatureTable {
    pub id: Value,
    pub table_type: String,
    pub generated_by: String,
    pub observations: Vec<AxisEntry>,
    pub samples: Vec<AxisEntry>,

    // Non-zero cells as (observation index, sample index, count).
    pub data: Vec<(usize, usize, f64)>,
}

impl FeatureTable {
    pub fn empty() -> Self {
        FeatureTable { id: Value::Null, table_type: "OTU table".to_string(),
                       generated_by: generated_by(), observations: Vec::new(),
                       samples: Vec::new(), data: Vec::new() }
    }

    pub fn load(filename: &Path) -> Result<Self> {
        let text = read_text(filename)?;
        let doc: BiomDocument = serde_json::from_str(&text).map_err(|e| {
            PipelineError::Table(format!("{} is not a BIOM (JSON) table\n{}",
                                         filename.display(), e))
        })?;
        FeatureTable::from_document(doc).map_err(|e| match e {
            PipelineError::Table(msg) => {
                PipelineError::Table(format!("{}: {}", filename.display(), msg))
            }
            other => other,
        })
    }

    fn from_document(doc: BiomDocument) -> Result<Self> {
        let (n_obs, n_samples) = (doc.rows.len(), doc.columns.len());
        if doc.shape != [n_obs, n_samples] {
            return Err(table_error(format!("shape {:?} does not match {} rows and {} columns",
                                           doc.shape, n_obs, n_samples)));
        }
        let mut data = Vec::new();
        match doc.matrix_type.as_str() {
            "sparse" => {
                for cell in doc.data.iter().map(|c| as_floats(c)) {
                    let &[row, col, value] = cell.as_slice() else {
                        return Err(table_error(format!("sparse cell {cell:?} is not a triple")));
                    };
                    let row = as_index(row, n_obs)?;
                    let col = as_index(col, n_samples)?;
                    data.push((row, col, value));
                }
            }
            "dense" => {
                if doc.data.len() != n_obs {
                    return Err(table_error("dense data does not have one list per row"));
                }
                for (row, values) in doc.data.iter().map(|v| as_floats(v)).enumerate() {
                    if values.len() != n_samples {
                        return Err(table_error(format!("dense row {row} has {} values",
                                                       values.len())));
                    }
                    data.extend(values.iter().enumerate()
                        .filter(|(_, v)| **v != 0.0)
                        .map(|(col, v)| (row, col, *v)));
                }
            }
            other => return Err(table_error(format!("unknown matrix type {other:?}"))),
        }
        Ok(FeatureTable { id: doc.id, table_type: doc.table_type, generated_by: doc.generated_by,
                          observations: doc.rows, samples: doc.columns, data })
    }

    pub fn save(&self, filename: &Path) -> Result<()> {
        let doc = BiomDocument {
            id: self.id.clone(),
            format: BIOM_FORMAT.to_string(),
            format_url: BIOM_FORMAT_URL.to_string(),
            table_type: self.table_type.clone(),
            generated_by: self.generated_by.clone(),
            date: Local::now().format("%Y-%m-%dT%H:%M:%S").to_string(),
            matrix_type: "sparse".to_string(),
            matrix_element_type: "float".to_string(),
            shape: [self.observations.len(), self.samples.len()],
            rows: self.observations.clone(),
            columns: self.samples.clone(),
            data: self.data.iter()
                .map(|&(r, c, v)| vec![Number::from(r), Number::from(c), as_number(v)])
                .collect(),
        };
        write_text(filename, &serde_json::to_string(&doc)?)
    }

    pub fn observation_ids(&self) -> Vec<String> {
        self.observations.iter().map(|o| o.id.clone()).collect()
    }

    pub fn observation_count(&self) -> usize {
        self.observations.len()
    }

    pub fn total_count(&self) -> f64 {
        self.data.iter().map(|(_, _, v)| v).sum()
    }

    pub fn filter_observations<F>(&mut self, keep: F) -> Vec<String>
            where F: Fn(&str) -> bool {
        // Drops every observation (and its counts) for which keep returns false, and returns the
        // ids of the dropped observations.
        let mut new_index = vec![None; self.observations.len()];
        let mut kept = Vec::new();
        let mut removed = Vec::new();
        for (i, obs) in self.observations.drain(..).enumerate() {
            if keep(&obs.id) {
                new_index[i] = Some(kept.len());
                kept.push(obs);
            } else {
                removed.push(obs.id);
            }
        }
        self.observations = kept;
        self.data = self.data.iter()
            .filter_map(|&(r, c, v)| new_index[r].map(|r| (r, c, v)))
            .collect();
        removed
    }

    pub fn uppercase_observations(&mut self) -> usize {
        // Upper-cases every observation id. Ids that become equal are merged into one
        // observation (at the position of the first) with their counts summed. Returns the
        // number of observations merged away.
        let mut new_index = Vec::with_capacity(self.observations.len());
        let mut merged_obs: Vec<AxisEntry> = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();
        for obs in &self.observations {
            let upper = obs.id.to_uppercase();
            let i = *positions.entry(upper.clone()).or_insert_with(|| {
                merged_obs.push(AxisEntry { id: upper, metadata: obs.metadata.clone() });
                merged_obs.len() - 1
            });
            new_index.push(i);
        }
        let merged_away = self.observations.len() - merged_obs.len();
        let mut cells: BTreeMap<(usize, usize), f64> = BTreeMap::new();
        for &(r, c, v) in &self.data {
            *cells.entry((new_index[r], c)).or_insert(0.0) += v;
        }
        self.observations = merged_obs;
        self.data = cells.into_iter().map(|((r, c), v)| (r, c, v)).collect();
        merged_away
    }
}


pub fn normalise_case(biom: &Path, fasta: &Path) -> Result<usize> {
    // Makes a table's observation ids upper case, merging ids that differ only by case, and
    // rewrites the matching sequences file with one self-labelled record per observation. Files
    // that are already upper case are left untouched. Returns the number of merged observations.
    let mut table = FeatureTable::load(biom)?;
    let before = table.observation_ids();
    let merged = table.uppercase_observations();
    let after = table.observation_ids();
    if before != after {
        table.save(biom)?;
        write_self_labelled_fasta(fasta, &after)?;
    }
    Ok(merged)
}


fn generated_by() -> String {
    format!("denoiseplace v{}", env!("CARGO_PKG_VERSION"))
}


fn as_floats(values: &[Number]) -> Vec<f64> {
    values.iter().map(|n| n.as_f64().unwrap_or(f64::NAN)).collect()
}


fn as_number(value: f64) -> Number {
    Number::from_f64(value).unwrap_or_else(|| Number::from(0))
}


fn as_index(value: f64, len: usize) -> Result<usize> {
    if value < 0.0 || value.fract() != 0.0 || value as usize >= len {
        return Err(table_error(format!("index {value} is out of range")));
    }
    Ok(value as usize)
}


fn table_error(msg: impl Into<String>) -> PipelineError {
    PipelineError::Table(msg.into())
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn test_table() -> FeatureTable {
        FeatureTable {
            observations: ["ACGT", "acgt", "CCGG", "TTAA"].iter()
                .map(|id| AxisEntry::new(id)).collect(),
            samples: vec![AxisEntry::new("S1"), AxisEntry::new("S2")],
            data: vec![(0, 0, 5.0), (1, 0, 2.0), (1, 1, 1.0), (2, 1, 7.0), (3, 0, 1.0)],
            ..FeatureTable::empty()
        }
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("table.biom");
        let table = test_table();
        table.save(&path).unwrap();
        let loaded = FeatureTable::load(&path).unwrap();
        assert_eq!(loaded.observation_ids(), vec!["ACGT", "acgt", "CCGG", "TTAA"]);
        assert_eq!(loaded.data, table.data);
        assert_eq!(loaded.total_count(), 16.0);
    }

    #[test]
    fn test_load_dense() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("table.biom");
        fs::write(&path, r#"{"id": "t", "type": "OTU table", "matrix_type": "dense",
                            "shape": [2, 2], "rows": [{"id": "A", "metadata": null},
                            {"id": "C", "metadata": null}], "columns": [{"id": "S1"},
                            {"id": "S2"}], "data": [[1, 0], [0, 3]]}"#).unwrap();
        let table = FeatureTable::load(&path).unwrap();
        assert_eq!(table.data, vec![(0, 0, 1.0), (1, 1, 3.0)]);
    }

    #[test]
    fn test_load_bad_tables() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("table.biom");
        fs::write(&path, r#"{"matrix_type": "sparse", "shape": [1, 1],
                            "rows": [{"id": "A"}], "columns": [{"id": "S1"}],
                            "data": [[1, 0, 2]]}"#).unwrap();
        assert!(matches!(FeatureTable::load(&path), Err(PipelineError::Table(_))));
        fs::write(&path, r#"{"matrix_type": "sparse", "shape": [2, 1],
                            "rows": [{"id": "A"}], "columns": [{"id": "S1"}],
                            "data": []}"#).unwrap();
        assert!(FeatureTable::load(&path).is_err());
        fs::write(&path, b"\x89HDF\r\n").unwrap();
        assert!(FeatureTable::load(&path).is_err());
    }

    #[test]
    fn test_filter_observations() {
        let mut table = test_table();
        let removed = table.filter_observations(|id| id != "acgt" && id != "TTAA");
        assert_eq!(removed, vec!["acgt", "TTAA"]);
        assert_eq!(table.observation_ids(), vec!["ACGT", "CCGG"]);
        assert_eq!(table.data, vec![(0, 0, 5.0), (1, 1, 7.0)]);
    }

    #[test]
    fn test_uppercase_observations() {
        let mut table = test_table();
        assert_eq!(table.uppercase_observations(), 1);
        assert_eq!(table.observation_ids(), vec!["ACGT", "CCGG", "TTAA"]);
        assert_eq!(table.data, vec![(0, 0, 7.0), (0, 1, 1.0), (1, 1, 7.0), (2, 0, 1.0)]);
        assert_eq!(table.uppercase_observations(), 0);
    }

    #[test]
    fn test_normalise_case() {
        let dir = tempdir().unwrap();
        let biom = dir.path().join("all.biom");
        let fasta = dir.path().join("all.seqs.fa");
        test_table().save(&biom).unwrap();
        fs::write(&fasta, ">ACGT\nACGT\n>acgt\nacgt\n>CCGG\nCCGG\n>TTAA\nTTAA\n").unwrap();
        assert_eq!(normalise_case(&biom, &fasta).unwrap(), 1);
        assert_eq!(FeatureTable::load(&biom).unwrap().observation_ids(),
                   vec!["ACGT", "CCGG", "TTAA"]);
        assert_eq!(fs::read_to_string(&fasta).unwrap(),
                   ">ACGT\nACGT\n>CCGG\nCCGG\n>TTAA\nTTAA\n");

        // Already upper case: nothing is rewritten.
        fs::write(&fasta, "unchanged").unwrap();
        assert_eq!(normalise_case(&biom, &fasta).unwrap(), 0);
        assert_eq!(fs::read_to_string(&fasta).unwrap(), "unchanged");
    }

    #[test]
    fn test_empty_table() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.biom");
        FeatureTable::empty().save(&path).unwrap();
        let table = FeatureTable::load(&path).unwrap();
        assert_eq!(table.observation_count(), 0);
        assert!(table.data.is_empty());
    }
}
