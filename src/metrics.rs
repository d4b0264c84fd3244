// This file contains the code for writing denoiseplace's YAML files of job metrics.

// Copyright 2024 The denoiseplace developers

// This file is part of denoiseplace. denoiseplace is free software: you can redistribute it
// and/or modify it under the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option) any later version.
// denoiseplace is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See
// the GNU General Public License for more details. You should have received a copy of the GNU
// General Public License along with denoiseplace. If not, see <http://www.gnu.org/licenses/>.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::error::{PipelineError, Result};


/// Counts from reconciling a feature table against an insertion tree.
#[derive(Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq)]
pub struct ReconcileMetrics {
    pub observations_kept: usize,
    pub observations_removed: usize,
}


#[derive(Serialize, Deserialize, Debug, Default, PartialEq)]
pub struct JobMetrics {
    pub denoised_observation_count: usize,
    pub reference_hit_observation_count: usize,
    pub case_duplicates_merged: usize,
    pub fragment_count: usize,
    pub cached_count: usize,
    pub cached_rejected_count: usize,
    pub novel_count: usize,
    pub novel_placed_count: usize,
    pub novel_rejected_count: usize,
    pub placed_fraction: f64,
    pub tree_built: bool,
    #[serde(flatten)]
    pub reconcile: ReconcileMetrics,
}

impl JobMetrics {
    pub fn new() -> Self { Self::default() }

    pub fn calculate_fraction(&mut self) {
        // The share of fragments with a usable placement, cached or new.
        let placed = (self.cached_count - self.cached_rejected_count) + self.novel_placed_count;
        self.placed_fraction = if self.fragment_count > 0 {
            placed as f64 / self.fragment_count as f64
        } else {
            0.0
        };
    }

    pub fn save_to_yaml(&self, filename: &Path) -> Result<()> { save_yaml(filename, self) }
}


fn save_yaml<T: Serialize>(yaml_filename: &Path, data: T) -> Result<()> {
    let yaml_string = serde_yaml::to_string(&data).map_err(|e| {
        PipelineError::InvalidInput(format!("could not serialise metrics: {e}"))
    })?;
    let mut file = File::create(yaml_filename).map_err(|e| {
        PipelineError::io(format!("unable to create {}", yaml_filename.display()), e)
    })?;
    file.write_all(yaml_string.as_bytes()).map_err(|e| {
        PipelineError::io(format!("unable to write {}", yaml_filename.display()), e)
    })
}
