// This file contains the error type shared by the placement, insertion and job code.

// Copyright 2024 The denoiseplace developers

// This file is part of denoiseplace. denoiseplace is free software: you can redistribute it
// and/or modify it under the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option) any later version.
// denoiseplace is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See
// the GNU General Public License for more details. You should have received a copy of the GNU
// General Public License along with denoiseplace. If not, see <http://www.gnu.org/licenses/>.

use std::io;
use std::path::PathBuf;
use thiserror::Error;


#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("invalid fragment {fragment:?}: {reason}")]
    InvalidFragment { fragment: String, reason: String },

    // The Display text here is the message a failed job reports, so it keeps the long-standing
    // "Error running <tool>" wording that users search logs for.
    #[error("Error running {tool}:\nStd out: {stdout}\nStd err: {stderr}")]
    ToolFailure { tool: String, stdout: String, stderr: String },

    #[error("Error running {tool}: expected output {} was not created\n{log}", path.display())]
    MissingOutput { tool: String, path: PathBuf, log: String },

    #[error("placement fields {found:?} do not match the expected fields {expected:?}")]
    FieldMismatch { found: Vec<String>, expected: Vec<String> },

    #[error("archive error: {0}")]
    Archive(String),

    #[error("failed to parse Newick tree: {0}")]
    Newick(String),

    #[error("feature table error: {0}")]
    Table(String),

    #[error("{context}\n{source}")]
    Io { context: String, source: io::Error },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        PipelineError::Io { context: context.into(), source }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::InvalidInput(_)       => "invalid input",
            PipelineError::InvalidParameter(_)   => "invalid parameter",
            PipelineError::InvalidFragment { .. } => "invalid fragment",
            PipelineError::ToolFailure { .. }    => "tool failure",
            PipelineError::MissingOutput { .. }  => "missing output",
            PipelineError::FieldMismatch { .. }  => "field mismatch",
            PipelineError::Archive(_)            => "archive",
            PipelineError::Newick(_)             => "newick",
            PipelineError::Table(_)              => "feature table",
            PipelineError::Io { .. }             => "io",
            PipelineError::Json(_)               => "json",
        }
    }
}


pub type Result<T> = std::result::Result<T, PipelineError>;
