// This file contains the job parameters: the translation of display names into the denoising
// tool's flags, the typed parameter set and the construction of the denoising command line.

// Copyright 2024 The denoiseplace developers

// This file is part of denoiseplace. denoiseplace is free software: you can redistribute it
// and/or modify it under the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option) any later version.
// denoiseplace is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See
// the GNU General Public License for more details. You should have received a copy of the GNU
// General Public License along with denoiseplace. If not, see <http://www.gnu.org/licenses/>.

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::error::{PipelineError, Result};
use crate::log::{explanation, section_header};
use crate::misc::{check_if_file_exists, quit_with_error, read_text};


/// Parameter value that tells the denoiser to use its own built-in setting.
pub const DEFAULT_SENTINEL: &str = "default";

pub const INPUT_DISPLAY_NAME: &str = "Demultiplexed sequences";
pub const REFERENCE_DISPLAY_NAME: &str = "Reference phylogeny for SEPP";

// Display names as shown by the workflow service, paired with the denoiser's flag names.
const DISPLAY_TO_FLAG: [(&str, &str); 12] = [
    ("Positive filtering database",                   "pos-ref-fp"),
    ("Negative filtering database",                   "neg-ref-fp"),
    ("Mean per nucleotide error rate",                "mean-error"),
    ("Error probabilities for each Hamming distance", "error-dist"),
    ("Insertion/deletion (indel) probability",        "indel-prob"),
    ("Maximum number of insertion/deletion (indel)",  "indel-max"),
    ("Sequence trim length (-1 for no trimming)",     "trim-length"),
    ("Minimum dataset-wide read threshold",           "min-reads"),
    ("Minimum per-sample read threshold",             "min-size"),
    ("Negate the filtering databases",                "negate"),
    ("Threads per sample",                            "threads-per-sample"),
    ("Jobs to start",                                 "jobs-to-start"),
];


pub fn flag_for_display_name(display_name: &str) -> Result<&'static str> {
    DISPLAY_TO_FLAG.iter()
        .find(|(display, _)| *display == display_name)
        .map(|(_, flag)| *flag)
        .ok_or_else(|| PipelineError::InvalidParameter(display_name.to_string()))
}


#[derive(Debug, Clone, PartialEq)]
pub enum OptionValue {
    Text(String),
    Float(f64),
    Int(i64),
    Bool(bool),
}

impl OptionValue {
    fn is_omitted(&self) -> bool {
        match self {
            OptionValue::Text(s) => s.is_empty() || s == DEFAULT_SENTINEL,
            OptionValue::Bool(b) => !b,
            _                    => false,
        }
    }
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            OptionValue::Text(s)  => write!(f, "{}", s),
            OptionValue::Float(x) => write!(f, "{}", x),
            OptionValue::Int(i)   => write!(f, "{}", i),
            OptionValue::Bool(b)  => write!(f, "{}", if *b { "True" } else { "False" }),
        }
    }
}


/// Every option the plugin passes to the denoiser. Filtering databases are `None` when the
/// denoiser's own database should be used.
#[derive(Debug, Clone, PartialEq)]
pub struct DenoiseParams {
    pub pos_ref_fp: Option<String>,
    pub neg_ref_fp: Option<String>,
    pub mean_error: f64,
    pub error_dist: String,
    pub indel_prob: f64,
    pub indel_max: u32,
    pub trim_length: i64,
    pub min_reads: u32,
    pub min_size: u32,
    pub negate: bool,
    pub threads_per_sample: u32,
    pub jobs_to_start: u32,
}

impl Default for DenoiseParams {
    fn default() -> Self {
        DenoiseParams {
            pos_ref_fp: None,
            neg_ref_fp: None,
            mean_error: 0.005,
            error_dist: "1, 0.06, 0.02, 0.02, 0.01, 0.005, 0.005, 0.005, 0.001, 0.001, 0.001, \
                         0.0005".to_string(),
            indel_prob: 0.01,
            indel_max: 3,
            trim_length: 100,
            min_reads: 10,
            min_size: 2,
            negate: false,
            threads_per_sample: 1,
            jobs_to_start: 1,
        }
    }
}

impl DenoiseParams {
    fn set(&mut self, flag: &str, value: &Value) -> Result<()> {
        let bad = || PipelineError::InvalidInput(format!("invalid value for {flag}: {value}"));
        if value.is_null() {
            return Ok(());  // null leaves the default in place
        }
        match flag {
            "pos-ref-fp"         => self.pos_ref_fp = database_value(value).ok_or_else(bad)?,
            "neg-ref-fp"         => self.neg_ref_fp = database_value(value).ok_or_else(bad)?,
            "mean-error"         => self.mean_error = float_value(value).ok_or_else(bad)?,
            "error-dist"         => self.error_dist = text_value(value).ok_or_else(bad)?,
            "indel-prob"         => self.indel_prob = float_value(value).ok_or_else(bad)?,
            "indel-max"          => self.indel_max = uint_value(value).ok_or_else(bad)?,
            "trim-length"        => self.trim_length = int_value(value).ok_or_else(bad)?,
            "min-reads"          => self.min_reads = uint_value(value).ok_or_else(bad)?,
            "min-size"           => self.min_size = uint_value(value).ok_or_else(bad)?,
            "negate"             => self.negate = bool_value(value).ok_or_else(bad)?,
            "threads-per-sample" => self.threads_per_sample = uint_value(value).ok_or_else(bad)?,
            "jobs-to-start"      => self.jobs_to_start = uint_value(value).ok_or_else(bad)?,
            _ => return Err(PipelineError::InvalidParameter(flag.to_string())),
        }
        Ok(())
    }

    fn check(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.mean_error) {
            return Err(PipelineError::InvalidInput("mean error rate must be between 0 and 1"
                                                   .to_string()));
        }
        if !(0.0..=1.0).contains(&self.indel_prob) {
            return Err(PipelineError::InvalidInput("indel probability must be between 0 and 1"
                                                   .to_string()));
        }
        if self.trim_length == 0 || self.trim_length < -1 {
            return Err(PipelineError::InvalidInput("trim length must be positive or -1"
                                                   .to_string()));
        }
        if self.threads_per_sample == 0 || self.jobs_to_start == 0 {
            return Err(PipelineError::InvalidInput("thread and job counts must be at least 1"
                                                   .to_string()));
        }
        Ok(())
    }

    /// The options in the denoiser's vocabulary, keyed (and therefore sorted) by flag name.
    pub fn to_options(&self) -> BTreeMap<String, OptionValue> {
        let database = |db: &Option<String>| {
            OptionValue::Text(db.clone().unwrap_or_else(|| DEFAULT_SENTINEL.to_string()))
        };
        let mut options = BTreeMap::new();
        options.insert("pos-ref-fp".to_string(), database(&self.pos_ref_fp));
        options.insert("neg-ref-fp".to_string(), database(&self.neg_ref_fp));
        options.insert("mean-error".to_string(), OptionValue::Float(self.mean_error));
        options.insert("error-dist".to_string(), OptionValue::Text(self.error_dist.clone()));
        options.insert("indel-prob".to_string(), OptionValue::Float(self.indel_prob));
        options.insert("indel-max".to_string(), OptionValue::Int(self.indel_max as i64));
        options.insert("trim-length".to_string(), OptionValue::Int(self.trim_length));
        options.insert("min-reads".to_string(), OptionValue::Int(self.min_reads as i64));
        options.insert("min-size".to_string(), OptionValue::Int(self.min_size as i64));
        options.insert("negate".to_string(), OptionValue::Bool(self.negate));
        options.insert("threads-per-sample".to_string(),
                       OptionValue::Int(self.threads_per_sample as i64));
        options.insert("jobs-to-start".to_string(), OptionValue::Int(self.jobs_to_start as i64));
        options
    }
}


/// Everything a job needs from its parameter set.
#[derive(Debug, Clone, PartialEq)]
pub struct JobParameters {
    pub input_artifact: String,
    pub reference: Option<String>,
    pub denoise: DenoiseParams,
}

impl JobParameters {
    pub fn from_display_map(params: &Map<String, Value>) -> Result<Self> {
        // Builds the typed parameters from the service's display-name map. Names that are not in
        // the translation table are a programming error on the service side, so they are
        // rejected rather than skipped.
        let mut input_artifact = None;
        let mut reference = None;
        let mut denoise = DenoiseParams::default();
        for (name, value) in params {
            match name.as_str() {
                INPUT_DISPLAY_NAME => {
                    input_artifact = Some(match value {
                        Value::String(s) => s.clone(),
                        Value::Number(n) => n.to_string(),
                        _ => return Err(PipelineError::InvalidInput(
                                 format!("invalid value for {name}: {value}"))),
                    });
                }
                REFERENCE_DISPLAY_NAME => {
                    reference = Some(text_value(value).ok_or_else(|| {
                        PipelineError::InvalidInput(format!("invalid value for {name}: {value}"))
                    })?);
                }
                _ => denoise.set(flag_for_display_name(name)?, value)?,
            }
        }
        denoise.check()?;
        let input_artifact = input_artifact.ok_or_else(|| {
            PipelineError::InvalidInput(
                format!("missing required parameter {INPUT_DISPLAY_NAME:?}"))
        })?;
        Ok(JobParameters { input_artifact, reference, denoise })
    }
}


pub fn generate_workflow_command(denoise_tool: &str, inputs: &[PathBuf], out_dir: &Path,
                                 options: &BTreeMap<String, OptionValue>) -> Result<String> {
    // Builds the shell command for the denoising workflow. The denoiser takes exactly one input
    // (a FASTQ file or a directory of per-sample files).
    if inputs.len() != 1 {
        let joined = inputs.iter().map(|p| p.display().to_string()).collect::<Vec<_>>();
        return Err(PipelineError::InvalidInput(
            format!("deblur doesn't accept more than one filepath: {}", joined.join(", "))));
    }
    let mut cmd = format!("{} workflow --seqs-fp \"{}\" --output-dir \"{}\"",
                          denoise_tool, inputs[0].display(), out_dir.display());
    for (flag, value) in options {
        if value.is_omitted() { continue; }
        match value {
            OptionValue::Bool(true) => cmd.push_str(&format!(" --{flag}")),
            _                       => cmd.push_str(&format!(" --{flag} \"{value}\"")),
        }
    }
    Ok(cmd)
}


pub fn load_param_map(filename: &Path) -> Result<Map<String, Value>> {
    // Parameter files hold the service's display-name map as a JSON object.
    let text = read_text(filename)?;
    match serde_json::from_str(&text)? {
        Value::Object(map) => Ok(map),
        _ => Err(PipelineError::InvalidInput(format!("{} does not hold a JSON object",
                                                     filename.display()))),
    }
}


pub fn command(params: PathBuf, input: PathBuf, out_dir: PathBuf, config: Option<PathBuf>) {
    check_if_file_exists(&params);
    section_header("Starting denoiseplace command");
    explanation("This command prints the denoising command line a job would run for the given \
                 parameter file, without running anything.");
    eprintln!("Settings:");
    eprintln!("  --params {}", params.display());
    eprintln!("  --input {}", input.display());
    eprintln!("  --out_dir {}", out_dir.display());
    eprintln!();
    let cmd = command_for_param_file(&params, &input, &out_dir, config.as_deref())
        .unwrap_or_else(|e| quit_with_error(&e.to_string()));
    println!("{}", cmd);
}


pub fn command_for_param_file(params: &Path, input: &Path, out_dir: &Path,
                              config: Option<&Path>) -> Result<String> {
    // The input artifact is given directly here, so the parameter file does not need one.
    let config = Config::load(config)?;
    let mut map = load_param_map(params)?;
    map.entry(INPUT_DISPLAY_NAME).or_insert_with(|| Value::String(String::new()));
    let job_params = JobParameters::from_display_map(&map)?;
    generate_workflow_command(&config.denoise_tool, &[input.to_path_buf()], out_dir,
                              &job_params.denoise.to_options())
}


fn database_value(value: &Value) -> Option<Option<String>> {
    match value {
        Value::Null                                  => Some(None),
        Value::String(s) if s == DEFAULT_SENTINEL    => Some(None),
        Value::String(s) if s.is_empty()             => Some(None),
        Value::String(s)                             => Some(Some(s.clone())),
        _                                            => None,
    }
}


fn text_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        _                => None,
    }
}


fn float_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _                => None,
    }
}


fn int_value(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _                => None,
    }
}


fn uint_value(value: &Value) -> Option<u32> {
    int_value(value).and_then(|i| u32::try_from(i).ok())
}


fn bool_value(value: &Value) -> Option<bool> {
    // The service sends booleans as JSON booleans or as "True"/"False" strings.
    match value {
        Value::Bool(b)   => Some(*b),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true"  => Some(true),
            "false" => Some(false),
            _       => None,
        },
        _                => None,
    }
}
