// This file contains the job runner: it takes one job from the workflow service through
// denoising, fragment placement, tree assembly and table reconciliation, and reports the result.

// Copyright 2024 The denoiseplace developers

// This file is part of denoiseplace. denoiseplace is free software: you can redistribute it
// and/or modify it under the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option) any later version.
// denoiseplace is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See
// the GNU General Public License for more details. You should have received a copy of the GNU
// General Public License along with denoiseplace. If not, see <http://www.gnu.org/licenses/>.

use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::archive::{archive_values, novel_fragments, placed_only, Archive, CachedPlacement,
                     Observations, REJECTED};
use crate::biom::{normalise_case, FeatureTable};
use crate::config::{Config, Reference};
use crate::error::{PipelineError, Result};
use crate::insertion::{generate_insertion_tree, GraftTools, TreeReference};
use crate::log::{explanation, job_step, section_header};
use crate::metrics::JobMetrics;
use crate::misc::{check_if_dir_exists, check_if_file_exists, check_requirements, format_float,
                  plural, quit_with_error, write_text};
use crate::params::{generate_workflow_command, load_param_map, JobParameters};
use crate::reconcile::reconcile_table;
use crate::sepp::{generate_placements, PlacementSettings};
use crate::service::{HttpService, WorkflowService};
use crate::tool::ToolCall;


const DENOISE_TOOL_NAME: &str = "deblur";
const DENOISE_SUBDIR: &str = "deblur_out";
const SUMMARY_FILENAME: &str = "job_summary.yaml";

const FINAL_TABLE_NAME: &str = "deblur final table";
const REFERENCE_HIT_TABLE_NAME: &str = "deblur reference hit table";


#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStage {
    Collecting,
    Denoising,
    Placing,
    Archiving,
    Assembling,
    Reconciling,
    Done,
}

impl fmt::Display for JobStage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            JobStage::Collecting  => "collecting information",
            JobStage::Denoising   => "denoising",
            JobStage::Placing     => "placing fragments",
            JobStage::Archiving   => "archiving placements",
            JobStage::Assembling  => "assembling the insertion tree",
            JobStage::Reconciling => "reconciling the feature table",
            JobStage::Done        => "done",
        };
        write!(f, "{}", name)
    }
}


/// One output artifact: its name and type as the service knows them, its files (path and file
/// type) and, for the reference-hit table, the placements computed by this job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArtifactInfo {
    pub output_name: String,
    pub artifact_type: String,
    pub files: Vec<(PathBuf, String)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive: Option<Observations>,
}


#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobResult {
    pub success: bool,
    pub artifacts: Option<Vec<ArtifactInfo>>,
    pub message: String,
}

impl JobResult {
    fn failed(message: String) -> Self {
        JobResult { success: false, artifacts: None, message }
    }
}


pub fn run(url: String, job_id: String, params: PathBuf, out_dir: PathBuf,
           config: Option<PathBuf>) {
    check_if_file_exists(&params);
    check_if_dir_exists(&out_dir);
    if let Some(config) = &config {
        check_if_file_exists(config);
    }
    starting_message();
    print_settings(&url, &job_id, &params, &out_dir, &config);
    let config = Config::load(config.as_deref())
        .unwrap_or_else(|e| quit_with_error(&e.to_string()));
    let param_map = load_param_map(&params).unwrap_or_else(|e| quit_with_error(&e.to_string()));
    let mut service = HttpService::new(&url).unwrap_or_else(|e| quit_with_error(&e.to_string()));

    let result = run_job(&mut service, &job_id, &param_map, &out_dir, &config);
    service.complete_job(&job_id, &result).unwrap_or_else(|e| quit_with_error(&e.to_string()));
    finished_message(&result);
    if !result.success {
        quit_with_error(&result.message);
    }
}


fn starting_message() {
    section_header("Starting denoiseplace run");
    explanation("This command runs one denoising job for the workflow service. Reads are denoised \
                 into a feature table, features that hit the reference are placed into the \
                 reference phylogeny (reusing archived placements where possible) and the \
                 resulting insertion tree and tables are reported back as artifacts.");
}


fn print_settings(url: &str, job_id: &str, params: &Path, out_dir: &Path,
                  config: &Option<PathBuf>) {
    eprintln!("Settings:");
    eprintln!("  --url {}", url);
    eprintln!("  --job_id {}", job_id);
    eprintln!("  --params {}", params.display());
    eprintln!("  --out_dir {}", out_dir.display());
    if let Some(config) = config {
        eprintln!("  --config {}", config.display());
    }
    eprintln!();
}


fn finished_message(result: &JobResult) {
    section_header("Finished!");
    if result.success {
        let count = result.artifacts.as_ref().map_or(0, |a| a.len());
        eprintln!("Job succeeded with {}", plural(count, "artifact"));
    } else {
        eprintln!("Job failed");
    }
    eprintln!();
}


pub fn run_job<S>(service: &mut S, job_id: &str, params: &Map<String, Value>, out_dir: &Path,
                  config: &Config) -> JobResult
        where S: WorkflowService + Archive {
    // Runs the whole job. Any error ends the job as a failure carrying the error's message and
    // no artifacts.
    let mut job = Job { service, job_id, out_dir, config, stage: JobStage::Collecting,
                        metrics: JobMetrics::new() };
    match job.execute(params) {
        Ok(artifacts) => JobResult { success: true, artifacts: Some(artifacts),
                                     message: String::new() },
        Err(e) => {
            eprintln!("Job {} failed while {} ({})", job_id, job.stage, e.kind());
            JobResult::failed(e.to_string())
        }
    }
}


struct Job<'a, S> {
    service: &'a mut S,
    job_id: &'a str,
    out_dir: &'a Path,
    config: &'a Config,
    stage: JobStage,
    metrics: JobMetrics,
}

/// The denoiser's output files.
struct DenoiseOutputs {
    all_biom: PathBuf,
    all_seqs: PathBuf,
    reference_hit_biom: PathBuf,
    reference_hit_seqs: PathBuf,
}

impl<S: WorkflowService + Archive> Job<'_, S> {
    fn step(&mut self, stage: JobStage, text: &str) -> Result<()> {
        self.stage = stage;
        job_step(text);
        self.service.update_job_step(self.job_id, text)
    }

    fn execute(&mut self, params: &Map<String, Value>) -> Result<Vec<ArtifactInfo>> {
        self.step(JobStage::Collecting, "Step 1 of 4: Collecting information")?;
        let params = JobParameters::from_display_map(params)?;
        let reference = self.config.reference(params.reference.as_deref())?;
        check_requirements(&[self.config.denoise_tool.as_str()])?;
        let files = self.service.artifact_files(&params.input_artifact)?;
        let inputs = files.get("preprocessed_fastq").filter(|f| !f.is_empty()).ok_or_else(|| {
            PipelineError::InvalidInput(format!("artifact {} has no preprocessed_fastq files",
                                                params.input_artifact))
        })?;

        self.step(JobStage::Denoising, "Step 2 of 4: Generating deblur command")?;
        let denoise_dir = self.out_dir.join(DENOISE_SUBDIR);
        let command = generate_workflow_command(&self.config.denoise_tool, inputs, &denoise_dir,
                                                &params.denoise.to_options())?;
        self.step(JobStage::Denoising, "Step 3 of 4: Executing deblur job")?;
        let outputs = self.denoise(&command, &denoise_dir)?;

        let fragments = FeatureTable::load(&outputs.reference_hit_biom)?.observation_ids();
        self.metrics.fragment_count = fragments.len();
        let new_placements = self.place_and_archive(&fragments, &params, &reference)?;

        self.step(JobStage::Assembling,
                  "Step 4 of 4 (4/4): Composing phylogenetic insertion tree")?;
        let observations = self.service.lookup(self.job_id, &fragments)?;
        let placements = placed_only(&observations)?;
        let tree_reference = TreeReference { template: reference.template.clone(),
                                             rename_script: reference.rename_script.clone() };
        let tools = GraftTools { graft_tool: self.config.graft_tool.clone(),
                                 python: self.config.python.clone() };
        if !placements.is_empty() {
            self.check_graft_requirements(&tree_reference)?;
        }
        let tree = generate_insertion_tree(&placements, self.out_dir, &tree_reference, &tools)?;
        self.metrics.tree_built = tree.is_some();

        let mut artifacts = vec![ArtifactInfo {
            output_name: FINAL_TABLE_NAME.to_string(),
            artifact_type: "BIOM".to_string(),
            files: vec![(outputs.all_biom.clone(), "biom".to_string()),
                        (outputs.all_seqs.clone(), "preprocessed_fasta".to_string())],
            archive: None,
        }];
        if let Some(tree) = tree {
            self.stage = JobStage::Reconciling;
            self.metrics.reconcile = reconcile_table(&tree, &outputs.reference_hit_biom,
                                                     &outputs.reference_hit_biom)?;
            eprintln!("{} removed from the reference-hit table",
                      plural(self.metrics.reconcile.observations_removed, "unplaced feature"));
            artifacts.push(ArtifactInfo {
                output_name: REFERENCE_HIT_TABLE_NAME.to_string(),
                artifact_type: "BIOM".to_string(),
                files: vec![(outputs.reference_hit_biom.clone(), "biom".to_string()),
                            (outputs.reference_hit_seqs.clone(), "preprocessed_fasta".to_string()),
                            (tree, "plain_text".to_string())],
                archive: Some(new_placements),
            });
        } else {
            eprintln!("No insertion tree, so the reference-hit table is not reported");
        }

        self.stage = JobStage::Done;
        self.metrics.calculate_fraction();
        eprintln!("Placed fraction of fragments: {}", format_float(self.metrics.placed_fraction));
        self.metrics.save_to_yaml(&self.out_dir.join(SUMMARY_FILENAME))?;
        Ok(artifacts)
    }

    fn denoise(&mut self, command: &str, denoise_dir: &Path) -> Result<DenoiseOutputs> {
        // Runs the denoiser and checks its outputs. The reference-hit files are only written when
        // some features hit the reference, so empty ones are made when they are missing.
        eprintln!("{}", command);
        let output = ToolCall::shell(command).run(DENOISE_TOOL_NAME)?;
        if !output.success() {
            return Err(output.into_failure(DENOISE_TOOL_NAME));
        }
        let outputs = DenoiseOutputs {
            all_biom: denoise_dir.join("all.biom"),
            all_seqs: denoise_dir.join("all.seqs.fa"),
            reference_hit_biom: denoise_dir.join("reference-hit.biom"),
            reference_hit_seqs: denoise_dir.join("reference-hit.seqs.fa"),
        };
        for required in [&outputs.all_biom, &outputs.all_seqs] {
            if !required.is_file() {
                return Err(PipelineError::MissingOutput {
                    tool: DENOISE_TOOL_NAME.to_string(), path: required.clone(),
                    log: format!("Std out: {}\nStd err: {}", output.stdout, output.stderr) });
            }
        }
        if !outputs.reference_hit_biom.is_file() {
            FeatureTable::empty().save(&outputs.reference_hit_biom)?;
        }
        if !outputs.reference_hit_seqs.is_file() {
            write_text(&outputs.reference_hit_seqs, "")?;
        }

        self.metrics.case_duplicates_merged =
            normalise_case(&outputs.all_biom, &outputs.all_seqs)? +
            normalise_case(&outputs.reference_hit_biom, &outputs.reference_hit_seqs)?;
        self.metrics.denoised_observation_count =
            FeatureTable::load(&outputs.all_biom)?.observation_count();
        self.metrics.reference_hit_observation_count =
            FeatureTable::load(&outputs.reference_hit_biom)?.observation_count();
        Ok(outputs)
    }

    fn check_graft_requirements(&self, reference: &TreeReference) -> Result<()> {
        // Python is only needed when the rename file is a Python script.
        check_requirements(&[self.config.graft_tool.as_str()])?;
        if reference.rename_script.extension().is_some_and(|e| e == "py") {
            check_requirements(&[self.config.python.as_str()])?;
        }
        Ok(())
    }

    fn place_and_archive(&mut self, fragments: &[String], params: &JobParameters,
                         reference: &Reference) -> Result<Observations> {
        // Places the fragments the archive has never seen and archives the results, rejections
        // included. Returns the newly archived placements, without the rejections.
        self.step(JobStage::Placing, "Step 4 of 4 (1/4): Retrieving observations information")?;
        let cached = self.service.lookup(self.job_id, fragments)?;
        let novel = novel_fragments(fragments, &cached);
        self.metrics.cached_count = cached.len();
        self.metrics.cached_rejected_count = cached.values()
            .filter(|v| matches!(CachedPlacement::from_archive_value(v),
                                 Ok(CachedPlacement::Rejected)))
            .count();
        self.metrics.novel_count = novel.len();
        eprintln!("{} cached, {} novel", plural(cached.len(), "fragment"), novel.len());

        self.step(JobStage::Placing,
                  &format!("Step 4 of 4 (2/4): Generating {} new placements", novel.len()))?;
        if !novel.is_empty() {
            check_requirements(&[self.config.placement_tool.as_str()])?;
        }
        let settings = PlacementSettings::for_reference(&self.config.placement_tool,
                                                        &self.config.placement_run_name,
                                                        params.denoise.threads_per_sample,
                                                        reference);
        let new_placements = generate_placements(&novel, self.out_dir, &settings)?;

        self.step(JobStage::Archiving,
                  &format!("Step 4 of 4 (3/4): Archiving {} new placements", novel.len()))?;
        let values = archive_values(&novel, &new_placements)?;
        if !values.is_empty() {
            self.service.store(self.job_id, &values)?;
        }
        let placed: Observations = values.into_iter().filter(|(_, v)| v != REJECTED).collect();
        self.metrics.novel_placed_count = placed.len();
        self.metrics.novel_rejected_count = novel.len() - placed.len();
        Ok(placed)
    }
}
