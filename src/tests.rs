// This file contains some high-level tests for denoiseplace: whole jobs run against a service held
// in memory, with shell scripts standing in for the external tools.

// Copyright 2024 The denoiseplace developers

// This file is part of denoiseplace. denoiseplace is free software: you can redistribute it
// and/or modify it under the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option) any later version.
// denoiseplace is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See
// the GNU General Public License for more details. You should have received a copy of the GNU
// General Public License along with denoiseplace. If not, see <http://www.gnu.org/licenses/>.

use rand::{rngs::StdRng, Rng, SeedableRng};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, read_to_string};
use std::path::{Path, PathBuf};
use tempfile::tempdir;

use crate::archive::{Archive, MemoryArchive, Observations, REJECTED};
use crate::biom::{AxisEntry, FeatureTable};
use crate::config::Config;
use crate::error::{PipelineError, Result};
use crate::insertion::{PLACEMENTS_FILENAME, RELABELLED_TREE_FILENAME};
use crate::job::{run_job, JobResult};
use crate::newick::NewickTree;
use crate::params::{INPUT_DISPLAY_NAME, REFERENCE_DISPLAY_NAME};
use crate::placement::PlacementDocument;
use crate::service::WorkflowService;
use crate::test_tools::*;


pub fn assert_almost_eq(a: f64, b: f64, epsilon: f64) {
    assert!((a - b).abs() < epsilon,
            "Numbers are not within {:?} of each other: {} vs {}", epsilon, a, b);
}


fn random_seq(length: usize, seed: u64) -> String {
    let bases = ['A', 'C', 'G', 'T'];
    let mut rng = StdRng::seed_from_u64(seed);
    (0..length).map(|_| bases[rng.random_range(0..bases.len())]).collect()
}


/// The workflow service as a job sees it, with the archive kept in memory.
#[derive(Default)]
struct MockService {
    archive: MemoryArchive,
    steps: Vec<String>,
    artifacts: BTreeMap<String, BTreeMap<String, Vec<PathBuf>>>,
}

impl WorkflowService for MockService {
    fn update_job_step(&mut self, _job_id: &str, step: &str) -> Result<()> {
        self.steps.push(step.to_string());
        Ok(())
    }

    fn artifact_files(&mut self, artifact_id: &str) -> Result<BTreeMap<String, Vec<PathBuf>>> {
        self.artifacts.get(artifact_id).cloned().ok_or_else(|| {
            PipelineError::InvalidInput(format!("no artifact {artifact_id}"))
        })
    }

    fn complete_job(&mut self, _job_id: &str, _result: &JobResult) -> Result<()> {
        Ok(())
    }
}

impl Archive for MockService {
    fn lookup(&mut self, job_id: &str, fragments: &[String]) -> Result<Observations> {
        self.archive.lookup(job_id, fragments)
    }

    fn store(&mut self, job_id: &str, values: &Observations) -> Result<()> {
        self.archive.store(job_id, values)
    }
}


fn write_table(dir: &Path, name: &str, ids: &[String]) -> (PathBuf, PathBuf) {
    let biom = dir.join(format!("{name}.biom"));
    let fasta = dir.join(format!("{name}.fa"));
    let table = FeatureTable {
        observations: ids.iter().map(|id| AxisEntry::new(id)).collect(),
        samples: vec![AxisEntry::new("sample_1"), AxisEntry::new("sample_2")],
        data: ids.iter().enumerate().map(|(i, _)| (i, i % 2, (i + 1) as f64)).collect(),
        ..FeatureTable::empty()
    };
    table.save(&biom).unwrap();
    let seqs: String = ids.iter().map(|id| format!(">{id}\n{id}\n")).collect();
    fs::write(&fasta, seqs).unwrap();
    (biom, fasta)
}


/// A test setup: tools, a reference named "tiny" and an input artifact (ID 5) whose reference-hit
/// features are the given fragments.
struct TestJob {
    dir: tempfile::TempDir,
    config: Config,
    service: MockService,
}

impl TestJob {
    fn new(fragments: Option<&[String]>, deblur: Option<&str>) -> Self {
        let dir = tempdir().unwrap();
        let inputs = dir.path().join("inputs");
        fs::create_dir(&inputs).unwrap();
        let all: Vec<String> = ["TTTTGGGG", "GGGGTTTT"].iter().map(|s| s.to_string())
            .chain(fragments.unwrap_or(&[]).iter().cloned()).collect();
        let all_files = write_table(&inputs, "all", &all);
        let hit_files = fragments.map(|f| write_table(&inputs, "reference-hit", f));
        let deblur_body = match deblur {
            Some(body) => body.to_string(),
            None => fake_deblur(&all_files.0, &all_files.1,
                                hit_files.as_ref().map(|(b, f)| (b.as_path(), f.as_path()))),
        };
        let bin = dir.path().join("bin");
        fs::create_dir(&bin).unwrap();
        let config = Config {
            denoise_tool: make_script(&bin.join("deblur"), &deblur_body).display().to_string(),
            placement_tool: make_script(&bin.join("run-sepp.sh"), FAKE_SEPP)
                .display().to_string(),
            graft_tool: make_script(&bin.join("guppy"), FAKE_GUPPY).display().to_string(),
            python: "sh".to_string(),
            reference_dir: make_reference_dir(&dir.path().join("refs"), "tiny"),
            default_reference: "tiny".to_string(),
            ..Config::default()
        };
        let mut service = MockService::default();
        service.artifacts.insert("5".to_string(), BTreeMap::from([
            ("preprocessed_fastq".to_string(), vec![inputs.join("seqs.fastq")]),
        ]));
        TestJob { dir, config, service }
    }

    fn run(&mut self, job_id: &str, out_name: &str) -> (JobResult, PathBuf) {
        let out_dir = self.dir.path().join(out_name);
        fs::create_dir(&out_dir).unwrap();
        let result = run_job(&mut self.service, job_id, &params(), &out_dir, &self.config);
        (result, out_dir)
    }
}


fn params() -> Map<String, Value> {
    let value = json!({
        INPUT_DISPLAY_NAME: "5",
        "Threads per sample": 2,
        "Sequence trim length (-1 for no trimming)": 150,
        "Positive filtering database": "default",
    });
    value.as_object().unwrap().clone()
}


fn frags(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}


#[test]
fn test_job_places_archives_and_builds_tree() {
    let fragments = frags(&["ACGTACGT", "CCCCGGGG", "AAAATTTT"]);
    let mut test = TestJob::new(Some(&fragments[..]), None);
    let (result, out_dir) = test.run("job1", "out");
    assert!(result.success, "{}", result.message);
    assert_eq!(result.message, "");

    assert_eq!(test.service.steps, vec![
        "Step 1 of 4: Collecting information",
        "Step 2 of 4: Generating deblur command",
        "Step 3 of 4: Executing deblur job",
        "Step 4 of 4 (1/4): Retrieving observations information",
        "Step 4 of 4 (2/4): Generating 3 new placements",
        "Step 4 of 4 (3/4): Archiving 3 new placements",
        "Step 4 of 4 (4/4): Composing phylogenetic insertion tree",
    ]);

    // The denoiser got the input file, its output directory and the job's options.
    let deblur_out = out_dir.join("deblur_out");
    let args = read_to_string(deblur_out.join("deblur_args.txt")).unwrap();
    assert!(args.starts_with("workflow --seqs-fp "));
    assert!(args.contains("seqs.fastq --output-dir "));
    assert!(args.contains("--threads-per-sample 2"));
    assert!(args.contains("--trim-length 150"));
    assert!(!args.contains("--pos-ref-fp"));

    // The placement tool ran once in the output directory with the reference's files.
    let sepp_args = read_to_string(out_dir.join("args.txt")).unwrap();
    assert!(sepp_args.contains(" qiita -x 2 -t "));
    assert!(sepp_args.contains("reference_phylogeny_tiny.nwk -a "));
    assert_eq!(read_to_string(out_dir.join("runs.txt")).unwrap(), "qiita\n");

    // Every novel fragment was archived, the dropped one as rejected.
    let context = &test.service.archive.contexts["job1"];
    assert_eq!(test.service.archive.store_calls, 1);
    assert_eq!(context.len(), 3);
    assert_eq!(context["AAAATTTT"], REJECTED);
    assert_eq!(context["ACGTACGT"], "[[1,-100.5,0.9,0.01,0.002]]");

    let artifacts = result.artifacts.unwrap();
    assert_eq!(artifacts.len(), 2);
    assert_eq!(artifacts[0].output_name, "deblur final table");
    assert_eq!(artifacts[0].artifact_type, "BIOM");
    assert_eq!(artifacts[0].files, vec![(deblur_out.join("all.biom"), "biom".to_string()),
                                        (deblur_out.join("all.seqs.fa"),
                                         "preprocessed_fasta".to_string())]);
    assert!(artifacts[0].archive.is_none());

    let tree_file = out_dir.join(RELABELLED_TREE_FILENAME);
    assert_eq!(artifacts[1].output_name, "deblur reference hit table");
    assert_eq!(artifacts[1].files[2], (tree_file.clone(), "plain_text".to_string()));
    let archive = artifacts[1].archive.as_ref().unwrap();
    assert_eq!(archive.keys().collect::<Vec<_>>(), vec!["ACGTACGT", "CCCCGGGG"]);

    assert_eq!(read_to_string(&tree_file).unwrap(),
               "((G1:0.1,G2:0.2):0.0,ACGTACGT:0.0,CCCCGGGG:0.0);\n");

    // The rejected fragment is not in the tree, so it is gone from the reference-hit table.
    let table = FeatureTable::load(&deblur_out.join("reference-hit.biom")).unwrap();
    assert_eq!(table.observation_ids(), frags(&["ACGTACGT", "CCCCGGGG"]));
    let all_table = FeatureTable::load(&deblur_out.join("all.biom")).unwrap();
    assert_eq!(all_table.observation_count(), 5);

    let summary = read_to_string(out_dir.join("job_summary.yaml")).unwrap();
    assert!(summary.contains("fragment_count: 3\n"));
    assert!(summary.contains("novel_rejected_count: 1\n"));
    assert!(summary.contains("observations_removed: 1\n"));
    assert!(summary.contains("tree_built: true\n"));
}


#[test]
fn test_second_job_reuses_archive() {
    let fragments = frags(&["ACGTACGT", "CCCCGGGG", "AAAATTTT"]);
    let mut test = TestJob::new(Some(&fragments[..]), None);
    let (first, _) = test.run("job1", "out_1");
    assert!(first.success, "{}", first.message);

    test.service.steps.clear();
    let (second, out_dir) = test.run("job1", "out_2");
    assert!(second.success, "{}", second.message);
    assert!(test.service.steps.contains(&"Step 4 of 4 (2/4): Generating 0 new placements"
                                              .to_string()));

    // Nothing new to place or archive, but the tree is still built from the archive.
    assert!(!out_dir.join("runs.txt").exists());
    assert_eq!(test.service.archive.store_calls, 1);
    let artifacts = second.artifacts.unwrap();
    assert_eq!(artifacts.len(), 2);
    assert!(artifacts[1].archive.as_ref().unwrap().is_empty());
    assert_eq!(read_to_string(out_dir.join(RELABELLED_TREE_FILENAME)).unwrap(),
               "((G1:0.1,G2:0.2):0.0,ACGTACGT:0.0,CCCCGGGG:0.0);\n");
}


#[test]
fn test_tools_are_only_needed_when_used() {
    let fragments = frags(&["ACGTACGT", "CCCCGGGG"]);
    let mut test = TestJob::new(Some(&fragments[..]), None);
    let (first, _) = test.run("job1", "out_1");
    assert!(first.success, "{}", first.message);

    // Everything is cached now, so the placement tool is never called.
    test.config.placement_tool = "/not/installed/run-sepp.sh".to_string();
    let (second, _) = test.run("job1", "out_2");
    assert!(second.success, "{}", second.message);

    // A novel fragment does need it.
    let (third, _) = test.run("job2", "out_3");
    assert!(!third.success);
    assert!(third.message.contains("/not/installed/run-sepp.sh"));
}


#[test]
fn test_no_placements_needs_no_grafting_tools() {
    let fragments = frags(&["AAAACCCC"]);
    let mut test = TestJob::new(Some(&fragments[..]), None);
    test.config.graft_tool = "/not/installed/guppy".to_string();
    test.config.python = "/not/installed/python3".to_string();
    let (result, _) = test.run("job1", "out");
    assert!(result.success, "{}", result.message);
    assert_eq!(result.artifacts.unwrap().len(), 1);
}


#[test]
fn test_archive_is_scoped_by_job() {
    let fragments = frags(&["ACGTACGT"]);
    let mut test = TestJob::new(Some(&fragments[..]), None);
    test.run("job1", "out_1");
    let (result, out_dir) = test.run("job2", "out_2");
    assert!(result.success, "{}", result.message);
    assert_eq!(read_to_string(out_dir.join("runs.txt")).unwrap(), "qiita\n");
    assert_eq!(test.service.archive.store_calls, 2);
}


#[test]
fn test_cached_rejection_is_not_placed() {
    let fragments = frags(&["ACGTACGT", "CCCCGGGG"]);
    let mut test = TestJob::new(Some(&fragments[..]), None);
    test.service.archive.store("job1", &BTreeMap::from([
        ("CCCCGGGG".to_string(), REJECTED.to_string()),
    ])).unwrap();
    let (result, out_dir) = test.run("job1", "out");
    assert!(result.success, "{}", result.message);

    // Only the novel fragment went to the placement tool.
    let input = read_to_string(out_dir.join("input.fasta")).unwrap();
    assert!(input.contains("ACGTACGT"));
    assert!(!input.contains("CCCCGGGG"));

    // The cached rejection stays out of the grafting input and the tree.
    let doc = PlacementDocument::load(&out_dir.join(PLACEMENTS_FILENAME)).unwrap();
    assert_eq!(doc.placements.len(), 1);
    assert_eq!(doc.placements[0].names(), vec!["ACGTACGT"]);
    let tree = NewickTree::load(&out_dir.join(RELABELLED_TREE_FILENAME)).unwrap();
    assert_eq!(tree.leaf_labels(), vec!["G1", "G2", "ACGTACGT"]);

    let artifacts = result.artifacts.unwrap();
    let archive = artifacts[1].archive.as_ref().unwrap();
    assert_eq!(archive.keys().collect::<Vec<_>>(), vec!["ACGTACGT"]);
    let table = FeatureTable::load(&out_dir.join("deblur_out/reference-hit.biom")).unwrap();
    assert_eq!(table.observation_ids(), frags(&["ACGTACGT"]));
}


#[test]
fn test_no_placements_means_one_artifact() {
    let fragments = frags(&["AAAACCCC", "AAAAGGGG"]);
    let mut test = TestJob::new(Some(&fragments[..]), None);
    let (result, out_dir) = test.run("job1", "out");
    assert!(result.success, "{}", result.message);
    let artifacts = result.artifacts.unwrap();
    assert_eq!(artifacts.len(), 1);
    assert_eq!(artifacts[0].output_name, "deblur final table");
    assert!(!out_dir.join(RELABELLED_TREE_FILENAME).exists());

    // The rejections are still archived, and the table is left as it was.
    assert_eq!(test.service.archive.contexts["job1"].len(), 2);
    let table = FeatureTable::load(&out_dir.join("deblur_out/reference-hit.biom")).unwrap();
    assert_eq!(table.observation_count(), 2);
}


#[test]
fn test_missing_reference_hit_files() {
    let mut test = TestJob::new(None, None);
    let (result, out_dir) = test.run("job1", "out");
    assert!(result.success, "{}", result.message);
    assert_eq!(result.artifacts.unwrap().len(), 1);

    // Empty reference-hit files stand in for the ones the denoiser did not write.
    let deblur_out = out_dir.join("deblur_out");
    let table = FeatureTable::load(&deblur_out.join("reference-hit.biom")).unwrap();
    assert_eq!(table.observation_count(), 0);
    assert_eq!(read_to_string(deblur_out.join("reference-hit.seqs.fa")).unwrap(), "");
    assert_eq!(test.service.archive.store_calls, 0);
    assert!(!out_dir.join("input.fasta").exists());
}


#[test]
fn test_lower_case_features_are_normalised() {
    let fragments = frags(&["acgtacgt"]);
    let mut test = TestJob::new(Some(&fragments[..]), None);
    let (result, out_dir) = test.run("job1", "out");
    assert!(result.success, "{}", result.message);
    assert!(test.service.archive.contexts["job1"].contains_key("ACGTACGT"));
    let seqs = read_to_string(out_dir.join("deblur_out/reference-hit.seqs.fa")).unwrap();
    assert!(seqs.contains(">ACGTACGT\n"));
}


#[test]
fn test_deblur_failure() {
    let fragments = frags(&["ACGTACGT"]);
    let mut test = TestJob::new(Some(&fragments[..]), Some(FAILING_DEBLUR));
    let (result, out_dir) = test.run("job1", "out");
    assert!(!result.success);
    assert!(result.artifacts.is_none());
    assert!(result.message.starts_with("Error running deblur"));
    assert!(result.message.contains("starting deblur"));
    assert!(result.message.contains("deblur: ran out of reads"));
    assert_eq!(test.service.steps.last().unwrap(), "Step 3 of 4: Executing deblur job");
    assert!(!out_dir.join("job_summary.yaml").exists());
    assert!(test.service.archive.contexts.is_empty());
}


#[test]
fn test_guppy_failure() {
    let fragments = frags(&["ACGTACGT"]);
    let mut test = TestJob::new(Some(&fragments[..]), None);
    make_script(Path::new(&test.config.graft_tool), FAILING_GUPPY);
    let (result, _) = test.run("job1", "out");
    assert!(!result.success);
    assert!(result.artifacts.is_none());
    assert!(result.message.starts_with("Error running guppy"));
    assert!(result.message.contains("could not read placements"));

    // Placements made before the failure are kept in the archive.
    assert_eq!(test.service.archive.contexts["job1"].len(), 1);
}


#[test]
fn test_rename_failure() {
    let fragments = frags(&["ACGTACGT"]);
    let mut test = TestJob::new(Some(&fragments[..]), None);
    let script = test.config.reference_dir.join("tmpl_tiny_rename-json.py");
    fs::write(&script, FAILING_RENAME).unwrap();
    let (result, _) = test.run("job1", "out");
    assert!(!result.success);
    assert!(result.message.contains(&script.display().to_string()));
    assert!(result.message.contains("no such name map"));
}


#[test]
fn test_bad_parameters() {
    let fragments = frags(&["ACGTACGT"]);
    let mut test = TestJob::new(Some(&fragments[..]), None);
    let out_dir = test.dir.path().join("out");
    fs::create_dir(&out_dir).unwrap();

    let mut bad = params();
    bad.insert("Not a real option".to_string(), json!(1));
    let result = run_job(&mut test.service, "job1", &bad, &out_dir, &test.config);
    assert!(!result.success);
    assert_eq!(result.message, "invalid parameter: Not a real option");

    let mut bad = params();
    bad.insert(REFERENCE_DISPLAY_NAME.to_string(), json!("missing"));
    let result = run_job(&mut test.service, "job1", &bad, &out_dir, &test.config);
    assert!(!result.success);
    assert!(result.message.contains("missing"));
    assert_eq!(test.service.steps, vec!["Step 1 of 4: Collecting information"; 2]);
}


#[test]
fn test_many_random_fragments() {
    let fragments: BTreeSet<String> = (0..60).map(|i| random_seq(40, i)).collect();
    let fragments: Vec<String> = fragments.into_iter().collect();
    let placed: Vec<&String> = fragments.iter().filter(|f| !f.starts_with("AAAA")).collect();
    let mut test = TestJob::new(Some(&fragments[..]), None);
    let (result, out_dir) = test.run("job1", "out");
    assert!(result.success, "{}", result.message);

    let tree = NewickTree::load(&out_dir.join(RELABELLED_TREE_FILENAME)).unwrap();
    let leaves: BTreeSet<&str> = tree.leaf_labels().into_iter().collect();
    for fragment in &placed {
        assert!(leaves.contains(fragment.as_str()));
    }
    assert_eq!(leaves.len(), placed.len() + 2);

    let summary = read_to_string(out_dir.join("job_summary.yaml")).unwrap();
    let summary: serde_yaml::Value = serde_yaml::from_str(&summary).unwrap();
    let fraction = summary["placed_fraction"].as_f64().unwrap();
    assert_almost_eq(fraction, placed.len() as f64 / fragments.len() as f64, 1e-9);
}
