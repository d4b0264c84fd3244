// This file contains the code that drives the external placement tool: placing novel fragments
// into the reference phylogeny, and bootstrapping the template for a new reference.

// Copyright 2024 The denoiseplace developers

// This file is part of denoiseplace. denoiseplace is free software: you can redistribute it
// and/or modify it under the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option) any later version.
// denoiseplace is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See
// the GNU General Public License for more details. You should have received a copy of the GNU
// General Public License along with denoiseplace. If not, see <http://www.gnu.org/licenses/>.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::{rename_script_path, template_path, Reference};
use crate::error::{PipelineError, Result};
use crate::log::{explanation, section_header};
use crate::misc::{check_if_dir_exists, check_if_file_exists, create_dir, load_fasta, plural,
                  quit_with_error, remove_stale_file, require_dir, require_file,
                  write_self_labelled_fasta};
use crate::placement::{check_fragment, Placement, PlacementDocument};
use crate::tool::{ToolCall, ToolOutput};


const LOG_TAIL_LINES: usize = 20;


/// How to run the placement tool for one batch of fragments.
#[derive(Debug, Clone)]
pub struct PlacementSettings {
    pub tool: String,
    pub run_name: String,
    pub threads: u32,
    pub alignment: Option<PathBuf>,
    pub phylogeny: Option<PathBuf>,
}

impl PlacementSettings {
    pub fn for_reference(tool: &str, run_name: &str, threads: u32, reference: &Reference) -> Self {
        PlacementSettings { tool: tool.to_string(), run_name: run_name.to_string(), threads,
                            alignment: reference.alignment.clone(),
                            phylogeny: reference.phylogeny.clone() }
    }

    fn placement_file(&self, out_dir: &Path) -> PathBuf {
        out_dir.join(format!("{}_placement.json", self.run_name))
    }

    fn log_files(&self, out_dir: &Path) -> [PathBuf; 2] {
        [out_dir.join(format!("sepp-{}-out.log", self.run_name)),
         out_dir.join(format!("sepp-{}-err.log", self.run_name))]
    }

    fn call(&self, input_fasta: &Path, out_dir: &Path) -> ToolCall {
        let mut call = ToolCall::new(&self.tool)
            .arg(input_fasta)
            .arg(&self.run_name)
            .arg("-x").arg(self.threads.to_string());
        if let Some(phylogeny) = &self.phylogeny {
            call = call.arg("-t").arg(phylogeny);
        }
        if let Some(alignment) = &self.alignment {
            call = call.arg("-a").arg(alignment);
        }
        call.current_dir(out_dir)
    }
}


pub fn generate_placements(fragments: &[String], out_dir: &Path, settings: &PlacementSettings)
        -> Result<BTreeMap<String, Placement>> {
    // Places the given fragments and returns a placement for each fragment the tool placed.
    // Fragments the tool drops silently are just missing from the result, and it is up to the
    // caller to treat them as rejected.
    if fragments.is_empty() {
        return Ok(BTreeMap::new());
    }
    for fragment in fragments {
        check_fragment(fragment)?;
    }
    require_dir(out_dir, "placement output directory")?;

    // Paths handed to the tool are made absolute, since the tool runs in out_dir.
    let out_dir = absolute(out_dir)?;
    let input_fasta = out_dir.join("input.fasta");
    write_self_labelled_fasta(&input_fasta, fragments)?;

    let placement_file = settings.placement_file(&out_dir);
    remove_stale_file(&placement_file)?;
    for log in settings.log_files(&out_dir) {
        remove_stale_file(&log)?;
    }

    eprintln!("Placing {} with {}", plural(fragments.len(), "novel fragment"), settings.tool);
    let output = settings.call(&input_fasta, &out_dir).run(&settings.tool)?;

    // The wrapper script usually exits zero even when one of its stages fails, so a missing
    // output file is the main sign of failure.
    if !output.success() {
        let log = log_excerpt(&settings.log_files(&out_dir));
        let mut failure = output.into_failure(&settings.tool);
        if let PipelineError::ToolFailure { stderr, .. } = &mut failure {
            if !log.is_empty() { stderr.push_str(&format!("\n{log}")); }
        }
        return Err(failure);
    }
    if !placement_file.is_file() {
        return Err(missing_output(&settings.tool, &placement_file, &output,
                                  &settings.log_files(&out_dir)));
    }

    let requested: HashSet<&str> = fragments.iter().map(|f| f.as_str()).collect();
    let placements: BTreeMap<String, Placement> = PlacementDocument::load(&placement_file)?
        .fragment_placements()?
        .into_iter().filter(|(name, _)| requested.contains(name.as_str()))
        .collect();
    eprintln!("  {} placed, {} rejected", placements.len(), fragments.len() - placements.len());
    Ok(placements)
}


fn missing_output(tool: &str, path: &Path, output: &ToolOutput, logs: &[PathBuf]) -> PipelineError {
    let mut log = format!("Std out: {}\nStd err: {}", output.stdout, output.stderr);
    let excerpt = log_excerpt(logs);
    if !excerpt.is_empty() {
        log.push('\n');
        log.push_str(&excerpt);
    }
    PipelineError::MissingOutput { tool: tool.to_string(), path: path.to_path_buf(), log }
}


fn log_excerpt(logs: &[PathBuf]) -> String {
    // Returns the end of each log file the tool left behind. The last lines usually name the
    // stage that failed.
    let mut parts = Vec::new();
    for log in logs {
        let Ok(text) = fs::read_to_string(log) else { continue };
        let lines: Vec<&str> = text.lines().collect();
        let tail = &lines[lines.len().saturating_sub(LOG_TAIL_LINES)..];
        let name = log.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
        parts.push(format!("{}:\n{}", name, tail.join("\n")));
    }
    parts.join("\n")
}


fn absolute(path: &Path) -> Result<PathBuf> {
    std::path::absolute(path).map_err(|e| {
        PipelineError::io(format!("could not resolve {}", path.display()), e)
    })
}


pub fn make_template(fp_phylogeny: PathBuf, fp_alignment: PathBuf, output_dir: PathBuf,
                     name: String, tool: String, threads: u32) {
    check_settings(&fp_phylogeny, &fp_alignment, &output_dir, &name, threads);
    starting_message();
    print_settings(&fp_phylogeny, &fp_alignment, &output_dir, &name, threads);
    let template = build_template(&fp_phylogeny, &fp_alignment, &output_dir, &name, &tool,
                                  threads).unwrap_or_else(|e| quit_with_error(&e.to_string()));
    finished_message(&template, &output_dir);
}


fn check_settings(fp_phylogeny: &Path, fp_alignment: &Path, output_dir: &Path, name: &str,
                  threads: u32) {
    check_if_file_exists(fp_phylogeny);
    check_if_file_exists(fp_alignment);
    check_if_dir_exists(output_dir);
    if name.is_empty() || name.contains(['/', '\\']) {
        quit_with_error("--name must be a plain name, not a path");
    }
    if threads == 0 {
        quit_with_error("--threads must be at least 1");
    }
}


fn starting_message() {
    section_header("Starting denoiseplace make_template");
    explanation("This command runs the placement tool once against a new reference phylogeny and \
                 saves the resulting tree and metadata as a placement template, so that later \
                 jobs can graft their fragments onto this reference.");
}


fn print_settings(fp_phylogeny: &Path, fp_alignment: &Path, output_dir: &Path, name: &str,
                  threads: u32) {
    eprintln!("Settings:");
    eprintln!("  --fp_phylogeny {}", fp_phylogeny.display());
    eprintln!("  --fp_alignment {}", fp_alignment.display());
    eprintln!("  --output_dir {}", output_dir.display());
    eprintln!("  --name {}", name);
    eprintln!("  --threads {}", threads);
    eprintln!();
}


fn finished_message(template: &Path, output_dir: &Path) {
    section_header("Finished!");
    eprintln!("Placement template: {}", template.display());
    eprintln!("Reference directory: {}", output_dir.display());
    eprintln!();
}


pub fn build_template(fp_phylogeny: &Path, fp_alignment: &Path, output_dir: &Path, name: &str,
                      tool: &str, threads: u32) -> Result<PathBuf> {
    // Places one reference sequence (ungapped) so the tool writes out the reference tree and its
    // rename script, then keeps everything except the placement itself. The reference files are
    // copied alongside so the output directory can be used as a reference directory directly.
    require_file(fp_phylogeny, "reference phylogeny")?;
    require_file(fp_alignment, "reference alignment")?;
    require_dir(output_dir, "output directory")?;

    section_header("Running placement tool");
    explanation("A single reference sequence is placed to produce the reference tree.");
    let alignment = load_fasta(fp_alignment)?;
    let probe = alignment.iter()
        .map(|(_, seq)| seq.replace(['-', '.'], ""))
        .find(|seq| !seq.is_empty())
        .ok_or_else(|| PipelineError::InvalidInput(
            format!("{} contains no sequences", fp_alignment.display())))?;

    let work_dir = output_dir.join(format!("tmpl_{name}_work"));
    create_dir(&work_dir)?;
    let settings = PlacementSettings { tool: tool.to_string(), run_name: format!("tmpl_{name}"),
                                       threads, alignment: Some(absolute(fp_alignment)?),
                                       phylogeny: Some(absolute(fp_phylogeny)?) };
    generate_placements(&[probe], &work_dir, &settings)?;

    let mut document = PlacementDocument::load(&settings.placement_file(&absolute(&work_dir)?))?;
    document.placements.clear();
    let template = template_path(output_dir, name);
    document.save(&template)?;

    let produced_script = work_dir.join(format!("{}_rename-json.py", settings.run_name));
    require_file(&produced_script, "rename script from the placement tool")?;
    copy(&produced_script, &rename_script_path(output_dir, name))?;
    copy(fp_alignment, &output_dir.join(format!("reference_alignment_{name}.fasta")))?;
    copy(fp_phylogeny, &output_dir.join(format!("reference_phylogeny_{name}.nwk")))?;
    eprintln!("Template has {} top-level keys", document.other.len() + 2);
    Ok(template)
}


fn copy(from: &Path, to: &Path) -> Result<()> {
    if absolute(from)? == absolute(to)? { return Ok(()); }
    fs::copy(from, to).map(|_| ()).map_err(|e| {
        PipelineError::io(format!("failed to copy {} to {}", from.display(), to.display()), e)
    })
}
