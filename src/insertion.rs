// This file contains the tree assembler: it grafts placed fragments onto the reference tree,
// restores the reference's tip names and makes sure every branch has a length.

// Copyright 2024 The denoiseplace developers

// This file is part of denoiseplace. denoiseplace is free software: you can redistribute it
// and/or modify it under the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option) any later version.
// denoiseplace is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See
// the GNU General Public License for more details. You should have received a copy of the GNU
// General Public License along with denoiseplace. If not, see <http://www.gnu.org/licenses/>.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use crate::error::{PipelineError, Result};
use crate::misc::{plural, remove_stale_file, require_dir, require_file};
use crate::newick::NewickTree;
use crate::placement::{check_fragment, reorder_record, Placement, PlacementDocument,
                       PlacementEntry, CANONICAL_FIELDS};
use crate::relabel::relabel_file;
use crate::tool::ToolCall;


pub const PLACEMENTS_FILENAME: &str = "placements.json";
pub const TREE_FILENAME: &str = "insertion_tree.tre";
pub const RELABELLED_TREE_FILENAME: &str = "insertion_tree.relabelled.tre";

// Name used for the grafting tool in error messages, whatever binary is configured.
const GRAFT_TOOL_NAME: &str = "guppy";


/// The programs the assembler runs.
#[derive(Debug, Clone)]
pub struct GraftTools {
    pub graft_tool: String,
    pub python: String,
}


/// The reference data a tree is assembled against.
#[derive(Debug, Clone)]
pub struct TreeReference {
    pub template: PathBuf,
    pub rename_script: PathBuf,
}


pub fn generate_insertion_tree(placements: &BTreeMap<String, Placement>, out_dir: &Path,
                               reference: &TreeReference, tools: &GraftTools)
        -> Result<Option<PathBuf>> {
    // Builds the insertion tree for the given fragments and returns its path. With no placements
    // there is nothing to graft and no tree is made.
    if placements.is_empty() {
        eprintln!("No placed fragments, so no insertion tree is made");
        return Ok(None);
    }
    for fragment in placements.keys() {
        check_fragment(fragment)?;
    }
    require_dir(out_dir, "tree output directory")?;
    require_file(&reference.template, "placement template")?;
    require_file(&reference.rename_script, "rename script")?;

    let placements_file = out_dir.join(PLACEMENTS_FILENAME);
    let document = placement_document(&reference.template, placements)?;
    document.save(&placements_file)?;
    eprintln!("Grafting {} onto the reference tree", plural(placements.len(), "fragment"));

    let tree_file = out_dir.join(TREE_FILENAME);
    graft(&placements_file, &tree_file, tools)?;

    let relabelled_file = out_dir.join(RELABELLED_TREE_FILENAME);
    rename_tips(&tree_file, &relabelled_file, &reference.rename_script, tools)?;

    let mut tree = NewickTree::load(&relabelled_file)?;
    let filled = tree.fill_missing_lengths(0.0);
    tree.save(&relabelled_file)?;
    eprintln!("  {} given a length of 0.0", plural(filled, "branch without a length"));

    let leaves: HashSet<&str> = tree.leaf_labels().into_iter().collect();
    let missing = placements.keys().filter(|f| !leaves.contains(f.as_str())).count();
    if missing > 0 {
        eprintln!("  {} not found among the tree's tips", plural(missing, "fragment"));
    }
    Ok(Some(relabelled_file))
}


fn placement_document(template: &Path, placements: &BTreeMap<String, Placement>)
        -> Result<PlacementDocument> {
    // Loads the template fresh and adds one entry per fragment. Anything the template already
    // holds is rewritten into canonical field order first, so the whole document uses one order.
    let mut document = PlacementDocument::load(template)?;
    let canonical: Vec<String> = CANONICAL_FIELDS.iter().map(|s| s.to_string()).collect();
    if !document.placements.is_empty() && document.fields != canonical {
        for entry in &mut document.placements {
            let mut records = Vec::with_capacity(entry.p.len());
            for record in &entry.p {
                let attachment = reorder_record(record, &document.fields)?;
                match serde_json::to_value(attachment)? {
                    serde_json::Value::Array(values) => records.push(values),
                    other => records.push(vec![other]),
                }
            }
            entry.p = records;
        }
    }
    document.fields = canonical;
    for (fragment, placement) in placements {
        document.placements.push(PlacementEntry::for_fragment(fragment, placement)?);
    }
    Ok(document)
}


fn graft(placements_file: &Path, tree_file: &Path, tools: &GraftTools) -> Result<()> {
    remove_stale_file(tree_file)?;
    let output = ToolCall::new(&tools.graft_tool)
        .arg("tog").arg(placements_file).arg("-o").arg(tree_file)
        .run(GRAFT_TOOL_NAME)?;
    if !output.success() {
        return Err(output.into_failure(GRAFT_TOOL_NAME));
    }
    if !tree_file.is_file() {
        return Err(PipelineError::MissingOutput { tool: GRAFT_TOOL_NAME.to_string(),
                                                  path: tree_file.to_path_buf(),
                                                  log: output.stderr });
    }
    Ok(())
}


fn rename_tips(tree_file: &Path, relabelled_file: &Path, rename_script: &Path,
               tools: &GraftTools) -> Result<()> {
    // A rename file can be a name map (relabelled here), a Python script (run with the configured
    // interpreter) or any other executable. Failures are reported under the script's path.
    let script_name = rename_script.display().to_string();
    let extension = rename_script.extension().and_then(|e| e.to_str()).unwrap_or("");
    let call = match extension {
        "json" => return relabel_file(tree_file, relabelled_file, rename_script),
        "py" => ToolCall::new(&tools.python).arg(rename_script),
        _ => ToolCall::new(rename_script),
    };
    let output = call.stdin_file(tree_file).stdout_file(relabelled_file).run(&script_name)?;
    if !output.success() {
        return Err(output.into_failure(&script_name));
    }
    Ok(())
}
