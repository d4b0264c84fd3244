// This file contains the table reconciler, which drops table features that did not make it into
// the insertion tree, and the gen_tree and rm_unmatched commands built on it.

// Copyright 2024 The denoiseplace developers

// This file is part of denoiseplace. denoiseplace is free software: you can redistribute it
// and/or modify it under the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option) any later version.
// denoiseplace is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See
// the GNU General Public License for more details. You should have received a copy of the GNU
// General Public License along with denoiseplace. If not, see <http://www.gnu.org/licenses/>.

use fxhash::FxHashSet;
use serde_json::json;
use std::path::{Path, PathBuf};

use crate::archive::{load_archive_dump, placed_only, Observations};
use crate::biom::FeatureTable;
use crate::config::Config;
use crate::error::{PipelineError, Result};
use crate::insertion::{generate_insertion_tree, GraftTools, TreeReference};
use crate::log::{explanation, section_header};
use crate::metrics::ReconcileMetrics;
use crate::misc::{check_if_dir_exists, check_if_file_exists, plural, quit_with_error};
use crate::newick::NewickTree;


pub fn filter_table_to_tree(table: &mut FeatureTable, tree: &NewickTree) -> ReconcileMetrics {
    // Keeps only the observations that are tips of the tree.
    let tips: FxHashSet<&str> = tree.leaf_labels().into_iter().collect();
    let removed = table.filter_observations(|id| tips.contains(id));
    ReconcileMetrics { observations_kept: table.observation_count(),
                       observations_removed: removed.len() }
}


pub fn reconcile_table(fp_tree: &Path, fp_biom: &Path, out_biom: &Path)
        -> Result<ReconcileMetrics> {
    let tree = NewickTree::load(fp_tree)?;
    let mut table = FeatureTable::load(fp_biom)?;
    let metrics = filter_table_to_tree(&mut table, &tree);
    table.save(out_biom)?;
    Ok(metrics)
}


pub fn rm_unmatched(fp_phylogeny: PathBuf, fp_biom: PathBuf) {
    check_if_file_exists(&fp_phylogeny);
    check_if_file_exists(&fp_biom);
    section_header("Starting denoiseplace rm_unmatched");
    explanation("This command removes features from a table that are not tips of the given \
                 insertion tree, for example fragments the placement tool rejected. The table \
                 is rewritten in place.");
    eprintln!("Settings:");
    eprintln!("  --fp_phylogeny {}", fp_phylogeny.display());
    eprintln!("  --fp_biom {}", fp_biom.display());
    eprintln!();
    let metrics = reconcile_table(&fp_phylogeny, &fp_biom, &fp_biom)
        .unwrap_or_else(|e| quit_with_error(&e.to_string()));
    section_header("Finished!");
    eprintln!("Kept {}, removed {}", plural(metrics.observations_kept, "feature"),
              plural(metrics.observations_removed, "feature"));
    eprintln!();
}


/// What gen_tree produced: the insertion tree (when any fragment was placed) and the table.
#[derive(Debug)]
pub struct GeneratedTree {
    pub tree: Option<PathBuf>,
    pub biom: PathBuf,
    pub metrics: ReconcileMetrics,
}


pub fn gen_tree(fp_archive: PathBuf, fp_biom: PathBuf, output_dir: PathBuf,
                fp_ref_template: PathBuf, fp_ref_rename: Option<PathBuf>,
                config: Option<PathBuf>) {
    check_if_file_exists(&fp_archive);
    check_if_file_exists(&fp_biom);
    check_if_dir_exists(&output_dir);
    check_if_file_exists(&fp_ref_template);
    let fp_ref_rename = fp_ref_rename
        .or_else(|| rename_script_for_template(&fp_ref_template))
        .unwrap_or_else(|| quit_with_error("--fp_ref_rename is required when the template is \
                                            not named tmpl_<name>_placement.json"));
    check_if_file_exists(&fp_ref_rename);
    let config = Config::load(config.as_deref())
        .unwrap_or_else(|e| quit_with_error(&e.to_string()));

    section_header("Starting denoiseplace gen_tree");
    explanation("This command builds an insertion tree from archived placements for the \
                 features of a table, then removes from the table any feature that did not make \
                 it into the tree.");
    eprintln!("Settings:");
    eprintln!("  --fp_archive {}", fp_archive.display());
    eprintln!("  --fp_biom {}", fp_biom.display());
    eprintln!("  --output_dir {}", output_dir.display());
    eprintln!("  --fp_ref_template {}", fp_ref_template.display());
    eprintln!("  --fp_ref_rename {}", fp_ref_rename.display());
    eprintln!();

    let reference = TreeReference { template: fp_ref_template, rename_script: fp_ref_rename };
    let tools = GraftTools { graft_tool: config.graft_tool, python: config.python };
    let generated = tree_from_archive(&fp_archive, &fp_biom, &output_dir, &reference, &tools)
        .unwrap_or_else(|e| quit_with_error(&e.to_string()));

    section_header("Finished!");
    eprintln!("Kept {}, removed {}", plural(generated.metrics.observations_kept, "feature"),
              plural(generated.metrics.observations_removed, "feature"));
    eprintln!();
    println!("{}", generated_json(&generated));
}


pub fn generated_json(generated: &GeneratedTree) -> serde_json::Value {
    json!({"archive": generated.tree.as_ref().map(|p| p.display().to_string()),
           "biom": generated.biom.display().to_string()})
}


pub fn tree_from_archive(fp_archive: &Path, fp_biom: &Path, output_dir: &Path,
                         reference: &TreeReference, tools: &GraftTools) -> Result<GeneratedTree> {
    // The table is written into output_dir under its own file name. Without any placed feature
    // there is no tree and the table is written unfiltered.
    let archive = load_archive_dump(fp_archive)?;
    let mut table = FeatureTable::load(fp_biom)?;
    let relevant: Observations = table.observation_ids().into_iter()
        .filter_map(|id| archive.get(&id).map(|v| (id, v.clone())))
        .collect();
    eprintln!("{} of {} have an archive entry", plural(relevant.len(), "feature"),
              table.observation_count());
    let placements = placed_only(&relevant)?;

    let tree = generate_insertion_tree(&placements, output_dir, reference, tools)?;
    let metrics = match &tree {
        Some(tree_file) => filter_table_to_tree(&mut table, &NewickTree::load(tree_file)?),
        None => ReconcileMetrics { observations_kept: table.observation_count(),
                                   observations_removed: 0 },
    };
    let file_name = fp_biom.file_name().ok_or_else(|| {
        PipelineError::InvalidInput(format!("{} is not a file path", fp_biom.display()))
    })?;
    let biom = output_dir.join(file_name);
    table.save(&biom)?;
    Ok(GeneratedTree { tree, biom, metrics })
}


pub fn rename_script_for_template(template: &Path) -> Option<PathBuf> {
    // tmpl_<name>_placement.json sits next to tmpl_<name>_rename-json.py.
    let name = template.file_name()?.to_str()?;
    let stem = name.strip_suffix("_placement.json")?;
    Some(template.with_file_name(format!("{stem}_rename-json.py")))
}
