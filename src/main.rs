// This is the main file of denoiseplace and where execution starts. It mainly handles the CLI and
// then calls into other files to run whichever subcommand the user chose.

// Copyright 2024 The denoiseplace developers

// This file is part of denoiseplace. denoiseplace is free software: you can redistribute it
// and/or modify it under the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option) any later version.
// denoiseplace is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See
// the GNU General Public License for more details. You should have received a copy of the GNU
// General Public License along with denoiseplace. If not, see <http://www.gnu.org/licenses/>.

use std::path::PathBuf;
use clap::{Parser, Subcommand, crate_version};

mod archive;
mod biom;
mod config;
mod error;
mod insertion;
mod job;
mod log;
mod metrics;
mod misc;
mod newick;
mod params;
mod placement;
mod reconcile;
mod relabel;
mod sepp;
mod service;
mod test_tools;
mod tool;

#[cfg(test)]
mod tests;

#[derive(Parser)]
#[clap(name = "denoiseplace",
       version = concat!("v", crate_version!()),
       about = "denoise amplicon reads and place the resulting fragments into a reference \
                phylogeny")]
#[command(author, version, long_about = None, disable_help_subcommand = true,
          propagate_version = true)]
#[clap(subcommand_required = true)]
#[clap(arg_required_else_help = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {

    /// run a denoising job for the workflow service
    Run {
        /// Base URL of the workflow service (required)
        #[clap(short = 'u', long = "url", required = true)]
        url: String,

        /// Job identifier (required)
        #[clap(short = 'j', long = "job_id", required = true)]
        job_id: String,

        /// JSON file of job parameters, keyed by display name (required)
        #[clap(short = 'p', long = "params", required = true)]
        params: PathBuf,

        /// Existing directory for job output (required)
        #[clap(short = 'o', long = "out_dir", required = true)]
        out_dir: PathBuf,

        /// YAML file of tool and reference settings
        #[clap(short = 'c', long = "config")]
        config: Option<PathBuf>,
    },

    /// print the denoising command line for a parameter file
    Command {
        /// JSON file of job parameters, keyed by display name (required)
        #[clap(short = 'p', long = "params", required = true)]
        params: PathBuf,

        /// Demultiplexed FASTQ file or directory of per-sample files (required)
        #[clap(short = 'i', long = "input", required = true)]
        input: PathBuf,

        /// Denoiser output directory (required)
        #[clap(short = 'o', long = "out_dir", required = true)]
        out_dir: PathBuf,

        /// YAML file of tool and reference settings
        #[clap(short = 'c', long = "config")]
        config: Option<PathBuf>,
    },

    /// build an insertion tree from an archive dump and a feature table
    #[command(name = "gen_tree")]
    GenTree {
        /// JSON archive dump of fragment placements (required)
        #[clap(short = 'a', long = "fp_archive", required = true)]
        fp_archive: PathBuf,

        /// BIOM feature table whose observations are fragments (required)
        #[clap(short = 'b', long = "fp_biom", required = true)]
        fp_biom: PathBuf,

        /// Existing directory for the tree and reconciled table (required)
        #[clap(short = 'o', long = "output_dir", required = true)]
        output_dir: PathBuf,

        /// Placement template of the reference phylogeny (required)
        #[clap(short = 't', long = "fp_ref_template", required = true)]
        fp_ref_template: PathBuf,

        /// Rename script or JSON name map [default: found next to the template]
        #[clap(short = 'r', long = "fp_ref_rename")]
        fp_ref_rename: Option<PathBuf>,

        /// YAML file of tool and reference settings
        #[clap(short = 'c', long = "config")]
        config: Option<PathBuf>,
    },

    /// remove feature table observations that are not tips of a tree
    #[command(name = "rm_unmatched")]
    RmUnmatched {
        /// Newick tree (required)
        #[clap(short = 't', long = "fp_phylogeny", required = true)]
        fp_phylogeny: PathBuf,

        /// BIOM feature table, rewritten in place (required)
        #[clap(short = 'b', long = "fp_biom", required = true)]
        fp_biom: PathBuf,
    },

    /// build placement reference files from an alignment and phylogeny
    #[command(name = "make_template")]
    MakeTemplate {
        /// Newick reference phylogeny (required)
        #[clap(short = 't', long = "fp_phylogeny", required = true)]
        fp_phylogeny: PathBuf,

        /// FASTA reference alignment (required)
        #[clap(short = 'a', long = "fp_alignment", required = true)]
        fp_alignment: PathBuf,

        /// Existing directory for the reference files (required)
        #[clap(short = 'o', long = "output_dir", required = true)]
        output_dir: PathBuf,

        /// Reference name used in the file names (required)
        #[clap(short = 'n', long = "name", required = true)]
        name: String,

        /// Placement tool executable
        #[clap(long = "tool", default_value = "run-sepp.sh")]
        tool: String,

        /// Number of CPU threads
        #[clap(long = "threads", default_value = "1")]
        threads: u32,
    },

    /// replace placeholder tip names in a Newick tree using a name map
    Relabel {
        /// JSON object mapping placeholder names to real names (required)
        #[clap(short = 'm', long = "name_map", required = true)]
        name_map: PathBuf,

        /// Input Newick tree [default: stdin]
        #[clap(short = 'i', long = "in_tree")]
        in_tree: Option<PathBuf>,

        /// Output Newick tree [default: stdout]
        #[clap(short = 'o', long = "out_tree")]
        out_tree: Option<PathBuf>,
    },
}


fn main() {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Run { url, job_id, params, out_dir, config }) => {
            job::run(url, job_id, params, out_dir, config);
        },
        Some(Commands::Command { params, input, out_dir, config }) => {
            params::command(params, input, out_dir, config);
        },
        Some(Commands::GenTree { fp_archive, fp_biom, output_dir, fp_ref_template, fp_ref_rename,
                                 config }) => {
            reconcile::gen_tree(fp_archive, fp_biom, output_dir, fp_ref_template, fp_ref_rename,
                                config);
        },
        Some(Commands::RmUnmatched { fp_phylogeny, fp_biom }) => {
            reconcile::rm_unmatched(fp_phylogeny, fp_biom);
        },
        Some(Commands::MakeTemplate { fp_phylogeny, fp_alignment, output_dir, name, tool,
                                      threads }) => {
            sepp::make_template(fp_phylogeny, fp_alignment, output_dir, name, tool, threads);
        },
        Some(Commands::Relabel { name_map, in_tree, out_tree }) => {
            relabel::relabel(name_map, in_tree, out_tree);
        },
        None => {}
    }
}
