// This file contains the plugin configuration (external tool names and reference data) and the
// lookup of reference phylogenies by name.

// Copyright 2024 The denoiseplace developers

// This file is part of denoiseplace. denoiseplace is free software: you can redistribute it
// and/or modify it under the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option) any later version.
// denoiseplace is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See
// the GNU General Public License for more details. You should have received a copy of the GNU
// General Public License along with denoiseplace. If not, see <http://www.gnu.org/licenses/>.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{PipelineError, Result};
use crate::misc::read_text;


/// The reference shipped inside the placement tool's own package. It needs no alignment or
/// phylogeny override, only a template and rename script.
pub const DEFAULT_REFERENCE: &str = "Greengenes_13.8";
const DEFAULT_REFERENCE_FILE_TAG: &str = "gg13.8-99";


#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub denoise_tool: String,
    pub placement_tool: String,
    pub graft_tool: String,
    pub python: String,
    pub reference_dir: PathBuf,
    pub placement_run_name: String,
    pub default_reference: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            denoise_tool: "deblur".to_string(),
            placement_tool: "run-sepp.sh".to_string(),
            graft_tool: "guppy".to_string(),
            python: "python3".to_string(),
            reference_dir: PathBuf::from("support_files/sepp"),
            placement_run_name: "qiita".to_string(),
            default_reference: DEFAULT_REFERENCE.to_string(),
        }
    }
}

impl Config {
    pub fn load(yaml_path: Option<&Path>) -> Result<Self> {
        match yaml_path {
            None => Ok(Config::default()),
            Some(path) => {
                let content = read_text(path)?;
                serde_yaml::from_str(&content).map_err(|e| {
                    PipelineError::InvalidInput(format!("failed to parse config {}\n{}",
                                                        path.display(), e))
                })
            }
        }
    }

    pub fn reference(&self, name: Option<&str>) -> Result<Reference> {
        let name = name.unwrap_or(&self.default_reference);
        Reference::resolve(&self.reference_dir, name)
    }
}


/// The files that describe one reference phylogeny. The alignment and phylogeny are only set for
/// references that are not built into the placement tool.
#[derive(Debug, Clone, PartialEq)]
pub struct Reference {
    pub name: String,
    pub template: PathBuf,
    pub rename_script: PathBuf,
    pub alignment: Option<PathBuf>,
    pub phylogeny: Option<PathBuf>,
}

impl Reference {
    pub fn resolve(reference_dir: &Path, name: &str) -> Result<Self> {
        if name.is_empty() || name.contains(['/', '\\']) {
            return Err(PipelineError::InvalidParameter(
                format!("reference phylogeny name {name:?} is not valid")));
        }
        let reference = if name == DEFAULT_REFERENCE {
            Reference {
                name: name.to_string(),
                template: template_path(reference_dir, DEFAULT_REFERENCE_FILE_TAG),
                rename_script: rename_script_path(reference_dir, DEFAULT_REFERENCE_FILE_TAG),
                alignment: None,
                phylogeny: None,
            }
        } else {
            Reference {
                name: name.to_string(),
                template: template_path(reference_dir, name),
                rename_script: rename_script_path(reference_dir, name),
                alignment: Some(reference_dir.join(format!("reference_alignment_{name}.fasta"))),
                phylogeny: Some(reference_dir.join(format!("reference_phylogeny_{name}.nwk"))),
            }
        };
        reference.check_files()?;
        Ok(reference)
    }

    fn check_files(&self) -> Result<()> {
        let mut files = vec![&self.template, &self.rename_script];
        files.extend(self.alignment.iter());
        files.extend(self.phylogeny.iter());
        for f in files {
            if !f.is_file() {
                return Err(PipelineError::InvalidParameter(
                    format!("reference phylogeny {:?} is missing {}", self.name, f.display())));
            }
        }
        Ok(())
    }
}


pub fn template_path(dir: &Path, tag: &str) -> PathBuf {
    dir.join(format!("tmpl_{tag}_placement.json"))
}


pub fn rename_script_path(dir: &Path, tag: &str) -> PathBuf {
    dir.join(format!("tmpl_{tag}_rename-json.py"))
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_load_config() {
        assert_eq!(Config::load(None).unwrap(), Config::default());

        let dir = tempdir().unwrap();
        let yaml = dir.path().join("config.yaml");
        fs::write(&yaml, "graft_tool: /opt/pplacer/guppy\nplacement_run_name: job\n").unwrap();
        let config = Config::load(Some(&yaml)).unwrap();
        assert_eq!(config.graft_tool, "/opt/pplacer/guppy");
        assert_eq!(config.placement_run_name, "job");
        assert_eq!(config.denoise_tool, "deblur");

        fs::write(&yaml, "graft_toll: guppy\n").unwrap();
        assert!(Config::load(Some(&yaml)).is_err());
    }

    #[test]
    fn test_resolve_references() {
        let dir = tempdir().unwrap();
        let d = dir.path();
        for f in ["tmpl_gg13.8-99_placement.json", "tmpl_gg13.8-99_rename-json.py",
                  "tmpl_tiny_placement.json", "tmpl_tiny_rename-json.py",
                  "reference_alignment_tiny.fasta", "reference_phylogeny_tiny.nwk"] {
            fs::write(d.join(f), "").unwrap();
        }
        let gg = Reference::resolve(d, DEFAULT_REFERENCE).unwrap();
        assert_eq!(gg.template, d.join("tmpl_gg13.8-99_placement.json"));
        assert!(gg.alignment.is_none() && gg.phylogeny.is_none());

        let tiny = Reference::resolve(d, "tiny").unwrap();
        assert_eq!(tiny.rename_script, d.join("tmpl_tiny_rename-json.py"));
        assert_eq!(tiny.alignment, Some(d.join("reference_alignment_tiny.fasta")));
        assert_eq!(tiny.phylogeny, Some(d.join("reference_phylogeny_tiny.nwk")));

        assert!(matches!(Reference::resolve(d, "silva"),
                         Err(PipelineError::InvalidParameter(_))));
        assert!(Reference::resolve(d, "../tiny").is_err());
    }
}
