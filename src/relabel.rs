// This file contains the code for restoring real tip names in a grafted tree. The placement tool
// renames reference tips to safe placeholder names, and a name map turns them back.

// Copyright 2024 The denoiseplace developers

// This file is part of denoiseplace. denoiseplace is free software: you can redistribute it
// and/or modify it under the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option) any later version.
// denoiseplace is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See
// the GNU General Public License for more details. You should have received a copy of the GNU
// General Public License along with denoiseplace. If not, see <http://www.gnu.org/licenses/>.

use regex::{Captures, Regex};
use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use crate::error::{PipelineError, Result};
use crate::log::{explanation, section_header};
use crate::misc::{check_if_file_exists, quit_with_error, read_text, write_text};


/// Placeholder names always start with the same prefix.
static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"UQrYOlnDN[^(,:)<>]+").unwrap());


pub type NameMap = HashMap<String, String>;


pub fn load_name_map(filename: &Path) -> Result<NameMap> {
    let text = read_text(filename)?;
    serde_json::from_str(&text).map_err(|e| {
        PipelineError::InvalidInput(format!("{} is not a valid name map\n{}",
                                            filename.display(), e))
    })
}


pub fn relabel_newick(newick: &str, names: &NameMap) -> String {
    // Replaces each placeholder with its real name, quoting real names that contain whitespace or
    // punctuation. Placeholders not in the map are left as they are. Lines are handled one at a
    // time so that a placeholder never runs across a line break.
    newick.split_inclusive('\n')
        .map(|line| {
            let (body, ending) = match line.strip_suffix('\n') {
                Some(body) => (body, "\n"),
                None => (line, ""),
            };
            let replaced = PLACEHOLDER.replace_all(body, |caps: &Captures| {
                let placeholder = &caps[0];
                match names.get(placeholder) {
                    Some(name) if needs_quotes(name) => format!("'{name}'"),
                    Some(name) => name.clone(),
                    None => placeholder.to_string(),
                }
            });
            format!("{replaced}{ending}")
        })
        .collect()
}


fn needs_quotes(name: &str) -> bool {
    name.chars().any(|c| c.is_ascii_punctuation() || c.is_whitespace())
}


pub fn relabel(name_map: PathBuf, in_tree: Option<PathBuf>, out_tree: Option<PathBuf>) {
    // Reads the tree from stdin and writes to stdout unless files are given, so this command can
    // stand in for a rename script. Logging goes to stderr either way.
    check_if_file_exists(&name_map);
    if let Some(in_tree) = &in_tree {
        check_if_file_exists(in_tree);
    }
    section_header("Starting denoiseplace relabel");
    explanation("This command replaces the placeholder tip names in a grafted tree with the real \
                 names from a name map.");
    eprintln!("Settings:");
    eprintln!("  --name_map {}", name_map.display());
    eprintln!("  --in_tree {}",
              in_tree.as_ref().map_or("stdin".into(), |p| p.display().to_string()));
    eprintln!("  --out_tree {}",
              out_tree.as_ref().map_or("stdout".into(), |p| p.display().to_string()));
    eprintln!();
    let result = load_name_map(&name_map).and_then(|names| {
        let newick = match &in_tree {
            Some(path) => read_text(path)?,
            None => read_stdin()?,
        };
        let relabelled = relabel_newick(&newick, &names);
        match &out_tree {
            Some(path) => write_text(path, &relabelled),
            None => write_stdout(&relabelled),
        }
    });
    result.unwrap_or_else(|e| quit_with_error(&e.to_string()));
    section_header("Finished!");
    eprintln!();
}


pub fn relabel_file(in_tree: &Path, out_tree: &Path, name_map: &Path) -> Result<()> {
    let names = load_name_map(name_map)?;
    let newick = read_text(in_tree)?;
    write_text(out_tree, &relabel_newick(&newick, &names))
}


fn read_stdin() -> Result<String> {
    let mut text = String::new();
    io::stdin().read_to_string(&mut text)
        .map_err(|e| PipelineError::io("failed to read tree from stdin", e))?;
    Ok(text)
}


fn write_stdout(text: &str) -> Result<()> {
    let mut stdout = io::stdout().lock();
    stdout.write_all(text.as_bytes()).and_then(|_| stdout.flush())
        .map_err(|e| PipelineError::io("failed to write tree to stdout", e))
}
