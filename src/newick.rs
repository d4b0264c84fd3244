// This file contains a small Newick tree reader/writer, enough to list a tree's tips and to fill
// in missing branch lengths without otherwise changing the tree.

// Copyright 2024 The denoiseplace developers

// This file is part of denoiseplace. denoiseplace is free software: you can redistribute it
// and/or modify it under the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option) any later version.
// denoiseplace is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See
// the GNU General Public License for more details. You should have received a copy of the GNU
// General Public License along with denoiseplace. If not, see <http://www.gnu.org/licenses/>.

use std::path::Path;

use crate::error::{PipelineError, Result};
use crate::misc::{read_text, write_text};


/// One node of a tree. Branch lengths are kept as the text they were read from, so values come
/// back out exactly as they went in.
#[derive(Debug, Clone, Default)]
pub struct NewickNode {
    pub label: Option<String>,
    pub length: Option<String>,
    pub comment: String,
    pub children: Vec<usize>,
    pub parent: Option<usize>,
}

impl NewickNode {
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}


/// Nodes live in an arena and refer to each other by index. Parsing and writing use explicit
/// stacks, so very deep trees are fine.
#[derive(Debug, Clone)]
pub struct NewickTree {
    pub nodes: Vec<NewickNode>,
    pub root: usize,
}

impl NewickTree {
    pub fn load(filename: &Path) -> Result<Self> {
        let text = read_text(filename)?;
        NewickTree::parse(&text).map_err(|e| match e {
            PipelineError::Newick(msg) => {
                PipelineError::Newick(format!("{}: {}", filename.display(), msg))
            }
            other => other,
        })
    }

    pub fn save(&self, filename: &Path) -> Result<()> {
        write_text(filename, &format!("{}\n", self.to_newick()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        let chars: Vec<char> = text.chars().collect();
        let mut nodes = vec![NewickNode::default()];
        let mut current = 0;
        let mut i = 0;
        let mut finished = false;
        while i < chars.len() {
            let c = chars[i];
            match c {
                _ if finished => {
                    if !c.is_whitespace() {
                        return Err(newick_error(format!("unexpected '{c}' after ';'")));
                    }
                    i += 1;
                }
                '(' => {
                    current = add_child(&mut nodes, current);
                    i += 1;
                }
                ',' => {
                    let parent = nodes[current].parent
                        .ok_or_else(|| newick_error("',' outside of parentheses"))?;
                    current = add_child(&mut nodes, parent);
                    i += 1;
                }
                ')' => {
                    current = nodes[current].parent
                        .ok_or_else(|| newick_error("unbalanced ')'"))?;
                    i += 1;
                }
                ':' => {
                    let (length, next) = read_unquoted(&chars, i + 1);
                    if length.parse::<f64>().is_err() {
                        return Err(newick_error(format!("invalid branch length {length:?}")));
                    }
                    nodes[current].length = Some(length);
                    i = next;
                }
                '[' | '{' => {
                    let close = if c == '[' { ']' } else { '}' };
                    let end = chars[i..].iter().position(|&x| x == close)
                        .ok_or_else(|| newick_error(format!("unterminated '{c}'")))?;
                    nodes[current].comment.extend(&chars[i..i + end + 1]);
                    i += end + 1;
                }
                ';' => {
                    if current != 0 {
                        return Err(newick_error("unbalanced '('"));
                    }
                    finished = true;
                    i += 1;
                }
                '\'' => {
                    let (label, next) = read_quoted(&chars, i)?;
                    nodes[current].label = Some(label);
                    i = next;
                }
                _ if c.is_whitespace() => i += 1,
                _ => {
                    let (label, next) = read_unquoted(&chars, i);
                    nodes[current].label = Some(label);
                    i = next;
                }
            }
        }
        if !finished {
            return Err(newick_error("tree does not end with ';'"));
        }
        Ok(NewickTree { nodes, root: 0 })
    }

    pub fn to_newick(&self) -> String {
        let mut out = String::new();
        let mut stack = vec![(self.root, 0)];
        while let Some((id, child_i)) = stack.pop() {
            let node = &self.nodes[id];
            if child_i == 0 && !node.is_leaf() {
                out.push('(');
            }
            if child_i < node.children.len() {
                if child_i > 0 {
                    out.push(',');
                }
                stack.push((id, child_i + 1));
                stack.push((node.children[child_i], 0));
            } else {
                if !node.is_leaf() {
                    out.push(')');
                }
                write_node(&mut out, node);
            }
        }
        out.push(';');
        out
    }

    pub fn leaf_labels(&self) -> Vec<&str> {
        self.nodes.iter()
            .filter(|n| n.is_leaf())
            .filter_map(|n| n.label.as_deref())
            .collect()
    }

    pub fn fill_missing_lengths(&mut self, length: f64) -> usize {
        // Gives every non-root node without a branch length the given length, and returns how
        // many were filled. The root has no branch, so it is left alone.
        let root = self.root;
        let mut filled = 0;
        for (id, node) in self.nodes.iter_mut().enumerate() {
            if id != root && node.length.is_none() {
                node.length = Some(format!("{length:?}"));
                filled += 1;
            }
        }
        filled
    }
}


fn add_child(nodes: &mut Vec<NewickNode>, parent: usize) -> usize {
    let id = nodes.len();
    nodes.push(NewickNode { parent: Some(parent), ..Default::default() });
    nodes[parent].children.push(id);
    id
}


fn newick_error(msg: impl Into<String>) -> PipelineError {
    PipelineError::Newick(msg.into())
}


fn is_delimiter(c: char) -> bool {
    matches!(c, '(' | ')' | ',' | ':' | ';' | '[' | ']' | '{' | '}' | '\'') || c.is_whitespace()
}


fn read_unquoted(chars: &[char], start: usize) -> (String, usize) {
    let end = chars[start..].iter().position(|&c| is_delimiter(c))
        .map_or(chars.len(), |p| start + p);
    (chars[start..end].iter().collect(), end)
}


fn read_quoted(chars: &[char], start: usize) -> Result<(String, usize)> {
    // Reads a single-quoted label starting at the opening quote. A doubled quote inside the label
    // stands for one quote character.
    let mut label = String::new();
    let mut i = start + 1;
    while i < chars.len() {
        if chars[i] == '\'' {
            if chars.get(i + 1) == Some(&'\'') {
                label.push('\'');
                i += 2;
                continue;
            }
            return Ok((label, i + 1));
        }
        label.push(chars[i]);
        i += 1;
    }
    Err(newick_error("unterminated quoted label"))
}


pub fn needs_quotes(label: &str) -> bool {
    // Labels with whitespace or punctuation (other than a few characters common in ids) are
    // quoted.
    let plain = |c: char| matches!(c, '_' | '.' | '-' | '|');
    label.is_empty() || label.chars().any(|c| {
        c.is_whitespace() || (c.is_ascii_punctuation() && !plain(c))
    })
}


pub fn quote_label(label: &str) -> String {
    format!("'{}'", label.replace('\'', "''"))
}


fn write_node(out: &mut String, node: &NewickNode) {
    if let Some(label) = &node.label {
        if needs_quotes(label) { out.push_str(&quote_label(label)); }
                          else { out.push_str(label); }
    }
    if let Some(length) = &node.length {
        out.push(':');
        out.push_str(length);
    }
    out.push_str(&node.comment);
}
