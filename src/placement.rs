// This file contains the placement data model: fragments, the attachment records that make up a
// placement, and the placement document format read from the placement tool and written for the
// grafting tool.

// Copyright 2024 The denoiseplace developers

// This file is part of denoiseplace. denoiseplace is free software: you can redistribute it
// and/or modify it under the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option) any later version.
// denoiseplace is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See
// the GNU General Public License for more details. You should have received a copy of the GNU
// General Public License along with denoiseplace. If not, see <http://www.gnu.org/licenses/>.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{PipelineError, Result};
use crate::misc::{read_text, write_text};


/// The field order used for every placement stored in the archive or given to the grafting tool.
pub const CANONICAL_FIELDS: [&str; 5] =
    ["edge_num", "likelihood", "like_weight_ratio", "distal_length", "pendant_length"];

// IUPAC nucleotide codes plus gaps.
const VALID_BASES: &[u8] = b"ACGTURYSWKMBDHVN-.";


pub fn check_fragment(fragment: &str) -> Result<()> {
    if fragment.is_empty() {
        return Err(PipelineError::InvalidFragment { fragment: String::new(),
                                                    reason: "fragment is empty".to_string() });
    }
    if let Some(bad) = fragment.bytes().find(|b| !VALID_BASES.contains(b)) {
        let reason = if bad.is_ascii_lowercase() {
            "fragments must be upper case".to_string()
        } else {
            format!("'{}' is not a nucleotide symbol", bad as char)
        };
        return Err(PipelineError::InvalidFragment { fragment: fragment.to_string(), reason });
    }
    Ok(())
}


/// One candidate attachment of a fragment to an edge of the reference tree. It is serialised as a
/// five-number array in CANONICAL_FIELDS order. Numbers are kept as serde_json numbers, so
/// integers stay integers and floats keep their value, though not always their spelling
/// (`6.113515e-06` is written as `6.113515e-6`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "[Number; 5]", into = "[Number; 5]")]
pub struct Attachment {
    pub edge_num: Number,
    pub likelihood: Number,
    pub like_weight_ratio: Number,
    pub distal_length: Number,
    pub pendant_length: Number,
}

impl From<[Number; 5]> for Attachment {
    fn from(a: [Number; 5]) -> Self {
        let [edge_num, likelihood, like_weight_ratio, distal_length, pendant_length] = a;
        Attachment { edge_num, likelihood, like_weight_ratio, distal_length, pendant_length }
    }
}

impl From<Attachment> for [Number; 5] {
    fn from(a: Attachment) -> Self {
        [a.edge_num, a.likelihood, a.like_weight_ratio, a.distal_length, a.pendant_length]
    }
}

impl Attachment {
    pub fn like_weight_ratio(&self) -> f64 {
        self.like_weight_ratio.as_f64().unwrap_or(0.0)
    }
}


/// All candidate attachments for one fragment. An empty placement means the fragment was
/// rejected.
pub type Placement = Vec<Attachment>;


pub fn placement_to_json(placement: &Placement) -> Result<String> {
    Ok(serde_json::to_string(placement)?)
}


pub fn placement_from_json(json: &str) -> Result<Placement> {
    Ok(serde_json::from_str(json)?)
}


pub fn reorder_record(record: &[Value], declared_fields: &[String]) -> Result<Attachment> {
    // Takes one record in the tool's declared field order and returns it in canonical order,
    // matching by field name.
    check_fields(declared_fields)?;
    if record.len() != declared_fields.len() {
        return Err(PipelineError::InvalidInput(
            format!("placement record has {} values but {} fields are declared",
                    record.len(), declared_fields.len())));
    }
    let mut values = Vec::with_capacity(CANONICAL_FIELDS.len());
    for field in CANONICAL_FIELDS {
        let i = declared_fields.iter().position(|f| f == field)
            .ok_or_else(|| field_mismatch(declared_fields))?;
        match &record[i] {
            Value::Number(n) => values.push(n.clone()),
            other => return Err(PipelineError::InvalidInput(
                format!("placement field {field} is not a number: {other}"))),
        }
    }
    let values: [Number; 5] = values.try_into().map_err(|_| field_mismatch(declared_fields))?;
    Ok(Attachment::from(values))
}


fn check_fields(declared_fields: &[String]) -> Result<()> {
    // The declared fields must be exactly the five expected ones, in any order.
    let mut sorted_declared: Vec<&str> = declared_fields.iter().map(|s| s.as_str()).collect();
    sorted_declared.sort_unstable();
    let mut sorted_expected = CANONICAL_FIELDS.to_vec();
    sorted_expected.sort_unstable();
    if sorted_declared != sorted_expected {
        return Err(field_mismatch(declared_fields));
    }
    Ok(())
}


fn field_mismatch(declared_fields: &[String]) -> PipelineError {
    PipelineError::FieldMismatch {
        found: declared_fields.to_vec(),
        expected: CANONICAL_FIELDS.iter().map(|s| s.to_string()).collect(),
    }
}


/// One entry of a placement document's "placements" list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlacementEntry {
    pub p: Vec<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nm: Vec<(String, Value)>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub n: Vec<String>,
}

impl PlacementEntry {
    pub fn for_fragment(fragment: &str, placement: &Placement) -> Result<Self> {
        let p = placement.iter()
            .map(|a| serde_json::to_value(a).map(|v| match v {
                Value::Array(values) => values,
                other => vec![other],
            }))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(PlacementEntry { p, nm: vec![(fragment.to_string(), Value::from(1))], n: Vec::new() })
    }

    pub fn names(&self) -> Vec<&str> {
        // Placement documents name their fragments either with multiplicities ("nm") or without
        // ("n"). Both are accepted.
        self.nm.iter().map(|(name, _)| name.as_str())
            .chain(self.n.iter().map(|s| s.as_str())).collect()
    }
}


/// A placement document: reference tree, field declaration, metadata and placements. Keys other
/// than placements and fields are carried through untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlacementDocument {
    pub placements: Vec<PlacementEntry>,
    pub fields: Vec<String>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl PlacementDocument {
    pub fn load(filename: &Path) -> Result<Self> {
        let text = read_text(filename)?;
        serde_json::from_str(&text).map_err(|e| {
            PipelineError::InvalidInput(format!("{} is not a valid placement document\n{}",
                                                filename.display(), e))
        })
    }

    pub fn save(&self, filename: &Path) -> Result<()> {
        write_text(filename, &serde_json::to_string(self)?)
    }

    pub fn fragment_placements(&self) -> Result<BTreeMap<String, Placement>> {
        // Returns each named fragment's placement in canonical field order.
        let mut placements = BTreeMap::new();
        for entry in &self.placements {
            let placement = entry.p.iter()
                .map(|record| reorder_record(record, &self.fields))
                .collect::<Result<Placement>>()?;
            for name in entry.names() {
                placements.insert(name.to_string(), placement.clone());
            }
        }
        Ok(placements)
    }
}
