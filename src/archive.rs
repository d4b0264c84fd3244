// This file contains the placement cache: the interface to the archive that stores fragment
// placements between jobs, and the logic for deciding which fragments still need placing.

// Copyright 2024 The denoiseplace developers

// This file is part of denoiseplace. denoiseplace is free software: you can redistribute it
// and/or modify it under the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option) any later version.
// denoiseplace is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See
// the GNU General Public License for more details. You should have received a copy of the GNU
// General Public License along with denoiseplace. If not, see <http://www.gnu.org/licenses/>.

use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use crate::error::{PipelineError, Result};
use crate::misc::read_text;
use crate::placement::{placement_from_json, placement_to_json, Placement};


/// Archive value for a fragment that the placement tool rejected. It is stored (rather than
/// leaving the fragment out) so that the fragment is never sent to the placement tool again.
pub const REJECTED: &str = "";


/// Raw archive contents: fragment -> placement JSON string, or REJECTED.
pub type Observations = BTreeMap<String, String>;


/// A fragment's state in the archive. Fragments missing from a lookup result are simply absent
/// and have not been computed yet, which is different from Rejected.
#[derive(Debug, Clone, PartialEq)]
pub enum CachedPlacement {
    Placed(Placement),
    Rejected,
}

impl CachedPlacement {
    pub fn from_archive_value(value: &str) -> Result<Self> {
        if value == REJECTED {
            return Ok(CachedPlacement::Rejected);
        }
        let placement = placement_from_json(value).map_err(|e| {
            PipelineError::Archive(format!("archive holds an unreadable placement: {e}"))
        })?;
        if placement.is_empty() { Ok(CachedPlacement::Rejected) }
                           else { Ok(CachedPlacement::Placed(placement)) }
    }
}


/// The archive is scoped by job: a lookup only sees entries stored under the same job id.
/// Storing merges into what is already there and never removes entries.
pub trait Archive {
    fn lookup(&mut self, job_id: &str, fragments: &[String]) -> Result<Observations>;
    fn store(&mut self, job_id: &str, values: &Observations) -> Result<()>;
}


pub fn novel_fragments(fragments: &[String], observations: &Observations) -> Vec<String> {
    // Returns the fragments that have no archive entry at all, keeping their order and dropping
    // duplicates. Rejected fragments have an entry, so they are not novel.
    let mut seen = HashSet::new();
    fragments.iter()
        .filter(|f| !observations.contains_key(*f))
        .filter(|f| seen.insert(*f))
        .cloned().collect()
}


pub fn archive_values(novel: &[String], new_placements: &BTreeMap<String, Placement>)
        -> Result<Observations> {
    // Converts freshly computed placements into archive values. Every novel fragment gets a
    // value: fragments the placement tool left out of its output, or placed with no candidate
    // edges, are recorded as rejected.
    let mut values = Observations::new();
    for fragment in novel {
        let value = match new_placements.get(fragment) {
            Some(placement) if !placement.is_empty() => placement_to_json(placement)?,
            _ => REJECTED.to_string(),
        };
        values.insert(fragment.clone(), value);
    }
    Ok(values)
}


pub fn placed_only(observations: &Observations) -> Result<BTreeMap<String, Placement>> {
    // Returns the usable placements from an archive lookup, leaving out rejected fragments.
    let mut placements = BTreeMap::new();
    for (fragment, value) in observations {
        if let CachedPlacement::Placed(p) = CachedPlacement::from_archive_value(value)? {
            placements.insert(fragment.clone(), p);
        }
    }
    Ok(placements)
}


pub fn load_archive_dump(filename: &Path) -> Result<Observations> {
    // Loads an archive export: a JSON object mapping fragments to placements. Placements may be
    // given either as JSON strings (the archive's own format) or as plain arrays.
    let text = read_text(filename)?;
    let value: Value = serde_json::from_str(&text).map_err(|e| {
        PipelineError::Archive(format!("{} is not valid JSON\n{}", filename.display(), e))
    })?;
    let Value::Object(map) = value else {
        return Err(PipelineError::Archive(format!("{} does not hold a JSON object",
                                                  filename.display())));
    };
    let mut observations = Observations::new();
    for (fragment, v) in map {
        let value = match v {
            Value::String(s) => s,
            Value::Array(_)  => serde_json::to_string(&v)?,
            Value::Null      => REJECTED.to_string(),
            other => return Err(PipelineError::Archive(
                format!("unexpected archive value for {fragment}: {other}"))),
        };
        observations.insert(fragment, value);
    }
    Ok(observations)
}


/// An archive held in memory, used in place of the remote archive by tests.
#[cfg(test)]
#[derive(Default)]
pub struct MemoryArchive {
    pub contexts: BTreeMap<String, Observations>,
    pub store_calls: usize,
}

#[cfg(test)]
impl Archive for MemoryArchive {
    fn lookup(&mut self, job_id: &str, fragments: &[String]) -> Result<Observations> {
        let Some(context) = self.contexts.get(job_id) else { return Ok(Observations::new()) };
        Ok(fragments.iter()
            .filter_map(|f| context.get(f).map(|v| (f.clone(), v.clone())))
            .collect())
    }

    fn store(&mut self, job_id: &str, values: &Observations) -> Result<()> {
        self.store_calls += 1;
        let context = self.contexts.entry(job_id.to_string()).or_default();
        for (fragment, value) in values {
            context.insert(fragment.clone(), value.clone());
        }
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use maplit::btreemap;
    use std::fs;
    use tempfile::tempdir;

    fn frags(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_store_merges() {
        let mut archive = MemoryArchive::default();
        archive.store("job1", &btreemap!{"AAAA".to_string() => "[[1,2,3,4,5]]".to_string(),
                                         "CCCC".to_string() => REJECTED.to_string()}).unwrap();
        let before = archive.lookup("job1", &frags(&["AAAA", "CCCC"])).unwrap();
        archive.store("job1", &btreemap!{"GGGG".to_string() => "[[2,2,3,4,5]]".to_string()})
            .unwrap();
        let after = archive.lookup("job1", &frags(&["AAAA", "CCCC", "GGGG"])).unwrap();
        assert_eq!(after["AAAA"], before["AAAA"]);
        assert_eq!(after["CCCC"], before["CCCC"]);
        assert_eq!(after.len(), 3);
    }

    #[test]
    fn test_lookup_is_scoped_by_job() {
        let mut archive = MemoryArchive::default();
        archive.store("job1", &btreemap!{"AAAA".to_string() => "[[1,2,3,4,5]]".to_string()})
            .unwrap();
        assert!(archive.lookup("job2", &frags(&["AAAA"])).unwrap().is_empty());
    }

    #[test]
    fn test_rejected_is_not_absent() {
        let observations = btreemap!{"CCCC".to_string() => REJECTED.to_string()};
        let novel = novel_fragments(&frags(&["CCCC", "TTTT", "TTTT"]), &observations);
        assert_eq!(novel, frags(&["TTTT"]));
        assert_eq!(CachedPlacement::from_archive_value("").unwrap(), CachedPlacement::Rejected);
        assert_eq!(CachedPlacement::from_archive_value("[]").unwrap(), CachedPlacement::Rejected);
        assert!(CachedPlacement::from_archive_value("[[1,2").is_err());
    }

    #[test]
    fn test_archive_values_marks_dropped_fragments_rejected() {
        let placement = placement_from_json("[[78, -18489.055, 0.8486466, 0.0158, 6.1e-06]]")
            .unwrap();
        let new_placements = btreemap!{"AAAA".to_string() => placement,
                                       "GGGG".to_string() => Vec::new()};
        let values = archive_values(&frags(&["AAAA", "CCCC", "GGGG"]), &new_placements).unwrap();
        assert_eq!(values["AAAA"], "[[78,-18489.055,0.8486466,0.0158,6.1e-6]]");
        assert_eq!(values["CCCC"], REJECTED);
        assert_eq!(values["GGGG"], REJECTED);
    }

    #[test]
    fn test_placed_only_excludes_rejected() {
        let observations = btreemap!{
            "AAAA".to_string() => "[[1, -2.5, 1.0, 0.1, 0.2]]".to_string(),
            "CCCC".to_string() => REJECTED.to_string(),
        };
        let placements = placed_only(&observations).unwrap();
        assert_eq!(placements.keys().collect::<Vec<_>>(), vec!["AAAA"]);
    }

    #[test]
    fn test_load_archive_dump() {
        let dir = tempdir().unwrap();
        let dump = dir.path().join("archive.json");
        fs::write(&dump, r#"{"AAAA": "[[1, -2.5, 1.0, 0.1, 0.2]]",
                             "CCCC": "",
                             "GGGG": [[3, -1.5, 1.0, 0.1, 0.2]]}"#).unwrap();
        let observations = load_archive_dump(&dump).unwrap();
        assert_eq!(observations.len(), 3);
        assert_eq!(observations["CCCC"], REJECTED);
        assert_eq!(placed_only(&observations).unwrap().len(), 2);

        fs::write(&dump, "[1, 2]").unwrap();
        assert!(load_archive_dump(&dump).is_err());
    }
}
