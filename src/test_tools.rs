// This file contains stand-ins for the external tools (denoiser, placement tool, grafting tool and
// rename script), written as small shell scripts for denoiseplace's unit tests.

// Copyright 2024 The denoiseplace developers

// This file is part of denoiseplace. denoiseplace is free software: you can redistribute it
// and/or modify it under the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option) any later version.
// denoiseplace is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See
// the GNU General Public License for more details. You should have received a copy of the GNU
// General Public License along with denoiseplace. If not, see <http://www.gnu.org/licenses/>.

#[cfg(test)]
use std::fs;
#[cfg(test)]
use std::os::unix::fs::PermissionsExt;
#[cfg(test)]
use std::path::{Path, PathBuf};


#[cfg(test)]
pub fn make_script(path: &Path, body: &str) -> PathBuf {
    fs::write(path, format!("#!/bin/sh\n{body}\n")).unwrap();
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
    path.to_path_buf()
}


/// Placement tool: records its arguments and writes a placement document (in the tool's own
/// field order) placing every fragment except those starting with "AAAA", which it drops. It
/// also leaves a rename script behind, as the real tool does.
#[cfg(test)]
pub const FAKE_SEPP: &str = r#"echo "$@" > args.txt
echo "$2" >> runs.txt
names=$(grep '^>' "$1" | sed 's/^>//' | grep -v '^AAAA')
{
  printf '{"tree": "((UQrYOlnDN_1:0.1{0},UQrYOlnDN_2:0.2{1}):0.0{2});", "placements": ['
  sep=""
  for n in $names; do
    printf '%s{"p": [[0.01, 1, 0.9, -100.5, 0.002]], "nm": [["%s", 1]]}' "$sep" "$n"
    sep=","
  done
  printf '], "fields": ["distal_length", "edge_num", "like_weight_ratio", "likelihood", '
  printf '"pendant_length"], "metadata": {"invocation": "fake"}, "version": 3}'
} > "$2_placement.json"
echo "sed 's/UQrYOlnDN_1/G1/;s/UQrYOlnDN_2/G2/'" > "$2_rename-json.py"
"#;


/// Grafting tool: `tog <placements> -o <tree>`. Grafts each named fragment next to the two
/// reference tips, without branch lengths.
#[cfg(test)]
pub const FAKE_GUPPY: &str = r#"[ "$1" = "tog" ] || exit 2
names=$(grep -o '"nm":\[\["[^"]*"' "$2" | sed 's/.*"\([^"]*\)"$/\1/')
leaves=""
for n in $names; do leaves="$leaves,$n"; done
printf '((UQrYOlnDN_1:0.1,UQrYOlnDN_2:0.2)%s);\n' "$leaves" > "$4"
"#;


#[cfg(test)]
pub const FAILING_GUPPY: &str = "echo 'guppy: could not read placements' >&2\nexit 1";


/// Rename script body, run with `sh` in place of a Python interpreter.
#[cfg(test)]
pub const FAKE_RENAME: &str = "sed 's/UQrYOlnDN_1/G1/;s/UQrYOlnDN_2/G2/'";


#[cfg(test)]
pub const FAILING_RENAME: &str = "echo 'no such name map' >&2\nexit 1";


/// Denoiser: finds --output-dir among its arguments, creates it, records the arguments and copies
/// the given files into place as its outputs.
#[cfg(test)]
pub fn fake_deblur(all_biom: &Path, all_fasta: &Path, reference_hit: Option<(&Path, &Path)>)
        -> String {
    let mut body = format!(r#"args="$*"
while [ $# -gt 0 ]; do
  case "$1" in
    --output-dir) out="$2"; shift ;;
  esac
  shift
done
mkdir -p "$out"
echo "$args" > "$out/deblur_args.txt"
cp "{}" "$out/all.biom"
cp "{}" "$out/all.seqs.fa"
"#, all_biom.display(), all_fasta.display());
    if let Some((biom, fasta)) = reference_hit {
        body.push_str(&format!("cp \"{}\" \"$out/reference-hit.biom\"\n", biom.display()));
        body.push_str(&format!("cp \"{}\" \"$out/reference-hit.seqs.fa\"\n", fasta.display()));
    }
    body
}


#[cfg(test)]
pub const FAILING_DEBLUR: &str = "echo 'starting deblur'\necho 'deblur: ran out of reads' >&2\n\
                                  exit 123";


/// Writes a complete reference directory for a reference named `name`: a template in the
/// placement tool's field order, a rename script, an alignment and a phylogeny.
#[cfg(test)]
pub fn make_reference_dir(dir: &Path, name: &str) -> PathBuf {
    fs::create_dir_all(dir).unwrap();
    fs::write(dir.join(format!("tmpl_{name}_placement.json")),
              r#"{"tree": "((UQrYOlnDN_1:0.1{0},UQrYOlnDN_2:0.2{1}):0.0{2});",
                  "placements": [],
                  "fields": ["distal_length", "edge_num", "like_weight_ratio", "likelihood",
                             "pendant_length"],
                  "metadata": {"invocation": "fake"}, "version": 3}"#).unwrap();
    fs::write(dir.join(format!("tmpl_{name}_rename-json.py")), format!("{FAKE_RENAME}\n"))
        .unwrap();
    fs::write(dir.join(format!("reference_alignment_{name}.fasta")), ">G1\nACGT\n>G2\nACGA\n")
        .unwrap();
    fs::write(dir.join(format!("reference_phylogeny_{name}.nwk")), "(G1:0.1,G2:0.2);\n").unwrap();
    dir.to_path_buf()
}
