// This file contains miscellaneous functions used by various parts of denoiseplace.

// Copyright 2024 The denoiseplace developers

// This file is part of denoiseplace. denoiseplace is free software: you can redistribute it
// and/or modify it under the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option) any later version.
// denoiseplace is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See
// the GNU General Public License for more details. You should have received a copy of the GNU
// General Public License along with denoiseplace. If not, see <http://www.gnu.org/licenses/>.

use flate2::read::MultiGzDecoder;
use indicatif::{ProgressBar, ProgressStyle};
use seq_io::fasta::{Reader, Record};
use std::fs::{self, create_dir_all, File};
use std::io::{prelude::*, BufReader, BufWriter};
use std::path::Path;
use std::time::Duration;
use which::which;

use crate::error::{PipelineError, Result};


pub fn create_dir(dir_path: &Path) -> Result<()> {
    create_dir_all(dir_path).map_err(|e| {
        PipelineError::io(format!("failed to create directory {}", dir_path.display()), e)
    })
}


pub fn check_if_file_exists(filename: &Path) {
    // Quits with an error if the given path is not an existing file.
    if !filename.exists() {
        quit_with_error(&format!("file does not exist: {}", filename.display()));
    }
    if !filename.is_file() {
        quit_with_error(&format!("{} is not a file", filename.display()));
    }
}


pub fn check_if_dir_exists(dir: &Path) {
    // Quits with an error if the given path is not an existing directory.
    if !dir.exists() {
        quit_with_error(&format!("directory does not exist: {}", dir.display()));
    }
    if !dir.is_dir() {
        quit_with_error(&format!("{} is not a directory", dir.display()));
    }
}


pub fn require_file(filename: &Path, description: &str) -> Result<()> {
    // The non-quitting version of check_if_file_exists, for code that runs inside a job.
    if filename.is_file() {
        Ok(())
    } else {
        Err(PipelineError::InvalidInput(format!("{} does not exist: {}", description,
                                                filename.display())))
    }
}


pub fn require_dir(dir: &Path, description: &str) -> Result<()> {
    if dir.is_dir() {
        Ok(())
    } else {
        Err(PipelineError::InvalidInput(format!("{} does not exist: {}", description,
                                                dir.display())))
    }
}


#[cfg(not(test))]
pub fn quit_with_error(text: &str) -> ! {
    // For friendly error messages, this function normally just prints the error and quits.
    eprintln!();
    eprintln!("Error: {}", text);
    std::process::exit(1);
}
#[cfg(test)]
pub fn quit_with_error(text: &str) -> ! {
    // But when running unit tests, this function instead panics so I can catch it for the test.
    panic!("{}", text);
}


pub fn check_requirements(reqs: &[&str]) -> Result<()> {
    // Tools given as paths (e.g. a bundled wrapper script) only need to exist, everything else
    // has to be findable in $PATH.
    for cmd in reqs {
        let as_path = Path::new(cmd);
        let found = if as_path.components().count() > 1 { as_path.is_file() }
                                                       else { which(cmd).is_ok() };
        if !found {
            return Err(PipelineError::InvalidInput(
                format!("required program '{cmd}' not found in $PATH")));
        }
    }
    Ok(())
}


pub fn read_text(filename: &Path) -> Result<String> {
    fs::read_to_string(filename).map_err(|e| {
        PipelineError::io(format!("failed to read {}", filename.display()), e)
    })
}


pub fn write_text(filename: &Path, contents: &str) -> Result<()> {
    fs::write(filename, contents).map_err(|e| {
        PipelineError::io(format!("failed to write {}", filename.display()), e)
    })
}


pub fn remove_stale_file(filename: &Path) -> Result<()> {
    // Removes output left by an earlier run, so a tool that writes nothing is noticed.
    match fs::remove_file(filename) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(PipelineError::io(format!("failed to remove {}", filename.display()), e)),
    }
}


pub fn load_fasta(filename: &Path) -> Result<Vec<(String, String)>> {
    // Loads a (possibly gzipped) FASTA file and returns name+sequence pairs. Names are the
    // header up to the first whitespace and sequences are upper-cased. An empty file is valid
    // and gives an empty vector, since a denoising run can legitimately produce no sequences.
    let file = File::open(filename).map_err(|e| {
        PipelineError::io(format!("unable to open {}", filename.display()), e)
    })?;
    let reader: Box<dyn Read> = if is_file_gzipped(filename)? { Box::new(MultiGzDecoder::new(file)) }
                                                           else { Box::new(file) };
    let mut fasta_reader = Reader::new(BufReader::new(reader));
    let mut fasta_seqs = Vec::new();
    while let Some(record) = fasta_reader.next() {
        let record = record.map_err(|e| {
            PipelineError::InvalidInput(format!("unable to load {}\n{}", filename.display(), e))
        })?;
        let name = record.id().map_err(|e| {
            PipelineError::InvalidInput(format!("{} has a badly encoded header\n{}",
                                                filename.display(), e))
        })?.to_string();
        if name.is_empty() {
            return Err(PipelineError::InvalidInput(format!("{} has an unnamed sequence",
                                                           filename.display())));
        }
        let mut sequence = String::from_utf8_lossy(&record.owned_seq()).to_string();
        sequence.make_ascii_uppercase();
        fasta_seqs.push((name, sequence));
    }
    Ok(fasta_seqs)
}


pub fn write_self_labelled_fasta(filename: &Path, seqs: &[String]) -> Result<()> {
    // Writes each sequence as both the record name and the record content, so a tool's output
    // that only reports names still identifies the sequence.
    let file = File::create(filename).map_err(|e| {
        PipelineError::io(format!("unable to create {}", filename.display()), e)
    })?;
    let mut writer = BufWriter::new(file);
    for seq in seqs {
        writeln!(writer, ">{}\n{}", seq, seq)
            .map_err(|e| PipelineError::io(format!("failed writing {}", filename.display()), e))?;
    }
    writer.flush().map_err(|e| {
        PipelineError::io(format!("failed writing {}", filename.display()), e)
    })
}


fn is_file_gzipped(filename: &Path) -> Result<bool> {
    // Returns true if the file appears to be gzipped (based on the first two bytes). Files that
    // are too small to hold a gzip header are treated as plain text.
    let file = File::open(filename).map_err(|e| {
        PipelineError::io(format!("unable to open {}", filename.display()), e)
    })?;
    let mut buf = Vec::with_capacity(2);
    file.take(2).read_to_end(&mut buf).map_err(|e| {
        PipelineError::io(format!("unable to read {}", filename.display()), e)
    })?;
    Ok(buf.len() == 2 && buf[0] == 31 && buf[1] == 139)
}


pub fn format_float(num: f64) -> String {
    // Formats a float with up to six decimal places but then drops trailing zeros.
    let mut formatted = format!("{:.6}", num);
    if !formatted.contains('.') { return formatted }
    while formatted.ends_with('0') { formatted.pop(); }
    if formatted.ends_with('.') { formatted.pop(); }
    formatted
}


pub fn plural(count: usize, singular: &str) -> String {
    if count == 1 { format!("{count} {singular}") } else { format!("{count} {singular}s") }
}


pub fn spinner(message: &str) -> ProgressBar {
    if cfg!(test) {
        ProgressBar::hidden() // don't show a spinner during unit tests
    } else {
        let pb = ProgressBar::new_spinner();
        pb.enable_steady_tick(Duration::from_millis(100));
        pb.set_style(
            ProgressStyle::default_spinner()
                .tick_strings(&["⠋", "⠙", "⠚", "⠞", "⠖", "⠦", "⠴", "⠲", "⠳", "⠓"])
                .template("{spinner} {msg}").unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_message(message.to_string());
        pb
    }
}
