// This file contains functions for writing progress information to stderr.

// Copyright 2024 The denoiseplace developers

// This file is part of denoiseplace. denoiseplace is free software: you can redistribute it
// and/or modify it under the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option) any later version.
// denoiseplace is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See
// the GNU General Public License for more details. You should have received a copy of the GNU
// General Public License along with denoiseplace. If not, see <http://www.gnu.org/licenses/>.

use chrono::prelude::*;
use colored::Colorize;


const MAX_EXPLANATION_WIDTH: usize = 100;


pub fn section_header(text: &str) {
    let now = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
    let date = format!("({})", now);
    eprintln!();
    eprintln!("{} {}", text.bold().bright_yellow().underline(), date.dimmed());
}


pub fn explanation(text: &str) {
    let width = terminal_width().min(MAX_EXPLANATION_WIDTH);
    for line in wrap_explanation(text, width) {
        eprintln!("{}", line.dimmed());
    }
    eprintln!();
}


pub fn job_step(text: &str) {
    // Job steps are the short messages also sent to the workflow service, so they get a plain
    // arrow prefix instead of a full section header.
    eprintln!("{} {}", "==>".bright_cyan().bold(), text);
}


fn wrap_explanation(text: &str, width: usize) -> Vec<String> {
    // Explanations are written as one long string with line continuations in the source, so any
    // runs of whitespace are collapsed before wrapping.
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    textwrap::wrap(&collapsed, width).into_iter().map(|s| s.to_string()).collect()
}


fn terminal_width() -> usize {
    match term_size::dimensions_stderr() {
        Some((w, _)) if w > 0 => w,
        _                     => MAX_EXPLANATION_WIDTH,
    }
}
