// This file contains the code for running external programs (the denoiser, the placement tool,
// the grafting tool and rename scripts) and capturing what they print.

// Copyright 2024 The denoiseplace developers

// This file is part of denoiseplace. denoiseplace is free software: you can redistribute it
// and/or modify it under the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option) any later version.
// denoiseplace is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See
// the GNU General Public License for more details. You should have received a copy of the GNU
// General Public License along with denoiseplace. If not, see <http://www.gnu.org/licenses/>.

use std::ffi::{OsStr, OsString};
use std::fs::File;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::error::{PipelineError, Result};
use crate::misc::spinner;


#[derive(Debug)]
pub struct ToolOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    pub fn into_failure(self, tool: &str) -> PipelineError {
        PipelineError::ToolFailure { tool: tool.to_string(), stdout: self.stdout,
                                     stderr: self.stderr }
    }
}


/// One invocation of an external program. Blocks until the program exits; there is no timeout.
pub struct ToolCall {
    program: OsString,
    args: Vec<OsString>,
    working_dir: Option<PathBuf>,
    stdin_file: Option<PathBuf>,
    stdout_file: Option<PathBuf>,
}

impl ToolCall {
    pub fn new(program: impl AsRef<OsStr>) -> Self {
        ToolCall { program: program.as_ref().to_os_string(), args: Vec::new(), working_dir: None,
                   stdin_file: None, stdout_file: None }
    }

    pub fn shell(command_line: &str) -> Self {
        ToolCall::new("sh").arg("-c").arg(command_line)
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self where I: IntoIterator<Item = S>, S: AsRef<OsStr> {
        self.args.extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    pub fn current_dir(mut self, dir: &Path) -> Self {
        // The child gets its own working directory, so ours is never changed and needs no
        // restoring, whatever happens to the child.
        self.working_dir = Some(dir.to_path_buf());
        self
    }

    pub fn stdin_file(mut self, path: &Path) -> Self {
        self.stdin_file = Some(path.to_path_buf());
        self
    }

    pub fn stdout_file(mut self, path: &Path) -> Self {
        self.stdout_file = Some(path.to_path_buf());
        self
    }

    pub fn command_line(&self) -> String {
        let mut parts = vec![self.program.to_string_lossy().to_string()];
        parts.extend(self.args.iter().map(|a| a.to_string_lossy().to_string()));
        parts.join(" ")
    }

    pub fn run(self, tool: &str) -> Result<ToolOutput> {
        // Runs the program and returns its exit code and output. Only failing to start the
        // program is an error here: a non-zero exit is left for the caller to judge, since some
        // wrappers exit zero even when they fail.
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }
        if let Some(path) = &self.stdin_file {
            let file = File::open(path).map_err(|e| {
                PipelineError::io(format!("unable to open {} for {tool}", path.display()), e)
            })?;
            command.stdin(Stdio::from(file));
        } else {
            command.stdin(Stdio::null());
        }
        if let Some(path) = &self.stdout_file {
            let file = File::create(path).map_err(|e| {
                PipelineError::io(format!("unable to create {} for {tool}", path.display()), e)
            })?;
            command.stdout(Stdio::from(file));
        }
        let pb = spinner(&format!("running {tool}..."));
        let output = command.output();
        pb.finish_and_clear();
        let output = output.map_err(|e| {
            let reason = if e.kind() == ErrorKind::NotFound {
                format!("program not found: {}", self.program.to_string_lossy())
            } else {
                format!("could not start {}: {}", self.command_line(), e)
            };
            PipelineError::ToolFailure { tool: tool.to_string(), stdout: String::new(),
                                         stderr: reason }
        })?;
        Ok(ToolOutput { exit_code: output.status.code(),
                        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                        stderr: String::from_utf8_lossy(&output.stderr).to_string() })
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_shell_exit_code_and_output() {
        let out = ToolCall::shell("echo hello; echo oops >&2; exit 123").run("test").unwrap();
        assert!(!out.success());
        assert_eq!(out.exit_code, Some(123));
        assert_eq!(out.stdout, "hello\n");
        assert_eq!(out.stderr, "oops\n");
        match out.into_failure("deblur") {
            PipelineError::ToolFailure { tool, stderr, .. } => {
                assert_eq!(tool, "deblur");
                assert_eq!(stderr, "oops\n");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_working_dir_is_scoped_to_child() {
        let dir = tempdir().unwrap();
        let before = std::env::current_dir().unwrap();
        let out = ToolCall::shell("touch made_here.txt; exit 1").current_dir(dir.path())
            .run("test").unwrap();
        assert!(!out.success());
        assert!(dir.path().join("made_here.txt").exists());
        assert_eq!(std::env::current_dir().unwrap(), before);
    }

    #[test]
    fn test_stdin_and_stdout_files() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("in.txt");
        let output = dir.path().join("out.txt");
        fs::write(&input, "(a,b);\n").unwrap();
        let out = ToolCall::new("cat").stdin_file(&input).stdout_file(&output)
            .run("cat").unwrap();
        assert!(out.success());
        assert_eq!(fs::read_to_string(&output).unwrap(), "(a,b);\n");
    }

    #[test]
    fn test_missing_program() {
        let result = ToolCall::new("no_such_program_for_denoiseplace").arg("x").run("missing");
        match result {
            Err(PipelineError::ToolFailure { stderr, .. }) => {
                assert!(stderr.contains("program not found"));
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_command_line() {
        let call = ToolCall::new("guppy").args(["tog", "placements.json", "-o", "tree.tre"]);
        assert_eq!(call.command_line(), "guppy tog placements.json -o tree.tre");
    }
}
