//! Subprocess execution for a single task.

use std::fs;
use std::io;
use std::process::{Command, Output};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::build::graph::BuildTask;
use crate::build::report::TaskKind;
use crate::toolchain::CommandLine;

#[derive(Debug, Clone)]
pub struct ExecOutcome {
    pub success: bool,
    /// Combined stdout and stderr, or the reason the command never ran.
    pub output: String,
    pub duration: Duration,
}

/// Run `cmd` to completion and capture its output.
pub fn run_command(cmd: &CommandLine) -> io::Result<Output> {
    Command::new(&cmd.program)
        .args(&cmd.args)
        .current_dir(&cmd.cwd)
        .output()
}

/// Execute `task`: create its output directory, run the command and check
/// that the declared artifact exists afterwards.
pub fn execute(task: &BuildTask) -> ExecOutcome {
    let start = Instant::now();
    let outcome = |success: bool, output: String| ExecOutcome {
        success,
        output,
        duration: start.elapsed(),
    };

    if let Err(e) = prepare(task) {
        return outcome(false, format!("cannot prepare output: {}", e));
    }

    debug!(task = %task.name, command = %task.command, "running");
    let output = match run_command(&task.command) {
        Ok(output) => output,
        Err(e) => {
            return outcome(
                false,
                format!("failed to execute {}: {}", task.command.program.display(), e),
            );
        }
    };

    let mut text = String::from_utf8_lossy(&output.stdout).to_string();
    text.push_str(&String::from_utf8_lossy(&output.stderr));

    if !output.status.success() {
        let code = output
            .status
            .code()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".to_string());
        if text.trim().is_empty() {
            text = format!("exited with status {}", code);
        }
        return outcome(false, text);
    }

    if let Some(artifact) = &task.artifact
        && !artifact.exists()
    {
        text.push_str(&format!(
            "command succeeded but did not produce {}",
            artifact.display()
        ));
        return outcome(false, text);
    }

    outcome(true, text)
}

fn prepare(task: &BuildTask) -> io::Result<()> {
    let Some(artifact) = &task.artifact else {
        return Ok(());
    };
    if let Some(parent) = artifact.parent() {
        fs::create_dir_all(parent)?;
    }
    // `ar r` appends to an existing archive.
    if task.kind == TaskKind::Archive && artifact.exists() {
        fs::remove_file(artifact)?;
    }
    Ok(())
}
