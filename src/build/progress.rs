//! Terminal progress for a running build.

use colored::*;
use indicatif::{ProgressBar, ProgressStyle};

use crate::build::graph::BuildTask;
use crate::build::report::{TaskReport, TaskStatus};

pub struct Progress {
    bar: ProgressBar,
    verbose: bool,
}

impl Progress {
    pub fn new(total: usize, verbose: bool, silent: bool) -> Self {
        let bar = if silent || total == 0 {
            ProgressBar::hidden()
        } else {
            let style = ProgressStyle::with_template(
                "{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-");
            let bar = ProgressBar::new(total as u64);
            bar.set_style(style);
            bar
        };
        Self { bar, verbose }
    }

    /// Progress that prints nothing.
    pub fn hidden() -> Self {
        Self {
            bar: ProgressBar::hidden(),
            verbose: false,
        }
    }

    pub fn started(&self, task: &BuildTask) {
        self.bar.set_message(task.name.clone());
        if self.verbose {
            self.bar
                .println(format!("   {} {}", "$".dimmed(), task.command));
        }
    }

    pub fn finished(&self, report: &TaskReport) {
        match report.status {
            TaskStatus::Failed => {
                // Failures are shown even when silent.
                let mut text = format!("{} {} failed", "x".red(), report.name.bold());
                if let Some(output) = &report.output
                    && !output.trim().is_empty()
                {
                    text.push_str(&format!(":\n{}", output.trim_end()));
                }
                if let Some(hint) = &report.hint {
                    text.push_str(&format!("\n{} {}", "💡".yellow(), hint));
                }
                if self.bar.is_hidden() {
                    eprintln!("{}", text);
                } else {
                    self.bar.println(text);
                }
            }
            TaskStatus::Skipped => {
                if self.verbose {
                    self.bar
                        .println(format!("{} {} skipped", "!".yellow(), report.name));
                }
            }
            _ => {
                if self.verbose {
                    self.bar.println(format!(
                        "{} {} ({:.2?})",
                        "✓".green(),
                        report.name,
                        report.duration
                    ));
                }
            }
        }
        self.bar.inc(1);
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}
