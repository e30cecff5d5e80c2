//! Build results handed back to the caller.

use std::fmt;
use std::time::Duration;

use crate::error::KilnError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Bootstrap,
    Compile,
    Archive,
    Link,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskKind::Bootstrap => "bootstrap",
            TaskKind::Compile => "compile",
            TaskKind::Archive => "archive",
            TaskKind::Link => "link",
        };
        f.write_str(s)
    }
}

/// Per-task state machine:
/// `Pending -> Ready -> Running -> {Succeeded | Failed}`, and `Skipped` from
/// `Pending`/`Ready` once a predecessor fails or is skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    Pending,
    Ready,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

#[derive(Debug, Clone)]
pub struct TaskReport {
    pub name: String,
    pub kind: TaskKind,
    /// Name of the owning project.
    pub project: String,
    pub status: TaskStatus,
    pub command: String,
    /// Captured stdout+stderr of a failed command, or the spawn error.
    pub output: Option<String>,
    /// Suggestion derived from the captured output.
    pub hint: Option<String>,
    pub duration: Duration,
}

impl TaskReport {
    /// The failure as an error, headed by the first line of captured output.
    pub fn error(&self) -> Option<KilnError> {
        if self.status != TaskStatus::Failed {
            return None;
        }
        let message = self
            .output
            .as_deref()
            .and_then(|out| out.lines().map(str::trim).find(|l| !l.is_empty()))
            .unwrap_or("command failed without output")
            .to_string();
        Some(KilnError::TaskExecution {
            task: self.name.clone(),
            message,
        })
    }
}

/// A project that could not be planned (discovery or toolchain failure).
#[derive(Debug)]
pub struct ProjectFailure {
    pub project: String,
    pub error: KilnError,
}

#[derive(Debug, Default)]
pub struct BuildReport {
    pub tasks: Vec<TaskReport>,
    pub project_failures: Vec<ProjectFailure>,
    /// Projects that needed no work.
    pub up_to_date: Vec<String>,
    pub duration: Duration,
}

impl BuildReport {
    /// Succeeded iff every emitted task succeeded and every project could be planned.
    pub fn success(&self) -> bool {
        self.project_failures.is_empty()
            && self.tasks.iter().all(|t| t.status == TaskStatus::Succeeded)
    }

    pub fn failed_tasks(&self) -> impl Iterator<Item = &TaskReport> {
        self.tasks.iter().filter(|t| t.status == TaskStatus::Failed)
    }

    /// One error per failed task.
    pub fn task_errors(&self) -> Vec<KilnError> {
        self.tasks.iter().filter_map(TaskReport::error).collect()
    }

    pub fn count(&self, kind: TaskKind, status: TaskStatus) -> usize {
        self.tasks
            .iter()
            .filter(|t| t.kind == kind && t.status == status)
            .count()
    }

    pub fn task(&self, name: &str) -> Option<&TaskReport> {
        self.tasks.iter().find(|t| t.name == name)
    }

    /// Tasks of any kind whose command actually ran.
    pub fn executed(&self) -> usize {
        self.tasks
            .iter()
            .filter(|t| matches!(t.status, TaskStatus::Succeeded | TaskStatus::Failed))
            .count()
    }
}
