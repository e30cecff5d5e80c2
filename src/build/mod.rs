pub mod changes;
mod clean;
mod core;
pub mod exec;
mod feedback;
pub mod graph;
mod progress;
pub mod report;
pub mod scheduler;

pub use clean::clean;
pub use core::{ProjectInfo, build, print_info, project_info};
pub use feedback::FeedbackAnalyzer;
pub use graph::{BuildGraph, BuildTask, ProjectPlan};
pub use progress::Progress;
pub use report::{BuildReport, ProjectFailure, TaskKind, TaskReport, TaskStatus};
pub use scheduler::Scheduler;
