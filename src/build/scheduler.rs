//! Dependency-ordered execution of the task graph.
//!
//! One coordinator thread owns all task state and the manifest. Ready tasks
//! are handed to a bounded rayon pool; workers report back over a channel.
//! A task is dispatched only once every predecessor has succeeded.

use std::collections::VecDeque;
use std::sync::mpsc;
use std::time::Duration;

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use tracing::{debug, warn};

use crate::build::exec::{self, ExecOutcome};
use crate::build::feedback::FeedbackAnalyzer;
use crate::build::graph::{BuildGraph, BuildTask, Completion};
use crate::build::progress::Progress;
use crate::build::report::{TaskReport, TaskStatus};
use crate::error::{KilnError, Result};
use crate::manifest::Manifest;

pub struct Scheduler {
    jobs: usize,
    fail_fast: bool,
}

impl Scheduler {
    /// `jobs` is clamped to at least one worker.
    pub fn new(jobs: usize, fail_fast: bool) -> Self {
        Self {
            jobs: jobs.max(1),
            fail_fast,
        }
    }

    pub fn jobs(&self) -> usize {
        self.jobs
    }

    /// Run every task in `graph`, publishing manifest updates for the ones
    /// that succeed. Returns one report per task.
    pub fn run(
        &self,
        graph: BuildGraph,
        manifest: &mut Manifest,
        progress: &Progress,
    ) -> Result<Vec<TaskReport>> {
        let (graph, blocked) = graph.into_parts();
        if graph.node_count() == 0 {
            return Ok(Vec::new());
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.jobs)
            .thread_name(|i| format!("kiln-worker-{}", i))
            .build()
            .map_err(|e| KilnError::WorkerPool(e.to_string()))?;

        let mut run = Run::new(&graph);
        for idx in blocked {
            run.skip(&graph, idx);
        }
        let mut ready: VecDeque<NodeIndex> = graph
            .node_indices()
            .filter(|&idx| {
                run.status[idx.index()] == TaskStatus::Pending && run.remaining[idx.index()] == 0
            })
            .collect();
        for idx in &ready {
            run.status[idx.index()] = TaskStatus::Ready;
        }

        let (tx, rx) = mpsc::channel::<(NodeIndex, ExecOutcome)>();
        let mut running = 0usize;
        let mut stopped = false;

        loop {
            while !stopped && let Some(idx) = ready.pop_front() {
                if run.status[idx.index()] != TaskStatus::Ready {
                    continue;
                }
                run.status[idx.index()] = TaskStatus::Running;
                running += 1;

                let task = graph[idx].clone();
                progress.started(&task);
                let tx = tx.clone();
                pool.spawn(move || {
                    let outcome = exec::execute(&task);
                    // The coordinator only stops listening once nothing is running.
                    let _ = tx.send((idx, outcome));
                });
            }

            if running == 0 {
                break;
            }
            let Ok((idx, outcome)) = rx.recv() else {
                break;
            };
            running -= 1;

            let task = &graph[idx];
            let report = if outcome.success {
                run.status[idx.index()] = TaskStatus::Succeeded;
                publish(manifest, task);
                for next in graph.neighbors_directed(idx, Direction::Outgoing) {
                    let i = next.index();
                    run.remaining[i] = run.remaining[i].saturating_sub(1);
                    if run.remaining[i] == 0 && run.status[i] == TaskStatus::Pending {
                        run.status[i] = TaskStatus::Ready;
                        ready.push_back(next);
                    }
                }
                task_report(task, TaskStatus::Succeeded, &outcome)
            } else {
                run.status[idx.index()] = TaskStatus::Failed;
                warn!(task = %task.name, "task failed");
                for next in graph.neighbors_directed(idx, Direction::Outgoing) {
                    run.skip(&graph, next);
                }
                if self.fail_fast {
                    debug!("fail-fast: no further tasks will be started");
                    stopped = true;
                }
                task_report(task, TaskStatus::Failed, &outcome)
            };
            progress.finished(&report);
            run.reports[idx.index()] = Some(report);
        }

        // Anything never started is skipped.
        let mut reports = Vec::with_capacity(graph.node_count());
        for idx in graph.node_indices() {
            let report = match run.reports[idx.index()].take() {
                Some(report) => report,
                None => {
                    let report = skipped_report(&graph[idx]);
                    progress.finished(&report);
                    report
                }
            };
            reports.push(report);
        }
        Ok(reports)
    }
}

/// Coordinator-side bookkeeping, indexed by node.
struct Run {
    status: Vec<TaskStatus>,
    /// Predecessors that have not succeeded yet.
    remaining: Vec<usize>,
    reports: Vec<Option<TaskReport>>,
}

impl Run {
    fn new(graph: &DiGraph<BuildTask, ()>) -> Self {
        let n = graph.node_count();
        Self {
            status: vec![TaskStatus::Pending; n],
            remaining: graph
                .node_indices()
                .map(|idx| graph.neighbors_directed(idx, Direction::Incoming).count())
                .collect(),
            reports: vec![None; n],
        }
    }

    /// Mark `start` and every task downstream of it skipped, unless already
    /// running or finished.
    fn skip(&mut self, graph: &DiGraph<BuildTask, ()>, start: NodeIndex) {
        let mut queue = VecDeque::from([start]);
        while let Some(idx) = queue.pop_front() {
            let i = idx.index();
            if !matches!(self.status[i], TaskStatus::Pending | TaskStatus::Ready) {
                continue;
            }
            self.status[i] = TaskStatus::Skipped;
            queue.extend(graph.neighbors_directed(idx, Direction::Outgoing));
        }
    }
}

fn publish(manifest: &mut Manifest, task: &BuildTask) {
    match &task.completion {
        Completion::Nothing => {}
        Completion::Compiled(update) => manifest.apply(update.clone()),
        Completion::Linked(record) => manifest.apply(record.clone().into_update()),
    }
}

fn task_report(task: &BuildTask, status: TaskStatus, outcome: &ExecOutcome) -> TaskReport {
    let failed = status == TaskStatus::Failed;
    TaskReport {
        name: task.name.clone(),
        kind: task.kind,
        project: task.project.clone(),
        status,
        command: task.command.to_string(),
        output: failed.then(|| outcome.output.clone()),
        hint: if failed {
            FeedbackAnalyzer::analyze(&outcome.output)
        } else {
            None
        },
        duration: outcome.duration,
    }
}

fn skipped_report(task: &BuildTask) -> TaskReport {
    TaskReport {
        name: task.name.clone(),
        kind: task.kind,
        project: task.project.clone(),
        status: TaskStatus::Skipped,
        command: task.command.to_string(),
        output: None,
        hint: None,
        duration: Duration::ZERO,
    }
}
