use std::collections::HashMap;
use std::time::Instant;

use colored::*;
use tracing::{debug, info};

use super::changes::{self, SubprojectState};
use super::graph::{BuildGraph, ProjectPlan, validate_subprojects};
use super::progress::Progress;
use super::report::{BuildReport, ProjectFailure, TaskKind, TaskStatus};
use super::scheduler::Scheduler;
use crate::config::{BuildOptions, DESCRIPTOR_FILE, Project};
use crate::discovery::{self, TranslationUnit};
use crate::error::{KilnError, Result};
use crate::manifest::{Manifest, ProjectEntry};
use crate::toolchain::Toolchain;
use crate::ui::Table;

// --- Helper: Select Target ---
fn select_target<'a>(root: &'a Project, options: &BuildOptions) -> Result<&'a Project> {
    match &options.target {
        None => Ok(root),
        Some(name) => root.find(name).ok_or_else(|| {
            KilnError::config(
                root.dir.join(DESCRIPTOR_FILE),
                format!("no project named '{}' in this tree", name),
            )
        }),
    }
}

// --- Helper: Discover + Resolve one project ---
fn prepare(
    project: &Project,
    options: &BuildOptions,
    previous: Option<&ProjectEntry>,
) -> Result<(Vec<TranslationUnit>, Toolchain)> {
    let units = discovery::discover(project, previous)?;
    if units.is_empty() {
        return Err(KilnError::Discovery {
            project: project.name.clone(),
            path: project.dir.clone(),
            message: "no source files found".to_string(),
        });
    }
    let toolchain =
        Toolchain::resolve(project, &units, options.debug).map_err(|source| KilnError::Toolchain {
            project: project.name.clone(),
            source,
        })?;
    Ok((units, toolchain))
}

/// Plan `project` after its subprojects. Returns whether it relinks.
fn plan(
    project: &Project,
    options: &BuildOptions,
    manifest: &Manifest,
    plans: &mut HashMap<String, ProjectPlan>,
    report: &mut BuildReport,
    depth: usize,
) -> bool {
    let mut subprojects = Vec::with_capacity(project.subprojects.len());
    for sub in &project.subprojects {
        let relinking = if options.build_subprojects {
            plan(sub, options, manifest, plans, report, depth + 1)
        } else {
            plans.insert(sub.key.clone(), ProjectPlan::External);
            false
        };
        subprojects.push(SubprojectState {
            key: sub.key.clone(),
            artifact: sub.output_path(),
            relinking,
        });
    }

    let previous = manifest.project(&project.key);
    let (units, toolchain) = match prepare(project, options, previous) {
        Ok(prepared) => prepared,
        Err(error) => {
            if !options.silent {
                println!("{} {}", "x".red(), error);
            }
            report.project_failures.push(ProjectFailure {
                project: project.name.clone(),
                error,
            });
            plans.insert(project.key.clone(), ProjectPlan::Broken);
            return false;
        }
    };

    let flags = toolchain.flags_fingerprint(project);
    let changes = changes::detect(project, &units, &flags, previous, &subprojects);
    debug!(
        project = %project.name,
        units = units.len(),
        stale = changes.stale.len(),
        link = ?changes.link,
        "change detection"
    );

    if options.verbose && !options.silent {
        let indent = "  ".repeat(depth);
        for (index, reason) in &changes.stale {
            println!("{}{} {} ({})", indent, "~".cyan(), units[*index].rel, reason);
        }
        if let Some(reason) = &changes.link {
            println!("{}{} {} output ({})", indent, "~".cyan(), project.name, reason);
        }
    }
    if changes.is_up_to_date() {
        report.up_to_date.push(project.name.clone());
    }

    let relinking = changes.link_stale();
    plans.insert(
        project.key.clone(),
        ProjectPlan::Ready {
            toolchain,
            units,
            flags,
            changes,
        },
    );
    relinking
}

// --- CORE: Build Project Tree ---

/// Build `options.target` (or the whole tree) rooted at `root`.
///
/// The manifest lives under the root project's directory regardless of the
/// target. Task failures are reported, not returned as errors; only
/// configuration problems abort the build.
pub fn build(root: &Project, options: &BuildOptions) -> Result<BuildReport> {
    let start_time = Instant::now();
    validate_subprojects(root)?;
    let target = select_target(root, options)?;

    let manifest_path = Manifest::path_for(&root.dir);
    let mut manifest = Manifest::load_or_default(&manifest_path);

    let mut report = BuildReport::default();
    let mut plans = HashMap::new();
    plan(target, options, &manifest, &mut plans, &mut report, 0);

    let graph = BuildGraph::new(target, &plans)?;
    info!(target = %target.name, tasks = graph.len(), "starting build");

    if !graph.is_empty() {
        let scheduler = Scheduler::new(options.concurrency(), options.stops_on_failure());
        if !options.silent {
            println!(
                "{} Building {} ({} tasks, {} jobs)",
                "🔨".cyan(),
                target.name.bold(),
                graph.len(),
                scheduler.jobs()
            );
        }
        let progress = Progress::new(graph.len(), options.verbose, options.silent);
        let tasks = scheduler.run(graph, &mut manifest, &progress);
        progress.finish();
        report.tasks = tasks?;
        manifest.save(&manifest_path)?;
    }

    report.duration = start_time.elapsed();
    if !options.silent {
        print_summary(&report, options.verbose);
    }
    Ok(report)
}

fn print_summary(report: &BuildReport, verbose: bool) {
    if report.tasks.is_empty() && report.project_failures.is_empty() {
        println!("{} Up to date", "⚡".green());
        return;
    }

    if verbose || !report.success() {
        let mut projects: Vec<&str> = Vec::new();
        for task in &report.tasks {
            if !projects.contains(&task.project.as_str()) {
                projects.push(&task.project);
            }
        }
        let mut table = Table::new(&["Project", "Compiled", "Linked", "Failed", "Skipped"]);
        for project in projects {
            let count = |pred: &dyn Fn(TaskKind, TaskStatus) -> bool| {
                report
                    .tasks
                    .iter()
                    .filter(|t| t.project == project && pred(t.kind, t.status))
                    .count()
                    .to_string()
            };
            table.add_row(vec![
                project.to_string(),
                count(&|k, s| k == TaskKind::Compile && s == TaskStatus::Succeeded),
                count(&|k, s| {
                    matches!(k, TaskKind::Link | TaskKind::Archive) && s == TaskStatus::Succeeded
                }),
                count(&|_, s| s == TaskStatus::Failed),
                count(&|_, s| s == TaskStatus::Skipped),
            ]);
        }
        if !table.is_empty() {
            table.print();
        }
    }

    if report.success() {
        println!(
            "{} Build finished in {:.2?}",
            "✓".green(),
            report.duration
        );
    } else {
        let failed = report.failed_tasks().count();
        let skipped = report
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Skipped)
            .count();
        println!(
            "{} Build failed: {} task(s) failed, {} skipped, {} project(s) could not be planned",
            "x".red(),
            failed,
            skipped,
            report.project_failures.len()
        );
        for error in report.task_errors() {
            println!("  {} {}", "-".red(), error);
        }
    }
}

// --- COMMAND: Info ---

/// One row of `kiln info`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectInfo {
    pub name: String,
    pub version: String,
    pub project_type: String,
    pub language: String,
    pub standard: String,
    pub compiler: String,
    /// `None` when the sources could not be read.
    pub sources: Option<usize>,
    pub output: String,
}

/// Describe every project of the tree, parents first.
pub fn project_info(root: &Project) -> Vec<ProjectInfo> {
    root.iter()
        .into_iter()
        .map(|p| ProjectInfo {
            name: p.name.clone(),
            version: p.version.to_string(),
            project_type: p.project_type.to_string(),
            language: p.language.to_string(),
            standard: p.standard.to_string(),
            compiler: p.compiler.clone(),
            sources: discovery::find_sources(p).ok().map(|s| s.len()),
            output: p.output_path().display().to_string(),
        })
        .collect()
}

pub fn print_info(root: &Project) {
    let mut table = Table::new(&[
        "Project", "Version", "Type", "Language", "Standard", "Compiler", "Sources", "Output",
    ]);
    for info in project_info(root) {
        table.add_row(vec![
            info.name.bold().to_string(),
            info.version,
            info.project_type,
            info.language,
            info.standard,
            info.compiler,
            info.sources
                .map(|n| n.to_string())
                .unwrap_or_else(|| "?".yellow().to_string()),
            info.output,
        ]);
    }
    table.print();
}
