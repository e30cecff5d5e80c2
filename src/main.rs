//! # kiln CLI Entry Point
//!
//! Parses arguments with clap and hands off to the library:
//! - `kiln build [TARGET]` - incremental build of a project tree
//! - `kiln clean` - remove objects, outputs and recorded state
//! - `kiln info` - describe every project of the tree

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use kiln::build;
use kiln::config::{self, BuildOptions};

#[derive(Parser)]
#[command(name = "kiln")]
#[command(about = "Incremental build engine for C/C++ project trees", version = env!("CARGO_PKG_VERSION"))]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the project tree, or one project of it
    Build {
        /// Project name to build (defaults to the root project)
        target: Option<String>,
        /// Directory containing the root project.yaml
        #[arg(long, default_value = ".")]
        root: PathBuf,
        /// Compile with debug information
        #[arg(long)]
        debug: bool,
        /// Run one task at a time, stopping at the first failure
        #[arg(long)]
        sequential: bool,
        /// Maximum number of concurrent tasks
        #[arg(short, long)]
        jobs: Option<usize>,
        /// Stop starting new tasks after the first failure
        #[arg(long)]
        fail_fast: bool,
        /// Build only the target, reusing subproject artifacts as they are
        #[arg(long)]
        no_subprojects: bool,
        /// Show every command and staleness decision
        #[arg(short, long, conflicts_with = "silent")]
        verbose: bool,
        /// Only report failures
        #[arg(short, long)]
        silent: bool,
    },
    /// Remove object files, outputs and recorded build state
    Clean {
        #[arg(long, default_value = ".")]
        root: PathBuf,
        /// Leave subprojects untouched
        #[arg(long)]
        no_subprojects: bool,
    },
    /// Show the projects of the tree
    Info {
        #[arg(long, default_value = ".")]
        root: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Build { verbose: true, .. } => "debug",
        _ => "warn",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("{} {:#}", "x".red(), e);
            ExitCode::FAILURE
        }
    }
}

/// Returns whether the command succeeded.
fn run(cli: Cli) -> Result<bool> {
    match cli.command {
        Commands::Build {
            target,
            root,
            debug,
            sequential,
            jobs,
            fail_fast,
            no_subprojects,
            verbose,
            silent,
        } => {
            let project = load(&root)?;
            let options = BuildOptions {
                target,
                debug,
                parallel: !sequential,
                jobs,
                verbose,
                silent,
                build_subprojects: !no_subprojects,
                fail_fast,
            };
            let report = build::build(&project, &options).context("Build aborted")?;
            Ok(report.success())
        }

        Commands::Clean {
            root,
            no_subprojects,
        } => {
            let project = load(&root)?;
            build::clean(&project, !no_subprojects, false).context("Clean failed")?;
            Ok(true)
        }

        Commands::Info { root } => {
            let project = load(&root)?;
            build::print_info(&project);
            Ok(true)
        }
    }
}

// --- Helper: Resolve root once and load the tree ---
fn load(root: &Path) -> Result<config::Project> {
    let root = root
        .canonicalize()
        .with_context(|| format!("Cannot access project root {}", root.display()))?;
    config::load_project(&root).with_context(|| format!("Failed to load {}", root.display()))
}
