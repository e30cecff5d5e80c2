//! # kiln - incremental builds for C/C++ project trees
//!
//! A project tree is a directory with a `project.yaml` descriptor whose
//! `subprojects` point at further directories with their own descriptors.
//! kiln discovers sources, works out which of them changed since the last
//! build, and runs only the compile, archive and link steps that are stale,
//! in dependency order and in parallel.
//!
//! ## Module Organization
//!
//! - [`config`] - descriptor loading, validation and inheritance
//! - [`discovery`] - source file discovery and fingerprinting
//! - [`manifest`] - persisted build state
//! - [`toolchain`] - compiler selection and command lines
//! - [`build`] - change detection, task graph, scheduler

/// Change detection, task graph construction and scheduling.
pub mod build;

/// Project descriptors (`project.yaml`) and build options.
pub mod config;

/// Source discovery.
pub mod discovery;

/// Error taxonomy.
pub mod error;

/// Content hashing.
pub mod fingerprint;

/// Persisted build state.
pub mod manifest;

/// Toolchain resolution and command-line construction.
pub mod toolchain;

/// Terminal UI utilities (tables).
pub mod ui;

pub use error::{KilnError, Result};
