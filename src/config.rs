//! Project descriptors (`project.yaml`) and the resolved project tree.
//!
//! Loading happens in two steps. [`load_descriptor_tree`] reads every
//! `project.yaml` reachable through `subprojects` into raw, loosely-typed
//! [`ProjectDescriptor`]s. [`Project::resolve`] then validates each node and
//! folds the inherited fields (license, global flags) down the tree, producing
//! an immutable [`Project`] the engine works with for the rest of the build.

use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{KilnError, Result};

/// File name of a project descriptor inside a project directory.
pub const DESCRIPTOR_FILE: &str = "project.yaml";

/// Directory (relative to each project) that receives object files.
pub const OBJ_DIR: &str = "obj";

const DEFAULT_VERSION: &str = "0.0.1";

// --- Raw descriptor, as written by users ---

#[derive(Deserialize, Debug, Default, Clone)]
pub struct ProjectDescriptor {
    pub project: Option<String>,
    pub description: Option<String>,
    pub authors: Option<Tokens>,
    pub license: Option<String>,
    pub version: Option<serde_yaml::Value>,
    pub language: Option<String>,
    pub standard: Option<String>,
    pub compiler: Option<String>,
    pub archiver: Option<String>,
    pub assembler: Option<String>,
    pub linker: Option<String>,
    pub project_type: Option<String>,
    pub output: Option<String>,
    pub project_dirs: Option<Vec<String>>,
    #[serde(default)]
    pub ignore: Vec<String>,
    #[serde(default)]
    pub subprojects: Vec<String>,
    pub bootstrap: Option<BootstrapDescriptor>,
    pub compiler_flags: Option<FlagsDescriptor>,
    #[serde(default)]
    pub include_dirs: Vec<String>,
    #[serde(default)]
    pub defines: Vec<String>,
    #[serde(default)]
    pub lib_dirs: Vec<String>,
    #[serde(default)]
    pub libs: Vec<String>,
}

/// A whitespace-separated string or an explicit list.
#[derive(Deserialize, Debug, Clone)]
#[serde(untagged)]
pub enum Tokens {
    Line(String),
    List(Vec<String>),
}

impl Tokens {
    fn into_vec(self) -> Vec<String> {
        match self {
            Tokens::Line(line) => line.split_whitespace().map(str::to_string).collect(),
            Tokens::List(list) => list
                .into_iter()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect(),
        }
    }
}

/// `compiler_flags` is either a single string (the common tier) or a map of tiers.
#[derive(Deserialize, Debug, Clone)]
#[serde(untagged)]
pub enum FlagsDescriptor {
    Common(String),
    Tiers(FlagTiersDescriptor),
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct FlagTiersDescriptor {
    pub global: Option<Tokens>,
    pub common: Option<Tokens>,
    pub c: Option<Tokens>,
    pub cpp: Option<Tokens>,
    pub ar: Option<Tokens>,
    pub ld: Option<Tokens>,
    #[serde(rename = "as")]
    pub asm: Option<Tokens>,
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct BootstrapDescriptor {
    pub task: Option<String>,
    pub command: Option<String>,
}

/// A parsed descriptor together with its directory and its loaded subprojects.
#[derive(Debug, Clone)]
pub struct DescriptorNode {
    pub dir: PathBuf,
    pub descriptor: ProjectDescriptor,
    pub children: Vec<DescriptorNode>,
}

pub fn parse_descriptor(path: &Path, content: &str) -> Result<ProjectDescriptor> {
    serde_yaml::from_str(content).map_err(|e| KilnError::config(path, e.to_string()))
}

/// Read `project.yaml` in `dir` and, recursively, in every declared subproject.
pub fn load_descriptor_tree(dir: &Path) -> Result<DescriptorNode> {
    let path = dir.join(DESCRIPTOR_FILE);
    if !path.exists() {
        return Err(KilnError::config(&path, "descriptor not found"));
    }
    let content = fs::read_to_string(&path).map_err(|e| KilnError::io(&path, e))?;
    let descriptor = parse_descriptor(&path, &content)?;

    let mut seen = HashSet::new();
    for sub in &descriptor.subprojects {
        if !seen.insert(sub.trim_end_matches('/')) {
            return Err(KilnError::config(
                &path,
                format!("subproject directory '{}' is listed more than once", sub),
            ));
        }
    }

    let mut children = Vec::with_capacity(descriptor.subprojects.len());
    for sub in &descriptor.subprojects {
        let sub_dir = dir.join(sub.trim_end_matches('/'));
        if !sub_dir.is_dir() {
            return Err(KilnError::config(
                &path,
                format!("subproject directory '{}' not found", sub),
            ));
        }
        children.push(load_descriptor_tree(&sub_dir)?);
    }

    Ok(DescriptorNode {
        dir: dir.to_path_buf(),
        descriptor,
        children,
    })
}

/// Load and resolve the project tree rooted at `root`.
pub fn load_project(root: &Path) -> Result<Project> {
    let tree = load_descriptor_tree(root)?;
    Project::resolve(&tree, root, None)
}

// --- Resolved model ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    C,
    Cpp,
}

impl Language {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "c" => Some(Language::C),
            "cpp" | "c++" => Some(Language::Cpp),
            _ => None,
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Language::C => write!(f, "c"),
            Language::Cpp => write!(f, "c++"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Standard {
    AnsiC,
    C99,
    C11,
    C17,
    C23,
    Cpp11,
    Cpp14,
    Cpp17,
    Cpp20,
    Cpp23,
}

impl Standard {
    pub const ALL: [Standard; 10] = [
        Standard::AnsiC,
        Standard::C99,
        Standard::C11,
        Standard::C17,
        Standard::C23,
        Standard::Cpp11,
        Standard::Cpp14,
        Standard::Cpp17,
        Standard::Cpp20,
        Standard::Cpp23,
    ];

    pub fn parse(value: &str) -> Option<Self> {
        let normalized = value.trim().to_lowercase();
        Self::ALL.into_iter().find(|s| s.as_str() == normalized)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Standard::AnsiC => "ansic",
            Standard::C99 => "c99",
            Standard::C11 => "c11",
            Standard::C17 => "c17",
            Standard::C23 => "c23",
            Standard::Cpp11 => "c++11",
            Standard::Cpp14 => "c++14",
            Standard::Cpp17 => "c++17",
            Standard::Cpp20 => "c++20",
            Standard::Cpp23 => "c++23",
        }
    }

    /// The language this standard applies to.
    pub fn language(&self) -> Language {
        match self {
            Standard::AnsiC | Standard::C99 | Standard::C11 | Standard::C17 | Standard::C23 => {
                Language::C
            }
            _ => Language::Cpp,
        }
    }
}

impl fmt::Display for Standard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProjectType {
    Executable,
    Library,
}

impl ProjectType {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "executable" => Some(ProjectType::Executable),
            "library" => Some(ProjectType::Library),
            _ => None,
        }
    }
}

impl fmt::Display for ProjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProjectType::Executable => write!(f, "executable"),
            ProjectType::Library => write!(f, "library"),
        }
    }
}

/// Flag tiers in precedence order. `global` already contains the inherited
/// global flags of every ancestor, followed by this project's own.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct FlagTiers {
    pub global: Vec<String>,
    pub common: Vec<String>,
    pub c: Vec<String>,
    pub cpp: Vec<String>,
    pub ar: Vec<String>,
    pub ld: Vec<String>,
    pub asm: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bootstrap {
    pub task: String,
    pub command: String,
}

/// A validated project node. Immutable for the rest of the build invocation.
#[derive(Debug, Clone)]
pub struct Project {
    pub name: String,
    pub description: String,
    pub authors: Vec<String>,
    pub license: String,
    pub version: semver::Version,
    pub language: Language,
    pub standard: Standard,
    pub compiler: String,
    pub archiver: Option<String>,
    pub assembler: Option<String>,
    pub linker: Option<String>,
    pub project_type: ProjectType,
    /// Output artifact, relative to `dir`.
    pub output: PathBuf,
    pub project_dirs: Vec<PathBuf>,
    pub ignore: Vec<String>,
    pub flags: FlagTiers,
    pub include_dirs: Vec<String>,
    pub defines: Vec<String>,
    pub lib_dirs: Vec<String>,
    pub libs: Vec<String>,
    pub bootstrap: Option<Bootstrap>,
    pub subprojects: Vec<Project>,
    /// Absolute (or root-relative) project directory.
    pub dir: PathBuf,
    /// Stable identifier: directory relative to the build root, `.` for the root.
    pub key: String,
}

/// Fields a child copies from its parent.
struct Inherited<'a> {
    license: &'a str,
    global_flags: &'a [String],
}

impl Project {
    /// Validate `node` and resolve inheritance top-down.
    ///
    /// `root` is the build root, used to compute project keys.
    pub fn resolve(node: &DescriptorNode, root: &Path, parent: Option<&Project>) -> Result<Self> {
        let inherited = parent.map(|p| Inherited {
            license: &p.license,
            global_flags: &p.flags.global,
        });
        Self::resolve_node(node, root, inherited.as_ref())
    }

    fn resolve_node(node: &DescriptorNode, root: &Path, inherited: Option<&Inherited>) -> Result<Self> {
        let path = node.dir.join(DESCRIPTOR_FILE);
        let d = node.descriptor.clone();

        let mut missing = Vec::new();
        if d.project.is_none() {
            missing.push("project");
        }
        if d.authors.is_none() {
            missing.push("authors");
        }
        if d.license.is_none() && inherited.is_none() {
            missing.push("license");
        }
        if d.language.is_none() {
            missing.push("language");
        }
        if d.standard.is_none() {
            missing.push("standard");
        }
        if d.compiler.is_none() {
            missing.push("compiler");
        }
        if d.project_dirs.is_none() {
            missing.push("project_dirs");
        }
        if d.project_type.is_none() {
            missing.push("project_type");
        }
        if d.output.is_none() {
            missing.push("output");
        }
        if !missing.is_empty() {
            return Err(KilnError::config(
                &path,
                format!("missing mandatory field(s): {}", missing.join(", ")),
            ));
        }

        let name = d.project.unwrap_or_default();
        let language_raw = d.language.unwrap_or_default();
        let language = Language::parse(&language_raw).ok_or_else(|| {
            KilnError::config(
                &path,
                format!("invalid language '{}', expected 'c' or 'cpp'", language_raw),
            )
        })?;
        let standard_raw = d.standard.unwrap_or_default();
        let standard = Standard::parse(&standard_raw).ok_or_else(|| {
            let allowed: Vec<_> = Standard::ALL.iter().map(Standard::as_str).collect();
            KilnError::config(
                &path,
                format!(
                    "invalid standard '{}', expected one of {}",
                    standard_raw,
                    allowed.join(", ")
                ),
            )
        })?;
        let type_raw = d.project_type.unwrap_or_default();
        let project_type = ProjectType::parse(&type_raw).ok_or_else(|| {
            KilnError::config(
                &path,
                format!(
                    "invalid project_type '{}', expected 'executable' or 'library'",
                    type_raw
                ),
            )
        })?;

        let version_raw = match d.version {
            None => DEFAULT_VERSION.to_string(),
            Some(serde_yaml::Value::String(s)) => s,
            Some(serde_yaml::Value::Number(n)) => n.to_string(),
            Some(other) => {
                return Err(KilnError::config(
                    &path,
                    format!("invalid version {:?}", other),
                ));
            }
        };
        let version = semver::Version::parse(version_raw.trim()).map_err(|e| {
            KilnError::config(&path, format!("invalid version '{}': {}", version_raw, e))
        })?;

        let authors = d.authors.map(Tokens::into_authors).unwrap_or_default();
        if authors.is_empty() {
            return Err(KilnError::config(&path, "authors must not be empty"));
        }

        let project_dirs: Vec<PathBuf> = d
            .project_dirs
            .unwrap_or_default()
            .into_iter()
            .map(PathBuf::from)
            .collect();
        if project_dirs.is_empty() {
            return Err(KilnError::config(
                &path,
                "project_dirs must list at least one directory",
            ));
        }

        let license = d
            .license
            .or_else(|| inherited.map(|p| p.license.to_string()))
            .unwrap_or_default();

        let mut flags = match d.compiler_flags {
            None => FlagTiers::default(),
            Some(FlagsDescriptor::Common(line)) => FlagTiers {
                common: Tokens::Line(line).into_vec(),
                ..FlagTiers::default()
            },
            Some(FlagsDescriptor::Tiers(tiers)) => FlagTiers {
                global: tiers.global.map(Tokens::into_vec).unwrap_or_default(),
                common: tiers.common.map(Tokens::into_vec).unwrap_or_default(),
                c: tiers.c.map(Tokens::into_vec).unwrap_or_default(),
                cpp: tiers.cpp.map(Tokens::into_vec).unwrap_or_default(),
                ar: tiers.ar.map(Tokens::into_vec).unwrap_or_default(),
                ld: tiers.ld.map(Tokens::into_vec).unwrap_or_default(),
                asm: tiers.asm.map(Tokens::into_vec).unwrap_or_default(),
            },
        };
        if let Some(parent) = inherited {
            let mut global = parent.global_flags.to_vec();
            global.append(&mut flags.global);
            flags.global = global;
        }

        let bootstrap = d.bootstrap.and_then(|b| {
            let command = b.command.unwrap_or_default();
            if command.trim().is_empty() {
                None
            } else {
                Some(Bootstrap {
                    task: b.task.unwrap_or_else(|| "bootstrap".to_string()),
                    command,
                })
            }
        });

        let mut project = Project {
            description: d
                .description
                .unwrap_or_else(|| format!("{} project", name)),
            name,
            authors,
            license,
            version,
            language,
            standard,
            compiler: d.compiler.unwrap_or_default(),
            archiver: d.archiver,
            assembler: d.assembler,
            linker: d.linker,
            project_type,
            output: PathBuf::from(d.output.unwrap_or_default()),
            project_dirs,
            ignore: d.ignore,
            flags,
            include_dirs: d.include_dirs,
            defines: d.defines,
            lib_dirs: d.lib_dirs,
            libs: d.libs,
            bootstrap,
            subprojects: Vec::new(),
            dir: node.dir.clone(),
            key: project_key(root, &node.dir),
        };

        // Children see this node's fully resolved fields; the parent is not touched afterwards.
        let inherited = Inherited {
            license: &project.license,
            global_flags: &project.flags.global,
        };
        let mut subprojects = Vec::with_capacity(node.children.len());
        let mut names = HashSet::new();
        for child in &node.children {
            let sub = Self::resolve_node(child, root, Some(&inherited))?;
            if !names.insert(sub.name.clone()) {
                return Err(KilnError::config(
                    &path,
                    format!("duplicate subproject name '{}'", sub.name),
                ));
            }
            subprojects.push(sub);
        }
        project.subprojects = subprojects;

        Ok(project)
    }

    pub fn output_path(&self) -> PathBuf {
        self.dir.join(&self.output)
    }

    pub fn obj_dir(&self) -> PathBuf {
        self.dir.join(OBJ_DIR)
    }

    /// Depth-first, pre-order search by project name.
    pub fn find(&self, name: &str) -> Option<&Project> {
        if self.name == name {
            return Some(self);
        }
        self.subprojects.iter().find_map(|sub| sub.find(name))
    }

    /// All projects of this subtree, parents before children.
    pub fn iter(&self) -> Vec<&Project> {
        let mut out = vec![self];
        for sub in &self.subprojects {
            out.extend(sub.iter());
        }
        out
    }
}

impl Tokens {
    fn into_authors(self) -> Vec<String> {
        match self {
            Tokens::Line(line) if line.trim().is_empty() => Vec::new(),
            Tokens::Line(line) => vec![line.trim().to_string()],
            other => other.into_vec(),
        }
    }
}

fn project_key(root: &Path, dir: &Path) -> String {
    match dir.strip_prefix(root) {
        Ok(rel) if rel.as_os_str().is_empty() => ".".to_string(),
        Ok(rel) => rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/"),
        Err(_) => dir.to_string_lossy().to_string(),
    }
}

// --- Build options ---

/// Knobs for one build invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOptions {
    /// Project name to build; the root project when `None`.
    pub target: Option<String>,
    /// Append debug-info flags to every compile.
    pub debug: bool,
    /// `false` runs one task at a time and stops at the first failure.
    pub parallel: bool,
    /// Upper bound on concurrent tasks; available parallelism when `None`.
    pub jobs: Option<usize>,
    pub verbose: bool,
    pub silent: bool,
    /// Also build the target's subprojects.
    pub build_subprojects: bool,
    /// Stop starting tasks after the first failure.
    pub fail_fast: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            target: None,
            debug: false,
            parallel: true,
            jobs: None,
            verbose: false,
            silent: false,
            build_subprojects: true,
            fail_fast: false,
        }
    }
}

impl BuildOptions {
    /// Effective worker count.
    pub fn concurrency(&self) -> usize {
        if !self.parallel {
            return 1;
        }
        self.jobs
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(1)
            })
            .max(1)
    }

    /// Whether the first failed task stops new tasks from starting.
    pub fn stops_on_failure(&self) -> bool {
        self.fail_fast || !self.parallel
    }
}
