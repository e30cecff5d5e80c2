//! Task graph construction.
//!
//! Projects are visited children first. Each project that needs work
//! contributes an optional bootstrap task, one compile task per stale unit
//! and one archive/link task. Edges run from prerequisite to dependent.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;

use petgraph::Direction;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use tracing::debug;

use crate::build::changes::ChangeSet;
use crate::build::report::TaskKind;
use crate::config::{DESCRIPTOR_FILE, Project, ProjectType};
use crate::discovery::TranslationUnit;
use crate::error::{KilnError, Result};
use crate::fingerprint::path_mtime;
use crate::manifest::{FileEntry, ManifestUpdate};
use crate::toolchain::{CommandLine, Toolchain, bootstrap_command};

/// Per-project input to the graph builder, keyed by project key.
#[derive(Debug)]
pub enum ProjectPlan {
    /// Sources discovered and toolchain resolved.
    Ready {
        toolchain: Toolchain,
        units: Vec<TranslationUnit>,
        flags: String,
        changes: ChangeSet,
    },
    /// Not part of this invocation; its artifact is consumed as it is.
    External,
    /// Discovery or toolchain resolution failed.
    Broken,
}

/// What happens to the manifest once a task succeeds.
#[derive(Debug, Clone)]
pub enum Completion {
    Nothing,
    Compiled(ManifestUpdate),
    Linked(LinkRecord),
}

/// Link-time state that can only be stamped after the artifact exists.
#[derive(Debug, Clone)]
pub struct LinkRecord {
    pub project: String,
    pub flags: String,
    pub output: String,
    pub artifact: PathBuf,
    pub sources: Vec<String>,
    /// Direct subprojects: key and artifact path.
    pub dependencies: Vec<(String, PathBuf)>,
}

impl LinkRecord {
    pub fn into_update(self) -> ManifestUpdate {
        let dependencies: BTreeMap<String, u64> = self
            .dependencies
            .iter()
            .filter_map(|(key, path)| path_mtime(path).map(|m| (key.clone(), m)))
            .collect();
        ManifestUpdate::Linked {
            project: self.project,
            flags: self.flags,
            output: self.output,
            artifact_mtime: path_mtime(&self.artifact),
            dependencies,
            sources: self.sources,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BuildTask {
    /// Unique within one graph, e.g. `app:src/main.c` or `app:link`.
    pub name: String,
    pub kind: TaskKind,
    /// Owning project name.
    pub project: String,
    pub command: CommandLine,
    /// File the command must produce. `None` for bootstrap steps.
    pub artifact: Option<PathBuf>,
    pub completion: Completion,
}

/// Result of visiting one project subtree.
struct Visit {
    /// The subtree root's archive/link task, if it emitted one.
    link: Option<NodeIndex>,
    /// The subtree contains a broken project.
    broken: bool,
}

pub struct BuildGraph {
    graph: DiGraph<BuildTask, ()>,
    /// Tasks that can never run because a subproject is broken.
    blocked: Vec<NodeIndex>,
}

impl BuildGraph {
    /// Build the task graph for `target` and its subtree.
    pub fn new(target: &Project, plans: &HashMap<String, ProjectPlan>) -> Result<Self> {
        validate_subprojects(target)?;

        let mut builder = Self {
            graph: DiGraph::new(),
            blocked: Vec::new(),
        };
        builder.visit(target, plans);

        toposort(&builder.graph, None).map_err(|cycle| {
            let task = &builder.graph[cycle.node_id()];
            KilnError::config(
                target.dir.join(DESCRIPTOR_FILE),
                format!("task graph has a cycle through '{}'", task.name),
            )
        })?;
        debug!(
            tasks = builder.graph.node_count(),
            edges = builder.graph.edge_count(),
            "task graph built"
        );
        Ok(builder)
    }

    fn visit(&mut self, project: &Project, plans: &HashMap<String, ProjectPlan>) -> Visit {
        let children: Vec<Visit> = project
            .subprojects
            .iter()
            .map(|sub| self.visit(sub, plans))
            .collect();
        let child_broken = children.iter().any(|c| c.broken);

        let (toolchain, units, flags, changes) = match plans.get(&project.key) {
            Some(ProjectPlan::Ready {
                toolchain,
                units,
                flags,
                changes,
            }) => (toolchain, units, flags, changes),
            Some(ProjectPlan::Broken) => {
                return Visit {
                    link: None,
                    broken: true,
                };
            }
            Some(ProjectPlan::External) | None => {
                return Visit {
                    link: None,
                    broken: child_broken,
                };
            }
        };

        if changes.is_up_to_date() {
            return Visit {
                link: None,
                broken: child_broken,
            };
        }

        let bootstrap = bootstrap_command(project).map(|command| {
            self.graph.add_node(BuildTask {
                name: format!("{}:bootstrap", project.name),
                kind: TaskKind::Bootstrap,
                project: project.name.clone(),
                command,
                artifact: None,
                completion: Completion::Nothing,
            })
        });

        let mut compiles = Vec::with_capacity(changes.stale.len());
        for (index, _) in &changes.stale {
            let unit = &units[*index];
            let object = unit.object_path(project);
            let node = self.graph.add_node(BuildTask {
                name: format!("{}:{}", project.name, unit.rel),
                kind: TaskKind::Compile,
                project: project.name.clone(),
                command: toolchain.compile_command(project, unit, &object),
                artifact: Some(object),
                completion: Completion::Compiled(ManifestUpdate::Compiled {
                    project: project.key.clone(),
                    rel: unit.rel.clone(),
                    entry: FileEntry {
                        fingerprint: unit.fingerprint.clone(),
                        flags: flags.clone(),
                    },
                }),
            });
            if let Some(b) = bootstrap {
                self.graph.add_edge(b, node, ());
            }
            compiles.push(node);
        }

        let objects: Vec<PathBuf> = units.iter().map(|u| u.object_path(project)).collect();
        let (kind, command) = match project.project_type {
            ProjectType::Library => (
                TaskKind::Archive,
                toolchain.archive_command(project, &objects),
            ),
            ProjectType::Executable => {
                let libraries = static_libraries(project);
                (
                    TaskKind::Link,
                    toolchain.link_command(project, &objects, &libraries),
                )
            }
        };

        let record = LinkRecord {
            project: project.key.clone(),
            flags: flags.clone(),
            output: project.output.to_string_lossy().to_string(),
            artifact: project.output_path(),
            sources: units.iter().map(|u| u.rel.clone()).collect(),
            dependencies: project
                .subprojects
                .iter()
                .map(|s| (s.key.clone(), s.output_path()))
                .collect(),
        };
        let link = self.graph.add_node(BuildTask {
            name: format!("{}:{}", project.name, kind),
            kind,
            project: project.name.clone(),
            command,
            artifact: Some(project.output_path()),
            completion: Completion::Linked(record),
        });

        for node in &compiles {
            self.graph.add_edge(*node, link, ());
        }
        if compiles.is_empty()
            && let Some(b) = bootstrap
        {
            self.graph.add_edge(b, link, ());
        }
        for child in &children {
            if let Some(child_link) = child.link {
                self.graph.add_edge(child_link, link, ());
            }
        }
        if child_broken {
            self.blocked.push(link);
        }

        Visit {
            link: Some(link),
            broken: child_broken,
        }
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn tasks(&self) -> impl Iterator<Item = &BuildTask> {
        self.graph.node_weights()
    }

    pub fn find(&self, name: &str) -> Option<NodeIndex> {
        self.graph
            .node_indices()
            .find(|&idx| self.graph[idx].name == name)
    }

    pub fn task(&self, idx: NodeIndex) -> &BuildTask {
        &self.graph[idx]
    }

    /// Direct prerequisites of `idx`.
    pub fn predecessors(&self, idx: NodeIndex) -> Vec<NodeIndex> {
        self.graph
            .neighbors_directed(idx, Direction::Incoming)
            .collect()
    }

    pub fn blocked(&self) -> &[NodeIndex] {
        &self.blocked
    }

    pub fn into_parts(self) -> (DiGraph<BuildTask, ()>, Vec<NodeIndex>) {
        (self.graph, self.blocked)
    }

    #[cfg(test)]
    pub(crate) fn from_parts(graph: DiGraph<BuildTask, ()>, blocked: Vec<NodeIndex>) -> Self {
        Self { graph, blocked }
    }
}

/// Library artifacts an executable links against: every library reachable
/// through library subprojects, each listed before the libraries it uses.
/// A library shared by several dependents keeps its last position.
pub fn static_libraries(project: &Project) -> Vec<PathBuf> {
    fn collect(project: &Project, out: &mut Vec<PathBuf>) {
        for sub in &project.subprojects {
            if sub.project_type == ProjectType::Library {
                out.push(sub.output_path());
                collect(sub, out);
            }
        }
    }

    let mut all = Vec::new();
    collect(project, &mut all);
    let mut seen = HashSet::new();
    let mut libraries: Vec<PathBuf> = all
        .into_iter()
        .rev()
        .filter(|lib| seen.insert(lib.clone()))
        .collect();
    libraries.reverse();
    libraries
}

/// Subproject names must be unique under each parent.
pub fn validate_subprojects(project: &Project) -> Result<()> {
    let mut names = HashSet::new();
    for sub in &project.subprojects {
        if !names.insert(sub.name.as_str()) {
            return Err(KilnError::config(
                project.dir.join(DESCRIPTOR_FILE),
                format!("duplicate subproject name '{}'", sub.name),
            ));
        }
    }
    project.subprojects.iter().try_for_each(validate_subprojects)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::changes::{LinkReason, StaleReason};
    use crate::config::{DescriptorNode, parse_descriptor};
    use crate::discovery::SourceKind;
    use crate::fingerprint::FileFingerprint;
    use crate::toolchain::CompilerType;
    use std::path::Path;

    fn node(dir: &str, yaml: &str, children: Vec<DescriptorNode>) -> DescriptorNode {
        DescriptorNode {
            dir: PathBuf::from(dir),
            descriptor: parse_descriptor(Path::new("project.yaml"), yaml).unwrap(),
            children,
        }
    }

    fn descriptor(name: &str, kind: &str, extra: &str) -> String {
        format!(
            "project: {name}\nauthors: a\nlicense: MIT\nlanguage: c\nstandard: c11\ncompiler: cc\nproject_dirs: [src]\nproject_type: {kind}\noutput: out/{name}\n{extra}"
        )
    }

    /// app (executable) -> core (library)
    fn tree(app_extra: &str) -> Project {
        let core = node("/ws/core", &descriptor("core", "library", ""), vec![]);
        let app = node(
            "/ws",
            &descriptor("app", "executable", &format!("subprojects: [core]\n{app_extra}")),
            vec![core],
        );
        Project::resolve(&app, Path::new("/ws"), None).unwrap()
    }

    fn toolchain() -> Toolchain {
        Toolchain {
            compiler_type: CompilerType::GCC,
            cc_path: Some(PathBuf::from("/bin/cc")),
            cxx_path: None,
            linker_path: PathBuf::from("/bin/cc"),
            archiver_path: Some(PathBuf::from("/bin/ar")),
            assembler_path: None,
            debug: false,
        }
    }

    fn units(project: &Project, rels: &[&str]) -> Vec<TranslationUnit> {
        rels.iter()
            .map(|rel| TranslationUnit {
                path: project.dir.join(rel),
                rel: rel.to_string(),
                kind: SourceKind::C,
                fingerprint: FileFingerprint {
                    hash: "h".into(),
                    size: 1,
                    mtime: 1,
                },
            })
            .collect()
    }

    fn ready(project: &Project, rels: &[&str], stale: &[usize]) -> ProjectPlan {
        let changes = ChangeSet {
            stale: stale.iter().map(|i| (*i, StaleReason::New)).collect(),
            link: if stale.is_empty() {
                None
            } else {
                Some(LinkReason::SourcesRecompiled)
            },
        };
        ProjectPlan::Ready {
            toolchain: toolchain(),
            units: units(project, rels),
            flags: "f".into(),
            changes,
        }
    }

    fn edge(graph: &BuildGraph, from: &str, to: &str) -> bool {
        let from = graph.find(from).unwrap();
        let to = graph.find(to).unwrap();
        graph.predecessors(to).contains(&from)
    }

    #[test]
    fn test_clean_build_graph_shape() {
        let app = tree("");
        let core = &app.subprojects[0];
        let mut plans = HashMap::new();
        plans.insert(app.key.clone(), ready(&app, &["src/main.c"], &[0]));
        plans.insert(core.key.clone(), ready(core, &["src/a.c", "src/b.c"], &[0, 1]));

        let graph = BuildGraph::new(&app, &plans).unwrap();
        assert_eq!(graph.len(), 5);
        assert!(edge(&graph, "core:src/a.c", "core:archive"));
        assert!(edge(&graph, "core:src/b.c", "core:archive"));
        assert!(edge(&graph, "core:archive", "app:link"));
        assert!(edge(&graph, "app:src/main.c", "app:link"));
        assert!(!edge(&graph, "core:src/a.c", "app:link"));
        assert!(graph.blocked().is_empty());

        let link = graph.task(graph.find("app:link").unwrap());
        assert!(link.command.args.iter().any(|a| a.ends_with("core/out/core")));
        let archive = graph.task(graph.find("core:archive").unwrap());
        assert_eq!(archive.command.args[0], "rcs");
    }

    #[test]
    fn test_up_to_date_project_emits_nothing() {
        let app = tree("");
        let core = &app.subprojects[0];
        let mut plans = HashMap::new();
        plans.insert(app.key.clone(), ready(&app, &["src/main.c"], &[]));
        plans.insert(core.key.clone(), ready(core, &["src/a.c"], &[]));
        let graph = BuildGraph::new(&app, &plans).unwrap();
        assert!(graph.is_empty());
    }

    #[test]
    fn test_link_only_when_subproject_relinks() {
        let app = tree("");
        let core = &app.subprojects[0];
        let mut plans = HashMap::new();
        let mut app_plan = ready(&app, &["src/main.c"], &[]);
        if let ProjectPlan::Ready { changes, .. } = &mut app_plan {
            changes.link = Some(LinkReason::SubprojectRelinked(core.key.clone()));
        }
        plans.insert(app.key.clone(), app_plan);
        plans.insert(core.key.clone(), ready(core, &["src/a.c", "src/b.c"], &[1]));

        let graph = BuildGraph::new(&app, &plans).unwrap();
        let names: Vec<_> = graph.tasks().map(|t| t.name.clone()).collect();
        assert_eq!(names.len(), 3);
        assert!(edge(&graph, "core:src/b.c", "core:archive"));
        assert!(edge(&graph, "core:archive", "app:link"));
        // The archive still takes every object, not only the recompiled one.
        let archive = graph.task(graph.find("core:archive").unwrap());
        assert!(archive.command.args.iter().any(|a| a.ends_with("src/a.c.o")));
    }

    #[test]
    fn test_bootstrap_precedes_compiles() {
        let app = tree("bootstrap:\n  task: gen\n  command: ./gen.sh\n");
        let mut plans = HashMap::new();
        plans.insert(app.key.clone(), ready(&app, &["src/a.c", "src/b.c"], &[0, 1]));
        plans.insert(app.subprojects[0].key.clone(), ProjectPlan::External);

        let graph = BuildGraph::new(&app, &plans).unwrap();
        assert!(edge(&graph, "app:bootstrap", "app:src/a.c"));
        assert!(edge(&graph, "app:bootstrap", "app:src/b.c"));
        let bootstrap = graph.task(graph.find("app:bootstrap").unwrap());
        assert_eq!(bootstrap.kind, TaskKind::Bootstrap);
        assert!(bootstrap.artifact.is_none());
    }

    #[test]
    fn test_broken_subproject_blocks_ancestor_link() {
        let app = tree("");
        let mut plans = HashMap::new();
        plans.insert(app.key.clone(), ready(&app, &["src/main.c"], &[0]));
        plans.insert(app.subprojects[0].key.clone(), ProjectPlan::Broken);

        let graph = BuildGraph::new(&app, &plans).unwrap();
        assert_eq!(graph.len(), 2);
        assert_eq!(graph.blocked(), &[graph.find("app:link").unwrap()]);
    }

    #[test]
    fn test_compile_completion_records_flags() {
        let app = tree("");
        let mut plans = HashMap::new();
        plans.insert(app.key.clone(), ready(&app, &["src/main.c"], &[0]));
        let graph = BuildGraph::new(&app, &plans).unwrap();
        let task = graph.task(graph.find("app:src/main.c").unwrap());
        match &task.completion {
            Completion::Compiled(ManifestUpdate::Compiled { project, rel, entry }) => {
                assert_eq!(project, ".");
                assert_eq!(rel, "src/main.c");
                assert_eq!(entry.flags, "f");
            }
            other => panic!("unexpected completion {:?}", other),
        }
        assert_eq!(
            task.artifact.as_deref(),
            Some(Path::new("/ws/obj/src/main.c.o"))
        );
    }

    #[test]
    fn test_static_libraries_are_transitive() {
        // app -> [mid -> core, util -> core, tool (executable) -> private]
        let core = || node("/ws/core", &descriptor("core", "library", ""), vec![]);
        let uses_core = |name: &str| {
            node(
                &format!("/ws/{name}"),
                &descriptor(name, "library", "subprojects: [core]\n"),
                vec![core()],
            )
        };
        let (mid, util) = (uses_core("mid"), uses_core("util"));
        let private = node("/ws/private", &descriptor("private", "library", ""), vec![]);
        let tool = node(
            "/ws/tool",
            &descriptor("tool", "executable", "subprojects: [private]\n"),
            vec![private],
        );
        let app = node(
            "/ws",
            &descriptor("app", "executable", "subprojects: [mid, util, tool]\n"),
            vec![mid, util, tool],
        );
        let app = Project::resolve(&app, Path::new("/ws"), None).unwrap();

        assert_eq!(
            static_libraries(&app),
            vec![
                PathBuf::from("/ws/mid/out/mid"),
                PathBuf::from("/ws/util/out/util"),
                PathBuf::from("/ws/core/out/core"),
            ]
        );
    }

    #[test]
    fn test_duplicate_subproject_names_rejected() {
        let a = node("/ws/a", &descriptor("dup", "library", ""), vec![]);
        let b = node("/ws/b", &descriptor("dup", "library", ""), vec![]);
        let root = node(
            "/ws",
            &descriptor("app", "executable", "subprojects: [a, b]\n"),
            vec![a, b],
        );
        // Resolution may already reject it; either way the graph must not be built.
        if let Ok(project) = Project::resolve(&root, Path::new("/ws"), None) {
            assert!(matches!(
                validate_subprojects(&project),
                Err(KilnError::Config { .. })
            ));
        }
    }
}
