//! Toolchain resolution
//!
//! Turns a project's declared language, standard, compiler and flag tiers
//! into concrete compile, archive, link and bootstrap command lines. Flag
//! tiers are always concatenated in the same order (global, common,
//! language, step-specific) so later tiers can override earlier ones for
//! last-wins tools.

pub mod types;

pub use types::{CommandLine, CompilerType, ToolchainError};

use std::env;
use std::path::{Path, PathBuf};

use crate::config::{Language, Project, ProjectType, Standard};
use crate::discovery::{SourceKind, TranslationUnit};
use crate::fingerprint::hash_tokens;

/// Concrete tools for one project.
#[derive(Debug, Clone)]
pub struct Toolchain {
    pub compiler_type: CompilerType,
    /// Compiler for C sources. Absent for C++ projects without a C driver.
    pub cc_path: Option<PathBuf>,
    /// Compiler for C++ sources. Absent for C projects.
    pub cxx_path: Option<PathBuf>,
    pub linker_path: PathBuf,
    pub archiver_path: Option<PathBuf>,
    pub assembler_path: Option<PathBuf>,
    pub debug: bool,
}

impl Toolchain {
    /// Resolve the tools `project` needs to build `units`.
    ///
    /// Fails when a required tool is missing or the standard cannot compile
    /// one of the units.
    pub fn resolve(
        project: &Project,
        units: &[TranslationUnit],
        debug: bool,
    ) -> Result<Self, ToolchainError> {
        if project.standard.language() != project.language {
            return Err(ToolchainError::LanguageMismatch {
                standard: project.standard.to_string(),
                language: project.language.to_string(),
            });
        }

        let compiler_type = CompilerType::detect(&project.compiler);
        let compiler = find_tool(&project.compiler, &project.dir)
            .ok_or_else(|| ToolchainError::NotFound(project.compiler.clone()))?;

        let (cc_path, cxx_path) = match project.language {
            Language::C => (Some(compiler.clone()), None),
            Language::Cpp => {
                let cc = derive_c_compiler(&project.compiler)
                    .and_then(|name| find_tool(&name, &project.dir));
                (cc, Some(compiler.clone()))
            }
        };

        let mut needs_asm = false;
        for unit in units {
            match (unit.kind, project.language) {
                (SourceKind::Cpp, Language::C) => {
                    return Err(ToolchainError::UnsupportedStandard {
                        standard: project.standard.to_string(),
                        language: "C++".to_string(),
                        source_path: unit.rel.clone(),
                    });
                }
                (SourceKind::C, Language::Cpp) if cc_path.is_none() => {
                    return Err(ToolchainError::NotFound(format!(
                        "C compiler matching '{}' (needed for {})",
                        project.compiler, unit.rel
                    )));
                }
                (SourceKind::Asm, _) => needs_asm = true,
                _ => {}
            }
        }

        let linker_path = match &project.linker {
            Some(linker) => {
                find_tool(linker, &project.dir).ok_or_else(|| ToolchainError::NotFound(linker.clone()))?
            }
            None => compiler.clone(),
        };

        let archiver_path = if project.project_type == ProjectType::Library {
            let default = if compiler_type.uses_msvc_flags() { "lib" } else { "ar" };
            let name = project.archiver.clone().unwrap_or_else(|| default.to_string());
            Some(find_tool(&name, &project.dir).ok_or(ToolchainError::NotFound(name))?)
        } else {
            None
        };

        let assembler_path = if needs_asm {
            let name = project.assembler.clone().unwrap_or_else(|| "as".to_string());
            Some(find_tool(&name, &project.dir).ok_or(ToolchainError::NotFound(name))?)
        } else {
            None
        };

        if let Some(unit) = units.iter().find(|u| u.kind != SourceKind::Asm) {
            // Surface standard problems (e.g. ansic under MSVC) before any task runs.
            std_flag(compiler_type, project.standard).map_err(|_| {
                ToolchainError::UnsupportedStandard {
                    standard: project.standard.to_string(),
                    language: project.language.to_string(),
                    source_path: unit.rel.clone(),
                }
            })?;
        }

        Ok(Self {
            compiler_type,
            cc_path,
            cxx_path,
            linker_path,
            archiver_path,
            assembler_path,
            debug,
        })
    }

    /// Compile flags for `kind`, without input/output paths.
    pub fn compile_flags(&self, project: &Project, kind: SourceKind) -> Vec<String> {
        let msvc = self.compiler_type.uses_msvc_flags();
        let mut flags = Vec::new();

        if kind == SourceKind::Asm {
            flags.extend(project.flags.asm.iter().cloned());
            return flags;
        }

        flags.extend(project.flags.global.iter().cloned());
        flags.extend(project.flags.common.iter().cloned());
        match kind {
            SourceKind::C => flags.extend(project.flags.c.iter().cloned()),
            _ => flags.extend(project.flags.cpp.iter().cloned()),
        }
        for dir in &project.include_dirs {
            let path = project.dir.join(dir);
            flags.push(format!("{}{}", if msvc { "/I" } else { "-I" }, path.display()));
        }
        for define in &project.defines {
            flags.push(format!("{}{}", if msvc { "/D" } else { "-D" }, define));
        }

        // The project standard only applies to sources of the project language.
        let own_language = matches!(
            (kind, project.language),
            (SourceKind::C, Language::C) | (SourceKind::Cpp, Language::Cpp)
        );
        if own_language && let Ok(Some(std)) = std_flag(self.compiler_type, project.standard) {
            flags.push(std);
        }

        if self.debug {
            if msvc {
                flags.extend(["/Z7".to_string(), "/Od".to_string()]);
            } else {
                flags.extend(["-g".to_string(), "-O0".to_string()]);
            }
        }
        flags
    }

    pub fn compile_command(&self, project: &Project, unit: &TranslationUnit, object: &Path) -> CommandLine {
        let program = match unit.kind {
            SourceKind::Asm => self.assembler_path.clone(),
            SourceKind::C => self.cc_path.clone(),
            SourceKind::Cpp => self.cxx_path.clone(),
        }
        .unwrap_or_else(|| self.linker_path.clone());

        let mut args = Vec::new();
        if self.compiler_type.uses_msvc_flags() && unit.kind != SourceKind::Asm {
            args.push("/nologo".to_string());
            args.extend(self.compile_flags(project, unit.kind));
            args.push("/c".to_string());
            args.push(format!("/Fo{}", object.display()));
            args.push(unit.path.to_string_lossy().to_string());
        } else {
            args.extend(self.compile_flags(project, unit.kind));
            if unit.kind != SourceKind::Asm {
                args.push("-c".to_string());
            }
            args.push("-o".to_string());
            args.push(object.to_string_lossy().to_string());
            args.push(unit.path.to_string_lossy().to_string());
        }

        CommandLine {
            program,
            args,
            cwd: project.dir.clone(),
        }
    }

    /// Static archive over `objects`.
    pub fn archive_command(&self, project: &Project, objects: &[PathBuf]) -> CommandLine {
        let output = project.output_path();
        let archiver = self
            .archiver_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("ar"));
        let mut args = Vec::new();
        if self.compiler_type.uses_msvc_flags() {
            args.push("/nologo".to_string());
            args.extend(project.flags.ar.iter().cloned());
            args.push(format!("/OUT:{}", output.display()));
        } else {
            if project.flags.ar.is_empty() {
                args.push("rcs".to_string());
            } else {
                args.extend(project.flags.ar.iter().cloned());
            }
            args.push(output.to_string_lossy().to_string());
        }
        args.extend(objects.iter().map(|o| o.to_string_lossy().to_string()));
        CommandLine {
            program: archiver,
            args,
            cwd: project.dir.clone(),
        }
    }

    /// Executable link over `objects` plus the artifacts of library subprojects.
    pub fn link_command(&self, project: &Project, objects: &[PathBuf], libraries: &[PathBuf]) -> CommandLine {
        let output = project.output_path();
        let msvc = self.compiler_type.uses_msvc_flags();
        let mut args = Vec::new();
        if msvc {
            args.push("/nologo".to_string());
        }
        args.extend(objects.iter().map(|o| o.to_string_lossy().to_string()));
        args.extend(libraries.iter().map(|l| l.to_string_lossy().to_string()));
        if msvc {
            args.push(format!("/Fe{}", output.display()));
            for lib in &project.libs {
                args.push(format!("{}.lib", lib));
            }
            args.push("/link".to_string());
            for dir in &project.lib_dirs {
                args.push(format!("/LIBPATH:{}", project.dir.join(dir).display()));
            }
        } else {
            args.push("-o".to_string());
            args.push(output.to_string_lossy().to_string());
            for dir in &project.lib_dirs {
                args.push(format!("-L{}", project.dir.join(dir).display()));
            }
            for lib in &project.libs {
                args.push(format!("-l{}", lib));
            }
        }
        args.extend(project.flags.ld.iter().cloned());
        CommandLine {
            program: self.linker_path.clone(),
            args,
            cwd: project.dir.clone(),
        }
    }

    /// Fingerprint of everything that shapes this project's outputs besides
    /// source contents: every flag tier, the standard and the tools.
    pub fn flags_fingerprint(&self, project: &Project) -> String {
        let mut tokens: Vec<String> = vec![
            format!("{:?}", self.compiler_type),
            project.standard.to_string(),
            project.project_type.to_string(),
            project.output.to_string_lossy().to_string(),
            format!("debug={}", self.debug),
        ];
        let tools = [
            self.cc_path.as_ref(),
            self.cxx_path.as_ref(),
            Some(&self.linker_path),
            self.archiver_path.as_ref(),
            self.assembler_path.as_ref(),
        ];
        for tool in tools {
            tokens.push(tool.map(|p| p.to_string_lossy().to_string()).unwrap_or_default());
        }
        let tiers = [
            ("global", &project.flags.global),
            ("common", &project.flags.common),
            ("c", &project.flags.c),
            ("cpp", &project.flags.cpp),
            ("ar", &project.flags.ar),
            ("ld", &project.flags.ld),
            ("as", &project.flags.asm),
            ("include", &project.include_dirs),
            ("define", &project.defines),
            ("libdir", &project.lib_dirs),
            ("lib", &project.libs),
        ];
        for (tier, values) in tiers {
            tokens.push(format!("[{}]", tier));
            tokens.extend(values.iter().cloned());
        }
        hash_tokens(tokens)
    }
}

/// The declared bootstrap step as a shell invocation in the project directory.
pub fn bootstrap_command(project: &Project) -> Option<CommandLine> {
    let bootstrap = project.bootstrap.as_ref()?;
    let (shell, flag) = if cfg!(target_os = "windows") {
        ("cmd", "/C")
    } else {
        ("sh", "-c")
    };
    Some(CommandLine {
        program: PathBuf::from(shell),
        args: vec![flag.to_string(), bootstrap.command.clone()],
        cwd: project.dir.clone(),
    })
}

/// Standard selection flag for the given dialect. `Ok(None)` means no flag.
pub fn std_flag(compiler_type: CompilerType, standard: Standard) -> Result<Option<String>, ToolchainError> {
    if compiler_type.uses_msvc_flags() {
        let flag = match standard {
            Standard::AnsiC | Standard::C99 => {
                return Err(ToolchainError::UnsupportedStandard {
                    standard: standard.to_string(),
                    language: "C".to_string(),
                    source_path: String::new(),
                });
            }
            Standard::C11 => "/std:c11",
            Standard::C17 => "/std:c17",
            Standard::C23 => "/std:clatest",
            // MSVC minimum is c++14
            Standard::Cpp11 | Standard::Cpp14 => "/std:c++14",
            Standard::Cpp17 => "/std:c++17",
            Standard::Cpp20 => "/std:c++20",
            Standard::Cpp23 => "/std:c++latest",
        };
        return Ok(Some(flag.to_string()));
    }

    Ok(Some(match standard {
        Standard::AnsiC => "-ansi".to_string(),
        other => format!("-std={}", other.as_str()),
    }))
}

/// `g++` -> `gcc`, `clang++` -> `clang`, `c++` -> `cc`, keeping any directory
/// and version suffix.
fn derive_c_compiler(cxx: &str) -> Option<String> {
    let split = cxx.rfind(['/', '\\']).map(|i| i + 1).unwrap_or(0);
    let (dir, file) = cxx.split_at(split);
    let derived = if let Some(rest) = file.strip_prefix("g++") {
        format!("gcc{}", rest)
    } else if let Some(rest) = file.strip_prefix("c++") {
        format!("cc{}", rest)
    } else if file.contains("clang++") {
        file.replace("clang++", "clang")
    } else if file.contains("++") {
        file.replace("++", "")
    } else {
        // Not a C++-specific driver: it compiles C too.
        file.to_string()
    };
    Some(format!("{}{}", dir, derived))
}

/// Locate `name`: paths with a separator are taken relative to `base`,
/// bare names are searched on `PATH`.
pub fn find_tool(name: &str, base: &Path) -> Option<PathBuf> {
    let candidate = Path::new(name);
    if candidate.components().count() > 1 || candidate.is_absolute() {
        let path = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            base.join(candidate)
        };
        return is_executable(&path).then_some(path);
    }

    let paths = env::var_os("PATH")?;
    env::split_paths(&paths).find_map(|dir| {
        let path = dir.join(name);
        if is_executable(&path) {
            return Some(path);
        }
        if cfg!(windows) {
            let exe = dir.join(format!("{}.exe", name));
            if is_executable(&exe) {
                return Some(exe);
            }
        }
        None
    })
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
