use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Command-line dialect of a compiler driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(clippy::upper_case_acronyms)]
pub enum CompilerType {
    /// Microsoft Visual C++ (cl.exe)
    MSVC,
    /// Clang/LLVM (clang++ or clang)
    Clang,
    /// GNU Compiler Collection, and anything else speaking its flags
    GCC,
}

impl CompilerType {
    /// Guess the dialect from the compiler's file name.
    pub fn detect(compiler: &str) -> Self {
        let file = compiler
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(compiler)
            .to_lowercase();
        let stem = file.strip_suffix(".exe").unwrap_or(&file);
        if stem == "cl" || stem == "clang-cl" {
            CompilerType::MSVC
        } else if stem.contains("clang") {
            CompilerType::Clang
        } else {
            CompilerType::GCC
        }
    }

    pub fn uses_msvc_flags(&self) -> bool {
        matches!(self, CompilerType::MSVC)
    }
}

/// A fully resolved process invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Working directory; the build root is never implied.
    pub cwd: PathBuf,
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            if arg.contains(char::is_whitespace) {
                write!(f, " \"{}\"", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

/// Error type for toolchain resolution
#[derive(Debug, Error)]
pub enum ToolchainError {
    /// The named tool is not an executable on disk or on PATH
    #[error("cannot find executable '{0}'")]
    NotFound(String),

    /// The declared standard cannot compile a source of this language
    #[error("standard '{standard}' cannot compile {language} source {source_path}")]
    UnsupportedStandard {
        standard: String,
        language: String,
        source_path: String,
    },

    /// The declared language and standard disagree
    #[error("standard '{standard}' is not a {language} standard")]
    LanguageMismatch { standard: String, language: String },
}
