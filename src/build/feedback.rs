use colored::*;
use regex::Regex;
use std::sync::LazyLock;

/// Turns captured compiler/linker output into a short suggestion.
pub struct FeedbackAnalyzer;

impl FeedbackAnalyzer {
    pub fn analyze(output: &str) -> Option<String> {
        // 1. Executable without an entry point
        if output.contains("undefined reference to `main'")
            || output.contains("entry point must be defined")
            || output.contains("_main\", referenced from")
        {
            return Some(format!(
                "Your project is missing a {} function.\nAdd an entry point or set {} if this project is a library.",
                "main()".bold().yellow(),
                "project_type: library".bold().green()
            ));
        }

        // 2. Unresolved symbols at link time
        if output.contains("LNK2019")
            || output.contains("undefined reference to")
            || output.contains("Undefined symbols")
        {
            return Some(format!(
                "It looks like a {} error.\nCheck {} and {} in project.yaml, or list the library as a subproject.",
                "Linker".bold().red(),
                "libs".bold().yellow(),
                "lib_dirs".bold().yellow()
            ));
        }

        // 3. Missing header
        if let Some(header) = missing_header(output) {
            return Some(format!(
                "It looks like a {} error ({}).\nAdd its directory to {} in project.yaml.",
                "Missing Header".bold().red(),
                header.bold(),
                "include_dirs".bold().yellow()
            ));
        }

        // 4. Standard not understood by the compiler
        if output.contains("unrecognized command-line option '-std=")
            || output.contains("invalid value") && output.contains("-std=")
        {
            return Some(format!(
                "The compiler does not accept the {} in project.yaml.\nUse a newer compiler or an older standard.",
                "standard".bold().yellow()
            ));
        }

        None
    }
}

/// GCC, Clang and MSVC spellings of a missing include.
static MISSING_HEADER: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"fatal error: ([^:\s]+): No such file or directory",
        r"fatal error: '([^']+)' file not found",
        r"Cannot open include file: '([^']+)'",
    ]
    .iter()
    .filter_map(|pattern| Regex::new(pattern).ok())
    .collect()
});

fn missing_header(output: &str) -> Option<String> {
    MISSING_HEADER
        .iter()
        .find_map(|re| re.captures(output))
        .map(|caps| caps[1].to_string())
}
