//! Compiler diagnostic classification
//!
//! A failed trial only proves absence when the compiler complained about
//! the entity under test. Anything else (bad flags, a missing library or
//! startup file, an unreadable source, an internal compiler error) says
//! nothing about the capability.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Diagnostics produced by gcc, clang and the common linkers when a
/// header, declaration or symbol does not exist. A line only counts when
/// it also names one of the entities under test.
const MISSING_ENTITY_PATTERNS: &[&str] = &[
    r"No such file or directory",
    r"file not found",
    r"cannot open (source|include) file",
    r"undeclared",
    r"use of undeclared identifier",
    r"implicit declaration of function",
    r"undefined reference to",
    r"undefined symbol",
    r"unresolved external symbol",
    r"referenced from",
];

/// Failures of the toolchain itself. Any of these makes the whole trial
/// inconclusive, whatever else the compiler printed.
const TOOLCHAIN_FAILURE_PATTERNS: &[&str] = &[
    r"cannot find -l",
    r"cannot find crt",
    r"cannot find \S+\.(o|a|so)\b",
    r"library not found for",
    r"conftest\.c: No such file",
    r"no input files",
    r"unrecognized command[- ]line option",
    r"unknown argument",
    r"internal compiler error",
    r"cannot execute",
];

/// Why a trial failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// The header, declaration or symbol under test does not exist.
    MissingEntity,
    /// The test program built but exited non-zero or crashed.
    Runtime,
    /// Any other failure; inconclusive for the capability.
    Unclassified,
}

fn compile_all(patterns: &[&str]) -> Vec<Regex> {
    patterns.iter().filter_map(|p| Regex::new(p).ok()).collect()
}

fn missing_entity_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| compile_all(MISSING_ENTITY_PATTERNS))
}

fn toolchain_failure_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| compile_all(TOOLCHAIN_FAILURE_PATTERNS))
}

/// Matches `entity` as a whole token. A leading underscore is allowed for
/// Mach-O symbol names.
fn entity_token(entity: &str) -> Option<Regex> {
    Regex::new(&format!(
        r"(^|[^A-Za-z0-9_])_?{}([^A-Za-z0-9_]|$)",
        regex::escape(entity)
    ))
    .ok()
}

/// Classify the stderr of a failed compile or link step.
///
/// `entities` are the names the trial unit exists to test: the header,
/// function or symbol, plus any headers it includes. Only a missing-entity
/// diagnostic that names one of them yields [`FailureClass::MissingEntity`].
pub fn classify_build_failure(diagnostics: &str, entities: &[&str]) -> FailureClass {
    if toolchain_failure_patterns()
        .iter()
        .any(|re| re.is_match(diagnostics))
    {
        return FailureClass::Unclassified;
    }

    let tokens: Vec<Regex> = entities
        .iter()
        .filter(|e| !e.trim().is_empty())
        .filter_map(|e| entity_token(e.trim()))
        .collect();
    if tokens.is_empty() {
        return FailureClass::Unclassified;
    }

    let names_missing_entity = diagnostics.lines().any(|line| {
        missing_entity_patterns().iter().any(|re| re.is_match(line))
            && tokens.iter().any(|re| re.is_match(line))
    });

    if names_missing_entity {
        FailureClass::MissingEntity
    } else {
        FailureClass::Unclassified
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gcc_missing_header() {
        let stderr = "conftest.c:1:10: fatal error: byteswap.h: No such file or directory\n";
        assert_eq!(
            classify_build_failure(stderr, &["byteswap.h"]),
            FailureClass::MissingEntity
        );
    }

    #[test]
    fn test_clang_missing_header() {
        let stderr = "conftest.c:1:10: fatal error: 'endian.h' file not found";
        assert_eq!(
            classify_build_failure(stderr, &["endian.h"]),
            FailureClass::MissingEntity
        );
    }

    #[test]
    fn test_undeclared_identifier() {
        let gcc = "error: 'bswap_16' undeclared (first use in this function)";
        let clang = "error: use of undeclared identifier 'bswap_16'";
        assert_eq!(classify_build_failure(gcc, &["bswap_16"]), FailureClass::MissingEntity);
        assert_eq!(classify_build_failure(clang, &["bswap_16"]), FailureClass::MissingEntity);
    }

    #[test]
    fn test_linker_undefined_reference() {
        let ld = "conftest.c:(.text+0x5): undefined reference to `getpagesize'";
        let lld = "ld.lld: error: undefined symbol: getpagesize";
        assert_eq!(classify_build_failure(ld, &["getpagesize"]), FailureClass::MissingEntity);
        assert_eq!(classify_build_failure(lld, &["getpagesize"]), FailureClass::MissingEntity);
    }

    #[test]
    fn test_macho_undefined_symbol_names_entity_on_next_line() {
        let stderr = "Undefined symbols for architecture arm64:\n  \"_getpagesize\", referenced from:\n      _main in conftest.o\nld: symbol(s) not found for architecture arm64";
        assert_eq!(
            classify_build_failure(stderr, &["getpagesize"]),
            FailureClass::MissingEntity
        );
    }

    #[test]
    fn test_bad_flag_is_unclassified() {
        let stderr = "cc: error: unrecognized command-line option '-mfoo'";
        assert_eq!(
            classify_build_failure(stderr, &["getpagesize"]),
            FailureClass::Unclassified
        );
    }

    #[test]
    fn test_missing_library_is_unclassified() {
        let stderr = "/usr/bin/ld: cannot find -lfoo: No such file or directory\ncollect2: error: ld returned 1 exit status";
        assert_eq!(
            classify_build_failure(stderr, &["getpagesize"]),
            FailureClass::Unclassified
        );
    }

    #[test]
    fn test_missing_startup_file_is_unclassified() {
        let stderr = "/usr/bin/ld: cannot find crt1.o: No such file or directory";
        assert_eq!(
            classify_build_failure(stderr, &["crt1.o"]),
            FailureClass::Unclassified
        );
    }

    #[test]
    fn test_unreadable_source_is_unclassified() {
        let stderr = "cc1: fatal error: conftest.c: No such file or directory\ncompilation terminated.";
        assert_eq!(
            classify_build_failure(stderr, &["byteswap.h"]),
            FailureClass::Unclassified
        );
    }

    #[test]
    fn test_other_missing_header_is_unclassified() {
        let stderr = "conftest.c:1:10: fatal error: limits.h: No such file or directory";
        assert_eq!(
            classify_build_failure(stderr, &["getpagesize"]),
            FailureClass::Unclassified
        );
    }

    #[test]
    fn test_entity_must_match_whole_token() {
        let stderr = "undefined reference to `getpagesize_r'";
        assert_eq!(
            classify_build_failure(stderr, &["getpagesize"]),
            FailureClass::Unclassified
        );
    }

    #[test]
    fn test_no_entities_is_unclassified() {
        let stderr = "conftest.c:1:10: fatal error: byteswap.h: No such file or directory";
        assert_eq!(classify_build_failure(stderr, &[]), FailureClass::Unclassified);
    }
}
