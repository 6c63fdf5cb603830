//! Derives concrete shell commands from a language's templates

use crate::error::{Result, SandboxError};
use crate::registry::LanguageSpec;

/// Placeholder substituted with the source basename in command templates
pub const BASENAME_PLACEHOLDER: &str = "%BASENAME%";

/// Filename up to its first `.`; the whole name when it has none.
///
/// `HelloWorld.java` → `HelloWorld`, `archive.tar.gz` → `archive`.
pub fn basename(filename: &str) -> &str {
    filename.split('.').next().unwrap_or(filename)
}

/// Compile-and-run command line for `filename`.
///
/// The run step is chained with `&&`, so it only executes when compilation
/// succeeds.
pub fn build_run_command(spec: &LanguageSpec, filename: &str) -> String {
    let base = basename(filename);
    let run = spec.run.replace(BASENAME_PLACEHOLDER, base);
    match &spec.compile {
        Some(compile) => format!("{} && {}", compile.replace(BASENAME_PLACEHOLDER, base), run),
        None => run,
    }
}

/// Interactive shell command, verbatim.
pub fn build_repl_command(spec: &LanguageSpec) -> Result<String> {
    spec.repl
        .clone()
        .ok_or_else(|| SandboxError::UnsupportedOperation(spec.id.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(compile: Option<&str>, run: &str, repl: Option<&str>) -> LanguageSpec {
        LanguageSpec {
            id: "test".to_string(),
            name: "Test".to_string(),
            image: "test:latest".to_string(),
            compile: compile.map(str::to_string),
            run: run.to_string(),
            repl: repl.map(str::to_string),
            extension: "ext".to_string(),
            sample_file: None,
        }
    }

    #[test]
    fn test_basename() {
        assert_eq!(basename("Foo.ext"), "Foo");
        assert_eq!(basename("Foo"), "Foo");
        assert_eq!(basename("archive.tar.gz"), "archive");
        assert_eq!(basename(".hidden"), "");
        assert_eq!(basename(""), "");
    }

    #[test]
    fn test_basename_is_idempotent() {
        for name in ["Foo", "Foo.ext", "a.b.c"] {
            let once = basename(name);
            assert_eq!(basename(once), once);
        }
    }

    #[test]
    fn test_run_without_compile() {
        let spec = spec(None, "python %BASENAME%.py", None);
        assert_eq!(build_run_command(&spec, "a.py"), "python a.py");
    }

    #[test]
    fn test_compile_then_run_substitutes_every_occurrence() {
        let spec = spec(
            Some("gcc -o %BASENAME% %BASENAME%.c"),
            "./%BASENAME% && rm %BASENAME%",
            None,
        );
        assert_eq!(
            build_run_command(&spec, "Foo.ext"),
            "gcc -o Foo Foo.c && ./Foo && rm Foo"
        );
    }

    #[test]
    fn test_filename_without_extension() {
        let spec = spec(Some("javac %BASENAME%.java"), "java %BASENAME%", None);
        assert_eq!(
            build_run_command(&spec, "Foo"),
            "javac Foo.java && java Foo"
        );
    }

    #[test]
    fn test_repl_command() {
        let with_repl = spec(None, "irb", Some("irb"));
        assert_eq!(build_repl_command(&with_repl).unwrap(), "irb");

        let without = spec(None, "run", None);
        let err = build_repl_command(&without).unwrap_err();
        assert!(matches!(err, SandboxError::UnsupportedOperation(ref id) if id == "test"));
    }
}
