//! Compilation unit generation for doc-tests.
//!
//! Layout of a generated unit:
//!
//! ```text
//! #include <prelude...>
//! #include "<owner's declaring file>"
//! using namespace <enclosing namespace>;
//! int main() {
//! <code>
//! }
//! ```
//!
//! The `main` wrapper is omitted for `nomain` blocks and for code that
//! already defines `main`.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use crate::comment::DocTestJob;

static MAIN_DEFINITION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*(?:int|auto|signed|signed\s+int)\s+main\s*\(").expect("literal pattern")
});

/// What surrounds the block's code.
#[derive(Debug, Clone, Copy)]
pub struct UnitOptions<'a> {
    /// Prelude headers, written as `<x>`, `"x"` or a bare path.
    pub prelude: &'a [String],
    pub include_owner_file: bool,
    pub using_enclosing_namespace: bool,
    /// Base for relative owner paths.
    pub root: &'a Path,
}

/// Whether `code` defines its own `main`.
pub fn defines_main(code: &str) -> bool {
    MAIN_DEFINITION.is_match(code)
}

fn include_line(header: &str) -> String {
    let header = header.trim();
    if header.starts_with('<') || header.starts_with('"') {
        format!("#include {}\n", header)
    } else {
        format!("#include \"{}\"\n", header)
    }
}

/// Generate the translation unit for `job`.
pub fn build_unit(job: &DocTestJob, options: &UnitOptions<'_>) -> String {
    let mut unit = String::new();

    for header in options.prelude {
        unit.push_str(&include_line(header));
    }

    if options.include_owner_file && !job.owner_file.is_empty() {
        let path = Path::new(&job.owner_file);
        let path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            options.root.join(path)
        };
        unit.push_str(&include_line(&path.to_string_lossy()));
    }

    if options.using_enclosing_namespace {
        if let Some(ns) = job.namespace.as_deref().filter(|ns| !ns.is_empty()) {
            unit.push_str(&format!("using namespace {};\n", ns));
        }
    }

    let code = &job.block.code;
    if job.block.wrap_main && !defines_main(code) {
        unit.push_str("int main() {\n");
        unit.push_str(code);
        if !code.ends_with('\n') {
            unit.push('\n');
        }
        unit.push_str("}\n");
    } else {
        unit.push_str(code);
        if !code.ends_with('\n') {
            unit.push('\n');
        }
    }
    unit
}

#[cfg(test)]
mod tests {
    use super::*;
    use cppdoc_core::model::{BlockId, BlockMode, CodeBlock, DeclId};

    fn job(code: &str, wrap_main: bool, namespace: Option<&str>) -> DocTestJob {
        DocTestJob {
            block: CodeBlock {
                id: BlockId(1),
                language: "cpp".to_string(),
                mode: BlockMode::Tested,
                wrap_main,
                code: code.to_string(),
                expected_output: None,
            },
            owner: DeclId(1),
            owner_file: "include/gfx.hpp".to_string(),
            namespace: namespace.map(str::to_string),
        }
    }

    fn options(prelude: &[String]) -> UnitOptions<'_> {
        UnitOptions {
            prelude,
            include_owner_file: true,
            using_enclosing_namespace: true,
            root: Path::new("/project"),
        }
    }

    #[test]
    fn wraps_code_in_main() {
        let prelude = vec!["<iostream>".to_string(), "util.hpp".to_string()];
        let unit = build_unit(&job("std::cout << 1;", true, Some("gfx")), &options(&prelude));
        assert_eq!(
            unit,
            "#include <iostream>\n\
             #include \"util.hpp\"\n\
             #include \"/project/include/gfx.hpp\"\n\
             using namespace gfx;\n\
             int main() {\n\
             std::cout << 1;\n\
             }\n"
        );
    }

    #[test]
    fn nomain_is_not_wrapped() {
        let unit = build_unit(&job("void f() {}\n", false, None), &options(&[]));
        assert!(!unit.contains("int main"));
        assert!(!unit.contains("using namespace"));
        assert!(unit.ends_with("void f() {}\n"));
    }

    #[test]
    fn existing_main_is_not_wrapped() {
        let code = "#include <cstdio>\nint main(int argc, char** argv) { return 0; }\n";
        let unit = build_unit(&job(code, true, None), &options(&[]));
        assert_eq!(unit.matches("main(").count(), 1);
    }

    #[test]
    fn main_detection() {
        assert!(defines_main("int main() {}"));
        assert!(defines_main("  auto main() -> int { return 0; }"));
        assert!(!defines_main("domain();"));
        assert!(!defines_main("int x = main_value();"));
    }

    #[test]
    fn owner_include_can_be_disabled() {
        let mut opts = options(&[]);
        opts.include_owner_file = false;
        opts.using_enclosing_namespace = false;
        let unit = build_unit(&job("f();", true, Some("gfx")), &opts);
        assert_eq!(unit, "int main() {\nf();\n}\n");
    }
}
