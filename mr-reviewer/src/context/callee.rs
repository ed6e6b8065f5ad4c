//! Callee definitions for the model's code context.
//!
//! Languages are looked up in a static extension table; every entry is a
//! statically known [`CalleeLocator`]. A locator knows two things: what a
//! definition header of a given name looks like, and where that definition
//! ends.

use std::collections::{BTreeMap, HashSet};

use lazy_static::lazy_static;
use regex::Regex;
use tracing::debug;

use crate::chunk::ChunkRecord;
use crate::diff::DiffFile;

/// Upper bound of lines copied from one definition.
const MAX_DEFINITION_LINES: usize = 80;

/// Names that look like calls but never are.
const NOT_CALLEES: &[&str] = &[
    "if", "for", "while", "switch", "catch", "return", "match", "loop", "sizeof", "typeof",
    "function", "fn", "def", "func", "fun", "new", "super", "this", "self", "elif", "and", "or",
    "not", "in", "await", "async", "yield", "print", "assert", "Some", "Ok", "Err", "Box",
];

lazy_static! {
    static ref CALL_RE: Regex =
        Regex::new(r"\b([A-Za-z_][A-Za-z0-9_]*)\s*\(").expect("call-site regex");
}

pub trait CalleeLocator: Sync {
    fn language(&self) -> &'static str;

    fn extensions(&self) -> &'static [&'static str];

    /// Regex template of a definition header; `NAME` is replaced by the
    /// escaped callee name.
    fn definition_template(&self) -> &'static str;

    /// Index of the last line of the definition starting at `start`.
    fn block_end(&self, lines: &[&str], start: usize) -> usize {
        brace_block_end(lines, start)
    }

    /// Names called in `code`, in first-seen order.
    fn call_names(&self, code: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        CALL_RE
            .captures_iter(code)
            .filter_map(|c| c.get(1).map(|m| m.as_str()))
            .filter(|n| !NOT_CALLEES.contains(n))
            .filter(|n| seen.insert(*n))
            .map(str::to_string)
            .collect()
    }

    fn definition_regex(&self, name: &str) -> Option<Regex> {
        let pattern = self
            .definition_template()
            .replace("NAME", &regex::escape(name));
        Regex::new(&pattern).ok()
    }
}

pub struct Python;
pub struct JavaKotlin;
pub struct RustLang;
pub struct JsTs;
pub struct Go;

impl CalleeLocator for Python {
    fn language(&self) -> &'static str {
        "python"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["py", "pyi"]
    }

    fn definition_template(&self) -> &'static str {
        r"^\s*(?:async\s+)?def\s+NAME\s*\("
    }

    fn block_end(&self, lines: &[&str], start: usize) -> usize {
        let indent = indent_of(lines[start]);
        let limit = (start + MAX_DEFINITION_LINES).min(lines.len());
        let mut end = start;
        for (i, line) in lines.iter().enumerate().take(limit).skip(start + 1) {
            if line.trim().is_empty() {
                continue;
            }
            if indent_of(line) <= indent {
                break;
            }
            end = i;
        }
        end
    }
}

impl CalleeLocator for JavaKotlin {
    fn language(&self) -> &'static str {
        "java"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["java", "kt", "kts"]
    }

    fn definition_template(&self) -> &'static str {
        r"^\s*(?:(?:public|private|protected|internal|static|final|abstract|open|override|suspend|synchronized|inline)\s+)*(?:fun\s+(?:<[^>]*>\s*)?(?:[\w.]+\.)?NAME\s*\(|[\w<>\[\],.?]+\s+NAME\s*\([^;]*$)"
    }
}

impl CalleeLocator for RustLang {
    fn language(&self) -> &'static str {
        "rust"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["rs"]
    }

    fn definition_template(&self) -> &'static str {
        r#"^\s*(?:pub(?:\([^)]*\))?\s+)?(?:const\s+)?(?:async\s+)?(?:unsafe\s+)?(?:extern\s+"[^"]*"\s+)?fn\s+NAME\b"#
    }
}

impl CalleeLocator for JsTs {
    fn language(&self) -> &'static str {
        "javascript"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["js", "jsx", "mjs", "cjs", "ts", "tsx"]
    }

    fn definition_template(&self) -> &'static str {
        r"^\s*(?:export\s+)?(?:default\s+)?(?:async\s+)?function\*?\s+NAME\s*[(<]|^\s*(?:export\s+)?(?:const|let|var)\s+NAME\s*=\s*(?:async\s*)?(?:function|\(|[A-Za-z_$][\w$]*\s*=>)|^\s*(?:(?:public|private|protected|static|async|readonly)\s+)*NAME\s*\([^)]*\)\s*(?::\s*[^{]+)?\{"
    }
}

impl CalleeLocator for Go {
    fn language(&self) -> &'static str {
        "go"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["go"]
    }

    fn definition_template(&self) -> &'static str {
        r"^\s*func\s+(?:\([^)]*\)\s*)?NAME\s*[(\[]"
    }
}

static LOCATORS: &[&dyn CalleeLocator] = &[&Python, &JavaKotlin, &RustLang, &JsTs, &Go];

/// Locator registered for the extension of `path`.
pub fn locator_for(path: &str) -> Option<&'static dyn CalleeLocator> {
    let file = path.rsplit('/').next().unwrap_or(path);
    let (_, ext) = file.rsplit_once('.')?;
    let ext = ext.to_ascii_lowercase();
    LOCATORS
        .iter()
        .copied()
        .find(|l| l.extensions().contains(&ext.as_str()))
}

/// A definition found in a repository file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Definition {
    pub path: String,
    /// 1-based line of the header.
    pub line: usize,
    pub text: String,
}

/// First definition of `name` in `content`.
pub fn find_definition(
    locator: &dyn CalleeLocator,
    path: &str,
    content: &str,
    name: &str,
) -> Option<Definition> {
    let re = locator.definition_regex(name)?;
    let lines: Vec<&str> = content.lines().collect();
    let start = lines.iter().position(|l| re.is_match(l))?;
    let end = locator.block_end(&lines, start).max(start);
    Some(Definition {
        path: path.to_string(),
        line: start + 1,
        text: lines[start..=end].join("\n"),
    })
}

/// Definitions of functions called from added lines, found in repository
/// files of the same language; at most `max_chars` characters in total.
pub fn collect_callee_context(
    diff_files: &BTreeMap<String, DiffFile>,
    repository_files: &[ChunkRecord],
    max_chars: usize,
) -> Option<String> {
    let mut wanted: Vec<(&'static dyn CalleeLocator, String)> = Vec::new();
    let mut seen: HashSet<(&'static str, String)> = HashSet::new();

    for (path, diff) in diff_files {
        let Some(locator) = locator_for(path) else {
            continue;
        };
        for line in added_lines(diff) {
            for name in locator.call_names(line) {
                let defines_it = locator
                    .definition_regex(&name)
                    .is_some_and(|re| re.is_match(line));
                if !defines_it && seen.insert((locator.language(), name.clone())) {
                    wanted.push((locator, name));
                }
            }
        }
    }
    debug!(callees = wanted.len(), files = repository_files.len(), "callee lookup");

    let mut out = String::new();
    let mut used = 0usize;
    'names: for (locator, name) in &wanted {
        for record in repository_files {
            let same_language =
                locator_for(&record.path).is_some_and(|l| l.language() == locator.language());
            if !same_language {
                continue;
            }
            let Some(def) = find_definition(*locator, &record.path, &record.content, name) else {
                continue;
            };
            let entry = format!("// {}:{}\n{}\n\n", def.path, def.line, def.text);
            let len = entry.chars().count();
            if used + len > max_chars {
                debug!(callee = %name, used, max_chars, "code context budget exhausted");
                break 'names;
            }
            used += len;
            out.push_str(&entry);
            continue 'names;
        }
    }

    (!out.is_empty()).then_some(out)
}

fn added_lines(diff: &DiffFile) -> impl Iterator<Item = &str> {
    diff.changed_spans()
        .into_iter()
        .flat_map(|span| span.start..span.start + span.len)
        .filter_map(|n| diff.line(n))
}

fn indent_of(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

fn brace_block_end(lines: &[&str], start: usize) -> usize {
    let limit = (start + MAX_DEFINITION_LINES).min(lines.len());
    let mut depth = 0i64;
    let mut opened = false;
    for (i, line) in lines.iter().enumerate().take(limit).skip(start) {
        for c in line.chars() {
            match c {
                '{' => {
                    depth += 1;
                    opened = true;
                }
                '}' => depth -= 1,
                _ => {}
            }
        }
        if opened && depth <= 0 {
            return i;
        }
        if !opened && (line.trim_end().ends_with(';') || i >= start + 4) {
            // declaration or expression body
            return i;
        }
    }
    limit.saturating_sub(1).max(start)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::DiffSection;

    #[test]
    fn extensions_map_to_locators() {
        assert_eq!(locator_for("a/b.py").map(|l| l.language()), Some("python"));
        assert_eq!(locator_for("Main.KT").map(|l| l.language()), Some("java"));
        assert_eq!(locator_for("src/x.tsx").map(|l| l.language()), Some("javascript"));
        assert!(locator_for("README").is_none());
        assert!(locator_for("notes.md").is_none());
    }

    #[test]
    fn python_definition_ends_at_dedent() {
        let src = "import os\n\ndef load(path):\n    with open(path) as f:\n        return f.read()\n\nx = load('a')\n";
        let d = find_definition(&Python, "util.py", src, "load").unwrap();
        assert_eq!(d.line, 3);
        assert_eq!(d.text, "def load(path):\n    with open(path) as f:\n        return f.read()");
    }

    #[test]
    fn brace_languages_end_at_matching_brace() {
        let src = "pub(crate) async fn fetch(url: &str) -> u8 {\n    if true {\n        1\n    } else { 2 }\n}\nfn other() {}\n";
        let d = find_definition(&RustLang, "net.rs", src, "fetch").unwrap();
        assert_eq!(d.text.lines().count(), 5);

        let go = "func (s *Server) Serve(addr string) error {\n\treturn nil\n}\n";
        assert_eq!(find_definition(&Go, "s.go", go, "Serve").unwrap().line, 1);
    }

    #[test]
    fn call_names_skip_keywords() {
        assert_eq!(
            RustLang.call_names("if ready(x) { return Some(parse(y)); }"),
            vec!["ready", "parse"]
        );
    }

    #[test]
    fn callees_of_added_lines_are_collected_within_budget() {
        let mut diffs = BTreeMap::new();
        diffs.insert(
            "app/main.py".to_string(),
            DiffFile::from_sections(
                "app/main.py",
                vec![
                    DiffSection::Unchanged(vec!["import util".into()]),
                    DiffSection::Changed {
                        removed: vec![],
                        added: vec!["data = util.load(name)".into()],
                    },
                ],
            ),
        );
        let repo = vec![
            ChunkRecord::new("lib/loader.js", "function load(p) {\n  return p;\n}\n"),
            ChunkRecord::new("app/util.py", "def load(name):\n    return name\n"),
        ];

        let ctx = collect_callee_context(&diffs, &repo, 1_000).unwrap();
        assert_eq!(ctx, "// app/util.py:1\ndef load(name):\n    return name\n\n");

        assert_eq!(collect_callee_context(&diffs, &repo, 10), None);
    }
}
