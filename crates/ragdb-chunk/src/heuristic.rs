//! Regex declaration finders for when no usable parse tree exists.
//!
//! Python blocks end at the next non-blank line back at column 0. Brace
//! languages end where the brace depth opened on the declaration line
//! returns to zero; a declaration line that never opens a brace ends at its
//! own `;` (forward declarations, expression-bodied arrows).

use std::sync::LazyLock;

use regex::Regex;

use ragdb_core::types::ChunkType;

use crate::language::Family;
use crate::structural::Declaration;

struct Pattern {
    kind: ChunkType,
    regex: Regex,
    /// Capture group holding the declared name.
    name_group: &'static str,
}

fn pattern(kind: ChunkType, re: &str) -> Option<Pattern> {
    // Patterns are literals below; a bad one only disables itself.
    Regex::new(re).ok().map(|regex| Pattern { kind, regex, name_group: "name" })
}

static PYTHON: LazyLock<Vec<Pattern>> = LazyLock::new(|| {
    [
        pattern(ChunkType::Function, r"^(?:async\s+)?def\s+(?P<name>\w+)\s*\("),
        pattern(ChunkType::Class, r"^class\s+(?P<name>\w+)\s*[:(]"),
        pattern(ChunkType::Import, r"^(?:import\s+\w|from\s+[\w.]+\s+import\b)"),
    ]
    .into_iter()
    .flatten()
    .collect()
});

static JAVASCRIPT: LazyLock<Vec<Pattern>> = LazyLock::new(|| {
    [
        pattern(ChunkType::Function, r"^(?:export\s+)?(?:default\s+)?(?:async\s+)?function\*?\s+(?P<name>\w+)\s*[(<]"),
        pattern(ChunkType::Class, r"^(?:export\s+)?(?:default\s+)?(?:abstract\s+)?(?:class|interface)\s+(?P<name>\w+)"),
        pattern(
            ChunkType::Function,
            r"^(?:export\s+)?(?:const|let|var)\s+(?P<name>\w+)\s*(?::[^=]+)?=\s*(?:async\s+)?(?:\([^)]*\)|\w+)\s*(?::\s*[^=]+)?=>",
        ),
        pattern(ChunkType::Import, r"^import\s"),
    ]
    .into_iter()
    .flatten()
    .collect()
});

static JAVA: LazyLock<Vec<Pattern>> = LazyLock::new(|| {
    [
        pattern(
            ChunkType::Class,
            r"^\s*(?:(?:public|private|protected|abstract|static|final|sealed)\s+)*(?:class|interface|enum|record)\s+(?P<name>\w+)",
        ),
        pattern(
            ChunkType::Function,
            r"^\s*(?:(?:public|private|protected|static|final|abstract|synchronized)\s+)+[\w<>\[\],\s]*?\s*(?P<name>\w+)\s*\([^)]*\)\s*(?:throws\s+[\w.,\s]+)?\{?\s*$",
        ),
        pattern(ChunkType::Import, r"^import\s+[\w.*]+;"),
    ]
    .into_iter()
    .flatten()
    .collect()
});

static CPP: LazyLock<Vec<Pattern>> = LazyLock::new(|| {
    [
        pattern(ChunkType::Class, r"^(?:template\s*<[^>]*>\s*)?(?:class|struct)\s+(?P<name>\w+)"),
        pattern(ChunkType::Function, r"^(?:[\w:<>*&]+\s+)+\**(?P<name>[\w:~]+)\s*\([^;]*\)\s*(?:const\s*)?\{"),
        pattern(ChunkType::Import, r"^#\s*include\s"),
    ]
    .into_iter()
    .flatten()
    .collect()
});

fn patterns(family: Family) -> &'static [Pattern] {
    match family {
        Family::Python => &PYTHON,
        Family::JavaScript => &JAVASCRIPT,
        Family::Java => &JAVA,
        Family::Cpp => &CPP,
    }
}

/// Declarations in source order. Nested matches inside an earlier
/// declaration's span are skipped.
pub fn declarations(content: &str, family: Family) -> Vec<Declaration> {
    let lines: Vec<&str> = content.lines().collect();
    let mut out = Vec::new();
    let mut i = 0;
    while i < lines.len() {
        let Some((kind, name)) = match_line(lines[i], family) else {
            i += 1;
            continue;
        };
        let start = decorator_start(&lines, i, family);
        let end = match (family, kind) {
            (Family::Python, ChunkType::Import) => paren_end(&lines, i),
            (Family::JavaScript, ChunkType::Import) if lines[i].contains('{') => brace_block_end(&lines, i),
            (_, ChunkType::Import) => i + 1,
            (Family::Python, _) => python_block_end(&lines, i),
            _ => brace_block_end(&lines, i),
        };
        out.push(Declaration { kind, name, start_line: start + 1, end_line: end + 1 });
        i = end.max(i + 1);
    }
    out
}

fn match_line(line: &str, family: Family) -> Option<(ChunkType, Option<String>)> {
    patterns(family).iter().find_map(|p| {
        p.regex.captures(line).map(|c| (p.kind, c.name(p.name_group).map(|m| m.as_str().to_string())))
    })
}

/// Pulls Python decorators and Java annotations directly above `i` into the
/// declaration.
fn decorator_start(lines: &[&str], i: usize, family: Family) -> usize {
    if !matches!(family, Family::Python | Family::Java) {
        return i;
    }
    let mut start = i;
    while start > 0 && lines[start - 1].trim_start().starts_with('@') {
        start -= 1;
    }
    start
}

fn python_block_end(lines: &[&str], start: usize) -> usize {
    let mut end = start + 1;
    let mut last_content = start + 1;
    while end < lines.len() {
        let line = lines[end];
        if !line.trim().is_empty() {
            let top_level = !line.starts_with([' ', '\t']);
            if top_level && !line.starts_with([')', ']', '}']) {
                break;
            }
            last_content = end + 1;
        }
        end += 1;
    }
    last_content
}

/// `from x import (` continues until the closing paren.
fn paren_end(lines: &[&str], start: usize) -> usize {
    if !lines[start].contains('(') || lines[start].contains(')') {
        return start + 1;
    }
    lines[start + 1..].iter().position(|l| l.contains(')')).map_or(lines.len(), |p| start + p + 2)
}

fn brace_block_end(lines: &[&str], start: usize) -> usize {
    let mut depth: i64 = 0;
    let mut opened = false;
    for (offset, line) in lines[start..].iter().enumerate() {
        for c in code_chars(line) {
            match c {
                '{' => { depth += 1; opened = true; }
                '}' => depth -= 1,
                _ => {}
            }
        }
        if opened && depth <= 0 {
            return start + offset + 1;
        }
        if !opened && line.trim_end().ends_with(';') {
            return start + offset + 1;
        }
    }
    lines.len()
}

/// Characters outside string literals and `//` comments.
fn code_chars(line: &str) -> impl Iterator<Item = char> + '_ {
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut prev = '\0';
    let mut comment = false;
    line.chars().filter(move |&c| {
        if comment {
            return false;
        }
        let keep = match quote {
            Some(q) => {
                if escaped {
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == q {
                    quote = None;
                }
                false
            }
            None if c == '"' || c == '\'' || c == '`' => {
                quote = Some(c);
                false
            }
            None if c == '/' && prev == '/' => {
                comment = true;
                false
            }
            None => true,
        };
        prev = c;
        keep
    })
}
