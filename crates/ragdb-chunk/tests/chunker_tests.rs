use ragdb_chunk::{estimate_tokens, CodeChunker, Language};
use ragdb_core::config::ChunkerConfig;
use ragdb_core::types::{Chunk, ChunkType, DocumentPayload, SymbolKind};

fn small(max_tokens: usize, min_tokens: usize) -> ChunkerConfig {
    ChunkerConfig { max_tokens, min_tokens, overlap_ratio: 0.15 }
}

fn ids(chunks: &[Chunk]) -> Vec<&str> { chunks.iter().map(|c| c.metadata.chunk_id.as_str()).collect() }

const PYTHON: &str = "import os
import sys

def add(a, b):
    return a + b


class Greeter:
    def greet(self):
        return \"hi\"
";

#[test]
fn python_declarations_become_chunks() {
    let chunker = CodeChunker::new(ChunkerConfig::default());
    let (chunks, symbols) = chunker.chunk(PYTHON, "python");
    assert_eq!(ids(&chunks), ["import_1", "func_add_4", "class_Greeter_8"]);
    assert_eq!(chunks[0].text, "import os\nimport sys");
    assert_eq!(chunks[1].metadata.chunk_type, ChunkType::Function);
    assert_eq!((chunks[1].metadata.start_line, chunks[1].metadata.end_line), (4, 6));
    assert_eq!(chunks[2].metadata.name.as_deref(), Some("Greeter"));
    assert!(chunks.iter().all(|c| c.metadata.language == "python"));

    assert_eq!(symbols["add"].kind, SymbolKind::Function);
    assert_eq!(symbols["add"].chunk_index, 1);
    assert_eq!(symbols["Greeter"].start_line, 8);
}

#[test]
fn heuristics_agree_with_the_parser_on_simple_python() {
    let parsed = CodeChunker::new(ChunkerConfig::default()).chunk(PYTHON, "py");
    let heuristic = CodeChunker::heuristic_only(ChunkerConfig::default()).chunk(PYTHON, "py");
    assert_eq!(parsed, heuristic);
}

#[test]
fn broken_python_degrades_without_failing() {
    let src = "def broken(:\n    pass\n\ndef ok():\n    return 1\n";
    let (chunks, symbols) = CodeChunker::new(ChunkerConfig::default()).chunk(src, "python");
    assert!(ids(&chunks).contains(&"func_ok_4"));
    assert!(symbols.contains_key("ok"));
}

#[test]
fn javascript_functions_arrows_and_classes() {
    let src = r#"import { a } from "./a";
export function hello(name) {
  return `hi ${name}`;
}
const add = (x, y) => {
  return x + y;
};
class Box {
  constructor(v) { this.v = v; }
}
"#;
    let (chunks, symbols) = CodeChunker::new(ChunkerConfig::default()).chunk(src, "javascript");
    let names: Vec<&String> = symbols.keys().collect();
    assert_eq!(names, ["Box", "add", "hello"]);
    assert_eq!(symbols["Box"].kind, SymbolKind::Class);
    assert_eq!(chunks[0].metadata.chunk_type, ChunkType::Import);
    assert_eq!(chunks.len(), 4);
}

#[test]
fn cpp_uses_regex_family() {
    let src = "#include <vector>
#include <string>

struct Point {
  int x;
  int y;
};

int area(int w, int h) {
  return w * h;
}
";
    let (chunks, _) = CodeChunker::new(ChunkerConfig::default()).chunk(src, "cpp");
    assert_eq!(ids(&chunks), ["import_1", "class_Point_4", "func_area_9"]);
    assert_eq!(chunks[1].metadata.end_line, 8);
}

#[test]
fn rust_items_are_structural() {
    let src = "use std::fmt;

pub struct Point { x: i32 }

impl Point {
    pub fn new() -> Self { Point { x: 0 } }
}

fn main() {}
";
    let (chunks, symbols) = CodeChunker::new(ChunkerConfig::default()).chunk(src, "rs");
    assert_eq!(ids(&chunks), ["import_1", "class_Point_3", "class_Point_5", "func_main_9"]);
    assert_eq!(symbols["Point"].start_line, 3);
}

#[test]
fn oversized_declaration_is_split_into_parts() {
    let mut src = String::from("def big(a, b, c):\n");
    for _ in 0..200 {
        src.push_str("    x = compute(a, b, c)\n");
    }
    let (chunks, symbols) = CodeChunker::new(small(64, 16)).chunk(&src, "python");
    assert!(chunks.len() > 1);
    let total = chunks.len();
    for (i, chunk) in chunks.iter().enumerate() {
        assert_eq!(chunk.metadata.chunk_type, ChunkType::Function);
        assert_eq!(chunk.metadata.name.as_deref(), Some("big"));
        assert_eq!(chunk.metadata.part, Some((i, total)));
        assert_eq!(chunk.metadata.chunk_id, format!("func_big_1_part{i}"));
        assert!(chunk.metadata.tokens <= 64);
    }
    assert_eq!(symbols["big"].chunk_index, 0);
}

#[test]
fn generic_chunks_cover_the_document_without_gaps() {
    let src: String = (0..300).map(|i| format!("line {i} has some plain words\n")).collect();
    let (chunks, _) = CodeChunker::new(small(64, 16)).chunk(&src, "text");
    assert!(chunks.len() > 1);
    assert_eq!(chunks[0].metadata.start_line, 1);
    for pair in chunks.windows(2) {
        assert!(pair[1].metadata.start_line <= pair[0].metadata.end_line, "gap between chunks");
        assert!(pair[1].metadata.start_line > pair[0].metadata.start_line, "no progress");
    }
    assert_eq!(chunks.last().map(|c| c.metadata.end_line), Some(301));
    for chunk in &chunks {
        assert!(chunk.metadata.start_line < chunk.metadata.end_line);
        assert_eq!(chunk.metadata.chunk_type, ChunkType::Generic);
        assert!(chunk.metadata.tokens <= 64);
    }
}

#[test]
fn short_tail_is_extended_backwards() {
    // 6 words per line = 8 tokens; 4 lines fill a 32-token chunk.
    let src: String = (0..10).map(|_| "alpha beta gamma delta epsilon zeta\n").collect();
    let (chunks, _) = CodeChunker::new(small(32, 20)).chunk(&src, "text");
    let last = chunks.last().unwrap();
    assert_eq!((last.metadata.start_line, last.metadata.end_line), (8, 11));
    assert_eq!(last.metadata.tokens, 24);
}

#[test]
fn chunking_is_deterministic() {
    let chunker = CodeChunker::new(small(48, 10));
    let src: String = (0..80).map(|i| format!("def f{i}():\n    return {i}\n\n")).collect();
    assert_eq!(chunker.chunk(&src, "python"), chunker.chunk(&src, "python"));
}

#[test]
fn empty_input_gives_no_chunks() {
    let chunker = CodeChunker::new(ChunkerConfig::default());
    assert!(chunker.chunk("", "python").0.is_empty());
    assert!(chunker.chunk("  \n\n", "java").0.is_empty());
}

#[test]
fn documents_use_their_extension() {
    let chunker = CodeChunker::new(ChunkerConfig::default());
    let (chunks, _) = chunker.chunk_document(&DocumentPayload::new("notes/readme.md", "# Title\n\nSome text"));
    assert_eq!(ids(&chunks), ["generic_1_4"]);
    assert_eq!(chunks[0].metadata.language, "markdown");

    let (chunks, _) = chunker.chunk("hello world", "cobol");
    assert_eq!(chunks[0].metadata.language, "cobol");
}

#[test]
fn language_detection() {
    assert_eq!(Language::from_path("a/b.tsx"), Language::TypeScript);
    assert_eq!(Language::from_path("a/b.cjs"), Language::JavaScript);
    assert_eq!(Language::from_path("x.HPP"), Language::Cpp);
    assert_eq!(Language::from_path("Makefile"), Language::Generic);
    assert_eq!(Language::from_hint("Python"), Language::Python);
    assert_eq!(Language::from_hint(".rs"), Language::Rust);
}

#[test]
fn stats_list_languages_and_families() {
    let stats = CodeChunker::new(ChunkerConfig::default()).stats();
    assert_eq!(stats.structural_languages, ["python", "javascript", "typescript", "java", "rust"]);
    assert_eq!(stats.heuristic_families, ["python", "javascript", "java", "cpp"]);
    assert!(CodeChunker::heuristic_only(ChunkerConfig::default()).stats().structural_languages.is_empty());
}

#[test]
fn token_estimate_rounds_up() {
    assert_eq!(estimate_tokens(""), 0);
    assert_eq!(estimate_tokens("one two three"), 4);
    assert_eq!(estimate_tokens("one"), 2);
}
