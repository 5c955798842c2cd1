use std::collections::HashMap;

use serde::Serialize;
use tracing::debug;

use ragdb_core::config::ChunkerConfig;
use ragdb_core::types::{Chunk, ChunkMetadata, ChunkType, DocumentPayload, SymbolInfo, SymbolKind, SymbolMap};

use crate::generic::{estimate_tokens, split_lines};
use crate::heuristic;
use crate::language::{Family, Language};
use crate::structural::{Declaration, StructuralChunker, TreeSitterChunker};

#[derive(Debug, Clone, Serialize)]
pub struct ChunkerStats {
    pub structural_languages: Vec<&'static str>,
    pub heuristic_families: Vec<&'static str>,
    pub max_tokens: usize,
    pub min_tokens: usize,
    pub overlap_ratio: f32,
}

/// Splits documents into declaration-aligned chunks.
///
/// Strategy per language: structural parser if one is registered and the
/// parse is clean, else the regex family, else fixed-size generic splitting.
pub struct CodeChunker {
    config: ChunkerConfig,
    structural: HashMap<Language, Box<dyn StructuralChunker>>,
}

impl CodeChunker {
    /// Registers every compiled-in tree-sitter grammar.
    pub fn new(config: ChunkerConfig) -> Self {
        let mut chunker = Self::heuristic_only(config);
        for parser in TreeSitterChunker::all() {
            chunker.register(Box::new(parser));
        }
        chunker
    }

    /// No structural parsers; declarations come from the regex families.
    pub fn heuristic_only(config: ChunkerConfig) -> Self { Self { config, structural: HashMap::new() } }

    pub fn register(&mut self, parser: Box<dyn StructuralChunker>) { self.structural.insert(parser.language(), parser); }

    pub fn config(&self) -> &ChunkerConfig { &self.config }

    /// Language inferred from the payload path.
    pub fn chunk_document(&self, payload: &DocumentPayload) -> (Vec<Chunk>, SymbolMap) {
        let language = Language::from_path(&payload.path);
        self.chunk_as(payload.content.as_deref().unwrap_or_default(), language, language.as_str())
    }

    /// `language_hint` is a language name or file extension; an unknown hint
    /// gets generic chunking and is kept verbatim in chunk metadata.
    pub fn chunk(&self, content: &str, language_hint: &str) -> (Vec<Chunk>, SymbolMap) {
        let language = Language::from_hint(language_hint);
        let label = if language == Language::Generic && !language_hint.trim().is_empty() {
            language_hint.trim().to_ascii_lowercase()
        } else {
            language.as_str().to_string()
        };
        self.chunk_as(content, language, &label)
    }

    fn chunk_as(&self, content: &str, language: Language, label: &str) -> (Vec<Chunk>, SymbolMap) {
        if content.trim().is_empty() {
            return (Vec::new(), SymbolMap::new());
        }
        let lines: Vec<&str> = content.lines().collect();
        let decls = normalize(self.declarations(content, language), &lines);

        let mut builder = Builder { config: &self.config, lines: &lines, language: label, chunks: Vec::new(), symbols: SymbolMap::new() };
        let mut cursor = 1;
        for decl in &decls {
            builder.gap(cursor, decl.start_line);
            builder.declaration(decl);
            cursor = decl.end_line;
        }
        builder.gap(cursor, lines.len() + 1);
        (builder.chunks, builder.symbols)
    }

    fn declarations(&self, content: &str, language: Language) -> Vec<Declaration> {
        if let Some(parser) = self.structural.get(&language) {
            match parser.declarations(content) {
                Some(decls) => return decls,
                None => debug!(language = %language, "structural parse unusable, degrading to heuristic chunking"),
            }
        }
        match language.heuristic_family() {
            Some(family) => {
                let decls = heuristic::declarations(content, family);
                if decls.is_empty() {
                    debug!(language = %language, "no declarations recognized, using generic chunking");
                }
                decls
            }
            None => Vec::new(),
        }
    }

    pub fn supported_languages(&self) -> Vec<&'static str> {
        let mut langs: Vec<Language> = self.structural.keys().copied().collect();
        langs.sort();
        langs.into_iter().map(Language::as_str).collect()
    }

    pub fn stats(&self) -> ChunkerStats {
        ChunkerStats {
            structural_languages: self.supported_languages(),
            heuristic_families: Family::ALL.iter().map(|f| f.as_str()).collect(),
            max_tokens: self.config.max_tokens,
            min_tokens: self.config.min_tokens,
            overlap_ratio: self.config.overlap_ratio,
        }
    }
}

/// Sorts, clamps to the document, drops overlaps (the earlier declaration
/// wins) and merges runs of imports separated only by blank lines.
fn normalize(mut decls: Vec<Declaration>, lines: &[&str]) -> Vec<Declaration> {
    let line_count = lines.len();
    decls.sort_by_key(|d| d.start_line);
    let mut out: Vec<Declaration> = Vec::with_capacity(decls.len());
    for mut decl in decls {
        decl.end_line = decl.end_line.min(line_count + 1);
        if decl.start_line < 1 || decl.start_line >= decl.end_line {
            continue;
        }
        if let Some(prev) = out.last_mut() {
            if decl.start_line < prev.end_line {
                continue;
            }
            let blank_between = lines[prev.end_line - 1..decl.start_line - 1].iter().all(|l| l.trim().is_empty());
            if prev.kind == ChunkType::Import && decl.kind == ChunkType::Import && blank_between {
                prev.end_line = decl.end_line;
                continue;
            }
        }
        out.push(decl);
    }
    out
}

struct Builder<'a> {
    config: &'a ChunkerConfig,
    lines: &'a [&'a str],
    language: &'a str,
    chunks: Vec<Chunk>,
    symbols: SymbolMap,
}

impl Builder<'_> {
    fn text(&self, start_line: usize, end_line: usize) -> String { self.lines[start_line - 1..end_line - 1].join("\n") }

    /// Generic chunks over `[start_line, end_line)`; blank-only stretches
    /// produce nothing.
    fn gap(&mut self, start_line: usize, end_line: usize) {
        if start_line >= end_line || self.text(start_line, end_line).trim().is_empty() {
            return;
        }
        for span in split_lines(&self.lines[start_line - 1..end_line - 1], self.config) {
            let (s, e) = (start_line + span.start, start_line + span.end);
            let text = self.text(s, e);
            if text.trim().is_empty() {
                continue;
            }
            self.push(text, ChunkType::Generic, format!("generic_{s}_{e}"), None, s, e, None);
        }
    }

    fn declaration(&mut self, decl: &Declaration) {
        let text = self.text(decl.start_line, decl.end_line);
        let stem = match decl.kind {
            ChunkType::Function => format!("func_{}_{}", decl.name.as_deref().unwrap_or("anonymous"), decl.start_line),
            ChunkType::Class => format!("class_{}_{}", decl.name.as_deref().unwrap_or("anonymous"), decl.start_line),
            ChunkType::Import => format!("import_{}", decl.start_line),
            ChunkType::Generic => format!("generic_{}_{}", decl.start_line, decl.end_line),
        };

        let first_index = self.chunks.len();
        if estimate_tokens(&text) <= self.config.max_tokens {
            self.push(text, decl.kind, stem, decl.name.clone(), decl.start_line, decl.end_line, None);
        } else {
            let spans = split_lines(&self.lines[decl.start_line - 1..decl.end_line - 1], self.config);
            let total = spans.len();
            for (i, span) in spans.into_iter().enumerate() {
                let (s, e) = (decl.start_line + span.start, decl.start_line + span.end);
                let part_text = self.text(s, e);
                self.push(part_text, decl.kind, format!("{stem}_part{i}"), decl.name.clone(), s, e, Some((i, total)));
            }
        }

        let kind = match decl.kind {
            ChunkType::Function => SymbolKind::Function,
            ChunkType::Class => SymbolKind::Class,
            _ => return,
        };
        if let Some(name) = &decl.name {
            self.symbols
                .entry(name.clone())
                .or_insert(SymbolInfo { kind, start_line: decl.start_line, chunk_index: first_index });
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn push(
        &mut self,
        text: String,
        chunk_type: ChunkType,
        chunk_id: String,
        name: Option<String>,
        start_line: usize,
        end_line: usize,
        part: Option<(usize, usize)>,
    ) {
        let tokens = estimate_tokens(&text);
        let metadata = ChunkMetadata { chunk_id, chunk_type, start_line, end_line, language: self.language.to_string(), name, part, tokens };
        self.chunks.push(Chunk { text, metadata });
    }
}
