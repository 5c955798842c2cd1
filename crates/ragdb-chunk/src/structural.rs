//! Structural (parse-tree) declaration finders.

use tracing::debug;
use tree_sitter::{Node, Parser};

use ragdb_core::types::ChunkType;

use crate::language::Language;

/// A top-level declaration: 1-based lines, `end_line` exclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration {
    pub kind: ChunkType,
    pub name: Option<String>,
    pub start_line: usize,
    pub end_line: usize,
}

/// Finds declarations from a real parse. `None` means the parse was not
/// usable (syntax errors or parser failure) and the caller should degrade.
pub trait StructuralChunker: Send + Sync {
    fn language(&self) -> Language;
    fn declarations(&self, content: &str) -> Option<Vec<Declaration>>;
}

struct NodeKinds {
    functions: &'static [&'static str],
    classes: &'static [&'static str],
    imports: &'static [&'static str],
    /// Wrappers whose inner declaration decides the kind (`export`, decorators).
    wrappers: &'static [&'static str],
    /// `const f = () => {}` style bindings.
    bindings: &'static [&'static str],
}

const PYTHON: NodeKinds = NodeKinds {
    functions: &["function_definition"],
    classes: &["class_definition"],
    imports: &["import_statement", "import_from_statement", "future_import_statement"],
    wrappers: &["decorated_definition"],
    bindings: &[],
};

const JAVASCRIPT: NodeKinds = NodeKinds {
    functions: &["function_declaration", "generator_function_declaration"],
    classes: &["class_declaration", "abstract_class_declaration", "interface_declaration"],
    imports: &["import_statement"],
    wrappers: &["export_statement"],
    bindings: &["lexical_declaration", "variable_declaration"],
};

const JAVA: NodeKinds = NodeKinds {
    functions: &["method_declaration", "constructor_declaration"],
    classes: &["class_declaration", "interface_declaration", "enum_declaration", "record_declaration"],
    imports: &["import_declaration"],
    wrappers: &[],
    bindings: &[],
};

const RUST: NodeKinds = NodeKinds {
    functions: &["function_item"],
    classes: &["struct_item", "enum_item", "trait_item", "impl_item", "mod_item", "union_item"],
    imports: &["use_declaration", "extern_crate_declaration"],
    wrappers: &[],
    bindings: &[],
};

pub struct TreeSitterChunker {
    language: Language,
    grammar: tree_sitter::Language,
    kinds: &'static NodeKinds,
}

impl TreeSitterChunker {
    pub fn python() -> Self { Self { language: Language::Python, grammar: tree_sitter_python::LANGUAGE.into(), kinds: &PYTHON } }

    pub fn javascript() -> Self {
        Self { language: Language::JavaScript, grammar: tree_sitter_javascript::LANGUAGE.into(), kinds: &JAVASCRIPT }
    }

    pub fn typescript() -> Self {
        Self { language: Language::TypeScript, grammar: tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(), kinds: &JAVASCRIPT }
    }

    pub fn java() -> Self { Self { language: Language::Java, grammar: tree_sitter_java::LANGUAGE.into(), kinds: &JAVA } }

    pub fn rust() -> Self { Self { language: Language::Rust, grammar: tree_sitter_rust::LANGUAGE.into(), kinds: &RUST } }

    /// Every grammar compiled into this crate.
    pub fn all() -> Vec<Self> { vec![Self::python(), Self::javascript(), Self::typescript(), Self::java(), Self::rust()] }

    fn classify(&self, node: Node<'_>, src: &[u8]) -> Option<(ChunkType, Option<String>)> {
        let kind = node.kind();
        let k = self.kinds;
        if k.functions.contains(&kind) {
            return Some((ChunkType::Function, field_text(node, "name", src)));
        }
        if k.classes.contains(&kind) {
            let name = field_text(node, "name", src).or_else(|| field_text(node, "type", src));
            return Some((ChunkType::Class, name));
        }
        if k.imports.contains(&kind) {
            return Some((ChunkType::Import, None));
        }
        if k.wrappers.contains(&kind) {
            let inner = node.child_by_field_name("definition").or_else(|| node.child_by_field_name("declaration"))?;
            return self.classify(inner, src);
        }
        if k.bindings.contains(&kind) {
            let mut cursor = node.walk();
            for declarator in node.named_children(&mut cursor) {
                let is_fn = declarator
                    .child_by_field_name("value")
                    .is_some_and(|v| matches!(v.kind(), "arrow_function" | "function_expression" | "function"));
                if is_fn {
                    return Some((ChunkType::Function, field_text(declarator, "name", src)));
                }
            }
        }
        None
    }
}

impl StructuralChunker for TreeSitterChunker {
    fn language(&self) -> Language { self.language }

    fn declarations(&self, content: &str) -> Option<Vec<Declaration>> {
        let mut parser = Parser::new();
        if let Err(e) = parser.set_language(&self.grammar) {
            debug!(language = %self.language, error = ?e, "tree-sitter grammar rejected");
            return None;
        }
        let tree = parser.parse(content, None)?;
        let root = tree.root_node();
        if root.has_error() {
            return None;
        }

        let src = content.as_bytes();
        let mut out = Vec::new();
        let mut cursor = root.walk();
        for node in root.named_children(&mut cursor) {
            if let Some((kind, name)) = self.classify(node, src) {
                let end = node.end_position();
                // Exclusive end: a node ending at column 0 does not own that row.
                let end_line = if end.column == 0 { end.row + 1 } else { end.row + 2 };
                out.push(Declaration { kind, name, start_line: node.start_position().row + 1, end_line });
            }
        }
        Some(out)
    }
}

fn field_text(node: Node<'_>, field: &str, src: &[u8]) -> Option<String> {
    node.child_by_field_name(field).and_then(|n| n.utf8_text(src).ok()).map(str::to_string)
}
