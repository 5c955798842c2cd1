use std::fmt;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Language {
    Python,
    JavaScript,
    TypeScript,
    Java,
    Rust,
    Cpp,
    Markdown,
    Text,
    Generic,
}

impl Language {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::JavaScript => "javascript",
            Self::TypeScript => "typescript",
            Self::Java => "java",
            Self::Rust => "rust",
            Self::Cpp => "cpp",
            Self::Markdown => "markdown",
            Self::Text => "text",
            Self::Generic => "generic",
        }
    }

    /// Extension without the dot, any case.
    pub fn from_extension(ext: &str) -> Self {
        match ext.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "py" => Self::Python,
            "ts" | "tsx" => Self::TypeScript,
            "js" | "jsx" | "mjs" | "cjs" => Self::JavaScript,
            "java" => Self::Java,
            "rs" => Self::Rust,
            "c" | "cc" | "cpp" | "cxx" | "h" | "hpp" => Self::Cpp,
            "md" | "markdown" => Self::Markdown,
            "txt" => Self::Text,
            _ => Self::Generic,
        }
    }

    pub fn from_path(path: impl AsRef<Path>) -> Self {
        path.as_ref().extension().and_then(|e| e.to_str()).map_or(Self::Generic, Self::from_extension)
    }

    /// Accepts a language name (`python`, `js`, `c++`) or an extension.
    pub fn from_hint(hint: &str) -> Self {
        match hint.trim().to_ascii_lowercase().as_str() {
            "python" => Self::Python,
            "javascript" => Self::JavaScript,
            "typescript" => Self::TypeScript,
            "rust" => Self::Rust,
            "c++" | "c" => Self::Cpp,
            "text" | "plaintext" => Self::Text,
            other => Self::from_extension(other),
        }
    }

    /// Regex family used when no structural parse is available.
    pub fn heuristic_family(self) -> Option<Family> {
        match self {
            Self::Python => Some(Family::Python),
            Self::JavaScript | Self::TypeScript => Some(Family::JavaScript),
            Self::Java => Some(Family::Java),
            Self::Cpp => Some(Family::Cpp),
            Self::Rust | Self::Markdown | Self::Text | Self::Generic => None,
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    Python,
    JavaScript,
    Java,
    Cpp,
}

impl Family {
    pub const ALL: [Family; 4] = [Family::Python, Family::JavaScript, Family::Java, Family::Cpp];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::JavaScript => "javascript",
            Self::Java => "java",
            Self::Cpp => "cpp",
        }
    }
}
