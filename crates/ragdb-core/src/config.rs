use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

use crate::error::{Error, Result};

/// Layered configuration source.
pub struct Config {
    figment: Figment,
}

impl Config {
    pub fn load() -> Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());

        let mut figment = Figment::from(Serialized::defaults(RagConfig::default()))
            .merge(Toml::file("config.toml"));
        match env_name.as_str() {
            "dev" | "development" => figment = figment.merge(Toml::file("config.dev.toml")),
            "prod" | "production" => figment = figment.merge(Toml::file("config.prod.toml")),
            "test" | "testing" => figment = figment.merge(Toml::file("config.test.toml")),
            _ => {}
        }
        figment = figment.merge(Env::prefixed("APP_").split("__"));
        Ok(Self { figment })
    }

    pub fn from_figment(figment: Figment) -> Self { Self { figment } }

    pub fn get<T>(&self, key: &str) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.figment
            .extract_inner(key)
            .map_err(|e| Error::config(format!("Failed to get '{key}': {e}")))
    }

    /// Typed settings with the flat process env keys applied on top, validated.
    pub fn settings(&self) -> Result<RagConfig> {
        let mut settings: RagConfig = self
            .figment
            .extract()
            .map_err(|e| Error::config(format!("Failed to extract settings: {e}")))?;
        settings.apply_env(|key| env::var(key).ok())?;
        settings.validate()?;
        Ok(settings)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    LocalServer,
    SentenceEncoder,
    CloudApi,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub name: String,
    pub provider: ProviderKind,
    pub enabled: bool,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub model_path: Option<String>,
    pub default_model: String,
    pub timeout_seconds: f64,
    pub max_retries: i64,
    pub retry_delay: f64,
    pub max_concurrent_requests: usize,
    pub batch_size: usize,
    pub priority: i32,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            provider: ProviderKind::LocalServer,
            enabled: true,
            base_url: None,
            api_key: None,
            model_path: None,
            default_model: String::new(),
            timeout_seconds: 30.0,
            max_retries: 3,
            retry_delay: 1.0,
            max_concurrent_requests: 8,
            batch_size: 16,
            priority: 1,
        }
    }
}

impl BackendConfig {
    pub fn new(name: impl Into<String>, provider: ProviderKind) -> Self {
        Self { name: name.into(), provider, ..Self::default() }
    }

    fn validation_errors(&self, out: &mut Vec<String>) {
        let missing = |v: &Option<String>| v.as_deref().map_or(true, |s| s.trim().is_empty());
        match self.provider {
            ProviderKind::LocalServer | ProviderKind::CloudApi if missing(&self.base_url) => {
                out.push(format!("base_url is required for {}", self.name));
            }
            _ => {}
        }
        if self.provider == ProviderKind::CloudApi && missing(&self.api_key) {
            out.push(format!("api_key is required for {}", self.name));
        }
        if self.timeout_seconds <= 0.0 {
            out.push(format!("timeout_seconds must be positive ({})", self.name));
        }
        if self.max_retries < 0 {
            out.push(format!("max_retries must be non-negative ({})", self.name));
        }
        if self.retry_delay < 0.0 {
            out.push(format!("retry_delay must be non-negative ({})", self.name));
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingBackendsConfig {
    pub enabled: bool,
    pub mock_mode: bool,
    pub allow_fallback: bool,
    pub default_backend: Option<String>,
    pub mock_dimension: usize,
    pub cache_capacity: u64,
    pub backends: Vec<BackendConfig>,
}

impl Default for EmbeddingBackendsConfig {
    fn default() -> Self {
        let ollama = BackendConfig {
            base_url: Some("http://localhost:11434".into()),
            default_model: "embeddinggemma:latest".into(),
            priority: 1,
            ..BackendConfig::new("ollama", ProviderKind::LocalServer)
        };
        let sentence = BackendConfig {
            default_model: "bge-m3".into(),
            priority: 2,
            ..BackendConfig::new("sentence_transformers", ProviderKind::SentenceEncoder)
        };
        let openai = BackendConfig {
            enabled: false,
            base_url: Some("https://api.openai.com/v1".into()),
            default_model: "text-embedding-3-small".into(),
            priority: 3,
            ..BackendConfig::new("openai", ProviderKind::CloudApi)
        };
        let huggingface = BackendConfig {
            enabled: false,
            base_url: Some("https://api-inference.huggingface.co".into()),
            default_model: "sentence-transformers/all-MiniLM-L6-v2".into(),
            priority: 4,
            ..BackendConfig::new("huggingface", ProviderKind::CloudApi)
        };
        Self {
            enabled: true,
            mock_mode: false,
            allow_fallback: true,
            default_backend: Some("ollama".into()),
            mock_dimension: 1024,
            cache_capacity: 1000,
            backends: vec![ollama, sentence, openai, huggingface],
        }
    }
}

impl EmbeddingBackendsConfig {
    /// Every problem found, in a stable order. Empty means valid.
    pub fn validation_errors(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if !self.mock_mode && !self.backends.iter().any(|b| b.enabled) {
            errors.push("At least one backend must be enabled".to_string());
        }
        if self.mock_dimension == 0 {
            errors.push("mock_dimension must be positive".to_string());
        }
        for backend in self.backends.iter().filter(|b| b.enabled) {
            backend.validation_errors(&mut errors);
        }
        errors
    }

    pub fn validate(&self) -> Result<()> {
        let errors = self.validation_errors();
        if errors.is_empty() { Ok(()) } else { Err(Error::InvalidConfig { errors }) }
    }

    pub fn backend(&self, name: &str) -> Option<&BackendConfig> {
        self.backends.iter().find(|b| b.name == name)
    }

    pub fn backend_mut(&mut self, name: &str) -> Option<&mut BackendConfig> {
        self.backends.iter_mut().find(|b| b.name == name)
    }

    pub fn reset(&mut self) { *self = Self::default(); }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkerConfig {
    pub max_tokens: usize,
    pub min_tokens: usize,
    pub overlap_ratio: f32,
}

impl Default for ChunkerConfig {
    fn default() -> Self { Self { max_tokens: 512, min_tokens: 100, overlap_ratio: 0.15 } }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    pub batch_size_text: usize,
    pub concurrency: usize,
    pub max_attempts: u32,
    pub backoff_base_s: f64,
}

impl Default for IndexerConfig {
    fn default() -> Self { Self { batch_size_text: 16, concurrency: 2, max_attempts: 5, backoff_base_s: 0.5 } }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub rrf_k: f32,
    pub semantic_weight: f32,
    pub keyword_weight: f32,
    /// Each side of a hybrid query fetches `limit * candidate_multiplier`.
    pub candidate_multiplier: usize,
}

impl Default for SearchConfig {
    fn default() -> Self { Self { rrf_k: 60.0, semantic_weight: 0.7, keyword_weight: 0.3, candidate_multiplier: 2 } }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilesConfig {
    pub extensions: Vec<String>,
    pub max_file_bytes: u64,
}

impl Default for FilesConfig {
    fn default() -> Self {
        let extensions = [".py", ".js", ".jsx", ".ts", ".tsx", ".java", ".rs", ".c", ".cpp", ".h", ".md", ".txt"];
        Self { extensions: extensions.iter().map(|s| (*s).to_string()).collect(), max_file_bytes: 1_048_576 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub lancedb_dir: Option<String>,
    pub table: String,
}

impl Default for StorageConfig {
    fn default() -> Self { Self { lancedb_dir: None, table: "chunks".into() } }
}

/// Everything the indexing and search pipeline needs, constructed once at
/// startup and passed into each component.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    pub embedding: EmbeddingBackendsConfig,
    pub chunker: ChunkerConfig,
    pub indexer: IndexerConfig,
    pub search: SearchConfig,
    pub files: FilesConfig,
    pub storage: StorageConfig,
}

impl RagConfig {
    #[must_use]
    pub fn with_override(mut self, f: impl FnOnce(&mut Self)) -> Self {
        f(&mut self);
        self
    }

    pub fn validation_errors(&self) -> Vec<String> {
        let mut errors = self.embedding.validation_errors();
        let c = &self.chunker;
        if c.max_tokens == 0 { errors.push("chunk_max_tokens must be positive".into()); }
        if c.min_tokens > c.max_tokens { errors.push("chunk_min_tokens must not exceed chunk_max_tokens".into()); }
        if !(0.0..1.0).contains(&c.overlap_ratio) { errors.push("chunk_overlap_ratio must be in [0, 1)".into()); }
        let i = &self.indexer;
        if i.batch_size_text == 0 { errors.push("ingest_batch_size_text must be positive".into()); }
        if i.concurrency == 0 { errors.push("ingest_concurrency must be positive".into()); }
        if i.max_attempts == 0 { errors.push("ingest_max_attempts must be at least 1".into()); }
        if i.backoff_base_s < 0.0 { errors.push("ingest_backoff_base_s must be non-negative".into()); }
        let s = &self.search;
        if s.rrf_k <= 0.0 { errors.push("rrf_k must be positive".into()); }
        if s.semantic_weight < 0.0 || s.keyword_weight < 0.0 || s.semantic_weight + s.keyword_weight <= 0.0 {
            errors.push("search weights must be non-negative with a positive sum".into());
        }
        errors
    }

    pub fn validate(&self) -> Result<()> {
        let errors = self.validation_errors();
        if errors.is_empty() { Ok(()) } else { Err(Error::InvalidConfig { errors }) }
    }

    /// Applies the flat environment-style keys (`EMBEDDING_MOCK_MODE`,
    /// `EMBEDDING_OLLAMA_TIMEOUT`, `CHUNK_MAX_TOKENS`, ...). `lookup` is
    /// usually `std::env::var`, but tests pass a map.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut env = EnvReader { lookup, errors: Vec::new() };

        let e = &mut self.embedding;
        env.set("EMBEDDING_BACKENDS_ENABLED", &mut e.enabled);
        env.set("EMBEDDING_MOCK_MODE", &mut e.mock_mode);
        env.set("EMBEDDING_ALLOW_FALLBACK", &mut e.allow_fallback);
        if let Some(name) = env.raw("EMBEDDING_DEFAULT_BACKEND") { e.default_backend = Some(name); }
        for backend in &mut e.backends {
            let prefix = format!("EMBEDDING_{}", backend.name.to_ascii_uppercase());
            env.set(&format!("{prefix}_ENABLED"), &mut backend.enabled);
            env.set(&format!("{prefix}_TIMEOUT"), &mut backend.timeout_seconds);
            env.set(&format!("{prefix}_MAX_RETRIES"), &mut backend.max_retries);
            env.set(&format!("{prefix}_RETRY_DELAY"), &mut backend.retry_delay);
            env.set(&format!("{prefix}_MAX_CONCURRENT"), &mut backend.max_concurrent_requests);
            env.set(&format!("{prefix}_BATCH_SIZE"), &mut backend.batch_size);
            env.set(&format!("{prefix}_PRIORITY"), &mut backend.priority);
            env.set(&format!("{prefix}_DEFAULT_MODEL"), &mut backend.default_model);
            if let Some(url) = env.raw(&format!("{prefix}_BASE_URL")) { backend.base_url = Some(url); }
            if let Some(path) = env.raw(&format!("{prefix}_MODEL_PATH")) { backend.model_path = Some(path); }
            let api_key = env
                .raw(&format!("{prefix}_API_KEY"))
                .or_else(|| env.raw(&format!("{}_API_KEY", backend.name.to_ascii_uppercase())));
            if let Some(key) = api_key { backend.api_key = Some(key); }
        }

        env.set("CHUNK_MAX_TOKENS", &mut self.chunker.max_tokens);
        env.set("CHUNK_MIN_TOKENS", &mut self.chunker.min_tokens);
        env.set("CHUNK_OVERLAP_RATIO", &mut self.chunker.overlap_ratio);
        env.set("INGEST_BATCH_SIZE_TEXT", &mut self.indexer.batch_size_text);
        env.set("INGEST_CONCURRENCY", &mut self.indexer.concurrency);
        env.set("INGEST_MAX_ATTEMPTS", &mut self.indexer.max_attempts);
        env.set("INGEST_BACKOFF_BASE_S", &mut self.indexer.backoff_base_s);
        env.set("SEARCH_RRF_K", &mut self.search.rrf_k);
        env.set("SEARCH_SEMANTIC_WEIGHT", &mut self.search.semantic_weight);
        env.set("SEARCH_KEYWORD_WEIGHT", &mut self.search.keyword_weight);

        if env.errors.is_empty() { Ok(()) } else { Err(Error::InvalidConfig { errors: env.errors }) }
    }
}

trait EnvValue: Sized {
    fn parse_env(raw: &str) -> Option<Self>;
}

impl EnvValue for bool {
    fn parse_env(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => None,
        }
    }
}

impl EnvValue for String {
    fn parse_env(raw: &str) -> Option<Self> { Some(raw.to_string()) }
}

macro_rules! env_value_from_str {
    ($($t:ty),*) => {$(
        impl EnvValue for $t {
            fn parse_env(raw: &str) -> Option<Self> { raw.trim().parse().ok() }
        }
    )*};
}

env_value_from_str!(f32, f64, i32, i64, u32, usize);

struct EnvReader<F> {
    lookup: F,
    errors: Vec<String>,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn raw(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|v| !v.trim().is_empty())
    }

    fn set<T: EnvValue>(&mut self, key: &str, slot: &mut T) {
        if let Some(raw) = self.raw(key) {
            match T::parse_env(&raw) {
                Some(v) => *slot = v,
                None => self.errors.push(format!("{key} has an invalid value '{raw}'")),
            }
        }
    }
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}
