//! TOML configuration.
//!
//! Every section is optional and falls back to defaults, so an empty file is
//! a valid configuration (embeddings disabled, OpenAI chat model). Secrets are
//! read from the environment (`OPENAI_API_KEY`), never from the file.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub data: DataConfig,
    #[serde(default)]
    pub extraction: ExtractionSettings,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub entities: EntitiesConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DataConfig {
    #[serde(default = "default_data_root")]
    pub root: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            root: default_data_root(),
        }
    }
}

fn default_data_root() -> PathBuf {
    PathBuf::from("./data")
}

impl DataConfig {
    pub fn contracts_dir(&self) -> PathBuf {
        self.root.join("contracts")
    }

    pub fn db_path(&self) -> PathBuf {
        self.root.join("vectors.sqlite")
    }

    pub fn feedback_log(&self) -> PathBuf {
        self.root.join("feedback").join("feedback.log")
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractionSettings {
    #[serde(default = "default_strategy")]
    pub strategy: String,
    #[serde(default)]
    pub force_ocr: bool,
    #[serde(default = "default_ocr_lang")]
    pub ocr_lang: String,
    #[serde(default = "default_render_dpi")]
    pub render_dpi: u32,
    #[serde(default)]
    pub max_pages: Option<usize>,
    #[serde(default = "default_min_avg_chars")]
    pub min_avg_chars: usize,
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            strategy: default_strategy(),
            force_ocr: false,
            ocr_lang: default_ocr_lang(),
            render_dpi: default_render_dpi(),
            max_pages: None,
            min_avg_chars: default_min_avg_chars(),
        }
    }
}

fn default_strategy() -> String {
    "auto".to_string()
}
fn default_ocr_lang() -> String {
    "eng".to_string()
}
fn default_render_dpi() -> u32 {
    200
}
fn default_min_avg_chars() -> usize {
    80
}

/// Chunk sizing. Sizes are derived from the embedding model's input token
/// limit when known, otherwise character fallbacks are used.
#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default)]
    pub embeddings_max_input_tokens: Option<usize>,
    #[serde(default)]
    pub chunk_size_tokens: Option<usize>,
    #[serde(default)]
    pub chunk_overlap_tokens: Option<usize>,
    #[serde(default = "default_size_fraction")]
    pub chunk_size_fraction: f64,
    #[serde(default = "default_overlap_fraction")]
    pub chunk_overlap_fraction: f64,
    #[serde(default = "default_avg_chars_per_token")]
    pub avg_chars_per_token: usize,
    #[serde(default = "default_fallback_chars")]
    pub fallback_chars: usize,
    #[serde(default = "default_fallback_overlap_chars")]
    pub fallback_overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            embeddings_max_input_tokens: None,
            chunk_size_tokens: None,
            chunk_overlap_tokens: None,
            chunk_size_fraction: default_size_fraction(),
            chunk_overlap_fraction: default_overlap_fraction(),
            avg_chars_per_token: default_avg_chars_per_token(),
            fallback_chars: default_fallback_chars(),
            fallback_overlap_chars: default_fallback_overlap_chars(),
        }
    }
}

fn default_size_fraction() -> f64 {
    0.8
}
fn default_overlap_fraction() -> f64 {
    0.2
}
fn default_avg_chars_per_token() -> usize {
    4
}
fn default_fallback_chars() -> usize {
    1000
}
fn default_fallback_overlap_chars() -> usize {
    200
}

impl ChunkingConfig {
    /// Resolve `(chunk_size_chars, chunk_overlap_chars)`.
    ///
    /// Explicit token overrides win; otherwise the size is a fraction of the
    /// embedding input limit and the overlap a fraction of the size. Token
    /// values are converted to characters with `avg_chars_per_token`. When no
    /// non-zero token sizing can be derived the character fallbacks apply.
    pub fn resolve_params(&self) -> (usize, usize) {
        let mut size_tokens = self.chunk_size_tokens;
        let mut overlap_tokens = self.chunk_overlap_tokens;

        if size_tokens.is_none() {
            if let Some(limit) = self.embeddings_max_input_tokens.filter(|l| *l > 0) {
                size_tokens = Some((limit as f64 * self.chunk_size_fraction) as usize);
            }
        }

        if overlap_tokens.is_none() {
            if let Some(size) = size_tokens.filter(|s| *s > 0) {
                overlap_tokens = Some((size as f64 * self.chunk_overlap_fraction) as usize);
            }
        }

        match (size_tokens, overlap_tokens) {
            (Some(size), Some(overlap)) if size > 0 && overlap > 0 => (
                size * self.avg_chars_per_token,
                overlap * self.avg_chars_per_token,
            ),
            _ => (self.fallback_chars, self.fallback_overlap_chars),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL. OpenAI: defaults to `https://api.openai.com/v1`.
    /// Ollama: defaults to `http://localhost:11434`.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    /// `openai` (hosted) or `local` (an OpenAI-compatible proxy such as
    /// LiteLLM in front of Ollama).
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_llm_retries")]
    pub max_retries: u32,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            model: default_llm_model(),
            base_url: None,
            temperature: default_temperature(),
            max_retries: default_llm_retries(),
            timeout_secs: default_llm_timeout(),
        }
    }
}

fn default_llm_provider() -> String {
    "openai".to_string()
}
fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_temperature() -> f32 {
    0.1
}
fn default_llm_retries() -> u32 {
    3
}
fn default_llm_timeout() -> u64 {
    60
}

impl LlmConfig {
    pub fn is_local(&self) -> bool {
        self.provider == "local"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_k")]
    pub k: usize,
    #[serde(default)]
    pub enable_entity_routing: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k: default_k(),
            enable_entity_routing: false,
        }
    }
}

fn default_k() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct EntitiesConfig {
    #[serde(default = "default_entities_mode")]
    pub mode: String,
}

impl Default for EntitiesConfig {
    fn default() -> Self {
        Self {
            mode: default_entities_mode(),
        }
    }
}

fn default_entities_mode() -> String {
    "both".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LimitsConfig {
    #[serde(default = "default_max_pdf_pages")]
    pub max_pdf_pages: usize,
    #[serde(default = "default_max_pdf_size_mb")]
    pub max_pdf_size_mb: f64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_pdf_pages: default_max_pdf_pages(),
            max_pdf_size_mb: default_max_pdf_size_mb(),
        }
    }
}

fn default_max_pdf_pages() -> usize {
    500
}
fn default_max_pdf_size_mb() -> f64 {
    50.0
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8501".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Defaults only; used when no configuration file is present.
    pub fn minimal() -> Self {
        Self::default()
    }

    /// Human-readable summary printed by `ca config`.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        let (size, overlap) = self.chunking.resolve_params();
        let _ = writeln!(out, "=== Configuration Summary ===");
        let _ = writeln!(out, "data root:        {}", self.data.root.display());
        let _ = writeln!(out, "vector db:        {}", self.data.db_path().display());
        let _ = writeln!(
            out,
            "extraction:       strategy={} force_ocr={} lang={} dpi={}",
            self.extraction.strategy,
            self.extraction.force_ocr,
            self.extraction.ocr_lang,
            self.extraction.render_dpi
        );
        let _ = writeln!(out, "chunking:         size={} overlap={} (chars)", size, overlap);
        let _ = writeln!(
            out,
            "embedding:        provider={} model={}",
            self.embedding.provider,
            self.embedding.model.as_deref().unwrap_or("-")
        );
        let _ = writeln!(
            out,
            "llm:              provider={} model={} base_url={}",
            self.llm.provider,
            self.llm.model,
            self.llm.base_url.as_deref().unwrap_or("(default)")
        );
        let _ = writeln!(
            out,
            "retrieval:        k={} entity_routing={}",
            self.retrieval.k, self.retrieval.enable_entity_routing
        );
        let _ = writeln!(out, "entities:         mode={}", self.entities.mode);
        let _ = writeln!(
            out,
            "limits:           max_pages={} max_size_mb={}",
            self.limits.max_pdf_pages, self.limits.max_pdf_size_mb
        );
        let _ = write!(out, "server:           {}", self.server.bind);
        out
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    let chunking = &config.chunking;
    if !(chunking.chunk_size_fraction > 0.0 && chunking.chunk_size_fraction <= 1.0) {
        bail!("chunking.chunk_size_fraction must be in (0.0, 1.0]");
    }
    if !(0.0..1.0).contains(&chunking.chunk_overlap_fraction) {
        bail!("chunking.chunk_overlap_fraction must be in [0.0, 1.0)");
    }
    if chunking.avg_chars_per_token == 0 {
        bail!("chunking.avg_chars_per_token must be > 0");
    }
    if chunking.fallback_overlap_chars > chunking.fallback_chars {
        bail!("chunking.fallback_overlap_chars must not exceed chunking.fallback_chars");
    }

    if config.retrieval.k < 1 {
        bail!("retrieval.k must be >= 1");
    }

    match config.extraction.strategy.as_str() {
        "auto" | "text" | "ocr" => {}
        other => bail!(
            "Unknown extraction strategy: '{}'. Must be auto, text, or ocr.",
            other
        ),
    }

    match config.entities.mode.as_str() {
        "llm" | "regex" | "both" => {}
        other => bail!(
            "Unknown entities mode: '{}'. Must be llm, regex, or both.",
            other
        ),
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }

    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.batch_size == 0 {
            bail!("embedding.batch_size must be > 0");
        }
    }

    match config.llm.provider.as_str() {
        "openai" => {}
        "local" => {
            if config.llm.base_url.is_none() {
                bail!("llm.base_url must be set when llm.provider is 'local'");
            }
        }
        other => bail!(
            "Unknown llm provider: '{}'. Must be openai or local.",
            other
        ),
    }

    Ok(())
}
