use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub paths: PathsConfig,
    #[serde(default)]
    pub extract: ExtractConfig,
    #[serde(default)]
    pub vision: VisionConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub image_embedding: ImageEmbeddingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PathsConfig {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractConfig {
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
            jpeg_quality: default_jpeg_quality(),
        }
    }
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.pdf".to_string()]
}
fn default_jpeg_quality() -> u8 {
    85
}

/// Vision provider settings. `api_key` is never read from the file; it is
/// resolved from the environment by [`load_config`].
#[derive(Debug, Deserialize, Clone)]
pub struct VisionConfig {
    #[serde(default = "default_vision_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(skip)]
    pub api_key: Option<String>,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default)]
    pub pre_call_delay_ms: Option<u64>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            provider: default_vision_provider(),
            model: None,
            base_url: None,
            api_key_env: None,
            api_key: None,
            max_attempts: default_max_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            pre_call_delay_ms: None,
            timeout_secs: default_timeout_secs(),
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_vision_provider() -> String {
    "groq".to_string()
}
fn default_max_attempts() -> u32 {
    3
}
fn default_retry_base_delay_ms() -> u64 {
    1000
}
fn default_max_tokens() -> u32 {
    1000
}

impl VisionConfig {
    /// Environment variable holding the provider's API key.
    pub fn key_env(&self) -> String {
        if let Some(ref name) = self.api_key_env {
            return name.clone();
        }
        match self.provider.as_str() {
            "openai" => "OPENAI_API_KEY",
            "anthropic" => "ANTHROPIC_API_KEY",
            "gemini" => "GEMINI_API_KEY",
            "groq" => "GROQ_API_KEY",
            "xai" => "XAI_GROK_API_KEY",
            _ => "VISION_API_KEY",
        }
        .to_string()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    /// Sleep after every fresh vision call in the first-pass sweep.
    #[serde(default = "default_inter_call_delay_ms")]
    pub inter_call_delay_ms: u64,
    /// Sleep between items in a retry sweep.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_index_delay_ms")]
    pub index_delay_ms: u64,
    /// Retry sweeps leave larger images for manual handling.
    #[serde(default = "default_max_image_bytes")]
    pub max_image_bytes: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            inter_call_delay_ms: default_inter_call_delay_ms(),
            retry_delay_ms: default_retry_delay_ms(),
            index_delay_ms: default_index_delay_ms(),
            max_image_bytes: default_max_image_bytes(),
        }
    }
}

fn default_inter_call_delay_ms() -> u64 {
    1000
}
fn default_retry_delay_ms() -> u64 {
    10_000
}
fn default_index_delay_ms() -> u64 {
    100
}
fn default_max_image_bytes() -> u64 {
    4 * 1024 * 1024
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ImageEmbeddingConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(skip)]
    pub api_key: Option<String>,
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
            provider: default_embedding_provider(),
            model: None,
            dims: None,
            url: None,
            api_key: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_embedding_provider() -> String {
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
pub struct RetrievalConfig {
    #[serde(default = "default_final_limit")]
    pub final_limit: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            final_limit: default_final_limit(),
        }
    }
}

fn default_final_limit() -> usize {
    5
}

impl Config {
    /// A config with defaults everywhere except the three required paths.
    pub fn with_paths(db_path: PathBuf, input_dir: PathBuf, output_dir: PathBuf) -> Self {
        Self {
            db: DbConfig { path: db_path },
            paths: PathsConfig {
                input_dir,
                output_dir,
            },
            extract: ExtractConfig::default(),
            vision: VisionConfig::default(),
            pipeline: PipelineConfig::default(),
            image_embedding: ImageEmbeddingConfig::default(),
            embedding: EmbeddingConfig::default(),
            retrieval: RetrievalConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config = parse_config(&content)?;

    // Secrets come from the environment, once, here.
    config.vision.api_key = std::env::var(config.vision.key_env()).ok();
    if config.embedding.provider == "openai" {
        config.embedding.api_key = std::env::var("OPENAI_API_KEY").ok();
    }

    Ok(config)
}

/// Parse and validate config text without touching the environment.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    if !(1..=100).contains(&config.extract.jpeg_quality) {
        anyhow::bail!("extract.jpeg_quality must be in [1, 100]");
    }

    match config.vision.provider.as_str() {
        "openai" | "anthropic" | "gemini" | "groq" | "xai" => {}
        other => anyhow::bail!(
            "Unknown vision provider: '{}'. Must be openai, anthropic, gemini, groq, or xai.",
            other
        ),
    }

    if config.vision.max_attempts == 0 {
        anyhow::bail!("vision.max_attempts must be >= 1");
    }

    if config.retrieval.final_limit == 0 {
        anyhow::bail!("retrieval.final_limit must be >= 1");
    }

    if config.embedding.is_enabled() && config.embedding.provider != "local" {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "local" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[db]
path = "./data/fig.sqlite"

[paths]
input_dir = "./pdfs"
output_dir = "./output"
"#;

    #[test]
    fn minimal_config_fills_defaults() {
        let config = parse_config(MINIMAL).unwrap();
        assert_eq!(config.vision.provider, "groq");
        assert_eq!(config.vision.max_attempts, 3);
        assert_eq!(config.pipeline.max_image_bytes, 4 * 1024 * 1024);
        assert_eq!(config.pipeline.retry_delay_ms, 10_000);
        assert_eq!(config.extract.include_globs, vec!["**/*.pdf".to_string()]);
        assert_eq!(config.extract.jpeg_quality, 85);
        assert!(!config.embedding.is_enabled());
        assert!(config.vision.api_key.is_none());
    }

    #[test]
    fn example_config_parses() {
        let config = parse_config(include_str!("../config/fig.example.toml")).unwrap();
        assert_eq!(config.vision.provider, "groq");
        assert_eq!(config.retrieval.final_limit, 5);
    }

    #[test]
    fn unknown_vision_provider_rejected() {
        let text = format!("{}\n[vision]\nprovider = \"bogus\"\n", MINIMAL);
        let err = parse_config(&text).unwrap_err();
        assert!(err.to_string().contains("Unknown vision provider"));
    }

    #[test]
    fn remote_embedding_requires_model_and_dims() {
        let text = format!("{}\n[embedding]\nprovider = \"openai\"\n", MINIMAL);
        assert!(parse_config(&text).is_err());
    }

    #[test]
    fn key_env_follows_provider_unless_overridden() {
        let mut vision = VisionConfig {
            provider: "gemini".to_string(),
            ..VisionConfig::default()
        };
        assert_eq!(vision.key_env(), "GEMINI_API_KEY");
        vision.api_key_env = Some("MY_KEY".to_string());
        assert_eq!(vision.key_env(), "MY_KEY");
    }
}
