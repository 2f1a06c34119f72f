use serde::{Deserialize, Serialize};
use std::path::Path;
use url::Url;

use crate::fusion::{FusionStrategy, QueryWeights};

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_STATIC_DIR: &str = "frontend/static";
const DEFAULT_DATABASE: &str = "memorybot.db";
const DEFAULT_COLLECTION: &str = "image_embeddings";
const DEFAULT_IMAGES_DIR: &str = "../frontend/static/images";
const DEFAULT_STORAGE_ROOT: &str = "../frontend/";
const DEFAULT_SERVING_ROOT: &str = "../";
const DEFAULT_VISION_MODEL: &str = "gemini-2.0-flash";
const DEFAULT_VISION_ENDPOINT: &str = "https://generativelanguage.googleapis.com";
const DEFAULT_API_KEY_ENV: &str = "GEMINI_API_KEY";
const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant with multimodal capabilities. \
Use the retrieved context to provide informative and accurate responses. \
When image information is present in the context, use it to enhance your response. \
Maintain a conversational and natural tone throughout the interaction.";
const DEFAULT_FALLBACK_PROMPT: &str = "Describe this image";

#[derive(Debug, Deserialize, Serialize, PartialEq, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
}

#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_static_dir")]
    pub static_dir: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            static_dir: default_static_dir(),
        }
    }
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_static_dir() -> String {
    DEFAULT_STATIC_DIR.to_string()
}

#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default = "default_collection")]
    pub collection: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: default_database(),
            collection: default_collection(),
        }
    }
}

fn default_database() -> String {
    DEFAULT_DATABASE.to_string()
}

fn default_collection() -> String {
    DEFAULT_COLLECTION.to_string()
}

/// Where images live on disk and how stored paths map to served paths.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct PathsConfig {
    #[serde(default = "default_images_dir")]
    pub images_dir: String,
    /// Prefix recorded in `image_path` at ingestion time.
    #[serde(default = "default_storage_root")]
    pub storage_root: String,
    /// Prefix the web frontend uses to reach the same files.
    #[serde(default = "default_serving_root")]
    pub serving_root: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            images_dir: default_images_dir(),
            storage_root: default_storage_root(),
            serving_root: default_serving_root(),
        }
    }
}

fn default_images_dir() -> String {
    DEFAULT_IMAGES_DIR.to_string()
}

fn default_storage_root() -> String {
    DEFAULT_STORAGE_ROOT.to_string()
}

fn default_serving_root() -> String {
    DEFAULT_SERVING_ROOT.to_string()
}

#[derive(Debug, Deserialize, Serialize, PartialEq, Clone, Default)]
pub struct ModelsConfig {
    #[serde(default)]
    pub vision: VisionModelConfig,
    #[serde(default)]
    pub embedding: EmbeddingModelConfig,
}

/// Gemini settings shared by chat, image description and metadata analysis.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct VisionModelConfig {
    #[serde(default = "default_vision_model")]
    pub model: String,
    #[serde(default = "default_vision_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl Default for VisionModelConfig {
    fn default() -> Self {
        Self {
            model: default_vision_model(),
            endpoint: default_vision_endpoint(),
            api_key: None,
            api_key_env: default_api_key_env(),
            temperature: default_temperature(),
        }
    }
}

impl VisionModelConfig {
    pub fn resolve_api_key(&self) -> Result<String, String> {
        if let Some(ref key) = self.api_key {
            if !key.is_empty() {
                return Ok(key.clone());
            }
        }
        match &self.api_key_env {
            Some(var_name) => std::env::var(var_name).map_err(|_| {
                format!(
                    "environment variable '{var_name}' is not set (required by api_key_env)"
                )
            }),
            None => Ok(String::new()),
        }
    }
}

fn default_vision_model() -> String {
    DEFAULT_VISION_MODEL.to_string()
}

fn default_vision_endpoint() -> String {
    DEFAULT_VISION_ENDPOINT.to_string()
}

fn default_api_key_env() -> Option<String> {
    Some(DEFAULT_API_KEY_ENV.to_string())
}

fn default_temperature() -> f32 {
    0.8
}

#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct EmbeddingModelConfig {
    #[serde(default = "default_embedding_type", rename = "type")]
    pub provider_type: String,
}

impl Default for EmbeddingModelConfig {
    fn default() -> Self {
        Self {
            provider_type: default_embedding_type(),
        }
    }
}

fn default_embedding_type() -> String {
    "local".to_string()
}

#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_weight")]
    pub text_weight: f32,
    #[serde(default = "default_weight")]
    pub image_weight: f32,
    #[serde(default)]
    pub strategy: FusionStrategy,
    /// Score fusion searches each modality this many times deeper than `top_k`.
    #[serde(default = "default_candidate_multiplier")]
    pub candidate_multiplier: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            text_weight: default_weight(),
            image_weight: default_weight(),
            strategy: FusionStrategy::default(),
            candidate_multiplier: default_candidate_multiplier(),
        }
    }
}

impl SearchConfig {
    pub fn weights(&self) -> QueryWeights {
        QueryWeights::new(self.text_weight, self.image_weight)
    }
}

fn default_top_k() -> usize {
    3
}

fn default_weight() -> f32 {
    0.5
}

fn default_candidate_multiplier() -> usize {
    2
}

#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct ChatConfig {
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    /// User text recorded when a chat message carries only an image.
    #[serde(default = "default_fallback_prompt")]
    pub fallback_prompt: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            system_prompt: default_system_prompt(),
            fallback_prompt: default_fallback_prompt(),
        }
    }
}

fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.to_string()
}

fn default_fallback_prompt() -> String {
    DEFAULT_FALLBACK_PROMPT.to_string()
}

#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_language")]
    pub language: String,
    /// Minimum spacing between two calls to the vision model.
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    /// Ingest uploaded files right after they are saved.
    #[serde(default = "default_on_upload")]
    pub on_upload: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            language: default_language(),
            min_interval_ms: default_min_interval_ms(),
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            extensions: default_extensions(),
            on_upload: default_on_upload(),
        }
    }
}

fn default_language() -> String {
    "English".to_string()
}

fn default_min_interval_ms() -> u64 {
    2000
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    8000
}

fn default_extensions() -> Vec<String> {
    ["jpg", "jpeg", "png", "webp", "gif"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_on_upload() -> bool {
    true
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self, String> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read config file '{}': {e}", path.display()))?;
        Self::parse(&contents)
    }

    /// Load `path` if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, String> {
        if path.exists() {
            Self::from_file(path)
        } else {
            log::info!("config file '{}' not found, using defaults", path.display());
            Ok(Self::default())
        }
    }

    pub fn parse(contents: &str) -> Result<Self, String> {
        let config: Config =
            toml::from_str(contents).map_err(|e| format!("invalid config: {e}"))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.server.port == 0 {
            return Err("invalid config: server.port must not be 0".to_string());
        }
        if self.storage.collection.trim().is_empty() {
            return Err("invalid config: storage.collection must not be empty".to_string());
        }
        for (key, value) in [
            ("search.text_weight", self.search.text_weight),
            ("search.image_weight", self.search.image_weight),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(format!(
                    "invalid config: {key} must be within [0.0, 1.0], got {value}"
                ));
            }
        }
        if self.search.candidate_multiplier == 0 {
            return Err(
                "invalid config: search.candidate_multiplier must be at least 1".to_string(),
            );
        }
        if self.models.embedding.provider_type != "local" {
            return Err(format!(
                "invalid config: unknown embedding type '{}'. Valid types: local",
                self.models.embedding.provider_type
            ));
        }
        Url::parse(&self.models.vision.endpoint).map_err(|e| {
            format!("invalid config: models.vision.endpoint is not a valid URL: {e}")
        })?;
        if self.ingest.max_backoff_ms < self.ingest.initial_backoff_ms {
            return Err(
                "invalid config: ingest.max_backoff_ms must be >= ingest.initial_backoff_ms"
                    .to_string(),
            );
        }
        Ok(())
    }

    pub fn to_toml_string(&self) -> String {
        toml::to_string_pretty(self).expect("Config should always be serializable to TOML")
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
