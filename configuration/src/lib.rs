use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

pub type AppConfig = FactoryConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FactoryConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub tts: TtsConfig,
    #[serde(default)]
    pub evaluators: EvaluatorsConfig,
    #[serde(default)]
    pub voice_bank: VoiceBankConfig,
    #[serde(default)]
    pub thresholds: ThresholdConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit one JSON object per line instead of the human-readable format.
    #[serde(default)]
    pub json: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_llm_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsConfig {
    #[serde(default = "default_tts_base_url")]
    pub base_url: String,
    #[serde(default = "default_media_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_workers")]
    pub workers: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluatorsConfig {
    #[serde(default = "default_asr_endpoint")]
    pub asr: EndpointConfig,
    #[serde(default = "default_mos_endpoint")]
    pub mos: EndpointConfig,
    #[serde(default = "default_embedding_endpoint")]
    pub speaker_embedding: EndpointConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub base_url: String,
    #[serde(default = "default_media_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_workers")]
    pub workers: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceBankConfig {
    /// Tab-separated manifest in the CommonVoice `validated.tsv` layout.
    #[serde(default = "default_manifest_path")]
    pub manifest_path: PathBuf,
    /// Directory the manifest's relative clip paths resolve against.
    #[serde(default = "default_audio_dir")]
    pub audio_dir: PathBuf,
    /// Language every sample in the manifest is spoken in.
    #[serde(default = "default_bank_language")]
    pub language: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdConfig {
    #[serde(default = "default_content_threshold")]
    pub consistency: f32,
    #[serde(default = "default_content_threshold")]
    pub coherence: f32,
    #[serde(default = "default_content_threshold")]
    pub naturalness: f32,
    #[serde(default = "default_speech_threshold")]
    pub intelligibility: f32,
    #[serde(default = "default_speech_threshold")]
    pub speech_quality: f32,
    #[serde(default = "default_consistency_threshold")]
    pub speaker_consistency: f32,
    #[serde(default = "default_min_turns")]
    pub min_turns: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Unconstrained+guided pairs allowed per content stage.
    #[serde(default = "default_three")]
    pub stage_attempts: u32,
    /// Dialogue regenerations after a content-gate rejection.
    #[serde(default = "default_three")]
    pub content_regenerations: u32,
    /// Synthesis attempts per turn.
    #[serde(default = "default_three")]
    pub turn_attempts: u32,
    /// Resynthesis rounds after a speech-gate rejection.
    #[serde(default = "default_resynthesis_rounds")]
    pub resynthesis_rounds: u32,
    /// HTTP attempts per collaborator call.
    #[serde(default = "default_three")]
    pub transport_attempts: u32,
    #[serde(default = "default_transport_backoff_ms")]
    pub transport_backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Work items advanced concurrently.
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
    /// Hard cap on items in flight anywhere in the pipeline.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
}

impl Default for EvaluatorsConfig {
    fn default() -> Self {
        Self {
            asr: default_asr_endpoint(),
            mos: default_mos_endpoint(),
            speaker_embedding: default_embedding_endpoint(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            model: default_llm_model(),
            api_key: None,
            request_timeout_ms: default_llm_timeout_ms(),
            workers: default_workers(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            max_tokens: default_max_tokens(),
        }
    }
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            base_url: default_tts_base_url(),
            request_timeout_ms: default_media_timeout_ms(),
            workers: default_workers(),
        }
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            request_timeout_ms: default_media_timeout_ms(),
            workers: default_workers(),
        }
    }
}

impl Default for VoiceBankConfig {
    fn default() -> Self {
        Self {
            manifest_path: default_manifest_path(),
            audio_dir: default_audio_dir(),
            language: default_bank_language(),
        }
    }
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            consistency: default_content_threshold(),
            coherence: default_content_threshold(),
            naturalness: default_content_threshold(),
            intelligibility: default_speech_threshold(),
            speech_quality: default_speech_threshold(),
            speaker_consistency: default_consistency_threshold(),
            min_turns: default_min_turns(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            stage_attempts: default_three(),
            content_regenerations: default_three(),
            turn_attempts: default_three(),
            resynthesis_rounds: default_resynthesis_rounds(),
            transport_attempts: default_three(),
            transport_backoff_ms: default_transport_backoff_ms(),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            parallelism: default_parallelism(),
            max_in_flight: default_max_in_flight(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_llm_base_url() -> String {
    "http://127.0.0.1:8000/v1".to_string()
}

fn default_llm_model() -> String {
    "qwen3-32b".to_string()
}

fn default_llm_timeout_ms() -> u64 {
    120_000
}

fn default_tts_base_url() -> String {
    "http://127.0.0.1:8100".to_string()
}

fn default_media_timeout_ms() -> u64 {
    60_000
}

fn default_workers() -> usize {
    1
}

fn default_temperature() -> f32 {
    0.7
}

fn default_top_p() -> f32 {
    0.9
}

fn default_max_tokens() -> u32 {
    8_192
}

fn default_asr_endpoint() -> EndpointConfig {
    EndpointConfig {
        base_url: "http://127.0.0.1:8200".to_string(),
        ..EndpointConfig::default()
    }
}

fn default_mos_endpoint() -> EndpointConfig {
    EndpointConfig {
        base_url: "http://127.0.0.1:8300".to_string(),
        ..EndpointConfig::default()
    }
}

fn default_embedding_endpoint() -> EndpointConfig {
    EndpointConfig {
        base_url: "http://127.0.0.1:8400".to_string(),
        ..EndpointConfig::default()
    }
}

fn default_manifest_path() -> PathBuf {
    PathBuf::from("voice_bank/validated.tsv")
}

fn default_audio_dir() -> PathBuf {
    PathBuf::from("voice_bank/clips")
}

fn default_bank_language() -> String {
    "English".to_string()
}

fn default_content_threshold() -> f32 {
    0.85
}

fn default_speech_threshold() -> f32 {
    0.8
}

fn default_consistency_threshold() -> f32 {
    0.9
}

fn default_min_turns() -> u32 {
    4
}

fn default_three() -> u32 {
    3
}

fn default_resynthesis_rounds() -> u32 {
    2
}

fn default_transport_backoff_ms() -> u64 {
    500
}

fn default_parallelism() -> usize {
    4
}

fn default_max_in_flight() -> usize {
    16
}

/// Environment variable consulted when no config path is given on the
/// command line.
pub const CONFIG_PATH_ENV: &str = "DIALOGUE_FACTORY_CONFIG";

/// Loads the TOML config at `path`, falling back to `CONFIG_PATH_ENV` and
/// then to the built-in defaults. Missing keys fall back field by field.
pub fn load_config(path: Option<&Path>) -> Result<FactoryConfig, ConfigError> {
    let env_path = std::env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from);
    let Some(path) = path.map(Path::to_path_buf).or(env_path) else {
        return Ok(FactoryConfig::default());
    };
    let path = path.as_path();
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Installs the global tracing subscriber. `RUST_LOG` overrides the
/// configured level when set.
pub fn setup_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if config.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = FactoryConfig::default();
        assert_eq!(config.thresholds.consistency, 0.85);
        assert_eq!(config.thresholds.intelligibility, 0.8);
        assert_eq!(config.thresholds.speaker_consistency, 0.9);
        assert_eq!(config.thresholds.min_turns, 4);
        assert_eq!(config.retry.content_regenerations, 3);
        assert_eq!(config.retry.resynthesis_rounds, 2);
        assert_eq!(config.runtime.parallelism, 4);
        assert_eq!(config.runtime.max_in_flight, 16);
        assert_eq!(config.llm.workers, 1);
    }

    #[test]
    fn llm_sampling_defaults_match_the_port_defaults() {
        let config = LlmConfig::default();
        assert_eq!(config.temperature, 0.7);
        assert_eq!(config.top_p, 0.9);
        assert_eq!(config.max_tokens, 8_192);
    }

    #[test]
    fn partial_toml_overrides_only_named_fields() {
        let config: FactoryConfig = toml::from_str(
            r#"
            [llm]
            base_url = "http://llm.internal:9000/v1"
            workers = 4

            [thresholds]
            intelligibility = 0.7

            [runtime]
            parallelism = 8
            "#,
        )
        .expect("valid partial config");

        assert_eq!(config.llm.base_url, "http://llm.internal:9000/v1");
        assert_eq!(config.llm.workers, 4);
        assert_eq!(config.llm.model, "qwen3-32b");
        assert_eq!(config.thresholds.intelligibility, 0.7);
        assert_eq!(config.thresholds.speech_quality, 0.8);
        assert_eq!(config.runtime.parallelism, 8);
        assert_eq!(config.runtime.max_in_flight, 16);
    }
}
