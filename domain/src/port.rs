use async_trait::async_trait;
use serde_json::Value;

use crate::{AudioClip, DomainError, LanguageTag, VoiceSample};

/// Decoding strategy for one LLM call. `Guided` constrains decoding to the
/// request's JSON schema and is used only after an unconstrained attempt
/// produced invalid output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodingMode {
    Unconstrained,
    Guided,
}

#[derive(Debug, Clone, Copy)]
pub struct SamplingOptions {
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
}

impl Default for SamplingOptions {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: 0.9,
            max_tokens: 8_192,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    pub schema: Option<Value>,
    pub mode: DecodingMode,
    pub sampling: SamplingOptions,
}

#[async_trait]
pub trait LlmPort: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<String, DomainError>;
}

#[derive(Debug, Clone)]
pub struct SynthesisJob {
    pub turn_index: u32,
    pub text: String,
    pub delivery_note: String,
    pub rate_modifier: f32,
    pub voice: VoiceSample,
    /// Reference audio for the bound voice, loaded once per role.
    pub voice_reference: AudioClip,
}

#[async_trait]
pub trait TtsPort: Send + Sync {
    async fn synthesize(&self, job: SynthesisJob) -> Result<AudioClip, DomainError>;
}

#[async_trait]
pub trait AsrPort: Send + Sync {
    async fn transcribe(
        &self,
        audio: &AudioClip,
        language: &LanguageTag,
    ) -> Result<String, DomainError>;
}

#[async_trait]
pub trait MosPort: Send + Sync {
    /// Mean-opinion-score estimate on the 1–5 scale.
    async fn score(&self, audio: &AudioClip) -> Result<f32, DomainError>;
}

#[async_trait]
pub trait SpeakerEmbeddingPort: Send + Sync {
    async fn embed(&self, audio: &AudioClip) -> Result<Vec<f32>, DomainError>;
}

#[async_trait]
pub trait VoiceBankPort: Send + Sync {
    async fn load_samples(&self) -> Result<Vec<VoiceSample>, DomainError>;
    async fn load_clip(&self, sample: &VoiceSample) -> Result<AudioClip, DomainError>;
}
