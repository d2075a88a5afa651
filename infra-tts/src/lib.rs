//! REST adapter for a zero-shot voice-cloning TTS service. The reference
//! clip travels base64-encoded inside the JSON body; the response carries
//! the synthesized WAV the same way.

mod text;
mod wav;

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Deserialize;
use serde_json::{json, Value};

use dialogue_configuration::{RetryConfig, TtsConfig};
use dialogue_domain::{AudioClip, DomainError, SynthesisJob, TtsPort};

pub use text::prepare_text;

pub struct RestTts {
    http: reqwest::Client,
    base_url: String,
}

impl RestTts {
    pub fn from_config(config: &TtsConfig, _retry: &RetryConfig) -> Result<Self, DomainError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|err| transport_error(format!("http client: {err}")))?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn request_body(&self, job: &SynthesisJob) -> Result<Value, DomainError> {
        let text = text::prepare_text(&job.text);
        if text.is_empty() {
            return Err(DomainError::Synthesis {
                turn_index: job.turn_index,
                detail: "turn text is empty after marker cleanup".to_string(),
            });
        }
        let reference_wav = wav::encode(&job.voice_reference).map_err(|detail| {
            DomainError::Synthesis {
                turn_index: job.turn_index,
                detail,
            }
        })?;
        let instruction = format!(
            "The speaker is a {} voice in their {}. {}",
            job.voice.gender.label(),
            job.voice.age_band.label(),
            job.delivery_note,
        );
        Ok(json!({
            "text": text,
            "instruction": instruction,
            "rate": job.rate_modifier,
            "reference": {
                "transcript": job.voice.transcript,
                "wav_base64": BASE64.encode(reference_wav),
            }
        }))
    }
}

#[async_trait]
impl TtsPort for RestTts {
    async fn synthesize(&self, job: SynthesisJob) -> Result<AudioClip, DomainError> {
        let turn_index = job.turn_index;
        let body = self.request_body(&job)?;
        tracing::trace!(turn_index, voice = %job.voice.id, "sending synthesis request");

        let response = self
            .http
            .post(format!("{}/synthesize", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|err| transport_error(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(DomainError::Synthesis {
                turn_index,
                detail: format!("status {status}: {detail}"),
            });
        }
        let parsed: SynthesisResponse = response
            .json()
            .await
            .map_err(|err| transport_error(format!("response decode: {err}")))?;
        let wav_bytes = BASE64.decode(parsed.wav_base64).map_err(|err| {
            DomainError::Synthesis {
                turn_index,
                detail: format!("invalid base64 audio: {err}"),
            }
        })?;
        AudioClip::from_wav_bytes(&wav_bytes)
            .map_err(|detail| DomainError::Synthesis { turn_index, detail })
    }
}

fn transport_error(detail: String) -> DomainError {
    DomainError::Transport {
        collaborator: "tts",
        detail,
    }
}

#[derive(Debug, Deserialize)]
struct SynthesisResponse {
    wav_base64: String,
}
