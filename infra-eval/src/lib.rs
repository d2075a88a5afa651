//! REST adapters for the three speech evaluators: ASR transcription,
//! MOS estimation and speaker embedding extraction. Audio travels as
//! base64-encoded mono WAV inside the JSON body.

use std::io::Cursor;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use dialogue_configuration::EndpointConfig;
use dialogue_domain::{
    AsrPort, AudioClip, DomainError, LanguageTag, MosPort, SpeakerEmbeddingPort,
};

/// Shared HTTP plumbing for the evaluator endpoints.
struct RestEvaluator {
    http: reqwest::Client,
    base_url: String,
    collaborator: &'static str,
}

impl RestEvaluator {
    fn from_config(
        config: &EndpointConfig,
        collaborator: &'static str,
    ) -> Result<Self, DomainError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|err| DomainError::Transport {
                collaborator,
                detail: format!("http client: {err}"),
            })?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            collaborator,
        })
    }

    fn transport(&self, detail: String) -> DomainError {
        DomainError::Transport {
            collaborator: self.collaborator,
            detail,
        }
    }

    async fn post<R: DeserializeOwned>(
        &self,
        route: &str,
        body: Value,
    ) -> Result<R, DomainError> {
        let response = self
            .http
            .post(format!("{}/{route}", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|err| self.transport(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(self.transport(format!("status {status}: {detail}")));
        }
        response
            .json()
            .await
            .map_err(|err| self.transport(format!("response decode: {err}")))
    }
}

pub struct RestAsr {
    inner: RestEvaluator,
}

impl RestAsr {
    pub fn from_config(config: &EndpointConfig) -> Result<Self, DomainError> {
        Ok(Self {
            inner: RestEvaluator::from_config(config, "asr")?,
        })
    }
}

#[async_trait]
impl AsrPort for RestAsr {
    async fn transcribe(
        &self,
        audio: &AudioClip,
        language: &LanguageTag,
    ) -> Result<String, DomainError> {
        let body = json!({
            "wav_base64": encode_wav(audio, self.inner.collaborator)?,
            "language": language.label(),
        });
        let parsed: TranscriptionResponse = self.inner.post("transcribe", body).await?;
        Ok(parsed.text)
    }
}

pub struct RestMos {
    inner: RestEvaluator,
}

impl RestMos {
    pub fn from_config(config: &EndpointConfig) -> Result<Self, DomainError> {
        Ok(Self {
            inner: RestEvaluator::from_config(config, "mos")?,
        })
    }
}

#[async_trait]
impl MosPort for RestMos {
    async fn score(&self, audio: &AudioClip) -> Result<f32, DomainError> {
        let body = json!({ "wav_base64": encode_wav(audio, self.inner.collaborator)? });
        let parsed: MosResponse = self.inner.post("score", body).await?;
        if !(1.0..=5.0).contains(&parsed.mos) {
            return Err(DomainError::Evaluation {
                metric: "speech_quality",
                detail: format!("MOS {} outside the 1-5 scale", parsed.mos),
            });
        }
        Ok(parsed.mos)
    }
}

pub struct RestSpeakerEmbedding {
    inner: RestEvaluator,
}

impl RestSpeakerEmbedding {
    pub fn from_config(config: &EndpointConfig) -> Result<Self, DomainError> {
        Ok(Self {
            inner: RestEvaluator::from_config(config, "speaker_embedding")?,
        })
    }
}

#[async_trait]
impl SpeakerEmbeddingPort for RestSpeakerEmbedding {
    async fn embed(&self, audio: &AudioClip) -> Result<Vec<f32>, DomainError> {
        let body = json!({ "wav_base64": encode_wav(audio, self.inner.collaborator)? });
        let parsed: EmbeddingResponse = self.inner.post("embed", body).await?;
        if parsed.embedding.is_empty() {
            return Err(DomainError::Evaluation {
                metric: "speaker_consistency",
                detail: "empty embedding returned".to_string(),
            });
        }
        Ok(parsed.embedding)
    }
}

fn encode_wav(clip: &AudioClip, collaborator: &'static str) -> Result<String, DomainError> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: clip.sample_rate_hz,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    let mut writer = hound::WavWriter::new(&mut cursor, spec).map_err(|err| {
        DomainError::Transport {
            collaborator,
            detail: format!("wav header: {err}"),
        }
    })?;
    for sample in &clip.samples {
        let scaled = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        writer
            .write_sample(scaled)
            .map_err(|err| DomainError::Transport {
                collaborator,
                detail: format!("wav sample: {err}"),
            })?;
    }
    writer.finalize().map_err(|err| DomainError::Transport {
        collaborator,
        detail: format!("wav finalize: {err}"),
    })?;
    Ok(BASE64.encode(cursor.into_inner()))
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

#[derive(Debug, Deserialize)]
struct MosResponse {
    mos: f32,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine;

    use dialogue_domain::AudioClip;

    use super::encode_wav;

    #[test]
    fn encoded_audio_is_a_valid_wav_payload() {
        let clip = AudioClip {
            samples: vec![0.0, 0.5, -0.5],
            sample_rate_hz: 16_000,
        };
        let payload = encode_wav(&clip, "asr").expect("encodes");
        let bytes = BASE64.decode(payload).expect("valid base64");
        assert_eq!(&bytes[..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"WAVE");
    }
}
