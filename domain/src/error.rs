use thiserror::Error;

/// Failure taxonomy for the generation pipeline. Schema violations and
/// quality rejections are recovered locally; resource exhaustion and retry
/// cap overruns are fatal for the work item that raised them.
#[derive(Debug, Clone, Error)]
pub enum DomainError {
    #[error("schema violation in {stage}: {detail}")]
    SchemaViolation { stage: &'static str, detail: String },

    #[error("no voice sample matches role `{role_id}` ({language}, {gender})")]
    NoMatchingVoice {
        role_id: String,
        language: String,
        gender: String,
    },

    #[error("transport failure talking to {collaborator}: {detail}")]
    Transport {
        collaborator: &'static str,
        detail: String,
    },

    #[error("synthesis failed for turn {turn_index}: {detail}")]
    Synthesis { turn_index: u32, detail: String },

    #[error("{metric} evaluation failed: {detail}")]
    Evaluation { metric: &'static str, detail: String },

    #[error("retry cap exceeded in {stage} after {attempts} attempts: {detail}")]
    RetryExhausted {
        stage: &'static str,
        attempts: u32,
        detail: String,
    },

    #[error("{0}")]
    Internal(String),
}

impl DomainError {
    pub fn internal(detail: impl Into<String>) -> Self {
        DomainError::Internal(detail.into())
    }

    /// Stage name used in abandonment diagnostics.
    pub fn stage(&self) -> &'static str {
        match self {
            DomainError::SchemaViolation { stage, .. } => stage,
            DomainError::NoMatchingVoice { .. } => "speaker_retrieval",
            DomainError::Transport { .. } => "transport",
            DomainError::Synthesis { .. } => "speech_synthesis",
            DomainError::Evaluation { .. } => "speech_evaluation",
            DomainError::RetryExhausted { stage, .. } => stage,
            DomainError::Internal(_) => "internal",
        }
    }
}
