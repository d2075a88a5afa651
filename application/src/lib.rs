pub mod content;
pub mod content_filter;
pub mod orchestrator;
pub mod pool;
pub mod speaker_bank;
pub mod speech_filter;
pub mod synthesis;

pub use content::{ContentPipeline, ContentPipelineConfig};
pub use content_filter::{ContentFilterConfig, ContentQualityFilter};
pub use orchestrator::{
    AbandonedItem, AcceptedDialogue, BatchOutcome, ItemOutcome, Orchestrator, OrchestratorConfig,
    WorkItem, WorkItemState,
};
pub use pool::{PooledWorker, WorkerPool};
pub use speaker_bank::SpeakerBank;
pub use speech_filter::{SpeechFilterConfig, SpeechQualityPipeline, SpeechReport, TurnScores};
pub use synthesis::{SpeechSynthesisPipeline, SynthesisConfig};
