use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tokio::sync::Semaphore;

use dialogue_domain::{
    Dialogue, DialogueRequest, DomainError, Metadata, QualityScorecard, Script, SpeechDialogue,
    VoiceBindings,
};

use crate::content::ContentPipeline;
use crate::content_filter::ContentQualityFilter;
use crate::speaker_bank::SpeakerBank;
use crate::speech_filter::{SpeechQualityPipeline, SpeechReport};
use crate::synthesis::SpeechSynthesisPipeline;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Dialogue-stage regenerations after a content-gate rejection.
    pub content_regenerations: u32,
    /// Resynthesis rounds for offending turns after a speech-gate rejection.
    pub resynthesis_rounds: u32,
    /// Items advanced concurrently by a batch run.
    pub parallelism: usize,
    /// Hard cap on items holding resources anywhere in the pipeline.
    pub max_in_flight: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            content_regenerations: 3,
            resynthesis_rounds: 2,
            parallelism: 4,
            max_in_flight: 16,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkItemState {
    Pending,
    ContentGenerating,
    ContentEvaluating,
    SpeechSynthesizing,
    SpeechEvaluating,
    Accepted,
    Abandoned,
}

impl WorkItemState {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::ContentGenerating => "content_generating",
            Self::ContentEvaluating => "content_evaluating",
            Self::SpeechSynthesizing => "speech_synthesizing",
            Self::SpeechEvaluating => "speech_evaluating",
            Self::Accepted => "accepted",
            Self::Abandoned => "abandoned",
        }
    }
}

/// One dialogue to produce, tracked through the pipeline stages.
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub item_id: u64,
    pub request: DialogueRequest,
    pub state: WorkItemState,
}

impl WorkItem {
    pub fn new(item_id: u64, request: DialogueRequest) -> Self {
        Self {
            item_id,
            request,
            state: WorkItemState::Pending,
        }
    }

    fn advance(&mut self, state: WorkItemState) {
        tracing::debug!(
            item_id = self.item_id,
            from = self.state.label(),
            to = state.label(),
            "work item state change"
        );
        self.state = state;
    }
}

/// A dialogue that cleared both quality gates, with everything needed to
/// persist it.
#[derive(Debug, Clone)]
pub struct AcceptedDialogue {
    pub item_id: u64,
    pub metadata: Metadata,
    pub script: Script,
    pub dialogue: Dialogue,
    pub bindings: VoiceBindings,
    pub speech: SpeechDialogue,
    pub content_scores: QualityScorecard,
    pub speech_report: SpeechReport,
    pub content_regenerations_used: u32,
    pub resynthesis_rounds_used: u32,
}

#[derive(Debug, Clone)]
pub struct AbandonedItem {
    pub item_id: u64,
    /// Stage the item was in when it was given up.
    pub state: WorkItemState,
    pub reason: String,
}

#[derive(Debug)]
pub enum ItemOutcome {
    Accepted(Box<AcceptedDialogue>),
    Abandoned(AbandonedItem),
}

#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub accepted: Vec<AcceptedDialogue>,
    pub abandoned: Vec<AbandonedItem>,
}

impl BatchOutcome {
    pub fn total(&self) -> usize {
        self.accepted.len() + self.abandoned.len()
    }
}

/// Drives each work item through content generation, the content gate,
/// voice binding, synthesis and the speech gate, with bounded retry
/// budgets at every loop. An abandoned item never takes the batch down.
pub struct Orchestrator {
    content: Arc<ContentPipeline>,
    content_filter: Arc<ContentQualityFilter>,
    speakers: Arc<SpeakerBank>,
    synthesis: Arc<SpeechSynthesisPipeline>,
    speech_filter: Arc<SpeechQualityPipeline>,
    in_flight: Arc<Semaphore>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        content: Arc<ContentPipeline>,
        content_filter: Arc<ContentQualityFilter>,
        speakers: Arc<SpeakerBank>,
        synthesis: Arc<SpeechSynthesisPipeline>,
        speech_filter: Arc<SpeechQualityPipeline>,
        config: OrchestratorConfig,
    ) -> Self {
        let in_flight = Arc::new(Semaphore::new(config.max_in_flight.max(1)));
        Self {
            content,
            content_filter,
            speakers,
            synthesis,
            speech_filter,
            in_flight,
            config,
        }
    }

    /// Expands each request into its `count` work items and runs them with
    /// bounded parallelism. The in-flight permit is held from content
    /// generation until the item settles.
    pub async fn run_batch(&self, requests: Vec<DialogueRequest>) -> BatchOutcome {
        let items: Vec<WorkItem> = requests
            .into_iter()
            .flat_map(|request| {
                (0..request.count.max(1)).map(move |_| request.clone())
            })
            .enumerate()
            .map(|(index, request)| WorkItem::new(index as u64, request))
            .collect();
        tracing::info!(items = items.len(), "batch started");

        let mut outcome = BatchOutcome::default();
        let mut settled = stream::iter(items)
            .map(|item| async move {
                let _permit = self.in_flight.clone().acquire_owned().await;
                self.run_item(item).await
            })
            .buffer_unordered(self.config.parallelism.max(1));
        while let Some(item_outcome) = settled.next().await {
            match item_outcome {
                ItemOutcome::Accepted(accepted) => outcome.accepted.push(*accepted),
                ItemOutcome::Abandoned(abandoned) => outcome.abandoned.push(abandoned),
            }
        }
        tracing::info!(
            accepted = outcome.accepted.len(),
            abandoned = outcome.abandoned.len(),
            "batch finished"
        );
        outcome
    }

    pub async fn run_item(&self, mut item: WorkItem) -> ItemOutcome {
        match self.drive(&mut item).await {
            Ok(accepted) => {
                item.advance(WorkItemState::Accepted);
                tracing::info!(item_id = item.item_id, "dialogue accepted");
                ItemOutcome::Accepted(Box::new(accepted))
            }
            Err(reason) => {
                let state = item.state;
                item.advance(WorkItemState::Abandoned);
                tracing::warn!(
                    item_id = item.item_id,
                    stage = state.label(),
                    %reason,
                    "dialogue abandoned"
                );
                ItemOutcome::Abandoned(AbandonedItem {
                    item_id: item.item_id,
                    state,
                    reason: reason.to_string(),
                })
            }
        }
    }

    async fn drive(&self, item: &mut WorkItem) -> Result<AcceptedDialogue, DomainError> {
        let (metadata, script, dialogue, content_scores, regenerations) =
            self.content_phase(item).await?;

        // Cast voices before any audio work so an uncastable dialogue
        // costs no synthesis.
        let bindings = self.speakers.bind_all(&metadata)?;

        item.advance(WorkItemState::SpeechSynthesizing);
        let mut speech = self
            .synthesis
            .synthesize(dialogue.clone(), &bindings)
            .await?;

        let mut rounds = 0;
        loop {
            item.advance(WorkItemState::SpeechEvaluating);
            let report = self
                .speech_filter
                .evaluate(&speech, &metadata.target_language, &bindings)
                .await?;
            if report.passed() {
                return Ok(AcceptedDialogue {
                    item_id: item.item_id,
                    metadata,
                    script,
                    dialogue,
                    bindings,
                    speech,
                    content_scores,
                    speech_report: report,
                    content_regenerations_used: regenerations,
                    resynthesis_rounds_used: rounds,
                });
            }
            if rounds >= self.config.resynthesis_rounds {
                return Err(DomainError::RetryExhausted {
                    stage: "speech_evaluation",
                    attempts: rounds,
                    detail: report.verdict().describe(),
                });
            }
            rounds += 1;
            item.advance(WorkItemState::SpeechSynthesizing);
            tracing::debug!(
                item_id = item.item_id,
                round = rounds,
                turns = ?report.offending_turns(),
                "resynthesizing offending turns"
            );
            speech = self
                .synthesis
                .resynthesize(speech, report.offending_turns(), &bindings)
                .await?;
        }
    }

    /// Metadata and script are generated once; only the turn-level
    /// dialogue is regenerated when the content gate rejects it.
    async fn content_phase(
        &self,
        item: &mut WorkItem,
    ) -> Result<(Metadata, Script, Dialogue, QualityScorecard, u32), DomainError> {
        item.advance(WorkItemState::ContentGenerating);
        let metadata = self.content.generate_metadata(&item.request).await?;
        let script = self.content.generate_script(&metadata).await?;
        let mut dialogue = self.content.generate_dialogue(&metadata, &script).await?;

        let mut regenerations = 0;
        loop {
            item.advance(WorkItemState::ContentEvaluating);
            let rejection = if !self.content_filter.meets_turn_floor(&dialogue) {
                "dialogue below minimum turn count".to_string()
            } else {
                let (scorecard, verdict) = self
                    .content_filter
                    .evaluate(&metadata, &script, &dialogue)
                    .await?;
                if verdict.passed() {
                    return Ok((metadata, script, dialogue, scorecard, regenerations));
                }
                verdict.describe()
            };
            if regenerations >= self.config.content_regenerations {
                return Err(DomainError::RetryExhausted {
                    stage: "content_evaluation",
                    attempts: regenerations,
                    detail: rejection,
                });
            }
            regenerations += 1;
            item.advance(WorkItemState::ContentGenerating);
            tracing::debug!(
                item_id = item.item_id,
                regeneration = regenerations,
                reason = %rejection,
                "regenerating dialogue"
            );
            dialogue = self.content.generate_dialogue(&metadata, &script).await?;
        }
    }
}
