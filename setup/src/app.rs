use std::sync::Arc;

use anyhow::Context;

use dialogue_application::{
    ContentFilterConfig, ContentPipeline, ContentPipelineConfig, ContentQualityFilter,
    Orchestrator, OrchestratorConfig, SpeakerBank, SpeechFilterConfig, SpeechQualityPipeline,
    SpeechSynthesisPipeline, SynthesisConfig, WorkerPool,
};
use dialogue_configuration::FactoryConfig;
use dialogue_domain::{
    AsrPort, DialogueRequest, LlmPort, MosPort, SamplingOptions, SpeakerEmbeddingPort, TtsPort,
    VoiceBankPort,
};
use dialogue_infra_eval::{RestAsr, RestMos, RestSpeakerEmbedding};
use dialogue_infra_llm::OpenAiCompatLlm;
use dialogue_infra_tts_rest::RestTts;
use dialogue_infra_voicebank::CommonVoiceBank;

/// Fully wired pipeline: one adapter instance per configured worker slot,
/// the voice bank loaded up front, and the orchestrator on top.
pub struct Application {
    pub config: FactoryConfig,
    orchestrator: Orchestrator,
}

impl Application {
    pub async fn new(config: FactoryConfig) -> anyhow::Result<Self> {
        let sampling = SamplingOptions {
            temperature: config.llm.temperature,
            top_p: config.llm.top_p,
            max_tokens: config.llm.max_tokens,
        };

        let llm_workers: Vec<Arc<dyn LlmPort>> = (0..config.llm.workers.max(1))
            .map(|_| {
                OpenAiCompatLlm::from_config(&config.llm, &config.retry)
                    .map(|adapter| Arc::new(adapter) as Arc<dyn LlmPort>)
            })
            .collect::<Result<_, _>>()
            .context("building llm workers")?;
        let llm_pool = Arc::new(WorkerPool::new(llm_workers).context("llm pool")?);

        let tts_workers: Vec<Arc<dyn TtsPort>> = (0..config.tts.workers.max(1))
            .map(|_| {
                RestTts::from_config(&config.tts, &config.retry)
                    .map(|adapter| Arc::new(adapter) as Arc<dyn TtsPort>)
            })
            .collect::<Result<_, _>>()
            .context("building tts workers")?;
        let tts_pool = Arc::new(WorkerPool::new(tts_workers).context("tts pool")?);

        let asr_workers: Vec<Arc<dyn AsrPort>> = (0..config.evaluators.asr.workers.max(1))
            .map(|_| {
                RestAsr::from_config(&config.evaluators.asr)
                    .map(|adapter| Arc::new(adapter) as Arc<dyn AsrPort>)
            })
            .collect::<Result<_, _>>()
            .context("building asr workers")?;
        let asr_pool = Arc::new(WorkerPool::new(asr_workers).context("asr pool")?);

        let mos_workers: Vec<Arc<dyn MosPort>> = (0..config.evaluators.mos.workers.max(1))
            .map(|_| {
                RestMos::from_config(&config.evaluators.mos)
                    .map(|adapter| Arc::new(adapter) as Arc<dyn MosPort>)
            })
            .collect::<Result<_, _>>()
            .context("building mos workers")?;
        let mos_pool = Arc::new(WorkerPool::new(mos_workers).context("mos pool")?);

        let embedding_workers: Vec<Arc<dyn SpeakerEmbeddingPort>> =
            (0..config.evaluators.speaker_embedding.workers.max(1))
                .map(|_| {
                    RestSpeakerEmbedding::from_config(&config.evaluators.speaker_embedding)
                        .map(|adapter| Arc::new(adapter) as Arc<dyn SpeakerEmbeddingPort>)
                })
                .collect::<Result<_, _>>()
                .context("building speaker embedding workers")?;
        let embedding_pool =
            Arc::new(WorkerPool::new(embedding_workers).context("speaker embedding pool")?);

        let bank: Arc<dyn VoiceBankPort> = Arc::new(
            CommonVoiceBank::from_config(&config.voice_bank).context("voice bank config")?,
        );
        let speakers = Arc::new(
            SpeakerBank::load(bank.clone())
                .await
                .context("loading voice bank")?,
        );

        let content = Arc::new(ContentPipeline::new(
            llm_pool.clone(),
            ContentPipelineConfig {
                stage_attempts: config.retry.stage_attempts,
                sampling,
            },
        ));
        let content_filter = Arc::new(ContentQualityFilter::new(
            llm_pool,
            ContentFilterConfig {
                consistency_threshold: config.thresholds.consistency,
                coherence_threshold: config.thresholds.coherence,
                naturalness_threshold: config.thresholds.naturalness,
                min_turns: config.thresholds.min_turns,
                judge_attempts: config.retry.stage_attempts,
                sampling,
            },
        ));
        let synthesis = Arc::new(SpeechSynthesisPipeline::new(
            tts_pool,
            bank.clone(),
            SynthesisConfig {
                turn_attempts: config.retry.turn_attempts,
            },
        ));
        let speech_filter = Arc::new(SpeechQualityPipeline::new(
            asr_pool,
            mos_pool,
            embedding_pool,
            bank,
            SpeechFilterConfig {
                intelligibility_threshold: config.thresholds.intelligibility,
                speech_quality_threshold: config.thresholds.speech_quality,
                speaker_consistency_threshold: config.thresholds.speaker_consistency,
            },
        ));

        let orchestrator = Orchestrator::new(
            content,
            content_filter,
            speakers,
            synthesis,
            speech_filter,
            OrchestratorConfig {
                content_regenerations: config.retry.content_regenerations,
                resynthesis_rounds: config.retry.resynthesis_rounds,
                parallelism: config.runtime.parallelism,
                max_in_flight: config.runtime.max_in_flight,
            },
        );

        Ok(Self {
            config,
            orchestrator,
        })
    }

    pub async fn run_batch(
        &self,
        requests: Vec<DialogueRequest>,
    ) -> dialogue_application::BatchOutcome {
        self.orchestrator.run_batch(requests).await
    }
}
