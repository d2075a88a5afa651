use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use futures::future::{try_join3, try_join_all};
use serde::{Deserialize, Serialize};

use dialogue_domain::{
    cosine_similarity, normalize_mos, strip_markup, text_similarity, AsrPort, AudioClip,
    DomainError, GateVerdict, LanguageTag, MosPort, QualityGate, QualityScorecard,
    SpeakerEmbeddingPort, SpeechDialogue, VoiceBankPort, VoiceBindings,
};

use crate::pool::WorkerPool;

#[derive(Debug, Clone)]
pub struct SpeechFilterConfig {
    pub intelligibility_threshold: f32,
    pub speech_quality_threshold: f32,
    pub speaker_consistency_threshold: f32,
}

impl Default for SpeechFilterConfig {
    fn default() -> Self {
        Self {
            intelligibility_threshold: 0.8,
            speech_quality_threshold: 0.8,
            speaker_consistency_threshold: 0.9,
        }
    }
}

/// Per-turn acoustic scores plus the ASR hypothesis they were derived from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnScores {
    pub turn_index: u32,
    pub intelligibility: f32,
    pub speech_quality: f32,
    pub speaker_consistency: f32,
    pub transcript: String,
}

/// Outcome of one acoustic evaluation pass over a synthesized dialogue.
#[derive(Debug, Clone)]
pub struct SpeechReport {
    turns: Vec<TurnScores>,
    scorecard: QualityScorecard,
    verdict: GateVerdict,
    offending: Vec<u32>,
}

impl SpeechReport {
    pub fn passed(&self) -> bool {
        self.verdict.passed()
    }

    /// Turns to resubmit to synthesis, ascending, deduplicated.
    pub fn offending_turns(&self) -> &[u32] {
        &self.offending
    }

    pub fn turns(&self) -> &[TurnScores] {
        &self.turns
    }

    pub fn scorecard(&self) -> &QualityScorecard {
        &self.scorecard
    }

    pub fn verdict(&self) -> &GateVerdict {
        &self.verdict
    }
}

/// Acoustic gate over synthesized dialogues: ASR round-trip
/// intelligibility, MOS-based quality and per-turn speaker consistency
/// against each role's reference voice.
pub struct SpeechQualityPipeline {
    asr: Arc<WorkerPool<dyn AsrPort>>,
    mos: Arc<WorkerPool<dyn MosPort>>,
    embedding: Arc<WorkerPool<dyn SpeakerEmbeddingPort>>,
    bank: Arc<dyn VoiceBankPort>,
    gate: QualityGate,
    config: SpeechFilterConfig,
}

impl SpeechQualityPipeline {
    pub fn new(
        asr: Arc<WorkerPool<dyn AsrPort>>,
        mos: Arc<WorkerPool<dyn MosPort>>,
        embedding: Arc<WorkerPool<dyn SpeakerEmbeddingPort>>,
        bank: Arc<dyn VoiceBankPort>,
        config: SpeechFilterConfig,
    ) -> Self {
        let gate = QualityGate::new([
            ("intelligibility".to_string(), config.intelligibility_threshold),
            ("speech_quality".to_string(), config.speech_quality_threshold),
            (
                "speaker_consistency".to_string(),
                config.speaker_consistency_threshold,
            ),
        ]);
        Self {
            asr,
            mos,
            embedding,
            bank,
            gate,
            config,
        }
    }

    pub async fn evaluate(
        &self,
        speech: &SpeechDialogue,
        language: &LanguageTag,
        bindings: &VoiceBindings,
    ) -> Result<SpeechReport, DomainError> {
        let reference_embeddings = self.reference_embeddings(bindings).await?;

        let evaluations = speech.segments().iter().map(|segment| {
            let turn = speech.dialogue.turn(segment.turn_index).ok_or_else(|| {
                DomainError::internal(format!("no turn {} for segment", segment.turn_index))
            });
            async {
                let turn = turn?;
                let reference = reference_embeddings.get(&turn.role_id).ok_or_else(|| {
                    DomainError::internal(format!(
                        "no reference embedding for role `{}`",
                        turn.role_id
                    ))
                })?;
                let (hypothesis, mos, embedding) = try_join3(
                    self.transcribe(&segment.audio, language),
                    self.score_mos(&segment.audio),
                    self.embed(&segment.audio),
                )
                .await?;
                Ok::<_, DomainError>(TurnScores {
                    turn_index: segment.turn_index,
                    intelligibility: text_similarity(&strip_markup(&turn.text), &hypothesis),
                    speech_quality: normalize_mos(mos),
                    speaker_consistency: cosine_similarity(reference, &embedding),
                    transcript: hypothesis,
                })
            }
        });
        let turns = try_join_all(evaluations).await?;

        let scorecard = self.aggregate(&turns);
        let verdict = self.gate.accept(&scorecard);
        let offending = self.offending_turns(&turns, &verdict);
        if !verdict.passed() {
            tracing::debug!(
                dialogue_id = %speech.dialogue.id,
                failures = %verdict.describe(),
                offending = ?offending,
                "speech gate rejected dialogue"
            );
        }
        Ok(SpeechReport {
            turns,
            scorecard,
            verdict,
            offending,
        })
    }

    /// Intelligibility and quality average across turns; speaker
    /// consistency takes the worst turn so one voice drift cannot hide
    /// behind an otherwise clean dialogue.
    fn aggregate(&self, turns: &[TurnScores]) -> QualityScorecard {
        let count = turns.len().max(1) as f32;
        let intelligibility: f32 =
            turns.iter().map(|turn| turn.intelligibility).sum::<f32>() / count;
        let speech_quality: f32 =
            turns.iter().map(|turn| turn.speech_quality).sum::<f32>() / count;
        let speaker_consistency = turns
            .iter()
            .map(|turn| turn.speaker_consistency)
            .fold(f32::INFINITY, f32::min);
        let speaker_consistency = if speaker_consistency.is_finite() {
            speaker_consistency
        } else {
            0.0
        };
        QualityScorecard::from_scores([
            ("intelligibility".to_string(), intelligibility),
            ("speech_quality".to_string(), speech_quality),
            ("speaker_consistency".to_string(), speaker_consistency),
        ])
    }

    fn offending_turns(&self, turns: &[TurnScores], verdict: &GateVerdict) -> Vec<u32> {
        let mut offending: BTreeSet<u32> = turns
            .iter()
            .filter(|turn| {
                turn.intelligibility < self.config.intelligibility_threshold
                    || turn.speech_quality < self.config.speech_quality_threshold
                    || turn.speaker_consistency < self.config.speaker_consistency_threshold
            })
            .map(|turn| turn.turn_index)
            .collect();
        // A failed mean with no individually bad turn still needs a
        // resubmission target: take the worst turn on each failing metric.
        if offending.is_empty() && !verdict.passed() {
            for failure in verdict.failures() {
                let worst = turns.iter().min_by(|a, b| {
                    let a = metric_of(a, &failure.metric);
                    let b = metric_of(b, &failure.metric);
                    a.total_cmp(&b)
                });
                if let Some(turn) = worst {
                    offending.insert(turn.turn_index);
                }
            }
        }
        offending.into_iter().collect()
    }

    async fn transcribe(
        &self,
        audio: &AudioClip,
        language: &LanguageTag,
    ) -> Result<String, DomainError> {
        let worker = self.asr.checkout().await?;
        worker.transcribe(audio, language).await
    }

    async fn score_mos(&self, audio: &AudioClip) -> Result<f32, DomainError> {
        let worker = self.mos.checkout().await?;
        worker.score(audio).await
    }

    async fn embed(&self, audio: &AudioClip) -> Result<Vec<f32>, DomainError> {
        let worker = self.embedding.checkout().await?;
        worker.embed(audio).await
    }

    async fn reference_embeddings(
        &self,
        bindings: &VoiceBindings,
    ) -> Result<BTreeMap<String, Vec<f32>>, DomainError> {
        let loads = bindings.roles().map(|(role_id, sample)| async move {
            let clip = self.bank.load_clip(sample).await?;
            let embedding = self.embed(&clip).await?;
            Ok::<_, DomainError>((role_id.to_string(), embedding))
        });
        Ok(try_join_all(loads).await?.into_iter().collect())
    }
}

fn metric_of(turn: &TurnScores, metric: &str) -> f32 {
    match metric {
        "intelligibility" => turn.intelligibility,
        "speech_quality" => turn.speech_quality,
        _ => turn.speaker_consistency,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use dialogue_domain::{
        AgeBand, AsrPort, AudioClip, Dialogue, DomainError, Gender, LanguageTag, MosPort,
        SpeakerEmbeddingPort, SpeechDialogue, SpeechSegment, Turn, VoiceBankPort, VoiceBindings,
        VoiceSample,
    };

    use super::{SpeechFilterConfig, SpeechQualityPipeline};
    use crate::pool::WorkerPool;

    struct EchoAsr {
        /// Hypothesis returned for the named turn; other turns echo their text.
        garbled_turn: Option<u32>,
    }

    #[async_trait]
    impl AsrPort for EchoAsr {
        async fn transcribe(
            &self,
            audio: &AudioClip,
            _language: &LanguageTag,
        ) -> Result<String, DomainError> {
            // Turn index is smuggled through the clip length by the fixture.
            let turn_index = (audio.samples.len() / 16) as u32 - 1;
            if self.garbled_turn == Some(turn_index) {
                Ok("complete nonsense entirely unrelated words".to_string())
            } else {
                Ok(format!("spoken line number {turn_index}"))
            }
        }
    }

    struct FixedMos(f32);

    #[async_trait]
    impl MosPort for FixedMos {
        async fn score(&self, _audio: &AudioClip) -> Result<f32, DomainError> {
            Ok(self.0)
        }
    }

    struct UnitEmbedding;

    #[async_trait]
    impl SpeakerEmbeddingPort for UnitEmbedding {
        async fn embed(&self, _audio: &AudioClip) -> Result<Vec<f32>, DomainError> {
            Ok(vec![1.0, 0.0, 0.0])
        }
    }

    struct SilentBank;

    #[async_trait]
    impl VoiceBankPort for SilentBank {
        async fn load_samples(&self) -> Result<Vec<VoiceSample>, DomainError> {
            Ok(vec![])
        }

        async fn load_clip(&self, _sample: &VoiceSample) -> Result<AudioClip, DomainError> {
            Ok(AudioClip {
                samples: vec![0.0; 160],
                sample_rate_hz: 16_000,
            })
        }
    }

    fn turn(index: u32, role: &str) -> Turn {
        Turn {
            turn_index: index,
            role_id: role.to_string(),
            text: format!("spoken line number {index}"),
            emotion: "neutral".to_string(),
            speech_rate_modifier: 1.0,
            pause_after_ms: 75,
            delivery_note: "even".to_string(),
            paralinguistic_tags: vec![],
        }
    }

    fn voice(id: &str) -> VoiceSample {
        VoiceSample {
            id: id.to_string(),
            path: format!("{id}.wav").into(),
            transcript: "reference".to_string(),
            language: LanguageTag::English,
            gender: Gender::Female,
            age_band: AgeBand::Thirties,
        }
    }

    fn fixture(garbled_turn: Option<u32>, mos: f32) -> (SpeechQualityPipeline, SpeechDialogue, VoiceBindings) {
        let asr: Arc<dyn AsrPort> = Arc::new(EchoAsr { garbled_turn });
        let mos_port: Arc<dyn MosPort> = Arc::new(FixedMos(mos));
        let embed: Arc<dyn SpeakerEmbeddingPort> = Arc::new(UnitEmbedding);
        let pipeline = SpeechQualityPipeline::new(
            Arc::new(WorkerPool::new(vec![asr]).expect("pool")),
            Arc::new(WorkerPool::new(vec![mos_port]).expect("pool")),
            Arc::new(WorkerPool::new(vec![embed]).expect("pool")),
            Arc::new(SilentBank),
            SpeechFilterConfig::default(),
        );

        let dialogue = Dialogue::new(vec![turn(0, "role_1"), turn(1, "role_2")]);
        let segments = (0..2)
            .map(|index| SpeechSegment {
                turn_index: index,
                audio: AudioClip {
                    samples: vec![0.1; (index as usize + 1) * 16],
                    sample_rate_hz: 16_000,
                },
            })
            .collect();
        let speech = SpeechDialogue::new(dialogue, segments, 16_000).expect("covered");

        let mut bindings = VoiceBindings::new();
        bindings.bind("role_1", voice("v1")).expect("bind");
        bindings.bind("role_2", voice("v2")).expect("bind");
        (pipeline, speech, bindings)
    }

    #[tokio::test]
    async fn clean_dialogue_passes_all_gates() {
        let (pipeline, speech, bindings) = fixture(None, 4.5);
        let report = pipeline
            .evaluate(&speech, &LanguageTag::English, &bindings)
            .await
            .expect("evaluation");
        assert!(report.passed(), "failures: {}", report.verdict().describe());
        assert!(report.offending_turns().is_empty());
    }

    #[tokio::test]
    async fn garbled_turn_is_flagged_for_resynthesis() {
        let (pipeline, speech, bindings) = fixture(Some(1), 4.5);
        let report = pipeline
            .evaluate(&speech, &LanguageTag::English, &bindings)
            .await
            .expect("evaluation");
        assert!(!report.passed());
        assert_eq!(report.offending_turns(), &[1]);
    }

    #[tokio::test]
    async fn low_mos_fails_the_quality_gate() {
        let (pipeline, speech, bindings) = fixture(None, 2.0);
        let report = pipeline
            .evaluate(&speech, &LanguageTag::English, &bindings)
            .await
            .expect("evaluation");
        assert!(!report.passed());
        // 2.0 MOS normalises to 0.25, below threshold on every turn.
        assert_eq!(report.offending_turns(), &[0, 1]);
    }
}
