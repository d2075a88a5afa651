use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::try_join_all;

use dialogue_domain::{
    AudioClip, Dialogue, DomainError, SpeechDialogue, SpeechSegment, SynthesisJob, TtsPort, Turn,
    VoiceBankPort, VoiceBindings, VoiceSample,
};

use crate::pool::WorkerPool;

#[derive(Debug, Clone)]
pub struct SynthesisConfig {
    /// Synthesis attempts per turn before the whole dialogue fails.
    pub turn_attempts: u32,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self { turn_attempts: 3 }
    }
}

/// Turn-level TTS fan-out. Reference clips are loaded once per bound role,
/// each turn is synthesized on a pooled worker with its own retry budget,
/// and failures name the offending turn.
pub struct SpeechSynthesisPipeline {
    tts: Arc<WorkerPool<dyn TtsPort>>,
    bank: Arc<dyn VoiceBankPort>,
    config: SynthesisConfig,
}

impl SpeechSynthesisPipeline {
    pub fn new(
        tts: Arc<WorkerPool<dyn TtsPort>>,
        bank: Arc<dyn VoiceBankPort>,
        config: SynthesisConfig,
    ) -> Self {
        Self { tts, bank, config }
    }

    pub async fn synthesize(
        &self,
        dialogue: Dialogue,
        bindings: &VoiceBindings,
    ) -> Result<SpeechDialogue, DomainError> {
        let references = self.load_references(bindings).await?;
        let segments = self
            .synthesize_turns(dialogue.turns.iter(), bindings, &references)
            .await?;
        let sample_rate_hz = uniform_sample_rate(&segments)?;
        SpeechDialogue::new(dialogue, segments, sample_rate_hz)
    }

    /// Re-synthesizes only the named turns and grafts them into the
    /// existing artifact; every other turn keeps its original audio.
    pub async fn resynthesize(
        &self,
        speech: SpeechDialogue,
        turn_indices: &[u32],
        bindings: &VoiceBindings,
    ) -> Result<SpeechDialogue, DomainError> {
        if turn_indices.is_empty() {
            return Ok(speech);
        }
        let references = self.load_references(bindings).await?;
        let turns: Vec<&Turn> = turn_indices
            .iter()
            .map(|index| {
                speech.dialogue.turn(*index).ok_or_else(|| {
                    DomainError::internal(format!("no turn {index} to resynthesize"))
                })
            })
            .collect::<Result<_, _>>()?;
        let replacements = self
            .synthesize_turns(turns.into_iter(), bindings, &references)
            .await?;
        for replacement in &replacements {
            if replacement.audio.sample_rate_hz != speech.sample_rate_hz {
                return Err(DomainError::Synthesis {
                    turn_index: replacement.turn_index,
                    detail: format!(
                        "replacement rate {} Hz differs from dialogue rate {} Hz",
                        replacement.audio.sample_rate_hz, speech.sample_rate_hz
                    ),
                });
            }
        }
        speech.with_replaced_segments(replacements)
    }

    async fn synthesize_turns<'a>(
        &self,
        turns: impl Iterator<Item = &'a Turn>,
        bindings: &VoiceBindings,
        references: &BTreeMap<String, AudioClip>,
    ) -> Result<Vec<SpeechSegment>, DomainError> {
        let jobs = turns
            .map(|turn| {
                let voice = bound_voice(bindings, turn)?;
                let reference = references.get(&turn.role_id).ok_or_else(|| {
                    DomainError::internal(format!("no reference clip for role `{}`", turn.role_id))
                })?;
                Ok(self.synthesize_turn(turn, voice.clone(), reference.clone()))
            })
            .collect::<Result<Vec<_>, DomainError>>()?;
        try_join_all(jobs).await
    }

    async fn synthesize_turn(
        &self,
        turn: &Turn,
        voice: VoiceSample,
        reference: AudioClip,
    ) -> Result<SpeechSegment, DomainError> {
        let mut last_failure = String::new();
        for attempt in 1..=self.config.turn_attempts {
            let job = SynthesisJob {
                turn_index: turn.turn_index,
                text: turn.text.clone(),
                delivery_note: turn.delivery_note.clone(),
                rate_modifier: turn.speech_rate_modifier,
                voice: voice.clone(),
                voice_reference: reference.clone(),
            };
            let worker = self.tts.checkout().await?;
            match worker.synthesize(job).await {
                Ok(audio) if audio.samples.is_empty() => {
                    last_failure = "empty audio returned".to_string();
                }
                Ok(audio) => {
                    return Ok(SpeechSegment {
                        turn_index: turn.turn_index,
                        audio,
                    });
                }
                Err(err) => {
                    tracing::debug!(
                        turn_index = turn.turn_index,
                        attempt,
                        error = %err,
                        "turn synthesis attempt failed"
                    );
                    last_failure = err.to_string();
                }
            }
        }
        Err(DomainError::Synthesis {
            turn_index: turn.turn_index,
            detail: format!(
                "no usable audio after {} attempt(s): {last_failure}",
                self.config.turn_attempts
            ),
        })
    }

    async fn load_references(
        &self,
        bindings: &VoiceBindings,
    ) -> Result<BTreeMap<String, AudioClip>, DomainError> {
        let loads = bindings.roles().map(|(role_id, sample)| async move {
            let clip = self.bank.load_clip(sample).await?;
            Ok::<_, DomainError>((role_id.to_string(), clip))
        });
        Ok(try_join_all(loads).await?.into_iter().collect())
    }
}

fn bound_voice<'a>(
    bindings: &'a VoiceBindings,
    turn: &Turn,
) -> Result<&'a VoiceSample, DomainError> {
    bindings.voice(&turn.role_id).ok_or_else(|| {
        DomainError::internal(format!("turn {} role `{}` has no bound voice", turn.turn_index, turn.role_id))
    })
}

fn uniform_sample_rate(segments: &[SpeechSegment]) -> Result<u32, DomainError> {
    let mut rate = None;
    for segment in segments {
        match rate {
            None => rate = Some(segment.audio.sample_rate_hz),
            Some(expected) if expected != segment.audio.sample_rate_hz => {
                return Err(DomainError::Synthesis {
                    turn_index: segment.turn_index,
                    detail: format!(
                        "sample rate {} Hz differs from {} Hz",
                        segment.audio.sample_rate_hz, expected
                    ),
                });
            }
            Some(_) => {}
        }
    }
    rate.ok_or_else(|| DomainError::internal("dialogue produced no segments"))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;

    use dialogue_domain::{
        AgeBand, AudioClip, Dialogue, DomainError, Gender, LanguageTag, SynthesisJob, TtsPort,
        Turn, VoiceBankPort, VoiceBindings, VoiceSample,
    };

    use super::{SpeechSynthesisPipeline, SynthesisConfig};
    use crate::pool::WorkerPool;

    struct FlakyTts {
        calls: AtomicU32,
        fail_first: u32,
    }

    #[async_trait]
    impl TtsPort for FlakyTts {
        async fn synthesize(&self, job: SynthesisJob) -> Result<AudioClip, DomainError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                return Err(DomainError::Synthesis {
                    turn_index: job.turn_index,
                    detail: "decoder hiccup".to_string(),
                });
            }
            Ok(AudioClip {
                samples: vec![0.1; 16],
                sample_rate_hz: 16_000,
            })
        }
    }

    struct StaticBank;

    #[async_trait]
    impl VoiceBankPort for StaticBank {
        async fn load_samples(&self) -> Result<Vec<VoiceSample>, DomainError> {
            Ok(vec![])
        }

        async fn load_clip(&self, _sample: &VoiceSample) -> Result<AudioClip, DomainError> {
            Ok(AudioClip {
                samples: vec![0.2; 32],
                sample_rate_hz: 16_000,
            })
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

    fn turn(index: u32, role: &str) -> Turn {
        Turn {
            turn_index: index,
            role_id: role.to_string(),
            text: format!("line {index}"),
            emotion: "neutral".to_string(),
            speech_rate_modifier: 1.0,
            pause_after_ms: 75,
            delivery_note: "even tone".to_string(),
            paralinguistic_tags: vec![],
        }
    }

    fn fixture(fail_first: u32, turn_attempts: u32) -> (SpeechSynthesisPipeline, Dialogue, VoiceBindings) {
        let tts: Arc<dyn TtsPort> = Arc::new(FlakyTts {
            calls: AtomicU32::new(0),
            fail_first,
        });
        let pool = Arc::new(WorkerPool::new(vec![tts]).expect("non-empty pool"));
        let pipeline =
            SpeechSynthesisPipeline::new(pool, Arc::new(StaticBank), SynthesisConfig { turn_attempts });
        let dialogue = Dialogue::new(vec![turn(0, "role_1"), turn(1, "role_2")]);
        let mut bindings = VoiceBindings::new();
        bindings.bind("role_1", voice("v1")).expect("bind role_1");
        bindings.bind("role_2", voice("v2")).expect("bind role_2");
        (pipeline, dialogue, bindings)
    }

    #[tokio::test]
    async fn transient_failures_are_retried_per_turn() {
        let (pipeline, dialogue, bindings) = fixture(1, 3);
        let speech = pipeline
            .synthesize(dialogue, &bindings)
            .await
            .expect("retry succeeds");
        assert_eq!(speech.segments().len(), 2);
        assert_eq!(speech.sample_rate_hz, 16_000);
    }

    #[tokio::test]
    async fn exhausted_turn_budget_names_the_turn() {
        let (pipeline, dialogue, bindings) = fixture(100, 2);
        let err = pipeline
            .synthesize(dialogue, &bindings)
            .await
            .expect_err("budget exhausted");
        assert!(matches!(err, DomainError::Synthesis { .. }));
    }

    #[tokio::test]
    async fn resynthesis_touches_only_named_turns() {
        let (pipeline, dialogue, bindings) = fixture(0, 3);
        let speech = pipeline
            .synthesize(dialogue, &bindings)
            .await
            .expect("initial synthesis");
        let original_first = speech.segment(0).expect("segment 0").audio.samples.clone();

        let replaced = pipeline
            .resynthesize(speech, &[1], &bindings)
            .await
            .expect("partial resynthesis");
        assert_eq!(
            replaced.segment(0).expect("segment 0").audio.samples,
            original_first
        );
        assert_eq!(replaced.segments().len(), 2);
    }
}
