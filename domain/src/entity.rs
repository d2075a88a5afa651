use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::DomainError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LanguageTag {
    English,
    Chinese,
    Other(String),
}

impl LanguageTag {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "english" | "en" => Some(LanguageTag::English),
            "chinese" | "zh" => Some(LanguageTag::Chinese),
            other if !other.is_empty() => Some(LanguageTag::Other(other.to_string())),
            _ => None,
        }
    }

    pub fn label(&self) -> &str {
        match self {
            LanguageTag::English => "English",
            LanguageTag::Chinese => "Chinese",
            LanguageTag::Other(name) => name,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Gender {
    Male,
    Female,
}

impl Gender {
    pub fn parse(value: &str) -> Option<Self> {
        let lowered = value.to_ascii_lowercase();
        if lowered.starts_with("male") || lowered == "m" {
            Some(Gender::Male)
        } else if lowered.starts_with("female") || lowered == "f" {
            Some(Gender::Female)
        } else {
            None
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
        }
    }
}

/// Decade bands mirroring the age labels of the voice-bank corpus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AgeBand {
    Teens,
    Twenties,
    Thirties,
    Forties,
    Fifties,
    Sixties,
    Seventies,
    Eighties,
    Nineties,
}

impl AgeBand {
    pub fn from_age(age: u8) -> Self {
        match age {
            0..=19 => AgeBand::Teens,
            20..=29 => AgeBand::Twenties,
            30..=39 => AgeBand::Thirties,
            40..=49 => AgeBand::Forties,
            50..=59 => AgeBand::Fifties,
            60..=69 => AgeBand::Sixties,
            70..=79 => AgeBand::Seventies,
            80..=89 => AgeBand::Eighties,
            _ => AgeBand::Nineties,
        }
    }

    pub fn parse(label: &str) -> Option<Self> {
        match label.to_ascii_lowercase().as_str() {
            "teens" => Some(AgeBand::Teens),
            "twenties" => Some(AgeBand::Twenties),
            "thirties" => Some(AgeBand::Thirties),
            "fourties" | "forties" => Some(AgeBand::Forties),
            "fifties" => Some(AgeBand::Fifties),
            "sixties" => Some(AgeBand::Sixties),
            "seventies" => Some(AgeBand::Seventies),
            "eighties" => Some(AgeBand::Eighties),
            "nineties" => Some(AgeBand::Nineties),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            AgeBand::Teens => "teens",
            AgeBand::Twenties => "twenties",
            AgeBand::Thirties => "thirties",
            AgeBand::Forties => "forties",
            AgeBand::Fifties => "fifties",
            AgeBand::Sixties => "sixties",
            AgeBand::Seventies => "seventies",
            AgeBand::Eighties => "eighties",
            AgeBand::Nineties => "nineties",
        }
    }

    fn decade(self) -> u8 {
        match self {
            AgeBand::Teens => 1,
            AgeBand::Twenties => 2,
            AgeBand::Thirties => 3,
            AgeBand::Forties => 4,
            AgeBand::Fifties => 5,
            AgeBand::Sixties => 6,
            AgeBand::Seventies => 7,
            AgeBand::Eighties => 8,
            AgeBand::Nineties => 9,
        }
    }

    pub fn distance(self, other: AgeBand) -> u8 {
        self.decade().abs_diff(other.decade())
    }
}

/// One requested dialogue set; immutable for the lifetime of the batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogueRequest {
    pub prompt_text: String,
    pub target_language: LanguageTag,
    pub count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeakerProfile {
    pub role_id: String,
    pub name: String,
    pub gender: Gender,
    pub age_band: AgeBand,
    pub occupation: String,
    pub nationality: String,
    pub personality_traits: Vec<String>,
    pub accent: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnRange {
    pub min: u32,
    pub max: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    pub topic: String,
    pub scenario_description: String,
    pub target_language: LanguageTag,
    pub speakers: Vec<SpeakerProfile>,
    pub turn_range: TurnRange,
    pub emotional_arc: String,
}

impl Metadata {
    pub fn role(&self, role_id: &str) -> Option<&SpeakerProfile> {
        self.speakers.iter().find(|role| role.role_id == role_id)
    }

    pub fn role_ids(&self) -> BTreeSet<&str> {
        self.speakers
            .iter()
            .map(|role| role.role_id.as_str())
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneBeat {
    pub description: String,
    pub intended_tone: String,
    pub participating_roles: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Script {
    pub beats: Vec<SceneBeat>,
}

impl Script {
    /// Roles declared in the metadata that no beat references.
    pub fn uncovered_roles<'a>(&self, metadata: &'a Metadata) -> Vec<&'a str> {
        let covered: BTreeSet<&str> = self
            .beats
            .iter()
            .flat_map(|beat| beat.participating_roles.iter().map(String::as_str))
            .collect();
        metadata
            .speakers
            .iter()
            .map(|role| role.role_id.as_str())
            .filter(|role_id| !covered.contains(role_id))
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub turn_index: u32,
    pub role_id: String,
    pub text: String,
    pub emotion: String,
    pub speech_rate_modifier: f32,
    pub pause_after_ms: u64,
    /// Paralinguistic instruction handed verbatim to the TTS collaborator.
    pub delivery_note: String,
    pub paralinguistic_tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dialogue {
    pub id: Uuid,
    pub turns: Vec<Turn>,
}

impl Dialogue {
    pub fn new(turns: Vec<Turn>) -> Self {
        Self {
            id: Uuid::new_v4(),
            turns,
        }
    }

    pub fn turn(&self, turn_index: u32) -> Option<&Turn> {
        self.turns.iter().find(|turn| turn.turn_index == turn_index)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceSample {
    pub id: String,
    pub path: PathBuf,
    pub transcript: String,
    pub language: LanguageTag,
    pub gender: Gender,
    pub age_band: AgeBand,
}

/// Role → voice assignments for one dialogue. A role is bound exactly once
/// and no two roles may share a voice sample.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VoiceBindings {
    bindings: BTreeMap<String, VoiceSample>,
}

impl VoiceBindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&mut self, role_id: &str, sample: VoiceSample) -> Result<(), DomainError> {
        if self.bindings.contains_key(role_id) {
            return Err(DomainError::Internal(format!(
                "role `{role_id}` is already bound to a voice"
            )));
        }
        if self
            .bindings
            .values()
            .any(|bound| bound.id == sample.id)
        {
            return Err(DomainError::Internal(format!(
                "voice `{}` is already bound to another role",
                sample.id
            )));
        }
        self.bindings.insert(role_id.to_string(), sample);
        Ok(())
    }

    pub fn voice(&self, role_id: &str) -> Option<&VoiceSample> {
        self.bindings.get(role_id)
    }

    pub fn bound_voice_ids(&self) -> BTreeSet<String> {
        self.bindings
            .values()
            .map(|sample| sample.id.clone())
            .collect()
    }

    pub fn roles(&self) -> impl Iterator<Item = (&str, &VoiceSample)> {
        self.bindings
            .iter()
            .map(|(role, sample)| (role.as_str(), sample))
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

/// Raw audio hand-off unit between the coordinator and collaborators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioClip {
    pub samples: Vec<f32>,
    pub sample_rate_hz: u32,
}

impl AudioClip {
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate_hz == 0 {
            return 0;
        }
        (self.samples.len() as u64 * 1_000) / self.sample_rate_hz as u64
    }

    /// Parses WAV bytes into f32 samples, averaging multi-channel audio
    /// down to mono. The error is a bare detail string so adapters can
    /// attach their own failure context.
    pub fn from_wav_bytes(bytes: &[u8]) -> Result<Self, String> {
        let mut reader = hound::WavReader::new(std::io::Cursor::new(bytes))
            .map_err(|err| format!("wav parse: {err}"))?;
        let spec = reader.spec();
        let channels = spec.channels.max(1) as usize;

        let interleaved: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .samples::<f32>()
                .collect::<Result<_, _>>()
                .map_err(|err| format!("wav samples: {err}"))?,
            hound::SampleFormat::Int => {
                let scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .samples::<i32>()
                    .map(|sample| sample.map(|value| value as f32 / scale))
                    .collect::<Result<_, _>>()
                    .map_err(|err| format!("wav samples: {err}"))?
            }
        };

        let samples = if channels == 1 {
            interleaved
        } else {
            interleaved
                .chunks(channels)
                .map(|frame| frame.iter().sum::<f32>() / channels as f32)
                .collect()
        };
        Ok(Self {
            samples,
            sample_rate_hz: spec.sample_rate,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeechSegment {
    pub turn_index: u32,
    pub audio: AudioClip,
}

impl SpeechSegment {
    pub fn duration_ms(&self) -> u64 {
        self.audio.duration_ms()
    }
}

/// A dialogue plus its synthesized segments, ordered by turn index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeechDialogue {
    pub dialogue: Dialogue,
    pub sample_rate_hz: u32,
    segments: Vec<SpeechSegment>,
}

impl SpeechDialogue {
    /// Builds the timed sequence; segments are re-sorted by turn index so
    /// callers may hand them over in completion order.
    pub fn new(
        dialogue: Dialogue,
        mut segments: Vec<SpeechSegment>,
        sample_rate_hz: u32,
    ) -> Result<Self, DomainError> {
        segments.sort_by_key(|segment| segment.turn_index);
        for (turn, segment) in dialogue.turns.iter().zip(segments.iter()) {
            if turn.turn_index != segment.turn_index {
                return Err(DomainError::Internal(format!(
                    "segment set does not cover turn {}",
                    turn.turn_index
                )));
            }
        }
        if segments.len() != dialogue.turns.len() {
            return Err(DomainError::Internal(format!(
                "expected {} segments, got {}",
                dialogue.turns.len(),
                segments.len()
            )));
        }
        Ok(Self {
            dialogue,
            sample_rate_hz,
            segments,
        })
    }

    pub fn segments(&self) -> &[SpeechSegment] {
        &self.segments
    }

    pub fn segment(&self, turn_index: u32) -> Option<&SpeechSegment> {
        self.segments
            .iter()
            .find(|segment| segment.turn_index == turn_index)
    }

    /// Replaces the named segments, producing a new artifact; untouched
    /// turns keep their original audio.
    pub fn with_replaced_segments(
        self,
        replacements: Vec<SpeechSegment>,
    ) -> Result<Self, DomainError> {
        let mut segments = self.segments;
        for replacement in replacements {
            let slot = segments
                .iter_mut()
                .find(|segment| segment.turn_index == replacement.turn_index)
                .ok_or_else(|| {
                    DomainError::Internal(format!(
                        "no segment for turn {} to replace",
                        replacement.turn_index
                    ))
                })?;
            *slot = replacement;
        }
        Self::new(self.dialogue, segments, self.sample_rate_hz)
    }

    /// One continuous waveform with `pause_after_ms` of silence between
    /// consecutive segments, reproducing natural turn-taking latency.
    pub fn render_timeline(&self) -> Vec<f32> {
        let mut timeline = Vec::new();
        let last = self.segments.len().saturating_sub(1);
        for (position, segment) in self.segments.iter().enumerate() {
            timeline.extend_from_slice(&segment.audio.samples);
            if position == last {
                break;
            }
            if let Some(turn) = self.dialogue.turn(segment.turn_index) {
                let silence =
                    (turn.pause_after_ms * self.sample_rate_hz as u64 / 1_000) as usize;
                timeline.extend(std::iter::repeat(0.0).take(silence));
            }
        }
        timeline
    }

    pub fn total_duration_ms(&self) -> u64 {
        if self.sample_rate_hz == 0 {
            return 0;
        }
        (self.render_timeline().len() as u64 * 1_000) / self.sample_rate_hz as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(index: u32, role: &str, pause_after_ms: u64) -> Turn {
        Turn {
            turn_index: index,
            role_id: role.to_string(),
            text: format!("turn {index}"),
            emotion: "neutral".to_string(),
            speech_rate_modifier: 1.0,
            pause_after_ms,
            delivery_note: String::new(),
            paralinguistic_tags: Vec::new(),
        }
    }

    fn segment(index: u32, samples: usize) -> SpeechSegment {
        SpeechSegment {
            turn_index: index,
            audio: AudioClip {
                samples: vec![0.5; samples],
                sample_rate_hz: 1_000,
            },
        }
    }

    #[test]
    fn timeline_orders_segments_by_turn_index() {
        let dialogue = Dialogue::new(vec![
            turn(0, "role_1", 100),
            turn(1, "role_2", 100),
            turn(2, "role_1", 100),
        ]);
        // Completion order deliberately scrambled.
        let speech = SpeechDialogue::new(
            dialogue,
            vec![segment(2, 30), segment(0, 10), segment(1, 20)],
            1_000,
        )
        .expect("segments cover all turns");

        let indices: Vec<u32> = speech
            .segments()
            .iter()
            .map(|segment| segment.turn_index)
            .collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn timeline_inserts_pause_between_consecutive_segments() {
        let dialogue = Dialogue::new(vec![turn(0, "role_1", 500), turn(1, "role_2", 300)]);
        let speech =
            SpeechDialogue::new(dialogue, vec![segment(0, 10), segment(1, 10)], 1_000)
                .expect("segments cover all turns");

        // 10 + 500ms at 1kHz + 10; no trailing pause after the last turn.
        let timeline = speech.render_timeline();
        assert_eq!(timeline.len(), 10 + 500 + 10);
        assert!(timeline[10..510].iter().all(|sample| *sample == 0.0));
    }

    #[test]
    fn mismatched_segments_are_rejected() {
        let dialogue = Dialogue::new(vec![turn(0, "role_1", 0), turn(1, "role_2", 0)]);
        let result = SpeechDialogue::new(dialogue, vec![segment(0, 4)], 1_000);
        assert!(result.is_err());
    }

    #[test]
    fn replacing_a_segment_keeps_other_audio() {
        let dialogue = Dialogue::new(vec![turn(0, "role_1", 0), turn(1, "role_2", 0)]);
        let speech =
            SpeechDialogue::new(dialogue, vec![segment(0, 4), segment(1, 4)], 1_000)
                .expect("segments cover all turns");
        let original_first = speech.segment(0).expect("segment 0").audio.samples.clone();

        let replaced = speech
            .with_replaced_segments(vec![SpeechSegment {
                turn_index: 1,
                audio: AudioClip {
                    samples: vec![0.1; 8],
                    sample_rate_hz: 1_000,
                },
            }])
            .expect("replacement applies");

        assert_eq!(replaced.segment(0).expect("segment 0").audio.samples, original_first);
        assert_eq!(replaced.segment(1).expect("segment 1").audio.samples.len(), 8);
    }

    #[test]
    fn voice_bindings_reject_shared_voices() {
        let sample = |id: &str| VoiceSample {
            id: id.to_string(),
            path: PathBuf::from(format!("{id}.wav")),
            transcript: "reference".to_string(),
            language: LanguageTag::English,
            gender: Gender::Female,
            age_band: AgeBand::Thirties,
        };

        let mut bindings = VoiceBindings::new();
        bindings.bind("role_1", sample("voice-a")).expect("first bind");
        assert!(bindings.bind("role_2", sample("voice-a")).is_err());
        bindings.bind("role_2", sample("voice-b")).expect("distinct voice");
        assert_eq!(bindings.len(), 2);
    }

    #[test]
    fn age_band_distance_is_symmetric() {
        assert_eq!(AgeBand::Twenties.distance(AgeBand::Fifties), 3);
        assert_eq!(AgeBand::Fifties.distance(AgeBand::Twenties), 3);
        assert_eq!(AgeBand::from_age(34), AgeBand::Thirties);
    }

    #[test]
    fn stereo_wav_is_downmixed_to_mono() {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 16_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = std::io::Cursor::new(Vec::new());
        let mut writer = hound::WavWriter::new(&mut cursor, spec).expect("wav header");
        for frame in [[8_192i16, 24_576], [-16_384, 16_384]] {
            for sample in frame {
                writer.write_sample(sample).expect("wav sample");
            }
        }
        writer.finalize().expect("wav finalize");

        let clip = AudioClip::from_wav_bytes(&cursor.into_inner()).expect("decodes");
        assert_eq!(clip.sample_rate_hz, 16_000);
        assert_eq!(clip.samples.len(), 2);
        assert!((clip.samples[0] - 0.5).abs() < 1e-3);
        assert!(clip.samples[1].abs() < 1e-3);
    }

    #[test]
    fn garbage_bytes_are_not_a_wav() {
        assert!(AudioClip::from_wav_bytes(b"definitely not a wav file").is_err());
    }
}
