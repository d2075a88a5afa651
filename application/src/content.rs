use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use dialogue_domain::{
    CompletionRequest, DecodingMode, Dialogue, DialogueRequest, DomainError, Gender, LanguageTag,
    LlmPort, Metadata, SamplingOptions, SceneBeat, Script, SpeakerProfile, AgeBand, Turn,
    TurnRange,
};

use crate::pool::WorkerPool;

/// Pause realisation: base silence scaled per category.
const PAUSE_BASE_MS: u64 = 150;

#[derive(Debug, Clone)]
pub struct ContentPipelineConfig {
    /// Fast-mode pairs (unconstrained + guided) allowed per stage.
    pub stage_attempts: u32,
    pub sampling: SamplingOptions,
}

impl Default for ContentPipelineConfig {
    fn default() -> Self {
        Self {
            stage_attempts: 3,
            sampling: SamplingOptions::default(),
        }
    }
}

/// Three sequential LLM stages: metadata → script → turn-level dialogue.
/// Each stage validates its artifact and retries with schema-guided
/// decoding before counting a failed attempt.
pub struct ContentPipeline {
    llm: Arc<WorkerPool<dyn LlmPort>>,
    config: ContentPipelineConfig,
}

impl ContentPipeline {
    pub fn new(llm: Arc<WorkerPool<dyn LlmPort>>, config: ContentPipelineConfig) -> Self {
        Self { llm, config }
    }

    pub async fn generate(
        &self,
        request: &DialogueRequest,
    ) -> Result<(Metadata, Script, Dialogue), DomainError> {
        let metadata = self.generate_metadata(request).await?;
        let script = self.generate_script(&metadata).await?;
        let dialogue = self.generate_dialogue(&metadata, &script).await?;
        Ok((metadata, script, dialogue))
    }

    pub async fn generate_metadata(
        &self,
        request: &DialogueRequest,
    ) -> Result<Metadata, DomainError> {
        let language = request.target_language.clone();
        let user_prompt = format!(
            "Topic prompt: {}\nDialogue language: {}\n\nDesign the conversation metadata.",
            request.prompt_text,
            language.label(),
        );
        self.generate_validated(
            "metadata_generation",
            METADATA_SYSTEM_PROMPT,
            &user_prompt,
            metadata_schema(),
            move |draft: MetadataDraft| draft.into_metadata(language.clone()),
        )
        .await
    }

    pub async fn generate_script(&self, metadata: &Metadata) -> Result<Script, DomainError> {
        let metadata_json = serde_json::to_string_pretty(metadata)
            .map_err(|err| DomainError::internal(format!("metadata serialization: {err}")))?;
        let user_prompt = format!(
            "Metadata:\n```json\n{metadata_json}\n```\n\nWrite the scene-beat script. Every declared role must take part in at least one beat."
        );
        let role_ids: Vec<String> = metadata
            .speakers
            .iter()
            .map(|role| role.role_id.clone())
            .collect();
        self.generate_validated(
            "script_generation",
            SCRIPT_SYSTEM_PROMPT,
            &user_prompt,
            script_schema(),
            move |draft: ScriptDraft| draft.into_script(&role_ids),
        )
        .await
    }

    pub async fn generate_dialogue(
        &self,
        metadata: &Metadata,
        script: &Script,
    ) -> Result<Dialogue, DomainError> {
        let metadata_json = serde_json::to_string_pretty(metadata)
            .map_err(|err| DomainError::internal(format!("metadata serialization: {err}")))?;
        let script_json = serde_json::to_string_pretty(script)
            .map_err(|err| DomainError::internal(format!("script serialization: {err}")))?;
        let user_prompt = format!(
            "Metadata:\n```json\n{metadata_json}\n```\n\nScript:\n```json\n{script_json}\n```\n\nGenerate the full conversation in {}.",
            metadata.target_language.label(),
        );
        let role_ids: Vec<String> = metadata
            .speakers
            .iter()
            .map(|role| role.role_id.clone())
            .collect();
        self.generate_validated(
            "dialogue_simulation",
            DIALOGUE_SYSTEM_PROMPT,
            &user_prompt,
            dialogue_schema(),
            move |draft: DialogueDraft| draft.into_dialogue(&role_ids),
        )
        .await
    }

    /// Fast-mode generation: one unconstrained attempt, then one
    /// schema-guided attempt for outputs that failed parsing or
    /// validation. Both failing consumes one stage attempt.
    async fn generate_validated<D, A, F>(
        &self,
        stage: &'static str,
        system_prompt: &str,
        user_prompt: &str,
        schema: Value,
        convert: F,
    ) -> Result<A, DomainError>
    where
        D: DeserializeOwned,
        F: Fn(D) -> Result<A, String>,
    {
        let mut last_failure = String::new();
        for attempt in 1..=self.config.stage_attempts {
            for mode in [DecodingMode::Unconstrained, DecodingMode::Guided] {
                let request = CompletionRequest {
                    system_prompt: system_prompt.to_string(),
                    user_prompt: user_prompt.to_string(),
                    schema: Some(schema.clone()),
                    mode,
                    sampling: self.config.sampling,
                };
                let worker = self.llm.checkout().await?;
                let raw = match worker.complete(request).await {
                    Ok(raw) => raw,
                    Err(err @ DomainError::Transport { .. }) => return Err(err),
                    Err(err) => {
                        last_failure = err.to_string();
                        continue;
                    }
                };
                drop(worker);
                match parse_and_convert::<D, A, F>(&raw, &convert) {
                    Ok(artifact) => {
                        tracing::debug!(stage, attempt, ?mode, "stage output accepted");
                        return Ok(artifact);
                    }
                    Err(detail) => {
                        tracing::debug!(stage, attempt, ?mode, detail, "stage output rejected");
                        last_failure = detail;
                    }
                }
            }
        }
        Err(DomainError::RetryExhausted {
            stage,
            attempts: self.config.stage_attempts,
            detail: last_failure,
        })
    }
}

fn parse_and_convert<D, A, F>(raw: &str, convert: &F) -> Result<A, String>
where
    D: DeserializeOwned,
    F: Fn(D) -> Result<A, String>,
{
    let payload = extract_json(raw).ok_or_else(|| "no JSON object in output".to_string())?;
    let draft: D =
        serde_json::from_str(payload).map_err(|err| format!("invalid JSON: {err}"))?;
    convert(draft)
}

/// Pulls the JSON object out of a completion that may wrap it in prose or
/// a fenced code block.
pub(crate) fn extract_json(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    if let Some(fence_start) = trimmed.find("```") {
        let after = &trimmed[fence_start + 3..];
        let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
        let body = &after[body_start..];
        if let Some(fence_end) = body.find("```") {
            let candidate = body[..fence_end].trim();
            if candidate.starts_with('{') {
                return Some(candidate);
            }
        }
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (end > start).then(|| &trimmed[start..=end])
}

fn resolve_speech_rate(label: &str) -> Result<f32, String> {
    match label.to_ascii_lowercase().as_str() {
        "slow" => Ok(1.0),
        "medium" => Ok(1.05),
        "fast" => Ok(1.1),
        other => Err(format!("unknown speech_rate `{other}`")),
    }
}

fn resolve_pause_after(label: &str) -> Result<u64, String> {
    let multiplier = match label.to_ascii_lowercase().as_str() {
        "interrupted" => 0.0,
        "short" => 0.5,
        "medium" => 1.0,
        "long" => 1.5,
        other => return Err(format!("unknown pause_after `{other}`")),
    };
    Ok((PAUSE_BASE_MS as f64 * multiplier) as u64)
}

#[derive(Debug, Deserialize)]
struct SpeakerDraft {
    role_id: String,
    name: String,
    gender: String,
    age: u8,
    occupation: String,
    nationality: String,
    #[serde(default)]
    personality_traits: Vec<String>,
    #[serde(default)]
    accent: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MetadataDraft {
    topic: String,
    scenario_description: String,
    emotional_arc: String,
    min_turns: u32,
    max_turns: u32,
    speakers: Vec<SpeakerDraft>,
}

impl MetadataDraft {
    fn into_metadata(self, language: LanguageTag) -> Result<Metadata, String> {
        if self.speakers.len() < 2 {
            return Err(format!(
                "metadata declares {} speaker(s), need at least 2",
                self.speakers.len()
            ));
        }
        let mut seen = std::collections::BTreeSet::new();
        for speaker in &self.speakers {
            if !seen.insert(speaker.role_id.as_str()) {
                return Err(format!("duplicate role_id `{}`", speaker.role_id));
            }
        }
        if self.min_turns < 2 || self.max_turns < self.min_turns {
            return Err(format!(
                "invalid turn range {}..{}",
                self.min_turns, self.max_turns
            ));
        }
        let speakers = self
            .speakers
            .into_iter()
            .map(|draft| {
                let gender = Gender::parse(&draft.gender)
                    .ok_or_else(|| format!("unknown gender `{}`", draft.gender))?;
                Ok(SpeakerProfile {
                    role_id: draft.role_id,
                    name: draft.name,
                    gender,
                    age_band: AgeBand::from_age(draft.age),
                    occupation: draft.occupation,
                    nationality: draft.nationality,
                    personality_traits: draft.personality_traits,
                    accent: draft.accent,
                })
            })
            .collect::<Result<Vec<_>, String>>()?;
        Ok(Metadata {
            topic: self.topic,
            scenario_description: self.scenario_description,
            target_language: language,
            speakers,
            turn_range: TurnRange {
                min: self.min_turns,
                max: self.max_turns,
            },
            emotional_arc: self.emotional_arc,
        })
    }
}

#[derive(Debug, Deserialize)]
struct BeatDraft {
    description: String,
    intended_tone: String,
    participating_roles: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ScriptDraft {
    beats: Vec<BeatDraft>,
}

impl ScriptDraft {
    fn into_script(self, role_ids: &[String]) -> Result<Script, String> {
        if self.beats.is_empty() {
            return Err("script has no beats".to_string());
        }
        for beat in &self.beats {
            for role in &beat.participating_roles {
                if !role_ids.contains(role) {
                    return Err(format!("beat references undeclared role `{role}`"));
                }
            }
        }
        let covered: std::collections::BTreeSet<&str> = self
            .beats
            .iter()
            .flat_map(|beat| beat.participating_roles.iter().map(String::as_str))
            .collect();
        let missing: Vec<&str> = role_ids
            .iter()
            .map(String::as_str)
            .filter(|role| !covered.contains(role))
            .collect();
        if !missing.is_empty() {
            return Err(format!("script never involves role(s): {}", missing.join(", ")));
        }
        Ok(Script {
            beats: self
                .beats
                .into_iter()
                .map(|beat| SceneBeat {
                    description: beat.description,
                    intended_tone: beat.intended_tone,
                    participating_roles: beat.participating_roles,
                })
                .collect(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct TurnDraft {
    role_id: String,
    text: String,
    emotion: String,
    speech_rate: String,
    pause_after: String,
    delivery_note: String,
    #[serde(default)]
    paralinguistic_tags: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct DialogueDraft {
    turns: Vec<TurnDraft>,
}

impl DialogueDraft {
    fn into_dialogue(self, role_ids: &[String]) -> Result<Dialogue, String> {
        if self.turns.len() < 2 {
            return Err(format!("dialogue has {} turn(s), need at least 2", self.turns.len()));
        }
        let turns = self
            .turns
            .into_iter()
            .enumerate()
            .map(|(index, draft)| {
                if !role_ids.contains(&draft.role_id) {
                    return Err(format!(
                        "turn {index} spoken by undeclared role `{}`",
                        draft.role_id
                    ));
                }
                if draft.text.trim().is_empty() {
                    return Err(format!("turn {index} has empty text"));
                }
                Ok(Turn {
                    turn_index: index as u32,
                    role_id: draft.role_id,
                    text: draft.text,
                    emotion: draft.emotion,
                    speech_rate_modifier: resolve_speech_rate(&draft.speech_rate)?,
                    pause_after_ms: resolve_pause_after(&draft.pause_after)?,
                    delivery_note: draft.delivery_note,
                    paralinguistic_tags: draft.paralinguistic_tags,
                })
            })
            .collect::<Result<Vec<_>, String>>()?;
        Ok(Dialogue::new(turns))
    }
}

fn metadata_schema() -> Value {
    json!({
        "type": "object",
        "required": ["topic", "scenario_description", "emotional_arc", "min_turns", "max_turns", "speakers"],
        "properties": {
            "topic": {"type": "string"},
            "scenario_description": {"type": "string"},
            "emotional_arc": {"type": "string"},
            "min_turns": {"type": "integer", "minimum": 2},
            "max_turns": {"type": "integer", "minimum": 2},
            "speakers": {
                "type": "array",
                "minItems": 2,
                "items": {
                    "type": "object",
                    "required": ["role_id", "name", "gender", "age", "occupation", "nationality", "personality_traits"],
                    "properties": {
                        "role_id": {"type": "string"},
                        "name": {"type": "string"},
                        "gender": {"type": "string", "enum": ["male", "female"]},
                        "age": {"type": "integer", "minimum": 10, "maximum": 90},
                        "occupation": {"type": "string"},
                        "nationality": {"type": "string"},
                        "personality_traits": {"type": "array", "items": {"type": "string"}},
                        "accent": {"type": ["string", "null"]}
                    }
                }
            }
        }
    })
}

fn script_schema() -> Value {
    json!({
        "type": "object",
        "required": ["beats"],
        "properties": {
            "beats": {
                "type": "array",
                "minItems": 1,
                "items": {
                    "type": "object",
                    "required": ["description", "intended_tone", "participating_roles"],
                    "properties": {
                        "description": {"type": "string"},
                        "intended_tone": {"type": "string"},
                        "participating_roles": {"type": "array", "items": {"type": "string"}}
                    }
                }
            }
        }
    })
}

fn dialogue_schema() -> Value {
    json!({
        "type": "object",
        "required": ["turns"],
        "properties": {
            "turns": {
                "type": "array",
                "minItems": 2,
                "items": {
                    "type": "object",
                    "required": ["role_id", "text", "emotion", "speech_rate", "pause_after", "delivery_note"],
                    "properties": {
                        "role_id": {"type": "string"},
                        "text": {"type": "string"},
                        "emotion": {"type": "string"},
                        "speech_rate": {"type": "string", "enum": ["slow", "medium", "fast"]},
                        "pause_after": {"type": "string", "enum": ["interrupted", "short", "medium", "long"]},
                        "delivery_note": {"type": "string"},
                        "paralinguistic_tags": {"type": "array", "items": {"type": "string"}}
                    }
                }
            }
        }
    })
}

const METADATA_SYSTEM_PROMPT: &str = "\
You are a conversation metadata designer. From a topic prompt, design the \
setup for a realistic spoken conversation between two or more people.

Output ONLY a JSON object with these fields:
- topic: short phrase naming the subject
- scenario_description: 30-60 words describing situation, place and stakes
- emotional_arc: one sentence on how the mood should evolve
- min_turns / max_turns: expected number of spoken turns (8-12 typical, never below 4)
- speakers: array of at least two speaker objects, each with role_id \
(\"role_1\", \"role_2\", ...), name, gender (male|female), age (10-90), \
occupation, nationality, personality_traits (1-4 short strings) and an \
optional accent tag.

Characters must be distinct, plausible and consistent with the prompt and \
the requested dialogue language.";

const SCRIPT_SYSTEM_PROMPT: &str = "\
You are a conversation script designer. Given conversation metadata, plan \
the narrative as an ordered list of scene beats.

Output ONLY a JSON object: {\"beats\": [...]}. Each beat has:
- description: what happens and what is said about the main topic
- intended_tone: the emotional colour of the beat
- participating_roles: the role_ids speaking in that beat

Cover opening, main discussion and wrap-up. Every declared role must \
appear in at least one beat. Keep beats consistent with the metadata's \
scenario, personalities and emotional arc.";

const DIALOGUE_SYSTEM_PROMPT: &str = "\
You are a dialogue generator. Expand the metadata and script into a full \
conversation of natural spoken turns.

Output ONLY a JSON object: {\"turns\": [...]}. Each turn has:
- role_id: a declared role
- text: the spoken words, with natural hesitations and contractions; \
paralinguistic markers like [laughter] or [breath] may be embedded
- emotion: the speaker's emotional state in 1-3 words
- speech_rate: slow | medium | fast
- pause_after: interrupted | short | medium | long
- delivery_note: 1-2 short sentences describing ONLY how the line should \
sound (voice quality, pace, pitch); never describe what is said
- paralinguistic_tags: markers used in the text, if any

Alternate speakers realistically, follow the script's beats in order, hit \
the expected turn count, and write every line in the requested language.";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_json_handles_fenced_blocks() {
        let raw = "Sure, here you go:\n```json\n{\"turns\": []}\n```\nDone.";
        assert_eq!(extract_json(raw), Some("{\"turns\": []}"));
    }

    #[test]
    fn extract_json_falls_back_to_braces() {
        let raw = "prefix {\"a\": {\"b\": 1}} suffix";
        assert_eq!(extract_json(raw), Some("{\"a\": {\"b\": 1}}"));
        assert_eq!(extract_json("no json here"), None);
    }

    #[test]
    fn speech_rate_and_pause_tables_match_reference_values() {
        assert_eq!(resolve_speech_rate("slow").unwrap(), 1.0);
        assert_eq!(resolve_speech_rate("fast").unwrap(), 1.1);
        assert!(resolve_speech_rate("frantic").is_err());
        assert_eq!(resolve_pause_after("interrupted").unwrap(), 0);
        assert_eq!(resolve_pause_after("short").unwrap(), 75);
        assert_eq!(resolve_pause_after("medium").unwrap(), 150);
        assert_eq!(resolve_pause_after("long").unwrap(), 225);
    }

    #[test]
    fn metadata_draft_requires_two_distinct_roles() {
        let draft = MetadataDraft {
            topic: "t".into(),
            scenario_description: "s".into(),
            emotional_arc: "e".into(),
            min_turns: 8,
            max_turns: 12,
            speakers: vec![SpeakerDraft {
                role_id: "role_1".into(),
                name: "A".into(),
                gender: "female".into(),
                age: 30,
                occupation: "engineer".into(),
                nationality: "France".into(),
                personality_traits: vec![],
                accent: None,
            }],
        };
        assert!(draft.into_metadata(LanguageTag::English).is_err());
    }

    #[test]
    fn script_draft_rejects_uncovered_roles() {
        let roles = vec!["role_1".to_string(), "role_2".to_string()];
        let draft = ScriptDraft {
            beats: vec![BeatDraft {
                description: "opening".into(),
                intended_tone: "light".into(),
                participating_roles: vec!["role_1".into()],
            }],
        };
        let err = draft.into_script(&roles).unwrap_err();
        assert!(err.contains("role_2"));
    }

    #[test]
    fn dialogue_draft_normalises_turn_indices() {
        let roles = vec!["role_1".to_string(), "role_2".to_string()];
        let draft = DialogueDraft {
            turns: vec![
                TurnDraft {
                    role_id: "role_1".into(),
                    text: "Hey!".into(),
                    emotion: "warm".into(),
                    speech_rate: "medium".into(),
                    pause_after: "short".into(),
                    delivery_note: "Bright, friendly tone.".into(),
                    paralinguistic_tags: vec![],
                },
                TurnDraft {
                    role_id: "role_2".into(),
                    text: "Oh, hi.".into(),
                    emotion: "surprised".into(),
                    speech_rate: "fast".into(),
                    pause_after: "medium".into(),
                    delivery_note: "Rising pitch, caught off guard.".into(),
                    paralinguistic_tags: vec![],
                },
            ],
        };
        let dialogue = draft.into_dialogue(&roles).expect("valid draft");
        let indices: Vec<u32> = dialogue.turns.iter().map(|t| t.turn_index).collect();
        assert_eq!(indices, vec![0, 1]);
        assert_eq!(dialogue.turns[1].pause_after_ms, 150);
    }
}
