use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};

use dialogue_domain::{
    CompletionRequest, DecodingMode, Dialogue, DomainError, GateVerdict, LlmPort, Metadata,
    QualityGate, QualityScorecard, SamplingOptions, Script,
};

use crate::content::extract_json;
use crate::pool::WorkerPool;

#[derive(Debug, Clone)]
pub struct ContentFilterConfig {
    pub consistency_threshold: f32,
    pub coherence_threshold: f32,
    pub naturalness_threshold: f32,
    /// Dialogues shorter than this are rejected without spending judge calls.
    pub min_turns: u32,
    pub judge_attempts: u32,
    pub sampling: SamplingOptions,
}

impl Default for ContentFilterConfig {
    fn default() -> Self {
        Self {
            consistency_threshold: 0.85,
            coherence_threshold: 0.85,
            naturalness_threshold: 0.85,
            min_turns: 4,
            judge_attempts: 3,
            sampling: SamplingOptions::default(),
        }
    }
}

/// LLM-judged gate over generated content. Three independent judgements
/// (metadata consistency, narrative coherence, spoken naturalness) are
/// collected into one scorecard and compared against the configured
/// thresholds.
pub struct ContentQualityFilter {
    llm: Arc<WorkerPool<dyn LlmPort>>,
    gate: QualityGate,
    config: ContentFilterConfig,
}

impl ContentQualityFilter {
    pub fn new(llm: Arc<WorkerPool<dyn LlmPort>>, config: ContentFilterConfig) -> Self {
        let gate = QualityGate::new([
            ("consistency".to_string(), config.consistency_threshold),
            ("coherence".to_string(), config.coherence_threshold),
            ("naturalness".to_string(), config.naturalness_threshold),
        ]);
        Self { llm, gate, config }
    }

    /// Structural floor checked before any judge call.
    pub fn meets_turn_floor(&self, dialogue: &Dialogue) -> bool {
        dialogue.turns.len() as u32 >= self.config.min_turns
    }

    pub async fn evaluate(
        &self,
        metadata: &Metadata,
        script: &Script,
        dialogue: &Dialogue,
    ) -> Result<(QualityScorecard, GateVerdict), DomainError> {
        let metadata_json = serde_json::to_string_pretty(metadata)
            .map_err(|err| DomainError::internal(format!("metadata serialization: {err}")))?;
        let script_json = serde_json::to_string_pretty(script)
            .map_err(|err| DomainError::internal(format!("script serialization: {err}")))?;
        let dialogue_json = serde_json::to_string_pretty(dialogue)
            .map_err(|err| DomainError::internal(format!("dialogue serialization: {err}")))?;

        let consistency = self.judge(
            "consistency",
            CONSISTENCY_SYSTEM_PROMPT,
            format!(
                "Metadata:\n```json\n{metadata_json}\n```\n\nDialogue:\n```json\n{dialogue_json}\n```"
            ),
        );
        let coherence = self.judge(
            "coherence",
            COHERENCE_SYSTEM_PROMPT,
            format!(
                "Script:\n```json\n{script_json}\n```\n\nDialogue:\n```json\n{dialogue_json}\n```"
            ),
        );
        let naturalness = self.judge(
            "naturalness",
            NATURALNESS_SYSTEM_PROMPT,
            format!("Dialogue:\n```json\n{dialogue_json}\n```"),
        );
        let (consistency, coherence, naturalness) =
            futures::future::try_join3(consistency, coherence, naturalness).await?;

        let scorecard = QualityScorecard::from_scores([
            ("consistency".to_string(), consistency),
            ("coherence".to_string(), coherence),
            ("naturalness".to_string(), naturalness),
        ]);
        let verdict = self.gate.accept(&scorecard);
        if !verdict.passed() {
            tracing::debug!(failures = %verdict.describe(), "content gate rejected dialogue");
        }
        Ok((scorecard, verdict))
    }

    /// One judgement with the same two-step decoding as generation: an
    /// unconstrained call, then a schema-guided retry on invalid output.
    async fn judge(
        &self,
        metric: &'static str,
        system_prompt: &str,
        user_prompt: String,
    ) -> Result<f32, DomainError> {
        let mut last_failure = String::new();
        for attempt in 1..=self.config.judge_attempts {
            for mode in [DecodingMode::Unconstrained, DecodingMode::Guided] {
                let request = CompletionRequest {
                    system_prompt: system_prompt.to_string(),
                    user_prompt: user_prompt.clone(),
                    schema: Some(judgement_schema()),
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
                match parse_judgement(&raw) {
                    Ok(score) => {
                        tracing::debug!(metric, attempt, score, "judgement accepted");
                        return Ok(score);
                    }
                    Err(detail) => {
                        tracing::debug!(metric, attempt, ?mode, detail, "judgement rejected");
                        last_failure = detail;
                    }
                }
            }
        }
        Err(DomainError::Evaluation {
            metric,
            detail: format!(
                "no valid judgement after {} attempt(s): {last_failure}",
                self.config.judge_attempts
            ),
        })
    }
}

#[derive(Debug, Deserialize)]
struct JudgementDraft {
    score: f32,
    #[allow(dead_code)]
    #[serde(default)]
    reasoning: String,
}

/// Judges score on a 0–10 scale; normalised here onto [0, 1].
fn parse_judgement(raw: &str) -> Result<f32, String> {
    let payload = extract_json(raw).ok_or_else(|| "no JSON object in output".to_string())?;
    let draft: JudgementDraft =
        serde_json::from_str(payload).map_err(|err| format!("invalid JSON: {err}"))?;
    if !(0.0..=10.0).contains(&draft.score) {
        return Err(format!("score {} outside 0-10 scale", draft.score));
    }
    Ok(draft.score / 10.0)
}

fn judgement_schema() -> Value {
    json!({
        "type": "object",
        "required": ["score", "reasoning"],
        "properties": {
            "score": {"type": "number", "minimum": 0, "maximum": 10},
            "reasoning": {"type": "string"}
        }
    })
}

const CONSISTENCY_SYSTEM_PROMPT: &str = "\
You are a dialogue quality judge. Rate how consistent the conversation is \
with its metadata: do the speakers match their declared names, ages, \
occupations and personalities, does the content stay on the declared topic \
and scenario, and is it written in the declared language?

Score 0-10 (10 = fully consistent). Output ONLY a JSON object: \
{\"score\": <number>, \"reasoning\": \"<one or two sentences>\"}.";

const COHERENCE_SYSTEM_PROMPT: &str = "\
You are a dialogue quality judge. Rate how coherently the conversation \
flows: do turns respond to one another, does it follow the script's beats \
in order, and does it reach a sensible conclusion without contradictions \
or abrupt jumps?

Score 0-10 (10 = fully coherent). Output ONLY a JSON object: \
{\"score\": <number>, \"reasoning\": \"<one or two sentences>\"}.";

const NATURALNESS_SYSTEM_PROMPT: &str = "\
You are a dialogue quality judge. Rate how natural the conversation sounds \
as speech: contractions, hesitations and interruptions where people would \
use them, turn lengths a person would actually say aloud, and no written-\
register prose.

Score 0-10 (10 = fully natural). Output ONLY a JSON object: \
{\"score\": <number>, \"reasoning\": \"<one or two sentences>\"}.";

#[cfg(test)]
mod tests {
    use super::parse_judgement;

    #[test]
    fn judgement_scale_is_normalised() {
        let score = parse_judgement(r#"{"score": 8.5, "reasoning": "solid"}"#).expect("valid");
        assert!((score - 0.85).abs() < 1e-6);
    }

    #[test]
    fn out_of_scale_scores_are_rejected() {
        assert!(parse_judgement(r#"{"score": 11, "reasoning": "x"}"#).is_err());
        assert!(parse_judgement(r#"{"score": -1, "reasoning": "x"}"#).is_err());
    }

    #[test]
    fn prose_wrapped_judgement_is_extracted() {
        let raw = "The dialogue holds up well.\n```json\n{\"score\": 9, \"reasoning\": \"ok\"}\n```";
        assert!((parse_judgement(raw).expect("valid") - 0.9).abs() < 1e-6);
    }
}
