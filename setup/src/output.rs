use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde_json::json;

use dialogue_application::{AcceptedDialogue, BatchOutcome};
use dialogue_domain::SpeechDialogue;

/// Writes every accepted dialogue into its own `dialogue_<id>/` directory
/// and a batch-level `manifest.json` covering accepted and abandoned items.
pub fn write_outcome(output_dir: &Path, outcome: &BatchOutcome) -> anyhow::Result<()> {
    fs::create_dir_all(output_dir)
        .with_context(|| format!("creating output dir {}", output_dir.display()))?;

    let mut manifest_accepted = Vec::new();
    for accepted in &outcome.accepted {
        let dir = write_accepted(output_dir, accepted)?;
        manifest_accepted.push(json!({
            "item_id": accepted.item_id,
            "dir": dir.file_name().and_then(|name| name.to_str()),
            "dialogue_id": accepted.dialogue.id,
            "turns": accepted.dialogue.turns.len(),
            "duration_ms": accepted.speech.total_duration_ms(),
            "content_regenerations": accepted.content_regenerations_used,
            "resynthesis_rounds": accepted.resynthesis_rounds_used,
        }));
    }

    let manifest = json!({
        "accepted": manifest_accepted,
        "abandoned": outcome
            .abandoned
            .iter()
            .map(|item| json!({
                "item_id": item.item_id,
                "stage": item.state.label(),
                "reason": item.reason,
            }))
            .collect::<Vec<_>>(),
    });
    write_json(&output_dir.join("manifest.json"), &manifest)?;
    tracing::info!(
        accepted = outcome.accepted.len(),
        abandoned = outcome.abandoned.len(),
        dir = %output_dir.display(),
        "batch output written"
    );
    Ok(())
}

fn write_accepted(output_dir: &Path, accepted: &AcceptedDialogue) -> anyhow::Result<PathBuf> {
    let dir = output_dir.join(format!("dialogue_{}", accepted.item_id));
    fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;

    write_wav(&dir.join("dialogue.wav"), &accepted.speech)?;

    let transcript = json!({
        "metadata": accepted.metadata,
        "script": accepted.script,
        "dialogue": accepted.dialogue,
        "voice_bindings": accepted.bindings,
    });
    write_json(&dir.join("transcript.json"), &transcript)?;
    write_json(
        &dir.join("content_scores.json"),
        &serde_json::to_value(&accepted.content_scores).context("content scores")?,
    )?;
    write_json(
        &dir.join("speech_scores.json"),
        &json!({
            "scorecard": accepted.speech_report.scorecard(),
            "turns": accepted.speech_report.turns(),
            "passed": accepted.speech_report.passed(),
        }),
    )?;
    Ok(dir)
}

/// Renders the timed conversation (pauses included) as mono 16-bit PCM.
pub fn write_wav(path: &Path, speech: &SpeechDialogue) -> anyhow::Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: speech.sample_rate_hz,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)
        .with_context(|| format!("creating {}", path.display()))?;
    for sample in speech.render_timeline() {
        writer
            .write_sample((sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
            .context("writing wav sample")?;
    }
    writer.finalize().context("finalizing wav")?;
    Ok(())
}

fn write_json(path: &Path, value: &serde_json::Value) -> anyhow::Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("rendering json")?;
    fs::write(path, rendered).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}
