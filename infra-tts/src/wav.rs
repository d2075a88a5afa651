use std::io::Cursor;

use dialogue_domain::AudioClip;

/// Mono 16-bit PCM WAV from a clip's f32 samples.
pub fn encode(clip: &AudioClip) -> Result<Vec<u8>, String> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: clip.sample_rate_hz,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    let mut writer = hound::WavWriter::new(&mut cursor, spec)
        .map_err(|err| format!("wav header: {err}"))?;
    for sample in &clip.samples {
        let scaled = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        writer
            .write_sample(scaled)
            .map_err(|err| format!("wav sample: {err}"))?;
    }
    writer.finalize().map_err(|err| format!("wav finalize: {err}"))?;
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use dialogue_domain::AudioClip;

    use super::encode;

    #[test]
    fn encoded_clip_decodes_to_the_same_shape() {
        let clip = AudioClip {
            samples: vec![0.0, 0.25, -0.25, 0.5],
            sample_rate_hz: 16_000,
        };
        let decoded =
            AudioClip::from_wav_bytes(&encode(&clip).expect("encode")).expect("decode");
        assert_eq!(decoded.sample_rate_hz, 16_000);
        assert_eq!(decoded.samples.len(), 4);
        assert!((decoded.samples[1] - 0.25).abs() < 1e-3);
    }
}
