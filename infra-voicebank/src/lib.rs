//! Voice bank backed by a CommonVoice-style `validated.tsv` manifest plus
//! a directory of mono WAV clips. One voice per `client_id`: the first
//! usable row wins, so a person is never cast as two characters.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;

use dialogue_configuration::VoiceBankConfig;
use dialogue_domain::{
    AgeBand, AudioClip, DomainError, Gender, LanguageTag, VoiceBankPort, VoiceSample,
};

pub struct CommonVoiceBank {
    manifest_path: PathBuf,
    audio_dir: PathBuf,
    language: LanguageTag,
}

#[derive(Debug, Deserialize)]
struct ManifestRow {
    client_id: String,
    path: String,
    sentence: String,
    #[serde(default)]
    age: String,
    #[serde(default)]
    gender: String,
}

impl CommonVoiceBank {
    pub fn from_config(config: &VoiceBankConfig) -> Result<Self, DomainError> {
        let language = LanguageTag::parse(&config.language).ok_or_else(|| {
            DomainError::internal(format!(
                "voice bank language `{}` is not recognised",
                config.language
            ))
        })?;
        Ok(Self {
            manifest_path: config.manifest_path.clone(),
            audio_dir: config.audio_dir.clone(),
            language,
        })
    }

    fn parse_manifest(&self, raw: &str) -> Vec<VoiceSample> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .flexible(true)
            .from_reader(raw.as_bytes());

        let mut samples: Vec<VoiceSample> = Vec::new();
        let mut skipped = 0usize;
        for row in reader.deserialize::<ManifestRow>() {
            let row = match row {
                Ok(row) => row,
                Err(_) => {
                    skipped += 1;
                    continue;
                }
            };
            // Rows without demographic labels cannot be cast.
            let (Some(age_band), Some(gender)) =
                (AgeBand::parse(&row.age), Gender::parse(&row.gender))
            else {
                skipped += 1;
                continue;
            };
            if row.sentence.trim().is_empty() || row.path.trim().is_empty() {
                skipped += 1;
                continue;
            }
            if samples.iter().any(|sample| sample.id == row.client_id) {
                continue;
            }
            samples.push(VoiceSample {
                id: row.client_id,
                path: PathBuf::from(row.path),
                transcript: row.sentence,
                language: self.language.clone(),
                gender,
                age_band,
            });
        }
        if skipped > 0 {
            tracing::debug!(skipped, "manifest rows without usable labels ignored");
        }
        samples
    }
}

#[async_trait]
impl VoiceBankPort for CommonVoiceBank {
    async fn load_samples(&self) -> Result<Vec<VoiceSample>, DomainError> {
        let raw = tokio::fs::read_to_string(&self.manifest_path)
            .await
            .map_err(|err| {
                DomainError::internal(format!(
                    "reading manifest {}: {err}",
                    self.manifest_path.display()
                ))
            })?;
        let samples = self.parse_manifest(&raw);
        tracing::info!(
            voices = samples.len(),
            manifest = %self.manifest_path.display(),
            "voice bank manifest loaded"
        );
        Ok(samples)
    }

    async fn load_clip(&self, sample: &VoiceSample) -> Result<AudioClip, DomainError> {
        let path = self.audio_dir.join(&sample.path);
        let bytes = tokio::fs::read(&path).await.map_err(|err| {
            DomainError::internal(format!("reading clip {}: {err}", path.display()))
        })?;
        AudioClip::from_wav_bytes(&bytes)
            .map_err(|detail| DomainError::internal(format!("clip {}: {detail}", path.display())))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use dialogue_configuration::VoiceBankConfig;
    use dialogue_domain::{AgeBand, Gender, VoiceBankPort};

    use super::CommonVoiceBank;

    const MANIFEST: &str = "client_id\tpath\tsentence\tage\tgender\n\
        cv_a\tclips/a.wav\tShe sells sea shells.\tthirties\tfemale\n\
        cv_a\tclips/a2.wav\tAnother reading.\tthirties\tfemale\n\
        cv_b\tclips/b.wav\tIt rained all week.\tfourties\tmale_masculine\n\
        cv_c\tclips/c.wav\tNo labels here.\t\t\n\
        cv_d\tclips/d.wav\t\tfifties\tfemale\n";

    fn bank_with_manifest(dir: &std::path::Path) -> CommonVoiceBank {
        let manifest_path = dir.join("validated.tsv");
        let mut file = std::fs::File::create(&manifest_path).expect("manifest file");
        file.write_all(MANIFEST.as_bytes()).expect("manifest content");
        CommonVoiceBank::from_config(&VoiceBankConfig {
            manifest_path,
            audio_dir: dir.join("clips"),
            language: "English".to_string(),
        })
        .expect("valid config")
    }

    #[tokio::test]
    async fn manifest_rows_are_filtered_and_deduplicated() {
        let dir = tempfile::tempdir().expect("temp dir");
        let bank = bank_with_manifest(dir.path());

        let samples = bank.load_samples().await.expect("manifest loads");
        assert_eq!(samples.len(), 2, "unlabelled and duplicate rows dropped");

        let first = &samples[0];
        assert_eq!(first.id, "cv_a");
        assert_eq!(first.transcript, "She sells sea shells.");
        assert_eq!(first.age_band, AgeBand::Thirties);

        let second = &samples[1];
        assert_eq!(second.gender, Gender::Male);
        assert_eq!(second.age_band, AgeBand::Forties);
    }

    #[tokio::test]
    async fn clips_resolve_against_the_audio_dir() {
        let dir = tempfile::tempdir().expect("temp dir");
        let bank = bank_with_manifest(dir.path());
        std::fs::create_dir_all(dir.path().join("clips").join("clips")).expect("clip dir");

        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 16_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let clip_path = dir.path().join("clips").join("clips").join("a.wav");
        let mut writer = hound::WavWriter::create(&clip_path, spec).expect("wav file");
        for value in [0i16, 8_192, -8_192, 16_384] {
            writer.write_sample(value).expect("sample");
        }
        writer.finalize().expect("finalize");

        let samples = bank.load_samples().await.expect("manifest loads");
        let clip = bank.load_clip(&samples[0]).await.expect("clip loads");
        assert_eq!(clip.sample_rate_hz, 16_000);
        assert_eq!(clip.samples.len(), 4);
        assert!((clip.samples[1] - 0.25).abs() < 1e-3);
    }
}
