use std::collections::BTreeSet;
use std::sync::Arc;

use rand::seq::SliceRandom;

use dialogue_domain::{
    DomainError, Metadata, SpeakerProfile, VoiceBankPort, VoiceBindings, VoiceSample,
};

/// Candidates tied on age distance are shuffled among the closest few so
/// repeated runs do not always bind the same voices.
const SELECTION_WINDOW: usize = 5;

/// In-memory index over the voice bank. Samples are loaded once at startup;
/// selection filters on language and gender, ranks by age-band distance and
/// picks randomly inside the closest window.
pub struct SpeakerBank {
    samples: Vec<VoiceSample>,
}

impl SpeakerBank {
    pub async fn load(bank: Arc<dyn VoiceBankPort>) -> Result<Self, DomainError> {
        let samples = bank.load_samples().await?;
        if samples.is_empty() {
            return Err(DomainError::internal("voice bank is empty"));
        }
        tracing::info!(samples = samples.len(), "voice bank loaded");
        Ok(Self { samples })
    }

    pub fn from_samples(samples: Vec<VoiceSample>) -> Self {
        Self { samples }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Binds one distinct voice to every role declared in the metadata.
    /// Fails with `NoMatchingVoice` before any audio work starts if a role
    /// cannot be cast.
    pub fn bind_all(&self, metadata: &Metadata) -> Result<VoiceBindings, DomainError> {
        let mut bindings = VoiceBindings::default();
        for speaker in &metadata.speakers {
            let taken = bindings.bound_voice_ids();
            let sample = self.select(speaker, metadata, &taken)?;
            bindings.bind(&speaker.role_id, sample)?;
        }
        Ok(bindings)
    }

    fn select(
        &self,
        speaker: &SpeakerProfile,
        metadata: &Metadata,
        excluded: &BTreeSet<String>,
    ) -> Result<VoiceSample, DomainError> {
        let mut candidates: Vec<&VoiceSample> = self
            .samples
            .iter()
            .filter(|sample| {
                sample.language == metadata.target_language
                    && sample.gender == speaker.gender
                    && !excluded.contains(&sample.id)
            })
            .collect();
        if candidates.is_empty() {
            return Err(DomainError::NoMatchingVoice {
                role_id: speaker.role_id.clone(),
                language: metadata.target_language.label().to_string(),
                gender: speaker.gender.label().to_string(),
            });
        }
        candidates.sort_by_key(|sample| sample.age_band.distance(speaker.age_band));
        let window = &candidates[..candidates.len().min(SELECTION_WINDOW)];
        let chosen = window
            .choose(&mut rand::thread_rng())
            .ok_or_else(|| DomainError::internal("empty selection window"))?;
        Ok((*chosen).clone())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use dialogue_domain::{
        AgeBand, Gender, LanguageTag, Metadata, SpeakerProfile, TurnRange, VoiceSample,
    };

    use super::SpeakerBank;

    fn sample(id: &str, gender: Gender, age_band: AgeBand) -> VoiceSample {
        VoiceSample {
            id: id.to_string(),
            path: format!("{id}.wav").into(),
            transcript: "reference line".to_string(),
            language: LanguageTag::English,
            gender,
            age_band,
        }
    }

    fn speaker(role_id: &str, gender: Gender, age: u8) -> SpeakerProfile {
        SpeakerProfile {
            role_id: role_id.to_string(),
            name: "Sam".to_string(),
            gender,
            age_band: AgeBand::from_age(age),
            occupation: "teacher".to_string(),
            nationality: "UK".to_string(),
            personality_traits: vec![],
            accent: None,
        }
    }

    fn metadata(speakers: Vec<SpeakerProfile>) -> Metadata {
        Metadata {
            topic: "weekend plans".to_string(),
            scenario_description: "two friends catch up".to_string(),
            target_language: LanguageTag::English,
            speakers,
            turn_range: TurnRange { min: 8, max: 12 },
            emotional_arc: "light throughout".to_string(),
        }
    }

    #[test]
    fn bind_all_assigns_distinct_voices() {
        let bank = SpeakerBank::from_samples(vec![
            sample("v1", Gender::Female, AgeBand::Thirties),
            sample("v2", Gender::Female, AgeBand::Thirties),
            sample("v3", Gender::Male, AgeBand::Fifties),
        ]);
        let metadata = metadata(vec![
            speaker("role_1", Gender::Female, 34),
            speaker("role_2", Gender::Female, 31),
        ]);
        let bindings = bank.bind_all(&metadata).expect("castable");
        let ids = bindings.bound_voice_ids();
        assert_eq!(ids.len(), 2);
        assert!(ids.is_subset(&BTreeSet::from(["v1".to_string(), "v2".to_string()])));
    }

    #[test]
    fn exhausted_pool_reports_no_matching_voice() {
        let bank = SpeakerBank::from_samples(vec![sample(
            "v1",
            Gender::Female,
            AgeBand::Thirties,
        )]);
        let metadata = metadata(vec![
            speaker("role_1", Gender::Female, 34),
            speaker("role_2", Gender::Female, 31),
        ]);
        let err = bank.bind_all(&metadata).expect_err("second role uncastable");
        assert!(matches!(
            err,
            dialogue_domain::DomainError::NoMatchingVoice { ref role_id, .. } if role_id == "role_2"
        ));
    }

    #[test]
    fn selection_respects_gender_filter() {
        let bank = SpeakerBank::from_samples(vec![
            sample("m1", Gender::Male, AgeBand::Twenties),
            sample("f1", Gender::Female, AgeBand::Forties),
            sample("f2", Gender::Female, AgeBand::Forties),
        ]);
        let metadata = metadata(vec![speaker("role_1", Gender::Male, 70)]);
        let bindings = bank.bind_all(&metadata).expect("castable");
        assert_eq!(
            bindings.voice("role_1").map(|v| v.id.as_str()),
            Some("m1")
        );
    }

    #[test]
    fn ranking_keeps_closest_age_bands_in_window() {
        // Six far voices push the window past its size; the near voice must
        // survive ranking and stay eligible, so binding two roles of the
        // same profile always succeeds.
        let mut samples = vec![sample("near", Gender::Male, AgeBand::Forties)];
        for i in 0..6 {
            samples.push(sample(&format!("far_{i}"), Gender::Male, AgeBand::Nineties));
        }
        let bank = SpeakerBank::from_samples(samples);
        let metadata = metadata(vec![
            speaker("role_1", Gender::Male, 45),
            speaker("role_2", Gender::Male, 45),
        ]);
        let bindings = bank.bind_all(&metadata).expect("castable");
        assert_eq!(bindings.len(), 2);
    }
}
