/// Word-level similarity between a reference text and an ASR hypothesis:
/// 1 − WER, clamped to [0, 1]. Texts are lowercased and stripped of
/// punctuation before comparison.
pub fn text_similarity(reference: &str, hypothesis: &str) -> f32 {
    let reference = normalize_words(reference);
    let hypothesis = normalize_words(hypothesis);
    if reference.is_empty() {
        return if hypothesis.is_empty() { 1.0 } else { 0.0 };
    }
    let distance = word_edit_distance(&reference, &hypothesis);
    let wer = distance as f32 / reference.len() as f32;
    (1.0 - wer).clamp(0.0, 1.0)
}

fn normalize_words(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|word| {
            word.chars()
                .filter(|ch| ch.is_alphanumeric())
                .collect::<String>()
                .to_lowercase()
        })
        .filter(|word| !word.is_empty())
        .collect()
}

fn word_edit_distance(reference: &[String], hypothesis: &[String]) -> usize {
    let mut previous: Vec<usize> = (0..=hypothesis.len()).collect();
    let mut current = vec![0; hypothesis.len() + 1];
    for (i, ref_word) in reference.iter().enumerate() {
        current[0] = i + 1;
        for (j, hyp_word) in hypothesis.iter().enumerate() {
            let substitution = previous[j] + usize::from(ref_word != hyp_word);
            current[j + 1] = substitution
                .min(previous[j + 1] + 1)
                .min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[hypothesis.len()]
}

/// Removes bracketed markers, angle tags and parenthesised stage
/// directions. ASR never hears them, so they must not count against the
/// intelligibility comparison.
pub fn strip_markup(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut open: Option<char> = None;
    for ch in text.chars() {
        match open {
            Some(close) => {
                if ch == close {
                    open = None;
                }
            }
            None => match ch {
                '[' => open = Some(']'),
                '<' => open = Some('>'),
                '(' => open = Some(')'),
                _ => result.push(ch),
            },
        }
    }
    result
}

/// Cosine similarity between two speaker embeddings, mapped from [-1, 1]
/// onto [0, 1] so it composes with threshold gating. Mismatched or
/// degenerate vectors score zero.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    ((dot / (norm_a * norm_b) + 1.0) / 2.0).clamp(0.0, 1.0)
}

/// MOS on the 1–5 scale mapped onto [0, 1].
pub fn normalize_mos(mos: f32) -> f32 {
    ((mos - 1.0) / 4.0).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_texts_score_one() {
        assert_eq!(text_similarity("Hello there, world!", "hello there world"), 1.0);
    }

    #[test]
    fn fully_different_texts_score_zero() {
        assert_eq!(text_similarity("one two three", "four five six"), 0.0);
    }

    #[test]
    fn single_substitution_over_four_words() {
        let score = text_similarity("the quick brown fox", "the quick brown cat");
        assert!((score - 0.75).abs() < 1e-6);
    }

    #[test]
    fn empty_reference_only_matches_empty_hypothesis() {
        assert_eq!(text_similarity("", ""), 1.0);
        assert_eq!(text_similarity("", "noise"), 0.0);
    }

    #[test]
    fn markup_is_stripped_before_comparison() {
        assert_eq!(
            strip_markup("Well [laughter] fine (shrugs) then <strong>go</strong>"),
            "Well  fine  then go"
        );
        assert_eq!(
            text_similarity(&strip_markup("Oh [sigh] no"), "oh no"),
            1.0
        );
    }

    #[test]
    fn cosine_of_identical_vectors_is_one() {
        let v = vec![0.3, -0.5, 0.8];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_of_opposite_vectors_is_zero() {
        let a = vec![1.0, 0.0];
        let b = vec![-1.0, 0.0];
        assert!(cosine_similarity(&a, &b) < 1e-6);
    }

    #[test]
    fn cosine_rejects_mismatched_lengths() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
    }

    #[test]
    fn mos_scale_maps_onto_unit_interval() {
        assert_eq!(normalize_mos(1.0), 0.0);
        assert_eq!(normalize_mos(5.0), 1.0);
        assert!((normalize_mos(4.2) - 0.8).abs() < 1e-6);
    }
}
