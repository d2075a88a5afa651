use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Named scalar scores in [0, 1] attached to one artifact. Created once per
/// evaluation; a re-evaluation produces a new scorecard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityScorecard {
    scores: BTreeMap<String, f32>,
}

impl QualityScorecard {
    pub fn from_scores(scores: impl IntoIterator<Item = (String, f32)>) -> Self {
        Self {
            scores: scores
                .into_iter()
                .map(|(metric, score)| (metric, score.clamp(0.0, 1.0)))
                .collect(),
        }
    }

    pub fn score(&self, metric: &str) -> Option<f32> {
        self.scores.get(metric).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f32)> {
        self.scores
            .iter()
            .map(|(metric, score)| (metric.as_str(), *score))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricFailure {
    pub metric: String,
    pub score: f32,
    pub threshold: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateVerdict {
    failures: Vec<MetricFailure>,
}

impl GateVerdict {
    pub fn passed(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failures(&self) -> &[MetricFailure] {
        &self.failures
    }

    pub fn describe(&self) -> String {
        self.failures
            .iter()
            .map(|failure| {
                format!(
                    "{}={:.3} (threshold {:.3})",
                    failure.metric, failure.score, failure.threshold
                )
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Threshold comparator over a named metric set. Every tracked metric must
/// meet its threshold; a metric missing from the scorecard counts as zero.
#[derive(Debug, Clone)]
pub struct QualityGate {
    thresholds: BTreeMap<String, f32>,
}

impl QualityGate {
    pub fn new(thresholds: impl IntoIterator<Item = (String, f32)>) -> Self {
        Self {
            thresholds: thresholds.into_iter().collect(),
        }
    }

    pub fn accept(&self, scorecard: &QualityScorecard) -> GateVerdict {
        let failures = self
            .thresholds
            .iter()
            .filter_map(|(metric, threshold)| {
                let score = scorecard.score(metric).unwrap_or(0.0);
                (score < *threshold).then(|| MetricFailure {
                    metric: metric.clone(),
                    score,
                    threshold: *threshold,
                })
            })
            .collect();
        GateVerdict { failures }
    }
}
