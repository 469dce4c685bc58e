//! Streaming audio classifier abstraction.
//!
//! The real neural model runtime is an external collaborator (out of
//! scope); this module defines the contract the detector core speaks
//! against, plus two in-repo implementations used in tests: a null
//! classifier and a scripted one driven by a fixed result sequence.

use std::collections::VecDeque;

/// A single labeled class score, e.g. `{"Clapping", 0.82}`.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassScore {
    pub name: String,
    pub score: f32,
}

/// A classification result for one submitted block.
#[derive(Debug, Clone, Default)]
pub struct ClassificationResult {
    pub classifications: Vec<ClassScore>,
}

/// Contract for a streaming classifier session. `submit` requires a
/// strictly increasing `timestamp_ms` for a given session; implementers
/// should reject or panic on violation since the detector core treats
/// this as an internal invariant, never user input.
pub trait StreamingClassifier: Send {
    fn submit(&mut self, block: &[f32], timestamp_ms: i64) -> Result<(), String>;

    /// Drains any results produced since the last call. Returns them in
    /// submission order.
    fn poll_results(&mut self) -> Vec<ClassificationResult>;

    fn close(&mut self);
}

/// Always reports an empty classification set. Used when no model is
/// configured, or in tests that only exercise the feature-based scorer.
#[derive(Default)]
pub struct NullClassifier {
    last_timestamp_ms: Option<i64>,
    pending: VecDeque<ClassificationResult>,
}

impl StreamingClassifier for NullClassifier {
    fn submit(&mut self, _block: &[f32], timestamp_ms: i64) -> Result<(), String> {
        if let Some(last) = self.last_timestamp_ms {
            if timestamp_ms <= last {
                return Err(format!(
                    "non-monotonic timestamp: {timestamp_ms} <= {last}"
                ));
            }
        }
        self.last_timestamp_ms = Some(timestamp_ms);
        self.pending.push_back(ClassificationResult::default());
        Ok(())
    }

    fn poll_results(&mut self) -> Vec<ClassificationResult> {
        self.pending.drain(..).collect()
    }

    fn close(&mut self) {
        self.pending.clear();
    }
}

/// Returns a pre-scripted sequence of results in submission order,
/// regardless of the submitted audio. Deterministic stand-in for model
/// output in integration tests.
pub struct ScriptedClassifier {
    script: VecDeque<ClassificationResult>,
    last_timestamp_ms: Option<i64>,
    pending: VecDeque<ClassificationResult>,
}

impl ScriptedClassifier {
    pub fn new(script: Vec<ClassificationResult>) -> Self {
        Self {
            script: script.into(),
            last_timestamp_ms: None,
            pending: VecDeque::new(),
        }
    }
}

impl StreamingClassifier for ScriptedClassifier {
    fn submit(&mut self, _block: &[f32], timestamp_ms: i64) -> Result<(), String> {
        if let Some(prev) = self.last_timestamp_ms {
            if timestamp_ms <= prev {
                return Err(format!(
                    "non-monotonic timestamp: {timestamp_ms} <= {prev}"
                ));
            }
        }
        self.last_timestamp_ms = Some(timestamp_ms);
        let next = self.script.pop_front().unwrap_or_default();
        self.pending.push_back(next);
        Ok(())
    }

    fn poll_results(&mut self) -> Vec<ClassificationResult> {
        self.pending.drain(..).collect()
    }

    fn close(&mut self) {
        self.pending.clear();
    }
}

/// Labels that count as positive evidence of a clap, and the one that
/// counts against it (per the fusion rule in the detector).
pub const POSITIVE_LABELS: &[&str] = &["Hands", "Clapping", "Cap gun"];
pub const NEGATIVE_LABELS: &[&str] = &["Finger snapping"];

/// Computes the yamnet-derived component of the fused score.
pub fn yamnet_score(result: &ClassificationResult) -> f32 {
    let positive: f32 = result
        .classifications
        .iter()
        .filter(|c| POSITIVE_LABELS.contains(&c.name.as_str()))
        .map(|c| c.score)
        .sum();
    let negative: f32 = result
        .classifications
        .iter()
        .filter(|c| NEGATIVE_LABELS.contains(&c.name.as_str()))
        .map(|c| c.score)
        .sum();
    positive - negative
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_classifier_rejects_non_monotonic_timestamps() {
        let mut c = NullClassifier::default();
        c.submit(&[0.0; 4], 100).unwrap();
        assert!(c.submit(&[0.0; 4], 100).is_err());
        assert!(c.submit(&[0.0; 4], 50).is_err());
        assert!(c.submit(&[0.0; 4], 101).is_ok());
    }

    #[test]
    fn null_classifier_results_are_empty() {
        let mut c = NullClassifier::default();
        c.submit(&[0.0; 4], 1).unwrap();
        let results = c.poll_results();
        assert_eq!(results.len(), 1);
        assert!(results[0].classifications.is_empty());
    }

    #[test]
    fn scripted_classifier_replays_in_order() {
        let script = vec![
            ClassificationResult {
                classifications: vec![ClassScore {
                    name: "Clapping".into(),
                    score: 0.9,
                }],
            },
            ClassificationResult::default(),
        ];
        let mut c = ScriptedClassifier::new(script);
        c.submit(&[], 10).unwrap();
        c.submit(&[], 20).unwrap();
        let results = c.poll_results();
        assert_eq!(results.len(), 2);
        assert!((yamnet_score(&results[0]) - 0.9).abs() < 1e-6);
        assert_eq!(yamnet_score(&results[1]), 0.0);
    }

    #[test]
    fn yamnet_score_subtracts_negative_label() {
        let result = ClassificationResult {
            classifications: vec![
                ClassScore {
                    name: "Clapping".into(),
                    score: 0.8,
                },
                ClassScore {
                    name: "Finger snapping".into(),
                    score: 0.3,
                },
            ],
        };
        assert!((yamnet_score(&result) - 0.5).abs() < 1e-6);
    }
}
