use crate::labels::ClassLabels;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClassificationError {
    #[error("Model returned {got} scores for {expected} classes")]
    ClassCountMismatch { expected: usize, got: usize },
    #[error("Model returned no scores")]
    EmptyOutput,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub class_id: usize,
    pub label: String,
    pub confidence: f32,
}

impl Prediction {
    /// Picks the most probable class from raw model scores.
    pub fn from_logits(logits: &[f32], labels: &ClassLabels) -> Result<Self, ClassificationError> {
        if logits.len() != labels.len() {
            return Err(ClassificationError::ClassCountMismatch {
                expected: labels.len(),
                got: logits.len(),
            });
        }

        let probabilities = softmax(logits);
        let (class_id, confidence) =
            argmax(&probabilities).ok_or(ClassificationError::EmptyOutput)?;
        let label = labels
            .get(class_id)
            .ok_or(ClassificationError::EmptyOutput)?
            .to_string();

        Ok(Self {
            class_id,
            label,
            confidence,
        })
    }
}

pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&x| (x - max).exp()).collect();
    let sum: f32 = exps.iter().sum();

    exps.into_iter().map(|e| e / sum).collect()
}

/// Index and value of the largest score. Ties resolve to the lowest index.
pub fn argmax(scores: &[f32]) -> Option<(usize, f32)> {
    scores
        .iter()
        .copied()
        .enumerate()
        .reduce(|accum, item| if item.1 > accum.1 { item } else { accum })
}
