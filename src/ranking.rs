use thiserror::Error;

use crate::labels::LabelSet;
use crate::models::Prediction;

#[derive(Debug, Error)]
pub enum RankError {
    #[error("classifier returned {outputs} probabilities for {labels} labels")]
    LabelMismatch { outputs: usize, labels: usize },
    #[error("classifier returned out-of-range probability {value} at index {index}")]
    OutOfRange { index: usize, value: f32 },
}

/// Pair the `k` most probable indices with their labels, highest first.
///
/// Ties keep the lower index first. Probabilities are reported as-is.
pub fn top_k(probs: &[f32], labels: &LabelSet, k: usize) -> Result<Vec<Prediction>, RankError> {
    if probs.len() != labels.len() {
        return Err(RankError::LabelMismatch {
            outputs: probs.len(),
            labels: labels.len(),
        });
    }
    if let Some((index, &value)) = probs
        .iter()
        .enumerate()
        .find(|(_, p)| !(0.0..=1.0).contains(*p))
    {
        return Err(RankError::OutOfRange { index, value });
    }

    let mut order: Vec<usize> = (0..probs.len()).collect();
    // stable, so equal probabilities stay in index order
    order.sort_by(|&a, &b| probs[b].total_cmp(&probs[a]));

    Ok(order
        .into_iter()
        .take(k)
        .map(|i| Prediction {
            label: labels[i].to_string(),
            confidence: probs[i],
        })
        .collect())
}
