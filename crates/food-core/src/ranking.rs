//! Ranking of raw model scores into labelled predictions.

use crate::config::Activation;
use crate::types::Prediction;
use crate::{Error, Result};

/// Top-k predictions, best first.
///
/// Ties are broken by the lower class index, so the order is fully
/// deterministic. The score vector must have exactly one entry per class.
pub fn rank(scores: &[f32], class_names: &[String], k: usize) -> Result<Vec<Prediction>> {
    if scores.len() != class_names.len() {
        return Err(Error::LabelCountMismatch {
            scores: scores.len(),
            labels: class_names.len(),
        });
    }
    if let Some(i) = scores.iter().position(|s| !s.is_finite()) {
        return Err(Error::Inference(format!(
            "score for class {} is not finite ({})",
            i, scores[i]
        )));
    }

    let mut indexed: Vec<(usize, f32)> = scores.iter().copied().enumerate().collect();
    indexed.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

    Ok(indexed
        .into_iter()
        .take(k)
        .map(|(idx, confidence)| Prediction {
            label: class_names[idx].clone(),
            class_index: idx,
            confidence,
        })
        .collect())
}

/// Numerically stable softmax
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&x| (x - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Apply the configured output activation
pub fn activate(scores: Vec<f32>, activation: Activation) -> Vec<f32> {
    match activation {
        Activation::None => scores,
        Activation::Softmax if scores.is_empty() => scores,
        Activation::Softmax => softmax(&scores),
    }
}
