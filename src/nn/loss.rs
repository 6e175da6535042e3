//! Cross-entropy loss over logits.

use ndarray::Array2;

use crate::error::{Error, Result};

/// Mean cross-entropy loss with softmax, plus the gradient with respect to
/// the logits.
///
/// Numerically stable (log-sum-exp with row max subtraction). The gradient is
/// `(softmax(logits) - onehot(labels)) / N`, so seeding the backward pass
/// with it directly yields mean-reduced gradients.
pub fn cross_entropy(logits: &Array2<f32>, labels: &[usize]) -> Result<(f64, Array2<f32>)> {
    let (n, num_classes) = logits.dim();
    if n == 0 || labels.len() != n {
        return Err(Error::TrainingError {
            reason: format!(
                "cross_entropy batch mismatch: {n} logit rows, {} labels",
                labels.len()
            ),
        });
    }

    let mut grad = Array2::<f32>::zeros((n, num_classes));
    let mut loss = 0.0f64;

    for (i, (row, &label)) in logits.outer_iter().zip(labels).enumerate() {
        if label >= num_classes {
            return Err(Error::TrainingError {
                reason: format!("label {label} out of range for {num_classes} classes"),
            });
        }
        let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let mut sum_exp = 0.0f32;
        for &v in row.iter() {
            sum_exp += (v - max).exp();
        }
        loss += (sum_exp.ln() - (row[label] - max)) as f64;

        let inv_n = 1.0 / n as f32;
        for (c, &v) in row.iter().enumerate() {
            let softmax = (v - max).exp() / sum_exp;
            grad[[i, c]] = (softmax - if c == label { 1.0 } else { 0.0 }) * inv_n;
        }
    }

    Ok((loss / n as f64, grad))
}
