//! Top-k classification accuracy from logits and labels.

use ndarray::ArrayView2;

use crate::error::{Error, Result};

/// Compute top-k accuracy percentages for each `k` in `ks`.
///
/// For each example, the `k` highest-scoring class indices are taken and a
/// hit is recorded if the true label is among them. Each percentage is
/// `100 * hits / N`, computed independently per `k` (not cumulative).
///
/// Ties are resolved in favor of the lower class index (stable descending
/// sort); this is an implementation choice and should not be relied on when
/// logits contain exact duplicates. A `k` larger than the number of classes
/// is clamped to it.
pub fn topk_accuracy(logits: ArrayView2<'_, f32>, labels: &[usize], ks: &[usize]) -> Result<Vec<f64>> {
    let (n, num_classes) = logits.dim();
    if n == 0 {
        return Err(Error::TrainingError {
            reason: "topk_accuracy called with an empty batch".to_string(),
        });
    }
    if labels.len() != n {
        return Err(Error::TrainingError {
            reason: format!("label count {} does not match batch size {n}", labels.len()),
        });
    }

    let max_k = ks.iter().copied().max().unwrap_or(1).min(num_classes);

    // Rank of the true label within each row's descending score order.
    let mut label_ranks = Vec::with_capacity(n);
    for (row, &label) in logits.outer_iter().zip(labels) {
        if label >= num_classes {
            return Err(Error::TrainingError {
                reason: format!("label {label} out of range for {num_classes} classes"),
            });
        }
        let mut order: Vec<usize> = (0..num_classes).collect();
        order.sort_by(|&a, &b| row[b].partial_cmp(&row[a]).unwrap_or(std::cmp::Ordering::Equal));
        let rank = order[..max_k].iter().position(|&c| c == label);
        label_ranks.push(rank);
    }

    let mut result = Vec::with_capacity(ks.len());
    for &k in ks {
        let k = k.min(num_classes);
        let hits = label_ranks.iter().filter(|r| matches!(r, Some(rank) if *rank < k)).count();
        result.push(100.0 * hits as f64 / n as f64);
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_top1_perfect() {
        // Correct class has the strictly highest score for every example.
        let logits = array![[5.0f32, 1.0, 0.0], [0.0, 7.0, 2.0], [1.0, 2.0, 9.0]];
        let labels = [0, 1, 2];
        let acc = topk_accuracy(logits.view(), &labels, &[1]).unwrap();
        assert_eq!(acc, vec![100.0]);
    }

    #[test]
    fn test_top5_zero_when_excluded() {
        // Correct class (index 6) ranks below the top 5 for every example.
        let logits = array![
            [9.0f32, 8.0, 7.0, 6.0, 5.0, 4.0, 0.0],
            [9.0, 8.0, 7.0, 6.0, 5.0, 4.0, -1.0],
        ];
        let labels = [6, 6];
        let acc = topk_accuracy(logits.view(), &labels, &[1, 5]).unwrap();
        assert_eq!(acc, vec![0.0, 0.0]);
    }

    #[test]
    fn test_per_k_independent() {
        // First example correct at rank 0, second at rank 2.
        let logits = array![[3.0f32, 2.0, 1.0, 0.0], [3.0, 2.0, 1.0, 0.0]];
        let labels = [0, 2];
        let acc = topk_accuracy(logits.view(), &labels, &[1, 3]).unwrap();
        assert_eq!(acc, vec![50.0, 100.0]);
    }

    #[test]
    fn test_k_clamped_to_classes() {
        let logits = array![[1.0f32, 0.0], [0.0, 1.0]];
        let labels = [0, 1];
        let acc = topk_accuracy(logits.view(), &labels, &[1, 5]).unwrap();
        assert_eq!(acc, vec![100.0, 100.0]);
    }

    #[test]
    fn test_label_out_of_range() {
        let logits = array![[1.0f32, 0.0]];
        assert!(topk_accuracy(logits.view(), &[3], &[1]).is_err());
    }

    #[test]
    fn test_empty_batch_rejected() {
        let logits = ndarray::Array2::<f32>::zeros((0, 4));
        let labels: [usize; 0] = [];
        assert!(topk_accuracy(logits.view(), &labels, &[1]).is_err());
    }
}
