//! Validation metrics for a binary classifier.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Held-out performance recorded in the artifact at training time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationMetrics {
    pub auc: f64,
    pub accuracy: f64,
    pub n_train: usize,
    pub n_validation: usize,
}

impl fmt::Display for ValidationMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ROC-AUC {:.4}, accuracy {:.4} ({} validation rows)",
            self.auc, self.accuracy, self.n_validation
        )
    }
}

/// Area under the ROC curve via the rank-sum statistic, with tied scores
/// sharing their average rank. `None` when either class is absent.
pub fn roc_auc(labels: &[f64], scores: &[f64]) -> Option<f64> {
    assert_eq!(labels.len(), scores.len(), "labels and scores must align");
    let n_pos = labels.iter().filter(|&&y| y == 1.0).count();
    let n_neg = labels.len() - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return None;
    }

    let ranks = average_ranks(scores);
    let positive_rank_sum: f64 = labels
        .iter()
        .zip(&ranks)
        .filter(|&(&y, _)| y == 1.0)
        .map(|(_, &r)| r)
        .sum();
    let n_pos = n_pos as f64;
    let u = positive_rank_sum - n_pos * (n_pos + 1.0) / 2.0;
    Some(u / (n_pos * n_neg as f64))
}

/// Fraction of rows classified correctly when scores at or above
/// `threshold` predict the positive class.
pub fn accuracy(labels: &[f64], scores: &[f64], threshold: f64) -> f64 {
    assert_eq!(labels.len(), scores.len(), "labels and scores must align");
    if labels.is_empty() {
        return 0.0;
    }
    let correct = labels
        .iter()
        .zip(scores)
        .filter(|&(&y, &s)| (s >= threshold) == (y == 1.0))
        .count();
    correct as f64 / labels.len() as f64
}

/// 1-based ranks; ties get the mean of the ranks they span.
fn average_ranks(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    let mut ranks = vec![0.0; values.len()];
    let mut start = 0;
    while start < order.len() {
        let mut end = start + 1;
        while end < order.len() && values[order[end]] == values[order[start]] {
            end += 1;
        }
        // Positions start..end hold ranks start+1..=end.
        let rank = (start + 1 + end) as f64 / 2.0;
        for &i in &order[start..end] {
            ranks[i] = rank;
        }
        start = end;
    }
    ranks
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_perfect_and_inverted_ranking() {
        let labels = [0.0, 0.0, 1.0, 1.0];
        assert_abs_diff_eq!(roc_auc(&labels, &[0.1, 0.2, 0.8, 0.9]).unwrap(), 1.0);
        assert_abs_diff_eq!(roc_auc(&labels, &[0.9, 0.8, 0.2, 0.1]).unwrap(), 0.0);
    }

    #[test]
    fn test_ties_count_half() {
        let labels = [0.0, 1.0];
        assert_abs_diff_eq!(roc_auc(&labels, &[0.5, 0.5]).unwrap(), 0.5);

        // One positive/negative pair is tied, the other is ordered.
        let labels = [0.0, 0.0, 1.0];
        assert_abs_diff_eq!(roc_auc(&labels, &[0.3, 0.7, 0.7]).unwrap(), 0.75);
    }

    #[test]
    fn test_auc_undefined_for_single_class() {
        assert!(roc_auc(&[1.0, 1.0], &[0.2, 0.4]).is_none());
    }

    #[test]
    fn test_accuracy_at_threshold() {
        let labels = [0.0, 1.0, 1.0, 0.0];
        let scores = [0.2, 0.6, 0.4, 0.9];
        assert_abs_diff_eq!(accuracy(&labels, &scores, 0.5), 0.5);
        assert_abs_diff_eq!(accuracy(&[], &[], 0.5), 0.0);
    }

    #[test]
    fn test_accuracy_counts_threshold_score_as_positive() {
        assert_abs_diff_eq!(accuracy(&[1.0, 0.0], &[0.5, 0.1], 0.5), 1.0);
        assert_abs_diff_eq!(accuracy(&[0.0], &[0.5], 0.5), 0.0);
    }

    #[test]
    fn test_average_ranks() {
        assert_eq!(average_ranks(&[3.0, 1.0, 3.0, 2.0]), vec![3.5, 1.0, 3.5, 2.0]);
    }
}
