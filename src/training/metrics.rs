//! Classification metrics derived from evaluation predictions.

use serde::{Deserialize, Serialize};

/// Precision, recall and F1 of one class.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassReport {
    /// `tp / (tp + fp)`, 0 when the class was never predicted.
    pub precision: f32,
    /// `tp / (tp + fn)`, 0 when the class never occurs.
    pub recall: f32,
    /// Harmonic mean of precision and recall.
    pub f1: f32,
    /// Number of examples whose true label is this class.
    pub support: usize,
}

/// Add `(label, prediction)` pairs to a `confusion[true][predicted]` matrix,
/// growing it to at least `classes x classes`.
pub(crate) fn accumulate_confusion(
    confusion: &mut Vec<Vec<usize>>,
    classes: usize,
    predictions: &[usize],
    labels: &[f32],
) {
    let size = confusion.len().max(classes);
    if size > confusion.len() {
        for row in confusion.iter_mut() {
            row.resize(size, 0);
        }
        confusion.resize_with(size, || vec![0; size]);
    }
    for (&pred, &label) in predictions.iter().zip(labels) {
        confusion[label as usize][pred] += 1;
    }
}

fn ratio(num: usize, den: usize) -> f32 {
    if den == 0 {
        0.0
    } else {
        num as f32 / den as f32
    }
}

/// Per-class report of a square confusion matrix, ordered by class index.
///
/// ```
/// use nanoquant::training::class_reports;
///
/// // true 0: predicted 0 twice, 1 once; true 1: predicted 1 once
/// let reports = class_reports(&[vec![2, 1], vec![0, 1]]);
/// assert_eq!(reports[0].support, 3);
/// assert_eq!(reports[1].precision, 0.5);
/// ```
#[must_use]
pub fn class_reports(confusion: &[Vec<usize>]) -> Vec<ClassReport> {
    (0..confusion.len())
        .map(|class| {
            let tp = confusion[class][class];
            let support: usize = confusion[class].iter().sum();
            let predicted: usize = confusion.iter().map(|row| row[class]).sum();
            let precision = ratio(tp, predicted);
            let recall = ratio(tp, support);
            let f1 = if precision + recall > 0.0 {
                2.0 * precision * recall / (precision + recall)
            } else {
                0.0
            };
            ClassReport {
                precision,
                recall,
                f1,
                support,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confusion_grows_with_classes() {
        let mut confusion = Vec::new();
        accumulate_confusion(&mut confusion, 2, &[0, 1, 1], &[0.0, 1.0, 0.0]);
        assert_eq!(confusion, vec![vec![1, 1], vec![0, 1]]);

        accumulate_confusion(&mut confusion, 3, &[2], &[2.0]);
        assert_eq!(confusion, vec![vec![1, 1, 0], vec![0, 1, 0], vec![0, 0, 1]]);
    }

    #[test]
    fn test_reports_handle_absent_classes() {
        // class 2 never occurs and is never predicted
        let reports = class_reports(&[vec![3, 1, 0], vec![1, 1, 0], vec![0, 0, 0]]);
        assert!((reports[0].precision - 0.75).abs() < 1e-6);
        assert!((reports[0].recall - 0.75).abs() < 1e-6);
        assert!((reports[1].f1 - 0.5).abs() < 1e-6);
        assert_eq!(reports[2].support, 0);
        assert_eq!((reports[2].precision, reports[2].f1), (0.0, 0.0));
    }
}
