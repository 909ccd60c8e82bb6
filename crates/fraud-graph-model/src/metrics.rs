//! Binary classification metrics.
//!
//! All ratios with a zero denominator are reported as 0. AUC metrics need
//! both classes present; with a single class they are 0 and a warning is
//! logged.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

use fraud_graph_core::ThresholdMetric;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionCounts {
    pub true_positives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
    pub true_negatives: usize,
}

impl ConfusionCounts {
    /// Count outcomes, predicting positive when `prob >= threshold`.
    pub fn at_threshold(labels: &[bool], probabilities: &[f64], threshold: f64) -> Self {
        let mut counts = Self::default();
        for (label, p) in labels.iter().zip(probabilities) {
            counts.record(*label, *p >= threshold);
        }
        counts
    }

    pub fn from_predictions(labels: &[bool], predictions: &[bool]) -> Self {
        let mut counts = Self::default();
        for (label, pred) in labels.iter().zip(predictions) {
            counts.record(*label, *pred);
        }
        counts
    }

    fn record(&mut self, label: bool, predicted: bool) {
        match (label, predicted) {
            (true, true) => self.true_positives += 1,
            (false, true) => self.false_positives += 1,
            (true, false) => self.false_negatives += 1,
            (false, false) => self.true_negatives += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.true_positives + self.false_positives + self.false_negatives + self.true_negatives
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassificationMetrics {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub specificity: f64,
    pub fpr: f64,
    pub fnr: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roc_auc: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pr_auc: Option<f64>,
    pub confusion: ConfusionCounts,
}

impl ClassificationMetrics {
    pub fn from_confusion(c: ConfusionCounts) -> Self {
        let precision = ratio(c.true_positives, c.true_positives + c.false_positives);
        let recall = ratio(c.true_positives, c.true_positives + c.false_negatives);
        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };
        Self {
            accuracy: ratio(c.true_positives + c.true_negatives, c.total()),
            precision,
            recall,
            f1,
            specificity: ratio(c.true_negatives, c.true_negatives + c.false_positives),
            fpr: ratio(c.false_positives, c.false_positives + c.true_negatives),
            fnr: ratio(c.false_negatives, c.false_negatives + c.true_positives),
            roc_auc: None,
            pr_auc: None,
            confusion: c,
        }
    }

    /// Threshold-dependent metrics plus ROC-AUC and PR-AUC.
    pub fn compute(labels: &[bool], probabilities: &[f64], threshold: f64) -> Self {
        let mut metrics =
            Self::from_confusion(ConfusionCounts::at_threshold(labels, probabilities, threshold));
        metrics.roc_auc = Some(roc_auc(labels, probabilities));
        metrics.pr_auc = Some(average_precision(labels, probabilities));
        metrics
    }

    pub fn value(&self, metric: ThresholdMetric) -> f64 {
        match metric {
            ThresholdMetric::F1 => self.f1,
            ThresholdMetric::Precision => self.precision,
            ThresholdMetric::Recall => self.recall,
            ThresholdMetric::Accuracy => self.accuracy,
        }
    }
}

impl fmt::Display for ClassificationMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "acc={:.4} precision={:.4} recall={:.4} f1={:.4}",
            self.accuracy, self.precision, self.recall, self.f1
        )?;
        if let (Some(roc), Some(pr)) = (self.roc_auc, self.pr_auc) {
            write!(f, " roc_auc={:.4} pr_auc={:.4}", roc, pr)?;
        }
        let c = &self.confusion;
        write!(
            f,
            " [tp={} fp={} fn={} tn={}]",
            c.true_positives, c.false_positives, c.false_negatives, c.true_negatives
        )
    }
}

fn class_counts(labels: &[bool]) -> (usize, usize) {
    let pos = labels.iter().filter(|l| **l).count();
    (pos, labels.len() - pos)
}

/// Area under the ROC curve via the rank-sum statistic, ties averaged.
pub fn roc_auc(labels: &[bool], scores: &[f64]) -> f64 {
    let (pos, neg) = class_counts(labels);
    if pos == 0 || neg == 0 {
        warn!(positives = pos, negatives = neg, "ROC-AUC needs both classes, reporting 0");
        return 0.0;
    }
    let mut order: Vec<usize> = (0..labels.len()).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    let mut rank_sum = 0.0;
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && scores[order[j + 1]] == scores[order[i]] {
            j += 1;
        }
        // ranks are 1-based; tied block i..=j shares the mean rank
        let mean_rank = (i + j) as f64 / 2.0 + 1.0;
        rank_sum += mean_rank * order[i..=j].iter().filter(|&&k| labels[k]).count() as f64;
        i = j + 1;
    }
    let pos = pos as f64;
    (rank_sum - pos * (pos + 1.0) / 2.0) / (pos * neg as f64)
}

/// Area under the precision-recall curve as average precision:
/// `Σ (R_n - R_{n-1}) P_n` over distinct score thresholds, highest first.
pub fn average_precision(labels: &[bool], scores: &[f64]) -> f64 {
    let (pos, neg) = class_counts(labels);
    if pos == 0 || neg == 0 {
        warn!(positives = pos, negatives = neg, "PR-AUC needs both classes, reporting 0");
        return 0.0;
    }
    let mut order: Vec<usize> = (0..labels.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

    let (mut tp, mut fp) = (0usize, 0usize);
    let mut prev_recall = 0.0;
    let mut ap = 0.0;
    let mut i = 0;
    while i < order.len() {
        let threshold = scores[order[i]];
        while i < order.len() && scores[order[i]] == threshold {
            if labels[order[i]] {
                tp += 1;
            } else {
                fp += 1;
            }
            i += 1;
        }
        let recall = tp as f64 / pos as f64;
        let precision = tp as f64 / (tp + fp) as f64;
        ap += (recall - prev_recall) * precision;
        prev_recall = recall;
    }
    ap
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdPoint {
    pub threshold: f64,
    pub metrics: ClassificationMetrics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdSweep {
    pub metric: ThresholdMetric,
    pub points: Vec<ThresholdPoint>,
    pub best_threshold: f64,
    pub best_value: f64,
}

/// Evaluate every threshold in `grid`. The best point is the first one
/// reaching the maximum value of `metric`.
pub fn sweep_thresholds(
    labels: &[bool],
    probabilities: &[f64],
    grid: &[f64],
    metric: ThresholdMetric,
) -> ThresholdSweep {
    let points: Vec<ThresholdPoint> = grid
        .iter()
        .map(|&threshold| ThresholdPoint {
            threshold,
            metrics: ClassificationMetrics::from_confusion(ConfusionCounts::at_threshold(
                labels,
                probabilities,
                threshold,
            )),
        })
        .collect();

    let mut best_threshold = grid.first().copied().unwrap_or(0.5);
    let mut best_value = f64::NEG_INFINITY;
    for point in &points {
        let value = point.metrics.value(metric);
        if value > best_value {
            best_value = value;
            best_threshold = point.threshold;
        }
    }
    if points.is_empty() {
        best_value = 0.0;
    }

    ThresholdSweep {
        metric,
        points,
        best_threshold,
        best_value,
    }
}
