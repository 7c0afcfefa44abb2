//! Confusion-matrix evaluation of a trained classifier.

use crate::error::EngineError;
use crate::events::{TracingSink, TrainingEvent, TrainingEventSink};
use crate::model::TrainableModel;
use crate::tensor::Tensor;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Threshold applied to single-unit outputs.
pub const BINARY_THRESHOLD: f32 = 0.5;

/// Confusion matrix with per-class quality scores.
///
/// `matrix[true_class][predicted_class]` counts samples: rows are ground truth,
/// columns are predictions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub matrix: Vec<Vec<usize>>,
    pub classes: Vec<usize>,
    pub accuracy: f64,
    pub precision: Vec<f64>,
    pub recall: Vec<f64>,
    pub f1_score: Vec<f64>,
}

/// Aggregate classification metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationMetrics {
    pub accuracy: f64,
    /// Macro average over classes with at least one true sample.
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
    pub confusion_matrix: Vec<Vec<usize>>,
}

impl ConfusionMatrix {
    /// Build the matrix from parallel label slices.
    pub fn from_labels(
        truth: &[usize],
        predicted: &[usize],
        num_classes: usize,
    ) -> Result<Self, EngineError> {
        if num_classes == 0 {
            return Err(EngineError::evaluation("num_classes must be at least 1"));
        }
        if truth.len() != predicted.len() {
            return Err(EngineError::evaluation(format!(
                "{} true labels but {} predictions",
                truth.len(),
                predicted.len()
            )));
        }

        let mut matrix = vec![vec![0usize; num_classes]; num_classes];
        for (&t, &p) in truth.iter().zip(predicted) {
            if t >= num_classes || p >= num_classes {
                return Err(EngineError::evaluation(format!(
                    "class index out of range for {num_classes} classes (true {t}, predicted {p})"
                )));
            }
            matrix[t][p] += 1;
        }

        let mut precision = Vec::with_capacity(num_classes);
        let mut recall = Vec::with_capacity(num_classes);
        let mut f1_score = Vec::with_capacity(num_classes);
        let mut correct = 0;

        for i in 0..num_classes {
            let tp = matrix[i][i];
            let fp: usize = (0..num_classes).filter(|&k| k != i).map(|k| matrix[k][i]).sum();
            let fn_: usize = (0..num_classes).filter(|&k| k != i).map(|k| matrix[i][k]).sum();
            correct += tp;

            let p = ratio(tp, tp + fp);
            let r = ratio(tp, tp + fn_);
            let f1 = if p + r > 0.0 { 2.0 * p * r / (p + r) } else { 0.0 };
            precision.push(p);
            recall.push(r);
            f1_score.push(f1);
        }

        Ok(Self {
            matrix,
            classes: (0..num_classes).collect(),
            accuracy: ratio(correct, truth.len()),
            precision,
            recall,
            f1_score,
        })
    }

    pub fn num_classes(&self) -> usize {
        self.classes.len()
    }

    pub fn total(&self) -> usize {
        self.matrix.iter().flatten().sum()
    }

    /// Number of samples whose true class is `class`.
    pub fn support(&self, class: usize) -> usize {
        self.matrix.get(class).map(|row| row.iter().sum()).unwrap_or(0)
    }

    pub fn summary(&self) -> ClassificationMetrics {
        let supported: Vec<usize> = self
            .classes
            .iter()
            .copied()
            .filter(|&c| self.support(c) > 0)
            .collect();
        let macro_avg = |values: &[f64]| {
            if supported.is_empty() {
                0.0
            } else {
                supported.iter().map(|&c| values[c]).sum::<f64>() / supported.len() as f64
            }
        };
        ClassificationMetrics {
            accuracy: self.accuracy,
            precision: macro_avg(&self.precision),
            recall: macro_avg(&self.recall),
            f1_score: macro_avg(&self.f1_score),
            confusion_matrix: self.matrix.clone(),
        }
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 { 0.0 } else { num as f64 / den as f64 }
}

/// Turns model predictions into class labels and scores them.
#[derive(Clone)]
pub struct ConfusionMatrixEvaluator {
    sink: Arc<dyn TrainingEventSink>,
}

impl Default for ConfusionMatrixEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ConfusionMatrixEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfusionMatrixEvaluator").finish()
    }
}

impl ConfusionMatrixEvaluator {
    pub fn new() -> Self {
        Self {
            sink: Arc::new(TracingSink),
        }
    }

    pub fn with_sink(sink: Arc<dyn TrainingEventSink>) -> Self {
        Self { sink }
    }

    /// Predict on `x` and compare against `y`.
    ///
    /// Single-unit outputs are thresholded at 0.5 and `y` is read as integer
    /// labels; wider outputs use the arg-max of both predictions and `y`.
    pub async fn evaluate<M>(
        &self,
        model: &M,
        x: &Tensor,
        y: &Tensor,
        num_classes: usize,
    ) -> Result<ConfusionMatrix, EngineError>
    where
        M: TrainableModel + ?Sized,
    {
        if x.leading_dim() != y.leading_dim() {
            return Err(EngineError::evaluation(format!(
                "{} input rows but {} target rows",
                x.leading_dim(),
                y.leading_dim()
            )));
        }

        let predictions = model.predict(x).await.map_err(EngineError::prediction)?;
        if predictions.leading_dim() != y.leading_dim() {
            return Err(EngineError::evaluation(format!(
                "{} prediction rows but {} target rows",
                predictions.leading_dim(),
                y.leading_dim()
            )));
        }
        if predictions.last_dim() > 1 && predictions.last_dim() != num_classes {
            return Err(EngineError::evaluation(format!(
                "predictions have {} columns for {num_classes} classes",
                predictions.last_dim()
            )));
        }

        let (predicted, truth) = extract_labels(&predictions, y)?;
        let report = ConfusionMatrix::from_labels(&truth, &predicted, num_classes)?;
        self.sink.record(&TrainingEvent::EvaluationCompleted {
            samples: truth.len(),
            num_classes,
            accuracy: report.accuracy,
        });
        Ok(report)
    }
}

/// Predicted and true class labels, in sample order.
fn extract_labels(
    predictions: &Tensor,
    y: &Tensor,
) -> Result<(Vec<usize>, Vec<usize>), EngineError> {
    if predictions.last_dim() == 1 {
        if y.last_dim() != 1 {
            return Err(EngineError::evaluation(format!(
                "single-unit predictions need integer labels, got targets of width {}",
                y.last_dim()
            )));
        }
        let predicted = predictions
            .data()
            .iter()
            .map(|&v| usize::from(v > BINARY_THRESHOLD))
            .collect();
        let truth = y
            .data()
            .iter()
            .map(|&v| {
                if v.is_finite() && v >= 0.0 {
                    Ok(v.trunc() as usize)
                } else {
                    Err(EngineError::evaluation(format!("invalid class label {v}")))
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        return Ok((predicted, truth));
    }

    if y.last_dim() != predictions.last_dim() {
        return Err(EngineError::evaluation(format!(
            "predictions have {} columns but targets have {}",
            predictions.last_dim(),
            y.last_dim()
        )));
    }
    Ok((predictions.argmax_rows(), y.argmax_rows()))
}
