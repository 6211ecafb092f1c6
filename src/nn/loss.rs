//! Classification loss and metrics

use ndarray::{Array2, Axis};

use crate::error::{DartsError, Result};

/// Mean softmax cross-entropy.
///
/// Returns the loss and its gradient w.r.t. the logits.
pub fn cross_entropy(logits: &Array2<f64>, labels: &[usize]) -> Result<(f64, Array2<f64>)> {
    let (n, classes) = logits.dim();
    if n != labels.len() {
        return Err(DartsError::shape(format!("{} labels", n), labels.len()));
    }
    if n == 0 {
        return Err(DartsError::DataError("empty batch".to_string()));
    }

    let mut grad = Array2::zeros((n, classes));
    let mut loss = 0.0;
    for (i, (row, &label)) in logits.axis_iter(Axis(0)).zip(labels).enumerate() {
        if label >= classes {
            return Err(DartsError::DataError(format!(
                "label {} out of range for {} classes",
                label, classes
            )));
        }
        let max_val = row.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let exp = row.mapv(|v| (v - max_val).exp());
        let sum = exp.sum();
        loss -= (exp[label] / sum).ln();

        let mut g = grad.index_axis_mut(Axis(0), i);
        g.assign(&(exp / sum));
        g[label] -= 1.0;
    }

    grad /= n as f64;
    Ok((loss / n as f64, grad))
}

/// Fraction of rows whose arg-max matches the label
pub fn accuracy(logits: &Array2<f64>, labels: &[usize]) -> f64 {
    if labels.is_empty() {
        return 0.0;
    }
    let correct = logits
        .axis_iter(Axis(0))
        .zip(labels)
        .filter(|(row, label)| {
            row.iter()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(b.1))
                .map(|(i, _)| i)
                == Some(**label)
        })
        .count();
    correct as f64 / labels.len() as f64
}
