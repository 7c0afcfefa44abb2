//! Minimal host-side tensor used at the model capability boundary.
//!
//! The engine never does tensor math. It only needs to read sample counts,
//! output widths and per-row values when extracting predictions.

use crate::error::ModelError;
use serde::{Deserialize, Serialize};

/// Row-major `f32` tensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tensor {
    shape: Vec<usize>,
    data: Vec<f32>,
}

impl Tensor {
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Result<Self, ModelError> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(ModelError::shape_mismatch(
                format!("{expected} elements for shape {shape:?}"),
                format!("{} elements", data.len()),
            ));
        }
        Ok(Self { shape, data })
    }

    /// Build an `[n, width]` matrix from rows of equal width.
    pub fn from_rows(rows: &[Vec<f32>]) -> Result<Self, ModelError> {
        let width = rows.first().map(Vec::len).unwrap_or(0);
        if let Some(bad) = rows.iter().find(|r| r.len() != width) {
            return Err(ModelError::shape_mismatch(
                format!("rows of width {width}"),
                format!("row of width {}", bad.len()),
            ));
        }
        let data = rows.iter().flatten().copied().collect();
        Ok(Self {
            shape: vec![rows.len(), width],
            data,
        })
    }

    /// Column vector `[n, 1]`.
    pub fn column(values: &[f32]) -> Self {
        Self {
            shape: vec![values.len(), 1],
            data: values.to_vec(),
        }
    }

    /// One-hot encode class labels into `[n, num_classes]`.
    pub fn one_hot(labels: &[usize], num_classes: usize) -> Result<Self, ModelError> {
        let mut data = vec![0.0; labels.len() * num_classes];
        for (row, &label) in labels.iter().enumerate() {
            if label >= num_classes {
                return Err(ModelError::shape_mismatch(
                    format!("label < {num_classes}"),
                    format!("label {label}"),
                ));
            }
            data[row * num_classes + label] = 1.0;
        }
        Ok(Self {
            shape: vec![labels.len(), num_classes],
            data,
        })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Sample count (first dimension).
    pub fn leading_dim(&self) -> usize {
        self.shape.first().copied().unwrap_or(0)
    }

    /// Width of the innermost dimension; a rank-1 tensor has width 1.
    pub fn last_dim(&self) -> usize {
        match self.shape.len() {
            0 => 0,
            1 => 1,
            n => self.shape[n - 1],
        }
    }

    /// Iterate over innermost rows.
    pub fn rows(&self) -> impl Iterator<Item = &[f32]> {
        self.data.chunks(self.last_dim().max(1))
    }

    /// Index of the largest value in each row; the first index wins on ties.
    pub fn argmax_rows(&self) -> Vec<usize> {
        self.rows()
            .map(|row| {
                row.iter()
                    .enumerate()
                    .fold((0, f32::NEG_INFINITY), |(best_i, best_v), (i, &v)| {
                        if v > best_v { (i, v) } else { (best_i, best_v) }
                    })
                    .0
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_wrong_element_count() {
        assert!(Tensor::new(vec![2, 3], vec![0.0; 5]).is_err());
        assert!(Tensor::new(vec![2, 3], vec![0.0; 6]).is_ok());
    }

    #[test]
    fn test_dims() {
        let t = Tensor::from_rows(&[vec![0.1, 0.9], vec![0.7, 0.3], vec![0.5, 0.5]]).unwrap();
        assert_eq!(t.leading_dim(), 3);
        assert_eq!(t.last_dim(), 2);
        assert_eq!(Tensor::column(&[1.0, 0.0]).last_dim(), 1);
    }

    #[test]
    fn test_argmax_first_index_on_tie() {
        let t = Tensor::from_rows(&[vec![0.1, 0.9], vec![0.7, 0.3], vec![0.5, 0.5]]).unwrap();
        assert_eq!(t.argmax_rows(), vec![1, 0, 0]);
    }

    #[test]
    fn test_one_hot() {
        let t = Tensor::one_hot(&[2, 0], 3).unwrap();
        assert_eq!(t.data(), &[0.0, 0.0, 1.0, 1.0, 0.0, 0.0]);
        assert!(Tensor::one_hot(&[3], 3).is_err());
    }
}
