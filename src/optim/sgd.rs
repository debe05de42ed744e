use log::error;
use serde::{Deserialize, Serialize};

use crate::error::{NnError, Result};
use crate::layers::dense::{Layer, Slot};
use crate::math::matrix::Matrix;

/// Plain gradient descent with L2 weight decay.
///
/// For every non-input layer:
///
/// ```text
/// W ← W · (1 − η·λ/N) + scale · ΔW
/// b ← b + scale · Δb
/// ```
///
/// where `N` is the size of the whole training set and `scale` is `η` for a
/// single sample or `η / batch` for a mini-batch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sgd {
    pub learning_rate: f64,
    pub lambda: f64,
}

impl Sgd {
    pub fn new(learning_rate: f64, lambda: f64) -> Sgd {
        Sgd {
            learning_rate,
            lambda,
        }
    }

    /// Multiplicative shrink factor applied to the weights on every update.
    pub fn weight_decay(&self, dataset_size: usize) -> Result<f64> {
        if dataset_size == 0 {
            return Err(NnError::InvalidConfig(
                "dataset size must be at least 1".to_owned(),
            ));
        }
        Ok(1.0 - self.learning_rate * self.lambda / dataset_size as f64)
    }

    /// Applies one update to `layer`. Both deltas are checked against the
    /// layer's parameters before either is touched.
    pub fn step(
        &self,
        layer: &mut Layer,
        delta_w: &Matrix,
        delta_b: &Matrix,
        scale: f64,
        dataset_size: usize,
    ) -> Result<()> {
        let decay = self.weight_decay(dataset_size)?;
        check_shape(layer.get(Slot::Weights)?, delta_w, "Sgd::step (weights)")?;
        check_shape(layer.get(Slot::Biases)?, delta_b, "Sgd::step (biases)")?;

        let weights = layer.get_mut(Slot::Weights)?;
        weights.scale_in_place(decay);
        weights.add_in_place(&delta_w.scale(scale))?;

        layer
            .get_mut(Slot::Biases)?
            .add_in_place(&delta_b.scale(scale))
    }
}

fn check_shape(param: &Matrix, delta: &Matrix, op: &'static str) -> Result<()> {
    if param.shape() == delta.shape() {
        return Ok(());
    }
    error!("{op}: update does not match the parameter shape");
    Err(NnError::DimensionMismatch {
        op,
        left_rows: param.rows(),
        left_cols: param.cols(),
        right_rows: delta.rows(),
        right_cols: delta.cols(),
    })
}
