use std::fmt;

use log::warn;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{NnError, Result};
use crate::math::matrix::Matrix;

/// Names the matrices a [`Layer`] can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// `[neurons x previous_neurons]`
    Weights,
    /// `[neurons x 1]`, or `[neurons x batch]` while expanded for a batch.
    Biases,
    /// Pre-activation `W·a + b`, `[neurons x batch]`.
    Z,
    /// Activation output, `[neurons x batch]`. For the input layer this is the
    /// raw input.
    Outputs,
    /// Error signal (delta), `[neurons x batch]`.
    Errors,
    /// Pending weight update, `[neurons x previous_neurons]`.
    WeightDeltas,
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Slot::Weights => "weights",
            Slot::Biases => "biases",
            Slot::Z => "z",
            Slot::Outputs => "outputs",
            Slot::Errors => "errors",
            Slot::WeightDeltas => "weight_deltas",
        };
        f.write_str(name)
    }
}

/// One fully connected layer and its transient training buffers.
///
/// Every slot starts out empty (except weights and biases of non-input
/// layers) and is allocated on first write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Layer {
    neurons: usize,
    previous_neurons: usize,
    weights: Option<Matrix>,
    biases: Option<Matrix>,
    #[serde(skip)]
    z: Option<Matrix>,
    #[serde(skip)]
    outputs: Option<Matrix>,
    #[serde(skip)]
    errors: Option<Matrix>,
    #[serde(skip)]
    weight_deltas: Option<Matrix>,
}

impl Layer {
    /// Creates a layer with weights drawn uniformly from [-1, 1]. Biases are
    /// drawn the same way when `generate_biases` is set and are zero
    /// otherwise. An input layer (`previous_neurons == 0`) allocates nothing.
    pub fn new<R: Rng + ?Sized>(
        neurons: usize,
        previous_neurons: usize,
        generate_biases: bool,
        rng: &mut R,
    ) -> Layer {
        let mut layer = Layer::empty(neurons, previous_neurons);
        if previous_neurons == 0 {
            return layer;
        }

        layer.weights = Some(Matrix::random_with(neurons, previous_neurons, rng));
        layer.biases = Some(if generate_biases {
            Matrix::random_with(neurons, 1, rng)
        } else {
            Matrix::zeros(neurons, 1)
        });
        layer
    }

    /// A layer with no slot populated, used when parameters are imported.
    pub fn empty(neurons: usize, previous_neurons: usize) -> Layer {
        Layer {
            neurons,
            previous_neurons,
            weights: None,
            biases: None,
            z: None,
            outputs: None,
            errors: None,
            weight_deltas: None,
        }
    }

    pub fn neurons(&self) -> usize {
        self.neurons
    }

    pub fn previous_neurons(&self) -> usize {
        self.previous_neurons
    }

    pub fn is_input(&self) -> bool {
        self.previous_neurons == 0
    }

    pub fn has(&self, slot: Slot) -> bool {
        self.slot(slot).is_some()
    }

    pub fn get(&self, slot: Slot) -> Result<&Matrix> {
        self.slot(slot).as_ref().ok_or(NnError::MissingSlot { slot })
    }

    pub fn get_mut(&mut self, slot: Slot) -> Result<&mut Matrix> {
        self.slot_mut(slot)
            .as_mut()
            .ok_or(NnError::MissingSlot { slot })
    }

    /// Stores `source` in `slot`.
    ///
    /// An existing matrix with the same element count is overwritten in place;
    /// otherwise the slot is replaced by a deep copy of `source`.
    pub fn write_matrix(&mut self, source: &Matrix, slot: Slot) -> Result<()> {
        let current = self.slot_mut(slot);
        if let Some(existing) = current.as_mut() {
            if existing.len() == source.len() {
                return source.copy_to(existing);
            }
            warn!("Layer::write_matrix: {slot} changes size, reallocating");
        }
        *current = Some(source.clone());
        Ok(())
    }

    /// Replicates column 0 of the biases across `batch_size` columns.
    pub fn expand_bias(&mut self, batch_size: usize) -> Result<()> {
        if batch_size == 0 {
            return Err(NnError::InvalidConfig(
                "cannot expand biases to zero columns".to_owned(),
            ));
        }
        let expanded = self
            .get(Slot::Biases)?
            .get_column(0)?
            .broadcast_columns(batch_size)?;
        self.write_matrix(&expanded, Slot::Biases)
    }

    /// Restores single-column biases by keeping column 0.
    pub fn shrink_bias(&mut self) -> Result<()> {
        let column = self.get(Slot::Biases)?.get_column(0)?;
        self.write_matrix(&column, Slot::Biases)
    }

    /// Copies every populated slot into `dest`, which must have the same
    /// neuron counts.
    pub fn copy_into(&self, dest: &mut Layer) -> Result<()> {
        if self.neurons != dest.neurons || self.previous_neurons != dest.previous_neurons {
            return Err(NnError::DimensionMismatch {
                op: "Layer::copy_into",
                left_rows: self.neurons,
                left_cols: self.previous_neurons,
                right_rows: dest.neurons,
                right_cols: dest.previous_neurons,
            });
        }
        for slot in [
            Slot::Weights,
            Slot::Biases,
            Slot::Outputs,
            Slot::Errors,
            Slot::WeightDeltas,
            Slot::Z,
        ] {
            if let Some(m) = self.slot(slot) {
                dest.write_matrix(m, slot)?;
            }
        }
        Ok(())
    }

    fn slot(&self, slot: Slot) -> &Option<Matrix> {
        match slot {
            Slot::Weights => &self.weights,
            Slot::Biases => &self.biases,
            Slot::Z => &self.z,
            Slot::Outputs => &self.outputs,
            Slot::Errors => &self.errors,
            Slot::WeightDeltas => &self.weight_deltas,
        }
    }

    fn slot_mut(&mut self, slot: Slot) -> &mut Option<Matrix> {
        match slot {
            Slot::Weights => &mut self.weights,
            Slot::Biases => &mut self.biases,
            Slot::Z => &mut self.z,
            Slot::Outputs => &mut self.outputs,
            Slot::Errors => &mut self.errors,
            Slot::WeightDeltas => &mut self.weight_deltas,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    fn rng() -> StdRng {
        StdRng::seed_from_u64(11)
    }

    #[test]
    fn input_layer_allocates_nothing() {
        let layer = Layer::new(4, 0, true, &mut rng());
        assert!(layer.is_input());
        for slot in [Slot::Weights, Slot::Biases, Slot::Z, Slot::Outputs, Slot::Errors] {
            assert!(!layer.has(slot));
        }
        assert!(matches!(
            layer.get(Slot::Weights),
            Err(NnError::MissingSlot { slot: Slot::Weights })
        ));
    }

    #[test]
    fn hidden_layer_shapes() {
        let layer = Layer::new(3, 5, false, &mut rng());
        assert_eq!(layer.get(Slot::Weights).unwrap().shape(), (3, 5));
        let biases = layer.get(Slot::Biases).unwrap();
        assert_eq!(biases.shape(), (3, 1));
        assert!(biases.as_slice().iter().all(|&b| b == 0.0));

        let with_biases = Layer::new(3, 5, true, &mut rng());
        assert!(with_biases
            .get(Slot::Biases)
            .unwrap()
            .as_slice()
            .iter()
            .all(|b| (-1.0..=1.0).contains(b)));
    }

    #[test]
    fn write_matrix_copies_in_place_when_sizes_match() {
        let mut layer = Layer::empty(2, 0);
        let first = Matrix::from_vec(2, 1, vec![1.0, 2.0]).unwrap();
        layer.write_matrix(&first, Slot::Outputs).unwrap();

        // Same element count, different shape: reuses the buffer and takes
        // the source shape.
        let second = Matrix::from_vec(1, 2, vec![3.0, 4.0]).unwrap();
        layer.write_matrix(&second, Slot::Outputs).unwrap();
        assert_eq!(layer.get(Slot::Outputs).unwrap(), &second);

        let wider = Matrix::from_vec(2, 2, vec![5.0, 6.0, 7.0, 8.0]).unwrap();
        layer.write_matrix(&wider, Slot::Outputs).unwrap();
        assert_eq!(layer.get(Slot::Outputs).unwrap(), &wider);
    }

    #[test]
    fn expand_then_shrink_restores_bias() {
        let mut layer = Layer::empty(3, 2);
        let bias = Matrix::from_vec(3, 1, vec![0.1, -0.2, 0.3]).unwrap();
        layer.write_matrix(&bias, Slot::Biases).unwrap();

        layer.expand_bias(4).unwrap();
        let expanded = layer.get(Slot::Biases).unwrap();
        assert_eq!(expanded.shape(), (3, 4));
        for j in 0..4 {
            assert_eq!(expanded.get_column(j).unwrap().as_slice(), bias.as_slice());
        }

        layer.shrink_bias().unwrap();
        assert_eq!(layer.get(Slot::Biases).unwrap(), &bias);
        assert!(layer.expand_bias(0).is_err());
    }

    #[test]
    fn expand_without_biases_fails() {
        let mut layer = Layer::empty(3, 0);
        assert!(layer.expand_bias(2).is_err());
        assert!(layer.shrink_bias().is_err());
    }

    #[test]
    fn clone_is_deep_and_keeps_absent_slots_absent() {
        let mut layer = Layer::new(2, 2, true, &mut rng());
        let z = Matrix::from_vec(2, 1, vec![0.5, 0.5]).unwrap();
        layer.write_matrix(&z, Slot::Z).unwrap();

        let mut copy = layer.clone();
        assert!(copy.has(Slot::Z));
        assert!(!copy.has(Slot::Errors));

        copy.get_mut(Slot::Weights).unwrap().set(0, 0, 99.0).unwrap();
        assert_ne!(layer.get(Slot::Weights).unwrap().get(0, 0).unwrap(), 99.0);
    }

    #[test]
    fn copy_into_requires_matching_neuron_counts() {
        let source = Layer::new(2, 3, true, &mut rng());
        let mut same = Layer::empty(2, 3);
        source.copy_into(&mut same).unwrap();
        assert_eq!(same.get(Slot::Weights).unwrap(), source.get(Slot::Weights).unwrap());

        let mut other = Layer::empty(3, 3);
        assert!(source.copy_into(&mut other).is_err());
    }
}
