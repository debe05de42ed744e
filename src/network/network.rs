use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::ops::{Deref, DerefMut};
use std::path::Path;

use log::{error, info};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::activation::activation::{sigmoid, sigmoid_prime, softmax};
use crate::error::{NnError, Result};
use crate::layers::dense::{Layer, Slot};
use crate::loss::loss_type::CostFunction;
use crate::math::matrix::Matrix;
use crate::optim::sgd::Sgd;

/// A fully connected feedforward network with sigmoid activations.
///
/// Layer 0 is the input layer and holds no parameters; its `Outputs` slot
/// receives the raw input on every forward pass. Each sample is one column,
/// so a batch of `k` samples is a `[features x k]` matrix.
///
/// `Clone` produces a fully independent network: every populated slot is
/// deep-copied and the cost strategy is re-selected from the copied tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Network {
    layers: Vec<Layer>,
    optimizer: Sgd,
    cost: CostFunction,
}

impl Network {
    /// Builds a network with `layer_sizes[0]` inputs and randomly initialised
    /// weights, using the thread-local RNG. Fails unless there are at least
    /// two layers and every layer has a neuron.
    pub fn new(
        layer_sizes: &[usize],
        learning_rate: f64,
        lambda: f64,
        generate_biases: bool,
        cost: CostFunction,
    ) -> Result<Network> {
        Network::with_rng(
            layer_sizes,
            learning_rate,
            lambda,
            generate_biases,
            cost,
            &mut rand::thread_rng(),
        )
    }

    /// Same as [`Network::new`] but draws the initial parameters from `rng`.
    pub fn with_rng<R: Rng + ?Sized>(
        layer_sizes: &[usize],
        learning_rate: f64,
        lambda: f64,
        generate_biases: bool,
        cost: CostFunction,
        rng: &mut R,
    ) -> Result<Network> {
        check_layer_sizes(layer_sizes)?;
        let mut previous = 0;
        let layers = layer_sizes
            .iter()
            .map(|&neurons| {
                let layer = Layer::new(neurons, previous, generate_biases, &mut *rng);
                previous = neurons;
                layer
            })
            .collect();

        Ok(Network {
            layers,
            optimizer: Sgd::new(learning_rate, lambda),
            cost,
        })
    }

    /// Assembles a network from already populated layers and checks that
    /// every parameter matrix has the shape its neuron counts require.
    pub fn from_layers(layers: Vec<Layer>, optimizer: Sgd, cost: CostFunction) -> Result<Network> {
        let network = Network {
            layers,
            optimizer,
            cost,
        };
        network.validate_shapes()?;
        Ok(network)
    }

    // ── Accessors ───────────────────────────────────────────────────────────

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn layer(&self, index: usize) -> Option<&Layer> {
        self.layers.get(index)
    }

    pub fn layer_mut(&mut self, index: usize) -> Option<&mut Layer> {
        self.layers.get_mut(index)
    }

    /// Neuron count of every layer, input first.
    pub fn layer_sizes(&self) -> Vec<usize> {
        self.layers.iter().map(Layer::neurons).collect()
    }

    pub fn learning_rate(&self) -> f64 {
        self.optimizer.learning_rate
    }

    pub fn lambda(&self) -> f64 {
        self.optimizer.lambda
    }

    pub fn optimizer(&self) -> Sgd {
        self.optimizer
    }

    pub fn cost_function(&self) -> CostFunction {
        self.cost
    }

    /// Activation of the output layer from the most recent forward pass.
    pub fn output(&self) -> Result<&Matrix> {
        self.layers
            .last()
            .ok_or_else(|| NnError::InvalidConfig("network has no layers".to_owned()))?
            .get(Slot::Outputs)
    }

    // ── Forward ─────────────────────────────────────────────────────────────

    /// Runs the linear + sigmoid chain over every layer, storing `z` and the
    /// activation of each, and returns the output layer's activation.
    pub fn forward(&mut self, input: &Matrix) -> Result<&Matrix> {
        self.check_ready("Network::forward")?;
        self.check_input(input, "Network::forward")?;

        self.layers[0].write_matrix(input, Slot::Outputs)?;
        for i in 1..self.layers.len() {
            let (before, after) = self.layers.split_at_mut(i);
            let previous = &before[i - 1];
            let layer = &mut after[0];

            let mut z = layer.get(Slot::Weights)?.dot(previous.get(Slot::Outputs)?)?;
            add_bias(&mut z, layer.get(Slot::Biases)?)?;
            let activation = z.apply(sigmoid);

            layer.write_matrix(&z, Slot::Z)?;
            layer.write_matrix(&activation, Slot::Outputs)?;
        }
        self.output()
    }

    /// Forward pass without touching any layer buffer, followed by a
    /// column-wise softmax over the output. Accepts one sample or many.
    pub fn inference(&self, input: &Matrix) -> Result<Matrix> {
        self.check_ready("Network::inference")?;
        self.check_input(input, "Network::inference")?;

        let mut activation = input.clone();
        for layer in &self.layers[1..] {
            let mut z = layer.get(Slot::Weights)?.dot(&activation)?;
            add_bias(&mut z, layer.get(Slot::Biases)?)?;
            activation = z.apply(sigmoid);
        }
        Ok(softmax(&activation))
    }

    /// [`Network::inference`] written to `dest`, which must have one row per
    /// output neuron and one column per input sample.
    pub fn inference_into(&self, input: &Matrix, dest: &mut Matrix) -> Result<()> {
        let outputs = self.layers.last().map(Layer::neurons).unwrap_or(0);
        if dest.rows() != outputs || dest.cols() != input.cols() {
            error!("Network::inference_into: incorrect destination matrix size provided");
            return Err(NnError::DimensionMismatch {
                op: "Network::inference_into",
                left_rows: outputs,
                left_cols: input.cols(),
                right_rows: dest.rows(),
                right_cols: dest.cols(),
            });
        }
        self.inference(input)?.copy_to(dest)
    }

    // ── Training ────────────────────────────────────────────────────────────

    /// One gradient step on a single sample (`input` and `label` are single
    /// columns). `dataset_size` is the size of the full training set and only
    /// scales the weight decay. Returns this step's cost.
    pub fn train(&mut self, input: &Matrix, label: &Matrix, dataset_size: usize) -> Result<f64> {
        self.check_ready("Network::train")?;
        self.optimizer.weight_decay(dataset_size)?;
        if input.cols() != 1 {
            return Err(NnError::InvalidConfig(format!(
                "Network::train takes a single sample, got {} columns",
                input.cols()
            )));
        }
        self.check_sample(input, label, "Network::train")?;

        self.forward(input)?;
        let loss = self.backpropagate(label)?;
        self.update(1, self.optimizer.learning_rate, dataset_size)?;
        Ok(loss)
    }

    /// One gradient step on a mini-batch with one sample per column.
    ///
    /// Biases are broadcast to the batch width for the duration of the
    /// forward and backward passes and restored to a single column before the
    /// update, including when the step fails. Returns the mean cost over the
    /// batch.
    pub fn batch_train(
        &mut self,
        inputs: &Matrix,
        labels: &Matrix,
        dataset_size: usize,
    ) -> Result<f64> {
        self.check_ready("Network::batch_train")?;
        self.optimizer.weight_decay(dataset_size)?;
        let batch_size = inputs.cols();
        if batch_size == 0 {
            return Err(NnError::InvalidConfig("batch must hold at least one sample".to_owned()));
        }
        if labels.cols() != batch_size {
            error!("Network::batch_train: input and label column counts differ");
            return Err(NnError::DimensionMismatch {
                op: "Network::batch_train",
                left_rows: inputs.rows(),
                left_cols: inputs.cols(),
                right_rows: labels.rows(),
                right_cols: labels.cols(),
            });
        }
        self.check_sample(inputs, labels, "Network::batch_train")?;

        let total_loss = {
            let mut expanded = self.expand_biases(batch_size)?;
            expanded.forward(inputs)?;
            let loss = expanded.backpropagate(labels)?;
            expanded.release()?;
            loss
        };

        let scale = self.optimizer.learning_rate / batch_size as f64;
        self.update(batch_size, scale, dataset_size)?;
        Ok(total_loss / batch_size as f64)
    }

    /// Broadcasts every layer's bias to `batch_size` columns until the
    /// returned guard is released or dropped.
    pub fn expand_biases(&mut self, batch_size: usize) -> Result<BiasExpansion<'_>> {
        for i in 1..self.layers.len() {
            if let Err(e) = self.layers[i].expand_bias(batch_size) {
                self.shrink_biases()?;
                return Err(e);
            }
        }
        Ok(BiasExpansion {
            network: self,
            active: true,
        })
    }

    fn shrink_biases(&mut self) -> Result<()> {
        for layer in self.layers.iter_mut().skip(1) {
            layer.shrink_bias()?;
        }
        Ok(())
    }

    /// Output error, hidden errors (last to first), then the weight deltas of
    /// every layer. Nothing is updated here. Returns the summed cost.
    fn backpropagate(&mut self, label: &Matrix) -> Result<f64> {
        let last = self.layers.len() - 1;

        let (loss, output_error) = {
            let output_layer = &self.layers[last];
            let z = output_layer.get(Slot::Z)?;
            let output = output_layer.get(Slot::Outputs)?;
            let loss = self.cost.cost(output, label)?;
            let mut error = Matrix::zeros(output.rows(), output.cols());
            self.cost.delta(z, output, label, &mut error)?;
            (loss, error)
        };
        self.layers[last].write_matrix(&output_error, Slot::Errors)?;

        for i in (1..last).rev() {
            let next = &self.layers[i + 1];
            let mut error = next
                .get(Slot::Weights)?
                .transpose()
                .dot(next.get(Slot::Errors)?)?;
            error.multiply_in_place(&sigmoid_prime(self.layers[i].get(Slot::Z)?))?;
            self.layers[i].write_matrix(&error, Slot::Errors)?;
        }

        for i in (1..=last).rev() {
            let delta_w = self.layers[i]
                .get(Slot::Errors)?
                .dot(&self.layers[i - 1].get(Slot::Outputs)?.transpose())?;
            self.layers[i].write_matrix(&delta_w, Slot::WeightDeltas)?;
        }

        Ok(loss)
    }

    /// Applies the stored weight deltas and the column sums of the stored
    /// errors to every layer.
    fn update(&mut self, batch_size: usize, scale: f64, dataset_size: usize) -> Result<()> {
        let ones = Matrix::filled(batch_size, 1, 1.0);
        let optimizer = self.optimizer;
        for layer in self.layers.iter_mut().skip(1) {
            let delta_b = layer.get(Slot::Errors)?.dot(&ones)?;
            let delta_w = layer.get(Slot::WeightDeltas)?.clone();
            optimizer.step(layer, &delta_w, &delta_b, scale, dataset_size)?;
        }
        Ok(())
    }

    // ── Validation ──────────────────────────────────────────────────────────

    /// Checks that there are at least two layers, that layer 0 takes no input
    /// and that every later layer carries `[neurons x previous]` weights and
    /// `[neurons x 1]` biases.
    pub fn validate_shapes(&self) -> Result<()> {
        if self.layers.len() < 2 {
            return Err(NnError::Model(format!(
                "model has {} layers, at least 2 are required",
                self.layers.len()
            )));
        }
        let mut previous = 0;
        for (i, layer) in self.layers.iter().enumerate() {
            if layer.previous_neurons() != previous {
                return Err(NnError::Model(format!(
                    "layer {i} expects {} inputs but the previous layer has {previous} neurons",
                    layer.previous_neurons()
                )));
            }
            if i > 0 {
                check_param(layer, Slot::Weights, (layer.neurons(), previous), i)?;
                check_param(layer, Slot::Biases, (layer.neurons(), 1), i)?;
            }
            previous = layer.neurons();
        }
        Ok(())
    }

    pub(crate) fn check_ready(&self, op: &str) -> Result<()> {
        if self.layers.len() < 2 {
            error!("{op}: network needs an input and an output layer");
            return Err(NnError::InvalidConfig(format!(
                "{op}: network has {} layers, at least 2 are required",
                self.layers.len()
            )));
        }
        Ok(())
    }

    fn check_input(&self, input: &Matrix, op: &'static str) -> Result<()> {
        let features = self.layers[0].neurons();
        if input.rows() == features && input.cols() > 0 {
            return Ok(());
        }
        error!("{op}: input does not match the input layer");
        Err(NnError::DimensionMismatch {
            op,
            left_rows: features,
            left_cols: input.cols(),
            right_rows: input.rows(),
            right_cols: input.cols(),
        })
    }

    fn check_sample(&self, input: &Matrix, label: &Matrix, op: &'static str) -> Result<()> {
        self.check_input(input, op)?;
        let outputs = self.layers[self.layers.len() - 1].neurons();
        if label.rows() == outputs && label.cols() == input.cols() {
            return Ok(());
        }
        error!("{op}: label does not match the output layer");
        Err(NnError::DimensionMismatch {
            op,
            left_rows: outputs,
            left_cols: input.cols(),
            right_rows: label.rows(),
            right_cols: label.cols(),
        })
    }

    // ── JSON persistence ────────────────────────────────────────────────────

    /// Writes the network parameters and hyperparameters as pretty JSON.
    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let writer = BufWriter::new(File::create(path.as_ref())?);
        serde_json::to_writer_pretty(writer, self)?;
        info!("saved network {:?} to {}", self.layer_sizes(), path.as_ref().display());
        Ok(())
    }

    /// Reads a network written by [`Network::save_json`] and validates its
    /// shapes.
    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Network> {
        let reader = BufReader::new(File::open(path.as_ref())?);
        let network: Network = serde_json::from_reader(reader)?;
        network.validate_shapes()?;
        info!("loaded network {:?} from {}", network.layer_sizes(), path.as_ref().display());
        Ok(network)
    }
}

/// Adds `bias` to every column of `z`. A single-column bias is broadcast;
/// an already expanded bias must match `z` exactly.
fn add_bias(z: &mut Matrix, bias: &Matrix) -> Result<()> {
    if bias.cols() == 1 && z.cols() != 1 {
        z.add_in_place(&bias.broadcast_columns(z.cols())?)
    } else {
        z.add_in_place(bias)
    }
}

pub(crate) fn check_layer_sizes(layer_sizes: &[usize]) -> Result<()> {
    if layer_sizes.len() < 2 {
        return Err(NnError::InvalidConfig(format!(
            "a network needs at least 2 layers, got {}",
            layer_sizes.len()
        )));
    }
    if let Some(i) = layer_sizes.iter().position(|&n| n == 0) {
        return Err(NnError::InvalidConfig(format!("layer {i} has no neurons")));
    }
    Ok(())
}

fn check_param(layer: &Layer, slot: Slot, expected: (usize, usize), index: usize) -> Result<()> {
    let matrix = layer.get(slot)?;
    if matrix.shape() == expected {
        return Ok(());
    }
    Err(NnError::Model(format!(
        "layer {index} {slot} is [{} x {}], expected [{} x {}]",
        matrix.rows(),
        matrix.cols(),
        expected.0,
        expected.1
    )))
}

/// Scope in which every bias of a [`Network`] is broadcast to batch width.
///
/// Dereferences to the network. [`BiasExpansion::release`] restores the
/// single-column biases and reports failure; dropping the guard without
/// releasing restores them as well and logs any failure.
pub struct BiasExpansion<'a> {
    network: &'a mut Network,
    active: bool,
}

impl BiasExpansion<'_> {
    pub fn release(mut self) -> Result<()> {
        self.active = false;
        self.network.shrink_biases()
    }
}

impl Deref for BiasExpansion<'_> {
    type Target = Network;

    fn deref(&self) -> &Network {
        self.network
    }
}

impl DerefMut for BiasExpansion<'_> {
    fn deref_mut(&mut self) -> &mut Network {
        self.network
    }
}

impl Drop for BiasExpansion<'_> {
    fn drop(&mut self) {
        if self.active {
            if let Err(e) = self.network.shrink_biases() {
                error!("BiasExpansion: failed to restore biases: {e}");
            }
        }
    }
}
