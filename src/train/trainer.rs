use std::time::Instant;

use log::{debug, info};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::data::idx::{MnistImages, MnistLabels};
use crate::error::{NnError, Result};
use crate::math::matrix::{Matrix, Orientation};
use crate::network::network::Network;
use crate::train::epoch_stats::EpochStats;
use crate::train::train_config::TrainConfig;

/// Outcome of [`evaluate`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    pub correct: usize,
    pub total: usize,
}

impl Evaluation {
    /// Fraction of samples classified correctly, in [0, 1].
    pub fn accuracy(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.correct as f64 / self.total as f64
    }
}

/// Trains `network` on an image/label dataset for `config.epochs` epochs and
/// returns one [`EpochStats`] per epoch.
///
/// Every epoch draws a fresh shuffle. With `batch_size == 1` each shuffled
/// sample gets its own [`Network::train`] step. Otherwise the capped sample
/// range is cut into contiguous batches which are visited in shuffled order
/// through [`Network::batch_train`]. Either way the weight decay is scaled by
/// the number of samples used per epoch.
///
/// Batch membership is fixed: samples `0..b` always form the first batch,
/// `b..2b` the second, and so on. Only the order of the batches changes
/// between epochs.
pub fn train_network(
    network: &mut Network,
    images: &MnistImages,
    labels: &MnistLabels,
    config: &TrainConfig,
) -> Result<Vec<EpochStats>> {
    config.validate()?;
    check_dataset(network, images, labels)?;
    let samples = config.samples(images.len());
    if samples == 0 {
        return Err(NnError::Dataset("training set is empty".to_owned()));
    }

    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    info!(
        "training {:?} for {} epochs, {} samples per epoch, batch size {}",
        network.layer_sizes(),
        config.epochs,
        samples,
        config.batch_size
    );

    let mut history = Vec::with_capacity(config.epochs);
    for epoch in 1..=config.epochs {
        let started = Instant::now();
        let total_loss = if config.batch_size == 1 {
            online_epoch(network, images, labels, config, samples, &mut rng)?
        } else {
            batch_epoch(network, images, labels, config, samples, &mut rng)?
        };

        let stats = EpochStats {
            epoch,
            total_epochs: config.epochs,
            mean_loss: total_loss / samples as f64,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            "epoch {}/{}: mean loss {:.6} ({} ms)",
            stats.epoch, stats.total_epochs, stats.mean_loss, stats.elapsed_ms
        );
        history.push(stats);
    }
    Ok(history)
}

/// Classifies the first `count` samples (capped at the dataset size) and
/// compares the highest-scoring output row with each label.
pub fn evaluate(
    network: &Network,
    images: &MnistImages,
    labels: &MnistLabels,
    count: usize,
) -> Result<Evaluation> {
    check_dataset(network, images, labels)?;
    let total = count.min(images.len());
    if total == 0 {
        return Err(NnError::Dataset("nothing to evaluate".to_owned()));
    }

    let mut input = Matrix::zeros(images.image_size(), 1);
    let mut correct = 0;
    for i in 0..total {
        images.get_flat_into(i, &mut input)?;
        let prediction = network.inference(&input)?.max_idx(Orientation::Column, 0)?;
        if prediction == usize::from(labels.get(i)?) {
            correct += 1;
        }
    }

    let evaluation = Evaluation { correct, total };
    info!(
        "evaluated {total} samples: {correct} correct ({:.2}%)",
        evaluation.accuracy() * 100.0
    );
    Ok(evaluation)
}

fn online_epoch(
    network: &mut Network,
    images: &MnistImages,
    labels: &MnistLabels,
    config: &TrainConfig,
    samples: usize,
    rng: &mut StdRng,
) -> Result<f64> {
    let mut order: Vec<usize> = (0..images.len()).collect();
    order.shuffle(rng);

    let mut input = Matrix::zeros(images.image_size(), 1);
    let mut label = Matrix::zeros(labels.num_classes(), 1);
    let mut total = 0.0;
    for (step, &index) in order.iter().take(samples).enumerate() {
        images.get_flat_into(index, &mut input)?;
        labels.one_hot_into(index, &mut label)?;
        let loss = network.train(&input, &label, samples)?;
        total += loss;
        if config.log_every > 0 && step % config.log_every == 0 {
            info!("online step {step} loss={loss:.6}");
        }
    }
    Ok(total)
}

fn batch_epoch(
    network: &mut Network,
    images: &MnistImages,
    labels: &MnistLabels,
    config: &TrainConfig,
    samples: usize,
    rng: &mut StdRng,
) -> Result<f64> {
    let batch_size = config.batch_size.min(samples);
    let mut starts: Vec<usize> = (0..samples).step_by(batch_size).collect();
    starts.shuffle(rng);

    let mut inputs = Matrix::zeros(images.image_size(), batch_size);
    let mut targets = Matrix::zeros(labels.num_classes(), batch_size);
    let mut total = 0.0;
    for (step, &start) in starts.iter().enumerate() {
        let end = (start + batch_size).min(samples);
        let loss = if end - start == batch_size {
            images.images_from_range_into(start, end, &mut inputs)?;
            labels.labels_from_range_into(start, end, &mut targets)?;
            network.batch_train(&inputs, &targets, samples)?
        } else {
            debug!("short batch {start}..{end}");
            let inputs = images.images_from_range(start, end)?;
            let targets = labels.labels_from_range(start, end)?;
            network.batch_train(&inputs, &targets, samples)?
        };
        total += loss * (end - start) as f64;
        if config.log_every > 0 && step % config.log_every == 0 {
            info!("batch step {step} ({start}..{end}) loss={loss:.6}");
        }
    }
    Ok(total)
}

fn check_dataset(network: &Network, images: &MnistImages, labels: &MnistLabels) -> Result<()> {
    if images.len() != labels.len() {
        return Err(NnError::Dataset(format!(
            "{} images but {} labels",
            images.len(),
            labels.len()
        )));
    }
    let sizes = network.layer_sizes();
    let (Some(&inputs), Some(&outputs)) = (sizes.first(), sizes.last()) else {
        return Err(NnError::InvalidConfig("network has no layers".to_owned()));
    };
    if inputs != images.image_size() || outputs != labels.num_classes() {
        return Err(NnError::InvalidConfig(format!(
            "network maps {inputs} inputs to {outputs} outputs but the dataset has {} pixels and {} classes",
            images.image_size(),
            labels.num_classes()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::idx::tests::{image_bytes, label_bytes};
    use crate::loss::loss_type::CostFunction;

    fn dataset() -> (MnistImages, MnistLabels) {
        let images = MnistImages::from_bytes(&image_bytes(6, 2, 2)).unwrap();
        let labels =
            MnistLabels::from_bytes_with_classes(&label_bytes(&[0, 1, 0, 1, 0, 1]), 2).unwrap();
        (images, labels)
    }

    fn network(cost: CostFunction) -> Network {
        Network::with_rng(&[4, 3, 2], 0.5, 0.1, true, cost, &mut StdRng::seed_from_u64(21)).unwrap()
    }

    #[test]
    fn online_training_reports_every_epoch() {
        let (images, labels) = dataset();
        let mut net = network(CostFunction::Quadratic);
        let mut config = TrainConfig::new(3, 1);
        config.seed = Some(1);
        let history = train_network(&mut net, &images, &labels, &config).unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[2].epoch, 3);
        assert!(history.iter().all(|s| s.mean_loss.is_finite() && s.mean_loss >= 0.0));
    }

    #[test]
    fn seeded_runs_are_reproducible() {
        let (images, labels) = dataset();
        let mut config = TrainConfig::new(2, 4);
        config.seed = Some(7);
        config.samples_per_epoch = Some(5);

        let mut a = network(CostFunction::CrossEntropy);
        let mut b = a.clone();
        let ha = train_network(&mut a, &images, &labels, &config).unwrap();
        let hb = train_network(&mut b, &images, &labels, &config).unwrap();
        for (x, y) in ha.iter().zip(&hb) {
            assert_eq!(x.mean_loss, y.mean_loss);
        }
        let held_out = images.get_flat(3).unwrap();
        assert_eq!(a.inference(&held_out).unwrap(), b.inference(&held_out).unwrap());
    }

    #[test]
    fn batches_are_fixed_contiguous_groups() {
        let (images, labels) = dataset();
        let mut config = TrainConfig::new(1, 3);
        config.samples_per_epoch = Some(3);
        config.seed = Some(99);

        let mut trained = network(CostFunction::Quadratic);
        let mut manual = trained.clone();
        train_network(&mut trained, &images, &labels, &config).unwrap();
        manual
            .batch_train(
                &images.images_from_range(0, 3).unwrap(),
                &labels.labels_from_range(0, 3).unwrap(),
                3,
            )
            .unwrap();

        let held_out = images.get_flat(5).unwrap();
        assert_eq!(trained.inference(&held_out).unwrap(), manual.inference(&held_out).unwrap());
    }

    #[test]
    fn rejects_mismatched_dataset() {
        let (images, labels) = dataset();
        let mut wrong = Network::new(&[5, 2], 0.1, 0.0, false, CostFunction::Quadratic).unwrap();
        assert!(train_network(&mut wrong, &images, &labels, &TrainConfig::new(1, 1)).is_err());
        assert!(evaluate(&wrong, &images, &labels, 6).is_err());

        let short = MnistLabels::from_bytes_with_classes(&label_bytes(&[0, 1]), 2).unwrap();
        let net = network(CostFunction::Quadratic);
        assert!(evaluate(&net, &images, &short, 2).is_err());
    }

    #[test]
    fn evaluation_counts_matches() {
        let (images, labels) = dataset();
        let net = network(CostFunction::Quadratic);
        let result = evaluate(&net, &images, &labels, 100).unwrap();
        assert_eq!(result.total, 6);
        assert!(result.correct <= 6);
        assert!((0.0..=1.0).contains(&result.accuracy()));
        assert_eq!(Evaluation { correct: 3, total: 4 }.accuracy(), 0.75);
    }
}
