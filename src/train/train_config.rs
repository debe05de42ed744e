use serde::{Deserialize, Serialize};

use crate::error::{NnError, Result};

fn default_batch_size() -> usize {
    1
}

fn default_log_every() -> usize {
    1000
}

/// Configuration for a [`train_network`](crate::train::trainer::train_network) run.
///
/// # Fields
/// - `epochs`: number of passes over the (possibly capped) training set
/// - `samples_per_epoch`: optional cap on the samples used per epoch; the
///   whole set is used when `None`
/// - `batch_size`: `1` trains online one sample at a time, anything larger
///   runs mini-batch steps
/// - `log_every`: emit an `info!` line every this many steps
/// - `seed`: fixes the shuffling RNG for reproducible runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainConfig {
    pub epochs: usize,
    #[serde(default)]
    pub samples_per_epoch: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_log_every")]
    pub log_every: usize,
    #[serde(default)]
    pub seed: Option<u64>,
}

impl TrainConfig {
    pub fn new(epochs: usize, batch_size: usize) -> Self {
        TrainConfig {
            epochs,
            samples_per_epoch: None,
            batch_size,
            log_every: default_log_every(),
            seed: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.epochs == 0 {
            return Err(NnError::InvalidConfig("epochs must be at least 1".to_owned()));
        }
        if self.batch_size == 0 {
            return Err(NnError::InvalidConfig("batch size must be at least 1".to_owned()));
        }
        if self.samples_per_epoch == Some(0) {
            return Err(NnError::InvalidConfig(
                "samples per epoch must be at least 1".to_owned(),
            ));
        }
        Ok(())
    }

    /// Samples used per epoch when `available` samples exist.
    pub fn samples(&self, available: usize) -> usize {
        self.samples_per_epoch
            .map_or(available, |cap| cap.min(available))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_in_from_json() {
        let config: TrainConfig = serde_json::from_str(r#"{ "epochs": 3 }"#).unwrap();
        assert_eq!(config, TrainConfig::new(3, 1));
        config.validate().unwrap();
    }

    #[test]
    fn sample_cap_never_exceeds_dataset() {
        let mut config = TrainConfig::new(1, 1);
        assert_eq!(config.samples(50), 50);
        config.samples_per_epoch = Some(20);
        assert_eq!(config.samples(50), 20);
        assert_eq!(config.samples(5), 5);
    }

    #[test]
    fn rejects_zero_sizes() {
        assert!(TrainConfig::new(0, 1).validate().is_err());
        assert!(TrainConfig::new(1, 0).validate().is_err());
        let mut config = TrainConfig::new(1, 1);
        config.samples_per_epoch = Some(0);
        assert!(config.validate().is_err());
    }
}
