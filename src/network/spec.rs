use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{NnError, Result};
use crate::loss::loss_type::CostFunction;
use crate::network::network::{check_layer_sizes, Network};

fn default_learning_rate() -> f64 {
    0.1
}

/// A serializable description of a network's architecture and training
/// hyperparameters, stored separately from any trained parameters.
///
/// ```json
/// { "layers": [784, 30, 10], "learning_rate": 0.5, "lambda": 5.0,
///   "cost": "cross_entropy", "generate_biases": true }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkSpec {
    /// Neuron count per layer, input first.
    pub layers: Vec<usize>,
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    /// L2 regularization strength.
    #[serde(default)]
    pub lambda: f64,
    #[serde(default)]
    pub cost: CostFunction,
    #[serde(default)]
    pub generate_biases: bool,
}

impl NetworkSpec {
    pub fn new(layers: Vec<usize>, learning_rate: f64, lambda: f64, cost: CostFunction) -> NetworkSpec {
        NetworkSpec {
            layers,
            learning_rate,
            lambda,
            cost,
            generate_biases: false,
        }
    }

    /// Rejects architectures that could never be trained.
    pub fn validate(&self) -> Result<()> {
        check_layer_sizes(&self.layers)?;
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return Err(NnError::InvalidConfig(format!(
                "learning rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if !self.lambda.is_finite() || self.lambda < 0.0 {
            return Err(NnError::InvalidConfig(format!(
                "lambda must be non-negative, got {}",
                self.lambda
            )));
        }
        Ok(())
    }

    pub fn build(&self) -> Result<Network> {
        self.build_with_rng(&mut rand::thread_rng())
    }

    pub fn build_with_rng<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Network> {
        self.validate()?;
        Network::with_rng(
            &self.layers,
            self.learning_rate,
            self.lambda,
            self.generate_biases,
            self.cost,
            rng,
        )
    }

    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<NetworkSpec> {
        let reader = BufReader::new(File::open(path)?);
        let spec: NetworkSpec = serde_json::from_reader(reader)?;
        spec.validate()?;
        Ok(spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_with_defaults() {
        let spec: NetworkSpec = serde_json::from_str(r#"{ "layers": [4, 3, 2] }"#).unwrap();
        assert_eq!(spec.learning_rate, 0.1);
        assert_eq!(spec.lambda, 0.0);
        assert_eq!(spec.cost, CostFunction::Quadratic);
        assert!(!spec.generate_biases);
        assert_eq!(spec.build().unwrap().layer_sizes(), vec![4, 3, 2]);
    }

    #[test]
    fn parses_cross_entropy() {
        let spec: NetworkSpec =
            serde_json::from_str(r#"{ "layers": [2, 1], "cost": "cross_entropy", "lambda": 5.0 }"#)
                .unwrap();
        assert_eq!(spec.cost, CostFunction::CrossEntropy);
        assert_eq!(spec.build().unwrap().lambda(), 5.0);
    }

    #[test]
    fn rejects_unusable_architectures() {
        let mut spec = NetworkSpec::new(vec![3], 0.1, 0.0, CostFunction::Quadratic);
        assert!(spec.build().is_err());
        spec.layers = vec![3, 0, 2];
        assert!(spec.validate().is_err());
        spec.layers = vec![3, 2];
        spec.learning_rate = -1.0;
        assert!(spec.validate().is_err());
        spec.learning_rate = 0.5;
        spec.lambda = -0.1;
        assert!(spec.validate().is_err());
    }

    #[test]
    fn file_round_trip() {
        let spec = NetworkSpec::new(vec![5, 4, 3], 0.5, 2.0, CostFunction::CrossEntropy);
        let path = std::env::temp_dir().join(format!("ferrite-mlp-spec-{}.json", std::process::id()));
        spec.save_json(&path).unwrap();
        let loaded = NetworkSpec::load_json(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(loaded, spec);
    }
}
